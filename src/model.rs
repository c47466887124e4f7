use crate::numeric;
use crate::qname::QName;
use ahash::AHashMap;
use compact_str::CompactString;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

// ============================================================================
// Concepts
// ============================================================================

/// Identity of a concept: (namespace URI, local name)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConceptKey {
    pub namespace: String,
    pub local_name: String,
}

impl ConceptKey {
    pub fn new(namespace: impl Into<String>, local_name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            local_name: local_name.into(),
        }
    }
}

impl fmt::Display for ConceptKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.namespace, self.local_name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeriodType {
    Duration,
    Instant,
    Forever,
}

impl PeriodType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PeriodType::Duration => "duration",
            PeriodType::Instant => "instant",
            PeriodType::Forever => "forever",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "duration" => Some(PeriodType::Duration),
            "instant" => Some(PeriodType::Instant),
            "forever" => Some(PeriodType::Forever),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Balance {
    Debit,
    Credit,
}

impl Balance {
    pub fn as_str(&self) -> &'static str {
        match self {
            Balance::Debit => "debit",
            Balance::Credit => "credit",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "debit" => Some(Balance::Debit),
            "credit" => Some(Balance::Credit),
            _ => None,
        }
    }
}

/// Where a concept definition came from. Taxonomy definitions are
/// authoritative; fact-derived stubs only stand in until one is found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConceptOrigin {
    Taxonomy,
    Fact,
}

impl ConceptOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConceptOrigin::Taxonomy => "taxonomy",
            ConceptOrigin::Fact => "fact",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Concept {
    pub key: ConceptKey,
    pub qname: String,
    pub id_attr: Option<String>,
    pub substitution_group: Option<String>,
    pub type_name: Option<String>,
    pub period_type: Option<PeriodType>,
    pub balance: Option<Balance>,
    pub is_abstract: bool,
    pub nillable: bool,
    pub documentation: Option<String>,
    pub origin: ConceptOrigin,
}

impl Concept {
    /// A concept known only because a fact referenced it.
    pub fn stub(key: ConceptKey, qname: impl Into<String>) -> Self {
        Self {
            key,
            qname: qname.into(),
            id_attr: None,
            substitution_group: None,
            type_name: None,
            period_type: None,
            balance: None,
            is_abstract: false,
            nillable: true,
            documentation: None,
            origin: ConceptOrigin::Fact,
        }
    }

    pub fn is_stub(&self) -> bool {
        self.origin == ConceptOrigin::Fact
    }

    /// Fold a later definition of the same concept into this one.
    ///
    /// Non-null values already present are never overwritten; missing ones
    /// are backfilled. A stub that meets its taxonomy definition takes over
    /// the taxonomy's name and flags.
    pub fn merge(&mut self, other: Concept) {
        debug_assert_eq!(self.key, other.key);

        if self.is_stub() && !other.is_stub() {
            self.qname = other.qname;
            self.is_abstract = other.is_abstract;
            self.nillable = other.nillable;
            self.origin = ConceptOrigin::Taxonomy;
        }

        backfill(&mut self.id_attr, other.id_attr);
        backfill(&mut self.substitution_group, other.substitution_group);
        backfill(&mut self.type_name, other.type_name);
        backfill(&mut self.period_type, other.period_type);
        backfill(&mut self.balance, other.balance);
        backfill(&mut self.documentation, other.documentation);
    }
}

fn backfill<T>(slot: &mut Option<T>, value: Option<T>) {
    if slot.is_none() {
        *slot = value;
    }
}

// ============================================================================
// Taxonomy
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkbaseRef {
    pub target_namespace: String,
    pub href: Option<String>,
    pub role: Option<String>,
    pub arcrole: Option<String>,
    pub link_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoleRef {
    pub target_namespace: String,
    pub role_uri: Option<String>,
    pub href: Option<String>,
}

/// Everything gathered from one taxonomy resolution
#[derive(Debug, Clone, Default)]
pub struct Taxonomy {
    pub concepts: AHashMap<ConceptKey, Concept>,
    pub linkbase_refs: Vec<LinkbaseRef>,
    pub role_refs: Vec<RoleRef>,
    /// Canonical paths of the schemas that were visited, in visit order
    pub schemas: Vec<PathBuf>,
}

impl Taxonomy {
    pub fn concept(&self, namespace: &str, local_name: &str) -> Option<&Concept> {
        self.concepts.get(&ConceptKey::new(namespace, local_name))
    }

    pub fn contains(&self, key: &ConceptKey) -> bool {
        self.concepts.contains_key(key)
    }

    /// Register a definition, merging into an existing one for the same key.
    pub fn insert(&mut self, concept: Concept) {
        match self.concepts.get_mut(&concept.key) {
            Some(existing) => existing.merge(concept),
            None => {
                self.concepts.insert(concept.key.clone(), concept);
            }
        }
    }
}

// ============================================================================
// Contexts
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Context {
    pub id: CompactString,
    pub entity: Entity,
    pub period: Period,
    /// Dates exactly as declared, including ones the derived period drops
    pub dates: PeriodDates,
    pub segment: Dimensions,
    pub scenario: Dimensions,
}

impl Context {
    pub fn dimensions(&self, scope: DimensionScope) -> &Dimensions {
        match scope {
            DimensionScope::Segment => &self.segment,
            DimensionScope::Scenario => &self.scenario,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub identifier: Option<String>,
    pub scheme: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PeriodDates {
    pub start: Option<String>,
    pub end: Option<String>,
    pub instant: Option<String>,
}

impl PeriodDates {
    pub fn period(&self) -> Period {
        Period::from_parts(self.start.clone(), self.end.clone(), self.instant.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Period {
    Duration { start: String, end: String },
    Instant { date: String },
    Forever,
}

impl Period {
    /// Start and end together make a duration, an instant alone an instant,
    /// anything else is forever.
    pub fn from_parts(start: Option<String>, end: Option<String>, instant: Option<String>) -> Self {
        match (start, end, instant) {
            (Some(start), Some(end), _) => Period::Duration { start, end },
            (_, _, Some(date)) => Period::Instant { date },
            _ => Period::Forever,
        }
    }

    pub fn period_type(&self) -> PeriodType {
        match self {
            Period::Duration { .. } => PeriodType::Duration,
            Period::Instant { .. } => PeriodType::Instant,
            Period::Forever => PeriodType::Forever,
        }
    }

    pub fn start(&self) -> Option<&str> {
        match self {
            Period::Duration { start, .. } => Some(start),
            _ => None,
        }
    }

    pub fn end(&self) -> Option<&str> {
        match self {
            Period::Duration { end, .. } => Some(end),
            _ => None,
        }
    }

    pub fn instant(&self) -> Option<&str> {
        match self {
            Period::Instant { date } => Some(date),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DimensionScope {
    Segment,
    Scenario,
}

impl DimensionScope {
    pub const ALL: [DimensionScope; 2] = [DimensionScope::Segment, DimensionScope::Scenario];

    pub fn as_str(&self) -> &'static str {
        match self {
            DimensionScope::Segment => "segment",
            DimensionScope::Scenario => "scenario",
        }
    }
}

// Dimensional qualifiers of one scope, in document order
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Dimensions {
    pub explicit: Vec<ExplicitMember>,
    pub typed: Vec<TypedMember>,
}

impl Dimensions {
    pub fn is_empty(&self) -> bool {
        self.explicit.is_empty() && self.typed.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExplicitMember {
    pub dimension: QName,
    pub member: QName,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypedMember {
    pub dimension: QName,
    /// Inner markup of the typed member, verbatim
    pub xml: String,
}

// ============================================================================
// Units
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Unit {
    pub id: CompactString,
    pub unit_type: UnitType,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitType {
    Simple(Vec<QName>),
    Divide {
        numerator: Vec<QName>,
        denominator: Vec<QName>,
    },
}

impl UnitType {
    pub fn as_str(&self) -> &'static str {
        match self {
            UnitType::Simple(_) => "measure",
            UnitType::Divide { .. } => "divide",
        }
    }
}

// ============================================================================
// Facts
// ============================================================================

/// A fact from a classic XBRL instance, captured verbatim
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fact {
    pub concept: ConceptKey,
    pub qname: String,
    pub context_ref: CompactString,
    pub unit_ref: Option<CompactString>,
    /// Trimmed text content; `None` for nil facts
    pub value: Option<String>,
    pub decimals: Option<String>,
    pub precision: Option<String>,
    pub language: Option<String>,
    pub nil: bool,
    pub xsi_type: Option<String>,
}

impl Fact {
    /// The decimal form stored alongside the raw value. Only plain literals
    /// qualify; nil facts never carry one.
    pub fn decimal_value(&self) -> Option<&str> {
        if self.nil {
            return None;
        }
        self.value.as_deref().and_then(numeric::canonical_decimal)
    }

    pub fn decimals_hint(&self) -> Option<i32> {
        self.decimals.as_deref().and_then(numeric::parse_decimals_hint)
    }
}

/// A fact pulled out of inline markup, normalized and ready to store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InlineFact {
    pub line_item: String,
    pub value: f64,
    pub unit: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn taxonomy_concept() -> Concept {
        Concept {
            key: ConceptKey::new("urn:t", "Revenue"),
            qname: "t:Revenue".to_string(),
            id_attr: Some("t_Revenue".to_string()),
            substitution_group: Some("xbrli:item".to_string()),
            type_name: Some("xbrli:monetaryItemType".to_string()),
            period_type: Some(PeriodType::Duration),
            balance: Some(Balance::Credit),
            is_abstract: false,
            nillable: false,
            documentation: Some("Revenue from sales".to_string()),
            origin: ConceptOrigin::Taxonomy,
        }
    }

    #[test]
    fn test_stub_has_only_identity() {
        let stub = Concept::stub(ConceptKey::new("urn:t", "Revenue"), "t:Revenue");
        assert!(stub.is_stub());
        assert_eq!(stub.id_attr, None);
        assert_eq!(stub.substitution_group, None);
        assert_eq!(stub.type_name, None);
        assert_eq!(stub.period_type, None);
        assert_eq!(stub.balance, None);
        assert_eq!(stub.documentation, None);
    }

    #[test]
    fn test_taxonomy_backfills_stub() {
        let mut concept = Concept::stub(ConceptKey::new("urn:t", "Revenue"), "Revenue");
        concept.merge(taxonomy_concept());
        assert_eq!(concept, taxonomy_concept());
    }

    #[test]
    fn test_merge_never_erases_non_null_values() {
        let mut concept = taxonomy_concept();
        let mut later = taxonomy_concept();
        later.documentation = Some("Other text".to_string());
        later.balance = None;
        later.period_type = Some(PeriodType::Instant);

        concept.merge(later);
        assert_eq!(concept.documentation.as_deref(), Some("Revenue from sales"));
        assert_eq!(concept.balance, Some(Balance::Credit));
        assert_eq!(concept.period_type, Some(PeriodType::Duration));
    }

    #[test]
    fn test_stub_does_not_downgrade_taxonomy_concept() {
        let mut concept = taxonomy_concept();
        concept.merge(Concept::stub(concept.key.clone(), "Revenue"));
        assert_eq!(concept, taxonomy_concept());
    }

    #[test]
    fn test_period_derivation() {
        let some = |s: &str| Some(s.to_string());
        assert_eq!(
            Period::from_parts(some("2024-01-01"), some("2024-03-31"), None).period_type(),
            PeriodType::Duration
        );
        assert_eq!(
            Period::from_parts(None, None, some("2024-03-31")).period_type(),
            PeriodType::Instant
        );
        assert_eq!(Period::from_parts(None, None, None).period_type(), PeriodType::Forever);
        // an incomplete duration falls back to the instant, then to forever
        assert_eq!(
            Period::from_parts(some("2024-01-01"), None, some("2024-03-31")).period_type(),
            PeriodType::Instant
        );
        assert_eq!(
            Period::from_parts(some("2024-01-01"), None, None).period_type(),
            PeriodType::Forever
        );
    }

    #[test]
    fn test_period_dates_survive_derivation() {
        let dates = PeriodDates {
            start: None,
            end: Some("2024-06-30".to_string()),
            instant: None,
        };
        assert_eq!(dates.period(), Period::Forever);
        assert_eq!(dates.end.as_deref(), Some("2024-06-30"));
    }

    #[test]
    fn test_nil_fact_has_no_decimal() {
        let fact = Fact {
            concept: ConceptKey::new("urn:t", "Revenue"),
            qname: "t:Revenue".to_string(),
            context_ref: "c1".into(),
            unit_ref: None,
            value: None,
            decimals: Some("0".to_string()),
            precision: None,
            language: None,
            nil: true,
            xsi_type: None,
        };
        assert_eq!(fact.decimal_value(), None);
        assert_eq!(fact.decimals_hint(), Some(0));
    }
}

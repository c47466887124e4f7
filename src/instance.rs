use crate::model::*;
use crate::qname::QName;
use crate::{strip_bom, Error, Result, XBRLDI_2005_NS, XBRLDI_NS, XBRLI_NS, XML_NS, XSI_NS};
use ahash::{AHashMap, AHashSet};
use compact_str::CompactString;
use roxmltree::{Document, Node, ParsingOptions};
use std::path::Path;
use tracing::debug;

/// Everything read out of one XBRL instance document
#[derive(Debug, Clone, Default)]
pub struct Instance {
    pub contexts: Vec<Context>,
    pub units: Vec<Unit>,
    pub facts: Vec<Fact>,
    /// Stubs for fact concepts the taxonomy does not define, one per key
    pub missing_concepts: Vec<Concept>,
}

pub struct InstanceParser<'t> {
    taxonomy: Option<&'t Taxonomy>,
}

impl Default for InstanceParser<'_> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'t> InstanceParser<'t> {
    pub fn new() -> Self {
        Self { taxonomy: None }
    }

    /// Concepts defined by `taxonomy` are not reported as missing.
    pub fn with_taxonomy(mut self, taxonomy: &'t Taxonomy) -> Self {
        self.taxonomy = Some(taxonomy);
        self
    }

    pub fn parse_file<P: AsRef<Path>>(&self, path: P) -> Result<Instance> {
        let path = path.as_ref();
        let data = std::fs::read(path)?;
        self.parse_bytes(&data)
            .map_err(|e| Error::Parse(format!("Unable to parse XBRL instance {}: {}", path.display(), e)))
    }

    pub fn parse_bytes(&self, data: &[u8]) -> Result<Instance> {
        let text = std::str::from_utf8(strip_bom(data))
            .map_err(|e| Error::Parse(format!("invalid UTF-8: {e}")))?;
        self.parse_str(text)
    }

    pub fn parse_str(&self, text: &str) -> Result<Instance> {
        let options = ParsingOptions {
            allow_dtd: true,
            ..ParsingOptions::default()
        };
        let doc = Document::parse_with_options(text, options).map_err(|e| Error::Parse(e.to_string()))?;
        let root = doc.root_element();

        let mut instance = Instance::default();
        let mut context_index: AHashMap<CompactString, usize> = AHashMap::new();
        let mut unit_index: AHashMap<CompactString, usize> = AHashMap::new();

        for node in root.children().filter(|n| n.is_element()) {
            if node.has_tag_name((XBRLI_NS, "context")) {
                if let Some(context) = parse_context(&doc, node) {
                    upsert(&mut instance.contexts, &mut context_index, context.id.clone(), context);
                }
            } else if node.has_tag_name((XBRLI_NS, "unit")) {
                if let Some(unit) = parse_unit(node) {
                    upsert(&mut instance.units, &mut unit_index, unit.id.clone(), unit);
                }
            }
        }

        let mut seen: AHashSet<ConceptKey> = AHashSet::new();
        for node in root.descendants().filter(|n| n.is_element()) {
            let Some(fact) = parse_fact(node) else {
                continue;
            };

            let known = self.taxonomy.map(|t| t.contains(&fact.concept)).unwrap_or(false);
            if !known && seen.insert(fact.concept.clone()) {
                instance
                    .missing_concepts
                    .push(Concept::stub(fact.concept.clone(), fact.qname.clone()));
            }
            instance.facts.push(fact);
        }

        debug!(
            "Parsed instance: {} contexts, {} units, {} facts, {} concepts without definition",
            instance.contexts.len(),
            instance.units.len(),
            instance.facts.len(),
            instance.missing_concepts.len()
        );
        Ok(instance)
    }
}

// A later declaration with the same id replaces the earlier one in place
fn upsert<T>(items: &mut Vec<T>, index: &mut AHashMap<CompactString, usize>, id: CompactString, item: T) {
    match index.get(&id) {
        Some(&position) => items[position] = item,
        None => {
            index.insert(id, items.len());
            items.push(item);
        }
    }
}

fn parse_context(doc: &Document<'_>, node: Node<'_, '_>) -> Option<Context> {
    let id = node.attribute("id").map(str::trim).filter(|id| !id.is_empty())?;

    let entity_node = child(node, "entity");
    let identifier = entity_node.and_then(|e| child(e, "identifier"));
    let entity = Entity {
        identifier: identifier.map(|n| text_of(n).trim().to_string()),
        scheme: identifier.and_then(|n| n.attribute("scheme")).map(str::to_string),
    };

    let period = child(node, "period");
    let field = |name: &str| {
        period
            .and_then(|p| child(p, name))
            .map(|n| text_of(n).trim().to_string())
    };
    let dates = PeriodDates {
        start: field("startDate"),
        end: field("endDate"),
        instant: field("instant"),
    };
    let period = dates.period();

    let segment = entity_node
        .and_then(|e| child(e, "segment"))
        .map(|scope| parse_dimensions(doc, scope))
        .unwrap_or_default();
    let scenario = child(node, "scenario")
        .map(|scope| parse_dimensions(doc, scope))
        .unwrap_or_default();

    Some(Context {
        id: CompactString::from(id),
        entity,
        period,
        dates,
        segment,
        scenario,
    })
}

fn parse_dimensions(doc: &Document<'_>, scope: Node<'_, '_>) -> Dimensions {
    let mut dimensions = Dimensions::default();

    let dimensional = |n: &Node<'_, '_>| {
        n.is_element() && matches!(n.tag_name().namespace(), Some(XBRLDI_NS) | Some(XBRLDI_2005_NS))
    };

    for member in scope.descendants().filter(dimensional) {
        if member.tag_name().name() == "explicitMember" {
            let dimension = member.attribute("dimension").unwrap_or_default();
            let value = text_of(member);
            dimensions.explicit.push(ExplicitMember {
                dimension: QName::resolve(member, dimension),
                member: QName::resolve(member, value.trim()),
            });
        } else if member.tag_name().name() == "typedMember" {
            let dimension = member.attribute("dimension").unwrap_or_default();
            dimensions.typed.push(TypedMember {
                dimension: QName::resolve(member, dimension),
                xml: inner_xml(doc, member).to_string(),
            });
        }
    }

    dimensions
}

fn parse_unit(node: Node<'_, '_>) -> Option<Unit> {
    let id = node.attribute("id").map(str::trim).filter(|id| !id.is_empty())?;

    let direct = measures(node);
    let unit_type = if !direct.is_empty() {
        UnitType::Simple(direct)
    } else if let Some(divide) = child(node, "divide") {
        UnitType::Divide {
            numerator: child(divide, "unitNumerator").map(measures).unwrap_or_default(),
            denominator: child(divide, "unitDenominator").map(measures).unwrap_or_default(),
        }
    } else {
        debug!("Dropping unit {} with neither measures nor divide", id);
        return None;
    };

    Some(Unit {
        id: CompactString::from(id),
        unit_type,
    })
}

fn measures(node: Node<'_, '_>) -> Vec<QName> {
    node.children()
        .filter(|n| n.has_tag_name((XBRLI_NS, "measure")))
        .map(|n| QName::resolve(n, text_of(n).trim()))
        .collect()
}

fn parse_fact(node: Node<'_, '_>) -> Option<Fact> {
    let context_ref = node.attribute("contextRef")?;

    let tag = node.tag_name();
    let namespace = tag.namespace().unwrap_or_default();
    let local_name = tag.name();
    let prefix = node
        .namespaces()
        .filter(|ns| !namespace.is_empty() && ns.uri() == namespace)
        .find_map(|ns| ns.name());
    let qname = match prefix {
        Some(prefix) => format!("{prefix}:{local_name}"),
        None => local_name.to_string(),
    };

    let nil = node
        .attribute((XSI_NS, "nil"))
        .map(|v| v.trim().eq_ignore_ascii_case("true"))
        .unwrap_or(false);
    let value = if nil {
        None
    } else {
        Some(text_of(node).trim().to_string())
    };

    Some(Fact {
        concept: ConceptKey::new(namespace, local_name),
        qname,
        context_ref: CompactString::from(context_ref),
        unit_ref: node.attribute("unitRef").map(CompactString::from),
        value,
        decimals: node.attribute("decimals").map(str::to_string),
        precision: node.attribute("precision").map(str::to_string),
        language: node
            .attribute((XML_NS, "lang"))
            .filter(|lang| !lang.is_empty())
            .map(str::to_string),
        nil,
        xsi_type: node
            .attribute((XSI_NS, "type"))
            .filter(|t| !t.is_empty())
            .map(str::to_string),
    })
}

fn child<'a, 'input>(node: Node<'a, 'input>, name: &str) -> Option<Node<'a, 'input>> {
    node.children().find(|n| n.has_tag_name((XBRLI_NS, name)))
}

/// Concatenated text of every descendant text node
fn text_of(node: Node<'_, '_>) -> String {
    node.descendants()
        .filter(|n| n.is_text())
        .filter_map(|n| n.text())
        .collect()
}

/// Markup between the element's start and end tags, as written
fn inner_xml<'input>(doc: &Document<'input>, node: Node<'_, 'input>) -> &'input str {
    let (Some(first), Some(last)) = (node.first_child(), node.last_child()) else {
        return "";
    };
    let input = doc.input_text();
    input
        .get(first.range().start..last.range().end)
        .unwrap_or_default()
}

//! SQLite persistence for imported reports and XBRL instances.
//!
//! Every `persist_*` call runs in one transaction: either the whole import
//! becomes visible or none of it does.

use crate::instance::Instance;
use crate::model::*;
use crate::registry::{ConceptIdMap, ConceptRegistry};
use crate::Result;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::path::Path;
use tracing::{debug, info};

/// Schema applied when no override is given
pub const SCHEMA_SQL: &str = include_str!("../sql/schema.sql");

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

/// A classic instance import, ready to be written
pub struct InstanceRecord<'a> {
    pub document_name: &'a str,
    /// SHA-256 of the instance file
    pub document_hash: &'a str,
    pub taxonomy: &'a Taxonomy,
    pub concepts: &'a ConceptRegistry,
    pub instance: &'a Instance,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct InstanceCounts {
    pub document_id: i64,
    pub concepts: usize,
    pub contexts: usize,
    pub units: usize,
    pub facts: usize,
}

/// Inline-extracted lines of one company report
pub struct ReportRecord<'a> {
    pub ticker: &'a str,
    pub company_name: &'a str,
    pub fiscal_year: i32,
    pub fiscal_quarter: u8,
    pub source_file: &'a str,
    pub lines: &'a [InlineFact],
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Company {
    pub ticker: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub company: Company,
    pub fiscal_year: i32,
    pub fiscal_quarter: u8,
    pub source_file: Option<String>,
    pub lines: Vec<InlineFact>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportSummary {
    pub company: Company,
    pub fiscal_year: i32,
    pub fiscal_quarter: u8,
    pub source_file: Option<String>,
    pub line_count: usize,
}

impl SqliteStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with_schema(path, SCHEMA_SQL)
    }

    /// Open (creating if needed) and bootstrap with `schema` instead of the
    /// bundled one.
    pub fn open_with_schema<P: AsRef<Path>>(path: P, schema: &str) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        info!("Opening SQLite database at {}", path.display());

        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.bootstrap(schema)?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self> {
        debug!("Opening in-memory SQLite database");
        let store = Self {
            conn: Mutex::new(Connection::open_in_memory()?),
        };
        store.bootstrap(SCHEMA_SQL)?;
        Ok(store)
    }

    /// Run a batch of schema statements. Statements are expected to be
    /// idempotent (`IF NOT EXISTS`).
    pub fn bootstrap(&self, schema: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute_batch(schema)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Ok(())
    }

    pub fn persist_instance(&self, record: &InstanceRecord<'_>) -> Result<InstanceCounts> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        let document_id = upsert_document(&tx, record.document_name, record.document_hash)?;
        replace_taxonomy_refs(&tx, document_id, record.taxonomy)?;
        let concept_ids = upsert_concepts(&tx, record.concepts)?;
        replace_contexts(&tx, document_id, &record.instance.contexts)?;
        replace_units(&tx, document_id, &record.instance.units)?;
        replace_facts(&tx, document_id, &record.instance.facts, &concept_ids)?;

        tx.commit()?;

        let counts = InstanceCounts {
            document_id,
            concepts: concept_ids.len(),
            contexts: record.instance.contexts.len(),
            units: record.instance.units.len(),
            facts: record.instance.facts.len(),
        };
        debug!("Persisted document {}: {:?}", record.document_name, counts);
        Ok(counts)
    }

    /// Store report lines, replacing any earlier upload for the same
    /// company and period. Returns the report id.
    pub fn persist_report(&self, record: &ReportRecord<'_>) -> Result<i64> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        let company_id = upsert_company(&tx, record.ticker, record.company_name)?;
        let report_id = upsert_report(
            &tx,
            company_id,
            record.fiscal_year,
            record.fiscal_quarter,
            record.source_file,
        )?;

        {
            let mut insert = tx.prepare(
                "INSERT INTO financial_lines (report_id, line_item, value, unit, display_order)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for (order, line) in record.lines.iter().enumerate() {
                insert.execute(params![report_id, line.line_item, line.value, line.unit, order as i64])?;
            }
        }

        tx.commit()?;
        Ok(report_id)
    }

    pub fn find_report(&self, ticker: &str, fiscal_year: i32, fiscal_quarter: u8) -> Result<Option<Report>> {
        let conn = self.conn.lock();

        let header = conn
            .query_row(
                "SELECT r.id, c.ticker, c.name, r.fiscal_year, r.fiscal_quarter, r.source_file
                 FROM financial_reports r
                 INNER JOIN companies c ON c.id = r.company_id
                 WHERE c.ticker = ?1 AND r.fiscal_year = ?2 AND r.fiscal_quarter = ?3",
                params![ticker.to_uppercase(), fiscal_year, fiscal_quarter],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        Report {
                            company: Company {
                                ticker: row.get(1)?,
                                name: row.get(2)?,
                            },
                            fiscal_year: row.get(3)?,
                            fiscal_quarter: row.get(4)?,
                            source_file: row.get(5)?,
                            lines: Vec::new(),
                        },
                    ))
                },
            )
            .optional()?;

        let Some((report_id, mut report)) = header else {
            return Ok(None);
        };

        let mut stmt = conn.prepare(
            "SELECT line_item, value, unit FROM financial_lines
             WHERE report_id = ?1 ORDER BY display_order",
        )?;
        let lines = stmt.query_map([report_id], |row| {
            Ok(InlineFact {
                line_item: row.get(0)?,
                value: row.get(1)?,
                unit: row.get(2)?,
            })
        })?;
        report.lines = lines.collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(Some(report))
    }

    pub fn list_reports(&self) -> Result<Vec<ReportSummary>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT c.ticker, c.name, r.fiscal_year, r.fiscal_quarter, r.source_file,
                    (SELECT COUNT(*) FROM financial_lines l WHERE l.report_id = r.id)
             FROM financial_reports r
             INNER JOIN companies c ON c.id = r.company_id
             ORDER BY c.ticker, r.fiscal_year DESC, r.fiscal_quarter DESC",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(ReportSummary {
                company: Company {
                    ticker: row.get(0)?,
                    name: row.get(1)?,
                },
                fiscal_year: row.get(2)?,
                fiscal_quarter: row.get(3)?,
                source_file: row.get(4)?,
                line_count: row.get::<_, i64>(5)? as usize,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Run `f` against the connection. Used by tests and tooling.
    pub fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = self.conn.lock();
        f(&conn)
    }
}

// ============================================================================
// Instance tables
// ============================================================================

fn upsert_document(tx: &Transaction<'_>, name: &str, hash: &str) -> Result<i64> {
    Ok(tx.query_row(
        "INSERT INTO xbrl_documents (document_name, document_hash) VALUES (?1, ?2)
         ON CONFLICT (document_hash) DO UPDATE SET document_name = excluded.document_name
         RETURNING id",
        params![name, hash],
        |row| row.get(0),
    )?)
}

fn replace_taxonomy_refs(tx: &Transaction<'_>, document_id: i64, taxonomy: &Taxonomy) -> Result<()> {
    tx.execute("DELETE FROM xbrl_taxonomy_linkbases WHERE document_id = ?1", [document_id])?;
    tx.execute("DELETE FROM xbrl_taxonomy_role_refs WHERE document_id = ?1", [document_id])?;

    let mut linkbase = tx.prepare(
        "INSERT INTO xbrl_taxonomy_linkbases
             (document_id, target_namespace, href, role, arcrole, linkbase_type)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
    )?;
    for link in &taxonomy.linkbase_refs {
        linkbase.execute(params![
            document_id,
            link.target_namespace,
            link.href,
            link.role,
            link.arcrole,
            link.link_type
        ])?;
    }

    let mut role = tx.prepare(
        "INSERT INTO xbrl_taxonomy_role_refs (document_id, role_uri, href) VALUES (?1, ?2, ?3)
         ON CONFLICT (document_id, role_uri) DO UPDATE SET href = excluded.href",
    )?;
    for role_ref in &taxonomy.role_refs {
        // a role reference without a URI identifies nothing
        let Some(role_uri) = &role_ref.role_uri else {
            continue;
        };
        role.execute(params![document_id, role_uri, role_ref.href])?;
    }
    Ok(())
}

fn upsert_concepts(tx: &Transaction<'_>, registry: &ConceptRegistry) -> Result<ConceptIdMap> {
    // Metadata is only backfilled; flags and name follow taxonomy rows only.
    let mut stmt = tx.prepare(
        "INSERT INTO xbrl_taxonomy_concepts
             (namespace, local_name, qname, id_attr, substitution_group, type, period_type,
              balance, abstract_flag, nillable_flag, documentation, origin)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
         ON CONFLICT (namespace, local_name) DO UPDATE SET
             qname = CASE WHEN excluded.origin = 'taxonomy' THEN excluded.qname ELSE qname END,
             id_attr = COALESCE(id_attr, excluded.id_attr),
             substitution_group = COALESCE(substitution_group, excluded.substitution_group),
             type = COALESCE(type, excluded.type),
             period_type = COALESCE(period_type, excluded.period_type),
             balance = COALESCE(balance, excluded.balance),
             documentation = COALESCE(documentation, excluded.documentation),
             abstract_flag = CASE WHEN excluded.origin = 'taxonomy' THEN excluded.abstract_flag ELSE abstract_flag END,
             nillable_flag = CASE WHEN excluded.origin = 'taxonomy' THEN excluded.nillable_flag ELSE nillable_flag END,
             origin = CASE WHEN excluded.origin = 'taxonomy' THEN 'taxonomy' ELSE origin END
         RETURNING id",
    )?;

    let mut ids = ConceptIdMap::default();
    for concept in registry.concepts() {
        let id: i64 = stmt.query_row(
            params![
                concept.key.namespace,
                concept.key.local_name,
                concept.qname,
                concept.id_attr,
                concept.substitution_group,
                concept.type_name,
                concept.period_type.map(|p| p.as_str()),
                concept.balance.map(|b| b.as_str()),
                concept.is_abstract,
                concept.nillable,
                concept.documentation,
                concept.origin.as_str(),
            ],
            |row| row.get(0),
        )?;
        ids.insert(concept.key.clone(), id);
    }
    Ok(ids)
}

fn replace_contexts(tx: &Transaction<'_>, document_id: i64, contexts: &[Context]) -> Result<()> {
    tx.execute("DELETE FROM xbrl_context_dimensions WHERE document_id = ?1", [document_id])?;
    tx.execute("DELETE FROM xbrl_contexts WHERE document_id = ?1", [document_id])?;

    let mut context_stmt = tx.prepare(
        "INSERT INTO xbrl_contexts
             (document_id, context_id, entity_identifier, entity_scheme, period_type,
              start_date, end_date, instant, segment_json, scenario_json)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
    )?;
    let mut dimension_stmt = tx.prepare(
        "INSERT INTO xbrl_context_dimensions
             (document_id, context_id, location, dimension, member, is_typed, typed_member_xml)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
    )?;

    for context in contexts {
        context_stmt.execute(params![
            document_id,
            context.id.as_str(),
            context.entity.identifier,
            context.entity.scheme,
            context.period.period_type().as_str(),
            context.dates.start,
            context.dates.end,
            context.dates.instant,
            dimensions_json(&context.segment)?,
            dimensions_json(&context.scenario)?,
        ])?;

        for scope in DimensionScope::ALL {
            let dimensions = context.dimensions(scope);
            for member in &dimensions.explicit {
                dimension_stmt.execute(params![
                    document_id,
                    context.id.as_str(),
                    scope.as_str(),
                    member.dimension.qname,
                    member.member.qname,
                    false,
                    None::<String>,
                ])?;
            }
            for member in &dimensions.typed {
                dimension_stmt.execute(params![
                    document_id,
                    context.id.as_str(),
                    scope.as_str(),
                    member.dimension.qname,
                    None::<String>,
                    true,
                    member.xml,
                ])?;
            }
        }
    }
    Ok(())
}

fn dimensions_json(dimensions: &Dimensions) -> Result<Option<String>> {
    if dimensions.is_empty() {
        return Ok(None);
    }
    Ok(Some(serde_json::to_string(dimensions)?))
}

fn replace_units(tx: &Transaction<'_>, document_id: i64, units: &[Unit]) -> Result<()> {
    tx.execute("DELETE FROM xbrl_units WHERE document_id = ?1", [document_id])?;

    let mut stmt = tx.prepare(
        "INSERT INTO xbrl_units (document_id, unit_id, unit_type, measures_json)
         VALUES (?1, ?2, ?3, ?4)",
    )?;
    for unit in units {
        let names = |measures: &[crate::QName]| -> Vec<String> {
            measures.iter().map(|m| m.qname.clone()).collect()
        };
        let measures = match &unit.unit_type {
            UnitType::Simple(measures) => json!(names(measures)),
            UnitType::Divide { numerator, denominator } => json!({
                "numerators": names(numerator),
                "denominators": names(denominator),
            }),
        };
        stmt.execute(params![
            document_id,
            unit.id.as_str(),
            unit.unit_type.as_str(),
            serde_json::to_string(&measures)?,
        ])?;
    }
    Ok(())
}

fn replace_facts(tx: &Transaction<'_>, document_id: i64, facts: &[Fact], concept_ids: &ConceptIdMap) -> Result<()> {
    tx.execute("DELETE FROM xbrl_facts WHERE document_id = ?1", [document_id])?;

    let mut stmt = tx.prepare(
        "INSERT INTO xbrl_facts
             (document_id, concept_id, concept_namespace, concept_local_name, concept_qname,
              context_id, unit_id, value_decimal, value_string, decimals_attr, precision_attr,
              language, xsi_type, is_nil)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
    )?;
    for fact in facts {
        stmt.execute(params![
            document_id,
            concept_ids.get(&fact.concept),
            fact.concept.namespace,
            fact.concept.local_name,
            fact.qname,
            fact.context_ref.as_str(),
            fact.unit_ref.as_deref(),
            fact.decimal_value(),
            fact.value,
            fact.decimals,
            fact.precision,
            fact.language,
            fact.xsi_type,
            fact.nil,
        ])?;
    }
    Ok(())
}

// ============================================================================
// Report tables
// ============================================================================

fn upsert_company(tx: &Transaction<'_>, ticker: &str, name: &str) -> Result<i64> {
    Ok(tx.query_row(
        "INSERT INTO companies (ticker, name) VALUES (?1, ?2)
         ON CONFLICT (ticker) DO UPDATE SET name = excluded.name
         RETURNING id",
        params![ticker.to_uppercase(), name],
        |row| row.get(0),
    )?)
}

fn upsert_report(tx: &Transaction<'_>, company_id: i64, year: i32, quarter: u8, source_file: &str) -> Result<i64> {
    let existing: Option<i64> = tx
        .query_row(
            "SELECT id FROM financial_reports
             WHERE company_id = ?1 AND fiscal_year = ?2 AND fiscal_quarter = ?3",
            params![company_id, year, quarter],
            |row| row.get(0),
        )
        .optional()?;

    match existing {
        Some(report_id) => {
            tx.execute("DELETE FROM financial_lines WHERE report_id = ?1", [report_id])?;
            tx.execute(
                "UPDATE financial_reports SET source_file = ?1 WHERE id = ?2",
                params![source_file, report_id],
            )?;
            Ok(report_id)
        }
        None => {
            tx.execute(
                "INSERT INTO financial_reports (company_id, fiscal_year, fiscal_quarter, source_file)
                 VALUES (?1, ?2, ?3, ?4)",
                params![company_id, year, quarter, source_file],
            )?;
            Ok(tx.last_insert_rowid())
        }
    }
}

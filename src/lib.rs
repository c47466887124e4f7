//! readxbrl - XBRL and inline XBRL ingestion
//!
//! Licensed under AGPL-3.0

pub mod archive;
pub mod cache;
pub mod config;
pub mod fetch;
pub mod import;
pub mod inline;
pub mod instance;
pub mod model;
pub mod numeric;
pub mod qname;
pub mod registry;
pub mod schema;
pub mod service;
pub mod store;

pub use archive::Archive;
pub use cache::SchemaCache;
pub use config::Config;
pub use fetch::{Fetch, HttpFetcher};
pub use import::{ImportSummary, InstanceImporter};
pub use inline::FactExtractor;
pub use instance::InstanceParser;
pub use model::{Concept, ConceptKey, Context, Fact, InlineFact, Taxonomy, Unit};
pub use numeric::normalize;
pub use qname::QName;
pub use registry::ConceptRegistry;
pub use schema::TaxonomyResolver;
pub use service::{ApiResponse, ImportedReport, ReportRequest, ReportService};
pub use store::{Report, ReportSummary, SqliteStore};

// Namespaces of the XBRL 2.1 and XML Schema vocabularies
pub const XBRLI_NS: &str = "http://www.xbrl.org/2003/instance";
pub const XBRLDI_NS: &str = "http://xbrl.org/2006/xbrldi";
/// Pre-recommendation dimensions namespace, still found in older filings
pub const XBRLDI_2005_NS: &str = "http://xbrl.org/2005/xbrldi";
pub const LINK_NS: &str = "http://www.xbrl.org/2003/linkbase";
pub const XLINK_NS: &str = "http://www.w3.org/1999/xlink";
pub const XS_NS: &str = "http://www.w3.org/2001/XMLSchema";
pub const XSI_NS: &str = "http://www.w3.org/2001/XMLSchema-instance";
pub const XML_NS: &str = "http://www.w3.org/XML/1998/namespace";

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    NotFound(String),

    #[error("no financial facts found in archive")]
    NoFacts,

    #[error("Fetch error: {0}")]
    Fetch(String),

    #[error("Archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Errors caused by caller input rather than by the system itself.
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            Error::Validation(_) | Error::NotFound(_) | Error::NoFacts
        )
    }
}

/// Strip a UTF-8 byte order mark, if present.
pub(crate) fn strip_bom(data: &[u8]) -> &[u8] {
    if data.starts_with(&[0xEF, 0xBB, 0xBF]) {
        &data[3..]
    } else {
        data
    }
}

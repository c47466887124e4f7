//! Standalone import of a classic XBRL filing archive.
//!
//! The archive is unpacked into a temporary directory, the taxonomy rooted at
//! `Taxonomy.xsd` is resolved, `instance.xbrl` is parsed against it, and the
//! result is written to the store in one transaction.

use crate::archive::Archive;
use crate::fetch::{Fetch, HttpFetcher};
use crate::instance::InstanceParser;
use crate::registry::ConceptRegistry;
use crate::schema::TaxonomyResolver;
use crate::store::{InstanceRecord, SqliteStore};
use crate::{Error, Result};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tracing::info;

pub const INSTANCE_FILE: &str = "instance.xbrl";
pub const TAXONOMY_FILE: &str = "Taxonomy.xsd";

#[derive(Debug, Clone, Serialize)]
pub struct ImportSummary {
    pub document_id: i64,
    pub document_name: String,
    pub schemas: usize,
    pub concepts: usize,
    pub missing_concepts: usize,
    pub contexts: usize,
    pub units: usize,
    pub facts: usize,
    /// Where the unpacked archive was left, when asked to keep it
    pub kept_dir: Option<PathBuf>,
}

pub struct InstanceImporter<'s, F = HttpFetcher> {
    store: &'s SqliteStore,
    resolver: TaxonomyResolver<F>,
    keep_temp: bool,
}

impl<'s, F: Fetch> InstanceImporter<'s, F> {
    pub fn new(store: &'s SqliteStore, resolver: TaxonomyResolver<F>) -> Self {
        Self {
            store,
            resolver,
            keep_temp: false,
        }
    }

    pub fn keep_temp(mut self, keep: bool) -> Self {
        self.keep_temp = keep;
        self
    }

    pub fn import<P: AsRef<Path>>(&self, zip_path: P) -> Result<ImportSummary> {
        let zip_path = zip_path.as_ref();
        let mut archive = Archive::open(zip_path)?;

        let instance_member = archive
            .find_member(INSTANCE_FILE)
            .ok_or_else(|| Error::NotFound(format!("{INSTANCE_FILE} not found in archive")))?;
        let taxonomy_member = archive
            .find_member(TAXONOMY_FILE)
            .ok_or_else(|| Error::NotFound(format!("{TAXONOMY_FILE} not found in archive")))?;

        let temp = tempfile::Builder::new().prefix("xbrl_import_").tempdir()?;
        info!("Extracting {} to {}", zip_path.display(), temp.path().display());
        archive.extract_to(temp.path())?;

        let instance_path = temp.path().join(&instance_member);
        let taxonomy_path = temp.path().join(&taxonomy_member);

        info!("Resolving taxonomy {}", taxonomy_member);
        let taxonomy = self.resolver.resolve(&taxonomy_path);
        info!(
            "Taxonomy: {} concepts from {} schemas",
            taxonomy.concepts.len(),
            taxonomy.schemas.len()
        );

        info!("Parsing instance {}", instance_member);
        let instance = InstanceParser::new()
            .with_taxonomy(&taxonomy)
            .parse_file(&instance_path)?;

        let mut registry = ConceptRegistry::from_taxonomy(&taxonomy);
        let missing = registry.add_stubs(instance.missing_concepts.iter().cloned());

        let document_hash = hex::encode(Sha256::digest(std::fs::read(&instance_path)?));
        let document_name = zip_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| zip_path.display().to_string());

        let counts = self.store.persist_instance(&InstanceRecord {
            document_name: &document_name,
            document_hash: &document_hash,
            taxonomy: &taxonomy,
            concepts: &registry,
            instance: &instance,
        })?;

        let kept_dir = if self.keep_temp {
            let dir = temp.keep();
            info!("Temporary files kept at {}", dir.display());
            Some(dir)
        } else {
            None
        };

        Ok(ImportSummary {
            document_id: counts.document_id,
            document_name,
            schemas: taxonomy.schemas.len(),
            concepts: counts.concepts,
            missing_concepts: missing,
            contexts: counts.contexts,
            units: counts.units,
            facts: counts.facts,
            kept_dir,
        })
    }
}

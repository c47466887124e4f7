//! On-disk cache for remotely fetched taxonomy schemas.
//!
//! Entries are named by the SHA-256 of their URL, so two imports that meet the
//! same schema share one file. Writes land in a temporary file first and are
//! renamed into place; when two writers race for the same URL both produce
//! identical content and the loser's rename simply replaces it.

use crate::Result;
use sha2::{Digest, Sha256};
use std::io::Write;
use std::path::{Path, PathBuf};
use url::Url;

const DEFAULT_EXTENSION: &str = "xsd";

#[derive(Debug, Clone)]
pub struct SchemaCache {
    dir: PathBuf,
}

impl SchemaCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// `<sha256(url)>.<ext>`, keeping the extension of the URL path when it
    /// has one.
    pub fn file_name(url: &str) -> String {
        let hash = hex::encode(Sha256::digest(url.as_bytes()));
        let extension = Url::parse(url)
            .ok()
            .and_then(|parsed| {
                Path::new(parsed.path())
                    .extension()
                    .and_then(|ext| ext.to_str())
                    .filter(|ext| !ext.is_empty())
                    .map(str::to_string)
            })
            .unwrap_or_else(|| DEFAULT_EXTENSION.to_string());
        format!("{hash}.{extension}")
    }

    pub fn path_for(&self, url: &str) -> PathBuf {
        self.dir.join(Self::file_name(url))
    }

    pub fn exists(&self, path: &Path) -> bool {
        path.is_file()
    }

    pub fn read(&self, path: &Path) -> Result<Vec<u8>> {
        Ok(std::fs::read(path)?)
    }

    pub fn write(&self, path: &Path, data: &[u8]) -> Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        let mut tmp = tempfile::NamedTempFile::new_in(&self.dir)?;
        tmp.write_all(data)?;
        tmp.persist(path).map_err(|e| e.error)?;
        Ok(())
    }
}

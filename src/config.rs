use crate::fetch::FETCH_TIMEOUT;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_DATABASE: &str = "data/xbrl.sqlite";
pub const DEFAULT_CACHE_DIR: &str = "cache/taxonomy";
pub const DEFAULT_STORAGE_DIR: &str = "instance_files";

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub database_path: PathBuf,
    pub cache_dir: PathBuf,
    /// Where uploaded archives are kept after import
    pub storage_dir: PathBuf,
    /// SQL file run instead of the bundled schema
    pub schema_path: Option<PathBuf>,
    pub fetch_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from(DEFAULT_DATABASE),
            cache_dir: PathBuf::from(DEFAULT_CACHE_DIR),
            storage_dir: PathBuf::from(DEFAULT_STORAGE_DIR),
            schema_path: None,
            fetch_timeout: FETCH_TIMEOUT,
        }
    }
}

impl Config {
    /// Read `DB_DSN`, `XBRL_CACHE_DIR`, `XBRL_STORAGE_DIR`, `XBRL_SCHEMA`
    /// and `XBRL_FETCH_TIMEOUT` (seconds), falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let defaults = Self::default();

        Self {
            database_path: get("DB_DSN")
                .map(|dsn| database_path(&dsn))
                .unwrap_or(defaults.database_path),
            cache_dir: get("XBRL_CACHE_DIR").map(PathBuf::from).unwrap_or(defaults.cache_dir),
            storage_dir: get("XBRL_STORAGE_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.storage_dir),
            schema_path: get("XBRL_SCHEMA").map(PathBuf::from),
            fetch_timeout: get("XBRL_FETCH_TIMEOUT")
                .and_then(|secs| secs.parse::<u64>().ok())
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs)
                .unwrap_or(defaults.fetch_timeout),
        }
    }
}

/// `sqlite:path/to.db`, `sqlite://path/to.db` or a bare path
fn database_path(dsn: &str) -> PathBuf {
    let path = dsn
        .strip_prefix("sqlite://")
        .or_else(|| dsn.strip_prefix("sqlite:"))
        .unwrap_or(dsn);
    PathBuf::from(path)
}

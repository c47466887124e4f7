//! Remote retrieval of taxonomy documents.

use crate::{Error, Result};
use std::time::Duration;

/// Fixed per-request budget for schema downloads
pub const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

pub trait Fetch {
    fn get(&self, url: &str, timeout: Duration) -> Result<Vec<u8>>;
}

/// Blocking HTTP(S) fetcher
pub struct HttpFetcher {
    client: reqwest::blocking::Client,
}

impl HttpFetcher {
    pub fn new() -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .user_agent(concat!("readxbrl/", env!("CARGO_PKG_VERSION")))
            .timeout(FETCH_TIMEOUT)
            .build()
            .map_err(|e| Error::Fetch(e.to_string()))?;
        Ok(Self { client })
    }
}

impl Fetch for HttpFetcher {
    fn get(&self, url: &str, timeout: Duration) -> Result<Vec<u8>> {
        let response = self
            .client
            .get(url)
            .timeout(timeout)
            .send()
            .and_then(|r| r.error_for_status())
            .map_err(|e| Error::Fetch(format!("{url}: {e}")))?;

        let body = response
            .bytes()
            .map_err(|e| Error::Fetch(format!("{url}: {e}")))?;
        Ok(body.to_vec())
    }
}

impl<F: Fetch + ?Sized> Fetch for &F {
    fn get(&self, url: &str, timeout: Duration) -> Result<Vec<u8>> {
        (**self).get(url, timeout)
    }
}

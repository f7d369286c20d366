//! Per-origin cookie cache.
//!
//! One JSON document maps origin (scheme+host) to the list of cookie records
//! the browser reported for it. Every save is a read-modify-write of the
//! whole document; there is no cross-process locking, so the last writer
//! wins. That is acceptable for the single-process, single-run use here.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use crate::error::{Error, Result};

/// A cookie as reported by the browser automation layer.
///
/// Field names mirror the CDP wire format so records round-trip through the
/// browser without interpretation; anything this crate does not model is
/// preserved in `rest`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CookieRecord {
    pub name: String,
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires: Option<f64>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub http_only: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub secure: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub same_site: Option<String>,
    #[serde(flatten)]
    pub rest: serde_json::Map<String, serde_json::Value>,
}

impl CookieRecord {
    /// Whether this cookie is in scope for `host`, by the cookie
    /// domain-suffix rule. A record without a domain matches nothing.
    #[must_use]
    pub fn matches_host(&self, host: &str) -> bool {
        let Some(domain) = self.domain.as_deref() else {
            return false;
        };
        let domain = domain.trim_start_matches('.');
        host == domain || host.ends_with(&format!(".{domain}"))
    }
}

/// Persistent cookie store backed by a single JSON file.
#[derive(Debug, Clone)]
pub struct CookieStore {
    path: PathBuf,
}

impl CookieStore {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Normalize a URL to its scheme+host origin key.
    pub fn origin_of(url: &str) -> Result<String> {
        let parsed = Url::parse(url)?;
        let host = parsed
            .host_str()
            .ok_or_else(|| Error::InvalidOrigin(format!("url has no host: {url}")))?;
        Ok(format!("{}://{host}", parsed.scheme()))
    }

    /// Load the cached cookies for `url`'s origin, if any.
    pub async fn load(&self, url: &str) -> Result<Option<Vec<CookieRecord>>> {
        let origin = Self::origin_of(url)?;
        let mut all = self.read_all().await?;
        Ok(all.remove(&origin))
    }

    /// Store the cookies for `url`'s origin, preserving every other origin's
    /// entries (read-modify-write).
    pub async fn save(&self, url: &str, cookies: &[CookieRecord]) -> Result<()> {
        let origin = Self::origin_of(url)?;
        let mut all = self.read_all().await?;
        all.insert(origin.clone(), cookies.to_vec());
        self.write_all(&all).await?;
        debug!(origin, count = cookies.len(), path = %self.path.display(), "saved cookies");
        Ok(())
    }

    async fn read_all(&self) -> Result<BTreeMap<String, Vec<CookieRecord>>> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_all(&self, all: &BTreeMap<String, Vec<CookieRecord>>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let body = serde_json::to_vec_pretty(all)?;
        tokio::fs::write(&self.path, body).await?;
        Ok(())
    }
}

//! Book identifiers, product-page metadata, and the output layout.

use std::fmt;
use std::path::{Path, PathBuf};

use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use crate::error::{Error, Result};
use crate::site;

/// Normalized vendor book identifier (a 36-character UUID).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookId(String);

impl BookId {
    /// Accepts either a product page URL or a raw UUID/path fragment; the
    /// identifier is the last 36 characters of the trimmed path.
    pub fn parse(input: &str) -> Result<Self> {
        let path = if input.starts_with("http") {
            Url::parse(input)?.path().to_string()
        } else {
            input.to_string()
        };
        let trimmed = path.trim_matches('/');
        let chars: Vec<char> = trimmed.chars().collect();
        let start = chars.len().saturating_sub(36);
        let id: String = chars[start..].iter().collect();
        if id.is_empty() {
            return Err(Error::InvalidBookId(input.to_string()));
        }
        Ok(Self(id))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BookId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Title and authors scraped from the product page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookMeta {
    pub title: String,
    pub authors: Vec<String>,
}

impl BookMeta {
    /// Extract metadata from the rendered product page.
    pub fn from_product_page(html: &str) -> Result<Self> {
        let document = Html::parse_document(html);
        let title_selector = Selector::parse(site::PRODUCT_TITLE).expect("Invalid selector");
        let authors_selector = Selector::parse(site::PRODUCT_AUTHORS).expect("Invalid selector");

        let title = document
            .select(&title_selector)
            .next()
            .map(|el| el.text().collect::<String>().trim().to_string())
            .unwrap_or_default();
        if title.is_empty() {
            return Err(Error::MissingMetadata("title not found".to_string()));
        }

        let authors = document
            .select(&authors_selector)
            .map(|el| el.text().collect::<String>().trim().to_string())
            .filter(|a| !a.is_empty())
            .collect();

        Ok(Self { title, authors })
    }
}

/// Replace characters that are hostile to file names.
#[must_use]
pub fn sanitize_title(title: &str) -> String {
    let cleaned: String = title
        .trim()
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    let cleaned = cleaned.trim_matches(['.', ' ']).to_string();
    if cleaned.is_empty() {
        "untitled".to_string()
    } else {
        cleaned
    }
}

/// One book's output directory: `<root>/<sanitized title>/`.
#[derive(Debug, Clone)]
pub struct BookOutput {
    dir: PathBuf,
}

impl BookOutput {
    #[must_use]
    pub fn new(root: &Path, title: &str) -> Self {
        Self {
            dir: root.join(sanitize_title(title)),
        }
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of one page image, 1-based, unpadded decimal.
    #[must_use]
    pub fn page_path(&self, index: u32) -> PathBuf {
        self.dir.join(format!("page_{index}.png"))
    }

    /// Create the directory and write `meta.json`.
    ///
    /// Non-ASCII stays unescaped in the output; titles and author names are
    /// routinely not Latin script.
    pub async fn write_meta(&self, meta: &BookMeta) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let mut body = serde_json::to_string_pretty(meta)?;
        body.push('\n');
        let path = self.dir.join("meta.json");
        tokio::fs::write(&path, body).await?;
        debug!(path = %path.display(), "wrote book metadata");
        Ok(())
    }
}

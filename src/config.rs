use std::path::Path;
use std::time::Duration;

use chromiumoxide::browser::BrowserConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Schema version written into new config files.
pub const CURRENT_VERSION: &str = "0.1.1";

/// Default desktop user agent; the reader refuses mobile layouts.
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/122.0.0.0 Safari/537.36";

/// Default viewer window size; chosen so one spread fills the canvas.
pub const DEFAULT_VIEWER_SIZE: (u32, u32) = (960, 1360);

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid config version {0:?}")]
    InvalidVersion(String),
    #[error("config version {found} is newer than supported {CURRENT_VERSION}")]
    UnsupportedVersion { found: String },
    #[error("failed to build browser config: {0}")]
    Browser(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BrowserKind {
    Chrome,
    Chromium,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Error,
    Warning,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    /// Directive string for `tracing_subscriber`'s `EnvFilter`.
    #[must_use]
    pub fn as_filter(self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warning => "warn",
            Self::Info => "info",
            Self::Debug => "debug",
            Self::Trace => "trace",
        }
    }
}

/// Versioned on-disk configuration document.
///
/// Unknown fields are preserved across load/save so older binaries do not
/// strip newer settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub version: String,
    #[serde(default = "default_browser")]
    pub browser: BrowserKind,
    #[serde(default = "default_true")]
    pub headless: bool,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_viewer_size")]
    pub viewer_size: (u32, u32),
    #[serde(default)]
    pub user_agent: Option<String>,
    #[serde(default)]
    pub chrome_path: Option<String>,
    #[serde(default = "default_log_level")]
    pub logging_level: LogLevel,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

fn default_browser() -> BrowserKind {
    BrowserKind::Chrome
}

fn default_true() -> bool {
    true
}

fn default_viewer_size() -> (u32, u32) {
    DEFAULT_VIEWER_SIZE
}

fn default_log_level() -> LogLevel {
    LogLevel::Info
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: CURRENT_VERSION.to_string(),
            browser: default_browser(),
            headless: true,
            username: None,
            password: None,
            viewer_size: DEFAULT_VIEWER_SIZE,
            user_agent: None,
            chrome_path: None,
            logging_level: default_log_level(),
            extra: serde_json::Map::new(),
        }
    }
}

impl Config {
    /// Load a config document, checking version compatibility.
    ///
    /// Returns the config plus whether it came from an older revision and
    /// should be rewritten. Same major.minor is accepted directly; an older
    /// major is accepted but flagged; a newer major is rejected.
    pub fn load(path: &Path) -> Result<(Self, bool), ConfigError> {
        let body = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&body)?;
        let found = parse_version(&config.version)
            .ok_or_else(|| ConfigError::InvalidVersion(config.version.clone()))?;
        let current = parse_version(CURRENT_VERSION).unwrap_or((0, 0, 0));
        if found.0 > current.0 {
            return Err(ConfigError::UnsupportedVersion {
                found: config.version,
            });
        }
        let updated = (found.0, found.1) != (current.0, current.1) || found.2 < current.2;
        Ok((config, updated))
    }

    /// Write the config as human-readable JSON.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let mut body = serde_json::to_string_pretty(self)?;
        body.push('\n');
        std::fs::write(path, body)?;
        Ok(())
    }

    /// Load the config, creating a default one when the file is absent.
    ///
    /// Returns the config plus whether the file was freshly created. A config
    /// from an older revision is rewritten at the current version.
    pub fn load_or_create(path: &Path) -> Result<(Self, bool), ConfigError> {
        if path.exists() {
            let (config, updated) = Self::load(path)?;
            if updated {
                let mut refreshed = config.clone();
                refreshed.version = CURRENT_VERSION.to_string();
                refreshed.save(path)?;
            }
            Ok((config, false))
        } else {
            let config = Self::default();
            config.save(path)?;
            Ok((config, true))
        }
    }

    #[must_use]
    pub fn user_agent(&self) -> &str {
        self.user_agent.as_deref().unwrap_or(DEFAULT_USER_AGENT)
    }

    /// Build the browser launch configuration.
    pub fn browser_config(&self) -> Result<BrowserConfig, ConfigError> {
        let (width, height) = self.viewer_size;
        let mut builder = BrowserConfig::builder()
            .window_size(width, height)
            .request_timeout(Duration::from_secs(60))
            .no_sandbox()
            .arg("--disable-gpu")
            .arg("--disable-dev-shm-usage")
            .arg("--no-first-run")
            .arg("--no-default-browser-check")
            .arg("--disable-background-networking")
            .arg("--disable-extensions")
            .arg("--disable-sync")
            .arg("--disable-translate")
            .arg("--mute-audio")
            .arg("--hide-scrollbars")
            .arg("--high-dpi-support=1")
            .arg("--force-device-scale-factor=1")
            .arg(format!("--user-agent={}", self.user_agent()));

        if !self.headless {
            builder = builder.with_head();
        }

        if let Some(ref path) = self.chrome_path {
            builder = builder.chrome_executable(path);
        } else if self.browser == BrowserKind::Chromium {
            builder = builder.chrome_executable("chromium");
        }

        builder.build().map_err(ConfigError::Browser)
    }
}

fn parse_version(version: &str) -> Option<(u64, u64, u64)> {
    let mut parts = version.split('.');
    let major = parts.next()?.parse().ok()?;
    let minor = parts.next()?.parse().ok()?;
    let patch = parts.next()?.parse().ok()?;
    if parts.next().is_some() {
        return None;
    }
    Some((major, minor, patch))
}

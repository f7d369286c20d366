use std::time::Duration;

use thiserror::Error;

/// Errors produced while driving the reader and capturing pages.
///
/// The first four variants form the recovery taxonomy: `CaptchaRequired` is
/// handled by relaunching with a visible browser window, `DuplicateSession`
/// by a bounded logout/login/resume cycle, and the timeout variants are fatal
/// for the current book's capture run.
#[derive(Debug, Error)]
pub enum Error {
    #[error("captcha challenge presented while running headless")]
    CaptchaRequired,

    #[error("account is signed in from another device")]
    DuplicateSession,

    #[error("viewer model not populated within {0:?}")]
    ViewerNotReady(Duration),

    #[error("viewer did not arrive at page {page} within {timeout:?}")]
    NavigationTimeout { page: u32, timeout: Duration },

    #[error("loading overlay still visible on page {page} after {timeout:?}")]
    RenderTimeout { page: u32, timeout: Duration },

    #[error("frame capture failed: {0}")]
    CaptureFailed(String),

    #[error("viewer script evaluation failed: {0}")]
    ViewerScript(String),

    #[error("login failed: {0}")]
    LoginFailed(String),

    #[error("timed out waiting for {waiting_for}")]
    Timeout { waiting_for: String },

    #[error("invalid book identifier: {0:?}")]
    InvalidBookId(String),

    #[error("book metadata missing: {0}")]
    MissingMetadata(String),

    #[error("not a usable origin: {0}")]
    InvalidOrigin(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("browser error: {0}")]
    Browser(#[from] chromiumoxide::error::CdpError),

    #[error(transparent)]
    Config(#[from] crate::config::ConfigError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error("failed to decode frame image: {0}")]
    Image(#[from] image::ImageError),

    #[error("failed to decode canvas data url: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

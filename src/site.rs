//! Vendor-specific URLs, selectors, and content markers.
//!
//! Everything the crate knows about the store site and its reader lives here
//! so the capture logic stays selector-free.

/// Store front domain.
pub const DOMAIN: &str = "bookwalker.jp";

/// Store front origin, also the cookie-cache key for the store side.
pub const STORE_ORIGIN: &str = "https://bookwalker.jp";

/// Member (account) origin, the cookie-cache key for the signed-in side.
pub const MEMBER_ORIGIN: &str = "https://member.bookwalker.jp";

/// Account profile page; loading it is how login validity is probed.
pub const PROFILE_URL: &str = "https://member.bookwalker.jp/app/03/my/profile";

/// Login form entry point.
pub const LOGIN_URL: &str = "https://member.bookwalker.jp/app/03/webstore/cooperation?r=top%2F";

/// Product (book detail) page for a book UUID.
#[must_use]
pub fn product_url(book_id: &str) -> String {
    format!("https://bookwalker.jp/de{book_id}/")
}

/// Reader launch URL for a book UUID. Opens the viewer in a new window.
#[must_use]
pub fn viewer_url(book_id: &str) -> String {
    format!(
        "https://member.bookwalker.jp/app/03/webstore/cooperation\
         ?r=BROWSER_VIEWER/{book_id}/https%3A%2F%2Fbookwalker.jp%2Fde{book_id}%2F"
    )
}

// Login form
pub const MAIL_FIELD: &str = "#mailAddress";
pub const PASSWORD_FIELD: &str = "#password";
pub const LOGIN_BUTTON: &str = "#loginBtn";
pub const RECAPTCHA_LOGIN_BUTTON: &str = "#recaptchaLoginBtn";
pub const CAPTCHA_IFRAME: &str =
    "iframe[src^='https://www.recaptcha.net/recaptcha/api2/bframe']";
pub const LOGOUT_BUTTON: &str = ".l-header__logout";

/// Cookie that marks an authenticated member session.
pub const MEMBER_COOKIE: &str = "bwmember";

/// Marker shown on the profile page when the session is not valid.
pub const LOGIN_ERROR_MARKER: &str = "ES0001";

/// Marker shown by the reader when the account is signed in elsewhere.
pub const DUPLICATE_SESSION_MARKER: &str = "Error 998";

// Product page
pub const PRODUCT_TITLE: &str = ".t-c-product-main-data__title";
pub const PRODUCT_AUTHORS: &str = ".t-c-product-main-data__authors dd";
pub const GDPR_ACCEPT: &str = ".gdpr-accept";

// Reader
pub const VIEWER_CANVAS: &str = ".currentScreen canvas";
pub const VIEWER_PROGRESSBAR_CLASS: &str = "progressbar";
pub const VIEWER_LOADING_CLASS: &str = "loading";

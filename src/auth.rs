//! Session/auth flow: cookie recovery, credential login, captcha detection,
//! logout, and the bounded re-login loop for duplicate-session kicks.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use crate::cookies::CookieStore;
use crate::error::{Error, Result};
use crate::poll::{poll_until, PollError};
use crate::session::{wait_for_element, BrowserSession};
use crate::site;

/// How long to wait for the member cookie after submitting credentials.
const COOKIE_TIMEOUT: Duration = Duration::from_secs(10);

/// Extended wait while a captcha challenge is visibly pending; the user is
/// solving it by hand in a headed window.
const CAPTCHA_COOKIE_TIMEOUT: Duration = Duration::from_secs(180);

pub struct AuthFlow<'a> {
    session: &'a BrowserSession,
    cookies: &'a CookieStore,
    cancel: CancellationToken,
}

impl<'a> AuthFlow<'a> {
    pub fn new(
        session: &'a BrowserSession,
        cookies: &'a CookieStore,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            session,
            cookies,
            cancel,
        }
    }

    /// Sign in, preferring recovery from cached cookies over the login form.
    ///
    /// With `error_on_captcha` set (headless operation), a visible captcha
    /// challenge fails fast with [`Error::CaptchaRequired`] so the caller
    /// can relaunch headed.
    pub async fn sign_in(
        &self,
        username: &str,
        password: &str,
        error_on_captcha: bool,
    ) -> Result<()> {
        match self.recover_session().await {
            Ok(true) => {
                info!("recovered session from cookie cache");
                return Ok(());
            }
            Ok(false) => debug!("no usable cached session"),
            Err(e) => debug!(error = %e, "cookie recovery failed, falling back to login"),
        }
        self.credential_login(username, password, error_on_captcha)
            .await
    }

    /// Inject cached cookies and probe the profile page.
    async fn recover_session(&self) -> Result<bool> {
        let Some(store_cookies) = self.cookies.load(site::STORE_ORIGIN).await? else {
            return Ok(false);
        };
        let Some(member_cookies) = self.cookies.load(site::MEMBER_ORIGIN).await? else {
            return Ok(false);
        };
        self.session
            .set_cookies(site::STORE_ORIGIN, &store_cookies)
            .await?;
        self.session
            .set_cookies(site::PROFILE_URL, &member_cookies)
            .await?;
        self.validate_login().await
    }

    /// A session is valid when the profile page loads without the login
    /// error marker and without bouncing to another URL.
    async fn validate_login(&self) -> Result<bool> {
        self.session.goto(site::PROFILE_URL).await?;

        let html = self.session.page().content().await?;
        if html.contains(site::LOGIN_ERROR_MARKER) {
            return Ok(false);
        }

        let page = self.session.page();
        let result = poll_until(
            Duration::from_millis(200),
            Duration::from_secs(2),
            &self.cancel,
            move || async move {
                let url = page.url().await?;
                Ok::<_, Error>(match url {
                    Some(u) if u.starts_with(site::PROFILE_URL) => Some(()),
                    _ => None,
                })
            },
        )
        .await;
        match result {
            Ok(()) => Ok(true),
            Err(PollError::TimedOut) => Ok(false),
            Err(PollError::Cancelled) => Err(Error::Cancelled),
            Err(PollError::Failed(e)) => Err(e),
        }
    }

    async fn credential_login(
        &self,
        username: &str,
        password: &str,
        error_on_captcha: bool,
    ) -> Result<()> {
        self.session.clear_cookies().await?;
        self.session.goto(site::STORE_ORIGIN).await?;
        self.session.goto(site::LOGIN_URL).await?;

        let page = self.session.page();
        let mail = wait_for_element(
            page,
            site::MAIL_FIELD,
            Duration::from_secs(10),
            &self.cancel,
        )
        .await?;

        // The form attaches its handlers late; typing immediately loses keys.
        tokio::time::sleep(Duration::from_secs(2)).await;
        mail.click().await?;
        mail.type_str(username).await?;
        tokio::time::sleep(Duration::from_millis(200)).await;

        let password_field = page.find_element(site::PASSWORD_FIELD).await?;
        password_field.click().await?;
        password_field.type_str(password).await?;
        tokio::time::sleep(Duration::from_millis(200)).await;

        // Plain submit button on most accounts, recaptcha-gated on others.
        match wait_for_element(page, site::LOGIN_BUTTON, Duration::from_secs(1), &self.cancel).await
        {
            Ok(button) => {
                button.click().await?;
            }
            Err(Error::Timeout { .. }) => {
                let button = wait_for_element(
                    page,
                    site::RECAPTCHA_LOGIN_BUTTON,
                    Duration::from_secs(10),
                    &self.cancel,
                )
                .await?;
                button.click().await?;
            }
            Err(e) => return Err(e),
        }

        if self.captcha_pending(Duration::from_secs(2)).await? {
            if error_on_captcha {
                return Err(Error::CaptchaRequired);
            }
            info!("captcha challenge visible, waiting for manual solve");
        }

        let timeout = if self.captcha_pending(Duration::ZERO).await? {
            CAPTCHA_COOKIE_TIMEOUT
        } else {
            COOKIE_TIMEOUT
        };
        self.wait_for_member_cookie(timeout).await?;

        self.persist_cookies().await?;
        info!("signed in");
        Ok(())
    }

    /// Whether a recaptcha challenge frame is visible, polling up to
    /// `patience` for it to appear.
    async fn captcha_pending(&self, patience: Duration) -> Result<bool> {
        let page = self.session.page();
        let result = poll_until(
            Duration::from_millis(200),
            patience,
            &self.cancel,
            move || async move {
                let visible: bool = page
                    .evaluate(format!(
                        "(() => {{ const f = document.querySelector(\"{}\"); \
                         return f !== null && f.offsetParent !== null; }})()",
                        site::CAPTCHA_IFRAME
                    ))
                    .await?
                    .into_value()
                    .unwrap_or(false);
                Ok::<_, Error>(if visible { Some(()) } else { None })
            },
        )
        .await;
        match result {
            Ok(()) => Ok(true),
            Err(PollError::TimedOut) => Ok(false),
            Err(PollError::Cancelled) => Err(Error::Cancelled),
            Err(PollError::Failed(e)) => Err(e),
        }
    }

    /// Login is complete once the member cookie shows up.
    async fn wait_for_member_cookie(&self, timeout: Duration) -> Result<()> {
        let session = self.session;
        let result = poll_until(
            Duration::from_millis(100),
            timeout,
            &self.cancel,
            move || async move {
                let cookies = session.get_cookies().await?;
                Ok::<_, Error>(
                    cookies
                        .iter()
                        .any(|c| c.name == site::MEMBER_COOKIE)
                        .then_some(()),
                )
            },
        )
        .await;
        match result {
            Ok(()) => Ok(()),
            Err(PollError::TimedOut) => Err(Error::LoginFailed(format!(
                "member cookie did not appear within {timeout:?}"
            ))),
            Err(PollError::Cancelled) => Err(Error::Cancelled),
            Err(PollError::Failed(e)) => Err(e),
        }
    }

    /// Cache the browser's cookies under both origins we care about, each
    /// holding only the records scoped to its host.
    async fn persist_cookies(&self) -> Result<()> {
        let all = self.session.get_cookies().await?;
        for origin in [site::STORE_ORIGIN, site::MEMBER_ORIGIN] {
            let host = Url::parse(origin)?
                .host_str()
                .ok_or_else(|| Error::InvalidOrigin(origin.to_string()))?
                .to_string();
            let scoped: Vec<_> = all
                .iter()
                .filter(|c| c.matches_host(&host))
                .cloned()
                .collect();
            self.cookies.save(origin, &scoped).await?;
        }
        Ok(())
    }

    /// Navigate to the profile page and click the logout control.
    /// Best-effort: the session may already be gone.
    pub async fn sign_out(&self) -> Result<()> {
        self.session.goto(site::PROFILE_URL).await?;
        let button = wait_for_element(
            self.session.page(),
            site::LOGOUT_BUTTON,
            Duration::from_secs(10),
            &self.cancel,
        )
        .await?;
        button.click().await?;
        info!("signed out");
        Ok(())
    }
}

/// Run `attempt`, and on a duplicate-session kick sign back in (via
/// `relogin`) and run it again, at most `max_retries` times. Any other error
/// propagates immediately, as does exceeding the bound.
pub async fn with_relogin<T, A, AFut, R, RFut>(
    max_retries: u32,
    mut attempt: A,
    mut relogin: R,
) -> Result<T>
where
    A: FnMut() -> AFut,
    AFut: Future<Output = Result<T>>,
    R: FnMut() -> RFut,
    RFut: Future<Output = Result<()>>,
{
    let mut retries = 0;
    loop {
        match attempt().await {
            Err(Error::DuplicateSession) if retries < max_retries => {
                retries += 1;
                warn!(retries, max_retries, "signed in from another device, retrying login");
                relogin().await?;
            }
            other => return other,
        }
    }
}

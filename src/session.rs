//! Browser session wrapper.
//!
//! Owns the launched browser, its CDP handler loop, and the primary page.
//! The viewer opens in a separate window, so diagnostics and element lookups
//! go through [`BrowserSession::active_page`], which re-binds to the most
//! recently opened target.

use std::time::Duration;

use chromiumoxide::browser::Browser;
use chromiumoxide::cdp::browser_protocol::network::{ClearBrowserCookiesParams, CookieParam};
use chromiumoxide::page::ScreenshotParams;
use chromiumoxide::{Element, Page};
use futures_util::StreamExt;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::config::Config;
use crate::cookies::CookieRecord;
use crate::error::{Error, Result};
use crate::poll::{poll_until, PollError};

pub struct BrowserSession {
    browser: Browser,
    handler_task: JoinHandle<()>,
    page: Page,
}

impl BrowserSession {
    /// Launch the browser described by the config and open a blank page.
    pub async fn launch(config: &Config) -> Result<Self> {
        let browser_config = config.browser_config()?;

        info!(headless = config.headless, "launching browser");
        let (browser, mut handler) = Browser::launch(browser_config).await?;

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!("browser handler error: {e}");
                }
            }
        });

        let page = browser.new_page("about:blank").await?;

        Ok(Self {
            browser,
            handler_task,
            page,
        })
    }

    /// The primary page the session was opened with.
    #[must_use]
    pub fn page(&self) -> &Page {
        &self.page
    }

    /// The most recently opened page, falling back to the primary one.
    pub async fn active_page(&self) -> Result<Page> {
        let pages = self.browser.pages().await?;
        Ok(pages.into_iter().last().unwrap_or_else(|| self.page.clone()))
    }

    /// Navigate the primary page and wait for the navigation to settle.
    pub async fn goto(&self, url: &str) -> Result<()> {
        debug!(url, "navigating");
        self.page.goto(url).await?;
        self.page.wait_for_navigation().await?;
        Ok(())
    }

    /// Document source of the active page.
    pub async fn content(&self) -> Result<String> {
        Ok(self.active_page().await?.content().await?)
    }

    /// Full-window PNG screenshot of the active page.
    pub async fn screenshot_png(&self) -> Result<Vec<u8>> {
        let params = ScreenshotParams::builder().full_page(true).build();
        Ok(self.active_page().await?.screenshot(params).await?)
    }

    /// All cookies visible to the browser.
    pub async fn get_cookies(&self) -> Result<Vec<CookieRecord>> {
        let cookies = self.page.get_cookies().await?;
        cookies
            .into_iter()
            .map(|c| {
                let value = serde_json::to_value(&c)?;
                Ok(serde_json::from_value(value)?)
            })
            .collect()
    }

    /// Inject cookie records, scoped to `url` when a record carries no
    /// domain of its own.
    pub async fn set_cookies(&self, url: &str, records: &[CookieRecord]) -> Result<()> {
        let params = records
            .iter()
            .map(|r| cookie_param(r, url))
            .collect::<Result<Vec<_>>>()?;
        self.page.set_cookies(params).await?;
        debug!(url, count = records.len(), "injected cookies");
        Ok(())
    }

    /// Drop every cookie in the browser.
    pub async fn clear_cookies(&self) -> Result<()> {
        self.page
            .execute(ClearBrowserCookiesParams::default())
            .await?;
        Ok(())
    }

    /// Close the browser and stop the handler loop. Best-effort.
    pub async fn shutdown(mut self) {
        if let Err(e) = self.browser.close().await {
            error!("failed to close browser: {e}");
        } else {
            info!("browser closed");
        }
        self.handler_task.abort();
    }
}

/// Convert a cached record to a CDP cookie parameter.
///
/// Both sides speak the same camelCase wire shape, so this is a serde
/// round-trip plus the scoping URL; fields the parameter type does not know
/// are dropped by deserialization.
fn cookie_param(record: &CookieRecord, url: &str) -> Result<CookieParam> {
    let mut value = serde_json::to_value(record)?;
    if record.domain.is_none() {
        if let Some(map) = value.as_object_mut() {
            map.insert("url".to_string(), url.into());
        }
    }
    Ok(serde_json::from_value(value)?)
}

/// Poll for an element until it appears in the document.
pub async fn wait_for_element(
    page: &Page,
    selector: &str,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<Element> {
    let result = poll_until(
        Duration::from_millis(100),
        timeout,
        cancel,
        move || async move { Ok::<_, Error>(page.find_element(selector).await.ok()) },
    )
    .await;
    match result {
        Ok(element) => Ok(element),
        Err(PollError::TimedOut) => Err(Error::Timeout {
            waiting_for: format!("element {selector}"),
        }),
        Err(PollError::Cancelled) => Err(Error::Cancelled),
        Err(PollError::Failed(e)) => Err(e),
    }
}

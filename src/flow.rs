//! Per-book download flow: scrape metadata, open the reader, and run the
//! page capture controller.

use std::path::Path;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::book::{BookId, BookMeta, BookOutput};
use crate::capture::CanvasCapture;
use crate::controller::{CaptureOptions, CaptureSummary, PageCaptureController};
use crate::error::{Error, Result};
use crate::poll::{poll_until, PollError};
use crate::session::{wait_for_element, BrowserSession};
use crate::site;
use crate::viewer::PageViewer;

/// Download one book into `out_root`, resuming past already-written pages.
pub async fn download_book(
    session: &BrowserSession,
    book_id: &BookId,
    out_root: &Path,
    opts: CaptureOptions,
    cancel: CancellationToken,
) -> Result<CaptureSummary> {
    info!(book = %book_id, "downloading book");

    // Product page: title and authors.
    session.goto(&site::product_url(book_id.as_str())).await?;
    wait_for_element(
        session.page(),
        site::PRODUCT_TITLE,
        Duration::from_secs(10),
        &cancel,
    )
    .await?;
    let html = session.page().content().await?;
    let meta = BookMeta::from_product_page(&html)?;
    info!(title = %meta.title, authors = %meta.authors.join(", "), "found book");

    dismiss_consent_banner(session, &cancel).await;

    let output = BookOutput::new(out_root, &meta.title);
    output.write_meta(&meta).await?;

    // The reader opens in a new window.
    session.goto(&site::viewer_url(book_id.as_str())).await?;
    let viewer_page = session.active_page().await?;

    let viewer_html = viewer_page.content().await?;
    if viewer_html.contains(site::DUPLICATE_SESSION_MARKER) {
        return Err(Error::DuplicateSession);
    }

    wait_for_element(
        &viewer_page,
        site::VIEWER_CANVAS,
        Duration::from_secs(30),
        &cancel,
    )
    .await
    .map_err(|e| match e {
        Error::Timeout { .. } => Error::ViewerNotReady(Duration::from_secs(30)),
        other => other,
    })?;
    wait_progressbar_hidden(&viewer_page, Duration::from_secs(30), &cancel).await?;

    let viewer = PageViewer::new(viewer_page.clone());
    let frames = CanvasCapture::new(viewer_page);
    let controller = PageCaptureController::new(&viewer, &frames, opts, cancel);
    controller.capture_book(&output).await
}

/// The consent banner overlaps the viewer launch button on first visits.
async fn dismiss_consent_banner(session: &BrowserSession, cancel: &CancellationToken) {
    match wait_for_element(
        session.page(),
        site::GDPR_ACCEPT,
        Duration::from_secs(3),
        cancel,
    )
    .await
    {
        Ok(banner) => {
            if let Err(e) = banner.click().await {
                debug!(error = %e, "failed to dismiss consent banner");
            }
        }
        Err(_) => debug!("no consent banner"),
    }
}

/// Wait for the reader's initial progress bar to disappear.
async fn wait_progressbar_hidden(
    page: &chromiumoxide::Page,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<()> {
    let class = site::VIEWER_PROGRESSBAR_CLASS;
    let result = poll_until(Duration::from_millis(200), timeout, cancel, move || {
        let expr = format!(
            "Array.from(document.getElementsByClassName('{class}'))\
             .every((e) => e.offsetParent === null)"
        );
        async move {
            let hidden: bool = page.evaluate(expr).await?.into_value().unwrap_or(false);
            Ok::<_, Error>(hidden.then_some(()))
        }
    })
    .await;
    match result {
        Ok(()) => Ok(()),
        Err(PollError::TimedOut) => Err(Error::ViewerNotReady(timeout)),
        Err(PollError::Cancelled) => Err(Error::Cancelled),
        Err(PollError::Failed(e)) => Err(e),
    }
}

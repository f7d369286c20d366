//! Page capture controller.
//!
//! Drives the viewer through every spread of one book and captures a
//! pixel-exact frame for each. The viewer renders asynchronously after its
//! index changes, so "index matches" is necessary but not sufficient: a
//! naive capture right after arrival frequently yields a blank placeholder
//! or a leftover frame from the previous page. Each accepted frame must be
//! non-blank and different from the last two accepted frames; two frames of
//! history (not one) cover a transition animation that momentarily re-shows
//! the previous-previous page.

use std::collections::VecDeque;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::book::BookOutput;
use crate::capture::{Frame, FrameSource};
use crate::error::{Error, Result};
use crate::poll::{poll_until, PollError};
use crate::viewer::ViewerBridge;

/// Number of recently accepted frames held for duplicate detection.
const FRAME_WINDOW_CAPACITY: usize = 2;

/// Bounded FIFO of the most recently accepted frames' encoded bytes.
#[derive(Debug, Default)]
pub struct FrameWindow {
    frames: VecDeque<Vec<u8>>,
}

impl FrameWindow {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn contains(&self, bytes: &[u8]) -> bool {
        self.frames.iter().any(|f| f == bytes)
    }

    /// Insert, evicting the oldest entry past capacity.
    pub fn push(&mut self, bytes: Vec<u8>) {
        if self.frames.len() == FRAME_WINDOW_CAPACITY {
            self.frames.pop_front();
        }
        self.frames.push_back(bytes);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

/// Tunables for one capture run.
#[derive(Debug, Clone)]
pub struct CaptureOptions {
    /// Re-capture pages whose output file already exists.
    pub overwrite: bool,
    /// Capture attempts per page before degrading.
    pub max_attempts: u32,
    /// Delay between capture attempts.
    pub attempt_interval: Duration,
    /// Tick for arrival/overlay/readiness polling.
    pub poll_interval: Duration,
    /// Bound on waiting for the viewer to arrive at a commanded page.
    pub navigation_timeout: Duration,
    /// Bound on waiting for loading overlays to clear.
    pub render_timeout: Duration,
    /// Bound on waiting for the viewer model to report a total count.
    pub viewer_ready_timeout: Duration,
}

impl Default for CaptureOptions {
    fn default() -> Self {
        Self {
            overwrite: false,
            max_attempts: 30,
            attempt_interval: Duration::from_millis(300),
            poll_interval: Duration::from_millis(100),
            navigation_timeout: Duration::from_secs(30),
            render_timeout: Duration::from_secs(30),
            viewer_ready_timeout: Duration::from_secs(10),
        }
    }
}

/// What one capture run did.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct CaptureSummary {
    /// Indices written this run.
    pub written: Vec<u32>,
    /// Indices skipped because their file already existed.
    pub skipped: Vec<u32>,
    /// Written indices that exhausted the retry bound (possible repeats).
    pub degraded: Vec<u32>,
}

/// Sequential per-book capture state machine.
pub struct PageCaptureController<'a, V, F> {
    viewer: &'a V,
    frames: &'a F,
    opts: CaptureOptions,
    cancel: CancellationToken,
}

impl<'a, V, F> PageCaptureController<'a, V, F>
where
    V: ViewerBridge + Sync,
    F: FrameSource + Sync,
{
    pub fn new(
        viewer: &'a V,
        frames: &'a F,
        opts: CaptureOptions,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            viewer,
            frames,
            opts,
            cancel,
        }
    }

    /// Poll the viewer for its total spread count until the model is
    /// populated, bounded by `viewer_ready_timeout`.
    pub async fn discover_total(&self) -> Result<u32> {
        let viewer = self.viewer;
        let result = poll_until(
            self.opts.poll_interval,
            self.opts.viewer_ready_timeout,
            &self.cancel,
            move || async move {
                match viewer.total_count().await {
                    Ok(total) => Ok(Some(total)),
                    Err(Error::DuplicateSession) => Err(Error::DuplicateSession),
                    // Model not populated yet; keep polling.
                    Err(_) => Ok(None),
                }
            },
        )
        .await;
        match result {
            Ok(total) => Ok(total),
            Err(PollError::TimedOut) => Err(Error::ViewerNotReady(self.opts.viewer_ready_timeout)),
            Err(PollError::Cancelled) => Err(Error::Cancelled),
            Err(PollError::Failed(e)) => Err(e),
        }
    }

    /// Capture every spread of the open book into `output`'s directory.
    ///
    /// Visits indices 1..=total in ascending order. Pages whose file already
    /// exists are skipped without touching the viewer, which is also what
    /// makes an interrupted run resumable.
    pub async fn capture_book(&self, output: &BookOutput) -> Result<CaptureSummary> {
        let total = self.discover_total().await?;
        info!(total, "total spreads");
        tokio::fs::create_dir_all(output.dir()).await?;

        let mut summary = CaptureSummary::default();
        let mut window = FrameWindow::new();

        for index in 1..=total {
            if self.cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            let path = output.page_path(index);
            if path.exists() && !self.opts.overwrite {
                debug!(index, "page already exists, skipping");
                summary.skipped.push(index);
                continue;
            }

            let (frame, degraded) = self.capture_page(index, total, &mut window).await?;
            tokio::fs::write(&path, frame.into_png_bytes()).await?;
            debug!(index, "saved page");
            summary.written.push(index);
            if degraded {
                summary.degraded.push(index);
            }
        }

        info!(
            written = summary.written.len(),
            skipped = summary.skipped.len(),
            degraded = summary.degraded.len(),
            "capture run complete"
        );
        Ok(summary)
    }

    async fn capture_page(
        &self,
        index: u32,
        total: u32,
        window: &mut FrameWindow,
    ) -> Result<(Frame, bool)> {
        self.viewer.goto(index).await?;
        self.confirm_arrival(index).await?;
        self.wait_render_idle(index).await?;
        debug!(index, total, "capturing page");

        // Last non-blank frame seen, kept as the degraded-success fallback
        // when every attempt is rejected as a duplicate.
        let mut fallback: Option<Frame> = None;
        let mut attempt = 0;

        while attempt < self.opts.max_attempts {
            if self.cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            match self.frames.capture().await {
                Ok(frame) if frame.is_blank() => {
                    debug!(index, "blank frame, treated as unloaded page");
                }
                Ok(frame) if window.contains(frame.png_bytes()) => {
                    debug!(index, "frame matches a recently accepted page");
                    fallback = Some(frame);
                }
                Ok(frame) => {
                    window.push(frame.png_bytes().to_vec());
                    return Ok((frame, false));
                }
                Err(Error::DuplicateSession) => return Err(Error::DuplicateSession),
                Err(e) => {
                    debug!(index, error = %e, "capture attempt failed");
                }
            }
            attempt += 1;
            debug!(
                index,
                attempt,
                max = self.opts.max_attempts,
                "retrying page capture"
            );
            tokio::time::sleep(self.opts.attempt_interval).await;
        }

        // Degraded success: keep the best frame we have rather than lose the
        // page in a multi-hundred-page run. Blank frames are never kept.
        if let Some(frame) = fallback {
            warn!(index, "potentially repeated page");
            return Ok((frame, true));
        }
        Err(Error::CaptureFailed(format!(
            "no usable frame for page {index} after {} attempts",
            self.opts.max_attempts
        )))
    }

    async fn confirm_arrival(&self, index: u32) -> Result<()> {
        let viewer = self.viewer;
        let result = poll_until(
            self.opts.poll_interval,
            self.opts.navigation_timeout,
            &self.cancel,
            move || async move {
                match viewer.current_index().await {
                    Ok(current) if current == index => Ok(Some(())),
                    Ok(_) => Ok(None),
                    Err(Error::DuplicateSession) => Err(Error::DuplicateSession),
                    // Index can be transiently unqueryable mid-flip.
                    Err(_) => Ok(None),
                }
            },
        )
        .await;
        match result {
            Ok(()) => Ok(()),
            Err(PollError::TimedOut) => Err(Error::NavigationTimeout {
                page: index,
                timeout: self.opts.navigation_timeout,
            }),
            Err(PollError::Cancelled) => Err(Error::Cancelled),
            Err(PollError::Failed(e)) => Err(e),
        }
    }

    async fn wait_render_idle(&self, index: u32) -> Result<()> {
        let viewer = self.viewer;
        let result = poll_until(
            self.opts.poll_interval,
            self.opts.render_timeout,
            &self.cancel,
            move || async move {
                match viewer.render_idle().await {
                    Ok(true) => Ok(Some(())),
                    Ok(false) => Ok(None),
                    Err(e) => Err(e),
                }
            },
        )
        .await;
        match result {
            Ok(()) => Ok(()),
            Err(PollError::TimedOut) => Err(Error::RenderTimeout {
                page: index,
                timeout: self.opts.render_timeout,
            }),
            Err(PollError::Cancelled) => Err(Error::Cancelled),
            Err(PollError::Failed(e)) => Err(e),
        }
    }
}

//! Integration tests for the page capture controller, driven by scripted
//! viewer and frame-source stand-ins. Time-based waits run under a paused
//! clock, so retry and timeout paths complete instantly.

use std::collections::VecDeque;
use std::io::Cursor;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};
use tokio_util::sync::CancellationToken;

use bookshot::book::BookOutput;
use bookshot::capture::{Frame, FrameSource};
use bookshot::controller::{CaptureOptions, PageCaptureController};
use bookshot::viewer::ViewerBridge;
use bookshot::Error;

/// A solid-color PNG; distinct `seed`s produce distinct bytes.
fn novel_png(seed: u8) -> Vec<u8> {
    let img = RgbaImage::from_pixel(2, 2, Rgba([seed, seed.wrapping_add(7), 3, 255]));
    let mut buf = Cursor::new(Vec::new());
    DynamicImage::ImageRgba8(img)
        .write_to(&mut buf, ImageFormat::Png)
        .unwrap();
    buf.into_inner()
}

/// A fully transparent-black PNG, as the viewer shows before rendering.
fn blank_png() -> Vec<u8> {
    let img = RgbaImage::from_pixel(2, 2, Rgba([0, 0, 0, 0]));
    let mut buf = Cursor::new(Vec::new());
    DynamicImage::ImageRgba8(img)
        .write_to(&mut buf, ImageFormat::Png)
        .unwrap();
    buf.into_inner()
}

/// Viewer that arrives immediately on `goto` and records every command.
struct MockViewer {
    total: u32,
    current: Mutex<u32>,
    nav_calls: Mutex<Vec<u32>>,
    /// Commanding this index reports a duplicate-session kick.
    kick_at: Mutex<Option<u32>>,
    arrive: bool,
}

impl MockViewer {
    fn new(total: u32) -> Self {
        Self {
            total,
            current: Mutex::new(0),
            nav_calls: Mutex::new(Vec::new()),
            kick_at: Mutex::new(None),
            arrive: true,
        }
    }

    fn nav_calls(&self) -> Vec<u32> {
        self.nav_calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ViewerBridge for MockViewer {
    async fn current_index(&self) -> Result<u32, Error> {
        Ok(*self.current.lock().unwrap())
    }

    async fn total_count(&self) -> Result<u32, Error> {
        Ok(self.total)
    }

    async fn goto(&self, index: u32) -> Result<(), Error> {
        if *self.kick_at.lock().unwrap() == Some(index) {
            return Err(Error::DuplicateSession);
        }
        self.nav_calls.lock().unwrap().push(index);
        if self.arrive {
            *self.current.lock().unwrap() = index;
        }
        Ok(())
    }

    async fn render_idle(&self) -> Result<bool, Error> {
        Ok(true)
    }
}

enum Scripted {
    Blank,
    Png(Vec<u8>),
    Fail,
}

/// Frame source that plays back a script, then keeps producing novel frames.
struct ScriptedFrames {
    script: Mutex<VecDeque<Scripted>>,
    calls: AtomicU32,
    seed: AtomicU32,
}

impl ScriptedFrames {
    fn new(script: Vec<Scripted>) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
            calls: AtomicU32::new(0),
            seed: AtomicU32::new(100),
        }
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FrameSource for ScriptedFrames {
    async fn capture(&self) -> Result<Frame, Error> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(Scripted::Blank) => Frame::from_png(blank_png()),
            Some(Scripted::Png(bytes)) => Frame::from_png(bytes),
            Some(Scripted::Fail) => Err(Error::CaptureFailed("no canvas".to_string())),
            None => {
                let seed = self.seed.fetch_add(1, Ordering::SeqCst);
                #[allow(clippy::cast_possible_truncation)]
                Frame::from_png(novel_png(seed as u8))
            }
        }
    }
}

fn quick_options() -> CaptureOptions {
    CaptureOptions {
        overwrite: false,
        max_attempts: 5,
        attempt_interval: Duration::from_millis(300),
        poll_interval: Duration::from_millis(100),
        navigation_timeout: Duration::from_secs(5),
        render_timeout: Duration::from_secs(5),
        viewer_ready_timeout: Duration::from_secs(2),
    }
}

#[tokio::test(start_paused = true)]
async fn visits_every_page_ascending() {
    let dir = tempfile::tempdir().unwrap();
    let out = BookOutput::new(dir.path(), "book");
    let viewer = MockViewer::new(5);
    let frames = ScriptedFrames::new(vec![]);
    let controller =
        PageCaptureController::new(&viewer, &frames, quick_options(), CancellationToken::new());

    let summary = controller.capture_book(&out).await.unwrap();

    assert_eq!(viewer.nav_calls(), vec![1, 2, 3, 4, 5]);
    assert_eq!(summary.written, vec![1, 2, 3, 4, 5]);
    assert!(summary.skipped.is_empty());
    assert!(summary.degraded.is_empty());
    for i in 1..=5 {
        assert!(out.page_path(i).exists());
    }
}

#[tokio::test(start_paused = true)]
async fn fully_resumed_book_touches_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let out = BookOutput::new(dir.path(), "book");
    std::fs::create_dir_all(out.dir()).unwrap();
    for i in 1..=3 {
        std::fs::write(out.page_path(i), b"existing").unwrap();
    }
    let viewer = MockViewer::new(3);
    let frames = ScriptedFrames::new(vec![]);
    let controller =
        PageCaptureController::new(&viewer, &frames, quick_options(), CancellationToken::new());

    let summary = controller.capture_book(&out).await.unwrap();

    assert!(viewer.nav_calls().is_empty());
    assert_eq!(frames.calls(), 0);
    assert_eq!(summary.skipped, vec![1, 2, 3]);
    assert!(summary.written.is_empty());
    // Existing files are untouched.
    let body = std::fs::read(out.page_path(1)).unwrap();
    assert_eq!(body, b"existing");
}

#[tokio::test(start_paused = true)]
async fn second_run_skips_files_from_the_first() {
    // The resume check and the write go through the same path builder, so a
    // file written by one run must be recognized by the next.
    let dir = tempfile::tempdir().unwrap();
    let out = BookOutput::new(dir.path(), "book");
    let viewer = MockViewer::new(3);
    let frames = ScriptedFrames::new(vec![]);
    let controller =
        PageCaptureController::new(&viewer, &frames, quick_options(), CancellationToken::new());

    let first = controller.capture_book(&out).await.unwrap();
    assert_eq!(first.written, vec![1, 2, 3]);
    let calls_after_first = frames.calls();

    let second = controller.capture_book(&out).await.unwrap();
    assert_eq!(second.skipped, vec![1, 2, 3]);
    assert!(second.written.is_empty());
    assert_eq!(frames.calls(), calls_after_first);
}

#[tokio::test(start_paused = true)]
async fn overwrite_recaptures_existing_pages() {
    let dir = tempfile::tempdir().unwrap();
    let out = BookOutput::new(dir.path(), "book");
    std::fs::create_dir_all(out.dir()).unwrap();
    std::fs::write(out.page_path(1), b"existing").unwrap();
    let viewer = MockViewer::new(1);
    let frames = ScriptedFrames::new(vec![]);
    let mut opts = quick_options();
    opts.overwrite = true;
    let controller =
        PageCaptureController::new(&viewer, &frames, opts, CancellationToken::new());

    let summary = controller.capture_book(&out).await.unwrap();

    assert_eq!(summary.written, vec![1]);
    let body = std::fs::read(out.page_path(1)).unwrap();
    assert_ne!(body, b"existing");
}

#[tokio::test(start_paused = true)]
async fn blank_frames_are_never_written() {
    let dir = tempfile::tempdir().unwrap();
    let out = BookOutput::new(dir.path(), "book");
    let novel = novel_png(1);
    let viewer = MockViewer::new(1);
    let frames = ScriptedFrames::new(vec![
        Scripted::Blank,
        Scripted::Blank,
        Scripted::Png(novel.clone()),
    ]);
    let controller =
        PageCaptureController::new(&viewer, &frames, quick_options(), CancellationToken::new());

    controller.capture_book(&out).await.unwrap();

    assert_eq!(frames.calls(), 3);
    let body = std::fs::read(out.page_path(1)).unwrap();
    assert_eq!(body, novel);
}

#[tokio::test(start_paused = true)]
async fn stale_duplicate_frames_are_retried() {
    let dir = tempfile::tempdir().unwrap();
    let out = BookOutput::new(dir.path(), "book");
    let page1 = novel_png(1);
    let page2 = novel_png(2);
    let viewer = MockViewer::new(2);
    let frames = ScriptedFrames::new(vec![
        Scripted::Png(page1.clone()),
        // Page 2 keeps showing page 1's content for two attempts.
        Scripted::Png(page1.clone()),
        Scripted::Png(page1.clone()),
        Scripted::Png(page2.clone()),
    ]);
    let controller =
        PageCaptureController::new(&viewer, &frames, quick_options(), CancellationToken::new());

    let summary = controller.capture_book(&out).await.unwrap();

    assert_eq!(frames.calls(), 4);
    assert!(summary.degraded.is_empty());
    let body = std::fs::read(out.page_path(2)).unwrap();
    assert_eq!(body, page2);
}

#[tokio::test(start_paused = true)]
async fn exhausting_retries_is_degraded_success() {
    let dir = tempfile::tempdir().unwrap();
    let out = BookOutput::new(dir.path(), "book");
    let page1 = novel_png(1);
    let mut script = vec![Scripted::Png(page1.clone())];
    // Page 2 never advances: every attempt repeats page 1.
    for _ in 0..5 {
        script.push(Scripted::Png(page1.clone()));
    }
    let viewer = MockViewer::new(2);
    let frames = ScriptedFrames::new(script);
    let controller =
        PageCaptureController::new(&viewer, &frames, quick_options(), CancellationToken::new());

    let summary = controller.capture_book(&out).await.unwrap();

    // One file written anyway, flagged as a possible repeat.
    assert_eq!(summary.written, vec![1, 2]);
    assert_eq!(summary.degraded, vec![2]);
    let body = std::fs::read(out.page_path(2)).unwrap();
    assert_eq!(body, page1);
}

#[tokio::test(start_paused = true)]
async fn blank_then_stale_then_novel() {
    // The worked example: attempts for page 2 yield blank, then a repeat of
    // page 1, then novel content.
    let dir = tempfile::tempdir().unwrap();
    let out = BookOutput::new(dir.path(), "book");
    let page1 = novel_png(1);
    let page2 = novel_png(2);
    let page3 = novel_png(3);
    let viewer = MockViewer::new(3);
    let frames = ScriptedFrames::new(vec![
        Scripted::Png(page1.clone()),
        Scripted::Blank,
        Scripted::Png(page1.clone()),
        Scripted::Png(page2.clone()),
        Scripted::Png(page3.clone()),
    ]);
    let controller =
        PageCaptureController::new(&viewer, &frames, quick_options(), CancellationToken::new());

    let summary = controller.capture_book(&out).await.unwrap();

    assert_eq!(frames.calls(), 5);
    assert_eq!(summary.written, vec![1, 2, 3]);
    assert!(summary.degraded.is_empty());
    assert_eq!(std::fs::read(out.page_path(2)).unwrap(), page2);
    assert_eq!(std::fs::read(out.page_path(3)).unwrap(), page3);
}

#[tokio::test(start_paused = true)]
async fn capture_errors_are_absorbed_by_the_retry_loop() {
    let dir = tempfile::tempdir().unwrap();
    let out = BookOutput::new(dir.path(), "book");
    let novel = novel_png(1);
    let viewer = MockViewer::new(1);
    let frames = ScriptedFrames::new(vec![
        Scripted::Fail,
        Scripted::Fail,
        Scripted::Png(novel.clone()),
    ]);
    let controller =
        PageCaptureController::new(&viewer, &frames, quick_options(), CancellationToken::new());

    controller.capture_book(&out).await.unwrap();
    assert_eq!(std::fs::read(out.page_path(1)).unwrap(), novel);
}

#[tokio::test(start_paused = true)]
async fn capture_failing_every_attempt_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let out = BookOutput::new(dir.path(), "book");
    let viewer = MockViewer::new(1);
    let script = (0..5).map(|_| Scripted::Fail).collect();
    let frames = ScriptedFrames::new(script);
    let controller =
        PageCaptureController::new(&viewer, &frames, quick_options(), CancellationToken::new());

    let err = controller.capture_book(&out).await.unwrap_err();
    assert!(matches!(err, Error::CaptureFailed(_)));
    assert!(!out.page_path(1).exists());
}

#[tokio::test(start_paused = true)]
async fn navigation_that_never_arrives_times_out() {
    let dir = tempfile::tempdir().unwrap();
    let out = BookOutput::new(dir.path(), "book");
    let mut viewer = MockViewer::new(1);
    viewer.arrive = false;
    let frames = ScriptedFrames::new(vec![]);
    let controller =
        PageCaptureController::new(&viewer, &frames, quick_options(), CancellationToken::new());

    let err = controller.capture_book(&out).await.unwrap_err();
    assert!(matches!(err, Error::NavigationTimeout { page: 1, .. }));
}

#[tokio::test(start_paused = true)]
async fn duplicate_session_kick_propagates() {
    let dir = tempfile::tempdir().unwrap();
    let out = BookOutput::new(dir.path(), "book");
    let viewer = MockViewer::new(3);
    *viewer.kick_at.lock().unwrap() = Some(2);
    let frames = ScriptedFrames::new(vec![]);
    let controller =
        PageCaptureController::new(&viewer, &frames, quick_options(), CancellationToken::new());

    let err = controller.capture_book(&out).await.unwrap_err();
    assert!(matches!(err, Error::DuplicateSession));
    // Page 1 was still written before the kick.
    assert!(out.page_path(1).exists());
}

#[tokio::test(start_paused = true)]
async fn cancellation_unwinds_between_pages() {
    let dir = tempfile::tempdir().unwrap();
    let out = BookOutput::new(dir.path(), "book");
    let viewer = MockViewer::new(3);
    let frames = ScriptedFrames::new(vec![]);
    let cancel = CancellationToken::new();
    cancel.cancel();
    let controller = PageCaptureController::new(&viewer, &frames, quick_options(), cancel);

    let err = controller.capture_book(&out).await.unwrap_err();
    assert!(matches!(err, Error::Cancelled));
    assert!(viewer.nav_calls().is_empty());
}

struct NeverReadyViewer;

#[async_trait]
impl ViewerBridge for NeverReadyViewer {
    async fn current_index(&self) -> Result<u32, Error> {
        Err(Error::ViewerScript("not initialized".to_string()))
    }
    async fn total_count(&self) -> Result<u32, Error> {
        Err(Error::ViewerScript("not initialized".to_string()))
    }
    async fn goto(&self, _index: u32) -> Result<(), Error> {
        Ok(())
    }
    async fn render_idle(&self) -> Result<bool, Error> {
        Ok(true)
    }
}

#[tokio::test(start_paused = true)]
async fn unpopulated_viewer_model_times_out_as_not_ready() {
    let dir = tempfile::tempdir().unwrap();
    let out = BookOutput::new(dir.path(), "book");
    let frames = ScriptedFrames::new(vec![]);
    let controller = PageCaptureController::new(
        &NeverReadyViewer,
        &frames,
        quick_options(),
        CancellationToken::new(),
    );

    let err = controller.capture_book(&out).await.unwrap_err();
    assert!(matches!(err, Error::ViewerNotReady(_)));
}

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use bookshot::auth::{with_relogin, AuthFlow};
use bookshot::book::BookId;
use bookshot::config::Config;
use bookshot::controller::CaptureOptions;
use bookshot::cookies::CookieStore;
use bookshot::flow::download_book;
use bookshot::session::BrowserSession;
use bookshot::Error;

/// How many duplicate-session kicks to recover from before giving up.
const MAX_LOGIN_RETRIES: u32 = 1;

#[derive(Debug, Parser)]
#[command(name = "bookshot", about = "Capture purchased e-book pages as PNG files")]
struct Cli {
    /// Book page URLs or book UUIDs
    #[arg(required = true)]
    books: Vec<String>,

    /// Re-capture pages whose files already exist
    #[arg(long)]
    overwrite: bool,

    /// Config document path
    #[arg(long, default_value = "config.json")]
    config: PathBuf,

    /// Cookie cache path
    #[arg(long, default_value = "cookies.json")]
    cookies: PathBuf,

    /// Output directory root
    #[arg(long, default_value = "babies")]
    output: PathBuf,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        // stderr, not tracing: the failure may predate subscriber setup
        // (e.g. a malformed config file).
        eprintln!("fatal error: {e:#}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let (config, created) =
        Config::load_or_create(&cli.config).context("Failed to load configuration")?;

    init_tracing(&config)?;

    if created {
        info!(path = %cli.config.display(), "created default config");
    } else {
        info!(path = %cli.config.display(), "loaded config");
    }

    let book_ids = cli
        .books
        .iter()
        .map(|b| BookId::parse(b))
        .collect::<Result<Vec<_>, _>>()
        .context("Failed to parse book identifiers")?;
    info!(
        books = %book_ids.iter().map(ToString::to_string).collect::<Vec<_>>().join(", "),
        "book uuids"
    );

    let username = config
        .username
        .clone()
        .context("No username in config; edit the config file")?;
    let password = config
        .password
        .clone()
        .context("No password in config; edit the config file")?;

    let cookie_store = CookieStore::new(&cli.cookies);
    let opts = CaptureOptions {
        overwrite: cli.overwrite,
        ..CaptureOptions::default()
    };

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("interrupt received, finishing up");
                cancel.cancel();
            }
        });
    }

    let mut session = BrowserSession::launch(&config)
        .await
        .context("Failed to launch browser")?;

    let mut result = drive(
        &session,
        &cookie_store,
        &username,
        &password,
        config.headless,
        &book_ids,
        &cli.output,
        &opts,
        &cancel,
    )
    .await;

    // A captcha under headless is recoverable: relaunch with a visible
    // window and let the user solve it, once.
    if matches!(result, Err(Error::CaptchaRequired)) && config.headless {
        warn!("captcha required, relaunching with a visible browser window");
        session.shutdown().await;
        let mut headed = config.clone();
        headed.headless = false;
        session = BrowserSession::launch(&headed)
            .await
            .context("Failed to relaunch browser")?;
        result = drive(
            &session,
            &cookie_store,
            &username,
            &password,
            false,
            &book_ids,
            &cli.output,
            &opts,
            &cancel,
        )
        .await;
    }

    let outcome = match result {
        Ok(()) => Ok(()),
        Err(Error::Cancelled) => {
            info!("exiting");
            Ok(())
        }
        Err(e) => {
            write_diagnostics(&session).await;
            Err(e).context("Capture failed; see error.html and error.png")
        }
    };

    // Teardown on every exit path: best-effort logout, then close.
    let auth = AuthFlow::new(&session, &cookie_store, CancellationToken::new());
    if let Err(e) = auth.sign_out().await {
        warn!(error = %e, "logout failed during teardown");
    }
    session.shutdown().await;

    outcome
}

#[allow(clippy::too_many_arguments)]
async fn drive(
    session: &BrowserSession,
    cookie_store: &CookieStore,
    username: &str,
    password: &str,
    headless: bool,
    book_ids: &[BookId],
    out_root: &std::path::Path,
    opts: &CaptureOptions,
    cancel: &CancellationToken,
) -> Result<(), Error> {
    let auth = AuthFlow::new(session, cookie_store, cancel.clone());
    auth.sign_in(username, password, headless).await?;
    let auth = &auth;

    // Already-written pages are skipped on re-entry, so a mid-book
    // duplicate-session kick resumes at the first missing page.
    with_relogin(
        MAX_LOGIN_RETRIES,
        || {
            let (session, book_ids, out_root, opts, cancel) =
                (session, book_ids, out_root, opts, cancel);
            async move {
                for book_id in book_ids {
                    if cancel.is_cancelled() {
                        return Err(Error::Cancelled);
                    }
                    let summary =
                        download_book(session, book_id, out_root, opts.clone(), cancel.clone())
                            .await?;
                    info!(
                        book = %book_id,
                        written = summary.written.len(),
                        skipped = summary.skipped.len(),
                        degraded = summary.degraded.len(),
                        "book complete"
                    );
                }
                Ok(())
            }
        },
        || {
            let auth = auth;
            async move {
                let _ = auth.sign_out().await;
                auth.sign_in(username, password, headless).await
            }
        },
    )
    .await
}

/// Dump the failing page's source and a screenshot for human debugging.
async fn write_diagnostics(session: &BrowserSession) {
    match session.content().await {
        Ok(html) => {
            if let Err(e) = tokio::fs::write("error.html", html).await {
                warn!(error = %e, "failed to write error.html");
            }
        }
        Err(e) => warn!(error = %e, "failed to read page source for diagnostics"),
    }
    match session.screenshot_png().await {
        Ok(png) => {
            if let Err(e) = tokio::fs::write("error.png", png).await {
                warn!(error = %e, "failed to write error.png");
            }
        }
        Err(e) => warn!(error = %e, "failed to capture diagnostic screenshot"),
    }
}

fn init_tracing(config: &Config) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.logging_level.as_filter()));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {e}"))?;

    Ok(())
}

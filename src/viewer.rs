//! Bridge to the reader's in-page viewer component.
//!
//! The viewer is a third-party widget with no stable API; the only contract
//! available is querying its internal object model through script
//! evaluation. Its handle is not a fixed name and has to be resolved by
//! scanning the initializer registry; the resolved expression is cached for
//! the lifetime of the page load.

use async_trait::async_trait;
use chromiumoxide::Page;
use tokio::sync::OnceCell;
use tracing::debug;

use crate::error::{Error, Result};
use crate::site;

/// Finds the initializer entry that carries the `menu` member and returns
/// its key, or null while the viewer has not initialized yet.
const RESOLVE_MENU_KEY: &str = "(() => {\
     for (const k in NFBR.a6G.Initializer) {\
         if (NFBR.a6G.Initializer[k].menu !== undefined) { return k; }\
     }\
     return null;\
 })()";

/// Navigation and render-state queries against the live viewer.
///
/// All operations are 1-based. `goto` is non-blocking; callers confirm
/// arrival by polling [`ViewerBridge::current_index`].
#[async_trait]
pub trait ViewerBridge {
    /// Index the viewer believes is currently displayed.
    async fn current_index(&self) -> Result<u32>;

    /// Total number of spreads in the open book.
    ///
    /// Fails while the viewer's model is not yet populated; callers poll
    /// with a bound rather than assume availability.
    async fn total_count(&self) -> Result<u32>;

    /// Command navigation to `index` without waiting for arrival.
    async fn goto(&self, index: u32) -> Result<()>;

    /// True when no loading overlay is visible.
    async fn render_idle(&self) -> Result<bool>;
}

/// Concrete bridge driving the vendor viewer through script evaluation.
pub struct PageViewer {
    page: Page,
    menu: OnceCell<String>,
}

impl PageViewer {
    #[must_use]
    pub fn new(page: Page) -> Self {
        Self {
            page,
            menu: OnceCell::new(),
        }
    }

    /// Resolve (and cache) the expression naming the viewer's menu object.
    async fn menu_expr(&self) -> Result<&str> {
        let expr = self
            .menu
            .get_or_try_init(|| async {
                let key: Option<String> = self.eval(RESOLVE_MENU_KEY.to_string()).await?;
                let key = key.ok_or_else(|| {
                    Error::ViewerScript("viewer initializer has no menu entry".to_string())
                })?;
                debug!(key, "resolved viewer menu handle");
                Ok::<_, Error>(format!("NFBR.a6G.Initializer.{key}.menu"))
            })
            .await?;
        Ok(expr)
    }

    async fn eval<T: serde::de::DeserializeOwned>(&self, expr: String) -> Result<T> {
        match self.page.evaluate(expr).await {
            Ok(result) => result
                .into_value::<T>()
                .map_err(|e| Error::ViewerScript(e.to_string())),
            Err(e) => Err(self.classify_failure(e).await),
        }
    }

    /// Evaluate a statement for its side effect, ignoring the result.
    async fn run(&self, expr: String) -> Result<()> {
        match self.page.evaluate(expr).await {
            Ok(_) => Ok(()),
            Err(e) => Err(self.classify_failure(e).await),
        }
    }

    /// A script failure against the viewer model usually means the model is
    /// not populated yet, but the same failure shape appears when the server
    /// has kicked this session. Check the document for the duplicate-session
    /// marker before reporting a plain script error.
    async fn classify_failure(&self, err: chromiumoxide::error::CdpError) -> Error {
        if let Ok(html) = self.page.content().await {
            if html.contains(site::DUPLICATE_SESSION_MARKER) {
                return Error::DuplicateSession;
            }
        }
        Error::ViewerScript(err.to_string())
    }
}

#[async_trait]
impl ViewerBridge for PageViewer {
    async fn current_index(&self) -> Result<u32> {
        let menu = self.menu_expr().await?;
        let index: i64 = self
            .eval(format!(
                "1 + {menu}.model.attributes.viewera6e.getSpreadIndex()"
            ))
            .await?;
        u32::try_from(index)
            .map_err(|_| Error::ViewerScript(format!("viewer reported spread index {index}")))
    }

    async fn total_count(&self) -> Result<u32> {
        let menu = self.menu_expr().await?;
        let count: i64 = self
            .eval(format!("{menu}.model.attributes.a2u.X2g.length"))
            .await?;
        u32::try_from(count)
            .map_err(|_| Error::ViewerScript(format!("viewer reported spread count {count}")))
    }

    async fn goto(&self, index: u32) -> Result<()> {
        let menu = self.menu_expr().await?;
        // Spreads are addressed by the page index of their first page.
        let spread = index.saturating_sub(1);
        let page_index: i64 = self
            .eval(format!(
                "{menu}.model.attributes.a2u.X2g[{spread}].pageIndex"
            ))
            .await?;
        self.run(format!("{menu}.options.a6l.moveToPage({page_index});"))
            .await
    }

    async fn render_idle(&self) -> Result<bool> {
        let class = site::VIEWER_LOADING_CLASS;
        self.eval(format!(
            "Array.from(document.getElementsByClassName('{class}'))\
             .every((e) => e.offsetParent === null)"
        ))
        .await
    }
}

//! Renderer abstraction for browser-driven portal sessions.
//!
//! `Launcher` starts a browser, `Renderer` hands out tabs, and
//! `RenderContext` drives a single tab. `BrowserSession` bundles one
//! browser with one tab and tears both down together.

pub mod chromium;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Result of navigating to a URL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NavigationResult {
    /// The final URL after any redirects.
    pub final_url: String,
    /// Time taken to load the page in milliseconds.
    pub load_time_ms: u64,
}

/// A cookie read from or written to the browser jar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrowserCookie {
    pub name: String,
    pub value: String,
    pub domain: String,
    pub path: String,
}

impl BrowserCookie {
    pub fn new(name: &str, value: &str, domain: &str) -> Self {
        Self {
            name: name.to_string(),
            value: value.to_string(),
            domain: domain.to_string(),
            path: "/".to_string(),
        }
    }
}

/// Whether a launched browser shows a window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BrowserMode {
    Headless,
    Headed,
}

/// Starts browser engines on demand.
#[async_trait]
pub trait Launcher: Send + Sync {
    async fn launch(&self, mode: BrowserMode) -> Result<Box<dyn Renderer>>;
}

/// A browser engine that can create rendering contexts.
#[async_trait]
pub trait Renderer: Send + Sync {
    /// Create a new browser context (tab).
    async fn new_context(&self) -> Result<Box<dyn RenderContext>>;
    /// Shut down the browser engine and wait for the process to exit.
    async fn shutdown(&self) -> Result<()>;
    /// Number of currently active contexts.
    fn active_contexts(&self) -> usize;
}

/// A single browser context (tab).
#[async_trait]
pub trait RenderContext: Send + Sync {
    /// Navigate to a URL with a timeout.
    async fn navigate(&mut self, url: &str, timeout_ms: u64) -> Result<NavigationResult>;
    /// Execute JavaScript in the page context and return the result.
    async fn execute_js(&self, script: &str) -> Result<serde_json::Value>;
    /// Get the current URL.
    async fn get_url(&self) -> Result<String>;
    /// Rendered text of the page body.
    async fn inner_text(&self) -> Result<String> {
        let v = self
            .execute_js("document.body ? document.body.innerText : ''")
            .await?;
        Ok(v.as_str().unwrap_or_default().to_string())
    }
    /// Add a cookie to the jar.
    async fn set_cookie(&self, cookie: &BrowserCookie) -> Result<()>;
    /// All cookies visible to the current page.
    async fn cookies(&self) -> Result<Vec<BrowserCookie>>;
    /// Focus the first element matching `selector` and type `text` into it.
    async fn fill(&self, selector: &str, text: &str) -> Result<()>;
    /// Press Enter on the first element matching `selector`.
    async fn press_enter(&self, selector: &str) -> Result<()>;
    /// Click the first element matching `selector`.
    async fn click(&self, selector: &str) -> Result<()>;
    /// Close this context.
    async fn close(self: Box<Self>) -> Result<()>;
}

/// One browser plus one tab, closed together.
///
/// Callers must finish with [`BrowserSession::close`] on every path.
/// Dropping a session without closing it still kills the browser process,
/// but skips the orderly shutdown.
pub struct BrowserSession {
    renderer: Box<dyn Renderer>,
    context: Option<Box<dyn RenderContext>>,
}

impl BrowserSession {
    pub async fn open(launcher: &dyn Launcher, mode: BrowserMode) -> Result<Self> {
        let renderer = launcher.launch(mode).await?;
        match renderer.new_context().await {
            Ok(ctx) => Ok(Self {
                renderer,
                context: Some(ctx),
            }),
            Err(e) => {
                if let Err(close_err) = renderer.shutdown().await {
                    tracing::warn!("browser shutdown failed: {close_err:#}");
                }
                Err(e)
            }
        }
    }

    pub fn context(&mut self) -> Result<&mut (dyn RenderContext + 'static)> {
        self.context
            .as_deref_mut()
            .ok_or_else(|| anyhow::anyhow!("browser session already closed"))
    }

    /// Close the tab and shut the browser down. Failures are logged, not
    /// returned, since there is nothing left for the caller to do.
    pub async fn close(mut self) {
        if let Some(ctx) = self.context.take() {
            if let Err(e) = ctx.close().await {
                tracing::debug!("closing browser tab failed: {e:#}");
            }
        }
        if let Err(e) = self.renderer.shutdown().await {
            tracing::warn!("browser shutdown failed: {e:#}");
        }
    }
}

use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde_json::Value;

use crate::extract::Affordance;
pub use crate::scroll::ScrollMetrics;

/// The rendered page a session reads from and steers.
#[async_trait]
pub trait View: Send + Sync {
    /// Current serialized DOM.
    async fn snapshot(&self) -> Result<String>;

    async fn scroll_metrics(&self) -> Result<ScrollMetrics>;

    async fn scroll_by(&self, dy: f64) -> Result<()>;

    async fn scroll_to(&self, y: f64) -> Result<()>;

    async fn click(&self, target: &Affordance) -> Result<()>;

    /// Evaluate a script in the page and return its JSON result. `None` for
    /// views that cannot run scripts or when the script found nothing.
    async fn evaluate(&self, _script: &str) -> Result<Option<Value>> {
        Ok(None)
    }

    /// Expose live session state to the page for debugging.
    async fn publish_state(&self, _state: &Value) -> Result<()> {
        Ok(())
    }
}

enum Source {
    File(PathBuf),
    Memory(String),
}

struct Virtual {
    top: f64,
    content_height: f64,
}

/// A saved page. Files are re-read on every snapshot, so a page saved
/// repeatedly from the browser behaves like a live feed.
pub struct SnapshotView {
    source: Mutex<Source>,
    viewport: f64,
    scroll: Mutex<Virtual>,
    clicks: Mutex<Vec<Affordance>>,
    published: Mutex<Option<Value>>,
    /// Stands in for the page's script data.
    live: Mutex<Option<Value>>,
}

pub const DEFAULT_VIEWPORT: f64 = 900.0;
pub const DEFAULT_CONTENT_HEIGHT: f64 = 5000.0;

impl SnapshotView {
    fn with_source(source: Source) -> Self {
        Self {
            source: Mutex::new(source),
            viewport: DEFAULT_VIEWPORT,
            scroll: Mutex::new(Virtual {
                top: 0.0,
                content_height: DEFAULT_CONTENT_HEIGHT,
            }),
            clicks: Mutex::new(Vec::new()),
            published: Mutex::new(None),
            live: Mutex::new(None),
        }
    }

    pub fn from_file(path: impl Into<PathBuf>) -> Self {
        Self::with_source(Source::File(path.into()))
    }

    pub fn from_html(html: impl Into<String>) -> Self {
        Self::with_source(Source::Memory(html.into()))
    }

    /// Start at a given scroll offset with the given page height.
    pub fn with_geometry(self, top: f64, content_height: f64) -> Self {
        if let Ok(mut s) = self.scroll.lock() {
            s.content_height = content_height;
            s.top = top.clamp(0.0, (content_height - self.viewport).max(0.0));
        }
        self
    }

    /// Swap the in-memory page, simulating new content arriving.
    pub fn replace_html(&self, html: impl Into<String>) {
        if let Ok(mut src) = self.source.lock() {
            *src = Source::Memory(html.into());
        }
    }

    /// Data every `evaluate` call returns, as a page script would.
    pub fn set_live_data(&self, data: Option<Value>) {
        if let Ok(mut live) = self.live.lock() {
            *live = data;
        }
    }

    pub fn clicks(&self) -> Vec<Affordance> {
        self.clicks.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn published(&self) -> Option<Value> {
        self.published.lock().ok().and_then(|p| p.clone())
    }

    fn set_top(&self, y: f64) -> Result<()> {
        let mut s = self.scroll.lock().map_err(|_| anyhow!("scroll state poisoned"))?;
        let max = (s.content_height - self.viewport).max(0.0);
        s.top = y.clamp(0.0, max);
        Ok(())
    }
}

#[async_trait]
impl View for SnapshotView {
    async fn snapshot(&self) -> Result<String> {
        let path = {
            let src = self.source.lock().map_err(|_| anyhow!("snapshot source poisoned"))?;
            match &*src {
                Source::Memory(html) => return Ok(html.clone()),
                Source::File(path) => path.clone(),
            }
        };
        tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("Failed to read snapshot {}", path.display()))
    }

    async fn scroll_metrics(&self) -> Result<ScrollMetrics> {
        let s = self.scroll.lock().map_err(|_| anyhow!("scroll state poisoned"))?;
        Ok(ScrollMetrics {
            top: s.top,
            viewport: self.viewport,
        })
    }

    async fn scroll_by(&self, dy: f64) -> Result<()> {
        let top = self.scroll_metrics().await?.top;
        self.set_top(top + dy)
    }

    async fn scroll_to(&self, y: f64) -> Result<()> {
        self.set_top(y)
    }

    async fn click(&self, target: &Affordance) -> Result<()> {
        self.clicks
            .lock()
            .map_err(|_| anyhow!("click log poisoned"))?
            .push(target.clone());
        Ok(())
    }

    async fn evaluate(&self, _script: &str) -> Result<Option<Value>> {
        Ok(self.live.lock().map_err(|_| anyhow!("live data poisoned"))?.clone())
    }

    async fn publish_state(&self, state: &Value) -> Result<()> {
        *self.published.lock().map_err(|_| anyhow!("state poisoned"))? = Some(state.clone());
        Ok(())
    }
}

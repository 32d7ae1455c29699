use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use chromiumoxide::browser::Browser;
use chromiumoxide::page::Page;
use futures_util::StreamExt;
use serde::Deserialize;
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::extract::Affordance;
use crate::view::{ScrollMetrics, View};

pub const DEFAULT_CDP: &str = "http://127.0.0.1:9222";

#[derive(Debug, Deserialize)]
struct VersionInfo {
    #[serde(rename = "webSocketDebuggerUrl")]
    web_socket_debugger_url: String,
}

/// Ask a Chrome started with `--remote-debugging-port` for its websocket URL.
pub async fn discover_ws_url(cdp: &str) -> Result<String> {
    if cdp.starts_with("ws://") || cdp.starts_with("wss://") {
        return Ok(cdp.to_string());
    }
    let url = format!("{}/json/version", cdp.trim_end_matches('/'));
    let info: VersionInfo = reqwest::get(&url)
        .await
        .with_context(|| format!("Failed to reach DevTools at {}", url))?
        .error_for_status()?
        .json()
        .await
        .context("Unexpected /json/version payload")?;
    Ok(info.web_socket_debugger_url)
}

/// A tab in a running Chrome, driven over the DevTools protocol.
pub struct BrowserView {
    // kept alive for the connection
    _browser: Browser,
    page: Page,
    handler: JoinHandle<()>,
}

impl BrowserView {
    /// Attach to the first tab whose URL contains `tab`, or the first tab.
    pub async fn connect(cdp: &str, tab: Option<&str>) -> Result<Self> {
        let ws = discover_ws_url(cdp).await?;
        info!("Connecting to {}", ws);
        let (browser, mut handler) = Browser::connect(&ws)
            .await
            .map_err(|e| anyhow!("Failed to connect to browser: {}", e))?;

        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!("DevTools handler: {}", e);
                }
            }
        });

        let pages = browser
            .pages()
            .await
            .map_err(|e| anyhow!("Failed to list tabs: {}", e))?;

        let mut chosen = None;
        for page in pages {
            let url = page.url().await.ok().flatten().unwrap_or_default();
            match tab {
                Some(want) if !url.contains(want) => continue,
                _ => {
                    info!("Using tab {}", url);
                    chosen = Some(page);
                    break;
                }
            }
        }
        let Some(page) = chosen else {
            handler.abort();
            bail!("No open tab matches {:?}", tab.unwrap_or("(any)"));
        };

        Ok(Self {
            _browser: browser,
            page,
            handler,
        })
    }

    pub async fn url(&self) -> Option<String> {
        self.page.url().await.ok().flatten()
    }

    async fn eval(&self, script: &str) -> Result<Value> {
        self.page
            .evaluate(script)
            .await
            .map_err(|e| anyhow!("Script failed: {}", e))?
            .into_value()
            .map_err(|e| anyhow!("Script result: {}", e))
    }
}

/// Script that clicks the affordance only if an element with the same label
/// is still there. The page may re-render between the snapshot and the
/// click, so the element at the recorded index is checked first, then the
/// closest element carrying the same label. Evaluates to `"clicked"`,
/// `"moved"` or `"missing"`.
fn click_script(target: &Affordance) -> Result<String> {
    let selector = serde_json::to_string(&target.selector)?;
    let label = serde_json::to_string(&target.label)?;
    Ok(format!(
        "(() => {{ \
         const label = el => ((el.textContent || '').split(/\\s+/).filter(Boolean).join(' ') \
         + ' ' + (el.getAttribute('aria-label') || '')).trim().toLowerCase(); \
         const all = [...document.querySelectorAll({selector})]; \
         const at = all[{idx}]; \
         if (at && label(at) === {label}) {{ at.click(); return 'clicked'; }} \
         let best = -1; \
         all.forEach((el, i) => {{ if (label(el) === {label} && (best < 0 || Math.abs(i - {idx}) < Math.abs(best - {idx}))) best = i; }}); \
         if (best < 0) return 'missing'; \
         all[best].click(); return 'moved'; }})()",
        idx = target.index
    ))
}

impl Drop for BrowserView {
    fn drop(&mut self) {
        self.handler.abort();
    }
}

#[async_trait]
impl View for BrowserView {
    async fn snapshot(&self) -> Result<String> {
        self.page
            .content()
            .await
            .map_err(|e| anyhow!("Failed to read page content: {}", e))
    }

    async fn scroll_metrics(&self) -> Result<ScrollMetrics> {
        let v = self
            .eval("({ top: window.scrollY, viewport: window.innerHeight })")
            .await?;
        Ok(ScrollMetrics {
            top: v["top"].as_f64().unwrap_or(0.0),
            viewport: v["viewport"].as_f64().unwrap_or(0.0),
        })
    }

    async fn scroll_by(&self, dy: f64) -> Result<()> {
        self.eval(&format!("window.scrollBy(0, {dy}); true")).await?;
        Ok(())
    }

    async fn scroll_to(&self, y: f64) -> Result<()> {
        self.eval(&format!("window.scrollTo(0, {y}); true")).await?;
        Ok(())
    }

    async fn click(&self, target: &Affordance) -> Result<()> {
        let script = click_script(target)?;
        match self.eval(&script).await?.as_str().unwrap_or("missing") {
            "clicked" => {}
            "moved" => debug!("Affordance {:?} moved since the snapshot", target.label),
            _ => warn!("Affordance {:?} is gone", target.label),
        }
        Ok(())
    }

    async fn evaluate(&self, script: &str) -> Result<Option<Value>> {
        let value = self.eval(script).await?;
        Ok((!value.is_null()).then_some(value))
    }

    async fn publish_state(&self, state: &Value) -> Result<()> {
        self.eval(&format!("window.__feedCaptureState = {state}; true"))
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(label: &str) -> Affordance {
        Affordance {
            selector: r#"div[role="button"], button"#.into(),
            index: 4,
            label: label.into(),
        }
    }

    #[test]
    fn click_checks_label_before_clicking() {
        let script = click_script(&target("show more replies")).unwrap();
        assert!(script.contains(r#"document.querySelectorAll("div[role=\"button\"], button")"#));
        assert!(script.contains("const at = all[4];"));
        assert!(script.contains(r#"if (at && label(at) === "show more replies") { at.click(); return 'clicked'; }"#));
        assert!(script.contains("return 'missing';"));
        assert_eq!(script.matches(".click()").count(), 2);
    }

    #[test]
    fn click_label_is_escaped() {
        let script = click_script(&target(r#"say "hi" </script>"#)).unwrap();
        assert!(script.contains(r#"=== "say \"hi\" </script>""#));
        assert_eq!(script.matches("'clicked'").count(), 1);
    }
}

use std::path::PathBuf;
use std::process::Stdio;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tracing::{debug, error, info};

/// Destination for the finished JSON export.
#[async_trait]
pub trait Sink: Send + Sync {
    fn name(&self) -> String;

    async fn deliver(&self, payload: &str) -> Result<()>;
}

/// Pretty-printed JSON array, the one export format.
pub fn to_payload<T: Serialize>(items: &[T]) -> Result<String> {
    serde_json::to_string_pretty(items).context("Failed to serialize export")
}

/// Hand the payload to every sink. All sinks are attempted; the first
/// failure is returned.
pub async fn deliver_all(sinks: &[Box<dyn Sink>], payload: &str) -> Result<()> {
    let mut first_err = None;
    for sink in sinks {
        match sink.deliver(payload).await {
            Ok(()) => info!("Exported to {}", sink.name()),
            Err(e) => {
                error!("Export to {} failed: {:#}", sink.name(), e);
                first_err.get_or_insert(e.context(format!("export to {}", sink.name())));
            }
        }
    }
    match first_err {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

pub struct StdoutSink;

#[async_trait]
impl Sink for StdoutSink {
    fn name(&self) -> String {
        "stdout".into()
    }

    async fn deliver(&self, payload: &str) -> Result<()> {
        let mut out = tokio::io::stdout();
        out.write_all(payload.as_bytes()).await?;
        out.write_all(b"\n").await?;
        out.flush().await?;
        Ok(())
    }
}

pub struct FileSink {
    path: PathBuf,
}

impl FileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl Sink for FileSink {
    fn name(&self) -> String {
        self.path.display().to_string()
    }

    async fn deliver(&self, payload: &str) -> Result<()> {
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(dir).await?;
        }
        tokio::fs::write(&self.path, payload)
            .await
            .with_context(|| format!("Failed to write {}", self.path.display()))
    }
}

/// Pipes the export into a clipboard program's stdin.
pub struct ClipboardSink {
    program: String,
    args: Vec<String>,
}

impl ClipboardSink {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// `pbcopy` on macOS, `xclip` elsewhere.
    pub fn system() -> Self {
        if cfg!(target_os = "macos") {
            Self::new("pbcopy", Vec::new())
        } else {
            Self::new("xclip", vec!["-selection".into(), "clipboard".into()])
        }
    }
}

#[async_trait]
impl Sink for ClipboardSink {
    fn name(&self) -> String {
        format!("clipboard ({})", self.program)
    }

    async fn deliver(&self, payload: &str) -> Result<()> {
        let mut child = tokio::process::Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to start {}", self.program))?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| anyhow!("{} has no stdin", self.program))?;
        if let Err(e) = stdin.write_all(payload.as_bytes()).await {
            drop(stdin);
            if let Err(k) = child.kill().await {
                debug!("Could not stop {}: {}", self.program, k);
            }
            return Err(e).with_context(|| format!("Failed to write to {}", self.program));
        }
        drop(stdin);

        let status = child.wait().await?;
        if !status.success() {
            bail!("{} exited with {}", self.program, status);
        }
        Ok(())
    }
}

/// POSTs the export as `application/json`.
pub struct HttpSink {
    client: reqwest::Client,
    url: String,
}

impl HttpSink {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
        }
    }
}

#[async_trait]
impl Sink for HttpSink {
    fn name(&self) -> String {
        self.url.clone()
    }

    async fn deliver(&self, payload: &str) -> Result<()> {
        let resp = self
            .client
            .post(&self.url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(payload.to_string())
            .send()
            .await
            .with_context(|| format!("POST {} failed", self.url))?;
        if !resp.status().is_success() {
            bail!("POST {} returned {}", self.url, resp.status());
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod memory {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    use super::*;

    /// Keeps every delivered payload; can be told to fail.
    #[derive(Default)]
    pub struct MemorySink {
        pub payloads: Mutex<Vec<String>>,
        fail: AtomicBool,
    }

    impl MemorySink {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn set_failing(&self, fail: bool) {
            self.fail.store(fail, Ordering::SeqCst);
        }

        pub fn last(&self) -> Option<String> {
            self.payloads.lock().unwrap().last().cloned()
        }

        pub fn deliveries(&self) -> usize {
            self.payloads.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl Sink for std::sync::Arc<MemorySink> {
        fn name(&self) -> String {
            "memory".into()
        }

        async fn deliver(&self, payload: &str) -> Result<()> {
            if self.fail.load(Ordering::SeqCst) {
                bail!("sink unavailable");
            }
            self.payloads.lock().unwrap().push(payload.to_string());
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::memory::MemorySink;
    use super::*;

    #[tokio::test]
    async fn file_sink_creates_dirs() {
        let dir = std::env::temp_dir().join(format!("feed_capture_export_{}", std::process::id()));
        let path = dir.join("nested").join("out.json");
        FileSink::new(&path).deliver("[]").await.unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "[]");
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[tokio::test]
    async fn clipboard_pipes_to_program() {
        let ok = ClipboardSink::new("sh", vec!["-c".into(), "cat > /dev/null".into()]);
        ok.deliver("[1]").await.unwrap();

        let failing = ClipboardSink::new("sh", vec!["-c".into(), "exit 3".into()]);
        assert!(failing.deliver("[1]").await.is_err());

        let missing = ClipboardSink::new("feed-capture-no-such-program", Vec::new());
        assert!(missing.deliver("[1]").await.is_err());
    }

    #[tokio::test]
    async fn clipboard_stopped_when_it_stops_reading() {
        // closes its stdin, then lingers
        let sink = ClipboardSink::new("sh", vec!["-c".into(), "exec 0<&-; sleep 30".into()]);
        let payload = "x".repeat(4 << 20);

        let result = tokio::time::timeout(std::time::Duration::from_secs(10), sink.deliver(&payload))
            .await
            .expect("deliver hung on a lingering clipboard program");
        let err = result.unwrap_err();
        assert!(format!("{:#}", err).contains("Failed to write to sh"));
    }

    #[tokio::test]
    async fn every_sink_attempted() {
        let broken = Arc::new(MemorySink::new());
        broken.set_failing(true);
        let good = Arc::new(MemorySink::new());
        let sinks: Vec<Box<dyn Sink>> = vec![Box::new(broken.clone()), Box::new(good.clone())];

        let err = deliver_all(&sinks, "[]").await.unwrap_err();
        assert!(format!("{:#}", err).contains("sink unavailable"));
        assert_eq!(good.deliveries(), 1);
        assert_eq!(broken.deliveries(), 0);
    }

    #[test]
    fn payload_is_pretty_array() {
        let payload = to_payload(&[serde_json::json!({"link": "a"})]).unwrap();
        assert!(payload.starts_with("[\n"));
        assert_eq!(serde_json::from_str::<Vec<serde_json::Value>>(&payload).unwrap().len(), 1);
    }
}

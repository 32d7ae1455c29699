use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use futures_util::FutureExt;
use serde_json::json;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::control::ControlSurface;
use crate::export::{deliver_all, to_payload, Sink};
use crate::extract::{live_records, run_pass, Pass, Profile};
use crate::merge::CaptureStore;
use crate::model::Record;
use crate::scheduler::{Scheduler, Task, TimerHandle, DEFAULT_CAPTURE_INTERVAL, DEFAULT_SCROLL_INTERVAL};
use crate::score::{score, ScoreOptions};
use crate::scroll::{ScrollController, ScrollPhase};
use crate::view::View;

#[derive(Debug, Clone)]
pub struct CaptureConfig {
    pub capture_interval: Duration,
    pub scroll_interval: Duration,
    /// Score at export; off exports the raw canonical items.
    pub score: bool,
    pub score_options: ScoreOptions,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            capture_interval: DEFAULT_CAPTURE_INTERVAL,
            scroll_interval: DEFAULT_SCROLL_INTERVAL,
            score: true,
            score_options: ScoreOptions::default(),
        }
    }
}

/// Mutable state of one capture. Owned by its session, never global.
#[derive(Debug, Default)]
pub struct CaptureState {
    pub store: CaptureStore,
    pub scroll: ScrollController,
}

impl CaptureState {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Everything a tick needs; cloned into each timer task.
#[derive(Clone)]
struct Ticker {
    view: Arc<dyn View>,
    profile: Arc<dyn Profile>,
    control: Arc<dyn ControlSurface>,
    state: Arc<Mutex<CaptureState>>,
}

impl Ticker {
    async fn read_pass(&self, with_affordances: bool) -> Option<Pass> {
        let mut pass = match self.view.snapshot().await {
            Ok(html) => run_pass(&html, self.profile.as_ref(), with_affordances),
            Err(e) => {
                warn!("Snapshot failed: {:#}", e);
                return None;
            }
        };
        if let Some(records) = self.read_live().await {
            pass.records = records;
        }
        Some(pass)
    }

    /// Records from the page's own data, when the profile knows a script
    /// for it and the page answers.
    async fn read_live(&self) -> Option<Vec<Record>> {
        let script = self.profile.live_script()?;
        match self.view.evaluate(script).await {
            Ok(Some(data)) => {
                let records = live_records(&data, self.profile.as_ref());
                (!records.is_empty()).then_some(records)
            }
            Ok(None) => None,
            Err(e) => {
                debug!("Live read failed, using markup: {:#}", e);
                None
            }
        }
    }

    /// Merge a pass into the store; returns the count and phase after it.
    async fn merge(&self, records: Vec<Record>) -> (usize, ScrollPhase) {
        let mut state = self.state.lock().await;
        let stats = state.store.reconcile(records);
        if stats.inserted > 0 {
            debug!("{} new items ({} total)", stats.inserted, state.store.len());
        }
        (state.store.len(), state.scroll.phase())
    }

    async fn capture_tick(&self) {
        let Some(pass) = self.read_pass(false).await else {
            return;
        };
        let (count, phase) = self.merge(pass.records).await;
        self.control.set_count(count);

        let published = json!({ "count": count, "phase": phase });
        if let Err(e) = self.view.publish_state(&published).await {
            debug!("Publishing state failed: {:#}", e);
        }
    }

    async fn scroll_tick(&self) {
        if let Some(pass) = self.read_pass(true).await {
            for target in &pass.affordances {
                debug!("Expanding {:?}", target.label);
                if let Err(e) = self.view.click(target).await {
                    debug!("Click on {:?} failed: {:#}", target.label, e);
                }
            }
            self.merge(pass.records).await;
        }

        if let Err(e) = self.scroll_step().await {
            warn!("Scroll failed: {:#}", e);
        }
    }

    async fn scroll_step(&self) -> Result<()> {
        let before = self.view.scroll_metrics().await?;
        let (phase, delta) = {
            let state = self.state.lock().await;
            (state.scroll.phase(), state.scroll.next_delta(before.viewport))
        };
        self.view.scroll_by(delta).await?;
        if phase == ScrollPhase::Down {
            return Ok(());
        }

        let after = self.view.scroll_metrics().await?;
        let mut state = self.state.lock().await;
        if state.scroll.observe(before.top, after.top) == ScrollPhase::Down {
            info!("Reached the top with {} items, scrolling down", state.store.len());
        }
        Ok(())
    }

    fn task(&self, f: fn(Ticker) -> futures_util::future::BoxFuture<'static, ()>) -> Task {
        let ticker = self.clone();
        Box::new(move || f(ticker.clone()))
    }
}

/// A running capture: two periodic loops over one view, feeding one store.
pub struct CaptureSession {
    ticker: Ticker,
    timers: Vec<TimerHandle>,
    config: CaptureConfig,
    exported: bool,
}

impl CaptureSession {
    /// Show the control, rewind the view, run one pass of each loop right
    /// away, then hand both loops to the scheduler.
    pub async fn start(
        view: Arc<dyn View>,
        profile: Arc<dyn Profile>,
        scheduler: &dyn Scheduler,
        control: Arc<dyn ControlSurface>,
        config: CaptureConfig,
    ) -> Result<Self> {
        let ticker = Ticker {
            view,
            profile,
            control,
            state: Arc::new(Mutex::new(CaptureState::new())),
        };

        ticker.control.show();
        ticker
            .view
            .scroll_to(0.0)
            .await
            .context("Failed to scroll to top")?;

        ticker.scroll_tick().await;
        ticker.capture_tick().await;

        let capture = scheduler.start(
            "capture",
            config.capture_interval,
            ticker.task(|t| async move { t.capture_tick().await }.boxed()),
        );
        let scroll = scheduler.start(
            "scroll",
            config.scroll_interval,
            ticker.task(|t| async move { t.scroll_tick().await }.boxed()),
        );

        info!(
            "Capturing with profile {} every {:?} (scroll every {:?})",
            ticker.profile.name(),
            config.capture_interval,
            config.scroll_interval
        );

        Ok(Self {
            ticker,
            timers: vec![capture, scroll],
            config,
            exported: false,
        })
    }

    pub async fn count(&self) -> usize {
        self.ticker.state.lock().await.store.len()
    }

    pub async fn phase(&self) -> ScrollPhase {
        self.ticker.state.lock().await.scroll.phase()
    }

    pub async fn items(&self) -> Vec<Record> {
        self.ticker.state.lock().await.store.snapshot()
    }

    pub fn is_exported(&self) -> bool {
        self.exported
    }

    /// Stop both loops and export. Returns the number of items exported, or
    /// `None` if this session was already exported.
    pub async fn finish_at(
        &mut self,
        sinks: &[Box<dyn Sink>],
        now: DateTime<Utc>,
    ) -> Result<Option<usize>> {
        if self.exported {
            return Ok(None);
        }
        for timer in self.timers.drain(..) {
            timer.stop().await;
        }
        self.ticker.control.remove();

        let mut items = self.items().await;
        self.ticker.profile.order_export(&mut items);
        let payload = if self.config.score {
            to_payload(&score(&items, now, &self.config.score_options))?
        } else {
            to_payload(&items)?
        };

        if let Err(e) = deliver_all(sinks, &payload).await {
            error!("Export of {} items failed; session kept for retry", items.len());
            return Err(e);
        }
        self.exported = true;
        Ok(Some(items.len()))
    }

    /// Export to `sinks`. When they fail, the same export goes to each
    /// fallback in turn until one takes it.
    pub async fn finish_with_fallback(
        &mut self,
        sinks: &[Box<dyn Sink>],
        fallbacks: &[Box<dyn Sink>],
    ) -> Result<Option<usize>> {
        self.finish_with_fallback_at(sinks, fallbacks, Utc::now()).await
    }

    pub async fn finish_with_fallback_at(
        &mut self,
        sinks: &[Box<dyn Sink>],
        fallbacks: &[Box<dyn Sink>],
        now: DateTime<Utc>,
    ) -> Result<Option<usize>> {
        let mut last = match self.finish_at(sinks, now).await {
            Ok(done) => return Ok(done),
            Err(e) => e,
        };
        for fallback in fallbacks {
            warn!("Export failed ({:#}), falling back to {}", last, fallback.name());
            match self.finish_at(std::slice::from_ref(fallback), now).await {
                Ok(done) => return Ok(done),
                Err(e) => last = e,
            }
        }
        Err(last)
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        for timer in &self.timers {
            timer.cancel();
        }
        self.ticker.control.remove();
    }
}

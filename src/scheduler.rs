use std::time::Duration;

use futures_util::future::BoxFuture;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub const DEFAULT_CAPTURE_INTERVAL: Duration = Duration::from_millis(600);
pub const DEFAULT_SCROLL_INTERVAL: Duration = Duration::from_millis(900);
/// Shortest period a timer runs at; `tokio::time::interval` rejects zero.
pub const MIN_PERIOD: Duration = Duration::from_millis(1);

/// One tick of periodic work. Called again for every tick, so it hands back
/// a fresh future each time.
pub type Task = Box<dyn FnMut() -> BoxFuture<'static, ()> + Send>;

/// Starts periodic tasks. Injected so tests can drive ticks by hand.
pub trait Scheduler: Send + Sync {
    fn start(&self, name: &str, period: Duration, task: Task) -> TimerHandle;
}

/// Owner of a running periodic task. Dropping the handle cancels the task.
pub struct TimerHandle {
    name: String,
    token: CancellationToken,
    join: Option<JoinHandle<()>>,
}

impl TimerHandle {
    pub fn new(name: &str, token: CancellationToken, join: Option<JoinHandle<()>>) -> Self {
        Self {
            name: name.to_string(),
            token,
            join,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Cancel and wait for an in-flight tick to finish.
    pub async fn stop(mut self) {
        self.token.cancel();
        if let Some(join) = self.join.take() {
            if let Err(e) = join.await {
                debug!("Timer {} ended abnormally: {}", self.name, e);
            }
        }
    }
}

impl Drop for TimerHandle {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

/// Real timers on the tokio runtime.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioScheduler;

impl Scheduler for TokioScheduler {
    fn start(&self, name: &str, period: Duration, mut task: Task) -> TimerHandle {
        let token = CancellationToken::new();
        let cancelled = token.clone();
        let label = name.to_string();
        if period < MIN_PERIOD {
            warn!("Timer {} period {:?} too short, using {:?}", name, period, MIN_PERIOD);
        }
        let period = period.max(MIN_PERIOD);

        let join = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // interval fires immediately; the caller already ran the first pass
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => task().await,
                    _ = cancelled.cancelled() => {
                        debug!("Timer {} stopped", label);
                        break;
                    }
                }
            }
        });

        TimerHandle::new(name, token, Some(join))
    }
}

#[cfg(test)]
pub(crate) mod manual {
    use std::sync::Mutex;

    use super::*;

    /// Scheduler whose ticks only happen when a test calls `fire`.
    #[derive(Default)]
    pub struct ManualScheduler {
        tasks: Mutex<Vec<(String, CancellationToken, Task)>>,
    }

    impl ManualScheduler {
        pub fn new() -> Self {
            Self::default()
        }

        /// Run one tick of every live task with this name. Returns how many ran.
        pub async fn fire(&self, name: &str) -> usize {
            let futures: Vec<BoxFuture<'static, ()>> = {
                let mut tasks = self.tasks.lock().unwrap();
                tasks
                    .iter_mut()
                    .filter(|(n, token, _)| n == name && !token.is_cancelled())
                    .map(|(_, _, task)| task())
                    .collect()
            };
            let ran = futures.len();
            for f in futures {
                f.await;
            }
            ran
        }

        pub fn live(&self) -> usize {
            let tasks = self.tasks.lock().unwrap();
            tasks.iter().filter(|(_, t, _)| !t.is_cancelled()).count()
        }
    }

    impl Scheduler for ManualScheduler {
        fn start(&self, name: &str, _period: Duration, task: Task) -> TimerHandle {
            let token = CancellationToken::new();
            self.tasks
                .lock()
                .unwrap()
                .push((name.to_string(), token.clone(), task));
            TimerHandle::new(name, token, None)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use futures_util::FutureExt;

    use super::manual::ManualScheduler;
    use super::*;

    fn counting(counter: &Arc<AtomicUsize>) -> Task {
        let counter = counter.clone();
        Box::new(move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
            .boxed()
        })
    }

    #[tokio::test]
    async fn manual_ticks_until_cancelled() {
        let sched = ManualScheduler::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let handle = sched.start("capture", Duration::from_millis(600), counting(&hits));

        assert_eq!(sched.fire("capture").await, 1);
        assert_eq!(sched.fire("scroll").await, 0);
        handle.cancel();
        assert_eq!(sched.fire("capture").await, 0);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn dropping_handle_cancels() {
        let sched = ManualScheduler::new();
        let hits = Arc::new(AtomicUsize::new(0));
        drop(sched.start("capture", Duration::from_millis(600), counting(&hits)));
        assert_eq!(sched.live(), 0);
        assert_eq!(sched.fire("capture").await, 0);
    }

    #[tokio::test]
    async fn tokio_timer_ticks_and_stops() {
        let hits = Arc::new(AtomicUsize::new(0));
        let handle = TokioScheduler.start("scroll", Duration::from_millis(20), counting(&hits));

        tokio::time::sleep(Duration::from_millis(110)).await;
        handle.stop().await;
        let seen = hits.load(Ordering::SeqCst);
        assert!(seen >= 1);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(hits.load(Ordering::SeqCst), seen);
    }

    #[tokio::test]
    async fn zero_period_runs_at_minimum() {
        let hits = Arc::new(AtomicUsize::new(0));
        let handle = TokioScheduler.start("capture", Duration::ZERO, counting(&hits));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!handle.is_cancelled());
        handle.stop().await;
        assert!(hits.load(Ordering::SeqCst) >= 1);
    }
}

//! Cancellable background tasks and stale-response guards

use async_trait::async_trait;
use std::future::Future;
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, warn};

/// Owner of one spawned task. Dropping the handle stops the task at its
/// next await point; `cancel` does the same and waits for it to finish.
pub struct TaskHandle {
    name: &'static str,
    shutdown_tx: mpsc::Sender<()>,
    join: JoinHandle<()>,
}

impl TaskHandle {
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    pub async fn cancel(self) {
        let _ = self.shutdown_tx.send(()).await;
        if let Err(e) = self.join.await {
            if e.is_panic() {
                warn!(task = self.name, "Task panicked before shutdown");
            }
        }
        debug!(task = self.name, "Task cancelled");
    }
}

/// Run `tick` every `period`, starting immediately. A tick still in
/// progress when the task is cancelled is dropped, discarding its result.
pub fn spawn_periodic<F, Fut>(name: &'static str, period: Duration, mut tick: F) -> TaskHandle
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);

    let join = tokio::spawn(async move {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    tokio::select! {
                        _ = tick() => {}
                        _ = shutdown_rx.recv() => break,
                    }
                }
                _ = shutdown_rx.recv() => break,
            }
        }
        debug!(task = name, "Periodic task stopped");
    });

    TaskHandle {
        name,
        shutdown_tx,
        join,
    }
}

/// A task that owns its state and advances one step at a time
#[async_trait]
pub trait Worker: Send + 'static {
    fn name(&self) -> &'static str;

    /// One unit of work; the worker paces itself (by awaiting a channel or
    /// a timer). Dropped mid-step if the task is cancelled.
    async fn step(&mut self) -> ControlFlow<()>;
}

/// Run `worker` until it breaks or the task is cancelled
pub fn spawn_worker<W: Worker>(mut worker: W) -> TaskHandle {
    let name = worker.name();
    let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);

    let join = tokio::spawn(async move {
        loop {
            tokio::select! {
                flow = worker.step() => {
                    if flow.is_break() {
                        break;
                    }
                }
                _ = shutdown_rx.recv() => break,
            }
        }
        debug!(task = name, "Worker stopped");
    });

    TaskHandle {
        name,
        shutdown_tx,
        join,
    }
}

/// Subscription generation counter.
///
/// Take a ticket before an async read; commit the result only if the ticket
/// is still current. Bumping invalidates every outstanding ticket.
#[derive(Debug, Clone, Default)]
pub struct Generation(Arc<AtomicU64>);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ticket(u64);

impl Generation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ticket(&self) -> Ticket {
        Ticket(self.0.load(Ordering::Acquire))
    }

    pub fn is_current(&self, ticket: Ticket) -> bool {
        self.0.load(Ordering::Acquire) == ticket.0
    }

    pub fn bump(&self) {
        self.0.fetch_add(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[tokio::test(start_paused = true)]
    async fn test_periodic_task_ticks_until_cancelled() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = ticks.clone();
        let handle = spawn_periodic("ticker", Duration::from_secs(1), move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        tokio::time::sleep(Duration::from_millis(3500)).await;
        handle.cancel().await;
        let seen = ticks.load(Ordering::SeqCst);
        assert_eq!(seen, 4); // t = 0, 1, 2, 3

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), seen);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_handle_stops_task() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = ticks.clone();
        let handle = spawn_periodic("dropped", Duration::from_secs(1), move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });
        tokio::time::sleep(Duration::from_millis(1500)).await;
        drop(handle);
        tokio::time::sleep(Duration::from_millis(10)).await;
        let seen = ticks.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), seen);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_discards_in_flight_tick() {
        let completed = Arc::new(AtomicUsize::new(0));
        let counter = completed.clone();
        let handle = spawn_periodic("slow", Duration::from_secs(1), move || {
            let counter = counter.clone();
            async move {
                tokio::time::sleep(Duration::from_secs(30)).await;
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });
        tokio::time::sleep(Duration::from_secs(2)).await;
        handle.cancel().await;
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(completed.load(Ordering::SeqCst), 0);
    }

    struct Countdown {
        remaining: usize,
        steps: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Worker for Countdown {
        fn name(&self) -> &'static str {
            "countdown"
        }

        async fn step(&mut self) -> ControlFlow<()> {
            self.steps.fetch_add(1, Ordering::SeqCst);
            if self.remaining == 0 {
                return ControlFlow::Break(());
            }
            self.remaining -= 1;
            tokio::task::yield_now().await;
            ControlFlow::Continue(())
        }
    }

    #[tokio::test]
    async fn test_worker_stops_on_break() {
        let steps = Arc::new(AtomicUsize::new(0));
        let handle = spawn_worker(Countdown {
            remaining: 2,
            steps: steps.clone(),
        });
        assert_eq!(handle.name(), "countdown");
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(handle.is_finished());
        assert_eq!(steps.load(Ordering::SeqCst), 3);
        handle.cancel().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_worker_cancelled_while_waiting() {
        struct Idle;

        #[async_trait]
        impl Worker for Idle {
            fn name(&self) -> &'static str {
                "idle"
            }

            async fn step(&mut self) -> ControlFlow<()> {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                ControlFlow::Continue(())
            }
        }

        let handle = spawn_worker(Idle);
        handle.cancel().await;
    }

    #[test]
    fn test_generation_invalidates_tickets() {
        let generation = Generation::new();
        let ticket = generation.ticket();
        assert!(generation.is_current(ticket));
        generation.bump();
        assert!(!generation.is_current(ticket));
        assert!(generation.is_current(generation.ticket()));
    }
}

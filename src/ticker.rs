//! Periodic elapsed-time broadcast
//!
//! Punches publish immediately; the ticker keeps observers' session clocks
//! moving between punches.

use crate::coordinator::SessionCoordinator;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, warn};

/// Running ticker task
pub struct TickerHandle {
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl TickerHandle {
    /// Stop ticking and wait for the task to exit
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(());
        if let Err(e) = self.task.await {
            warn!(error = %e, "Ticker task ended abnormally");
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// Spawn a ticker on the current runtime using the coordinator's configured period
pub fn spawn_ticker(coordinator: Arc<SessionCoordinator>) -> TickerHandle {
    let period = Duration::from_millis(coordinator.config().tick_interval_ms);
    spawn_ticker_every(coordinator, period)
}

/// Spawn a ticker with an explicit period
pub fn spawn_ticker_every(coordinator: Arc<SessionCoordinator>, period: Duration) -> TickerHandle {
    let (shutdown, mut stop) = oneshot::channel::<()>();

    let task = tokio::spawn(async move {
        let mut interval = time::interval_at(time::Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        debug!(period_ms = period.as_millis() as u64, "ticker started");

        loop {
            tokio::select! {
                _ = interval.tick() => coordinator.tick(),
                _ = &mut stop => break,
            }
        }

        debug!("ticker stopped");
    });

    TickerHandle { shutdown, task }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    #[tokio::test(start_paused = true)]
    async fn test_ticks_while_session_runs() {
        let coordinator = Arc::new(
            SessionCoordinator::default().with_clock(Arc::new(ManualClock::default())),
        );
        let mut observer = coordinator.subscribe().unwrap();
        coordinator.start();
        observer.drain();

        let ticker = spawn_ticker_every(Arc::clone(&coordinator), Duration::from_millis(1000));
        time::sleep(Duration::from_millis(3500)).await;
        assert_eq!(observer.drain().len(), 3);

        ticker.shutdown().await;
        time::sleep(Duration::from_millis(3000)).await;
        assert!(observer.try_recv().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_session_stays_quiet() {
        let coordinator = Arc::new(SessionCoordinator::default());
        let mut observer = coordinator.subscribe().unwrap();
        observer.drain();

        let ticker = spawn_ticker(Arc::clone(&coordinator));
        time::sleep(Duration::from_millis(5500)).await;
        assert!(observer.try_recv().is_none());

        ticker.shutdown().await;
    }
}

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::debug;

use crate::engine::Engine;

/// Default period between reconciliation passes.
pub const VERIFY_INTERVAL: Duration = Duration::from_secs(5);

const DRIFT_BACKLOG: usize = 16;

/// Background task that runs `Engine::verify_forwards` on a fixed period.
/// The task stops when the handle is dropped.
pub struct Reconciler {
    handle: JoinHandle<()>,
    drift: mpsc::Receiver<Vec<String>>,
}

impl Reconciler {
    pub fn spawn(engine: Arc<Engine>, period: Duration) -> Self {
        let (tx, rx) = mpsc::channel(DRIFT_BACKLOG);
        let handle = tokio::spawn(async move {
            let mut ticks = tokio::time::interval_at(Instant::now() + period, period);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticks.tick().await;
                let flipped = engine.verify_forwards().await;
                debug!(changed = flipped.len(), "reconciliation pass");
                if !flipped.is_empty() {
                    // Full or closed: the status table still has it.
                    let _ = tx.try_send(flipped);
                }
            }
        });
        Self { handle, drift: rx }
    }

    /// Names flipped to stopped by the next pass that found any.
    pub async fn next_drift(&mut self) -> Option<Vec<String>> {
        self.drift.recv().await
    }
}

impl Drop for Reconciler {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::STOPPED_UNEXPECTEDLY;
    use crate::testing::{Call, FakeGateway};

    fn verify_calls(gw: &FakeGateway) -> usize {
        gw.take_calls()
            .into_iter()
            .filter(|c| *c == Call::Verify)
            .count()
    }

    fn loading_name(engine: &Engine) -> Option<String> {
        engine.snapshot().loading.map(|l| l.name)
    }

    #[tokio::test(start_paused = true)]
    async fn first_pass_waits_one_period() {
        let gw = Arc::new(FakeGateway::with_configs(&["a"]));
        let engine = Arc::new(Engine::new(gw.clone()));
        let _reconciler = Reconciler::spawn(engine, VERIFY_INTERVAL);

        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_eq!(verify_calls(&gw), 0);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(verify_calls(&gw), 1);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(verify_calls(&gw), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn boot_then_detects_drift() {
        let gw = Arc::new(FakeGateway::with_configs(&["db", "api"]));
        gw.set_running(&["db", "api"]);
        let engine = Arc::new(Engine::new(gw.clone()));
        let _reconciler = engine.boot(VERIFY_INTERVAL).await;
        assert!(engine.status("db").unwrap().running);

        gw.report_stopped(&["db"]);
        tokio::time::sleep(Duration::from_secs(6)).await;

        let db = engine.status("db").unwrap();
        assert!(!db.running);
        assert_eq!(db.error.as_deref(), Some(STOPPED_UNEXPECTEDLY));
        assert!(engine.status("api").unwrap().running);
    }

    #[tokio::test(start_paused = true)]
    async fn reports_flipped_names_to_the_listener() {
        let gw = Arc::new(FakeGateway::with_configs(&["db", "api"]));
        gw.set_running(&["db", "api"]);
        let engine = Arc::new(Engine::new(gw.clone()));
        let mut reconciler = engine.boot(VERIFY_INTERVAL).await;

        gw.report_stopped(&["api"]);
        let drift = reconciler.next_drift().await;
        assert_eq!(drift, Some(vec!["api".to_string()]));
        assert!(engine.status("db").unwrap().running);
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_stops_the_loop() {
        let gw = Arc::new(FakeGateway::with_configs(&["a"]));
        let engine = Arc::new(Engine::new(gw.clone()));
        let reconciler = Reconciler::spawn(engine, VERIFY_INTERVAL);
        assert!(!reconciler.handle.is_finished());
        drop(reconciler);

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(verify_calls(&gw), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn keeps_running_while_start_is_in_flight() {
        let gw = Arc::new(FakeGateway::with_configs(&["a"]));
        let engine = Arc::new(Engine::new(gw.clone()));
        engine.startup().await;
        gw.take_calls();

        let gate = gw.hold("start");
        let _reconciler = Reconciler::spawn(engine.clone(), VERIFY_INTERVAL);
        let task = tokio::spawn({
            let engine = engine.clone();
            async move { engine.start("a").await }
        });
        gate.wait_entered().await;

        tokio::time::sleep(Duration::from_secs(11)).await;
        assert_eq!(loading_name(&engine).as_deref(), Some("a"));
        let calls = gw.take_calls();
        assert_eq!(calls.iter().filter(|c| **c == Call::Verify).count(), 2);

        gate.release();
        task.await.unwrap();
        assert_eq!(loading_name(&engine), None);
    }
}

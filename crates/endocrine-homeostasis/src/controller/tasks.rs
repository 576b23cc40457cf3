//! Background decay and monitor loops

use std::sync::atomic::Ordering;
use std::sync::Arc;

use endocrine_common::now_millis;
use tokio::task::JoinHandle;
use tokio::time::{self, Duration, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::homeostasis::HomeostasisController;

/// Handle to the running background tasks
pub struct ControllerHandle {
    controller: Arc<HomeostasisController>,
    tasks: Vec<JoinHandle<()>>,
}

impl ControllerHandle {
    /// Ask both loops to stop at their next wake-up
    pub fn stop(&self) {
        self.controller.stop();
    }

    /// Wait for both loops to finish
    pub async fn join(self) {
        for task in self.tasks {
            if let Err(e) = task.await {
                error!(error = %e, "Controller task ended abnormally");
            }
        }
    }

    /// Stop and wait
    pub async fn shutdown(self) {
        self.stop();
        self.join().await;
    }

    pub fn is_finished(&self) -> bool {
        self.tasks.iter().all(|t| t.is_finished())
    }
}

impl HomeostasisController {
    /// Spawn the decay and monitor loops on the current tokio runtime.
    ///
    /// Returns `None` if they are already running.
    pub fn start(self: &Arc<Self>) -> Option<ControllerHandle> {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("Controller tasks already running");
            return None;
        }

        let decay_ms = self.config().decay_interval_ms;
        let monitor_ms = self.config().monitor_interval_ms;

        let decay = self.spawn_loop("decay", decay_ms, |controller, now| {
            let purged = controller.decay_tick(now);
            if purged > 0 {
                debug!(purged, "Purged expired signals");
            }
        });
        let monitor = self.spawn_loop("monitor", monitor_ms, |controller, now| {
            let report = controller.monitor_tick(now);
            if let Some(reason) = report.triggered {
                warn!(%reason, "Monitor asserted emergency");
            }
            if report.recovered {
                info!("Monitor cleared emergency");
            }
        });

        info!(decay_ms, monitor_ms, "Controller tasks started");
        Some(ControllerHandle {
            controller: Arc::clone(self),
            tasks: vec![decay, monitor],
        })
    }

    /// Signal the background loops to exit
    pub fn stop(&self) {
        if self.running.swap(false, Ordering::SeqCst) {
            info!("Stopping controller tasks");
        }
        self.shutdown.notify_waiters();
    }

    fn spawn_loop<F>(self: &Arc<Self>, name: &'static str, period_ms: u64, tick: F) -> JoinHandle<()>
    where
        F: Fn(&HomeostasisController, i64) + Send + 'static,
    {
        let controller = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = time::interval(Duration::from_millis(period_ms.max(1)));
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately
            interval.tick().await;

            loop {
                tokio::select! {
                    _ = interval.tick() => {}
                    _ = controller.shutdown.notified() => {}
                }
                if !controller.is_running() {
                    break;
                }
                tick(controller.as_ref(), now_millis());
            }
            debug!(task = name, "Controller task exited");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ControllerConfig;
    use endocrine_bus::SignalBus;
    use endocrine_common::{RawSignal, SignalType};

    fn fast_config() -> ControllerConfig {
        ControllerConfig {
            decay_interval_ms: 10,
            monitor_interval_ms: 20,
            ..ControllerConfig::default()
        }
    }

    #[tokio::test]
    async fn test_start_and_shutdown() {
        let controller = Arc::new(HomeostasisController::new(
            Arc::new(SignalBus::new()),
            fast_config(),
        ));

        let handle = controller.start().unwrap();
        assert!(controller.is_running());
        assert!(controller.start().is_none());

        handle.shutdown().await;
        assert!(!controller.is_running());
    }

    #[tokio::test]
    async fn test_decay_loop_lowers_levels() {
        let controller = Arc::new(HomeostasisController::new(
            Arc::new(SignalBus::new()),
            fast_config(),
        ));
        controller.regulate(vec![RawSignal::new(SignalType::Reward, 1.0, "test")]);
        let before = controller.hormone_level(SignalType::Reward);

        let handle = controller.start().unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        handle.shutdown().await;

        assert!(controller.hormone_level(SignalType::Reward) < before);
    }

    #[tokio::test]
    async fn test_restart_after_stop() {
        let controller = Arc::new(HomeostasisController::new(
            Arc::new(SignalBus::new()),
            fast_config(),
        ));
        controller.start().unwrap().shutdown().await;
        let handle = controller.start().unwrap();
        assert!(controller.status().running);
        handle.shutdown().await;
    }
}

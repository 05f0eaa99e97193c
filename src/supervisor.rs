//! The supervisor.
//!
//! A liveness watchdog: every `SUPERVISOR_INTERVAL` it checks whether the
//! scheduler's task is still running and respawns it if not. This is the
//! only component in the core allowed to restart another component's task.

use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::config::SUPERVISOR_INTERVAL;
use crate::rate_controller::RateController;
use crate::registry::WatchRegistry;
use crate::scheduler::PollScheduler;

pub struct Supervisor {
    scheduler: Arc<PollScheduler>,
    rate_controller: Arc<RateController>,
    registry: Arc<WatchRegistry>,
}

impl Supervisor {
    pub fn new(
        scheduler: Arc<PollScheduler>,
        rate_controller: Arc<RateController>,
        registry: Arc<WatchRegistry>,
    ) -> Self {
        Self {
            scheduler,
            rate_controller,
            registry,
        }
    }

    /// Spawns the scheduler and watches it forever, respawning on death and
    /// logging a stats snapshot every `SUPERVISOR_INTERVAL`.
    pub async fn run(&self) -> ! {
        let mut handle = self.spawn_scheduler();

        loop {
            tokio::time::sleep(SUPERVISOR_INTERVAL).await;

            if handle.is_finished() {
                tracing::warn!("poll scheduler task is dead; respawning");
                handle = self.spawn_scheduler();
            }

            self.log_snapshot(&handle).await;
        }
    }

    fn spawn_scheduler(&self) -> JoinHandle<()> {
        let scheduler = self.scheduler.clone();
        tokio::spawn(async move {
            scheduler.run().await;
        })
    }

    async fn log_snapshot(&self, handle: &JoinHandle<()>) {
        let stats = self.rate_controller.stats().await;
        let watch_count = match self.registry.all_active().await {
            Ok(watches) => watches.len(),
            Err(err) => {
                tracing::warn!(error = %err, "supervisor failed to read watch count");
                0
            }
        };

        tracing::info!(
            scheduler_alive = !handle.is_finished(),
            mode = ?stats.mode,
            current_delay_ms = stats.current_delay.as_millis() as u64,
            success_count = stats.success_count,
            fail_count = stats.fail_count,
            recent_request_rate = stats.recent_request_rate,
            watch_count,
            "supervisor snapshot"
        );
    }
}

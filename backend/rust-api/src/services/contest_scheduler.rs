use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use super::contest_service::ContestService;
use super::AppState;
use crate::metrics::CONTEST_SCHEDULER_TICKS_TOTAL;

/// Periodically moves scheduled contests from upcoming to ongoing to ended
/// and announces each change to the contest room.
pub struct ContestScheduler {
    contests: ContestService,
    interval: Duration,
}

impl ContestScheduler {
    pub fn new(contests: ContestService, interval: Duration) -> Self {
        Self { contests, interval }
    }

    pub fn from_state(state: &AppState) -> Self {
        Self::new(
            ContestService::from_state(state),
            Duration::from_secs(state.config.contest_schedule_interval_secs),
        )
    }

    pub async fn run(&self) {
        info!(
            "Starting contest scheduler (interval {}s)",
            self.interval.as_secs()
        );

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            match self.run_once().await {
                Ok(moved) => {
                    CONTEST_SCHEDULER_TICKS_TOTAL
                        .with_label_values(&["success"])
                        .inc();
                    if moved > 0 {
                        info!(moved, "Contest scheduler tick completed");
                    }
                }
                Err(err) => {
                    CONTEST_SCHEDULER_TICKS_TOTAL
                        .with_label_values(&["error"])
                        .inc();
                    warn!(error = %err, "Contest scheduler tick failed");
                }
            }
        }
    }

    pub async fn run_once(&self) -> Result<usize> {
        let moved = self.contests.advance_scheduled(Utc::now()).await?;
        for (contest_id, phase) in &moved {
            info!(contest_id = %contest_id, status = phase.as_str(), "Contest phase changed");
        }
        Ok(moved.len())
    }
}

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

use crate::engine::CampaignEngine;

/// Drives [`CampaignEngine::tick`] on a fixed interval until shutdown.
pub struct Scheduler {
    engine: Arc<CampaignEngine>,
    interval: Duration,
}

impl Scheduler {
    pub fn new(engine: Arc<CampaignEngine>, interval: Duration) -> Self {
        Self { engine, interval }
    }

    /// Returns once `shutdown` turns `true` or its sender is dropped. A
    /// failing tick is logged and the loop carries on.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(
            interval_ms = self.interval.as_millis() as u64,
            owner = %self.engine.settings().owner,
            "Campaign scheduler started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.engine.tick(Utc::now()).await {
                        Ok(report) if report.did_work() => {
                            info!(
                                promoted = report.promoted,
                                claimed = report.claimed,
                                sent = report.sent,
                                failed = report.failed,
                                retried = report.retried,
                                deferred = report.deferred,
                                completed_members = report.completed_members,
                                opted_out = report.opted_out,
                                campaigns_completed = report.campaigns_completed,
                                errors = report.errors,
                                "Scheduler tick"
                            );
                        }
                        Ok(_) => debug!("Scheduler tick, nothing due"),
                        Err(e) => {
                            metrics::counter!("scheduler.tick.errors").increment(1);
                            error!(error = %e, "Scheduler tick failed");
                        }
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Campaign scheduler stopping");
                        break;
                    }
                }
            }
        }
    }
}

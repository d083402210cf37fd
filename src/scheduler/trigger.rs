//! Timer loop driving one scheduler
//!
//! Each scheduler gets its own task. A tick runs to completion before the
//! next fire time is computed, so ticks of one scheduler never overlap, and
//! fire times missed while a tick was running are skipped.

use chrono::Utc;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, trace};

use super::engine::{FetchOutcome, Scheduler};
use crate::site::ScheduleSpec;

/// Run `scheduler` on its site's cadence until `shutdown` flips to `true`
pub async fn run_trigger(scheduler: Arc<Scheduler>, mut shutdown: watch::Receiver<bool>) {
    let site = scheduler.name().to_string();
    info!(site = %site, schedule = %scheduler.site().schedule, "Trigger started");

    match scheduler.site().schedule.clone() {
        ScheduleSpec::Interval(period) => {
            let start = tokio::time::Instant::now() + period;
            let mut ticker = tokio::time::interval_at(start, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = ticker.tick() => tick(&scheduler).await,
                    _ = wait_for_stop(&mut shutdown) => break,
                }
            }
        }
        schedule => loop {
            let now = Utc::now();
            let Some(next) = schedule.next_fire_after(now) else {
                debug!(site = %site, "Schedule exhausted");
                break;
            };
            let sleep_for = (next - now).to_std().unwrap_or_default();

            tokio::select! {
                _ = tokio::time::sleep(sleep_for) => tick(&scheduler).await,
                _ = wait_for_stop(&mut shutdown) => break,
            }
        },
    }

    info!(site = %site, "Trigger stopped");
}

async fn tick(scheduler: &Scheduler) {
    match scheduler.exec_fetch().await {
        Ok(FetchOutcome::Idle) => trace!(site = %scheduler.name(), "Nothing to fetch"),
        Ok(FetchOutcome::Skipped { .. }) => {}
        Ok(FetchOutcome::Fetched {
            platform_name,
            target,
            sent,
        }) => {
            trace!(
                site = %scheduler.name(),
                platform = %platform_name,
                target = %target,
                sent = sent,
                "Tick finished"
            );
        }
        Err(e) => scheduler.report_error(&e),
    }
}

async fn wait_for_stop(shutdown: &mut watch::Receiver<bool>) {
    while !*shutdown.borrow_and_update() {
        if shutdown.changed().await.is_err() {
            // sender dropped
            return;
        }
    }
}

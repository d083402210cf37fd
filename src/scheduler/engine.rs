//! Per-site scheduler
//!
//! One [`Scheduler`] owns the schedulables of one site. Each tick it picks a
//! single (platform, target) pair through the weighted round-robin, runs that
//! platform's fetch inside a fresh [`ProcessContext`] and hands the resulting
//! posts to the [`Dispatcher`].

use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::{debug, info, trace, warn};

use super::error::{SchedulerError, SchedulerResult};
use super::weighted::{Schedulable, WeightedRoundRobin};
use crate::delivery::Dispatcher;
use crate::error::Error;
use crate::metrics;
use crate::models::{SubUnit, Target};
use crate::platform::{Dispatch, PlatformRegistry};
use crate::site::{ClientManager, ProcessContext, Site};
use crate::storage::SubscriptionStore;

/// Collaborators shared by every scheduler
#[derive(Clone)]
pub struct SchedulerDeps {
    pub registry: Arc<PlatformRegistry>,
    pub store: Arc<dyn SubscriptionStore>,
    pub dispatcher: Dispatcher,
}

/// What one tick did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// No schedulables
    Idle,
    /// The request was skipped, e.g. every credential is cooling down
    Skipped { platform_name: String, target: Target },
    /// The fetch ran and `sent` posts were enqueued
    Fetched {
        platform_name: String,
        target: Target,
        sent: u64,
    },
}

pub struct Scheduler {
    site: Site,
    platforms: Vec<String>,
    client_mgr: Arc<dyn ClientManager>,
    deps: SchedulerDeps,
    state: Mutex<WeightedRoundRobin>,
    show_network_warning: bool,
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("site", &self.site.name)
            .field("platforms", &self.platforms)
            .finish()
    }
}

impl Scheduler {
    pub fn new(
        site: Site,
        platforms: Vec<String>,
        schedulables: Vec<Schedulable>,
        client_mgr: Arc<dyn ClientManager>,
        deps: SchedulerDeps,
    ) -> Self {
        info!(
            site = %site.name,
            schedule = %site.schedule,
            targets = schedulables.len(),
            "Scheduler created"
        );
        Self {
            site,
            platforms,
            client_mgr,
            deps,
            state: Mutex::new(WeightedRoundRobin::with_schedulables(schedulables)),
            show_network_warning: true,
        }
    }

    pub fn with_network_warning(mut self, show: bool) -> Self {
        self.show_network_warning = show;
        self
    }

    pub fn site(&self) -> &Site {
        &self.site
    }

    pub fn name(&self) -> &str {
        &self.site.name
    }

    pub fn platforms(&self) -> &[String] {
        &self.platforms
    }

    pub fn client_manager(&self) -> &Arc<dyn ClientManager> {
        &self.client_mgr
    }

    /// Snapshot of the schedulables and their credit
    pub async fn schedulables(&self) -> Vec<Schedulable> {
        self.state.lock().await.schedulables().to_vec()
    }

    /// Run one weighted round-robin tick
    ///
    /// Weights are read before the selection state is locked, so no lock is
    /// held across the store call.
    pub async fn get_next_schedulable(&self) -> SchedulerResult<Option<Schedulable>> {
        let weights = self
            .deps
            .store
            .get_current_weight_val(&self.platforms)
            .await
            .map_err(|e| SchedulerError::WeightLookup {
                reason: e.to_string(),
            })?;

        let mut state = self.state.lock().await;
        Ok(state.select(&weights))
    }

    /// Body of one timer tick
    ///
    /// Any failure leaves the selection state untouched; the error carries
    /// the request trace of the cycle.
    pub async fn exec_fetch(&self) -> SchedulerResult<FetchOutcome> {
        let Some(schedulable) = self.get_next_schedulable().await? else {
            return Ok(FetchOutcome::Idle);
        };
        trace!(
            site = %self.site.name,
            platform = %schedulable.platform_name,
            target = %schedulable.target,
            "Fetching next target"
        );

        let ctx = ProcessContext::new(Arc::clone(&self.client_mgr));
        let started = Instant::now();
        let result = self.fetch(&ctx, &schedulable).await;
        let records = ctx.gen_req_records();
        ctx.cleanup();

        let elapsed = started.elapsed().as_secs_f64();
        metrics::record_request(
            &schedulable.platform_name,
            &self.site.name,
            result.is_ok(),
            elapsed,
        );

        let Schedulable {
            platform_name,
            target,
            ..
        } = schedulable;

        match result {
            Ok(dispatch) => {
                let sent = if dispatch.iter().any(|(_, posts)| !posts.is_empty()) {
                    self.deps
                        .dispatcher
                        .dispatch(&platform_name, &self.site.name, dispatch)
                        .await
                } else {
                    0
                };
                Ok(FetchOutcome::Fetched {
                    platform_name,
                    target,
                    sent,
                })
            }
            Err(e) if e.is_skip() => {
                debug!(platform = %platform_name, target = %target, reason = %e, "Request skipped");
                Ok(FetchOutcome::Skipped {
                    platform_name,
                    target,
                })
            }
            Err(e) => {
                for record in &records {
                    warn!("API request record: {record}");
                }
                Err(SchedulerError::fetch_failed(
                    platform_name,
                    target,
                    e,
                    records,
                ))
            }
        }
    }

    async fn fetch(&self, ctx: &ProcessContext, schedulable: &Schedulable) -> Result<Dispatch, Error> {
        let platform = self
            .deps
            .registry
            .get(&schedulable.platform_name)
            .ok_or_else(|| SchedulerError::unknown_platform(&schedulable.platform_name))?;

        let client_target = platform.meta().has_target.then_some(&schedulable.target);
        let client = ctx.get_client(client_target).await?;

        if schedulable.use_batch {
            let batch_targets = self
                .state
                .lock()
                .await
                .batch_group(&schedulable.platform_name);
            let mut sub_units = Vec::with_capacity(batch_targets.len());
            for target in batch_targets {
                let subscribers = self
                    .deps
                    .store
                    .get_platform_target_subscribers(&schedulable.platform_name, &target)
                    .await?;
                sub_units.push(SubUnit::new(target, subscribers));
            }
            Ok(platform.batch_fetch_new_post(ctx, &client, &sub_units).await?)
        } else {
            let subscribers = self
                .deps
                .store
                .get_platform_target_subscribers(&schedulable.platform_name, &schedulable.target)
                .await?;
            let sub_unit = SubUnit::new(schedulable.target.clone(), subscribers);
            Ok(platform.fetch_new_post(ctx, &client, &sub_unit).await?)
        }
    }

    /// Whether a failed tick is logged at debug instead of warn
    ///
    /// Only transport failures are quieted, and only when network warnings
    /// are turned off.
    pub fn logs_quietly(&self, err: &SchedulerError) -> bool {
        !self.show_network_warning && err.is_network()
    }

    /// Log a failed tick at the level its kind deserves
    pub fn report_error(&self, err: &SchedulerError) {
        if self.logs_quietly(err) {
            debug!(site = %self.site.name, error = %err, "Fetch failed");
        } else {
            warn!(
                site = %self.site.name,
                error = %err,
                records = err.request_records().len(),
                "Fetch failed"
            );
        }
    }

    /// Start polling a target that gained its first subscriber
    pub async fn insert_new_schedulable(&self, platform_name: &str, target: &Target) {
        let use_batch = self
            .deps
            .registry
            .get(platform_name)
            .is_some_and(|p| p.meta().use_batch);
        let inserted = self
            .state
            .lock()
            .await
            .insert(platform_name, target, use_batch);
        if inserted {
            info!(site = %self.site.name, platform = %platform_name, target = %target, "Schedulable inserted");
        }
    }

    /// Stop polling a target that lost its last subscriber
    pub async fn delete_schedulable(&self, platform_name: &str, target: &Target) {
        let removed = self.state.lock().await.remove(platform_name, target);
        match removed {
            Some(_) => {
                info!(site = %self.site.name, platform = %platform_name, target = %target, "Schedulable deleted")
            }
            None => {
                debug!(site = %self.site.name, platform = %platform_name, target = %target, "Schedulable not found")
            }
        }
    }
}

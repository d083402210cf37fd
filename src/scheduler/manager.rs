//! Bootstraps one scheduler per site and routes target lifecycle events

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::{Arc, Weak};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::engine::{Scheduler, SchedulerDeps};
use super::error::SchedulerError;
use super::trigger::run_trigger;
use super::weighted::Schedulable;
use crate::config::SchedulerConfig;
use crate::error::Result;
use crate::models::Target;
use crate::site::HttpSettings;
use crate::storage::{CookieStore, TargetHook};

pub struct SchedulerManager {
    deps: SchedulerDeps,
    schedulers: BTreeMap<String, Arc<Scheduler>>,
    /// platform name to site name, for platforms whose site is running
    platform_sites: BTreeMap<String, String>,
    shutdown: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for SchedulerManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchedulerManager")
            .field("schedulers", &self.schedulers.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Store hook forwarding to the manager without keeping it alive
struct ManagerHook {
    manager: Weak<SchedulerManager>,
}

#[async_trait]
impl TargetHook for ManagerHook {
    async fn on_target_added(&self, platform_name: &str, target: &Target) {
        if let Some(manager) = self.manager.upgrade() {
            manager.on_target_added(platform_name, target).await;
        }
    }

    async fn on_target_removed(&self, platform_name: &str, target: &Target) {
        if let Some(manager) = self.manager.upgrade() {
            manager.on_target_removed(platform_name, target).await;
        }
    }
}

impl SchedulerManager {
    /// Create a scheduler for every site whose requirements are met and
    /// load its targets from the subscription store
    ///
    /// Sites needing a browser are skipped unless `use_browser` is set.
    /// Stored targets of unknown platforms are skipped with a warning.
    pub async fn init(
        deps: SchedulerDeps,
        cookie_store: Arc<dyn CookieStore>,
        http: HttpSettings,
        settings: &SchedulerConfig,
    ) -> Result<Arc<Self>> {
        let registry = Arc::clone(&deps.registry);

        for (platform_name, reason) in registry.unavailable_platforms(settings.use_browser) {
            warn!(platform = %platform_name, reason = %reason, "Platform unavailable");
        }

        for platform_name in deps.store.get_platform_names().await? {
            if registry.get(&platform_name).is_none() {
                warn!(platform = %platform_name, "Skipping targets of unknown platform");
            }
        }

        let mut schedulers = BTreeMap::new();
        let mut platform_sites = BTreeMap::new();

        for site in registry.sites() {
            if site.require_browser && !settings.use_browser {
                warn!(site = %site.name, "Site requires a browser, scheduler not started");
                continue;
            }
            site.schedule.validate()?;

            let client_mgr = site.build_client_manager(http.clone(), Arc::clone(&cookie_store));
            client_mgr.on_init_scheduler().await?;

            let platforms = registry.platforms_of_site(&site.name);
            let mut schedulables = Vec::new();
            for platform_name in &platforms {
                let use_batch = registry
                    .get(platform_name)
                    .is_some_and(|p| p.meta().use_batch);
                for target in deps.store.get_platform_target(platform_name).await? {
                    schedulables.push(Schedulable::new(platform_name.clone(), target, use_batch));
                }
                platform_sites.insert(platform_name.clone(), site.name.clone());
            }

            let scheduler = Scheduler::new(
                site.clone(),
                platforms,
                schedulables,
                client_mgr,
                deps.clone(),
            )
            .with_network_warning(settings.show_network_warning);
            schedulers.insert(site.name.clone(), Arc::new(scheduler));
        }

        let (shutdown, _) = watch::channel(false);
        let manager = Arc::new(Self {
            deps,
            schedulers,
            platform_sites,
            shutdown,
            tasks: Mutex::new(Vec::new()),
        });

        manager
            .deps
            .store
            .register_target_hook(Arc::new(ManagerHook {
                manager: Arc::downgrade(&manager),
            }))
            .await;

        info!(schedulers = manager.schedulers.len(), "Scheduler manager initialized");
        Ok(manager)
    }

    pub fn get_scheduler(&self, site_name: &str) -> Option<&Arc<Scheduler>> {
        self.schedulers.get(site_name)
    }

    pub fn schedulers(&self) -> impl Iterator<Item = &Arc<Scheduler>> {
        self.schedulers.values()
    }

    /// Scheduler polling the given platform
    pub fn scheduler_of(&self, platform_name: &str) -> Result<&Arc<Scheduler>> {
        let site_name = self
            .platform_sites
            .get(platform_name)
            .ok_or_else(|| SchedulerError::unknown_platform(platform_name))?;
        self.schedulers.get(site_name).ok_or_else(|| {
            SchedulerError::SiteNotFound {
                site_name: site_name.clone(),
            }
            .into()
        })
    }

    /// A (platform, target) pair gained its first subscriber
    pub async fn handle_insert_new_target(&self, platform_name: &str, target: &Target) -> Result<()> {
        let scheduler = self.scheduler_of(platform_name)?;
        scheduler.insert_new_schedulable(platform_name, target).await;
        Ok(())
    }

    /// A (platform, target) pair lost its last subscriber
    pub async fn handle_delete_target(&self, platform_name: &str, target: &Target) -> Result<()> {
        let scheduler = self.scheduler_of(platform_name)?;
        scheduler.delete_schedulable(platform_name, target).await;
        Ok(())
    }

    /// Spawn one timer task per scheduler
    pub async fn start(&self) {
        let mut tasks = self.tasks.lock().await;
        if !tasks.is_empty() {
            debug!("Schedulers already started");
            return;
        }
        for scheduler in self.schedulers.values() {
            tasks.push(tokio::spawn(run_trigger(
                Arc::clone(scheduler),
                self.shutdown.subscribe(),
            )));
        }
        info!(tasks = tasks.len(), "Schedulers started");
    }

    /// Stop every timer task and wait for running ticks to finish
    pub async fn shutdown(&self) {
        self.shutdown.send_replace(true);
        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().await.drain(..).collect();
        for task in tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "Scheduler task ended abnormally");
            }
        }
        info!("Schedulers stopped");
    }
}

#[async_trait]
impl TargetHook for SchedulerManager {
    async fn on_target_added(&self, platform_name: &str, target: &Target) {
        if let Err(e) = self.handle_insert_new_target(platform_name, target).await {
            warn!(platform = %platform_name, target = %target, error = %e, "Cannot schedule new target");
        }
    }

    async fn on_target_removed(&self, platform_name: &str, target: &Target) {
        if let Err(e) = self.handle_delete_target(platform_name, target).await {
            warn!(platform = %platform_name, target = %target, error = %e, "Cannot unschedule target");
        }
    }
}

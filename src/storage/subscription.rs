//! Subscription store and target lifecycle hooks

use async_trait::async_trait;
use chrono::{Local, NaiveTime};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::StoreError;
use crate::models::{weight_key, Category, Recipient, Tag, Target, UserSubInfo, WeightConfig};

/// Notified when a (platform, target) pair gains its first or loses its last subscriber
#[async_trait]
pub trait TargetHook: Send + Sync {
    async fn on_target_added(&self, platform_name: &str, target: &Target);
    async fn on_target_removed(&self, platform_name: &str, target: &Target);
}

/// One subscription, as requested by a user or seeded from config
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub recipient: Recipient,
    pub platform: String,
    pub target: Target,
    #[serde(default)]
    pub target_name: String,
    #[serde(default)]
    pub categories: Vec<Category>,
    #[serde(default)]
    pub tags: Vec<Tag>,
}

/// Weight configuration of one target, as written in config
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeightEntry {
    pub platform: String,
    pub target: Target,
    #[serde(flatten)]
    pub weight: WeightConfig,
}

/// Contract the scheduler needs from the subscription database
#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    async fn add_subscribe(&self, sub: Subscription) -> Result<(), StoreError>;

    async fn del_subscribe(
        &self,
        user: &Recipient,
        platform_name: &str,
        target: &Target,
    ) -> Result<(), StoreError>;

    /// Every target of the platform that has at least one subscriber
    async fn get_platform_target(&self, platform_name: &str) -> Result<Vec<Target>, StoreError>;

    /// Names of every platform that has at least one subscribed target
    async fn get_platform_names(&self) -> Result<Vec<String>, StoreError>;

    async fn get_platform_target_subscribers(
        &self,
        platform_name: &str,
        target: &Target,
    ) -> Result<Vec<UserSubInfo>, StoreError>;

    /// Weight-of-the-moment of every target of the given platforms,
    /// keyed by `"{platform_name}-{target}"`
    async fn get_current_weight_val(
        &self,
        platform_names: &[String],
    ) -> Result<HashMap<String, u32>, StoreError>;

    async fn register_target_hook(&self, hook: Arc<dyn TargetHook>);
}

#[derive(Debug, Clone)]
struct TargetEntry {
    target_name: String,
    weight: WeightConfig,
    subscribers: Vec<UserSubInfo>,
}

/// Process-local [`SubscriptionStore`]
#[derive(Default)]
pub struct MemorySubscriptionStore {
    targets: RwLock<BTreeMap<(String, Target), TargetEntry>>,
    hooks: RwLock<Vec<Arc<dyn TargetHook>>>,
}

impl MemorySubscriptionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store from config seed data without firing hooks
    pub async fn from_seed(
        subscriptions: Vec<Subscription>,
        weights: Vec<WeightEntry>,
    ) -> Result<Self, StoreError> {
        let store = Self::new();
        for sub in subscriptions {
            store.add_subscribe(sub).await?;
        }
        for entry in weights {
            store
                .set_weight_config(&entry.platform, &entry.target, entry.weight)
                .await?;
        }
        Ok(store)
    }

    pub async fn set_weight_config(
        &self,
        platform_name: &str,
        target: &Target,
        weight: WeightConfig,
    ) -> Result<(), StoreError> {
        let mut targets = self.targets.write().await;
        let entry = targets
            .get_mut(&(platform_name.to_string(), target.clone()))
            .ok_or_else(|| StoreError::TargetNotFound {
                platform_name: platform_name.to_string(),
                target: target.clone(),
            })?;
        entry.weight = weight;
        Ok(())
    }

    pub async fn get_target_name(&self, platform_name: &str, target: &Target) -> Option<String> {
        let targets = self.targets.read().await;
        targets
            .get(&(platform_name.to_string(), target.clone()))
            .map(|e| e.target_name.clone())
    }

    /// Weights of the given platforms' targets resolved at a fixed time of day
    pub async fn weights_at(
        &self,
        platform_names: &[String],
        time: NaiveTime,
    ) -> HashMap<String, u32> {
        let targets = self.targets.read().await;
        targets
            .iter()
            .filter(|((platform, _), _)| platform_names.contains(platform))
            .map(|((platform, target), entry)| {
                (weight_key(platform, target), entry.weight.weight_at(time))
            })
            .collect()
    }

    async fn hooks(&self) -> Vec<Arc<dyn TargetHook>> {
        self.hooks.read().await.clone()
    }
}

#[async_trait]
impl SubscriptionStore for MemorySubscriptionStore {
    async fn add_subscribe(&self, sub: Subscription) -> Result<(), StoreError> {
        let key = (sub.platform.clone(), sub.target.clone());
        let is_new_target = {
            let mut targets = self.targets.write().await;
            let is_new = !targets.contains_key(&key);
            let entry = targets.entry(key).or_insert_with(|| TargetEntry {
                target_name: sub.target_name.clone(),
                weight: WeightConfig::default(),
                subscribers: Vec::new(),
            });

            if entry.subscribers.iter().any(|s| s.user == sub.recipient) {
                return Err(StoreError::DuplicateSubscription {
                    user: sub.recipient.to_string(),
                    platform_name: sub.platform,
                    target: sub.target,
                });
            }

            entry.subscribers.push(UserSubInfo::new(
                sub.recipient.clone(),
                sub.categories,
                sub.tags,
            ));
            is_new
        };

        debug!(
            recipient = %sub.recipient,
            platform = %sub.platform,
            target = %sub.target,
            "Subscription added"
        );

        if is_new_target {
            info!(platform = %sub.platform, target = %sub.target, "New target tracked");
            let hooks = self.hooks().await;
            join_all(
                hooks
                    .iter()
                    .map(|hook| hook.on_target_added(&sub.platform, &sub.target)),
            )
            .await;
        }
        Ok(())
    }

    async fn del_subscribe(
        &self,
        user: &Recipient,
        platform_name: &str,
        target: &Target,
    ) -> Result<(), StoreError> {
        let key = (platform_name.to_string(), target.clone());
        let target_gone = {
            let mut targets = self.targets.write().await;
            let not_found = || StoreError::SubscriptionNotFound {
                user: user.to_string(),
                platform_name: platform_name.to_string(),
                target: target.clone(),
            };
            let entry = targets.get_mut(&key).ok_or_else(not_found)?;
            let before = entry.subscribers.len();
            entry.subscribers.retain(|s| &s.user != user);
            if entry.subscribers.len() == before {
                return Err(not_found());
            }
            if entry.subscribers.is_empty() {
                targets.remove(&key);
                true
            } else {
                false
            }
        };

        if target_gone {
            info!(platform = %platform_name, target = %target, "Target no longer tracked");
            let hooks = self.hooks().await;
            join_all(
                hooks
                    .iter()
                    .map(|hook| hook.on_target_removed(platform_name, target)),
            )
            .await;
        }
        Ok(())
    }

    async fn get_platform_target(&self, platform_name: &str) -> Result<Vec<Target>, StoreError> {
        let targets = self.targets.read().await;
        Ok(targets
            .keys()
            .filter(|(platform, _)| platform == platform_name)
            .map(|(_, target)| target.clone())
            .collect())
    }

    async fn get_platform_names(&self) -> Result<Vec<String>, StoreError> {
        let targets = self.targets.read().await;
        let mut names: Vec<String> = targets.keys().map(|(platform, _)| platform.clone()).collect();
        names.dedup();
        Ok(names)
    }

    async fn get_platform_target_subscribers(
        &self,
        platform_name: &str,
        target: &Target,
    ) -> Result<Vec<UserSubInfo>, StoreError> {
        let targets = self.targets.read().await;
        Ok(targets
            .get(&(platform_name.to_string(), target.clone()))
            .map(|e| e.subscribers.clone())
            .unwrap_or_default())
    }

    async fn get_current_weight_val(
        &self,
        platform_names: &[String],
    ) -> Result<HashMap<String, u32>, StoreError> {
        Ok(self
            .weights_at(platform_names, Local::now().time())
            .await)
    }

    async fn register_target_hook(&self, hook: Arc<dyn TargetHook>) {
        self.hooks.write().await.push(hook);
    }
}

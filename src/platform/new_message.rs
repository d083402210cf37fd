//! List-diff strategy
//!
//! Each poll returns the target's current item list. Items whose id has not
//! been seen before are new. The first poll of a target only records the
//! ids it sees, so subscribing to an active source does not flood anyone.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::fmt::Debug;
use std::hash::Hash;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{info, warn};

use super::filter::dispatch_user_post;
use super::{
    CategoryCheck, Dispatch, FetchStrategy, ParseTargetError, Platform, PlatformError,
    PlatformFetcher, PlatformMeta, UnitResults,
};
use crate::models::{SubUnit, Target};
use crate::site::{HttpClient, ProcessContext};

/// Items older than this are ignored while a target has no baseline yet
pub const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(2 * 60 * 60);

/// Number of attempts to parse one raw post before giving up
pub const DEFAULT_PARSE_ATTEMPTS: u32 = 3;

/// A platform whose source yields a list of items per poll
#[async_trait]
pub trait NewMessage: Platform {
    type PostId: Eq + Hash + Clone + Debug + Send + Sync;

    fn get_id(&self, raw: &Self::RawPost) -> Self::PostId;

    /// Publication time, `None` when the item carries none
    fn get_date(&self, raw: &Self::RawPost) -> Option<DateTime<Utc>>;

    async fn get_sub_list(
        &self,
        ctx: &ProcessContext,
        client: &HttpClient,
        target: &Target,
    ) -> Result<Vec<Self::RawPost>, PlatformError>;

    /// One item list per target, in the order of `targets`
    async fn batch_get_sub_list(
        &self,
        _ctx: &ProcessContext,
        _client: &HttpClient,
        _targets: &[Target],
    ) -> Result<Vec<Vec<Self::RawPost>>, PlatformError> {
        Err(PlatformError::BatchUnsupported(
            self.meta().platform_name.clone(),
        ))
    }
}

/// Tunables of the list-diff strategy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchOptions {
    /// Record a silent baseline on the first poll of a target
    pub init_filter: bool,
    pub stale_after: Duration,
    pub parse_attempts: u32,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            init_filter: true,
            stale_after: DEFAULT_STALE_AFTER,
            parse_attempts: DEFAULT_PARSE_ATTEMPTS,
        }
    }
}

/// Diff state of one target
#[derive(Debug, Clone)]
pub struct MessageStorage<Id> {
    pub initialized: bool,
    pub seen_ids: HashSet<Id>,
}

impl<Id> Default for MessageStorage<Id> {
    fn default() -> Self {
        Self {
            initialized: false,
            seen_ids: HashSet::new(),
        }
    }
}

/// Runs the list-diff strategy for one [`NewMessage`] platform
pub struct NewMessageFetcher<P: NewMessage> {
    platform: P,
    options: FetchOptions,
    stores: Mutex<HashMap<Target, MessageStorage<P::PostId>>>,
}

impl<P: NewMessage> NewMessageFetcher<P> {
    pub fn new(platform: P, options: FetchOptions) -> Self {
        Self {
            platform,
            options,
            stores: Mutex::new(HashMap::new()),
        }
    }

    pub fn platform(&self) -> &P {
        &self.platform
    }

    /// Snapshot of a target's diff state
    pub async fn storage(&self, target: &Target) -> Option<MessageStorage<P::PostId>> {
        self.stores.lock().await.get(target).cloned()
    }

    /// Drop items whose category is unsupported or unrecognized
    fn filter_common(&self, ctx: &ProcessContext, raw_posts: Vec<P::RawPost>) -> Vec<P::RawPost> {
        raw_posts
            .into_iter()
            .filter(|raw| match self.platform.get_category(raw) {
                CategoryCheck::Recognized(_) | CategoryCheck::Uncategorized => true,
                CategoryCheck::Unsupported(reason) => {
                    info!(
                        platform = %self.platform.meta().platform_name,
                        reason = %reason,
                        "Ignoring post of unsupported category"
                    );
                    false
                }
                CategoryCheck::Unrecognized(reason) => {
                    warn!(
                        platform = %self.platform.meta().platform_name,
                        reason = %reason,
                        "Unknown post category"
                    );
                    for record in ctx.gen_req_records() {
                        warn!("{record}");
                    }
                    false
                }
            })
            .collect()
    }

    fn is_stale(&self, raw: &P::RawPost, now: DateTime<Utc>) -> bool {
        let Some(date) = self.platform.get_date(raw) else {
            return false;
        };
        match chrono::Duration::from_std(self.options.stale_after) {
            Ok(window) => now - date > window,
            Err(_) => false,
        }
    }

    /// Update the target's seen ids and return the items to dispatch
    async fn filter_common_with_diff(
        &self,
        ctx: &ProcessContext,
        target: &Target,
        raw_posts: Vec<P::RawPost>,
    ) -> Vec<P::RawPost> {
        let candidates = self.filter_common(ctx, raw_posts);
        let now = Utc::now();

        let mut stores = self.stores.lock().await;
        let store = stores.entry(target.clone()).or_default();

        if !store.initialized {
            let mut fresh = Vec::new();
            for raw in candidates {
                let id = self.platform.get_id(&raw);
                let unseen = store.seen_ids.insert(id);
                if unseen && !self.options.init_filter && !self.is_stale(&raw, now) {
                    fresh.push(raw);
                }
            }
            store.initialized = true;
            info!(
                platform = %self.platform.meta().platform_name,
                target = %target,
                seen = store.seen_ids.len(),
                "Initialized message storage"
            );
            return fresh;
        }

        candidates
            .into_iter()
            .filter(|raw| store.seen_ids.insert(self.platform.get_id(raw)))
            .collect()
    }

    async fn handle_new_post(
        &self,
        ctx: &ProcessContext,
        client: &HttpClient,
        raw_posts: Vec<P::RawPost>,
        sub_unit: &SubUnit,
    ) -> Result<Dispatch, PlatformError> {
        let new_posts = self
            .filter_common_with_diff(ctx, &sub_unit.sub_target, raw_posts)
            .await;
        if new_posts.is_empty() {
            return Ok(Vec::new());
        }

        let meta = self.platform.meta();
        let target = if meta.has_target {
            sub_unit.sub_target.as_str()
        } else {
            "-"
        };
        for raw in &new_posts {
            info!(
                platform = %meta.platform_name,
                target = %target,
                post_id = ?self.platform.get_id(raw),
                "Fetched new post"
            );
        }

        dispatch_user_post(
            &self.platform,
            client,
            &new_posts,
            sub_unit,
            self.options.parse_attempts,
        )
        .await
    }
}

#[async_trait]
impl<P: NewMessage> PlatformFetcher for NewMessageFetcher<P> {
    fn meta(&self) -> &PlatformMeta {
        self.platform.meta()
    }

    fn strategy(&self) -> FetchStrategy {
        FetchStrategy::ListDiff
    }

    async fn fetch_new_post(
        &self,
        ctx: &ProcessContext,
        client: &HttpClient,
        sub_unit: &SubUnit,
    ) -> Result<Dispatch, PlatformError> {
        let raw_posts = self
            .platform
            .get_sub_list(ctx, client, &sub_unit.sub_target)
            .await?;
        self.handle_new_post(ctx, client, raw_posts, sub_unit).await
    }

    async fn batch_fetch_new_post(
        &self,
        ctx: &ProcessContext,
        client: &HttpClient,
        sub_units: &[SubUnit],
    ) -> Result<Dispatch, PlatformError> {
        if !self.platform.meta().has_target {
            return Err(PlatformError::BatchUnsupported(
                self.platform.meta().platform_name.clone(),
            ));
        }

        let targets: Vec<Target> = sub_units.iter().map(|s| s.sub_target.clone()).collect();
        let lists = self
            .platform
            .batch_get_sub_list(ctx, client, &targets)
            .await?;
        if lists.len() != sub_units.len() {
            return Err(PlatformError::BatchMismatch {
                expected: sub_units.len(),
                got: lists.len(),
            });
        }

        // each target is diffed and parsed on its own
        let mut results = UnitResults::new(&self.platform.meta().platform_name);
        let mut dispatch = Vec::new();
        for (sub_unit, raw_posts) in sub_units.iter().zip(lists) {
            let result = self.handle_new_post(ctx, client, raw_posts, sub_unit).await;
            if let Some(posts) = results.check(sub_unit.sub_target.as_str(), result) {
                dispatch.extend(posts);
            }
        }
        results.finish(ctx, dispatch)
    }

    async fn get_target_name(
        &self,
        client: &HttpClient,
        target: &Target,
    ) -> Result<Option<String>, PlatformError> {
        self.platform.get_target_name(client, target).await
    }

    async fn parse_target(&self, input: &str) -> Result<Target, ParseTargetError> {
        self.platform.parse_target(input).await
    }
}

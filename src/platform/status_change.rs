//! Status-diff strategy
//!
//! Each poll returns one status snapshot of the target. The first snapshot
//! is only stored; later ones are compared with the stored one and the
//! platform decides which transitions become posts.

use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt::Debug;
use tokio::sync::Mutex;
use tracing::{info, warn};

use super::filter::dispatch_user_post;
use super::new_message::DEFAULT_PARSE_ATTEMPTS;
use super::{
    Dispatch, FetchStrategy, ParseTargetError, Platform, PlatformError, PlatformFetcher,
    PlatformMeta, UnitResults,
};
use crate::models::{SubUnit, Target};
use crate::site::{HttpClient, ProcessContext};

/// A platform whose source yields a single status snapshot per poll
#[async_trait]
pub trait StatusChange: Platform {
    type Status: Clone + Debug + Send + Sync;

    /// Fails with [`PlatformError::Status`] when the endpoint reports a failure
    async fn get_status(
        &self,
        ctx: &ProcessContext,
        client: &HttpClient,
        target: &Target,
    ) -> Result<Self::Status, PlatformError>;

    async fn batch_get_status(
        &self,
        _ctx: &ProcessContext,
        _client: &HttpClient,
        _targets: &[Target],
    ) -> Result<Vec<Self::Status>, PlatformError> {
        Err(PlatformError::BatchUnsupported(
            self.meta().platform_name.clone(),
        ))
    }

    /// Posts describing the transition from `old` to `new`, empty if none
    fn compare_status(
        &self,
        target: &Target,
        old: &Self::Status,
        new: &Self::Status,
    ) -> Vec<Self::RawPost>;
}

/// Runs the status-diff strategy for one [`StatusChange`] platform
pub struct StatusChangeFetcher<P: StatusChange> {
    platform: P,
    parse_attempts: u32,
    statuses: Mutex<HashMap<Target, P::Status>>,
}

impl<P: StatusChange> StatusChangeFetcher<P> {
    pub fn new(platform: P) -> Self {
        Self {
            platform,
            parse_attempts: DEFAULT_PARSE_ATTEMPTS,
            statuses: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_parse_attempts(mut self, attempts: u32) -> Self {
        self.parse_attempts = attempts;
        self
    }

    pub fn platform(&self) -> &P {
        &self.platform
    }

    pub async fn stored_status(&self, target: &Target) -> Option<P::Status> {
        self.statuses.lock().await.get(target).cloned()
    }

    async fn handle_status_change(
        &self,
        client: &HttpClient,
        new_status: P::Status,
        sub_unit: &SubUnit,
    ) -> Result<Dispatch, PlatformError> {
        let target = &sub_unit.sub_target;
        let diff = {
            let mut statuses = self.statuses.lock().await;
            let diff = match statuses.get(target) {
                Some(old) => {
                    let diff = self.platform.compare_status(target, old, &new_status);
                    if !diff.is_empty() {
                        info!(
                            platform = %self.platform.meta().platform_name,
                            target = %target,
                            old = ?old,
                            new = ?new_status,
                            "Status changed"
                        );
                    }
                    diff
                }
                None => Vec::new(),
            };
            statuses.insert(target.clone(), new_status);
            diff
        };

        if diff.is_empty() {
            return Ok(Vec::new());
        }
        dispatch_user_post(&self.platform, client, &diff, sub_unit, self.parse_attempts).await
    }
}

#[async_trait]
impl<P: StatusChange> PlatformFetcher for StatusChangeFetcher<P> {
    fn meta(&self) -> &PlatformMeta {
        self.platform.meta()
    }

    fn strategy(&self) -> FetchStrategy {
        FetchStrategy::StatusDiff
    }

    async fn fetch_new_post(
        &self,
        ctx: &ProcessContext,
        client: &HttpClient,
        sub_unit: &SubUnit,
    ) -> Result<Dispatch, PlatformError> {
        let new_status = match self
            .platform
            .get_status(ctx, client, &sub_unit.sub_target)
            .await
        {
            Ok(status) => status,
            Err(e) => {
                if matches!(e, PlatformError::Status(_)) {
                    warn!(
                        platform = %self.platform.meta().name,
                        target = %sub_unit.sub_target,
                        error = %e,
                        "Status fetch failed"
                    );
                }
                return Err(e);
            }
        };
        self.handle_status_change(client, new_status, sub_unit).await
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
        let new_statuses = self
            .platform
            .batch_get_status(ctx, client, &targets)
            .await?;
        if new_statuses.len() != sub_units.len() {
            return Err(PlatformError::BatchMismatch {
                expected: sub_units.len(),
                got: new_statuses.len(),
            });
        }

        let mut results = UnitResults::new(&self.platform.meta().platform_name);
        let mut dispatch = Vec::new();
        for (sub_unit, status) in sub_units.iter().zip(new_statuses) {
            let result = self.handle_status_change(client, status, sub_unit).await;
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

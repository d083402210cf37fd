//! Platforms and their fetch strategies
//!
//! A concrete platform implements [`Platform`] plus exactly one strategy
//! trait:
//!
//! - [`NewMessage`]: the source yields a list of items per poll; new items
//!   are found by diffing their ids against the ids seen before.
//! - [`StatusChange`]: the source yields one status snapshot per poll; the
//!   platform compares consecutive snapshots to produce posts.
//!
//! Wrapping the platform in [`NewMessageFetcher`] or [`StatusChangeFetcher`]
//! yields an object-safe [`PlatformFetcher`] that owns the per-target state
//! and is what the scheduler drives.

pub mod backoff;
pub mod error;
pub mod filter;
pub mod group;
pub mod new_message;
pub mod registry;
pub mod rss;
pub mod status_change;

pub use error::{ParseTargetError, PlatformError};
pub use group::PlatformGroup;
pub use new_message::{FetchOptions, NewMessage, NewMessageFetcher};
pub use registry::{PlatformRegistry, PlatformRegistryBuilder};
pub use status_change::{StatusChange, StatusChangeFetcher};

use async_trait::async_trait;
use std::collections::BTreeMap;
use tracing::{debug, warn};

use crate::models::{Category, Post, Recipient, SubUnit, Tag, Target};
use crate::site::{HttpClient, ProcessContext, Site};

/// Posts to deliver, grouped by recipient
pub type Dispatch = Vec<(Recipient, Vec<Post>)>;

/// Results of the independent units of one cycle (batch targets or group
/// members)
///
/// A failing unit does not discard what the others produced. The cycle only
/// fails when no unit succeeded.
#[derive(Debug)]
pub(crate) struct UnitResults {
    platform_name: String,
    succeeded: usize,
    failures: Vec<(String, PlatformError)>,
}

impl UnitResults {
    pub(crate) fn new(platform_name: impl Into<String>) -> Self {
        Self {
            platform_name: platform_name.into(),
            succeeded: 0,
            failures: Vec::new(),
        }
    }

    /// The unit's dispatch, or `None` if it failed
    pub(crate) fn check(
        &mut self,
        unit: &str,
        result: Result<Dispatch, PlatformError>,
    ) -> Option<Dispatch> {
        match result {
            Ok(dispatch) => {
                self.succeeded += 1;
                Some(dispatch)
            }
            Err(e) => {
                self.failures.push((unit.to_string(), e));
                None
            }
        }
    }

    /// Fail with the first error when every unit failed, otherwise log the
    /// failures and keep `dispatch`
    pub(crate) fn finish(
        self,
        ctx: &ProcessContext,
        dispatch: Dispatch,
    ) -> Result<Dispatch, PlatformError> {
        if self.succeeded == 0 {
            if let Some((_, e)) = self.failures.into_iter().next() {
                return Err(e);
            }
            return Ok(dispatch);
        }

        if self.failures.is_empty() {
            return Ok(dispatch);
        }
        for (unit, e) in &self.failures {
            if matches!(e, PlatformError::Site(site) if site.is_skip()) {
                debug!(platform = %self.platform_name, unit = %unit, reason = %e, "Unit skipped");
            } else {
                warn!(platform = %self.platform_name, unit = %unit, error = %e, "Unit failed, keeping the others");
            }
        }
        for record in ctx.gen_req_records() {
            warn!("API request record: {record}");
        }
        Ok(dispatch)
    }
}

/// Static description of a platform
#[derive(Debug, Clone, PartialEq)]
pub struct PlatformMeta {
    /// Unique key used in subscriptions and weight lookups
    pub platform_name: String,
    /// Human-readable name
    pub name: String,
    pub categories: BTreeMap<Category, String>,
    pub enable_tag: bool,
    /// Whether subscriptions name a specific target
    pub has_target: bool,
    pub is_common: bool,
    pub enabled: bool,
    pub use_batch: bool,
    pub site: Site,
    pub parse_target_prompt: Option<String>,
}

impl PlatformMeta {
    pub fn new(platform_name: impl Into<String>, name: impl Into<String>, site: Site) -> Self {
        Self {
            platform_name: platform_name.into(),
            name: name.into(),
            categories: BTreeMap::new(),
            enable_tag: false,
            has_target: true,
            is_common: false,
            enabled: true,
            use_batch: false,
            site,
            parse_target_prompt: None,
        }
    }

    pub fn with_categories<I, S>(mut self, categories: I) -> Self
    where
        I: IntoIterator<Item = (Category, S)>,
        S: Into<String>,
    {
        self.categories = categories
            .into_iter()
            .map(|(c, label)| (c, label.into()))
            .collect();
        self
    }

    pub fn with_tags(mut self) -> Self {
        self.enable_tag = true;
        self
    }

    pub fn without_target(mut self) -> Self {
        self.has_target = false;
        self
    }

    pub fn batched(mut self) -> Self {
        self.use_batch = true;
        self
    }

    pub fn common(mut self) -> Self {
        self.is_common = true;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn with_parse_target_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.parse_target_prompt = Some(prompt.into());
        self
    }
}

/// Result of classifying a raw post
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CategoryCheck {
    Recognized(Category),
    /// The platform has no categories for this post
    Uncategorized,
    /// Known category that is deliberately not handled; skipped quietly
    Unsupported(String),
    /// Unknown category; skipped with a warning and a request trace
    Unrecognized(String),
}

impl CategoryCheck {
    pub fn category(&self) -> Option<Category> {
        match self {
            Self::Recognized(c) => Some(*c),
            _ => None,
        }
    }
}

/// Which diff algorithm a fetcher runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchStrategy {
    ListDiff,
    StatusDiff,
}

/// Operations shared by every platform
#[async_trait]
pub trait Platform: Send + Sync + 'static {
    /// Platform-defined representation of one fetched item
    type RawPost: Send + Sync;

    fn meta(&self) -> &PlatformMeta;

    async fn get_target_name(
        &self,
        client: &HttpClient,
        target: &Target,
    ) -> Result<Option<String>, PlatformError>;

    /// Canonicalize user input into a target
    async fn parse_target(&self, input: &str) -> Result<Target, ParseTargetError> {
        Ok(Target::new(input.trim()))
    }

    fn get_category(&self, _raw: &Self::RawPost) -> CategoryCheck {
        CategoryCheck::Uncategorized
    }

    /// Tags of a post, `None` when the post carries no tag information
    fn get_tags(&self, _raw: &Self::RawPost) -> Option<Vec<Tag>> {
        None
    }

    async fn parse(&self, client: &HttpClient, raw: &Self::RawPost) -> Result<Post, PlatformError>;
}

/// Object-safe view of a platform wrapped with its strategy state
#[async_trait]
pub trait PlatformFetcher: Send + Sync {
    fn meta(&self) -> &PlatformMeta;

    fn strategy(&self) -> FetchStrategy;

    async fn fetch_new_post(
        &self,
        ctx: &ProcessContext,
        client: &HttpClient,
        sub_unit: &SubUnit,
    ) -> Result<Dispatch, PlatformError>;

    /// Poll every target of a batch group in one round trip
    async fn batch_fetch_new_post(
        &self,
        ctx: &ProcessContext,
        client: &HttpClient,
        sub_units: &[SubUnit],
    ) -> Result<Dispatch, PlatformError>;

    async fn get_target_name(
        &self,
        client: &HttpClient,
        target: &Target,
    ) -> Result<Option<String>, PlatformError>;

    async fn parse_target(&self, input: &str) -> Result<Target, ParseTargetError>;
}

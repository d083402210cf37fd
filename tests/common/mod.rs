//! Common test utilities: fake platforms, a recording send queue and a
//! scheduler harness

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use herald::delivery::{
    DeliveryResult, Dispatcher, MessageSegment, Outgoing, PlainRenderer, SendQueue,
};
use herald::models::{Category, Post, Recipient, Tag, Target};
use herald::platform::{
    CategoryCheck, FetchOptions, NewMessage, NewMessageFetcher, Platform, PlatformError,
    PlatformFetcher, PlatformMeta, PlatformRegistry, StatusChange, StatusChangeFetcher,
};
use herald::scheduler::{Schedulable, Scheduler, SchedulerDeps};
use herald::site::{
    DefaultClientManager, HttpClient, HttpSettings, ProcessContext, ScheduleSpec, Site,
};
use herald::storage::{MemorySubscriptionStore, Subscription};

pub fn test_site(name: &str) -> Site {
    Site::new(name, ScheduleSpec::interval(Duration::from_secs(10)))
}

pub fn default_ctx() -> ProcessContext {
    ProcessContext::new(Arc::new(DefaultClientManager::new(HttpSettings::default())))
}

pub fn client() -> HttpClient {
    HttpClient::new(&HttpSettings::default()).unwrap()
}

pub fn subscription(user: &str, platform: &str, target: &str) -> Subscription {
    Subscription {
        recipient: Recipient::new(user),
        platform: platform.to_string(),
        target: Target::new(target),
        target_name: String::new(),
        categories: Vec::new(),
        tags: Vec::new(),
    }
}

// ============================================================================
// List-diff fake
// ============================================================================

#[derive(Debug, Clone)]
pub struct FakeItem {
    pub id: u32,
    pub date: Option<DateTime<Utc>>,
    pub category: Option<Category>,
    pub tags: Vec<Tag>,
}

impl FakeItem {
    pub fn new(id: u32) -> Self {
        Self {
            id,
            date: None,
            category: None,
            tags: Vec::new(),
        }
    }

    pub fn dated(mut self, date: DateTime<Utc>) -> Self {
        self.date = Some(date);
        self
    }

    pub fn with_category(mut self, category: Category) -> Self {
        self.category = Some(category);
        self
    }

    pub fn with_tags(mut self, tags: &[&str]) -> Self {
        self.tags = tags.iter().map(|t| t.to_string()).collect();
        self
    }
}

pub fn items(ids: &[u32]) -> Vec<FakeItem> {
    ids.iter().copied().map(FakeItem::new).collect()
}

/// Shared item lists, one per target
#[derive(Clone, Default)]
pub struct FeedSource {
    items: Arc<Mutex<HashMap<Target, Vec<FakeItem>>>>,
    failing: Arc<Mutex<HashSet<Target>>>,
    fetches: Arc<AtomicUsize>,
}

impl FeedSource {
    pub fn set(&self, target: &str, items: Vec<FakeItem>) {
        self.items
            .lock()
            .unwrap()
            .insert(Target::new(target), items);
    }

    /// Make fetches of `target` fail until [`FeedSource::recover`]
    pub fn fail(&self, target: &str) {
        self.failing.lock().unwrap().insert(Target::new(target));
    }

    pub fn recover(&self, target: &str) {
        self.failing.lock().unwrap().remove(&Target::new(target));
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    fn get(&self, target: &Target) -> Result<Vec<FakeItem>, PlatformError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if self.failing.lock().unwrap().contains(target) {
            return Err(PlatformError::status(format!("feed {target} unavailable")));
        }
        Ok(self
            .items
            .lock()
            .unwrap()
            .get(target)
            .cloned()
            .unwrap_or_default())
    }
}

/// Scripted parse failures, keyed by the content the post would have
#[derive(Clone, Default)]
pub struct ParsePlan {
    failures: Arc<Mutex<HashMap<String, u32>>>,
    calls: Arc<AtomicUsize>,
}

impl ParsePlan {
    /// Fail the next `times` parses of `content`
    pub fn fail_times(&self, content: &str, times: u32) {
        self.failures
            .lock()
            .unwrap()
            .insert(content.to_string(), times);
    }

    pub fn always_fail(&self, content: &str) {
        self.fail_times(content, u32::MAX);
    }

    /// Parse attempts made so far, failed ones included
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn parse(&self, platform_name: &str, content: String) -> Result<Post, PlatformError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(remaining) = self.failures.lock().unwrap().get_mut(&content) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(PlatformError::parse(format!("bad {content}")));
            }
        }
        Ok(Post::new(platform_name, content))
    }
}

/// Category that the fake platforms know about but never deliver
pub const UNSUPPORTED_CATEGORY: Category = 3;

pub struct FakeFeed {
    meta: PlatformMeta,
    source: FeedSource,
    plan: ParsePlan,
}

impl FakeFeed {
    pub fn new(platform_name: &str, site: Site, source: FeedSource) -> Self {
        let meta = PlatformMeta::new(platform_name, platform_name, site)
            .with_categories([(1, "post"), (2, "repost")])
            .with_tags();
        Self {
            meta,
            source,
            plan: ParsePlan::default(),
        }
    }

    pub fn batched(mut self) -> Self {
        self.meta = self.meta.batched();
        self
    }

    /// Recognize only `category`, as one member of a platform group
    pub fn only_category(mut self, category: Category, label: &str) -> Self {
        self.meta = self.meta.with_categories([(category, label)]);
        self
    }

    pub fn with_parse_plan(mut self, plan: ParsePlan) -> Self {
        self.plan = plan;
        self
    }
}

#[async_trait]
impl Platform for FakeFeed {
    type RawPost = FakeItem;

    fn meta(&self) -> &PlatformMeta {
        &self.meta
    }

    async fn get_target_name(
        &self,
        _client: &HttpClient,
        target: &Target,
    ) -> Result<Option<String>, PlatformError> {
        Ok(Some(format!("feed {target}")))
    }

    fn get_category(&self, raw: &FakeItem) -> CategoryCheck {
        match raw.category {
            Some(c) if self.meta.categories.contains_key(&c) => CategoryCheck::Recognized(c),
            Some(UNSUPPORTED_CATEGORY) => CategoryCheck::Unsupported("story".to_string()),
            Some(c) => CategoryCheck::Unrecognized(format!("category {c}")),
            None => CategoryCheck::Uncategorized,
        }
    }

    fn get_tags(&self, raw: &FakeItem) -> Option<Vec<Tag>> {
        Some(raw.tags.clone())
    }

    async fn parse(&self, _client: &HttpClient, raw: &FakeItem) -> Result<Post, PlatformError> {
        self.plan
            .parse(&self.meta.platform_name, format!("item {}", raw.id))
    }
}

#[async_trait]
impl NewMessage for FakeFeed {
    type PostId = u32;

    fn get_id(&self, raw: &FakeItem) -> u32 {
        raw.id
    }

    fn get_date(&self, raw: &FakeItem) -> Option<DateTime<Utc>> {
        raw.date
    }

    async fn get_sub_list(
        &self,
        _ctx: &ProcessContext,
        _client: &HttpClient,
        target: &Target,
    ) -> Result<Vec<FakeItem>, PlatformError> {
        self.source.get(target)
    }

    async fn batch_get_sub_list(
        &self,
        _ctx: &ProcessContext,
        _client: &HttpClient,
        targets: &[Target],
    ) -> Result<Vec<Vec<FakeItem>>, PlatformError> {
        targets.iter().map(|t| self.source.get(t)).collect()
    }
}

pub fn feed_fetcher(
    platform_name: &str,
    site: Site,
    source: FeedSource,
    options: FetchOptions,
) -> NewMessageFetcher<FakeFeed> {
    NewMessageFetcher::new(FakeFeed::new(platform_name, site, source), options)
}

// ============================================================================
// Status-diff fake
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomStatus {
    pub live: bool,
    pub title: String,
}

impl RoomStatus {
    pub fn offline() -> Self {
        Self {
            live: false,
            title: String::new(),
        }
    }

    pub fn live(title: &str) -> Self {
        Self {
            live: true,
            title: title.to_string(),
        }
    }
}

/// Shared room statuses; `None` makes the status endpoint fail
#[derive(Clone, Default)]
pub struct RoomSource {
    statuses: Arc<Mutex<HashMap<Target, Option<RoomStatus>>>>,
}

impl RoomSource {
    pub fn set(&self, target: &str, status: RoomStatus) {
        self.statuses
            .lock()
            .unwrap()
            .insert(Target::new(target), Some(status));
    }

    pub fn fail(&self, target: &str) {
        self.statuses.lock().unwrap().insert(Target::new(target), None);
    }
}

pub struct FakeLiveRoom {
    meta: PlatformMeta,
    source: RoomSource,
    plan: ParsePlan,
}

impl FakeLiveRoom {
    pub fn new(platform_name: &str, site: Site, source: RoomSource) -> Self {
        let meta = PlatformMeta::new(platform_name, platform_name, site)
            .with_categories([(1, "live start"), (2, "title change")]);
        Self {
            meta,
            source,
            plan: ParsePlan::default(),
        }
    }

    pub fn batched(mut self) -> Self {
        self.meta = self.meta.batched();
        self
    }

    pub fn with_parse_plan(mut self, plan: ParsePlan) -> Self {
        self.plan = plan;
        self
    }

    fn status_of(&self, target: &Target) -> Result<RoomStatus, PlatformError> {
        self.source
            .statuses
            .lock()
            .unwrap()
            .get(target)
            .cloned()
            .unwrap_or_else(|| Some(RoomStatus::offline()))
            .ok_or_else(|| PlatformError::status(format!("room {target} unavailable")))
    }
}

/// A detected transition
#[derive(Debug, Clone)]
pub struct RoomEvent {
    pub category: Category,
    pub text: String,
}

#[async_trait]
impl Platform for FakeLiveRoom {
    type RawPost = RoomEvent;

    fn meta(&self) -> &PlatformMeta {
        &self.meta
    }

    async fn get_target_name(
        &self,
        _client: &HttpClient,
        target: &Target,
    ) -> Result<Option<String>, PlatformError> {
        Ok(Some(format!("room {target}")))
    }

    fn get_category(&self, raw: &RoomEvent) -> CategoryCheck {
        CategoryCheck::Recognized(raw.category)
    }

    async fn parse(&self, _client: &HttpClient, raw: &RoomEvent) -> Result<Post, PlatformError> {
        self.plan.parse(&self.meta.platform_name, raw.text.clone())
    }
}

#[async_trait]
impl StatusChange for FakeLiveRoom {
    type Status = RoomStatus;

    async fn get_status(
        &self,
        _ctx: &ProcessContext,
        _client: &HttpClient,
        target: &Target,
    ) -> Result<RoomStatus, PlatformError> {
        self.status_of(target)
    }

    async fn batch_get_status(
        &self,
        _ctx: &ProcessContext,
        _client: &HttpClient,
        targets: &[Target],
    ) -> Result<Vec<RoomStatus>, PlatformError> {
        targets.iter().map(|t| self.status_of(t)).collect()
    }

    fn compare_status(&self, _target: &Target, old: &RoomStatus, new: &RoomStatus) -> Vec<RoomEvent> {
        let mut events = Vec::new();
        if !old.live && new.live {
            events.push(RoomEvent {
                category: 1,
                text: format!("went live: {}", new.title),
            });
        } else if old.live && new.live && old.title != new.title {
            events.push(RoomEvent {
                category: 2,
                text: format!("title changed: {}", new.title),
            });
        }
        events
    }
}

pub fn room_fetcher(platform_name: &str, site: Site, source: RoomSource) -> StatusChangeFetcher<FakeLiveRoom> {
    StatusChangeFetcher::new(FakeLiveRoom::new(platform_name, site, source))
}

// ============================================================================
// HTTP-backed list-diff platform
// ============================================================================

/// Target is a URL serving one item id per line; non-2xx fails the fetch
pub struct LineFeed {
    meta: PlatformMeta,
}

impl LineFeed {
    pub fn new(platform_name: &str, site: Site) -> Self {
        Self {
            meta: PlatformMeta::new(platform_name, platform_name, site),
        }
    }
}

#[async_trait]
impl Platform for LineFeed {
    type RawPost = String;

    fn meta(&self) -> &PlatformMeta {
        &self.meta
    }

    async fn get_target_name(
        &self,
        _client: &HttpClient,
        _target: &Target,
    ) -> Result<Option<String>, PlatformError> {
        Ok(None)
    }

    async fn parse(&self, _client: &HttpClient, raw: &String) -> Result<Post, PlatformError> {
        Ok(Post::new(self.meta.platform_name.clone(), raw.clone()))
    }
}

#[async_trait]
impl NewMessage for LineFeed {
    type PostId = String;

    fn get_id(&self, raw: &String) -> String {
        raw.clone()
    }

    fn get_date(&self, _raw: &String) -> Option<DateTime<Utc>> {
        None
    }

    async fn get_sub_list(
        &self,
        _ctx: &ProcessContext,
        client: &HttpClient,
        target: &Target,
    ) -> Result<Vec<String>, PlatformError> {
        let body = client.get_text(target.as_str()).await?;
        Ok(body
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect())
    }
}

// ============================================================================
// Delivery
// ============================================================================

/// Send queue that keeps everything it is given
#[derive(Clone, Default)]
pub struct RecordingQueue {
    sent: Arc<Mutex<Vec<Outgoing>>>,
}

impl RecordingQueue {
    pub fn sent(&self) -> Vec<Outgoing> {
        self.sent.lock().unwrap().clone()
    }

    pub fn texts_for(&self, recipient: &str) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter(|o| o.recipient.as_str() == recipient)
            .flat_map(|o| o.segments)
            .filter_map(|s| match s {
                MessageSegment::Text(text) => Some(text),
                MessageSegment::Image(_) => None,
            })
            .collect()
    }
}

#[async_trait]
impl SendQueue for RecordingQueue {
    async fn send(&self, recipient: &Recipient, segments: Vec<MessageSegment>) -> DeliveryResult<()> {
        self.sent.lock().unwrap().push(Outgoing {
            recipient: recipient.clone(),
            segments,
        });
        Ok(())
    }
}

// ============================================================================
// Scheduler harness
// ============================================================================

pub struct Harness {
    pub store: Arc<MemorySubscriptionStore>,
    pub queue: RecordingQueue,
    pub deps: SchedulerDeps,
}

impl Harness {
    pub async fn new(fetchers: Vec<Arc<dyn PlatformFetcher>>, subs: Vec<Subscription>) -> Self {
        let mut builder = PlatformRegistry::builder();
        for fetcher in fetchers {
            builder = builder.register(fetcher);
        }
        let registry = Arc::new(builder.build().unwrap());
        let store = Arc::new(MemorySubscriptionStore::from_seed(subs, Vec::new()).await.unwrap());
        let queue = RecordingQueue::default();
        let dispatcher = Dispatcher::new(Arc::new(PlainRenderer), Arc::new(queue.clone()));
        let deps = SchedulerDeps {
            registry,
            store: store.clone(),
            dispatcher,
        };
        Self { store, queue, deps }
    }

    /// Scheduler for `site` holding every stored target of its platforms
    pub async fn scheduler(&self, site: &Site) -> Scheduler {
        use herald::storage::SubscriptionStore;

        let platforms = self.deps.registry.platforms_of_site(&site.name);
        let mut schedulables = Vec::new();
        for platform_name in &platforms {
            let use_batch = self.deps.registry.get(platform_name).unwrap().meta().use_batch;
            for target in self.store.get_platform_target(platform_name).await.unwrap() {
                schedulables.push(Schedulable::new(platform_name.clone(), target, use_batch));
            }
        }
        Scheduler::new(
            site.clone(),
            platforms,
            schedulables,
            Arc::new(DefaultClientManager::new(HttpSettings::default())),
            self.deps.clone(),
        )
    }
}

//! Integration tests for per-site schedulers and the scheduler manager

mod common;

use std::sync::Arc;

use common::*;
use herald::config::SchedulerConfig;
use herald::error::Error;
use herald::models::{Target, WeightConfig};
use herald::platform::{FetchOptions, PlatformError, PlatformFetcher};
use herald::utils::error::FetchError;
use herald::scheduler::{FetchOutcome, SchedulerError, SchedulerManager, NEW_SCHEDULABLE_WEIGHT};
use herald::site::HttpSettings;
use herald::storage::{MemoryCookieStore, SubscriptionStore};

fn weight(default: u32) -> WeightConfig {
    WeightConfig {
        default,
        time_config: Vec::new(),
    }
}

async fn feed_harness(source: FeedSource, subs: Vec<herald::storage::Subscription>) -> Harness {
    let fetcher: Arc<dyn PlatformFetcher> = Arc::new(feed_fetcher(
        "feed",
        test_site("feed-site"),
        source,
        FetchOptions::default(),
    ));
    Harness::new(vec![fetcher], subs).await
}

// ============================================================================
// Weighted selection
// ============================================================================

#[tokio::test]
async fn test_weighted_selection_order() {
    let harness = feed_harness(
        FeedSource::default(),
        vec![
            subscription("alice", "feed", "t1"),
            subscription("alice", "feed", "t2"),
        ],
    )
    .await;
    harness
        .store
        .set_weight_config("feed", &Target::new("t1"), weight(10))
        .await
        .unwrap();
    harness
        .store
        .set_weight_config("feed", &Target::new("t2"), weight(20))
        .await
        .unwrap();

    let scheduler = harness.scheduler(&test_site("feed-site")).await;

    let mut picked = Vec::new();
    for _ in 0..3 {
        let next = scheduler.get_next_schedulable().await.unwrap().unwrap();
        picked.push(next.target.to_string());
    }
    assert_eq!(picked, vec!["t2", "t1", "t2"]);

    let total: i64 = scheduler
        .schedulables()
        .await
        .iter()
        .map(|s| s.current_weight)
        .sum();
    assert_eq!(total, 0);
}

#[tokio::test]
async fn test_empty_scheduler_is_idle() {
    let harness = feed_harness(FeedSource::default(), Vec::new()).await;
    let scheduler = harness.scheduler(&test_site("feed-site")).await;

    assert!(scheduler.get_next_schedulable().await.unwrap().is_none());
    assert_eq!(scheduler.exec_fetch().await.unwrap(), FetchOutcome::Idle);
}

// ============================================================================
// Fetch cycle
// ============================================================================

#[tokio::test]
async fn test_exec_fetch_dispatches_only_new_posts() {
    let source = FeedSource::default();
    source.set("t1", items(&[1, 2]));
    let harness = feed_harness(source.clone(), vec![subscription("alice", "feed", "t1")]).await;
    let scheduler = harness.scheduler(&test_site("feed-site")).await;

    // first poll records a silent baseline
    let outcome = scheduler.exec_fetch().await.unwrap();
    assert_eq!(
        outcome,
        FetchOutcome::Fetched {
            platform_name: "feed".into(),
            target: Target::new("t1"),
            sent: 0,
        }
    );
    assert!(harness.queue.sent().is_empty());

    source.set("t1", items(&[1, 2, 3]));
    let outcome = scheduler.exec_fetch().await.unwrap();
    assert!(matches!(outcome, FetchOutcome::Fetched { sent: 1, .. }));
    assert_eq!(harness.queue.texts_for("alice"), vec!["item 3".to_string()]);

    // nothing new on the third poll
    let outcome = scheduler.exec_fetch().await.unwrap();
    assert!(matches!(outcome, FetchOutcome::Fetched { sent: 0, .. }));
    assert_eq!(harness.queue.sent().len(), 1);
    assert_eq!(source.fetch_count(), 3);
}

#[tokio::test]
async fn test_every_subscriber_receives_new_post() {
    let source = FeedSource::default();
    let harness = feed_harness(
        source.clone(),
        vec![
            subscription("alice", "feed", "t1"),
            subscription("bob", "feed", "t1"),
        ],
    )
    .await;
    let scheduler = harness.scheduler(&test_site("feed-site")).await;

    scheduler.exec_fetch().await.unwrap();
    source.set("t1", items(&[7]));
    let outcome = scheduler.exec_fetch().await.unwrap();

    assert!(matches!(outcome, FetchOutcome::Fetched { sent: 2, .. }));
    assert_eq!(harness.queue.texts_for("alice"), vec!["item 7".to_string()]);
    assert_eq!(harness.queue.texts_for("bob"), vec!["item 7".to_string()]);
}

#[tokio::test]
async fn test_batch_platform_polls_whole_group() {
    let source = FeedSource::default();
    let fetcher: Arc<dyn PlatformFetcher> = Arc::new(herald::platform::NewMessageFetcher::new(
        FakeFeed::new("feed", test_site("feed-site"), source.clone()).batched(),
        FetchOptions::default(),
    ));
    let harness = Harness::new(
        vec![fetcher],
        vec![
            subscription("alice", "feed", "t1"),
            subscription("bob", "feed", "t2"),
        ],
    )
    .await;
    let scheduler = harness.scheduler(&test_site("feed-site")).await;

    scheduler.exec_fetch().await.unwrap();
    // one tick polled both targets
    assert_eq!(source.fetch_count(), 2);

    source.set("t1", items(&[1]));
    source.set("t2", items(&[2]));
    let outcome = scheduler.exec_fetch().await.unwrap();
    assert!(matches!(outcome, FetchOutcome::Fetched { sent: 2, .. }));
    assert_eq!(harness.queue.texts_for("alice"), vec!["item 1".to_string()]);
    assert_eq!(harness.queue.texts_for("bob"), vec!["item 2".to_string()]);
}

#[tokio::test]
async fn test_batch_delivers_healthy_targets_when_one_fails_to_parse() {
    let source = FeedSource::default();
    let plan = ParsePlan::default();
    plan.always_fail("item 2");
    let fetcher: Arc<dyn PlatformFetcher> = Arc::new(herald::platform::NewMessageFetcher::new(
        FakeFeed::new("feed", test_site("feed-site"), source.clone())
            .batched()
            .with_parse_plan(plan),
        FetchOptions::default(),
    ));
    let harness = Harness::new(
        vec![fetcher],
        vec![
            subscription("alice", "feed", "t1"),
            subscription("bob", "feed", "t2"),
        ],
    )
    .await;
    let scheduler = harness.scheduler(&test_site("feed-site")).await;

    scheduler.exec_fetch().await.unwrap();
    source.set("t1", items(&[1]));
    source.set("t2", items(&[2]));

    let outcome = scheduler.exec_fetch().await.unwrap();
    assert!(matches!(outcome, FetchOutcome::Fetched { sent: 1, .. }));
    assert_eq!(harness.queue.texts_for("alice"), vec!["item 1".to_string()]);
    assert!(harness.queue.texts_for("bob").is_empty());
}

#[tokio::test]
async fn test_only_network_failures_are_logged_quietly() {
    let harness = feed_harness(FeedSource::default(), vec![subscription("alice", "feed", "t1")])
        .await;
    let scheduler = harness
        .scheduler(&test_site("feed-site"))
        .await
        .with_network_warning(false);

    let timeout = SchedulerError::fetch_failed(
        "feed",
        Target::new("t1"),
        Error::Fetch(FetchError::Timeout("https://example.com".into())),
        Vec::new(),
    );
    assert!(scheduler.logs_quietly(&timeout));

    // recoverable, but not a transport failure
    let status = SchedulerError::fetch_failed(
        "feed",
        Target::new("t1"),
        PlatformError::status("live api 500"),
        vec!["https://example.com GET [500]".to_string()],
    );
    assert!(status.is_recoverable());
    assert!(!scheduler.logs_quietly(&status));

    let loud = harness.scheduler(&test_site("feed-site")).await;
    assert!(!loud.logs_quietly(&timeout));
}

#[tokio::test]
async fn test_unknown_platform_fails_the_cycle() {
    let harness = feed_harness(FeedSource::default(), vec![subscription("alice", "feed", "t1")])
        .await;
    let scheduler = harness.scheduler(&test_site("feed-site")).await;
    // a target whose platform is not registered
    scheduler
        .insert_new_schedulable("ghost", &Target::new("x"))
        .await;

    // the newcomer is polled first
    let err = scheduler.exec_fetch().await.unwrap_err();
    match &err {
        SchedulerError::FetchFailed {
            platform_name,
            source,
            ..
        } => {
            assert_eq!(platform_name, "ghost");
            assert!(matches!(
                source.as_ref(),
                Error::Scheduler(SchedulerError::UnknownPlatform { .. })
            ));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(!err.is_recoverable());

    // the remaining target is still served
    let outcome = scheduler.exec_fetch().await.unwrap();
    assert!(matches!(outcome, FetchOutcome::Fetched { .. }));
}

// ============================================================================
// Manager
// ============================================================================

async fn manager(harness: &Harness) -> Arc<SchedulerManager> {
    SchedulerManager::init(
        harness.deps.clone(),
        Arc::new(MemoryCookieStore::new()),
        HttpSettings::default(),
        &SchedulerConfig::default(),
    )
    .await
    .unwrap()
}

#[tokio::test]
async fn test_manager_creates_scheduler_per_site() {
    let feed: Arc<dyn PlatformFetcher> = Arc::new(feed_fetcher(
        "feed",
        test_site("feed-site"),
        FeedSource::default(),
        FetchOptions::default(),
    ));
    let room: Arc<dyn PlatformFetcher> = Arc::new(room_fetcher(
        "room",
        test_site("room-site"),
        RoomSource::default(),
    ));
    let harness = Harness::new(
        vec![feed, room],
        vec![
            subscription("alice", "feed", "t1"),
            subscription("alice", "room", "r1"),
        ],
    )
    .await;
    let manager = manager(&harness).await;

    assert_eq!(manager.schedulers().count(), 2);
    let feed_scheduler = manager.scheduler_of("feed").unwrap();
    assert_eq!(feed_scheduler.name(), "feed-site");
    assert_eq!(feed_scheduler.schedulables().await.len(), 1);
    assert_eq!(manager.scheduler_of("room").unwrap().name(), "room-site");
}

#[tokio::test]
async fn test_store_hooks_insert_and_delete_schedulables() {
    let harness = feed_harness(FeedSource::default(), vec![subscription("alice", "feed", "t1")])
        .await;
    let manager = manager(&harness).await;
    let scheduler = manager.get_scheduler("feed-site").unwrap().clone();

    harness
        .store
        .add_subscribe(subscription("bob", "feed", "t2"))
        .await
        .unwrap();
    let schedulables = scheduler.schedulables().await;
    assert_eq!(schedulables.len(), 2);
    let added = schedulables
        .iter()
        .find(|s| s.target.as_str() == "t2")
        .unwrap();
    assert_eq!(added.current_weight, NEW_SCHEDULABLE_WEIGHT);

    // a second subscriber to a tracked target changes nothing
    harness
        .store
        .add_subscribe(subscription("carol", "feed", "t2"))
        .await
        .unwrap();
    assert_eq!(scheduler.schedulables().await.len(), 2);

    // newcomer is polled next
    let next = scheduler.get_next_schedulable().await.unwrap().unwrap();
    assert_eq!(next.target.as_str(), "t2");

    harness
        .store
        .del_subscribe(&herald::Recipient::new("alice"), "feed", &Target::new("t1"))
        .await
        .unwrap();
    let schedulables = scheduler.schedulables().await;
    assert_eq!(schedulables.len(), 1);
    assert_eq!(schedulables[0].target.as_str(), "t2");
}

#[tokio::test]
async fn test_manager_rejects_unknown_platform() {
    let harness = feed_harness(
        FeedSource::default(),
        vec![
            subscription("alice", "feed", "t1"),
            subscription("alice", "ghost", "x"),
        ],
    )
    .await;
    let manager = manager(&harness).await;

    // targets of the unknown platform were not loaded
    let scheduler = manager.scheduler_of("feed").unwrap();
    assert_eq!(scheduler.schedulables().await.len(), 1);

    assert!(manager.scheduler_of("ghost").is_err());
    assert!(manager
        .handle_insert_new_target("ghost", &Target::new("y"))
        .await
        .is_err());
}

#[tokio::test]
async fn test_browser_sites_skipped_without_browser() {
    let fetcher: Arc<dyn PlatformFetcher> = Arc::new(feed_fetcher(
        "feed",
        test_site("feed-site").requiring_browser(),
        FeedSource::default(),
        FetchOptions::default(),
    ));
    let harness = Harness::new(vec![fetcher], vec![subscription("alice", "feed", "t1")]).await;
    let manager = manager(&harness).await;

    assert_eq!(manager.schedulers().count(), 0);
    assert!(manager.scheduler_of("feed").is_err());
}

#[tokio::test(start_paused = true)]
async fn test_started_manager_polls_on_interval() {
    let source = FeedSource::default();
    let harness = feed_harness(source.clone(), vec![subscription("alice", "feed", "t1")]).await;
    let manager = manager(&harness).await;

    manager.start().await;
    // test_site ticks every 10 seconds; the first tick is one period in
    tokio::time::sleep(std::time::Duration::from_secs(35)).await;
    manager.shutdown().await;

    assert_eq!(source.fetch_count(), 3);
}

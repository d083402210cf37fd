//! Per-subscriber filtering and dispatch shared by both strategies

use tracing::debug;

use super::{Dispatch, Platform, PlatformError};
use crate::models::{Category, Post, SubUnit, Tag};
use crate::site::HttpClient;
use crate::utils::retry::{with_retry, RetryConfig};

/// Prefix marking a banned tag in a subscription
pub const BANNED_TAG_PREFIX: char = '~';

/// Split stored subscription tags into (subscribed, banned)
pub fn split_tags(tags: &[Tag]) -> (Vec<Tag>, Vec<Tag>) {
    let mut subscribed = Vec::new();
    let mut banned = Vec::new();
    for tag in tags {
        match tag.strip_prefix(BANNED_TAG_PREFIX) {
            Some(stripped) => banned.push(stripped.trim_start_matches(BANNED_TAG_PREFIX).to_string()),
            None => subscribed.push(tag.clone()),
        }
    }
    (subscribed, banned)
}

/// Whether a post with `post_tags` is hidden from a subscriber
///
/// Any banned tag hides the post. Otherwise a non-empty subscribed set
/// hides the post unless one of its tags is subscribed.
pub fn is_banned_post(post_tags: &[Tag], subscribed: &[Tag], banned: &[Tag]) -> bool {
    if post_tags.iter().any(|t| banned.contains(t)) {
        return true;
    }
    if subscribed.is_empty() {
        return false;
    }
    !post_tags.iter().any(|t| subscribed.contains(t))
}

/// Indexes of `posts` that pass one subscriber's category and tag filter
pub fn filter_user_custom<P: Platform>(
    platform: &P,
    posts: &[P::RawPost],
    categories: &[Category],
    tags: &[Tag],
) -> Vec<usize> {
    let meta = platform.meta();
    let (subscribed, banned) = split_tags(tags);

    posts
        .iter()
        .enumerate()
        .filter(|(_, raw)| {
            if meta.categories.is_empty() || categories.is_empty() {
                return true;
            }
            platform
                .get_category(raw)
                .category()
                .is_some_and(|c| categories.contains(&c))
        })
        .filter(|(_, raw)| {
            if !meta.enable_tag || tags.is_empty() {
                return true;
            }
            match platform.get_tags(raw) {
                Some(post_tags) => !is_banned_post(&post_tags, &subscribed, &banned),
                None => true,
            }
        })
        .map(|(i, _)| i)
        .collect()
}

/// Parse every post at most once per dispatch, retrying transient failures
struct ParseCache {
    posts: Vec<Option<Post>>,
    retry: RetryConfig,
}

impl ParseCache {
    fn new(len: usize, attempts: u32) -> Self {
        Self {
            posts: vec![None; len],
            retry: RetryConfig::immediate(attempts),
        }
    }

    async fn get<P: Platform>(
        &mut self,
        platform: &P,
        client: &HttpClient,
        raw_posts: &[P::RawPost],
        index: usize,
    ) -> Result<Post, PlatformError> {
        if let Some(post) = &self.posts[index] {
            return Ok(post.clone());
        }
        let raw = &raw_posts[index];
        let post = with_retry(&self.retry, || platform.parse(client, raw)).await?;
        self.posts[index] = Some(post.clone());
        Ok(post)
    }
}

/// Filter `new_posts` for each subscriber and parse the survivors
///
/// Every subscriber appears in the result, possibly with no posts.
pub async fn dispatch_user_post<P: Platform>(
    platform: &P,
    client: &HttpClient,
    new_posts: &[P::RawPost],
    sub_unit: &SubUnit,
    parse_attempts: u32,
) -> Result<Dispatch, PlatformError> {
    let mut cache = ParseCache::new(new_posts.len(), parse_attempts);
    let mut dispatch = Vec::with_capacity(sub_unit.user_sub_infos.len());

    for info in &sub_unit.user_sub_infos {
        let selected = filter_user_custom(platform, new_posts, &info.categories, &info.tags);
        debug!(
            recipient = %info.user,
            selected = selected.len(),
            total = new_posts.len(),
            "Filtered posts for subscriber"
        );

        let mut posts = Vec::with_capacity(selected.len());
        for index in selected {
            posts.push(cache.get(platform, client, new_posts, index).await?);
        }
        dispatch.push((info.user.clone(), posts));
    }

    Ok(dispatch)
}

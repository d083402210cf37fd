//! Built-in RSS/Atom platform
//!
//! The target is the feed URL. Three variants share the `rss` platform name
//! and differ only in how an entry is rendered: title and body, title only,
//! or body only.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use scraper::{Html, Selector};
use std::sync::OnceLock;
use std::time::Duration;

use super::backoff::RetryGuard;
use super::new_message::NewMessage;
use super::{CategoryCheck, ParseTargetError, Platform, PlatformError, PlatformMeta};
use crate::models::{Category, Post, Target};
use crate::site::{HttpClient, ProcessContext, ScheduleSpec, Site};
use crate::utils::error::FetchError;
use crate::utils::normalize_whitespace;

pub const RSS_PLATFORM_NAME: &str = "rss";

/// How often feeds are polled
pub const RSS_POLL_INTERVAL: Duration = Duration::from_secs(30);

pub fn rss_site() -> Site {
    Site::new(RSS_PLATFORM_NAME, ScheduleSpec::interval(RSS_POLL_INTERVAL))
}

fn img_selector() -> &'static Selector {
    static IMG: OnceLock<Selector> = OnceLock::new();
    IMG.get_or_init(|| Selector::parse("img").expect("Invalid CSS selector: img"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RssVariant {
    Full,
    TitleOnly,
    BodyOnly,
}

impl RssVariant {
    pub fn category(self) -> Category {
        match self {
            Self::Full => 1,
            Self::TitleOnly => 2,
            Self::BodyOnly => 3,
        }
    }

    fn label(self) -> &'static str {
        match self {
            Self::Full => "title+body",
            Self::TitleOnly => "title only",
            Self::BodyOnly => "body only",
        }
    }
}

/// One feed entry as seen by the platform
#[derive(Debug, Clone, PartialEq)]
pub struct RssEntry {
    pub id: String,
    pub title: Option<String>,
    /// HTML summary or content
    pub description: String,
    pub link: Option<String>,
    pub published: Option<DateTime<Utc>>,
    /// Image URLs from media enclosures
    pub media_images: Vec<String>,
    pub feed_title: Option<String>,
}

/// Feed title and entries of a parsed feed document
pub fn parse_feed(body: &[u8]) -> Result<(Option<String>, Vec<RssEntry>), PlatformError> {
    let feed = feed_rs::parser::parse(body)
        .map_err(|e| PlatformError::parse(format!("failed to parse RSS/Atom feed: {e}")))?;
    let feed_title = feed.title.map(|t| t.content);

    let entries = feed
        .entries
        .into_iter()
        .map(|entry| {
            let description = entry
                .summary
                .map(|s| s.content)
                .or_else(|| entry.content.and_then(|c| c.body))
                .unwrap_or_default();

            let media_images = entry
                .media
                .iter()
                .flat_map(|m| m.content.iter())
                .filter(|c| {
                    c.content_type
                        .as_ref()
                        .is_some_and(|t| t.to_string().starts_with("image/"))
                })
                .filter_map(|c| c.url.as_ref().map(|u| u.to_string()))
                .collect();

            RssEntry {
                id: entry.id,
                title: entry.title.map(|t| t.content),
                description,
                link: entry.links.first().map(|l| l.href.clone()),
                published: entry.published.or(entry.updated),
                media_images,
                feed_title: feed_title.clone(),
            }
        })
        .collect();

    Ok((feed_title, entries))
}

/// Visible text and image sources of an HTML fragment
pub fn extract_html(html: &str) -> (String, Vec<String>) {
    let fragment = Html::parse_fragment(html);
    let text = normalize_whitespace(&fragment.root_element().text().collect::<String>());
    let images = fragment
        .select(img_selector())
        .filter_map(|img| img.value().attr("src"))
        .map(str::to_string)
        .collect();
    (text, images)
}

pub struct Rss {
    meta: PlatformMeta,
    variant: RssVariant,
    guard: RetryGuard,
}

impl Rss {
    pub fn new(variant: RssVariant) -> Self {
        let meta = PlatformMeta::new(RSS_PLATFORM_NAME, "RSS", rss_site())
            .with_categories([(variant.category(), variant.label())])
            .common()
            .with_parse_target_prompt("enter the full http(s) URL of the feed");
        Self {
            meta,
            variant,
            guard: RetryGuard::default(),
        }
    }

    pub fn variant(&self) -> RssVariant {
        self.variant
    }

    async fn fetch_feed(
        &self,
        client: &HttpClient,
        url: &str,
    ) -> Result<(Option<String>, Vec<RssEntry>), PlatformError> {
        let response = client.send(client.get(url)).await?;
        response.error_for_status()?;
        parse_feed(&response.body)
    }
}

fn is_rate_limited(err: &PlatformError) -> bool {
    matches!(err, PlatformError::Fetch(FetchError::Status { status: 429, .. }))
}

#[async_trait]
impl Platform for Rss {
    type RawPost = RssEntry;

    fn meta(&self) -> &PlatformMeta {
        &self.meta
    }

    async fn get_target_name(
        &self,
        client: &HttpClient,
        target: &Target,
    ) -> Result<Option<String>, PlatformError> {
        let (title, _) = self.fetch_feed(client, target.as_str()).await?;
        Ok(title)
    }

    async fn parse_target(&self, input: &str) -> Result<Target, ParseTargetError> {
        let input = input.trim();
        let invalid = || {
            let err = ParseTargetError::new(input);
            match &self.meta.parse_target_prompt {
                Some(prompt) => err.with_prompt(prompt.clone()),
                None => err,
            }
        };
        let url = url::Url::parse(input).map_err(|_| invalid())?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(invalid());
        }
        Ok(Target::new(url.as_str()))
    }

    fn get_category(&self, _raw: &RssEntry) -> CategoryCheck {
        CategoryCheck::Recognized(self.variant.category())
    }

    async fn parse(&self, _client: &HttpClient, raw: &RssEntry) -> Result<Post, PlatformError> {
        let (body, mut images) = extract_html(&raw.description);
        images.extend(raw.media_images.iter().cloned());

        let mut post = match self.variant {
            RssVariant::Full => {
                let post = Post::new(RSS_PLATFORM_NAME, body).with_images(images);
                match &raw.title {
                    Some(title) if !title.is_empty() => post.with_title(title.clone()),
                    _ => post,
                }
            }
            RssVariant::TitleOnly => {
                Post::new(RSS_PLATFORM_NAME, raw.title.clone().unwrap_or_default())
            }
            RssVariant::BodyOnly => Post::new(RSS_PLATFORM_NAME, body).with_images(images),
        };

        if let Some(link) = &raw.link {
            post = post.with_url(link.clone());
        }
        if let Some(feed_title) = &raw.feed_title {
            post = post.with_nickname(feed_title.clone());
        }
        post.timestamp = raw.published;
        Ok(post)
    }
}

#[async_trait]
impl NewMessage for Rss {
    type PostId = String;

    fn get_id(&self, raw: &RssEntry) -> String {
        raw.id.clone()
    }

    fn get_date(&self, raw: &RssEntry) -> Option<DateTime<Utc>> {
        raw.published
    }

    async fn get_sub_list(
        &self,
        ctx: &ProcessContext,
        client: &HttpClient,
        target: &Target,
    ) -> Result<Vec<RssEntry>, PlatformError> {
        let fetched = self
            .guard
            .run(ctx, is_rate_limited, || {
                self.fetch_feed(client, target.as_str())
            })
            .await?;
        Ok(fetched.map(|(_, entries)| entries).unwrap_or_default())
    }
}

//! Handing fetched posts to the outbound transport
//!
//! A [`Renderer`] turns a [`Post`] into message segments and a [`SendQueue`]
//! accepts `(recipient, segments)` pairs for asynchronous delivery. The
//! [`Dispatcher`] glues both together for the scheduler and never lets a
//! delivery problem fail a fetch cycle.

pub mod queue;
pub mod render;

pub use queue::{ChannelSendQueue, Outgoing};
pub use render::PlainRenderer;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::metrics;
use crate::models::{Post, Recipient};
use crate::platform::Dispatch;

/// Result type for delivery operations
pub type DeliveryResult<T> = Result<T, DeliveryError>;

/// Errors raised while rendering or enqueueing a post
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryError {
    /// Nothing is consuming the queue
    #[error("No active transport")]
    NoActiveTransport,

    /// The queue is at capacity
    #[error("Send queue is full")]
    QueueFull,

    /// The post could not be rendered
    #[error("Render failed: {0}")]
    Render(String),
}

impl DeliveryError {
    /// Soft failures are logged and the post is dropped
    pub fn is_soft(&self) -> bool {
        matches!(self, Self::NoActiveTransport | Self::QueueFull)
    }
}

/// One transport-ready piece of a message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum MessageSegment {
    Text(String),
    Image(String),
}

impl fmt::Display for MessageSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(text) => write!(f, "{}", text),
            Self::Image(url) => write!(f, "[image: {}]", url),
        }
    }
}

/// Turns a post into message segments
#[async_trait]
pub trait Renderer: Send + Sync {
    async fn render(&self, post: &Post) -> DeliveryResult<Vec<MessageSegment>>;
}

/// Outbound queue with its own delivery and retry policy
#[async_trait]
pub trait SendQueue: Send + Sync {
    async fn send(&self, recipient: &Recipient, segments: Vec<MessageSegment>)
        -> DeliveryResult<()>;
}

/// Renders posts and pushes them to the send queue
#[derive(Clone)]
pub struct Dispatcher {
    renderer: Arc<dyn Renderer>,
    queue: Arc<dyn SendQueue>,
}

impl Dispatcher {
    pub fn new(renderer: Arc<dyn Renderer>, queue: Arc<dyn SendQueue>) -> Self {
        Self { renderer, queue }
    }

    /// Deliver every post of a fetch cycle; returns how many were enqueued
    ///
    /// Render failures skip the post. A missing transport or a full queue is
    /// logged and skips the post too.
    pub async fn dispatch(&self, platform_name: &str, site_name: &str, dispatch: Dispatch) -> u64 {
        let mut sent = 0u64;
        for (recipient, posts) in dispatch {
            for post in posts {
                if self
                    .deliver(platform_name, site_name, &recipient, &post)
                    .await
                {
                    sent += 1;
                }
            }
        }
        metrics::record_sent(platform_name, site_name, sent);
        sent
    }

    async fn deliver(
        &self,
        platform_name: &str,
        site_name: &str,
        recipient: &Recipient,
        post: &Post,
    ) -> bool {
        let segments = {
            let _timer = metrics::start_render_timer(platform_name, site_name);
            match self.renderer.render(post).await {
                Ok(segments) => segments,
                Err(e) => {
                    warn!(platform = %platform_name, recipient = %recipient, error = %e, "Failed to render post");
                    return false;
                }
            }
        };

        match self.queue.send(recipient, segments).await {
            Ok(()) => {
                debug!(platform = %platform_name, recipient = %recipient, "Post enqueued");
                true
            }
            Err(DeliveryError::NoActiveTransport) => {
                warn!(recipient = %recipient, "No active transport, post dropped");
                false
            }
            Err(e) => {
                warn!(recipient = %recipient, error = %e, "Failed to enqueue post");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::Mutex;

    struct Recording {
        sent: Mutex<Vec<(Recipient, Vec<MessageSegment>)>>,
        fail: Option<DeliveryError>,
    }

    #[async_trait]
    impl SendQueue for Recording {
        async fn send(
            &self,
            recipient: &Recipient,
            segments: Vec<MessageSegment>,
        ) -> DeliveryResult<()> {
            if let Some(e) = &self.fail {
                return Err(e.clone());
            }
            self.sent.lock().await.push((recipient.clone(), segments));
            Ok(())
        }
    }

    fn recording(fail: Option<DeliveryError>) -> Arc<Recording> {
        Arc::new(Recording {
            sent: Mutex::new(Vec::new()),
            fail,
        })
    }

    #[tokio::test]
    async fn test_dispatch_counts_each_post() {
        let queue = recording(None);
        let dispatcher = Dispatcher::new(Arc::new(PlainRenderer), queue.clone());

        let alice = Recipient::new("alice");
        let sent = dispatcher
            .dispatch(
                "rss",
                "rss",
                vec![
                    (alice.clone(), vec![Post::new("rss", "a"), Post::new("rss", "b")]),
                    (Recipient::new("bob"), vec![]),
                ],
            )
            .await;

        assert_eq!(sent, 2);
        let recorded = queue.sent.lock().await;
        assert_eq!(recorded.len(), 2);
        assert_eq!(recorded[0].0, alice);
    }

    #[tokio::test]
    async fn test_no_transport_is_soft() {
        let dispatcher = Dispatcher::new(
            Arc::new(PlainRenderer),
            recording(Some(DeliveryError::NoActiveTransport)),
        );
        let sent = dispatcher
            .dispatch(
                "rss",
                "rss",
                vec![(Recipient::new("alice"), vec![Post::new("rss", "a")])],
            )
            .await;
        assert_eq!(sent, 0);
        assert!(DeliveryError::NoActiveTransport.is_soft());
        assert!(!DeliveryError::Render("x".into()).is_soft());
    }
}

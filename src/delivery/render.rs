//! Plain text rendering

use async_trait::async_trait;

use super::{DeliveryResult, MessageSegment, Renderer};
use crate::models::Post;

/// Title and body as text, then the link, then one segment per image
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainRenderer;

impl PlainRenderer {
    pub fn render_segments(post: &Post) -> Vec<MessageSegment> {
        let mut text = String::new();
        if let Some(nickname) = &post.nickname {
            text.push_str(nickname);
            text.push('\n');
        }
        if let Some(title) = &post.title {
            text.push_str(title);
            text.push('\n');
        }
        text.push_str(&post.content);
        if let Some(url) = &post.url {
            text.push('\n');
            text.push_str(url);
        }

        let mut segments = vec![MessageSegment::Text(text.trim().to_string())];
        segments.extend(post.images.iter().cloned().map(MessageSegment::Image));
        segments
    }
}

#[async_trait]
impl Renderer for PlainRenderer {
    async fn render(&self, post: &Post) -> DeliveryResult<Vec<MessageSegment>> {
        Ok(Self::render_segments(post))
    }
}

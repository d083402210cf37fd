//! Bounded in-process send queue

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::{DeliveryError, DeliveryResult, MessageSegment, SendQueue};
use crate::models::Recipient;

/// Default number of messages buffered before `QueueFull`
pub const DEFAULT_QUEUE_CAPACITY: usize = 100;

/// One message waiting for the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outgoing {
    pub recipient: Recipient,
    pub segments: Vec<MessageSegment>,
}

/// [`SendQueue`] backed by a bounded `mpsc` channel
///
/// The receiving half is the transport. Once it is dropped every send fails
/// with [`DeliveryError::NoActiveTransport`].
#[derive(Debug, Clone)]
pub struct ChannelSendQueue {
    tx: mpsc::Sender<Outgoing>,
}

impl ChannelSendQueue {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Outgoing>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

#[async_trait]
impl SendQueue for ChannelSendQueue {
    async fn send(
        &self,
        recipient: &Recipient,
        segments: Vec<MessageSegment>,
    ) -> DeliveryResult<()> {
        let outgoing = Outgoing {
            recipient: recipient.clone(),
            segments,
        };
        self.tx.try_send(outgoing).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => DeliveryError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => DeliveryError::NoActiveTransport,
        })
    }
}

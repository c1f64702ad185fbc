//! Caller-side subscription handles.

use std::pin::Pin;
use std::task::{Context, Poll};

use futures_util::Stream;
use tokio::sync::mpsc;

use super::streaming::Command;
use crate::error::LinkError;
use crate::operation::GraphQLResponse;

/// A message received from a subscription.
#[derive(Debug, Clone)]
pub enum SubscriptionMessage {
    /// A result emitted by the server.
    Data(GraphQLResponse),
    /// The connection was re-established and the stream starts over.
    ///
    /// Results that follow belong to the fresh stream. Anything received
    /// before the marker came from the previous socket.
    Restarted,
    /// The server completed the subscription. No more messages follow.
    Complete,
    /// The subscription failed. No more messages follow, except after a
    /// [`CacheNormalization`](LinkError::CacheNormalization) error, which
    /// only reports a dropped cache write.
    Error(LinkError),
}

impl SubscriptionMessage {
    /// Whether no further messages follow this one.
    pub fn is_terminal(&self) -> bool {
        match self {
            Self::Complete => true,
            Self::Error(e) => !matches!(e, LinkError::CacheNormalization(_)),
            Self::Data(_) | Self::Restarted => false,
        }
    }
}

/// A live subscription registered on a streaming connection.
///
/// Messages arrive in server-emission order. Dropping the handle
/// unsubscribes it.
#[derive(Debug)]
pub struct SubscriptionStream {
    id: u64,
    receiver: mpsc::UnboundedReceiver<SubscriptionMessage>,
    commands: mpsc::UnboundedSender<Command>,
    cancelled: bool,
}

impl SubscriptionStream {
    pub(crate) fn new(
        id: u64,
        receiver: mpsc::UnboundedReceiver<SubscriptionMessage>,
        commands: mpsc::UnboundedSender<Command>,
    ) -> Self {
        Self {
            id,
            receiver,
            commands,
            cancelled: false,
        }
    }

    /// The subscription id, unique within its connection.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Whether [`unsubscribe`](Self::unsubscribe) has been called.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    /// Get the next message. Returns `None` once the stream has ended or
    /// the handle was unsubscribed.
    pub async fn next(&mut self) -> Option<SubscriptionMessage> {
        if self.cancelled {
            return None;
        }
        self.receiver.recv().await
    }

    /// Stop the subscription and deregister it from the connection.
    ///
    /// Safe to call at any time, including mid-reconnect. Calling it again
    /// does nothing.
    pub fn unsubscribe(&mut self) {
        if self.cancelled {
            return;
        }
        self.cancelled = true;
        self.receiver.close();
        // The connection may already be gone; nothing left to deregister.
        let _ = self.commands.send(Command::Unsubscribe { id: self.id });
    }
}

impl Stream for SubscriptionStream {
    type Item = SubscriptionMessage;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.cancelled {
            return Poll::Ready(None);
        }
        self.receiver.poll_recv(cx)
    }
}

impl Drop for SubscriptionStream {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

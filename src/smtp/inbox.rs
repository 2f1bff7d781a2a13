//! Bounded handoff of accepted messages to the server's owner

use std::time::Duration;

use crossbeam::channel::{
    self, Receiver, RecvError, RecvTimeoutError, Sender, TryRecvError, TrySendError,
};
use serde::{Deserialize, Serialize};

use crate::smtp::error::SmtpError;
use crate::smtp::message::Message;
use crate::smtp::signal::ShutdownSignal;

/// What a session does when the inbox has no room
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum QueueFullPolicy {
    /// Wait for the consumer, or for shutdown
    #[default]
    Block,
    /// Answer 452 right away
    Reject,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InboxConfig {
    /// Messages buffered before the full policy applies. Zero makes every
    /// handoff a rendezvous with the consumer.
    pub capacity: usize,
    pub policy: QueueFullPolicy,
}

impl Default for InboxConfig {
    fn default() -> Self {
        Self {
            capacity: 16,
            policy: QueueFullPolicy::Block,
        }
    }
}

/// Create the two ends of an inbox
pub(crate) fn inbox(config: InboxConfig) -> (InboxSender, Inbox) {
    let (sender, receiver) = channel::bounded(config.capacity);
    (
        InboxSender {
            sender,
            policy: config.policy,
        },
        Inbox { receiver },
    )
}

/// Receiving end, handed to whoever creates the server.
///
/// Dropping it makes every later transaction fail with 451.
#[derive(Debug)]
pub struct Inbox {
    receiver: Receiver<Message>,
}

impl Inbox {
    /// Block until a message arrives. Fails once every server clone is gone
    /// and the queue is drained.
    pub fn recv(&self) -> Result<Message, RecvError> {
        self.receiver.recv()
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Result<Message, RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }

    pub fn try_recv(&self) -> Result<Message, TryRecvError> {
        self.receiver.try_recv()
    }

    /// Blocking iterator over incoming messages
    pub fn iter(&self) -> impl Iterator<Item = Message> + '_ {
        self.receiver.iter()
    }

    /// Number of messages waiting
    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }
}

#[derive(Debug, Clone)]
pub(crate) struct InboxSender {
    sender: Sender<Message>,
    policy: QueueFullPolicy,
}

impl InboxSender {
    /// Hand a completed message to the consumer.
    ///
    /// Ownership moves to the queue on success. On failure the message is
    /// dropped and the error says which reply the client gets.
    pub fn deliver(&self, message: Message, shutdown: &ShutdownSignal) -> Result<(), SmtpError> {
        if shutdown.is_triggered() {
            return Err(SmtpError::ServiceUnavailable);
        }

        match self.policy {
            QueueFullPolicy::Reject => match self.sender.try_send(message) {
                Ok(()) => Ok(()),
                Err(TrySendError::Full(_)) => Err(SmtpError::InboxFull),
                Err(TrySendError::Disconnected(_)) => Err(SmtpError::InboxClosed),
            },
            QueueFullPolicy::Block => {
                channel::select! {
                    send(self.sender, message) -> sent => sent.map_err(|_| SmtpError::InboxClosed),
                    recv(shutdown.receiver()) -> _ => Err(SmtpError::ServiceUnavailable),
                }
            }
        }
    }
}

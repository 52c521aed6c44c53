// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Account Notifications
//!
//! In-process publish/subscribe bus for account lifecycle events ("user
//! signed up", "address added"), plus the listener that turns them into full
//! reconciliations.
//!
//! ## Shutdown
//!
//! [`SignupListener::run`] exits when the cancellation token fires or the bus
//! is dropped.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use utoipa::ToSchema;

use super::worker::{UpdateJob, UpdateQueue};
use crate::models::WalletAddress;

/// Buffered notifications per subscriber before the oldest are dropped.
const BUS_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, ToSchema, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Signup,
    AddressAdded,
}

/// JSON payload carried on the signup topic.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq)]
pub struct AccessNotification {
    pub user_id: String,
    #[serde(default = "default_kind")]
    pub event: NotificationKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<WalletAddress>,
}

fn default_kind() -> NotificationKind {
    NotificationKind::Signup
}

#[derive(Debug, Clone)]
pub struct Notification {
    pub topic: String,
    pub payload: Vec<u8>,
}

/// Topic-tagged broadcast channel.
#[derive(Clone)]
pub struct NotificationBus {
    tx: broadcast::Sender<Notification>,
}

impl Default for NotificationBus {
    fn default() -> Self {
        Self::new()
    }
}

impl NotificationBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(BUS_CAPACITY);
        Self { tx }
    }

    /// Publish raw bytes. Returns the number of subscribers reached.
    pub fn publish(&self, topic: &str, payload: Vec<u8>) -> usize {
        self.tx
            .send(Notification {
                topic: topic.to_string(),
                payload,
            })
            .unwrap_or(0)
    }

    pub fn publish_json<T: Serialize>(&self, topic: &str, message: &T) -> Result<usize, serde_json::Error> {
        Ok(self.publish(topic, serde_json::to_vec(message)?))
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.tx.subscribe()
    }
}

/// Queues a full reconciliation for every signup / address-added notification.
pub struct SignupListener {
    topic: String,
    receiver: broadcast::Receiver<Notification>,
    queue: UpdateQueue,
}

impl SignupListener {
    pub fn new(topic: impl Into<String>, bus: &NotificationBus, queue: UpdateQueue) -> Self {
        Self {
            topic: topic.into(),
            receiver: bus.subscribe(),
            queue,
        }
    }

    /// Run until cancelled.
    ///
    /// ```rust,ignore
    /// tokio::spawn(listener.run(shutdown.clone()));
    /// ```
    pub async fn run(mut self, shutdown: CancellationToken) {
        info!(topic = %self.topic, "Signup listener starting");

        loop {
            let next = tokio::select! {
                next = self.receiver.recv() => next,
                _ = shutdown.cancelled() => {
                    info!("Signup listener shutting down");
                    return;
                }
            };

            match next {
                Ok(notification) => self.handle(notification),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Signup listener lagged, notifications dropped");
                }
                Err(RecvError::Closed) => {
                    info!("Notification bus closed, signup listener stopping");
                    return;
                }
            }
        }
    }

    fn handle(&self, notification: Notification) {
        if notification.topic != self.topic {
            return;
        }
        let message: AccessNotification = match serde_json::from_slice(&notification.payload) {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, "Ignoring malformed signup notification");
                return;
            }
        };
        debug!(user_id = %message.user_id, event = ?message.event, "Signup notification received");
        self.queue.request_reconcile(&message.user_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn payload_defaults_to_signup() {
        let message: AccessNotification = serde_json::from_str(r#"{"user_id":"u1"}"#).unwrap();
        assert_eq!(message.event, NotificationKind::Signup);
        assert!(message.address.is_none());
    }

    #[test]
    fn publish_without_subscribers_is_not_an_error() {
        let bus = NotificationBus::new();
        assert_eq!(bus.publish("user-signup", b"{}".to_vec()), 0);
    }

    #[tokio::test]
    async fn listener_queues_reconcile_for_matching_topic() {
        let bus = NotificationBus::new();
        let (queue, mut jobs) = UpdateQueue::bounded(8);
        let listener = SignupListener::new("user-signup", &bus, queue);
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(listener.run(shutdown.clone()));

        bus.publish("other-topic", br#"{"user_id":"ignored"}"#.to_vec());
        bus.publish("user-signup", b"not json".to_vec());
        bus.publish_json(
            "user-signup",
            &AccessNotification {
                user_id: "u42".into(),
                event: NotificationKind::AddressAdded,
                address: None,
            },
        )
        .unwrap();

        let job = tokio::time::timeout(Duration::from_secs(2), jobs.recv())
            .await
            .unwrap()
            .unwrap();
        match job {
            UpdateJob::Reconcile { user_id } => assert_eq!(user_id, "u42"),
            other => panic!("unexpected job {other:?}"),
        }

        shutdown.cancel();
        handle.await.unwrap();
        assert!(jobs.try_recv().is_err());
    }
}

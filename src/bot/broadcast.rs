//! Feedback fan-out to every registered user.

use super::format::{format_feedback, FeedbackForm, StyledMessage};
use super::sender::{MessageSender, SendError};
use crate::storage::{StorageError, UserStore};
use futures_util::stream::{self, StreamExt};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// A recipient the message could not be delivered to
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedDelivery {
    /// Chat id of the recipient
    pub address: i64,
    /// Rendered error
    pub reason: String,
}

/// Outcome of one broadcast
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BroadcastReport {
    /// Number of registered users a send was attempted for
    pub recipients: usize,
    /// Number of successful sends
    pub delivered: usize,
    /// Failed sends, one entry per recipient
    pub failed: Vec<FailedDelivery>,
}

/// Formats feedback and delivers it to every user in the store.
///
/// Every recipient gets exactly one send attempt, bounded by the send
/// timeout. A failing or slow recipient never prevents delivery to the rest.
#[derive(Clone)]
pub struct Broadcaster {
    store: Arc<dyn UserStore>,
    sender: Arc<dyn MessageSender>,
    send_timeout: Duration,
    concurrency: usize,
}

impl Broadcaster {
    /// Create a broadcaster over `store` using `sender` for delivery
    #[must_use]
    pub fn new(
        store: Arc<dyn UserStore>,
        sender: Arc<dyn MessageSender>,
        send_timeout: Duration,
        concurrency: usize,
    ) -> Self {
        Self {
            store,
            sender,
            send_timeout,
            concurrency: concurrency.max(1),
        }
    }

    /// Format `form` and send it to every registered user.
    ///
    /// # Errors
    ///
    /// Returns a `StorageError` only if the user list cannot be read. Send
    /// failures are collected in the report instead.
    pub async fn broadcast(&self, form: &FeedbackForm) -> Result<BroadcastReport, StorageError> {
        let message = format_feedback(form);
        let users = self.store.list_users().await?;
        let recipients = users.len();

        let outcomes: Vec<(i64, Result<(), SendError>)> = stream::iter(users)
            .map(|user| {
                let message = &message;
                async move { (user.address, self.deliver(user.address, message).await) }
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        let mut report = BroadcastReport {
            recipients,
            ..BroadcastReport::default()
        };
        for (address, outcome) in outcomes {
            match outcome {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    warn!("Failed to deliver feedback to chat {}: {}", address, e);
                    report.failed.push(FailedDelivery {
                        address,
                        reason: e.to_string(),
                    });
                }
            }
        }

        info!(
            "Feedback broadcast finished: {} recipients, {} delivered, {} failed",
            report.recipients,
            report.delivered,
            report.failed.len()
        );
        Ok(report)
    }

    async fn deliver(&self, address: i64, message: &StyledMessage) -> Result<(), SendError> {
        tokio::time::timeout(self.send_timeout, self.sender.send(address, message))
            .await
            .map_err(|_| SendError::Timeout(self.send_timeout))?
    }
}

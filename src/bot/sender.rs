//! Outbound message delivery.
//!
//! [`MessageSender`] is the seam between the broadcaster and the platform.
//! [`TelegramSender`] is the production implementation and retries
//! transient network failures with exponential backoff and jitter. Flood
//! limits wait out the delay Telegram asks for before the next attempt.

use super::format::{StyleKind, StyledMessage};
use crate::utils::telegram_backoff;
use async_trait::async_trait;
use std::time::Duration;
use teloxide::prelude::*;
use teloxide::types::{ChatId, MessageEntity};
use teloxide::RequestError;
use thiserror::Error;
use tokio_retry::RetryIf;
use tracing::{debug, warn};

/// Errors from delivering a single message
#[derive(Error, Debug)]
pub enum SendError {
    /// The send did not complete before its deadline
    #[error("Send timed out after {0:?}")]
    Timeout(Duration),
    /// The Telegram API rejected the request or was unreachable
    #[error("Telegram send error: {0}")]
    Telegram(#[from] RequestError),
    /// Failure reported by a non-Telegram sender
    #[error("Send failed: {0}")]
    Other(String),
}

/// Interface for delivering styled messages to a chat address
#[async_trait]
pub trait MessageSender: Send + Sync {
    /// Deliver `message` to the chat identified by `address`
    async fn send(&self, address: i64, message: &StyledMessage) -> Result<(), SendError>;
}

/// Sends messages through the Telegram Bot API
#[derive(Clone)]
pub struct TelegramSender {
    bot: Bot,
}

impl TelegramSender {
    /// Wrap an authenticated bot client
    #[must_use]
    pub const fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

/// Convert style spans into Telegram message entities
#[must_use]
pub fn to_entities(message: &StyledMessage) -> Vec<MessageEntity> {
    message
        .spans
        .iter()
        .map(|span| match span.kind {
            StyleKind::Bold => MessageEntity::bold(span.offset, span.length),
            StyleKind::Italic => MessageEntity::italic(span.offset, span.length),
        })
        .collect()
}

fn is_transient(err: &RequestError) -> bool {
    matches!(
        err,
        RequestError::Network(_) | RequestError::Io(_) | RequestError::RetryAfter(_)
    )
}

impl TelegramSender {
    async fn send_once(
        &self,
        address: i64,
        text: &str,
        entities: &[MessageEntity],
    ) -> Result<(), RequestError> {
        let result = self
            .bot
            .send_message(ChatId(address), text.to_owned())
            .entities(entities.to_vec())
            .await;

        match result {
            Ok(_) => Ok(()),
            Err(RequestError::RetryAfter(secs)) => {
                warn!("Flood limit for chat {address}, waiting {}s", secs.seconds());
                tokio::time::sleep(secs.duration()).await;
                Err(RequestError::RetryAfter(secs))
            }
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl MessageSender for TelegramSender {
    async fn send(&self, address: i64, message: &StyledMessage) -> Result<(), SendError> {
        let entities = to_entities(message);

        RetryIf::start(
            telegram_backoff(),
            || self.send_once(address, &message.text, &entities),
            is_transient,
        )
        .await?;

        debug!("Delivered message to chat {address}");
        Ok(())
    }
}

//! Testing helpers and fake senders.

use crate::bot::format::StyledMessage;
use crate::bot::sender::{MessageSender, SendError};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Mutex;

/// A sender that records every attempt.
///
/// Addresses listed in `failing` get a `SendError::Other`, addresses in
/// `stalling` never complete.
#[derive(Default)]
pub struct RecordingSender {
    attempts: Mutex<Vec<(i64, StyledMessage)>>,
    failing: HashSet<i64>,
    stalling: HashSet<i64>,
}

impl RecordingSender {
    /// Sender failing for the given addresses
    pub fn failing_for(addresses: impl IntoIterator<Item = i64>) -> Self {
        Self {
            failing: addresses.into_iter().collect(),
            ..Self::default()
        }
    }

    /// Sender that hangs for the given addresses
    pub fn stalling_for(addresses: impl IntoIterator<Item = i64>) -> Self {
        Self {
            stalling: addresses.into_iter().collect(),
            ..Self::default()
        }
    }

    /// Addresses of all attempts, in attempt order
    pub fn addresses(&self) -> Vec<i64> {
        self.attempts
            .lock()
            .map(|a| a.iter().map(|(address, _)| *address).collect())
            .unwrap_or_default()
    }

    /// Messages of all attempts, in attempt order
    pub fn messages(&self) -> Vec<StyledMessage> {
        self.attempts
            .lock()
            .map(|a| a.iter().map(|(_, m)| m.clone()).collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl MessageSender for RecordingSender {
    async fn send(&self, address: i64, message: &StyledMessage) -> Result<(), SendError> {
        if let Ok(mut attempts) = self.attempts.lock() {
            attempts.push((address, message.clone()));
        }
        if self.stalling.contains(&address) {
            std::future::pending::<()>().await;
        }
        if self.failing.contains(&address) {
            return Err(SendError::Other(format!("chat {address} unreachable")));
        }
        Ok(())
    }
}

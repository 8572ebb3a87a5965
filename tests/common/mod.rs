//! Helpers shared by the integration tests; not every test binary uses all of them.
#![allow(dead_code)]

use async_trait::async_trait;
use glowws_server::bot::format::StyledMessage;
use glowws_server::bot::sender::{MessageSender, SendError};
use glowws_server::storage::{SqliteUserStore, StorageError, UserStore};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

/// Records every send, failing for a fixed set of chats
#[derive(Default)]
pub struct CountingSender {
    pub sent: Mutex<Vec<(i64, String)>>,
    pub failing: HashSet<i64>,
}

impl CountingSender {
    pub fn attempts(&self) -> Vec<(i64, String)> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl MessageSender for CountingSender {
    async fn send(&self, address: i64, message: &StyledMessage) -> Result<(), SendError> {
        if let Ok(mut sent) = self.sent.lock() {
            sent.push((address, message.text.clone()));
        }
        if self.failing.contains(&address) {
            return Err(SendError::Other("blocked by user".to_string()));
        }
        Ok(())
    }
}

pub async fn memory_store() -> Result<Arc<SqliteUserStore>, StorageError> {
    let store = SqliteUserStore::open_in_memory()?;
    store.ensure_schema().await?;
    Ok(Arc::new(store))
}

//! Backoff schedules shared by the bot components.

use crate::config::{
    LISTENER_MAX_BACKOFF_MS, TELEGRAM_API_INITIAL_BACKOFF_MS, TELEGRAM_API_MAX_BACKOFF_MS,
    TELEGRAM_API_MAX_RETRIES,
};
use std::time::Duration;
use tokio_retry::strategy::{jitter, ExponentialBackoff};

/// Delays between retries of a single Telegram API call.
///
/// Exponential with jitter, from 500ms up to 4s, at most 3 retries
/// (see constants in `config.rs`).
pub fn telegram_backoff() -> impl Iterator<Item = Duration> {
    ExponentialBackoff::from_millis(TELEGRAM_API_INITIAL_BACKOFF_MS)
        .max_delay(Duration::from_millis(TELEGRAM_API_MAX_BACKOFF_MS))
        .map(jitter)
        .take(TELEGRAM_API_MAX_RETRIES)
}

/// Delays between listener restarts.
///
/// Exponential from `initial_ms`, capped at one minute, with jitter, and
/// yielding at most `max_restarts` items.
pub fn listener_backoff(initial_ms: u64, max_restarts: u32) -> impl Iterator<Item = Duration> {
    ExponentialBackoff::from_millis(initial_ms.max(1))
        .max_delay(Duration::from_millis(LISTENER_MAX_BACKOFF_MS))
        .map(jitter)
        .take(max_restarts as usize)
}

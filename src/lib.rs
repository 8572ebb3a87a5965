#![deny(missing_docs)]
//! Glowws backend.
//!
//! Serves the static model list, registers Telegram users who message the
//! bot, and broadcasts app feedback to every registered user.

/// Telegram listener, formatting and broadcast.
pub mod bot;
/// Configuration management.
pub mod config;
/// HTTP routes and server.
pub mod http;
/// Logging setup with secret redaction.
pub mod logging;
/// User store (SQLite).
pub mod storage;
/// Retry helpers.
pub mod utils;

#[cfg(test)]
pub mod testing;

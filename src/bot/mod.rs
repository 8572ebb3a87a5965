/// Feedback fan-out to registered users
pub mod broadcast;
/// Feedback message formatting
pub mod format;
/// Update listener and its supervisor
pub mod listener;
/// Outbound message delivery
pub mod sender;

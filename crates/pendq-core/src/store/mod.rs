//! Persistent message database (SQLite via sqlx).
//!
//! Stores messages with their delivery statuses, endpoint activity
//! flags, and per-endpoint retry counters. The scheduler moves messages
//! between statuses; it never creates or deletes them.

pub mod counters;
pub mod db;
pub mod eligible;
pub mod messages;
pub mod notify;
pub mod types;

pub use db::*;
pub use eligible::*;
pub use notify::*;
pub use types::*;

#[cfg(test)]
mod tests;

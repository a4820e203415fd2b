//! # Session History
//!
//! Immutable summaries of finished recordings, served to the UI's
//! "History (Last 5)" panel and wiped by its "Clear Data" button.

pub mod disk;
pub mod store;

pub use store::{HistoryStore, StoreError};

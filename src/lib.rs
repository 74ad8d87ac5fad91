//! mqttscope: client-side MQTT session engine with live topic-tree indexing.
//!
//! The crate keeps one broker session alive at a time, tracks acknowledged
//! subscriptions, and folds every observed message into a hierarchical,
//! statistics-bearing topic tree. Consumers drive it through
//! [`session::SessionHandle`] and observe it through versioned snapshots.

pub mod config;
pub mod session;
pub mod topic_tree;

//! # Topic Tree Module
//!
//! Folds the stream of observed MQTT messages into a hierarchical index keyed
//! by '/'-delimited topic segments. Every message the session receives passes
//! through [`TopicTree::record`], which lazily creates the node chain for the
//! topic path and updates the statistics of the final node.
//!
//! ## Why This Module Exists
//!
//! A broker explorer lives and dies by its topic overview: which topics are
//! active, how often they fire, and what the latest payload looked like. The
//! tree is the single data structure answering all of that, so it is kept
//! free of transport concerns and fully unit-testable on its own.
//!
//! ## Invariants
//!
//! - A node's `full_path` is always its ancestors' names joined with '/'.
//! - Nodes are created on demand and never removed individually; the only
//!   destructive operation is a whole-tree reset when the session ends.
//! - A node can be an interior node and a message leaf at the same time:
//!   receiving on `x` and on `x/y` leaves `x` with its own stats *and* a
//!   child.

use std::collections::BTreeMap;

use chrono::{DateTime, Local};

/// Root label shown for the tree root; the root's `full_path` stays empty.
pub const ROOT_LABEL: &str = "root";

/// Per-node message statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TopicStats {
    /// Number of messages received exactly on this node's topic path.
    pub message_count: u64,
    /// Payload of the most recent message, decoded lossily as UTF-8 text.
    pub last_message: Option<String>,
    /// Local receive time of the most recent message.
    pub last_update: Option<DateTime<Local>>,
}

/// One node in the topic hierarchy.
///
/// Children are kept in a `BTreeMap` so tree walks are deterministic without
/// an extra sort pass in the consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicNode {
    /// Single path segment, or [`ROOT_LABEL`] for the root.
    pub name: String,
    /// '/'-joined path from the root to this node, empty for the root.
    pub full_path: String,
    pub stats: TopicStats,
    pub children: BTreeMap<String, TopicNode>,
}

impl TopicNode {
    fn new(name: impl Into<String>, full_path: impl Into<String>) -> Self {
        TopicNode {
            name: name.into(),
            full_path: full_path.into(),
            stats: TopicStats::default(),
            children: BTreeMap::new(),
        }
    }

    /// Fresh tree root with no children and zeroed stats.
    pub fn root() -> Self {
        TopicNode::new(ROOT_LABEL, "")
    }

    /// Looks up the node for an exact topic path, if it has been observed.
    ///
    /// The empty path addresses the root itself.
    pub fn node_at(&self, topic: &str) -> Option<&TopicNode> {
        if topic.is_empty() {
            return Some(self);
        }
        let mut current = self;
        for segment in topic.split('/') {
            current = current.children.get(segment)?;
        }
        Some(current)
    }

    /// Total messages recorded in this subtree, including this node.
    pub fn subtree_message_count(&self) -> u64 {
        self.stats.message_count
            + self
                .children
                .values()
                .map(TopicNode::subtree_message_count)
                .sum::<u64>()
    }

    /// Number of nodes in this subtree, including this node.
    pub fn subtree_node_count(&self) -> usize {
        1 + self
            .children
            .values()
            .map(TopicNode::subtree_node_count)
            .sum::<usize>()
    }

    fn touch(&mut self, payload: &str, received_at: DateTime<Local>) {
        self.stats.message_count += 1;
        self.stats.last_message = Some(payload.to_string());
        self.stats.last_update = Some(received_at);
    }
}

/// Owned, mutable topic index. The session worker is the only writer;
/// everything else sees cloned snapshots of the root.
#[derive(Debug, Clone)]
pub struct TopicTree {
    root: TopicNode,
}

impl Default for TopicTree {
    fn default() -> Self {
        TopicTree::new()
    }
}

impl TopicTree {
    pub fn new() -> Self {
        TopicTree {
            root: TopicNode::root(),
        }
    }

    pub fn root(&self) -> &TopicNode {
        &self.root
    }

    /// Folds one observed message into the tree.
    ///
    /// Topic strings are not sanitized: empty segments produced by leading,
    /// trailing or doubled slashes become literal empty-string nodes. The
    /// fully empty topic updates the root's own stats.
    pub fn record(&mut self, topic: &str, payload: &str) {
        let received_at = Local::now();
        if topic.is_empty() {
            self.root.touch(payload, received_at);
            return;
        }

        let mut current = &mut self.root;
        let mut current_path = String::new();
        // The separator joins segments, not the root: only omit it before
        // the first segment. An emptiness check would misfire when that
        // first segment is itself the empty string.
        for (index, segment) in topic.split('/').enumerate() {
            if index > 0 {
                current_path.push('/');
            }
            current_path.push_str(segment);

            current = current
                .children
                .entry(segment.to_string())
                .or_insert_with(|| TopicNode::new(segment, current_path.clone()));
        }
        current.touch(payload, received_at);
    }

    /// Drops every node and starts over from a bare root.
    pub fn reset(&mut self) {
        self.root = TopicNode::root();
    }
}

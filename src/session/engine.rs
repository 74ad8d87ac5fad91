//! Session state core: lifecycle state, subscription registry and topic
//! tree, with every mutation published as a fresh immutable snapshot.
//!
//! The engine is deliberately transport-free. The session worker translates
//! rumqttc events into calls on this type, which keeps every invariant
//! (ack-gated registry updates, whole-state collapse on disconnect, snapshot
//! versioning) testable without a broker.

use std::collections::VecDeque;
use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, warn};

use crate::topic_tree::{TopicNode, TopicTree};

/// Discrete phase of the session's connection.
#[derive(Clone, Copy, Default, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

/// One active subscription. Unique per topic filter; the QoS is whatever the
/// broker last granted for that filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    pub topic_filter: String,
    pub qos: u8,
}

/// Immutable view of the whole session state at one point in time.
///
/// Each mutation bumps `revision` and replaces the value on the watch
/// channel, so consumers can react to changes without polling and without
/// aliasing the worker's mutable structures.
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub state: ConnectionState,
    /// Classified message of the failure that ended the session, if any.
    pub last_error: Option<String>,
    pub subscriptions: Vec<Subscription>,
    pub tree: Arc<TopicNode>,
    pub revision: u64,
}

impl SessionSnapshot {
    pub fn initial() -> Self {
        SessionSnapshot {
            state: ConnectionState::Disconnected,
            last_error: None,
            subscriptions: Vec::new(),
            tree: Arc::new(TopicNode::root()),
            revision: 0,
        }
    }
}

/// Mutable session state owned by exactly one worker task at a time.
pub struct SessionEngine {
    state: ConnectionState,
    last_error: Option<String>,
    subscriptions: Vec<Subscription>,
    pending_subscribes: VecDeque<Subscription>,
    pending_unsubscribes: VecDeque<String>,
    tree: TopicTree,
    revision: u64,
    snapshots: Arc<watch::Sender<SessionSnapshot>>,
}

impl SessionEngine {
    /// Engine for a fresh connection attempt; publishes the `Connecting`
    /// snapshot immediately.
    pub fn connecting(snapshots: Arc<watch::Sender<SessionSnapshot>>) -> Self {
        let revision = snapshots.borrow().revision;
        let mut engine = SessionEngine {
            state: ConnectionState::Connecting,
            last_error: None,
            subscriptions: Vec::new(),
            pending_subscribes: VecDeque::new(),
            pending_unsubscribes: VecDeque::new(),
            tree: TopicTree::new(),
            revision,
            snapshots,
        };
        engine.publish();
        engine
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// CONNACK arrived: the session is live.
    pub fn mark_connected(&mut self) {
        self.state = ConnectionState::Connected;
        self.publish();
    }

    /// Any close, offline or error signal ends the session: state falls back
    /// to `Disconnected`, the registry is cleared and the tree is reset.
    /// Safe to call more than once.
    pub fn collapse(&mut self, reason: Option<String>) {
        if self.state == ConnectionState::Disconnected && reason.is_none() {
            // already collapsed; a repeated teardown must not bump snapshots
            return;
        }
        debug!(?reason, "session collapsing to disconnected");
        self.state = ConnectionState::Disconnected;
        self.last_error = reason;
        self.subscriptions.clear();
        self.pending_subscribes.clear();
        self.pending_unsubscribes.clear();
        self.tree.reset();
        self.publish();
    }

    /// Folds one inbound message into the topic tree.
    pub fn record_message(&mut self, topic: &str, payload: &str) {
        self.tree.record(topic, payload);
        self.publish();
    }

    /// A subscribe request went out on the wire; the registry entry waits
    /// for the matching SUBACK.
    pub fn subscribe_requested(&mut self, topic_filter: String, qos: u8) {
        self.pending_subscribes
            .push_back(Subscription { topic_filter, qos });
    }

    /// Broker answered the oldest in-flight subscribe request.
    ///
    /// `granted` carries the granted QoS on success and is `None` when the
    /// broker refused the filter; a refusal leaves the registry untouched.
    /// Requests and acks pair up in order because MQTT acknowledges packets
    /// of one connection in submission order.
    pub fn subscribe_acknowledged(&mut self, granted: Option<u8>) {
        let Some(requested) = self.pending_subscribes.pop_front() else {
            warn!("SUBACK without a pending subscribe request");
            return;
        };
        let Some(qos) = granted else {
            warn!(filter = %requested.topic_filter, "broker refused subscription");
            return;
        };

        match self
            .subscriptions
            .iter_mut()
            .find(|sub| sub.topic_filter == requested.topic_filter)
        {
            Some(existing) => existing.qos = qos,
            None => self.subscriptions.push(Subscription {
                topic_filter: requested.topic_filter,
                qos,
            }),
        }
        self.publish();
    }

    /// An unsubscribe request went out on the wire.
    pub fn unsubscribe_requested(&mut self, topic_filter: String) {
        self.pending_unsubscribes.push_back(topic_filter);
    }

    /// Broker answered the oldest in-flight unsubscribe request; the exact
    /// matching filter leaves the registry.
    pub fn unsubscribe_acknowledged(&mut self) {
        let Some(filter) = self.pending_unsubscribes.pop_front() else {
            warn!("UNSUBACK without a pending unsubscribe request");
            return;
        };
        self.subscriptions.retain(|sub| sub.topic_filter != filter);
        self.publish();
    }

    fn publish(&mut self) {
        self.revision += 1;
        let snapshot = SessionSnapshot {
            state: self.state,
            last_error: self.last_error.clone(),
            subscriptions: self.subscriptions.clone(),
            tree: Arc::new(self.tree.root().clone()),
            revision: self.revision,
        };
        self.snapshots.send_replace(snapshot);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> (SessionEngine, watch::Receiver<SessionSnapshot>) {
        let (tx, rx) = watch::channel(SessionSnapshot::initial());
        let engine = SessionEngine::connecting(Arc::new(tx));
        (engine, rx)
    }

    #[test]
    fn connecting_publishes_immediately() {
        let (engine, rx) = engine();
        assert_eq!(engine.state(), ConnectionState::Connecting);
        let snapshot = rx.borrow();
        assert_eq!(snapshot.state, ConnectionState::Connecting);
        assert_eq!(snapshot.revision, 1);
    }

    #[test]
    fn registry_only_changes_after_ack() {
        let (mut engine, rx) = engine();
        engine.mark_connected();

        engine.subscribe_requested("sensors/+/temperature".into(), 1);
        assert!(rx.borrow().subscriptions.is_empty());

        engine.subscribe_acknowledged(Some(1));
        let snapshot = rx.borrow();
        assert_eq!(
            snapshot.subscriptions,
            vec![Subscription {
                topic_filter: "sensors/+/temperature".into(),
                qos: 1
            }]
        );
    }

    #[test]
    fn resubscribing_replaces_the_qos_entry() {
        let (mut engine, rx) = engine();
        engine.mark_connected();

        engine.subscribe_requested("a/b".into(), 0);
        engine.subscribe_acknowledged(Some(0));
        engine.subscribe_requested("a/b".into(), 2);
        engine.subscribe_acknowledged(Some(2));

        let snapshot = rx.borrow();
        assert_eq!(snapshot.subscriptions.len(), 1);
        assert_eq!(snapshot.subscriptions[0].qos, 2);
    }

    #[test]
    fn refused_subscription_leaves_registry_unchanged() {
        let (mut engine, rx) = engine();
        engine.mark_connected();

        engine.subscribe_requested("a/b".into(), 1);
        engine.subscribe_acknowledged(Some(1));
        engine.subscribe_requested("forbidden/#".into(), 1);
        engine.subscribe_acknowledged(None);

        let snapshot = rx.borrow();
        assert_eq!(snapshot.subscriptions.len(), 1);
        assert_eq!(snapshot.subscriptions[0].topic_filter, "a/b");
    }

    #[test]
    fn unsubscribe_removes_exact_filter_after_ack() {
        let (mut engine, rx) = engine();
        engine.mark_connected();

        engine.subscribe_requested("a/b".into(), 0);
        engine.subscribe_acknowledged(Some(0));
        engine.subscribe_requested("a/#".into(), 0);
        engine.subscribe_acknowledged(Some(0));

        engine.unsubscribe_requested("a/b".into());
        assert_eq!(rx.borrow().subscriptions.len(), 2);
        engine.unsubscribe_acknowledged();

        let snapshot = rx.borrow();
        assert_eq!(snapshot.subscriptions.len(), 1);
        assert_eq!(snapshot.subscriptions[0].topic_filter, "a/#");
    }

    #[test]
    fn messages_grow_the_tree_snapshot() {
        let (mut engine, rx) = engine();
        engine.mark_connected();

        engine.record_message("sensors/room1/temperature", "21.5");
        let snapshot = rx.borrow().clone();
        let leaf = snapshot
            .tree
            .node_at("sensors/room1/temperature")
            .expect("node chain created");
        assert_eq!(leaf.stats.message_count, 1);
        assert_eq!(leaf.stats.last_message.as_deref(), Some("21.5"));
    }

    #[test]
    fn collapse_clears_everything() {
        let (mut engine, rx) = engine();
        engine.mark_connected();
        engine.subscribe_requested("a/b".into(), 1);
        engine.subscribe_acknowledged(Some(1));
        engine.record_message("a/b", "payload");

        engine.collapse(Some("Connection failed: boom".into()));

        let snapshot = rx.borrow().clone();
        assert_eq!(snapshot.state, ConnectionState::Disconnected);
        assert!(snapshot.subscriptions.is_empty());
        assert_eq!(snapshot.tree.subtree_node_count(), 1);
        assert_eq!(snapshot.tree.stats.message_count, 0);
        assert_eq!(
            snapshot.last_error.as_deref(),
            Some("Connection failed: boom")
        );
    }

    #[test]
    fn revisions_are_strictly_monotonic() {
        let (mut engine, rx) = engine();
        let mut last = rx.borrow().revision;
        engine.mark_connected();
        for step in 0..3 {
            engine.record_message("a/b", &format!("{step}"));
            let revision = rx.borrow().revision;
            assert!(revision > last);
            last = revision;
        }
    }

    #[test]
    fn revision_continues_across_engine_instances() {
        let (tx, rx) = watch::channel(SessionSnapshot::initial());
        let snapshots = Arc::new(tx);

        let mut first = SessionEngine::connecting(snapshots.clone());
        first.mark_connected();
        first.collapse(None);
        let after_first = rx.borrow().revision;

        let second = SessionEngine::connecting(snapshots);
        assert_eq!(second.snapshots.borrow().revision, after_first + 1);
        assert!(rx.borrow().revision > after_first);
    }

    #[test]
    fn stray_acks_are_ignored() {
        let (mut engine, rx) = engine();
        engine.mark_connected();
        let before = rx.borrow().revision;

        engine.subscribe_acknowledged(Some(1));
        engine.unsubscribe_acknowledged();

        assert!(rx.borrow().subscriptions.is_empty());
        assert_eq!(rx.borrow().revision, before);
    }
}

//! Event bus
//!
//! Decoupled notification between the orchestrator, its workers and
//! external observers:
//!
//! - `publish` broadcasts an [`Event`] to every subscriber
//! - `send` delivers a message to exactly one mailbox
//! - the inbound channel carries worker replies to the orchestrator
//! - refresh routes forward replica set refreshes from a source server to
//!   the shells that depend on it
//!
//! The bus is constructed explicitly and handed to whoever needs it; cloning
//! it is cheap and every clone talks to the same channels.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{broadcast, mpsc};

use hb_protocol::{Event, Inbound, Requester, ServerHandleId, ShellId};

/// Process-local publish/subscribe/send primitive
#[derive(Clone)]
pub struct EventBus {
    /// Broadcast channel for published events
    events: broadcast::Sender<Event>,
    /// Mailbox of the orchestrator
    inbox: Requester,
    /// Shells subscribed to refreshes of a source server
    refresh_routes: Arc<DashMap<ServerHandleId, Vec<ShellId>>>,
}

impl EventBus {
    /// Create a bus and the receiving end of the orchestrator's mailbox
    pub fn new(capacity: usize) -> (Self, mpsc::UnboundedReceiver<Inbound>) {
        let (events, _) = broadcast::channel(capacity);
        let (inbox, inbox_rx) = mpsc::unbounded_channel();

        let bus = Self {
            events,
            inbox,
            refresh_routes: Arc::new(DashMap::new()),
        };
        (bus, inbox_rx)
    }

    /// Broadcast an event to every current subscriber
    pub fn publish(&self, event: Event) {
        tracing::trace!("Publishing {:?}", event);
        // No subscribers is not an error
        let _ = self.events.send(event);
    }

    /// Subscribe to published events
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.events.subscribe()
    }

    /// Get a sender for broadcasting events
    pub fn event_sender(&self) -> broadcast::Sender<Event> {
        self.events.clone()
    }

    /// Deliver `message` to one mailbox. Returns `false` if the mailbox is closed.
    pub fn send<T>(target: &mpsc::UnboundedSender<T>, message: T) -> bool {
        target.send(message).is_ok()
    }

    /// Reply address of the orchestrator, handed to workers
    pub fn requester(&self) -> Requester {
        self.inbox.clone()
    }

    /// Forward refreshes of `source` to `shell`
    pub fn route_refresh(&self, source: ServerHandleId, shell: ShellId) {
        let mut shells = self.refresh_routes.entry(source).or_default();
        if !shells.contains(&shell) {
            shells.push(shell);
        }
    }

    /// Stop forwarding refreshes to `shell`
    pub fn unroute_shell(&self, shell: ShellId) {
        self.refresh_routes.retain(|_, shells| {
            shells.retain(|s| *s != shell);
            !shells.is_empty()
        });
    }

    /// Drop every route whose source is `source`
    pub fn unroute_source(&self, source: ServerHandleId) {
        self.refresh_routes.remove(&source);
    }

    /// Shells currently routed from `source`
    pub fn routed_shells(&self, source: ServerHandleId) -> Vec<ShellId> {
        self.refresh_routes
            .get(&source)
            .map(|shells| shells.clone())
            .unwrap_or_default()
    }

    /// Publish a `ReplicaSetRefreshed` for every shell routed from `source`.
    ///
    /// Returns the number of shells notified.
    pub fn forward_refresh(&self, source: ServerHandleId) -> usize {
        let shells = self.routed_shells(source);
        for shell in &shells {
            self.publish(Event::ReplicaSetRefreshed {
                source,
                shell: *shell,
            });
        }
        shells.len()
    }
}

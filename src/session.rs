//! Collaboration session: the client-side composition root.
//!
//! One `CollabSession` wires one [`ConnectionManager`] to one
//! [`PresenceAggregator`] and runs the event pump between them. The
//! embedding application constructs it once and threads it to whatever
//! needs presence; there is no module-level singleton.
//!
//! The pump owns the manager's event channel:
//!
//! ```text
//! ConnectionManager ──ClientEvent──► pump ──► PresenceAggregator
//!        ▲                            │
//!        └──── rejoin intent ─────────┘  (on Connected after a drop)
//! ```
//!
//! Re-emitting the join on every `Connected` transition is what restores
//! room membership after a reconnection: the server minted a fresh
//! connection id, so the old membership died with the old socket.

use std::sync::{Arc, Mutex};

use tokio::task::JoinHandle;

use crate::client::{
    ClientEvent, ConnectionConfig, ConnectionManager, ConnectionState, StateSubscription,
};
use crate::presence::{ActivityKind, PresenceAggregator, PresenceStatus, PresenceUser};
use crate::protocol::{ChangeKind, ClientIdentity, ClientIntent, CursorPosition, ProtocolError};

/// Client-side collaboration session.
///
/// Must be constructed inside a tokio runtime (the pump task is spawned
/// at construction time).
pub struct CollabSession {
    manager: Arc<ConnectionManager>,
    aggregator: Arc<Mutex<PresenceAggregator>>,
    pump: JoinHandle<()>,
}

impl CollabSession {
    pub fn new(config: ConnectionConfig, identity: ClientIdentity) -> Self {
        let manager = Arc::new(ConnectionManager::new(config));
        let aggregator = Arc::new(Mutex::new(PresenceAggregator::new(identity)));

        let mut event_rx = manager
            .take_event_rx()
            .unwrap_or_else(|| unreachable!("event receiver taken before the pump"));

        let pump_manager = manager.clone();
        let pump_aggregator = aggregator.clone();
        let pump = tokio::spawn(async move {
            while let Some(event) = event_rx.recv().await {
                match event {
                    ClientEvent::Inbound(presence_event) => {
                        let changed = pump_aggregator
                            .lock()
                            .expect("aggregator poisoned")
                            .handle_event(&presence_event);
                        if changed {
                            log::trace!("Roster updated from {presence_event:?}");
                        }
                    }

                    ClientEvent::StateChanged(ConnectionState::Connected) => {
                        // Reads the aggregator's *current* diagram, so a
                        // reconnect completing after the user navigated
                        // away cannot resurrect a stale membership.
                        let rejoin = pump_aggregator
                            .lock()
                            .expect("aggregator poisoned")
                            .rejoin_intent();
                        if let Some(intent) = rejoin {
                            log::info!("Restoring membership for {}", intent.diagram_id());
                            pump_manager.emit(&intent);
                        }
                    }

                    ClientEvent::StateChanged(_) => {}
                }
            }
        });

        Self {
            manager,
            aggregator,
            pump,
        }
    }

    // ─── Connection surface ─────────────────────────────────────────────

    pub async fn connect(&self) -> Result<(), ProtocolError> {
        self.manager.connect().await
    }

    pub fn disconnect(&self) {
        self.manager.disconnect();
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.manager.state()
    }

    pub fn on_connection_change<F>(&self, handler: F) -> StateSubscription
    where
        F: Fn(ConnectionState) + Send + Sync + 'static,
    {
        self.manager.subscribe(handler)
    }

    // ─── Presence surface ───────────────────────────────────────────────

    /// Switch the viewed diagram, emitting leave/join as needed.
    pub fn set_diagram(&self, diagram_id: Option<&str>) {
        let intents: Vec<ClientIntent> = self
            .aggregator
            .lock()
            .expect("aggregator poisoned")
            .set_diagram(diagram_id);
        for intent in &intents {
            self.manager.emit(intent);
        }
    }

    /// Current roster, local user first.
    pub fn roster(&self) -> Vec<PresenceUser> {
        self.aggregator
            .lock()
            .expect("aggregator poisoned")
            .roster()
    }

    /// Report a local pointer move; emits a throttled cursor intent.
    pub fn update_cursor(&self, position: CursorPosition) {
        let intent = self
            .aggregator
            .lock()
            .expect("aggregator poisoned")
            .update_local_cursor(position);
        if let Some(intent) = intent {
            self.manager.emit(&intent);
        }
    }

    /// Report a local diagram edit.
    pub fn notify_change(&self, change: ChangeKind) {
        let intent = self
            .aggregator
            .lock()
            .expect("aggregator poisoned")
            .notify_change(change);
        if let Some(intent) = intent {
            self.manager.emit(&intent);
        }
    }

    pub fn record_activity(&self, kind: ActivityKind) {
        self.aggregator
            .lock()
            .expect("aggregator poisoned")
            .record_activity(kind);
    }

    pub fn set_editing(&self, editing: bool) {
        self.aggregator
            .lock()
            .expect("aggregator poisoned")
            .set_editing(editing);
    }

    pub fn local_status(&self) -> PresenceStatus {
        self.aggregator
            .lock()
            .expect("aggregator poisoned")
            .local_status()
    }

    pub fn identity(&self) -> ClientIdentity {
        self.aggregator
            .lock()
            .expect("aggregator poisoned")
            .identity()
            .clone()
    }
}

impl Drop for CollabSession {
    fn drop(&mut self) {
        self.pump.abort();
        self.manager.disconnect();
    }
}

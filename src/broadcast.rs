//! Room-scoped fan-out of presence events with disconnect cleanup.
//!
//! The broadcaster owns the only shared mutable state on the server: the
//! room map (diagram id → member set) and its reverse index
//! (connection id → joined diagram ids). Both live behind one mutex and
//! every mutation goes through join/leave/on_disconnect, which keeps the
//! two maps consistent transactionally:
//!
//! ```text
//! conn ∈ rooms[d]  ⇔  d ∈ memberships[conn]
//! ```
//!
//! Fan-out targets are per-connection outboxes (unbounded senders of
//! pre-encoded frames) registered at accept time. Targets are collected
//! under the lock and sent to after it is released; nothing awaits while
//! holding membership data.
//!
//! Sender inclusion is per event type: joins echo back to the sender so
//! its UI can confirm the join, cursor and change events skip the sender,
//! leaves go to the remaining members.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::protocol::{ChangeKind, CursorPosition, PresenceColor, PresenceEvent};

/// A frame ready for delivery: encoded once, shared across recipients.
pub type Frame = Arc<Vec<u8>>;

/// Per-connection outbox for server→client frames.
pub type Outbox = mpsc::UnboundedSender<Frame>;

/// Optional identity fields as they arrive on the wire.
///
/// Missing fields are resolved in one step at the broadcaster boundary;
/// handlers never see partial identities.
#[derive(Debug, Clone, Default)]
pub struct IdentityHints {
    pub user_id: Option<String>,
    pub display_name: Option<String>,
    pub color: Option<PresenceColor>,
    pub avatar_url: Option<String>,
}

impl IdentityHints {
    pub fn with_user_id(user_id: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            ..Self::default()
        }
    }
}

/// Fully resolved identity for one broadcast.
#[derive(Debug, Clone, PartialEq)]
struct ResolvedIdentity {
    user_id: String,
    display_name: String,
    color: PresenceColor,
    avatar_url: Option<String>,
}

/// Statistics for monitoring fan-out health.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BroadcastStats {
    pub events_broadcast: u64,
    pub deliveries: u64,
    pub dropped_deliveries: u64,
    pub active_rooms: usize,
    pub active_connections: usize,
}

/// Counters tracked via atomics so fan-out never takes a lock for stats.
#[derive(Default)]
struct AtomicFanoutStats {
    events_broadcast: AtomicU64,
    deliveries: AtomicU64,
    dropped_deliveries: AtomicU64,
}

/// The room/membership store.
///
/// Explicitly owned by the broadcaster; never handed out for direct
/// mutation. `insert_membership`/`remove_membership` touch both maps
/// together so the bidirectional invariant holds at every return.
#[derive(Default)]
struct RoomStore {
    /// diagram id → connections currently viewing it
    rooms: HashMap<String, HashSet<Uuid>>,
    /// connection id → diagram ids it has joined (reverse index for
    /// O(memberships) disconnect cleanup)
    memberships: HashMap<Uuid, HashSet<String>>,
    /// connection id → outbox for delivery
    outboxes: HashMap<Uuid, Outbox>,
    /// connection id → user id it resolved to at join time, so a later
    /// disconnect can name the right user in its Left broadcasts
    identities: HashMap<Uuid, String>,
}

impl RoomStore {
    /// Returns `false` if the membership already existed (idempotent join).
    fn insert_membership(&mut self, conn: Uuid, diagram_id: &str) -> bool {
        let inserted = self
            .rooms
            .entry(diagram_id.to_string())
            .or_default()
            .insert(conn);
        self.memberships
            .entry(conn)
            .or_default()
            .insert(diagram_id.to_string());
        inserted
    }

    /// Returns `false` if the connection was not a member.
    fn remove_membership(&mut self, conn: Uuid, diagram_id: &str) -> bool {
        let was_member = match self.memberships.get_mut(&conn) {
            Some(diagrams) => diagrams.remove(diagram_id),
            None => false,
        };
        if !was_member {
            return false;
        }
        if let Some(members) = self.rooms.get_mut(diagram_id) {
            members.remove(&conn);
            if members.is_empty() {
                self.rooms.remove(diagram_id);
            }
        }
        if self.memberships.get(&conn).is_some_and(|d| d.is_empty()) {
            self.memberships.remove(&conn);
        }
        true
    }

    /// Outboxes of a room's members, optionally excluding one connection.
    fn room_targets(&self, diagram_id: &str, exclude: Option<Uuid>) -> Vec<Outbox> {
        let Some(members) = self.rooms.get(diagram_id) else {
            return Vec::new();
        };
        members
            .iter()
            .filter(|c| Some(**c) != exclude)
            .filter_map(|c| self.outboxes.get(c).cloned())
            .collect()
    }
}

/// Server-side fan-out of presence events scoped to a diagram.
pub struct RoomBroadcaster {
    store: Mutex<RoomStore>,
    stats: AtomicFanoutStats,
}

impl RoomBroadcaster {
    pub fn new() -> Self {
        Self {
            store: Mutex::new(RoomStore::default()),
            stats: AtomicFanoutStats::default(),
        }
    }

    /// Register a connection's outbox. Must happen before any join from
    /// that connection; the outbox lives until `on_disconnect`.
    pub fn register_connection(&self, conn: Uuid, outbox: Outbox) {
        let mut store = self.store.lock().expect("room store poisoned");
        store.outboxes.insert(conn, outbox);
    }

    /// Add `conn` to the diagram's room and broadcast a `Joined` event to
    /// every member, sender included.
    ///
    /// Joining is idempotent: re-joining re-broadcasts `Joined` without
    /// duplicating membership. Missing identity fields fall back to
    /// defaults (connection id as user id, "Anonymous", derived color).
    pub fn join(&self, conn: Uuid, diagram_id: &str, hints: IdentityHints) -> usize {
        let resolved = self.resolve(conn, hints);
        let targets = {
            let mut store = self.store.lock().expect("room store poisoned");
            store.insert_membership(conn, diagram_id);
            store.identities.insert(conn, resolved.user_id.clone());
            store.room_targets(diagram_id, None)
        };

        log::info!(
            "{} ({}) joined diagram {diagram_id}",
            resolved.display_name,
            resolved.user_id
        );

        self.fan_out(
            &PresenceEvent::Joined {
                user_id: resolved.user_id,
                diagram_id: diagram_id.to_string(),
                display_name: resolved.display_name,
                color: resolved.color,
                avatar_url: resolved.avatar_url,
            },
            targets,
        )
    }

    /// Remove the membership pairing and broadcast `Left` to the
    /// remaining members. A leave for a room the connection never joined
    /// is a silent no-op.
    pub fn leave(&self, conn: Uuid, diagram_id: &str, hints: IdentityHints) -> usize {
        let resolved = self.resolve(conn, hints);
        let targets = {
            let mut store = self.store.lock().expect("room store poisoned");
            if !store.remove_membership(conn, diagram_id) {
                return 0;
            }
            store.room_targets(diagram_id, None)
        };

        log::debug!("{} left diagram {diagram_id}", resolved.user_id);

        self.fan_out(
            &PresenceEvent::Left {
                user_id: resolved.user_id,
                diagram_id: diagram_id.to_string(),
            },
            targets,
        )
    }

    /// Relay a cursor position to every room member except the sender.
    ///
    /// No membership check on this hot path: a cursor event for a room
    /// the sender never joined is still relayed. A cursor event for a
    /// nonexistent room is a no-op.
    pub fn move_cursor(
        &self,
        conn: Uuid,
        diagram_id: &str,
        position: CursorPosition,
        hints: IdentityHints,
    ) -> usize {
        let resolved = self.resolve(conn, hints);
        let targets = {
            let store = self.store.lock().expect("room store poisoned");
            store.room_targets(diagram_id, Some(conn))
        };

        log::trace!("cursor from {} in diagram {diagram_id}", resolved.user_id);

        self.fan_out(
            &PresenceEvent::CursorMoved {
                user_id: resolved.user_id,
                diagram_id: diagram_id.to_string(),
                position,
            },
            targets,
        )
    }

    /// Relay a diagram-change notification to every room member except
    /// the sender.
    pub fn notify_change(
        &self,
        conn: Uuid,
        diagram_id: &str,
        change: ChangeKind,
        hints: IdentityHints,
    ) -> usize {
        let resolved = self.resolve(conn, hints);
        let targets = {
            let store = self.store.lock().expect("room store poisoned");
            store.room_targets(diagram_id, Some(conn))
        };

        self.fan_out(
            &PresenceEvent::DiagramChanged {
                user_id: resolved.user_id,
                diagram_id: diagram_id.to_string(),
                change,
            },
            targets,
        )
    }

    /// Clean up everything a disconnected connection left behind: one
    /// `Left` broadcast per joined room, then full removal of the
    /// reverse-index entry and outbox.
    ///
    /// Idempotent — a second call observes no memberships and does
    /// nothing, so abrupt-close races cannot double-broadcast.
    pub fn on_disconnect(&self, conn: Uuid) -> usize {
        let (user_id, departures) = {
            let mut store = self.store.lock().expect("room store poisoned");
            store.outboxes.remove(&conn);
            let user_id = store
                .identities
                .remove(&conn)
                .unwrap_or_else(|| conn.to_string());

            let diagrams: Vec<String> = store
                .memberships
                .remove(&conn)
                .map(|d| d.into_iter().collect())
                .unwrap_or_default();

            let mut departures = Vec::with_capacity(diagrams.len());
            for diagram_id in diagrams {
                if let Some(members) = store.rooms.get_mut(&diagram_id) {
                    members.remove(&conn);
                    if members.is_empty() {
                        store.rooms.remove(&diagram_id);
                    }
                }
                let targets = store.room_targets(&diagram_id, None);
                departures.push((diagram_id, targets));
            }
            (user_id, departures)
        };

        let room_count = departures.len();
        if room_count > 0 {
            log::info!("{user_id} disconnected, leaving {room_count} room(s)");
        }

        for (diagram_id, targets) in departures {
            self.fan_out(
                &PresenceEvent::Left {
                    user_id: user_id.clone(),
                    diagram_id,
                },
                targets,
            );
        }
        room_count
    }

    /// Resolve optional wire identity fields to concrete values.
    ///
    /// Single default-resolution step: user id falls back to the identity
    /// remembered from a previous join, then to the connection id; display
    /// name falls back to "Anonymous"; color is derived from the user id.
    fn resolve(&self, conn: Uuid, hints: IdentityHints) -> ResolvedIdentity {
        let user_id = hints.user_id.unwrap_or_else(|| {
            let store = self.store.lock().expect("room store poisoned");
            store
                .identities
                .get(&conn)
                .cloned()
                .unwrap_or_else(|| conn.to_string())
        });
        let display_name = hints.display_name.unwrap_or_else(|| "Anonymous".to_string());
        let color = hints.color.unwrap_or_else(|| PresenceColor::from_id(&user_id));
        ResolvedIdentity {
            user_id,
            display_name,
            color,
            avatar_url: hints.avatar_url,
        }
    }

    /// Encode once, deliver to each target. A broadcast to an empty room
    /// is a no-op; encode failures are logged, never propagated.
    fn fan_out(&self, event: &PresenceEvent, targets: Vec<Outbox>) -> usize {
        if targets.is_empty() {
            return 0;
        }
        let frame: Frame = match event.encode() {
            Ok(bytes) => Arc::new(bytes),
            Err(e) => {
                log::warn!("Failed to encode presence event: {e}");
                return 0;
            }
        };

        self.stats.events_broadcast.fetch_add(1, Ordering::Relaxed);
        let mut delivered = 0;
        for target in targets {
            if target.send(frame.clone()).is_ok() {
                delivered += 1;
            } else {
                self.stats.dropped_deliveries.fetch_add(1, Ordering::Relaxed);
            }
        }
        self.stats.deliveries.fetch_add(delivered as u64, Ordering::Relaxed);
        delivered
    }

    // ── Introspection ────────────────────────────────────────────────

    /// Number of rooms with at least one member.
    pub fn room_count(&self) -> usize {
        self.store.lock().expect("room store poisoned").rooms.len()
    }

    /// Number of members currently in a room.
    pub fn member_count(&self, diagram_id: &str) -> usize {
        let store = self.store.lock().expect("room store poisoned");
        store.rooms.get(diagram_id).map_or(0, |m| m.len())
    }

    /// Whether a connection is a member of a room.
    pub fn is_member(&self, conn: Uuid, diagram_id: &str) -> bool {
        let store = self.store.lock().expect("room store poisoned");
        store.rooms.get(diagram_id).is_some_and(|m| m.contains(&conn))
    }

    /// Diagram ids a connection has joined.
    pub fn memberships_of(&self, conn: Uuid) -> Vec<String> {
        let store = self.store.lock().expect("room store poisoned");
        store
            .memberships
            .get(&conn)
            .map(|d| d.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Verify the bidirectional room/membership invariant.
    ///
    /// Used by tests after operation sequences; cheap enough to run in
    /// debug assertions too.
    pub fn check_consistency(&self) -> bool {
        let store = self.store.lock().expect("room store poisoned");
        for (diagram_id, members) in &store.rooms {
            for conn in members {
                let ok = store
                    .memberships
                    .get(conn)
                    .is_some_and(|d| d.contains(diagram_id));
                if !ok {
                    return false;
                }
            }
        }
        for (conn, diagrams) in &store.memberships {
            for diagram_id in diagrams {
                let ok = store
                    .rooms
                    .get(diagram_id)
                    .is_some_and(|m| m.contains(conn));
                if !ok {
                    return false;
                }
            }
        }
        true
    }

    /// Snapshot of fan-out statistics.
    pub fn stats(&self) -> BroadcastStats {
        let store = self.store.lock().expect("room store poisoned");
        BroadcastStats {
            events_broadcast: self.stats.events_broadcast.load(Ordering::Relaxed),
            deliveries: self.stats.deliveries.load(Ordering::Relaxed),
            dropped_deliveries: self.stats.dropped_deliveries.load(Ordering::Relaxed),
            active_rooms: store.rooms.len(),
            active_connections: store.outboxes.len(),
        }
    }
}

impl Default for RoomBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn attach(broadcaster: &RoomBroadcaster) -> (Uuid, UnboundedReceiver<Frame>) {
        let conn = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        broadcaster.register_connection(conn, tx);
        (conn, rx)
    }

    fn drain(rx: &mut UnboundedReceiver<Frame>) -> Vec<PresenceEvent> {
        let mut events = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            events.push(PresenceEvent::decode(&frame).unwrap());
        }
        events
    }

    #[test]
    fn test_join_broadcasts_to_sender_too() {
        let b = RoomBroadcaster::new();
        let (conn, mut rx) = attach(&b);

        let delivered = b.join(conn, "d1", IdentityHints::with_user_id("u1"));
        assert_eq!(delivered, 1);

        let events = drain(&mut rx);
        assert_eq!(events.len(), 1);
        match &events[0] {
            PresenceEvent::Joined { user_id, diagram_id, .. } => {
                assert_eq!(user_id, "u1");
                assert_eq!(diagram_id, "d1");
            }
            other => panic!("Expected Joined, got {other:?}"),
        }
    }

    #[test]
    fn test_join_idempotent() {
        let b = RoomBroadcaster::new();
        let (conn, mut rx) = attach(&b);

        b.join(conn, "d1", IdentityHints::with_user_id("u1"));
        b.join(conn, "d1", IdentityHints::with_user_id("u1"));

        assert_eq!(b.member_count("d1"), 1);
        // Re-broadcast once per call.
        assert_eq!(drain(&mut rx).len(), 2);
        assert!(b.check_consistency());
    }

    #[test]
    fn test_join_resolves_missing_identity() {
        let b = RoomBroadcaster::new();
        let (conn, mut rx) = attach(&b);

        b.join(conn, "d1", IdentityHints::default());

        let events = drain(&mut rx);
        match &events[0] {
            PresenceEvent::Joined { user_id, display_name, color, .. } => {
                assert_eq!(user_id, &conn.to_string());
                assert_eq!(display_name, "Anonymous");
                assert_eq!(*color, PresenceColor::from_id(&conn.to_string()));
            }
            other => panic!("Expected Joined, got {other:?}"),
        }
    }

    #[test]
    fn test_leave_broadcasts_to_remaining() {
        let b = RoomBroadcaster::new();
        let (a, mut rx_a) = attach(&b);
        let (c, mut rx_c) = attach(&b);

        b.join(a, "d1", IdentityHints::with_user_id("u1"));
        b.join(c, "d1", IdentityHints::with_user_id("u2"));
        drain(&mut rx_a);
        drain(&mut rx_c);

        b.leave(c, "d1", IdentityHints::with_user_id("u2"));

        let events = drain(&mut rx_a);
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], PresenceEvent::Left { user_id, .. } if user_id == "u2"));
        assert!(!b.is_member(c, "d1"));
        assert!(b.is_member(a, "d1"));
        assert!(b.check_consistency());
    }

    #[test]
    fn test_leave_never_joined_is_noop() {
        let b = RoomBroadcaster::new();
        let (a, mut rx_a) = attach(&b);
        let (c, _rx_c) = attach(&b);

        b.join(a, "d1", IdentityHints::with_user_id("u1"));
        drain(&mut rx_a);

        let delivered = b.leave(c, "d1", IdentityHints::with_user_id("u2"));
        assert_eq!(delivered, 0);
        assert!(drain(&mut rx_a).is_empty());
    }

    #[test]
    fn test_cursor_excludes_sender() {
        let b = RoomBroadcaster::new();
        let (a, mut rx_a) = attach(&b);
        let (c, mut rx_c) = attach(&b);

        b.join(a, "d1", IdentityHints::with_user_id("u1"));
        b.join(c, "d1", IdentityHints::with_user_id("u2"));
        drain(&mut rx_a);
        drain(&mut rx_c);

        b.move_cursor(a, "d1", CursorPosition::new(10.0, 20.0), IdentityHints::with_user_id("u1"));

        assert!(drain(&mut rx_a).is_empty(), "sender must not receive its own cursor");
        let events = drain(&mut rx_c);
        assert_eq!(events.len(), 1);
        match &events[0] {
            PresenceEvent::CursorMoved { user_id, position, .. } => {
                assert_eq!(user_id, "u1");
                assert_eq!(position.x, 10.0);
            }
            other => panic!("Expected CursorMoved, got {other:?}"),
        }
    }

    #[test]
    fn test_cursor_relayed_without_membership_check() {
        let b = RoomBroadcaster::new();
        let (a, mut rx_a) = attach(&b);
        let (outsider, _rx_o) = attach(&b);

        b.join(a, "d1", IdentityHints::with_user_id("u1"));
        drain(&mut rx_a);

        // The outsider never joined d1 — the cursor is still relayed.
        let delivered = b.move_cursor(
            outsider,
            "d1",
            CursorPosition::new(1.0, 2.0),
            IdentityHints::with_user_id("u9"),
        );
        assert_eq!(delivered, 1);
        assert_eq!(drain(&mut rx_a).len(), 1);
    }

    #[test]
    fn test_cursor_to_nonexistent_room_is_noop() {
        let b = RoomBroadcaster::new();
        let (a, _rx) = attach(&b);
        let delivered = b.move_cursor(a, "ghost", CursorPosition::ORIGIN, IdentityHints::default());
        assert_eq!(delivered, 0);
    }

    #[test]
    fn test_change_excludes_sender() {
        let b = RoomBroadcaster::new();
        let (a, mut rx_a) = attach(&b);
        let (c, mut rx_c) = attach(&b);

        b.join(a, "d1", IdentityHints::with_user_id("u1"));
        b.join(c, "d1", IdentityHints::with_user_id("u2"));
        drain(&mut rx_a);
        drain(&mut rx_c);

        b.notify_change(a, "d1", ChangeKind::Content, IdentityHints::with_user_id("u1"));

        assert!(drain(&mut rx_a).is_empty());
        let events = drain(&mut rx_c);
        assert!(matches!(
            &events[0],
            PresenceEvent::DiagramChanged { change: ChangeKind::Content, .. }
        ));
    }

    #[test]
    fn test_disconnect_cleanup_completeness() {
        let b = RoomBroadcaster::new();
        let (a, mut rx_a) = attach(&b);
        let (observer, mut rx_o) = attach(&b);

        // `a` joins three rooms; the observer shares all of them.
        for d in ["d1", "d2", "d3"] {
            b.join(a, d, IdentityHints::with_user_id("u1"));
            b.join(observer, d, IdentityHints::with_user_id("u2"));
        }
        drain(&mut rx_a);
        drain(&mut rx_o);

        let cleaned = b.on_disconnect(a);
        assert_eq!(cleaned, 3);

        // Exactly one Left per joined room, named by the joined user id.
        let events = drain(&mut rx_o);
        let mut left_diagrams: Vec<String> = events
            .iter()
            .map(|e| match e {
                PresenceEvent::Left { user_id, diagram_id } => {
                    assert_eq!(user_id, "u1");
                    diagram_id.clone()
                }
                other => panic!("Expected Left, got {other:?}"),
            })
            .collect();
        left_diagrams.sort();
        assert_eq!(left_diagrams, vec!["d1", "d2", "d3"]);

        assert!(b.memberships_of(a).is_empty());
        assert!(b.check_consistency());
    }

    #[test]
    fn test_disconnect_idempotent() {
        let b = RoomBroadcaster::new();
        let (a, mut rx_a) = attach(&b);
        let (observer, mut rx_o) = attach(&b);

        b.join(a, "d1", IdentityHints::with_user_id("u1"));
        b.join(observer, "d1", IdentityHints::with_user_id("u2"));
        drain(&mut rx_a);
        drain(&mut rx_o);

        assert_eq!(b.on_disconnect(a), 1);
        assert_eq!(b.on_disconnect(a), 0);
        assert_eq!(drain(&mut rx_o).len(), 1);
    }

    #[test]
    fn test_disconnect_no_memberships_is_noop() {
        let b = RoomBroadcaster::new();
        let (a, _rx) = attach(&b);
        assert_eq!(b.on_disconnect(a), 0);
    }

    #[test]
    fn test_empty_room_removed_after_last_leave() {
        let b = RoomBroadcaster::new();
        let (a, _rx) = attach(&b);

        b.join(a, "d1", IdentityHints::with_user_id("u1"));
        assert_eq!(b.room_count(), 1);

        b.leave(a, "d1", IdentityHints::with_user_id("u1"));
        assert_eq!(b.room_count(), 0);
        assert!(b.check_consistency());
    }

    #[test]
    fn test_bidirectional_consistency_under_sequence() {
        let b = RoomBroadcaster::new();
        let (a, _rx_a) = attach(&b);
        let (c, _rx_c) = attach(&b);

        b.join(a, "d1", IdentityHints::with_user_id("u1"));
        b.join(a, "d2", IdentityHints::with_user_id("u1"));
        b.join(c, "d1", IdentityHints::with_user_id("u2"));
        assert!(b.check_consistency());

        b.leave(a, "d1", IdentityHints::with_user_id("u1"));
        assert!(b.check_consistency());
        assert!(!b.is_member(a, "d1"));
        assert!(b.is_member(a, "d2"));
        assert!(b.is_member(c, "d1"));

        b.on_disconnect(c);
        assert!(b.check_consistency());
        assert_eq!(b.member_count("d1"), 0);

        b.on_disconnect(a);
        assert!(b.check_consistency());
        assert_eq!(b.room_count(), 0);
    }

    #[test]
    fn test_stats_track_fanout() {
        let b = RoomBroadcaster::new();
        let (a, mut rx_a) = attach(&b);
        let (c, mut rx_c) = attach(&b);

        b.join(a, "d1", IdentityHints::with_user_id("u1"));
        b.join(c, "d1", IdentityHints::with_user_id("u2"));
        drain(&mut rx_a);
        drain(&mut rx_c);

        let stats = b.stats();
        assert_eq!(stats.events_broadcast, 2);
        assert_eq!(stats.deliveries, 3); // 1 (a alone) + 2 (a and c)
        assert_eq!(stats.dropped_deliveries, 0);
        assert_eq!(stats.active_rooms, 1);
        assert_eq!(stats.active_connections, 2);
    }

    #[test]
    fn test_dropped_delivery_counted() {
        let b = RoomBroadcaster::new();
        let (a, rx_a) = attach(&b);
        drop(rx_a); // receiver gone, sends will fail

        b.join(a, "d1", IdentityHints::with_user_id("u1"));
        let stats = b.stats();
        assert_eq!(stats.dropped_deliveries, 1);
    }
}

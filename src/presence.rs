//! Client-side presence aggregation.
//!
//! The aggregator folds the inbound event stream into a per-diagram
//! roster the embedding UI can render directly:
//!
//! ```text
//! PresenceEvent stream ──► PresenceAggregator ──► roster(): Vec<PresenceUser>
//!                               │    ▲
//!                        ClientIntent│ activity / editing signals
//!                           (out)    │ (IdleTracker)
//! ```
//!
//! Events scoped to a diagram other than the active one are dropped on
//! arrival, so a late cursor event from a previously viewed diagram can
//! never pollute the current roster. The local user is inserted
//! optimistically and is always present in the merged roster; remote
//! entries exist only while the server says so.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::protocol::{
    ChangeKind, ClientIdentity, ClientIntent, CursorPosition, PresenceColor, PresenceEvent,
};

/// Minimum interval between outgoing cursor intents (30 fps).
const CURSOR_MIN_INTERVAL: Duration = Duration::from_millis(33);

/// Derived activity status shown next to a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PresenceStatus {
    Online,
    Editing,
    Idle,
}

/// Kinds of local input that count as activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivityKind {
    PointerMove,
    KeyPress,
    Click,
    Scroll,
}

/// One entry in the rendered roster.
///
/// Serializable so the embedding UI layer can ship it across whatever
/// boundary it renders from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresenceUser {
    pub id: String,
    pub name: String,
    pub color: PresenceColor,
    pub avatar_url: Option<String>,
    pub status: PresenceStatus,
    /// Last known cursor position (remote users only).
    pub cursor: Option<CursorPosition>,
}

// ─── Idle tracking ──────────────────────────────────────────────────────

/// Tracks the local user's activity status.
///
/// Poll-based: status is recomputed from timestamps on read, so there is
/// no timer callback to leak or cancel. Activity signals are debounced —
/// a signal within the debounce window of the previous recorded one does
/// not reset the idle countdown again.
#[derive(Debug)]
pub struct IdleTracker {
    last_activity: Instant,
    editing: bool,
    idle_timeout: Duration,
    debounce: Duration,
}

impl IdleTracker {
    pub fn new() -> Self {
        Self::with_timeouts(Duration::from_secs(60), Duration::from_secs(1))
    }

    /// Custom timeouts, primarily for tests.
    pub fn with_timeouts(idle_timeout: Duration, debounce: Duration) -> Self {
        Self {
            last_activity: Instant::now(),
            editing: false,
            idle_timeout,
            debounce,
        }
    }

    /// Record an activity signal. Signals inside the debounce window are
    /// dropped.
    pub fn record_activity(&mut self, kind: ActivityKind) {
        let now = Instant::now();
        if now.duration_since(self.last_activity) < self.debounce {
            return;
        }
        log::trace!("Activity: {kind:?}");
        self.last_activity = now;
    }

    /// Set or clear the editing flag. Entering editing also counts as
    /// activity.
    pub fn set_editing(&mut self, editing: bool) {
        if editing {
            self.last_activity = Instant::now();
        }
        self.editing = editing;
    }

    pub fn is_editing(&self) -> bool {
        self.editing
    }

    /// Current status, derived from the editing flag and the time since
    /// the last recorded activity.
    pub fn status(&self) -> PresenceStatus {
        if self.editing {
            PresenceStatus::Editing
        } else if self.last_activity.elapsed() >= self.idle_timeout {
            PresenceStatus::Idle
        } else {
            PresenceStatus::Online
        }
    }
}

impl Default for IdleTracker {
    fn default() -> Self {
        Self::new()
    }
}

// ─── Aggregation ────────────────────────────────────────────────────────

/// Per-diagram presence roster for the local client.
///
/// Synchronous and single-owner; the session wraps it in a mutex and
/// feeds it from the connection's event channel.
pub struct PresenceAggregator {
    identity: ClientIdentity,
    active_diagram: Option<String>,
    /// Remote users by user id. Never contains the local user.
    remotes: HashMap<String, PresenceUser>,
    idle: IdleTracker,
    last_cursor_sent: Option<Instant>,
}

impl PresenceAggregator {
    pub fn new(identity: ClientIdentity) -> Self {
        Self {
            identity,
            active_diagram: None,
            remotes: HashMap::new(),
            idle: IdleTracker::new(),
            last_cursor_sent: None,
        }
    }

    /// With a custom idle tracker (shortened timeouts in tests).
    pub fn with_idle_tracker(identity: ClientIdentity, idle: IdleTracker) -> Self {
        Self {
            identity,
            active_diagram: None,
            remotes: HashMap::new(),
            idle,
            last_cursor_sent: None,
        }
    }

    pub fn identity(&self) -> &ClientIdentity {
        &self.identity
    }

    pub fn active_diagram(&self) -> Option<&str> {
        self.active_diagram.as_deref()
    }

    /// Switch the active diagram.
    ///
    /// Returns the intents to emit, in order: a best-effort leave for the
    /// previous diagram, then a join for the new one. The remote roster is
    /// cleared on every switch. Switching to the already active diagram is
    /// a no-op.
    pub fn set_diagram(&mut self, diagram_id: Option<&str>) -> Vec<ClientIntent> {
        if self.active_diagram.as_deref() == diagram_id {
            return Vec::new();
        }

        let mut intents = Vec::new();
        if let Some(old) = self.active_diagram.take() {
            intents.push(ClientIntent::leave(old, &self.identity));
        }

        self.remotes.clear();
        self.last_cursor_sent = None;

        if let Some(new) = diagram_id {
            log::debug!("Switching active diagram to {new}");
            self.active_diagram = Some(new.to_string());
            intents.push(ClientIntent::join(new, &self.identity));
        }

        intents
    }

    /// The join intent for the active diagram, if any. Emitted again after
    /// a reconnection so the server's fresh connection regains membership.
    pub fn rejoin_intent(&self) -> Option<ClientIntent> {
        self.active_diagram
            .as_deref()
            .map(|diagram| ClientIntent::join(diagram, &self.identity))
    }

    /// Merge one inbound event into the roster. Returns whether the
    /// roster changed.
    pub fn handle_event(&mut self, event: &PresenceEvent) -> bool {
        let Some(active) = self.active_diagram.as_deref() else {
            return false;
        };
        if event.diagram_id() != active {
            // Late event from a previously viewed diagram.
            log::trace!(
                "Ignoring event for {} while viewing {active}",
                event.diagram_id()
            );
            return false;
        }
        if event.user_id() == self.identity.id {
            // Own events echo back for joins; the local entry is
            // maintained from the identity, not from the wire.
            return false;
        }

        match event {
            PresenceEvent::Joined {
                user_id,
                display_name,
                color,
                avatar_url,
                ..
            } => {
                log::debug!("{display_name} ({user_id}) joined");
                self.remotes.insert(
                    user_id.clone(),
                    PresenceUser {
                        id: user_id.clone(),
                        name: display_name.clone(),
                        color: *color,
                        avatar_url: avatar_url.clone(),
                        status: PresenceStatus::Online,
                        cursor: None,
                    },
                );
                true
            }

            PresenceEvent::Left { user_id, .. } => {
                let removed = self.remotes.remove(user_id).is_some();
                if removed {
                    log::debug!("{user_id} left");
                }
                removed
            }

            PresenceEvent::CursorMoved { user_id, position, .. } => {
                // A cursor can arrive before the join when this client
                // connected mid-session; show a placeholder until the
                // proper identity arrives.
                let entry = self.remotes.entry(user_id.clone()).or_insert_with(|| {
                    let short: String = user_id.chars().take(8).collect();
                    PresenceUser {
                        id: user_id.clone(),
                        name: format!("Peer-{short}"),
                        color: PresenceColor::from_id(user_id),
                        avatar_url: None,
                        status: PresenceStatus::Online,
                        cursor: None,
                    }
                });
                entry.cursor = Some(*position);
                true
            }

            PresenceEvent::DiagramChanged { .. } => false,
        }
    }

    /// Current roster: the local user first, remote users sorted by id.
    pub fn roster(&self) -> Vec<PresenceUser> {
        let mut users = Vec::with_capacity(1 + self.remotes.len());
        users.push(PresenceUser {
            id: self.identity.id.clone(),
            name: self.identity.display_name.clone(),
            color: self.identity.color,
            avatar_url: self.identity.avatar_url.clone(),
            status: self.idle.status(),
            cursor: None,
        });

        let mut remotes: Vec<_> = self.remotes.values().cloned().collect();
        remotes.sort_by(|a, b| a.id.cmp(&b.id));
        users.extend(remotes);
        users
    }

    /// Number of users in the roster (local user included).
    pub fn user_count(&self) -> usize {
        1 + self.remotes.len()
    }

    /// Produce a cursor intent for a local pointer move, throttled to
    /// 30 fps. Returns `None` when throttled or no diagram is active.
    pub fn update_local_cursor(&mut self, position: CursorPosition) -> Option<ClientIntent> {
        self.idle.record_activity(ActivityKind::PointerMove);

        let diagram = self.active_diagram.as_deref()?;
        if let Some(last) = self.last_cursor_sent {
            if last.elapsed() < CURSOR_MIN_INTERVAL {
                return None;
            }
        }
        self.last_cursor_sent = Some(Instant::now());
        Some(ClientIntent::cursor_move(diagram, position, &self.identity))
    }

    /// Produce a change-notification intent for a local edit.
    pub fn notify_change(&mut self, change: ChangeKind) -> Option<ClientIntent> {
        let diagram = self.active_diagram.as_deref()?;
        Some(ClientIntent::diagram_change(diagram, change, &self.identity))
    }

    pub fn record_activity(&mut self, kind: ActivityKind) {
        self.idle.record_activity(kind);
    }

    pub fn set_editing(&mut self, editing: bool) {
        self.idle.set_editing(editing);
    }

    pub fn local_status(&self) -> PresenceStatus {
        self.idle.status()
    }
}

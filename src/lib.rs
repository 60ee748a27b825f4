//! # vellum-collab — Realtime presence layer for Vellum
//!
//! Provides WebSocket-based multiplayer presence for the diagram editor:
//! who is viewing a diagram, where their cursors are, and when the
//! diagram changed under you.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────┐     WebSocket      ┌─────────────────┐
//! │ CollabSession    │ ◄─────────────────► │ PresenceServer  │
//! │ (per client)     │     Binary Proto    │ (central)       │
//! └──────┬───────────┘                     └──────┬──────────┘
//!        │                                        │
//!        ▼                                        ▼
//! ┌──────────────────┐                    ┌─────────────────┐
//! │ ConnectionManager│                    │ RoomBroadcaster │
//! │ + reconnection   │                    │ (room fan-out)  │
//! └──────┬───────────┘                    └─────────────────┘
//!        │
//!        ▼
//! ┌──────────────────┐
//! │ PresenceAggreg.  │
//! │ (roster + idle)  │
//! └──────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`] — Binary wire protocol (bincode-encoded intents/events)
//! - [`broadcast`] — Room-scoped fan-out with membership tracking
//! - [`server`] — WebSocket presence server
//! - [`client`] — Connection manager with bounded-backoff reconnection
//! - [`presence`] — Roster aggregation and idle tracking
//! - [`session`] — Client-side composition root
//!
//! Presence is best-effort by design: nothing here is persisted, queued,
//! or retried beyond reconnection, and a lost cursor update is simply
//! superseded by the next one.

pub mod protocol;
pub mod broadcast;
pub mod server;
pub mod client;
pub mod presence;
pub mod session;

// Re-exports for convenience
pub use protocol::{
    ChangeKind, ClientIdentity, ClientIntent, CursorPosition, PresenceColor, PresenceEvent,
    ProtocolError,
};
pub use broadcast::{BroadcastStats, IdentityHints, RoomBroadcaster};
pub use server::{PresenceServer, ServerConfig, ServerStats};
pub use client::{
    ClientEvent, ConnectionConfig, ConnectionManager, ConnectionState, StateSubscription,
};
pub use presence::{
    ActivityKind, IdleTracker, PresenceAggregator, PresenceStatus, PresenceUser,
};
pub use session::CollabSession;

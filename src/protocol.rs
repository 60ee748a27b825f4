//! Wire protocol for presence synchronization.
//!
//! Two tagged unions cross the wire, both bincode-encoded:
//!
//! ```text
//! client ──► server   ClientIntent   (join / leave / cursor-move / diagram-change)
//! server ──► clients  PresenceEvent  (joined / left / cursor-moved / diagram-changed)
//! ```
//!
//! Client intents carry *optional* identity fields; the server resolves
//! missing ones in a single step at the broadcaster boundary (anonymous
//! display name, connection id as user id, color derived from the id).
//! Presence events always carry fully resolved identities.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 2D cursor position in diagram (canvas) coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CursorPosition {
    pub x: f32,
    pub y: f32,
}

impl CursorPosition {
    pub const ORIGIN: CursorPosition = CursorPosition { x: 0.0, y: 0.0 };

    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

impl Default for CursorPosition {
    fn default() -> Self {
        Self::ORIGIN
    }
}

/// What part of a diagram a change notification refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeKind {
    Content,
    Title,
    Metadata,
}

/// RGBA color used for cursor and avatar-ring rendering.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PresenceColor {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl PresenceColor {
    /// Derive a stable, visually distinct color from an identifier.
    ///
    /// Hashes the identifier with FNV-1a (explicit, so client and server
    /// agree across processes and platforms) and maps the hash to an HSL
    /// hue with fixed saturation/lightness. A given id always renders the
    /// same color across sessions without coordination.
    pub fn from_id(id: &str) -> Self {
        let hash = fnv1a64(id.as_bytes());
        let hue = ((hash % 360) as f32) / 360.0;
        let (r, g, b) = hsl_to_rgb(hue, 0.7, 0.6);
        Self { r, g, b, a: 1.0 }
    }

    /// Convert to an `[f32; 4]` array for the embedding renderer.
    pub fn to_array(&self) -> [f32; 4] {
        [self.r, self.g, self.b, self.a]
    }

    pub fn rgba(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self { r, g, b, a }
    }
}

impl Default for PresenceColor {
    fn default() -> Self {
        Self { r: 0.26, g: 0.52, b: 0.96, a: 1.0 } // Default blue
    }
}

/// FNV-1a 64-bit hash.
///
/// Chosen over the stdlib hasher because the derived hue must be identical
/// in every process that renders the same identifier.
fn fnv1a64(bytes: &[u8]) -> u64 {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;
    let mut hash = OFFSET;
    for &b in bytes {
        hash ^= b as u64;
        hash = hash.wrapping_mul(PRIME);
    }
    hash
}

/// HSL to RGB conversion helper.
fn hsl_to_rgb(h: f32, s: f32, l: f32) -> (f32, f32, f32) {
    if s == 0.0 {
        return (l, l, l); // Achromatic
    }

    let q = if l < 0.5 {
        l * (1.0 + s)
    } else {
        l + s - l * s
    };
    let p = 2.0 * l - q;

    let r = hue_to_rgb(p, q, h + 1.0 / 3.0);
    let g = hue_to_rgb(p, q, h);
    let b = hue_to_rgb(p, q, h - 1.0 / 3.0);

    (r, g, b)
}

fn hue_to_rgb(p: f32, q: f32, mut t: f32) -> f32 {
    if t < 0.0 { t += 1.0; }
    if t > 1.0 { t -= 1.0; }
    if t < 1.0 / 6.0 {
        return p + (q - p) * 6.0 * t;
    }
    if t < 1.0 / 2.0 {
        return q;
    }
    if t < 2.0 / 3.0 {
        return p + (q - p) * (2.0 / 3.0 - t) * 6.0;
    }
    p
}

/// Local user identity, supplied by the embedding application.
///
/// Immutable for the lifetime of a session. The id is either an externally
/// issued identifier or a generated anonymous one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientIdentity {
    pub id: String,
    pub display_name: String,
    pub color: PresenceColor,
    pub avatar_url: Option<String>,
}

impl ClientIdentity {
    /// Create an identity with a color derived from the id.
    pub fn new(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        let id = id.into();
        let color = PresenceColor::from_id(&id);
        Self {
            id,
            display_name: display_name.into(),
            color,
            avatar_url: None,
        }
    }

    /// Generate an anonymous identity with a fresh random id.
    pub fn anonymous() -> Self {
        let id = format!("anon-{}", &Uuid::new_v4().simple().to_string()[..8]);
        let color = PresenceColor::from_id(&id);
        Self {
            id,
            display_name: "Anonymous".to_string(),
            color,
            avatar_url: None,
        }
    }

    pub fn with_avatar(mut self, url: impl Into<String>) -> Self {
        self.avatar_url = Some(url.into());
        self
    }
}

/// Client → server intent.
///
/// Identity fields are optional on the wire; the broadcaster substitutes
/// defaults rather than rejecting incomplete payloads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ClientIntent {
    /// Start viewing a diagram.
    Join {
        diagram_id: String,
        user_id: Option<String>,
        display_name: Option<String>,
        color: Option<PresenceColor>,
        avatar_url: Option<String>,
    },

    /// Stop viewing a diagram (clean leave).
    Leave {
        diagram_id: String,
        user_id: Option<String>,
    },

    /// Cursor moved inside the diagram canvas (high frequency, throttled
    /// client-side to 30fps).
    CursorMove {
        diagram_id: String,
        position: CursorPosition,
        user_id: Option<String>,
    },

    /// The diagram itself was edited.
    DiagramChange {
        diagram_id: String,
        change: ChangeKind,
        user_id: Option<String>,
    },
}

impl ClientIntent {
    /// Build a join intent carrying the full local identity.
    pub fn join(diagram_id: impl Into<String>, identity: &ClientIdentity) -> Self {
        Self::Join {
            diagram_id: diagram_id.into(),
            user_id: Some(identity.id.clone()),
            display_name: Some(identity.display_name.clone()),
            color: Some(identity.color),
            avatar_url: identity.avatar_url.clone(),
        }
    }

    pub fn leave(diagram_id: impl Into<String>, identity: &ClientIdentity) -> Self {
        Self::Leave {
            diagram_id: diagram_id.into(),
            user_id: Some(identity.id.clone()),
        }
    }

    pub fn cursor_move(
        diagram_id: impl Into<String>,
        position: CursorPosition,
        identity: &ClientIdentity,
    ) -> Self {
        Self::CursorMove {
            diagram_id: diagram_id.into(),
            position,
            user_id: Some(identity.id.clone()),
        }
    }

    pub fn diagram_change(
        diagram_id: impl Into<String>,
        change: ChangeKind,
        identity: &ClientIdentity,
    ) -> Self {
        Self::DiagramChange {
            diagram_id: diagram_id.into(),
            change,
            user_id: Some(identity.id.clone()),
        }
    }

    /// Diagram the intent is scoped to.
    pub fn diagram_id(&self) -> &str {
        match self {
            Self::Join { diagram_id, .. }
            | Self::Leave { diagram_id, .. }
            | Self::CursorMove { diagram_id, .. }
            | Self::DiagramChange { diagram_id, .. } => diagram_id,
        }
    }

    /// Serialize to the binary wire format.
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| ProtocolError::SerializationError(e.to_string()))
    }

    /// Deserialize from the binary wire format.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let (intent, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| ProtocolError::DeserializationError(e.to_string()))?;
        Ok(intent)
    }
}

/// Server → clients presence event.
///
/// Transient; never persisted. Identities are fully resolved by the time
/// an event is broadcast.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PresenceEvent {
    /// A user started viewing the diagram (sent to the whole room,
    /// sender included, so the sender's own UI can confirm the join).
    Joined {
        user_id: String,
        diagram_id: String,
        display_name: String,
        color: PresenceColor,
        avatar_url: Option<String>,
    },

    /// A user stopped viewing the diagram (clean leave or disconnect).
    Left {
        user_id: String,
        diagram_id: String,
    },

    /// A user's cursor moved (sent to everyone except the sender).
    CursorMoved {
        user_id: String,
        diagram_id: String,
        position: CursorPosition,
    },

    /// A user edited the diagram (sent to everyone except the sender).
    DiagramChanged {
        user_id: String,
        diagram_id: String,
        change: ChangeKind,
    },
}

impl PresenceEvent {
    pub fn user_id(&self) -> &str {
        match self {
            Self::Joined { user_id, .. }
            | Self::Left { user_id, .. }
            | Self::CursorMoved { user_id, .. }
            | Self::DiagramChanged { user_id, .. } => user_id,
        }
    }

    pub fn diagram_id(&self) -> &str {
        match self {
            Self::Joined { diagram_id, .. }
            | Self::Left { diagram_id, .. }
            | Self::CursorMoved { diagram_id, .. }
            | Self::DiagramChanged { diagram_id, .. } => diagram_id,
        }
    }

    /// Serialize to the binary wire format.
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| ProtocolError::SerializationError(e.to_string()))
    }

    /// Deserialize from the binary wire format.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let (event, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| ProtocolError::DeserializationError(e.to_string()))?;
        Ok(event)
    }
}

/// Protocol errors.
#[derive(Debug, Clone)]
pub enum ProtocolError {
    SerializationError(String),
    DeserializationError(String),
    ConnectionClosed,
    Timeout,
}

impl std::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SerializationError(e) => write!(f, "Serialization error: {e}"),
            Self::DeserializationError(e) => write!(f, "Deserialization error: {e}"),
            Self::ConnectionClosed => write!(f, "Connection closed"),
            Self::Timeout => write!(f, "Connection timeout"),
        }
    }
}

impl std::error::Error for ProtocolError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_intent_roundtrip() {
        let identity = ClientIdentity::new("u1", "Alice");
        let intent = ClientIntent::join("d1", &identity);

        let encoded = intent.encode().unwrap();
        let decoded = ClientIntent::decode(&encoded).unwrap();

        assert_eq!(decoded, intent);
        assert_eq!(decoded.diagram_id(), "d1");
    }

    #[test]
    fn test_cursor_intent_roundtrip() {
        let identity = ClientIdentity::new("u1", "Alice");
        let intent = ClientIntent::cursor_move("d1", CursorPosition::new(150.5, 200.3), &identity);

        let encoded = intent.encode().unwrap();
        let decoded = ClientIntent::decode(&encoded).unwrap();
        assert_eq!(decoded, intent);
    }

    #[test]
    fn test_intent_with_missing_identity_fields() {
        // A bare join with no identity must survive the codec — the
        // broadcaster fills in the defaults, not the client.
        let intent = ClientIntent::Join {
            diagram_id: "d1".into(),
            user_id: None,
            display_name: None,
            color: None,
            avatar_url: None,
        };

        let encoded = intent.encode().unwrap();
        let decoded = ClientIntent::decode(&encoded).unwrap();
        assert_eq!(decoded, intent);
    }

    #[test]
    fn test_presence_event_roundtrip() {
        let event = PresenceEvent::Joined {
            user_id: "u1".into(),
            diagram_id: "d1".into(),
            display_name: "Alice".into(),
            color: PresenceColor::from_id("u1"),
            avatar_url: None,
        };

        let encoded = event.encode().unwrap();
        let decoded = PresenceEvent::decode(&encoded).unwrap();

        assert_eq!(decoded, event);
        assert_eq!(decoded.user_id(), "u1");
        assert_eq!(decoded.diagram_id(), "d1");
    }

    #[test]
    fn test_cursor_event_size_efficient() {
        let event = PresenceEvent::CursorMoved {
            user_id: "u1".into(),
            diagram_id: "flowchart-main".into(),
            position: CursorPosition::new(100.0, 200.0),
        };
        let encoded = event.encode().unwrap();
        // Cursor events are the hot path; keep them compact.
        assert!(encoded.len() < 64, "Cursor event too large: {} bytes", encoded.len());
    }

    #[test]
    fn test_decode_invalid_bytes() {
        let garbage = vec![0xFF, 0xFE, 0xFD];
        assert!(ClientIntent::decode(&garbage).is_err());
        assert!(PresenceEvent::decode(&garbage).is_err());
    }

    #[test]
    fn test_color_stable_across_calls() {
        let c1 = PresenceColor::from_id("user-42");
        let c2 = PresenceColor::from_id("user-42");
        assert_eq!(c1, c2);
    }

    #[test]
    fn test_color_components_valid() {
        for id in ["u1", "u2", "a-much-longer-identifier", ""] {
            let c = PresenceColor::from_id(id);
            assert!(c.r >= 0.0 && c.r <= 1.0);
            assert!(c.g >= 0.0 && c.g <= 1.0);
            assert!(c.b >= 0.0 && c.b <= 1.0);
            assert_eq!(c.a, 1.0);
        }
    }

    #[test]
    fn test_fnv1a64_known_values() {
        // Reference vectors for the FNV-1a 64 parameters.
        assert_eq!(fnv1a64(b""), 0xcbf2_9ce4_8422_2325);
        assert_eq!(fnv1a64(b"a"), 0xaf63_dc4c_8601_ec8c);
    }

    #[test]
    fn test_hsl_to_rgb_red() {
        let (r, g, b) = hsl_to_rgb(0.0, 1.0, 0.5);
        assert!((r - 1.0).abs() < 0.01);
        assert!(g.abs() < 0.01);
        assert!(b.abs() < 0.01);
    }

    #[test]
    fn test_hsl_to_rgb_achromatic() {
        let (r, g, b) = hsl_to_rgb(0.0, 0.0, 0.5);
        assert!((r - 0.5).abs() < 0.01);
        assert!((g - 0.5).abs() < 0.01);
        assert!((b - 0.5).abs() < 0.01);
    }

    #[test]
    fn test_anonymous_identity() {
        let a = ClientIdentity::anonymous();
        let b = ClientIdentity::anonymous();

        assert!(a.id.starts_with("anon-"));
        assert_eq!(a.display_name, "Anonymous");
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_identity_color_derived_from_id() {
        let identity = ClientIdentity::new("u1", "Alice");
        assert_eq!(identity.color, PresenceColor::from_id("u1"));
    }

    #[test]
    fn test_identity_with_avatar() {
        let identity = ClientIdentity::new("u1", "Alice").with_avatar("https://example/a.png");
        assert_eq!(identity.avatar_url.as_deref(), Some("https://example/a.png"));
    }

    #[test]
    fn test_change_kind_variants_roundtrip() {
        let identity = ClientIdentity::new("u1", "Alice");
        for change in [ChangeKind::Content, ChangeKind::Title, ChangeKind::Metadata] {
            let intent = ClientIntent::diagram_change("d1", change, &identity);
            let decoded = ClientIntent::decode(&intent.encode().unwrap()).unwrap();
            assert_eq!(decoded, intent);
        }
    }
}

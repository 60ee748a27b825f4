//! WebSocket presence server.
//!
//! Architecture:
//! ```text
//! Client A ──┐
//!             ├── accept loop ── per-connection task ── RoomBroadcaster
//! Client B ──┘                        │                      │
//!                              decode ClientIntent      room fan-out
//!                                     │                      │
//!                                     ▼                      ▼
//!                              join / leave /         per-connection
//!                              cursor / change            outboxes
//! ```
//!
//! Each connection gets one reader loop and one writer task; the writer
//! drains the connection's outbox so broadcaster fan-out never blocks on
//! a slow socket. The reader loop never aborts on a malformed frame —
//! presence degrades, it does not crash the host.

use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::RwLock;
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::Message;
use uuid::Uuid;

use crate::broadcast::{IdentityHints, RoomBroadcaster};
use crate::protocol::ClientIntent;

/// Server configuration. Construction-time only.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:9090".to_string(),
        }
    }
}

/// Server statistics.
#[derive(Debug, Clone, Default)]
pub struct ServerStats {
    pub total_connections: u64,
    pub active_connections: u64,
    pub total_events: u64,
    pub total_bytes: u64,
    pub active_rooms: usize,
}

/// The presence server.
pub struct PresenceServer {
    config: ServerConfig,
    broadcaster: Arc<RoomBroadcaster>,
    stats: Arc<RwLock<ServerStats>>,
}

impl PresenceServer {
    /// Create a new presence server with the given configuration.
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            broadcaster: Arc::new(RoomBroadcaster::new()),
            stats: Arc::new(RwLock::new(ServerStats::default())),
        }
    }

    /// Create with default configuration.
    pub fn with_defaults() -> Self {
        Self::new(ServerConfig::default())
    }

    /// Start listening for WebSocket connections.
    ///
    /// This runs the server event loop. Call from an async runtime.
    pub async fn run(&self) -> Result<(), Box<dyn std::error::Error>> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        log::info!("Presence server listening on {}", self.config.bind_addr);

        loop {
            let (stream, addr) = listener.accept().await?;
            log::debug!("New TCP connection from {addr}");

            let broadcaster = self.broadcaster.clone();
            let stats = self.stats.clone();

            tokio::spawn(async move {
                if let Err(e) = Self::handle_connection(stream, addr, broadcaster, stats).await {
                    log::error!("Connection error from {addr}: {e}");
                }
            });
        }
    }

    /// Handle a single WebSocket connection.
    async fn handle_connection(
        stream: TcpStream,
        addr: SocketAddr,
        broadcaster: Arc<RoomBroadcaster>,
        stats: Arc<RwLock<ServerStats>>,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let ws_stream = tokio_tungstenite::accept_async(stream).await?;
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();

        let conn = Uuid::new_v4();
        log::info!("WebSocket connection {conn} established from {addr}");

        {
            let mut s = stats.write().await;
            s.total_connections += 1;
            s.active_connections += 1;
        }

        // Writer task: drain this connection's outbox into the socket.
        let (out_tx, mut out_rx) = tokio::sync::mpsc::unbounded_channel();
        broadcaster.register_connection(conn, out_tx);
        let writer = tokio::spawn(async move {
            while let Some(frame) = out_rx.recv().await {
                let payload: Vec<u8> = frame.as_ref().clone();
                if ws_sender.send(Message::Binary(payload.into())).await.is_err() {
                    break;
                }
            }
        });

        // Reader loop: decode intents and dispatch to the broadcaster.
        while let Some(msg) = ws_receiver.next().await {
            match msg {
                Ok(Message::Binary(data)) => {
                    let bytes: Vec<u8> = data.into();
                    let intent = match ClientIntent::decode(&bytes) {
                        Ok(intent) => intent,
                        Err(e) => {
                            log::warn!("Failed to decode intent from {addr}: {e}");
                            continue;
                        }
                    };

                    {
                        let mut s = stats.write().await;
                        s.total_events += 1;
                        s.total_bytes += bytes.len() as u64;
                    }

                    match intent {
                        ClientIntent::Join {
                            diagram_id,
                            user_id,
                            display_name,
                            color,
                            avatar_url,
                        } => {
                            broadcaster.join(
                                conn,
                                &diagram_id,
                                IdentityHints { user_id, display_name, color, avatar_url },
                            );
                            let mut s = stats.write().await;
                            s.active_rooms = broadcaster.room_count();
                        }

                        ClientIntent::Leave { diagram_id, user_id } => {
                            broadcaster.leave(
                                conn,
                                &diagram_id,
                                IdentityHints { user_id, ..IdentityHints::default() },
                            );
                            let mut s = stats.write().await;
                            s.active_rooms = broadcaster.room_count();
                        }

                        ClientIntent::CursorMove { diagram_id, position, user_id } => {
                            broadcaster.move_cursor(
                                conn,
                                &diagram_id,
                                position,
                                IdentityHints { user_id, ..IdentityHints::default() },
                            );
                        }

                        ClientIntent::DiagramChange { diagram_id, change, user_id } => {
                            broadcaster.notify_change(
                                conn,
                                &diagram_id,
                                change,
                                IdentityHints { user_id, ..IdentityHints::default() },
                            );
                        }
                    }
                }

                Ok(Message::Close(_)) => {
                    log::info!("Connection {conn} closed from {addr}");
                    break;
                }

                Err(e) => {
                    log::warn!("WebSocket error from {addr}: {e}");
                    break;
                }

                _ => {}
            }
        }

        // Exactly-once cleanup: one Left per joined room, then the
        // connection's membership and outbox entries disappear.
        broadcaster.on_disconnect(conn);
        writer.abort();

        {
            let mut s = stats.write().await;
            s.active_connections -= 1;
            s.active_rooms = broadcaster.room_count();
        }

        Ok(())
    }

    /// Get server statistics.
    pub async fn stats(&self) -> ServerStats {
        self.stats.read().await.clone()
    }

    /// Get the configured bind address.
    pub fn bind_addr(&self) -> &str {
        &self.config.bind_addr
    }

    /// The broadcaster backing this server.
    pub fn broadcaster(&self) -> &Arc<RoomBroadcaster> {
        &self.broadcaster
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_config_default() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_addr, "127.0.0.1:9090");
    }

    #[test]
    fn test_server_creation() {
        let server = PresenceServer::with_defaults();
        assert_eq!(server.bind_addr(), "127.0.0.1:9090");
        assert_eq!(server.broadcaster().room_count(), 0);
    }

    #[test]
    fn test_server_custom_config() {
        let config = ServerConfig {
            bind_addr: "0.0.0.0:8080".to_string(),
        };
        let server = PresenceServer::new(config);
        assert_eq!(server.bind_addr(), "0.0.0.0:8080");
    }

    #[tokio::test]
    async fn test_server_stats_initial() {
        let server = PresenceServer::with_defaults();
        let stats = server.stats().await;
        assert_eq!(stats.total_connections, 0);
        assert_eq!(stats.active_connections, 0);
        assert_eq!(stats.total_events, 0);
        assert_eq!(stats.total_bytes, 0);
        assert_eq!(stats.active_rooms, 0);
    }
}

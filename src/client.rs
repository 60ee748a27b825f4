//! Client-side connection manager.
//!
//! Maintains exactly one logical connection per client process and
//! exposes a stable state machine regardless of transport churn:
//!
//! ```text
//! Disconnected ──connect()──► Connecting ──success──► Connected
//!       ▲                         │                      │
//!       │                       error                    │ close frame ──► one scheduled
//!       │                         ▼                      │                 reconnect (fixed delay)
//!       └────disconnect()──── Error ◄──backoff exhausted─┤
//!                                 │                      │ stream error ──► bounded exponential
//!                                 └──reconnect success───┘                  backoff
//! ```
//!
//! `emit` is a guarded send: intents are dropped silently while not
//! connected — presence is best-effort by design, callers never block or
//! queue on it. Re-establishing room membership after a reconnect is the
//! presence aggregator's job, not the manager's.
//!
//! A generation counter invalidates reader tasks and pending reconnect
//! timers from superseded connections, so a stale callback can never
//! resurrect state after `disconnect()` or a newer `connect()`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use futures_util::future::BoxFuture;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;

use crate::protocol::{ClientIntent, PresenceEvent, ProtocolError};

/// Connection configuration. Construction-time parameters, not runtime
/// mutable state.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// WebSocket server URL, e.g. `ws://127.0.0.1:9090`.
    pub server_url: String,
    /// Maximum reconnection attempts after transport loss.
    pub max_reconnect_attempts: u32,
    /// Base delay between reconnection attempts.
    pub base_reconnect_delay: Duration,
    /// Ceiling on the exponential backoff delay.
    pub max_reconnect_delay: Duration,
    /// Timeout for the initial WebSocket handshake.
    pub connect_timeout: Duration,
}

impl ConnectionConfig {
    pub fn new(server_url: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
            max_reconnect_attempts: 5,
            base_reconnect_delay: Duration::from_millis(1000),
            max_reconnect_delay: Duration::from_millis(5000),
            connect_timeout: Duration::from_millis(20000),
        }
    }
}

/// Connection state. Owned solely by the manager; transitions drive all
/// downstream behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Error,
}

/// Events delivered on the manager's event channel.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// The connection state changed.
    StateChanged(ConnectionState),
    /// A presence event arrived from the server.
    Inbound(PresenceEvent),
}

type StateListener = Box<dyn Fn(ConnectionState) + Send + Sync>;

/// Handle returned by [`ConnectionManager::subscribe`]; call
/// [`unsubscribe`](Self::unsubscribe) to remove the listener.
pub struct StateSubscription {
    id: u64,
    shared: Weak<ManagerShared>,
}

impl StateSubscription {
    pub fn unsubscribe(self) {
        if let Some(shared) = self.shared.upgrade() {
            shared
                .listeners
                .lock()
                .expect("listener set poisoned")
                .remove(&self.id);
        }
    }
}

struct ManagerShared {
    config: ConnectionConfig,
    state: Mutex<ConnectionState>,
    listeners: Mutex<HashMap<u64, StateListener>>,
    next_listener_id: AtomicU64,
    /// Bumped by connect()/disconnect(); tasks from older generations
    /// must not mutate state.
    generation: AtomicU64,
    outgoing: Mutex<Option<mpsc::UnboundedSender<Vec<u8>>>>,
    event_tx: mpsc::UnboundedSender<ClientEvent>,
    reconnect: Mutex<Option<JoinHandle<()>>>,
    /// Reader task of the live connection; aborted on disconnect so the
    /// read half drops and the socket actually closes.
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl ManagerShared {
    /// Apply a state transition and notify listeners synchronously.
    ///
    /// Listeners run while the set is locked; they must not subscribe or
    /// unsubscribe reentrantly.
    fn set_state(&self, new: ConnectionState) {
        {
            let mut state = self.state.lock().expect("connection state poisoned");
            if *state == new {
                return;
            }
            *state = new;
        }
        log::debug!("Connection state → {new:?}");
        let _ = self.event_tx.send(ClientEvent::StateChanged(new));
        let listeners = self.listeners.lock().expect("listener set poisoned");
        for listener in listeners.values() {
            listener(new);
        }
    }

    fn current_state(&self) -> ConnectionState {
        *self.state.lock().expect("connection state poisoned")
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    /// Establish one physical connection and spawn its writer/reader
    /// tasks. Boxed because the reader schedules reconnects that call
    /// back into `establish`.
    fn establish(shared: Arc<ManagerShared>) -> BoxFuture<'static, Result<(), ProtocolError>> {
        Box::pin(async move {
            let generation = shared.generation.load(Ordering::SeqCst);
            shared.set_state(ConnectionState::Connecting);

            let connect = tokio_tungstenite::connect_async(&shared.config.server_url);
            let ws_stream = match tokio::time::timeout(shared.config.connect_timeout, connect).await
            {
                Ok(Ok((ws, _))) => ws,
                Ok(Err(e)) => {
                    log::warn!("Connect to {} failed: {e}", shared.config.server_url);
                    if shared.is_current(generation) {
                        shared.set_state(ConnectionState::Error);
                    }
                    return Err(ProtocolError::ConnectionClosed);
                }
                Err(_) => {
                    log::warn!("Connect to {} timed out", shared.config.server_url);
                    if shared.is_current(generation) {
                        shared.set_state(ConnectionState::Error);
                    }
                    return Err(ProtocolError::Timeout);
                }
            };

            if !shared.is_current(generation) {
                // Superseded by disconnect() or a newer connect() while the
                // handshake was in flight; drop the socket silently.
                return Err(ProtocolError::ConnectionClosed);
            }

            let (mut ws_writer, mut ws_reader) = ws_stream.split();

            // Writer task: forward the outgoing channel to the socket.
            let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Vec<u8>>();
            *shared.outgoing.lock().expect("outgoing slot poisoned") = Some(out_tx);
            tokio::spawn(async move {
                while let Some(data) = out_rx.recv().await {
                    if ws_writer.send(Message::Binary(data.into())).await.is_err() {
                        break;
                    }
                }
            });

            shared.set_state(ConnectionState::Connected);

            // Reader task: decode inbound events until the connection ends,
            // then classify the ending and schedule recovery.
            let reader_shared = shared.clone();
            let reader = tokio::spawn(async move {
                let mut server_closed = false;
                while let Some(msg) = ws_reader.next().await {
                    match msg {
                        Ok(Message::Binary(data)) => {
                            let bytes: Vec<u8> = data.into();
                            match PresenceEvent::decode(&bytes) {
                                Ok(event) => {
                                    let _ = reader_shared
                                        .event_tx
                                        .send(ClientEvent::Inbound(event));
                                }
                                Err(e) => {
                                    log::warn!("Failed to decode server event: {e}");
                                }
                            }
                        }
                        Ok(Message::Close(_)) => {
                            server_closed = true;
                            break;
                        }
                        Err(e) => {
                            log::warn!("Transport error: {e}");
                            break;
                        }
                        _ => {}
                    }
                }

                if !reader_shared.is_current(generation) {
                    return; // superseded; a newer connection owns the state
                }

                *reader_shared
                    .outgoing
                    .lock()
                    .expect("outgoing slot poisoned") = None;
                reader_shared.set_state(ConnectionState::Disconnected);

                if server_closed {
                    ManagerShared::schedule_forced_reconnect(reader_shared, generation);
                } else {
                    ManagerShared::schedule_backoff_reconnect(reader_shared, generation);
                }
            });
            *shared.reader.lock().expect("reader slot poisoned") = Some(reader);

            Ok(())
        })
    }

    /// Server sent a Close frame: exactly one reconnection attempt after
    /// the fixed base delay.
    fn schedule_forced_reconnect(shared: Arc<ManagerShared>, generation: u64) {
        let handle = tokio::spawn({
            let shared = shared.clone();
            async move {
                tokio::time::sleep(shared.config.base_reconnect_delay).await;
                if !shared.is_current(generation) {
                    return;
                }
                log::info!("Reconnecting after server-initiated close");
                let _ = ManagerShared::establish(shared).await;
            }
        });
        *shared.reconnect.lock().expect("reconnect slot poisoned") = Some(handle);
    }

    /// Transport loss: exponential backoff bounded by attempt count and
    /// delay ceiling. On the last failed attempt the state is left at
    /// `Error` by `establish`.
    fn schedule_backoff_reconnect(shared: Arc<ManagerShared>, generation: u64) {
        let handle = tokio::spawn({
            let shared = shared.clone();
            async move {
                for attempt in 1..=shared.config.max_reconnect_attempts {
                    tokio::time::sleep(backoff_delay(&shared.config, attempt)).await;
                    if !shared.is_current(generation) {
                        return;
                    }
                    log::info!(
                        "Reconnect attempt {attempt}/{}",
                        shared.config.max_reconnect_attempts
                    );
                    if ManagerShared::establish(shared.clone()).await.is_ok() {
                        return;
                    }
                }
                log::warn!("Reconnect attempts exhausted");
            }
        });
        *shared.reconnect.lock().expect("reconnect slot poisoned") = Some(handle);
    }
}

/// Delay before reconnection attempt `n` (1-based):
/// `min(base · 2^(n−1), max_delay)`.
fn backoff_delay(config: &ConnectionConfig, attempt: u32) -> Duration {
    let shift = (attempt - 1).min(16);
    config
        .base_reconnect_delay
        .saturating_mul(1u32 << shift)
        .min(config.max_reconnect_delay)
}

/// The connection manager.
///
/// One instance per client process, constructed by the application root
/// and threaded to consumers (no module-level singleton).
pub struct ConnectionManager {
    shared: Arc<ManagerShared>,
    event_rx: Mutex<Option<mpsc::UnboundedReceiver<ClientEvent>>>,
}

impl ConnectionManager {
    pub fn new(config: ConnectionConfig) -> Self {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        Self {
            shared: Arc::new(ManagerShared {
                config,
                state: Mutex::new(ConnectionState::Disconnected),
                listeners: Mutex::new(HashMap::new()),
                next_listener_id: AtomicU64::new(0),
                generation: AtomicU64::new(0),
                outgoing: Mutex::new(None),
                event_tx,
                reconnect: Mutex::new(None),
                reader: Mutex::new(None),
            }),
            event_rx: Mutex::new(Some(event_rx)),
        }
    }

    /// Take the event receiver (can only be called once).
    pub fn take_event_rx(&self) -> Option<mpsc::UnboundedReceiver<ClientEvent>> {
        self.event_rx.lock().expect("event receiver slot poisoned").take()
    }

    /// Connect to the server. Idempotent: a no-op while already connected.
    pub async fn connect(&self) -> Result<(), ProtocolError> {
        if self.state() == ConnectionState::Connected {
            return Ok(());
        }
        self.cancel_reconnect();
        self.shared.generation.fetch_add(1, Ordering::SeqCst);
        ManagerShared::establish(self.shared.clone()).await
    }

    /// Tear down the connection. Terminal until `connect()` is called
    /// again; cancels any pending reconnection timer.
    pub fn disconnect(&self) {
        self.shared.generation.fetch_add(1, Ordering::SeqCst);
        self.cancel_reconnect();
        // Dropping both halves closes the socket: the writer ends when its
        // channel sender is dropped, the reader is aborted here.
        *self.shared.outgoing.lock().expect("outgoing slot poisoned") = None;
        if let Some(reader) = self
            .shared
            .reader
            .lock()
            .expect("reader slot poisoned")
            .take()
        {
            reader.abort();
        }
        self.shared.set_state(ConnectionState::Disconnected);
    }

    /// Guarded send: dropped silently unless connected. Callers must not
    /// assume delivery — join/leave/cursor intents are best-effort.
    pub fn emit(&self, intent: &ClientIntent) {
        if self.state() != ConnectionState::Connected {
            log::trace!("Dropping intent while not connected");
            return;
        }
        let bytes = match intent.encode() {
            Ok(bytes) => bytes,
            Err(e) => {
                log::warn!("Failed to encode intent: {e}");
                return;
            }
        };
        if let Some(tx) = self
            .shared
            .outgoing
            .lock()
            .expect("outgoing slot poisoned")
            .as_ref()
        {
            let _ = tx.send(bytes);
        }
    }

    /// Current connection state (no replay to new subscribers; read this
    /// at subscription time instead).
    pub fn state(&self) -> ConnectionState {
        self.shared.current_state()
    }

    /// Register a synchronous state-change listener; returns a handle
    /// whose `unsubscribe()` removes it.
    pub fn subscribe<F>(&self, handler: F) -> StateSubscription
    where
        F: Fn(ConnectionState) + Send + Sync + 'static,
    {
        let id = self.shared.next_listener_id.fetch_add(1, Ordering::SeqCst);
        self.shared
            .listeners
            .lock()
            .expect("listener set poisoned")
            .insert(id, Box::new(handler));
        StateSubscription {
            id,
            shared: Arc::downgrade(&self.shared),
        }
    }

    /// The configured server URL.
    pub fn server_url(&self) -> &str {
        &self.shared.config.server_url
    }

    fn cancel_reconnect(&self) {
        if let Some(handle) = self
            .shared
            .reconnect
            .lock()
            .expect("reconnect slot poisoned")
            .take()
        {
            handle.abort();
        }
    }
}

//! The live-reload event room.
//!
//! A room broadcasts events to every open connection and keeps a bounded
//! replay history so a reconnecting client can catch up from its last seen
//! event id. Capacity and closed-room rejections are immediate, never a
//! hang.

use std::collections::VecDeque;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::debug;

/// One event delivered over the reload channel.
///
/// `id` is `None` for synthetic events (`join`, keep-alives) so they never
/// disturb a client's resume position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReloadEvent {
    pub id: Option<u64>,
    pub kind: String,
    pub data: String,
}

impl ReloadEvent {
    pub fn join() -> Self {
        Self {
            id: None,
            kind: "join".to_string(),
            data: String::new(),
        }
    }
}

/// Why a connection attempt was turned away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ConnectRejection {
    /// The room already holds its maximum number of connections.
    #[error("event room is at capacity")]
    AtCapacity,
    /// The room was closed; no further connections are served.
    #[error("event room is closed")]
    Closed,
}

/// Receiving half of one room connection.
#[derive(Debug)]
pub struct RoomConnection {
    receiver: mpsc::UnboundedReceiver<ReloadEvent>,
}

impl RoomConnection {
    pub async fn recv(&mut self) -> Option<ReloadEvent> {
        self.receiver.recv().await
    }

    pub fn into_stream(self) -> UnboundedReceiverStream<ReloadEvent> {
        UnboundedReceiverStream::new(self.receiver)
    }
}

struct RoomState {
    connections: Vec<mpsc::UnboundedSender<ReloadEvent>>,
    history: VecDeque<ReloadEvent>,
    next_event_id: u64,
    closed: bool,
}

/// A broadcast room with bounded history replay.
pub struct EventRoom {
    max_connections: usize,
    history_length: usize,
    state: Mutex<RoomState>,
}

impl EventRoom {
    pub fn new(max_connections: usize, history_length: usize) -> Self {
        Self {
            max_connections,
            history_length,
            state: Mutex::new(RoomState {
                connections: Vec::new(),
                history: VecDeque::new(),
                next_event_id: 1,
                closed: false,
            }),
        }
    }

    /// Opens a connection. The `join` event is always delivered first,
    /// followed by every history entry newer than `last_event_id`.
    pub fn connect(
        &self,
        last_event_id: Option<u64>,
    ) -> Result<RoomConnection, ConnectRejection> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(ConnectRejection::Closed);
        }
        state.connections.retain(|sender| !sender.is_closed());
        if state.connections.len() >= self.max_connections {
            return Err(ConnectRejection::AtCapacity);
        }

        let (sender, receiver) = mpsc::unbounded_channel();
        let _ = sender.send(ReloadEvent::join());
        if let Some(last) = last_event_id {
            for event in &state.history {
                if event.id.is_some_and(|id| id > last) {
                    let _ = sender.send(event.clone());
                }
            }
        }
        state.connections.push(sender);
        debug!(connections = state.connections.len(), "reload client joined");
        Ok(RoomConnection { receiver })
    }

    /// Broadcasts an event and appends it to the replay history. Returns the
    /// assigned event id, or `None` once the room is closed.
    pub fn send_event(&self, kind: &str, data: &str) -> Option<u64> {
        let mut state = self.state.lock();
        if state.closed {
            return None;
        }
        let id = state.next_event_id;
        state.next_event_id += 1;
        let event = ReloadEvent {
            id: Some(id),
            kind: kind.to_string(),
            data: data.to_string(),
        };

        state.history.push_back(event.clone());
        while state.history.len() > self.history_length {
            state.history.pop_front();
        }
        state
            .connections
            .retain(|sender| sender.send(event.clone()).is_ok());
        Some(id)
    }

    /// Closes the room: every open connection ends, and future connects are
    /// rejected with [`ConnectRejection::Closed`].
    pub fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        state.connections.clear();
    }

    pub fn connection_count(&self) -> usize {
        let mut state = self.state.lock();
        state.connections.retain(|sender| !sender.is_closed());
        state.connections.len()
    }
}

//! Pub/sub transports for the collaboration layer.
//!
//! The production transport speaks Supabase Realtime over Phoenix
//! Channels v1 using `tokio-tungstenite`: socket heartbeats, channel
//! join/leave, broadcast, presence tracking, `postgres_changes` feeds,
//! and auto-reconnect with backoff. A loopback transport backs tests
//! and offline mode.

mod connection;
mod handle;
mod handler;
pub mod memory;
mod types;

use tokio::sync::mpsc;

use crate::config::CollabConfig;

pub use handle::{Transport, TransportHandle};
pub use memory::{MemoryRemote, MemoryTransport};
pub use types::{
    ChangeEvent, JoinSpec, PhoenixMessage, RecordChange, TransportCommand, TransportEvent,
};

/// Supabase Realtime transport.
pub struct SupabaseTransport {
    config: CollabConfig,
}

impl SupabaseTransport {
    pub fn new(config: CollabConfig) -> Self {
        Self { config }
    }
}

impl Transport for SupabaseTransport {
    fn connect(self: Box<Self>) -> (TransportHandle, mpsc::Receiver<TransportEvent>) {
        let (event_tx, event_rx) = mpsc::channel(256);
        let (command_tx, command_rx) = mpsc::channel(64);
        tokio::spawn(connection::connection_loop(
            self.config,
            event_tx,
            command_rx,
        ));
        (TransportHandle::new(command_tx), event_rx)
    }
}

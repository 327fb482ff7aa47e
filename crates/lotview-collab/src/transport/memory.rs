//! In-process loopback transport.
//!
//! Backs the service in tests and in offline demo mode: the remote half
//! injects transport events and observes the commands the service sends,
//! standing in for the provider.

use tokio::sync::mpsc;

use super::handle::{Transport, TransportHandle};
use super::types::{TransportCommand, TransportEvent};

pub struct MemoryTransport {
    command_tx: mpsc::Sender<TransportCommand>,
    event_rx: mpsc::Receiver<TransportEvent>,
}

/// The provider side of a loopback pair.
pub struct MemoryRemote {
    /// Inject events as if the provider produced them.
    pub events: mpsc::Sender<TransportEvent>,
    /// Observe commands the service sent.
    pub commands: mpsc::Receiver<TransportCommand>,
}

/// Create a connected loopback transport and its remote half.
pub fn pair() -> (MemoryTransport, MemoryRemote) {
    let (event_tx, event_rx) = mpsc::channel(256);
    let (command_tx, command_rx) = mpsc::channel(64);
    (
        MemoryTransport {
            command_tx,
            event_rx,
        },
        MemoryRemote {
            events: event_tx,
            commands: command_rx,
        },
    )
}

impl Transport for MemoryTransport {
    fn connect(self: Box<Self>) -> (TransportHandle, mpsc::Receiver<TransportEvent>) {
        (TransportHandle::new(self.command_tx), self.event_rx)
    }
}

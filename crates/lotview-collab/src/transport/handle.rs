//! The transport capability boundary and its command-sending handle.

use serde_json::Value;
use tokio::sync::mpsc;

use super::types::{JoinSpec, TransportCommand, TransportEvent};

/// A pub/sub transport capable of presence, per-table change feeds, and
/// ad-hoc broadcast.
///
/// The service only ever talks to this boundary, so the provider behind
/// it (Supabase Realtime in production, an in-process loopback in tests)
/// can change without touching the presence tracker, change-feed
/// subscriber, conflict detector, or dispatcher.
pub trait Transport: Send {
    /// Start the transport. Returns the command handle and the stream of
    /// transport events.
    fn connect(self: Box<Self>) -> (TransportHandle, mpsc::Receiver<TransportEvent>);
}

/// Handle for sending commands to a running transport.
///
/// All methods are non-blocking and forward commands to the transport's
/// background task. Send failures mean the transport is gone; callers
/// treat that as a (logged) degraded state, never a panic.
#[derive(Clone)]
pub struct TransportHandle {
    command_tx: mpsc::Sender<TransportCommand>,
}

impl TransportHandle {
    pub fn new(command_tx: mpsc::Sender<TransportCommand>) -> Self {
        Self { command_tx }
    }

    pub async fn join(&self, topic: &str, spec: JoinSpec) {
        let _ = self
            .command_tx
            .send(TransportCommand::Join {
                topic: topic.to_string(),
                spec,
            })
            .await;
    }

    pub async fn leave(&self, topic: &str) {
        let _ = self
            .command_tx
            .send(TransportCommand::Leave {
                topic: topic.to_string(),
            })
            .await;
    }

    pub async fn broadcast(&self, topic: &str, event: &str, payload: Value) {
        let _ = self
            .command_tx
            .send(TransportCommand::Broadcast {
                topic: topic.to_string(),
                event: event.to_string(),
                payload,
            })
            .await;
    }

    pub async fn presence_track(&self, topic: &str, payload: Value) {
        let _ = self
            .command_tx
            .send(TransportCommand::PresenceTrack {
                topic: topic.to_string(),
                payload,
            })
            .await;
    }

    pub async fn disconnect(&self) {
        let _ = self.command_tx.send(TransportCommand::Disconnect).await;
    }
}

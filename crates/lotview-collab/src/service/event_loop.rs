//! Drains transport events into service state and subscriber callbacks.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use lotview_common::sync::write;

use crate::conflict;
use crate::protocol::{CollaborationUser, LiveUpdate, UpdateKind, UpdateOrigin};
use crate::registry;
use crate::transport::{ChangeEvent, RecordChange, TransportEvent};

use super::Inner;

pub(super) async fn run(inner: Arc<Inner>, mut event_rx: mpsc::Receiver<TransportEvent>) {
    while let Some(event) = event_rx.recv().await {
        match event {
            TransportEvent::Connected => {
                debug!("Transport connected");
            }
            TransportEvent::Disconnected => {
                // Peers are unreachable until the next snapshot; show an
                // empty roster rather than a stale one.
                write(&inner.presence).clear();
                inner.notify_presence();
            }
            TransportEvent::ChannelJoined { topic } => {
                debug!(topic = %topic, "Channel joined");
                if topic == inner.config.presence_topic() {
                    inner.announce().await;
                }
            }
            TransportEvent::ChannelError { topic, message } => {
                warn!(topic = %topic, message = %message, "Channel error");
            }
            TransportEvent::PresenceSnapshot { topic, state } => {
                if topic == inner.config.presence_topic() {
                    apply_presence_snapshot(&inner, state);
                }
            }
            TransportEvent::Change { topic, change } => {
                handle_change(&inner, &topic, change).await;
            }
            TransportEvent::Broadcast {
                topic,
                event,
                payload,
            } => {
                handle_broadcast(&inner, &topic, &event, payload);
            }
            TransportEvent::Error(err) => {
                warn!(error = %err, "Transport error");
            }
        }
    }
    info!("Collaboration event loop stopped");
}

/// Rebuild the presence map wholesale from a provider snapshot. Entries
/// that fail to parse are skipped, never partially merged.
fn apply_presence_snapshot(inner: &Inner, state: std::collections::HashMap<String, Value>) {
    let mut users = std::collections::HashMap::with_capacity(state.len());
    for (key, meta) in state {
        match serde_json::from_value::<CollaborationUser>(meta) {
            Ok(user) => {
                users.insert(user.id.clone(), user);
            }
            Err(err) => {
                warn!(key = %key, error = %err, "Skipping unparsable presence entry");
            }
        }
    }
    *write(&inner.presence) = users;
    inner.notify_presence();
}

async fn handle_change(inner: &Inner, topic: &str, change: RecordChange) {
    let Some(record_id) = record_id_of(change.payload()) else {
        warn!(table = %change.table, topic = %topic, "Change without a record id; dropped");
        return;
    };
    let origin = UpdateOrigin::from_record(change.payload());

    // The conflict side-check runs for every remote update, including the
    // writer's own echo: the cache may hold edits newer than the write
    // that produced this event.
    if change.event == ChangeEvent::Update {
        if let Some(report) =
            conflict::detect(inner.cache.as_ref(), &change.table, &record_id, change.payload())
                .await
        {
            inner.notify_conflicts(&report);
        }
    }

    if is_self(inner, &origin) {
        debug!(table = %change.table, record_id = %record_id, "Suppressed self-echo");
        return;
    }

    let update = LiveUpdate::new(
        UpdateKind::for_table(&change.table),
        &change.table,
        &record_id,
        change.payload().clone(),
        origin,
    );
    registry::dispatch(&inner.updates, &update);
}

fn handle_broadcast(inner: &Inner, topic: &str, event: &str, payload: Value) {
    let origin = UpdateOrigin::from_envelope(&payload);
    if is_self(inner, &origin) {
        return;
    }
    let record_id = payload
        .get("record_id")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    debug!(topic = %topic, event = %event, "Broadcast received");
    let update = LiveUpdate::new(
        UpdateKind::from_event(event),
        "signals",
        &record_id,
        payload,
        origin,
    );
    registry::dispatch(&inner.updates, &update);
}

fn is_self(inner: &Inner, origin: &UpdateOrigin) -> bool {
    match (origin.user_id(), inner.session_user_id()) {
        (Some(origin_id), Some(session_id)) => origin_id == session_id,
        _ => false,
    }
}

/// Pull a record's primary key out of its payload. Accepts string or
/// numeric ids; dealership tables use both.
fn record_id_of(payload: &Value) -> Option<String> {
    match payload.get("id")? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

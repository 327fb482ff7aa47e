//! Background WebSocket connection loop with auto-reconnect.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, error, info, warn};

use lotview_common::CollabError;

use crate::config::CollabConfig;

use super::handler::handle_phoenix_message;
use super::types::{JoinSpec, PhoenixMessage, TransportCommand, TransportEvent};

/// Monotonically increasing ref counter for Phoenix messages.
static REF_COUNTER: AtomicU64 = AtomicU64::new(1);

pub(crate) fn next_ref() -> String {
    REF_COUNTER.fetch_add(1, Ordering::Relaxed).to_string()
}

/// State for channels that must be rejoined (and presence re-tracked)
/// after a reconnect.
#[derive(Clone)]
pub(crate) struct PendingChannel {
    pub(crate) spec: JoinSpec,
    pub(crate) presence_payload: Option<Value>,
    /// Ref of the most recent `phx_join` for this topic. Only the reply
    /// carrying this ref counts as a channel join; acks for track and
    /// broadcast pushes on the same topic must not.
    pub(crate) join_ref: Option<String>,
}

async fn send_phoenix<S>(ws_write: &Arc<Mutex<S>>, msg: PhoenixMessage)
where
    S: futures_util::Sink<WsMessage> + Unpin,
{
    if let Ok(json) = serde_json::to_string(&msg) {
        let mut writer = ws_write.lock().await;
        let _ = writer.send(WsMessage::Text(json.into())).await;
    }
}

fn join_message(topic: &str, spec: &JoinSpec, access_token: Option<&str>) -> PhoenixMessage {
    let mut payload = spec.to_join_payload();
    // Supabase accepts the JWT inside the join payload.
    if let (Some(token), Some(obj)) = (access_token, payload.as_object_mut()) {
        obj.insert("access_token".to_string(), Value::String(token.to_string()));
    }
    PhoenixMessage {
        topic: format!("realtime:{topic}"),
        event: "phx_join".to_string(),
        payload,
        msg_ref: Some(next_ref()),
    }
}

fn leave_message(topic: &str) -> PhoenixMessage {
    PhoenixMessage {
        topic: format!("realtime:{topic}"),
        event: "phx_leave".to_string(),
        payload: serde_json::json!({}),
        msg_ref: Some(next_ref()),
    }
}

fn track_message(topic: &str, payload: Value) -> PhoenixMessage {
    PhoenixMessage {
        topic: format!("realtime:{topic}"),
        event: "presence".to_string(),
        payload: serde_json::json!({
            "type": "presence",
            "event": "track",
            "payload": payload
        }),
        msg_ref: Some(next_ref()),
    }
}

// ---------------------------------------------------------------------------
// Connection loop
// ---------------------------------------------------------------------------

/// Background task managing the WebSocket connection with auto-reconnect.
pub(crate) async fn connection_loop(
    config: CollabConfig,
    event_tx: mpsc::Sender<TransportEvent>,
    command_rx: mpsc::Receiver<TransportCommand>,
) {
    let command_rx = Arc::new(Mutex::new(command_rx));
    // Channels to restore on reconnect.
    let joined_channels: Arc<Mutex<HashMap<String, PendingChannel>>> =
        Arc::new(Mutex::new(HashMap::new()));
    let mut reconnect_delay = config.reconnect_delay;

    loop {
        let url = config.ws_url();
        info!(url = %url.split('?').next().unwrap_or(""), "Connecting to Supabase Realtime");

        match tokio::time::timeout(
            Duration::from_secs(15),
            tokio_tungstenite::connect_async(&url),
        )
        .await
        {
            Ok(Ok((ws_stream, _))) => {
                reconnect_delay = config.reconnect_delay;
                let _ = event_tx.send(TransportEvent::Connected).await;

                let (ws_write, ws_read) = ws_stream.split();
                let ws_write = Arc::new(Mutex::new(ws_write));

                // Restore previously-joined channels and presence state.
                {
                    let mut channels = joined_channels.lock().await;
                    for (topic, pending) in channels.iter_mut() {
                        let msg =
                            join_message(topic, &pending.spec, config.access_token.as_deref());
                        pending.join_ref = msg.msg_ref.clone();
                        send_phoenix(&ws_write, msg).await;
                        if let Some(payload) = &pending.presence_payload {
                            send_phoenix(&ws_write, track_message(topic, payload.clone())).await;
                        }
                    }
                }

                // Socket-level keepalive.
                let heartbeat_handle = tokio::spawn(heartbeat_task(
                    Arc::clone(&ws_write),
                    config.heartbeat_interval,
                ));

                let cmd_handle = tokio::spawn(command_forwarder(
                    Arc::clone(&command_rx),
                    Arc::clone(&ws_write),
                    Arc::clone(&joined_channels),
                    event_tx.clone(),
                    config.access_token.clone(),
                ));

                // Per-topic presence state, folded from snapshots and
                // diffs so downstream only ever sees full snapshots.
                let mut presence: HashMap<String, HashMap<String, Value>> = HashMap::new();

                let mut read_stream = ws_read;
                while let Some(msg_result) = read_stream.next().await {
                    match msg_result {
                        Ok(WsMessage::Text(text)) => {
                            if let Ok(phoenix_msg) = serde_json::from_str::<PhoenixMessage>(&text) {
                                handle_phoenix_message(
                                    &phoenix_msg,
                                    &mut presence,
                                    &joined_channels,
                                    &event_tx,
                                )
                                .await;
                            } else {
                                debug!(text = %text, "Unrecognized message from Supabase");
                            }
                        }
                        Ok(WsMessage::Close(_)) => {
                            info!("Supabase Realtime closed connection");
                            break;
                        }
                        Err(e) => {
                            warn!(error = %e, "WebSocket error");
                            break;
                        }
                        _ => {}
                    }
                }

                heartbeat_handle.abort();
                let forwarder_finished = cmd_handle.is_finished();
                cmd_handle.abort();
                let _ = event_tx.send(TransportEvent::Disconnected).await;

                // The forwarder only finishes on an explicit disconnect;
                // stop reconnecting in that case.
                if forwarder_finished {
                    return;
                }
            }
            Ok(Err(e)) => {
                error!(error = %e, "Failed to connect to Supabase Realtime");
                let _ = event_tx
                    .send(TransportEvent::Error(CollabError::Transport(format!(
                        "connection failed: {e}"
                    ))))
                    .await;
            }
            Err(_elapsed) => {
                error!("WebSocket connection timed out after 15s");
                let _ = event_tx
                    .send(TransportEvent::Error(CollabError::Transport(
                        "connection timed out after 15s".to_string(),
                    )))
                    .await;
            }
        }

        // Exponential backoff reconnect.
        info!(delay_secs = reconnect_delay.as_secs(), "Reconnecting");
        tokio::time::sleep(reconnect_delay).await;
        reconnect_delay = (reconnect_delay * 2).min(config.max_reconnect_delay);
    }
}

// ---------------------------------------------------------------------------
// Heartbeat
// ---------------------------------------------------------------------------

async fn heartbeat_task<S>(ws_write: Arc<Mutex<S>>, interval: Duration)
where
    S: futures_util::Sink<WsMessage> + Unpin,
{
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        let msg = PhoenixMessage {
            topic: "phoenix".to_string(),
            event: "heartbeat".to_string(),
            payload: serde_json::json!({}),
            msg_ref: Some(next_ref()),
        };
        if let Ok(json) = serde_json::to_string(&msg) {
            let mut writer = ws_write.lock().await;
            if writer.send(WsMessage::Text(json.into())).await.is_err() {
                break;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Command forwarder
// ---------------------------------------------------------------------------

async fn command_forwarder<S>(
    command_rx: Arc<Mutex<mpsc::Receiver<TransportCommand>>>,
    ws_write: Arc<Mutex<S>>,
    joined_channels: Arc<Mutex<HashMap<String, PendingChannel>>>,
    event_tx: mpsc::Sender<TransportEvent>,
    access_token: Option<String>,
) where
    S: futures_util::Sink<WsMessage> + Unpin,
{
    let mut rx = command_rx.lock().await;
    while let Some(cmd) = rx.recv().await {
        match cmd {
            TransportCommand::Join { topic, spec } => {
                let msg = join_message(&topic, &spec, access_token.as_deref());
                // Record the ref before sending so the reply can never
                // race the bookkeeping.
                joined_channels.lock().await.insert(
                    topic,
                    PendingChannel {
                        spec: spec.clone(),
                        presence_payload: None,
                        join_ref: msg.msg_ref.clone(),
                    },
                );
                send_phoenix(&ws_write, msg).await;
            }
            TransportCommand::Leave { topic } => {
                send_phoenix(&ws_write, leave_message(&topic)).await;
                joined_channels.lock().await.remove(&topic);
            }
            TransportCommand::Broadcast {
                topic,
                event,
                payload,
            } => {
                let msg = PhoenixMessage {
                    topic: format!("realtime:{topic}"),
                    event: "broadcast".to_string(),
                    payload: serde_json::json!({
                        "type": "broadcast",
                        "event": event,
                        "payload": payload
                    }),
                    msg_ref: Some(next_ref()),
                };
                send_phoenix(&ws_write, msg).await;
            }
            TransportCommand::PresenceTrack { topic, payload } => {
                send_phoenix(&ws_write, track_message(&topic, payload.clone())).await;
                // Stored so presence survives a reconnect.
                if let Some(ch) = joined_channels.lock().await.get_mut(&topic) {
                    ch.presence_payload = Some(payload);
                }
            }
            TransportCommand::Disconnect => {
                let channels = joined_channels.lock().await;
                for topic in channels.keys() {
                    send_phoenix(&ws_write, leave_message(topic)).await;
                }
                drop(channels);
                let mut writer = ws_write.lock().await;
                let _ = writer.send(WsMessage::Close(None)).await;
                let _ = event_tx.send(TransportEvent::Disconnected).await;
                return; // Exit the command forwarder
            }
        }
    }
}

//! Configuration for the collaboration service.

use std::time::Duration;

/// Configuration for connecting the collaboration layer to its
/// Supabase Realtime backend.
#[derive(Clone)]
pub struct CollabConfig {
    /// Supabase project reference (e.g., "kqzhdxwmlrfauypsgijv").
    pub project_ref: String,
    /// Supabase anon key (publishable).
    pub api_key: String,
    /// Optional JWT for authenticated connections.
    pub access_token: Option<String>,
    /// Liveness heartbeat period. Page changes ride the next tick, so
    /// this bounds how stale a peer's `current_page` can be.
    pub heartbeat_interval: Duration,
    /// Reconnect delay (base).
    pub reconnect_delay: Duration,
    /// Maximum reconnect delay.
    pub max_reconnect_delay: Duration,
    /// Prefix for every channel topic this service opens.
    pub channel_prefix: String,
    /// Record tables watched for insert/update/delete notifications.
    pub watched_tables: Vec<String>,
}

impl std::fmt::Debug for CollabConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollabConfig")
            .field("project_ref", &self.project_ref)
            .field("api_key", &"[REDACTED]")
            .field(
                "access_token",
                &self.access_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("heartbeat_interval", &self.heartbeat_interval)
            .field("reconnect_delay", &self.reconnect_delay)
            .field("max_reconnect_delay", &self.max_reconnect_delay)
            .field("channel_prefix", &self.channel_prefix)
            .field("watched_tables", &self.watched_tables)
            .finish()
    }
}

impl Default for CollabConfig {
    fn default() -> Self {
        Self {
            project_ref: String::new(),
            api_key: String::new(),
            access_token: None,
            heartbeat_interval: Duration::from_secs(30),
            reconnect_delay: Duration::from_secs(1),
            max_reconnect_delay: Duration::from_secs(30),
            channel_prefix: "lotview".to_string(),
            watched_tables: vec![
                "cars".to_string(),
                "appointments".to_string(),
                "repair_orders".to_string(),
                "inventory".to_string(),
            ],
        }
    }
}

impl CollabConfig {
    /// Topic of the presence channel.
    pub fn presence_topic(&self) -> String {
        format!("{}-presence", self.channel_prefix)
    }

    /// Topic of the change-feed channel for one watched table.
    pub fn feed_topic(&self, table: &str) -> String {
        format!("{}-feed-{table}", self.channel_prefix)
    }

    /// Topic of the ad-hoc broadcast channel, opened lazily on first use.
    pub fn signals_topic(&self) -> String {
        format!("{}-signals", self.channel_prefix)
    }

    /// Build the WebSocket URL for Supabase Realtime.
    pub(crate) fn ws_url(&self) -> String {
        format!(
            "wss://{}.supabase.co/realtime/v1/websocket?apikey={}&vsn=1.0.0",
            self.project_ref, self.api_key
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_watches_the_shared_tables() {
        let config = CollabConfig::default();
        assert_eq!(
            config.watched_tables,
            vec!["cars", "appointments", "repair_orders", "inventory"]
        );
        assert_eq!(config.heartbeat_interval, Duration::from_secs(30));
    }

    #[test]
    fn topics_carry_the_prefix() {
        let config = CollabConfig {
            channel_prefix: "dealer".to_string(),
            ..CollabConfig::default()
        };
        assert_eq!(config.presence_topic(), "dealer-presence");
        assert_eq!(config.feed_topic("cars"), "dealer-feed-cars");
        assert_eq!(config.signals_topic(), "dealer-signals");
    }

    #[test]
    fn debug_redacts_secrets() {
        let config = CollabConfig {
            api_key: "anon-key".to_string(),
            access_token: Some("jwt".to_string()),
            ..CollabConfig::default()
        };
        let debug = format!("{config:?}");
        assert!(!debug.contains("anon-key"));
        assert!(!debug.contains("jwt"));
        assert!(debug.contains("[REDACTED]"));
    }
}

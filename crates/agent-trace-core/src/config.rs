//! Client configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default agent endpoint.
pub const DEFAULT_URL: &str = "ws://localhost:8000/ws/query";

/// Default number of consecutive reconnect attempts.
pub const DEFAULT_RECONNECT_ATTEMPTS: u32 = 5;

/// Default spacing between reconnect attempts.
pub const DEFAULT_RECONNECT_INTERVAL: Duration = Duration::from_secs(3);

/// Bounded, fixed-interval reconnect policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectPolicy {
    /// Reconnect attempts after the first failure before giving up, so a
    /// connection is tried at most `max_attempts + 1` times in a row.
    /// Zero disables reconnecting.
    pub max_attempts: u32,
    /// Delay before each attempt.
    #[serde(with = "millis", rename = "interval_ms")]
    pub interval: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_RECONNECT_ATTEMPTS,
            interval: DEFAULT_RECONNECT_INTERVAL,
        }
    }
}

impl ReconnectPolicy {
    /// Policy that never reconnects.
    #[must_use]
    pub const fn disabled() -> Self {
        Self {
            max_attempts: 0,
            interval: Duration::ZERO,
        }
    }

    /// Delay before attempt number `attempt` (1-based), or `None` once the
    /// budget is spent.
    #[must_use]
    pub const fn delay_for(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 || attempt > self.max_attempts {
            None
        } else {
            Some(self.interval)
        }
    }
}

/// What the classifier does with an unrecognised `type`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnknownKindPolicy {
    /// Classify as `other`.
    #[default]
    Other,
    /// Reject the frame.
    Reject,
}

/// Configuration for a streaming session client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Agent endpoint URL.
    pub url: String,
    /// Reconnect policy.
    pub reconnect: ReconnectPolicy,
    /// Handling of unknown event kinds.
    pub unknown_kinds: UnknownKindPolicy,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_URL.to_string(),
            reconnect: ReconnectPolicy::default(),
            unknown_kinds: UnknownKindPolicy::default(),
        }
    }
}

impl ClientConfig {
    /// Config for `url` with default policies.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    /// Replace the reconnect policy.
    #[must_use]
    pub const fn with_reconnect(mut self, reconnect: ReconnectPolicy) -> Self {
        self.reconnect = reconnect;
        self
    }

    /// Replace the unknown-kind policy.
    #[must_use]
    pub const fn with_unknown_kinds(mut self, policy: UnknownKindPolicy) -> Self {
        self.unknown_kinds = policy;
        self
    }

    /// Build from `AGENT_TRACE_*` environment variables, falling back to
    /// defaults for anything unset or unparsable.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(url) = lookup("AGENT_TRACE_URL") {
            config.url = url;
        }
        if let Some(attempts) = lookup("AGENT_TRACE_RECONNECT_ATTEMPTS").and_then(|v| v.parse().ok()) {
            config.reconnect.max_attempts = attempts;
        }
        if let Some(ms) = lookup("AGENT_TRACE_RECONNECT_INTERVAL_MS").and_then(|v| v.parse().ok()) {
            config.reconnect.interval = Duration::from_millis(ms);
        }
        match lookup("AGENT_TRACE_UNKNOWN_KINDS").as_deref() {
            Some("reject") => config.unknown_kinds = UnknownKindPolicy::Reject,
            Some("other") => config.unknown_kinds = UnknownKindPolicy::Other,
            Some(other) => tracing::warn!("Ignoring AGENT_TRACE_UNKNOWN_KINDS={other}"),
            None => {}
        }

        config
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

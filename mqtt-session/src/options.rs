//! Client-supplied connection options, builder-style with `Default` filling
//! in the crate's baseline configuration (mirrors the teacher's
//! `Connector`, minus its MQTT5-only property bag).

use std::time::Duration;

use mqtt_wire::QoS;

/// Last Will and Testament to be published by the broker on ungraceful disconnect.
#[derive(Debug, Clone)]
pub struct Will {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: QoS,
    pub retain: bool,
}

/// Username/password credentials carried in the Connect packet.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub username: String,
    pub password: Option<Vec<u8>>,
}

/// Exponential backoff with jitter, bounded max, optionally capped attempts.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    pub enabled: bool,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        ReconnectPolicy {
            enabled: true,
            initial_backoff: Duration::from_millis(250),
            max_backoff: Duration::from_secs(30),
            max_attempts: None,
        }
    }
}

impl ReconnectPolicy {
    pub fn disabled() -> Self {
        ReconnectPolicy {
            enabled: false,
            ..ReconnectPolicy::default()
        }
    }

    /// Backoff duration for the `attempt`-th retry (0-indexed), before jitter.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let exp = self.initial_backoff.as_millis().saturating_mul(1u128 << attempt.min(20));
        Duration::from_millis(exp.min(self.max_backoff.as_millis()) as u64)
    }
}

/// The full set of parameters a caller passes to `connect`.
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    pub client_id: String,
    pub clean_session: bool,
    pub keep_alive: Duration,
    pub credentials: Option<Credentials>,
    pub will: Option<Will>,

    pub publish_timeout: Duration,
    pub max_retries: u32,
    /// Maximum number of QoS≥1 publishes awaiting their ack at once; a
    /// further `publish()` call is rejected rather than queued once this
    /// many are outstanding.
    pub max_inflight: usize,
    pub dedup_capacity: usize,
    pub dedup_ttl: Duration,
    pub reconnect: ReconnectPolicy,

    pub outbound_queue_depth: usize,
    pub inbound_high_water_mark: usize,
    pub max_decode_frame_size: usize,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        ConnectOptions {
            client_id: generate_client_id(),
            clean_session: true,
            keep_alive: Duration::from_secs(60),
            credentials: None,
            will: None,

            publish_timeout: Duration::from_secs(5),
            max_retries: 3,
            max_inflight: 64,
            dedup_capacity: 1024,
            dedup_ttl: Duration::from_secs(5),
            reconnect: ReconnectPolicy::default(),

            outbound_queue_depth: 1024,
            inbound_high_water_mark: 1024,
            max_decode_frame_size: 256 * 1024 * 1024,
        }
    }
}

impl ConnectOptions {
    pub fn new<S: Into<String>>(client_id: S) -> Self {
        ConnectOptions {
            client_id: client_id.into(),
            ..Default::default()
        }
    }

    pub fn clean_session(mut self, clean: bool) -> Self {
        self.clean_session = clean;
        self
    }

    pub fn keep_alive(mut self, keep_alive: Duration) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    pub fn credentials(mut self, username: impl Into<String>, password: Option<Vec<u8>>) -> Self {
        self.credentials = Some(Credentials {
            username: username.into(),
            password,
        });
        self
    }

    pub fn will(mut self, will: Will) -> Self {
        self.will = Some(will);
        self
    }

    pub fn reconnect(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect = policy;
        self
    }

    pub fn max_inflight(mut self, max_inflight: usize) -> Self {
        self.max_inflight = max_inflight;
        self
    }
}

fn generate_client_id() -> String {
    let host = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown".to_owned());
    let suffix: u32 = rand::random();
    format!("mqtt-session-{}-{:08x}", host, suffix)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let opts = ConnectOptions::default();
        assert!(opts.clean_session);
        assert_eq!(opts.max_retries, 3);
        assert!(opts.max_inflight > 0);
        assert!(!opts.client_id.is_empty());
    }

    #[test]
    fn backoff_grows_and_saturates() {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy.backoff_for(0), Duration::from_millis(250));
        assert_eq!(policy.backoff_for(1), Duration::from_millis(500));
        assert_eq!(policy.backoff_for(20), policy.max_backoff);
    }
}

//! Benchmark Run Configuration
//!
//! One `RunConfig` describes one benchmark run: target server, scenario,
//! client count, and the ramp schedule. Validation happens up front and is
//! the only place a run can fail before any session is created.

use std::path::PathBuf;
use std::time::Duration;

use crate::protocol::WireFormat;

/// Complete configuration for a single benchmark run
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// WebSocket host
    pub ws_host: String,
    /// WebSocket port (443 selects wss://)
    pub ws_port: u16,
    /// Application key, carried in the connection URL path
    pub app_key: String,
    /// Channel to subscribe to
    pub channel: String,
    /// Scenario id (1-5)
    pub scenario: u8,
    /// Target number of concurrent client sessions
    pub num_clients: usize,
    /// Seconds to spread session creation over
    pub ramp_up_secs: u64,
    /// Seconds to hold before measurement starts (data metrics discarded)
    pub warmup_secs: u64,
    /// Seconds to hold at target client count
    pub hold_secs: u64,
    /// Seconds to spread session teardown over
    pub ramp_down_secs: u64,
    /// Extra seconds past the schedule before stragglers are aborted
    pub grace_secs: u64,
    /// Transport connect timeout in milliseconds
    pub connect_timeout_ms: u64,
    /// Handshake-to-ack timeout in milliseconds (covers auth + subscribe)
    pub subscribe_timeout_ms: u64,
    /// Filter replacement interval in milliseconds (scenario 2)
    pub filter_update_interval_ms: u64,
    /// Client id offset for multi-machine benchmarking
    pub client_id_offset: usize,
    /// Filter value pool file (JSON string array); synthetic pool if absent
    pub address_file: Option<PathBuf>,
    /// Wire-level message schema
    pub wire: WireFormat,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            ws_host: "127.0.0.1".to_string(),
            ws_port: 8080,
            app_key: "app-key".to_string(),
            channel: "filtered_events_v1".to_string(),
            scenario: 1,
            num_clients: 1000,
            ramp_up_secs: 30,
            warmup_secs: 0,
            hold_secs: 60,
            ramp_down_secs: 10,
            grace_secs: 15,
            connect_timeout_ms: 10_000,
            subscribe_timeout_ms: 10_000,
            filter_update_interval_ms: 5_000,
            client_id_offset: 0,
            address_file: None,
            wire: WireFormat::default(),
        }
    }
}

impl RunConfig {
    /// Connection URL for a session. Port 443 implies TLS.
    pub fn url(&self) -> String {
        let protocol = if self.ws_port == 443 { "wss" } else { "ws" };
        format!(
            "{}://{}:{}/app/{}",
            protocol, self.ws_host, self.ws_port, self.app_key
        )
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn subscribe_timeout(&self) -> Duration {
        Duration::from_millis(self.subscribe_timeout_ms)
    }

    pub fn filter_update_interval(&self) -> Duration {
        Duration::from_millis(self.filter_update_interval_ms)
    }

    /// Full schedule length: ramp-up + warmup + hold + ramp-down.
    pub fn schedule(&self) -> Duration {
        Duration::from_secs(
            self.ramp_up_secs + self.warmup_secs + self.hold_secs + self.ramp_down_secs,
        )
    }

    /// Hard run deadline: schedule plus the grace period.
    pub fn deadline(&self) -> Duration {
        self.schedule() + Duration::from_secs(self.grace_secs)
    }

    /// Reject configurations the engine cannot run. Called before any
    /// session is created; nothing here is recoverable mid-run.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ws_host.is_empty() {
            return Err(ConfigError::EmptyHost);
        }
        if !(1..=5).contains(&self.scenario) {
            return Err(ConfigError::InvalidScenario(self.scenario));
        }
        if self.num_clients == 0 {
            return Err(ConfigError::InvalidClientCount(self.num_clients));
        }
        if self.ramp_up_secs == 0 {
            return Err(ConfigError::InvalidDuration("ramp_up", self.ramp_up_secs));
        }
        if self.hold_secs == 0 {
            return Err(ConfigError::InvalidDuration("hold", self.hold_secs));
        }
        if self.ramp_down_secs == 0 {
            return Err(ConfigError::InvalidDuration(
                "ramp_down",
                self.ramp_down_secs,
            ));
        }
        if self.subscribe_timeout_ms == 0 {
            return Err(ConfigError::InvalidDuration(
                "subscribe_timeout_ms",
                self.subscribe_timeout_ms,
            ));
        }
        if self.filter_update_interval_ms == 0 {
            return Err(ConfigError::InvalidDuration(
                "filter_update_interval_ms",
                self.filter_update_interval_ms,
            ));
        }
        Ok(())
    }
}

/// Fatal configuration errors. Any of these aborts the run before a single
/// connection is attempted; per-session failures are metrics, not errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    InvalidScenario(u8),
    InvalidClientCount(usize),
    InvalidDuration(&'static str, u64),
    EmptyHost,
    UnresolvableHost(String),
    AddressFile(String),
    EmptyAddressPool,
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidScenario(id) => write!(f, "unknown scenario id {} (expected 1-5)", id),
            Self::InvalidClientCount(n) => write!(f, "client count must be positive, got {}", n),
            Self::InvalidDuration(name, v) => {
                write!(f, "{} must be positive, got {}", name, v)
            }
            Self::EmptyHost => write!(f, "websocket host is empty"),
            Self::UnresolvableHost(host) => write!(f, "cannot resolve host {}", host),
            Self::AddressFile(msg) => write!(f, "address file unusable: {}", msg),
            Self::EmptyAddressPool => write!(f, "address pool is empty"),
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(RunConfig::default().validate().is_ok());
    }

    #[test]
    fn test_rejects_bad_scenario() {
        let mut config = RunConfig::default();
        config.scenario = 0;
        assert_eq!(config.validate(), Err(ConfigError::InvalidScenario(0)));
        config.scenario = 6;
        assert_eq!(config.validate(), Err(ConfigError::InvalidScenario(6)));
    }

    #[test]
    fn test_rejects_zero_clients_and_durations() {
        let mut config = RunConfig::default();
        config.num_clients = 0;
        assert_eq!(config.validate(), Err(ConfigError::InvalidClientCount(0)));

        let mut config = RunConfig::default();
        config.ramp_up_secs = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidDuration("ramp_up", 0))
        ));

        let mut config = RunConfig::default();
        config.hold_secs = 0;
        assert!(config.validate().is_err());

        let mut config = RunConfig::default();
        config.ramp_down_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_url_scheme_follows_port() {
        let mut config = RunConfig::default();
        config.ws_host = "bench.example.com".to_string();
        config.ws_port = 443;
        config.app_key = "k1".to_string();
        assert_eq!(config.url(), "wss://bench.example.com:443/app/k1");

        config.ws_port = 6001;
        assert_eq!(config.url(), "ws://bench.example.com:6001/app/k1");
    }

    #[test]
    fn test_deadline_covers_schedule_plus_grace() {
        let mut config = RunConfig::default();
        config.ramp_up_secs = 30;
        config.warmup_secs = 5;
        config.hold_secs = 60;
        config.ramp_down_secs = 10;
        config.grace_secs = 15;
        assert_eq!(config.schedule(), Duration::from_secs(105));
        assert_eq!(config.deadline(), Duration::from_secs(120));
    }
}

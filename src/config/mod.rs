//! Configuration types for the dispatch engine.
//!
//! Provides configuration with builder pattern for:
//! - Worker loop timing (poll interval, sweep interval)
//! - Pooled connection expiry
//! - Per-attempt network timeout
//! - TLS policy and EHLO identity
//! - Message defaults (subject placeholder, Message-ID fallback domain)

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::errors::{SmtpError, SmtpResult};

/// Default SMTP port (submission with STARTTLS).
pub const DEFAULT_PORT: u16 = 587;

/// Default port for implicit TLS (`smtps://`).
pub const DEFAULT_IMPLICIT_TLS_PORT: u16 = 465;

/// Default interval between idle-connection sweeps.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(3);

/// Default age after which an unused pooled connection is evicted.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(15);

/// Default per-attempt network timeout.
pub const DEFAULT_TRANSMIT_TIMEOUT: Duration = Duration::from_secs(15);

/// Default upper bound on how long the worker sleeps without work.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Subject used when a request never sets one.
pub const DEFAULT_SUBJECT: &str = "No subject.";

/// Message-ID domain used when the sender address has no `@`.
pub const DEFAULT_FALLBACK_DOMAIN: &str = "example.org";

/// TLS mode for SMTP connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TlsMode {
    /// No TLS (insecure, not recommended).
    None,
    /// Opportunistic STARTTLS.
    StartTls,
    /// Required STARTTLS (fail if not supported).
    #[default]
    StartTlsRequired,
    /// Implicit TLS (port 465).
    Implicit,
}

/// Engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Interval between idle-connection sweeps run by the worker.
    #[serde(default = "default_sweep_interval", with = "humantime_serde")]
    pub sweep_interval: Duration,
    /// Pooled connections unused for longer than this are evicted.
    #[serde(default = "default_idle_timeout", with = "humantime_serde")]
    pub idle_timeout: Duration,
    /// Network timeout applied to each connect/transmit attempt.
    #[serde(default = "default_transmit_timeout", with = "humantime_serde")]
    pub transmit_timeout: Duration,
    /// Maximum time the worker waits for work before running maintenance.
    #[serde(default = "default_poll_interval", with = "humantime_serde")]
    pub poll_interval: Duration,
    /// TLS policy for endpoints without an explicit `smtps://` scheme.
    #[serde(default)]
    pub tls: TlsMode,
    /// Client identifier for EHLO.
    pub client_id: Option<String>,
    /// Subject assigned to every new request.
    #[serde(default = "default_subject")]
    pub default_subject: String,
    /// Message-ID domain used when the sender has none.
    #[serde(default = "default_fallback_domain")]
    pub fallback_domain: String,
}

fn default_sweep_interval() -> Duration { DEFAULT_SWEEP_INTERVAL }
fn default_idle_timeout() -> Duration { DEFAULT_IDLE_TIMEOUT }
fn default_transmit_timeout() -> Duration { DEFAULT_TRANSMIT_TIMEOUT }
fn default_poll_interval() -> Duration { DEFAULT_POLL_INTERVAL }
fn default_subject() -> String { DEFAULT_SUBJECT.to_string() }
fn default_fallback_domain() -> String { DEFAULT_FALLBACK_DOMAIN.to_string() }

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sweep_interval: default_sweep_interval(),
            idle_timeout: default_idle_timeout(),
            transmit_timeout: default_transmit_timeout(),
            poll_interval: default_poll_interval(),
            tls: TlsMode::default(),
            client_id: None,
            default_subject: default_subject(),
            fallback_domain: default_fallback_domain(),
        }
    }
}

impl EngineConfig {
    /// Creates a new configuration builder.
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder::default()
    }

    /// Validates the configuration.
    pub fn validate(&self) -> SmtpResult<()> {
        if self.poll_interval.is_zero() {
            return Err(SmtpError::configuration("poll_interval must be positive"));
        }

        if self.sweep_interval.is_zero() {
            return Err(SmtpError::configuration("sweep_interval must be positive"));
        }

        if self.transmit_timeout.is_zero() {
            return Err(SmtpError::configuration("transmit_timeout must be positive"));
        }

        if self.fallback_domain.is_empty() || self.fallback_domain.contains('@') {
            return Err(SmtpError::configuration(
                "fallback_domain must be a bare domain",
            ));
        }

        if matches!(self.client_id.as_deref(), Some("")) {
            return Err(SmtpError::configuration("client_id cannot be empty"));
        }

        Ok(())
    }

    /// Returns the client identifier for EHLO.
    pub fn client_id(&self) -> &str {
        self.client_id.as_deref().unwrap_or("localhost")
    }
}

/// Builder for engine configuration.
#[derive(Debug, Default)]
pub struct EngineConfigBuilder {
    config: EngineConfig,
}

impl EngineConfigBuilder {
    /// Sets the sweep interval.
    pub fn sweep_interval(mut self, interval: Duration) -> Self {
        self.config.sweep_interval = interval;
        self
    }

    /// Sets the idle timeout for pooled connections.
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.config.idle_timeout = timeout;
        self
    }

    /// Sets the per-attempt network timeout.
    pub fn transmit_timeout(mut self, timeout: Duration) -> Self {
        self.config.transmit_timeout = timeout;
        self
    }

    /// Sets the worker poll interval.
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.config.poll_interval = interval;
        self
    }

    /// Sets the TLS mode.
    pub fn tls_mode(mut self, mode: TlsMode) -> Self {
        self.config.tls = mode;
        self
    }

    /// Disables TLS (insecure).
    pub fn no_tls(mut self) -> Self {
        self.config.tls = TlsMode::None;
        self
    }

    /// Sets the client identifier for EHLO.
    pub fn client_id(mut self, id: impl Into<String>) -> Self {
        self.config.client_id = Some(id.into());
        self
    }

    /// Sets the subject given to new requests.
    pub fn default_subject(mut self, subject: impl Into<String>) -> Self {
        self.config.default_subject = subject.into();
        self
    }

    /// Sets the fallback Message-ID domain.
    pub fn fallback_domain(mut self, domain: impl Into<String>) -> Self {
        self.config.fallback_domain = domain.into();
        self
    }

    /// Builds the configuration.
    pub fn build(self) -> SmtpResult<EngineConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

// Humantime serde support
mod humantime_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let s = humantime::format_duration(*duration).to_string();
        serializer.serialize_str(&s)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}

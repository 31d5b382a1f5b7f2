//! # Wrapper Configuration
//!
//! `WrapperConfig` describes where the server lives and how the pool is
//! sized. It can be built in code, deserialized from JSON, or read from
//! `KVWRAP_*` environment variables. Durations are expressed in milliseconds
//! when serialized.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::conn::TcpDialer;
use crate::error::{WrapperError, WrapperResult};
use crate::pool::PoolConfig;

/// Configuration for the wrapper and its pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WrapperConfig {
    /// Server address, e.g. "127.0.0.1:6379".
    pub addr: String,
    /// Maximum idle connections kept in the pool.
    pub max_idle: usize,
    /// Maximum open connections (idle + in use); 0 means unbounded.
    pub max_active: usize,
    /// Idle connections older than this are closed.
    #[serde(rename = "idle_timeout_ms", with = "millis")]
    pub idle_timeout: Option<Duration>,
    /// Optional TCP connect timeout.
    #[serde(rename = "connect_timeout_ms", with = "millis")]
    pub connect_timeout: Option<Duration>,
    /// Optional TCP read timeout.
    #[serde(rename = "read_timeout_ms", with = "millis")]
    pub read_timeout: Option<Duration>,
    /// Optional TCP write timeout.
    #[serde(rename = "write_timeout_ms", with = "millis")]
    pub write_timeout: Option<Duration>,
    /// How long to wait for a free connection when the pool is at capacity.
    #[serde(rename = "wait_timeout_ms", with = "millis")]
    pub wait_timeout: Option<Duration>,
}

impl Default for WrapperConfig {
    fn default() -> Self {
        WrapperConfig {
            addr: Self::DEFAULT_ADDR.to_string(),
            max_idle: 8,
            max_active: 16,
            idle_timeout: Some(Duration::from_secs(300)),
            connect_timeout: None,
            read_timeout: None,
            write_timeout: None,
            wait_timeout: None,
        }
    }
}

impl WrapperConfig {
    const DEFAULT_ADDR: &'static str = "127.0.0.1:6379";

    /// Default configuration pointed at `addr`.
    pub fn with_addr(addr: impl Into<String>) -> Self {
        WrapperConfig {
            addr: addr.into(),
            ..WrapperConfig::default()
        }
    }

    /// Parses a JSON document; missing fields take their defaults.
    pub fn from_json(raw: &str) -> WrapperResult<Self> {
        serde_json::from_str(raw).map_err(|err| WrapperError::Config(err.to_string()))
    }

    /// Reads `KVWRAP_*` environment variables on top of the defaults.
    ///
    /// Values that fail to parse are ignored with a warning.
    pub fn from_env() -> Self {
        let defaults = WrapperConfig::default();
        WrapperConfig {
            addr: std::env::var("KVWRAP_ADDR").unwrap_or(defaults.addr),
            max_idle: env_parse("KVWRAP_MAX_IDLE").unwrap_or(defaults.max_idle),
            max_active: env_parse("KVWRAP_MAX_ACTIVE").unwrap_or(defaults.max_active),
            idle_timeout: env_millis("KVWRAP_IDLE_TIMEOUT_MS").or(defaults.idle_timeout),
            connect_timeout: env_millis("KVWRAP_CONNECT_TIMEOUT_MS").or(defaults.connect_timeout),
            read_timeout: env_millis("KVWRAP_READ_TIMEOUT_MS").or(defaults.read_timeout),
            write_timeout: env_millis("KVWRAP_WRITE_TIMEOUT_MS").or(defaults.write_timeout),
            wait_timeout: env_millis("KVWRAP_WAIT_TIMEOUT_MS").or(defaults.wait_timeout),
        }
    }

    /// Rejects configurations the pool cannot honour.
    pub fn validate(&self) -> WrapperResult<()> {
        if self.addr.trim().is_empty() {
            return Err(WrapperError::Config("address must not be empty".into()));
        }
        if self.max_active > 0 && self.max_idle > self.max_active {
            return Err(WrapperError::Config(format!(
                "max_idle ({}) exceeds max_active ({})",
                self.max_idle, self.max_active
            )));
        }
        Ok(())
    }

    /// Pool sizing derived from this configuration.
    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            max_idle: self.max_idle,
            max_active: self.max_active,
            idle_timeout: self.idle_timeout,
            wait_timeout: self.wait_timeout,
        }
    }

    /// TCP dialer for the configured address and timeouts.
    pub fn dialer(&self) -> TcpDialer {
        TcpDialer::new(self.addr.clone())
            .connect_timeout(self.connect_timeout)
            .read_timeout(self.read_timeout)
            .write_timeout(self.write_timeout)
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    let raw = std::env::var(name).ok()?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(var = name, value = %raw, "ignoring unparsable environment value");
            None
        }
    }
}

fn env_millis(name: &str) -> Option<Duration> {
    env_parse::<u64>(name).map(Duration::from_millis)
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(duration) => serializer.serialize_some(&(duration.as_millis() as u64)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_millis))
    }
}

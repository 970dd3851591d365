//! Client configuration.

use ketama::Hasher;

/// Default readiness-poll timeout in milliseconds.
pub const DEFAULT_POLL_TIMEOUT_MS: i32 = 300;
/// Default per-connection connect timeout in milliseconds.
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 100;
/// Default cool-down after a connection is marked dead, in milliseconds.
pub const DEFAULT_RETRY_TIMEOUT_MS: u64 = 5_000;

/// Tunables for a [`Client`](crate::Client).
///
/// All timeouts can also be adjusted after construction through the client
/// setters; the hash function only takes effect at the next `init`.
#[derive(Clone, Copy, Debug)]
pub struct Config {
    /// Readiness-poll timeout. A batch whose servers stay silent this long
    /// fails with a poll timeout and resets every awaited connection.
    pub poll_timeout_ms: i32,
    /// Timeout for the non-blocking connect performed on first use or
    /// reconnect.
    pub connect_timeout_ms: u64,
    /// How long a dead connection cools down before reconnect is attempted.
    pub retry_timeout_ms: u64,
    /// Key hash function for ring routing.
    pub hasher: Hasher,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            poll_timeout_ms: DEFAULT_POLL_TIMEOUT_MS,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            retry_timeout_ms: DEFAULT_RETRY_TIMEOUT_MS,
            hasher: Hasher::Md5,
        }
    }
}

/// One server endpoint handed to [`Client::init`](crate::Client::init).
///
/// The ring identity is the alias when present, `host:port` otherwise, so a
/// stable alias keeps key placement unchanged when a server is renumbered.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServerSpec {
    pub host: String,
    pub port: u16,
    pub alias: Option<String>,
    /// Relative share of the ring; 1 is the default.
    pub weight: u32,
}

impl ServerSpec {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            alias: None,
            weight: 1,
        }
    }

    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    pub fn weight(mut self, weight: u32) -> Self {
        self.weight = weight.max(1);
        self
    }

    /// Ring identity: the alias when set, `host:port` otherwise.
    pub fn identity(&self) -> String {
        match &self.alias {
            Some(alias) => alias.clone(),
            None => format!("{}:{}", self.host, self.port),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = Config::default();
        assert_eq!(config.poll_timeout_ms, 300);
        assert_eq!(config.connect_timeout_ms, 100);
        assert_eq!(config.retry_timeout_ms, 5_000);
        assert_eq!(config.hasher, Hasher::Md5);
    }

    #[test]
    fn identity_prefers_alias() {
        let plain = ServerSpec::new("cache-1", 11211);
        assert_eq!(plain.identity(), "cache-1:11211");

        let aliased = ServerSpec::new("10.0.0.7", 11211).alias("cache-1");
        assert_eq!(aliased.identity(), "cache-1");
    }

    #[test]
    fn weight_floor_is_one() {
        assert_eq!(ServerSpec::new("h", 1).weight(0).weight, 1);
        assert_eq!(ServerSpec::new("h", 1).weight(3).weight, 3);
    }
}

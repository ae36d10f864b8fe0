//! Client and service settings
//!
//! Defaults can be overridden in code with the `with_*` setters or from the
//! process environment with [`Config::from_env`]:
//!
//! | Variable              | Format          |
//! |-----------------------|-----------------|
//! | `SNTP_SERVER`         | `host[:port]`   |
//! | `SNTP_TIMEOUT_MS`     | milliseconds    |
//! | `SNTP_SYNC_PERIOD_MS` | milliseconds    |
use std::env;
use std::time::Duration;

use crate::client::{DEFAULT_SNTP_PORT, DEFAULT_TIMEOUT};
use crate::types::{Error, Result};

pub const DEFAULT_SERVER_HOST: &str = "time.nist.gov";

pub const ENV_SERVER: &str = "SNTP_SERVER";
pub const ENV_TIMEOUT_MS: &str = "SNTP_TIMEOUT_MS";
pub const ENV_SYNC_PERIOD_MS: &str = "SNTP_SYNC_PERIOD_MS";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// How long a query waits for its reply, zero waits forever
    pub timeout: Duration,
    pub server_host: String,
    pub server_port: u16,
    /// Interval between background synchronisations, zero disables them
    pub sync_period: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            timeout: DEFAULT_TIMEOUT,
            server_host: DEFAULT_SERVER_HOST.to_string(),
            server_port: DEFAULT_SNTP_PORT,
            sync_period: Duration::ZERO,
        }
    }
}

impl Config {
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_server(mut self, host: impl Into<String>, port: u16) -> Self {
        self.server_host = host.into();
        self.server_port = port;
        self
    }

    #[must_use]
    pub fn with_sync_period(mut self, period: Duration) -> Self {
        self.sync_period = period;
        self
    }

    /// Default settings overlaid with the `SNTP_*` environment variables
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if a variable is set but malformed
    pub fn from_env() -> Result<Self> {
        Config::default().overlay(|key| env::var(key).ok())
    }

    /// Split `host[:port]`, falling back to the well-known SNTP port
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] for an empty host or a port that is
    /// not a non-zero `u16`
    pub fn parse_server(server: &str) -> Result<(String, u16)> {
        let server = server.trim();
        let (host, port) = match server.rsplit_once(':') {
            // a bare IPv6 literal carries colons but no port
            Some((host, port)) if !host.contains(':') => {
                let port = port
                    .parse::<u16>()
                    .ok()
                    .filter(|port| *port != 0)
                    .ok_or(Error::InvalidArgument("port out of range"))?;
                (host, port)
            }
            _ => (server, DEFAULT_SNTP_PORT),
        };

        if host.is_empty() {
            return Err(Error::InvalidArgument("host is empty"));
        }

        Ok((host.to_string(), port))
    }

    fn overlay<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(server) = lookup(ENV_SERVER) {
            let (host, port) = Config::parse_server(&server)?;
            self = self.with_server(host, port);
        }
        if let Some(timeout) = lookup(ENV_TIMEOUT_MS) {
            self.timeout = parse_millis(&timeout)?;
        }
        if let Some(period) = lookup(ENV_SYNC_PERIOD_MS) {
            self.sync_period = parse_millis(&period)?;
        }

        Ok(self)
    }
}

fn parse_millis(value: &str) -> Result<Duration> {
    value
        .trim()
        .parse::<u64>()
        .map(Duration::from_millis)
        .map_err(|_| Error::InvalidArgument("expected milliseconds"))
}

#[cfg(test)]
mod sntp_config_tests {
    use super::{Config, ENV_SERVER, ENV_SYNC_PERIOD_MS, ENV_TIMEOUT_MS};
    use crate::types::Error;
    use std::collections::HashMap;
    use std::time::Duration;

    fn overlay(vars: &[(&str, &str)]) -> Result<Config, Error> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();

        Config::default().overlay(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();

        assert_eq!(config.timeout, Duration::from_secs(10));
        assert_eq!(config.server_host, "time.nist.gov");
        assert_eq!(config.server_port, 123);
        assert!(config.sync_period.is_zero());
    }

    #[test]
    fn test_parse_server() {
        assert_eq!(
            Config::parse_server("pool.ntp.org"),
            Ok(("pool.ntp.org".to_string(), 123))
        );
        assert_eq!(
            Config::parse_server(" 127.0.0.1:1123 "),
            Ok(("127.0.0.1".to_string(), 1123))
        );
        assert_eq!(
            Config::parse_server("::1"),
            Ok(("::1".to_string(), 123))
        );
        assert_eq!(
            Config::parse_server("host:0"),
            Err(Error::InvalidArgument("port out of range"))
        );
        assert_eq!(
            Config::parse_server("host:70000"),
            Err(Error::InvalidArgument("port out of range"))
        );
        assert_eq!(
            Config::parse_server(":123"),
            Err(Error::InvalidArgument("host is empty"))
        );
    }

    #[test]
    fn test_environment_overlay() {
        let config = overlay(&[
            (ENV_SERVER, "localhost:2123"),
            (ENV_TIMEOUT_MS, "250"),
            (ENV_SYNC_PERIOD_MS, "60000"),
        ])
        .unwrap();

        assert_eq!(config.server_host, "localhost");
        assert_eq!(config.server_port, 2123);
        assert_eq!(config.timeout, Duration::from_millis(250));
        assert_eq!(config.sync_period, Duration::from_secs(60));

        assert_eq!(overlay(&[]).unwrap(), Config::default());
    }

    #[test]
    fn test_environment_rejects_garbage() {
        assert_eq!(
            overlay(&[(ENV_TIMEOUT_MS, "-5")]),
            Err(Error::InvalidArgument("expected milliseconds"))
        );
        assert_eq!(
            overlay(&[(ENV_SYNC_PERIOD_MS, "soon")]),
            Err(Error::InvalidArgument("expected milliseconds"))
        );
        assert!(overlay(&[(ENV_SERVER, "")]).is_err());
    }
}

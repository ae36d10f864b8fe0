//! Date helpers built on top of the client
//!
//! Enabled with the `utils` feature.
use chrono::{DateTime, Local, Timelike, Utc};
use log::{debug, warn};

use crate::client::Client;
use crate::config::Config;
use crate::types::{Error, Result};

/// Query the configured server once and return network time as a UTC date
///
/// A client is opened for this single query and closed afterwards.
///
/// # Errors
///
/// See [`Client::query`]
pub fn synchronized_now(config: &Config) -> Result<DateTime<Utc>> {
    let client = Client::open(config.timeout)?;
    let result = client.get_offset(&config.server_host, config.server_port);

    client.close();
    result?;

    let time = to_datetime(client.current_time()?)?;
    let local_time = time.with_timezone(&Local);

    debug!(
        "UTC time: {:02}:{:02}:{:02}",
        time.hour(),
        time.minute(),
        time.second()
    );
    debug!(
        "{} time: {:02}:{:02}:{:02}",
        local_time.offset(),
        local_time.hour(),
        local_time.minute(),
        local_time.second()
    );

    Ok(time)
}

/// Like [`synchronized_now`], but any failure yields the local clock instead
#[must_use]
pub fn now_or_local(config: &Config) -> DateTime<Utc> {
    synchronized_now(config).unwrap_or_else(|err| {
        warn!(
            "unable to synchronize with {}:{}, using local time: {err}",
            config.server_host, config.server_port
        );
        Utc::now()
    })
}

/// Convert milliseconds since UNIX EPOCH into a UTC date
///
/// # Errors
///
/// Returns [`Error::InvalidArgument`] if the value is outside of chrono's range
pub fn to_datetime(millis: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(millis)
        .ok_or(Error::InvalidArgument("time out of range"))
}

#[cfg(test)]
mod sntp_utils_tests {
    use super::{now_or_local, synchronized_now, to_datetime};
    use crate::client::sntp_client_tests::{server_reply, spawn_server};
    use crate::config::Config;
    use chrono::{Datelike, Utc};
    use std::net::{Ipv4Addr, UdpSocket};
    use std::time::Duration;

    #[test]
    fn test_to_datetime() {
        let date = to_datetime(1_700_000_000_123).unwrap();

        assert_eq!(date.year(), 2023);
        assert_eq!(date.month(), 11);
        assert_eq!(date.day(), 14);
        assert_eq!(date.timestamp_subsec_millis(), 123);
        assert!(to_datetime(i64::MAX).is_err());
    }

    #[test]
    fn test_synchronized_now_applies_offset() {
        let day_ms = 86_400_000;
        let (addr, server) =
            spawn_server(1, move |request| vec![server_reply(request, day_ms)]);
        let config = Config::default()
            .with_server("127.0.0.1", addr.port())
            .with_timeout(Duration::from_secs(2));

        let date = synchronized_now(&config).unwrap();
        let ahead = date - Utc::now();

        assert!(ahead.num_hours() >= 23, "{ahead}");
        assert!(ahead.num_hours() <= 24, "{ahead}");

        server.join().unwrap();
    }

    #[test]
    fn test_now_or_local_falls_back() {
        let silent = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        let config = Config::default()
            .with_server("127.0.0.1", silent.local_addr().unwrap().port())
            .with_timeout(Duration::from_millis(50));

        let before = Utc::now();
        let date = now_or_local(&config);

        assert!(date >= before);
        assert!(date <= Utc::now());
    }
}

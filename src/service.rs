//! Long-running synchronisation on top of [`Client`]
//!
//! A [`Service`] keeps one client open for its whole lifetime and, when a sync
//! period is configured, re-queries the server from a background thread. The
//! most recent successful offset is what [`Service::time`] applies to the
//! local clock.
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, info, warn};

use crate::client::Client;
use crate::config::Config;
use crate::sup::{NtpTimestampGenerator, StdTimestampGen};
use crate::types::{Error, Result};

#[derive(Debug)]
pub struct Service<T = StdTimestampGen> {
    client: Arc<Client<T>>,
    server_host: String,
    server_port: u16,
    stop: Mutex<Option<mpsc::Sender<()>>>,
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl Service<StdTimestampGen> {
    /// Open a client for `config` and start the periodic synchronisation if
    /// `config.sync_period` is not zero
    ///
    /// No query is made here; the first one happens after one period or on
    /// [`Service::sync_now`].
    ///
    /// # Errors
    ///
    /// [`Error::InvalidArgument`] for an empty host or port 0, and
    /// [`Error::Network`] if the socket or a thread can not be created
    pub fn start(config: &Config) -> Result<Self> {
        Service::start_with(config, StdTimestampGen::default())
    }
}

impl<T> Service<T>
where
    T: NtpTimestampGenerator + Clone + Send + Sync + 'static,
{
    /// Same as [`Service::start`] with a custom local clock
    ///
    /// # Errors
    ///
    /// See [`Service::start`]
    pub fn start_with(config: &Config, timestamp_gen: T) -> Result<Self> {
        if config.server_host.trim().is_empty() {
            return Err(Error::InvalidArgument("host is empty"));
        }
        if config.server_port == 0 {
            return Err(Error::InvalidArgument("port out of range"));
        }

        let client = Arc::new(Client::open_with(config.timeout, timestamp_gen)?);
        let service = Service {
            client,
            server_host: config.server_host.clone(),
            server_port: config.server_port,
            stop: Mutex::new(None),
            timer: Mutex::new(None),
        };

        if !config.sync_period.is_zero() {
            service.spawn_timer(config.sync_period)?;
        }
        info!(
            "SNTP service started for {}:{}",
            service.server_host, service.server_port
        );

        Ok(service)
    }

    /// Query the server right away and return the new offset in milliseconds
    ///
    /// # Errors
    ///
    /// See [`Client::query`]. A failure keeps the previous offset.
    pub fn sync_now(&self) -> Result<i64> {
        self.client.get_offset(&self.server_host, self.server_port)
    }

    /// Best known network time in milliseconds since UNIX EPOCH
    ///
    /// # Errors
    ///
    /// Returns [`Error::IllegalState`] until a synchronisation succeeded
    pub fn time(&self) -> Result<i64> {
        self.client.current_time()
    }

    /// Best known network time as a UTC date
    ///
    /// # Errors
    ///
    /// Returns [`Error::IllegalState`] until a synchronisation succeeded
    #[cfg(feature = "utils")]
    pub fn date(&self) -> Result<chrono::DateTime<chrono::Utc>> {
        crate::utils::to_datetime(self.time()?)
    }

    fn spawn_timer(&self, period: Duration) -> Result<()> {
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let client = Arc::clone(&self.client);
        let host = self.server_host.clone();
        let port = self.server_port;

        let handle = thread::Builder::new()
            .name("sntp-sync".to_string())
            .spawn(move || loop {
                match stop_rx.recv_timeout(period) {
                    Err(RecvTimeoutError::Timeout) => {
                        match client.get_offset(&host, port) {
                            Ok(offset) => debug!("periodic sync: offset {offset} ms"),
                            Err(err) => warn!("periodic sync with {host}:{port} failed: {err}"),
                        }
                    }
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            })
            .map_err(|err| Error::Network(err.kind()))?;

        *self.stop.lock().unwrap_or_else(PoisonError::into_inner) = Some(stop_tx);
        *self.timer.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);

        Ok(())
    }
}

impl<T> Service<T> {
    /// Offset of the last successful synchronisation in milliseconds
    #[must_use]
    pub fn offset(&self) -> Option<i64> {
        self.client.last_offset()
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.client.is_open()
    }

    /// Stop the periodic thread and close the client. Closing twice is a no-op.
    pub fn close(&self) {
        let was_running = self.client.is_open();

        // dropping the sender ends the timer wait
        self.stop
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        // a sync in progress fails fast once the client is closed
        self.client.close();

        let timer = self
            .timer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        if let Some(timer) = timer {
            if timer.join().is_err() {
                warn!("SNTP sync thread panicked");
            }
        }
        if was_running {
            info!("SNTP service stopped");
        }
    }
}

impl<T> Drop for Service<T> {
    fn drop(&mut self) {
        self.close();
    }
}

//! Background receive loop bound to one UDP socket
//!
//! The loop runs on a dedicated thread between [`Listener::start_listening`]
//! and [`Listener::stop_listening`]. Each datagram is decoded outside of any
//! lock, stamped with the local receipt time and handed to the registered
//! callback. Receive errors are logged while listening and suppressed once a
//! stop has been requested.
use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

use log::{debug, info, trace, warn};

use crate::codec::{self, trace_message};
use crate::sup::NtpTimestampGenerator;
use crate::types::{Error, Message, Result};

/// A decoded datagram together with where and when it arrived
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Inbound {
    pub message: Message,
    pub source: SocketAddr,
    /// Local receipt time in milliseconds since UNIX EPOCH
    pub received_at: i64,
}

#[derive(Debug)]
pub struct Listener<T> {
    socket: Mutex<Option<Arc<UdpSocket>>>,
    listening: Arc<AtomicBool>,
    worker: Mutex<Option<JoinHandle<()>>>,
    timestamp_gen: T,
}

impl<T> Listener<T> {
    #[must_use]
    pub fn new(socket: UdpSocket, timestamp_gen: T) -> Self {
        Listener {
            socket: Mutex::new(Some(Arc::new(socket))),
            listening: Arc::new(AtomicBool::new(false)),
            worker: Mutex::new(None),
            timestamp_gen,
        }
    }

    /// The socket the loop reads from; safe to send on concurrently.
    /// `None` once the listener has been closed.
    #[must_use]
    pub fn socket(&self) -> Option<Arc<UdpSocket>> {
        self.socket
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    #[must_use]
    pub fn is_listening(&self) -> bool {
        self.listening.load(Ordering::Acquire)
    }

    /// Request the loop to stop, unblock a pending receive and wait for the
    /// thread to finish. Calling it on a stopped listener does nothing.
    pub fn stop_listening(&self) {
        if self.listening.swap(false, Ordering::AcqRel) {
            if let Err(err) = self.wake() {
                debug!("unable to wake the receive loop: {err}");
            }
        }

        let handle = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        if let Some(handle) = handle {
            // the callback may stop its own listener
            if handle.thread().id() == thread::current().id() {
                return;
            }
            if handle.join().is_err() {
                warn!("SNTP listener thread panicked");
            }
            info!("SNTP listener stopped");
        }
    }

    /// Stop the loop and release the socket; the listener can not be
    /// started again afterwards
    pub fn close(&self) {
        self.stop_listening();
        self.socket
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    /// Send an empty datagram to our own port so a blocking `recv_from`
    /// returns and the loop can observe the stop flag
    fn wake(&self) -> io::Result<()> {
        let Some(socket) = self.socket() else {
            return Ok(());
        };
        let mut addr = socket.local_addr()?;

        if addr.ip().is_unspecified() {
            addr.set_ip(match addr.ip() {
                IpAddr::V4(_) => IpAddr::V4(Ipv4Addr::LOCALHOST),
                IpAddr::V6(_) => IpAddr::V6(Ipv6Addr::LOCALHOST),
            });
        }

        socket.send_to(&[], addr).map(|_| ())
    }
}

impl<T> Listener<T>
where
    T: NtpTimestampGenerator + Clone + Send + 'static,
{
    /// Spawn the receive loop and register `on_message` as the single
    /// consumer of decoded datagrams
    ///
    /// # Errors
    ///
    /// Returns [`Error::IllegalState`] if the loop is already running or the
    /// listener has been closed, and [`Error::Network`] if the thread can not
    /// be spawned
    pub fn start_listening<F>(&self, on_message: F) -> Result<()>
    where
        F: FnMut(Inbound) + Send + 'static,
    {
        let mut worker =
            self.worker.lock().unwrap_or_else(PoisonError::into_inner);

        if worker.is_some() || self.is_listening() {
            return Err(Error::IllegalState("already listening"));
        }

        let socket = self
            .socket()
            .ok_or(Error::IllegalState("listener closed"))?;
        let port = socket.local_addr().map_or(0, |a| a.port());
        let listening = Arc::clone(&self.listening);
        let timestamp_gen = self.timestamp_gen.clone();

        self.listening.store(true, Ordering::Release);

        let spawned = thread::Builder::new()
            .name(format!("sntp-listener-{port}"))
            .spawn(move || {
                receive_loop(&socket, &listening, timestamp_gen, on_message);
            });

        match spawned {
            Ok(handle) => {
                info!("listening for SNTP replies on port {port}");
                *worker = Some(handle);
                Ok(())
            }
            Err(err) => {
                self.listening.store(false, Ordering::Release);
                Err(Error::Network(err.kind()))
            }
        }
    }
}

impl<T> Drop for Listener<T> {
    fn drop(&mut self) {
        self.close();
    }
}

fn receive_loop<T, F>(
    socket: &UdpSocket,
    listening: &AtomicBool,
    mut timestamp_gen: T,
    mut on_message: F,
) where
    T: NtpTimestampGenerator,
    F: FnMut(Inbound),
{
    let mut buf = [0u8; Message::MAXIMUM_LENGTH];

    while listening.load(Ordering::Acquire) {
        let result = socket.recv_from(&mut buf);
        let received_at = timestamp_gen.now_millis();

        if !listening.load(Ordering::Acquire) {
            break;
        }

        match result {
            Ok((size, source)) => match codec::decode(&buf[..size]) {
                Ok(message) => {
                    debug!("Response: {size} bytes from {source}");
                    trace_message("response", &message);
                    on_message(Inbound {
                        message,
                        source,
                        received_at,
                    });
                }
                Err(err) => {
                    warn!("dropping {size} byte datagram from {source}: {err}");
                }
            },
            Err(err)
                if matches!(
                    err.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
                ) =>
            {
                trace!("receive timeout, still listening");
            }
            Err(err) => warn!("error receiving a message: {err}"),
        }
    }
}

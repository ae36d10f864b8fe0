//! Blocking SNTP client built on the background [`Listener`]
//!
//! A [`Client`] owns one UDP socket and keeps a single correlation slot shared
//! with its receive loop. Queries are serialized: a second caller waits until
//! the first one has finished, so a reply always belongs to the most recent
//! request. On top of that, a reply is only accepted when its originate
//! timestamp echoes the transmit timestamp of the pending request and it comes
//! from the queried address; anything else is dropped and the wait goes on.
use std::net::{Ipv4Addr, SocketAddr, ToSocketAddrs, UdpSocket};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

use log::{debug, info};

use crate::listener::{Inbound, Listener};
use crate::sender::Sender;
use crate::sup::{
    from_timestamp, to_timestamp, NtpTimestampGenerator, StdTimestampGen,
};
use crate::types::{Error, Message, NtpResult, Result, Timestamp};

/// Well-known SNTP server port
pub const DEFAULT_SNTP_PORT: u16 = 123;
/// Time to wait for a reply unless configured otherwise
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(10_000);

/// What the pending query waits for and the reply once it arrived
#[derive(Debug, Default)]
struct Pending {
    /// Queried address and transmit timestamp of the request in flight
    expected: Option<(SocketAddr, Timestamp)>,
    reply: Option<Inbound>,
}

/// Single slot where the receive loop hands a reply to the waiting query
#[derive(Debug, Default)]
struct Correlation {
    slot: Mutex<Pending>,
    arrived: Condvar,
}

impl Correlation {
    /// Called from the receive loop. Only the first datagram answering the
    /// pending request is kept; everything else is dropped here so it can not
    /// displace that reply.
    fn hold(&self, inbound: Inbound) {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        let originate = inbound.message.originate_timestamp();
        let expected = slot.expected;

        match expected {
            Some((dest, expected))
                if slot.reply.is_none()
                    && inbound.source == dest
                    && originate == expected =>
            {
                slot.reply = Some(inbound);
                self.arrived.notify_all();
            }
            Some((dest, expected)) => debug!(
                "discarding reply from {} with originate {originate}, expected {expected} from {dest}",
                inbound.source
            ),
            None => debug!(
                "discarding reply from {} with no query pending",
                inbound.source
            ),
        }
    }

    /// Arm the slot for a new request, dropping whatever a previous one left
    fn expect(&self, dest: SocketAddr, originate: Timestamp) {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);

        slot.expected = Some((dest, originate));
        slot.reply = None;
    }

    fn release(&self) {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);

        slot.expected = None;
        slot.reply = None;
    }

    fn wake_all(&self) {
        let _slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);

        self.arrived.notify_all();
    }
}

/// SNTP client with one outstanding query at a time
///
/// # Example
///
/// ```no_run
/// use atomic_sntp::{Client, DEFAULT_SNTP_PORT, DEFAULT_TIMEOUT};
///
/// let client = Client::open(DEFAULT_TIMEOUT).expect("Unable to open SNTP client");
///
/// match client.get_offset("time.nist.gov", DEFAULT_SNTP_PORT) {
///     Ok(offset) => println!("local clock is {offset} ms behind"),
///     Err(err) => eprintln!("Error: {err}"),
/// }
///
/// client.close();
/// ```
#[derive(Debug)]
pub struct Client<T = StdTimestampGen> {
    listener: Listener<T>,
    correlation: Arc<Correlation>,
    in_flight: Mutex<()>,
    last_offset: Mutex<Option<i64>>,
    timeout: Duration,
    timestamp_gen: T,
}

impl Client<StdTimestampGen> {
    /// Open a client reading the system clock
    ///
    /// A zero `timeout` waits for a reply indefinitely.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Network`] if the socket can not be bound or the
    /// receive thread can not be spawned
    pub fn open(timeout: Duration) -> Result<Self> {
        Client::open_with(timeout, StdTimestampGen::default())
    }
}

impl<T> Client<T>
where
    T: NtpTimestampGenerator + Clone + Send + 'static,
{
    /// Open a client reading the local clock through `timestamp_gen`
    ///
    /// Binds a fresh socket to an ephemeral port, sets its read timeout to
    /// `timeout` and starts the receive loop.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Network`] if the socket can not be bound or the
    /// receive thread can not be spawned
    pub fn open_with(timeout: Duration, timestamp_gen: T) -> Result<Self> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?;

        socket.set_read_timeout((!timeout.is_zero()).then_some(timeout))?;

        let listener = Listener::new(socket, timestamp_gen.clone());
        let correlation = Arc::new(Correlation::default());
        let slot = Arc::clone(&correlation);

        listener.start_listening(move |inbound| slot.hold(inbound))?;

        Ok(Client {
            listener,
            correlation,
            in_flight: Mutex::new(()),
            last_offset: Mutex::new(None),
            timeout,
            timestamp_gen,
        })
    }

    /// Query `host` and return the local clock offset in milliseconds,
    /// positive when the local clock is behind network time
    ///
    /// # Errors
    ///
    /// See [`Client::query`]
    pub fn get_offset(&self, host: &str, port: u16) -> Result<i64> {
        self.query(host, port).map(|result| result.offset())
    }

    /// Same as [`Client::get_offset`] for an already resolved address
    ///
    /// # Errors
    ///
    /// See [`Client::query_addr`]
    pub fn get_offset_addr(&self, addr: SocketAddr) -> Result<i64> {
        self.query_addr(addr).map(|result| result.offset())
    }

    /// Resolve `host` and run a single request/response exchange with it
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidArgument`] for an empty host or port 0
    /// - [`Error::IllegalState`] if the client is closed
    /// - [`Error::AddressResolve`] if `host` has no IPv4 address
    /// - anything [`Client::query_addr`] returns
    pub fn query(&self, host: &str, port: u16) -> Result<NtpResult> {
        if host.trim().is_empty() {
            return Err(Error::InvalidArgument("host is empty"));
        }
        if port == 0 {
            return Err(Error::InvalidArgument("port out of range"));
        }
        self.ensure_open()?;

        let addr = (host, port)
            .to_socket_addrs()
            .map_err(|_| Error::AddressResolve)?
            .find(SocketAddr::is_ipv4)
            .ok_or(Error::AddressResolve)?;

        self.query_addr(addr)
    }

    /// Run a single request/response exchange with `addr`
    ///
    /// Blocks until the matching reply arrives or the configured timeout
    /// elapses. On success the offset becomes the client's last known offset;
    /// on failure the last known offset is left untouched.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidArgument`] for port 0
    /// - [`Error::IllegalState`] if the client is closed before or during the query
    /// - [`Error::Network`] if the request can not be sent
    /// - [`Error::Timeout`] if no matching reply arrives in time
    /// - [`Error::IncorrectMode`], [`Error::IncorrectStratumHeaders`],
    ///   [`Error::IncorrectTransmitTimestamp`] for a reply that fails validation
    pub fn query_addr(&self, addr: SocketAddr) -> Result<NtpResult> {
        if addr.port() == 0 {
            return Err(Error::InvalidArgument("port out of range"));
        }

        let _in_flight =
            self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        let socket = self
            .listener
            .socket()
            .ok_or(Error::IllegalState("client closed"))?;
        self.ensure_open()?;

        let mut timestamp_gen = self.timestamp_gen.clone();
        let originate = to_timestamp(timestamp_gen.now_millis())?;
        let request = Message::default().with_transmit_timestamp(originate);

        // armed before sending so a fast reply can not slip past
        self.correlation.expect(addr, originate);

        let sent = Sender::new(&socket).send(&request, addr);
        drop(socket);

        let reply = sent.map_err(Error::from).and_then(|()| self.await_reply());
        self.correlation.release();

        let result = process_response(&reply?)?;

        debug!(
            "Roundtrip delay: {} ms. Offset: {} ms",
            result.roundtrip(),
            result.offset()
        );
        *self
            .last_offset
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(result.offset());

        Ok(result)
    }

    /// Local time corrected by the last known offset, in milliseconds since
    /// UNIX EPOCH
    ///
    /// # Errors
    ///
    /// Returns [`Error::IllegalState`] if no query has succeeded yet
    pub fn current_time(&self) -> Result<i64> {
        let offset = self
            .last_offset()
            .ok_or(Error::IllegalState("not synchronized"))?;

        Ok(self.timestamp_gen.clone().now_millis() + offset)
    }

    fn await_reply(&self) -> Result<Inbound> {
        let deadline =
            (!self.timeout.is_zero()).then(|| Instant::now() + self.timeout);
        let mut slot = self
            .correlation
            .slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        loop {
            if let Some(inbound) = slot.reply.take() {
                return Ok(inbound);
            }

            if !self.is_open() {
                return Err(Error::IllegalState("client closed"));
            }

            slot = match deadline {
                None => self
                    .correlation
                    .arrived
                    .wait(slot)
                    .unwrap_or_else(PoisonError::into_inner),
                Some(deadline) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());

                    if remaining.is_zero() {
                        return Err(Error::Timeout);
                    }
                    self.correlation
                        .arrived
                        .wait_timeout(slot, remaining)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                }
            };
        }
    }
}

impl<T> Client<T> {
    /// Configured reply timeout; zero means no limit
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Local address of the client socket, `None` once closed
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener
            .socket()
            .and_then(|socket| socket.local_addr().ok())
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.listener.is_listening()
    }

    /// Offset of the last successful query in milliseconds
    #[must_use]
    pub fn last_offset(&self) -> Option<i64> {
        *self
            .last_offset
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Stop the receive loop and release the socket. Pending and later
    /// queries fail with [`Error::IllegalState`]. Closing twice is a no-op.
    pub fn close(&self) {
        if self.is_open() {
            info!("closing SNTP client");
        }
        self.listener.close();
        self.correlation.wake_all();
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_open() {
            Ok(())
        } else {
            Err(Error::IllegalState("client closed"))
        }
    }
}

impl<T> Drop for Client<T> {
    fn drop(&mut self) {
        self.close();
    }
}

fn process_response(inbound: &Inbound) -> Result<NtpResult> {
    let packet = &inbound.message;
    let mode = packet.mode();

    if mode != Message::MODE_SERVER && mode != Message::MODE_BROADCAST {
        return Err(Error::IncorrectMode);
    }

    if packet.stratum() == Message::STRATUM_UNSPECIFIED {
        return Err(Error::IncorrectStratumHeaders);
    }

    if packet.transmit_timestamp().is_zero() {
        return Err(Error::IncorrectTransmitTimestamp);
    }
    // System clock offset:
    // theta = 1/2 * [(T2-T1) + (T3-T4)]
    // Round-trip delay:
    // delta = (T4-T1) - (T3-T2)
    // where:
    // - T1 = client's TX timestamp, echoed as the originate timestamp
    // - T2 = server's RX timestamp
    // - T3 = server's TX timestamp
    // - T4 = client's RX timestamp
    let t1 = from_timestamp(&packet.originate_timestamp());
    let t2 = from_timestamp(&packet.receive_timestamp());
    let t3 = from_timestamp(&packet.transmit_timestamp());
    let t4 = inbound.received_at;

    Ok(NtpResult {
        offset: offset_calculate(t1, t2, t3, t4),
        roundtrip: roundtrip_calculate(t1, t2, t3, t4),
        stratum: packet.stratum(),
        precision: packet.precision(),
        server_time: packet.transmit_timestamp(),
        reference_identifier: packet.reference_identifier(),
    })
}

/// Clock offset in the unit of its arguments
#[must_use]
pub fn offset_calculate(t1: i64, t2: i64, t3: i64, t4: i64) -> i64 {
    ((t2 - t1) + (t3 - t4)) / 2
}

/// Round-trip delay in the unit of its arguments
#[must_use]
pub fn roundtrip_calculate(t1: i64, t2: i64, t3: i64, t4: i64) -> i64 {
    (t4 - t1) - (t3 - t2)
}

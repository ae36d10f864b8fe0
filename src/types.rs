use core::fmt::{self, Display, Formatter};
use std::io;

/// SNTP mode value bit mask
pub(crate) const MODE_MASK: u8 = 0b0000_0111;
/// SNTP mode bit mask shift value
pub(crate) const MODE_SHIFT: u8 = 0;
/// SNTP version value bit mask
pub(crate) const VERSION_MASK: u8 = 0b0011_1000;
/// SNTP version bit mask shift value
pub(crate) const VERSION_SHIFT: u8 = 3;
/// SNTP LI (leap indicator) bit mask value
pub(crate) const LI_MASK: u8 = 0b1100_0000;
/// SNTP LI bit mask shift value
pub(crate) const LI_SHIFT: u8 = 6;
/// SNTP seconds mask
pub(crate) const SECONDS_MASK: u64 = 0xffff_ffff_0000_0000;
/// SNTP seconds fraction mask
pub(crate) const SECONDS_FRAC_MASK: u64 = 0xffff_ffff;

/// SNTP library result type
pub type Result<T> = core::result::Result<T, Error>;

/// The error type for the SNTP client
///
/// Variants fall into five classes: invalid arguments, operations on a closed
/// or unsynchronized client, timeouts, transport failures (resolution, socket
/// I/O, truncated datagrams) and protocol failures detected while validating a
/// server reply.
#[derive(Debug, PartialEq, Copy, Clone)]
#[non_exhaustive]
pub enum Error {
    /// Malformed input: empty host, zero port, out of range timestamp parts,
    /// unparsable configuration values
    InvalidArgument(&'static str),
    /// Operation attempted in a state that does not allow it, e.g. a query on
    /// a closed client
    IllegalState(&'static str),
    /// No reply arrived within the configured window
    Timeout,
    /// A NTP server address can not be resolved
    AddressResolve,
    /// Socket I/O failed while sending or receiving
    Network(io::ErrorKind),
    /// Payload size of a NTP datagram does not meet `SNTPv4` specification
    IncorrectPayload,
    /// Incorrect mode value in a NTP response
    IncorrectMode,
    /// Incorrect stratum headers in a NTP response (kiss-o'-death)
    IncorrectStratumHeaders,
    /// Server left the transmit timestamp of its response unset
    IncorrectTransmitTimestamp,
}

impl Error {
    /// Returns `true` for resolution, socket I/O and truncated payload failures
    #[must_use]
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Error::AddressResolve | Error::Network(_) | Error::IncorrectPayload
        )
    }

    /// Returns `true` for failures found while validating a correlated reply
    #[must_use]
    pub fn is_protocol(&self) -> bool {
        matches!(
            self,
            Error::IncorrectMode
                | Error::IncorrectStratumHeaders
                | Error::IncorrectTransmitTimestamp
        )
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidArgument(what) => write!(f, "invalid argument: {what}"),
            Error::IllegalState(what) => write!(f, "illegal state: {what}"),
            Error::Timeout => f.write_str("timed out while querying the server"),
            Error::AddressResolve => {
                f.write_str("unable to resolve the server address")
            }
            Error::Network(kind) => write!(f, "network error: {kind}"),
            Error::IncorrectPayload => f.write_str("truncated SNTP datagram"),
            Error::IncorrectMode => f.write_str("unexpected mode in response"),
            Error::IncorrectStratumHeaders => {
                f.write_str("server answered with stratum 0 (kiss-o'-death)")
            }
            Error::IncorrectTransmitTimestamp => {
                f.write_str("server transmit timestamp is not set")
            }
        }
    }
}

impl std::error::Error for Error {}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::UnexpectedEof => Error::IncorrectPayload,
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => {
                Error::Timeout
            }
            kind => Error::Network(kind),
        }
    }
}

/// NTP timestamp: seconds since 1900-01-01T00:00:00Z with a 32 bit binary
/// fraction of a second
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
pub struct Timestamp {
    integer: u32,
    fraction: u32,
}

impl Timestamp {
    /// Unset timestamp
    pub const ZERO: Timestamp = Timestamp::from_parts(0, 0);

    /// Create a timestamp from its integer and fraction parts
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if either part is negative or does
    /// not fit into 32 bits
    pub fn new(integer: i64, fraction: i64) -> Result<Self> {
        let integer = u32::try_from(integer)
            .map_err(|_| Error::InvalidArgument("timestamp integer out of range"))?;
        let fraction = u32::try_from(fraction).map_err(|_| {
            Error::InvalidArgument("timestamp fraction out of range")
        })?;

        Ok(Timestamp { integer, fraction })
    }

    #[must_use]
    pub const fn from_parts(integer: u32, fraction: u32) -> Self {
        Timestamp { integer, fraction }
    }

    /// Seconds since the NTP era start
    #[must_use]
    pub fn integer(&self) -> u32 {
        self.integer
    }

    /// Binary fraction of a second
    #[must_use]
    pub fn fraction(&self) -> u32 {
        self.fraction
    }

    #[must_use]
    pub fn is_zero(&self) -> bool {
        *self == Timestamp::ZERO
    }
}

impl From<u64> for Timestamp {
    #[allow(clippy::cast_possible_truncation)]
    fn from(v: u64) -> Self {
        Timestamp {
            integer: ((v & SECONDS_MASK) >> 32) as u32,
            fraction: (v & SECONDS_FRAC_MASK) as u32,
        }
    }
}

impl From<Timestamp> for u64 {
    fn from(t: Timestamp) -> Self {
        (u64::from(t.integer) << 32) | u64::from(t.fraction)
    }
}

impl Display for Timestamp {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.integer, self.fraction)
    }
}

/// SNTP message as carried by a single datagram
///
/// [`Message::default`] is a ready to send client request: no leap warning,
/// version 4, client mode, unspecified stratum, `LOCL` reference identifier
/// and every timestamp unset. Fields are changed through the consuming
/// `with_*` setters; the 2 and 3 bit header fields are masked to their width.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Message {
    leap_indicator: u8,
    version: u8,
    mode: u8,
    stratum: i8,
    poll: i8,
    precision: i8,
    root_delay: f64,
    root_dispersion: f64,
    reference_identifier: [u8; 4],
    reference_timestamp: Timestamp,
    originate_timestamp: Timestamp,
    receive_timestamp: Timestamp,
    transmit_timestamp: Timestamp,
}

impl Message {
    /// Size of a message without authentication fields
    pub const PACKET_SIZE: usize = 48;
    /// Largest datagram read by the receive loop
    pub const MAXIMUM_LENGTH: usize = 384;

    pub const LI_NO_WARNING: u8 = 0;
    pub const LI_LAST_MINUTE_61: u8 = 1;
    pub const LI_LAST_MINUTE_59: u8 = 2;
    pub const LI_ALARM: u8 = 3;

    pub const VERSION_3: u8 = 3;
    pub const VERSION_4: u8 = 4;

    pub const MODE_RESERVED: u8 = 0;
    pub const MODE_SYMMETRIC_ACTIVE: u8 = 1;
    pub const MODE_SYMMETRIC_PASSIVE: u8 = 2;
    pub const MODE_CLIENT: u8 = 3;
    pub const MODE_SERVER: u8 = 4;
    pub const MODE_BROADCAST: u8 = 5;
    pub const MODE_CONTROL: u8 = 6;
    pub const MODE_PRIVATE: u8 = 7;

    pub const STRATUM_UNSPECIFIED: i8 = 0;
    pub const STRATUM_PRIMARY: i8 = 1;

    pub const DEFAULT_REFERENCE_IDENTIFIER: [u8; 4] = *b"LOCL";

    #[must_use]
    pub fn leap_indicator(&self) -> u8 {
        self.leap_indicator
    }

    #[must_use]
    pub fn version(&self) -> u8 {
        self.version
    }

    #[must_use]
    pub fn mode(&self) -> u8 {
        self.mode
    }

    #[must_use]
    pub fn stratum(&self) -> i8 {
        self.stratum
    }

    /// Poll interval as log2 seconds
    #[must_use]
    pub fn poll(&self) -> i8 {
        self.poll
    }

    /// Precision as log2 seconds
    #[must_use]
    pub fn precision(&self) -> i8 {
        self.precision
    }

    /// Root delay in seconds
    #[must_use]
    pub fn root_delay(&self) -> f64 {
        self.root_delay
    }

    /// Root dispersion in seconds
    #[must_use]
    pub fn root_dispersion(&self) -> f64 {
        self.root_dispersion
    }

    #[must_use]
    pub fn reference_identifier(&self) -> [u8; 4] {
        self.reference_identifier
    }

    #[must_use]
    pub fn reference_timestamp(&self) -> Timestamp {
        self.reference_timestamp
    }

    #[must_use]
    pub fn originate_timestamp(&self) -> Timestamp {
        self.originate_timestamp
    }

    #[must_use]
    pub fn receive_timestamp(&self) -> Timestamp {
        self.receive_timestamp
    }

    #[must_use]
    pub fn transmit_timestamp(&self) -> Timestamp {
        self.transmit_timestamp
    }

    #[must_use]
    pub fn with_leap_indicator(mut self, leap_indicator: u8) -> Self {
        self.leap_indicator = leap_indicator & (LI_MASK >> LI_SHIFT);
        self
    }

    #[must_use]
    pub fn with_version(mut self, version: u8) -> Self {
        self.version = version & (VERSION_MASK >> VERSION_SHIFT);
        self
    }

    #[must_use]
    pub fn with_mode(mut self, mode: u8) -> Self {
        self.mode = mode & (MODE_MASK >> MODE_SHIFT);
        self
    }

    #[must_use]
    pub fn with_stratum(mut self, stratum: i8) -> Self {
        self.stratum = stratum;
        self
    }

    #[must_use]
    pub fn with_poll(mut self, poll: i8) -> Self {
        self.poll = poll;
        self
    }

    #[must_use]
    pub fn with_precision(mut self, precision: i8) -> Self {
        self.precision = precision;
        self
    }

    /// Set the root delay in seconds, rounded to the nearest 1/65536 and
    /// clamped to the 16.16 wire range
    #[must_use]
    pub fn with_root_delay(mut self, seconds: f64) -> Self {
        self.root_delay = quantize_fixed_point(seconds);
        self
    }

    /// Set the root dispersion in seconds, quantized like the root delay
    #[must_use]
    pub fn with_root_dispersion(mut self, seconds: f64) -> Self {
        self.root_dispersion = quantize_fixed_point(seconds);
        self
    }

    /// Set the reference identifier. Shorter input is padded with zero bytes,
    /// longer input keeps its first four bytes.
    #[must_use]
    pub fn with_reference_identifier(mut self, id: &[u8]) -> Self {
        let len = id.len().min(4);
        let mut buf = [0u8; 4];

        buf[..len].copy_from_slice(&id[..len]);
        self.reference_identifier = buf;
        self
    }

    #[must_use]
    pub fn with_reference_timestamp(mut self, timestamp: Timestamp) -> Self {
        self.reference_timestamp = timestamp;
        self
    }

    #[must_use]
    pub fn with_originate_timestamp(mut self, timestamp: Timestamp) -> Self {
        self.originate_timestamp = timestamp;
        self
    }

    #[must_use]
    pub fn with_receive_timestamp(mut self, timestamp: Timestamp) -> Self {
        self.receive_timestamp = timestamp;
        self
    }

    #[must_use]
    pub fn with_transmit_timestamp(mut self, timestamp: Timestamp) -> Self {
        self.transmit_timestamp = timestamp;
        self
    }
}

impl Default for Message {
    fn default() -> Self {
        Message {
            leap_indicator: Message::LI_NO_WARNING,
            version: Message::VERSION_4,
            mode: Message::MODE_CLIENT,
            stratum: Message::STRATUM_UNSPECIFIED,
            poll: 0,
            precision: 0,
            root_delay: 0.0,
            root_dispersion: 0.0,
            reference_identifier: Message::DEFAULT_REFERENCE_IDENTIFIER,
            reference_timestamp: Timestamp::ZERO,
            originate_timestamp: Timestamp::ZERO,
            receive_timestamp: Timestamp::ZERO,
            transmit_timestamp: Timestamp::ZERO,
        }
    }
}

fn quantize_fixed_point(seconds: f64) -> f64 {
    crate::codec::decode_fixed_point(crate::codec::encode_fixed_point(seconds))
}

/// SNTP request result representation
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct NtpResult {
    /// Estimated difference between the network time and the local clock in
    /// milliseconds, positive when the local clock is behind
    pub offset: i64,
    /// Request roundtrip time in milliseconds
    pub roundtrip: i64,
    /// Clock stratum of NTP server
    pub stratum: i8,
    /// Precision of NTP server as log2(seconds) - this should usually be negative
    pub precision: i8,
    /// Server transmit timestamp of the reply
    pub server_time: Timestamp,
    /// Reference identifier reported by the server
    pub reference_identifier: [u8; 4],
}

impl NtpResult {
    /// Returns system clock offset value in milliseconds
    #[must_use]
    pub fn offset(&self) -> i64 {
        self.offset
    }

    /// Returns request's roundtrip time (client -> server -> client) in milliseconds
    #[must_use]
    pub fn roundtrip(&self) -> i64 {
        self.roundtrip
    }

    /// Returns reported stratum value (level of server's hierarchy to stratum 0 - "reference clock")
    #[must_use]
    pub fn stratum(&self) -> i8 {
        self.stratum
    }

    /// Returns reported precision value (an exponent of two, which results in the precision of server's system clock in seconds)
    #[must_use]
    pub fn precision(&self) -> i8 {
        self.precision
    }
}

#[cfg(test)]
mod sntp_types_tests {
    use super::{Error, Message, Timestamp};
    use std::io;

    #[test]
    fn test_timestamp_rejects_negative_parts() {
        assert_eq!(
            Timestamp::new(-1, 0),
            Err(Error::InvalidArgument("timestamp integer out of range"))
        );
        assert_eq!(
            Timestamp::new(0, -1),
            Err(Error::InvalidArgument("timestamp fraction out of range"))
        );
        assert!(Timestamp::new(i64::from(u32::MAX) + 1, 0).is_err());
    }

    #[test]
    fn test_timestamp_accessors_and_equality() {
        let a = Timestamp::new(3_913_056_000, 2_147_483_648).unwrap();
        let b = Timestamp::from_parts(3_913_056_000, 2_147_483_648);

        assert_eq!(a, b);
        assert_eq!(a.integer(), 3_913_056_000);
        assert_eq!(a.fraction(), 2_147_483_648);
        assert_ne!(a, Timestamp::from_parts(3_913_056_000, 0));
        assert_eq!(a.to_string(), "3913056000.2147483648");
        assert!(Timestamp::ZERO.is_zero());
        assert!(!a.is_zero());
    }

    #[test]
    fn test_timestamp_packed_representation() {
        let t = Timestamp::from_parts(0xdead_beef, 0x0102_0304);
        let packed = u64::from(t);

        assert_eq!(packed, 0xdead_beef_0102_0304);
        assert_eq!(Timestamp::from(packed), t);
    }

    #[test]
    fn test_default_message_is_client_request() {
        let m = Message::default();

        assert_eq!(m.leap_indicator(), Message::LI_NO_WARNING);
        assert_eq!(m.version(), 4);
        assert_eq!(m.mode(), Message::MODE_CLIENT);
        assert_eq!(m.stratum(), Message::STRATUM_UNSPECIFIED);
        assert_eq!(m.poll(), 0);
        assert_eq!(m.precision(), 0);
        assert_eq!(m.root_delay(), 0.0);
        assert_eq!(m.root_dispersion(), 0.0);
        assert_eq!(&m.reference_identifier(), b"LOCL");
        assert!(m.reference_timestamp().is_zero());
        assert!(m.originate_timestamp().is_zero());
        assert!(m.receive_timestamp().is_zero());
        assert!(m.transmit_timestamp().is_zero());
    }

    #[test]
    fn test_header_fields_are_masked() {
        let m = Message::default()
            .with_leap_indicator(0b111)
            .with_version(0b1_1111)
            .with_mode(0b1010);

        assert_eq!(m.leap_indicator(), 3);
        assert_eq!(m.version(), 7);
        assert_eq!(m.mode(), 2);
    }

    #[test]
    fn test_reference_identifier_padding_and_truncation() {
        let short = Message::default().with_reference_identifier(b"GP");
        let long = Message::default().with_reference_identifier(b"PPSX1");

        assert_eq!(short.reference_identifier(), [b'G', b'P', 0, 0]);
        assert_eq!(&long.reference_identifier(), b"PPSX");
    }

    #[test]
    fn test_error_classification() {
        assert!(Error::AddressResolve.is_transport());
        assert!(Error::Network(io::ErrorKind::ConnectionRefused).is_transport());
        assert!(Error::IncorrectMode.is_protocol());
        assert!(!Error::Timeout.is_transport());
        assert!(!Error::Timeout.is_protocol());
        assert_eq!(
            Error::from(io::Error::from(io::ErrorKind::UnexpectedEof)),
            Error::IncorrectPayload
        );
        assert_eq!(
            Error::from(io::Error::from(io::ErrorKind::WouldBlock)),
            Error::Timeout
        );
        assert_eq!(
            Error::Timeout.to_string(),
            "timed out while querying the server"
        );
    }
}

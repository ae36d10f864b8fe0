//! Stateless transcoder between [`Message`] and its 48 byte big-endian wire form
//!
//! Decoding is purely structural: field values are never range checked, only a
//! datagram shorter than [`Message::PACKET_SIZE`] is rejected (with
//! [`io::ErrorKind::UnexpectedEof`]). Anything past the first 48 bytes, such as
//! extension or authentication fields, is ignored.
use std::io::{self, Read, Write};

use log::{log_enabled, trace, Level};

use crate::types::{
    Message, Timestamp, LI_MASK, LI_SHIFT, MODE_MASK, MODE_SHIFT,
    VERSION_MASK, VERSION_SHIFT,
};

/// 16.16 fixed point scale
const FIXED_POINT_SCALE: f64 = 65536.0;

/// Wire representation of a [`Message`]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct RawNtpPacket(pub [u8; Message::PACKET_SIZE]);

impl Default for RawNtpPacket {
    fn default() -> Self {
        RawNtpPacket([0u8; Message::PACKET_SIZE])
    }
}

impl From<&Message> for RawNtpPacket {
    fn from(val: &Message) -> Self {
        let mut tmp_buf = [0u8; Message::PACKET_SIZE];

        tmp_buf[0] = ((val.leap_indicator() << LI_SHIFT) & LI_MASK)
            | ((val.version() << VERSION_SHIFT) & VERSION_MASK)
            | ((val.mode() << MODE_SHIFT) & MODE_MASK);
        tmp_buf[1] = val.stratum().to_be_bytes()[0];
        tmp_buf[2] = val.poll().to_be_bytes()[0];
        tmp_buf[3] = val.precision().to_be_bytes()[0];
        encode32(encode_fixed_point(val.root_delay()), &mut tmp_buf[4..8]);
        encode32(
            encode_fixed_point(val.root_dispersion()),
            &mut tmp_buf[8..12],
        );
        tmp_buf[12..16].copy_from_slice(&val.reference_identifier());
        encode_timestamp(val.reference_timestamp(), &mut tmp_buf[16..24]);
        encode_timestamp(val.originate_timestamp(), &mut tmp_buf[24..32]);
        encode_timestamp(val.receive_timestamp(), &mut tmp_buf[32..40]);
        encode_timestamp(val.transmit_timestamp(), &mut tmp_buf[40..48]);

        RawNtpPacket(tmp_buf)
    }
}

impl From<RawNtpPacket> for Message {
    fn from(val: RawNtpPacket) -> Self {
        let buf = &val.0;
        let shifter = |mask: u8, shift: u8| (buf[0] & mask) >> shift;

        Message::default()
            .with_leap_indicator(shifter(LI_MASK, LI_SHIFT))
            .with_version(shifter(VERSION_MASK, VERSION_SHIFT))
            .with_mode(shifter(MODE_MASK, MODE_SHIFT))
            .with_stratum(i8::from_be_bytes([buf[1]]))
            .with_poll(i8::from_be_bytes([buf[2]]))
            .with_precision(i8::from_be_bytes([buf[3]]))
            .with_root_delay(decode_fixed_point(decode32(&buf[4..8])))
            .with_root_dispersion(decode_fixed_point(decode32(&buf[8..12])))
            .with_reference_identifier(&buf[12..16])
            .with_reference_timestamp(decode_timestamp(&buf[16..24]))
            .with_originate_timestamp(decode_timestamp(&buf[24..32]))
            .with_receive_timestamp(decode_timestamp(&buf[32..40]))
            .with_transmit_timestamp(decode_timestamp(&buf[40..48]))
    }
}

/// Encode a message into its wire form
#[must_use]
pub fn encode(message: &Message) -> RawNtpPacket {
    RawNtpPacket::from(message)
}

/// Decode a message from the first 48 bytes of `buf`
///
/// # Errors
///
/// Returns [`io::ErrorKind::UnexpectedEof`] if `buf` holds fewer than 48 bytes
pub fn decode(buf: &[u8]) -> io::Result<Message> {
    let mut input = buf;

    read_message(&mut input)
}

/// Write the wire form of `message` to `output`
///
/// # Errors
///
/// Propagates any error of the underlying writer
pub fn write_message<W: Write>(message: &Message, output: &mut W) -> io::Result<()> {
    output.write_all(&encode(message).0)
}

/// Read exactly one message from `input`
///
/// # Errors
///
/// Propagates any error of the underlying reader; a short read surfaces as
/// [`io::ErrorKind::UnexpectedEof`]
pub fn read_message<R: Read>(input: &mut R) -> io::Result<Message> {
    let mut raw = RawNtpPacket::default();

    input.read_exact(&mut raw.0)?;
    Ok(Message::from(raw))
}

/// Convert seconds into a signed 16.16 fixed point value
///
/// Values outside of the representable range saturate, NaN encodes as 0.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
#[must_use]
pub fn encode_fixed_point(value: f64) -> u32 {
    (value * FIXED_POINT_SCALE).round() as i32 as u32
}

/// Convert a signed 16.16 fixed point value into seconds
#[allow(clippy::cast_possible_wrap)]
#[must_use]
pub fn decode_fixed_point(raw: u32) -> f64 {
    f64::from(raw as i32) / FIXED_POINT_SCALE
}

fn encode32(number: u32, output: &mut [u8]) {
    output.copy_from_slice(&number.to_be_bytes());
}

fn decode32(input: &[u8]) -> u32 {
    let mut temp_buf = [0u8; 4];

    temp_buf.copy_from_slice(input);
    u32::from_be_bytes(temp_buf)
}

fn encode_timestamp(timestamp: Timestamp, output: &mut [u8]) {
    encode32(timestamp.integer(), &mut output[..4]);
    encode32(timestamp.fraction(), &mut output[4..]);
}

fn decode_timestamp(input: &[u8]) -> Timestamp {
    Timestamp::from_parts(decode32(&input[..4]), decode32(&input[4..]))
}

/// Dump every field of a message at trace level
pub(crate) fn trace_message(direction: &str, message: &Message) {
    if !log_enabled!(Level::Trace) {
        return;
    }

    let delimiter = "=".repeat(64);
    let ref_id = message.reference_identifier();

    trace!("{delimiter}");
    trace!("| {direction}");
    trace!("| Mode:\t\t{}", message.mode());
    trace!("| Version:\t{}", message.version());
    trace!("| Leap:\t\t{}", message.leap_indicator());
    trace!("| Stratum:\t{}", message.stratum());
    trace!("| Poll:\t\t{}", message.poll());
    trace!("| Precision:\t\t{}", message.precision());
    trace!("| Root delay:\t\t{}", message.root_delay());
    trace!("| Root dispersion:\t{}", message.root_dispersion());
    trace!(
        "| Reference ID:\t\t{}",
        core::str::from_utf8(&ref_id).unwrap_or("")
    );
    trace!(
        "| Reference timestamp:\t{:>24}",
        message.reference_timestamp()
    );
    trace!(
        "| Originate timestamp:\t{:>24}",
        message.originate_timestamp()
    );
    trace!("| Receive timestamp:\t{:>24}", message.receive_timestamp());
    trace!("| Transmit timestamp:\t{:>24}", message.transmit_timestamp());
    trace!("{delimiter}");
}

#[cfg(test)]
mod sntp_codec_tests {
    use super::{
        decode, decode_fixed_point, encode, encode_fixed_point, read_message,
        write_message,
    };
    use crate::types::{Message, Timestamp};
    use std::io;

    fn server_reply() -> Message {
        Message::default()
            .with_leap_indicator(Message::LI_LAST_MINUTE_59)
            .with_version(Message::VERSION_3)
            .with_mode(Message::MODE_SERVER)
            .with_stratum(2)
            .with_poll(6)
            .with_precision(-23)
            .with_root_delay(0.015_625)
            .with_root_dispersion(-1.5)
            .with_reference_identifier(b"GPS\0")
            .with_reference_timestamp(Timestamp::from_parts(3_913_055_990, 1))
            .with_originate_timestamp(Timestamp::from_parts(
                3_913_056_000,
                u32::MAX,
            ))
            .with_receive_timestamp(Timestamp::from_parts(3_913_056_001, 7))
            .with_transmit_timestamp(Timestamp::from_parts(
                3_913_056_001,
                0x8000_0000,
            ))
    }

    #[test]
    fn test_default_request_wire_layout() {
        let raw = encode(&Message::default());

        // LI 0, VN 4, mode 3
        assert_eq!(raw.0[0], 0b0010_0011);
        assert_eq!(&raw.0[1..12], &[0u8; 11]);
        assert_eq!(&raw.0[12..16], b"LOCL");
        assert_eq!(&raw.0[16..48], &[0u8; 32]);
    }

    #[test]
    fn test_header_and_signed_fields_layout() {
        let raw = encode(&server_reply());

        assert_eq!(raw.0[0], 0b1001_1100);
        assert_eq!(raw.0[1], 2);
        assert_eq!(raw.0[2], 6);
        assert_eq!(raw.0[3], 0xe9);
        assert_eq!(&raw.0[4..8], &[0x00, 0x00, 0x04, 0x00]);
        assert_eq!(&raw.0[8..12], &[0xff, 0xfe, 0x80, 0x00]);
        assert_eq!(&raw.0[24..32], &[0xe9, 0x3c, 0x7f, 0x00, 0xff, 0xff, 0xff, 0xff]);
        assert_eq!(&raw.0[44..48], &[0x80, 0x00, 0x00, 0x00]);
    }

    #[test]
    fn test_decode_inverts_encode() {
        let messages = [
            Message::default(),
            server_reply(),
            server_reply()
                .with_leap_indicator(Message::LI_ALARM)
                .with_mode(Message::MODE_PRIVATE)
                .with_version(7)
                .with_stratum(-128)
                .with_poll(127),
        ];

        for m in messages {
            assert_eq!(decode(&encode(&m).0).unwrap(), m);
        }
    }

    #[test]
    fn test_short_reference_identifier_is_zero_padded_on_the_wire() {
        let m = Message::default().with_reference_identifier(b"X");
        let raw = encode(&m);

        assert_eq!(&raw.0[12..16], &[b'X', 0, 0, 0]);
    }

    #[test]
    fn test_long_reference_identifier_is_truncated_on_the_wire() {
        let m = Message::default().with_reference_identifier(b"ABCDEFG");
        let raw = encode(&m);

        assert_eq!(&raw.0[12..16], b"ABCD");
    }

    #[test]
    fn test_decode_is_permissive() {
        let mut buf = [0xffu8; Message::PACKET_SIZE];
        buf[1] = 0x80;

        let m = decode(&buf).unwrap();

        assert_eq!(m.leap_indicator(), 3);
        assert_eq!(m.version(), 7);
        assert_eq!(m.mode(), 7);
        assert_eq!(m.stratum(), -128);
        assert_eq!(m.transmit_timestamp(), Timestamp::from_parts(u32::MAX, u32::MAX));
    }

    #[test]
    fn test_decode_ignores_trailing_bytes() {
        let mut buf = [0u8; Message::MAXIMUM_LENGTH];
        buf[..Message::PACKET_SIZE].copy_from_slice(&encode(&server_reply()).0);
        buf[Message::PACKET_SIZE..].fill(0xaa);

        assert_eq!(decode(&buf).unwrap(), server_reply());
    }

    #[test]
    fn test_truncated_datagram_is_an_io_error() {
        let raw = encode(&server_reply());
        let err = decode(&raw.0[..47]).unwrap_err();

        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
        assert_eq!(decode(&[]).unwrap_err().kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn test_stream_helpers() {
        let mut out = Vec::new();
        write_message(&server_reply(), &mut out).unwrap();
        write_message(&Message::default(), &mut out).unwrap();

        assert_eq!(out.len(), 2 * Message::PACKET_SIZE);

        let mut input = out.as_slice();
        assert_eq!(read_message(&mut input).unwrap(), server_reply());
        assert_eq!(read_message(&mut input).unwrap(), Message::default());
        assert!(read_message(&mut input).is_err());
    }

    #[test]
    fn test_fixed_point_within_one_step() {
        let step = 1.0 / 65536.0;
        let values = [0.0, 1.0, -1.0, 0.5, 1e-5, -1e-5, 0.123_456_789, 32767.99, -32768.0];

        for v in values {
            let back = decode_fixed_point(encode_fixed_point(v));
            assert!((back - v).abs() <= step, "{v} decoded as {back}");
        }
    }

    #[test]
    fn test_arbitrary_root_values_survive_the_wire() {
        let m = Message::default()
            .with_root_delay(0.1)
            .with_root_dispersion(50_000.0);

        assert_eq!(m.root_dispersion(), decode_fixed_point(0x7fff_ffff));
        assert_eq!(decode(&encode(&m).0).unwrap(), m);

        let m = Message::default()
            .with_root_delay(-0.333_333)
            .with_root_dispersion(-40_000.0);

        assert_eq!(m.root_dispersion(), -32768.0);
        assert_eq!(decode(&encode(&m).0).unwrap(), m);
    }

    #[test]
    fn test_fixed_point_raw_values() {
        assert_eq!(encode_fixed_point(1.0), 0x0001_0000);
        assert_eq!(encode_fixed_point(-1.0), 0xffff_0000);
        assert_eq!(decode_fixed_point(0x0000_8000), 0.5);
        assert_eq!(decode_fixed_point(0xffff_8000), -0.5);
        assert_eq!(encode_fixed_point(40_000.0), 0x7fff_ffff);
        assert_eq!(encode_fixed_point(-40_000.0), 0x8000_0000);
        assert_eq!(encode_fixed_point(f64::NAN), 0);
    }
}

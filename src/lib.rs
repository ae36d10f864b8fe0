//! Blocking SNTP client
//!
//! # Overview
//!
//! This crate queries an SNTP server over UDP and computes how far the local
//! clock is from network time. Supported SNTP protocol versions:
//! - [SNTPv4](https://datatracker.ietf.org/doc/html/rfc2030)
//!
//! # Usage
//!
//! Put this in your `Cargo.toml`:
//! ```cargo
//! [dependencies]
//! atomic-sntp = "0.1"
//! ```
//!
//! ## Features
//!
//! - `utils`: `chrono` based date helpers, see [`utils`]
//! - `cli`: the `sntp-offset` command line tool
//!
//! # Details
//!
//! The building blocks are exposed separately:
//! - [`Message`] and [`Timestamp`] model the 48 byte SNTP packet
//! - [`codec`] turns a [`Message`] into its wire form and back
//! - [`Sender`] writes a request to a socket, [`Listener`] runs a background
//!   receive loop that hands every decoded datagram to a callback
//! - [`Client`] ties them together: it sends a request, waits for the reply
//!   that answers it and computes the offset from the four timestamps
//! - [`Service`] keeps a client open and re-synchronises periodically
//!
//! The local clock is read through [`NtpTimestampGenerator`], so any time
//! source can be plugged in; [`StdTimestampGen`] uses `std::time`.
//!
//! ## Logging support
//!
//! Library logs go through the `log` facade. Request destinations and
//! computed offsets are reported at `debug`, full packet dumps at `trace`.
//!
//! # Example
//!
//! ```no_run
//! use atomic_sntp::{Client, DEFAULT_SNTP_PORT};
//! use std::time::Duration;
//!
//! let client = Client::open(Duration::from_secs(2)).expect("Unable to open SNTP client");
//! let result = client
//!     .query("pool.ntp.org", DEFAULT_SNTP_PORT)
//!     .expect("Unable to receive time");
//!
//! println!("offset: {} ms, roundtrip: {} ms", result.offset(), result.roundtrip());
//! ```
pub mod codec;

mod client;
mod config;
mod listener;
mod sender;
mod service;
mod sup;
mod types;

#[cfg(feature = "utils")]
pub mod utils;

pub use crate::client::{
    offset_calculate, roundtrip_calculate, Client, DEFAULT_SNTP_PORT,
    DEFAULT_TIMEOUT,
};
pub use crate::config::{
    Config, DEFAULT_SERVER_HOST, ENV_SERVER, ENV_SYNC_PERIOD_MS,
    ENV_TIMEOUT_MS,
};
pub use crate::listener::{Inbound, Listener};
pub use crate::sender::Sender;
pub use crate::service::Service;
pub use crate::sup::{
    from_timestamp, to_timestamp, NtpTimestampGenerator, StdTimestampGen,
    NTP_TIMESTAMP_DELTA,
};
pub use crate::types::*;

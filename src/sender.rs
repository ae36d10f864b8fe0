use std::io;
use std::net::{SocketAddr, UdpSocket};

use log::debug;

use crate::codec::{self, trace_message};
use crate::types::Message;

/// Serializes messages onto a borrowed UDP socket
///
/// Every [`Sender::send`] makes exactly one transmission attempt. There is no
/// buffering and no retry; a lost datagram is the caller's concern.
#[derive(Debug, Clone, Copy)]
pub struct Sender<'a> {
    socket: &'a UdpSocket,
}

impl<'a> Sender<'a> {
    #[must_use]
    pub fn new(socket: &'a UdpSocket) -> Self {
        Sender { socket }
    }

    /// Encode `message` and send it as a single datagram to `dest`
    ///
    /// # Errors
    ///
    /// Returns [`io::ErrorKind::InvalidInput`] for port 0, any error of the
    /// underlying `send_to`, and [`io::ErrorKind::WriteZero`] when the
    /// datagram went out short.
    pub fn send(&self, message: &Message, dest: SocketAddr) -> io::Result<()> {
        if dest.port() == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "destination port is 0",
            ));
        }

        let buf = codec::encode(message);

        debug!("send request - Address: {dest:?}");
        trace_message("request", message);

        let size = self.socket.send_to(&buf.0, dest)?;

        if size == buf.0.len() {
            Ok(())
        } else {
            Err(io::Error::new(
                io::ErrorKind::WriteZero,
                "partial SNTP datagram sent",
            ))
        }
    }
}

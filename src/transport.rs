//! Transport adapter seam
//!
//! One TCP socket, addressed by a small handle, exposed the way a TCP offload
//! chip exposes it: a status register that is polled, plus open / listen /
//! send / receive / close primitives that never block the polling loop.

use core::fmt;
use core::net::Ipv4Addr;

/// Socket status as reported by the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketState {
    /// No socket resources in use
    Closed,
    /// Opened on a port but not yet listening
    Init,
    /// Waiting for a peer
    Listening,
    /// Connected to a peer
    Established,
    /// Peer sent FIN, local close pending
    CloseWait,
    /// Handshake or teardown in progress; nothing to do this tick
    Transitional,
}

/// Remote end of an established connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerEndpoint {
    pub address: Ipv4Addr,
    pub port: u16,
}

impl fmt::Display for PeerEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} : {}", self.address, self.port)
    }
}

/// Transport failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportError {
    /// `open` called while the socket is still in use
    NotClosed,
    /// `listen` called on a socket that was never opened
    NotOpened,
    /// The stack refused to listen on the port
    Listen,
    /// Reading from the socket failed
    Receive,
    /// The peer is gone or the socket can no longer send
    Send,
    /// The socket stopped draining before the chunk was fully queued
    SendTimeout,
    /// The connection was torn down underneath the caller
    ConnectionClosed,
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            TransportError::NotClosed => "socket is not closed",
            TransportError::NotOpened => "socket was not opened",
            TransportError::Listen => "listen rejected",
            TransportError::Receive => "receive failed",
            TransportError::Send => "send failed",
            TransportError::SendTimeout => "send timed out",
            TransportError::ConnectionClosed => "connection closed",
        };
        f.write_str(text)
    }
}

/// Non-blocking access to a single TCP socket
pub trait Transport {
    /// Handle used in log output
    fn socket_id(&self) -> u8;

    /// Current socket status. Pure query.
    fn status(&self) -> SocketState;

    /// Reserve the socket for TCP on `port`. Closed -> Init.
    fn open(&mut self, port: u16) -> Result<(), TransportError>;

    /// Start accepting a peer. Init -> Listening.
    fn listen(&mut self) -> Result<(), TransportError>;

    /// Set once when a connection becomes established, until cleared.
    fn connect_flag(&self) -> bool;

    /// Acknowledge the connection-established flag.
    fn clear_connect_flag(&mut self);

    /// Remote endpoint of the current connection, if any.
    fn peer(&self) -> Option<PeerEndpoint>;

    /// Bytes buffered and ready to be received.
    fn receive_available(&self) -> usize;

    /// Copy up to `buf.len()` pending bytes into `buf`.
    fn receive(&mut self, buf: &mut [u8]) -> Result<usize, TransportError>;

    /// Queue all of `bytes` for transmission.
    ///
    /// Partial writes are handled here; callers treat each call as atomic.
    fn send(&mut self, bytes: &[u8]) -> Result<(), TransportError>;

    /// Hard close (reset) of the socket.
    fn close(&mut self) -> Result<(), TransportError>;

    /// Graceful close (FIN) of an established or half-closed connection.
    fn disconnect(&mut self) -> Result<(), TransportError>;
}

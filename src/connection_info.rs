//! Metadata about the transport a request arrived on, queryable from inside a [`crate::Handler`]
//! without threading a connection reference through every callback.

use std::net::SocketAddr;

/// TLS parameters negotiated for this connection. Only present when the daemon accepted the
/// connection through a configured TLS acceptor.
#[derive(Debug, Clone)]
pub struct TlsInfo {
    pub protocol_version: String,
    pub cipher_suite: String,
}

/// Per-connection metadata handed to the application alongside each request on that
/// connection: the peer address, and TLS parameters when applicable.
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    pub peer_addr: SocketAddr,
    pub tls: Option<TlsInfo>,
}

//! Daemon, connection, pool, and TLS configuration.
//!
//! Covers listen port/address, connection timeout, max connections, per-connection pool
//! size, TLS material, and the three registrable callbacks (accept-policy,
//! notify-completed, logger).

use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use std::time::Duration;

/// Default size of a connection's memory pool: enough for a realistic header set plus a
/// few KiB of body staging without ever touching the allocator again mid-request.
pub const DEFAULT_POOL_SIZE: usize = 32 * 1024;

/// Sizing for the per-connection [`crate::pool::Pool`].
///
/// # Examples
/// ```
/// use mhttpd::config::PoolConfig;
///
/// let cfg = PoolConfig::default();
/// assert_eq!(cfg.region_size, 32 * 1024);
/// ```
#[derive(Debug, Clone, Copy)]
pub struct PoolConfig {
    /// Total bytes available to one connection's pool for the lifetime of the connection
    /// (reused, not reallocated, across keep-alive requests via `reset_to_mark`).
    pub region_size: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        PoolConfig {
            region_size: DEFAULT_POOL_SIZE,
        }
    }
}

/// Per-connection behavioral limits: timeouts and body-size caps.
#[derive(Debug, Clone, Copy)]
pub struct ConnConfig {
    /// `0` means no timeout. Checked on every idle tick.
    pub idle_timeout: Duration,
    /// Hard cap on a buffered (non-chunked) or reassembled (chunked) request body.
    /// Exceeding it produces `413`.
    pub max_body_size: usize,
    /// Hard cap on the number of header lines accepted per request.
    pub max_header_count: usize,
    /// Hard cap on a single header line's encoded length (name + `: ` + value).
    pub max_header_line: usize,
    /// Hard cap on parsed `application/x-www-form-urlencoded` / `multipart/form-data`
    /// field count; exceeding it produces `413`.
    pub max_form_fields: usize,
}

impl Default for ConnConfig {
    fn default() -> Self {
        ConnConfig {
            idle_timeout: Duration::from_secs(30),
            max_body_size: 2 * 1024 * 1024,
            max_header_count: 64,
            max_header_line: 8 * 1024,
            max_form_fields: 128,
        }
    }
}

/// PEM-encoded TLS material plus the cipher suites to offer during negotiation.
///
/// Only the streaming read/write/handshake contract of the TLS library is used by this
/// crate; certificate parsing and key-exchange math live entirely inside `rustls`.
#[derive(Debug, Clone)]
pub struct TlsConfig {
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
    /// Cipher suites to offer during negotiation, most preferred first, named the way
    /// `rustls` names them (e.g. `"TLS13_AES_256_GCM_SHA384"`). Empty means "use the crypto
    /// provider's own default ordering" — most deployments should leave this empty.
    pub cipher_suite_priority: Vec<String>,
}

/// The three interchangeable scheduling strategies a daemon can run under. Fixed for the
/// lifetime of a [`crate::server::Daemon`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutionMode {
    /// Every accepted connection is driven to completion by its own spawned task.
    #[default]
    ThreadPerConnection,
    /// A single dedicated OS thread cooperatively drives every connection.
    InternalSelect,
    /// The host drives the event loop; the daemon exposes readiness-poll primitives.
    ExternalSelect,
}

/// Top-level daemon configuration: everything needed to call [`crate::server::Daemon::start`].
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    /// `0` requests an ephemeral port from the OS.
    pub port: u16,
    pub bind_address: IpAddr,
    /// `0` means unbounded.
    pub max_connections: usize,
    pub execution_mode: ExecutionMode,
    pub pool: PoolConfig,
    pub conn: ConnConfig,
    pub tls: Option<TlsConfig>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        DaemonConfig {
            port: 0,
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            max_connections: 0,
            execution_mode: ExecutionMode::default(),
            pool: PoolConfig::default(),
            conn: ConnConfig::default(),
            tls: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_ephemeral_and_unbounded() {
        let cfg = DaemonConfig::default();
        assert_eq!(cfg.port, 0);
        assert_eq!(cfg.max_connections, 0);
        assert!(cfg.tls.is_none());
    }
}

//! The `TLS_CONNECTION_INIT` shim: a tagged plain/TLS stream, plus the server-side
//! `rustls::ServerConfig` construction from PEM material.
//!
//! The FSM drives `Stream` as an ordinary `AsyncRead + AsyncWrite` value; it never knows
//! whether the bytes underneath are plaintext or decrypted-in-place TLS records. Handshake
//! happens once, before the stream is ever handed to [`crate::server::fsm::Connection`].

use crate::config::TlsConfig;
use crate::connection_info::TlsInfo;
use crate::errors::ServerError;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::server::TlsStream as TokioTlsStream;
use tokio_rustls::TlsAcceptor;

/// One accepted connection's transport: either a raw TCP socket or a TLS session over one.
pub(crate) enum Stream {
    Plain(TcpStream),
    Tls(Box<TokioTlsStream<TcpStream>>),
}

impl AsyncRead for Stream {
    fn poll_read(mut self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        match &mut *self {
            Stream::Plain(s) => Pin::new(s).poll_read(cx, buf),
            Stream::Tls(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for Stream {
    fn poll_write(mut self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        match &mut *self {
            Stream::Plain(s) => Pin::new(s).poll_write(cx, buf),
            Stream::Tls(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match &mut *self {
            Stream::Plain(s) => Pin::new(s).poll_flush(cx),
            Stream::Tls(s) => Pin::new(s.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match &mut *self {
            Stream::Plain(s) => Pin::new(s).poll_shutdown(cx),
            Stream::Tls(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
        }
    }
}

impl Stream {
    /// Negotiated protocol version and cipher suite, for a TLS connection; `None` for plain.
    pub(crate) fn tls_info(&self) -> Option<TlsInfo> {
        match self {
            Stream::Plain(_) => None,
            Stream::Tls(s) => {
                let (_, conn) = s.get_ref();
                Some(TlsInfo {
                    protocol_version: conn.protocol_version().map(|v| format!("{v:?}")).unwrap_or_else(|| "unknown".into()),
                    cipher_suite: conn
                        .negotiated_cipher_suite()
                        .map(|c| format!("{:?}", c.suite()))
                        .unwrap_or_else(|| "unknown".into()),
                })
            }
        }
    }
}

/// Resolves `rustls`-style cipher suite names (e.g. `"TLS13_AES_256_GCM_SHA384"`) against
/// the suites the `ring` provider actually supports, preserving the caller's order.
fn select_cipher_suites(names: &[String]) -> Result<Vec<rustls::SupportedCipherSuite>, ServerError> {
    use rustls::crypto::ring::cipher_suite::{
        TLS13_AES_128_GCM_SHA256, TLS13_AES_256_GCM_SHA384, TLS13_CHACHA20_POLY1305_SHA256,
        TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256, TLS_ECDHE_ECDSA_WITH_AES_256_GCM_SHA384,
        TLS_ECDHE_ECDSA_WITH_CHACHA20_POLY1305_SHA256, TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256,
        TLS_ECDHE_RSA_WITH_AES_256_GCM_SHA384, TLS_ECDHE_RSA_WITH_CHACHA20_POLY1305_SHA256,
    };

    names
        .iter()
        .map(|name| match name.as_str() {
            "TLS13_AES_256_GCM_SHA384" => Ok(TLS13_AES_256_GCM_SHA384),
            "TLS13_AES_128_GCM_SHA256" => Ok(TLS13_AES_128_GCM_SHA256),
            "TLS13_CHACHA20_POLY1305_SHA256" => Ok(TLS13_CHACHA20_POLY1305_SHA256),
            "TLS_ECDHE_ECDSA_WITH_AES_256_GCM_SHA384" => Ok(TLS_ECDHE_ECDSA_WITH_AES_256_GCM_SHA384),
            "TLS_ECDHE_RSA_WITH_AES_256_GCM_SHA384" => Ok(TLS_ECDHE_RSA_WITH_AES_256_GCM_SHA384),
            "TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256" => Ok(TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256),
            "TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256" => Ok(TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256),
            "TLS_ECDHE_ECDSA_WITH_CHACHA20_POLY1305_SHA256" => Ok(TLS_ECDHE_ECDSA_WITH_CHACHA20_POLY1305_SHA256),
            "TLS_ECDHE_RSA_WITH_CHACHA20_POLY1305_SHA256" => Ok(TLS_ECDHE_RSA_WITH_CHACHA20_POLY1305_SHA256),
            other => Err(ServerError::Tls(format!("unknown cipher suite in priority list: {other}"))),
        })
        .collect()
}

/// Builds the server-side TLS acceptor from PEM-encoded cert/key paths. Installs the
/// default `ring` crypto provider the first time it's called within a process, as
/// `rustls` 0.23 requires one to be selected explicitly rather than picking one itself.
pub(crate) fn build_acceptor(config: &TlsConfig) -> Result<TlsAcceptor, ServerError> {
    let default_provider = rustls::crypto::ring::default_provider();
    let _ = default_provider.clone().install_default();

    let cert_bytes = std::fs::read(&config.cert_path).map_err(ServerError::Io)?;
    let key_bytes = std::fs::read(&config.key_path).map_err(ServerError::Io)?;

    let certs = rustls_pemfile::certs(&mut &cert_bytes[..])
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| ServerError::Tls(format!("invalid certificate PEM: {e}")))?;
    let key = rustls_pemfile::private_key(&mut &key_bytes[..])
        .map_err(|e| ServerError::Tls(format!("invalid key PEM: {e}")))?
        .ok_or(ServerError::Tls("no private key found in key file".into()))?;

    let provider = if config.cipher_suite_priority.is_empty() {
        default_provider
    } else {
        rustls::crypto::CryptoProvider {
            cipher_suites: select_cipher_suites(&config.cipher_suite_priority)?,
            ..default_provider
        }
    };

    let server_config = rustls::ServerConfig::builder_with_provider(Arc::new(provider))
        .with_safe_default_protocol_versions()
        .map_err(|e| ServerError::Tls(e.to_string()))?
        .with_no_client_auth()
        .with_single_cert(certs, key)?;

    Ok(TlsAcceptor::from(Arc::new(server_config)))
}

/// Drives the `TLS_CONNECTION_INIT` handshake to completion, producing the stream the FSM
/// will read/write for the rest of the connection's life.
pub(crate) async fn accept(acceptor: &TlsAcceptor, socket: TcpStream) -> Result<Stream, ServerError> {
    let tls = acceptor
        .accept(socket)
        .await
        .map_err(|e| ServerError::Tls(format!("handshake failed: {e}")))?;
    Ok(Stream::Tls(Box::new(tls)))
}

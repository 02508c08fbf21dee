//! mhttpd - an embeddable HTTP/1.1 server core, with optional TLS
//!
//! A library, not a framework: it owns protocol parsing, connection scheduling, and wire
//! serialization; the host owns routing, application state, and everything that happens
//! between "a request arrived" and "here is the response."
//!
//! # Quick start
//!
//! ```no_run
//! use mhttpd::{Daemon, Handler, RequestView, Response, ResponseBuilder, StatusCode};
//!
//! struct Echo;
//!
//! impl Handler for Echo {
//!     async fn handle(&self, _request: &RequestView<'_>) -> Result<Response, mhttpd::HandlerError> {
//!         let (resp, _handled) = ResponseBuilder::new().status(StatusCode::Ok).body("Hello world!");
//!         Ok(resp)
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() {
//!     let daemon = Daemon::builder().handler(Echo).start().await.unwrap();
//!     println!("listening on {}", daemon.local_addr());
//!     daemon.stop(std::time::Duration::from_secs(5)).await;
//! }
//! ```
//!
//! # Concurrency model
//!
//! [`config::DaemonConfig::execution_mode`] picks how accepted connections are scheduled: a
//! task per connection (the default), one dedicated thread driving all of them
//! cooperatively, or full host-driven control via [`Daemon::run`]/[`Daemon::get_timeout`].
//! All three run the same [`Handler`] and produce identical wire behavior; they differ only
//! in who owns the event loop.
//!
//! # TLS
//!
//! Setting [`config::DaemonConfig::tls`] wraps every accepted socket in a TLS handshake
//! before it ever reaches request parsing; plaintext and TLS connections are otherwise
//! indistinguishable to the connection state machine.

pub(crate) mod header;
pub(crate) mod pool;

pub mod config;
pub mod connection_info;
pub mod errors;

pub(crate) mod http {
    pub(crate) mod chunked;
    pub(crate) mod request;
    pub(crate) mod response;
    pub(crate) mod types;
}

pub mod server;

pub use crate::{
    config::{ConnConfig, DaemonConfig, ExecutionMode, PoolConfig, TlsConfig},
    connection_info::{ConnectionInfo, TlsInfo},
    errors::{ServerError, TerminationCode},
    http::{
        request::RequestView,
        response::{BodyPoll, BodyProducer, Handled, Response, ResponseBuilder},
        types::{Method, StatusCode, Version},
    },
    server::{
        handler::{AcceptPolicy, Handler, HandlerError},
        Daemon, DaemonBuilder, Logger, NotifyCompleted, PanicHandler,
    },
};

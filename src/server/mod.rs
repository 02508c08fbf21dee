//! Everything that drives bytes on a socket: the per-connection state machine, the
//! application-facing callback traits, the TLS shim, and the daemon that ties them together.

pub(crate) mod fsm;
pub mod handler;
pub(crate) mod tls;

mod daemon;

pub use daemon::{Daemon, DaemonBuilder, Logger, NotifyCompleted, PanicHandler};
pub use handler::HandlerError;

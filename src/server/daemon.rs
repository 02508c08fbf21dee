//! The accept loop and the three interchangeable ways to drive connections to completion.
//!
//! [`DaemonBuilder`] mirrors the required-field-then-`start()` shape used for the listener
//! and handler registration elsewhere in this crate's builder family (`#[track_caller]`
//! panic on a missing required field rather than a runtime `Result`, since forgetting
//! `.handler(...)` is a programming error, not an operational one). [`Daemon`] itself holds
//! no generic parameters: by the time `start()` returns, the handler and accept-policy are
//! erased behind `Arc<dyn ...>`-free task closures, so a host can hold a plain `Daemon`
//! regardless of what concrete handler type it registered.

use crate::config::{ConnConfig, DaemonConfig, ExecutionMode};
use crate::errors::{ServerError, TerminationCode};
use crate::server::fsm::Connection;
use crate::server::handler::{AcceptPolicy, Handler};
use crate::server::tls::{self, Stream};
use socket2::{Domain, Protocol, Socket, Type};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Notify;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, info, warn};

/// Tracks connections still live, each with a flag that is set the one time its
/// notify-completed call actually fires — shared between each connection's own completion
/// path and [`Daemon::stop`]'s straggler sweep, so exactly one of them wins the race.
type PeerRegistry = Arc<Mutex<HashMap<SocketAddr, Arc<AtomicBool>>>>;

/// Invoked exactly once per connection at termination, with its peer address and the
/// reason it closed.
pub type NotifyCompleted = Arc<dyn Fn(SocketAddr, TerminationCode) + Send + Sync>;
/// A host-supplied diagnostic sink; independent of the `tracing` spans this crate also
/// emits, so a host that wants plain-text logs doesn't have to wire up a subscriber.
pub type Logger = Arc<dyn Fn(&str) + Send + Sync>;
/// Invoked when a connection hits an internal invariant violation ([`ServerError::Internal`])
/// rather than an ordinary protocol or I/O error — the one class of failure a host may want
/// to treat as fatal to the whole process rather than just this connection.
pub type PanicHandler = Arc<dyn Fn(&str) + Send + Sync>;

/// Builds a [`Daemon`]. `listener` is implicit (built from `DaemonConfig::port` /
/// `bind_address` at `start()`); `handler` is the one required field.
pub struct DaemonBuilder<H = (), A = ()>
where
    H: Handler,
    A: AcceptPolicy,
{
    config: DaemonConfig,
    handler: Option<Arc<H>>,
    accept_policy: Arc<A>,
    notify_completed: Option<NotifyCompleted>,
    logger: Option<Logger>,
    panic_handler: Option<PanicHandler>,
}

impl DaemonBuilder<(), ()> {
    pub fn new() -> Self {
        DaemonBuilder {
            config: DaemonConfig::default(),
            handler: None,
            accept_policy: Arc::new(()),
            notify_completed: None,
            logger: None,
            panic_handler: None,
        }
    }
}

impl Default for DaemonBuilder<(), ()> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H, A> DaemonBuilder<H, A>
where
    H: Handler,
    A: AcceptPolicy,
{
    pub fn config(mut self, config: DaemonConfig) -> Self {
        self.config = config;
        self
    }

    pub fn handler<H2: Handler>(self, handler: H2) -> DaemonBuilder<H2, A> {
        DaemonBuilder {
            config: self.config,
            handler: Some(Arc::new(handler)),
            accept_policy: self.accept_policy,
            notify_completed: self.notify_completed,
            logger: self.logger,
            panic_handler: self.panic_handler,
        }
    }

    pub fn accept_policy<A2: AcceptPolicy>(self, policy: A2) -> DaemonBuilder<H, A2> {
        DaemonBuilder {
            config: self.config,
            handler: self.handler,
            accept_policy: Arc::new(policy),
            notify_completed: self.notify_completed,
            logger: self.logger,
            panic_handler: self.panic_handler,
        }
    }

    pub fn notify_completed(mut self, f: impl Fn(SocketAddr, TerminationCode) + Send + Sync + 'static) -> Self {
        self.notify_completed = Some(Arc::new(f));
        self
    }

    pub fn logger(mut self, f: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.logger = Some(Arc::new(f));
        self
    }

    /// Registers a callback fired when a connection hits an internal invariant violation
    /// rather than an ordinary protocol/I/O error. The affected connection is still closed
    /// normally; this exists for hosts that want to treat such errors as fatal (crash-and-
    /// restart) rather than merely log-and-continue.
    pub fn panic_handler(mut self, f: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.panic_handler = Some(Arc::new(f));
        self
    }

    /// Binds the listen socket and starts accepting connections under the configured
    /// [`ExecutionMode`].
    ///
    /// # Panics
    ///
    /// Panics if `.handler(...)` was never called.
    #[track_caller]
    pub async fn start(self) -> Result<Daemon, ServerError> {
        let handler = self.handler.expect("the `handler` method must be called before `start`");
        Daemon::start(
            self.config,
            handler,
            self.accept_policy,
            self.notify_completed,
            self.logger,
            self.panic_handler,
        )
        .await
    }
}

struct Shared<H, A> {
    handler: Arc<H>,
    accept_policy: Arc<A>,
    conn_config: ConnConfig,
    pool_size: usize,
    tls_acceptor: Option<TlsAcceptor>,
    notify_completed: Option<NotifyCompleted>,
    logger: Option<Logger>,
    panic_handler: Option<PanicHandler>,
    live_connections: Arc<AtomicUsize>,
    live_peers: PeerRegistry,
    max_connections: usize,
}

impl<H, A> Shared<H, A>
where
    H: Handler,
    A: AcceptPolicy,
{
    fn log(&self, message: &str) {
        if let Some(logger) = &self.logger {
            logger(message);
        }
    }

    fn notify(&self, peer: SocketAddr, code: TerminationCode) {
        if let Some(f) = &self.notify_completed {
            f(peer, code);
        }
    }

    fn panic(&self, message: &str) {
        if let Some(f) = &self.panic_handler {
            f(message);
        }
    }

    /// Registers `peer` as live, returning the flag that guards its one notify-completed
    /// call against [`Daemon::stop`]'s straggler sweep.
    fn register_peer(&self, peer: SocketAddr) -> Arc<AtomicBool> {
        let flag = Arc::new(AtomicBool::new(false));
        self.live_peers.lock().unwrap().insert(peer, flag.clone());
        flag
    }

    /// Fires the notify-completed callback for `peer` unless [`Daemon::stop`] already fired
    /// it first, then drops the bookkeeping entry.
    fn notify_once(&self, peer: SocketAddr, flag: &Arc<AtomicBool>, code: TerminationCode) {
        if !flag.swap(true, Ordering::AcqRel) {
            self.notify(peer, code);
        }
        self.live_peers.lock().unwrap().remove(&peer);
    }
}

enum ModeHandle {
    ThreadPerConnection(tokio::task::JoinHandle<()>),
    InternalSelect(Option<std::thread::JoinHandle<()>>),
    ExternalSelect(ExternalState),
}

struct ExternalState {
    accept_task: tokio::task::JoinHandle<()>,
    #[cfg(unix)]
    listen_fd: std::os::unix::io::RawFd,
}

/// A running server. Holds no generic parameters regardless of the handler/accept-policy
/// types the builder was configured with.
pub struct Daemon {
    local_addr: SocketAddr,
    shutdown: Arc<Notify>,
    live_connections: Arc<AtomicUsize>,
    live_peers: PeerRegistry,
    notify_completed: Option<NotifyCompleted>,
    idle_timeout: Duration,
    mode: ModeHandle,
}

impl Daemon {
    pub fn builder() -> DaemonBuilder<(), ()> {
        DaemonBuilder::new()
    }

    async fn start<H, A>(
        config: DaemonConfig,
        handler: Arc<H>,
        accept_policy: Arc<A>,
        notify_completed: Option<NotifyCompleted>,
        logger: Option<Logger>,
        panic_handler: Option<PanicHandler>,
    ) -> Result<Daemon, ServerError>
    where
        H: Handler,
        A: AcceptPolicy,
    {
        let tls_acceptor = match &config.tls {
            Some(tls_config) => Some(tls::build_acceptor(tls_config)?),
            None => None,
        };

        let bind_addr = SocketAddr::new(config.bind_address, config.port);
        let domain = if bind_addr.is_ipv6() { Domain::IPV6 } else { Domain::IPV4 };
        let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP)).map_err(ServerError::Io)?;
        socket.set_reuse_address(true).map_err(ServerError::Io)?;
        socket.set_nonblocking(true).map_err(ServerError::Io)?;
        socket.bind(&bind_addr.into()).map_err(ServerError::Io)?;
        socket.listen(1024).map_err(ServerError::Io)?;
        let listener = TcpListener::from_std(socket.into()).map_err(ServerError::Io)?;
        let local_addr = listener.local_addr().map_err(ServerError::Io)?;

        let live_connections = Arc::new(AtomicUsize::new(0));
        let live_peers: PeerRegistry = Arc::new(Mutex::new(HashMap::new()));
        let shared = Arc::new(Shared {
            handler,
            accept_policy,
            conn_config: config.conn,
            pool_size: config.pool.region_size,
            tls_acceptor,
            notify_completed: notify_completed.clone(),
            logger,
            panic_handler,
            live_connections: live_connections.clone(),
            live_peers: live_peers.clone(),
            max_connections: config.max_connections,
        });
        let shutdown = Arc::new(Notify::new());

        shared.log(&format!("listening on {local_addr}"));

        let mode = match config.execution_mode {
            ExecutionMode::ThreadPerConnection => {
                let shared = shared.clone();
                let shutdown = shutdown.clone();
                let task = tokio::spawn(async move {
                    accept_loop(listener, shared, shutdown, |fut| {
                        tokio::spawn(fut);
                    })
                    .await;
                });
                ModeHandle::ThreadPerConnection(task)
            }
            ExecutionMode::InternalSelect => {
                let shared = shared.clone();
                let shutdown = shutdown.clone();
                let listener_std = listener.into_std().map_err(ServerError::Io)?;
                let thread = std::thread::Builder::new()
                    .name("mhttpd-internal-select".into())
                    .spawn(move || {
                        let runtime = tokio::runtime::Builder::new_current_thread()
                            .enable_all()
                            .build()
                            .expect("failed to build internal-select runtime");
                        let local = tokio::task::LocalSet::new();
                        local.block_on(&runtime, async move {
                            let listener = TcpListener::from_std(listener_std).expect("listener already registered");
                            accept_loop(listener, shared, shutdown, |fut| {
                                tokio::task::spawn_local(fut);
                            })
                            .await;
                        });
                    })
                    .map_err(ServerError::Io)?;
                ModeHandle::InternalSelect(Some(thread))
            }
            ExecutionMode::ExternalSelect => {
                #[cfg(unix)]
                let listen_fd = {
                    use std::os::unix::io::AsRawFd;
                    listener.as_raw_fd()
                };
                let shared = shared.clone();
                let shutdown = shutdown.clone();
                let accept_task = tokio::spawn(async move {
                    accept_loop(listener, shared, shutdown, |fut| {
                        tokio::spawn(fut);
                    })
                    .await;
                });
                ModeHandle::ExternalSelect(ExternalState {
                    accept_task,
                    #[cfg(unix)]
                    listen_fd,
                })
            }
        };

        Ok(Daemon {
            local_addr,
            shutdown,
            live_connections,
            live_peers,
            notify_completed,
            idle_timeout: config.conn.idle_timeout,
            mode,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn live_connections(&self) -> usize {
        self.live_connections.load(Ordering::Acquire)
    }

    /// Valid only under [`ExecutionMode::ExternalSelect`]; otherwise always `None`.
    ///
    /// Reports a conservative upper bound (the configured idle timeout) rather than the
    /// exact soonest per-connection deadline: connections are still driven by independent
    /// tokio tasks, so there is no central last-activity table to take a minimum over. A
    /// host that calls `run` at least this often will still observe every timeout promptly.
    pub fn get_timeout(&self) -> Option<Duration> {
        match &self.mode {
            ModeHandle::ExternalSelect(_) if !self.idle_timeout.is_zero() => Some(self.idle_timeout),
            _ => None,
        }
    }

    /// Valid only under [`ExecutionMode::ExternalSelect`]. Returns the listen socket's raw
    /// fd; per-connection fds stay internal to the tokio reactor tasks spawned at `start`,
    /// since this crate backs every mode with the same tokio I/O driver rather than a
    /// separate raw-epoll path.
    #[cfg(unix)]
    pub fn fill_readiness_sets(&self) -> Vec<std::os::unix::io::RawFd> {
        match &self.mode {
            ModeHandle::ExternalSelect(state) => vec![state.listen_fd],
            _ => Vec::new(),
        }
    }

    /// Valid only under [`ExecutionMode::ExternalSelect`]: blocks until either a
    /// connection-set change wakes the daemon or `budget` elapses, whichever is first. A
    /// no-op (returns immediately) under the other two modes, which drive themselves.
    pub async fn run(&self, budget: Duration) {
        if matches!(self.mode, ModeHandle::ExternalSelect(_)) {
            tokio::select! {
                _ = self.shutdown.notified() => {}
                _ = tokio::time::sleep(budget) => {}
            }
        }
    }

    /// Stops accepting new connections and waits up to `grace_period` for in-flight
    /// connections to finish on their own. Anything still live after the deadline gets its
    /// one notify-completed call synthesized here with [`TerminationCode::DaemonShutdown`]
    /// before the accept loop (and, for `InternalSelect`, its dedicated thread) is torn down.
    /// The connection's own task may still be running in the background afterward; the
    /// per-peer flag swapped here is the same one its own completion path checks, so it will
    /// not notify a second time for the same peer.
    pub async fn stop(self, grace_period: Duration) {
        self.shutdown.notify_waiters();
        let deadline = Instant::now() + grace_period;
        while self.live_connections.load(Ordering::Acquire) > 0 && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        let stragglers: Vec<(SocketAddr, Arc<AtomicBool>)> =
            self.live_peers.lock().unwrap().iter().map(|(peer, flag)| (*peer, flag.clone())).collect();
        for (peer, flag) in stragglers {
            if !flag.swap(true, Ordering::AcqRel) {
                if let Some(f) = &self.notify_completed {
                    f(peer, TerminationCode::DaemonShutdown);
                }
            }
        }
        match self.mode {
            ModeHandle::ThreadPerConnection(task) => {
                task.abort();
            }
            ModeHandle::InternalSelect(thread) => {
                if let Some(thread) = thread {
                    let _ = thread.join();
                }
            }
            ModeHandle::ExternalSelect(state) => {
                state.accept_task.abort();
            }
        }
    }
}

async fn accept_loop<H, A>(listener: TcpListener, shared: Arc<Shared<H, A>>, shutdown: Arc<Notify>, spawn: impl Fn(std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>>))
where
    H: Handler,
    A: AcceptPolicy,
{
    loop {
        if shared.max_connections != 0 {
            while shared.live_connections.load(Ordering::Acquire) >= shared.max_connections {
                tokio::select! {
                    _ = shutdown.notified() => return,
                    _ = tokio::time::sleep(Duration::from_millis(10)) => {}
                }
            }
        }

        tokio::select! {
            _ = shutdown.notified() => return,
            accepted = listener.accept() => {
                let (socket, peer) = match accepted {
                    Ok(v) => v,
                    Err(e) => {
                        warn!(error = %e, "accept failed");
                        continue;
                    }
                };
                if !shared.accept_policy.accept(peer) {
                    debug!(%peer, "connection rejected by accept policy");
                    continue;
                }
                let _ = socket.set_nodelay(true);
                let shared = shared.clone();
                shared.live_connections.fetch_add(1, Ordering::AcqRel);
                spawn(Box::pin(async move {
                    run_one_connection(socket, peer, &shared).await;
                    shared.live_connections.fetch_sub(1, Ordering::AcqRel);
                }));
            }
        }
    }
}

async fn run_one_connection<H, A>(socket: TcpStream, peer: SocketAddr, shared: &Arc<Shared<H, A>>)
where
    H: Handler,
    A: AcceptPolicy,
{
    let flag = shared.register_peer(peer);

    let mut stream = match &shared.tls_acceptor {
        Some(acceptor) => match tls::accept(acceptor, socket).await {
            Ok(s) => s,
            Err(e) => {
                shared.log(&format!("tls handshake with {peer} failed: {e}"));
                shared.notify_once(peer, &flag, TerminationCode::TlsError);
                return;
            }
        },
        None => Stream::Plain(socket),
    };

    let conn_info = crate::connection_info::ConnectionInfo {
        peer_addr: peer,
        tls: stream.tls_info(),
    };
    let mut conn = Connection::new(shared.pool_size, conn_info);
    let result = conn
        .run(&mut stream, shared.handler.as_ref(), shared.accept_policy.as_ref(), &shared.conn_config)
        .await;

    // Best-effort close_notify/TCP shutdown; the peer may already be gone, so a failure here
    // is not itself reported as a connection error.
    let _ = stream.shutdown().await;

    let code = match &result {
        Ok(()) => TerminationCode::CompletedOk,
        Err(e) => {
            shared.log(&format!("connection with {peer} ended: {e}"));
            if let ServerError::Internal(msg) = e {
                shared.panic(msg);
            }
            e.termination_code()
        }
    };
    info!(%peer, ?code, "connection closed");
    shared.notify_once(peer, &flag, code);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_defaults_are_unbounded_and_ephemeral() {
        let builder = DaemonBuilder::new().handler(());
        assert_eq!(builder.config.port, 0);
        assert_eq!(builder.config.max_connections, 0);
    }
}

//! Listening socket and accept loop.

use super::pool::{PoolConfig, WorkerPool};
use super::process::{fork_worker, reap_children};
use super::threads::ThreadSpawner;
use super::{serve, ConcurrencyMode, Connection, Dialogue};
use crate::error::ServerError;
use crate::shutdown::{install_child_signal, SignalFlag};
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, TcpListener};
use std::os::unix::io::{AsRawFd, RawFd};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Pending connections the kernel may queue on the listener.
pub const BACKLOG: i32 = 1024;

/// How long the accept loop blocks before re-checking the stop flag.
pub const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Owns the listening socket and dispatches accepted connections.
#[derive(Debug)]
pub struct Acceptor {
    listener: TcpListener,
    addr: SocketAddr,
    mode: ConcurrencyMode,
    pool: PoolConfig,
    stop: SignalFlag,
    child_exited: SignalFlag,
}

impl Acceptor {
    /// Bind `bind_address:port` and start listening.
    ///
    /// An absent or empty `bind_address` means all IPv4 interfaces.
    pub fn create(
        port: u16,
        bind_address: Option<&str>,
        mode: ConcurrencyMode,
    ) -> Result<Self, ServerError> {
        let ip = match bind_address.map(str::trim).filter(|s| !s.is_empty()) {
            Some(s) => s.parse::<IpAddr>().map_err(|_| ServerError::InvalidAddress {
                addr: s.to_string(),
            })?,
            None => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        };
        let requested = SocketAddr::new(ip, port);

        let listener = create_listener(requested).map_err(|source| ServerError::Bind {
            addr: requested,
            source,
        })?;
        // Port 0 resolves to an ephemeral port.
        let addr = listener.local_addr().unwrap_or(requested);

        info!(addr = %addr, mode = %mode, backlog = BACKLOG, "Listening");

        Ok(Self {
            listener,
            addr,
            mode,
            pool: PoolConfig::default(),
            stop: SignalFlag::new(),
            child_exited: SignalFlag::new(),
        })
    }

    /// Size the worker pool used by [`ConcurrencyMode::ThreadPool`].
    pub fn with_pool(mut self, workers: usize, queue_depth: usize) -> Self {
        self.pool = PoolConfig {
            workers: workers.max(1),
            queue_depth,
        };
        self
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn mode(&self) -> ConcurrencyMode {
        self.mode
    }

    /// Flag that stops [`Acceptor::run`] when raised, e.g. by a signal.
    pub fn shutdown_handle(&self) -> SignalFlag {
        self.stop.clone()
    }

    /// Accept connections until the stop flag is raised.
    ///
    /// Per-connection failures are logged and never end the loop; only an
    /// accept error other than an interruption does. Dialogues already
    /// running in threads are waited for before returning; forked workers
    /// run on independently.
    pub fn run<D: Dialogue>(&self, dialogue: Arc<D>) -> Result<(), ServerError> {
        if self.mode == ConcurrencyMode::Fork {
            install_child_signal(&self.child_exited)?;
        }
        let mut strategy = Strategy::start(self.mode, self.pool, dialogue)?;

        info!(addr = %self.addr, mode = %self.mode, "Accept loop running");

        let result = loop {
            if self.stop.is_triggered() {
                info!("Stop requested, leaving accept loop");
                break Ok(());
            }
            if self.child_exited.take() {
                reap_children();
            }

            match self.accept() {
                Ok(Some(conn)) => strategy.dispatch(conn, self.listener.as_raw_fd()),
                Ok(None) => continue,
                Err(e) => {
                    error!(error = %e, "Accept failed");
                    break Err(ServerError::Accept(e));
                }
            }
        };

        strategy.finish();
        result
    }

    /// Wait up to [`ACCEPT_POLL_INTERVAL`] for one connection.
    ///
    /// Returns `Ok(None)` on timeout or on a benign interruption.
    fn accept(&self) -> io::Result<Option<Connection>> {
        if !wait_readable(self.listener.as_raw_fd(), ACCEPT_POLL_INTERVAL)? {
            return Ok(None);
        }

        match self.listener.accept() {
            Ok((stream, peer)) => {
                if let Err(e) = stream.set_nonblocking(false) {
                    warn!(peer = %peer, error = %e, "Cannot configure connection, dropping");
                    return Ok(None);
                }
                let conn = Connection::new(stream, Some(peer));
                info!(conn = conn.id(), peer = %peer, "Client connected");
                Ok(Some(conn))
            }
            Err(ref e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::Interrupted
                        | io::ErrorKind::WouldBlock
                        | io::ErrorKind::ConnectionAborted
                ) =>
            {
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}

/// The running form of a [`ConcurrencyMode`].
enum Strategy<D> {
    Sequential(Arc<D>),
    Fork(Arc<D>),
    Thread(ThreadSpawner<D>),
    Pool(WorkerPool),
}

impl<D: Dialogue> Strategy<D> {
    fn start(
        mode: ConcurrencyMode,
        pool: PoolConfig,
        dialogue: Arc<D>,
    ) -> Result<Self, ServerError> {
        Ok(match mode {
            ConcurrencyMode::Sequential => Strategy::Sequential(dialogue),
            ConcurrencyMode::Fork => Strategy::Fork(dialogue),
            ConcurrencyMode::Thread => Strategy::Thread(ThreadSpawner::new(dialogue)),
            ConcurrencyMode::ThreadPool => Strategy::Pool(WorkerPool::start(pool, dialogue)?),
        })
    }

    fn dispatch(&mut self, conn: Connection, listener_fd: RawFd) {
        let conn_id = conn.id();
        match self {
            // A slow client here blocks every other client until it leaves.
            Strategy::Sequential(dialogue) => {
                serve(&**dialogue, conn);
            }
            Strategy::Fork(dialogue) => {
                if let Err(e) = fork_worker(&**dialogue, conn, listener_fd) {
                    error!(conn = conn_id, error = %e, "fork failed, connection dropped");
                }
            }
            Strategy::Thread(spawner) => {
                if let Err(e) = spawner.spawn(conn) {
                    error!(conn = conn_id, error = %e, "Thread spawn failed, connection dropped");
                }
            }
            Strategy::Pool(pool) => {
                if let Err(conn) = pool.submit(conn) {
                    warn!(conn = conn_id, "Worker pool saturated, rejecting connection");
                    conn.close();
                }
            }
        }
    }

    /// Wait for in-process dialogues and collect exited children.
    fn finish(self) {
        match self {
            Strategy::Sequential(_) => {}
            Strategy::Fork(_) => {
                let reaped = reap_children();
                debug!(reaped, "Final reap");
            }
            Strategy::Thread(mut spawner) => spawner.join_all(),
            Strategy::Pool(pool) => pool.join(),
        }
    }
}

/// Create a listening socket with `SO_REUSEADDR` and a [`BACKLOG`]-deep queue.
///
/// The socket is non-blocking so the accept loop can time out and observe
/// the stop flag.
fn create_listener(addr: SocketAddr) -> io::Result<TcpListener> {
    let socket = socket2::Socket::new(
        socket2::Domain::for_address(addr),
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;

    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(BACKLOG)?;

    Ok(socket.into())
}

/// Block until `fd` is readable or `timeout` passes.
///
/// An interrupted wait counts as a timeout.
fn wait_readable(fd: RawFd, timeout: Duration) -> io::Result<bool> {
    let mut pfd = libc::pollfd {
        fd,
        events: libc::POLLIN,
        revents: 0,
    };
    let timeout_ms = timeout.as_millis().min(libc::c_int::MAX as u128) as libc::c_int;

    // SAFETY: `pfd` is a valid, exclusively borrowed pollfd for the call.
    let rc = unsafe { libc::poll(&mut pfd, 1, timeout_ms) };
    if rc < 0 {
        let err = io::Error::last_os_error();
        if err.kind() == io::ErrorKind::Interrupted {
            return Ok(false);
        }
        return Err(err);
    }
    Ok(rc > 0)
}

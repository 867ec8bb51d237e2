//! The accept loop: bind, admission control, dispatch, shutdown.

use crate::{
    errors::{Error, Result},
    limits::AcceptorLimits,
    server::connection::{self, ActiveSet, ClientConnection, FaultHook, TaskFactory},
};
use socket2::{Domain, Protocol, Socket, Type};
use std::{
    net::SocketAddr,
    sync::{
        atomic::{AtomicU64, AtomicU8, Ordering},
        Arc,
    },
};
use tokio::{
    net::{TcpListener, TcpStream},
    runtime::Handle,
    sync::{Notify, OwnedSemaphorePermit, Semaphore, TryAcquireError},
};

/// Decides, per accepted socket, whether to keep it.
///
/// Runs after admission control and before the connection is constructed.
/// The default filter (`()`) accepts everything.
pub trait AcceptFilter: Send + Sync + 'static {
    fn accept(&self, stream: &TcpStream, peer: SocketAddr) -> bool;
}

impl AcceptFilter for () {
    fn accept(&self, _: &TcpStream, _: SocketAddr) -> bool {
        true
    }
}

/// Lifecycle of an [`Acceptor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AcceptorState {
    Initialized = 0,
    Running = 1,
    ShuttingDown = 2,
    Stopped = 3,
}

impl AcceptorState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Initialized,
            1 => Self::Running,
            2 => Self::ShuttingDown,
            _ => Self::Stopped,
        }
    }
}

#[derive(Default)]
struct Shared {
    state: AtomicU8,
    accepted: AtomicU64,
    rejected: AtomicU64,
    shutdown: Notify,
}

impl Shared {
    fn set_state(&self, state: AcceptorState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    fn state(&self) -> AcceptorState {
        AcceptorState::from_u8(self.state.load(Ordering::SeqCst))
    }
}

/// Observes and controls a running [`Acceptor`] from outside its loop.
///
/// Cheap to clone; every clone controls the same acceptor.
#[derive(Clone)]
pub struct AcceptorHandle {
    shared: Arc<Shared>,
    active: Arc<ActiveSet>,
}

impl AcceptorHandle {
    /// Requests shutdown: force-closes every active connection, then wakes
    /// the accept loop so it exits cleanly.
    pub fn shutdown(&self) {
        self.shared.set_state(AcceptorState::ShuttingDown);
        self.active.shutdown_all();
        self.shared.shutdown.notify_one();
    }

    pub fn state(&self) -> AcceptorState {
        self.shared.state()
    }

    /// Connections currently alive.
    pub fn active(&self) -> usize {
        self.active.len()
    }

    /// Connections dispatched since start.
    pub fn accepted(&self) -> u64 {
        self.shared.accepted.load(Ordering::Relaxed)
    }

    /// Sockets closed without dispatch, by admission control or the filter.
    pub fn rejected(&self) -> u64 {
        self.shared.rejected.load(Ordering::Relaxed)
    }
}

/// Accepts TCP connections, applies admission control, and dispatches each
/// accepted socket to the worker pool via its Task Factory.
///
/// # Examples
///
/// ```no_run
/// use wiregate::{Acceptor, ClientConnection, MessageReader, RequestHead, SingleTask};
/// use std::sync::Arc;
///
/// #[tokio::main]
/// async fn main() -> wiregate::Result<()> {
///     let acceptor = Acceptor::builder()
///         .bind("127.0.0.1:8080".parse().unwrap())
///         .factory(SingleTask::new(|conn: Arc<ClientConnection>| async move {
///             let (read, _write) = conn.take_io().ok_or(wiregate::Error::UnexpectedEof)?;
///             let mut reader = MessageReader::with_timeout(read, conn.read_timeout());
///             let head = RequestHead::read(&mut reader).await?;
///             tracing::info!(method = head.method(), uri = head.uri(), "request");
///             Ok(())
///         }))
///         .build()?;
///
///     acceptor.run().await
/// }
/// ```
pub struct Acceptor {
    listener: TcpListener,
    limits: AcceptorLimits,
    factory: Arc<dyn TaskFactory>,
    filter: Arc<dyn AcceptFilter>,
    fault_hook: Arc<dyn FaultHook>,
    runtime: Handle,
    semaphore: Option<Arc<Semaphore>>,
    active: Arc<ActiveSet>,
    shared: Arc<Shared>,
}

impl Acceptor {
    /// Creates a new builder for configuring an acceptor.
    #[inline]
    pub fn builder() -> AcceptorBuilder {
        AcceptorBuilder {
            listener: None,
            bind_addr: None,
            factory: None,
            filter: Arc::new(()),
            fault_hook: Arc::new(()),
            limits: None,
            runtime: None,
        }
    }

    /// The bound local address. Useful when binding to port 0.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener.local_addr().map_err(Error::Io)
    }

    /// A handle for shutting down and observing this acceptor.
    pub fn handle(&self) -> AcceptorHandle {
        AcceptorHandle {
            shared: Arc::clone(&self.shared),
            active: Arc::clone(&self.active),
        }
    }

    /// Runs the accept loop until shutdown or a fatal accept error.
    ///
    /// Each iteration: in wait mode, block until a slot frees; accept; in
    /// reject mode, check capacity against the just-accepted socket; filter;
    /// then dispatch through the Task Factory. An accept error during
    /// shutdown exits cleanly; any other accept error stops the loop and is
    /// returned.
    pub async fn run(self) -> Result<()> {
        self.shared.set_state(AcceptorState::Running);
        tracing::info!(addr = ?self.listener.local_addr().ok(), "acceptor running");

        loop {
            if self.shared.state() == AcceptorState::ShuttingDown {
                break;
            }

            // Wait mode holds a permit before accepting, so the loop only
            // wakes when a socket can actually be dispatched. Reject mode
            // decides after accept, against capacity at that moment; a
            // decision taken before a possibly long accept wait would go
            // stale the instant a slot frees.
            let mut permit = None;
            if !self.limits.reject_when_busy {
                permit = match self.wait_for_slot().await {
                    Some(permit) => permit,
                    // Shutdown arrived while waiting for capacity.
                    None => break,
                };
            }

            let accepted = tokio::select! {
                biased;
                _ = self.shared.shutdown.notified() => break,
                accepted = self.listener.accept() => accepted,
            };

            let (stream, peer) = match accepted {
                Ok(pair) => pair,
                Err(err) if self.shared.state() == AcceptorState::ShuttingDown => {
                    tracing::info!(error = %err, "listener closed during shutdown");
                    break;
                }
                Err(err) => {
                    tracing::error!(error = %err, "accept failed, stopping");
                    self.shared.set_state(AcceptorState::Stopped);
                    return Err(Error::Io(err));
                }
            };

            if self.limits.reject_when_busy {
                if let Some(semaphore) = &self.semaphore {
                    match Arc::clone(semaphore).try_acquire_owned() {
                        Ok(acquired) => permit = Some(acquired),
                        Err(TryAcquireError::NoPermits) => {
                            drop(stream);
                            self.shared.rejected.fetch_add(1, Ordering::Relaxed);
                            tracing::debug!(%peer, "rejected at capacity");
                            continue;
                        }
                        Err(TryAcquireError::Closed) => break,
                    }
                }
            }

            if !self.filter.accept(&stream, peer) {
                drop(stream);
                drop(permit);
                self.shared.rejected.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(%peer, "rejected by filter");
                continue;
            }

            self.dispatch(stream, peer, permit);
        }

        self.shared.set_state(AcceptorState::Stopped);
        tracing::info!("acceptor stopped");
        Ok(())
    }

    /// Blocks until a connection slot frees (wait mode). The outer `None`
    /// means shutdown was requested while waiting; the inner `None` means
    /// admission control is unbounded.
    async fn wait_for_slot(&self) -> Option<Option<OwnedSemaphorePermit>> {
        let Some(semaphore) = &self.semaphore else {
            return Some(None);
        };

        tokio::select! {
            biased;
            _ = self.shared.shutdown.notified() => None,
            permit = Arc::clone(semaphore).acquire_owned() => match permit {
                Ok(permit) => Some(Some(permit)),
                Err(_) => None,
            },
        }
    }

    /// Wraps the socket in a connection, registers it, and starts its tasks.
    /// Construction failures are reported under the connection's id and the
    /// socket is dropped.
    fn dispatch(&self, stream: TcpStream, peer: SocketAddr, permit: Option<OwnedSemaphorePermit>) {
        let id = connection::next_connection_id();

        let conn = match ClientConnection::new(
            id,
            stream,
            peer,
            self.limits.socket_read_timeout,
            permit,
            Arc::clone(&self.active),
        ) {
            Ok(conn) => conn,
            Err(err) => {
                self.fault_hook.on_fault(id, &err);
                return;
            }
        };

        self.active.insert(Arc::clone(&conn));
        self.shared.accepted.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(conn_id = id, %peer, "accepted");

        conn.start(&self.factory, &self.fault_hook, &self.runtime);
    }
}

/// Builder for configuring and creating [`Acceptor`] instances.
pub struct AcceptorBuilder {
    listener: Option<TcpListener>,
    bind_addr: Option<SocketAddr>,
    factory: Option<Arc<dyn TaskFactory>>,
    filter: Arc<dyn AcceptFilter>,
    fault_hook: Arc<dyn FaultHook>,
    limits: Option<AcceptorLimits>,
    runtime: Option<Handle>,
}

impl AcceptorBuilder {
    /// Binds a fresh listener on `addr` with the configured backlog.
    ///
    /// Alternative to [`listener`](Self::listener); the last of the two
    /// called wins.
    #[inline(always)]
    pub fn bind(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = Some(addr);
        self.listener = None;
        self
    }

    /// Uses an already-bound listener.
    #[inline(always)]
    pub fn listener(mut self, listener: TcpListener) -> Self {
        self.listener = Some(listener);
        self.bind_addr = None;
        self
    }

    /// Sets the Task Factory that turns each accepted connection into work.
    ///
    /// **This is a required component.**
    #[inline(always)]
    pub fn factory<F: TaskFactory>(mut self, factory: F) -> Self {
        self.factory = Some(Arc::new(factory));
        self
    }

    /// Installs an accept filter to check sockets before dispatch.
    ///
    /// Allows early rejection of unwanted peers (before the first read).
    #[inline(always)]
    pub fn filter<F: AcceptFilter>(mut self, filter: F) -> Self {
        self.filter = Arc::new(filter);
        self
    }

    /// Routes caught connection and task errors to `hook` instead of the
    /// default error-level log.
    #[inline(always)]
    pub fn fault_hook<H: FaultHook>(mut self, hook: H) -> Self {
        self.fault_hook = Arc::new(hook);
        self
    }

    /// Configures admission control and socket limits.
    #[inline(always)]
    pub fn limits(mut self, limits: AcceptorLimits) -> Self {
        self.limits = Some(limits);
        self
    }

    /// Spawns connection tasks on `runtime` instead of the runtime the
    /// acceptor itself runs on.
    #[inline(always)]
    pub fn spawn_on(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// Finalizes the builder and constructs an [`Acceptor`].
    ///
    /// Binds the listener when [`bind`](Self::bind) was used, which is why
    /// this must run inside a tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics when:
    /// - Neither `bind` nor `listener` was called.
    /// - The `factory` method was not called.
    /// - Called outside a tokio runtime with no explicit `spawn_on` handle.
    #[track_caller]
    pub fn build(self) -> Result<Acceptor> {
        let limits = self.limits.unwrap_or_default();

        let listener = match (self.listener, self.bind_addr) {
            (Some(listener), _) => listener,
            (None, Some(addr)) => bind_listener(addr, limits.backlog)?,
            (None, None) => panic!("The `bind` or `listener` method must be called to create"),
        };

        let factory = self
            .factory
            .expect("The `factory` method must be called to create");

        let semaphore = limits
            .max_connections
            .map(|max| Arc::new(Semaphore::new(max)));

        Ok(Acceptor {
            listener,
            limits,
            factory,
            filter: self.filter,
            fault_hook: self.fault_hook,
            runtime: self.runtime.unwrap_or_else(Handle::current),
            semaphore,
            active: Arc::new(ActiveSet::default()),
            shared: Arc::new(Shared::default()),
        })
    }
}

/// Binds a non-blocking listener with an explicit backlog.
fn bind_listener(addr: SocketAddr, backlog: u32) -> Result<TcpListener> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(backlog as i32)?;

    TcpListener::from_std(socket.into()).map_err(Error::Io)
}

#[cfg(test)]
mod acceptor_tests {
    use super::*;
    use crate::{
        limits::AcceptorLimits,
        server::connection::{ClientConnection, SingleTask},
        MessageReader,
    };
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    /// Each connection's task reads one line, then finishes.
    fn line_echo_factory() -> impl TaskFactory {
        SingleTask::new(|conn: Arc<ClientConnection>| async move {
            let (read, _write) = conn.take_io().ok_or(Error::UnexpectedEof)?;
            let mut reader = MessageReader::new(read);
            reader.read_line().await?;
            Ok(())
        })
    }

    fn build(limits: AcceptorLimits) -> Acceptor {
        Acceptor::builder()
            .bind("127.0.0.1:0".parse().unwrap())
            .factory(line_echo_factory())
            .limits(limits)
            .build()
            .unwrap()
    }

    async fn wait_for(mut check: impl FnMut() -> bool) {
        for _ in 0..200 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached in time");
    }

    #[tokio::test]
    async fn reject_mode_closes_excess_sockets() {
        let acceptor = build(AcceptorLimits {
            max_connections: Some(1),
            reject_when_busy: true,
            ..AcceptorLimits::default()
        });
        let addr = acceptor.local_addr().unwrap();
        let handle = acceptor.handle();
        tokio::spawn(acceptor.run());

        // First connection occupies the only slot; its task blocks on a
        // line the client has not sent yet.
        let mut first = tokio::net::TcpStream::connect(addr).await.unwrap();
        wait_for(|| handle.accepted() == 1).await;

        // Second connection must be closed without dispatch.
        let mut second = tokio::net::TcpStream::connect(addr).await.unwrap();
        wait_for(|| handle.rejected() == 1).await;

        let mut buf = [0u8; 1];
        assert_eq!(second.read(&mut buf).await.unwrap(), 0);
        assert_eq!(handle.accepted(), 1);

        // Freeing the slot lets the next connection in.
        first.write_all(b"done\r\n").await.unwrap();
        wait_for(|| handle.active() == 0).await;

        let _third = tokio::net::TcpStream::connect(addr).await.unwrap();
        wait_for(|| handle.accepted() == 2).await;

        handle.shutdown();
    }

    #[tokio::test]
    async fn reject_mode_admits_after_slot_frees() {
        let acceptor = build(AcceptorLimits {
            max_connections: Some(1),
            reject_when_busy: true,
            ..AcceptorLimits::default()
        });
        let addr = acceptor.local_addr().unwrap();
        let handle = acceptor.handle();
        tokio::spawn(acceptor.run());

        let mut first = tokio::net::TcpStream::connect(addr).await.unwrap();
        wait_for(|| handle.accepted() == 1).await;

        let _second = tokio::net::TcpStream::connect(addr).await.unwrap();
        wait_for(|| handle.rejected() == 1).await;

        // Free the slot while the loop sits in accept with no pending
        // socket; the rejection above must not taint the next arrival.
        first.write_all(b"done\r\n").await.unwrap();
        wait_for(|| handle.active() == 0).await;

        let _third = tokio::net::TcpStream::connect(addr).await.unwrap();
        wait_for(|| handle.accepted() == 2).await;
        assert_eq!(handle.rejected(), 1);

        handle.shutdown();
    }

    #[tokio::test]
    async fn wait_mode_delays_excess_sockets() {
        let acceptor = build(AcceptorLimits {
            max_connections: Some(1),
            reject_when_busy: false,
            ..AcceptorLimits::default()
        });
        let addr = acceptor.local_addr().unwrap();
        let handle = acceptor.handle();
        tokio::spawn(acceptor.run());

        let mut first = tokio::net::TcpStream::connect(addr).await.unwrap();
        wait_for(|| handle.accepted() == 1).await;

        // The second socket sits in the OS backlog; the loop must not
        // service it while the slot is taken.
        let _second = tokio::net::TcpStream::connect(addr).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(handle.accepted(), 1);
        assert_eq!(handle.rejected(), 0);

        first.write_all(b"done\r\n").await.unwrap();
        wait_for(|| handle.accepted() == 2).await;

        handle.shutdown();
    }

    #[tokio::test]
    async fn unbounded_mode_accepts_everything() {
        let acceptor = build(AcceptorLimits {
            max_connections: None,
            ..AcceptorLimits::default()
        });
        let addr = acceptor.local_addr().unwrap();
        let handle = acceptor.handle();
        tokio::spawn(acceptor.run());

        let mut held = Vec::new();
        for _ in 0..5 {
            held.push(tokio::net::TcpStream::connect(addr).await.unwrap());
        }
        wait_for(|| handle.accepted() == 5).await;
        assert_eq!(handle.rejected(), 0);

        handle.shutdown();
    }

    #[tokio::test]
    async fn filter_rejections_are_counted() {
        struct DenyAll;
        impl AcceptFilter for DenyAll {
            fn accept(&self, _: &TcpStream, _: SocketAddr) -> bool {
                false
            }
        }

        let acceptor = Acceptor::builder()
            .bind("127.0.0.1:0".parse().unwrap())
            .factory(line_echo_factory())
            .filter(DenyAll)
            .build()
            .unwrap();
        let addr = acceptor.local_addr().unwrap();
        let handle = acceptor.handle();
        tokio::spawn(acceptor.run());

        let mut denied = tokio::net::TcpStream::connect(addr).await.unwrap();
        wait_for(|| handle.rejected() == 1).await;
        assert_eq!(handle.accepted(), 0);

        let mut buf = [0u8; 1];
        assert_eq!(denied.read(&mut buf).await.unwrap(), 0);

        handle.shutdown();
    }

    #[tokio::test]
    async fn shutdown_stops_the_loop_and_closes_connections() {
        let acceptor = build(AcceptorLimits::default());
        let addr = acceptor.local_addr().unwrap();
        let handle = acceptor.handle();
        let running = tokio::spawn(acceptor.run());

        let mut held = tokio::net::TcpStream::connect(addr).await.unwrap();
        wait_for(|| handle.accepted() == 1).await;

        handle.shutdown();
        assert!(running.await.unwrap().is_ok());
        assert_eq!(handle.state(), AcceptorState::Stopped);
        assert_eq!(handle.active(), 0);

        // Force-closed connection surfaces as EOF on the client side.
        let mut buf = [0u8; 1];
        assert_eq!(held.read(&mut buf).await.unwrap(), 0);
    }
}

//! One accepted socket and the tasks running against it.

use crate::errors::Error;
use std::{
    collections::HashMap,
    future::Future,
    net::SocketAddr,
    pin::Pin,
    sync::{
        atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
        Arc, Mutex, MutexGuard,
    },
    time::Duration,
};
use tokio::{
    net::{
        tcp::{OwnedReadHalf, OwnedWriteHalf},
        TcpStream,
    },
    runtime::Handle,
    sync::OwnedSemaphorePermit,
    task::AbortHandle,
};

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Allocates the next connection id. Ids are assigned at accept time, before
/// the connection is constructed, so accept-time failures are reported under
/// the same id the connection would have carried.
pub(crate) fn next_connection_id() -> u64 {
    NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed)
}

/// One unit of per-connection work, boxed so factories can mix futures of
/// different concrete types.
pub type ConnTask = Pin<Box<dyn Future<Output = crate::Result<()>> + Send>>;

/// Turns an accepted connection into the ordered list of work units that
/// will run against it.
///
/// A connection whose factory returns an empty list closes immediately.
/// See [`SingleTask`] for the common one-task case.
pub trait TaskFactory: Send + Sync + 'static {
    fn tasks(&self, conn: &Arc<ClientConnection>) -> Vec<ConnTask>;
}

/// Adapter for factories that always produce exactly one task.
///
/// # Examples
///
/// ```no_run
/// use wiregate::{ClientConnection, SingleTask};
/// use std::sync::Arc;
///
/// let factory = SingleTask::new(|conn: Arc<ClientConnection>| async move {
///     let _io = conn.take_io();
///     Ok(())
/// });
/// ```
pub struct SingleTask<F>(F);

impl<F, Fut> SingleTask<F>
where
    F: Fn(Arc<ClientConnection>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = crate::Result<()>> + Send + 'static,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F, Fut> TaskFactory for SingleTask<F>
where
    F: Fn(Arc<ClientConnection>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = crate::Result<()>> + Send + 'static,
{
    fn tasks(&self, conn: &Arc<ClientConnection>) -> Vec<ConnTask> {
        vec![Box::pin((self.0)(Arc::clone(conn)))]
    }
}

/// Receives every error caught at the connection or task layer, so callers
/// can route failures into their own observability.
///
/// The default hook (`()`) logs at error level.
pub trait FaultHook: Send + Sync + 'static {
    fn on_fault(&self, conn_id: u64, err: &Error);
}

impl FaultHook for () {
    fn on_fault(&self, conn_id: u64, err: &Error) {
        tracing::error!(conn_id, error = %err, "connection task failed");
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// The set of live connections, shared between the acceptor and every
/// connection it spawned. A connection is present from acceptance until its
/// close runs.
#[derive(Default)]
pub(crate) struct ActiveSet {
    inner: Mutex<HashMap<u64, Arc<ClientConnection>>>,
}

impl ActiveSet {
    pub(crate) fn insert(&self, conn: Arc<ClientConnection>) {
        lock(&self.inner).insert(conn.id(), conn);
    }

    pub(crate) fn remove(&self, id: u64) {
        lock(&self.inner).remove(&id);
    }

    pub(crate) fn len(&self) -> usize {
        lock(&self.inner).len()
    }

    /// Shuts every connection down, best effort, and clears the set.
    pub(crate) fn shutdown_all(&self) {
        let drained: Vec<_> = lock(&self.inner).drain().map(|(_, c)| c).collect();
        for conn in drained {
            conn.shutdown();
        }
    }
}

/// A wrapped accepted socket plus the bookkeeping that closes it once its
/// last task finishes.
///
/// The socket's split halves are handed out once via [`take_io`] — typically
/// to the first task the factory produced. Closure is idempotent: the first
/// `close()` drops the stream (if still held), removes the connection from
/// the acceptor's active set, and releases the admission permit; later calls
/// are no-ops.
///
/// [`take_io`]: Self::take_io
pub struct ClientConnection {
    id: u64,
    peer_addr: SocketAddr,
    local_addr: SocketAddr,
    read_timeout: Duration,
    io: Mutex<Option<TcpStream>>,
    permit: Mutex<Option<OwnedSemaphorePermit>>,
    live_tasks: AtomicUsize,
    aborts: Mutex<Vec<AbortHandle>>,
    closed: AtomicBool,
    active: Arc<ActiveSet>,
}

impl ClientConnection {
    pub(crate) fn new(
        id: u64,
        stream: TcpStream,
        peer_addr: SocketAddr,
        read_timeout: Duration,
        permit: Option<OwnedSemaphorePermit>,
        active: Arc<ActiveSet>,
    ) -> crate::Result<Arc<Self>> {
        let local_addr = stream.local_addr()?;

        Ok(Arc::new(Self {
            id,
            peer_addr,
            local_addr,
            read_timeout,
            io: Mutex::new(Some(stream)),
            permit: Mutex::new(permit),
            live_tasks: AtomicUsize::new(0),
            aborts: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
            active,
        }))
    }

    #[inline(always)]
    pub fn id(&self) -> u64 {
        self.id
    }

    #[inline(always)]
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    #[inline(always)]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// The per-socket read timeout configured on the acceptor. Tasks apply
    /// it themselves, usually via [`MessageReader::with_timeout`].
    ///
    /// [`MessageReader::with_timeout`]: crate::MessageReader::with_timeout
    #[inline(always)]
    pub fn read_timeout(&self) -> Duration {
        self.read_timeout
    }

    /// Takes the socket, split into read and write halves. Returns `None`
    /// after the first call or once the connection closed.
    pub fn take_io(&self) -> Option<(OwnedReadHalf, OwnedWriteHalf)> {
        lock(&self.io).take().map(TcpStream::into_split)
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Asks the factory for this connection's tasks and spawns each one on
    /// `runtime`. Zero tasks closes the connection immediately.
    pub(crate) fn start(
        self: &Arc<Self>,
        factory: &Arc<dyn TaskFactory>,
        fault_hook: &Arc<dyn FaultHook>,
        runtime: &Handle,
    ) {
        let tasks = factory.tasks(self);

        if tasks.is_empty() {
            self.close();
            return;
        }

        // The count must cover every task before the first one can finish,
        // otherwise an early completion would see zero and close under the
        // feet of its siblings.
        self.live_tasks.store(tasks.len(), Ordering::SeqCst);

        for task in tasks {
            let guard = TaskGuard {
                conn: Arc::clone(self),
            };
            let hook = Arc::clone(fault_hook);

            let handle = runtime.spawn(async move {
                if let Err(err) = task.await {
                    hook.on_fault(guard.conn.id, &err);
                }
            });

            lock(&self.aborts).push(handle.abort_handle());
        }
    }

    /// Closes the connection. Idempotent; only the first call drops the
    /// socket, leaves the active set and releases the admission permit.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        // A task may still own the split halves; those drop with the task.
        lock(&self.io).take();

        self.active.remove(self.id);
        lock(&self.permit).take();

        tracing::debug!(conn_id = self.id, peer = %self.peer_addr, "connection closed");
    }

    /// Force-closes the connection: aborts every still-running task, then
    /// closes. Used by acceptor shutdown.
    pub(crate) fn shutdown(&self) {
        for handle in lock(&self.aborts).drain(..) {
            handle.abort();
        }

        self.close();
    }

    fn unregister_task(&self) {
        // fetch_sub returns the previous value; 1 means this was the last
        // live task and closure is this call's responsibility.
        if self.live_tasks.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.close();
        }
    }
}

/// Unregisters its task on drop, which covers completion, failure and
/// abort alike.
struct TaskGuard {
    conn: Arc<ClientConnection>,
}

impl Drop for TaskGuard {
    fn drop(&mut self) {
        self.conn.unregister_task();
    }
}

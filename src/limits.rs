//! Acceptor configuration limits and timeouts
//!
//! # Security-First Defaults
//!
//! Default limits are intentionally conservative to prevent:
//! - Resource exhaustion from unbounded connection counts
//! - Slowloris-style stalled reads
//!
//! # Examples
//!
//! ```no_run
//! use wiregate::{Acceptor, limits::AcceptorLimits};
//! use std::time::Duration;
//!
//! # async fn setup(factory: impl wiregate::TaskFactory) -> wiregate::Result<()> {
//! let acceptor = Acceptor::builder()
//!     .bind("127.0.0.1:8080".parse().unwrap())
//!     .factory(factory)
//!     .limits(AcceptorLimits {
//!         max_connections: Some(500),
//!         reject_when_busy: true,
//!         socket_read_timeout: Duration::from_secs(5),
//!         ..AcceptorLimits::default()
//!     })
//!     .build()?;
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

/// Controls connection admission, queueing, and per-socket timeouts.
///
/// # Connection management
/// ```text
///                  [------------]
///                  [ Tcp accept ]
///                  [------------]
///                        ||
///                        || TCP_STREAM
///                        \/
/// [----------]   No   /----------------\   Yes, reject mode   [---------------]
/// [ Dispatch ] <===== | Over capacity? | ==================>  [ Close + count ]
/// [----------]        \----------------/                      [---------------]
///                            ||
///                            || Yes, wait mode
///                            \/
///                     [---------------------]
///                     [ Block until a slot  ]
///                     [ frees, then accept  ]
///                     [---------------------]
/// ```
///
/// Capacity is tracked by a counting semaphore owned by the acceptor; a
/// connection holds its slot from acceptance until its close notification.
#[derive(Debug, Clone)]
pub struct AcceptorLimits {
    /// Maximum number of concurrent active connections (default: `Some(100)`).
    ///
    /// `None` disables admission control entirely: every accepted socket is
    /// dispatched immediately.
    pub max_connections: Option<usize>,

    /// Admission policy when at capacity (default: `false`, i.e. wait).
    ///
    /// - `true`: the next accepted socket is closed immediately and the
    ///   rejection counter increments. Rejection is normal operation, not a
    ///   failure path.
    /// - `false`: the accept loop blocks until an active connection closes
    ///   and frees a slot.
    pub reject_when_busy: bool,

    /// Maximum duration to wait for reading data from a socket (default: `2 seconds`).
    ///
    /// Applied to every read the per-connection message reader performs.
    /// This is the primary mechanism for cleaning up stalled connections;
    /// there is no cooperative cancellation delivered into an in-progress
    /// parse.
    pub socket_read_timeout: Duration,

    /// Listen backlog for the bound socket (default: `128`).
    ///
    /// Only used when the acceptor binds its own address; ignored when a
    /// pre-bound listener is supplied.
    pub backlog: u32,

    #[doc(hidden)]
    #[allow(dead_code)]
    pub _priv: (),
}

impl Default for AcceptorLimits {
    #[inline(always)]
    fn default() -> Self {
        Self {
            max_connections: Some(100),
            reject_when_busy: false,
            socket_read_timeout: Duration::from_secs(2),
            backlog: 128,

            _priv: (),
        }
    }
}

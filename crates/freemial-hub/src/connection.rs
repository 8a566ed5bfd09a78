//! Hub-side handle to one connected client.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::mpsc;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique connection identity.
///
/// Connections are never compared by content, only by this id.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Allocate the next id.
    pub fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw numeric value.
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn_{}", self.0)
    }
}

/// Role of a connection inside its group. Fixed at registration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Role {
    /// Receives peer status traffic and may issue bind requests.
    Controller,
    /// Talks to the controller only; receives controller broadcasts.
    Peer,
}

impl Role {
    /// Whether this is the controller role.
    pub fn is_controller(self) -> bool {
        matches!(self, Self::Controller)
    }

    /// Lowercase name for logs and metric labels.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Controller => "controller",
            Self::Peer => "peer",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a non-blocking enqueue.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SendOutcome {
    /// The payload is in the delivery queue.
    Queued,
    /// The queue is at capacity; the payload was not queued.
    Full,
    /// The queue was closed (unregistered, evicted, or writer gone).
    Closed,
}

/// A registered client connection.
///
/// Owns the producer side of the outbound delivery queue. The consumer side
/// is handed to the connection's own writer task. Closing the queue drops
/// the only sender, so the writer observes `None` once it has drained what
/// was already queued.
pub struct Connection {
    id: ConnectionId,
    group_id: String,
    role: Role,
    tx: Mutex<Option<mpsc::Sender<Arc<str>>>>,
    connected_at: Instant,
    dropped_messages: AtomicU64,
}

impl Connection {
    /// Create a connection and the receiving end of its delivery queue.
    ///
    /// `capacity` is clamped to at least 1.
    pub fn new(
        group_id: impl Into<String>,
        role: Role,
        capacity: usize,
    ) -> (Arc<Self>, mpsc::Receiver<Arc<str>>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let connection = Self {
            id: ConnectionId::next(),
            group_id: group_id.into(),
            role,
            tx: Mutex::new(Some(tx)),
            connected_at: Instant::now(),
            dropped_messages: AtomicU64::new(0),
        };
        (Arc::new(connection), rx)
    }

    /// Connection id.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Id of the group this connection belongs to.
    pub fn group_id(&self) -> &str {
        &self.group_id
    }

    /// Role assigned at handshake.
    pub fn role(&self) -> Role {
        self.role
    }

    /// Enqueue a payload without waiting.
    ///
    /// Anything other than [`SendOutcome::Queued`] counts as a drop.
    pub fn send(&self, payload: Arc<str>) -> SendOutcome {
        let outcome = match self.tx.lock().as_ref() {
            None => SendOutcome::Closed,
            Some(tx) => match tx.try_send(payload) {
                Ok(()) => SendOutcome::Queued,
                Err(mpsc::error::TrySendError::Full(_)) => SendOutcome::Full,
                Err(mpsc::error::TrySendError::Closed(_)) => SendOutcome::Closed,
            },
        };
        if outcome != SendOutcome::Queued {
            let _ = self.dropped_messages.fetch_add(1, Ordering::Relaxed);
        }
        outcome
    }

    /// Close the delivery queue.
    ///
    /// Returns `true` on the call that actually closed it.
    pub fn close(&self) -> bool {
        self.tx.lock().take().is_some()
    }

    /// Whether the delivery queue has been closed.
    pub fn is_closed(&self) -> bool {
        self.tx.lock().is_none()
    }

    /// Total payloads dropped for this connection.
    pub fn drop_count(&self) -> u64 {
        self.dropped_messages.load(Ordering::Relaxed)
    }

    /// Time since the connection was created.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("group_id", &self.group_id)
            .field("role", &self.role)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

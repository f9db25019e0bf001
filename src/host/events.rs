//! Events the connection drivers send to the pool event loop.

use std::sync::Arc;
use std::time::Duration;

use crate::error::TransportError;
use crate::host::HostKey;
use crate::http::request::RequestEntry;
use crate::net::ConnectionId;

/// Why a connection left the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The response ruled out reuse (`Connection: close`, HTTP/1.0, read-until-close body).
    Peer,
    /// A transport fault, timeout or abort.
    Error,
    /// Closed so the request it carried can be resent elsewhere.
    Resend,
    /// Free longer than its keep-alive.
    Idle,
    /// Transport shutdown or host reset.
    Shutdown,
}

impl CloseReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Peer => "peer",
            Self::Error => "error",
            Self::Resend => "resend",
            Self::Idle => "idle",
            Self::Shutdown => "shutdown",
        }
    }
}

/// One state change for a connection, a request, or both at once.
pub(crate) enum PoolEvent {
    /// The connection may serve another request.
    Recycle {
        key: HostKey,
        id: ConnectionId,
        keep_alive: Option<Duration>,
    },
    Close {
        key: HostKey,
        id: ConnectionId,
        reason: CloseReason,
    },
    /// The connection was closed because its request must be resent. One
    /// event, so the removal and the resend cannot race each other.
    ClosedResendRequest {
        key: HostKey,
        id: ConnectionId,
        entry: Arc<RequestEntry>,
        delay: Duration,
    },
    /// Resend without touching any connection.
    Resend {
        entry: Arc<RequestEntry>,
        delay: Duration,
    },
    /// The connection switched protocols and left pool management.
    Upgraded { key: HostKey, id: ConnectionId },
}

impl PoolEvent {
    /// The event loop is gone; fail whatever request the event carried.
    pub(crate) fn abandon(self) {
        match self {
            Self::ClosedResendRequest { entry, .. } | Self::Resend { entry, .. } => {
                entry.fail(TransportError::Shutdown);
            }
            Self::Recycle { .. } | Self::Close { .. } | Self::Upgraded { .. } => {}
        }
    }
}

impl std::fmt::Debug for PoolEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Recycle { id, .. } => write!(f, "Recycle({id})"),
            Self::Close { id, reason, .. } => write!(f, "Close({id}, {})", reason.as_str()),
            Self::ClosedResendRequest { id, entry, .. } => {
                write!(f, "ClosedResendRequest({id}, {})", entry.id())
            }
            Self::Resend { entry, .. } => write!(f, "Resend({})", entry.id()),
            Self::Upgraded { id, .. } => write!(f, "Upgraded({id})"),
        }
    }
}

//! Request logging for the forwarding proxy.
//!
//! Every handled request is logged with structured fields under the
//! `torgate::audit` target and published as a [`RequestRecord`] to
//! subscribers of the proxy's request feed.

use tokio::sync::broadcast;
use tracing::info;

/// Outcome of a handled request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Tunnel or relay was established
    Tunneled,
    /// Host was on the blocklist
    Blocked,
    /// Upstream or protocol failure
    Failed,
}

impl std::fmt::Display for Decision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Decision::Tunneled => write!(f, "tunneled"),
            Decision::Blocked => write!(f, "blocked"),
            Decision::Failed => write!(f, "failed"),
        }
    }
}

/// One line of the request log
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestRecord {
    /// Request method
    pub method: String,
    /// Request target as sent by the client
    pub target: String,
    /// Bytes sent upstream for plain HTTP; 0 for CONNECT
    pub bytes: u64,
    /// What happened
    pub decision: Decision,
    /// HTTP status returned to the client
    pub status: u16,
}

impl std::fmt::Display for RequestRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {} ({} bytes)", self.method, self.target, self.bytes)
    }
}

/// Log a request and publish it to `feed`
pub fn record(feed: &broadcast::Sender<RequestRecord>, record: RequestRecord) {
    match record.decision {
        Decision::Tunneled => info!(
            target: "torgate::audit",
            method = %record.method,
            target_uri = %record.target,
            bytes = record.bytes,
            decision = %record.decision,
            "proxy request tunneled"
        ),
        Decision::Blocked | Decision::Failed => info!(
            target: "torgate::audit",
            method = %record.method,
            target_uri = %record.target,
            status = record.status,
            decision = %record.decision,
            "proxy request refused"
        ),
    }

    // no subscribers is fine
    let _ = feed.send(record);
}

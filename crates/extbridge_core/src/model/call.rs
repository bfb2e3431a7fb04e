//! Async call identity and pending-call records.
//!
//! # Responsibility
//! - Define the opaque correlation token handed to scripted callers.
//! - Define the bridge-side record kept while a call awaits its response.
//!
//! # Invariants
//! - A `CallId` is never the no-id sentinel (`0`).
//! - A `PendingCall` exists only while its call has no terminal outcome.

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::time::{Duration, Instant};

/// Opaque correlation token for one asynchronous call.
///
/// Values are minted by the correlation registry and are unique for the
/// lifetime of the bridge that minted them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallId(u64);

impl CallId {
    /// Wraps a raw id; returns `None` for the no-id sentinel.
    pub fn new(raw: u64) -> Option<Self> {
        if raw == 0 {
            None
        } else {
            Some(Self(raw))
        }
    }

    /// Raw numeric value as sent across the native boundary.
    pub fn get(self) -> u64 {
        self.0
    }
}

impl Display for CallId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle of one async call as observed by the bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallState {
    /// Id allocated, nothing dispatched yet.
    Created,
    /// Tracked in the registry and handed to the native module.
    Pending,
    /// Matching response delivered to the caller.
    Resolved,
    /// Terminal without a response; any late result is discarded.
    Orphaned,
}

/// Why a pending call was orphaned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrphanReason {
    /// Caller cancelled and the grace period elapsed.
    Cancelled,
    /// No response arrived within the configured pending expiry.
    Expired,
    /// Bridge was torn down while the call was still pending.
    Shutdown,
}

impl OrphanReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Cancelled => "cancelled",
            Self::Expired => "expired",
            Self::Shutdown => "shutdown",
        }
    }
}

/// Bridge-side record of an async call awaiting its response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingCall {
    pub id: CallId,
    pub issued_at: Instant,
    pub function_name: String,
    pub request_payload: String,
    /// When set, the call is orphaned on the first drain at or after this
    /// instant.
    pub deadline: Option<Instant>,
    /// Set once the caller asked to stop waiting.
    pub cancelled: bool,
}

impl PendingCall {
    pub fn new(
        id: CallId,
        function_name: impl Into<String>,
        request_payload: impl Into<String>,
    ) -> Self {
        Self {
            id,
            issued_at: Instant::now(),
            function_name: function_name.into(),
            request_payload: request_payload.into(),
            deadline: None,
            cancelled: false,
        }
    }

    /// Time since the call was tracked.
    pub fn age(&self) -> Duration {
        self.issued_at.elapsed()
    }

    /// Returns whether the deadline, if any, has passed at `now`.
    pub fn is_due(&self, now: Instant) -> bool {
        matches!(self.deadline, Some(deadline) if deadline <= now)
    }

    /// Reason reported when this call is orphaned by its deadline.
    pub fn orphan_reason(&self) -> OrphanReason {
        if self.cancelled {
            OrphanReason::Cancelled
        } else {
            OrphanReason::Expired
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{CallId, OrphanReason, PendingCall};
    use std::time::{Duration, Instant};

    #[test]
    fn zero_is_the_no_id_sentinel() {
        assert!(CallId::new(0).is_none());
        assert_eq!(CallId::new(7).expect("non-zero id").get(), 7);
    }

    #[test]
    fn pending_call_without_deadline_is_never_due() {
        let id = CallId::new(1).expect("non-zero id");
        let call = PendingCall::new(id, "ping", "");
        assert!(!call.is_due(Instant::now() + Duration::from_secs(3600)));
    }

    #[test]
    fn orphan_reason_reflects_cancellation() {
        let id = CallId::new(1).expect("non-zero id");
        let mut call = PendingCall::new(id, "ping", "");
        assert_eq!(call.orphan_reason(), OrphanReason::Expired);
        call.cancelled = true;
        assert_eq!(call.orphan_reason(), OrphanReason::Cancelled);
    }
}

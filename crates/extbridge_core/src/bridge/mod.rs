//! Extension call bridge.
//!
//! # Responsibility
//! - Correlate async native calls with the responses the native side pushes.
//! - Carry native events from arbitrary native threads to the polling thread.
//! - Expose the scripted-caller operations over one native module.
//!
//! # Invariants
//! - Each response is delivered at most once.
//! - Correlation state never outlives the bridge that created it.
//! - Native calls are never retried by the bridge.

use crate::model::call::CallId;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub mod channel;
pub mod dispatcher;
pub mod facade;
pub mod loopback;
pub mod native;
pub mod registry;

pub type BridgeResult<T> = Result<T, BridgeError>;

/// Errors returned to the immediate caller of a bridge operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeError {
    /// Native module rejected the call; `payload` is its raw error text.
    NativeInvocation { function: String, payload: String },
    /// Sync call took longer than the configured bound.
    NativeTimeout {
        function: String,
        elapsed_ms: u64,
        limit_ms: u64,
    },
    /// A call id was tracked twice.
    DuplicateId(CallId),
    /// A caller-supplied id was never minted by this bridge.
    UnknownId(CallId),
    /// The call id space is used up.
    Exhausted,
    /// `init_events` has not been called yet.
    EventsNotInitialized,
    /// The bridge was torn down.
    ShutDown,
}

impl Display for BridgeError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NativeInvocation { function, payload } => {
                write!(f, "native call `{function}` failed: {payload}")
            }
            Self::NativeTimeout {
                function,
                elapsed_ms,
                limit_ms,
            } => write!(
                f,
                "native call `{function}` took {elapsed_ms}ms, over the {limit_ms}ms limit"
            ),
            Self::DuplicateId(id) => write!(f, "call id already tracked: {id}"),
            Self::UnknownId(id) => write!(f, "call id not minted by this bridge: {id}"),
            Self::Exhausted => write!(f, "call id space exhausted"),
            Self::EventsNotInitialized => {
                write!(f, "events not initialized; call init_events first")
            }
            Self::ShutDown => write!(f, "bridge has been shut down"),
        }
    }
}

impl Error for BridgeError {}

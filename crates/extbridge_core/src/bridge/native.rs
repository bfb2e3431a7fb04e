//! Capability interface of the native extension module.

use crate::model::call::CallId;
use crate::model::event::RawEvent;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::Arc;

/// Callback the native module invokes to push one event blob.
///
/// May be called from any native thread.
pub type EventCallback = Arc<dyn Fn(RawEvent) + Send + Sync>;

/// Raw rejection reported by the native module's sync entry point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeFault {
    /// Error text exactly as the native side produced it.
    pub payload: String,
}

impl NativeFault {
    pub fn new(payload: impl Into<String>) -> Self {
        Self {
            payload: payload.into(),
        }
    }
}

impl Display for NativeFault {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.payload)
    }
}

impl Error for NativeFault {}

/// The three entry points the bridge needs from a native module.
///
/// Implementations are loaded in-process and shared across the polling
/// thread and the module's own worker threads.
pub trait NativeModule: Send + Sync {
    /// Runs `function` synchronously and returns its raw result blob.
    fn call_sync(&self, function: &str, args: &str) -> Result<String, NativeFault>;

    /// Starts `function` asynchronously.
    ///
    /// Contract: the module eventually pushes exactly one response event
    /// carrying `id` through the registered callback.
    fn call_async(&self, function: &str, args: &str, id: CallId);

    /// Installs the push-event callback, replacing any earlier one.
    fn register_callback(&self, callback: EventCallback);
}

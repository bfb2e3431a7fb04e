//! Sync and async call dispatch into the native module.
//!
//! # Responsibility
//! - Run sync calls on the caller thread and surface native faults verbatim.
//! - Track async calls before handing them to the native module.
//!
//! # Invariants
//! - An async call id is tracked before `NativeModule::call_async` runs, so a
//!   response pushed immediately still correlates.
//! - Sync calls never touch the registry.
//! - Nothing here retries a native call.
//!
//! # See also
//! - `bridge::registry` for id ownership.

use super::native::NativeModule;
use super::registry::CorrelationRegistry;
use super::{BridgeError, BridgeResult};
use crate::model::call::{CallId, PendingCall};
use log::{debug, error, warn};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Issues calls against one native module.
pub struct CallDispatcher {
    native: Arc<dyn NativeModule>,
    registry: Arc<CorrelationRegistry>,
    sync_timeout: Option<Duration>,
    pending_expiry: Option<Duration>,
}

impl CallDispatcher {
    pub fn new(native: Arc<dyn NativeModule>, registry: Arc<CorrelationRegistry>) -> Self {
        Self {
            native,
            registry,
            sync_timeout: None,
            pending_expiry: None,
        }
    }

    /// Bounds how long a sync call may take before its result is discarded.
    pub fn with_sync_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.sync_timeout = timeout;
        self
    }

    /// Orphans async calls that receive no response within `expiry`.
    pub fn with_pending_expiry(mut self, expiry: Option<Duration>) -> Self {
        self.pending_expiry = expiry;
        self
    }

    pub fn sync_timeout(&self) -> Option<Duration> {
        self.sync_timeout
    }

    /// Invokes `function` and blocks until the native module returns.
    ///
    /// # Errors
    /// - `BridgeError::NativeInvocation` with the native error text unmodified.
    /// - `BridgeError::NativeTimeout` when the call outlived the sync timeout;
    ///   the late result is discarded.
    pub fn call_sync(&self, function: &str, args: &str) -> BridgeResult<String> {
        let started_at = Instant::now();
        let outcome = self.native.call_sync(function, args);
        let elapsed = started_at.elapsed();

        if let Some(limit) = self.sync_timeout {
            if elapsed > limit {
                warn!(
                    "event=call_sync module=dispatcher status=timeout function={} elapsed_ms={} limit_ms={}",
                    function,
                    elapsed.as_millis(),
                    limit.as_millis()
                );
                return Err(BridgeError::NativeTimeout {
                    function: function.to_string(),
                    elapsed_ms: duration_ms(elapsed),
                    limit_ms: duration_ms(limit),
                });
            }
        }

        match outcome {
            Ok(result) => {
                debug!(
                    "event=call_sync module=dispatcher status=ok function={} duration_ms={} result_len={}",
                    function,
                    elapsed.as_millis(),
                    result.len()
                );
                Ok(result)
            }
            Err(fault) => {
                warn!(
                    "event=call_sync module=dispatcher status=error function={} duration_ms={} error_len={}",
                    function,
                    elapsed.as_millis(),
                    fault.payload.len()
                );
                Err(BridgeError::NativeInvocation {
                    function: function.to_string(),
                    payload: fault.payload,
                })
            }
        }
    }

    /// Allocates an id, tracks the call and dispatches it without blocking.
    pub fn call_async(&self, function: &str, args: &str) -> BridgeResult<CallId> {
        let id = self.registry.allocate().inspect_err(|err| {
            error!(
                "event=call_async module=dispatcher status=error function={} error={}",
                function, err
            );
        })?;
        self.call_async_with_id(id, function, args)?;
        Ok(id)
    }

    /// Tracks and dispatches an async call under a pre-minted `id`.
    ///
    /// # Errors
    /// - `BridgeError::UnknownId` when `id` was not minted by the registry.
    /// - `BridgeError::DuplicateId` when `id` is already tracked or was
    ///   orphaned.
    ///
    /// Nothing is dispatched on error.
    pub fn call_async_with_id(&self, id: CallId, function: &str, args: &str) -> BridgeResult<()> {
        let mut call = PendingCall::new(id, function, args);
        call.deadline = self.pending_expiry.map(|expiry| call.issued_at + expiry);

        if let Err(err) = self.registry.track_call(call) {
            error!(
                "event=call_async module=dispatcher status=error call_id={} function={} error={}",
                id, function, err
            );
            return Err(err);
        }

        self.native.call_async(function, args, id);
        debug!(
            "event=call_async module=dispatcher status=sent call_id={} function={} args_len={}",
            id,
            function,
            args.len()
        );
        Ok(())
    }
}

fn duration_ms(value: Duration) -> u64 {
    u64::try_from(value.as_millis()).unwrap_or(u64::MAX)
}

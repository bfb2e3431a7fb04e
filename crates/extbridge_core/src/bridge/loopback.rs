//! In-process native module backed by registered closures.
//!
//! Async calls are queued and completed explicitly through
//! `complete_pending`, which may run on any thread. This keeps response
//! timing under the embedder's control for smoke runs and tests.

use super::native::{EventCallback, NativeFault, NativeModule};
use crate::model::call::CallId;
use crate::model::event::{RawEvent, ResponseStatus, GENERIC_ERROR_CODE};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

type FunctionHandler = Arc<dyn Fn(&str) -> Result<String, String> + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq)]
struct QueuedCall {
    function: String,
    args: String,
    id: CallId,
}

/// Closure-backed `NativeModule`.
#[derive(Default)]
pub struct LoopbackModule {
    functions: RwLock<HashMap<String, FunctionHandler>>,
    queued: Mutex<VecDeque<QueuedCall>>,
    callback: RwLock<Option<EventCallback>>,
}

impl LoopbackModule {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `name`, replacing an earlier handler with the same name.
    pub fn register(
        &self,
        name: impl Into<String>,
        handler: impl Fn(&str) -> Result<String, String> + Send + Sync + 'static,
    ) {
        self.functions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.into(), Arc::new(handler));
    }

    pub fn with_function(
        self,
        name: impl Into<String>,
        handler: impl Fn(&str) -> Result<String, String> + Send + Sync + 'static,
    ) -> Self {
        self.register(name, handler);
        self
    }

    /// Number of async calls waiting for `complete_pending`.
    pub fn queued_len(&self) -> usize {
        self.lock_queue().len()
    }

    /// Runs every queued async call and pushes one response per call.
    ///
    /// Returns how many responses were pushed. Calls stay queued while no
    /// callback is registered.
    pub fn complete_pending(&self) -> usize {
        let Some(callback) = self.current_callback() else {
            return 0;
        };
        let calls = self.lock_queue().drain(..).collect::<Vec<_>>();
        let completed = calls.len();
        for call in calls {
            let (status, data) = match self.run(&call.function, &call.args) {
                Ok(result) => (ResponseStatus::Success, result),
                Err(fault) => (ResponseStatus::Error(GENERIC_ERROR_CODE), fault.payload),
            };
            callback(RawEvent::response(call.id, status, data));
        }
        completed
    }

    /// Pushes an unsolicited event. Returns `false` without a callback.
    pub fn emit(&self, name: impl Into<String>, data: impl Into<String>) -> bool {
        self.push_raw(RawEvent::event(name, data))
    }

    /// Pushes an arbitrary blob, e.g. a duplicate or stale response.
    pub fn push_raw(&self, raw: RawEvent) -> bool {
        match self.current_callback() {
            Some(callback) => {
                callback(raw);
                true
            }
            None => false,
        }
    }

    pub fn has_callback(&self) -> bool {
        self.current_callback().is_some()
    }

    fn run(&self, function: &str, args: &str) -> Result<String, NativeFault> {
        let handler = self
            .functions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(function)
            .cloned()
            .ok_or_else(|| NativeFault::new(format!("Method '{function}' not found.")))?;
        handler(args).map_err(NativeFault::new)
    }

    fn current_callback(&self) -> Option<EventCallback> {
        self.callback
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn lock_queue(&self) -> MutexGuard<'_, VecDeque<QueuedCall>> {
        self.queued.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl NativeModule for LoopbackModule {
    fn call_sync(&self, function: &str, args: &str) -> Result<String, NativeFault> {
        self.run(function, args)
    }

    fn call_async(&self, function: &str, args: &str, id: CallId) {
        self.lock_queue().push_back(QueuedCall {
            function: function.to_string(),
            args: args.to_string(),
            id,
        });
    }

    fn register_callback(&self, callback: EventCallback) {
        *self.callback.write().unwrap_or_else(PoisonError::into_inner) = Some(callback);
    }
}

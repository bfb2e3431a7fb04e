//! Correlation registry for in-flight async calls.
//!
//! # Responsibility
//! - Mint process-unique call ids.
//! - Own every `PendingCall` from dispatch until its terminal outcome.
//!
//! # Invariants
//! - Minted ids are pairwise distinct and never the `0` sentinel.
//! - Every tracked id belongs to a call without a terminal outcome.
//! - A resolved or orphaned id is never tracked again while remembered.
//! - No I/O; callers do the logging.

use super::{BridgeError, BridgeResult};
use crate::model::call::{CallId, CallState, PendingCall};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Number of finished ids remembered for late-response diagnostics.
const TERMINAL_MEMORY: usize = 256;

#[derive(Debug, Default)]
struct RegistryState {
    pending: HashMap<CallId, PendingCall>,
    finished: VecDeque<CallId>,
    finished_states: HashMap<CallId, CallState>,
}

impl RegistryState {
    fn remember(&mut self, id: CallId, state: CallState) {
        if self.finished_states.insert(id, state).is_some() {
            return;
        }
        self.finished.push_back(id);
        while self.finished.len() > TERMINAL_MEMORY {
            if let Some(evicted) = self.finished.pop_front() {
                self.finished_states.remove(&evicted);
            }
        }
    }
}

/// Mapping from call id to pending-call state.
#[derive(Debug)]
pub struct CorrelationRegistry {
    first_id: u64,
    next_id: AtomicU64,
    state: Mutex<RegistryState>,
}

impl Default for CorrelationRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl CorrelationRegistry {
    pub fn new() -> Self {
        Self::with_first_id(1)
    }

    /// Creates a registry whose first minted id is `first` (clamped to 1).
    pub fn with_first_id(first: u64) -> Self {
        let first = first.max(1);
        Self {
            first_id: first,
            next_id: AtomicU64::new(first),
            state: Mutex::new(RegistryState::default()),
        }
    }

    /// Mints a fresh, never-before-issued id.
    ///
    /// # Errors
    /// - `BridgeError::Exhausted` once `u64::MAX` would be reached.
    pub fn allocate(&self) -> BridgeResult<CallId> {
        let issued = self
            .next_id
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |next| {
                next.checked_add(1)
            })
            .map_err(|_| BridgeError::Exhausted)?;
        CallId::new(issued).ok_or(BridgeError::Exhausted)
    }

    /// Tracks a new pending call.
    ///
    /// # Errors
    /// - `BridgeError::UnknownId` when `id` was not minted by `allocate`.
    /// - `BridgeError::DuplicateId` when `id` is tracked or recently finished.
    pub fn track(
        &self,
        id: CallId,
        function_name: impl Into<String>,
        payload: impl Into<String>,
    ) -> BridgeResult<()> {
        self.track_call(PendingCall::new(id, function_name, payload))
    }

    /// Tracks a fully built pending call, keeping its deadline.
    pub fn track_call(&self, call: PendingCall) -> BridgeResult<()> {
        if !self.was_minted(call.id) {
            return Err(BridgeError::UnknownId(call.id));
        }
        let mut state = self.lock();
        if state.pending.contains_key(&call.id) || state.finished_states.contains_key(&call.id) {
            return Err(BridgeError::DuplicateId(call.id));
        }
        state.pending.insert(call.id, call);
        Ok(())
    }

    /// Removes and returns the pending call for `id`.
    ///
    /// Returns `None` for ids never issued, already resolved, or orphaned.
    pub fn resolve(&self, id: CallId) -> Option<PendingCall> {
        let mut state = self.lock();
        let call = state.pending.remove(&id)?;
        state.remember(id, CallState::Resolved);
        Some(call)
    }

    /// Marks a tracked call for orphaning once `grace` elapses.
    ///
    /// Returns `false` when `id` is not tracked. An existing earlier deadline
    /// is kept.
    pub fn cancel(&self, id: CallId, grace: Duration) -> bool {
        let mut state = self.lock();
        let Some(call) = state.pending.get_mut(&id) else {
            return false;
        };
        let cancel_at = Instant::now() + grace;
        call.cancelled = true;
        call.deadline = Some(match call.deadline {
            Some(existing) if existing < cancel_at => existing,
            _ => cancel_at,
        });
        true
    }

    /// Removes every call whose deadline has passed at `now`.
    pub fn expire_due(&self, now: Instant) -> Vec<PendingCall> {
        let mut state = self.lock();
        let due = state
            .pending
            .values()
            .filter(|call| call.is_due(now))
            .map(|call| call.id)
            .collect::<Vec<_>>();

        let mut expired = Vec::with_capacity(due.len());
        for id in due {
            if let Some(call) = state.pending.remove(&id) {
                state.remember(id, CallState::Orphaned);
                expired.push(call);
            }
        }
        expired.sort_by_key(|call| call.id);
        expired
    }

    /// Removes every pending call; used at teardown.
    pub fn orphan_all(&self) -> Vec<PendingCall> {
        let mut state = self.lock();
        let mut calls = state.pending.drain().map(|(_, call)| call).collect::<Vec<_>>();
        calls.sort_by_key(|call| call.id);
        for call in &calls {
            state.remember(call.id, CallState::Orphaned);
        }
        calls
    }

    /// Returns whether `id` was recently orphaned.
    pub fn was_orphaned(&self, id: CallId) -> bool {
        self.state_of(id) == Some(CallState::Orphaned)
    }

    /// Lifecycle state of `id` as far as this registry can tell.
    ///
    /// Returns `None` for ids never minted here. Ids finished long ago and
    /// evicted from memory report `Created`.
    pub fn state_of(&self, id: CallId) -> Option<CallState> {
        if !self.was_minted(id) {
            return None;
        }
        let state = self.lock();
        if state.pending.contains_key(&id) {
            return Some(CallState::Pending);
        }
        Some(
            state
                .finished_states
                .get(&id)
                .copied()
                .unwrap_or(CallState::Created),
        )
    }

    /// Returns whether `allocate` has handed out `id`.
    pub fn was_minted(&self, id: CallId) -> bool {
        let raw = id.get();
        raw >= self.first_id && raw < self.next_id.load(Ordering::SeqCst)
    }

    pub fn is_tracked(&self, id: CallId) -> bool {
        self.lock().pending.contains_key(&id)
    }

    /// Diagnostic count of calls awaiting a response.
    pub fn pending_count(&self) -> usize {
        self.lock().pending.len()
    }

    // Every critical section leaves the maps consistent, so a poisoned lock
    // is still safe to use.
    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

//! Scripted-caller facade over one native module.
//!
//! # Responsibility
//! - Expose `init_events`, `call_extension`, `call_extension_async` and
//!   `create_async_id` (alias `create_id`).
//! - Correlate drained responses and hand every outcome to the installed
//!   handler on the polling thread.
//! - Orphan cancelled, expired and torn-down calls.
//!
//! # Invariants
//! - Each tracked call reaches exactly one terminal outcome: one `Response`
//!   or one `Orphaned`.
//! - Responses for unknown or orphaned ids are dropped, never re-tracked.
//! - The handler runs without any bridge lock held.
//! - Outcomes produced while the handler runs (re-entrant `poll` or
//!   `shutdown`) are queued and handed to it before delivery returns.
//! - State belongs to this instance; bridges never share registries or
//!   channels.

use super::channel::EventChannel;
use super::dispatcher::CallDispatcher;
use super::native::{EventCallback, NativeModule};
use super::registry::CorrelationRegistry;
use super::{BridgeError, BridgeResult};
use crate::config::BridgeConfig;
use crate::model::call::{CallId, CallState, OrphanReason, PendingCall};
use crate::model::event::{EventKind, RawEvent, ResponseStatus};
use log::{debug, error, info, warn};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Outcome handed to the scripted caller's handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeEvent {
    /// Response matched to the call that caused it.
    Response {
        call: PendingCall,
        status: ResponseStatus,
        payload: String,
        sequence: u64,
    },
    /// Event the native side emitted on its own.
    Unsolicited {
        name: String,
        payload: String,
        sequence: u64,
    },
    /// Call that will never be answered; any late result is discarded.
    Orphaned {
        call: PendingCall,
        reason: OrphanReason,
    },
}

/// Receiver of bridge outcomes, invoked on the polling thread.
pub trait EventHandler: Send {
    fn handle(&mut self, event: BridgeEvent);
}

impl<F> EventHandler for F
where
    F: FnMut(BridgeEvent) + Send,
{
    fn handle(&mut self, event: BridgeEvent) {
        self(event)
    }
}

/// Counts for one `poll`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollSummary {
    pub responses: usize,
    pub unsolicited: usize,
    /// Responses dropped because no pending call matched.
    pub unknown: usize,
    pub orphaned: usize,
}

impl PollSummary {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

#[derive(Default)]
struct HandlerSlot {
    handler: Option<Box<dyn EventHandler>>,
    generation: u64,
    /// Set while the handler is checked out for delivery.
    delivering: bool,
    backlog: VecDeque<BridgeEvent>,
}

/// Extension call bridge over one native module.
pub struct Bridge {
    bridge_id: Uuid,
    config: BridgeConfig,
    native: Arc<dyn NativeModule>,
    registry: Arc<CorrelationRegistry>,
    channel: Arc<EventChannel>,
    dispatcher: CallDispatcher,
    handler: Mutex<HandlerSlot>,
    events_ready: AtomicBool,
    shut_down: AtomicBool,
}

impl Bridge {
    /// Creates a bridge with its own registry and event channel.
    pub fn new(native: Arc<dyn NativeModule>, config: BridgeConfig) -> Self {
        let registry = Arc::new(CorrelationRegistry::new());
        let channel = Arc::new(EventChannel::new(
            config.event_queue_capacity,
            config.push_timeout(),
        ));
        let dispatcher = CallDispatcher::new(native.clone(), registry.clone())
            .with_sync_timeout(config.sync_timeout())
            .with_pending_expiry(config.pending_expiry());
        let bridge_id = Uuid::new_v4();

        info!(
            "event=bridge_init module=bridge status=ok bridge_id={} queue_capacity={} sync_timeout_ms={:?}",
            bridge_id, config.event_queue_capacity, config.sync_timeout_ms
        );

        Self {
            bridge_id,
            config,
            native,
            registry,
            channel,
            dispatcher,
            handler: Mutex::new(HandlerSlot::default()),
            events_ready: AtomicBool::new(false),
            shut_down: AtomicBool::new(false),
        }
    }

    /// Installs `handler` and, on first use, the native push callback.
    ///
    /// Calling again replaces the handler; the channel and the native
    /// callback stay as they are.
    pub fn init_events(&self, handler: impl EventHandler + 'static) -> BridgeResult<()> {
        self.ensure_running()?;
        {
            let mut slot = self.lock_handler();
            slot.handler = Some(Box::new(handler));
            slot.generation += 1;
        }

        if self.events_ready.swap(true, Ordering::SeqCst) {
            debug!(
                "event=init_events module=bridge status=handler_replaced bridge_id={}",
                self.bridge_id
            );
            return Ok(());
        }

        self.native
            .register_callback(push_callback(self.bridge_id, Arc::downgrade(&self.channel)));
        info!(
            "event=init_events module=bridge status=ok bridge_id={}",
            self.bridge_id
        );
        Ok(())
    }

    /// Calls `function` synchronously; see `CallDispatcher::call_sync`.
    pub fn call_extension(&self, function: &str, args: &str) -> BridgeResult<String> {
        self.ensure_running()?;
        self.dispatcher.call_sync(function, args)
    }

    /// Dispatches `function` asynchronously and returns its correlation id.
    ///
    /// # Errors
    /// - `BridgeError::EventsNotInitialized` before `init_events`; no id is
    ///   allocated in that case.
    pub fn call_extension_async(&self, function: &str, args: &str) -> BridgeResult<CallId> {
        self.ensure_events_ready()?;
        let id = self.create_async_id()?;
        self.dispatcher.call_async_with_id(id, function, args)?;
        Ok(id)
    }

    /// Dispatches under an id minted earlier by `create_async_id`.
    pub fn call_extension_async_with_id(
        &self,
        id: CallId,
        function: &str,
        args: &str,
    ) -> BridgeResult<()> {
        self.ensure_events_ready()?;
        self.dispatcher.call_async_with_id(id, function, args)
    }

    /// Mints a fresh call id without dispatching anything.
    pub fn create_async_id(&self) -> BridgeResult<CallId> {
        self.ensure_running()?;
        self.registry.allocate().inspect_err(|err| {
            error!(
                "event=create_id module=bridge status=error bridge_id={} error={}",
                self.bridge_id, err
            );
        })
    }

    /// Alias of `create_async_id`.
    pub fn create_id(&self) -> BridgeResult<CallId> {
        self.create_async_id()
    }

    /// Stops waiting for `id`; it is orphaned once `grace` elapses.
    ///
    /// `None` uses the configured default grace. Returns `false` when `id`
    /// is not pending.
    pub fn cancel(&self, id: CallId, grace: Option<Duration>) -> bool {
        let grace = grace.unwrap_or_else(|| self.config.orphan_grace());
        let cancelled = self.registry.cancel(id, grace);
        info!(
            "event=call_cancel module=bridge status={} bridge_id={} call_id={} grace_ms={}",
            if cancelled { "ok" } else { "not_pending" },
            self.bridge_id,
            id,
            grace.as_millis()
        );
        cancelled
    }

    /// Drains the event channel once and delivers every outcome.
    ///
    /// Meant to be called once per engine tick from the polling thread.
    pub fn poll(&self) -> PollSummary {
        let mut summary = PollSummary::default();
        let mut outcomes = Vec::new();

        for event in self.channel.drain_all() {
            match event.kind {
                EventKind::Unsolicited(name) => {
                    summary.unsolicited += 1;
                    outcomes.push(BridgeEvent::Unsolicited {
                        name,
                        payload: event.payload,
                        sequence: event.sequence,
                    });
                }
                EventKind::Response(status) => {
                    let Some(id) = event.id else {
                        summary.unknown += 1;
                        continue;
                    };
                    match self.registry.resolve(id) {
                        Some(call) => {
                            summary.responses += 1;
                            debug!(
                                "event=call_resolve module=bridge status=ok bridge_id={} call_id={} function={} success={} latency_ms={}",
                                self.bridge_id,
                                id,
                                call.function_name,
                                status.is_success(),
                                call.age().as_millis()
                            );
                            outcomes.push(BridgeEvent::Response {
                                call,
                                status,
                                payload: event.payload,
                                sequence: event.sequence,
                            });
                        }
                        None => {
                            summary.unknown += 1;
                            let reason = match self.registry.state_of(id) {
                                Some(CallState::Orphaned) => "orphaned",
                                Some(CallState::Resolved) => "duplicate",
                                _ => "unknown_id",
                            };
                            debug!(
                                "event=call_resolve module=bridge status=dropped reason={} bridge_id={} call_id={}",
                                reason, self.bridge_id, id
                            );
                        }
                    }
                }
            }
        }

        for call in self.registry.expire_due(Instant::now()) {
            summary.orphaned += 1;
            let reason = call.orphan_reason();
            self.log_orphan(&call, reason);
            outcomes.push(BridgeEvent::Orphaned { call, reason });
        }

        self.deliver(outcomes);
        summary
    }

    /// Tears the bridge down: closes the channel, orphans every pending
    /// call, reports them, and unregisters the handler. Idempotent.
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        self.channel.close();

        let discarded = self.channel.drain_all().len();
        let orphans = self
            .registry
            .orphan_all()
            .into_iter()
            .map(|call| {
                self.log_orphan(&call, OrphanReason::Shutdown);
                BridgeEvent::Orphaned {
                    call,
                    reason: OrphanReason::Shutdown,
                }
            })
            .collect::<Vec<_>>();
        let orphaned = orphans.len();
        self.deliver(orphans);

        {
            let mut slot = self.lock_handler();
            slot.handler = None;
            slot.generation += 1;
        }
        info!(
            "event=bridge_shutdown module=bridge status=ok bridge_id={} orphaned={} discarded_events={}",
            self.bridge_id, orphaned, discarded
        );
    }

    pub fn bridge_id(&self) -> Uuid {
        self.bridge_id
    }

    /// Lifecycle state of `id`; `None` for ids this bridge never minted.
    pub fn call_state(&self, id: CallId) -> Option<CallState> {
        self.registry.state_of(id)
    }

    /// Diagnostic count of calls awaiting a response.
    pub fn pending_count(&self) -> usize {
        self.registry.pending_count()
    }

    pub fn events_initialized(&self) -> bool {
        self.events_ready.load(Ordering::SeqCst)
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    fn deliver(&self, outcomes: Vec<BridgeEvent>) {
        if outcomes.is_empty() {
            return;
        }

        let (mut handler, mut generation) = {
            let mut slot = self.lock_handler();
            if slot.delivering {
                slot.backlog.extend(outcomes);
                return;
            }
            let Some(handler) = slot.handler.take() else {
                debug!(
                    "event=deliver module=bridge status=dropped reason=no_handler bridge_id={} count={}",
                    self.bridge_id,
                    outcomes.len()
                );
                return;
            };
            slot.delivering = true;
            (handler, slot.generation)
        };

        let mut batch = VecDeque::from(outcomes);
        loop {
            while let Some(outcome) = batch.pop_front() {
                handler.handle(outcome);
            }

            let mut slot = self.lock_handler();
            if !slot.backlog.is_empty() {
                // A handler installed mid-delivery takes over the backlog.
                if slot.generation != generation {
                    if let Some(replacement) = slot.handler.take() {
                        handler = replacement;
                        generation = slot.generation;
                    }
                }
                std::mem::swap(&mut batch, &mut slot.backlog);
                continue;
            }
            slot.delivering = false;
            // The handler may have been replaced or cleared while it ran.
            if slot.generation == generation && slot.handler.is_none() {
                slot.handler = Some(handler);
            }
            return;
        }
    }

    fn log_orphan(&self, call: &PendingCall, reason: OrphanReason) {
        warn!(
            "event=call_orphaned module=bridge status=contract_violation bridge_id={} call_id={} function={} reason={} age_ms={}",
            self.bridge_id,
            call.id,
            call.function_name,
            reason.as_str(),
            call.age().as_millis()
        );
    }

    fn ensure_running(&self) -> BridgeResult<()> {
        if self.is_shut_down() {
            return Err(BridgeError::ShutDown);
        }
        Ok(())
    }

    fn ensure_events_ready(&self) -> BridgeResult<()> {
        self.ensure_running()?;
        if !self.events_initialized() {
            return Err(BridgeError::EventsNotInitialized);
        }
        Ok(())
    }

    fn lock_handler(&self) -> MutexGuard<'_, HandlerSlot> {
        self.handler.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for Bridge {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn push_callback(bridge_id: Uuid, channel: Weak<EventChannel>) -> EventCallback {
    Arc::new(move |raw: RawEvent| {
        let event = match raw.decode() {
            Ok(event) => event,
            Err(err) => {
                warn!(
                    "event=event_decode module=bridge status=error bridge_id={} function_len={} error={}",
                    bridge_id,
                    raw.function.len(),
                    err
                );
                return;
            }
        };
        match channel.upgrade() {
            // Push failures are logged by the channel.
            Some(channel) => {
                let _ = channel.push(event);
            }
            None => debug!(
                "event=event_push module=bridge status=dropped reason=bridge_gone bridge_id={}",
                bridge_id
            ),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::{Bridge, BridgeEvent};
    use crate::bridge::loopback::LoopbackModule;
    use crate::bridge::BridgeError;
    use crate::config::BridgeConfig;
    use crate::model::call::OrphanReason;
    use std::sync::{Arc, Mutex};

    fn bridge_with(module: Arc<LoopbackModule>) -> Bridge {
        Bridge::new(module, BridgeConfig::default())
    }

    fn collector() -> (Arc<Mutex<Vec<BridgeEvent>>>, impl FnMut(BridgeEvent) + Send) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        (seen, move |event| sink.lock().expect("sink").push(event))
    }

    #[test]
    fn async_call_before_init_events_is_refused_without_allocating() {
        let bridge = bridge_with(Arc::new(LoopbackModule::new()));
        assert_eq!(
            bridge.call_extension_async("ping", ""),
            Err(BridgeError::EventsNotInitialized)
        );
        assert_eq!(bridge.create_async_id().expect("id").get(), 1);
    }

    #[test]
    fn init_events_twice_keeps_one_native_callback() {
        let module = Arc::new(LoopbackModule::new());
        let bridge = bridge_with(module.clone());
        let (first_seen, first) = collector();
        let (second_seen, second) = collector();

        assert!(!module.has_callback());
        bridge.init_events(first).expect("first init");
        assert!(module.has_callback());
        bridge.init_events(second).expect("second init");
        assert!(module.emit("tick", "1"));

        assert_eq!(bridge.poll().unsolicited, 1);
        assert!(first_seen.lock().expect("sink").is_empty());
        assert_eq!(second_seen.lock().expect("sink").len(), 1);
    }

    #[test]
    fn handler_may_reenter_the_bridge() {
        let module = Arc::new(LoopbackModule::new().with_function("ping", |_| Ok("pong".into())));
        let bridge = Arc::new(bridge_with(module.clone()));
        let reentrant = Arc::downgrade(&bridge);
        let follow_up = Arc::new(Mutex::new(None));
        let follow_up_slot = follow_up.clone();

        bridge
            .init_events(move |event| {
                if let BridgeEvent::Unsolicited { .. } = event {
                    if let Some(bridge) = reentrant.upgrade() {
                        let id = bridge.call_extension_async("ping", "").expect("nested call");
                        *follow_up_slot.lock().expect("slot") = Some(id);
                    }
                }
            })
            .expect("init events");

        module.emit("start", "");
        bridge.poll();
        let id = follow_up.lock().expect("slot").expect("nested call id");
        assert_eq!(bridge.pending_count(), 1);
        module.complete_pending();
        assert_eq!(bridge.poll().responses, 1);
        assert_eq!(bridge.pending_count(), 0);
        assert_eq!(id.get(), 1);
    }

    #[test]
    fn shutdown_orphans_pending_calls_and_rejects_new_work() {
        let module = Arc::new(LoopbackModule::new());
        let bridge = bridge_with(module.clone());
        let (seen, handler) = collector();
        bridge.init_events(handler).expect("init events");
        let id = bridge.call_extension_async("ping", "").expect("dispatch");

        bridge.shutdown();
        bridge.shutdown();

        let events = seen.lock().expect("sink");
        assert_eq!(events.len(), 1);
        assert!(matches!(
            &events[0],
            BridgeEvent::Orphaned { call, reason: OrphanReason::Shutdown } if call.id == id
        ));
        assert_eq!(bridge.pending_count(), 0);
        assert_eq!(bridge.call_extension("ping", ""), Err(BridgeError::ShutDown));
        assert_eq!(bridge.create_id(), Err(BridgeError::ShutDown));

        module.complete_pending();
        assert!(bridge.poll().is_empty());
    }

    #[test]
    fn nested_poll_from_handler_still_delivers_the_response() {
        let module = Arc::new(LoopbackModule::new().with_function("ping", |_| Ok("pong".into())));
        let bridge = Arc::new(bridge_with(module.clone()));
        let (seen, mut record) = collector();
        let reentrant = Arc::downgrade(&bridge);
        let nested_module = module.clone();

        bridge
            .init_events(move |event: BridgeEvent| {
                let drain_again =
                    matches!(&event, BridgeEvent::Unsolicited { name, .. } if name == "start");
                record(event);
                if drain_again {
                    nested_module.complete_pending();
                    if let Some(bridge) = reentrant.upgrade() {
                        assert_eq!(bridge.poll().responses, 1);
                    }
                }
            })
            .expect("init events");

        let id = bridge.call_extension_async("ping", "").expect("dispatch");
        module.emit("start", "");
        assert_eq!(bridge.poll().unsolicited, 1);

        let events = seen.lock().expect("sink");
        assert_eq!(events.len(), 2);
        assert!(matches!(&events[0], BridgeEvent::Unsolicited { name, .. } if name == "start"));
        assert!(matches!(
            &events[1],
            BridgeEvent::Response { call, payload, .. } if call.id == id && payload == "pong"
        ));
        drop(events);

        module.emit("later", "");
        assert_eq!(bridge.poll().unsolicited, 1);
        assert_eq!(seen.lock().expect("sink").len(), 3);
    }

    #[test]
    fn shutdown_from_handler_reports_orphans_to_it() {
        let module = Arc::new(LoopbackModule::new());
        let bridge = Arc::new(bridge_with(module.clone()));
        let (seen, mut record) = collector();
        let reentrant = Arc::downgrade(&bridge);

        bridge
            .init_events(move |event: BridgeEvent| {
                let quit = matches!(&event, BridgeEvent::Unsolicited { name, .. } if name == "quit");
                record(event);
                if quit {
                    if let Some(bridge) = reentrant.upgrade() {
                        bridge.shutdown();
                    }
                }
            })
            .expect("init events");

        let id = bridge.call_extension_async("ping", "").expect("dispatch");
        module.emit("quit", "");
        bridge.poll();

        let events = seen.lock().expect("sink");
        assert_eq!(events.len(), 2);
        assert!(matches!(
            &events[1],
            BridgeEvent::Orphaned { call, reason: OrphanReason::Shutdown } if call.id == id
        ));
        assert!(bridge.is_shut_down());
        assert_eq!(bridge.pending_count(), 0);
    }

    #[test]
    fn handler_replaced_mid_delivery_receives_the_backlog() {
        let module = Arc::new(LoopbackModule::new().with_function("ping", |_| Ok("pong".into())));
        let bridge = Arc::new(bridge_with(module.clone()));
        let (first_seen, mut first) = collector();
        let (second_seen, second) = collector();
        let second = Mutex::new(Some(second));
        let reentrant = Arc::downgrade(&bridge);
        let nested_module = module.clone();

        bridge
            .init_events(move |event: BridgeEvent| {
                first(event);
                let replacement = second.lock().expect("replacement").take();
                if let (Some(replacement), Some(bridge)) = (replacement, reentrant.upgrade()) {
                    bridge.init_events(replacement).expect("replace handler");
                    nested_module.complete_pending();
                    bridge.poll();
                }
            })
            .expect("init events");

        bridge.call_extension_async("ping", "").expect("dispatch");
        module.emit("swap", "");
        bridge.poll();

        assert_eq!(first_seen.lock().expect("sink").len(), 1);
        let second_events = second_seen.lock().expect("sink");
        assert_eq!(second_events.len(), 1);
        assert!(matches!(&second_events[0], BridgeEvent::Response { .. }));
    }
}

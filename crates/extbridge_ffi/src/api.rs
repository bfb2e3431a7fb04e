//! Host-facing extension API.
//!
//! # Responsibility
//! - Own the process-wide bridge between `load_extension` and
//!   `unload_extension`.
//! - Translate bridge results into engine-array envelopes.
//! - Forward bridge outcomes to the host callback as `(function, data)`.
//! - Keep the host callback across reloads; it is installed into every
//!   bridge loaded after registration.
//!
//! # Invariants
//! - Exported functions never panic across the host boundary.
//! - Every call returns an envelope; with no bridge loaded it is
//!   `["ERROR",["extension not loaded"]]`.
//! - The bridge slot lock is never held while calling into the bridge.
//!
//! # See also
//! - `envelope` for the result format.

use crate::envelope::{self, Item, ResultCode};
use extbridge_core::{
    core_version as core_version_inner, init_logging as init_logging_inner, ping as ping_inner,
    Bridge, BridgeConfig, BridgeEvent, CallId, NativeModule, RawEvent, ASYNC_FAILED,
};
use log::{debug, error, info, warn};
use once_cell::sync::Lazy;
use std::sync::{Arc, PoisonError, RwLock};

const NOT_LOADED: &str = "extension not loaded";

type HostCallback = Arc<dyn Fn(String, String) + Send + Sync>;

static BRIDGE: Lazy<RwLock<Option<Arc<Bridge>>>> = Lazy::new(|| RwLock::new(None));
static HOST_CALLBACK: Lazy<RwLock<Option<HostCallback>>> = Lazy::new(|| RwLock::new(None));

/// Minimal health-check API for host smoke integration.
pub fn ping() -> String {
    ping_inner().to_owned()
}

/// Core crate version.
pub fn core_version() -> String {
    core_version_inner().to_owned()
}

/// Initializes core logging once per process.
///
/// Returns an empty string on success and the error message otherwise.
/// Repeating the call with the same `level + log_dir` is a no-op.
pub fn init_logging(level: String, log_dir: String) -> String {
    match init_logging_inner(level.as_str(), log_dir.as_str()) {
        Ok(()) => String::new(),
        Err(err) => err.to_string(),
    }
}

/// Builds the bridge over `native`, replacing and shutting down any
/// previously loaded one.
///
/// Configuration comes from the file named by `EXTBRIDGE_CONFIG`, if set.
pub fn load_extension(native: Arc<dyn NativeModule>) -> String {
    let config = match BridgeConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            warn!("event=load_extension module=ffi status=error error={}", err);
            return envelope::error(err.to_string());
        }
    };

    let bridge = Arc::new(Bridge::new(native, config));
    let bridge_id = bridge.bridge_id();
    if host_callback().is_some() {
        if let Err(err) = bridge.init_events(forward_to_host) {
            error!(
                "event=load_extension module=ffi status=error bridge_id={} error={}",
                bridge_id, err
            );
        }
    }
    let previous = BRIDGE
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .replace(bridge);
    if let Some(previous) = previous {
        previous.shutdown();
    }

    info!(
        "event=load_extension module=ffi status=ok bridge_id={}",
        bridge_id
    );
    envelope::success(&[Item::from(bridge_id.to_string())])
}

/// Registers the host callback receiving `(function, data)` pairs.
///
/// Responses arrive as `ASYNC_RESPONSE|<id>|<code>`, orphaned calls as
/// `ASYNC_FAILED|<id>` with the reason as data, unsolicited events under
/// their own name. The callback is kept when no extension is loaded and is
/// installed on the next `load_extension`.
pub fn init_events(callback: impl Fn(String, String) + Send + Sync + 'static) -> String {
    *HOST_CALLBACK
        .write()
        .unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(callback));
    with_bridge(|bridge| match bridge.init_events(forward_to_host) {
        Ok(()) => envelope::success(&[]),
        Err(err) => envelope::error(err.to_string()),
    })
}

/// Drops the registered host callback. Later outcomes are discarded.
pub fn release_events() -> String {
    HOST_CALLBACK
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .take();
    envelope::success(&[])
}

/// Calls `function` synchronously; the native result is the single item.
pub fn call_extension(function: String, args: String) -> String {
    with_bridge(|bridge| match bridge.call_extension(&function, &args) {
        Ok(result) => envelope::success(&[Item::from(result)]),
        Err(err) => envelope::error(err.to_string()),
    })
}

/// Dispatches `function` asynchronously; answers `["ASYNC_SENT",[<id>]]`.
pub fn call_extension_async(function: String, args: String) -> String {
    with_bridge(|bridge| match bridge.call_extension_async(&function, &args) {
        Ok(id) => envelope::render(ResultCode::AsyncSent, &[Item::from(id.get())]),
        Err(err) => envelope::error(err.to_string()),
    })
}

/// Dispatches `function` under an id minted earlier by `create_async_id`.
pub fn call_extension_async_with_id(id: u64, function: String, args: String) -> String {
    with_bridge(|bridge| {
        let Some(call_id) = CallId::new(id) else {
            return envelope::error(format!("invalid call id: {id}"));
        };
        match bridge.call_extension_async_with_id(call_id, &function, &args) {
            Ok(()) => envelope::render(ResultCode::AsyncSent, &[Item::from(id)]),
            Err(err) => envelope::error(err.to_string()),
        }
    })
}

/// Mints a call id without dispatching anything.
pub fn create_async_id() -> String {
    with_bridge(|bridge| match bridge.create_async_id() {
        Ok(id) => envelope::success(&[Item::from(id.get())]),
        Err(err) => envelope::error(err.to_string()),
    })
}

/// Alias of `create_async_id`.
pub fn create_id() -> String {
    create_async_id()
}

/// Stops waiting for call `id`; the default grace period applies.
pub fn cancel_async(id: u64) -> String {
    with_bridge(|bridge| {
        let cancelled = CallId::new(id).is_some_and(|id| bridge.cancel(id, None));
        let code = if cancelled {
            ResultCode::AsyncCancelSuccess
        } else {
            ResultCode::AsyncCancelFailed
        };
        envelope::render(code, &[])
    })
}

/// Per-frame poll. Items are `[responses, unsolicited, unknown, orphaned]`.
pub fn tick() -> String {
    with_bridge(|bridge| {
        let summary = bridge.poll();
        envelope::success(&[
            Item::from(summary.responses),
            Item::from(summary.unsolicited),
            Item::from(summary.unknown),
            Item::from(summary.orphaned),
        ])
    })
}

/// Shuts the loaded bridge down and releases it.
pub fn unload_extension() -> String {
    let previous = BRIDGE
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .take();
    match previous {
        Some(bridge) => {
            bridge.shutdown();
            info!(
                "event=unload_extension module=ffi status=ok bridge_id={}",
                bridge.bridge_id()
            );
            envelope::success(&[])
        }
        None => envelope::error(NOT_LOADED),
    }
}

fn with_bridge(action: impl FnOnce(&Bridge) -> String) -> String {
    let bridge = BRIDGE
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .clone();
    match bridge {
        Some(bridge) => action(&bridge),
        None => envelope::error(NOT_LOADED),
    }
}

fn host_callback() -> Option<HostCallback> {
    HOST_CALLBACK
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .clone()
}

fn forward_to_host(event: BridgeEvent) {
    let raw = host_event(event);
    match host_callback() {
        Some(callback) => callback(raw.function, raw.data),
        None => debug!(
            "event=forward_event module=ffi status=dropped reason=no_host_callback function_len={}",
            raw.function.len()
        ),
    }
}

fn host_event(event: BridgeEvent) -> RawEvent {
    match event {
        BridgeEvent::Response {
            call,
            status,
            payload,
            ..
        } => RawEvent::response(call.id, status, payload),
        BridgeEvent::Unsolicited { name, payload, .. } => RawEvent::event(name, payload),
        BridgeEvent::Orphaned { call, reason } => {
            RawEvent::new(format!("{ASYNC_FAILED}|{}", call.id), reason.as_str())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{
        call_extension, call_extension_async, call_extension_async_with_id, cancel_async,
        core_version, create_async_id, create_id, init_events, init_logging, load_extension,
        ping, release_events, tick, unload_extension,
    };
    use crate::test_support::serial;
    use extbridge_core::LoopbackModule;
    use std::sync::{Arc, Mutex};

    fn load_loopback() -> Arc<LoopbackModule> {
        let module = Arc::new(
            LoopbackModule::new()
                .with_function("version", |_| Ok("1.0.0".to_string()))
                .with_function("quote", |_| Err("bad \"arg\"".to_string())),
        );
        let loaded = load_extension(module.clone());
        assert!(loaded.starts_with(r#"["SUCCESS",[""#), "{loaded}");
        module
    }

    #[test]
    fn ping_returns_pong() {
        assert_eq!(ping(), "pong");
    }

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }

    #[test]
    fn init_logging_rejects_empty_log_dir() {
        let error = init_logging("info".to_string(), "   ".to_string());
        assert!(error.contains("log_dir"));
    }

    #[test]
    fn init_logging_rejects_unsupported_level() {
        let error = init_logging("verbose".to_string(), "/tmp/extbridge".to_string());
        assert!(error.contains("unsupported log level"));
    }

    #[test]
    fn calls_without_a_loaded_extension_report_not_loaded() {
        let _guard = serial();
        unload_extension();
        let expected = r#"["ERROR",["extension not loaded"]]"#;
        assert_eq!(call_extension("version".to_string(), String::new()), expected);
        assert_eq!(create_id(), expected);
        assert_eq!(tick(), expected);
        assert_eq!(unload_extension(), expected);
    }

    #[test]
    fn sync_calls_wrap_results_and_faults() {
        let _guard = serial();
        load_loopback();
        assert_eq!(
            call_extension("version".to_string(), String::new()),
            r#"["SUCCESS",["1.0.0"]]"#
        );
        let fault = call_extension("quote".to_string(), String::new());
        assert!(fault.starts_with(r#"["ERROR",[""#), "{fault}");
        assert!(fault.contains(r#"bad ""arg"""#), "{fault}");
        unload_extension();
    }

    #[test]
    fn async_round_trip_reaches_the_host_callback() {
        let _guard = serial();
        release_events();
        let module = load_loopback();

        let refused = call_extension_async("version".to_string(), String::new());
        assert!(refused.starts_with(r#"["ERROR""#), "{refused}");

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        assert_eq!(
            init_events(move |function, data| sink.lock().expect("sink").push((function, data))),
            r#"["SUCCESS",[]]"#
        );

        assert_eq!(create_async_id(), r#"["SUCCESS",[1]]"#);
        assert_eq!(
            call_extension_async("version".to_string(), String::new()),
            r#"["ASYNC_SENT",[2]]"#
        );
        module.complete_pending();
        module.emit("loaded", "{}");
        assert_eq!(tick(), r#"["SUCCESS",[1,1,0,0]]"#);

        let events = seen.lock().expect("sink").clone();
        assert_eq!(
            events,
            vec![
                ("ASYNC_RESPONSE|2|0".to_string(), "1.0.0".to_string()),
                ("loaded".to_string(), "{}".to_string()),
            ]
        );
        unload_extension();
    }

    #[test]
    fn cancel_reports_success_then_orphan_reaches_host() {
        let _guard = serial();
        load_loopback();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        init_events(move |function, data| sink.lock().expect("sink").push((function, data)));

        call_extension_async("version".to_string(), String::new());
        assert_eq!(cancel_async(1), r#"["ASYNC_CANCEL_SUCCESS",[]]"#);
        assert_eq!(cancel_async(42), r#"["ASYNC_CANCEL_FAILED",[]]"#);
        assert_eq!(cancel_async(0), r#"["ASYNC_CANCEL_FAILED",[]]"#);

        assert_eq!(tick(), r#"["SUCCESS",[0,0,0,1]]"#);
        assert_eq!(
            seen.lock().expect("sink").as_slice(),
            &[("ASYNC_FAILED|1".to_string(), "cancelled".to_string())]
        );
        unload_extension();
    }

    #[test]
    fn reloading_replaces_the_previous_bridge() {
        let _guard = serial();
        load_loopback();
        assert_eq!(create_async_id(), r#"["SUCCESS",[1]]"#);
        load_loopback();
        assert_eq!(create_async_id(), r#"["SUCCESS",[1]]"#);
        assert_eq!(unload_extension(), r#"["SUCCESS",[]]"#);
    }

    #[test]
    fn callback_registered_before_load_is_installed_on_load() {
        let _guard = serial();
        unload_extension();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let early = init_events(move |function, data| sink.lock().expect("sink").push((function, data)));
        assert_eq!(early, r#"["ERROR",["extension not loaded"]]"#);

        let module = load_loopback();
        assert_eq!(create_async_id(), r#"["SUCCESS",[1]]"#);
        assert_eq!(
            call_extension_async_with_id(1, "version".to_string(), String::new()),
            r#"["ASYNC_SENT",[1]]"#
        );
        let refused = call_extension_async_with_id(5, "version".to_string(), String::new());
        assert!(refused.starts_with(r#"["ERROR""#), "{refused}");

        module.complete_pending();
        tick();
        assert_eq!(
            seen.lock().expect("sink").as_slice(),
            &[("ASYNC_RESPONSE|1|0".to_string(), "1.0.0".to_string())]
        );

        release_events();
        module.emit("ignored", "");
        tick();
        assert_eq!(seen.lock().expect("sink").len(), 1);
        unload_extension();
    }
}

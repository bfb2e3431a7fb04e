//! CLI smoke entry point.
//!
//! # Responsibility
//! - Verify `extbridge_core` linkage.
//! - Drive one sync call, one async round trip and one unsolicited event
//!   through an in-process loopback module.
//! - Keep output deterministic for quick local sanity checks.

use extbridge_core::{Bridge, BridgeConfig, BridgeError, BridgeEvent, LoopbackModule};
use std::process::ExitCode;
use std::sync::Arc;

const MAX_POLLS: usize = 100;

fn main() -> ExitCode {
    println!("extbridge_core ping={}", extbridge_core::ping());
    println!("extbridge_core version={}", extbridge_core::core_version());

    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("extbridge smoke failed: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<(), BridgeError> {
    let module = Arc::new(
        LoopbackModule::new()
            .with_function("version", |_| Ok(extbridge_core::core_version().to_string()))
            .with_function("ping", |_| Ok("pong".to_string())),
    );
    let bridge = Bridge::new(module.clone(), BridgeConfig::default());

    bridge.init_events(|event: BridgeEvent| match event {
        BridgeEvent::Response {
            call,
            status,
            payload,
            sequence,
        } => println!(
            "event seq={sequence} response call_id={} function={} code={} payload={payload}",
            call.id,
            call.function_name,
            status.code()
        ),
        BridgeEvent::Unsolicited {
            name,
            payload,
            sequence,
        } => println!("event seq={sequence} unsolicited name={name} payload={payload}"),
        BridgeEvent::Orphaned { call, reason } => println!(
            "event orphaned call_id={} reason={}",
            call.id,
            reason.as_str()
        ),
    })?;

    println!("sync version={}", bridge.call_extension("version", "")?);

    let id = bridge.call_extension_async("ping", "")?;
    println!("async sent call_id={id}");

    let worker = {
        let module = module.clone();
        std::thread::spawn(move || {
            module.complete_pending();
            module.emit("extension_ready", "{}");
        })
    };
    if worker.join().is_err() {
        eprintln!("native worker panicked");
    }

    let mut delivered = 0;
    for _ in 0..MAX_POLLS {
        let summary = bridge.poll();
        delivered += summary.responses + summary.unsolicited;
        if bridge.pending_count() == 0 && delivered >= 2 {
            break;
        }
        std::thread::yield_now();
    }
    println!(
        "poll delivered={delivered} pending={}",
        bridge.pending_count()
    );

    bridge.shutdown();
    Ok(())
}

//! Core of the extension call bridge.
//! Correlates script-issued native calls with the responses and events the
//! native module pushes back.

pub mod bridge;
pub mod config;
pub mod logging;
pub mod model;

pub use bridge::channel::{ChannelError, EventChannel};
pub use bridge::dispatcher::CallDispatcher;
pub use bridge::facade::{Bridge, BridgeEvent, EventHandler, PollSummary};
pub use bridge::loopback::LoopbackModule;
pub use bridge::native::{EventCallback, NativeFault, NativeModule};
pub use bridge::registry::CorrelationRegistry;
pub use bridge::{BridgeError, BridgeResult};
pub use config::{BridgeConfig, ConfigError, CONFIG_ENV_VAR};
pub use logging::{default_log_level, init_logging, logging_status, LogLevel, LoggingError};
pub use model::call::{CallId, CallState, OrphanReason, PendingCall};
pub use model::event::{
    EventDecodeError, EventKind, ExtensionEvent, InboundEvent, RawEvent, ResponseStatus,
    ASYNC_FAILED, ASYNC_RESPONSE,
};

/// Minimal health-check API for host integration.
pub fn ping() -> &'static str {
    "pong"
}

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

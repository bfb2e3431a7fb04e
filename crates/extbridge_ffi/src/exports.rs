//! C entry points the engine resolves when it loads the extension library.
//!
//! # Responsibility
//! - Route the engine's function string to the `api` operations.
//! - Copy envelopes into the engine's fixed-size output buffer.
//! - Bridge the engine's callback pointer to `api::init_events`.
//!
//! # Invariants
//! - Output is truncated to `output_size - 1` bytes on a UTF-8 boundary and
//!   always NUL-terminated.
//! - No panic unwinds into the engine.
//!
//! # Routing
//! - `<function>`: sync call.
//! - `<function>|<id>`: async call under an id from `createAsyncId`.
//! - `<function>|`: async call under a freshly minted id.
//! - `ASYNC_CANCEL|<id>`: cancel.
//! - `createAsyncId` / `createId`: mint an id.
//! - `ASYNC_POLL`: per-frame poll.

#![allow(non_snake_case)]

use crate::api;
use crate::envelope::{self, ResultCode};
use log::error;
use std::ffi::{c_char, c_int, c_uint, CStr, CString};
use std::panic::catch_unwind;

/// Name passed as the first argument of every engine callback.
pub const EXTENSION_NAME: &str = "extbridge";

const CANCEL_COMMAND: &str = "ASYNC_CANCEL";
const POLL_COMMAND: &str = "ASYNC_POLL";
const CREATE_ID_COMMANDS: [&str; 2] = ["createAsyncId", "createId"];
const INVALID_METHOD: &str = "Invalid Method";

/// Engine callback: `(extension name, function, data) -> status`.
pub type EngineCallback =
    unsafe extern "C" fn(*const c_char, *const c_char, *const c_char) -> c_int;

/// Status returned by `RVExtensionArgs`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReturnCode {
    Success = 0,
    Error = 1,
    InvalidMethod = 2,
}

/// Operation selected by the engine's function string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostCommand<'a> {
    Call { function: &'a str },
    CallAsync { function: &'a str, id: Option<u64> },
    Cancel { id: Option<u64> },
    CreateId,
    Poll,
}

/// Parses the function string; `None` when no function name is present.
pub fn parse_command(raw: &str) -> Option<HostCommand<'_>> {
    let raw = raw.trim();
    let (head, tail) = match raw.split_once('|') {
        Some((head, tail)) => (head.trim(), Some(tail.trim())),
        None => (raw, None),
    };
    if head.is_empty() {
        return None;
    }

    if head.eq_ignore_ascii_case(CANCEL_COMMAND) {
        return Some(HostCommand::Cancel {
            id: tail.and_then(|value| value.parse().ok()),
        });
    }
    if head.eq_ignore_ascii_case(POLL_COMMAND) {
        return Some(HostCommand::Poll);
    }
    if tail.is_none()
        && CREATE_ID_COMMANDS
            .iter()
            .any(|name| head.eq_ignore_ascii_case(name))
    {
        return Some(HostCommand::CreateId);
    }

    let command = match tail {
        None => HostCommand::Call { function: head },
        Some("") => HostCommand::CallAsync {
            function: head,
            id: None,
        },
        // A non-numeric key is not an async key; the call stays sync.
        Some(key) => match key.parse::<u64>() {
            Ok(id) => HostCommand::CallAsync {
                function: head,
                id: Some(id),
            },
            Err(_) => HostCommand::Call { function: head },
        },
    };
    Some(command)
}

/// Joins engine arguments into one array blob; empty without arguments.
pub fn join_args(args: &[String]) -> String {
    if args.is_empty() {
        return String::new();
    }
    format!("[{}]", args.join(","))
}

/// Longest prefix of `message` that fits a buffer of `output_size` bytes
/// together with the NUL terminator.
pub fn fit_output(message: &str, output_size: usize) -> &str {
    let limit = output_size.saturating_sub(1);
    if message.len() <= limit {
        return message;
    }
    let mut end = limit;
    while !message.is_char_boundary(end) {
        end -= 1;
    }
    &message[..end]
}

/// Runs one routed command and classifies its envelope.
pub fn dispatch(function: &str, args: String) -> (String, ReturnCode) {
    let Some(command) = parse_command(function) else {
        return (envelope::error(INVALID_METHOD), ReturnCode::InvalidMethod);
    };

    let rendered = match command {
        HostCommand::Call { function } => api::call_extension(function.to_string(), args),
        HostCommand::CallAsync { function, id: None } => {
            api::call_extension_async(function.to_string(), args)
        }
        HostCommand::CallAsync {
            function,
            id: Some(id),
        } => api::call_extension_async_with_id(id, function.to_string(), args),
        HostCommand::Cancel { id } => api::cancel_async(id.unwrap_or(0)),
        HostCommand::CreateId => api::create_async_id(),
        HostCommand::Poll => api::tick(),
    };
    let code = return_code_for(&rendered);
    (rendered, code)
}

fn return_code_for(rendered: &str) -> ReturnCode {
    let failed = [ResultCode::Error, ResultCode::AsyncCancelFailed]
        .iter()
        .any(|code| rendered.starts_with(&format!("[\"{}\"", code.as_str())));
    if failed {
        ReturnCode::Error
    } else {
        ReturnCode::Success
    }
}

fn guarded_dispatch(function: &str, args: String) -> (String, ReturnCode) {
    catch_unwind(|| dispatch(function, args)).unwrap_or_else(|_| {
        error!("event=dispatch module=ffi status=panic function_len={}", function.len());
        (envelope::error("internal error"), ReturnCode::Error)
    })
}

/// Writes the extension version.
///
/// # Safety
/// `output` must be null or point to `output_size` writable bytes.
#[no_mangle]
pub unsafe extern "C" fn RVExtensionVersion(output: *mut c_char, output_size: c_uint) {
    unsafe { write_output(output, output_size, &api::core_version()) };
}

/// Runs a function string without arguments.
///
/// # Safety
/// `output` must be null or point to `output_size` writable bytes;
/// `function` must be null or a NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn RVExtension(
    output: *mut c_char,
    output_size: c_uint,
    function: *const c_char,
) {
    let function = unsafe { read_c_str(function) };
    let (rendered, _) = guarded_dispatch(&function, String::new());
    unsafe { write_output(output, output_size, &rendered) };
}

/// Runs a function string with `argc` arguments.
///
/// # Safety
/// As `RVExtension`; additionally `argv` must be null or point to `argc`
/// pointers, each null or NUL-terminated.
#[no_mangle]
pub unsafe extern "C" fn RVExtensionArgs(
    output: *mut c_char,
    output_size: c_uint,
    function: *const c_char,
    argv: *const *const c_char,
    argc: c_uint,
) -> c_int {
    let function = unsafe { read_c_str(function) };
    let args = unsafe { read_args(argv, argc) };
    let (rendered, code) = guarded_dispatch(&function, join_args(&args));
    unsafe { write_output(output, output_size, &rendered) };
    code as c_int
}

/// Registers the engine callback; a null callback releases it.
///
/// # Safety
/// `callback` must stay callable for as long as it is registered.
#[no_mangle]
pub unsafe extern "C" fn RVExtensionRegisterCallback(callback: Option<EngineCallback>) {
    match callback {
        Some(callback) => {
            api::init_events(move |function, data| call_engine(callback, &function, &data));
        }
        None => {
            api::release_events();
        }
    }
}

fn call_engine(callback: EngineCallback, function: &str, data: &str) {
    let name = c_string(EXTENSION_NAME);
    let function = c_string(function);
    let data = c_string(data);
    unsafe {
        callback(name.as_ptr(), function.as_ptr(), data.as_ptr());
    }
}

fn c_string(value: &str) -> CString {
    CString::new(value.replace('\0', "")).unwrap_or_default()
}

unsafe fn read_c_str(ptr: *const c_char) -> String {
    if ptr.is_null() {
        return String::new();
    }
    unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned()
}

unsafe fn read_args(argv: *const *const c_char, argc: c_uint) -> Vec<String> {
    if argv.is_null() {
        return Vec::new();
    }
    let count = usize::try_from(argc).unwrap_or(0);
    (0..count)
        .map(|index| unsafe { read_c_str(*argv.add(index)) })
        .collect()
}

unsafe fn write_output(output: *mut c_char, output_size: c_uint, message: &str) {
    if output.is_null() || output_size == 0 {
        return;
    }
    let size = usize::try_from(output_size).unwrap_or(usize::MAX);
    let fitted = fit_output(message, size);
    unsafe {
        std::ptr::copy_nonoverlapping(fitted.as_ptr(), output.cast::<u8>(), fitted.len());
        *output.add(fitted.len()) = 0;
    }
}

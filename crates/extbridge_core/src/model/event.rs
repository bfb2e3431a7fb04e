//! Native event blobs and their decoded form.
//!
//! # Responsibility
//! - Define the two-string blob the native callback surface delivers.
//! - Decode blobs into typed events, and encode typed events back into blobs.
//!
//! # Invariants
//! - Decoding never panics; malformed blobs surface as `EventDecodeError`.
//! - Payloads are carried verbatim; the bridge never interprets them.
//!
//! # Wire format
//! - `ASYNC_RESPONSE|<id>|<code>`: response for `<id>`, `<code>` 0 = success.
//! - `ASYNC_FAILED|<id>`: failed response for `<id>`.
//! - any name without `|`: unsolicited event with that name.

use crate::model::call::CallId;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Function tag for async responses.
pub const ASYNC_RESPONSE: &str = "ASYNC_RESPONSE";
/// Function tag for async failures reported without a code.
pub const ASYNC_FAILED: &str = "ASYNC_FAILED";
/// Raw id used on the wire by calls that carry no correlation id.
pub const NO_CALL_ID: i64 = -1;
/// Return code reported for a failed call when the native side gave none.
pub const GENERIC_ERROR_CODE: i32 = 1;

const FIELD_SEPARATOR: char = '|';

/// Event blob as pushed by the native callback surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawEvent {
    pub function: String,
    pub data: String,
}

impl RawEvent {
    pub fn new(function: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            function: function.into(),
            data: data.into(),
        }
    }

    /// Builds a response blob for `id`.
    pub fn response(id: CallId, status: ResponseStatus, data: impl Into<String>) -> Self {
        Self::new(
            format!("{ASYNC_RESPONSE}{FIELD_SEPARATOR}{id}{FIELD_SEPARATOR}{}", status.code()),
            data,
        )
    }

    /// Builds an unsolicited event blob.
    pub fn event(name: impl Into<String>, data: impl Into<String>) -> Self {
        Self::new(name, data)
    }

    /// Decodes this blob into a typed inbound event.
    pub fn decode(&self) -> Result<InboundEvent, EventDecodeError> {
        let function = self.function.trim();
        if function.is_empty() {
            return Err(EventDecodeError::EmptyFunction);
        }

        let mut fields = function.split(FIELD_SEPARATOR);
        let tag = fields.next().unwrap_or_default();
        let raw_id = fields.next();
        let raw_code = fields.next();
        if fields.next().is_some() {
            return Err(EventDecodeError::MalformedFunction(function.to_string()));
        }

        let Some(raw_id) = raw_id else {
            return Ok(InboundEvent {
                kind: EventKind::Unsolicited(function.to_string()),
                id: None,
                payload: self.data.clone(),
            });
        };

        let status = match (tag, raw_code) {
            (ASYNC_RESPONSE, Some(code)) => ResponseStatus::from_code(parse_code(code)?),
            (ASYNC_RESPONSE, None) => ResponseStatus::Success,
            (ASYNC_FAILED, None) => ResponseStatus::Error(GENERIC_ERROR_CODE),
            _ => return Err(EventDecodeError::MalformedFunction(function.to_string())),
        };

        Ok(InboundEvent {
            kind: EventKind::Response(status),
            id: Some(parse_call_id(raw_id)?),
            payload: self.data.clone(),
        })
    }
}

fn parse_call_id(raw: &str) -> Result<CallId, EventDecodeError> {
    let value = raw
        .trim()
        .parse::<i64>()
        .map_err(|_| EventDecodeError::InvalidCallId(raw.to_string()))?;
    if value == NO_CALL_ID {
        return Err(EventDecodeError::MissingCallId);
    }
    u64::try_from(value)
        .ok()
        .and_then(CallId::new)
        .ok_or(EventDecodeError::MissingCallId)
}

fn parse_code(raw: &str) -> Result<i32, EventDecodeError> {
    raw.trim()
        .parse::<i32>()
        .map_err(|_| EventDecodeError::InvalidCode(raw.to_string()))
}

/// Outcome carried by a response event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStatus {
    Success,
    /// Native-side failure with its return code.
    Error(i32),
}

impl ResponseStatus {
    pub fn from_code(code: i32) -> Self {
        if code == 0 {
            Self::Success
        } else {
            Self::Error(code)
        }
    }

    pub fn code(self) -> i32 {
        match self {
            Self::Success => 0,
            Self::Error(code) => code,
        }
    }

    pub fn is_success(self) -> bool {
        matches!(self, Self::Success)
    }
}

/// Event category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// Response to one async call.
    Response(ResponseStatus),
    /// Event emitted by the native side on its own, named by its function.
    Unsolicited(String),
}

/// Decoded event waiting in the channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundEvent {
    pub kind: EventKind,
    /// `Some` for responses, `None` for unsolicited events.
    pub id: Option<CallId>,
    pub payload: String,
}

impl InboundEvent {
    pub fn response(id: CallId, status: ResponseStatus, payload: impl Into<String>) -> Self {
        Self {
            kind: EventKind::Response(status),
            id: Some(id),
            payload: payload.into(),
        }
    }

    pub fn unsolicited(name: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            kind: EventKind::Unsolicited(name.into()),
            id: None,
            payload: payload.into(),
        }
    }
}

/// Event as handed out by a drain, stamped with its delivery sequence.
///
/// Sequences are strictly increasing across drains of one channel and follow
/// arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtensionEvent {
    pub sequence: u64,
    pub kind: EventKind,
    pub id: Option<CallId>,
    pub payload: String,
}

impl ExtensionEvent {
    pub(crate) fn stamp(sequence: u64, event: InboundEvent) -> Self {
        Self {
            sequence,
            kind: event.kind,
            id: event.id,
            payload: event.payload,
        }
    }
}

/// Native event blob decode errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventDecodeError {
    EmptyFunction,
    MalformedFunction(String),
    InvalidCallId(String),
    InvalidCode(String),
    MissingCallId,
}

impl Display for EventDecodeError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyFunction => write!(f, "event function must not be empty"),
            Self::MalformedFunction(value) => write!(f, "event function is malformed: {value}"),
            Self::InvalidCallId(value) => write!(f, "event call id is not an integer: {value}"),
            Self::InvalidCode(value) => write!(f, "event return code is not an integer: {value}"),
            Self::MissingCallId => write!(f, "response event carries the no-id sentinel"),
        }
    }
}

impl Error for EventDecodeError {}

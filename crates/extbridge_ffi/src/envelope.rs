//! Engine-array result envelopes returned to the host.
//!
//! Every host-facing function answers with `["<CODE>",[items...]]`. Strings
//! are double-quoted with embedded quotes doubled, the escaping the engine's
//! array parser expects.

use std::fmt::Write;

/// Leading code of every envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultCode {
    Success,
    Error,
    AsyncSent,
    AsyncCancelSuccess,
    AsyncCancelFailed,
}

impl ResultCode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "SUCCESS",
            Self::Error => "ERROR",
            Self::AsyncSent => "ASYNC_SENT",
            Self::AsyncCancelSuccess => "ASYNC_CANCEL_SUCCESS",
            Self::AsyncCancelFailed => "ASYNC_CANCEL_FAILED",
        }
    }
}

/// One element of the envelope's item array.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Item {
    Text(String),
    Number(u64),
}

impl From<&str> for Item {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for Item {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<u64> for Item {
    fn from(value: u64) -> Self {
        Self::Number(value)
    }
}

impl From<usize> for Item {
    fn from(value: usize) -> Self {
        Self::Number(u64::try_from(value).unwrap_or(u64::MAX))
    }
}

/// Renders `code` and `items` as an engine array.
pub fn render(code: ResultCode, items: &[Item]) -> String {
    let mut out = String::with_capacity(16 + items.len() * 8);
    out.push('[');
    push_quoted(&mut out, code.as_str());
    out.push_str(",[");
    for (index, item) in items.iter().enumerate() {
        if index > 0 {
            out.push(',');
        }
        match item {
            Item::Text(text) => push_quoted(&mut out, text),
            Item::Number(value) => {
                let _ = write!(out, "{value}");
            }
        }
    }
    out.push_str("]]");
    out
}

pub fn success(items: &[Item]) -> String {
    render(ResultCode::Success, items)
}

pub fn error(message: impl Into<String>) -> String {
    render(ResultCode::Error, &[Item::Text(message.into())])
}

fn push_quoted(out: &mut String, value: &str) {
    out.push('"');
    for ch in value.chars() {
        if ch == '"' {
            out.push('"');
        }
        out.push(ch);
    }
    out.push('"');
}

#[cfg(test)]
mod tests {
    use super::{error, render, success, Item, ResultCode};

    #[test]
    fn renders_code_and_mixed_items() {
        assert_eq!(
            render(ResultCode::AsyncSent, &[Item::from(8_u64)]),
            r#"["ASYNC_SENT",[8]]"#
        );
        assert_eq!(
            success(&[Item::from("1.0.0"), Item::from(3_usize)]),
            r#"["SUCCESS",["1.0.0",3]]"#
        );
        assert_eq!(
            render(ResultCode::AsyncCancelFailed, &[]),
            r#"["ASYNC_CANCEL_FAILED",[]]"#
        );
    }

    #[test]
    fn doubles_embedded_quotes() {
        assert_eq!(
            error(r#"Method "x" not found."#),
            r#"["ERROR",["Method ""x"" not found."]]"#
        );
    }
}

//! Bridge data model.
//!
//! # Responsibility
//! - Define correlation ids and pending-call records.
//! - Define native event blobs and their decoded, sequenced form.
//!
//! # Invariants
//! - Every async call is identified by a non-sentinel `CallId`.
//! - Payloads stay opaque strings at this layer.

pub mod call;
pub mod event;

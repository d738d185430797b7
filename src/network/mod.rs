//! Connection-level networking: per-connection state, receive buffering,
//! frame boundary detection, and the outbound envelope queue.
//!
//! # Architecture
//!
//! Everything here is pure connection-scoped logic driven by the reactor in
//! `service::server`, which owns the readiness multiplexer and is the only
//! place real I/O calls happen:
//! - `Frame` finds frame boundaries in buffered bytes (type/flags byte plus
//!   a base-128 remaining-length) and never touches a socket
//! - `OutboundQueue` tracks pending envelopes and resumes partial writes
//! - `Connection` aggregates one socket's handshake state, buffers and
//!   identity
//! - `ConnectionRegistry` indexes live connections by readiness token

pub use connection::{Connection, ConnectionState, ReadState};
pub use frame::{
    decode_remaining_length, encode_frame, encode_remaining_length, Frame, MAX_REMAINING_LENGTH,
};
pub use outbound::{Envelope, OutboundQueue, SendState};
pub use registry::{ConnectionId, ConnectionRegistry};

mod connection;
mod frame;
mod outbound;
mod registry;

#[cfg(test)]
pub(crate) use connection::test_support;

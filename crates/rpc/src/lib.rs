//! Async msgpack-RPC session multiplexer.
//!
//! One bidirectional byte stream carries interleaved requests, notifications and responses. A
//! [`Session`] lets any number of concurrent callers share it:
//! * [`Session::request`]: send a call and wait for the response correlated by id
//! * [`Session::notify`]: send a fire-once notification and wait for it to be flushed
//! * [`Session::next_message`]: pull the next inbound request or notification
//! * [`Session::serve`]: dispatch loop spawning a handler task per inbound message
//!
//! Only one caller at a time reads the stream. Whoever needs bytes and finds the read lease free
//! becomes the runner of the receive loop and wakes every other waiter whose condition it
//! satisfies; when the runner is done it hands the lease to the next waiter. Handlers may
//! therefore issue nested requests over the same session without deadlocking the dispatch loop.
//!
//! Wire encoding is pluggable through [`Codec`]; [`MsgpackCodec`] implements the standard
//! msgpack-RPC framing.

#![warn(missing_docs)]

pub mod codec;
pub mod config;
pub mod error;
pub mod inbox;
mod lease;
mod mainloop;
mod pending;
pub mod protocol;
mod serve;
pub mod session;

pub use codec::MsgpackCodec;
pub use config::SessionConfig;
pub use error::{Error, Result};
pub use inbox::InboundMessage;
pub use protocol::{CallId, Codec, CounterIdGen, Decoded, Frame};
/// Re-export of the [`rmpv`] dependency of this crate.
pub use rmpv;
pub use rmpv::Value;
pub use session::Session;

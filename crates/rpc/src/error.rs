//! Error types for msgpack-RPC sessions.

use std::io;

use rmpv::Value;

/// A convenient type alias for `Result` with `E` = [`enum@crate::Error`].
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Possible errors.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
	/// The peer answered a request with an error payload.
	#[error("remote error: {error}")]
	Remote {
		/// The decoded error value, exactly as the peer sent it.
		error: Value,
	},
	/// The stream ended while a call, notification or inbox read was outstanding.
	#[error("connection closed")]
	ConnectionClosed,
	/// The peer or the local application broke the msgpack-RPC contract.
	///
	/// Raised for responses that correlate to no outstanding call, duplicate replies, and
	/// frames that decode as msgpack but are not msgpack-RPC tuples.
	#[error("protocol violation: {0}")]
	Protocol(String),
	/// Local misuse of the session API.
	#[error("usage error: {0}")]
	Usage(&'static str),
	/// Input/output errors from the underlying stream.
	#[error("{0}")]
	Io(#[from] io::Error),
	/// A value could not be encoded.
	#[error("encode failed: {0}")]
	Encode(#[from] rmp_serde::encode::Error),
	/// Incoming bytes are not valid msgpack.
	#[error("decode failed: {0}")]
	Decode(#[from] rmp_serde::decode::Error),
}

impl Error {
	/// Returns the peer's error payload if this is a [`Error::Remote`].
	pub fn remote_error(&self) -> Option<&Value> {
		match self {
			Self::Remote { error } => Some(error),
			_ => None,
		}
	}

	/// Splits a `[code, message]` remote error payload, the shape Neovim and most msgpack-RPC
	/// servers use.
	pub fn remote_code_message(&self) -> Option<(i64, &str)> {
		let [code, message] = self.remote_error()?.as_array()?.as_slice() else {
			return None;
		};
		Some((code.as_i64()?, message.as_str()?))
	}
}

//! Codec abstraction between the session and a concrete wire encoding.

use rmpv::Value;

use crate::Result;

/// Identifier correlating a request with its response.
///
/// msgpack-RPC message ids are 32-bit unsigned integers.
pub type CallId = u32;

/// Simple counter-based ID generator.
///
/// Ids wrap around at [`u32::MAX`]; the session skips ids that are still outstanding.
#[derive(Debug, Default, Clone, Copy)]
pub struct CounterIdGen(pub CallId);

impl CounterIdGen {
	/// Creates a new counter starting at 0.
	#[must_use]
	pub const fn new() -> Self {
		Self(0)
	}

	/// Generates the next ID and increments the counter.
	#[allow(clippy::should_implement_trait, reason = "convention")]
	pub fn next(&mut self) -> CallId {
		let id = self.0;
		self.0 = self.0.wrapping_add(1);
		id
	}
}

/// One decoded msgpack-RPC message.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
	/// A call expecting exactly one response carrying the same id.
	Request {
		/// Correlation id chosen by the caller.
		id: CallId,
		/// Method name.
		method: String,
		/// Positional arguments.
		args: Vec<Value>,
	},
	/// A one-way message; it has no id and cannot be answered.
	Notification {
		/// Method name.
		method: String,
		/// Positional arguments.
		args: Vec<Value>,
	},
	/// The answer to an earlier request.
	Response {
		/// Id of the request being answered.
		id: CallId,
		/// `Ok(result)` or `Err(error)`; the two payloads are mutually exclusive.
		outcome: std::result::Result<Value, Value>,
	},
}

/// Outcome of one [`Codec::decode`] call.
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
	/// Only a prefix of a frame is available. Decoding cannot progress before the input holds at
	/// least `needed` bytes in total.
	Incomplete {
		/// Lower bound on the input length, always larger than the length just offered.
		needed: usize,
	},
	/// A message occupying the first `consumed` bytes.
	Frame {
		/// Length of the frame in bytes.
		consumed: usize,
		/// The decoded message.
		frame: Frame,
	},
	/// A well-delimited frame that is not a valid message. The caller skips its bytes.
	Malformed {
		/// Length of the rejected frame in bytes.
		consumed: usize,
		/// Why the frame was rejected.
		reason: String,
	},
}

/// Binding between the session and a concrete message encoding.
///
/// A codec is owned by exactly one session and is only ever called with the session's internal
/// locks held, so implementations may keep state without synchronisation of their own.
pub trait Codec: Send + 'static {
	/// Encodes a request frame.
	fn encode_request(&mut self, id: CallId, method: &str, args: &[Value]) -> Result<Vec<u8>>;

	/// Encodes a notification frame.
	fn encode_notification(&mut self, method: &str, args: &[Value]) -> Result<Vec<u8>>;

	/// Encodes a response frame; `Err` carries an error payload instead of a result.
	fn encode_response(&mut self, id: CallId, outcome: std::result::Result<&Value, &Value>) -> Result<Vec<u8>>;

	/// Decodes at most one frame from the front of `chunk`.
	///
	/// After [`Decoded::Incomplete`] the caller offers the same bytes again with more appended,
	/// so a codec may remember how far it already scanned, but must not keep the bytes
	/// themselves. The caller does not call again before `needed` bytes are available.
	///
	/// # Errors
	///
	/// An error means the stream cannot be resynchronised; the session treats it as fatal.
	fn decode(&mut self, chunk: &[u8]) -> Result<Decoded>;
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn counter_is_sequential_and_wraps() {
		let mut ids = CounterIdGen::new();
		assert_eq!(ids.next(), 0);
		assert_eq!(ids.next(), 1);

		let mut ids = CounterIdGen(u32::MAX);
		assert_eq!(ids.next(), u32::MAX);
		assert_eq!(ids.next(), 0);
	}
}

//! Standard msgpack-RPC framing.
//!
//! Each message is one msgpack array:
//! * request: `[0, msgid, method, params]`
//! * response: `[1, msgid, error, result]`
//! * notification: `[2, method, params]`

use rmpv::Value;
use serde::Deserialize;

use crate::Result;
use crate::protocol::{CallId, Codec, Decoded, Frame};

mod scan;

use scan::{FrameScan, Scan};

const REQUEST: u64 = 0;
const RESPONSE: u64 = 1;
const NOTIFICATION: u64 = 2;

/// msgpack-RPC codec backed by [`rmp_serde`].
///
/// Incoming frames are delimited incrementally and decoded once, after their last byte has
/// arrived.
#[derive(Debug, Default)]
pub struct MsgpackCodec {
	scan: FrameScan,
}

impl MsgpackCodec {
	/// Creates a new codec instance.
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}
}

impl Codec for MsgpackCodec {
	fn encode_request(&mut self, id: CallId, method: &str, args: &[Value]) -> Result<Vec<u8>> {
		Ok(rmp_serde::to_vec(&(REQUEST, id, method, args))?)
	}

	fn encode_notification(&mut self, method: &str, args: &[Value]) -> Result<Vec<u8>> {
		Ok(rmp_serde::to_vec(&(NOTIFICATION, method, args))?)
	}

	fn encode_response(&mut self, id: CallId, outcome: std::result::Result<&Value, &Value>) -> Result<Vec<u8>> {
		let (error, result) = match outcome {
			Ok(result) => (&Value::Nil, result),
			Err(error) => (error, &Value::Nil),
		};
		Ok(rmp_serde::to_vec(&(RESPONSE, id, error, result))?)
	}

	fn decode(&mut self, chunk: &[u8]) -> Result<Decoded> {
		let consumed = match self.scan.advance(chunk)? {
			Scan::Incomplete(needed) => return Ok(Decoded::Incomplete { needed }),
			Scan::Complete(len) => len,
		};
		let decoded = Value::deserialize(&mut rmp_serde::Deserializer::new(&chunk[..consumed]))
			.map_err(|err| err.to_string())
			.and_then(frame_from_value);
		Ok(match decoded {
			Ok(frame) => Decoded::Frame { consumed, frame },
			Err(reason) => Decoded::Malformed { consumed, reason },
		})
	}
}

fn frame_from_value(value: Value) -> Result<Frame, String> {
	let Value::Array(items) = value else {
		return Err("message is not an array".into());
	};
	let mut items = items.into_iter();
	let kind = items
		.next()
		.and_then(|kind| kind.as_u64())
		.ok_or("missing message type")?;
	let rest: Vec<Value> = items.collect();

	match kind {
		REQUEST => {
			let [id, method, args] = fields(rest, "request")?;
			Ok(Frame::Request {
				id: call_id(&id)?,
				method: method_name(method)?,
				args: arguments(args)?,
			})
		}
		RESPONSE => {
			let [id, error, result] = fields(rest, "response")?;
			Ok(Frame::Response {
				id: call_id(&id)?,
				outcome: if error.is_nil() { Ok(result) } else { Err(error) },
			})
		}
		NOTIFICATION => {
			let [method, args] = fields(rest, "notification")?;
			Ok(Frame::Notification {
				method: method_name(method)?,
				args: arguments(args)?,
			})
		}
		other => Err(format!("unknown message type {other}")),
	}
}

fn fields<const N: usize>(rest: Vec<Value>, kind: &str) -> Result<[Value; N], String> {
	rest.try_into()
		.map_err(|rest: Vec<Value>| format!("{kind} has {} fields, expected {}", rest.len() + 1, N + 1))
}

fn call_id(value: &Value) -> Result<CallId, String> {
	value
		.as_u64()
		.and_then(|id| CallId::try_from(id).ok())
		.ok_or_else(|| "message id is not a 32-bit unsigned integer".into())
}

fn method_name(value: Value) -> Result<String, String> {
	match value {
		Value::String(name) => name.into_str().ok_or_else(|| "method name is not valid UTF-8".into()),
		Value::Binary(name) => String::from_utf8(name).map_err(|_| "method name is not valid UTF-8".into()),
		_ => Err("method name is not a string".into()),
	}
}

fn arguments(value: Value) -> Result<Vec<Value>, String> {
	match value {
		Value::Array(args) => Ok(args),
		_ => Err("params is not an array".into()),
	}
}

#[cfg(test)]
mod tests;

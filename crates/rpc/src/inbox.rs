//! Inbound requests and notifications waiting for the application.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Weak;
use std::sync::atomic::{AtomicBool, Ordering};

use rmpv::Value;

use crate::mainloop::{EofPolicy, Shared};
use crate::protocol::CallId;
use crate::{Error, Result};

/// A request or notification received from the peer.
///
/// Requests carry the capability to send exactly one response back over the session they
/// arrived on. Notifications cannot be answered.
pub struct InboundMessage {
	method: String,
	args: Vec<Value>,
	id: Option<CallId>,
	replied: AtomicBool,
	/// The session this message arrived on. Weak so queued messages do not keep it alive.
	sink: Weak<Shared>,
}

impl InboundMessage {
	pub(crate) fn new(method: String, args: Vec<Value>, id: Option<CallId>, sink: Weak<Shared>) -> Self {
		Self {
			method,
			args,
			id,
			replied: AtomicBool::new(false),
			sink,
		}
	}

	/// Method name.
	pub fn method(&self) -> &str {
		&self.method
	}

	/// Positional arguments.
	pub fn args(&self) -> &[Value] {
		&self.args
	}

	/// Takes the arguments out of the message, leaving an empty list.
	pub fn take_args(&mut self) -> Vec<Value> {
		std::mem::take(&mut self.args)
	}

	/// Call id of a request; `None` for notifications.
	pub fn id(&self) -> Option<CallId> {
		self.id
	}

	/// Returns true if this message has no id and cannot be replied to.
	pub fn is_notification(&self) -> bool {
		self.id.is_none()
	}

	/// Returns true if the peer expects a response.
	pub fn is_request(&self) -> bool {
		self.id.is_some()
	}

	/// Returns true once a reply has been attempted.
	pub fn has_replied(&self) -> bool {
		self.replied.load(Ordering::Acquire)
	}

	/// Replies with a successful result.
	///
	/// # Errors
	///
	/// - `Error::Usage` when the message is a notification or the session was closed.
	/// - `Error::Protocol` when a reply was already sent.
	/// - `Error::ConnectionClosed` when the session no longer exists.
	pub async fn reply(&self, result: Value) -> Result<()> {
		self.respond(Ok(result)).await
	}

	/// Replies with an error payload.
	#[allow(clippy::missing_errors_doc, reason = "errors documented in Self::reply")]
	pub async fn reply_error(&self, error: Value) -> Result<()> {
		self.respond(Err(error)).await
	}

	/// Replies with `value` as either the result or, when `is_error` is set, the error payload.
	#[allow(clippy::missing_errors_doc, reason = "errors documented in Self::reply")]
	pub async fn reply_with(&self, value: Value, is_error: bool) -> Result<()> {
		self.respond(if is_error { Err(value) } else { Ok(value) }).await
	}

	async fn respond(&self, outcome: std::result::Result<Value, Value>) -> Result<()> {
		let Some(id) = self.id else {
			return Err(Error::Usage("cannot reply to a notification"));
		};
		if self.replied.swap(true, Ordering::AcqRel) {
			return Err(Error::Protocol(format!("call {id} ({}) already replied", self.method)));
		}
		let shared = self.sink.upgrade().ok_or(Error::ConnectionClosed)?;
		if shared.is_closed() {
			return Err(Error::Usage("session is closed"));
		}

		let bytes = shared.codec.lock().encode_response(id, outcome.as_ref())?;
		tracing::debug!(id, method = %self.method, error = outcome.is_err(), "rpc.reply");
		shared.send(&bytes, EofPolicy::Finish).await
	}
}

impl fmt::Debug for InboundMessage {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("InboundMessage")
			.field("method", &self.method)
			.field("args", &self.args)
			.field("id", &self.id)
			.field("replied", &self.has_replied())
			.finish_non_exhaustive()
	}
}

impl fmt::Display for InboundMessage {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let kind = if self.is_notification() { "notification" } else { "request" };
		write!(f, "{kind}, ({}: [", self.method)?;
		for (i, arg) in self.args.iter().enumerate() {
			if i > 0 {
				f.write_str(", ")?;
			}
			write!(f, "{arg}")?;
		}
		f.write_str("])")
	}
}

/// FIFO of messages not yet handed to the application.
#[derive(Debug, Default)]
pub(crate) struct Inbox {
	queue: VecDeque<InboundMessage>,
}

impl Inbox {
	pub(crate) fn push(&mut self, msg: InboundMessage) {
		self.queue.push_back(msg);
	}

	pub(crate) fn pop(&mut self) -> Option<InboundMessage> {
		self.queue.pop_front()
	}

	pub(crate) fn is_empty(&self) -> bool {
		self.queue.is_empty()
	}

	pub(crate) fn len(&self) -> usize {
		self.queue.len()
	}
}

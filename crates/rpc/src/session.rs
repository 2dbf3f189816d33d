//! Public session handle.

use std::fmt;
use std::sync::Arc;

use rmpv::Value;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::codec::MsgpackCodec;
use crate::config::SessionConfig;
use crate::inbox::InboundMessage;
use crate::lease::Interest;
use crate::mainloop::{EofPolicy, Shared};
use crate::protocol::{CallId, Codec};
use crate::{Error, Result};

/// A msgpack-RPC session over one bidirectional byte stream.
///
/// Cloning is cheap; all clones share the same stream, pending calls and inbox, and may be used
/// from any number of tasks at once. The session never spawns tasks itself: progress is made by
/// whichever caller is currently awaiting it.
#[derive(Clone)]
pub struct Session {
	shared: Arc<Shared>,
}

impl Session {
	/// Creates a session speaking standard msgpack-RPC over `reader` and `writer`.
	pub fn new(reader: impl AsyncRead + Send + Unpin + 'static, writer: impl AsyncWrite + Send + Unpin + 'static) -> Self {
		Self::with_config(reader, writer, MsgpackCodec::new(), SessionConfig::default())
	}

	/// Creates a session over a single duplex stream such as a socket.
	pub fn from_stream(stream: impl AsyncRead + AsyncWrite + Send + 'static) -> Self {
		let (reader, writer) = tokio::io::split(stream);
		Self::new(reader, writer)
	}

	/// Creates a session using a custom codec.
	pub fn with_codec(
		reader: impl AsyncRead + Send + Unpin + 'static,
		writer: impl AsyncWrite + Send + Unpin + 'static,
		codec: impl Codec,
	) -> Self {
		Self::with_config(reader, writer, codec, SessionConfig::default())
	}

	/// Creates a session with a custom codec and configuration.
	pub fn with_config(
		reader: impl AsyncRead + Send + Unpin + 'static,
		writer: impl AsyncWrite + Send + Unpin + 'static,
		codec: impl Codec,
		config: SessionConfig,
	) -> Self {
		Self {
			shared: Arc::new(Shared::new(Box::new(reader), Box::new(writer), Box::new(codec), config)),
		}
	}

	/// Calls `method` on the peer and waits for its response.
	///
	/// # Errors
	///
	/// - `Error::Remote` when the peer answers with an error payload.
	/// - `Error::ConnectionClosed` when the stream ends before the response arrives.
	/// - `Error::Protocol` when this caller was running the receive loop and the peer broke
	///   the protocol.
	/// - `Error::Usage` after [`Session::close`].
	/// - `Error::Io`/`Error::Encode`/`Error::Decode` for transport and codec failures. Read-side
	///   failures end the stream for every other caller too.
	pub async fn request(&self, method: &str, args: Vec<Value>) -> Result<Value> {
		let shared = &self.shared;
		shared.ensure_usable()?;

		let id = shared.state.lock().allocate_call();
		let call = OutstandingCall { shared, id };
		let bytes = shared.codec.lock().encode_request(id, method, &args)?;
		tracing::debug!(id, method, "rpc.request");

		shared.send(&bytes, EofPolicy::Fail).await?;
		shared.drive(Interest::Response(id)).await?;

		let outcome = shared.state.lock().pending.take(call.id);
		match outcome {
			Some(Ok(result)) => Ok(result),
			Some(Err(error)) => Err(Error::Remote { error }),
			None => Err(Error::ConnectionClosed),
		}
	}

	/// Sends a notification and waits until it has been flushed to the stream.
	///
	/// # Errors
	///
	/// - `Error::ConnectionClosed` when the stream ends before the flush completes.
	/// - `Error::Usage` after [`Session::close`].
	/// - `Error::Io`/`Error::Encode` for transport and codec failures.
	pub async fn notify(&self, method: &str, args: Vec<Value>) -> Result<()> {
		let shared = &self.shared;
		shared.ensure_usable()?;

		let bytes = shared.codec.lock().encode_notification(method, &args)?;
		tracing::debug!(method, "rpc.notify");
		shared.send(&bytes, EofPolicy::Fail).await
	}

	/// Waits for the next inbound request or notification.
	///
	/// Returns `Ok(None)` once the stream has ended (or the session was closed) and every
	/// message received before that has been handed out. Safe to call in a loop as the
	/// application's dispatch driver.
	///
	/// # Errors
	///
	/// - `Error::Protocol` when this caller was running the receive loop and the peer broke
	///   the protocol.
	/// - `Error::Io`/`Error::Decode` for transport and codec failures.
	pub async fn next_message(&self) -> Result<Option<InboundMessage>> {
		loop {
			self.shared.drive(Interest::Message).await?;
			let mut state = self.shared.state.lock();
			if let Some(msg) = state.inbox.pop() {
				return Ok(Some(msg));
			}
			if state.at_eof {
				return Ok(None);
			}
			// Another consumer took the message that woke us.
		}
	}

	/// Closes the session.
	///
	/// The write half is shut down and dropped; a caller blocked reading stops at once. Calls
	/// still waiting observe end-of-stream and fail with [`Error::ConnectionClosed`]. New
	/// requests, notifications and replies fail with [`Error::Usage`]. Closing twice is a no-op.
	///
	/// # Errors
	///
	/// `Error::Io` if shutting down the write half fails.
	pub async fn close(&self) -> Result<()> {
		if self.shared.close().await? {
			tracing::debug!("rpc.close");
		}
		Ok(())
	}

	/// Returns true after [`Session::close`].
	pub fn is_closed(&self) -> bool {
		self.shared.is_closed()
	}

	/// Returns true once end-of-stream has been observed or the session was closed.
	pub fn at_eof(&self) -> bool {
		self.shared.state.lock().at_eof
	}

	/// Number of outgoing calls still waiting for a response.
	pub fn pending_calls(&self) -> usize {
		self.shared.state.lock().pending.waiting()
	}

	/// Number of inbound messages received but not yet taken by [`Session::next_message`].
	pub fn queued_messages(&self) -> usize {
		self.shared.state.lock().inbox.len()
	}
}

impl fmt::Debug for Session {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Session")
			.field("config", &self.shared.config)
			.field("closed", &self.is_closed())
			.field("pending_calls", &self.pending_calls())
			.field("queued_messages", &self.queued_messages())
			.finish_non_exhaustive()
	}
}

/// Releases the call's pending entry if the caller stops waiting early.
struct OutstandingCall<'a> {
	shared: &'a Arc<Shared>,
	id: CallId,
}

impl Drop for OutstandingCall<'_> {
	fn drop(&mut self) {
		let mut state = self.shared.state.lock();
		state.pending.abandon(self.id);
		if state.at_eof {
			state.pending.clear_abandoned();
		}
	}
}

//! Receive loop multiplexing one byte stream between every waiting caller.
//!
//! The loop has no task of its own. A caller that needs bytes either takes the read lease and
//! runs receive steps until its own interest is met, or parks until the current runner wakes
//! it. Each receive step decodes at most one frame: responses resolve pending calls, requests
//! and notifications are queued in the inbox.

use std::io;
use std::sync::Arc;

use bytes::{Buf, BufMut, BytesMut};
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace, warn};

use crate::config::SessionConfig;
use crate::inbox::{InboundMessage, Inbox};
use crate::lease::{Interest, Lease, Waiters};
use crate::pending::PendingCalls;
use crate::protocol::{CallId, Codec, CounterIdGen, Decoded, Frame};
use crate::{Error, Result};

pub(crate) type BoxReader = Box<dyn AsyncRead + Send + Unpin>;
pub(crate) type BoxWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Read half of the stream plus bytes read but not yet decoded.
pub(crate) struct ReadCursor {
	reader: BoxReader,
	held: BytesMut,
	/// Length `held` must reach before the codec is asked again.
	want: usize,
}

/// Result of one receive step.
enum Step {
	Frame(Frame),
	Malformed(String),
	Partial,
	Eof,
}

impl ReadCursor {
	pub(crate) fn new(reader: BoxReader) -> Self {
		Self {
			reader,
			held: BytesMut::new(),
			want: 1,
		}
	}

	/// Decodes from held bytes when they may contain a frame, otherwise reads once first.
	///
	/// Errors are fatal for the stream: the bytes that caused them cannot be skipped.
	async fn receive(&mut self, codec: &Mutex<Box<dyn Codec>>, config: &SessionConfig, shutdown: &CancellationToken) -> Result<Step> {
		if self.held.len() < self.want {
			let read = self.fill(config.read_chunk_size.max(1), shutdown).await?;
			if read == 0 {
				if !self.held.is_empty() {
					debug!(bytes = self.held.len(), "rpc.eof.truncated_frame");
					self.held.clear();
				}
				return Ok(Step::Eof);
			}
			trace!(bytes = read, held = self.held.len(), "rpc.read");
			if self.held.len() < self.want {
				return Ok(Step::Partial);
			}
		}

		let decoded = codec.lock().decode(&self.held)?;
		match decoded {
			Decoded::Frame { consumed, frame } => {
				self.consume(consumed)?;
				Ok(Step::Frame(frame))
			}
			Decoded::Malformed { consumed, reason } => {
				self.consume(consumed)?;
				Ok(Step::Malformed(reason))
			}
			Decoded::Incomplete { needed } if needed.max(self.held.len()) > config.max_frame_size => {
				Err(Error::Protocol(format!(
					"frame needs {} bytes, limit is {}",
					needed.max(self.held.len()),
					config.max_frame_size
				)))
			}
			Decoded::Incomplete { needed } => {
				self.want = needed.max(self.held.len() + 1);
				Ok(Step::Partial)
			}
		}
	}

	fn consume(&mut self, consumed: usize) -> Result<()> {
		if consumed == 0 || consumed > self.held.len() {
			return Err(Error::Protocol(format!(
				"codec consumed {consumed} of {} buffered bytes",
				self.held.len()
			)));
		}
		self.held.advance(consumed);
		self.want = 1;
		Ok(())
	}

	/// One physical read of at most `chunk` bytes. Returns 0 at end-of-stream or shutdown.
	async fn fill(&mut self, chunk: usize, shutdown: &CancellationToken) -> io::Result<usize> {
		self.held.reserve(chunk);
		let mut limited = (&mut self.held).limit(chunk);
		tokio::select! {
			biased;
			() = shutdown.cancelled() => Ok(0),
			read = self.reader.read_buf(&mut limited) => read,
		}
	}
}

/// Bookkeeping touched by the runner and by callers, always under one short-lived lock.
pub(crate) struct State {
	pub(crate) pending: PendingCalls,
	pub(crate) inbox: Inbox,
	pub(crate) waiters: Waiters,
	ids: CounterIdGen,
	pub(crate) at_eof: bool,
}

impl State {
	fn new() -> Self {
		Self {
			pending: PendingCalls::default(),
			inbox: Inbox::default(),
			waiters: Waiters::default(),
			ids: CounterIdGen::new(),
			at_eof: false,
		}
	}

	/// Reserves a fresh call id not used by any outstanding call.
	pub(crate) fn allocate_call(&mut self) -> CallId {
		loop {
			let id = self.ids.next();
			if self.pending.insert(id) {
				return id;
			}
		}
	}
}

/// What to do after a completed write when the stream ended first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EofPolicy {
	/// Report [`Error::ConnectionClosed`].
	Fail,
	/// Report success once the bytes are flushed.
	Finish,
}

/// Everything a session owns, shared by its clones and by the messages it received.
pub(crate) struct Shared {
	pub(crate) config: SessionConfig,
	pub(crate) codec: Mutex<Box<dyn Codec>>,
	writer: tokio::sync::Mutex<Option<BoxWriter>>,
	/// The read lease: whoever holds this guard is the runner.
	cursor: tokio::sync::Mutex<ReadCursor>,
	pub(crate) state: Mutex<State>,
	shutdown: CancellationToken,
}

enum Turn<'a> {
	Done,
	Run(Lease<'a>),
	Wait(oneshot::Receiver<()>),
}

impl Shared {
	pub(crate) fn new(reader: BoxReader, writer: BoxWriter, codec: Box<dyn Codec>, config: SessionConfig) -> Self {
		Self {
			config,
			codec: Mutex::new(codec),
			writer: tokio::sync::Mutex::new(Some(writer)),
			cursor: tokio::sync::Mutex::new(ReadCursor::new(reader)),
			state: Mutex::new(State::new()),
			shutdown: CancellationToken::new(),
		}
	}

	pub(crate) fn is_closed(&self) -> bool {
		self.shutdown.is_cancelled()
	}

	/// Fails fast for operations that can no longer succeed.
	pub(crate) fn ensure_usable(&self) -> Result<()> {
		if self.is_closed() {
			return Err(Error::Usage("session is closed"));
		}
		if self.state.lock().at_eof {
			return Err(Error::ConnectionClosed);
		}
		Ok(())
	}

	/// Runs or awaits the receive loop until `interest` is met or the stream ends.
	///
	/// Returns `Ok` in both cases; callers inspect the state to tell them apart.
	pub(crate) async fn drive(self: &Arc<Self>, interest: Interest) -> Result<()> {
		loop {
			let turn = {
				let mut state = self.state.lock();
				if state.at_eof || interest.is_met(&state.pending, &state.inbox) {
					Turn::Done
				} else if let Ok(cursor) = self.cursor.try_lock() {
					Turn::Run(Lease::new(cursor, &self.state))
				} else {
					Turn::Wait(state.waiters.register(interest))
				}
			};

			match turn {
				Turn::Done => return Ok(()),
				Turn::Run(lease) => return self.run(lease, interest).await,
				// A dropped sender only means the registry was reset; re-check either way.
				Turn::Wait(woken) => {
					let _ = woken.await;
				}
			}
		}
	}

	async fn run(self: &Arc<Self>, mut lease: Lease<'_>, interest: Interest) -> Result<()> {
		loop {
			let step = match lease.cursor.receive(&self.codec, &self.config, &self.shutdown).await {
				Ok(step) => step,
				Err(err) => {
					self.fail(&err);
					return Err(err);
				}
			};
			if self.absorb(step, interest)? {
				return Ok(());
			}
		}
	}

	/// Ends the stream after a read-side fault. Every waiter then observes end-of-stream.
	fn fail(&self, err: &Error) {
		let mut state = self.state.lock();
		state.at_eof = true;
		state.pending.clear_abandoned();
		error!(
			error = %err,
			pending = state.pending.waiting(),
			queued = state.inbox.len(),
			"rpc.stream.failed"
		);
		state.waiters.wake_all();
	}

	/// Applies one receive step. Returns true when the runner may stop.
	fn absorb(self: &Arc<Self>, step: Step, interest: Interest) -> Result<bool> {
		let mut guard = self.state.lock();
		let state = &mut *guard;
		match step {
			Step::Eof => {
				state.at_eof = true;
				state.pending.clear_abandoned();
				debug!(
					pending = state.pending.waiting(),
					queued = state.inbox.len(),
					"rpc.eof"
				);
				state.waiters.wake_all();
				return Ok(true);
			}
			Step::Partial => {}
			Step::Malformed(reason) => {
				error!(reason = %reason, "rpc.protocol_violation");
				return Err(Error::Protocol(format!("malformed msgpack-rpc frame: {reason}")));
			}
			Step::Frame(frame) => self.dispatch(state, frame)?,
		}
		state.waiters.wake_met(&state.pending, &state.inbox);
		Ok(interest.is_met(&state.pending, &state.inbox))
	}

	fn dispatch(self: &Arc<Self>, state: &mut State, frame: Frame) -> Result<()> {
		match frame {
			Frame::Response { id, outcome } => {
				trace!(id, error = outcome.is_err(), "rpc.response");
				state.pending.resolve(id, outcome).inspect_err(|err| {
					error!(id, error = %err, "rpc.protocol_violation");
				})
			}
			Frame::Request { id, method, args } => {
				trace!(id, method = %method, "rpc.inbound.request");
				state.inbox.push(InboundMessage::new(method, args, Some(id), Arc::downgrade(self)));
				Ok(())
			}
			Frame::Notification { method, args } => {
				trace!(method = %method, "rpc.inbound.notification");
				state.inbox.push(InboundMessage::new(method, args, None, Arc::downgrade(self)));
				Ok(())
			}
		}
	}

	/// Writes and flushes one encoded frame while keeping the receive loop available.
	///
	/// Flushing can stall until the peer drains its side, and the peer may itself be blocked
	/// writing to us, so the loop is driven until the flush completes.
	pub(crate) async fn send(self: &Arc<Self>, bytes: &[u8], on_eof: EofPolicy) -> Result<()> {
		let write = self.write_frame(bytes);
		tokio::pin!(write);

		loop {
			let driven = tokio::select! {
				biased;
				written = &mut write => return written,
				driven = self.drive(Interest::EndOfStream) => driven,
			};
			match driven {
				Ok(()) => break,
				// The offending frame was consumed; keep reading while the write is pending.
				Err(err) => warn!(error = %err, "rpc.send.read_failed"),
			}
		}

		// The stream ended mid-write; a partial frame would corrupt the output, so the write
		// always runs to completion.
		write.await?;
		match on_eof {
			EofPolicy::Fail => Err(Error::ConnectionClosed),
			EofPolicy::Finish => Ok(()),
		}
	}

	async fn write_frame(&self, bytes: &[u8]) -> Result<()> {
		let mut writer = self.writer.lock().await;
		let writer = writer.as_mut().ok_or(Error::Usage("session is closed"))?;
		writer.write_all(bytes).await.map_err(disconnect)?;
		writer.flush().await.map_err(disconnect)?;
		Ok(())
	}

	/// Marks the session closed, stops any in-flight read, and shuts the write half down.
	///
	/// Returns false if the session was already closed.
	pub(crate) async fn close(&self) -> Result<bool> {
		{
			let mut state = self.state.lock();
			if self.shutdown.is_cancelled() {
				return Ok(false);
			}
			self.shutdown.cancel();
			state.at_eof = true;
			state.waiters.wake_all();
		}
		let writer = self.writer.lock().await.take();
		if let Some(mut writer) = writer {
			writer.shutdown().await.map_err(disconnect)?;
		}
		Ok(true)
	}
}

/// Maps a peer hang-up on write to [`Error::ConnectionClosed`].
fn disconnect(err: io::Error) -> Error {
	match err.kind() {
		io::ErrorKind::BrokenPipe | io::ErrorKind::ConnectionReset | io::ErrorKind::ConnectionAborted => Error::ConnectionClosed,
		_ => Error::Io(err),
	}
}

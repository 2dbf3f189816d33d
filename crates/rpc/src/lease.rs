//! Cooperative read lease and waiter registry.
//!
//! Exactly one caller at a time holds the [`Lease`] and runs the receive loop. Every other
//! caller that needs bytes registers its [`Interest`] and sleeps. The runner wakes waiters
//! whose interest a frame satisfied, wakes everybody on end-of-stream, and wakes everybody
//! again when it gives the lease up so that a waiter still unsatisfied can take over reading.

use parking_lot::Mutex;
use tokio::sync::{MutexGuard, oneshot};

use crate::inbox::Inbox;
use crate::mainloop::{ReadCursor, State};
use crate::pending::PendingCalls;
use crate::protocol::CallId;

/// What a suspended caller is waiting for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Interest {
	/// The response to an outgoing call.
	Response(CallId),
	/// Any request or notification in the inbox.
	Message,
	/// Nothing but end-of-stream; used to keep reading while a write is flushed.
	EndOfStream,
}

impl Interest {
	pub(crate) fn is_met(self, pending: &PendingCalls, inbox: &Inbox) -> bool {
		match self {
			Self::Response(id) => !pending.is_waiting(id),
			Self::Message => !inbox.is_empty(),
			Self::EndOfStream => false,
		}
	}
}

struct Waiter {
	interest: Interest,
	wake: oneshot::Sender<()>,
}

/// Callers parked until the runner makes progress on their behalf.
#[derive(Default)]
pub(crate) struct Waiters {
	parked: Vec<Waiter>,
}

impl Waiters {
	/// Parks a caller. The receiver fires when the caller should re-check its interest.
	pub(crate) fn register(&mut self, interest: Interest) -> oneshot::Receiver<()> {
		let (wake, woken) = oneshot::channel();
		self.parked.push(Waiter { interest, wake });
		woken
	}

	/// Wakes every waiter whose interest is now met. Waiters that gave up are dropped.
	pub(crate) fn wake_met(&mut self, pending: &PendingCalls, inbox: &Inbox) {
		let (woken, parked): (Vec<_>, Vec<_>) = std::mem::take(&mut self.parked)
			.into_iter()
			.partition(|w| w.wake.is_closed() || w.interest.is_met(pending, inbox));
		self.parked = parked;
		for waiter in woken {
			let _ = waiter.wake.send(());
		}
	}

	/// Wakes every waiter.
	pub(crate) fn wake_all(&mut self) {
		for waiter in self.parked.drain(..) {
			let _ = waiter.wake.send(());
		}
	}

	pub(crate) fn len(&self) -> usize {
		self.parked.len()
	}
}

/// Exclusive right to read the stream.
///
/// Dropping the lease, including when the runner's future is cancelled mid-read, releases the
/// read cursor first and only then wakes all waiters, so a woken waiter always finds the cursor
/// free.
pub(crate) struct Lease<'a> {
	pub(crate) cursor: MutexGuard<'a, ReadCursor>,
	_handoff: Handoff<'a>,
}

impl<'a> Lease<'a> {
	pub(crate) fn new(cursor: MutexGuard<'a, ReadCursor>, state: &'a Mutex<State>) -> Self {
		tracing::trace!("rpc.lease.acquire");
		Self {
			cursor,
			_handoff: Handoff { state },
		}
	}
}

/// Declared after the cursor guard in [`Lease`], so it drops after the guard is released.
struct Handoff<'a> {
	state: &'a Mutex<State>,
}

impl Drop for Handoff<'_> {
	fn drop(&mut self) {
		let mut state = self.state.lock();
		tracing::trace!(waiters = state.waiters.len(), "rpc.lease.release");
		state.waiters.wake_all();
	}
}

//! Outstanding outgoing calls awaiting their responses.

use std::collections::HashMap;

use rmpv::Value;

use crate::protocol::CallId;
use crate::{Error, Result};

/// Single-assignment completion slot of one outgoing call.
#[derive(Debug)]
enum Slot {
	/// No response yet.
	Waiting,
	/// The caller went away; a late response is swallowed.
	Abandoned,
	/// Response arrived but the caller has not collected it yet.
	Ready(std::result::Result<Value, Value>),
}

/// Correlates outgoing request ids with their completion slots.
#[derive(Debug, Default)]
pub(crate) struct PendingCalls {
	calls: HashMap<CallId, Slot>,
}

impl PendingCalls {
	/// Registers `id` as waiting. Returns false if the id is already taken.
	pub(crate) fn insert(&mut self, id: CallId) -> bool {
		if self.calls.contains_key(&id) {
			return false;
		}
		self.calls.insert(id, Slot::Waiting);
		true
	}

	/// Returns true while `id` has neither been answered nor abandoned.
	pub(crate) fn is_waiting(&self, id: CallId) -> bool {
		matches!(self.calls.get(&id), Some(Slot::Waiting))
	}

	/// Stores the response for `id`.
	///
	/// A response nobody asked for, or a second response for the same call, is a protocol
	/// violation.
	pub(crate) fn resolve(&mut self, id: CallId, outcome: std::result::Result<Value, Value>) -> Result<()> {
		let Some(slot) = self.calls.get_mut(&id) else {
			return Err(Error::Protocol(format!("response for unknown call {id}")));
		};
		match *slot {
			Slot::Waiting => {
				*slot = Slot::Ready(outcome);
				Ok(())
			}
			Slot::Abandoned => {
				self.calls.remove(&id);
				tracing::trace!(id, "rpc.response.abandoned");
				Ok(())
			}
			Slot::Ready(_) => Err(Error::Protocol(format!("duplicate response for call {id}"))),
		}
	}

	/// Removes and returns the response for `id` if it has arrived.
	pub(crate) fn take(&mut self, id: CallId) -> Option<std::result::Result<Value, Value>> {
		match self.calls.remove(&id)? {
			Slot::Ready(outcome) => Some(outcome),
			slot => {
				self.calls.insert(id, slot);
				None
			}
		}
	}

	/// Forgets `id` on behalf of a caller that stopped waiting.
	///
	/// A still-waiting call keeps its id reserved until the response shows up so that the id
	/// is not handed out again while the peer may still answer it.
	pub(crate) fn abandon(&mut self, id: CallId) {
		match self.calls.get(&id) {
			Some(Slot::Waiting) => {
				self.calls.insert(id, Slot::Abandoned);
			}
			Some(Slot::Ready(_)) => {
				self.calls.remove(&id);
			}
			Some(Slot::Abandoned) | None => {}
		}
	}

	/// Drops calls that can no longer be answered.
	pub(crate) fn clear_abandoned(&mut self) {
		self.calls.retain(|_, slot| !matches!(slot, Slot::Abandoned));
	}

	/// Number of calls still waiting for a response.
	pub(crate) fn waiting(&self) -> usize {
		self.calls.values().filter(|slot| matches!(slot, Slot::Waiting)).count()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn resolve_then_take_once() {
		let mut calls = PendingCalls::default();
		assert!(calls.insert(1));
		assert!(!calls.insert(1));
		assert!(calls.is_waiting(1));
		assert_eq!(calls.take(1), None);

		calls.resolve(1, Ok(Value::from(6))).unwrap();
		assert!(!calls.is_waiting(1));
		assert_eq!(calls.take(1), Some(Ok(Value::from(6))));
		assert_eq!(calls.take(1), None);
	}

	#[test]
	fn unknown_and_duplicate_responses_are_violations() {
		let mut calls = PendingCalls::default();
		assert!(matches!(calls.resolve(42, Ok(Value::Nil)), Err(Error::Protocol(_))));

		calls.insert(3);
		calls.resolve(3, Err(Value::from("boom"))).unwrap();
		assert!(matches!(calls.resolve(3, Ok(Value::Nil)), Err(Error::Protocol(_))));
	}

	#[test]
	fn abandoned_call_swallows_late_response_once() {
		let mut calls = PendingCalls::default();
		calls.insert(5);
		calls.abandon(5);
		assert!(!calls.is_waiting(5));
		assert!(!calls.insert(5), "id stays reserved until the peer answers");
		assert_eq!(calls.waiting(), 0);

		calls.resolve(5, Ok(Value::Nil)).unwrap();
		assert!(matches!(calls.resolve(5, Ok(Value::Nil)), Err(Error::Protocol(_))));
		assert!(calls.insert(5));
	}

	#[test]
	fn clear_abandoned_keeps_live_calls() {
		let mut calls = PendingCalls::default();
		calls.insert(1);
		calls.insert(2);
		calls.abandon(2);
		calls.clear_abandoned();
		assert!(calls.is_waiting(1));
		assert!(calls.insert(2));
	}
}

use std::fmt;
use std::num::{NonZeroU32, NonZeroU64};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use arc_swap::ArcSwap;

/// Longest alarm message kept, in characters. Longer text is truncated.
pub const MAX_MESSAGE_LEN: usize = 50;

macro_rules! positive_id {
	($(#[$meta:meta])* $name:ident) => {
		$(#[$meta])*
		#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
		pub struct $name(NonZeroU32);

		impl $name {
			/// Returns `None` for zero.
			pub const fn new(value: u32) -> Option<Self> {
				match NonZeroU32::new(value) {
					Some(v) => Some(Self(v)),
					None => None,
				}
			}

			/// Returns the raw value.
			pub const fn get(self) -> u32 {
				self.0.get()
			}
		}

		impl fmt::Display for $name {
			fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
				fmt::Display::fmt(&self.0, f)
			}
		}
	};
}

positive_id!(
	/// Unique alarm identity (the message number).
	AlarmKey
);
positive_id!(
	/// Message type; selects which worker owns an alarm.
	MsgType
);
positive_id!(
	/// Firing period in ticks.
	WaitTime
);

/// Identity of one worker task. Never reused within a scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WorkerId(NonZeroU64);

impl WorkerId {
	pub(crate) const fn from_raw(raw: u64) -> Option<Self> {
		match NonZeroU64::new(raw) {
			Some(v) => Some(Self(v)),
			None => None,
		}
	}

	/// Returns the raw id.
	pub const fn get(self) -> u64 {
		self.0.get()
	}
}

impl fmt::Display for WorkerId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "w{}", self.0)
	}
}

/// Non-empty alarm text, at most [`MAX_MESSAGE_LEN`] characters.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AlarmMessage(Arc<str>);

impl AlarmMessage {
	/// Builds a message, truncating overlong text at a char boundary.
	///
	/// Returns `None` for empty text.
	pub fn new(text: impl AsRef<str>) -> Option<Self> {
		let text = text.as_ref();
		if text.is_empty() {
			return None;
		}
		let end = text.char_indices().nth(MAX_MESSAGE_LEN).map_or(text.len(), |(idx, _)| idx);
		Some(Self(Arc::from(&text[..end])))
	}

	/// Returns the message text.
	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl fmt::Display for AlarmMessage {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

/// Replaceable part of an alarm.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct AlarmBody {
	pub wait_time: WaitTime,
	pub msg_type: MsgType,
	pub message: AlarmMessage,
}

/// One alarm, shared between the registry arena and at most one worker view.
///
/// `owner` doubles as the assigned flag: zero means unassigned, so an
/// assigned alarm always names its worker. The body is only rewritten while
/// the alarm is unassigned and the writer holds the gate, so workers read it
/// without locking.
pub(crate) struct AlarmCell {
	key: AlarmKey,
	body: ArcSwap<AlarmBody>,
	owner: AtomicU64,
	replaced: AtomicBool,
	cancelled: AtomicBool,
}

impl AlarmCell {
	/// Creates a new unassigned alarm.
	pub fn new(key: AlarmKey, body: AlarmBody) -> Self {
		Self {
			key,
			body: ArcSwap::from_pointee(body),
			owner: AtomicU64::new(0),
			replaced: AtomicBool::new(false),
			cancelled: AtomicBool::new(false),
		}
	}

	pub fn key(&self) -> AlarmKey {
		self.key
	}

	/// Returns the current body.
	pub fn body(&self) -> Arc<AlarmBody> {
		self.body.load_full()
	}

	pub fn msg_type(&self) -> MsgType {
		self.body.load().msg_type
	}

	/// Swaps in a new body. Callers hold the write gate.
	pub fn set_body(&self, body: AlarmBody) {
		debug_assert!(!self.is_assigned(), "alarm body rewritten while a worker holds it");
		self.body.store(Arc::new(body));
	}

	/// Returns the assigned worker, if any.
	pub fn owner(&self) -> Option<WorkerId> {
		WorkerId::from_raw(self.owner.load(Ordering::Acquire))
	}

	pub fn is_assigned(&self) -> bool {
		self.owner().is_some()
	}

	/// Claims the alarm for `worker`. Fails if another worker holds it.
	pub fn try_assign(&self, worker: WorkerId) -> bool {
		self.owner
			.compare_exchange(0, worker.get(), Ordering::AcqRel, Ordering::Acquire)
			.is_ok()
	}

	/// Drops the worker's claim. Returns the previous owner.
	pub fn release(&self) -> Option<WorkerId> {
		WorkerId::from_raw(self.owner.swap(0, Ordering::AcqRel))
	}

	/// Flags the alarm for detach ahead of a replace.
	pub fn mark_replaced(&self) {
		self.replaced.store(true, Ordering::Release);
	}

	pub fn clear_replaced(&self) {
		self.replaced.store(false, Ordering::Release);
	}

	pub fn is_replaced(&self) -> bool {
		self.replaced.load(Ordering::Acquire)
	}

	/// Flags the alarm for detach ahead of a cancel.
	pub fn mark_cancelled(&self) {
		self.cancelled.store(true, Ordering::Release);
	}

	pub fn is_cancelled(&self) -> bool {
		self.cancelled.load(Ordering::Acquire)
	}

	/// True when the dispatcher asked the owning worker to let go.
	pub fn detach_requested(&self) -> bool {
		self.is_replaced() || self.is_cancelled()
	}

	/// Returns a point-in-time copy.
	pub fn snapshot(&self) -> AlarmSnapshot {
		let body = self.body.load();
		AlarmSnapshot {
			key: self.key,
			msg_type: body.msg_type,
			wait_time: body.wait_time,
			message: body.message.clone(),
			owner: self.owner(),
		}
	}
}

impl fmt::Debug for AlarmCell {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("AlarmCell")
			.field("key", &self.key)
			.field("body", &*self.body.load())
			.field("owner", &self.owner())
			.field("replaced", &self.is_replaced())
			.field("cancelled", &self.is_cancelled())
			.finish()
	}
}

/// Point-in-time copy of one registered alarm.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlarmSnapshot {
	pub key: AlarmKey,
	pub msg_type: MsgType,
	pub wait_time: WaitTime,
	pub message: AlarmMessage,
	pub owner: Option<WorkerId>,
}

#[cfg(test)]
mod tests {
	use super::*;

	fn body(msg_type: u32) -> AlarmBody {
		AlarmBody {
			wait_time: WaitTime::new(2).unwrap(),
			msg_type: MsgType::new(msg_type).unwrap(),
			message: AlarmMessage::new("hi").unwrap(),
		}
	}

	#[test]
	fn zero_ids_are_rejected() {
		assert!(AlarmKey::new(0).is_none());
		assert!(MsgType::new(0).is_none());
		assert!(WaitTime::new(0).is_none());
		assert_eq!(AlarmKey::new(7).map(AlarmKey::get), Some(7));
	}

	#[test]
	fn message_is_truncated_on_char_boundary() {
		let long = "é".repeat(MAX_MESSAGE_LEN + 10);
		let msg = AlarmMessage::new(&long).unwrap();
		assert_eq!(msg.as_str().chars().count(), MAX_MESSAGE_LEN);
		assert!(AlarmMessage::new("").is_none());
		assert_eq!(AlarmMessage::new("short").unwrap().as_str(), "short");
	}

	#[test]
	fn owner_and_assigned_agree() {
		let cell = AlarmCell::new(AlarmKey::new(1).unwrap(), body(1));
		let w1 = WorkerId::from_raw(1).unwrap();
		let w2 = WorkerId::from_raw(2).unwrap();
		assert!(!cell.is_assigned());
		assert!(cell.try_assign(w1));
		assert!(!cell.try_assign(w2));
		assert_eq!(cell.owner(), Some(w1));
		assert_eq!(cell.release(), Some(w1));
		assert!(!cell.is_assigned());
		assert_eq!(cell.owner(), None);
	}

	#[test]
	fn detach_flags() {
		let cell = AlarmCell::new(AlarmKey::new(1).unwrap(), body(1));
		assert!(!cell.detach_requested());
		cell.mark_replaced();
		assert!(cell.detach_requested());
		cell.clear_replaced();
		assert!(!cell.detach_requested());
		cell.mark_cancelled();
		assert!(cell.is_cancelled());
		cell.set_body(body(4));
		assert_eq!(cell.msg_type().get(), 4);
	}
}

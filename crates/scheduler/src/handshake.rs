use tokio::sync::{Mutex, MutexGuard, Notify};
use tokio_util::sync::CancellationToken;

use crate::alarm::{AlarmCell, AlarmKey, MsgType, WorkerId};

/// What a worker reports when it lets go of a flagged alarm.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Detached {
	pub key: AlarmKey,
	pub worker: WorkerId,
	/// Type the worker serves, which may differ from the alarm's new type.
	pub worker_type: MsgType,
	/// Alarms left in the worker's view after this one.
	pub remaining: usize,
}

impl Detached {
	/// The worker emptied its view and will retire at the end of its tick.
	pub fn retires_worker(&self) -> bool {
		self.remaining == 0
	}
}

/// Why the dispatcher stopped waiting for a detach.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Interrupted;

/// Rendezvous between the dispatcher and the worker holding a flagged alarm.
///
/// The dispatcher flags the alarm, then waits here until the owner clears
/// the claim. The predicate lives on the alarm itself; the mutex orders the
/// check against the worker's update so no wakeup is missed.
#[derive(Default)]
pub(crate) struct Handshake {
	slot: Mutex<Option<Detached>>,
	detached: Notify,
}

impl Handshake {
	/// Creates a new handshake with nothing pending.
	pub fn new() -> Self {
		Self::default()
	}

	/// Takes the handshake for a dispatcher phase.
	pub async fn hold(&self) -> HandshakeGuard<'_> {
		HandshakeGuard {
			handshake: self,
			slot: Some(self.slot.lock().await),
		}
	}

	/// Worker side: release `cell` and wake the waiting dispatcher.
	pub async fn confirm_detach(&self, cell: &AlarmCell, worker: WorkerId, worker_type: MsgType, remaining: usize) {
		let mut slot = self.slot.lock().await;
		cell.release();
		*slot = Some(Detached {
			key: cell.key(),
			worker,
			worker_type,
			remaining,
		});
		drop(slot);
		self.detached.notify_waiters();
	}
}

pub(crate) struct HandshakeGuard<'a> {
	handshake: &'a Handshake,
	slot: Option<MutexGuard<'a, Option<Detached>>>,
}

impl HandshakeGuard<'_> {
	/// Waits until the owner of `cell` has detached it.
	///
	/// The guard is given up while parked and re-taken before returning, like
	/// a condition variable wait. Stops early when `cancel` fires.
	pub async fn await_detach(&mut self, cell: &AlarmCell, cancel: &CancellationToken) -> Result<Option<Detached>, Interrupted> {
		loop {
			let mut slot = match self.slot.take() {
				Some(slot) => slot,
				None => self.handshake.slot.lock().await,
			};
			// Armed under the lock so a detach between unlock and await still wakes us.
			let notified = self.handshake.detached.notified();
			if !cell.is_assigned() {
				let report = slot.take().filter(|d| d.key == cell.key());
				self.slot = Some(slot);
				return Ok(report);
			}
			drop(slot);
			tokio::select! {
				biased;
				_ = cancel.cancelled() => return Err(Interrupted),
				_ = notified => {}
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use std::sync::Arc;
	use std::time::Duration;

	use super::*;
	use crate::alarm::{AlarmBody, AlarmMessage, WaitTime};

	fn cell(key: u32) -> Arc<AlarmCell> {
		Arc::new(AlarmCell::new(
			AlarmKey::new(key).unwrap(),
			AlarmBody {
				wait_time: WaitTime::new(1).unwrap(),
				msg_type: MsgType::new(1).unwrap(),
				message: AlarmMessage::new("m").unwrap(),
			},
		))
	}

	fn worker() -> WorkerId {
		WorkerId::from_raw(9).unwrap()
	}

	#[tokio::test]
	async fn unassigned_alarm_returns_immediately() {
		let hs = Handshake::new();
		let c = cell(1);
		let mut guard = hs.hold().await;
		let got = guard.await_detach(&c, &CancellationToken::new()).await;
		assert_eq!(got, Ok(None));
	}

	#[tokio::test]
	async fn worker_detach_wakes_dispatcher() {
		let hs = Arc::new(Handshake::new());
		let c = cell(4);
		assert!(c.try_assign(worker()));
		c.mark_cancelled();

		let mut guard = hs.hold().await;
		let worker_side = tokio::spawn({
			let hs = Arc::clone(&hs);
			let c = Arc::clone(&c);
			async move {
				tokio::time::sleep(Duration::from_millis(5)).await;
				hs.confirm_detach(&c, worker(), MsgType::new(1).unwrap(), 0).await;
			}
		});

		let got = guard.await_detach(&c, &CancellationToken::new()).await.unwrap().unwrap();
		assert_eq!(got.key, c.key());
		assert!(got.retires_worker());
		assert!(!c.is_assigned());
		worker_side.await.unwrap();
	}

	#[tokio::test]
	async fn cancellation_interrupts_wait() {
		let hs = Handshake::new();
		let c = cell(2);
		assert!(c.try_assign(worker()));
		let cancel = CancellationToken::new();
		cancel.cancel();
		let mut guard = hs.hold().await;
		assert_eq!(guard.await_detach(&c, &cancel).await, Err(Interrupted));
	}
}

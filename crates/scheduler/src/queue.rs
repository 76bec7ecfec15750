//! Producer/dispatcher command queue.
//!
//! Three FIFO lists (schedule, start-worker, cancel) and the table of
//! started workers share one lock. Producers coalesce or suppress redundant
//! commands before appending. The pending mask and `signal` let the
//! dispatcher sleep and skip empty phases without taking the lock.

use std::collections::{BTreeMap, VecDeque};
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU8, Ordering};

use tokio::sync::{Mutex, MutexGuard, Notify};
use tokio_util::sync::CancellationToken;

use crate::alarm::MsgType;
use crate::command::{CancelRequest, ScheduleRequest, StartWorkerRequest, SubmitOutcome, SuppressReason};
use crate::error::SubmitError;
use crate::worker::WorkerRecord;

bitflags::bitflags! {
	/// Which command lists are non-empty.
	#[derive(Debug, Clone, Copy, PartialEq, Eq)]
	pub(crate) struct Pending: u8 {
		const SCHEDULE = 1;
		const START_WORKER = 1 << 1;
		const CANCEL = 1 << 2;
	}
}

#[derive(Default)]
pub(crate) struct QueueState {
	pub schedule: VecDeque<ScheduleRequest>,
	pub start_worker: VecDeque<StartWorkerRequest>,
	pub cancel: VecDeque<CancelRequest>,
	/// Started workers, at most one per type, until the dispatcher reaps them.
	pub workers: BTreeMap<MsgType, WorkerRecord>,
	closed: bool,
}

impl QueueState {
	fn pending(&self) -> Pending {
		let mut mask = Pending::empty();
		mask.set(Pending::SCHEDULE, !self.schedule.is_empty());
		mask.set(Pending::START_WORKER, !self.start_worker.is_empty());
		mask.set(Pending::CANCEL, !self.cancel.is_empty());
		mask
	}

	fn schedules_type(&self, msg_type: MsgType) -> bool {
		self.schedule.iter().any(|req| req.msg_type == msg_type)
	}
}

#[derive(Default)]
pub(crate) struct CommandQueue {
	state: Mutex<QueueState>,
	pending: AtomicU8,
	signal: Notify,
}

/// Locked queue. The pending mask is republished on unlock.
pub(crate) struct QueueGuard<'a> {
	state: MutexGuard<'a, QueueState>,
	pending: &'a AtomicU8,
}

impl Deref for QueueGuard<'_> {
	type Target = QueueState;

	fn deref(&self) -> &QueueState {
		&self.state
	}
}

impl DerefMut for QueueGuard<'_> {
	fn deref_mut(&mut self) -> &mut QueueState {
		&mut self.state
	}
}

impl Drop for QueueGuard<'_> {
	fn drop(&mut self) {
		self.pending.store(self.state.pending().bits(), Ordering::Release);
	}
}

impl CommandQueue {
	/// Creates a new empty, open queue.
	pub fn new() -> Self {
		Self::default()
	}

	/// Locks the queue state.
	pub async fn lock(&self) -> QueueGuard<'_> {
		QueueGuard {
			state: self.state.lock().await,
			pending: &self.pending,
		}
	}

	async fn lock_open(&self) -> Result<QueueGuard<'_>, SubmitError> {
		let guard = self.lock().await;
		if guard.closed {
			return Err(SubmitError::Closed);
		}
		Ok(guard)
	}

	/// Lists with queued commands, as of the last unlock.
	pub fn pending(&self) -> Pending {
		Pending::from_bits_truncate(self.pending.load(Ordering::Acquire))
	}

	/// Parks until a command is queued. `false` if `cancel` fired first.
	pub async fn wait_pending(&self, cancel: &CancellationToken) -> bool {
		loop {
			let notified = self.signal.notified();
			if !self.pending().is_empty() {
				return true;
			}
			tokio::select! {
				biased;
				_ = cancel.cancelled() => return false,
				_ = notified => {}
			}
		}
	}

	/// Refuses every later submission.
	pub async fn close(&self) {
		self.lock().await.closed = true;
	}

	fn signal(&self) {
		self.signal.notify_one();
	}

	/// Queues a schedule request, or overwrites a queued one with the same key.
	pub async fn enqueue_schedule(&self, req: ScheduleRequest, key_registered: bool) -> Result<SubmitOutcome, SubmitError> {
		let mut q = self.lock_open().await?;
		if let Some(queued) = q.schedule.iter_mut().find(|queued| queued.key == req.key) {
			*queued = req;
			return Ok(SubmitOutcome::Coalesced);
		}
		q.schedule.push_back(req);
		drop(q);
		self.signal();
		Ok(if key_registered {
			SubmitOutcome::WillReplace
		} else {
			SubmitOutcome::Enqueued
		})
	}

	/// Queues a start-worker request unless it would be redundant.
	pub async fn enqueue_start_worker(&self, req: StartWorkerRequest, type_registered: bool) -> Result<SubmitOutcome, SubmitError> {
		let mut q = self.lock_open().await?;
		let reason = if q.workers.get(&req.msg_type).is_some_and(WorkerRecord::is_live) {
			Some(SuppressReason::WorkerRunning)
		} else if q.start_worker.iter().any(|queued| queued.msg_type == req.msg_type) {
			Some(SuppressReason::AlreadyPending)
		} else if !type_registered && !q.schedules_type(req.msg_type) {
			Some(SuppressReason::NoAlarms)
		} else {
			None
		};
		if let Some(reason) = reason {
			return Ok(SubmitOutcome::Suppressed(reason));
		}
		q.start_worker.push_back(req);
		drop(q);
		self.signal();
		Ok(SubmitOutcome::Enqueued)
	}

	/// Queues a cancel request for a key that exists or is about to.
	pub async fn enqueue_cancel(&self, req: CancelRequest, key_registered: bool) -> Result<SubmitOutcome, SubmitError> {
		let mut q = self.lock_open().await?;
		if !key_registered && !q.schedule.iter().any(|queued| queued.key == req.key) {
			return Ok(SubmitOutcome::Suppressed(SuppressReason::NoSuchAlarm));
		}
		if q.cancel.iter().any(|queued| queued.key == req.key) {
			return Ok(SubmitOutcome::Coalesced);
		}
		q.cancel.push_back(req);
		drop(q);
		self.signal();
		Ok(SubmitOutcome::Enqueued)
	}
}

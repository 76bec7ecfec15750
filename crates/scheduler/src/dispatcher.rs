//! The single consumer of the command queue.
//!
//! Cycles WAIT → PROCESS_SCHEDULE → PROCESS_START_WORKER → PROCESS_CANCEL.
//! Schedule and cancel phases hold registry write access, the queue lock
//! and the handshake together; the start-worker phase only needs the queue.
//! Phases with nothing queued are skipped without locking. Shutdown is
//! observed while waiting and between phases, so a handshake in progress
//! completes; only the root token (fault or drop) interrupts one.

use std::collections::btree_map::Entry;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::alarm::AlarmKey;
use crate::error::{FatalError, Phase, Result};
use crate::event::SchedulerEvent;
use crate::handshake::Interrupted;
use crate::queue::{Pending, QueueState};
use crate::registry::{RetiredWorkerSignal, Upsert};
use crate::shared::SchedulerShared;
use crate::worker::{WorkerRecord, spawn_worker};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DispatchPhase {
	Wait,
	ProcessSchedule,
	ProcessStartWorker,
	ProcessCancel,
}

impl DispatchPhase {
	const fn next(self) -> Self {
		match self {
			Self::Wait => Self::ProcessSchedule,
			Self::ProcessSchedule => Self::ProcessStartWorker,
			Self::ProcessStartWorker => Self::ProcessCancel,
			Self::ProcessCancel => Self::Wait,
		}
	}

	const fn phase(self) -> Phase {
		match self {
			Self::Wait => Phase::Wait,
			Self::ProcessSchedule => Phase::ProcessSchedule,
			Self::ProcessStartWorker => Phase::ProcessStartWorker,
			Self::ProcessCancel => Phase::ProcessCancel,
		}
	}
}

/// Runs the dispatcher until `cancel` fires or a fault occurs.
///
/// A fault stops the whole scheduler before it is returned.
pub(crate) async fn run_dispatcher(shared: Arc<SchedulerShared>, cancel: CancellationToken) -> Result<()> {
	let mut dispatcher = Dispatcher {
		shared: Arc::clone(&shared),
		cancel,
		phase: DispatchPhase::Wait,
	};
	let result = dispatcher.run().await;
	match &result {
		Ok(()) => {
			tracing::debug!(phase = dispatcher.phase.phase().as_str(), "chime.dispatcher.exit");
		}
		Err(err) => shared.fail(err.clone()).await,
	}
	result
}

struct Dispatcher {
	shared: Arc<SchedulerShared>,
	cancel: CancellationToken,
	phase: DispatchPhase,
}

impl Dispatcher {
	async fn run(&mut self) -> Result<()> {
		loop {
			let pending = self.shared.queue.pending();
			match self.phase {
				DispatchPhase::Wait => {
					if !self.shared.queue.wait_pending(&self.cancel).await {
						return Ok(());
					}
					self.reap_finished().await?;
				}
				DispatchPhase::ProcessSchedule if pending.contains(Pending::SCHEDULE) => {
					self.trace_phase(pending);
					self.process_schedules().await?;
				}
				DispatchPhase::ProcessStartWorker if pending.contains(Pending::START_WORKER) => {
					self.trace_phase(pending);
					self.process_start_workers().await?;
				}
				DispatchPhase::ProcessCancel if pending.contains(Pending::CANCEL) => {
					self.trace_phase(pending);
					self.process_cancels().await?;
				}
				_ => {}
			}
			self.phase = self.phase.next();
			if self.cancel.is_cancelled() {
				return Ok(());
			}
			tokio::task::yield_now().await;
		}
	}

	fn trace_phase(&self, pending: Pending) {
		tracing::trace!(phase = self.phase.phase().as_str(), ?pending, "chime.dispatcher.phase");
	}

	fn interrupted(&self, key: AlarmKey) -> impl FnOnce(Interrupted) -> FatalError + use<> {
		let phase = self.phase.phase();
		move |Interrupted| FatalError::HandshakeInterrupted { key, phase }
	}

	async fn process_schedules(&mut self) -> Result<()> {
		let shared = Arc::clone(&self.shared);
		let mut registry = shared
			.registry
			.write()
			.await
			.map_err(|_| FatalError::gate_closed(Phase::ProcessSchedule))?;
		let mut queue = shared.queue.lock().await;
		let mut handshake = shared.handshake.hold().await;

		while let Some(req) = queue.schedule.pop_front() {
			let (key, body) = req.into_parts();
			let msg_type = body.msg_type;
			let upsert = registry
				.insert_or_replace(key, body, &mut handshake, &shared.root)
				.await
				.map_err(self.interrupted(key))?;
			match upsert {
				Upsert::Inserted => {
					tracing::debug!(key = %key, msg_type = %msg_type, "chime.dispatcher.insert");
					shared.emit(SchedulerEvent::AlarmInserted { key, msg_type });
				}
				Upsert::Replaced { retired } => {
					tracing::debug!(key = %key, msg_type = %msg_type, "chime.dispatcher.replace");
					shared.emit(SchedulerEvent::AlarmReplaced { key, msg_type });
					if let Some(signal) = retired {
						join_retired(&shared, &mut queue, signal).await?;
					}
				}
			}
		}
		Ok(())
	}

	async fn process_start_workers(&mut self) -> Result<()> {
		let shared = Arc::clone(&self.shared);
		let mut queue = shared.queue.lock().await;

		while let Some(req) = queue.start_worker.pop_front() {
			let msg_type = req.msg_type;
			if let Some(existing) = queue.workers.get(&msg_type) {
				if existing.is_live() {
					tracing::debug!(msg_type = %msg_type, worker = %existing.worker(), "chime.dispatcher.worker_exists");
					continue;
				}
				if let Some(stale) = queue.workers.remove(&msg_type) {
					join_record(&shared, stale).await?;
				}
			}
			let record = spawn_worker(&shared, msg_type);
			tracing::debug!(msg_type = %msg_type, worker = %record.worker(), "chime.dispatcher.worker_start");
			shared.emit(SchedulerEvent::WorkerStarted {
				msg_type,
				worker: record.worker(),
			});
			queue.workers.insert(msg_type, record);
		}
		Ok(())
	}

	async fn process_cancels(&mut self) -> Result<()> {
		let shared = Arc::clone(&self.shared);
		let mut registry = shared
			.registry
			.write()
			.await
			.map_err(|_| FatalError::gate_closed(Phase::ProcessCancel))?;
		let mut queue = shared.queue.lock().await;
		let mut handshake = shared.handshake.hold().await;

		while let Some(req) = queue.cancel.pop_front() {
			let key = req.key;
			let removed = registry
				.remove(key, &mut handshake, &shared.root)
				.await
				.map_err(self.interrupted(key))?;
			let Some(removed) = removed else {
				// Removed between the producer's check and this drain.
				tracing::debug!(key = %key, "chime.dispatcher.cancel_missing");
				continue;
			};
			tracing::debug!(key = %key, msg_type = %removed.alarm.msg_type, "chime.dispatcher.remove");
			shared.emit(SchedulerEvent::AlarmRemoved { key });
			if let Some(signal) = removed.retired {
				join_retired(&shared, &mut queue, signal).await?;
			}
		}
		Ok(())
	}

	/// Joins workers that already exited on their own.
	async fn reap_finished(&mut self) -> Result<()> {
		let mut queue = self.shared.queue.lock().await;
		let finished: Vec<_> = queue
			.workers
			.iter()
			.filter(|(_, record)| record.is_finished())
			.map(|(msg_type, _)| *msg_type)
			.collect();
		for msg_type in finished {
			if let Some(record) = queue.workers.remove(&msg_type) {
				join_record(&self.shared, record).await?;
			}
		}
		Ok(())
	}
}

/// Joins the worker that just gave up its last alarm.
async fn join_retired(shared: &SchedulerShared, queue: &mut QueueState, signal: RetiredWorkerSignal) -> Result<()> {
	let record = match queue.workers.entry(signal.msg_type) {
		Entry::Occupied(entry) if entry.get().worker() == signal.worker => entry.remove(),
		_ => return Ok(()),
	};
	join_record(shared, record).await
}

async fn join_record(shared: &SchedulerShared, record: WorkerRecord) -> Result<()> {
	let msg_type = record.msg_type();
	let worker = record.worker();
	let exit = record.join().await?;
	tracing::debug!(msg_type = %msg_type, worker = %worker, ?exit, "chime.dispatcher.worker_joined");
	shared.emit(SchedulerEvent::WorkerJoined { msg_type, worker });
	Ok(())
}

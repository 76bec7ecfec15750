//! Per-message-type alarm worker.
//!
//! A worker adopts every unassigned alarm of its type at start-up, then
//! ticks: it detaches alarms the dispatcher flagged, fires the ones whose
//! wait time divides the tick count, and retires once it holds nothing.
//! An alarm it let go for a replace is looked for again on the next tick,
//! so a replace that keeps the type keeps the alarm on this worker.
//! Its view is private; the shared alarm cells are read without locks.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::task::JoinHandle;

use crate::TaskRole;
use crate::alarm::{AlarmCell, AlarmKey, MsgType, WorkerId};
use crate::error::{FatalError, Phase, Result};
use crate::event::{DetachReason, SchedulerEvent};
use crate::index::OrderedIndex;
use crate::registry::AlarmRegistry;
use crate::shared::SchedulerShared;
use crate::spawn::{panic_message, spawn};
use crate::token::WorkerToken;

/// How a worker task ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerExit {
	/// Its view became empty.
	SelfRetired,
	/// The scheduler stopped it.
	Cancelled,
}

/// Point-in-time view of one worker record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerSnapshot {
	pub msg_type: MsgType,
	pub worker: WorkerId,
	/// Exited or about to exit; not yet reaped by the dispatcher.
	pub retired: bool,
}

/// Identity and liveness flag visible outside the worker task.
#[derive(Debug)]
struct WorkerState {
	worker: WorkerId,
	msg_type: MsgType,
	retired: AtomicBool,
}

/// Dispatcher-owned handle to a started worker.
#[derive(Debug)]
pub(crate) struct WorkerRecord {
	state: Arc<WorkerState>,
	token: WorkerToken,
	handle: JoinHandle<Result<WorkerExit>>,
}

impl WorkerRecord {
	/// Returns the worker id.
	pub fn worker(&self) -> WorkerId {
		self.state.worker
	}

	/// Returns the message type this worker serves.
	pub fn msg_type(&self) -> MsgType {
		self.state.msg_type
	}

	/// Still serving its type. A retired record does not block a new worker.
	pub fn is_live(&self) -> bool {
		!self.state.retired.load(Ordering::Acquire) && !self.handle.is_finished()
	}

	/// Returns true once the task has exited.
	pub fn is_finished(&self) -> bool {
		self.handle.is_finished()
	}

	/// Returns a point-in-time copy of this record.
	pub fn snapshot(&self) -> WorkerSnapshot {
		WorkerSnapshot {
			msg_type: self.msg_type(),
			worker: self.worker(),
			retired: !self.is_live(),
		}
	}

	/// Waits for the task to end.
	pub async fn join(self) -> Result<WorkerExit> {
		let worker = self.worker();
		let msg_type = self.msg_type();
		match self.handle.await {
			Ok(exit) => exit,
			Err(err) if err.is_panic() => Err(FatalError::WorkerPanicked {
				worker,
				msg_type,
				detail: panic_message(err).unwrap_or_default(),
			}),
			Err(err) => Err(FatalError::WorkerJoin {
				worker,
				msg_type,
				detail: err.to_string(),
			}),
		}
	}

	/// Cancels the worker, which detaches whatever it still holds, then joins it.
	pub async fn stop(self) -> Result<WorkerExit> {
		self.token.cancel();
		self.join().await
	}
}

/// Spawns the worker for `msg_type`.
pub(crate) fn spawn_worker(shared: &Arc<SchedulerShared>, msg_type: MsgType) -> WorkerRecord {
	let worker = shared.worker_ids.next();
	let token = WorkerToken::new(worker, &shared.root);
	let state = Arc::new(WorkerState {
		worker,
		msg_type,
		retired: AtomicBool::new(false),
	});
	let task = Worker {
		shared: Arc::clone(shared),
		state: Arc::clone(&state),
		token: token.clone(),
		view: OrderedIndex::new(),
		tick: 0,
		readopt_owed: false,
	};
	let handle = spawn(&shared.runtime, TaskRole::Worker, task.run());
	WorkerRecord { state, token, handle }
}

struct Worker {
	shared: Arc<SchedulerShared>,
	state: Arc<WorkerState>,
	token: WorkerToken,
	view: OrderedIndex<AlarmKey, Arc<AlarmCell>>,
	tick: u64,
	/// Set after detaching a replaced alarm; cleared by the next successful scan.
	readopt_owed: bool,
}

impl Worker {
	fn id(&self) -> WorkerId {
		self.token.worker()
	}

	fn msg_type(&self) -> MsgType {
		self.state.msg_type
	}

	async fn run(mut self) -> Result<WorkerExit> {
		tracing::debug!(worker = %self.id(), msg_type = %self.msg_type(), "chime.worker.start");
		let exit = match self.init().await {
			Ok(true) => self.tick_loop().await,
			Ok(false) => WorkerExit::Cancelled,
			Err(err) => {
				self.teardown();
				return Err(err);
			}
		};
		match exit {
			WorkerExit::Cancelled => self.teardown(),
			WorkerExit::SelfRetired => self.retire(),
		}
		tracing::debug!(worker = %self.id(), msg_type = %self.msg_type(), ?exit, ticks = self.tick, "chime.worker.exit");
		Ok(exit)
	}

	/// Adopts free alarms under shared access. `Ok(false)` if cancelled first.
	async fn init(&mut self) -> Result<bool> {
		let shared = Arc::clone(&self.shared);
		let registry = tokio::select! {
			biased;
			_ = self.token.cancelled() => return Ok(false),
			guard = shared.registry.read() => guard.map_err(|_| FatalError::gate_closed(Phase::WorkerInit))?,
		};
		let adopted = self.adopt(&registry);
		drop(registry);
		tracing::trace!(worker = %self.id(), adopted, "chime.worker.init");
		Ok(true)
	}

	fn adopt(&mut self, registry: &AlarmRegistry) -> usize {
		let mut adopted = 0;
		for cell in registry.unassigned_of_type(self.msg_type()) {
			if !cell.try_assign(self.id()) {
				continue;
			}
			self.view.insert(cell.key(), Arc::clone(cell));
			self.shared.emit(SchedulerEvent::AlarmAssigned {
				key: cell.key(),
				worker: self.id(),
			});
			adopted += 1;
		}
		adopted
	}

	async fn tick_loop(&mut self) -> WorkerExit {
		let period = self.shared.config.tick;
		loop {
			tokio::select! {
				biased;
				_ = self.token.cancelled() => return WorkerExit::Cancelled,
				_ = tokio::time::sleep(period) => {}
			}
			self.tick += 1;
			self.rescan_if_due();
			self.process_tick().await;
			// An owed re-adoption does not keep an empty worker alive: the
			// dispatcher is already joining it.
			if self.view.is_empty() {
				return WorkerExit::SelfRetired;
			}
		}
	}

	/// Runs on the configured period, and on every tick while a re-adoption
	/// is owed. Skipped while the dispatcher holds write access: it may be
	/// waiting on this very worker in a handshake.
	fn rescan_if_due(&mut self) {
		let periodic = self
			.shared
			.config
			.rescan_every
			.is_some_and(|every| self.tick % every.get() == 0);
		if !periodic && !self.readopt_owed {
			return;
		}
		let shared = Arc::clone(&self.shared);
		match shared.registry.try_read() {
			Some(registry) => {
				self.readopt_owed = false;
				let adopted = self.adopt(&registry);
				if adopted > 0 {
					tracing::trace!(worker = %self.id(), adopted, tick = self.tick, "chime.worker.rescan");
				}
			}
			None => tracing::trace!(worker = %self.id(), tick = self.tick, "chime.worker.rescan_skipped"),
		}
	}

	async fn process_tick(&mut self) {
		let flagged: Vec<AlarmKey> = self
			.view
			.iter()
			.filter(|(_, cell)| cell.detach_requested())
			.map(|(key, _)| key)
			.collect();
		for key in flagged {
			if let Some(cell) = self.view.remove(&key) {
				self.detach(&cell).await;
			}
		}

		for (key, cell) in self.view.iter() {
			if cell.detach_requested() {
				continue;
			}
			let body = cell.body();
			if self.tick % u64::from(body.wait_time.get()) != 0 {
				continue;
			}
			tracing::trace!(worker = %self.id(), key = %key, tick = self.tick, "chime.worker.fire");
			self.shared.emit(SchedulerEvent::AlarmFired {
				key,
				msg_type: body.msg_type,
				worker: self.id(),
				tick: self.tick,
				message: body.message.clone(),
			});
		}
	}

	async fn detach(&mut self, cell: &AlarmCell) {
		let reason = if cell.is_cancelled() {
			DetachReason::Cancelled
		} else {
			self.readopt_owed = true;
			DetachReason::Replaced
		};
		self.shared.emit(SchedulerEvent::AlarmDetached {
			key: cell.key(),
			worker: self.id(),
			reason,
		});
		self.shared
			.handshake
			.confirm_detach(cell, self.id(), self.msg_type(), self.view.len())
			.await;
	}

	fn retire(&self) {
		self.state.retired.store(true, Ordering::Release);
		self.shared.emit(SchedulerEvent::WorkerSelfRetired {
			msg_type: self.msg_type(),
			worker: self.id(),
		});
	}

	/// Drops every claim without the handshake; nobody waits on a cancelled worker.
	fn teardown(&mut self) {
		self.state.retired.store(true, Ordering::Release);
		for (_, cell) in self.view.drain() {
			cell.release();
		}
	}
}

#[cfg(test)]
mod tests {
	use std::time::Duration;

	use tokio::sync::broadcast;

	use super::*;
	use crate::alarm::{AlarmBody, AlarmMessage, WaitTime};
	use crate::config::SchedulerConfig;
	use crate::registry::Upsert;

	fn shared(rescan: Option<u64>) -> Arc<SchedulerShared> {
		let config = SchedulerConfig::new().rescan_every(rescan.and_then(std::num::NonZeroU64::new));
		Arc::new(SchedulerShared::new(config, tokio::runtime::Handle::current()))
	}

	async fn insert(shared: &SchedulerShared, key: u32, msg_type: u32, wait: u32) {
		let mut registry = shared.registry.write().await.unwrap();
		let mut hs = shared.handshake.hold().await;
		let body = AlarmBody {
			wait_time: WaitTime::new(wait).unwrap(),
			msg_type: MsgType::new(msg_type).unwrap(),
			message: AlarmMessage::new(format!("alarm {key}")).unwrap(),
		};
		registry
			.insert_or_replace(AlarmKey::new(key).unwrap(), body, &mut hs, &shared.root)
			.await
			.unwrap();
	}

	fn fired(rx: &mut broadcast::Receiver<SchedulerEvent>) -> Vec<(u32, u64)> {
		let mut out = Vec::new();
		while let Ok(evt) = rx.try_recv() {
			if let SchedulerEvent::AlarmFired { key, tick, .. } = evt {
				out.push((key.get(), tick));
			}
		}
		out
	}

	#[tokio::test(start_paused = true)]
	async fn fires_on_multiples_of_wait_time() {
		let shared = shared(None);
		insert(&shared, 1, 7, 2).await;
		insert(&shared, 2, 7, 3).await;
		insert(&shared, 3, 8, 1).await;
		let mut rx = shared.events.subscribe();

		let record = spawn_worker(&shared, MsgType::new(7).unwrap());
		tokio::time::sleep(Duration::from_millis(6_500)).await;

		let got = fired(&mut rx);
		assert_eq!(got, vec![(1, 2), (2, 3), (1, 4), (1, 6), (2, 6)]);
		assert_eq!(record.stop().await, Ok(WorkerExit::Cancelled));
	}

	#[tokio::test(start_paused = true)]
	async fn worker_without_alarms_retires_after_one_tick() {
		let shared = shared(None);
		let mut rx = shared.events.subscribe();
		let record = spawn_worker(&shared, MsgType::new(3).unwrap());
		let worker = record.worker();
		tokio::time::sleep(Duration::from_millis(1_500)).await;
		assert!(!record.is_live());
		assert_eq!(record.join().await, Ok(WorkerExit::SelfRetired));
		let retired = SchedulerEvent::WorkerSelfRetired {
			msg_type: MsgType::new(3).unwrap(),
			worker,
		};
		assert_eq!(rx.try_recv().ok(), Some(retired));
	}

	#[tokio::test(start_paused = true)]
	async fn cancelled_worker_releases_its_alarms() {
		let shared = shared(None);
		insert(&shared, 4, 1, 5).await;
		let record = spawn_worker(&shared, MsgType::new(1).unwrap());
		tokio::time::sleep(Duration::from_millis(500)).await;
		{
			let registry = shared.registry.read().await.unwrap();
			assert_eq!(registry.get(AlarmKey::new(4).unwrap()).unwrap().owner(), Some(record.worker()));
		}
		assert_eq!(record.stop().await, Ok(WorkerExit::Cancelled));
		let registry = shared.registry.read().await.unwrap();
		assert!(!registry.get(AlarmKey::new(4).unwrap()).unwrap().is_assigned());
	}

	#[tokio::test(start_paused = true)]
	async fn replaced_alarm_of_same_type_is_taken_back_next_tick() {
		let shared = shared(None);
		insert(&shared, 1, 2, 100).await;
		insert(&shared, 2, 2, 100).await;
		let mut rx = shared.events.subscribe();
		let record = spawn_worker(&shared, MsgType::new(2).unwrap());
		tokio::time::sleep(Duration::from_millis(500)).await;

		{
			let mut registry = shared.registry.write().await.unwrap();
			let mut hs = shared.handshake.hold().await;
			let body = AlarmBody {
				wait_time: WaitTime::new(1).unwrap(),
				msg_type: MsgType::new(2).unwrap(),
				message: AlarmMessage::new("again").unwrap(),
			};
			let got = registry
				.insert_or_replace(AlarmKey::new(1).unwrap(), body, &mut hs, &shared.root)
				.await
				.unwrap();
			assert_eq!(got, Upsert::Replaced { retired: None });
		}

		tokio::time::sleep(Duration::from_millis(1_500)).await;
		assert_eq!(fired(&mut rx), vec![(1, 2)]);
		let registry = shared.registry.read().await.unwrap();
		assert_eq!(registry.get(AlarmKey::new(1).unwrap()).unwrap().owner(), Some(record.worker()));
		drop(registry);
		record.stop().await.unwrap();
	}

	#[tokio::test(start_paused = true)]
	async fn rescan_adopts_alarms_added_later() {
		let shared = shared(Some(2));
		insert(&shared, 1, 5, 100).await;
		let mut rx = shared.events.subscribe();
		let record = spawn_worker(&shared, MsgType::new(5).unwrap());
		tokio::time::sleep(Duration::from_millis(500)).await;
		insert(&shared, 2, 5, 1).await;

		tokio::time::sleep(Duration::from_millis(3_000)).await;
		let fired = fired(&mut rx);
		assert_eq!(fired, vec![(2, 2), (2, 3)]);
		record.stop().await.unwrap();
	}
}

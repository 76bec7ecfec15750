use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::{CancellationToken, DropGuard};

use crate::TaskRole;
use crate::alarm::{AlarmKey, AlarmSnapshot, MsgType};
use crate::command::{CancelRequest, Command, ScheduleRequest, StartWorkerRequest, SubmitOutcome};
use crate::config::SchedulerConfig;
use crate::dispatcher::run_dispatcher;
use crate::error::{FatalError, Result, StartError, SubmitError};
use crate::event::{SchedulerEvent, Termination};
use crate::observer::{Observer, spawn_observer};
use crate::registry::AlarmRegistry;
use crate::shared::SchedulerShared;
use crate::spawn::{panic_message, runtime_handle, spawn};
use crate::worker::{WorkerRecord, WorkerSnapshot};

/// A running alarm scheduler.
///
/// The owner is the producer: commands go in through [`submit`](Self::submit)
/// and friends, observations come out as [`SchedulerEvent`]s. Dropping the
/// scheduler cancels every task; [`shutdown`](Self::shutdown) also waits for
/// them and reports how it ended.
pub struct Scheduler {
	shared: Arc<SchedulerShared>,
	dispatcher_cancel: CancellationToken,
	dispatcher: JoinHandle<Result<()>>,
	observers: Vec<JoinHandle<()>>,
	_cancel_on_drop: DropGuard,
}

impl Scheduler {
	/// Starts the dispatcher on the current tokio runtime.
	pub fn start(config: SchedulerConfig) -> Result<Self, StartError> {
		let runtime = runtime_handle()?;
		let shared = Arc::new(SchedulerShared::new(config, runtime));
		let dispatcher_cancel = shared.root.child_token();
		let dispatcher = spawn(
			&shared.runtime,
			TaskRole::Dispatcher,
			run_dispatcher(Arc::clone(&shared), dispatcher_cancel.clone()),
		);
		tracing::debug!(tick_ms = shared.config.tick.as_millis() as u64, "chime.scheduler.start");
		Ok(Self {
			_cancel_on_drop: shared.root.clone().drop_guard(),
			shared,
			dispatcher_cancel,
			dispatcher,
			observers: Vec::new(),
		})
	}

	/// A raw event stream, starting with the next event emitted.
	pub fn subscribe(&self) -> broadcast::Receiver<SchedulerEvent> {
		self.shared.events.subscribe()
	}

	/// Forwards every later event to `observer` on its own task.
	pub fn attach(&mut self, observer: impl Observer) {
		let rx = self.shared.events.subscribe();
		let task = spawn_observer(&self.shared.runtime, Arc::new(observer), rx);
		self.observers.push(task);
	}

	/// Returns the configuration this scheduler was started with.
	pub fn config(&self) -> &SchedulerConfig {
		&self.shared.config
	}

	/// True once the terminal event went out, after shutdown or a fault.
	pub fn is_terminated(&self) -> bool {
		self.shared.is_terminated()
	}

	/// Queues any command, routing it to the matching typed submit.
	pub async fn submit(&self, command: impl Into<Command>) -> Result<SubmitOutcome, SubmitError> {
		match command.into() {
			Command::Schedule(req) => self.schedule(req).await,
			Command::StartWorker(req) => self.start_worker(req.msg_type).await,
			Command::Cancel(req) => self.cancel(req.key).await,
		}
	}

	/// Queues creation or replacement of an alarm.
	pub async fn schedule(&self, req: ScheduleRequest) -> Result<SubmitOutcome, SubmitError> {
		let key = req.key;
		let registered = self.registry_check(|registry| registry.contains_key(key)).await?;
		let outcome = self.shared.queue.enqueue_schedule(req, registered).await?;
		tracing::trace!(key = %key, ?outcome, "chime.submit.schedule");
		match outcome {
			SubmitOutcome::WillReplace => self.shared.emit(SchedulerEvent::ScheduleWillReplace { key }),
			SubmitOutcome::Coalesced => self.shared.emit(SchedulerEvent::ScheduleCoalesced { key }),
			SubmitOutcome::Enqueued | SubmitOutcome::Suppressed(_) => {}
		}
		Ok(outcome)
	}

	/// Queues the worker for `msg_type` unless one runs or is queued, or no
	/// alarm of that type exists.
	pub async fn start_worker(&self, msg_type: MsgType) -> Result<SubmitOutcome, SubmitError> {
		let registered = self.registry_check(|registry| registry.contains_type(msg_type)).await?;
		let outcome = self
			.shared
			.queue
			.enqueue_start_worker(StartWorkerRequest { msg_type }, registered)
			.await?;
		tracing::trace!(msg_type = %msg_type, ?outcome, "chime.submit.start_worker");
		if let SubmitOutcome::Suppressed(reason) = outcome {
			self.shared.emit(SchedulerEvent::StartWorkerSuppressed { msg_type, reason });
		}
		Ok(outcome)
	}

	/// Queues removal of the alarm with `key`.
	pub async fn cancel(&self, key: AlarmKey) -> Result<SubmitOutcome, SubmitError> {
		let registered = self.registry_check(|registry| registry.contains_key(key)).await?;
		let outcome = self.shared.queue.enqueue_cancel(CancelRequest { key }, registered).await?;
		tracing::trace!(key = %key, ?outcome, "chime.submit.cancel");
		match outcome {
			SubmitOutcome::Suppressed(reason) => self.shared.emit(SchedulerEvent::CancelSuppressed { key, reason }),
			SubmitOutcome::Coalesced => self.shared.emit(SchedulerEvent::CancelCoalesced { key }),
			SubmitOutcome::Enqueued | SubmitOutcome::WillReplace => {}
		}
		Ok(outcome)
	}

	async fn registry_check(&self, check: impl FnOnce(&AlarmRegistry) -> bool) -> Result<bool, SubmitError> {
		let registry = self.shared.registry.read().await.map_err(|_| SubmitError::Closed)?;
		Ok(check(&registry))
	}

	/// Registered alarms in key order.
	pub async fn alarms(&self) -> Vec<AlarmSnapshot> {
		match self.shared.registry.read().await {
			Ok(registry) => registry.snapshot(),
			Err(_) => Vec::new(),
		}
	}

	/// Returns the registered alarm with `key`, if any.
	pub async fn alarm(&self, key: AlarmKey) -> Option<AlarmSnapshot> {
		let registry = self.shared.registry.read().await.ok()?;
		registry.get(key).map(|cell| cell.snapshot())
	}

	/// Started workers not yet reaped, by message type.
	pub async fn workers(&self) -> Vec<WorkerSnapshot> {
		let queue = self.shared.queue.lock().await;
		queue.workers.values().map(WorkerRecord::snapshot).collect()
	}

	/// Stops the dispatcher, then every worker, then closes the primitives.
	///
	/// Returns the fault that ended the scheduler, if any.
	pub async fn shutdown(self) -> Result<()> {
		let Self {
			shared,
			dispatcher_cancel,
			dispatcher,
			observers,
			_cancel_on_drop,
		} = self;

		dispatcher_cancel.cancel();
		let mut outcome = match dispatcher.await {
			Ok(result) => result,
			Err(err) => Err(FatalError::DispatcherFailed {
				detail: panic_message(err).unwrap_or_else(|| "aborted".to_string()),
			}),
		};

		let workers = std::mem::take(&mut shared.queue.lock().await.workers);
		for record in workers.into_values() {
			let stopped = record.stop().await;
			if outcome.is_ok() {
				outcome = stopped.map(drop);
			}
		}

		shared.queue.close().await;
		shared.root.cancel();
		shared.registry.close();
		let how = match &outcome {
			Ok(()) => Termination::Clean,
			Err(err) => Termination::Fault(err.clone()),
		};
		shared.terminate(how);
		tracing::debug!(clean = outcome.is_ok(), "chime.scheduler.shutdown");

		for task in observers {
			let _ = task.await;
		}
		outcome
	}
}

impl std::fmt::Debug for Scheduler {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Scheduler")
			.field("config", &self.shared.config)
			.field("terminated", &self.shared.is_terminated())
			.finish_non_exhaustive()
	}
}

use tokio::sync::broadcast;

use crate::alarm::{AlarmKey, AlarmMessage, MsgType, WorkerId};
use crate::command::SuppressReason;
use crate::error::FatalError;

/// Why a worker let go of an alarm.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetachReason {
	Replaced,
	Cancelled,
}

/// How the scheduler ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Termination {
	/// Orderly shutdown.
	Clean,
	/// Stopped by an unrecoverable fault.
	Fault(FatalError),
}

/// Everything observable about the scheduler, in emission order per task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedulerEvent {
	/// A new alarm entered the registry.
	AlarmInserted { key: AlarmKey, msg_type: MsgType },
	/// An existing alarm got a new body.
	AlarmReplaced { key: AlarmKey, msg_type: MsgType },
	/// An alarm left the registry.
	AlarmRemoved { key: AlarmKey },
	/// A worker adopted an alarm.
	AlarmAssigned { key: AlarmKey, worker: WorkerId },
	/// A worker released an alarm at the dispatcher's request.
	AlarmDetached {
		key: AlarmKey,
		worker: WorkerId,
		reason: DetachReason,
	},
	/// An alarm reached a multiple of its wait time.
	AlarmFired {
		key: AlarmKey,
		msg_type: MsgType,
		worker: WorkerId,
		tick: u64,
		message: AlarmMessage,
	},
	WorkerStarted { msg_type: MsgType, worker: WorkerId },
	/// A worker ran out of alarms and exited.
	WorkerSelfRetired { msg_type: MsgType, worker: WorkerId },
	/// The dispatcher reaped an exited worker.
	WorkerJoined { msg_type: MsgType, worker: WorkerId },
	/// A schedule request targets a key already in the registry.
	ScheduleWillReplace { key: AlarmKey },
	/// A schedule request overwrote a queued one with the same key.
	ScheduleCoalesced { key: AlarmKey },
	StartWorkerSuppressed { msg_type: MsgType, reason: SuppressReason },
	CancelSuppressed { key: AlarmKey, reason: SuppressReason },
	/// A cancel for this key is already queued.
	CancelCoalesced { key: AlarmKey },
	/// Last event ever emitted.
	Terminated(Termination),
}

impl SchedulerEvent {
	pub const fn name(&self) -> &'static str {
		match self {
			Self::AlarmInserted { .. } => "alarm_inserted",
			Self::AlarmReplaced { .. } => "alarm_replaced",
			Self::AlarmRemoved { .. } => "alarm_removed",
			Self::AlarmAssigned { .. } => "alarm_assigned",
			Self::AlarmDetached { .. } => "alarm_detached",
			Self::AlarmFired { .. } => "alarm_fired",
			Self::WorkerStarted { .. } => "worker_started",
			Self::WorkerSelfRetired { .. } => "worker_self_retired",
			Self::WorkerJoined { .. } => "worker_joined",
			Self::ScheduleWillReplace { .. } => "schedule_will_replace",
			Self::ScheduleCoalesced { .. } => "schedule_coalesced",
			Self::StartWorkerSuppressed { .. } => "start_worker_suppressed",
			Self::CancelSuppressed { .. } => "cancel_suppressed",
			Self::CancelCoalesced { .. } => "cancel_coalesced",
			Self::Terminated(_) => "terminated",
		}
	}

	pub fn is_terminal(&self) -> bool {
		matches!(self, Self::Terminated(_))
	}
}

/// Fan-out of scheduler events. Sending never blocks; with no subscriber
/// the event is dropped.
#[derive(Debug, Clone)]
pub(crate) struct EventBus {
	tx: broadcast::Sender<SchedulerEvent>,
}

impl EventBus {
	/// Creates a new bus buffering `capacity` events per subscriber.
	pub fn new(capacity: usize) -> Self {
		let (tx, _) = broadcast::channel(capacity);
		Self { tx }
	}

	/// Sends `event` to every subscriber. Having none is not an error.
	pub fn emit(&self, event: SchedulerEvent) {
		let _ = self.tx.send(event);
	}

	/// Returns a receiver for events emitted from now on.
	pub fn subscribe(&self) -> broadcast::Receiver<SchedulerEvent> {
		self.tx.subscribe()
	}
}

use crate::alarm::{AlarmBody, AlarmKey, AlarmMessage, MsgType, WaitTime};

/// Create an alarm, or replace the alarm that has the same key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleRequest {
	pub key: AlarmKey,
	pub msg_type: MsgType,
	pub wait_time: WaitTime,
	pub message: AlarmMessage,
}

impl ScheduleRequest {
	pub fn new(key: AlarmKey, msg_type: MsgType, wait_time: WaitTime, message: AlarmMessage) -> Self {
		Self {
			key,
			msg_type,
			wait_time,
			message,
		}
	}

	pub(crate) fn into_parts(self) -> (AlarmKey, AlarmBody) {
		let body = AlarmBody {
			wait_time: self.wait_time,
			msg_type: self.msg_type,
			message: self.message,
		};
		(self.key, body)
	}
}

/// Spawn the worker for one message type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StartWorkerRequest {
	pub msg_type: MsgType,
}

/// Remove the alarm with this key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CancelRequest {
	pub key: AlarmKey,
}

/// Any command the producer can submit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
	Schedule(ScheduleRequest),
	StartWorker(StartWorkerRequest),
	Cancel(CancelRequest),
}

impl From<ScheduleRequest> for Command {
	fn from(req: ScheduleRequest) -> Self {
		Self::Schedule(req)
	}
}

impl From<StartWorkerRequest> for Command {
	fn from(req: StartWorkerRequest) -> Self {
		Self::StartWorker(req)
	}
}

impl From<CancelRequest> for Command {
	fn from(req: CancelRequest) -> Self {
		Self::Cancel(req)
	}
}

/// Why a command was dropped instead of queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuppressReason {
	/// A live worker already serves this message type.
	WorkerRunning,
	/// A start request for this message type is already queued.
	AlreadyPending,
	/// No alarm of this message type exists or is queued.
	NoAlarms,
	/// No alarm with this key exists or is queued.
	NoSuchAlarm,
}

impl SuppressReason {
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::WorkerRunning => "worker_running",
			Self::AlreadyPending => "already_pending",
			Self::NoAlarms => "no_alarms",
			Self::NoSuchAlarm => "no_such_alarm",
		}
	}
}

/// What happened to a submitted command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
	/// Appended to its queue.
	Enqueued,
	/// Appended; the existing alarm with this key will be replaced.
	WillReplace,
	/// Merged into an identical pending command.
	Coalesced,
	/// Dropped.
	Suppressed(SuppressReason),
}

impl SubmitOutcome {
	/// True if a new entry was appended to a queue.
	pub fn is_queued(self) -> bool {
		matches!(self, Self::Enqueued | Self::WillReplace)
	}
}

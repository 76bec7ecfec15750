//! Error types for the scheduler core.

use std::fmt;

use thiserror::Error;

use crate::alarm::{AlarmKey, MsgType, WorkerId};

/// Synchronization primitive involved in a fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Primitive {
	/// Reader/writer gate around the alarm registry.
	Gate,
	/// Dispatcher/worker detach rendezvous.
	Handshake,
}

impl Primitive {
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::Gate => "gate",
			Self::Handshake => "handshake",
		}
	}
}

impl fmt::Display for Primitive {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Where a fault was detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
	Wait,
	ProcessSchedule,
	ProcessStartWorker,
	ProcessCancel,
	WorkerInit,
}

impl Phase {
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::Wait => "wait",
			Self::ProcessSchedule => "process_schedule",
			Self::ProcessStartWorker => "process_start_worker",
			Self::ProcessCancel => "process_cancel",
			Self::WorkerInit => "worker_init",
		}
	}
}

impl fmt::Display for Phase {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Unrecoverable failure. The scheduler stops and reports it once.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FatalError {
	/// A primitive was closed under a task that still needed it.
	#[error("{primitive} closed during {phase}")]
	PrimitiveClosed {
		/// Which primitive.
		primitive: Primitive,
		/// What was running.
		phase: Phase,
	},

	/// The dispatcher was cancelled while waiting for a worker to detach.
	#[error("handshake for alarm {key} interrupted during {phase}")]
	HandshakeInterrupted {
		/// Alarm being replaced or cancelled.
		key: AlarmKey,
		/// Dispatcher phase.
		phase: Phase,
	},

	/// A worker task panicked.
	#[error("worker {worker} (type {msg_type}) panicked: {detail}")]
	WorkerPanicked {
		worker: WorkerId,
		msg_type: MsgType,
		detail: String,
	},

	/// A worker task could not be joined for a reason other than a panic.
	#[error("failed to join worker {worker} (type {msg_type}): {detail}")]
	WorkerJoin {
		worker: WorkerId,
		msg_type: MsgType,
		detail: String,
	},

	/// The dispatcher task itself panicked or was aborted.
	#[error("dispatcher task failed: {detail}")]
	DispatcherFailed {
		/// Join error text.
		detail: String,
	},
}

impl FatalError {
	pub(crate) fn gate_closed(phase: Phase) -> Self {
		Self::PrimitiveClosed {
			primitive: Primitive::Gate,
			phase,
		}
	}

	/// The primitive involved, when there is one.
	pub fn primitive(&self) -> Option<Primitive> {
		match self {
			Self::PrimitiveClosed { primitive, .. } => Some(*primitive),
			Self::HandshakeInterrupted { .. } => Some(Primitive::Handshake),
			Self::WorkerPanicked { .. } | Self::WorkerJoin { .. } | Self::DispatcherFailed { .. } => None,
		}
	}
}

/// A command could not be accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SubmitError {
	/// The scheduler was shut down or stopped after a fault.
	#[error("scheduler is closed")]
	Closed,
}

/// The scheduler could not be started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum StartError {
	/// `Scheduler::start` was called outside a tokio runtime.
	#[error("no tokio runtime available on this thread")]
	NoRuntime,
}

pub type Result<T, E = FatalError> = std::result::Result<T, E>;

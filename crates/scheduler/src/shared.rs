use std::sync::atomic::{AtomicBool, Ordering};

use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;

use crate::config::SchedulerConfig;
use crate::error::FatalError;
use crate::event::{EventBus, SchedulerEvent, Termination};
use crate::gate::Gate;
use crate::handshake::Handshake;
use crate::queue::CommandQueue;
use crate::registry::AlarmRegistry;
use crate::token::WorkerIdClock;

/// State every scheduler task reaches through one `Arc`.
///
/// Lock order: registry gate, then command queue, then handshake.
pub(crate) struct SchedulerShared {
	pub registry: Gate<AlarmRegistry>,
	pub queue: CommandQueue,
	pub handshake: Handshake,
	pub events: EventBus,
	pub config: SchedulerConfig,
	pub worker_ids: WorkerIdClock,
	/// Parent of every worker token; cancelled last on shutdown or on a fault.
	pub root: CancellationToken,
	pub runtime: Handle,
	terminated: AtomicBool,
}

impl SchedulerShared {
	/// Creates the shared state for a scheduler on `runtime`.
	pub fn new(config: SchedulerConfig, runtime: Handle) -> Self {
		Self {
			registry: Gate::new(AlarmRegistry::new()),
			queue: CommandQueue::new(),
			handshake: Handshake::new(),
			events: EventBus::new(config.event_buffer),
			config,
			worker_ids: WorkerIdClock::new(),
			root: CancellationToken::new(),
			runtime,
			terminated: AtomicBool::new(false),
		}
	}

	pub fn emit(&self, event: SchedulerEvent) {
		self.events.emit(event);
	}

	/// Emits the terminal event. Only the first call has any effect.
	pub fn terminate(&self, how: Termination) -> bool {
		if self.terminated.swap(true, Ordering::AcqRel) {
			return false;
		}
		self.emit(SchedulerEvent::Terminated(how));
		true
	}

	pub fn is_terminated(&self) -> bool {
		self.terminated.load(Ordering::Acquire)
	}

	/// Stops everything after a fault: no more commands, every worker cancelled.
	pub async fn fail(&self, err: FatalError) {
		tracing::error!(error = %err, primitive = ?err.primitive(), "chime.fault");
		self.queue.close().await;
		self.root.cancel();
		self.terminate(Termination::Fault(err));
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::alarm::AlarmKey;
	use crate::command::CancelRequest;
	use crate::error::{Phase, SubmitError};

	#[tokio::test]
	async fn fault_is_reported_once_and_closes_the_queue() {
		let shared = SchedulerShared::new(SchedulerConfig::default(), Handle::current());
		let mut rx = shared.events.subscribe();
		let err = FatalError::gate_closed(Phase::ProcessSchedule);

		shared.fail(err.clone()).await;
		assert!(shared.root.is_cancelled());
		assert!(shared.is_terminated());
		assert!(!shared.terminate(Termination::Clean));
		assert_eq!(rx.try_recv().ok(), Some(SchedulerEvent::Terminated(Termination::Fault(err))));
		assert!(rx.try_recv().is_err());

		let cancel = CancelRequest {
			key: AlarmKey::new(1).unwrap(),
		};
		assert_eq!(shared.queue.enqueue_cancel(cancel, true).await, Err(SubmitError::Closed));
	}
}

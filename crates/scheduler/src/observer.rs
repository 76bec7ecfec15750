//! Pluggable consumers of [`SchedulerEvent`]s.
//!
//! Each attached observer gets its own forwarding task and broadcast
//! receiver, so a slow observer only loses its own events (with a warning)
//! and never stalls the scheduler.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::runtime::Handle;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;

use crate::TaskRole;
use crate::event::{DetachReason, SchedulerEvent, Termination};
use crate::spawn::spawn;

/// Receives scheduler events in emission order.
#[async_trait]
pub trait Observer: Send + Sync + 'static {
	async fn on_event(&self, event: &SchedulerEvent);

	/// Name used in diagnostics.
	fn name(&self) -> &'static str {
		std::any::type_name::<Self>()
	}
}

/// Renders events as `tracing` records.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogObserver;

impl LogObserver {
	/// Creates a new observer logging at the default levels.
	#[must_use]
	pub fn new() -> Self {
		Self
	}
}

#[async_trait]
impl Observer for LogObserver {
	async fn on_event(&self, event: &SchedulerEvent) {
		match event {
			SchedulerEvent::AlarmFired {
				key,
				msg_type,
				worker,
				tick,
				message,
			} => tracing::info!(%key, %msg_type, %worker, tick, %message, "alarm fired"),
			SchedulerEvent::AlarmInserted { key, msg_type } => tracing::info!(%key, %msg_type, "alarm inserted"),
			SchedulerEvent::AlarmReplaced { key, msg_type } => tracing::info!(%key, %msg_type, "alarm replaced"),
			SchedulerEvent::AlarmRemoved { key } => tracing::info!(%key, "alarm removed"),
			SchedulerEvent::AlarmAssigned { key, worker } => tracing::info!(%key, %worker, "alarm assigned"),
			SchedulerEvent::AlarmDetached { key, worker, reason } => {
				let reason = match reason {
					DetachReason::Replaced => "replaced",
					DetachReason::Cancelled => "cancelled",
				};
				tracing::info!(%key, %worker, reason, "alarm detached");
			}
			SchedulerEvent::WorkerStarted { msg_type, worker } => tracing::info!(%msg_type, %worker, "worker started"),
			SchedulerEvent::WorkerSelfRetired { msg_type, worker } => tracing::info!(%msg_type, %worker, "worker retired"),
			SchedulerEvent::WorkerJoined { msg_type, worker } => tracing::debug!(%msg_type, %worker, "worker joined"),
			SchedulerEvent::ScheduleWillReplace { key } => tracing::info!(%key, "alarm will be replaced"),
			SchedulerEvent::ScheduleCoalesced { key } => tracing::debug!(%key, "queued schedule request updated"),
			SchedulerEvent::StartWorkerSuppressed { msg_type, reason } => {
				tracing::debug!(%msg_type, reason = reason.as_str(), "start-worker request dropped");
			}
			SchedulerEvent::CancelSuppressed { key, reason } => {
				tracing::debug!(%key, reason = reason.as_str(), "cancel request dropped");
			}
			SchedulerEvent::CancelCoalesced { key } => tracing::debug!(%key, "cancel already queued"),
			SchedulerEvent::Terminated(Termination::Clean) => tracing::info!("scheduler terminated"),
			SchedulerEvent::Terminated(Termination::Fault(err)) => tracing::error!(error = %err, "scheduler terminated by fault"),
		}
	}

	fn name(&self) -> &'static str {
		"log"
	}
}

/// Feeds `rx` to `observer` until the terminal event or until the bus closes.
pub(crate) fn spawn_observer(runtime: &Handle, observer: Arc<dyn Observer>, mut rx: broadcast::Receiver<SchedulerEvent>) -> JoinHandle<()> {
	spawn(runtime, TaskRole::Observer, async move {
		loop {
			match rx.recv().await {
				Ok(event) => {
					observer.on_event(&event).await;
					if event.is_terminal() {
						break;
					}
				}
				Err(RecvError::Lagged(skipped)) => {
					tracing::warn!(observer = observer.name(), skipped, "chime.observer.lagged");
				}
				Err(RecvError::Closed) => break,
			}
		}
		tracing::trace!(observer = observer.name(), "chime.observer.exit");
	})
}

#[cfg(test)]
mod tests {
	use parking_lot::Mutex;

	use super::*;
	use crate::alarm::AlarmKey;
	use crate::event::EventBus;

	#[derive(Default)]
	struct Recorder {
		seen: Mutex<Vec<&'static str>>,
	}

	#[async_trait]
	impl Observer for Recorder {
		async fn on_event(&self, event: &SchedulerEvent) {
			self.seen.lock().push(event.name());
		}
	}

	#[tokio::test]
	async fn forwarding_stops_after_terminal_event() {
		let bus = EventBus::new(16);
		let recorder = Arc::new(Recorder::default());
		let task = spawn_observer(&Handle::current(), recorder.clone(), bus.subscribe());

		bus.emit(SchedulerEvent::AlarmRemoved {
			key: AlarmKey::new(1).unwrap(),
		});
		bus.emit(SchedulerEvent::Terminated(Termination::Clean));
		task.await.unwrap();

		assert_eq!(*recorder.seen.lock(), vec!["alarm_removed", "terminated"]);
		assert!(recorder.name().ends_with("Recorder"));
	}

	#[tokio::test]
	async fn lagging_observer_keeps_going() {
		let bus = EventBus::new(1);
		let recorder = Arc::new(Recorder::default());
		let rx = bus.subscribe();
		for k in 1..=3 {
			bus.emit(SchedulerEvent::AlarmRemoved {
				key: AlarmKey::new(k).unwrap(),
			});
		}
		bus.emit(SchedulerEvent::Terminated(Termination::Clean));
		spawn_observer(&Handle::current(), recorder.clone(), rx).await.unwrap();
		assert_eq!(*recorder.seen.lock(), vec!["terminated"]);
	}

	#[tokio::test]
	async fn log_observer_renders_every_event() {
		let log = LogObserver::new();
		log.on_event(&SchedulerEvent::Terminated(Termination::Clean)).await;
		assert_eq!(log.name(), "log");
	}
}

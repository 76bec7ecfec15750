use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio_util::sync::CancellationToken;

use crate::alarm::WorkerId;

/// Monotonic source of worker ids, starting at 1.
#[derive(Debug, Default, Clone)]
pub(crate) struct WorkerIdClock {
	issued: Arc<AtomicU64>,
}

impl WorkerIdClock {
	/// Creates a new id clock; the first id issued is 1.
	pub fn new() -> Self {
		Self::default()
	}

	/// Returns the next worker id.
	pub fn next(&self) -> WorkerId {
		let raw = self.issued.fetch_add(1, Ordering::AcqRel).wrapping_add(1);
		// Wrapping to zero would take 2^64 spawns.
		WorkerId::from_raw(raw).unwrap_or_else(|| self.next())
	}
}

/// Cancellation scope for one worker, a child of the scheduler root.
#[derive(Debug, Clone)]
pub(crate) struct WorkerToken {
	worker: WorkerId,
	cancel: CancellationToken,
}

impl WorkerToken {
	/// Creates a new token for `worker`, cancelled along with `root`.
	pub fn new(worker: WorkerId, root: &CancellationToken) -> Self {
		Self {
			worker,
			cancel: root.child_token(),
		}
	}

	/// Returns the worker this token belongs to.
	pub const fn worker(&self) -> WorkerId {
		self.worker
	}

	/// Requests cancellation.
	pub fn cancel(&self) {
		self.cancel.cancel();
	}

	/// Future resolving when cancellation is requested.
	pub async fn cancelled(&self) {
		self.cancel.cancelled().await;
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn ids_are_monotonic_and_shared_across_clones() {
		let clock = WorkerIdClock::new();
		let other = clock.clone();
		assert_eq!(clock.next().get(), 1);
		assert_eq!(other.next().get(), 2);
		assert_eq!(clock.next().get(), 3);
	}

	#[tokio::test]
	async fn root_cancellation_reaches_workers() {
		let root = CancellationToken::new();
		let token = WorkerToken::new(WorkerIdClock::new().next(), &root);
		assert_eq!(token.worker().get(), 1);
		root.cancel();
		tokio::time::timeout(std::time::Duration::from_secs(1), token.cancelled())
			.await
			.unwrap();
	}

	#[tokio::test]
	async fn cancelling_a_worker_leaves_the_root_alone() {
		let root = CancellationToken::new();
		let token = WorkerToken::new(WorkerIdClock::new().next(), &root);
		token.cancel();
		token.cancelled().await;
		assert!(!root.is_cancelled());
	}
}

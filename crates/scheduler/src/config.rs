use std::num::NonZeroU64;
use std::time::Duration;

/// Scheduler tuning.
///
/// Defaults: one-second ticks, workers re-adopt free alarms every ten ticks,
/// and the event bus buffers 1024 events per subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
	pub(crate) tick: Duration,
	pub(crate) rescan_every: Option<NonZeroU64>,
	pub(crate) event_buffer: usize,
}

impl Default for SchedulerConfig {
	fn default() -> Self {
		Self {
			tick: Duration::from_secs(1),
			rescan_every: NonZeroU64::new(10),
			event_buffer: 1024,
		}
	}
}

impl SchedulerConfig {
	/// Creates a new configuration with the defaults.
	pub fn new() -> Self {
		Self::default()
	}

	/// Sets the worker timer period.
	///
	/// # Panics
	///
	/// Panics if `tick` is zero.
	#[must_use]
	pub fn tick(mut self, tick: Duration) -> Self {
		assert!(!tick.is_zero(), "tick must be non-zero");
		self.tick = tick;
		self
	}

	/// How often, in ticks, a worker looks for unassigned alarms of its type.
	/// `None` limits adoption to worker start-up.
	#[must_use]
	pub fn rescan_every(mut self, ticks: Option<NonZeroU64>) -> Self {
		self.rescan_every = ticks;
		self
	}

	/// Sets per-subscriber event capacity; slow subscribers lose the oldest events.
	///
	/// # Panics
	///
	/// Panics if `capacity` is zero.
	#[must_use]
	pub fn event_buffer(mut self, capacity: usize) -> Self {
		assert!(capacity > 0, "event buffer must be > 0");
		self.event_buffer = capacity;
		self
	}

	/// Returns the worker timer period.
	pub fn tick_duration(&self) -> Duration {
		self.tick
	}
}

/// Kind of task the scheduler spawns, used to tag spawns in traces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskRole {
	/// The single command consumer.
	Dispatcher,
	/// Per-message-type alarm timer.
	Worker,
	/// Event forwarder feeding an [`Observer`](crate::Observer).
	Observer,
}

impl TaskRole {
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::Dispatcher => "dispatcher",
			Self::Worker => "worker",
			Self::Observer => "observer",
		}
	}
}

use std::sync::Arc;

use slab::Slab;
use tokio_util::sync::CancellationToken;

use crate::alarm::{AlarmBody, AlarmCell, AlarmKey, AlarmSnapshot, MsgType, WorkerId};
use crate::handshake::{Detached, HandshakeGuard, Interrupted};
use crate::index::OrderedIndex;

/// Stable arena slot of one alarm.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct AlarmId(usize);

/// A worker let go of its last alarm during a replace or remove and is
/// about to retire; the dispatcher must join it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RetiredWorkerSignal {
	pub worker: WorkerId,
	pub msg_type: MsgType,
}

impl RetiredWorkerSignal {
	fn from_detach(report: Option<Detached>) -> Option<Self> {
		report.filter(Detached::retires_worker).map(|d| Self {
			worker: d.worker,
			msg_type: d.worker_type,
		})
	}
}

/// Outcome of [`AlarmRegistry::insert_or_replace`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Upsert {
	Inserted,
	Replaced { retired: Option<RetiredWorkerSignal> },
}

/// An alarm taken out of the registry.
#[derive(Debug)]
pub(crate) struct Removed {
	pub alarm: AlarmSnapshot,
	pub retired: Option<RetiredWorkerSignal>,
}

/// Every live alarm, unique by key and kept in ascending key order.
///
/// Lives behind the gate: mutation needs write access, scans need read
/// access. Alarms are handed to workers as shared cells.
#[derive(Debug, Default)]
pub(crate) struct AlarmRegistry {
	arena: Slab<Arc<AlarmCell>>,
	order: OrderedIndex<AlarmKey, AlarmId>,
}

impl AlarmRegistry {
	/// Creates a new empty registry.
	pub fn new() -> Self {
		Self::default()
	}

	fn cell(&self, id: AlarmId) -> &Arc<AlarmCell> {
		&self.arena[id.0]
	}

	/// Returns the alarm with `key`, if registered.
	pub fn get(&self, key: AlarmKey) -> Option<&Arc<AlarmCell>> {
		self.order.get(&key).map(|id| self.cell(*id))
	}

	pub fn contains_key(&self, key: AlarmKey) -> bool {
		self.order.contains_key(&key)
	}

	pub fn contains_type(&self, msg_type: MsgType) -> bool {
		self.cells().any(|cell| cell.msg_type() == msg_type)
	}

	fn cells(&self) -> impl Iterator<Item = &Arc<AlarmCell>> {
		self.order.values().map(|id| self.cell(*id))
	}

	/// Unassigned alarms of `msg_type`, in key order.
	pub fn unassigned_of_type(&self, msg_type: MsgType) -> impl Iterator<Item = &Arc<AlarmCell>> {
		self.cells()
			.filter(move |cell| !cell.is_assigned() && cell.msg_type() == msg_type)
	}

	pub fn snapshot(&self) -> Vec<AlarmSnapshot> {
		self.cells().map(|cell| cell.snapshot()).collect()
	}

	/// Adds a new alarm, or overwrites the body of the one with the same key.
	///
	/// An assigned alarm is flagged and its worker must detach it before the
	/// body changes, so a worker never observes a half-replaced alarm. The
	/// alarm comes out unassigned.
	pub async fn insert_or_replace(
		&mut self,
		key: AlarmKey,
		body: AlarmBody,
		handshake: &mut HandshakeGuard<'_>,
		cancel: &CancellationToken,
	) -> Result<Upsert, Interrupted> {
		let Some(&id) = self.order.get(&key) else {
			let id = AlarmId(self.arena.insert(Arc::new(AlarmCell::new(key, body))));
			self.order.insert(key, id);
			return Ok(Upsert::Inserted);
		};

		let cell = Arc::clone(self.cell(id));
		let mut retired = None;
		if cell.is_assigned() {
			cell.mark_replaced();
			let report = handshake.await_detach(&cell, cancel).await?;
			retired = RetiredWorkerSignal::from_detach(report);
		}
		cell.set_body(body);
		cell.clear_replaced();
		Ok(Upsert::Replaced { retired })
	}

	/// Takes the alarm out of the registry once no worker references it.
	///
	/// `Ok(None)` when no alarm has this key.
	pub async fn remove(
		&mut self,
		key: AlarmKey,
		handshake: &mut HandshakeGuard<'_>,
		cancel: &CancellationToken,
	) -> Result<Option<Removed>, Interrupted> {
		let Some(&id) = self.order.get(&key) else {
			return Ok(None);
		};

		let cell = Arc::clone(self.cell(id));
		let mut retired = None;
		if cell.is_assigned() {
			cell.mark_cancelled();
			let report = handshake.await_detach(&cell, cancel).await?;
			retired = RetiredWorkerSignal::from_detach(report);
		}
		self.order.remove(&key);
		let cell = self.arena.remove(id.0);
		Ok(Some(Removed {
			alarm: cell.snapshot(),
			retired,
		}))
	}
}

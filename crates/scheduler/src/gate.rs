//! Reader/writer gate built from two binary semaphores.
//!
//! Arriving readers queue on `entry`. The first reader of a batch takes the
//! `turnstile` on behalf of every reader and the last one out hands it back;
//! a writer takes the `turnstile` directly. Readers share, the writer is
//! exclusive, and a waiting writer gets no priority: a steady stream of
//! overlapping readers can starve it.

use std::cell::UnsafeCell;
use std::ops::{Deref, DerefMut};

use parking_lot::Mutex;
use tokio::sync::{Semaphore, SemaphorePermit, TryAcquireError};

/// The gate was closed; no further access will be granted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct GateClosed;

pub(crate) struct Gate<T> {
	entry: Semaphore,
	turnstile: Semaphore,
	/// Active readers. Only touched for the count update itself, never across an await.
	readers: Mutex<usize>,
	data: UnsafeCell<T>,
}

// SAFETY: `data` is only reached through `ReadGuard` (shared, while the
// readers collectively own the turnstile) or `WriteGuard` (exclusive, while
// the writer owns the turnstile permit). The turnstile has one permit, so
// the two never overlap.
unsafe impl<T: Send> Send for Gate<T> {}
unsafe impl<T: Send + Sync> Sync for Gate<T> {}

impl<T> Gate<T> {
	/// Creates a new open gate around `data`.
	pub fn new(data: T) -> Self {
		Self {
			entry: Semaphore::new(1),
			turnstile: Semaphore::new(1),
			readers: Mutex::new(0),
			data: UnsafeCell::new(data),
		}
	}

	/// Shared access. Cancel-safe: dropping the future before it resolves
	/// leaves the reader count untouched.
	pub async fn read(&self) -> Result<ReadGuard<'_, T>, GateClosed> {
		let _entry = self.entry.acquire().await.map_err(|_| GateClosed)?;
		{
			let mut readers = self.readers.lock();
			if *readers > 0 {
				*readers += 1;
				return Ok(ReadGuard { gate: self });
			}
		}
		self.turnstile.acquire().await.map_err(|_| GateClosed)?.forget();
		*self.readers.lock() += 1;
		Ok(ReadGuard { gate: self })
	}

	/// Shared access without waiting. `None` while a writer holds or is
	/// queued ahead, or once the gate is closed.
	pub fn try_read(&self) -> Option<ReadGuard<'_, T>> {
		let _entry = self.entry.try_acquire().ok()?;
		let mut readers = self.readers.lock();
		if *readers == 0 {
			match self.turnstile.try_acquire() {
				Ok(permit) => permit.forget(),
				Err(TryAcquireError::NoPermits | TryAcquireError::Closed) => return None,
			}
		}
		*readers += 1;
		Some(ReadGuard { gate: self })
	}

	/// Exclusive access.
	pub async fn write(&self) -> Result<WriteGuard<'_, T>, GateClosed> {
		let permit = self.turnstile.acquire().await.map_err(|_| GateClosed)?;
		Ok(WriteGuard { gate: self, _permit: permit })
	}

	/// Fails every pending and future acquisition. Held guards stay valid.
	pub fn close(&self) {
		self.entry.close();
		self.turnstile.close();
	}

	fn release_read(&self) {
		let mut readers = self.readers.lock();
		*readers -= 1;
		if *readers == 0 {
			self.turnstile.add_permits(1);
		}
	}
}

pub(crate) struct ReadGuard<'a, T> {
	gate: &'a Gate<T>,
}

impl<T> Deref for ReadGuard<'_, T> {
	type Target = T;

	fn deref(&self) -> &T {
		// SAFETY: readers hold the turnstile, so no writer is active.
		unsafe { &*self.gate.data.get() }
	}
}

impl<T> Drop for ReadGuard<'_, T> {
	fn drop(&mut self) {
		self.gate.release_read();
	}
}

pub(crate) struct WriteGuard<'a, T> {
	gate: &'a Gate<T>,
	_permit: SemaphorePermit<'a>,
}

impl<T> Deref for WriteGuard<'_, T> {
	type Target = T;

	fn deref(&self) -> &T {
		// SAFETY: the writer owns the only turnstile permit.
		unsafe { &*self.gate.data.get() }
	}
}

impl<T> DerefMut for WriteGuard<'_, T> {
	fn deref_mut(&mut self) -> &mut T {
		// SAFETY: as above, and `&mut self` rules out aliasing through this guard.
		unsafe { &mut *self.gate.data.get() }
	}
}

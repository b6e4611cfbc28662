//! Reentrant, writer-preferring reader-writer lock.
//!
//! `std::sync::RwLock` and `parking_lot::RwLock` are neither reentrant nor
//! writer-preferring, so every entity that needs the semantics from the
//! concurrency model (Device, SpanChain, Document) shares this hand-rolled
//! lock instead. Ported from the condition-variable algorithm in
//! `readwritelock.cpp`: a mutex guards a small bookkeeping struct, and two
//! condvars wake waiting readers/writers.

use std::collections::VecDeque;
use std::thread::ThreadId;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use rustc_hash::FxHashMap;

struct LockState {
	active_writer: Option<ThreadId>,
	write_depth: u32,
	readers: FxHashMap<ThreadId, u32>,
	pending_writers: VecDeque<ThreadId>,
}

impl LockState {
	fn can_read_now(&self, tid: ThreadId) -> bool {
		self.readers.contains_key(&tid)
			|| self.active_writer == Some(tid)
			|| (self.active_writer.is_none() && self.pending_writers.is_empty())
	}

	fn has_parallel_readers(&self, tid: ThreadId) -> bool {
		self.readers
			.keys()
			.any(|&other| other != tid && !self.pending_writers.contains(&other))
	}

	fn can_write_now(&self, tid: ThreadId) -> bool {
		self.active_writer == Some(tid)
			|| (self.active_writer.is_none() && !self.has_parallel_readers(tid))
			|| (self.readers.contains_key(&tid) && !self.has_parallel_readers(tid))
	}
}

/// How long a `try_lock_*` call should wait before giving up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockTimeout {
	/// Block until the lock is acquired (the `timeout = -1` case in the spec).
	Block,
	/// Acquire only if immediately available (the `timeout = 0` case).
	Immediate,
	/// Wait up to the given duration.
	After(Duration),
}

/// Reentrant multi-reader / single-writer lock with writer preference.
///
/// A thread already holding the lock (in either mode) may reacquire it in
/// either mode without deadlocking itself. A thread holding only a read
/// lock may upgrade to write if it is the sole active reader (ignoring
/// other readers that are themselves waiting to upgrade).
pub struct ReadWriteLock {
	state: Mutex<LockState>,
	can_read: Condvar,
	can_write: Condvar,
}

impl Default for ReadWriteLock {
	fn default() -> Self {
		Self::new()
	}
}

impl ReadWriteLock {
	pub fn new() -> Self {
		Self {
			state: Mutex::new(LockState {
				active_writer: None,
				write_depth: 0,
				readers: FxHashMap::default(),
				pending_writers: VecDeque::new(),
			}),
			can_read: Condvar::new(),
			can_write: Condvar::new(),
		}
	}

	/// Blocks until a read lock is acquired.
	pub fn lock_read(&self) -> ReadGuard<'_> {
		self.acquire_read(LockTimeout::Block);
		ReadGuard { lock: self }
	}

	/// Blocks until a write lock is acquired.
	pub fn lock_write(&self) -> WriteGuard<'_> {
		self.acquire_write(LockTimeout::Block);
		WriteGuard { lock: self }
	}

	/// Attempts to acquire a read lock within `timeout`.
	pub fn try_lock_read(&self, timeout: LockTimeout) -> Option<ReadGuard<'_>> {
		self.acquire_read(timeout).then(|| ReadGuard { lock: self })
	}

	/// Attempts to acquire a write lock within `timeout`.
	pub fn try_lock_write(&self, timeout: LockTimeout) -> Option<WriteGuard<'_>> {
		self.acquire_write(timeout)
			.then(|| WriteGuard { lock: self })
	}

	fn acquire_read(&self, timeout: LockTimeout) -> bool {
		let tid = std::thread::current().id();
		let mut state = self.state.lock();

		let ok = if state.can_read_now(tid) {
			true
		} else {
			match timeout {
				LockTimeout::Immediate => false,
				LockTimeout::Block => {
					self.can_read
						.wait_while(&mut state, |s| !s.can_read_now(tid));
					true
				}
				LockTimeout::After(duration) => {
					let deadline = Instant::now() + duration;
					loop {
						if state.can_read_now(tid) {
							break true;
						}
						let remaining = deadline.saturating_duration_since(Instant::now());
						if remaining.is_zero() {
							break state.can_read_now(tid);
						}
						self.can_read.wait_for(&mut state, remaining);
					}
				}
			}
		};

		if ok {
			*state.readers.entry(tid).or_insert(0) += 1;
		}
		ok
	}

	fn acquire_write(&self, timeout: LockTimeout) -> bool {
		let tid = std::thread::current().id();
		let mut state = self.state.lock();

		let ok = if state.can_write_now(tid) {
			true
		} else {
			match timeout {
				LockTimeout::Immediate => false,
				LockTimeout::Block => {
					state.pending_writers.push_back(tid);
					self.can_write
						.wait_while(&mut state, |s| !s.can_write_now(tid));
					state.pending_writers.retain(|&w| w != tid);
					true
				}
				LockTimeout::After(duration) => {
					state.pending_writers.push_back(tid);
					let deadline = Instant::now() + duration;
					let acquired = loop {
						if state.can_write_now(tid) {
							break true;
						}
						let remaining = deadline.saturating_duration_since(Instant::now());
						if remaining.is_zero() {
							break state.can_write_now(tid);
						}
						self.can_write.wait_for(&mut state, remaining);
					};
					state.pending_writers.retain(|&w| w != tid);
					acquired
				}
			}
		};

		if ok {
			state.active_writer = Some(tid);
			state.write_depth += 1;
		}
		ok
	}

	fn unlock_read(&self) {
		let tid = std::thread::current().id();
		let mut state = self.state.lock();
		let depth = state
			.readers
			.get_mut(&tid)
			.expect("unlocking ReadWriteLock that was not locked for read by this thread");
		*depth -= 1;
		if *depth == 0 {
			state.readers.remove(&tid);
			if state.active_writer.is_none() && !state.has_parallel_readers(tid) {
				self.can_write.notify_one();
			}
		}
	}

	fn unlock_write(&self) {
		let tid = std::thread::current().id();
		let mut state = self.state.lock();
		assert!(
			state.active_writer == Some(tid) && state.write_depth > 0,
			"unlocking ReadWriteLock that was not locked for write by this thread"
		);
		state.write_depth -= 1;
		if state.write_depth == 0 {
			state.active_writer = None;
			if state.pending_writers.is_empty() {
				self.can_read.notify_all();
			} else {
				self.can_write.notify_one();
			}
		}
	}
}

/// RAII read-lock guard. Dropping it releases one level of read recursion.
pub struct ReadGuard<'a> {
	lock: &'a ReadWriteLock,
}

impl Drop for ReadGuard<'_> {
	fn drop(&mut self) {
		self.lock.unlock_read();
	}
}

/// RAII write-lock guard. Dropping it releases one level of write recursion.
pub struct WriteGuard<'a> {
	lock: &'a ReadWriteLock,
}

impl Drop for WriteGuard<'_> {
	fn drop(&mut self) {
		self.lock.unlock_write();
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::sync::Arc;
	use std::sync::atomic::{AtomicUsize, Ordering};

	#[test]
	fn two_readers_proceed_concurrently() {
		let lock = Arc::new(ReadWriteLock::new());
		let concurrent = Arc::new(AtomicUsize::new(0));
		let max_concurrent = Arc::new(AtomicUsize::new(0));

		let mut handles = Vec::new();
		for _ in 0..4 {
			let lock = lock.clone();
			let concurrent = concurrent.clone();
			let max_concurrent = max_concurrent.clone();
			handles.push(std::thread::spawn(move || {
				let _guard = lock.lock_read();
				let now = concurrent.fetch_add(1, Ordering::SeqCst) + 1;
				max_concurrent.fetch_max(now, Ordering::SeqCst);
				std::thread::sleep(Duration::from_millis(20));
				concurrent.fetch_sub(1, Ordering::SeqCst);
			}));
		}
		for h in handles {
			h.join().unwrap();
		}
		assert!(max_concurrent.load(Ordering::SeqCst) > 1);
	}

	#[test]
	fn writer_blocks_until_readers_release() {
		let lock = Arc::new(ReadWriteLock::new());
		let reader_guard = lock.lock_read();
		assert!(
			lock.try_lock_write(LockTimeout::Immediate).is_none(),
			"writer must not acquire while a reader is active"
		);
		drop(reader_guard);
		assert!(lock.try_lock_write(LockTimeout::Immediate).is_some());
	}

	#[test]
	fn reentrant_read_and_upgrade_when_sole_reader() {
		let lock = ReadWriteLock::new();
		let _r1 = lock.lock_read();
		let _r2 = lock.lock_read();
		// sole reader (same thread held both) may upgrade
		let w = lock.try_lock_write(LockTimeout::Immediate);
		assert!(w.is_some());
	}
}

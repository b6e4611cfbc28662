//! The editable document: a span chain plus undo history and save
//! orchestration, ported from `document.h`/`document.cpp`.
//!
//! `Document` is the seam every editing operation goes through: it records
//! undo actions, stamps new content with the current atomic-operation index,
//! and tracks whether each byte has changed since the last save.

pub mod undo;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use tracing::{debug, info};

use crate::chain::SpanChain;
use crate::device::Device;
use crate::error::{HexError, Result};
use crate::lock::ReadWriteLock;
use crate::span::{DeviceSpanWrapper, PrimitiveInner, Span};

use undo::{UndoAction, UndoStack};

/// Notified whenever a document's content or dirty state changes. The
/// original's Qt-signal surface (`dataChanged`, `undoStackChanged`, ...)
/// collapses to a single callback here; UI layers that want finer-grained
/// signals can inspect what changed from the `Document` itself.
pub trait DocumentObserver: Send + Sync {
	fn on_changed(&self, doc: &Document);
}

/// A read-only snapshot of a byte range, backed entirely by `DataSpan`s.
/// Mirrors `createConstantFrame`.
pub struct ConstantFrame {
	chain: SpanChain,
}

impl ConstantFrame {
	pub fn length(&self) -> u64 {
		self.chain.length()
	}

	pub fn read(&self, offset: u64, length: u64) -> Result<Vec<u8>> {
		self.chain.read(offset, length)
	}
}

/// The editable document itself.
pub struct Document {
	device: Mutex<Arc<Device>>,
	chain: SpanChain,
	lock: ReadWriteLock,
	read_only: AtomicBool,
	fixed_size: AtomicBool,
	current_atomic_op_index: AtomicU64,
	savepoint: AtomicU64,
	undo: Mutex<UndoStack>,
	observers: Mutex<Vec<Weak<dyn DocumentObserver>>>,
}

impl Document {
	/// Opens `device` as a document whose initial content is that device's
	/// full range, wrapped as a single `DeviceSpan` at savepoint 0 (one
	/// primitive covering the whole device, inside an identity-preserving
	/// wrapper, matching the shape a save leaves behind).
	pub fn new(device: Arc<Device>) -> Result<Arc<Document>> {
		let read_only = device.is_read_only();
		let fixed_size = device.is_fixed_size();
		let primitive = PrimitiveInner::new(device.clone(), 0, device.len())?;
		let inner = SpanChain::from_entries(vec![(Span::Primitive(primitive), 0)]);
		let chain = SpanChain::from_entries(vec![(Span::Device(DeviceSpanWrapper::new(inner)), 0)]);
		info!(url = device.url(), len = device.len(), "document opened");
		Ok(Arc::new(Document {
			device: Mutex::new(device),
			chain,
			lock: ReadWriteLock::new(),
			read_only: AtomicBool::new(read_only),
			fixed_size: AtomicBool::new(fixed_size),
			current_atomic_op_index: AtomicU64::new(0),
			savepoint: AtomicU64::new(0),
			undo: Mutex::new(UndoStack::new()),
			observers: Mutex::new(Vec::new()),
		}))
	}

	pub fn device(&self) -> Arc<Device> {
		self.device.lock().unwrap().clone()
	}

	pub fn chain(&self) -> &SpanChain {
		&self.chain
	}

	pub fn lock(&self) -> &ReadWriteLock {
		&self.lock
	}

	pub fn length(&self) -> u64 {
		self.chain.length()
	}

	pub fn is_read_only(&self) -> bool {
		self.read_only.load(Ordering::Acquire)
	}

	pub fn is_fixed_size(&self) -> bool {
		self.fixed_size.load(Ordering::Acquire)
	}

	pub fn add_observer(&self, observer: Weak<dyn DocumentObserver>) {
		self.observers.lock().unwrap().push(observer);
	}

	fn notify(&self) {
		let mut observers = self.observers.lock().unwrap();
		observers.retain(|o| o.upgrade().is_some());
		for observer in observers.iter() {
			if let Some(observer) = observer.upgrade() {
				observer.on_changed(self);
			}
		}
	}

	fn ensure_writable(&self) -> Result<()> {
		if self.is_read_only() {
			return Err(HexError::ReadOnly { scope: "document" });
		}
		Ok(())
	}

	fn ensure_resizable(&self) -> Result<()> {
		self.ensure_writable()?;
		if self.is_fixed_size() {
			return Err(HexError::FrozenSize { scope: "document" });
		}
		Ok(())
	}

	/// Moves the atomic-op counter one step and returns the new value: +1 for
	/// a forward mutation, -1 while replaying an undo. Every primitive
	/// mutation (insert or remove, recorded or raw) calls this once, per
	/// spec §4.4; forward inserts stamp their new entries with the returned
	/// value.
	fn bump_op_index(&self, undo: bool) -> u64 {
		if undo {
			self.current_atomic_op_index.fetch_sub(1, Ordering::AcqRel) - 1
		} else {
			self.current_atomic_op_index.fetch_add(1, Ordering::AcqRel) + 1
		}
	}

	pub fn read(&self, offset: u64, length: u64) -> Result<Vec<u8>> {
		let _guard = self.lock.lock_read();
		self.chain.read(offset, length)
	}

	pub fn read_all(&self) -> Result<Vec<u8>> {
		self.read(0, self.length())
	}

	// -- recording operations -------------------------------------------

	pub fn insert_span(&self, offset: u64, span: Span) -> Result<()> {
		self.insert_chain(offset, SpanChain::from_spans(vec![span]))
	}

	/// If `offset` lands past the current end, the gap is padded with a
	/// zero-filled `FillSpan` before `chain` is spliced in, so the inserted
	/// region always starts exactly at the (possibly just-extended) end.
	pub fn insert_chain(&self, offset: u64, chain: SpanChain) -> Result<()> {
		self.ensure_resizable()?;
		let _guard = self.lock.lock_write();
		let current_len = self.length();
		let (splice_offset, to_insert) = if offset > current_len {
			let gap = offset - current_len;
			let padded = SpanChain::from_spans(vec![Span::Fill(crate::span::FillSpan::new(0, gap))]);
			padded.append_chain(chain)?;
			(current_len, padded)
		} else {
			(offset, chain)
		};
		let snapshot = to_insert.deep_clone();
		self.insert_chain_locked(splice_offset, to_insert, false)?;
		self.undo.lock().unwrap().record(UndoAction::Insert {
			offset: splice_offset,
			inserted: snapshot,
		});
		self.notify();
		Ok(())
	}

	pub fn append_span(&self, span: Span) -> Result<()> {
		self.insert_span(self.length(), span)
	}

	pub fn append_chain(&self, chain: SpanChain) -> Result<()> {
		self.insert_chain(self.length(), chain)
	}

	pub fn remove(&self, offset: u64, length: u64) -> Result<()> {
		self.ensure_resizable()?;
		let _guard = self.lock.lock_write();
		self.bump_op_index(false);
		let removed = self.chain.remove(offset, length)?;
		self.undo.lock().unwrap().record(UndoAction::Remove { offset, removed });
		self.notify();
		Ok(())
	}

	pub fn clear(&self) -> Result<()> {
		let len = self.length();
		if len == 0 {
			return Ok(());
		}
		self.remove(0, len)
	}

	/// Overwrites `min(length-offset, chain.length())` bytes starting at
	/// `offset`, growing the document by whatever remainder doesn't fit.
	/// `offset` past the current end pads the gap with a zero-filled
	/// `FillSpan` first, same as [`Self::insert_chain`]. Growth requires the
	/// document to be resizable even though a pure in-bounds overwrite only
	/// requires it to be writable.
	pub fn write_chain(&self, offset: u64, chain: SpanChain) -> Result<()> {
		self.ensure_writable()?;
		let _guard = self.lock.lock_write();
		let current_len = self.length();
		let write_len = chain.length();
		if offset > current_len || offset + write_len > current_len {
			self.ensure_resizable()?;
		}

		if offset >= current_len {
			let gap = offset - current_len;
			let padded = SpanChain::from_spans(vec![Span::Fill(crate::span::FillSpan::new(0, gap))]);
			padded.append_chain(chain)?;
			let snapshot = padded.deep_clone();
			self.insert_chain_locked(current_len, padded, false)?;
			self.undo.lock().unwrap().record(UndoAction::Insert {
				offset: current_len,
				inserted: snapshot,
			});
			self.notify();
			return Ok(());
		}

		let overwrite_len = write_len.min(current_len - offset);
		self.bump_op_index(false);
		let old = self.chain.remove(offset, overwrite_len)?;
		let snapshot = chain.deep_clone();
		self.insert_chain_locked(offset, chain, false)?;
		self.undo.lock().unwrap().record(UndoAction::Write {
			offset,
			old,
			new: snapshot,
		});
		self.notify();
		Ok(())
	}

	pub fn write_span(&self, offset: u64, span: Span) -> Result<()> {
		self.write_chain(offset, SpanChain::from_spans(vec![span]))
	}

	/// Inserts `chain`, stamping every entry with a freshly bumped atomic-op
	/// index (forward for `undo == false`, backward while replaying an undo).
	/// Does not record an undo action; callers do that themselves so that
	/// `write_chain` can share this with a single combined action.
	fn insert_chain_locked(&self, offset: u64, chain: SpanChain, undo: bool) -> Result<()> {
		let stamp = self.bump_op_index(undo);
		let entries: Vec<(Span, u64)> = chain.take_entries().into_iter().map(|(span, _)| (span, stamp)).collect();
		self.chain.insert_chain(offset, SpanChain::from_entries(entries))
	}

	// -- raw (non-recording) operations, used by undo/redo ---------------

	/// Like [`Self::remove`] but does not touch the undo stack. Public only
	/// within the crate; `undo::UndoAction` calls this to replay history,
	/// passing `undo` according to which direction it's replaying.
	pub(crate) fn remove_raw(&self, offset: u64, length: u64, undo: bool) -> Result<SpanChain> {
		self.bump_op_index(undo);
		let removed = self.chain.remove(offset, length)?;
		self.notify();
		Ok(removed)
	}

	pub(crate) fn insert_chain_raw(&self, offset: u64, chain: SpanChain, undo: bool) -> Result<()> {
		self.insert_chain_locked(offset, chain, undo)?;
		self.notify();
		Ok(())
	}

	// -- undo/redo --------------------------------------------------------

	pub fn can_undo(&self) -> bool {
		self.undo.lock().unwrap().can_undo()
	}

	pub fn can_redo(&self) -> bool {
		self.undo.lock().unwrap().can_redo()
	}

	pub fn undo(&self) -> Result<()> {
		self.ensure_writable()?;
		let _guard = self.lock.lock_write();
		// UndoStack::undo replays through remove_raw/insert_chain_raw, which
		// need the document but must not re-enter its own lock; the write
		// guard above is reentrant for this thread so that's fine.
		let mut undo = self.undo.lock().unwrap();
		undo.undo(self)
	}

	pub fn redo(&self, branch_id: Option<u64>) -> Result<()> {
		self.ensure_writable()?;
		let _guard = self.lock.lock_write();
		let mut undo = self.undo.lock().unwrap();
		undo.redo(self, branch_id)
	}

	pub fn alternative_branch_ids(&self) -> smallvec::SmallVec<[u64; 2]> {
		self.undo.lock().unwrap().alternative_branch_ids()
	}

	pub fn begin_complex_action(&self, title: Option<String>) {
		self.undo.lock().unwrap().begin_complex(title);
	}

	pub fn end_complex_action(&self) -> Result<()> {
		self.undo.lock().unwrap().end_complex()
	}

	// -- modification tracking --------------------------------------------

	pub fn is_range_modified(&self, offset: u64, length: u64) -> Result<bool> {
		self.chain.is_range_modified(offset, length, self.savepoint.load(Ordering::Acquire))
	}

	pub fn is_modified(&self) -> bool {
		self.current_atomic_op_index.load(Ordering::Acquire) != self.savepoint.load(Ordering::Acquire)
	}

	/// Stamps every entry with the current atomic-op index and records it as
	/// the document's savepoint, clearing `is_modified`. Called once a save
	/// commits.
	pub fn set_savepoint(&self) {
		let index = self.current_atomic_op_index.load(Ordering::Acquire);
		self.chain.set_common_savepoint(index);
		self.savepoint.store(index, Ordering::Release);
	}

	pub(crate) fn mark_savepoint_value(&self, value: u64) {
		self.savepoint.store(value, Ordering::Release);
	}

	pub(crate) fn current_op_index(&self) -> u64 {
		self.current_atomic_op_index.load(Ordering::Acquire)
	}

	// -- export / framing ---------------------------------------------------

	/// Copies `[offset, offset+length)` out as its own chain. If the result
	/// would need more than `ram_limit` bytes of fresh `DataSpan` material
	/// (0 meaning unlimited), existing device-backed spans are kept as-is
	/// rather than materialized, matching `exportRange`'s RAM ceiling.
	pub fn export_range(&self, offset: u64, length: u64, ram_limit: u64) -> Result<SpanChain> {
		let entries = self.chain.entries_in_range(offset, length)?;
		if ram_limit == 0 {
			return Ok(SpanChain::from_entries(entries));
		}
		let mut budget = ram_limit;
		let mut out = Vec::with_capacity(entries.len());
		for (span, savepoint) in entries {
			match &span {
				Span::Data(_) | Span::Fill(_) => out.push((span, savepoint)),
				_ => {
					let len = span.length();
					if len <= budget {
						let bytes = span.read(0, len)?;
						budget -= len;
						out.push((Span::Data(crate::span::DataSpan::new(bytes)), savepoint));
					} else {
						out.push((span, savepoint));
					}
				}
			}
		}
		Ok(SpanChain::from_entries(out))
	}

	/// Builds a read-only, fully materialized snapshot of `[offset,
	/// offset+length)`. Mirrors `createConstantFrame`.
	pub fn create_constant_frame(&self, offset: u64, length: u64) -> Result<ConstantFrame> {
		let entries = self.chain.entries_in_range(offset, length)?;
		let mut materialized = Vec::with_capacity(entries.len());
		for (span, savepoint) in entries {
			let len = span.length();
			let bytes = span.read(0, len)?;
			materialized.push((Span::Data(crate::span::DataSpan::new(bytes)), savepoint));
		}
		Ok(ConstantFrame {
			chain: SpanChain::from_entries(materialized),
		})
	}

	// -- saving -------------------------------------------------------------

	/// True iff every `Span::Primitive` entry in the main chain that
	/// references this document's own device already sits at its final
	/// on-device position. Non-primitive entries (inserted `Data`/`Fill`
	/// spans, or primitives of a different device) don't block this: a
	/// quick save still writes those, it just skips the bytes that are
	/// already physically in place.
	pub fn check_can_quick_save(&self) -> bool {
		let device = self.device();
		let mut pos = 0u64;
		for (_, span) in self.chain.iter_leaf_spans() {
			let len = span.length();
			if let Span::Primitive(p) = &span {
				if Arc::ptr_eq(p.device(), &device) && p.offset() != pos {
					return false;
				}
			}
			pos += len;
		}
		true
	}

	/// Saves this document. `write_device` defaults to the document's own
	/// device; `switch_devices` controls whether, after writing to a
	/// different device, this document rebinds to it (matching `save`'s
	/// `switchToDevice` flag).
	pub fn save(self: &Arc<Self>, write_device: Option<Arc<Device>>, switch_devices: bool) -> Result<()> {
		let _guard = self.lock.lock_write();
		debug!(switch_devices, "document save requested");
		crate::save::save(self, write_device, switch_devices)
	}

	pub(crate) fn rebind_device(&self, device: Arc<Device>) {
		*self.device.lock().unwrap() = device;
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::device::buffer::open_buffer;

	fn doc(bytes: &[u8]) -> Arc<Document> {
		Document::new(open_buffer(bytes.to_vec(), false)).unwrap()
	}

	#[test]
	fn insert_and_read_back() {
		let document = doc(b"hello");
		document.insert_span(5, Span::Data(crate::span::DataSpan::new(b" world".to_vec()))).unwrap();
		assert_eq!(document.read_all().unwrap(), b"hello world");
		assert!(document.is_modified());
	}

	#[test]
	fn remove_then_undo_restores_content() {
		let document = doc(b"hello world");
		document.remove(5, 6).unwrap();
		assert_eq!(document.read_all().unwrap(), b"hello");
		document.undo().unwrap();
		assert_eq!(document.read_all().unwrap(), b"hello world");
	}

	#[test]
	fn undo_redo_round_trip_on_write() {
		let document = doc(b"0123456789");
		document.write_span(2, Span::Data(crate::span::DataSpan::new(b"XY".to_vec()))).unwrap();
		assert_eq!(document.read_all().unwrap(), b"01XY456789");
		document.undo().unwrap();
		assert_eq!(document.read_all().unwrap(), b"0123456789");
		document.redo(None).unwrap();
		assert_eq!(document.read_all().unwrap(), b"01XY456789");
	}

	#[test]
	fn fresh_document_is_not_modified() {
		let document = doc(b"abc");
		assert!(!document.is_modified());
		assert!(!document.is_range_modified(0, 3).unwrap());
	}

	#[test]
	fn modification_clears_after_set_savepoint() {
		let document = doc(b"abc");
		document.append_span(Span::Data(crate::span::DataSpan::new(b"def".to_vec()))).unwrap();
		assert!(document.is_modified());
		document.set_savepoint();
		assert!(!document.is_modified());
		assert!(!document.is_range_modified(0, 6).unwrap());
	}

	#[test]
	fn quick_save_detects_untouched_document() {
		let document = doc(b"abcdef");
		assert!(document.check_can_quick_save());
		document.insert_span(2, Span::Data(crate::span::DataSpan::new(b"XY".to_vec()))).unwrap();
		assert!(!document.check_can_quick_save());
	}

	#[test]
	fn write_past_end_pads_with_zero_fill() {
		let document = Document::new(open_buffer(Vec::new(), false)).unwrap();
		document.write_span(100, Span::Data(crate::span::DataSpan::new(b"Hi!".to_vec()))).unwrap();
		assert_eq!(document.length(), 103);
		let mut expected = vec![0u8; 100];
		expected.extend_from_slice(b"Hi!");
		assert_eq!(document.read_all().unwrap(), expected);
		document.undo().unwrap();
		assert_eq!(document.length(), 0);
	}

	#[test]
	fn insert_past_end_pads_with_zero_fill() {
		let document = doc(b"ab");
		document.insert_span(5, Span::Data(crate::span::DataSpan::new(b"Z".to_vec()))).unwrap();
		assert_eq!(document.read_all().unwrap(), b"ab\0\0\0Z");
		document.undo().unwrap();
		assert_eq!(document.read_all().unwrap(), b"ab");
	}

	#[test]
	fn write_overlapping_end_grows_document() {
		let document = doc(b"0123456789");
		document.write_span(8, Span::Data(crate::span::DataSpan::new(b"XYZ".to_vec()))).unwrap();
		assert_eq!(document.read_all().unwrap(), b"01234567XYZ");
	}

	#[test]
	fn remove_bumps_modified_state_and_undo_clears_it() {
		let document = doc(b"hello world");
		assert!(!document.is_modified());
		document.remove(5, 6).unwrap();
		assert!(document.is_modified());
		document.undo().unwrap();
		assert!(!document.is_modified());
		assert_eq!(document.read_all().unwrap(), b"hello world");
	}

	#[test]
	fn redo_after_undo_restores_modified_state() {
		let document = doc(b"0123456789");
		document.write_span(2, Span::Data(crate::span::DataSpan::new(b"XY".to_vec()))).unwrap();
		document.set_savepoint();
		assert!(!document.is_modified());
		document.undo().unwrap();
		assert!(document.is_modified());
		document.redo(None).unwrap();
		assert!(!document.is_modified());
	}
}

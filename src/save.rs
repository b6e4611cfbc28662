//! Save and dissolution: writing a document's current content back to
//! storage, and updating every live span that pointed at the rewritten
//! bytes so they keep reading the right data afterwards.
//!
//! Ported from `Document::save`/`_prepareToUpdateDevice` in `document.cpp`.
//! The original's `_prepareToUpdateDevice` is an empty stub (the original
//! never implemented in-place dissolution); the Saved-Ranges algorithm below
//! is new code built from the documented save/dissolve contract rather than
//! ported from an existing body.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::chain::SpanChain;
use crate::device::saver::{FileSaver, QuickFileSaver, Saver, StandardSaver};
use crate::device::{Device, FileLoadOptions};
use crate::document::Document;
use crate::error::Result;
use crate::span::{DataSpan, DeviceSpanWrapper, PrimitiveInner, Span};

/// A surviving run of device bytes: `[old_pos, old_pos+length)` on the
/// current device moves to `[new_pos, new_pos+length)` after the save.
struct SavedRange {
	old_pos: u64,
	new_pos: u64,
	length: u64,
}

/// Scans the document's main chain for every primitive span that
/// references `write_device`, recording where its bytes currently live and
/// where they'll live once the save completes.
fn build_saved_ranges(doc: &Document, write_device: &Arc<Device>) -> Vec<SavedRange> {
	let mut ranges = Vec::new();
	let mut pos = 0u64;
	for (_, span) in doc.chain().iter_leaf_spans() {
		let len = span.length();
		if let Span::Primitive(p) = &span {
			if Arc::ptr_eq(p.device(), write_device) {
				ranges.push(SavedRange {
					old_pos: p.offset(),
					new_pos: pos,
					length: len,
				});
			}
		}
		pos += len;
	}
	ranges
}

/// First Saved Range (in scan order) covering `pos`, if any.
fn range_covering(ranges: &[SavedRange], pos: u64) -> Option<&SavedRange> {
	ranges.iter().find(|r| pos >= r.old_pos && pos < r.old_pos + r.length)
}

/// Nearest Saved Range starting strictly after `pos`, if any.
fn next_range_after(ranges: &[SavedRange], pos: u64) -> Option<&SavedRange> {
	ranges.iter().filter(|r| r.old_pos > pos).min_by_key(|r| r.old_pos)
}

/// Computes the replacement spans for one live primitive span of
/// `write_device`, per the Saved-Ranges algorithm: runs that land inside a
/// Saved Range become fresh primitives at the new position; everything else
/// is read out and materialized into a `DataSpan` before the device
/// underneath it is touched.
fn plan_replacement(
	primitive: &Arc<PrimitiveInner>,
	ranges: &[SavedRange],
	write_device: &Arc<Device>,
	device_len: u64,
) -> Result<Vec<Span>> {
	let mut out = Vec::new();
	let span_end = primitive.offset() + primitive.length();
	let mut cur = primitive.offset();

	while cur < span_end {
		if let Some(range) = range_covering(ranges, cur) {
			let run_end = (range.old_pos + range.length).min(span_end);
			let run_len = run_end - cur;
			let new_pos = range.new_pos + (cur - range.old_pos);
			let fresh = PrimitiveInner::new(write_device.clone(), new_pos, run_len)?;
			out.push(Span::Primitive(fresh));
			cur = run_end;
		} else {
			let closest = next_range_after(ranges, cur).map(|r| r.old_pos);
			let limit = [span_end, closest.unwrap_or(span_end), device_len]
				.into_iter()
				.min()
				.unwrap();
			let run_len = limit - cur;
			if run_len == 0 {
				// A Saved Range starts exactly at `cur` but wasn't picked up
				// by `range_covering` (zero-length edge case); skip forward
				// to avoid spinning.
				cur += 1;
				continue;
			}
			let bytes = primitive.device().read(cur, run_len)?;
			out.push(Span::Data(DataSpan::new(bytes)));
			cur += run_len;
		}
	}
	Ok(out)
}

/// Stages a dissolve on every still-live primitive span of `write_device`
/// (across this document's chain, its undo history, and any other document
/// sharing the device), returning the staged spans so they can be committed
/// or cancelled as a group.
fn stage_dissolution(write_device: &Arc<Device>, ranges: &[SavedRange]) -> Result<Vec<Arc<PrimitiveInner>>> {
	let device_len = write_device.len();
	let mut staged = Vec::new();
	for primitive in write_device.live_spans() {
		let replacement = plan_replacement(&primitive, ranges, write_device, device_len)?;
		primitive.prepare_dissolve(replacement);
		staged.push(primitive);
	}
	Ok(staged)
}

fn cancel_all(staged: &[Arc<PrimitiveInner>]) {
	for primitive in staged {
		primitive.cancel_dissolve();
	}
}

fn commit_all(staged: &[Arc<PrimitiveInner>]) -> Result<()> {
	for primitive in staged {
		primitive.dissolve()?;
	}
	Ok(())
}

/// Runs `saver` over every chunk of `chain`, in chain order.
///
/// Every span is read out to a `Vec<u8>` *before* `saver.begin()` runs, since
/// `begin()` (e.g. `StandardSaver::begin`) may truncate the destination
/// device — and that device can be the very one some of `chain`'s spans
/// still read from. Reading first means the truncation can never outrun a
/// not-yet-copied span.
fn run_saver(saver: &mut dyn Saver, chain: &SpanChain) -> Result<()> {
	let mut materialized = Vec::new();
	for (pos, span) in chain.iter_spans() {
		let len = span.length();
		if len == 0 {
			continue;
		}
		materialized.push((pos, span.read(0, len)?));
	}

	saver.begin()?;
	let result = (|| -> Result<()> {
		for (pos, bytes) in &materialized {
			saver.put_bytes(*pos, bytes)?;
		}
		Ok(())
	})();
	match result {
		Ok(()) => saver.complete(),
		Err(e) => {
			saver.fail();
			Err(e)
		}
	}
}

/// True iff `span`, sitting at absolute position `pos`, is already
/// physically present at that position on `write_device` and so needs no
/// write during a quick save.
fn already_in_place(span: &Span, pos: u64, write_device: &Arc<Device>) -> bool {
	matches!(span, Span::Primitive(p) if Arc::ptr_eq(p.device(), write_device) && p.offset() == pos)
}

/// Saves in place: `write_device` is the same device the document already
/// reads from.
fn save_in_place(doc: &Arc<Document>, write_device: Arc<Device>) -> Result<()> {
	if doc.check_can_quick_save() {
		info!(url = write_device.url(), "quick save: spans already in place are skipped");
		let mut saver = QuickFileSaver::new(write_device.clone(), doc.length())?;
		let result = (|| -> Result<()> {
			for (pos, span) in doc.chain().iter_leaf_spans() {
				let len = span.length();
				if len == 0 || already_in_place(&span, pos, &write_device) {
					continue;
				}
				let bytes = span.read(0, len)?;
				saver.put_bytes(pos, &bytes)?;
			}
			Ok(())
		})();
		match result {
			Ok(()) => saver.complete()?,
			Err(e) => {
				saver.fail();
				return Err(e);
			}
		}
		doc.set_savepoint();
		return Ok(());
	}

	let ranges = build_saved_ranges(doc, &write_device);
	debug!(count = ranges.len(), "computed saved ranges");
	let staged = stage_dissolution(&write_device, &ranges)?;

	let mut saver = StandardSaver::new(write_device.clone());
	if let Err(e) = run_saver(&mut saver, doc.chain()) {
		warn!(error = %e, "save failed, cancelling dissolution");
		cancel_all(&staged);
		return Err(e);
	}

	commit_all(&staged)?;
	doc.chain().clear();
	doc.chain().append_chain(single_device_span(write_device, doc.length(), doc.current_op_index())?)?;
	doc.set_savepoint();
	Ok(())
}

/// Builds a one-entry chain holding a single `DeviceSpan` wrapping one
/// `PrimitiveDeviceSpan` covering `[0, length)` of `device` — the shape a
/// completed save leaves a document's main chain in, per the documented
/// save/dissolution contract (one outer entry, identity-preserving across
/// future dissolves).
fn single_device_span(device: Arc<Device>, length: u64, savepoint: u64) -> Result<SpanChain> {
	let primitive = PrimitiveInner::new(device, 0, length)?;
	let inner = SpanChain::from_entries(vec![(Span::Primitive(primitive), savepoint)]);
	Ok(SpanChain::from_entries(vec![(Span::Device(DeviceSpanWrapper::new(inner)), savepoint)]))
}

/// Saves to `target_device`, a device distinct from the one the document
/// currently reads from. Writes every span sequentially; if
/// `switch_devices` is set, the document rebinds to `target_device` and its
/// primitive spans on the old device are dissolved against the new one.
fn save_to_device(doc: &Arc<Document>, target_device: Arc<Device>, switch_devices: bool) -> Result<()> {
	let mut saver = StandardSaver::new(target_device.clone());
	run_saver(&mut saver, doc.chain())?;

	if switch_devices {
		let old_device = doc.device();
		let ranges = vec![SavedRange {
			old_pos: 0,
			new_pos: 0,
			length: old_device.len().min(target_device.len()),
		}];
		let staged = stage_dissolution(&old_device, &ranges)?;
		commit_all(&staged)?;
		doc.rebind_device(target_device.clone());
		doc.chain().clear();
		doc.chain().append_chain(single_device_span(target_device, doc.length(), doc.current_op_index())?)?;
	}
	doc.set_savepoint();
	Ok(())
}

/// Saves `doc`, choosing the in-place or cross-device path based on whether
/// `write_device` (defaulting to the document's own device) is the same
/// device the document currently reads from.
pub fn save(doc: &Arc<Document>, write_device: Option<Arc<Device>>, switch_devices: bool) -> Result<()> {
	let current = doc.device();
	match write_device {
		None => save_in_place(doc, current),
		Some(target) if Arc::ptr_eq(&target, &current) => save_in_place(doc, target),
		Some(target) => save_to_device(doc, target, switch_devices),
	}
}

/// Convenience wrapper: saves to a named file, using a staged temp file and
/// atomic rename (`FileSaver`) rather than writing the target directly.
/// Used for save-as and for in-place saves where quick-save's
/// preconditions don't hold and the destination is a path rather than an
/// already-open `Device`.
pub fn save_to_path(doc: &Arc<Document>, path: PathBuf, switch_devices: bool) -> Result<()> {
	let mut saver = FileSaver::new(path.clone())?;
	if let Err(e) = run_saver(&mut saver, doc.chain()) {
		return Err(e);
	}
	if switch_devices {
		let device = crate::device::file::open_file(&path, FileLoadOptions::default())?;
		doc.rebind_device(device);
	}
	doc.set_savepoint();
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::device::buffer::open_buffer;

	fn doc_over(bytes: &[u8]) -> Arc<Document> {
		Document::new(open_buffer(bytes.to_vec(), false)).unwrap()
	}

	#[test]
	fn quick_save_path_taken_when_untouched() {
		let document = doc_over(b"abcdef");
		assert!(document.check_can_quick_save());
		document.save(None, false).unwrap();
		assert_eq!(document.read_all().unwrap(), b"abcdef");
		assert!(!document.is_modified());
	}

	#[test]
	fn save_after_insert_preserves_content_and_clears_modified() {
		let document = doc_over(b"hello world");
		document.insert_span(5, Span::Data(DataSpan::new(b",".to_vec()))).unwrap();
		assert!(document.is_modified());
		document.save(None, false).unwrap();
		assert_eq!(document.read_all().unwrap(), b"hello, world");
		assert!(!document.is_modified());
		assert!(document.check_can_quick_save());
	}

	#[test]
	fn save_after_remove_shrinks_device() {
		let document = doc_over(b"0123456789");
		document.remove(2, 4).unwrap();
		document.save(None, false).unwrap();
		assert_eq!(document.read_all().unwrap(), b"016789");
		assert_eq!(document.device().len(), 6);
	}

	#[test]
	fn save_to_different_device_copies_bytes() {
		let document = doc_over(b"abcxyz");
		let target = open_buffer(Vec::new(), false);
		document.save(Some(target.clone()), false).unwrap();
		assert_eq!(target.read_all().unwrap(), b"abcxyz");
	}

	#[test]
	fn save_to_different_device_with_switch_rebinds() {
		let document = doc_over(b"abcxyz");
		let target = open_buffer(Vec::new(), false);
		document.save(Some(target.clone()), true).unwrap();
		assert!(Arc::ptr_eq(&document.device(), &target));
		assert_eq!(document.read_all().unwrap(), b"abcxyz");
	}
}

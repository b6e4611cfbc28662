//! Ordered sequence of spans forming one contiguous byte range, ported from
//! `chain.h`/`chain.cpp`.
//!
//! A `SpanChain` is a cheap-clone handle (`Arc<Mutex<ChainData>>>`) rather
//! than a value type: `Document`, the undo stack, and any `DeviceSpanWrapper`
//! all need to share and mutate the same underlying span list, and a
//! dissolving `PrimitiveInner` needs a way back to whichever chain currently
//! holds it (its `parent_chain`, mirroring `AbstractSpan::parentChain()`).
//!
//! Every entry also carries a savepoint tag (`spec.md` §3's `(span,
//! savepoint)` pair): an integer stamp a `Document` compares against its own
//! savepoint to decide whether a range has changed since the last save.

use std::sync::{Arc, Mutex, Weak};

use crate::error::{HexError, Result};
use crate::span::{PrimitiveInner, Span};

struct Entry {
	span: Span,
	savepoint: u64,
}

struct ChainData {
	entries: Vec<Entry>,
	length: u64,
}

impl ChainData {
	fn recalc_length(&mut self) {
		self.length = self.entries.iter().map(|e| e.span.length()).sum();
	}
}

/// Shared handle to a span chain.
#[derive(Clone)]
pub struct SpanChain(Arc<Mutex<ChainData>>);

/// Non-owning reference back to a chain, held by each `PrimitiveInner` so it
/// can tell its parent chain to splice in a dissolve replacement.
#[derive(Clone)]
pub struct WeakChain(Weak<Mutex<ChainData>>);

impl WeakChain {
	pub fn upgrade(&self) -> Option<SpanChain> {
		self.0.upgrade().map(SpanChain)
	}
}

impl Default for SpanChain {
	fn default() -> Self {
		Self::new()
	}
}

impl SpanChain {
	pub fn new() -> Self {
		Self::from_entries(Vec::new())
	}

	/// Builds a chain owning `spans`, all stamped with savepoint 0. Handy for
	/// tests and for content that has no meaningful modification history yet.
	pub fn from_spans(spans: Vec<Span>) -> Self {
		Self::from_entries(spans.into_iter().map(|s| (s, 0)).collect())
	}

	/// Builds a chain owning `entries`, reparenting every contained
	/// primitive span to point at the new chain.
	pub fn from_entries(entries: Vec<(Span, u64)>) -> Self {
		let entries = entries.into_iter().map(|(span, savepoint)| Entry { span, savepoint }).collect();
		let mut data = ChainData { entries, length: 0 };
		data.recalc_length();
		let chain = Self(Arc::new(Mutex::new(data)));
		let count = chain.0.lock().unwrap().entries.len();
		chain.reparent_range(0, count);
		chain
	}

	pub fn downgrade(&self) -> WeakChain {
		WeakChain(Arc::downgrade(&self.0))
	}

	pub fn length(&self) -> u64 {
		self.0.lock().unwrap().length
	}

	pub fn is_empty(&self) -> bool {
		self.length() == 0
	}

	pub fn span_count(&self) -> usize {
		self.0.lock().unwrap().entries.len()
	}

	/// Reads `[offset, offset+length)` across however many spans it spans.
	pub fn read(&self, offset: u64, length: u64) -> Result<Vec<u8>> {
		let data = self.0.lock().unwrap();
		let end = offset.checked_add(length).ok_or(HexError::Overflow)?;
		if end > data.length {
			return Err(HexError::out_of_bounds(offset, length, data.length));
		}
		let mut out = Vec::with_capacity(length as usize);
		let mut pos = 0u64;
		for entry in data.entries.iter() {
			let span_len = entry.span.length();
			let span_start = pos;
			let span_end = pos + span_len;
			pos = span_end;
			if span_end <= offset || span_start >= end {
				continue;
			}
			let local_start = offset.max(span_start) - span_start;
			let local_end = end.min(span_end) - span_start;
			out.extend(entry.span.read(local_start, local_end - local_start)?);
		}
		Ok(out)
	}

	/// Returns independent copies (with their savepoints) of the spans
	/// covering `[offset, offset+length)`, splitting partial boundary spans
	/// as needed. Does not mutate this chain. Used to materialize or export
	/// a sub-range.
	pub fn entries_in_range(&self, offset: u64, length: u64) -> Result<Vec<(Span, u64)>> {
		let data = self.0.lock().unwrap();
		let end = offset.checked_add(length).ok_or(HexError::Overflow)?;
		if end > data.length {
			return Err(HexError::out_of_bounds(offset, length, data.length));
		}
		let mut out = Vec::new();
		let mut pos = 0u64;
		for entry in data.entries.iter() {
			let span_len = entry.span.length();
			let span_start = pos;
			let span_end = pos + span_len;
			pos = span_end;
			if span_end <= offset || span_start >= end {
				continue;
			}
			let local_start = offset.max(span_start) - span_start;
			let local_end = end.min(span_end) - span_start;
			let piece = if local_start == 0 && local_end == span_len {
				entry.span.clone_span()
			} else if local_start == 0 {
				entry.span.split(local_end)?.0
			} else if local_end == span_len {
				entry.span.split(local_start)?.1
			} else {
				let (_left, rest) = entry.span.split(local_start)?;
				rest.split(local_end - local_start)?.0
			};
			out.push((piece, entry.savepoint));
		}
		Ok(out)
	}

	pub fn spans_in_range(&self, offset: u64, length: u64) -> Result<Vec<Span>> {
		Ok(self.entries_in_range(offset, length)?.into_iter().map(|(s, _)| s).collect())
	}

	/// Ensures a span boundary exists at `offset`, splitting the span that
	/// currently straddles it if necessary. Both halves inherit the
	/// original entry's savepoint.
	fn ensure_split(&self, offset: u64) -> Result<()> {
		let mut data = self.0.lock().unwrap();
		if offset == 0 || offset == data.length {
			return Ok(());
		}
		if offset > data.length {
			return Err(HexError::out_of_bounds(offset, 0, data.length));
		}
		let mut pos = 0u64;
		for idx in 0..data.entries.len() {
			let span_len = data.entries[idx].span.length();
			if offset == pos {
				return Ok(());
			}
			if offset < pos + span_len {
				let local = offset - pos;
				let savepoint = data.entries[idx].savepoint;
				let (left, right) = data.entries[idx].span.split(local)?;
				data.entries[idx] = Entry { span: left, savepoint };
				data.entries.insert(idx + 1, Entry { span: right, savepoint });
				self.reparent_entry_at(&data, idx);
				self.reparent_entry_at(&data, idx + 1);
				return Ok(());
			}
			pos += span_len;
		}
		Ok(())
	}

	fn boundary_index(data: &ChainData, offset: u64) -> usize {
		let mut pos = 0u64;
		for (i, entry) in data.entries.iter().enumerate() {
			if pos == offset {
				return i;
			}
			pos += entry.span.length();
		}
		data.entries.len()
	}

	fn reparent_entry_at(&self, data: &ChainData, idx: usize) {
		if let Span::Primitive(p) = &data.entries[idx].span {
			p.set_parent_chain(Some(self.downgrade()));
		}
	}

	fn reparent_range(&self, start: usize, end: usize) {
		let data = self.0.lock().unwrap();
		for i in start..end.min(data.entries.len()) {
			self.reparent_entry_at(&data, i);
		}
	}

	/// Inserts `span`, stamped with `savepoint`, at `offset`. Equivalent to
	/// the original's `insertSpan`: a one-entry chain spliced in via
	/// [`Self::insert_chain`].
	pub fn insert_span(&self, offset: u64, span: Span, savepoint: u64) -> Result<()> {
		self.insert_chain(offset, SpanChain::from_entries(vec![(span, savepoint)]))
	}

	/// Splices every entry of `other` into `self` at `offset`, preserving
	/// each entry's savepoint. `other` is drained in the process (mirrors
	/// the original's move-only `insertChain`).
	pub fn insert_chain(&self, offset: u64, other: SpanChain) -> Result<()> {
		self.ensure_split(offset)?;
		let entries = other.take_entries();
		let count = entries.len();
		let idx = {
			let mut data = self.0.lock().unwrap();
			let idx = Self::boundary_index(&data, offset);
			for (i, (span, savepoint)) in entries.into_iter().enumerate() {
				data.entries.insert(idx + i, Entry { span, savepoint });
			}
			data.recalc_length();
			idx
		};
		self.reparent_range(idx, idx + count);
		Ok(())
	}

	pub fn append_span(&self, span: Span, savepoint: u64) -> Result<()> {
		self.insert_span(self.length(), span, savepoint)
	}

	pub fn append_chain(&self, other: SpanChain) -> Result<()> {
		self.insert_chain(self.length(), other)
	}

	/// Removes `[offset, offset+length)` and returns it as a new chain,
	/// with every removed entry keeping its original savepoint. Bounds are
	/// non-strict: `offset + length == self.length()` is valid (removing up
	/// to and including the last byte), unlike the original's strict `>=`
	/// check.
	pub fn remove(&self, offset: u64, length: u64) -> Result<SpanChain> {
		let end = offset.checked_add(length).ok_or(HexError::Overflow)?;
		{
			let data = self.0.lock().unwrap();
			if end > data.length {
				return Err(HexError::out_of_bounds(offset, length, data.length));
			}
		}
		self.ensure_split(offset)?;
		self.ensure_split(end)?;
		let removed = {
			let mut data = self.0.lock().unwrap();
			let start_idx = Self::boundary_index(&data, offset);
			let end_idx = Self::boundary_index(&data, end);
			let drained: Vec<Entry> = data.entries.drain(start_idx..end_idx).collect();
			data.recalc_length();
			drained
		};
		let entries = removed.into_iter().map(|e| (e.span, e.savepoint)).collect();
		Ok(SpanChain::from_entries(entries))
	}

	pub fn clear(&self) {
		self.take_entries();
	}

	/// Empties this chain and returns what it held.
	pub fn take_entries(&self) -> Vec<(Span, u64)> {
		let mut data = self.0.lock().unwrap();
		data.length = 0;
		std::mem::take(&mut data.entries).into_iter().map(|e| (e.span, e.savepoint)).collect()
	}

	/// Splits this chain into two independent chains at `at`, consuming it.
	pub fn split_into_chains(&self, at: u64) -> Result<(SpanChain, SpanChain)> {
		self.ensure_split(at)?;
		let mut data = self.0.lock().unwrap();
		let idx = Self::boundary_index(&data, at);
		let right_entries = data.entries.split_off(idx);
		let left_entries = std::mem::take(&mut data.entries);
		data.length = 0;
		drop(data);
		let left = left_entries.into_iter().map(|e| (e.span, e.savepoint)).collect();
		let right = right_entries.into_iter().map(|e| (e.span, e.savepoint)).collect();
		Ok((SpanChain::from_entries(left), SpanChain::from_entries(right)))
	}

	/// Deep-copies every span (including a fresh device registration for
	/// each primitive span) and its savepoint into a brand new chain. Used
	/// whenever a chain needs to be duplicated without the copy and the
	/// original affecting each other (undo snapshots,
	/// `DeviceSpanWrapper::clone_span`).
	pub fn deep_clone(&self) -> SpanChain {
		let data = self.0.lock().unwrap();
		let entries: Vec<(Span, u64)> = data.entries.iter().map(|e| (e.span.clone_span(), e.savepoint)).collect();
		drop(data);
		SpanChain::from_entries(entries)
	}

	/// Every entry currently in the chain, paired with its start offset and
	/// savepoint.
	pub fn iter_entries(&self) -> Vec<(u64, Span, u64)> {
		let data = self.0.lock().unwrap();
		let mut pos = 0u64;
		let mut out = Vec::with_capacity(data.entries.len());
		for entry in data.entries.iter() {
			out.push((pos, entry.span.clone_span(), entry.savepoint));
			pos += entry.span.length();
		}
		out
	}

	pub fn iter_spans(&self) -> Vec<(u64, Span)> {
		self.iter_entries().into_iter().map(|(pos, span, _)| (pos, span)).collect()
	}

	/// Like [`Self::iter_spans`], but descends into every `Span::Device`
	/// entry's inner chain instead of treating it as opaque, yielding only
	/// `Data`/`Fill`/`Primitive` leaves with offsets relative to this
	/// chain's start. Used wherever code needs to find every live primitive
	/// span regardless of how deep a save's `DeviceSpan` wrapping nests it.
	pub fn iter_leaf_spans(&self) -> Vec<(u64, Span)> {
		let mut out = Vec::new();
		for (pos, span) in self.iter_spans() {
			Self::flatten_into(pos, span, &mut out);
		}
		out
	}

	fn flatten_into(base: u64, span: Span, out: &mut Vec<(u64, Span)>) {
		match span {
			Span::Device(wrapper) => {
				for (inner_pos, inner_span) in wrapper.inner().iter_spans() {
					Self::flatten_into(base + inner_pos, inner_span, out);
				}
			}
			leaf => out.push((base, leaf)),
		}
	}

	/// True iff any entry covering `[offset, offset+length)` carries a
	/// savepoint different from `savepoint`.
	pub fn is_range_modified(&self, offset: u64, length: u64, savepoint: u64) -> Result<bool> {
		Ok(self
			.entries_in_range(offset, length)?
			.iter()
			.any(|(_, entry_savepoint)| *entry_savepoint != savepoint))
	}

	/// Stamps every entry currently in the chain with `value`, used by
	/// `Document::save` once a save commits.
	pub fn set_common_savepoint(&self, value: u64) {
		let mut data = self.0.lock().unwrap();
		for entry in data.entries.iter_mut() {
			entry.savepoint = value;
		}
	}

	/// Called by a `PrimitiveInner` committing a dissolve: replaces the
	/// single occurrence of `target` with `replacement`, all stamped with
	/// the dissolved entry's savepoint (the bytes' modification history
	/// didn't change, only their representation).
	pub fn splice_primitive(&self, target: &Arc<PrimitiveInner>, replacement: Vec<Span>) -> Result<()> {
		let idx = {
			let data = self.0.lock().unwrap();
			data.entries
				.iter()
				.position(|e| matches!(&e.span, Span::Primitive(p) if Arc::ptr_eq(p, target)))
		};
		let idx = idx.ok_or_else(|| HexError::document_state("dissolve target is no longer in its parent chain"))?;
		let count = replacement.len();
		{
			let mut data = self.0.lock().unwrap();
			let savepoint = data.entries[idx].savepoint;
			let new_entries = replacement.into_iter().map(|span| Entry { span, savepoint });
			data.entries.splice(idx..idx + 1, new_entries);
			data.recalc_length();
		}
		self.reparent_range(idx, idx + count);
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::span::{DataSpan, FillSpan};
	use bytes::Bytes;

	fn data(bytes: &'static [u8]) -> Span {
		Span::Data(DataSpan::new(Bytes::from_static(bytes)))
	}

	#[test]
	fn read_spans_multiple_pieces() {
		let chain = SpanChain::from_spans(vec![data(b"abc"), data(b"def"), data(b"ghi")]);
		assert_eq!(chain.length(), 9);
		assert_eq!(chain.read(2, 5).unwrap(), b"cdefg");
	}

	#[test]
	fn insert_splits_existing_span() {
		let chain = SpanChain::from_spans(vec![data(b"abcdef")]);
		chain.insert_span(3, data(b"XYZ"), 1).unwrap();
		assert_eq!(chain.read(0, 9).unwrap(), b"abcXYZdef");
	}

	#[test]
	fn remove_up_to_end_is_valid() {
		let chain = SpanChain::from_spans(vec![data(b"abcdef")]);
		let removed = chain.remove(2, 4).unwrap();
		assert_eq!(chain.read(0, 2).unwrap(), b"ab");
		assert_eq!(removed.read(0, 4).unwrap(), b"cdef");
	}

	#[test]
	fn remove_rejects_out_of_bounds() {
		let chain = SpanChain::from_spans(vec![data(b"abc")]);
		assert!(chain.remove(1, 3).is_err());
	}

	#[test]
	fn fill_spans_split_cleanly() {
		let chain = SpanChain::from_spans(vec![Span::Fill(FillSpan::new(b'x', 10))]);
		let (left, right) = chain.split_into_chains(4).unwrap();
		assert_eq!(left.read(0, 4).unwrap(), vec![b'x'; 4]);
		assert_eq!(right.read(0, 6).unwrap(), vec![b'x'; 6]);
	}

	#[test]
	fn modified_range_tracks_savepoint_mismatch() {
		let chain = SpanChain::from_entries(vec![(data(b"abc"), 0), (data(b"def"), 5)]);
		assert!(!chain.is_range_modified(0, 3, 0).unwrap());
		assert!(chain.is_range_modified(0, 6, 0).unwrap());
		chain.set_common_savepoint(5);
		assert!(!chain.is_range_modified(0, 6, 5).unwrap());
	}
}

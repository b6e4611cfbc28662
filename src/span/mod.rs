//! The four span kinds a chain is built from, ported from `spans.h`/`spans.cpp`.
//!
//! `AbstractSpan::clone()` in the original always produces a fresh,
//! independently-registered object; we keep that distinction explicit here
//! by giving `DataSpan`/`FillSpan` cheap value clones (no device registration
//! to duplicate) while `PrimitiveInner`/`DeviceSpanWrapper` clones register a
//! brand new device listener, matching `DeviceSpan`'s constructor-registers,
//! destructor-deregisters lifecycle.

use std::sync::{Arc, Mutex, Weak};

use bytes::Bytes;

use crate::chain::{SpanChain, WeakChain};
use crate::device::Device;
use crate::error::{HexError, Result};

/// One link in a [`crate::chain::SpanChain`].
#[derive(Clone)]
pub enum Span {
	Data(DataSpan),
	Fill(FillSpan),
	Primitive(Arc<PrimitiveInner>),
	Device(DeviceSpanWrapper),
}

impl Span {
	pub fn length(&self) -> u64 {
		match self {
			Span::Data(s) => s.length(),
			Span::Fill(s) => s.length(),
			Span::Primitive(s) => s.length(),
			Span::Device(s) => s.length(),
		}
	}

	pub fn read(&self, offset: u64, length: u64) -> Result<Vec<u8>> {
		match self {
			Span::Data(s) => s.read(offset, length),
			Span::Fill(s) => s.read(offset, length),
			Span::Primitive(s) => s.read(offset, length),
			Span::Device(s) => s.read(offset, length),
		}
	}

	/// Splits this span at `at` into two spans whose lengths sum to the
	/// original length. `at` must be strictly between 0 and `length()`
	/// (splitting at either end is an out-of-bounds error, matching the
	/// original's `testSpan` expectations).
	pub fn split(&self, at: u64) -> Result<(Span, Span)> {
		let len = self.length();
		if at == 0 || at >= len {
			return Err(HexError::out_of_bounds(at, 0, len));
		}
		match self {
			Span::Data(s) => {
				let (l, r) = s.split(at);
				Ok((Span::Data(l), Span::Data(r)))
			}
			Span::Fill(s) => {
				let (l, r) = s.split(at);
				Ok((Span::Fill(l), Span::Fill(r)))
			}
			Span::Primitive(s) => {
				let (l, r) = s.split(at)?;
				Ok((Span::Primitive(l), Span::Primitive(r)))
			}
			Span::Device(s) => s.split(at),
		}
	}

	/// Produces an independent copy. For `Data`/`Fill` this is a cheap
	/// value copy; for `Primitive`/`Device` it registers a brand new device
	/// listener, mirroring `AbstractSpan::clone()`.
	pub fn clone_span(&self) -> Span {
		match self {
			Span::Data(s) => Span::Data(s.clone()),
			Span::Fill(s) => Span::Fill(*s),
			Span::Primitive(s) => Span::Primitive(s.clone_primitive()),
			Span::Device(s) => s.clone_span(),
		}
	}

	pub fn as_primitive(&self) -> Option<&Arc<PrimitiveInner>> {
		match self {
			Span::Primitive(p) => Some(p),
			_ => None,
		}
	}
}

/// Byte range taken directly from an in-memory buffer. `Bytes::slice` makes
/// splitting and cloning O(1): both halves keep pointing into the same
/// backing allocation.
#[derive(Clone)]
pub struct DataSpan {
	data: Bytes,
}

impl DataSpan {
	pub fn new(data: impl Into<Bytes>) -> Self {
		Self { data: data.into() }
	}

	pub fn length(&self) -> u64 {
		self.data.len() as u64
	}

	pub fn read(&self, offset: u64, length: u64) -> Result<Vec<u8>> {
		let len = self.length();
		let end = offset.checked_add(length).ok_or(HexError::Overflow)?;
		if end > len {
			return Err(HexError::out_of_bounds(offset, length, len));
		}
		Ok(self.data[offset as usize..end as usize].to_vec())
	}

	fn split(&self, at: u64) -> (DataSpan, DataSpan) {
		let at = at as usize;
		(
			DataSpan {
				data: self.data.slice(..at),
			},
			DataSpan {
				data: self.data.slice(at..),
			},
		)
	}
}

/// A single byte value repeated `count` times. The original capped
/// `repeat_count` at a 32-bit `int`; lifted to `u64` here so fill spans can
/// back multi-gigabyte zero-fills without an artificial ceiling.
#[derive(Clone, Copy)]
pub struct FillSpan {
	byte: u8,
	count: u64,
}

impl FillSpan {
	pub fn new(byte: u8, count: u64) -> Self {
		Self { byte, count }
	}

	pub fn length(&self) -> u64 {
		self.count
	}

	pub fn read(&self, offset: u64, length: u64) -> Result<Vec<u8>> {
		let end = offset.checked_add(length).ok_or(HexError::Overflow)?;
		if end > self.count {
			return Err(HexError::out_of_bounds(offset, length, self.count));
		}
		Ok(vec![self.byte; length as usize])
	}

	fn split(&self, at: u64) -> (FillSpan, FillSpan) {
		(
			FillSpan::new(self.byte, at),
			FillSpan::new(self.byte, self.count - at),
		)
	}
}

/// A range of bytes living on a [`Device`], registered with that device so a
/// save-in-place rewrite can find and dissolve it. This is the original's
/// `DeviceSpan` (devices.h), renamed to avoid confusion with
/// [`DeviceSpanWrapper`], which plays the role the distilled model adds on
/// top: a chain-wrapping span that keeps its identity across a dissolve.
pub struct PrimitiveInner {
	device: Arc<Device>,
	offset: u64,
	length: u64,
	registration: usize,
	parent_chain: Mutex<Option<WeakChain>>,
	dissolving_to: Mutex<Option<Vec<Span>>>,
}

impl PrimitiveInner {
	pub fn new(device: Arc<Device>, offset: u64, length: u64) -> Result<Arc<Self>> {
		let end = offset.checked_add(length).ok_or(HexError::Overflow)?;
		if end > device.len() {
			return Err(HexError::out_of_bounds(offset, length, device.len()));
		}
		Ok(Arc::new_cyclic(|weak: &Weak<PrimitiveInner>| {
			let registration = device.add_span(weak.clone());
			PrimitiveInner {
				device,
				offset,
				length,
				registration,
				parent_chain: Mutex::new(None),
				dissolving_to: Mutex::new(None),
			}
		}))
	}

	pub fn device(&self) -> &Arc<Device> {
		&self.device
	}

	pub fn offset(&self) -> u64 {
		self.offset
	}

	pub fn length(&self) -> u64 {
		self.length
	}

	pub fn set_parent_chain(&self, chain: Option<WeakChain>) {
		*self.parent_chain.lock().unwrap() = chain;
	}

	pub fn read(&self, offset: u64, length: u64) -> Result<Vec<u8>> {
		let end = offset.checked_add(length).ok_or(HexError::Overflow)?;
		if end > self.length {
			return Err(HexError::out_of_bounds(offset, length, self.length));
		}
		self.device.read(self.offset + offset, length)
	}

	fn split(self: &Arc<Self>, at: u64) -> Result<(Arc<Self>, Arc<Self>)> {
		let left = PrimitiveInner::new(self.device.clone(), self.offset, at)?;
		let right = PrimitiveInner::new(self.device.clone(), self.offset + at, self.length - at)?;
		Ok((left, right))
	}

	/// Independent copy on the same device range, with its own device
	/// registration and no parent chain set yet. The chain entry wrapping
	/// this span (not the span itself) owns the savepoint, so the caller is
	/// responsible for carrying that over.
	pub fn clone_primitive(self: &Arc<Self>) -> Arc<Self> {
		PrimitiveInner::new(self.device.clone(), self.offset, self.length)
			.expect("cloning a valid primitive span cannot go out of bounds")
	}

	/// Marks this span for dissolution into `replacement`, the set of spans
	/// that should take its place once the rewrite that prompted this
	/// commits. Mirrors `DeviceSpan::prepareToDissolve`.
	pub fn prepare_dissolve(&self, replacement: Vec<Span>) {
		*self.dissolving_to.lock().unwrap() = Some(replacement);
	}

	/// Aborts a pending dissolve, leaving this span unchanged.
	pub fn cancel_dissolve(&self) {
		*self.dissolving_to.lock().unwrap() = None;
	}

	/// Commits a pending dissolve: asks this span's parent chain to splice
	/// the prepared replacement in where this span used to be.
	pub fn dissolve(self: &Arc<Self>) -> Result<()> {
		let replacement = self
			.dissolving_to
			.lock()
			.unwrap()
			.take()
			.ok_or_else(|| HexError::document_state("dissolve called with no pending replacement"))?;
		if let Some(chain) = self.parent_chain.lock().unwrap().as_ref().and_then(WeakChain::upgrade) {
			chain.splice_primitive(self, replacement)?;
		}
		Ok(())
	}
}

impl Drop for PrimitiveInner {
	fn drop(&mut self) {
		self.device.remove_span(self.registration);
	}
}

/// A span that wraps a whole [`SpanChain`], preserving its own identity
/// across the chain's internal contents changing shape (one primitive
/// becoming several Saved-Range pieces after a rewrite). Every other span
/// kind keeps the same object only by field mutation; this one keeps it by
/// never changing which `SpanChain` handle it points at, only what that
/// handle contains.
#[derive(Clone)]
pub struct DeviceSpanWrapper {
	inner: SpanChain,
}

impl DeviceSpanWrapper {
	pub fn new(inner: SpanChain) -> Self {
		Self { inner }
	}

	pub fn length(&self) -> u64 {
		self.inner.length()
	}

	pub fn read(&self, offset: u64, length: u64) -> Result<Vec<u8>> {
		self.inner.read(offset, length)
	}

	pub fn inner(&self) -> &SpanChain {
		&self.inner
	}

	fn split(&self, at: u64) -> Result<(Span, Span)> {
		let (left, right) = self.inner.split_into_chains(at)?;
		Ok((
			Span::Device(DeviceSpanWrapper::new(left)),
			Span::Device(DeviceSpanWrapper::new(right)),
		))
	}

	fn clone_span(&self) -> Span {
		Span::Device(DeviceSpanWrapper::new(self.inner.deep_clone()))
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::device::buffer::open_buffer;

	#[test]
	fn data_span_split_and_read() {
		let span = Span::Data(DataSpan::new(Bytes::from_static(b"0123456789")));
		assert_eq!(span.length(), 10);
		let (l, r) = span.split(4).unwrap();
		assert_eq!(l.read(0, 4).unwrap(), b"0123");
		assert_eq!(r.read(0, 6).unwrap(), b"456789");
	}

	#[test]
	fn fill_span_reads_repeated_byte() {
		let span = Span::Fill(FillSpan::new(0xAA, 5));
		assert_eq!(span.read(0, 5).unwrap(), vec![0xAA; 5]);
		assert!(span.read(0, 6).is_err());
	}

	#[test]
	fn split_at_edges_is_out_of_bounds() {
		let span = Span::Data(DataSpan::new(Bytes::from_static(b"abc")));
		assert!(span.split(0).is_err());
		assert!(span.split(3).is_err());
	}

	#[test]
	fn primitive_span_deregisters_on_drop() {
		let device = open_buffer(b"0123456789".to_vec(), false);
		{
			let _primitive = PrimitiveInner::new(device.clone(), 0, 10).unwrap();
			assert_eq!(device.span_count(), 1);
		}
		assert_eq!(device.span_count(), 0);
	}

	#[test]
	fn primitive_clone_registers_independently() {
		let device = open_buffer(b"0123456789".to_vec(), false);
		let original = PrimitiveInner::new(device.clone(), 0, 10).unwrap();
		let clone = original.clone_primitive();
		assert_eq!(device.span_count(), 2);
		assert!(!Arc::ptr_eq(&original, &clone));
	}
}

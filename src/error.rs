//! Error taxonomy for the document engine.
//!
//! A single enum covers every failure category named by the component specs
//! rather than one type per subsystem, mirroring how `xeno-editor` collects
//! its apply/edit failures into one `#[derive(Error)]` enum per seam.

use thiserror::Error;

/// Human-readable byte count, e.g. `"4.0 MB"`.
///
/// Used only for error message formatting; never affects control flow.
pub fn format_size(size: u64) -> String {
	const UNITS: [(&str, u64); 4] = [
		("TB", 1024u64.pow(4)),
		("GB", 1024u64.pow(3)),
		("MB", 1024u64.pow(2)),
		("KB", 1024),
	];
	for (suffix, scale) in UNITS {
		if size >= scale {
			let value = size as f64 / scale as f64;
			return format!("{value:.1} {suffix}");
		}
	}
	format!("{size} B")
}

/// All failure categories surfaced across Device, SpanChain, and Document.
#[derive(Debug, Error)]
pub enum HexError {
	/// Offset/length outside the addressable space of the entity.
	#[error("out of bounds: offset={offset} length={length} entity_len={entity_len}")]
	OutOfBounds {
		offset: u64,
		length: u64,
		entity_len: u64,
	},

	/// 64-bit integer overflow in length arithmetic.
	#[error("length arithmetic overflowed 64 bits")]
	Overflow,

	/// Write attempted on a read-only entity.
	#[error("operation not allowed: {scope} is read-only")]
	ReadOnly { scope: &'static str },

	/// Resize attempted on a fixed-size entity.
	#[error("operation not allowed: {scope} has a frozen size")]
	FrozenSize { scope: &'static str },

	/// Requested device load conflicts with an existing handle on the same URL range.
	#[error("device conflict: {url} range [{range_start}, {range_end}) is already held non-exclusively")]
	DeviceConflict {
		url: String,
		range_start: u64,
		range_end: u64,
	},

	/// Underlying storage failure (seek/open/read/write/rename/remove).
	#[error("I/O failure on {url}: {detail}")]
	DeviceIo { url: String, detail: String },

	/// Ending a complex action with none open, switching to a non-existent
	/// branch, a violated quick-save precondition, or OOM during a forced
	/// materialization.
	#[error("invalid document state: {detail}")]
	DocumentState { detail: String },

	/// Raised only from cooperative `try_lock*` timeout paths.
	#[error("operation cancelled: {detail}")]
	Cancelled { detail: String },
}

impl HexError {
	pub fn out_of_bounds(offset: u64, length: u64, entity_len: u64) -> Self {
		Self::OutOfBounds {
			offset,
			length,
			entity_len,
		}
	}

	pub fn device_io(url: impl Into<String>, detail: impl Into<String>) -> Self {
		Self::DeviceIo {
			url: url.into(),
			detail: detail.into(),
		}
	}

	pub fn document_state(detail: impl Into<String>) -> Self {
		Self::DocumentState {
			detail: detail.into(),
		}
	}
}

pub type Result<T> = std::result::Result<T, HexError>;

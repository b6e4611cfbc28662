//! Process-wide device exclusivity registry.
//!
//! Mirrors the original `devices.cpp` load-conflict check: two devices may
//! not hold overlapping, non-shareable ranges of the same URL at once. Unlike
//! the original (one process, one `QMap` guarded implicitly by the Qt event
//! loop), this is a `Mutex` guarding a flat table, since `Device::open` can be
//! called from any thread.

use std::collections::HashMap;
use std::ops::Range;
use std::sync::{Mutex, OnceLock};

use crate::error::{HexError, Result};

struct Hold {
	range: Range<u64>,
	exclusive: bool,
}

fn table() -> &'static Mutex<HashMap<String, Vec<Hold>>> {
	static TABLE: OnceLock<Mutex<HashMap<String, Vec<Hold>>>> = OnceLock::new();
	TABLE.get_or_init(|| Mutex::new(HashMap::new()))
}

fn overlaps(a: &Range<u64>, b: &Range<u64>) -> bool {
	a.start < b.end && b.start < a.end
}

/// A held claim on `url`'s `[range.start, range.end)`. Releases on drop.
pub struct RegistryGuard {
	url: String,
	range: Range<u64>,
}

impl Drop for RegistryGuard {
	fn drop(&mut self) {
		let mut table = table().lock().unwrap();
		if let Some(holds) = table.get_mut(&self.url) {
			holds.retain(|h| !(h.range == self.range));
			if holds.is_empty() {
				table.remove(&self.url);
			}
		}
	}
}

/// Registers a claim on `url`'s byte range. `exclusive` devices (the default
/// for on-disk files opened for writing) refuse to overlap with any other
/// claim, held or requested; non-exclusive claims (read-only loads, and
/// in-memory buffers that never touch shared storage) only conflict with an
/// existing exclusive claim.
pub fn acquire(url: &str, range: Range<u64>, exclusive: bool) -> Result<RegistryGuard> {
	let mut table = table().lock().unwrap();
	let holds = table.entry(url.to_string()).or_default();
	for existing in holds.iter() {
		if overlaps(&existing.range, &range) && (exclusive || existing.exclusive) {
			return Err(HexError::DeviceConflict {
				url: url.to_string(),
				range_start: range.start,
				range_end: range.end,
			});
		}
	}
	holds.push(Hold {
		range: range.clone(),
		exclusive,
	});
	Ok(RegistryGuard {
		url: url.to_string(),
		range,
	})
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn exclusive_claims_conflict_on_overlap() {
		let _first = acquire("file:///a", 0..100, true).unwrap();
		assert!(acquire("file:///a", 50..150, true).is_err());
		assert!(acquire("file:///a", 100..200, true).is_ok());
	}

	#[test]
	fn non_exclusive_claims_may_overlap() {
		let _first = acquire("file:///b", 0..100, false).unwrap();
		let _second = acquire("file:///b", 50..150, false).unwrap();
	}

	#[test]
	fn guard_release_frees_the_range() {
		{
			let _guard = acquire("file:///c", 0..10, true).unwrap();
		}
		let _again = acquire("file:///c", 0..10, true).unwrap();
	}
}

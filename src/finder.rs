//! Boyer-Moore byte-pattern search over a document, ported from `matcher.cpp`.
//!
//! Builds two 256-entry bad-character skip tables up front (one for
//! searching forward, one for backward) and slides a fixed-size read
//! buffer across the document, comparing the pattern right-to-left at each
//! window position.

use crate::document::Document;
use crate::error::Result;

/// Size of the sliding read buffer used while scanning.
const BUFFER_SIZE: u64 = 1024 * 1024;

/// Precomputed skip tables for one pattern, shared by forward and backward
/// searches.
pub struct BinaryFinder {
	pattern: Vec<u8>,
	/// `skip[b]` = how far to advance the search window when the byte at
	/// its rightmost position doesn't match `b`, searching forward.
	forward_skip: [u64; 256],
	/// `r_skip[b]` = how far to retreat the search window when the byte at
	/// its leftmost position doesn't match `b`, searching backward.
	backward_skip: [u64; 256],
}

impl BinaryFinder {
	pub fn new(pattern: Vec<u8>) -> Self {
		let len = pattern.len() as u64;
		let mut forward_skip = [len; 256];
		let mut backward_skip = [len; 256];

		for (index, &byte) in pattern.iter().enumerate() {
			// Rightmost occurrence of `byte` (for forward search): distance
			// from that occurrence to the end of the pattern.
			forward_skip[byte as usize] = len - index as u64 - 1;
		}
		for (index, &byte) in pattern.iter().enumerate().rev() {
			// Leftmost occurrence of `byte` (for backward search): distance
			// from the start of the pattern to that occurrence.
			backward_skip[byte as usize] = index as u64;
		}

		Self {
			pattern,
			forward_skip,
			backward_skip,
		}
	}

	pub fn pattern(&self) -> &[u8] {
		&self.pattern
	}

	/// Byte-for-byte match of `self.pattern` against `window[at..at+len]`.
	fn matches_at(&self, window: &[u8], at: usize) -> bool {
		window[at..at + self.pattern.len()] == self.pattern[..]
	}

	/// Finds the next occurrence of the pattern at or after `from`, scanning
	/// forward through `doc`. Returns `None` if the pattern is empty, the
	/// document doesn't hold enough bytes, or no match exists before the end
	/// of the document.
	pub fn find_next(&self, doc: &Document, from: u64) -> Result<Option<u64>> {
		let pattern_len = self.pattern.len() as u64;
		if pattern_len == 0 {
			return Ok(None);
		}
		let doc_len = doc.length();
		if from + pattern_len > doc_len {
			return Ok(None);
		}

		let mut window_start = from;
		loop {
			let window_len = BUFFER_SIZE.min(doc_len - window_start);
			if window_len < pattern_len {
				return Ok(None);
			}
			let buffer = doc.read(window_start, window_len)?;

			let mut local = 0usize;
			let last_fit = buffer.len() - self.pattern.len();
			loop {
				if self.matches_at(&buffer, local) {
					return Ok(Some(window_start + local as u64));
				}
				if local == last_fit {
					break;
				}
				let right_index = local + self.pattern.len() - 1;
				let advance = self.forward_skip[buffer[right_index] as usize].max(1);
				let next_local = local as u64 + advance;
				if next_local as usize > last_fit {
					break;
				}
				local = next_local as usize;
			}

			// The trailing `pattern_len - 1` bytes of this window might
			// still start a match that straddles into the next window, so
			// re-anchor just before them rather than at the window's end.
			let next_start = window_start + last_fit as u64 + 1;
			if next_start + pattern_len > doc_len {
				return Ok(None);
			}
			window_start = next_start;
		}
	}

	/// Finds the previous occurrence of the pattern at or before `from`
	/// (the search starts at the position where the pattern's last byte
	/// would sit at `from`), scanning backward through `doc`.
	pub fn find_previous(&self, doc: &Document, from: u64) -> Result<Option<u64>> {
		let pattern_len = self.pattern.len() as u64;
		if pattern_len == 0 || from + 1 < pattern_len {
			return Ok(None);
		}

		let mut window_end = (from + 1).min(doc.length());
		loop {
			let window_len = BUFFER_SIZE.min(window_end);
			if window_len < pattern_len {
				return Ok(None);
			}
			let window_start = window_end - window_len;
			let buffer = doc.read(window_start, window_len)?;

			let mut local = (window_len - pattern_len) as i64;
			loop {
				if local < 0 {
					break;
				}
				if self.matches_at(&buffer, local as usize) {
					return Ok(Some(window_start + local as u64));
				}
				let left_byte = buffer[local as usize];
				let retreat = self.backward_skip[left_byte as usize].max(1) as i64;
				local -= retreat;
			}

			if window_start == 0 {
				return Ok(None);
			}
			// Re-anchor so a match straddling this window's start is still
			// reachable from the next window down.
			window_end = window_start + pattern_len - 1;
			if window_end < pattern_len {
				return Ok(None);
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::device::buffer::open_buffer;

	fn doc(bytes: &[u8]) -> std::sync::Arc<Document> {
		Document::new(open_buffer(bytes.to_vec(), false)).unwrap()
	}

	#[test]
	fn finds_first_forward_match() {
		let document = doc(b"the quick brown fox jumps over the lazy dog");
		let finder = BinaryFinder::new(b"fox".to_vec());
		assert_eq!(finder.find_next(&document, 0).unwrap(), Some(16));
	}

	#[test]
	fn finds_subsequent_forward_match() {
		let document = doc(b"abcabcabc");
		let finder = BinaryFinder::new(b"abc".to_vec());
		assert_eq!(finder.find_next(&document, 1).unwrap(), Some(3));
	}

	#[test]
	fn forward_search_returns_none_when_absent() {
		let document = doc(b"hello world");
		let finder = BinaryFinder::new(b"xyz".to_vec());
		assert_eq!(finder.find_next(&document, 0).unwrap(), None);
	}

	#[test]
	fn finds_previous_match_scanning_backward() {
		let document = doc(b"abcabcabc");
		let finder = BinaryFinder::new(b"abc".to_vec());
		assert_eq!(finder.find_previous(&document, 8).unwrap(), Some(6));
		assert_eq!(finder.find_previous(&document, 5).unwrap(), Some(3));
	}

	#[test]
	fn backward_search_returns_none_before_start() {
		let document = doc(b"abcdef");
		let finder = BinaryFinder::new(b"abc".to_vec());
		assert_eq!(finder.find_previous(&document, 1).unwrap(), None);
	}

	#[test]
	fn empty_pattern_never_matches() {
		let document = doc(b"abcdef");
		let finder = BinaryFinder::new(Vec::new());
		assert_eq!(finder.find_next(&document, 0).unwrap(), None);
		assert_eq!(finder.find_previous(&document, 0).unwrap(), None);
	}
}

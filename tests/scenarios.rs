//! Cross-module scenarios, one test per end-to-end walkthrough in the
//! documented testable-properties list, plus a few of the listed invariants
//! that don't fall naturally out of any single scenario.

use std::io::Write as _;
use std::sync::Arc;

use hexcore::device::buffer::open_buffer;
use hexcore::device::file::open_file;
use hexcore::device::FileLoadOptions;
use hexcore::span::{DataSpan, FillSpan};
use hexcore::{BinaryFinder, Document, Span, SpanChain};

fn doc_over(bytes: &[u8]) -> Arc<Document> {
	Document::new(open_buffer(bytes.to_vec(), false)).unwrap()
}

fn data(bytes: &[u8]) -> Span {
	Span::Data(DataSpan::new(bytes.to_vec()))
}

/// S1: piece-table basics over a chain built from two concatenated data spans.
#[test]
fn s1_piece_table_basics() {
	let chain = SpanChain::from_spans(vec![data(b"Lorem ipsum"), data(b" dolor sit amet")]);
	assert_eq!(chain.read(0, chain.length()).unwrap(), b"Lorem ipsum dolor sit amet");

	chain.remove(2, 4).unwrap();
	assert_eq!(chain.read(0, chain.length()).unwrap(), b"Lo ipsum dolor sit amet");

	chain.insert_span(2, data(b"rem "), 0).unwrap();
	assert_eq!(chain.read(0, chain.length()).unwrap(), b"Lorem ipsum dolor sit amet");

	let taken = chain.spans_in_range(2, 8).unwrap();
	let taken_chain = SpanChain::from_spans(taken);
	assert_eq!(taken_chain.read(0, 8).unwrap(), b"rem ipsu");
	// spans_in_range doesn't mutate the source chain.
	assert_eq!(chain.read(0, chain.length()).unwrap(), b"Lorem ipsum dolor sit amet");

	chain.clear();
	assert_eq!(chain.length(), 0);
}

/// S2: undo/redo round-trips a single-span overwrite, including the
/// modified-state flip on each side of the transition.
#[test]
fn s2_undo_redo_round_trip() {
	let document = doc_over(b"Lorem ipsum dolor sit amet");
	document.write_span(3, data(b"x")).unwrap();
	assert_eq!(document.read_all().unwrap(), b"Lorxm ipsum dolor sit amet");
	assert!(document.is_modified());
	assert!(document.can_undo());
	assert!(!document.can_redo());

	document.undo().unwrap();
	assert_eq!(document.read_all().unwrap(), b"Lorem ipsum dolor sit amet");
	assert!(!document.is_modified());
	assert!(!document.can_undo());
	assert!(document.can_redo());

	document.redo(None).unwrap();
	assert_eq!(document.read_all().unwrap(), b"Lorxm ipsum dolor sit amet");
	assert!(document.is_modified());
}

/// S3: writing past the end of an empty document pads with zeros and
/// extends the length; undo restores the empty document.
#[test]
fn s3_append_past_end() {
	let document = doc_over(b"");
	document.write_span(100, data(b"Hi!")).unwrap();
	assert_eq!(document.length(), 103);
	let mut expected = vec![0u8; 100];
	expected.extend_from_slice(b"Hi!");
	assert_eq!(document.read_all().unwrap(), expected);

	document.undo().unwrap();
	assert_eq!(document.length(), 0);
}

/// S4: a document can address the full 64-bit offset range since the gap a
/// write pads with is a `FillSpan`, not a materialized buffer.
#[test]
fn s4_max_addressable() {
	let document = doc_over(b"Lorem ipsum");
	document.write_span(0xFFFF_FFFF_FFFF_FFFE, Span::Data(DataSpan::new(vec![0x00]))).unwrap();
	assert_eq!(document.length(), 0xFFFF_FFFF_FFFF_FFFF);
	assert_eq!(document.read(0, 11).unwrap(), b"Lorem ipsum");
}

/// S5: save-in-place dissolves every live primitive on the rewritten device,
/// including one held only by a previously exported snapshot, while
/// preserving the bytes that snapshot reads.
///
/// Reduced from the documented 16 MiB / [40,140) to a smaller size so the
/// test doesn't need to allocate real megabytes; the shape of the dissolve
/// (Primitive, Data, Primitive) is unaffected by the scale.
#[test]
fn s5_save_in_place_preserves_captured_device_span() {
	let size: usize = 4096;
	let mut tmp = tempfile::NamedTempFile::new().unwrap();
	tmp.write_all(&vec![0xFFu8; size]).unwrap();
	tmp.flush().unwrap();

	let device = open_file(tmp.path(), FileLoadOptions::default()).unwrap();
	let document = Document::new(device.clone()).unwrap();

	// Capture a snapshot of the whole document while it's still one
	// untouched primitive; ram_limit=0 keeps device-backed spans instead of
	// materializing them, so the capture is still a `DeviceSpan`.
	let captured = document.export_range(0, size as u64, 0).unwrap();
	assert_eq!(captured.span_count(), 1);

	document.remove(40, 100).unwrap();
	assert!(!document.check_can_quick_save());
	document.save(None, false).unwrap();

	assert!(!document.is_modified());
	assert_eq!(document.length(), size as u64 - 100);
	assert_eq!(document.read_all().unwrap(), vec![0xFFu8; size - 100]);

	// The captured span's inner chain split into three pieces around the
	// removed run (Primitive, Data, Primitive), and still reads back the
	// pre-save content in full.
	assert_eq!(captured.span_count(), 1);
	let outer_entries = captured.iter_spans();
	let (_, outer_span) = &outer_entries[0];
	let inner_chain = match outer_span {
		Span::Device(wrapper) => wrapper.inner().clone(),
		_ => panic!("expected the captured snapshot to still be a DeviceSpan"),
	};
	assert_eq!(inner_chain.span_count(), 3);
	assert_eq!(captured.read(0, size as u64).unwrap(), vec![0xFFu8; size]);
}

/// S6: range-modification tracking reflects savepoint mismatches, not just
/// "has this byte ever changed".
#[test]
fn s6_range_modification_tracking() {
	let document = doc_over(b"Lorem ipsum dolor sit amet");
	document.write_span(10, Span::Fill(FillSpan::new(b'0', 30))).unwrap();

	assert!(document.is_range_modified(10, 5).unwrap());
	assert!(!document.is_range_modified(0, 10).unwrap());
}

/// S7: Boyer-Moore-Horspool forward and backward search over a block of
/// repeated bytes, walking every valid match position.
#[test]
fn s7_boyer_moore_walks_every_overlapping_match() {
	let haystack = format!("0000{}219031", "x".repeat(11));
	let document = doc_over(haystack.as_bytes());
	let finder = BinaryFinder::new(b"xxxxx".to_vec());

	let mut forward = Vec::new();
	let mut from = 0u64;
	while let Some(pos) = finder.find_next(&document, from).unwrap() {
		forward.push(pos);
		from = pos + 1;
	}
	assert_eq!(forward, vec![4, 5, 6, 7, 8, 9, 10]);

	let mut backward = Vec::new();
	let mut from = document.length() - 1;
	loop {
		match finder.find_previous(&document, from).unwrap() {
			Some(pos) => {
				backward.push(pos);
				if pos == 0 {
					break;
				}
				from = pos - 1;
			}
			None => break,
		}
	}
	assert_eq!(backward, vec![10, 9, 8, 7, 6, 5, 4]);
}

/// S8: device exclusivity. An overlapping writable range conflicts with an
/// existing writable claim (even if the second open asks for read-only,
/// since the first handle is already writable); a disjoint range succeeds.
#[test]
fn s8_device_conflict_on_overlapping_ranges() {
	let mut tmp = tempfile::NamedTempFile::new().unwrap();
	tmp.write_all(&vec![0u8; 400]).unwrap();
	tmp.flush().unwrap();

	let _first = open_file(
		tmp.path(),
		FileLoadOptions {
			range: Some(10..110),
			..Default::default()
		},
	)
	.unwrap();

	let overlapping_write = open_file(
		tmp.path(),
		FileLoadOptions {
			range: Some(15..100),
			..Default::default()
		},
	);
	assert!(overlapping_write.is_err());

	let overlapping_read_only = open_file(
		tmp.path(),
		FileLoadOptions {
			range: Some(15..100),
			base: hexcore::device::LoadOptions { read_only: true },
			..Default::default()
		},
	);
	assert!(overlapping_read_only.is_err());

	let disjoint = open_file(
		tmp.path(),
		FileLoadOptions {
			range: Some(300..310),
			..Default::default()
		},
	);
	assert!(disjoint.is_ok());
}

/// Invariant 10: two reader threads proceed concurrently; a writer on a
/// third thread can't acquire until both release.
#[test]
fn invariant_readers_do_not_block_each_other() {
	use std::sync::mpsc;
	use std::sync::Mutex;
	use std::thread;

	let document = doc_over(b"hello world");
	let (ready_tx, ready_rx) = mpsc::channel::<()>();
	let (release_tx, release_rx) = mpsc::channel::<()>();
	let release_rx = Arc::new(Mutex::new(release_rx));

	let readers: Vec<_> = (0..2)
		.map(|_| {
			let doc = document.clone();
			let ready_tx = ready_tx.clone();
			let release_rx = release_rx.clone();
			thread::spawn(move || {
				let _guard = doc.lock().lock_read();
				ready_tx.send(()).unwrap();
				release_rx.lock().unwrap().recv().unwrap();
			})
		})
		.collect();

	ready_rx.recv().unwrap();
	ready_rx.recv().unwrap();

	// Both readers are held by distinct threads; a writer on this (third)
	// thread must not be able to proceed immediately.
	assert!(document.lock().try_lock_write(hexcore::lock::LockTimeout::Immediate).is_none());

	release_tx.send(()).unwrap();
	release_tx.send(()).unwrap();
	for reader in readers {
		reader.join().unwrap();
	}

	// Once both readers release, the writer can proceed.
	assert!(document.lock().try_lock_write(hexcore::lock::LockTimeout::Immediate).is_some());
}

/// Invariant 1: length reporting stays consistent with the sum of span
/// lengths across a sequence of inserts and removals.
#[test]
fn invariant_length_matches_span_sum() {
	let document = doc_over(b"0123456789");
	document.insert_span(3, data(b"XYZ")).unwrap();
	document.remove(0, 2).unwrap();
	assert_eq!(document.read_all().unwrap().len() as u64, document.length());
}

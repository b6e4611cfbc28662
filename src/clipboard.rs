//! In-process clipboard data exchange, ported from `clipboard.cpp`.
//!
//! The original transports an in-process payload by casting a pointer to
//! text and storing it alongside a process id a host clipboard (X11/Qt)
//! carries as an opaque mime payload. There is no pointer-safe way to do
//! that across an async boundary in Rust, so the in-process handle here is
//! an integer key into a process-wide [`ClipboardRegistry`] instead; the
//! PID mark is kept so a paste can tell whether a handle it sees came from
//! this process at all.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, OnceLock};

use crate::chain::SpanChain;

/// Mime type carrying the owning process id, as raw ASCII decimal text.
pub const MIME_MARK: &str = "application/microhex-mark";
/// Mime type carrying an opaque in-process handle (ASCII decimal text).
pub const MIME_DATA: &str = "application/microhex-data";
/// Mime type carrying the fully materialized bytes.
pub const MIME_OCTET_STREAM: &str = "application/octet-stream";
/// Mime type carrying an uppercase space-separated hex dump.
pub const MIME_TEXT: &str = "text/plain";

static NEXT_HANDLE: AtomicU64 = AtomicU64::new(1);

fn registry() -> &'static Mutex<std::collections::HashMap<u64, SpanChain>> {
	static REGISTRY: OnceLock<Mutex<std::collections::HashMap<u64, SpanChain>>> = OnceLock::new();
	REGISTRY.get_or_init(|| Mutex::new(std::collections::HashMap::new()))
}

/// Current process id, used as the clipboard mark.
pub fn process_mark() -> u64 {
	std::process::id() as u64
}

/// One clipboard payload: a copied span chain plus everything needed to
/// build the three MIME payloads a host clipboard would carry.
pub struct ClipboardPayload {
	mark: u64,
	handle: u64,
	chain: SpanChain,
}

impl ClipboardPayload {
	pub fn mark(&self) -> u64 {
		self.mark
	}

	pub fn handle(&self) -> u64 {
		self.handle
	}

	pub fn chain(&self) -> &SpanChain {
		&self.chain
	}

	/// Materializes the payload as raw bytes, for `MIME_OCTET_STREAM`.
	pub fn to_octet_stream(&self) -> Result<Vec<u8>, crate::error::HexError> {
		self.chain.read(0, self.chain.length())
	}

	/// Renders the payload as uppercase hex text, two digits per byte,
	/// space-separated, with a line break every 16 bytes. Matches the
	/// original's `dataToText`.
	pub fn to_hex_text(&self) -> Result<String, crate::error::HexError> {
		let bytes = self.to_octet_stream()?;
		let mut out = String::with_capacity(bytes.len() * 3);
		for (i, byte) in bytes.iter().enumerate() {
			if i > 0 {
				out.push(if i % 16 == 0 { '\n' } else { ' ' });
			}
			out.push_str(&format!("{byte:02X}"));
		}
		Ok(out)
	}
}

/// Copies `chain` onto the clipboard, registering it under a fresh handle
/// and returning the payload a caller can hand to a host clipboard under
/// the three MIME types above.
pub fn copy(chain: SpanChain) -> ClipboardPayload {
	let handle = NEXT_HANDLE.fetch_add(1, Ordering::Relaxed);
	registry().lock().unwrap().insert(handle, chain.deep_clone());
	ClipboardPayload {
		mark: process_mark(),
		handle,
		chain,
	}
}

/// Looks up a handle previously registered by [`copy`], if it's still
/// present. Returns a fresh deep clone so the caller owns an independent
/// chain.
pub fn resolve_handle(handle: u64) -> Option<SpanChain> {
	registry().lock().unwrap().get(&handle).map(SpanChain::deep_clone)
}

/// Drops a previously copied payload from the registry. Hosts call this
/// once their own clipboard no longer references the handle (e.g. on
/// clipboard ownership change), mirroring the original's destructor-driven
/// cleanup.
pub fn release_handle(handle: u64) {
	registry().lock().unwrap().remove(&handle);
}

/// Parses an uppercase-or-lowercase, whitespace-separated hex dump (as
/// produced by [`ClipboardPayload::to_hex_text`] or typed by a user) back
/// into bytes. Whitespace (including newlines) between byte pairs is
/// skipped; any other non-hex-digit character is rejected.
pub fn parse_hex_text(text: &str) -> Option<Vec<u8>> {
	let mut digits = Vec::new();
	for ch in text.chars() {
		if ch.is_whitespace() {
			continue;
		}
		if !ch.is_ascii_hexdigit() {
			return None;
		}
		digits.push(ch);
	}
	if digits.len() % 2 != 0 {
		return None;
	}
	let mut bytes = Vec::with_capacity(digits.len() / 2);
	for pair in digits.chunks(2) {
		let s: String = pair.iter().collect();
		bytes.push(u8::from_str_radix(&s, 16).ok()?);
	}
	Some(bytes)
}

/// What a paste operation can work from, in the original's fallback
/// priority order: an intra-process handle (fastest, no materialization),
/// else materialized bytes, else hex text.
pub enum PasteSource<'a> {
	Handle { mark: u64, handle: u64 },
	OctetStream(&'a [u8]),
	Text(&'a str),
}

/// Resolves a paste down to a span chain, following the original's
/// fallback order: an intra-process handle (if its mark matches this
/// process and the handle still resolves), else raw octet-stream bytes,
/// else a parsed hex-text dump. Returns `None` if nothing usable was
/// offered.
pub fn resolve_paste(sources: &[PasteSource<'_>]) -> Option<SpanChain> {
	for source in sources {
		if let PasteSource::Handle { mark, handle } = source {
			if *mark == process_mark() {
				if let Some(chain) = resolve_handle(*handle) {
					return Some(chain);
				}
			}
		}
	}
	for source in sources {
		if let PasteSource::OctetStream(bytes) = source {
			return Some(SpanChain::from_spans(vec![crate::span::Span::Data(crate::span::DataSpan::new(
				bytes.to_vec(),
			))]));
		}
	}
	for source in sources {
		if let PasteSource::Text(text) = source {
			if let Some(bytes) = parse_hex_text(text) {
				return Some(SpanChain::from_spans(vec![crate::span::Span::Data(crate::span::DataSpan::new(bytes))]));
			}
		}
	}
	None
}

//! File-backed device, the `FileDevice` counterpart from `devices.cpp`.
//!
//! Opens for read-write first and falls back to read-only on failure (the
//! lazy-open, permission-driven path `QtProxyDevice::_ensureOpened` took),
//! optionally bound to a sub-range of the file and optionally eagerly loaded
//! into the device cache.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::Arc;

use tracing::warn;

use crate::device::{Device, DeviceBackend, FileLoadOptions};
use crate::error::{HexError, Result};

pub struct FileBackend {
	file: File,
	/// Byte offset into the real file that device offset 0 maps to.
	base: u64,
	/// Logical length of the device (possibly less than the real file's
	/// remaining length, if range-bound).
	logical_len: u64,
	/// Upper bound on `logical_len`, for range-bound devices; `None` means
	/// the device may grow or shrink the underlying file freely.
	range_cap: Option<u64>,
}

impl DeviceBackend for FileBackend {
	fn raw_len(&self) -> u64 {
		self.logical_len
	}

	fn raw_read(&mut self, offset: u64, buf: &mut [u8]) -> Result<()> {
		self.file
			.seek(SeekFrom::Start(self.base + offset))
			.map_err(|e| HexError::device_io("file", e.to_string()))?;
		self.file
			.read_exact(buf)
			.map_err(|e| HexError::device_io("file", e.to_string()))
	}

	fn raw_write(&mut self, offset: u64, data: &[u8]) -> Result<()> {
		self.file
			.seek(SeekFrom::Start(self.base + offset))
			.map_err(|e| HexError::device_io("file", e.to_string()))?;
		self.file
			.write_all(data)
			.map_err(|e| HexError::device_io("file", e.to_string()))
	}

	fn raw_resize(&mut self, new_len: u64) -> Result<()> {
		if let Some(cap) = self.range_cap {
			if new_len > cap {
				return Err(HexError::FrozenSize { scope: "file device range" });
			}
		}
		self.file.set_len(self.base + new_len).map_err(|e| {
			HexError::device_io("file", format!("failed to resize file to {}: {e}", crate::error::format_size(new_len)))
		})?;
		self.logical_len = new_len;
		Ok(())
	}
}

fn open_file_handle(path: &Path, want_write: bool) -> std::io::Result<(File, bool)> {
	if want_write {
		match OpenOptions::new().read(true).write(true).open(path) {
			Ok(file) => return Ok((file, false)),
			Err(e) => warn!(path = %path.display(), error = %e, "opening for read-write failed, falling back to read-only"),
		}
	}
	OpenOptions::new().read(true).open(path).map(|f| (f, true))
}

/// Opens `path` as a device, returning the opened device and whether it
/// ended up read-only (either requested, or forced by a failed read-write
/// open).
pub fn open_file(path: &Path, options: FileLoadOptions) -> Result<Arc<Device>> {
	let (file, forced_read_only) = open_file_handle(path, !options.base.read_only)
		.map_err(|e| HexError::device_io(path.display().to_string(), e.to_string()))?;
	let read_only = options.base.read_only || forced_read_only;

	let file_len = file
		.metadata()
		.map_err(|e| HexError::device_io(path.display().to_string(), e.to_string()))?
		.len();

	let (base, logical_len, range_cap) = match &options.range {
		Some(range) => {
			let len = range.end.saturating_sub(range.start).min(file_len.saturating_sub(range.start));
			(range.start, len, Some(range.end - range.start))
		}
		None => (0, file_len, None),
	};

	let url = format!("file://{}", path.display());
	let exclusive = options.force_new || !read_only;
	let claim = crate::device::registry::acquire(&url, base..base + logical_len.max(1), exclusive)?;

	let backend = FileBackend {
		file,
		base,
		logical_len,
		range_cap,
	};

	let device = Device::new(url, Box::new(backend), read_only, options.freeze_size, Some(claim));
	if options.memory_load {
		device.set_cache_size(logical_len.max(1), 1);
	}
	Ok(Arc::new(device))
}

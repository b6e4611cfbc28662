//! Save strategies, the `AbstractSaver` family from `devices.cpp`.
//!
//! `save.rs` decides *what* bytes need writing (Saved Ranges, materialized
//! spans); a `Saver` only decides *where* they land. Quick-save's
//! "bytes already on target, skip the write" optimization lives in the
//! caller: a `Saver` here only ever writes what it's given.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::device::{Device, FileLoadOptions, MAXIMAL_WRITE_BLOCK};
use crate::error::{HexError, Result};

pub trait Saver {
	/// Called once before any `put_bytes`. Prepares the destination (e.g.
	/// truncates it to zero length).
	fn begin(&mut self) -> Result<()>;

	/// Writes `data` at logical offset `offset` in the destination,
	/// chunked so no single underlying write exceeds [`MAXIMAL_WRITE_BLOCK`].
	fn put_bytes(&mut self, offset: u64, data: &[u8]) -> Result<()>;

	/// Called if the save is aborted after `begin` succeeded. Default is a
	/// no-op; savers that created temporary state override it to clean up.
	fn fail(&mut self) {}

	/// Called once after every `put_bytes` succeeds. Default is a no-op;
	/// savers that wrote to a staging area override it to publish the
	/// result.
	fn complete(&mut self) -> Result<()> {
		Ok(())
	}
}

fn write_chunked(device: &Device, offset: u64, data: &[u8]) -> Result<()> {
	let mut pos = 0usize;
	while pos < data.len() {
		let chunk_len = (data.len() - pos).min(MAXIMAL_WRITE_BLOCK as usize);
		device.write(offset + pos as u64, &data[pos..pos + chunk_len])?;
		pos += chunk_len;
	}
	Ok(())
}

/// Saves by truncating the destination device to zero and writing every
/// byte fresh. Used when the destination is not the document's own device,
/// or quick-save's in-place preconditions don't hold.
pub struct StandardSaver {
	device: Arc<Device>,
}

impl StandardSaver {
	pub fn new(device: Arc<Device>) -> Self {
		Self { device }
	}
}

impl Saver for StandardSaver {
	fn begin(&mut self) -> Result<()> {
		self.device.resize(0)
	}

	fn put_bytes(&mut self, offset: u64, data: &[u8]) -> Result<()> {
		write_chunked(&self.device, offset, data)
	}
}

/// Saves by truncating the destination to its final length up front (no
/// zero-length round trip) and writing in place. Only valid when every
/// surviving byte is already at its final offset on the destination device;
/// `save.rs` is responsible for only constructing this saver when that
/// holds, and for skipping `put_bytes` for ranges that don't need rewriting.
pub struct QuickFileSaver {
	device: Arc<Device>,
}

impl QuickFileSaver {
	pub fn new(device: Arc<Device>, final_length: u64) -> Result<Self> {
		device.resize(final_length)?;
		Ok(Self { device })
	}
}

impl Saver for QuickFileSaver {
	fn begin(&mut self) -> Result<()> {
		Ok(())
	}

	fn put_bytes(&mut self, offset: u64, data: &[u8]) -> Result<()> {
		write_chunked(&self.device, offset, data)
	}
}

/// Picks an unused sibling filename for a staging file, following the
/// original's `<name>.mhs`, `<name>.mhs-1`, `<name>.mhs-2`, ... scheme.
fn temp_filename(target: &Path) -> PathBuf {
	let base = target.with_extension(match target.extension() {
		Some(ext) => format!("{}.mhs", ext.to_string_lossy()),
		None => "mhs".to_string(),
	});
	if !base.exists() {
		return base;
	}
	for n in 1..1000 {
		let candidate = PathBuf::from(format!("{}-{n}", base.display()));
		if !candidate.exists() {
			return candidate;
		}
	}
	base
}

/// Saves to a temporary sibling file, then atomically replaces the target
/// on `complete()`. Used whenever the destination is a named file that
/// isn't the document's own device (save-as, or save-in-place when
/// quick-save's preconditions fail).
pub struct FileSaver {
	target: PathBuf,
	temp_path: PathBuf,
	temp_device: Arc<Device>,
}

impl FileSaver {
	pub fn new(target: PathBuf) -> Result<Self> {
		let temp_path = temp_filename(&target);
		fs::File::create(&temp_path).map_err(|e| HexError::device_io(temp_path.display().to_string(), e.to_string()))?;
		let temp_device = crate::device::file::open_file(&temp_path, FileLoadOptions::default())?;
		Ok(Self {
			target,
			temp_path,
			temp_device,
		})
	}
}

impl Saver for FileSaver {
	fn begin(&mut self) -> Result<()> {
		self.temp_device.resize(0)
	}

	fn put_bytes(&mut self, offset: u64, data: &[u8]) -> Result<()> {
		write_chunked(&self.temp_device, offset, data)
	}

	fn fail(&mut self) {
		let _ = fs::remove_file(&self.temp_path);
	}

	fn complete(&mut self) -> Result<()> {
		if self.target.exists() {
			fs::remove_file(&self.target)
				.map_err(|e| HexError::device_io(self.target.display().to_string(), e.to_string()))?;
		}
		fs::rename(&self.temp_path, &self.target)
			.map_err(|e| HexError::device_io(self.target.display().to_string(), e.to_string()))
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::device::buffer::open_buffer;

	#[test]
	fn standard_saver_truncates_then_writes() {
		let device = open_buffer(b"garbage data here".to_vec(), false);
		let mut saver = StandardSaver::new(device.clone());
		saver.begin().unwrap();
		assert_eq!(device.len(), 0);
		saver.put_bytes(0, b"hello").unwrap();
		saver.complete().unwrap();
		assert_eq!(device.read_all().unwrap(), b"hello");
	}

	#[test]
	fn file_saver_replaces_target_atomically() {
		let dir = tempfile::tempdir().unwrap();
		let target = dir.path().join("doc.bin");
		fs::write(&target, b"old contents").unwrap();

		let mut saver = FileSaver::new(target.clone()).unwrap();
		saver.begin().unwrap();
		saver.put_bytes(0, b"new").unwrap();
		saver.complete().unwrap();

		assert_eq!(fs::read(&target).unwrap(), b"new");
	}
}

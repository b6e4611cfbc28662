//! In-memory device backend, the `BufferDevice` counterpart from
//! `devices.cpp`. Identified by a `microdata://` URL carrying an opaque
//! integer handle, used for clipboard payloads and scratch buffers that
//! never touch disk.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::device::{Device, DeviceBackend};
use crate::error::Result;

static NEXT_HANDLE: AtomicU64 = AtomicU64::new(1);

/// URL scheme for in-memory devices.
pub const SCHEME: &str = "microdata";

pub struct BufferBackend {
	data: Vec<u8>,
}

impl DeviceBackend for BufferBackend {
	fn raw_len(&self) -> u64 {
		self.data.len() as u64
	}

	fn raw_read(&mut self, offset: u64, buf: &mut [u8]) -> Result<()> {
		let start = offset as usize;
		buf.copy_from_slice(&self.data[start..start + buf.len()]);
		Ok(())
	}

	fn raw_write(&mut self, offset: u64, data: &[u8]) -> Result<()> {
		let start = offset as usize;
		self.data[start..start + data.len()].copy_from_slice(data);
		Ok(())
	}

	fn raw_resize(&mut self, new_len: u64) -> Result<()> {
		self.data.resize(new_len as usize, 0);
		Ok(())
	}
}

/// Wraps `data` as a new in-memory device. Buffer devices are never
/// exclusivity-claimed: they cannot conflict with anything else since
/// nothing else can observe the same handle.
pub fn open_buffer(data: Vec<u8>, read_only: bool) -> Arc<Device> {
	let handle = NEXT_HANDLE.fetch_add(1, Ordering::Relaxed);
	let url = format!("{SCHEME}://{handle}");
	Arc::new(Device::new(
		url,
		Box::new(BufferBackend { data }),
		read_only,
		false,
		None,
	))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn url_uses_microdata_scheme() {
		let device = open_buffer(vec![1, 2, 3], false);
		assert!(device.url().starts_with("microdata://"));
	}
}

//! External configuration surface: cache sizing knobs a host can load from a
//! TOML file or build programmatically, per the concurrency/IO ambient
//! stack.

use serde::Deserialize;

use crate::device::{DEFAULT_CACHE_BOUNDARY, DEFAULT_CACHE_SIZE};

/// Per-device read cache sizing. Applied via [`crate::device::Device::set_cache_size`]
/// after a device is opened.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
	pub cache_size: u64,
	pub cache_boundary: u64,
}

impl Default for CacheConfig {
	fn default() -> Self {
		Self {
			cache_size: DEFAULT_CACHE_SIZE,
			cache_boundary: DEFAULT_CACHE_BOUNDARY,
		}
	}
}

impl CacheConfig {
	/// Parses a `[cache]`-tabled TOML document into a `CacheConfig`.
	pub fn from_toml_str(s: &str) -> Result<Self, toml::de::Error> {
		#[derive(Deserialize)]
		struct Wrapper {
			#[serde(default)]
			cache: CacheConfig,
		}
		Ok(toml::from_str::<Wrapper>(s)?.cache)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn defaults_match_device_constants() {
		let config = CacheConfig::default();
		assert_eq!(config.cache_size, DEFAULT_CACHE_SIZE);
		assert_eq!(config.cache_boundary, DEFAULT_CACHE_BOUNDARY);
	}

	#[test]
	fn parses_partial_overrides() {
		let config = CacheConfig::from_toml_str("[cache]\ncache_size = 4096\n").unwrap();
		assert_eq!(config.cache_size, 4096);
		assert_eq!(config.cache_boundary, DEFAULT_CACHE_BOUNDARY);
	}
}

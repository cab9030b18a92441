//! The environment/config knobs spec.md §6 lists. Small explicit struct
//! rather than a config-file framework, the way the teacher keeps its
//! CLI options as plain `clap::Args` structs.

use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ShadowMethod {
	/// 8-direction height propagation (spec.md §4.8, the specified
	/// default).
	HeightPropagation,
}

#[derive(Debug, Clone)]
pub struct RunConfig {
	pub chunk_size_mb: u64,
	pub max_memory_percent: f64,
	pub max_output_pixels: u64,
	pub shadow_method: ShadowMethod,
	pub timeout: Duration,
}

impl Default for RunConfig {
	fn default() -> Self {
		RunConfig {
			chunk_size_mb: 200,
			max_memory_percent: 0.85,
			max_output_pixels: 500_000_000,
			shadow_method: ShadowMethod::HeightPropagation,
			timeout: Duration::from_secs(1800),
		}
	}
}

impl RunConfig {
	/// Overrides defaults from `DEM_*` environment variables when present.
	pub fn from_env() -> Self {
		let mut cfg = RunConfig::default();
		if let Ok(v) = std::env::var("DEM_CHUNK_SIZE_MB") {
			if let Ok(v) = v.parse() {
				cfg.chunk_size_mb = v;
			}
		}
		if let Ok(v) = std::env::var("DEM_MAX_MEMORY_PERCENT") {
			if let Ok(v) = v.parse() {
				cfg.max_memory_percent = v;
			}
		}
		if let Ok(v) = std::env::var("DEM_MAX_OUTPUT_PIXELS") {
			if let Ok(v) = v.parse() {
				cfg.max_output_pixels = v;
			}
		}
		if let Ok(v) = std::env::var("DEM_TIMEOUT_SECS") {
			if let Ok(v) = v.parse::<u64>() {
				cfg.timeout = Duration::from_secs(v);
			}
		}
		cfg
	}

	pub fn chunk_size_bytes(&self) -> u64 { self.chunk_size_mb * 1024 * 1024 }
}

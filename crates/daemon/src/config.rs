//! Scheduler configuration.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// Default debounce between the last dirtying event and a run start.
pub const DEFAULT_AUTOREPARSE_DELAY_MS: u64 = 300;
/// Default bound on concurrently collecting passes.
pub const DEFAULT_MAX_WORKERS: usize = 2;

/// Tunables read by the scheduler on every decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DaemonConfig {
	/// Debounce delay in milliseconds.
	pub autoreparse_delay_ms: u64,
	/// Master switch for automatic background runs.
	pub updates_enabled: bool,
	/// Worker pool size; read once when the scheduler is built.
	pub max_workers: usize,
	/// Name of the active analysis profile. Changing it re-highlights everything.
	pub analysis_profile: String,
}

impl Default for DaemonConfig {
	fn default() -> Self {
		Self {
			autoreparse_delay_ms: DEFAULT_AUTOREPARSE_DELAY_MS,
			updates_enabled: true,
			max_workers: DEFAULT_MAX_WORKERS,
			analysis_profile: "default".to_string(),
		}
	}
}

/// Errors from parsing or validating a [`DaemonConfig`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
	/// Input is not valid TOML or does not match the schema.
	#[error("TOML parse error: {0}")]
	Toml(#[from] toml::de::Error),
	/// A field holds a value outside its domain.
	#[error("invalid value for '{field}': {reason}")]
	InvalidValue { field: &'static str, reason: String },
}

impl DaemonConfig {
	/// Parses and validates a TOML document; missing keys take defaults.
	pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
		let config: Self = toml::from_str(input)?;
		config.validate()?;
		Ok(config)
	}

	pub fn validate(&self) -> Result<(), ConfigError> {
		if self.max_workers == 0 {
			return Err(ConfigError::InvalidValue {
				field: "max_workers",
				reason: "must be at least 1".to_string(),
			});
		}
		if self.analysis_profile.trim().is_empty() {
			return Err(ConfigError::InvalidValue {
				field: "analysis_profile",
				reason: "must not be empty".to_string(),
			});
		}
		Ok(())
	}

	pub fn debounce_delay(&self) -> Duration {
		Duration::from_millis(self.autoreparse_delay_ms)
	}

	/// True if switching from `self` to `next` changes what passes report.
	pub fn is_code_highlighting_changed(&self, next: &DaemonConfig) -> bool {
		self.analysis_profile != next.analysis_profile
	}
}

/// Provides the current configuration.
pub trait ConfigSource: Send + Sync {
	fn daemon_config(&self) -> DaemonConfig;
}

impl ConfigSource for DaemonConfig {
	fn daemon_config(&self) -> DaemonConfig {
		self.clone()
	}
}

/// Mutable configuration shared between the host and the scheduler.
#[derive(Debug, Clone, Default)]
pub struct SharedConfig {
	inner: Arc<RwLock<DaemonConfig>>,
}

impl SharedConfig {
	pub fn new(config: DaemonConfig) -> Self {
		Self {
			inner: Arc::new(RwLock::new(config)),
		}
	}

	pub fn set(&self, config: DaemonConfig) {
		*self.inner.write() = config;
	}

	pub fn update(&self, f: impl FnOnce(&mut DaemonConfig)) {
		f(&mut self.inner.write());
	}
}

impl ConfigSource for SharedConfig {
	fn daemon_config(&self) -> DaemonConfig {
		self.inner.read().clone()
	}
}

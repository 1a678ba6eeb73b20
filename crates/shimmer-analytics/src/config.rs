// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Batch consumer configuration.
//!
//! A [`ConsumerConfig`] is built either in code through
//! [`ConsumerConfig::builder`] or from a TOML document plus `SHIMMER_*`
//! environment overrides through [`ConfigLayer`]. Either way it is normalized
//! once, before any background task starts.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

use crate::error::{Result, SdkError};

pub const DEFAULT_BATCH_SIZE: usize = 20;
pub const MAX_BATCH_SIZE: usize = 200;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(30);
pub const DEFAULT_IDLE_SLEEP: Duration = Duration::from_millis(10);
pub const DEFAULT_MAX_FILE_SIZE: u64 = 100 * 1024 * 1024;

/// Rotation policy of the spool file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RotationConfig {
	/// Rotate before a write would grow the active file past this many bytes.
	pub max_size_bytes: u64,
	/// Rotated segments to keep; 0 keeps all of them.
	pub max_backups: usize,
	/// Rotated segments older than this are removed; `None` keeps them.
	pub max_age: Option<Duration>,
	/// Gzip rotated segments.
	pub compress: bool,
}

impl Default for RotationConfig {
	fn default() -> Self {
		Self {
			max_size_bytes: DEFAULT_MAX_FILE_SIZE,
			max_backups: 0,
			max_age: None,
			compress: true,
		}
	}
}

/// Configuration of a [`BatchConsumer`](crate::BatchConsumer).
#[derive(Clone)]
pub struct ConsumerConfig {
	/// Spool directory for batches that could not be delivered. `None` drops them.
	pub temp_dir: Option<PathBuf>,
	/// Base address of the collection server, e.g. `https://logs.example.com`.
	pub server_url: String,
	pub app_id: String,
	pub app_token: String,
	/// Events per batch, clamped to `1..=200`.
	pub batch_size: usize,
	/// HTTP request timeout.
	pub timeout: Duration,
	/// Gzip the report payload.
	pub compress: bool,
	/// Interval of the flush ticker and of the spool directory scan.
	pub interval: Duration,
	/// Intake channel capacity; defaults to twice the batch size.
	pub channel_capacity: Option<usize>,
	pub rotation: RotationConfig,
	/// How long the flush loop sleeps when there is nothing to do.
	pub idle_sleep: Duration,
}

impl std::fmt::Debug for ConsumerConfig {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("ConsumerConfig")
			.field("temp_dir", &self.temp_dir)
			.field("server_url", &self.server_url)
			.field("app_id", &self.app_id)
			.field("app_token", &"[REDACTED]")
			.field("batch_size", &self.batch_size)
			.field("timeout", &self.timeout)
			.field("compress", &self.compress)
			.field("interval", &self.interval)
			.field("channel_capacity", &self.channel_capacity)
			.field("rotation", &self.rotation)
			.field("idle_sleep", &self.idle_sleep)
			.finish()
	}
}

impl Default for ConsumerConfig {
	fn default() -> Self {
		Self {
			temp_dir: None,
			server_url: String::new(),
			app_id: String::new(),
			app_token: String::new(),
			batch_size: DEFAULT_BATCH_SIZE,
			timeout: DEFAULT_TIMEOUT,
			compress: false,
			interval: DEFAULT_INTERVAL,
			channel_capacity: None,
			rotation: RotationConfig::default(),
			idle_sleep: DEFAULT_IDLE_SLEEP,
		}
	}
}

impl ConsumerConfig {
	pub fn builder() -> ConsumerConfigBuilder {
		ConsumerConfigBuilder::default()
	}

	/// Parses a TOML document and applies `SHIMMER_*` environment overrides.
	pub fn from_toml_str(content: &str) -> Result<Self> {
		let layer: ConfigLayer =
			toml::from_str(content).map_err(|e| SdkError::Config(format!("invalid TOML: {e}")))?;
		Ok(layer.apply_env().into_config())
	}

	/// Reads a TOML file and applies `SHIMMER_*` environment overrides.
	pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self> {
		let path = path.as_ref();
		debug!(path = %path.display(), "loading consumer config file");
		let content = std::fs::read_to_string(path)
			.map_err(|e| SdkError::Config(format!("failed to read {}: {e}", path.display())))?;
		Self::from_toml_str(&content)
	}

	/// Validates the configuration and replaces invalid or zero values with defaults.
	///
	/// An empty server url is the only hard failure. The spool directory, when
	/// set, is made absolute and created.
	pub fn normalize(mut self) -> Result<Self> {
		self.server_url = self.server_url.trim().trim_end_matches('/').to_string();
		if self.server_url.is_empty() {
			return Err(SdkError::InvalidServerUrl);
		}

		self.batch_size = match self.batch_size {
			0 => DEFAULT_BATCH_SIZE,
			n => n.min(MAX_BATCH_SIZE),
		};
		if self.timeout.is_zero() {
			self.timeout = DEFAULT_TIMEOUT;
		}
		if self.interval.is_zero() {
			self.interval = DEFAULT_INTERVAL;
		}
		if self.idle_sleep.is_zero() {
			self.idle_sleep = DEFAULT_IDLE_SLEEP;
		}
		if self.channel_capacity == Some(0) {
			self.channel_capacity = None;
		}
		if self.rotation.max_size_bytes == 0 {
			self.rotation.max_size_bytes = DEFAULT_MAX_FILE_SIZE;
		}

		self.temp_dir = match self.temp_dir.take() {
			Some(dir) if !dir.as_os_str().is_empty() => Some(prepare_dir(&dir)?),
			_ => None,
		};

		Ok(self)
	}

	/// Capacity of the intake channel.
	pub fn intake_capacity(&self) -> usize {
		self.channel_capacity.unwrap_or(self.batch_size * 2).max(1)
	}
}

fn prepare_dir(dir: &Path) -> Result<PathBuf> {
	let absolute = if dir.is_absolute() {
		dir.to_path_buf()
	} else {
		std::env::current_dir()?.join(dir)
	};
	std::fs::create_dir_all(&absolute)?;
	Ok(absolute)
}

/// Builder for [`ConsumerConfig`].
#[derive(Debug, Default)]
pub struct ConsumerConfigBuilder {
	config: ConsumerConfig,
}

impl ConsumerConfigBuilder {
	pub fn server_url(mut self, url: impl Into<String>) -> Self {
		self.config.server_url = url.into();
		self
	}

	pub fn app_id(mut self, app_id: impl Into<String>) -> Self {
		self.config.app_id = app_id.into();
		self
	}

	pub fn app_token(mut self, token: impl Into<String>) -> Self {
		self.config.app_token = token.into();
		self
	}

	/// Enables spooling of undeliverable batches into `dir`.
	pub fn temp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
		self.config.temp_dir = Some(dir.into());
		self
	}

	pub fn batch_size(mut self, size: usize) -> Self {
		self.config.batch_size = size;
		self
	}

	pub fn timeout(mut self, timeout: Duration) -> Self {
		self.config.timeout = timeout;
		self
	}

	pub fn compress(mut self, compress: bool) -> Self {
		self.config.compress = compress;
		self
	}

	pub fn interval(mut self, interval: Duration) -> Self {
		self.config.interval = interval;
		self
	}

	pub fn channel_capacity(mut self, capacity: usize) -> Self {
		self.config.channel_capacity = Some(capacity);
		self
	}

	pub fn rotation(mut self, rotation: RotationConfig) -> Self {
		self.config.rotation = rotation;
		self
	}

	pub fn idle_sleep(mut self, sleep: Duration) -> Self {
		self.config.idle_sleep = sleep;
		self
	}

	pub fn build(self) -> ConsumerConfig {
		self.config
	}
}

/// Partial configuration - all fields are Option for merging.
///
/// ```toml
/// server_url = "https://logs.example.com"
/// app_id = "my-game"
/// app_token = "..."
/// temp_dir = "/var/spool/my-game"
/// batch_size = 50
/// timeout_secs = 10
/// compress = true
/// interval_secs = 5
///
/// [rotation]
/// max_size_mb = 100
/// max_backups = 10
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigLayer {
	#[serde(default)]
	pub server_url: Option<String>,
	#[serde(default)]
	pub app_id: Option<String>,
	#[serde(default)]
	pub app_token: Option<String>,
	#[serde(default)]
	pub temp_dir: Option<PathBuf>,
	#[serde(default)]
	pub batch_size: Option<usize>,
	#[serde(default)]
	pub timeout_secs: Option<u64>,
	#[serde(default)]
	pub compress: Option<bool>,
	#[serde(default)]
	pub interval_secs: Option<u64>,
	#[serde(default)]
	pub channel_capacity: Option<usize>,
	#[serde(default)]
	pub rotation: Option<RotationLayer>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RotationLayer {
	#[serde(default)]
	pub max_size_mb: Option<u64>,
	#[serde(default)]
	pub max_backups: Option<usize>,
	#[serde(default)]
	pub max_age_days: Option<u64>,
	#[serde(default)]
	pub compress: Option<bool>,
}

impl ConfigLayer {
	/// Applies `SHIMMER_*` variables from the process environment.
	pub fn apply_env(self) -> Self {
		self.apply_env_from(|key| std::env::var(key).ok())
	}

	/// Applies `SHIMMER_*` variables read through `lookup`. Values that fail to
	/// parse are ignored.
	pub fn apply_env_from<F>(mut self, lookup: F) -> Self
	where
		F: Fn(&str) -> Option<String>,
	{
		if let Some(v) = lookup("SHIMMER_SERVER_URL") {
			self.server_url = Some(v);
		}
		if let Some(v) = lookup("SHIMMER_APP_ID") {
			self.app_id = Some(v);
		}
		if let Some(v) = lookup("SHIMMER_APP_TOKEN") {
			self.app_token = Some(v);
		}
		if let Some(v) = lookup("SHIMMER_TEMP_DIR") {
			self.temp_dir = Some(PathBuf::from(v));
		}
		if let Some(v) = lookup("SHIMMER_BATCH_SIZE").and_then(|v| v.parse().ok()) {
			self.batch_size = Some(v);
		}
		if let Some(v) = lookup("SHIMMER_TIMEOUT_SECS").and_then(|v| v.parse().ok()) {
			self.timeout_secs = Some(v);
		}
		if let Some(v) = lookup("SHIMMER_COMPRESS").and_then(|v| parse_bool(&v)) {
			self.compress = Some(v);
		}
		if let Some(v) = lookup("SHIMMER_INTERVAL_SECS").and_then(|v| v.parse().ok()) {
			self.interval_secs = Some(v);
		}
		self
	}

	/// Fills unset fields with defaults. The result still needs
	/// [`ConsumerConfig::normalize`].
	pub fn into_config(self) -> ConsumerConfig {
		let defaults = ConsumerConfig::default();
		let rotation = self.rotation.unwrap_or_default();
		let default_rotation = RotationConfig::default();

		ConsumerConfig {
			temp_dir: self.temp_dir,
			server_url: self.server_url.unwrap_or_default(),
			app_id: self.app_id.unwrap_or_default(),
			app_token: self.app_token.unwrap_or_default(),
			batch_size: self.batch_size.unwrap_or(defaults.batch_size),
			timeout: self
				.timeout_secs
				.map(Duration::from_secs)
				.unwrap_or(defaults.timeout),
			compress: self.compress.unwrap_or(defaults.compress),
			interval: self
				.interval_secs
				.map(Duration::from_secs)
				.unwrap_or(defaults.interval),
			channel_capacity: self.channel_capacity,
			rotation: RotationConfig {
				max_size_bytes: rotation
					.max_size_mb
					.map(|mb| mb * 1024 * 1024)
					.unwrap_or(default_rotation.max_size_bytes),
				max_backups: rotation.max_backups.unwrap_or(default_rotation.max_backups),
				max_age: rotation
					.max_age_days
					.filter(|days| *days > 0)
					.map(|days| Duration::from_secs(days * 24 * 60 * 60)),
				compress: rotation.compress.unwrap_or(default_rotation.compress),
			},
			idle_sleep: defaults.idle_sleep,
		}
	}
}

fn parse_bool(value: &str) -> Option<bool> {
	match value.trim().to_ascii_lowercase().as_str() {
		"1" | "true" | "yes" | "on" => Some(true),
		"0" | "false" | "no" | "off" => Some(false),
		_ => None,
	}
}

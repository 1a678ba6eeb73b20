// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Overflow spool for batches the report endpoint did not accept.
//!
//! Failed batches are appended to a rotating file in the configured
//! directory. A [`DirWatcher`] periodically rotates that file and re-uploads
//! every completed segment through the [`ChunkUploader`], deleting each one
//! after its last chunk is acknowledged.

mod upload;
mod watcher;
mod writer;

pub use upload::{file_md5, ChunkUploader, CHUNK_SIZE, UPLOAD_PATH};
pub use watcher::DirWatcher;
pub use writer::RotatingWriter;

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::{debug, warn};

use crate::config::ConsumerConfig;
use crate::error::{Result, SdkError};

/// Writer, directory and uploader shared by the transmitter and the watcher.
#[derive(Debug)]
pub struct Spooler {
	dir: PathBuf,
	active_name: String,
	writer: Mutex<RotatingWriter>,
	uploader: ChunkUploader,
}

impl Spooler {
	/// Creates a spooler for `config.temp_dir`. The config must be normalized
	/// and have a spool directory.
	pub fn new(config: &ConsumerConfig) -> Result<Self> {
		let uploader = ChunkUploader::new(config)?;
		Self::with_uploader(config, uploader)
	}

	pub fn with_uploader(config: &ConsumerConfig, uploader: ChunkUploader) -> Result<Self> {
		let dir = config
			.temp_dir
			.clone()
			.ok_or_else(|| SdkError::Config("spooling requires temp_dir".to_string()))?;
		let writer = RotatingWriter::open(&dir, &config.app_id, config.rotation.clone())?;
		Ok(Self {
			dir,
			active_name: writer.filename().to_string(),
			writer: Mutex::new(writer),
			uploader,
		})
	}

	// The writer keeps its counters consistent across a panic in a caller.
	fn writer(&self) -> MutexGuard<'_, RotatingWriter> {
		self.writer.lock().unwrap_or_else(PoisonError::into_inner)
	}

	pub fn directory(&self) -> &Path {
		&self.dir
	}

	/// Name of the file currently open for writing.
	pub fn active_file_name(&self) -> &str {
		&self.active_name
	}

	/// Appends the raw batch bytes to the active file.
	pub fn write_batch(&self, payload: &[u8]) -> Result<()> {
		let mut writer = self.writer();
		if writer.is_closed() {
			return Err(SdkError::AlreadyClosed);
		}
		writer.write(payload)?;
		Ok(())
	}

	/// Rotates the active file if it has pending data. Returns whether a new
	/// segment was produced.
	pub fn rotate_if_pending(&self) -> Result<bool> {
		let mut writer = self.writer();
		if writer.is_closed() {
			return Err(SdkError::AlreadyClosed);
		}
		if writer.current_line_count() == 0 && writer.current_size() == 0 {
			return Ok(false);
		}
		Ok(writer.force_rotate()?.is_some())
	}

	/// Completed segments waiting for upload, sorted by name.
	///
	/// Excludes the active file and hidden in-progress files.
	pub fn pending_files(&self) -> Result<Vec<PathBuf>> {
		let mut files = Vec::new();
		for entry in std::fs::read_dir(&self.dir)? {
			let entry = entry?;
			if !entry.file_type()?.is_file() {
				continue;
			}
			let name = entry.file_name();
			let name = name.to_string_lossy();
			if name == self.active_name || name.starts_with('.') {
				continue;
			}
			files.push(entry.path());
		}
		files.sort();
		Ok(files)
	}

	/// Uploads and deletes every pending segment. Stops at the first failure,
	/// leaving the remaining files for the next scan. Returns the number of
	/// segments uploaded.
	pub async fn scan(&self) -> Result<usize> {
		let files = self.pending_files()?;
		let mut uploaded = 0;
		for path in files {
			self.uploader.upload(&path).await?;
			match tokio::fs::remove_file(&path).await {
				Ok(()) => {}
				Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
					warn!(path = %path.display(), "spool segment vanished before delete");
				}
				Err(e) => return Err(e.into()),
			}
			debug!(path = %path.display(), "spool segment uploaded and removed");
			uploaded += 1;
		}
		Ok(uploaded)
	}

	/// Closes the writer. Idempotent.
	pub fn close(&self) -> Result<()> {
		self.writer().close()?;
		Ok(())
	}
}

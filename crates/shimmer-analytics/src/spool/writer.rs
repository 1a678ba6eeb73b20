// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Size-rotated append-only spool file.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, TimeDelta, Utc};
use flate2::write::GzEncoder;
use flate2::Compression;
use tracing::{debug, info, warn};

use crate::config::RotationConfig;

const BACKUP_TIME_FORMAT: &str = "%Y-%m-%dT%H-%M-%S%.3f";
const LOG_EXT: &str = ".log";
const GZ_EXT: &str = ".gz";

fn closed_error() -> io::Error {
	io::Error::other("spool writer already closed")
}

/// Appends batches to `<dir>/<app_id>-logback.log` and rotates it into
/// timestamped segments.
///
/// Segments being compressed carry a leading `.` until they are complete.
#[derive(Debug)]
pub struct RotatingWriter {
	dir: PathBuf,
	stem: String,
	filename: String,
	policy: RotationConfig,
	file: Option<File>,
	size: u64,
	lines: u64,
	closed: bool,
	last_rotation: Option<DateTime<Utc>>,
}

impl RotatingWriter {
	/// Opens the writer. An active file left by a previous run is appended to.
	pub fn open(dir: impl Into<PathBuf>, app_id: &str, policy: RotationConfig) -> io::Result<Self> {
		let dir = dir.into();
		fs::create_dir_all(&dir)?;
		let stem = format!("{app_id}-logback");
		let filename = format!("{stem}{LOG_EXT}");

		let mut writer = Self {
			dir,
			stem,
			filename,
			policy,
			file: None,
			size: 0,
			lines: 0,
			closed: false,
			last_rotation: None,
		};

		writer.recover_staged()?;

		let path = writer.path();
		if path.is_file() {
			writer.size = fs::metadata(&path)?.len();
			writer.lines = count_lines(&path).unwrap_or_else(|e| {
				warn!(error = %e, path = %path.display(), "failed to count lines of existing spool file");
				u64::from(writer.size > 0)
			});
			debug!(size = writer.size, lines = writer.lines, "resuming existing spool file");
		}

		Ok(writer)
	}

	// A crash mid-compression leaves `.<segment>.log` and possibly a partial
	// `.<segment>.log.gz`. The plain segment is restored; partial archives are
	// removed unless the finished archive already exists.
	fn recover_staged(&self) -> io::Result<()> {
		let prefix = format!(".{}-", self.stem);
		let gz_suffix = format!("{LOG_EXT}{GZ_EXT}");
		for entry in fs::read_dir(&self.dir)? {
			let entry = entry?;
			if !entry.file_type()?.is_file() {
				continue;
			}
			let name = entry.file_name().to_string_lossy().into_owned();
			let Some(visible) = name.strip_prefix('.') else {
				continue;
			};
			if !name.starts_with(&prefix) {
				continue;
			}

			if visible.ends_with(&gz_suffix) {
				fs::remove_file(entry.path())?;
				debug!(file = %name, "removed partial spool archive");
			} else if visible.ends_with(LOG_EXT) {
				if self.dir.join(format!("{visible}{GZ_EXT}")).exists() {
					fs::remove_file(entry.path())?;
					debug!(file = %name, "removed staged segment already archived");
				} else {
					fs::rename(entry.path(), self.dir.join(visible))?;
					info!(segment = %visible, "recovered staged spool segment");
				}
			}
		}
		Ok(())
	}

	/// Name of the active file, without directory.
	pub fn filename(&self) -> &str {
		&self.filename
	}

	pub fn directory(&self) -> &Path {
		&self.dir
	}

	pub fn path(&self) -> PathBuf {
		self.dir.join(&self.filename)
	}

	/// Newline-terminated lines written to the active file since it was opened.
	pub fn current_line_count(&self) -> u64 {
		self.lines
	}

	pub fn current_size(&self) -> u64 {
		self.size
	}

	pub fn is_closed(&self) -> bool {
		self.closed
	}

	/// Appends `data`, rotating first when it would push the active file past
	/// the size limit. A write larger than the limit goes to a fresh file.
	pub fn write(&mut self, data: &[u8]) -> io::Result<usize> {
		if self.closed {
			return Err(closed_error());
		}

		let len = data.len() as u64;
		if self.size > 0 && self.size + len > self.policy.max_size_bytes {
			self.rotate()?;
		}

		if self.file.is_none() {
			self.file = Some(
				OpenOptions::new()
					.create(true)
					.append(true)
					.open(self.path())?,
			);
		}
		let file = self.file.as_mut().ok_or_else(closed_error)?;
		file.write_all(data)?;
		file.flush()?;

		self.size += len;
		self.lines += data.iter().filter(|b| **b == b'\n').count() as u64;
		Ok(data.len())
	}

	/// Rotates the active file if it holds any data. Returns the path of the
	/// new segment.
	pub fn force_rotate(&mut self) -> io::Result<Option<PathBuf>> {
		if self.closed {
			return Err(closed_error());
		}
		if self.size == 0 && self.lines == 0 {
			return Ok(None);
		}
		self.rotate()
	}

	/// Syncs and closes the active file. Later writes fail.
	pub fn close(&mut self) -> io::Result<()> {
		if self.closed {
			return Ok(());
		}
		self.closed = true;
		if let Some(file) = self.file.take() {
			file.sync_all()?;
		}
		Ok(())
	}

	fn rotate(&mut self) -> io::Result<Option<PathBuf>> {
		if let Some(file) = self.file.take() {
			file.sync_all()?;
		}

		let active = self.path();
		if !active.exists() {
			self.size = 0;
			self.lines = 0;
			return Ok(None);
		}

		let backup_name = self.backup_name();
		let segment = if self.policy.compress {
			let staging = self.dir.join(format!(".{backup_name}"));
			fs::rename(&active, &staging)?;
			self.size = 0;
			self.lines = 0;
			self.compress_segment(&staging, &backup_name)?
		} else {
			let target = self.dir.join(&backup_name);
			fs::rename(&active, &target)?;
			self.size = 0;
			self.lines = 0;
			target
		};

		info!(segment = %segment.display(), "rotated spool file");
		self.prune();
		Ok(Some(segment))
	}

	fn compress_segment(&self, staging: &Path, backup_name: &str) -> io::Result<PathBuf> {
		let staging_gz = self.dir.join(format!(".{backup_name}{GZ_EXT}"));
		let target = self.dir.join(format!("{backup_name}{GZ_EXT}"));

		let result = (|| -> io::Result<()> {
			let mut input = BufReader::new(File::open(staging)?);
			let mut encoder = GzEncoder::new(File::create(&staging_gz)?, Compression::default());
			io::copy(&mut input, &mut encoder)?;
			encoder.finish()?.sync_all()?;
			fs::rename(&staging_gz, &target)
		})();

		match result {
			Ok(()) => {
				fs::remove_file(staging)?;
				Ok(target)
			}
			Err(e) => {
				warn!(error = %e, "failed to compress spool segment, keeping it uncompressed");
				let _ = fs::remove_file(&staging_gz);
				let plain = self.dir.join(backup_name);
				fs::rename(staging, &plain)?;
				Ok(plain)
			}
		}
	}

	// Segment names sort in rotation order, so stamps never repeat or go back.
	fn backup_name(&mut self) -> String {
		let mut stamp = Utc::now();
		if let Some(last) = self.last_rotation {
			if stamp <= last {
				stamp = last + TimeDelta::milliseconds(1);
			}
		}
		loop {
			let name = format!("{}-{}{LOG_EXT}", self.stem, stamp.format(BACKUP_TIME_FORMAT));
			if !self.dir.join(&name).exists() && !self.dir.join(format!("{name}{GZ_EXT}")).exists() {
				self.last_rotation = Some(stamp);
				return name;
			}
			stamp += TimeDelta::milliseconds(1);
		}
	}

	/// Rotated segments of this writer, oldest first.
	pub fn segments(&self) -> io::Result<Vec<PathBuf>> {
		let prefix = format!("{}-", self.stem);
		let mut segments: Vec<PathBuf> = fs::read_dir(&self.dir)?
			.filter_map(|entry| entry.ok())
			.filter(|entry| entry.file_type().map(|t| t.is_file()).unwrap_or(false))
			.filter(|entry| {
				let name = entry.file_name();
				let name = name.to_string_lossy();
				name.starts_with(&prefix)
					&& (name.ends_with(LOG_EXT) || name.ends_with(&format!("{LOG_EXT}{GZ_EXT}")))
			})
			.map(|entry| entry.path())
			.collect();
		segments.sort();
		Ok(segments)
	}

	fn prune(&self) {
		if self.policy.max_backups == 0 && self.policy.max_age.is_none() {
			return;
		}
		let segments = match self.segments() {
			Ok(segments) => segments,
			Err(e) => {
				warn!(error = %e, "failed to list spool segments for pruning");
				return;
			}
		};

		let excess = if self.policy.max_backups > 0 {
			segments.len().saturating_sub(self.policy.max_backups)
		} else {
			0
		};

		for (i, segment) in segments.iter().enumerate() {
			let expired = self.policy.max_age.is_some_and(|max_age| {
				fs::metadata(segment)
					.and_then(|m| m.modified())
					.ok()
					.and_then(|modified| SystemTime::now().duration_since(modified).ok())
					.is_some_and(|age| age > max_age)
			});
			if i < excess || expired {
				match fs::remove_file(segment) {
					Ok(()) => info!(segment = %segment.display(), "pruned spool segment"),
					Err(e) if e.kind() == io::ErrorKind::NotFound => {}
					Err(e) => warn!(error = %e, segment = %segment.display(), "failed to prune spool segment"),
				}
			}
		}
	}
}

fn count_lines(path: &Path) -> io::Result<u64> {
	let mut reader = BufReader::new(File::open(path)?);
	let mut buf = [0u8; 64 * 1024];
	let mut lines = 0u64;
	loop {
		let n = reader.read(&mut buf)?;
		if n == 0 {
			return Ok(lines);
		}
		lines += buf[..n].iter().filter(|b| **b == b'\n').count() as u64;
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use flate2::read::GzDecoder;
	use std::time::Duration;

	fn policy(max_size_bytes: u64, compress: bool) -> RotationConfig {
		RotationConfig {
			max_size_bytes,
			max_backups: 0,
			max_age: None,
			compress,
		}
	}

	fn file_names(dir: &Path) -> Vec<String> {
		let mut names: Vec<String> = fs::read_dir(dir)
			.unwrap()
			.map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
			.collect();
		names.sort();
		names
	}

	#[test]
	fn test_write_appends_and_counts_lines() {
		let dir = tempfile::tempdir().unwrap();
		let mut writer = RotatingWriter::open(dir.path(), "app", policy(1024, false)).unwrap();

		writer.write(b"a\nb\n").unwrap();
		writer.write(b"c\n").unwrap();

		assert_eq!(writer.filename(), "app-logback.log");
		assert_eq!(writer.current_line_count(), 3);
		assert_eq!(fs::read(writer.path()).unwrap(), b"a\nb\nc\n");
	}

	#[test]
	fn test_force_rotate_on_empty_file_is_noop() {
		let dir = tempfile::tempdir().unwrap();
		let mut writer = RotatingWriter::open(dir.path(), "app", policy(1024, false)).unwrap();

		assert_eq!(writer.force_rotate().unwrap(), None);
		assert!(file_names(dir.path()).is_empty());
	}

	#[test]
	fn test_force_rotate_renames_to_timestamped_segment() {
		let dir = tempfile::tempdir().unwrap();
		let mut writer = RotatingWriter::open(dir.path(), "app", policy(1024, false)).unwrap();
		writer.write(b"x\n").unwrap();

		let segment = writer.force_rotate().unwrap().unwrap();
		let name = segment.file_name().unwrap().to_string_lossy().into_owned();
		assert!(name.starts_with("app-logback-"), "{name}");
		assert!(name.ends_with(".log"));
		assert_eq!(fs::read(&segment).unwrap(), b"x\n");
		assert_eq!(writer.current_line_count(), 0);
		assert!(!writer.path().exists());
	}

	#[test]
	fn test_compressed_rotation_leaves_only_gz() {
		let dir = tempfile::tempdir().unwrap();
		let mut writer = RotatingWriter::open(dir.path(), "app", policy(1024, true)).unwrap();
		writer.write(b"{\"a\":1}\n").unwrap();

		let segment = writer.force_rotate().unwrap().unwrap();
		assert!(segment.to_string_lossy().ends_with(".log.gz"));
		assert_eq!(file_names(dir.path()).len(), 1);

		let mut decoded = String::new();
		GzDecoder::new(File::open(&segment).unwrap())
			.read_to_string(&mut decoded)
			.unwrap();
		assert_eq!(decoded, "{\"a\":1}\n");
	}

	#[test]
	fn test_open_recovers_interrupted_compression() {
		let dir = tempfile::tempdir().unwrap();
		let staged = ".app-logback-2026-01-01T00-00-00.000.log";
		fs::write(dir.path().join(staged), b"{\"a\":1}\n").unwrap();
		fs::write(dir.path().join(format!("{staged}.gz")), b"partial").unwrap();

		let writer = RotatingWriter::open(dir.path(), "app", policy(1024, true)).unwrap();

		assert_eq!(file_names(dir.path()), vec!["app-logback-2026-01-01T00-00-00.000.log"]);
		assert_eq!(fs::read(&writer.segments().unwrap()[0]).unwrap(), b"{\"a\":1}\n");
	}

	#[test]
	fn test_open_drops_staged_copy_of_finished_archive() {
		let dir = tempfile::tempdir().unwrap();
		fs::write(dir.path().join(".app-logback-2026-01-01T00-00-00.000.log"), b"x\n").unwrap();
		fs::write(dir.path().join("app-logback-2026-01-01T00-00-00.000.log.gz"), b"gz").unwrap();
		fs::write(dir.path().join(".other-logback-2026-01-01T00-00-00.000.log"), b"y\n").unwrap();

		RotatingWriter::open(dir.path(), "app", policy(1024, true)).unwrap();

		assert_eq!(
			file_names(dir.path()),
			vec![
				".other-logback-2026-01-01T00-00-00.000.log",
				"app-logback-2026-01-01T00-00-00.000.log.gz",
			]
		);
	}

	#[test]
	fn test_size_limit_triggers_rotation() {
		let dir = tempfile::tempdir().unwrap();
		let mut writer = RotatingWriter::open(dir.path(), "app", policy(10, false)).unwrap();

		writer.write(b"123456\n").unwrap();
		writer.write(b"789012\n").unwrap();

		assert_eq!(writer.segments().unwrap().len(), 1);
		assert_eq!(fs::read(writer.path()).unwrap(), b"789012\n");
	}

	#[test]
	fn test_oversized_write_goes_to_fresh_file() {
		let dir = tempfile::tempdir().unwrap();
		let mut writer = RotatingWriter::open(dir.path(), "app", policy(4, false)).unwrap();

		writer.write(b"0123456789\n").unwrap();
		assert_eq!(writer.segments().unwrap().len(), 0);
		assert_eq!(writer.current_size(), 11);
	}

	#[test]
	fn test_max_backups_prunes_oldest() {
		let dir = tempfile::tempdir().unwrap();
		let mut cfg = policy(1024, false);
		cfg.max_backups = 2;
		let mut writer = RotatingWriter::open(dir.path(), "app", cfg).unwrap();

		for i in 0..4 {
			writer.write(format!("{i}\n").as_bytes()).unwrap();
			writer.force_rotate().unwrap();
		}

		let segments = writer.segments().unwrap();
		assert_eq!(segments.len(), 2);
		assert_eq!(fs::read(&segments[0]).unwrap(), b"2\n");
		assert_eq!(fs::read(&segments[1]).unwrap(), b"3\n");
	}

	#[test]
	fn test_max_age_prunes_expired() {
		let dir = tempfile::tempdir().unwrap();
		let mut cfg = policy(1024, false);
		cfg.max_age = Some(Duration::from_millis(1));
		let mut writer = RotatingWriter::open(dir.path(), "app", cfg).unwrap();

		writer.write(b"old\n").unwrap();
		writer.force_rotate().unwrap();
		std::thread::sleep(Duration::from_millis(20));
		writer.write(b"new\n").unwrap();
		writer.force_rotate().unwrap();

		let segments = writer.segments().unwrap();
		assert!(segments.iter().all(|s| fs::read(s).unwrap() != b"old\n"));
	}

	#[test]
	fn test_existing_file_is_resumed() {
		let dir = tempfile::tempdir().unwrap();
		fs::write(dir.path().join("app-logback.log"), b"l1\nl2\n").unwrap();

		let mut writer = RotatingWriter::open(dir.path(), "app", policy(1024, false)).unwrap();
		assert_eq!(writer.current_line_count(), 2);

		writer.write(b"l3\n").unwrap();
		assert_eq!(fs::read(writer.path()).unwrap(), b"l1\nl2\nl3\n");
	}

	#[test]
	fn test_write_after_close_fails() {
		let dir = tempfile::tempdir().unwrap();
		let mut writer = RotatingWriter::open(dir.path(), "app", policy(1024, false)).unwrap();
		writer.write(b"a\n").unwrap();
		writer.close().unwrap();
		writer.close().unwrap();

		let err = writer.write(b"b\n").unwrap_err();
		assert!(err.to_string().contains("already closed"));
		assert!(writer.force_rotate().is_err());
		assert!(writer.is_closed());
	}
}

// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, error, info};

use super::Spooler;
use crate::error::{Result, SdkError};

/// Periodically rotates the spool file and re-uploads completed segments.
pub struct DirWatcher {
	spooler: Arc<Spooler>,
	interval: Duration,
}

impl DirWatcher {
	pub fn new(spooler: Arc<Spooler>, interval: Duration) -> Self {
		Self { spooler, interval }
	}

	/// Runs a cycle on every tick and a final one when `stop` fires or its
	/// sender is dropped.
	pub async fn run(self, mut stop: oneshot::Receiver<()>) {
		info!(
			dir = %self.spooler.directory().display(),
			interval_ms = self.interval.as_millis() as u64,
			"starting spool watcher"
		);

		let mut ticker = time::interval_at(Instant::now() + self.interval, self.interval);
		ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

		loop {
			tokio::select! {
				biased;

				_ = &mut stop => {
					self.cycle().await;
					break;
				}
				_ = ticker.tick() => {
					self.cycle().await;
				}
			}
		}

		info!("spool watcher stopped");
	}

	/// Rotates pending data, then uploads every completed segment.
	pub async fn cycle(&self) -> Option<usize> {
		if let Err(e) = self.rotate().await {
			error!(error = %e, "failed to rotate spool file");
		}
		match self.spooler.scan().await {
			Ok(0) => None,
			Ok(uploaded) => {
				debug!(uploaded, "spool scan complete");
				Some(uploaded)
			}
			Err(e) => {
				error!(error = %e, "spool scan aborted");
				None
			}
		}
	}

	async fn rotate(&self) -> Result<bool> {
		let spooler = Arc::clone(&self.spooler);
		tokio::task::spawn_blocking(move || spooler.rotate_if_pending())
			.await
			.map_err(|e| SdkError::Io(std::io::Error::other(e)))?
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::config::{ConsumerConfig, RotationConfig};
	use wiremock::matchers::{method, path};
	use wiremock::{Mock, MockServer, ResponseTemplate};

	fn spooler(server: &MockServer, dir: &std::path::Path) -> Arc<Spooler> {
		let config = ConsumerConfig::builder()
			.server_url(server.uri())
			.app_id("app")
			.temp_dir(dir)
			.rotation(RotationConfig::default())
			.build()
			.normalize()
			.unwrap();
		Arc::new(Spooler::new(&config).unwrap())
	}

	#[tokio::test]
	async fn test_final_cycle_rotates_and_uploads_on_stop() {
		let server = MockServer::start().await;
		Mock::given(method("POST"))
			.and(path(super::super::UPLOAD_PATH))
			.respond_with(ResponseTemplate::new(200))
			.expect(1)
			.mount(&server)
			.await;

		let dir = tempfile::tempdir().unwrap();
		let spooler = spooler(&server, dir.path());
		spooler.write_batch(b"{\"a\":1}\n").unwrap();

		let watcher = DirWatcher::new(spooler.clone(), Duration::from_secs(3600));
		let (stop_tx, stop_rx) = oneshot::channel();
		stop_tx.send(()).unwrap();
		watcher.run(stop_rx).await;

		assert!(spooler.pending_files().unwrap().is_empty());
		let requests = server.received_requests().await.unwrap();
		let body: serde_json::Value = requests[0].body_json().unwrap();
		assert_eq!(body["compress"], true, "default rotation gzips segments");
		assert!(body["filename"].as_str().unwrap().ends_with(".log.gz"));
	}

	#[tokio::test]
	async fn test_tick_rotates_and_uploads_without_stop() {
		let server = MockServer::start().await;
		Mock::given(method("POST"))
			.and(path(super::super::UPLOAD_PATH))
			.respond_with(ResponseTemplate::new(200))
			.expect(1)
			.mount(&server)
			.await;

		let dir = tempfile::tempdir().unwrap();
		let spooler = spooler(&server, dir.path());
		spooler.write_batch(b"{\"a\":1}\n").unwrap();

		let watcher = DirWatcher::new(spooler.clone(), Duration::from_millis(50));
		let (stop_tx, stop_rx) = oneshot::channel();
		let handle = tokio::spawn(watcher.run(stop_rx));

		tokio::time::timeout(Duration::from_secs(10), async {
			while server.received_requests().await.unwrap().is_empty()
				|| std::fs::read_dir(dir.path()).unwrap().count() > 0
			{
				tokio::time::sleep(Duration::from_millis(10)).await;
			}
		})
		.await
		.expect("tick never uploaded the segment");
		assert!(!handle.is_finished(), "watcher keeps running between ticks");

		stop_tx.send(()).unwrap();
		handle.await.unwrap();
		assert_eq!(server.received_requests().await.unwrap().len(), 1);
	}

	#[tokio::test]
	async fn test_cycle_with_nothing_pending_is_quiet() {
		let server = MockServer::start().await;
		Mock::given(method("POST"))
			.respond_with(ResponseTemplate::new(200))
			.expect(0)
			.mount(&server)
			.await;

		let dir = tempfile::tempdir().unwrap();
		let watcher = DirWatcher::new(spooler(&server, dir.path()), Duration::from_secs(1));
		assert_eq!(watcher.cycle().await, None);
	}

	#[tokio::test]
	async fn test_failed_upload_keeps_segment() {
		let server = MockServer::start().await;
		Mock::given(method("POST"))
			.respond_with(ResponseTemplate::new(500))
			.mount(&server)
			.await;

		let dir = tempfile::tempdir().unwrap();
		let spooler = spooler(&server, dir.path());
		spooler.write_batch(b"{}\n").unwrap();

		let watcher = DirWatcher::new(spooler.clone(), Duration::from_secs(1));
		assert_eq!(watcher.cycle().await, None);
		assert_eq!(spooler.pending_files().unwrap().len(), 1);
	}
}

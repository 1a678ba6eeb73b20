// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Delivery of packed batches to the report endpoint.

use std::io::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use flate2::write::GzEncoder;
use flate2::Compression;
use reqwest::{Client, StatusCode};
use serde::Serialize;
use shimmer_common_http::{retry, RetryConfig};
use tracing::{debug, error, warn};

use crate::batch::PackedBatch;
use crate::config::ConsumerConfig;
use crate::error::{Result, SdkError};
use crate::spool::Spooler;
use crate::wire::{serialize_bytes, ServerReply, SDK_NAME, SDK_VERSION};

/// Path of the batch report endpoint, relative to the server url.
pub const REPORT_PATH: &str = "/LogServer/log/report";

/// Send attempts per batch before it is spooled.
pub const MAX_SEND_ATTEMPTS: u32 = 3;

/// One delivery attempt of an encoded batch.
///
/// Implementations do not retry; [`Transmitter`] owns the retry policy.
#[async_trait]
pub trait BatchSender: Send + Sync {
	/// Sends `payload`, a newline-terminated list of `count` JSON events.
	async fn send_batch(&self, payload: &[u8], count: usize) -> Result<()>;
}

#[derive(Serialize)]
struct ReportRequest<'a> {
	app: &'a str,
	token: &'a str,
	sdk: &'static str,
	version: &'static str,
	compress: bool,
	size: usize,
	#[serde(serialize_with = "serialize_bytes")]
	log: &'a [u8],
}

/// Posts batches to `{server_url}/LogServer/log/report`.
pub struct HttpBatchSender {
	http_client: Client,
	url: String,
	app_id: String,
	app_token: String,
	compress: bool,
}

impl HttpBatchSender {
	/// Creates a sender from a normalized configuration.
	pub fn new(config: &ConsumerConfig) -> Result<Self> {
		let http_client = shimmer_common_http::new_client_with_timeout(config.timeout)?;
		Ok(Self::with_client(http_client, config))
	}

	pub fn with_client(http_client: Client, config: &ConsumerConfig) -> Self {
		Self {
			http_client,
			url: format!("{}{}", config.server_url, REPORT_PATH),
			app_id: config.app_id.clone(),
			app_token: config.app_token.clone(),
			compress: config.compress,
		}
	}
}

#[async_trait]
impl BatchSender for HttpBatchSender {
	async fn send_batch(&self, payload: &[u8], count: usize) -> Result<()> {
		let encoded;
		let log = if self.compress {
			encoded = gzip(payload)?;
			encoded.as_slice()
		} else {
			payload
		};

		let request = ReportRequest {
			app: &self.app_id,
			token: &self.app_token,
			sdk: SDK_NAME,
			version: SDK_VERSION,
			compress: self.compress,
			size: count,
			log,
		};

		debug!(url = %self.url, count, bytes = log.len(), "sending batch");

		let response = self.http_client.post(&self.url).json(&request).send().await?;
		let status = response.status();
		let body = response.bytes().await?;
		let reply = ServerReply::parse(&body);

		if status != StatusCode::OK || reply.code != 0 {
			return Err(SdkError::ReportRejected {
				status: status.as_u16(),
				code: reply.code,
				message: reply.msg,
			});
		}

		Ok(())
	}
}

/// Gzips a batch payload at the default level.
pub fn gzip(data: &[u8]) -> Result<Vec<u8>> {
	let mut encoder = GzEncoder::new(Vec::with_capacity(data.len() / 2), Compression::default());
	encoder.write_all(data).map_err(SdkError::Encoding)?;
	encoder.finish().map_err(SdkError::Encoding)
}

/// Sends a batch with bounded immediate retries and hands it to the spooler
/// once every attempt has failed.
pub struct Transmitter {
	sender: Arc<dyn BatchSender>,
	retry_config: RetryConfig,
	spooler: Option<Arc<Spooler>>,
	sent: AtomicU64,
	spooled: AtomicU64,
}

impl Transmitter {
	pub fn new(sender: Arc<dyn BatchSender>, spooler: Option<Arc<Spooler>>) -> Self {
		Self {
			sender,
			retry_config: RetryConfig::immediate(MAX_SEND_ATTEMPTS),
			spooler,
			sent: AtomicU64::new(0),
			spooled: AtomicU64::new(0),
		}
	}

	/// Delivers `batch`, returning the last send error if it could not be delivered.
	///
	/// A failed batch is written to the spooler at most once. Without a
	/// spooler it is dropped.
	pub async fn deliver(&self, batch: &PackedBatch) -> Result<()> {
		let result = retry(&self.retry_config, || {
			self.sender.send_batch(&batch.payload, batch.count)
		})
		.await;

		let err = match result {
			Ok(()) => {
				self.sent.fetch_add(batch.count as u64, Ordering::Relaxed);
				debug!(count = batch.count, "batch delivered");
				return Ok(());
			}
			Err(err) => err,
		};

		error!(error = %err, count = batch.count, "batch delivery failed");

		match &self.spooler {
			Some(spooler) => match self.spool(spooler, batch).await {
				Ok(()) => {
					self.spooled.fetch_add(batch.count as u64, Ordering::Relaxed);
					warn!(count = batch.count, "batch spooled for later upload");
				}
				Err(spool_err) => {
					error!(error = %spool_err, count = batch.count, "failed to spool batch, events lost");
				}
			},
			None => {
				warn!(count = batch.count, "no spool directory configured, batch dropped");
			}
		}

		Err(err)
	}

	async fn spool(&self, spooler: &Arc<Spooler>, batch: &PackedBatch) -> Result<()> {
		let spooler = Arc::clone(spooler);
		let payload = batch.payload.clone();
		tokio::task::spawn_blocking(move || spooler.write_batch(&payload))
			.await
			.map_err(|e| SdkError::Io(std::io::Error::other(e)))?
	}

	/// Events acknowledged by the server.
	pub fn sent_count(&self) -> u64 {
		self.sent.load(Ordering::Relaxed)
	}

	/// Events written to the spool file.
	pub fn spooled_count(&self) -> u64 {
		self.spooled.load(Ordering::Relaxed)
	}
}

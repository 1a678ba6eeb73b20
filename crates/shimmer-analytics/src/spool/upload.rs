// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Chunked re-upload of spooled segments.

use std::path::Path;

use reqwest::{Client, StatusCode};
use serde::Serialize;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt, SeekFrom};
use tracing::{debug, info};

use crate::config::ConsumerConfig;
use crate::error::{Result, SdkError};
use crate::wire::{serialize_bytes, ServerReply, SDK_NAME, SDK_VERSION};

/// Path of the file upload endpoint, relative to the server url.
pub const UPLOAD_PATH: &str = "/LogServer/log/upload";

/// Bytes sent per upload request.
pub const CHUNK_SIZE: u64 = 1024 * 1024;

#[derive(Serialize)]
struct UploadRequest<'a> {
	app: &'a str,
	token: &'a str,
	sdk: &'static str,
	version: &'static str,
	compress: bool,
	md5: &'a str,
	filename: &'a str,
	start: u64,
	end: u64,
	total: u64,
	#[serde(serialize_with = "serialize_bytes")]
	content: &'a [u8],
}

/// Uploads a file to `{server_url}/LogServer/log/upload` in byte ranges.
#[derive(Debug, Clone)]
pub struct ChunkUploader {
	http_client: Client,
	url: String,
	app_id: String,
	app_token: String,
	chunk_size: u64,
}

impl ChunkUploader {
	pub fn new(config: &ConsumerConfig) -> Result<Self> {
		let http_client = shimmer_common_http::new_client_with_timeout(config.timeout)?;
		Ok(Self {
			http_client,
			url: format!("{}{}", config.server_url, UPLOAD_PATH),
			app_id: config.app_id.clone(),
			app_token: config.app_token.clone(),
			chunk_size: CHUNK_SIZE,
		})
	}

	pub fn with_chunk_size(mut self, chunk_size: u64) -> Self {
		self.chunk_size = chunk_size.max(1);
		self
	}

	/// Sends every chunk of `path` in order. The file counts as uploaded
	/// only when this returns `Ok`. An empty file sends nothing.
	pub async fn upload(&self, path: &Path) -> Result<()> {
		let filename = path
			.file_name()
			.map(|n| n.to_string_lossy().into_owned())
			.unwrap_or_default();
		let compress = path.extension().is_some_and(|ext| ext == "gz");
		let total = tokio::fs::metadata(path).await?.len();
		if total == 0 {
			debug!(filename = %filename, "skipping empty spool segment");
			return Ok(());
		}

		let md5 = file_md5(path).await?;
		let mut file = File::open(path).await?;
		let mut buf = vec![0u8; self.chunk_size.min(total) as usize];
		let mut start = 0u64;

		while start < total {
			let end = (start + self.chunk_size).min(total);
			let content = &mut buf[..(end - start) as usize];
			file.seek(SeekFrom::Start(start)).await?;
			file.read_exact(content).await?;

			let request = UploadRequest {
				app: &self.app_id,
				token: &self.app_token,
				sdk: SDK_NAME,
				version: SDK_VERSION,
				compress,
				md5: &md5,
				filename: &filename,
				start,
				end,
				total,
				content,
			};

			debug!(filename = %filename, start, end, total, "uploading chunk");
			let response = self.http_client.post(&self.url).json(&request).send().await?;
			let status = response.status();
			if status != StatusCode::OK && status != StatusCode::PARTIAL_CONTENT {
				let body = response.bytes().await.unwrap_or_default();
				let reply = ServerReply::parse(&body);
				return Err(SdkError::UploadRejected {
					filename,
					status: status.as_u16(),
					code: reply.code,
					message: reply.msg,
				});
			}

			start = end;
		}

		info!(filename = %filename, bytes = total, "uploaded spool segment");
		Ok(())
	}
}

/// Lowercase hex MD5 of a whole file.
pub async fn file_md5(path: &Path) -> Result<String> {
	let mut file = File::open(path).await?;
	let mut context = md5::Context::new();
	let mut buf = vec![0u8; 64 * 1024];
	loop {
		let n = file.read(&mut buf).await?;
		if n == 0 {
			break;
		}
		context.consume(&buf[..n]);
	}
	Ok(format!("{:x}", context.compute()))
}

// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Error types for the analytics SDK.

use shimmer_analytics_core::EventError;
use shimmer_common_http::RetryableError;
use thiserror::Error;

/// Analytics SDK errors.
#[derive(Debug, Error)]
pub enum SdkError {
	/// Server address is missing.
	#[error("server url can not be empty")]
	InvalidServerUrl,

	/// A configuration source could not be read or parsed.
	#[error("configuration error: {0}")]
	Config(String),

	/// HTTP request failed before a response was received.
	#[error("HTTP request failed: {0}")]
	RequestFailed(#[from] reqwest::Error),

	/// The report endpoint answered with a non-200 status or a non-zero code.
	#[error("report rejected: httpStatus:{status}, Code:{code} Msg:{message}")]
	ReportRejected {
		status: u16,
		code: i64,
		message: String,
	},

	/// A chunk of a spooled file was refused by the upload endpoint.
	#[error("upload of {filename} rejected: httpStatus:{status}, Code:{code} Msg:{message}")]
	UploadRejected {
		filename: String,
		status: u16,
		code: i64,
		message: String,
	},

	/// JSON encoding of an event or request, or decoding of a response body.
	#[error("serialization error: {0}")]
	Serialization(#[from] serde_json::Error),

	/// Gzip encoding of a batch failed.
	#[error("payload encoding failed: {0}")]
	Encoding(std::io::Error),

	/// Local file I/O on the spool directory.
	#[error("I/O error: {0}")]
	Io(#[from] std::io::Error),

	/// The spool writer has been closed.
	#[error("spool writer already closed")]
	AlreadyClosed,

	/// Client or consumer has been shut down.
	#[error("client has been shut down")]
	ClientShutdown,

	/// Event failed validation in the facade.
	#[error("event validation failed: {0}")]
	Event(#[from] EventError),
}

impl RetryableError for SdkError {
	fn is_retryable(&self) -> bool {
		matches!(
			self,
			SdkError::RequestFailed(_)
				| SdkError::ReportRejected { .. }
				| SdkError::UploadRejected { .. }
				| SdkError::Io(_)
		)
	}
}

/// Result type alias for analytics operations.
pub type Result<T> = std::result::Result<T, SdkError>;

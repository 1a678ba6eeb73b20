// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Error types for event construction and validation.

use thiserror::Error;

/// Reasons an event is rejected before it reaches a consumer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EventError {
	#[error("the event name must be provided")]
	MissingEventName,

	#[error("the event id must be provided")]
	MissingEventId,

	#[error("the first check id must be provided")]
	MissingFirstCheckId,

	#[error("account_id and distinct_id cannot both be empty")]
	MissingIdentity,

	#[error("properties must be provided for {0}")]
	MissingProperties(&'static str),

	#[error("no keys given to unset")]
	EmptyUnsetKeys,

	#[error("invalid event name: {0}")]
	InvalidEventName(String),

	#[error("invalid property key: {0}")]
	InvalidPropertyKey(String),

	#[error("invalid property value for {0}: only numbers are supported by user_add")]
	NonNumericAdd(String),

	#[error("#time should be formatted as YYYY-MM-DD HH:MM:SS.mmm, got {0:?}")]
	InvalidTime(String),
}

/// A specialized `Result` type for event operations.
pub type Result<T> = std::result::Result<T, EventError>;

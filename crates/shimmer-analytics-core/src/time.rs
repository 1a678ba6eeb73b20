// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! The wire date format: UTC, millisecond precision, `YYYY-MM-DD HH:MM:SS.mmm`.

use chrono::{DateTime, NaiveDateTime, SubsecRound, Utc};
use serde::Serializer;

use crate::error::{EventError, Result};

/// chrono format string for event timestamps.
pub const DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

/// Formats a timestamp in the wire date format.
pub fn format_event_time(time: &DateTime<Utc>) -> String {
	time.format(DATE_FORMAT).to_string()
}

/// Parses a wire-format timestamp. The input is interpreted as UTC.
pub fn parse_event_time(value: &str) -> Result<DateTime<Utc>> {
	NaiveDateTime::parse_from_str(value, DATE_FORMAT)
		.map(|naive| naive.and_utc().trunc_subsecs(3))
		.map_err(|_| EventError::InvalidTime(value.to_string()))
}

/// Truncates a timestamp to millisecond precision.
pub fn normalize_event_time(time: DateTime<Utc>) -> DateTime<Utc> {
	time.trunc_subsecs(3)
}

pub(crate) fn serialize<S>(time: &DateTime<Utc>, serializer: S) -> std::result::Result<S::Ok, S::Error>
where
	S: Serializer,
{
	serializer.collect_str(&time.format(DATE_FORMAT))
}

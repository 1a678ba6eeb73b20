// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Event records sent to the collection endpoint.
//!
//! Every record carries a type tag, a UTC timestamp, at least one of
//! `account_id` / `distinct_id`, and an open property map. Preset fields are
//! serialized with a `#` prefix.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::properties::Properties;
use crate::time::normalize_event_time;

/// The kind of record being reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum EventType {
	#[serde(rename = "track")]
	Track,
	#[serde(rename = "track_update")]
	TrackUpdate,
	#[serde(rename = "track_overwrite")]
	TrackOverwrite,
	#[serde(rename = "user_set")]
	UserSet,
	#[serde(rename = "user_unset")]
	UserUnset,
	#[serde(rename = "user_setOnce")]
	UserSetOnce,
	#[serde(rename = "user_add")]
	UserAdd,
	#[serde(rename = "user_append")]
	UserAppend,
	#[serde(rename = "user_uniq_append")]
	UserUniqAppend,
	#[serde(rename = "user_del")]
	UserDel,
}

impl EventType {
	pub fn as_str(&self) -> &'static str {
		match self {
			EventType::Track => "track",
			EventType::TrackUpdate => "track_update",
			EventType::TrackOverwrite => "track_overwrite",
			EventType::UserSet => "user_set",
			EventType::UserUnset => "user_unset",
			EventType::UserSetOnce => "user_setOnce",
			EventType::UserAdd => "user_add",
			EventType::UserAppend => "user_append",
			EventType::UserUniqAppend => "user_uniq_append",
			EventType::UserDel => "user_del",
		}
	}

	pub fn is_track(&self) -> bool {
		matches!(
			self,
			EventType::Track | EventType::TrackUpdate | EventType::TrackOverwrite
		)
	}
}

impl std::fmt::Display for EventType {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(self.as_str())
	}
}

/// A single analytics record.
///
/// Built by the SDK facade and treated as immutable once handed to a consumer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Event {
	#[serde(rename = "#account_id", skip_serializing_if = "String::is_empty")]
	pub account_id: String,
	#[serde(rename = "#distinct_id", skip_serializing_if = "String::is_empty")]
	pub distinct_id: String,
	#[serde(rename = "#type")]
	pub event_type: EventType,
	#[serde(rename = "#time", serialize_with = "crate::time::serialize")]
	pub time: DateTime<Utc>,
	#[serde(rename = "#event_name", skip_serializing_if = "String::is_empty")]
	pub event_name: String,
	#[serde(rename = "#event_id", skip_serializing_if = "String::is_empty")]
	pub event_id: String,
	#[serde(rename = "#first_check_id", skip_serializing_if = "String::is_empty")]
	pub first_check_id: String,
	#[serde(rename = "#ip", skip_serializing_if = "String::is_empty")]
	pub ip: String,
	#[serde(rename = "#uuid", skip_serializing_if = "String::is_empty")]
	pub uuid: String,
	#[serde(rename = "#app_id", skip_serializing_if = "String::is_empty")]
	pub app_id: String,
	pub properties: Properties,
	#[serde(skip)]
	pub is_complex: bool,
}

impl Event {
	/// Creates an event stamped with the current time and a fresh UUIDv7.
	pub fn new(event_type: EventType) -> Self {
		Self {
			account_id: String::new(),
			distinct_id: String::new(),
			event_type,
			time: normalize_event_time(Utc::now()),
			event_name: String::new(),
			event_id: String::new(),
			first_check_id: String::new(),
			ip: String::new(),
			uuid: Uuid::now_v7().to_string(),
			app_id: String::new(),
			properties: Properties::new(),
			is_complex: false,
		}
	}

	pub fn with_identity(mut self, account_id: impl Into<String>, distinct_id: impl Into<String>) -> Self {
		self.account_id = account_id.into();
		self.distinct_id = distinct_id.into();
		self
	}

	pub fn with_event_name(mut self, name: impl Into<String>) -> Self {
		self.event_name = name.into();
		self
	}

	pub fn with_event_id(mut self, id: impl Into<String>) -> Self {
		self.event_id = id.into();
		self
	}

	/// Overrides the event timestamp, normalized to millisecond precision.
	pub fn with_time(mut self, time: DateTime<Utc>) -> Self {
		self.time = normalize_event_time(time);
		self
	}

	/// Sets the properties and recomputes the complex marker.
	pub fn with_properties(mut self, properties: Properties) -> Self {
		self.is_complex = properties.iter().any(|(_, v)| v.is_complex());
		self.properties = properties;
		self
	}
}

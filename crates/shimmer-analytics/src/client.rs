// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Event facade: builds validated records and hands them to a consumer.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::Utc;
use shimmer_analytics_core::{
	format_event_time, is_valid_key, parse_event_time, Event, EventError, EventType, Properties,
	PropertyValue,
};
use tracing::{debug, info, warn};

use crate::config::ConsumerConfig;
use crate::consumer::{BatchConsumer, Consumer};
use crate::error::{Result, SdkError};
use crate::wire::SDK_VERSION;

/// Value of the `#lib` property attached to track events.
pub const LIB_NAME: &str = "Rust";

type DynamicProperties = Arc<dyn Fn() -> Properties + Send + Sync>;

/// Client for reporting events and user profile operations.
///
/// # Example
///
/// ```ignore
/// use shimmer_analytics::{ConsumerConfig, Properties, ShimmerAnalytics};
///
/// let client = ShimmerAnalytics::from_config(
///     ConsumerConfig::builder()
///         .server_url("https://logs.example.com")
///         .app_id("my-game")
///         .app_token("...")
///         .temp_dir("/var/spool/my-game")
///         .build(),
/// )?;
///
/// client.track("acc_1", "", "level_up", Properties::new().insert("level", 3)).await?;
/// client.user_add("acc_1", "", Properties::new().insert("coins", 50)).await?;
///
/// client.close().await?;
/// ```
pub struct ShimmerAnalytics {
	consumer: Arc<dyn Consumer>,
	super_properties: RwLock<Properties>,
	dynamic_super_properties: RwLock<Option<DynamicProperties>>,
	closed: AtomicBool,
}

impl ShimmerAnalytics {
	pub fn new(consumer: Arc<dyn Consumer>) -> Self {
		info!(strict = consumer.is_strict(), "analytics client initialized");
		Self {
			consumer,
			super_properties: RwLock::new(Properties::new()),
			dynamic_super_properties: RwLock::new(None),
			closed: AtomicBool::new(false),
		}
	}

	/// Starts a [`BatchConsumer`] for `config` and wraps it.
	pub fn from_config(config: ConsumerConfig) -> Result<Self> {
		Ok(Self::new(Arc::new(BatchConsumer::new(config)?)))
	}

	/// Reports an ordinary event.
	pub async fn track(
		&self,
		account_id: &str,
		distinct_id: &str,
		event_name: &str,
		properties: Properties,
	) -> Result<()> {
		self.track_event(account_id, distinct_id, EventType::Track, event_name, "", properties)
			.await
	}

	/// Reports an event the server counts only once per `first_check_id`.
	pub async fn track_first(
		&self,
		account_id: &str,
		distinct_id: &str,
		event_name: &str,
		first_check_id: &str,
		mut properties: Properties,
	) -> Result<()> {
		self.check_closed()?;
		if first_check_id.is_empty() {
			return Err(EventError::MissingFirstCheckId.into());
		}
		properties.set("#first_check_id", first_check_id);
		self.track_event(account_id, distinct_id, EventType::Track, event_name, "", properties)
			.await
	}

	/// Reports an event whose properties later reports with the same id update.
	pub async fn track_update(
		&self,
		account_id: &str,
		distinct_id: &str,
		event_name: &str,
		event_id: &str,
		properties: Properties,
	) -> Result<()> {
		self.track_event(
			account_id,
			distinct_id,
			EventType::TrackUpdate,
			event_name,
			event_id,
			properties,
		)
		.await
	}

	/// Reports an event whose properties later reports with the same id replace.
	pub async fn track_overwrite(
		&self,
		account_id: &str,
		distinct_id: &str,
		event_name: &str,
		event_id: &str,
		properties: Properties,
	) -> Result<()> {
		self.track_event(
			account_id,
			distinct_id,
			EventType::TrackOverwrite,
			event_name,
			event_id,
			properties,
		)
		.await
	}

	/// Sets user properties, overwriting existing values.
	pub async fn user_set(&self, account_id: &str, distinct_id: &str, properties: Properties) -> Result<()> {
		self.user_event(account_id, distinct_id, EventType::UserSet, properties).await
	}

	/// Clears the named user properties.
	pub async fn user_unset<S: AsRef<str>>(&self, account_id: &str, distinct_id: &str, keys: &[S]) -> Result<()> {
		self.check_closed()?;
		if keys.is_empty() {
			return Err(EventError::EmptyUnsetKeys.into());
		}
		let properties: Properties = keys.iter().map(|key| (key.as_ref(), 0)).collect();
		self.user_event(account_id, distinct_id, EventType::UserUnset, properties).await
	}

	pub async fn user_unset_with_properties(
		&self,
		account_id: &str,
		distinct_id: &str,
		properties: Properties,
	) -> Result<()> {
		self.user_event(account_id, distinct_id, EventType::UserUnset, properties).await
	}

	/// Sets user properties that have no value yet.
	pub async fn user_set_once(&self, account_id: &str, distinct_id: &str, properties: Properties) -> Result<()> {
		self.user_event(account_id, distinct_id, EventType::UserSetOnce, properties).await
	}

	/// Adds numeric deltas to user properties.
	pub async fn user_add(&self, account_id: &str, distinct_id: &str, properties: Properties) -> Result<()> {
		self.user_event(account_id, distinct_id, EventType::UserAdd, properties).await
	}

	/// Appends to array user properties.
	pub async fn user_append(&self, account_id: &str, distinct_id: &str, properties: Properties) -> Result<()> {
		self.user_event(account_id, distinct_id, EventType::UserAppend, properties).await
	}

	/// Appends to array user properties, skipping values already present.
	pub async fn user_uniq_append(&self, account_id: &str, distinct_id: &str, properties: Properties) -> Result<()> {
		self.user_event(account_id, distinct_id, EventType::UserUniqAppend, properties).await
	}

	/// Deletes a user. Cannot be undone.
	pub async fn user_delete(&self, account_id: &str, distinct_id: &str) -> Result<()> {
		self.user_event(account_id, distinct_id, EventType::UserDel, Properties::new()).await
	}

	pub async fn user_delete_with_properties(
		&self,
		account_id: &str,
		distinct_id: &str,
		properties: Properties,
	) -> Result<()> {
		self.user_event(account_id, distinct_id, EventType::UserDel, properties).await
	}

	/// Requests delivery of queued events.
	pub async fn flush(&self) -> Result<()> {
		self.check_closed()?;
		self.consumer.flush().await
	}

	/// Closes the consumer, delivering or spooling everything accepted so far.
	///
	/// Later operations return [`SdkError::ClientShutdown`]; closing again is a no-op.
	pub async fn close(&self) -> Result<()> {
		if self.closed.swap(true, Ordering::SeqCst) {
			return Ok(());
		}
		let result = self.consumer.close().await;
		info!("analytics client closed");
		result
	}

	/// Merges `properties` into the super properties attached to every track event.
	pub fn set_super_properties(&self, properties: Properties) {
		self.super_write().extend(properties);
	}

	pub fn super_properties(&self) -> Properties {
		self.super_read().clone()
	}

	pub fn clear_super_properties(&self) {
		*self.super_write() = Properties::new();
	}

	/// Installs a callback evaluated on every track event. Its result
	/// overrides static super properties with the same key.
	pub fn set_dynamic_super_properties<F>(&self, action: F)
	where
		F: Fn() -> Properties + Send + Sync + 'static,
	{
		*self
			.dynamic_super_properties
			.write()
			.unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(action));
	}

	/// Evaluates the dynamic super properties callback, if any.
	pub fn dynamic_super_properties(&self) -> Properties {
		let action = self
			.dynamic_super_properties
			.read()
			.unwrap_or_else(PoisonError::into_inner)
			.clone();
		action.map(|f| f()).unwrap_or_default()
	}

	fn super_read(&self) -> RwLockReadGuard<'_, Properties> {
		self.super_properties.read().unwrap_or_else(PoisonError::into_inner)
	}

	fn super_write(&self) -> RwLockWriteGuard<'_, Properties> {
		self.super_properties.write().unwrap_or_else(PoisonError::into_inner)
	}

	fn check_closed(&self) -> Result<()> {
		if self.closed.load(Ordering::SeqCst) {
			return Err(SdkError::ClientShutdown);
		}
		Ok(())
	}

	async fn track_event(
		&self,
		account_id: &str,
		distinct_id: &str,
		event_type: EventType,
		event_name: &str,
		event_id: &str,
		properties: Properties,
	) -> Result<()> {
		self.check_closed()?;
		if event_name.is_empty() {
			return Err(EventError::MissingEventName.into());
		}
		if event_id.is_empty() && event_type != EventType::Track {
			return Err(EventError::MissingEventId.into());
		}

		// Later sources win: super, dynamic, preset, then the caller's own.
		let merged = self
			.super_properties()
			.merge(self.dynamic_super_properties())
			.insert("#lib", LIB_NAME)
			.insert("#lib_version", SDK_VERSION)
			.merge(properties);

		self.submit(account_id, distinct_id, event_type, event_name, event_id, merged)
			.await
	}

	async fn user_event(
		&self,
		account_id: &str,
		distinct_id: &str,
		event_type: EventType,
		properties: Properties,
	) -> Result<()> {
		self.check_closed()?;
		if properties.is_empty() && event_type != EventType::UserDel {
			return Err(EventError::MissingProperties(event_type.as_str()).into());
		}
		self.submit(account_id, distinct_id, event_type, "", "", properties)
			.await
	}

	async fn submit(
		&self,
		account_id: &str,
		distinct_id: &str,
		event_type: EventType,
		event_name: &str,
		event_id: &str,
		properties: Properties,
	) -> Result<()> {
		let event = build_event(
			account_id,
			distinct_id,
			event_type,
			event_name,
			event_id,
			properties,
			self.consumer.is_strict(),
		)?;
		debug!(uuid = %event.uuid, event_type = %event.event_type, "event built");
		self.consumer.add(event).await
	}
}

/// Validates the inputs and moves preset keys out of `properties`.
fn build_event(
	account_id: &str,
	distinct_id: &str,
	event_type: EventType,
	event_name: &str,
	event_id: &str,
	mut properties: Properties,
	strict: bool,
) -> std::result::Result<Event, EventError> {
	if account_id.is_empty() && distinct_id.is_empty() {
		return Err(EventError::MissingIdentity);
	}

	let ip = take_string(&mut properties, "#ip");
	let app_id = take_string(&mut properties, "#app_id");
	let time = match properties.remove("#time") {
		Some(PropertyValue::Timestamp(time)) => time,
		Some(PropertyValue::String(value)) => parse_event_time(&value)?,
		_ => Utc::now(),
	};
	let first_check_id = take_string(&mut properties, "#first_check_id");
	let uuid = take_string(&mut properties, "#uuid");

	if !event_name.is_empty() && !is_valid_key(event_name) {
		return Err(EventError::InvalidEventName(event_name.to_string()));
	}

	for (key, value) in properties.iter() {
		if strict && !is_valid_key(key) {
			return Err(EventError::InvalidPropertyKey(key.clone()));
		}
		if event_type == EventType::UserAdd && !value.is_number() {
			return Err(EventError::NonNumericAdd(key.clone()));
		}
	}

	for value in properties.values_mut() {
		if let PropertyValue::Timestamp(ts) = value {
			let formatted = format_event_time(ts);
			*value = PropertyValue::String(formatted);
		}
	}

	let mut event = Event::new(event_type)
		.with_identity(account_id, distinct_id)
		.with_event_name(event_name)
		.with_event_id(event_id)
		.with_time(time)
		.with_properties(properties);
	event.ip = ip;
	event.app_id = app_id;
	event.first_check_id = first_check_id;
	if !uuid.is_empty() {
		event.uuid = uuid;
	}
	Ok(event)
}

fn take_string(properties: &mut Properties, key: &str) -> String {
	match properties.remove(key) {
		Some(PropertyValue::String(value)) => value,
		Some(other) => {
			warn!(key, value = ?other, "preset property must be a string, ignoring");
			String::new()
		}
		None => String::new(),
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use async_trait::async_trait;
	use chrono::TimeZone;
	use std::sync::Mutex;

	#[derive(Default)]
	struct MemoryConsumer {
		events: Mutex<Vec<Event>>,
		strict: bool,
		flushes: Mutex<usize>,
	}

	#[async_trait]
	impl Consumer for MemoryConsumer {
		async fn add(&self, event: Event) -> Result<()> {
			self.events.lock().unwrap().push(event);
			Ok(())
		}

		async fn flush(&self) -> Result<()> {
			*self.flushes.lock().unwrap() += 1;
			Ok(())
		}

		async fn close(&self) -> Result<()> {
			Ok(())
		}

		fn is_strict(&self) -> bool {
			self.strict
		}
	}

	fn client(strict: bool) -> (Arc<MemoryConsumer>, ShimmerAnalytics) {
		let consumer = Arc::new(MemoryConsumer {
			strict,
			..Default::default()
		});
		(consumer.clone(), ShimmerAnalytics::new(consumer))
	}

	fn last(consumer: &MemoryConsumer) -> Event {
		consumer.events.lock().unwrap().last().cloned().unwrap()
	}

	#[tokio::test]
	async fn test_track_merges_super_dynamic_and_custom() {
		let (consumer, client) = client(false);
		client.set_super_properties(Properties::new().insert("channel", "store").insert("level", 1));
		client.set_dynamic_super_properties(|| Properties::new().insert("level", 2).insert("online", true));

		client
			.track("acc", "", "login", Properties::new().insert("online", false))
			.await
			.unwrap();

		let event = last(&consumer);
		assert_eq!(event.event_type, EventType::Track);
		assert_eq!(event.event_name, "login");
		let props = &event.properties;
		assert_eq!(props.get("channel"), Some(&PropertyValue::from("store")));
		assert_eq!(props.get("level"), Some(&PropertyValue::Int(2)));
		assert_eq!(props.get("online"), Some(&PropertyValue::Bool(false)));
		assert_eq!(props.get("#lib"), Some(&PropertyValue::from(LIB_NAME)));
		assert_eq!(props.get("#lib_version"), Some(&PropertyValue::from(SDK_VERSION)));
	}

	#[tokio::test]
	async fn test_track_requires_name_and_identity() {
		let (_consumer, client) = client(false);

		let err = client.track("acc", "", "", Properties::new()).await.unwrap_err();
		assert!(matches!(err, SdkError::Event(EventError::MissingEventName)));

		let err = client.track("", "", "login", Properties::new()).await.unwrap_err();
		assert!(matches!(err, SdkError::Event(EventError::MissingIdentity)));

		let err = client.track("acc", "", "9lives", Properties::new()).await.unwrap_err();
		assert!(matches!(err, SdkError::Event(EventError::InvalidEventName(_))));
	}

	#[tokio::test]
	async fn test_update_and_overwrite_require_event_id() {
		let (consumer, client) = client(false);

		let err = client
			.track_update("acc", "", "order", "", Properties::new())
			.await
			.unwrap_err();
		assert!(matches!(err, SdkError::Event(EventError::MissingEventId)));

		client
			.track_overwrite("acc", "", "order", "o-1", Properties::new())
			.await
			.unwrap();
		let event = last(&consumer);
		assert_eq!(event.event_type, EventType::TrackOverwrite);
		assert_eq!(event.event_id, "o-1");
	}

	#[tokio::test]
	async fn test_track_first_sets_first_check_id() {
		let (consumer, client) = client(false);

		let err = client
			.track_first("acc", "", "install", "", Properties::new())
			.await
			.unwrap_err();
		assert!(matches!(err, SdkError::Event(EventError::MissingFirstCheckId)));

		client
			.track_first("acc", "", "install", "device-9", Properties::new())
			.await
			.unwrap();
		let event = last(&consumer);
		assert_eq!(event.first_check_id, "device-9");
		assert!(event.properties.get("#first_check_id").is_none());
	}

	#[tokio::test]
	async fn test_presets_are_extracted() {
		let (consumer, client) = client(false);
		client
			.track(
				"acc",
				"dev",
				"purchase",
				Properties::new()
					.insert("#ip", "10.0.0.1")
					.insert("#app_id", "other-app")
					.insert("#uuid", "u-1")
					.insert("#time", "2024-05-06 07:08:09.010")
					.insert("amount", 3.5),
			)
			.await
			.unwrap();

		let event = last(&consumer);
		assert_eq!(event.ip, "10.0.0.1");
		assert_eq!(event.app_id, "other-app");
		assert_eq!(event.uuid, "u-1");
		assert_eq!(format_event_time(&event.time), "2024-05-06 07:08:09.010");
		for key in ["#ip", "#app_id", "#uuid", "#time"] {
			assert!(event.properties.get(key).is_none(), "{key} left in properties");
		}
	}

	#[tokio::test]
	async fn test_bad_time_string_is_rejected() {
		let (_consumer, client) = client(false);
		let err = client
			.track("acc", "", "e", Properties::new().insert("#time", "yesterday"))
			.await
			.unwrap_err();
		assert!(matches!(err, SdkError::Event(EventError::InvalidTime(_))));
	}

	#[tokio::test]
	async fn test_timestamp_values_become_strings() {
		let (consumer, client) = client(false);
		let ts = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
		client
			.user_set("acc", "", Properties::new().insert("last_login", ts))
			.await
			.unwrap();

		let event = last(&consumer);
		assert_eq!(
			event.properties.get("last_login"),
			Some(&PropertyValue::from("2024-01-02 03:04:05.000"))
		);
		assert!(!event.is_complex);
	}

	#[tokio::test]
	async fn test_nested_values_mark_complex() {
		let (consumer, client) = client(false);
		client
			.user_append("acc", "", Properties::new().insert("items", vec!["sword", "shield"]))
			.await
			.unwrap();
		assert!(last(&consumer).is_complex);
	}

	#[tokio::test]
	async fn test_user_add_accepts_numbers_only() {
		let (consumer, client) = client(false);
		client
			.user_add("acc", "", Properties::new().insert("coins", 5).insert("ratio", 0.5))
			.await
			.unwrap();
		assert_eq!(last(&consumer).event_type, EventType::UserAdd);

		let err = client
			.user_add("acc", "", Properties::new().insert("coins", "five"))
			.await
			.unwrap_err();
		assert!(matches!(err, SdkError::Event(EventError::NonNumericAdd(ref k)) if k == "coins"));
	}

	#[tokio::test]
	async fn test_user_unset_maps_keys_to_zero() {
		let (consumer, client) = client(false);

		let err = client.user_unset::<&str>("acc", "", &[]).await.unwrap_err();
		assert!(matches!(err, SdkError::Event(EventError::EmptyUnsetKeys)));

		client.user_unset("acc", "", &["a", "b"]).await.unwrap();
		let event = last(&consumer);
		assert_eq!(event.event_type, EventType::UserUnset);
		assert_eq!(event.properties.get("a"), Some(&PropertyValue::Int(0)));
		assert_eq!(event.properties.get("b"), Some(&PropertyValue::Int(0)));
	}

	#[tokio::test]
	async fn test_user_ops_require_properties_except_delete() {
		let (consumer, client) = client(false);

		let err = client.user_set("acc", "", Properties::new()).await.unwrap_err();
		assert!(matches!(err, SdkError::Event(EventError::MissingProperties("user_set"))));

		client.user_delete("acc", "").await.unwrap();
		let event = last(&consumer);
		assert_eq!(event.event_type, EventType::UserDel);
		assert!(event.properties.is_empty());
	}

	#[tokio::test]
	async fn test_user_events_do_not_get_lib_properties() {
		let (consumer, client) = client(false);
		client.set_super_properties(Properties::new().insert("channel", "store"));
		client
			.user_set_once("acc", "", Properties::new().insert("first_seen", "today"))
			.await
			.unwrap();

		let event = last(&consumer);
		assert!(event.properties.get("#lib").is_none());
		assert!(event.properties.get("channel").is_none());
	}

	#[tokio::test]
	async fn test_strict_consumer_checks_property_keys() {
		let (_consumer, strict) = client(true);
		let err = strict
			.track("acc", "", "e", Properties::new().insert("bad key", 1))
			.await
			.unwrap_err();
		assert!(matches!(err, SdkError::Event(EventError::InvalidPropertyKey(_))));

		let (consumer, lenient) = client(false);
		lenient
			.track("acc", "", "e", Properties::new().insert("bad key", 1))
			.await
			.unwrap();
		assert_eq!(consumer.events.lock().unwrap().len(), 1);
	}

	#[tokio::test]
	async fn test_super_properties_lifecycle() {
		let (_consumer, client) = client(false);
		client.set_super_properties(Properties::new().insert("a", 1));
		client.set_super_properties(Properties::new().insert("b", 2));
		assert_eq!(client.super_properties().len(), 2);

		client.clear_super_properties();
		assert!(client.super_properties().is_empty());
		assert!(client.dynamic_super_properties().is_empty());
	}

	#[tokio::test]
	async fn test_operations_after_close_fail() {
		let (consumer, client) = client(false);
		client.close().await.unwrap();
		client.close().await.unwrap();

		let err = client.track("acc", "", "e", Properties::new()).await.unwrap_err();
		assert!(matches!(err, SdkError::ClientShutdown));
		let err = client.user_delete("acc", "").await.unwrap_err();
		assert!(matches!(err, SdkError::ClientShutdown));
		assert!(matches!(client.flush().await, Err(SdkError::ClientShutdown)));
		assert!(consumer.events.lock().unwrap().is_empty());
	}

	#[tokio::test]
	async fn test_flush_reaches_consumer() {
		let (consumer, client) = client(false);
		client.flush().await.unwrap();
		assert_eq!(*consumer.flushes.lock().unwrap(), 1);
	}
}

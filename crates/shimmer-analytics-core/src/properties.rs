// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Event and user property values.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use serde_json::Value;

use crate::time::format_event_time;

/// A single property value.
///
/// The four scalar kinds are strings, integers, floats and booleans. Every
/// other variant is "complex" and marks the owning event accordingly.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
	String(String),
	Int(i64),
	Float(f64),
	Bool(bool),
	Timestamp(DateTime<Utc>),
	Map(BTreeMap<String, PropertyValue>),
	Array(Vec<PropertyValue>),
}

impl PropertyValue {
	/// Returns true for any variant other than the four scalar kinds.
	pub fn is_complex(&self) -> bool {
		!matches!(
			self,
			PropertyValue::String(_) | PropertyValue::Int(_) | PropertyValue::Float(_) | PropertyValue::Bool(_)
		)
	}

	pub fn is_number(&self) -> bool {
		matches!(self, PropertyValue::Int(_) | PropertyValue::Float(_))
	}

	pub fn as_str(&self) -> Option<&str> {
		match self {
			PropertyValue::String(s) => Some(s),
			_ => None,
		}
	}

	/// Converts a JSON value. `null` has no property representation and yields `None`;
	/// nulls nested in maps and arrays are dropped.
	pub fn from_json(value: Value) -> Option<Self> {
		match value {
			Value::Null => None,
			Value::Bool(b) => Some(PropertyValue::Bool(b)),
			Value::Number(n) => match n.as_i64() {
				Some(i) => Some(PropertyValue::Int(i)),
				None => n.as_f64().map(PropertyValue::Float),
			},
			Value::String(s) => Some(PropertyValue::String(s)),
			Value::Array(items) => Some(PropertyValue::Array(
				items.into_iter().filter_map(PropertyValue::from_json).collect(),
			)),
			Value::Object(map) => Some(PropertyValue::Map(
				map
					.into_iter()
					.filter_map(|(k, v)| PropertyValue::from_json(v).map(|v| (k, v)))
					.collect(),
			)),
		}
	}
}

impl Serialize for PropertyValue {
	fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
	where
		S: Serializer,
	{
		match self {
			PropertyValue::String(s) => serializer.serialize_str(s),
			PropertyValue::Int(i) => serializer.serialize_i64(*i),
			PropertyValue::Float(f) => serializer.serialize_f64(*f),
			PropertyValue::Bool(b) => serializer.serialize_bool(*b),
			PropertyValue::Timestamp(t) => serializer.serialize_str(&format_event_time(t)),
			PropertyValue::Map(m) => m.serialize(serializer),
			PropertyValue::Array(a) => a.serialize(serializer),
		}
	}
}

impl From<&str> for PropertyValue {
	fn from(value: &str) -> Self {
		PropertyValue::String(value.to_string())
	}
}

impl From<String> for PropertyValue {
	fn from(value: String) -> Self {
		PropertyValue::String(value)
	}
}

impl From<bool> for PropertyValue {
	fn from(value: bool) -> Self {
		PropertyValue::Bool(value)
	}
}

impl From<f64> for PropertyValue {
	fn from(value: f64) -> Self {
		PropertyValue::Float(value)
	}
}

impl From<f32> for PropertyValue {
	fn from(value: f32) -> Self {
		PropertyValue::Float(value as f64)
	}
}

macro_rules! int_property {
	($($t:ty),*) => {
		$(
			impl From<$t> for PropertyValue {
				fn from(value: $t) -> Self {
					PropertyValue::Int(value as i64)
				}
			}
		)*
	};
}

int_property!(i8, i16, i32, i64, u8, u16, u32);

impl From<DateTime<Utc>> for PropertyValue {
	fn from(value: DateTime<Utc>) -> Self {
		PropertyValue::Timestamp(value)
	}
}

impl<T: Into<PropertyValue>> From<Vec<T>> for PropertyValue {
	fn from(value: Vec<T>) -> Self {
		PropertyValue::Array(value.into_iter().map(Into::into).collect())
	}
}

impl From<BTreeMap<String, PropertyValue>> for PropertyValue {
	fn from(value: BTreeMap<String, PropertyValue>) -> Self {
		PropertyValue::Map(value)
	}
}

impl From<Properties> for PropertyValue {
	fn from(value: Properties) -> Self {
		PropertyValue::Map(value.inner)
	}
}

/// A builder for constructing event or user properties.
///
/// Keys are kept sorted so serialized events are deterministic.
///
/// # Example
///
/// ```
/// use shimmer_analytics_core::Properties;
///
/// let props = Properties::new()
///     .insert("level", 12)
///     .insert("zone", "north")
///     .insert("is_premium", true);
/// assert_eq!(props.len(), 3);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Properties {
	inner: BTreeMap<String, PropertyValue>,
}

impl Properties {
	pub fn new() -> Self {
		Self::default()
	}

	/// Inserts a key-value pair into the properties.
	pub fn insert<K, V>(mut self, key: K, value: V) -> Self
	where
		K: Into<String>,
		V: Into<PropertyValue>,
	{
		self.inner.insert(key.into(), value.into());
		self
	}

	/// In-place variant of [`Properties::insert`].
	pub fn set<K, V>(&mut self, key: K, value: V)
	where
		K: Into<String>,
		V: Into<PropertyValue>,
	{
		self.inner.insert(key.into(), value.into());
	}

	/// Merges another Properties into this one.
	///
	/// If both contain the same key, the value from `other` takes precedence.
	pub fn merge(mut self, other: Properties) -> Self {
		self.extend(other);
		self
	}

	/// In-place variant of [`Properties::merge`].
	pub fn extend(&mut self, other: Properties) {
		self.inner.extend(other.inner);
	}

	pub fn remove(&mut self, key: &str) -> Option<PropertyValue> {
		self.inner.remove(key)
	}

	pub fn get(&self, key: &str) -> Option<&PropertyValue> {
		self.inner.get(key)
	}

	pub fn get_mut(&mut self, key: &str) -> Option<&mut PropertyValue> {
		self.inner.get_mut(key)
	}

	pub fn is_empty(&self) -> bool {
		self.inner.is_empty()
	}

	pub fn len(&self) -> usize {
		self.inner.len()
	}

	pub fn iter(&self) -> impl Iterator<Item = (&String, &PropertyValue)> {
		self.inner.iter()
	}

	pub fn values_mut(&mut self) -> impl Iterator<Item = &mut PropertyValue> {
		self.inner.values_mut()
	}

	/// Converts the properties into a `serde_json::Value` object.
	pub fn to_json(&self) -> Value {
		serde_json::to_value(self).unwrap_or_else(|_| Value::Object(Default::default()))
	}
}

impl From<Value> for Properties {
	fn from(value: Value) -> Self {
		match PropertyValue::from_json(value) {
			Some(PropertyValue::Map(inner)) => Self { inner },
			_ => Self::new(),
		}
	}
}

impl<K: Into<String>, V: Into<PropertyValue>> FromIterator<(K, V)> for Properties {
	fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
		Self {
			inner: iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
		}
	}
}

impl IntoIterator for Properties {
	type Item = (String, PropertyValue);
	type IntoIter = std::collections::btree_map::IntoIter<String, PropertyValue>;

	fn into_iter(self) -> Self::IntoIter {
		self.inner.into_iter()
	}
}

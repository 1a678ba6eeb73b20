// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Core types for the Shimmer analytics SDK.
//!
//! This crate holds the record model shared by the SDK facade and its
//! consumers: events, typed property values, and the key and timestamp rules
//! the collection endpoint expects.
//!
//! # Example
//!
//! ```
//! use shimmer_analytics_core::{Event, EventType, Properties};
//!
//! let event = Event::new(EventType::Track)
//!     .with_identity("account_42", "device_7")
//!     .with_event_name("level_up")
//!     .with_properties(Properties::new().insert("level", 12));
//!
//! let line = serde_json::to_string(&event).unwrap();
//! assert!(line.contains("\"#type\":\"track\""));
//! ```

pub mod error;
pub mod event;
pub mod properties;
pub mod time;
pub mod validate;

pub use error::{EventError, Result};
pub use event::{Event, EventType};
pub use properties::{Properties, PropertyValue};
pub use time::{format_event_time, normalize_event_time, parse_event_time, DATE_FORMAT};
pub use validate::{is_valid_key, MAX_KEY_LENGTH};

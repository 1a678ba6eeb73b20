// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Rust SDK for the Shimmer event collection server.
//!
//! Events are validated by [`ShimmerAnalytics`], handed to a [`BatchConsumer`]
//! through a bounded channel, and sent in the background as newline-delimited
//! JSON batches. Batches the server does not accept after three immediate
//! attempts are written to a rotating spool file and re-uploaded in chunks
//! by a directory watcher.
//!
//! # Quick Start
//!
//! ```ignore
//! use shimmer_analytics::{ConsumerConfig, Properties, ShimmerAnalytics};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = ShimmerAnalytics::from_config(
//!         ConsumerConfig::builder()
//!             .server_url("https://logs.example.com")
//!             .app_id("my-game")
//!             .app_token("...")
//!             .temp_dir("/var/spool/my-game")
//!             .batch_size(50)
//!             .interval(Duration::from_secs(10))
//!             .build(),
//!     )?;
//!
//!     client.track("account_1", "", "level_up", Properties::new()
//!         .insert("level", 12)
//!     ).await?;
//!
//!     // Delivers everything accepted so far, spooling what cannot be sent.
//!     client.close().await?;
//!     Ok(())
//! }
//! ```
//!
//! # Delivery
//!
//! - A batch is sent when `batch_size` events are queued, when the interval
//!   timer fires, on [`ShimmerAnalytics::flush`], and on close.
//! - Each batch gets three attempts with no backoff. After that it goes to
//!   `<temp_dir>/<app_id>-logback.log`, or is dropped when no `temp_dir`
//!   is configured.
//! - Every interval the spool file is rotated and each completed segment is
//!   uploaded in 1 MiB chunks, then deleted.
//!
//! # Configuration
//!
//! [`ConsumerConfig::from_toml_file`] reads a TOML file and applies
//! `SHIMMER_*` environment overrides; see [`ConfigLayer`].

pub mod batch;
pub mod client;
pub mod config;
pub mod consumer;
pub mod error;
pub mod intake;
pub mod queue;
pub mod spool;
pub mod transmit;
mod wire;

pub use batch::{BatchAssembler, FlushLoop, FlushSignal, PackedBatch};
pub use client::{ShimmerAnalytics, LIB_NAME};
pub use config::{ConfigLayer, ConsumerConfig, ConsumerConfigBuilder, RotationConfig};
pub use consumer::{BatchConsumer, Consumer, ConsumerState};
pub use error::{Result, SdkError};
pub use queue::SafeQueue;
pub use spool::{ChunkUploader, DirWatcher, RotatingWriter, Spooler};
pub use transmit::{BatchSender, HttpBatchSender, Transmitter};
pub use wire::{SDK_NAME, SDK_VERSION};

// Record model shared with shimmer-analytics-core.
pub use shimmer_analytics_core::{Event, EventError, EventType, Properties, PropertyValue};

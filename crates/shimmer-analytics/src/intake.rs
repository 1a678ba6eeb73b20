// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Bounded hand-off from producers to the queue.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use shimmer_analytics_core::Event;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::batch::FlushSignal;
use crate::error::{Result, SdkError};
use crate::queue::SafeQueue;

/// Creates an intake channel holding at most `capacity` events.
pub fn channel(capacity: usize) -> (IntakeSender, mpsc::Receiver<Event>) {
	let (tx, rx) = mpsc::channel(capacity.max(1));
	(IntakeSender { tx }, rx)
}

/// Producer side of the intake channel.
#[derive(Debug, Clone)]
pub struct IntakeSender {
	tx: mpsc::Sender<Event>,
}

impl IntakeSender {
	/// Submits an event, waiting while the channel is full.
	pub async fn submit(&self, event: Event) -> Result<()> {
		self.tx.send(event).await.map_err(|_| SdkError::ClientShutdown)
	}
}

/// Moves events from the intake channel into the queue.
pub struct IntakeReader {
	rx: mpsc::Receiver<Event>,
	queue: Arc<SafeQueue<Event>>,
	signal: Arc<FlushSignal>,
	batch_size: usize,
	received: Arc<AtomicU64>,
}

impl IntakeReader {
	pub fn new(
		rx: mpsc::Receiver<Event>,
		queue: Arc<SafeQueue<Event>>,
		signal: Arc<FlushSignal>,
		batch_size: usize,
		received: Arc<AtomicU64>,
	) -> Self {
		Self {
			rx,
			queue,
			signal,
			batch_size,
			received,
		}
	}

	/// Runs until every sender is dropped and the channel is empty.
	/// Returns the number of events read by this reader.
	pub async fn run(mut self) -> u64 {
		let mut read = 0u64;
		while let Some(event) = self.rx.recv().await {
			read += 1;
			self.received.fetch_add(1, Ordering::Relaxed);
			debug!(uuid = %event.uuid, event_type = %event.event_type, "event received");
			self.queue.push_back(event);
			if self.queue.len() >= self.batch_size {
				self.signal.request_soft();
			}
		}
		info!(events = read, "intake channel closed");
		read
	}
}

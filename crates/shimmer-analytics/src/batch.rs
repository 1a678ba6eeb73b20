// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Batch assembly and the background flush loop.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use shimmer_analytics_core::Event;
use tokio::sync::oneshot;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, error, info};

use crate::error::Result;
use crate::queue::SafeQueue;
use crate::transmit::Transmitter;

/// Pending flush requests.
///
/// `forced` requests flush whatever is queued, `soft` requests flush only a
/// full batch.
#[derive(Debug, Default)]
pub struct FlushSignal {
	forced: AtomicU64,
	soft: AtomicU64,
}

impl FlushSignal {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn request_forced(&self) {
		self.forced.fetch_add(1, Ordering::SeqCst);
	}

	pub fn request_soft(&self) {
		self.soft.fetch_add(1, Ordering::SeqCst);
	}

	/// Clears both counters, returning `(forced, soft)` as they were.
	pub fn take(&self) -> (u64, u64) {
		(
			self.forced.swap(0, Ordering::SeqCst),
			self.soft.swap(0, Ordering::SeqCst),
		)
	}

	pub fn reset(&self) {
		self.forced.store(0, Ordering::SeqCst);
		self.soft.store(0, Ordering::SeqCst);
	}
}

/// Newline-terminated JSON lines ready for transmission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackedBatch {
	pub payload: Vec<u8>,
	pub count: usize,
}

/// Pops events from the queue into batches and hands them to the transmitter.
pub struct BatchAssembler {
	queue: Arc<SafeQueue<Event>>,
	batch_size: usize,
	transmitter: Arc<Transmitter>,
}

impl BatchAssembler {
	pub fn new(queue: Arc<SafeQueue<Event>>, batch_size: usize, transmitter: Arc<Transmitter>) -> Self {
		Self {
			queue,
			batch_size: batch_size.max(1),
			transmitter,
		}
	}

	/// Pops up to one batch worth of events. Returns `None` when the queue is empty.
	///
	/// An event that fails to serialize is dropped. The other events popped
	/// with it go back to the front of the queue in their original order.
	pub fn pack(&self) -> Result<Option<PackedBatch>> {
		self.pack_with(|buf, event| serde_json::to_writer(buf, event))
	}

	fn pack_with<F>(&self, mut encode: F) -> Result<Option<PackedBatch>>
	where
		F: FnMut(&mut Vec<u8>, &Event) -> serde_json::Result<()>,
	{
		let mut events = Vec::with_capacity(self.batch_size);
		while events.len() < self.batch_size {
			let Some(event) = self.queue.pop_front() else {
				break;
			};
			events.push(event);
		}
		if events.is_empty() {
			return Ok(None);
		}

		let mut payload = Vec::new();
		let mut failure = None;
		for (i, event) in events.iter().enumerate() {
			if let Err(e) = encode(&mut payload, event) {
				failure = Some((i, e));
				break;
			}
			payload.push(b'\n');
		}

		if let Some((failed, e)) = failure {
			error!(
				error = %e,
				uuid = %events[failed].uuid,
				requeued = failed,
				"failed to serialize event, dropping it"
			);
			let mut rest = events.split_off(failed);
			rest.remove(0);
			for event in events.into_iter().chain(rest).rev() {
				self.queue.push_front(event);
			}
			return Err(e.into());
		}

		let count = events.len();
		Ok(Some(PackedBatch { payload, count }))
	}

	/// Sends one batch. Without `force` this only happens when a full batch
	/// is queued. Returns the number of events handed to the transmitter.
	pub async fn flush(&self, force: bool) -> Result<usize> {
		let len = self.queue.len();
		if len == 0 || (!force && len < self.batch_size) {
			return Ok(0);
		}

		let Some(batch) = self.pack()? else {
			return Ok(0);
		};
		let count = batch.count;
		debug!(count, force, "flushing batch");
		self.transmitter.deliver(&batch).await?;
		Ok(count)
	}

	/// Forced flushes until the queue is empty. Failed batches are spooled by
	/// the transmitter and do not stop the drain.
	pub async fn drain(&self) -> usize {
		let mut batches = 0;
		while !self.queue.is_empty() {
			match self.flush(true).await {
				Ok(0) => break,
				Ok(_) => batches += 1,
				Err(e) => {
					batches += 1;
					error!(error = %e, "batch failed during final drain");
				}
			}
		}
		batches
	}

	pub fn queue_len(&self) -> usize {
		self.queue.len()
	}

	pub fn batch_size(&self) -> usize {
		self.batch_size
	}
}

/// Background task deciding when to flush.
pub struct FlushLoop {
	assembler: BatchAssembler,
	signal: Arc<FlushSignal>,
	interval: Duration,
	idle_sleep: Duration,
}

impl FlushLoop {
	pub fn new(
		assembler: BatchAssembler,
		signal: Arc<FlushSignal>,
		interval: Duration,
		idle_sleep: Duration,
	) -> Self {
		Self {
			assembler,
			signal,
			interval,
			idle_sleep,
		}
	}

	/// Runs until `stop` fires or its sender is dropped, then drains the queue.
	pub async fn run(self, mut stop: oneshot::Receiver<()>) {
		info!(
			interval_ms = self.interval.as_millis() as u64,
			batch_size = self.assembler.batch_size(),
			"starting flush loop"
		);

		let mut ticker = time::interval_at(Instant::now() + self.interval, self.interval);
		ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

		loop {
			tokio::select! {
				biased;

				_ = &mut stop => {
					let remaining = self.assembler.queue_len();
					let batches = self.assembler.drain().await;
					self.signal.reset();
					info!(events = remaining, batches, "final drain complete");
					break;
				}
				_ = ticker.tick() => {
					self.signal.reset();
					self.flush_logged(true).await;
				}
				_ = std::future::ready(()) => {
					match self.signal.take() {
						(forced, _) if forced > 0 => self.flush_logged(true).await,
						(_, soft) if soft > 0 => self.flush_logged(false).await,
						_ => time::sleep(self.idle_sleep).await,
					}
				}
			}
		}

		info!("flush loop stopped");
	}

	async fn flush_logged(&self, force: bool) {
		if let Err(e) = self.assembler.flush(force).await {
			error!(error = %e, force, "failed to flush batch");
		}
		// A single flush sends at most one batch; keep going while full batches remain.
		if self.assembler.queue_len() >= self.assembler.batch_size() {
			self.signal.request_soft();
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::error::SdkError;
	use crate::transmit::BatchSender;
	use async_trait::async_trait;
	use shimmer_analytics_core::EventType;
	use std::sync::atomic::AtomicBool;
	use std::sync::Mutex;

	#[derive(Default)]
	struct RecordingSender {
		batches: Mutex<Vec<PackedBatch>>,
		fail: AtomicBool,
	}

	impl RecordingSender {
		fn batch_counts(&self) -> Vec<usize> {
			self.batches.lock().unwrap().iter().map(|b| b.count).collect()
		}
	}

	#[async_trait]
	impl BatchSender for RecordingSender {
		async fn send_batch(&self, payload: &[u8], count: usize) -> Result<()> {
			if self.fail.load(Ordering::SeqCst) {
				return Err(SdkError::ReportRejected {
					status: 500,
					code: 0,
					message: "down".to_string(),
				});
			}
			self.batches.lock().unwrap().push(PackedBatch {
				payload: payload.to_vec(),
				count,
			});
			Ok(())
		}
	}

	fn setup(batch_size: usize) -> (Arc<SafeQueue<Event>>, Arc<RecordingSender>, BatchAssembler) {
		let queue = Arc::new(SafeQueue::new());
		let sender = Arc::new(RecordingSender::default());
		let transmitter = Arc::new(Transmitter::new(sender.clone(), None));
		let assembler = BatchAssembler::new(queue.clone(), batch_size, transmitter);
		(queue, sender, assembler)
	}

	fn event(n: usize) -> Event {
		Event::new(EventType::Track)
			.with_identity("acc", "")
			.with_event_name(format!("e{n}"))
	}

	#[test]
	fn test_flush_signal_take_swaps_to_zero() {
		let signal = FlushSignal::new();
		signal.request_forced();
		signal.request_soft();
		signal.request_soft();

		assert_eq!(signal.take(), (1, 2));
		assert_eq!(signal.take(), (0, 0));

		signal.request_forced();
		signal.reset();
		assert_eq!(signal.take(), (0, 0));
	}

	#[test]
	fn test_pack_joins_lines_in_order() {
		let (queue, _sender, assembler) = setup(2);
		for n in 0..3 {
			queue.push_back(event(n));
		}

		let batch = assembler.pack().unwrap().unwrap();
		assert_eq!(batch.count, 2);
		let text = String::from_utf8(batch.payload).unwrap();
		let lines: Vec<&str> = text.lines().collect();
		assert_eq!(lines.len(), 2);
		assert!(lines[0].contains("\"#event_name\":\"e0\""));
		assert!(lines[1].contains("\"#event_name\":\"e1\""));
		assert!(text.ends_with('\n'));
		assert_eq!(queue.len(), 1);
	}

	#[test]
	fn test_serialize_failure_requeues_the_other_events() {
		use serde::ser::Error as _;

		let (queue, _sender, assembler) = setup(4);
		for n in 0..5 {
			queue.push_back(event(n));
		}

		let result = assembler.pack_with(|buf, event| {
			if event.event_name == "e2" {
				return Err(serde_json::Error::custom("unencodable"));
			}
			serde_json::to_writer(buf, event)
		});
		assert!(matches!(result, Err(SdkError::Serialization(_))));

		let mut names = Vec::new();
		queue.iterate(|e| names.push(e.event_name.clone()));
		assert_eq!(names, vec!["e0", "e1", "e3", "e4"]);

		let batch = assembler.pack().unwrap().unwrap();
		assert_eq!(batch.count, 4);
	}

	#[test]
	fn test_pack_on_empty_queue_is_none() {
		let (_queue, _sender, assembler) = setup(5);
		assert!(assembler.pack().unwrap().is_none());
	}

	#[tokio::test]
	async fn test_soft_flush_waits_for_full_batch() {
		let (queue, sender, assembler) = setup(3);
		queue.push_back(event(0));
		queue.push_back(event(1));

		assert_eq!(assembler.flush(false).await.unwrap(), 0);
		assert_eq!(queue.len(), 2);
		assert!(sender.batch_counts().is_empty());

		assert_eq!(assembler.flush(true).await.unwrap(), 2);
		assert_eq!(sender.batch_counts(), vec![2]);
	}

	#[tokio::test]
	async fn test_forced_flush_of_empty_queue_sends_nothing() {
		let (_queue, sender, assembler) = setup(3);
		assert_eq!(assembler.flush(true).await.unwrap(), 0);
		assert!(sender.batch_counts().is_empty());
	}

	#[tokio::test]
	async fn test_drain_continues_past_failures() {
		let (queue, sender, assembler) = setup(2);
		for n in 0..5 {
			queue.push_back(event(n));
		}
		sender.fail.store(true, Ordering::SeqCst);

		assert_eq!(assembler.drain().await, 3);
		assert!(queue.is_empty());
	}

	#[tokio::test]
	async fn test_flush_loop_drains_on_stop() {
		let (queue, sender, assembler) = setup(3);
		for n in 0..5 {
			queue.push_back(event(n));
		}
		let signal = Arc::new(FlushSignal::new());
		let flush_loop = FlushLoop::new(
			assembler,
			signal,
			Duration::from_secs(3600),
			Duration::from_millis(1),
		);

		let (stop_tx, stop_rx) = oneshot::channel();
		stop_tx.send(()).unwrap();
		flush_loop.run(stop_rx).await;

		assert_eq!(sender.batch_counts(), vec![3, 2]);
		assert!(queue.is_empty());
	}

	#[tokio::test(start_paused = true)]
	async fn test_ticker_flushes_partial_batch() {
		let (queue, sender, assembler) = setup(10);
		queue.push_back(event(0));
		let signal = Arc::new(FlushSignal::new());
		let flush_loop = FlushLoop::new(
			assembler,
			signal,
			Duration::from_millis(200),
			Duration::from_millis(10),
		);

		let (stop_tx, stop_rx) = oneshot::channel();
		let handle = tokio::spawn(flush_loop.run(stop_rx));

		time::sleep(Duration::from_millis(100)).await;
		assert!(sender.batch_counts().is_empty(), "nothing before the first tick");

		time::sleep(Duration::from_millis(200)).await;
		assert_eq!(sender.batch_counts(), vec![1]);

		stop_tx.send(()).unwrap();
		handle.await.unwrap();
		assert_eq!(sender.batch_counts(), vec![1]);
	}

	#[tokio::test(start_paused = true)]
	async fn test_forced_request_flushes_without_tick() {
		let (queue, sender, assembler) = setup(10);
		queue.push_back(event(0));
		queue.push_back(event(1));
		let signal = Arc::new(FlushSignal::new());
		let flush_loop = FlushLoop::new(
			assembler,
			signal.clone(),
			Duration::from_secs(3600),
			Duration::from_millis(10),
		);

		let (stop_tx, stop_rx) = oneshot::channel();
		let handle = tokio::spawn(flush_loop.run(stop_rx));

		signal.request_forced();
		time::sleep(Duration::from_millis(50)).await;
		assert_eq!(sender.batch_counts(), vec![2]);

		stop_tx.send(()).unwrap();
		handle.await.unwrap();
	}
}

// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Background batching consumer.
//!
//! A [`BatchConsumer`] owns three tasks:
//!
//! - the intake reader, moving submitted events into the queue;
//! - the flush loop, packing and transmitting batches on demand or on a timer;
//! - the spool watcher (only with a `temp_dir`), re-uploading failed batches.
//!
//! Closing drops the intake sender. The reader drains the channel, then stops
//! the flush loop (final drain) and afterwards the watcher (final
//! rotate-and-upload), so nothing accepted before `close` is left behind.

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use shimmer_analytics_core::Event;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, info_span, Instrument};

use crate::batch::{BatchAssembler, FlushLoop, FlushSignal};
use crate::config::ConsumerConfig;
use crate::error::{Result, SdkError};
use crate::intake::{self, IntakeReader, IntakeSender};
use crate::queue::SafeQueue;
use crate::spool::{DirWatcher, Spooler};
use crate::transmit::{BatchSender, HttpBatchSender, Transmitter};

/// Submission API used by the event facade.
#[async_trait]
pub trait Consumer: Send + Sync {
	/// Accepts an event for delivery.
	async fn add(&self, event: Event) -> Result<()>;
	/// Requests delivery of whatever is queued. Does not wait for it.
	async fn flush(&self) -> Result<()>;
	/// Delivers or spools everything accepted so far and stops.
	async fn close(&self) -> Result<()>;
	/// Whether events are validated strictly before submission.
	fn is_strict(&self) -> bool;
}

/// Lifecycle of a [`BatchConsumer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConsumerState {
	Created = 0,
	Running = 1,
	Stopping = 2,
	Stopped = 3,
}

impl ConsumerState {
	fn from_u8(value: u8) -> Self {
		match value {
			0 => ConsumerState::Created,
			1 => ConsumerState::Running,
			2 => ConsumerState::Stopping,
			_ => ConsumerState::Stopped,
		}
	}
}

/// Consumer that batches events and sends them in the background.
pub struct BatchConsumer {
	config: ConsumerConfig,
	intake: Mutex<Option<IntakeSender>>,
	signal: Arc<FlushSignal>,
	transmitter: Arc<Transmitter>,
	spooler: Option<Arc<Spooler>>,
	reader_handle: tokio::sync::Mutex<Option<JoinHandle<()>>>,
	state: AtomicU8,
	received: Arc<AtomicU64>,
}

impl BatchConsumer {
	/// Creates a consumer posting to the configured server.
	///
	/// Must be called from within a tokio runtime.
	pub fn new(config: ConsumerConfig) -> Result<Self> {
		let config = config.normalize()?;
		let sender = Arc::new(HttpBatchSender::new(&config)?);
		Self::start(config, sender)
	}

	/// Creates a consumer delivering through `sender` instead of HTTP.
	pub fn with_sender(config: ConsumerConfig, sender: Arc<dyn BatchSender>) -> Result<Self> {
		let config = config.normalize()?;
		Self::start(config, sender)
	}

	fn start(config: ConsumerConfig, sender: Arc<dyn BatchSender>) -> Result<Self> {
		tokio::runtime::Handle::try_current()
			.map_err(|_| SdkError::Config("batch consumer requires a tokio runtime".to_string()))?;

		let state = AtomicU8::new(ConsumerState::Created as u8);

		let spooler = match &config.temp_dir {
			Some(_) => Some(Arc::new(Spooler::new(&config)?)),
			None => None,
		};
		let transmitter = Arc::new(Transmitter::new(sender, spooler.clone()));
		let queue = Arc::new(SafeQueue::new());
		let signal = Arc::new(FlushSignal::new());
		let received = Arc::new(AtomicU64::new(0));

		let (intake_tx, intake_rx) = intake::channel(config.intake_capacity());
		let reader = IntakeReader::new(
			intake_rx,
			Arc::clone(&queue),
			Arc::clone(&signal),
			config.batch_size,
			Arc::clone(&received),
		);
		let flush_loop = FlushLoop::new(
			BatchAssembler::new(queue, config.batch_size, Arc::clone(&transmitter)),
			Arc::clone(&signal),
			config.interval,
			config.idle_sleep,
		);

		let span = info_span!("batch_consumer", app_id = %config.app_id);

		let (flush_stop, flush_stop_rx) = oneshot::channel();
		let flush_handle = tokio::spawn(flush_loop.run(flush_stop_rx).instrument(span.clone()));

		let watcher = spooler.as_ref().map(|spooler| {
			let (stop, stop_rx) = oneshot::channel();
			let watcher = DirWatcher::new(Arc::clone(spooler), config.interval);
			let handle = tokio::spawn(watcher.run(stop_rx).instrument(span.clone()));
			(stop, handle)
		});

		let stages = Stages {
			flush: (flush_stop, flush_handle),
			watcher,
		};
		let reader_handle = tokio::spawn(
			async move {
				reader.run().await;
				stages.shut_down().await;
			}
			.instrument(span.clone()),
		);

		state.store(ConsumerState::Running as u8, Ordering::SeqCst);
		span.in_scope(|| {
			info!(
				server_url = %config.server_url,
				batch_size = config.batch_size,
				spooling = config.temp_dir.is_some(),
				"batch consumer started"
			)
		});

		Ok(Self {
			config,
			intake: Mutex::new(Some(intake_tx)),
			signal,
			transmitter,
			spooler,
			reader_handle: tokio::sync::Mutex::new(Some(reader_handle)),
			state,
			received,
		})
	}

	pub fn config(&self) -> &ConsumerConfig {
		&self.config
	}

	pub fn state(&self) -> ConsumerState {
		ConsumerState::from_u8(self.state.load(Ordering::SeqCst))
	}

	/// Events read from the intake channel.
	pub fn received_count(&self) -> u64 {
		self.received.load(Ordering::Relaxed)
	}

	/// Events acknowledged by the server.
	pub fn sent_count(&self) -> u64 {
		self.transmitter.sent_count()
	}

	/// Events written to the spool file after failed delivery.
	pub fn spooled_count(&self) -> u64 {
		self.transmitter.spooled_count()
	}

	fn sender(&self) -> Option<IntakeSender> {
		self.intake.lock().unwrap_or_else(PoisonError::into_inner).clone()
	}
}

#[async_trait]
impl Consumer for BatchConsumer {
	async fn add(&self, event: Event) -> Result<()> {
		let sender = self.sender().ok_or(SdkError::ClientShutdown)?;
		debug!(uuid = %event.uuid, event_type = %event.event_type, "submitting event");
		sender.submit(event).await
	}

	async fn flush(&self) -> Result<()> {
		if self.state() != ConsumerState::Running {
			return Err(SdkError::ClientShutdown);
		}
		self.signal.request_forced();
		Ok(())
	}

	async fn close(&self) -> Result<()> {
		let sender = self
			.intake
			.lock()
			.unwrap_or_else(PoisonError::into_inner)
			.take();
		if sender.is_some() {
			self.state.store(ConsumerState::Stopping as u8, Ordering::SeqCst);
			info!(app_id = %self.config.app_id, "closing batch consumer");
		}
		drop(sender);

		// Concurrent callers wait here until the first one has finished.
		let mut handle = self.reader_handle.lock().await;
		let Some(reader) = handle.take() else {
			return Ok(());
		};
		if let Err(e) = reader.await {
			error!(error = %e, "consumer task failed during shutdown");
		}

		if let Some(spooler) = &self.spooler {
			if let Err(e) = spooler.close() {
				error!(error = %e, "failed to close spool writer");
			}
		}

		self.state.store(ConsumerState::Stopped as u8, Ordering::SeqCst);
		info!(
			app_id = %self.config.app_id,
			received = self.received_count(),
			sent = self.sent_count(),
			spooled = self.spooled_count(),
			"batch consumer stopped"
		);
		Ok(())
	}

	fn is_strict(&self) -> bool {
		false
	}
}

/// Downstream tasks stopped by the reader once the channel is drained.
struct Stages {
	flush: (oneshot::Sender<()>, JoinHandle<()>),
	watcher: Option<(oneshot::Sender<()>, JoinHandle<()>)>,
}

impl Stages {
	async fn shut_down(self) {
		let (stop, handle) = self.flush;
		let _ = stop.send(());
		if let Err(e) = handle.await {
			error!(error = %e, "flush loop task failed");
		}

		if let Some((stop, handle)) = self.watcher {
			let _ = stop.send(());
			if let Err(e) = handle.await {
				error!(error = %e, "spool watcher task failed");
			}
		}
	}
}

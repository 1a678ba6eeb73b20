// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Mutex-guarded double-ended queue used as the staging buffer between the
//! intake reader and the flush loop.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// A thread-safe FIFO/LIFO list. Every operation takes the same lock.
#[derive(Debug)]
pub struct SafeQueue<T> {
	inner: Mutex<VecDeque<T>>,
}

impl<T> SafeQueue<T> {
	pub fn new() -> Self {
		Self {
			inner: Mutex::new(VecDeque::new()),
		}
	}

	// No operation leaves the deque half-updated, so a poisoned lock is still usable.
	fn lock(&self) -> MutexGuard<'_, VecDeque<T>> {
		self.inner.lock().unwrap_or_else(PoisonError::into_inner)
	}

	pub fn push_back(&self, item: T) {
		self.lock().push_back(item);
	}

	pub fn push_front(&self, item: T) {
		self.lock().push_front(item);
	}

	/// Removes and returns the oldest item, or `None` when empty.
	pub fn pop_front(&self) -> Option<T> {
		self.lock().pop_front()
	}

	pub fn pop_back(&self) -> Option<T> {
		self.lock().pop_back()
	}

	pub fn len(&self) -> usize {
		self.lock().len()
	}

	pub fn is_empty(&self) -> bool {
		self.lock().is_empty()
	}

	/// Visits every item front to back while holding the lock.
	///
	/// The visitor must not call back into the queue.
	pub fn iterate<F>(&self, mut visit: F)
	where
		F: FnMut(&T),
	{
		for item in self.lock().iter() {
			visit(item);
		}
	}

	/// Like [`SafeQueue::iterate`], stopping as soon as `visit` returns true.
	pub fn iterate_until<F>(&self, mut visit: F)
	where
		F: FnMut(&T) -> bool,
	{
		for item in self.lock().iter() {
			if visit(item) {
				return;
			}
		}
	}
}

impl<T> Default for SafeQueue<T> {
	fn default() -> Self {
		Self::new()
	}
}

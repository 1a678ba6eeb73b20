// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Bounded immediate retry for HTTP operations.

use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryConfig {
	pub max_attempts: u32,
}

impl RetryConfig {
	/// Retries up to `max_attempts` times in total with no delay between attempts.
	pub fn immediate(max_attempts: u32) -> Self {
		Self { max_attempts }
	}
}

pub trait RetryableError {
	fn is_retryable(&self) -> bool;
}

/// Runs `f` until it succeeds, returns a non-retryable error, or `max_attempts` is reached.
///
/// The error of the last attempt is returned on exhaustion.
pub async fn retry<F, Fut, T, E>(cfg: &RetryConfig, mut f: F) -> Result<T, E>
where
	F: FnMut() -> Fut,
	Fut: std::future::Future<Output = Result<T, E>>,
	E: RetryableError + std::fmt::Display,
{
	let max_attempts = cfg.max_attempts.max(1);
	let mut attempt = 0;

	loop {
		match f().await {
			Ok(result) => return Ok(result),
			Err(err) => {
				attempt += 1;

				if !err.is_retryable() {
					warn!(error = %err, attempt, "non-retryable error encountered");
					return Err(err);
				}

				if attempt >= max_attempts {
					warn!(
						error = %err,
						attempt,
						max_attempts,
						"max retry attempts exhausted"
					);
					return Err(err);
				}

				warn!(error = %err, attempt, max_attempts, "retrying after error");
			}
		}
	}
}

// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Reports a burst of user and track events through a batch consumer.
//!
//! ```text
//! cargo run -p shimmer-analytics --example batch [config.toml]
//! ```
//!
//! Without a config file the server defaults to `http://localhost:20005`.
//! `SHIMMER_*` variables override either source.

use std::time::Duration;

use chrono::Utc;
use shimmer_analytics::{ConfigLayer, ConsumerConfig, Properties, ShimmerAnalytics};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
	tracing_subscriber::fmt()
		.with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
		.init();

	let config = match std::env::args().nth(1) {
		Some(path) => ConsumerConfig::from_toml_file(path)?,
		None => ConfigLayer {
			server_url: Some("http://localhost:20005".to_string()),
			app_id: Some("app-id".to_string()),
			app_token: Some("app-token".to_string()),
			temp_dir: Some("logs/back/app".into()),
			batch_size: Some(47),
			timeout_secs: Some(10),
			compress: Some(true),
			interval_secs: Some(1),
			..Default::default()
		}
		.apply_env()
		.into_config(),
	};

	let client = ShimmerAnalytics::from_config(config)?;
	client.set_super_properties(Properties::new().insert("channel", "demo"));
	client.set_dynamic_super_properties(|| Properties::new().insert("sent_at", Utc::now()));

	for i in 0..1000i64 {
		let account_id = i.to_string();
		let distinct_id = format!("7890123-{i}");

		let result = async {
			client
				.user_set_once(
					&account_id,
					&distinct_id,
					Properties::new()
						.insert("id", i)
						.insert("name", format!("name-{i}"))
						.insert("first_login", Utc::now()),
				)
				.await?;
			client
				.user_set(
					&account_id,
					&distinct_id,
					Properties::new().insert("money", i).insert("last_login", Utc::now()),
				)
				.await?;
			client
				.track(
					&account_id,
					&distinct_id,
					"event_name",
					Properties::new().insert("a", 1).insert("b", 2).insert("c", 3),
				)
				.await?;
			client
				.user_add(&account_id, &distinct_id, Properties::new().insert("money", 10))
				.await
		}
		.await;

		if let Err(e) = result {
			error!(error = %e, account_id = %account_id, "failed to report event");
			break;
		}
	}

	client.flush().await?;
	tokio::time::sleep(Duration::from_millis(500)).await;

	client.close().await?;
	info!("done");
	Ok(())
}

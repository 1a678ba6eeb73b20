// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Pieces shared by the report and upload requests.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serializer};

/// SDK identity sent with every request.
pub const SDK_NAME: &str = "rust-sdk";
pub const SDK_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Byte fields travel as standard base64 strings.
pub(crate) fn serialize_bytes<T, S>(bytes: &T, serializer: S) -> Result<S::Ok, S::Error>
where
	T: AsRef<[u8]> + ?Sized,
	S: Serializer,
{
	serializer.serialize_str(&STANDARD.encode(bytes.as_ref()))
}

/// Application-level status returned by the collection server.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct ServerReply {
	#[serde(rename = "Code", alias = "code", default)]
	pub code: i64,
	#[serde(rename = "Msg", alias = "msg", default)]
	pub msg: String,
}

impl ServerReply {
	/// An empty or `null` body reads as code 0. A body that is not a reply
	/// object is reported as code -1 with the raw text as message.
	pub fn parse(body: &[u8]) -> Self {
		if body.trim_ascii().is_empty() || body.trim_ascii() == b"null" {
			return Self::default();
		}
		serde_json::from_slice(body).unwrap_or_else(|e| Self {
			code: -1,
			msg: format!("malformed response body ({e}): {}", String::from_utf8_lossy(body)),
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_empty_body_is_success_code() {
		let reply = ServerReply::parse(b"");
		assert_eq!(reply.code, 0);
		assert!(reply.msg.is_empty());
	}

	#[test]
	fn test_null_body_is_success_code() {
		for body in [&b"null"[..], b" null\n"] {
			let reply = ServerReply::parse(body);
			assert_eq!(reply.code, 0);
			assert!(reply.msg.is_empty());
		}
	}

	#[test]
	fn test_reply_accepts_either_case() {
		let upper = ServerReply::parse(br#"{"Code": 3, "Msg": "bad"}"#);
		assert_eq!((upper.code, upper.msg.as_str()), (3, "bad"));

		let lower = ServerReply::parse(br#"{"code": 0, "msg": "ok"}"#);
		assert_eq!((lower.code, lower.msg.as_str()), (0, "ok"));
	}

	#[test]
	fn test_malformed_body_is_failure_code() {
		let reply = ServerReply::parse(b"<html>502</html>");
		assert_eq!(reply.code, -1);
		assert!(reply.msg.contains("<html>502</html>"));
	}

	#[test]
	fn test_bytes_serialize_as_base64() {
		#[derive(serde::Serialize)]
		struct Holder<'a> {
			#[serde(serialize_with = "serialize_bytes")]
			data: &'a [u8],
		}

		let json = serde_json::to_string(&Holder { data: b"hi\n" }).unwrap();
		assert_eq!(json, r#"{"data":"aGkK"}"#);
	}
}

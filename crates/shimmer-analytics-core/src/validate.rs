// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

/// Maximum length of an event name or property key.
pub const MAX_KEY_LENGTH: usize = 50;

/// Validates an event name or property key.
///
/// Valid keys must:
/// - Be 1 to 50 characters long
/// - Start with an ASCII letter or `#`
/// - Contain only ASCII alphanumeric characters or `_` after the first character
pub fn is_valid_key(key: &str) -> bool {
	if key.is_empty() || key.len() > MAX_KEY_LENGTH {
		return false;
	}

	let mut chars = key.chars();
	match chars.next() {
		Some(c) if c.is_ascii_alphabetic() || c == '#' => {}
		_ => return false,
	}

	chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

//! Key sanitization shared by table rows and lease objects.
//!
//! Both stores reject a handful of characters in their key grammar, so every
//! partition key, row key and lock key goes through [`sanitize_key`] first.

use thiserror::Error;

/// Failure to derive a usable store key.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum KeyError {
    /// The raw value was empty or only whitespace.
    #[error("key must not be empty")]
    Empty,
    /// Every character was stripped by sanitization.
    #[error("key `{raw}` contains no allowed characters")]
    NothingLeft {
        /// Value as received.
        raw: String,
    },
}

fn is_disallowed(c: char) -> bool {
    matches!(c, '\\' | '#' | '%' | '+' | '/' | '?')
        || ('\u{0000}'..='\u{001F}').contains(&c)
        || ('\u{007F}'..='\u{009F}').contains(&c)
}

/// Strip the characters forbidden by the store key grammar.
pub fn sanitize_key(raw: &str) -> Result<String, KeyError> {
    if raw.trim().is_empty() {
        return Err(KeyError::Empty);
    }

    let cleaned: String = raw.chars().filter(|c| !is_disallowed(*c)).collect();
    if cleaned.is_empty() {
        return Err(KeyError::NothingLeft {
            raw: raw.to_owned(),
        });
    }

    Ok(cleaned)
}

/// Lock key protecting the row addressed by `(partition_key, row_key)`.
///
/// The two parts are concatenated without a separator before sanitizing, which keeps
/// keys compatible with lock objects already present in the container. As a
/// consequence `("ab", "c")` and `("a", "bc")` share a lock.
pub fn lock_key(partition_key: &str, row_key: &str) -> Result<String, KeyError> {
    sanitize_key(&format!("{partition_key}{row_key}"))
}

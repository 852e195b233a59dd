//! Opaque pagination cursors.
//!
//! A cursor is the last key a listing returned, serialized as JSON and
//! encoded with URL-safe base64 so it can travel in a query string.

use std::fmt;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;

use super::{Key, Result, StorageError};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Cursor(String);

impl Cursor {
    /// Encode the position after `key`.
    pub fn encode(key: &Key) -> Result<Self> {
        let json = serde_json::to_vec(key)?;
        Ok(Self(URL_SAFE_NO_PAD.encode(json)))
    }

    /// Parse a cursor previously handed out by `encode`.
    pub fn decode(token: &str) -> Result<Key> {
        let bytes = URL_SAFE_NO_PAD
            .decode(token.trim_end_matches('='))
            .map_err(|e| StorageError::InvalidCursor(e.to_string()))?;
        serde_json::from_slice(&bytes).map_err(|e| StorageError::InvalidCursor(e.to_string()))
    }

    /// Wrap a token received from a caller without checking it.
    pub fn from_token(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn key(&self) -> Result<Key> {
        Self::decode(&self.0)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

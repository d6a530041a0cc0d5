//! Continuation tokens
//!
//! Tokens are opaque to callers. Both bundled adapters encode a page offset;
//! this is best-effort under concurrent inserts and deletes, which can shift
//! rows across page boundaries.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::engine::error::{Result, StoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OffsetToken {
    #[serde(rename = "o")]
    pub offset: usize,
}

impl OffsetToken {
    pub fn new(offset: usize) -> Self {
        Self { offset }
    }

    pub fn encode(&self) -> String {
        // Serializing a plain struct cannot fail
        let json = serde_json::to_vec(self).unwrap_or_default();
        URL_SAFE_NO_PAD.encode(json)
    }

    pub fn decode(token: &str) -> Result<Self> {
        let bytes = URL_SAFE_NO_PAD
            .decode(token)
            .map_err(|e| StoreError::InvalidContinuationToken(e.to_string()))?;
        serde_json::from_slice(&bytes)
            .map_err(|e| StoreError::InvalidContinuationToken(e.to_string()))
    }

    /// Offset to start from for an optional incoming token
    pub fn start(token: Option<&str>) -> Result<usize> {
        match token {
            Some(t) => Ok(Self::decode(t)?.offset),
            None => Ok(0),
        }
    }
}

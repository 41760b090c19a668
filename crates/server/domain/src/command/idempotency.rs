//! Idempotency keys derived from correlation ids.

use super::error::IdempotencyError;
use courier_shared::CorrelationId;
use serde::{Deserialize, Serialize};
use std::fmt;

const KEY_PREFIX: &str = "cmd:";

/// Unique key under which an envelope is stored.
///
/// The key embeds the full correlation UUID, so distinct correlation ids can
/// never collide and the same id always yields the same key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    pub fn derive(correlation_id: &CorrelationId) -> Result<Self, IdempotencyError> {
        if correlation_id.is_nil() {
            return Err(IdempotencyError::NilCorrelationId);
        }
        Ok(Self(format!(
            "{KEY_PREFIX}{}",
            correlation_id.as_uuid().hyphenated()
        )))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

//! Cache keys and the entries stored under them.

use ajaxkit_core::transport::{Body, DataType, RequestData};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identity of a cached GET: the URL, the serialized payload and the expected format.
///
/// The payload is compared by its JSON serialization, so two calls with equal
/// data share an entry even when built separately, and any difference in data
/// yields a distinct entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    /// Request URL.
    pub url: String,
    /// Canonical JSON serialization of the request payload.
    pub data: String,
    /// Expected response format.
    pub data_type: DataType,
}

impl CacheKey {
    /// Key for a request.
    ///
    /// # Errors
    ///
    /// Returns the serializer error if `data` cannot be turned into JSON.
    pub fn new(url: &str, data: &RequestData, data_type: DataType) -> Result<Self, serde_json::Error> {
        Ok(Self {
            url: url.to_string(),
            data: serde_json::to_string(data)?,
            data_type,
        })
    }
}

/// Bookkeeping attached to an entry by its [`Condition`](crate::Condition)
/// whenever the entry is (re)populated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "at", rename_all = "lowercase")]
pub enum EntryState {
    /// Populated; no time information needed.
    Populated,
    /// Populated at the given instant.
    Timestamp(DateTime<Utc>),
}

/// A memoized successful GET response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Request URL.
    pub url: String,
    /// Request payload.
    pub data: RequestData,
    /// Expected response format.
    pub data_type: DataType,
    /// Stored response body.
    pub response: Body,
    /// Condition-defined state; `None` is always expired.
    pub state: Option<EntryState>,
}

impl CacheEntry {
    /// Time the entry was last populated, when its condition records one.
    #[must_use]
    pub const fn populated_at(&self) -> Option<DateTime<Utc>> {
        match self.state {
            Some(EntryState::Timestamp(at)) => Some(at),
            Some(EntryState::Populated) | None => None,
        }
    }
}

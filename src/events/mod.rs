//! Event envelopes and payloads exchanged over the log.
//!
//! Every message is a CloudEvents-shaped JSON envelope (`id`, `type`,
//! `source`, `specversion`, `time`, `data`). Inbound review changes are
//! parsed into the closed `ReviewModified` sum type; anything that does not
//! match one of its variants exactly is rejected with an `EventError`.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;
use validator::Validate;

/// Event type names.
pub mod types {
    pub const REVIEW_CREATED: &str = "com.ct.product.review.created";
    pub const REVIEW_UPDATED: &str = "com.ct.product.review.updated";
    pub const REVIEW_DELETED: &str = "com.ct.product.review.deleted";
    pub const RATING_CALCULATED: &str = "com.ct.product.review.rating.calculated";
}

pub const SPEC_VERSION: &str = "1.0";

#[derive(Debug, thiserror::Error)]
pub enum EventError {
    #[error("Malformed event: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Unexpected event type: {0}")]
    UnknownType(String),

    #[error("Event failed validation: {0}")]
    Invalid(#[from] validator::ValidationErrors),

    #[error("Message has no payload")]
    Empty,
}

pub type Result<T> = std::result::Result<T, EventError>;

/// Envelope around an event payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope<T> {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub source: String,
    pub specversion: String,
    pub time: DateTime<Utc>,
    pub data: T,
}

impl<T> EventEnvelope<T> {
    /// Wrap `data` with a fresh id and the current time.
    pub fn new(source: impl Into<String>, event_type: impl Into<String>, data: T) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            event_type: event_type.into(),
            source: source.into(),
            specversion: SPEC_VERSION.to_string(),
            time: Utc::now(),
            data,
        }
    }
}

/// Envelope as it arrives, before the payload type is known.
#[derive(Debug, Deserialize, Validate)]
struct RawEnvelope {
    #[validate(length(min = 1))]
    id: String,
    #[serde(rename = "type")]
    #[validate(length(min = 1))]
    event_type: String,
    #[validate(length(min = 1))]
    source: String,
    #[validate(length(min = 1))]
    specversion: String,
    time: DateTime<Utc>,
    #[serde(default)]
    data: Value,
}

impl RawEnvelope {
    fn parse(payload: &[u8]) -> Result<Self> {
        if payload.is_empty() {
            return Err(EventError::Empty);
        }
        let raw: RawEnvelope = serde_json::from_slice(payload)?;
        raw.validate()?;
        Ok(raw)
    }

    fn with_data<T>(self, data: T) -> EventEnvelope<T> {
        EventEnvelope {
            id: self.id,
            event_type: self.event_type,
            source: self.source,
            specversion: self.specversion,
            time: self.time,
            data,
        }
    }
}

/// Deserialize and validate a payload. Undeclared fields are dropped.
fn payload<T: DeserializeOwned + Validate>(data: Value) -> Result<T> {
    let payload: T = serde_json::from_value(data)?;
    payload.validate()?;
    Ok(payload)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ReviewCreated {
    #[validate(length(min = 1))]
    pub product_id: String,
    #[validate(length(min = 1))]
    pub review_id: String,
    #[validate(range(min = 1, max = 5))]
    pub new_rating: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ReviewUpdated {
    #[validate(length(min = 1))]
    pub product_id: String,
    #[validate(length(min = 1))]
    pub review_id: String,
    #[validate(range(min = 1, max = 5))]
    pub new_rating: i64,
    #[validate(range(min = 1, max = 5))]
    pub old_rating: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ReviewDeleted {
    #[validate(length(min = 1))]
    pub product_id: String,
    #[validate(length(min = 1))]
    pub review_id: String,
    #[validate(range(min = 1, max = 5))]
    pub old_rating: i64,
}

/// A change to one review.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ReviewModified {
    Created(ReviewCreated),
    Updated(ReviewUpdated),
    Deleted(ReviewDeleted),
}

impl ReviewModified {
    pub fn event_type(&self) -> &'static str {
        match self {
            ReviewModified::Created(_) => types::REVIEW_CREATED,
            ReviewModified::Updated(_) => types::REVIEW_UPDATED,
            ReviewModified::Deleted(_) => types::REVIEW_DELETED,
        }
    }

    pub fn product_id(&self) -> &str {
        match self {
            ReviewModified::Created(e) => &e.product_id,
            ReviewModified::Updated(e) => &e.product_id,
            ReviewModified::Deleted(e) => &e.product_id,
        }
    }

    pub fn review_id(&self) -> &str {
        match self {
            ReviewModified::Created(e) => &e.review_id,
            ReviewModified::Updated(e) => &e.review_id,
            ReviewModified::Deleted(e) => &e.review_id,
        }
    }

    /// Wrap this change in an envelope carrying the matching type name.
    pub fn into_envelope(self, source: impl Into<String>) -> EventEnvelope<ReviewModified> {
        let event_type = self.event_type();
        EventEnvelope::new(source, event_type, self)
    }
}

/// Parse an inbound review change.
pub fn parse_review_modified(payload_bytes: &[u8]) -> Result<EventEnvelope<ReviewModified>> {
    let mut raw = RawEnvelope::parse(payload_bytes)?;
    let data = std::mem::take(&mut raw.data);
    let change = match raw.event_type.as_str() {
        types::REVIEW_CREATED => ReviewModified::Created(payload(data)?),
        types::REVIEW_UPDATED => ReviewModified::Updated(payload(data)?),
        types::REVIEW_DELETED => ReviewModified::Deleted(payload(data)?),
        other => return Err(EventError::UnknownType(other.to_string())),
    };
    Ok(raw.with_data(change))
}

/// Recomputed average for one product. `average_rating` is omitted when the
/// product has no reviews left.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct RatingCalculated {
    #[validate(length(min = 1))]
    pub product_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(range(min = 1.0, max = 5.0))]
    pub average_rating: Option<f64>,
}

/// Parse an inbound rating recalculation.
pub fn parse_rating_calculated(payload_bytes: &[u8]) -> Result<EventEnvelope<RatingCalculated>> {
    let mut raw = RawEnvelope::parse(payload_bytes)?;
    if raw.event_type != types::RATING_CALCULATED {
        return Err(EventError::UnknownType(raw.event_type));
    }
    let data = payload(std::mem::take(&mut raw.data))?;
    Ok(raw.with_data(data))
}

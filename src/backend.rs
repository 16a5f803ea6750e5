// The managed backend seen from the client: generic table access plus the
// calendar RPCs and the real-time message feed.

use crate::calendar::DayAvailability;
use crate::model::{
    tables, AvailabilityOverride, BookingStatus, Listing, ListingRecord, ListingType, Message,
    NewBooking, Profile,
};
use crate::query::Query;
use async_trait::async_trait;
use chrono::NaiveDate;
use futures::stream::BoxStream;
use futures::StreamExt;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, warn};

// Postgres unique_violation
pub const UNIQUE_VIOLATION: &str = "23505";

pub const CALENDAR_RPC: &str = "get_property_calendar";
pub const AVAILABILITY_RPC: &str = "check_property_availability";

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Request timeout after {0}ms")]
    Timeout(u64),

    #[error("API error: {status_code} - {message}")]
    ApiResponseError {
        status_code: u16,
        code: Option<String>,
        message: String,
    },

    #[error("Duplicate row: {0}")]
    UniqueViolation(String),

    #[error("Decode error: {0}")]
    DecodeError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Other error: {0}")]
    Other(String),
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        ApiError::DecodeError(err.to_string())
    }
}

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Initialization error: {0}")]
    InitError(String),
}

// Change events delivered by the real-time feed for the messages table
#[derive(Debug, Clone, PartialEq)]
pub enum MessageEvent {
    Inserted(Message),
    Updated(Message),
}

impl MessageEvent {
    pub fn message(&self) -> &Message {
        match self {
            MessageEvent::Inserted(message) | MessageEvent::Updated(message) => message,
        }
    }
}

pub type MessageStream = BoxStream<'static, MessageEvent>;

// Adapt a broadcast receiver into a message stream. Lagged receivers skip the
// dropped events and keep going; the stream ends when the sender is gone.
pub fn broadcast_stream(rx: broadcast::Receiver<MessageEvent>) -> MessageStream {
    futures::stream::unfold(rx, |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(event) => return Some((event, rx)),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "real-time subscriber lagged, events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    })
    .boxed()
}

pub fn decode_rows<T: DeserializeOwned>(rows: Vec<Value>) -> Result<Vec<T>, ApiError> {
    rows.into_iter()
        .map(|row| serde_json::from_value(row).map_err(ApiError::from))
        .collect()
}

pub fn decode_row<T: DeserializeOwned>(row: Value) -> Result<T, ApiError> {
    Ok(serde_json::from_value(row)?)
}

#[async_trait]
pub trait Backend: Send + Sync + 'static {
    // Per-day availability records for the window; days without a record are omitted
    async fn get_calendar(
        &self,
        listing_id: &str,
        listing_type: ListingType,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<DayAvailability>, ApiError>;

    // Server-side conflict check for the nights [start, end)
    async fn check_availability(
        &self,
        listing_id: &str,
        listing_type: ListingType,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<bool, ApiError>;

    async fn select(&self, table: &str, query: &Query) -> Result<Vec<Value>, ApiError>;

    // Returns the stored row, including generated columns
    async fn insert(&self, table: &str, row: Value) -> Result<Value, ApiError>;

    // Insert or merge on the given comma-separated conflict columns
    async fn upsert(&self, table: &str, rows: Vec<Value>, on_conflict: &str)
        -> Result<(), ApiError>;

    // Returns the number of rows touched
    async fn update(&self, table: &str, query: &Query, patch: Value) -> Result<usize, ApiError>;

    async fn delete(&self, table: &str, query: &Query) -> Result<usize, ApiError>;

    fn subscribe_messages(&self) -> MessageStream;

    async fn find_profile(&self, user_id: &str) -> Result<Option<Profile>, ApiError> {
        let rows = self
            .select(tables::PROFILES, &Query::new().eq("user_id", user_id).limit(1))
            .await?;
        rows.into_iter().next().map(decode_row::<Profile>).transpose()
    }

    // Look the id up in hotels, then apartments, then restaurants; the first
    // table holding it decides the listing type
    async fn find_listing(&self, listing_id: &str) -> Result<Option<Listing>, ApiError> {
        for listing_type in ListingType::ALL {
            let rows = self
                .select(
                    listing_type.table(),
                    &Query::new().eq("id", listing_id).limit(1),
                )
                .await?;
            if let Some(row) = rows.into_iter().next() {
                let record: ListingRecord = decode_row(row)?;
                debug!(listing_id, %listing_type, "listing found");
                return Ok(Some(record.into_listing(listing_type)));
            }
        }
        Ok(None)
    }

    async fn create_booking(&self, booking: &NewBooking) -> Result<String, ApiError> {
        let row = self
            .insert(tables::BOOKINGS, serde_json::to_value(booking)?)
            .await?;
        let id = row
            .get("id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| ApiError::DecodeError("booking row without id".to_string()))?;
        debug!(booking_id = %id, property_id = %booking.property_id, "booking inserted");
        Ok(id)
    }

    async fn update_booking_status(
        &self,
        booking_id: &str,
        status: BookingStatus,
    ) -> Result<(), ApiError> {
        let touched = self
            .update(
                tables::BOOKINGS,
                &Query::new().eq("id", booking_id),
                json!({ "status": status }),
            )
            .await?;
        if touched == 0 {
            return Err(ApiError::NotFound(format!("booking {booking_id}")));
        }
        Ok(())
    }

    async fn upsert_availability(&self, rows: &[AvailabilityOverride]) -> Result<(), ApiError> {
        let rows = rows
            .iter()
            .map(serde_json::to_value)
            .collect::<Result<Vec<_>, _>>()?;
        self.upsert(
            tables::PROPERTY_AVAILABILITY,
            rows,
            "property_id,property_type,date",
        )
        .await
    }

    async fn delete_availability(
        &self,
        listing_id: &str,
        listing_type: ListingType,
        date: NaiveDate,
    ) -> Result<usize, ApiError> {
        self.delete(
            tables::PROPERTY_AVAILABILITY,
            &Query::new()
                .eq("property_id", listing_id)
                .eq("property_type", listing_type.as_str())
                .eq("date", date.to_string()),
        )
        .await
    }
}

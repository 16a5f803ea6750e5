// In-memory stand-in for the managed backend.
// Tables are JSON rows in DashMaps; the calendar and availability RPCs are
// computed from the override, blocked-range and booking tables the same way
// the hosted functions do. Failures can be injected per operation.

use crate::backend::{broadcast_stream, decode_row, ApiError, Backend, MessageEvent, MessageStream};
use crate::calendar::DayAvailability;
use crate::model::{tables, timestamp, BlockedRange, Booking, BookingStatus, ListingType, Message};
use crate::query::{compare_values, Query};
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use dashmap::DashMap;
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use tokio::sync::broadcast;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Calendar,
    CheckAvailability,
    Select,
    Insert,
    Upsert,
    Update,
    Delete,
}

pub struct InMemoryBackend {
    tables: DashMap<String, Vec<Value>>,
    unique_keys: DashMap<String, Vec<String>>,
    failures: DashMap<Operation, usize>,
    events: broadcast::Sender<MessageEvent>,
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBackend {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(256);
        let backend = Self {
            tables: DashMap::new(),
            unique_keys: DashMap::new(),
            failures: DashMap::new(),
            events,
        };
        backend.unique_on(tables::PROFILES, &["user_id"]);
        backend.unique_on(tables::REVIEWS, &["property_id", "reviewer_id"]);
        backend.unique_on(tables::WISHLIST_ITEMS, &["wishlist_id", "property_id"]);
        backend.unique_on(
            tables::PROPERTY_AVAILABILITY,
            &["property_id", "property_type", "date"],
        );
        backend
    }

    pub fn unique_on(&self, table: &str, columns: &[&str]) {
        self.unique_keys.insert(
            table.to_string(),
            columns.iter().map(|c| c.to_string()).collect(),
        );
    }

    // Load rows without failure injection or events
    pub fn seed(&self, table: &str, rows: Vec<Value>) {
        let mut stored = self.tables.entry(table.to_string()).or_default();
        for row in rows {
            if let Value::Object(mut object) = row {
                fill_generated(&mut object);
                stored.push(Value::Object(object));
            }
        }
    }

    pub fn rows(&self, table: &str) -> Vec<Value> {
        self.tables
            .get(table)
            .map(|rows| rows.clone())
            .unwrap_or_default()
    }

    // Make the next `count` calls of `operation` fail
    pub fn fail_next(&self, operation: Operation, count: usize) {
        self.failures.insert(operation, count);
    }

    // Deliver an event as if another client had written it
    pub fn publish(&self, event: MessageEvent) -> usize {
        self.events.send(event).unwrap_or(0)
    }

    fn take_failure(&self, operation: Operation) -> Result<(), ApiError> {
        if let Some(mut remaining) = self.failures.get_mut(&operation) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(ApiError::ApiResponseError {
                    status_code: 500,
                    code: None,
                    message: format!("injected {operation:?} failure"),
                });
            }
        }
        Ok(())
    }

    fn unique_columns(&self, table: &str) -> Vec<String> {
        self.unique_keys
            .get(table)
            .map(|columns| columns.clone())
            .unwrap_or_default()
    }

    fn notify(&self, table: &str, row: &Value, inserted: bool) {
        if table != tables::MESSAGES {
            return;
        }
        if let Ok(message) = decode_row::<Message>(row.clone()) {
            let event = if inserted {
                MessageEvent::Inserted(message)
            } else {
                MessageEvent::Updated(message)
            };
            // No subscribers is fine
            let _ = self.events.send(event);
        }
    }

    fn calendar_days(
        &self,
        listing_id: &str,
        listing_type: ListingType,
        start: NaiveDate,
        end: NaiveDate,
    ) -> BTreeMap<NaiveDate, DayAvailability> {
        let mut days = BTreeMap::new();

        for row in self.rows(tables::PROPERTY_AVAILABILITY) {
            if !same_listing(&row, listing_id, listing_type) {
                continue;
            }
            let Some(date) = row_date(&row, "date") else {
                continue;
            };
            if date < start || date > end {
                continue;
            }
            days.insert(
                date,
                DayAvailability {
                    date,
                    available: row.get("available").and_then(Value::as_bool),
                    blocked: false,
                    price_override: row.get("price_override").and_then(Value::as_f64),
                    minimum_stay_override: row
                        .get("minimum_stay_override")
                        .and_then(Value::as_u64)
                        .and_then(|n| u32::try_from(n).ok()),
                    block_reason: None,
                },
            );
        }

        for row in self.rows(tables::BLOCKED_DATES) {
            let Ok(range) = decode_row::<BlockedRange>(row) else {
                continue;
            };
            if range.property_id != listing_id || range.property_type != listing_type {
                continue;
            }
            let from = range.start_date.max(start);
            let to = range.end_date.min(end);
            for date in from.iter_days().take_while(|d| *d <= to) {
                let day = days
                    .entry(date)
                    .or_insert_with(|| DayAvailability::open(date));
                day.blocked = true;
                day.block_reason = serde_json::to_value(range.reason)
                    .ok()
                    .and_then(|reason| reason.as_str().map(str::to_string));
            }
        }

        days
    }
}

fn same_listing(row: &Value, listing_id: &str, listing_type: ListingType) -> bool {
    row.get("property_id").and_then(Value::as_str) == Some(listing_id)
        && row.get("property_type").and_then(Value::as_str) == Some(listing_type.as_str())
}

fn row_date(row: &Value, column: &str) -> Option<NaiveDate> {
    row.get(column)
        .and_then(Value::as_str)
        .and_then(|s| s.parse().ok())
}

fn fill_generated(object: &mut Map<String, Value>) {
    object
        .entry("id")
        .or_insert_with(|| Value::String(format!("{:016x}", rand::random::<u64>())));
    object
        .entry("created_at")
        .or_insert_with(|| Value::String(timestamp(Utc::now())));
}

fn same_key(a: &Value, b: &Value, columns: &[String]) -> bool {
    !columns.is_empty()
        && columns.iter().all(|column| {
            compare_values(
                a.get(column).unwrap_or(&Value::Null),
                b.get(column).unwrap_or(&Value::Null),
            ) == Ordering::Equal
        })
}

fn merge(target: &mut Value, patch: &Value) {
    if let (Value::Object(target), Value::Object(patch)) = (target, patch) {
        for (key, value) in patch {
            target.insert(key.clone(), value.clone());
        }
    }
}

#[async_trait]
impl Backend for InMemoryBackend {
    async fn get_calendar(
        &self,
        listing_id: &str,
        listing_type: ListingType,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<DayAvailability>, ApiError> {
        self.take_failure(Operation::Calendar)?;
        Ok(self
            .calendar_days(listing_id, listing_type, start, end)
            .into_values()
            .collect())
    }

    async fn check_availability(
        &self,
        listing_id: &str,
        listing_type: ListingType,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<bool, ApiError> {
        self.take_failure(Operation::CheckAvailability)?;
        if end <= start {
            return Ok(false);
        }

        let last_night = end.pred_opt().unwrap_or(start);
        let days = self.calendar_days(listing_id, listing_type, start, last_night);
        if days.values().any(|day| !day.is_available() || day.blocked) {
            return Ok(false);
        }

        let overlapping = self
            .rows(tables::BOOKINGS)
            .into_iter()
            .filter_map(|row| decode_row::<Booking>(row).ok())
            .any(|booking| {
                booking.property_id == listing_id
                    && booking.status != BookingStatus::Cancelled
                    && booking.check_in_date < end
                    && booking.check_out_date > start
            });
        Ok(!overlapping)
    }

    async fn select(&self, table: &str, query: &Query) -> Result<Vec<Value>, ApiError> {
        self.take_failure(Operation::Select)?;
        Ok(query.apply(self.rows(table)))
    }

    async fn insert(&self, table: &str, row: Value) -> Result<Value, ApiError> {
        self.take_failure(Operation::Insert)?;
        let Value::Object(mut object) = row else {
            return Err(ApiError::DecodeError(format!("{table} row must be an object")));
        };
        fill_generated(&mut object);
        let row = Value::Object(object);

        let unique = self.unique_columns(table);
        {
            let mut stored = self.tables.entry(table.to_string()).or_default();
            if stored.iter().any(|existing| same_key(existing, &row, &unique)) {
                return Err(ApiError::UniqueViolation(format!(
                    "{table} ({})",
                    unique.join(", ")
                )));
            }
            stored.push(row.clone());
        }

        debug!(table, "row inserted");
        self.notify(table, &row, true);
        Ok(row)
    }

    async fn upsert(
        &self,
        table: &str,
        rows: Vec<Value>,
        on_conflict: &str,
    ) -> Result<(), ApiError> {
        self.take_failure(Operation::Upsert)?;
        let columns: Vec<String> = on_conflict
            .split(',')
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .collect();

        let mut stored = self.tables.entry(table.to_string()).or_default();
        for row in rows {
            match stored.iter_mut().find(|existing| same_key(existing, &row, &columns)) {
                Some(existing) => merge(existing, &row),
                None => {
                    let Value::Object(mut object) = row else {
                        return Err(ApiError::DecodeError(format!(
                            "{table} row must be an object"
                        )));
                    };
                    fill_generated(&mut object);
                    stored.push(Value::Object(object));
                }
            }
        }
        debug!(table, "rows upserted");
        Ok(())
    }

    async fn update(&self, table: &str, query: &Query, patch: Value) -> Result<usize, ApiError> {
        self.take_failure(Operation::Update)?;
        let mut touched = Vec::new();
        if let Some(mut stored) = self.tables.get_mut(table) {
            for row in stored.iter_mut().filter(|row| query.matches(row)) {
                merge(row, &patch);
                if let Value::Object(object) = row {
                    object.insert(
                        "updated_at".to_string(),
                        Value::String(timestamp(Utc::now())),
                    );
                }
                touched.push(row.clone());
            }
        }

        for row in &touched {
            self.notify(table, row, false);
        }
        Ok(touched.len())
    }

    async fn delete(&self, table: &str, query: &Query) -> Result<usize, ApiError> {
        self.take_failure(Operation::Delete)?;
        let Some(mut stored) = self.tables.get_mut(table) else {
            return Ok(0);
        };
        let before = stored.len();
        stored.retain(|row| !query.matches(row));
        Ok(before - stored.len())
    }

    fn subscribe_messages(&self) -> MessageStream {
        broadcast_stream(self.events.subscribe())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use serde_json::json;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn backend_with_calendar() -> InMemoryBackend {
        let backend = InMemoryBackend::new();
        backend.seed(
            tables::PROPERTY_AVAILABILITY,
            vec![
                json!({"property_id": "h1", "property_type": "hotel", "date": "2024-06-20",
                       "available": false}),
                json!({"property_id": "h1", "property_type": "hotel", "date": "2024-06-22",
                       "available": true, "price_override": 180.0}),
                json!({"property_id": "a1", "property_type": "apartment", "date": "2024-06-20",
                       "available": false}),
            ],
        );
        backend.seed(
            tables::BLOCKED_DATES,
            vec![json!({"property_id": "h1", "property_type": "hotel",
                        "start_date": "2024-06-25", "end_date": "2024-06-26",
                        "reason": "maintenance", "notes": ""})],
        );
        backend
    }

    #[tokio::test]
    async fn test_calendar_merges_overrides_and_blocks() {
        let backend = backend_with_calendar();
        let days = backend
            .get_calendar("h1", ListingType::Hotel, day(2024, 6, 1), day(2024, 6, 30))
            .await
            .unwrap();

        let dates: Vec<NaiveDate> = days.iter().map(|d| d.date).collect();
        assert_eq!(
            dates,
            vec![day(2024, 6, 20), day(2024, 6, 22), day(2024, 6, 25), day(2024, 6, 26)]
        );
        assert_eq!(days[0].available, Some(false));
        assert_eq!(days[1].price_override, Some(180.0));
        assert!(days[2].blocked);
        assert_eq!(days[2].block_reason.as_deref(), Some("maintenance"));
    }

    #[tokio::test]
    async fn test_check_availability_considers_nights_only() {
        let backend = backend_with_calendar();

        // 06-20 is unavailable, but as a check-out day it is not a night of the stay
        assert!(backend
            .check_availability("h1", ListingType::Hotel, day(2024, 6, 17), day(2024, 6, 20))
            .await
            .unwrap());
        assert!(!backend
            .check_availability("h1", ListingType::Hotel, day(2024, 6, 17), day(2024, 6, 21))
            .await
            .unwrap());
        assert!(!backend
            .check_availability("h1", ListingType::Hotel, day(2024, 6, 24), day(2024, 6, 27))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_check_availability_sees_active_bookings() {
        let backend = InMemoryBackend::new();
        backend.seed(
            tables::BOOKINGS,
            vec![
                json!({"property_id": "h1", "guest_id": "p1",
                       "check_in_date": "2024-07-01", "check_out_date": "2024-07-05",
                       "total_price": 400.0, "status": "confirmed"}),
                json!({"property_id": "h1", "guest_id": "p2",
                       "check_in_date": "2024-07-10", "check_out_date": "2024-07-12",
                       "total_price": 200.0, "status": "cancelled"}),
            ],
        );

        assert!(!backend
            .check_availability("h1", ListingType::Hotel, day(2024, 7, 4), day(2024, 7, 6))
            .await
            .unwrap());
        assert!(backend
            .check_availability("h1", ListingType::Hotel, day(2024, 7, 5), day(2024, 7, 7))
            .await
            .unwrap());
        assert!(backend
            .check_availability("h1", ListingType::Hotel, day(2024, 7, 10), day(2024, 7, 12))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_insert_enforces_unique_keys() {
        let backend = InMemoryBackend::new();
        let review = json!({"property_id": "h1", "reviewer_id": "p1", "rating": 5});

        backend.insert(tables::REVIEWS, review.clone()).await.unwrap();
        let err = backend.insert(tables::REVIEWS, review).await.unwrap_err();
        assert!(matches!(err, ApiError::UniqueViolation(_)));
    }

    #[tokio::test]
    async fn test_upsert_merges_on_conflict_columns() {
        let backend = backend_with_calendar();
        backend
            .upsert(
                tables::PROPERTY_AVAILABILITY,
                vec![
                    json!({"property_id": "h1", "property_type": "hotel", "date": "2024-06-22",
                           "available": false, "notes": "Booked"}),
                    json!({"property_id": "h1", "property_type": "hotel", "date": "2024-06-23",
                           "available": false, "notes": "Booked"}),
                ],
                "property_id,property_type,date",
            )
            .await
            .unwrap();

        let rows = backend.rows(tables::PROPERTY_AVAILABILITY);
        assert_eq!(rows.len(), 4);
        let merged = rows.iter().find(|r| r["date"] == "2024-06-22").unwrap();
        assert_eq!(merged["available"], false);
        assert_eq!(merged["price_override"], 180.0);
    }

    #[tokio::test]
    async fn test_injected_failures_are_consumed() {
        let backend = InMemoryBackend::new();
        backend.fail_next(Operation::Select, 1);

        assert!(backend.select(tables::HOTELS, &Query::new()).await.is_err());
        assert!(backend.select(tables::HOTELS, &Query::new()).await.is_ok());
    }

    #[tokio::test]
    async fn test_message_writes_are_published() {
        let backend = InMemoryBackend::new();
        let mut events = backend.subscribe_messages();

        let row = backend
            .insert(
                tables::MESSAGES,
                json!({"conversation_id": "c1", "sender_id": "p1", "content": "Hi"}),
            )
            .await
            .unwrap();
        let id = row["id"].as_str().unwrap().to_string();
        backend
            .update(tables::MESSAGES, &Query::new().eq("id", id.as_str()), json!({"read": true}))
            .await
            .unwrap();

        match events.next().await.unwrap() {
            MessageEvent::Inserted(message) => assert_eq!(message.content, "Hi"),
            other => panic!("unexpected event {other:?}"),
        }
        match events.next().await.unwrap() {
            MessageEvent::Updated(message) => {
                assert_eq!(message.id, id);
                assert!(message.read);
                assert!(message.updated_at.is_some());
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_find_listing_tags_the_table_it_came_from() {
        let backend = InMemoryBackend::new();
        backend.seed(
            tables::HOTELS,
            vec![json!({"id": "h1", "name": "Harbour Hotel", "location": "Lisbon",
                        "price_per_night": 150.0, "minimum_stay": 2, "host_id": "host"})],
        );
        backend.seed(
            tables::RESTAURANTS,
            vec![json!({"id": "r1", "name": "Tasca", "location": "Porto",
                        "cuisine_type": "portuguese"})],
        );

        let hotel = backend.find_listing("h1").await.unwrap().unwrap();
        assert_eq!(hotel.listing_type, ListingType::Hotel);
        assert_eq!(hotel.price_per_night, 150.0);
        assert_eq!(hotel.minimum_stay, Some(2));

        let restaurant = backend.find_listing("r1").await.unwrap().unwrap();
        assert_eq!(restaurant.listing_type, ListingType::Restaurant);
        assert_eq!(restaurant.price_per_night, 0.0);

        assert_eq!(backend.find_listing("missing").await.unwrap(), None);
    }
}

// PostgREST-style HTTP backend.
//
// Tables live under `{base_url}/rest/v1/{table}` and functions under
// `{base_url}/rest/v1/rpc/{name}`. The real-time socket is owned by the
// embedding app; it publishes decoded change events through `realtime_sender`.

use crate::backend::{
    broadcast_stream, decode_rows, ApiError, Backend, ClientError, MessageEvent, MessageStream,
    AVAILABILITY_RPC, CALENDAR_RPC, UNIQUE_VIOLATION,
};
use crate::calendar::DayAvailability;
use crate::config::ClientConfig;
use crate::model::ListingType;
use crate::query::Query;
use async_trait::async_trait;
use chrono::NaiveDate;
use parking_lot::RwLock;
use reqwest::{Method, RequestBuilder, Response};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tracing::{debug, error};

// Error body returned by PostgREST
#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

pub struct RestBackend {
    http: reqwest::Client,
    config: ClientConfig,
    access_token: RwLock<Option<String>>,
    events: broadcast::Sender<MessageEvent>,
}

impl RestBackend {
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        config.validate()?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| ClientError::InitError(e.to_string()))?;
        let (events, _) = broadcast::channel(config.realtime_buffer);

        Ok(Self {
            http,
            config,
            access_token: RwLock::new(None),
            events,
        })
    }

    // Signed-in requests carry the user's JWT; anonymous ones fall back to the API key
    pub fn set_access_token(&self, token: Option<String>) {
        *self.access_token.write() = token;
    }

    pub fn realtime_sender(&self) -> broadcast::Sender<MessageEvent> {
        self.events.clone()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/{}", self.config.rest_url(), table)
    }

    fn rpc_url(&self, function: &str) -> String {
        format!("{}/rpc/{}", self.config.rest_url(), function)
    }

    fn request(&self, method: Method, url: String) -> RequestBuilder {
        let bearer = self
            .access_token
            .read()
            .clone()
            .unwrap_or_else(|| self.config.api_key.clone());
        self.http
            .request(method, url)
            .header("apikey", self.config.api_key.as_str())
            .bearer_auth(bearer)
    }

    async fn send(&self, operation: &str, builder: RequestBuilder) -> Result<Response, ApiError> {
        let started = Instant::now();
        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                ApiError::Timeout(self.config.timeout_ms)
            } else {
                ApiError::NetworkError(e.to_string())
            }
        })?;

        let status = response.status();
        debug!(
            operation,
            status = status.as_u16(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "backend call finished"
        );
        if status.is_success() {
            return Ok(response);
        }

        let body: ErrorBody = response.json().await.unwrap_or_default();
        let message = body.message.unwrap_or_else(|| status.to_string());
        error!(
            operation,
            status = status.as_u16(),
            code = ?body.code,
            %message,
            "backend call failed"
        );
        if body.code.as_deref() == Some(UNIQUE_VIOLATION) {
            return Err(ApiError::UniqueViolation(message));
        }
        Err(ApiError::ApiResponseError {
            status_code: status.as_u16(),
            code: body.code,
            message,
        })
    }

    async fn rows(&self, operation: &str, builder: RequestBuilder) -> Result<Vec<Value>, ApiError> {
        let response = self.send(operation, builder).await?;
        response
            .json::<Vec<Value>>()
            .await
            .map_err(|e| ApiError::DecodeError(e.to_string()))
    }

    async fn rpc(&self, function: &str, args: Value) -> Result<Value, ApiError> {
        let response = self
            .send(function, self.request(Method::POST, self.rpc_url(function)).json(&args))
            .await?;
        response
            .json::<Value>()
            .await
            .map_err(|e| ApiError::DecodeError(e.to_string()))
    }
}

fn calendar_args(
    listing_id: &str,
    listing_type: ListingType,
    start: NaiveDate,
    end: NaiveDate,
) -> Value {
    json!({
        "p_property_id": listing_id,
        "p_property_type": listing_type,
        "p_start_date": start.to_string(),
        "p_end_date": end.to_string(),
    })
}

// Filter parameters without `select`, for writes
fn filter_params(query: &Query) -> Vec<(String, String)> {
    query
        .to_params()
        .into_iter()
        .filter(|(key, _)| key != "select")
        .collect()
}

#[async_trait]
impl Backend for RestBackend {
    async fn get_calendar(
        &self,
        listing_id: &str,
        listing_type: ListingType,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<DayAvailability>, ApiError> {
        let value = self
            .rpc(CALENDAR_RPC, calendar_args(listing_id, listing_type, start, end))
            .await?;
        match value {
            Value::Null => Ok(Vec::new()),
            Value::Array(rows) => decode_rows(rows),
            other => Err(ApiError::DecodeError(format!(
                "{CALENDAR_RPC} returned {other}"
            ))),
        }
    }

    async fn check_availability(
        &self,
        listing_id: &str,
        listing_type: ListingType,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<bool, ApiError> {
        let value = self
            .rpc(AVAILABILITY_RPC, calendar_args(listing_id, listing_type, start, end))
            .await?;
        value.as_bool().ok_or_else(|| {
            ApiError::DecodeError(format!("{AVAILABILITY_RPC} returned {value}"))
        })
    }

    async fn select(&self, table: &str, query: &Query) -> Result<Vec<Value>, ApiError> {
        let builder = self
            .request(Method::GET, self.table_url(table))
            .query(&query.to_params());
        self.rows(table, builder).await
    }

    async fn insert(&self, table: &str, row: Value) -> Result<Value, ApiError> {
        let builder = self
            .request(Method::POST, self.table_url(table))
            .header("Prefer", "return=representation")
            .json(&row);
        self.rows(table, builder)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| ApiError::DecodeError(format!("insert into {table} returned no row")))
    }

    async fn upsert(
        &self,
        table: &str,
        rows: Vec<Value>,
        on_conflict: &str,
    ) -> Result<(), ApiError> {
        let builder = self
            .request(Method::POST, self.table_url(table))
            .query(&[("on_conflict", on_conflict)])
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .json(&rows);
        self.send(table, builder).await?;
        Ok(())
    }

    async fn update(&self, table: &str, query: &Query, patch: Value) -> Result<usize, ApiError> {
        let builder = self
            .request(Method::PATCH, self.table_url(table))
            .query(&filter_params(query))
            .header("Prefer", "return=representation")
            .json(&patch);
        Ok(self.rows(table, builder).await?.len())
    }

    async fn delete(&self, table: &str, query: &Query) -> Result<usize, ApiError> {
        let builder = self
            .request(Method::DELETE, self.table_url(table))
            .query(&filter_params(query))
            .header("Prefer", "return=representation");
        Ok(self.rows(table, builder).await?.len())
    }

    fn subscribe_messages(&self) -> MessageStream {
        broadcast_stream(self.events.subscribe())
    }
}

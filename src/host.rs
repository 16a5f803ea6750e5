// Host-side tools: listings owned by the signed-in host, blocked date ranges,
// single-day availability toggles and booking status management.

use crate::backend::{decode_row, decode_rows, ApiError, Backend};
use crate::model::{
    tables, AvailabilityOverride, BlockReason, BlockedRange, Booking, BookingStatus, Listing,
    ListingRecord, ListingSummary, ListingType, NewListing, Profile,
};
use crate::query::Query;
use crate::session::{ServiceError, Session};
use chrono::NaiveDate;
use futures::future::try_join_all;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{error, info};

#[derive(Debug, Deserialize)]
struct IdName {
    id: String,
    name: String,
}

// Every listing the host owns, hotels first, then apartments, then restaurants
pub(crate) async fn listings_of(
    backend: &dyn Backend,
    host_id: &str,
) -> Result<Vec<ListingSummary>, ApiError> {
    let fetches = ListingType::ALL.into_iter().map(|listing_type| async move {
        let rows = backend
            .select(
                listing_type.table(),
                &Query::new().select("id,name").eq("host_id", host_id),
            )
            .await?;
        let rows: Vec<IdName> = decode_rows(rows)?;
        Ok::<_, ApiError>(
            rows.into_iter()
                .map(|row| ListingSummary {
                    id: row.id,
                    name: row.name,
                    listing_type,
                })
                .collect::<Vec<_>>(),
        )
    });
    Ok(try_join_all(fetches).await?.into_iter().flatten().collect())
}

pub struct HostService {
    backend: Arc<dyn Backend>,
    session: Arc<Session>,
}

impl HostService {
    pub fn new(backend: Arc<dyn Backend>, session: Arc<Session>) -> Self {
        Self { backend, session }
    }

    async fn host(&self) -> Result<Profile, ServiceError> {
        self.session
            .require_profile(self.backend.as_ref(), "manage your listings")
            .await
    }

    pub async fn host_listings(&self) -> Result<Vec<ListingSummary>, ServiceError> {
        let host = self.host().await?;
        listings_of(self.backend.as_ref(), &host.id)
            .await
            .map_err(|e| log_failure("host listings", e))
    }

    // The listing, if the signed-in host owns it
    pub async fn owned_listing(&self, listing_id: &str) -> Result<ListingSummary, ServiceError> {
        self.host_listings()
            .await?
            .into_iter()
            .find(|listing| listing.id == listing_id)
            .ok_or_else(|| {
                ServiceError::Validation(
                    "Property not found or you do not have permission to manage it".to_string(),
                )
            })
    }

    // Insert a listing into its type's table, owned by the signed-in host
    pub async fn create_listing(
        &self,
        listing_type: ListingType,
        listing: NewListing,
    ) -> Result<Listing, ServiceError> {
        let host = self.host().await?;

        let listing = NewListing {
            name: listing.name.trim().to_string(),
            location: listing.location.trim().to_string(),
            ..listing
        };
        if listing.name.is_empty() {
            return Err(ServiceError::Validation("Name is required".to_string()));
        }
        if listing.location.is_empty() {
            return Err(ServiceError::Validation("Location is required".to_string()));
        }
        if !listing.price_per_night.is_finite() || listing.price_per_night < 0.0 {
            return Err(ServiceError::Validation(
                "Price per night must be zero or more".to_string(),
            ));
        }

        let mut row = serde_json::to_value(&listing).map_err(ApiError::from)?;
        row["host_id"] = json!(host.id);
        let row = self
            .backend
            .insert(listing_type.table(), row)
            .await
            .map_err(|e| log_failure("create listing", e))?;
        let record: ListingRecord = decode_row(row)?;
        info!(listing_id = %record.id, %listing_type, host_id = %host.id, "listing created");
        Ok(record.into_listing(listing_type))
    }

    pub async fn blocked_ranges(
        &self,
        listing_id: &str,
        listing_type: ListingType,
    ) -> Result<Vec<BlockedRange>, ServiceError> {
        let rows = self
            .backend
            .select(
                tables::BLOCKED_DATES,
                &Query::new()
                    .eq("property_id", listing_id)
                    .eq("property_type", listing_type.as_str())
                    .order("start_date", true),
            )
            .await
            .map_err(|e| log_failure("blocked ranges", e))?;
        Ok(decode_rows(rows)?)
    }

    pub async fn block_dates(
        &self,
        listing_id: &str,
        listing_type: ListingType,
        start: NaiveDate,
        end: NaiveDate,
        reason: BlockReason,
        notes: &str,
    ) -> Result<BlockedRange, ServiceError> {
        if end < start {
            return Err(ServiceError::Validation(
                "End date must be on or after the start date".to_string(),
            ));
        }
        self.owned_listing(listing_id).await?;

        let row = self
            .backend
            .insert(
                tables::BLOCKED_DATES,
                json!({
                    "property_id": listing_id,
                    "property_type": listing_type,
                    "start_date": start,
                    "end_date": end,
                    "reason": reason,
                    "notes": notes.trim(),
                }),
            )
            .await
            .map_err(|e| log_failure("block dates", e))?;
        let range: BlockedRange = decode_row(row)?;
        info!(listing_id, block_id = %range.id, %start, %end, "dates blocked");
        Ok(range)
    }

    pub async fn unblock(&self, block_id: &str) -> Result<(), ServiceError> {
        let rows = self
            .backend
            .select(tables::BLOCKED_DATES, &Query::new().eq("id", block_id).limit(1))
            .await
            .map_err(|e| log_failure("unblock", e))?;
        let Some(row) = rows.into_iter().next() else {
            return Err(ApiError::NotFound(format!("blocked range {block_id}")).into());
        };
        let range: BlockedRange = decode_row(row)?;
        self.owned_listing(&range.property_id).await?;

        let removed = self
            .backend
            .delete(tables::BLOCKED_DATES, &Query::new().eq("id", block_id))
            .await
            .map_err(|e| log_failure("unblock", e))?;
        if removed == 0 {
            return Err(ApiError::NotFound(format!("blocked range {block_id}")).into());
        }
        info!(block_id, "blocked range removed");
        Ok(())
    }

    // Open days carry no override row; closed days get `available = false`
    pub async fn set_day_availability(
        &self,
        listing_id: &str,
        listing_type: ListingType,
        date: NaiveDate,
        available: bool,
    ) -> Result<(), ServiceError> {
        self.owned_listing(listing_id).await?;
        let result = if available {
            self.backend
                .delete_availability(listing_id, listing_type, date)
                .await
                .map(|_| ())
        } else {
            self.backend
                .upsert_availability(&[AvailabilityOverride {
                    property_id: listing_id.to_string(),
                    property_type: listing_type,
                    date,
                    available: false,
                    notes: None,
                }])
                .await
        };
        result.map_err(|e| log_failure("set day availability", e))?;
        info!(listing_id, %date, available, "day availability changed");
        Ok(())
    }

    // Bookings across all of the host's listings, newest first
    pub async fn bookings(
        &self,
        status: Option<BookingStatus>,
    ) -> Result<Vec<Booking>, ServiceError> {
        let ids: Vec<String> = self
            .host_listings()
            .await?
            .into_iter()
            .map(|listing| listing.id)
            .collect();
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut query = Query::new()
            .in_list("property_id", ids)
            .order("created_at", false);
        if let Some(status) = status {
            query = query.eq("status", status.as_str());
        }
        let rows = self
            .backend
            .select(tables::BOOKINGS, &query)
            .await
            .map_err(|e| log_failure("host bookings", e))?;
        Ok(decode_rows(rows)?)
    }

    pub async fn update_booking_status(
        &self,
        booking_id: &str,
        next: BookingStatus,
    ) -> Result<Booking, ServiceError> {
        let Some(mut booking) = self
            .bookings(None)
            .await?
            .into_iter()
            .find(|booking| booking.id == booking_id)
        else {
            return Err(ApiError::NotFound(format!("booking {booking_id}")).into());
        };

        if !booking.status.can_transition_to(next) {
            return Err(ServiceError::InvalidTransition {
                from: booking.status,
                to: next,
            });
        }
        self.backend
            .update_booking_status(booking_id, next)
            .await
            .map_err(|e| log_failure("update booking status", e))?;

        info!(booking_id, from = %booking.status, to = %next, "booking status changed");
        booking.status = next;
        Ok(booking)
    }
}

fn log_failure(step: &str, e: ApiError) -> ServiceError {
    error!(step, error = %e, "host call failed");
    ServiceError::Backend(e)
}

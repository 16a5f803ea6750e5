// Booking submission: validation, the backend write sequence, and the
// date-picker widget state that feeds it.

use crate::backend::{ApiError, Backend};
use crate::calendar::{AvailabilityFeed, ClickOutcome, DateSelection, SelectionEngine};
use crate::model::{AvailabilityOverride, BookingStatus, Listing, NewBooking};
use crate::pricing::PriceQuote;
use crate::session::Session;
use chrono::NaiveDate;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, warn};

pub const DEFAULT_MAX_GUESTS: u32 = 10;

// Notes written on the override rows of booked nights
pub const BOOKED_NOTE: &str = "Booked";

#[derive(Error, Debug)]
pub enum BookingError {
    #[error("Please sign in to book")]
    NotSignedIn,

    #[error("Please select check-in and check-out dates")]
    MissingDates,

    #[error("Check-out must be after check-in")]
    EmptyStay,

    #[error("Guests must be between 1 and {max}")]
    GuestCount { max: u32 },

    #[error("Minimum stay is {minimum} nights")]
    MinimumStay { minimum: u32 },

    #[error("Selected dates are not available")]
    Unavailable,

    #[error("Profile not found")]
    ProfileNotFound,

    #[error("Backend error: {0}")]
    Backend(#[from] ApiError),

    // The booking row was written and then cancelled because the nights could not be blocked
    #[error("Booking {booking_id} was cancelled after blocking its dates failed: {source}")]
    PartialFailure { booking_id: String, source: ApiError },

    // Blocking failed and so did the cancellation; the booking row needs manual cleanup
    #[error(
        "Booking {booking_id} could not be cancelled after blocking its dates failed: {source}"
    )]
    Orphaned { booking_id: String, source: ApiError },
}

impl BookingError {
    // Text shown next to the booking button
    pub fn user_message(&self) -> String {
        match self {
            BookingError::Backend(_)
            | BookingError::PartialFailure { .. }
            | BookingError::Orphaned { .. } => {
                "Failed to create booking. Please try again.".to_string()
            }
            other => other.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BookingRequest {
    pub listing: Listing,
    pub selection: DateSelection,
    pub guests: u32,
}

// Local checks, in the order the user sees them
pub fn validate(request: &BookingRequest) -> Result<PriceQuote, BookingError> {
    if !request.selection.is_complete() {
        return Err(BookingError::MissingDates);
    }
    let nights = request.selection.nights();
    if nights == 0 {
        return Err(BookingError::EmptyStay);
    }

    let max = request.listing.max_guests.unwrap_or(DEFAULT_MAX_GUESTS);
    if request.guests < 1 || request.guests > max {
        return Err(BookingError::GuestCount { max });
    }

    if let Some(minimum) = request.listing.minimum_stay {
        if nights < minimum {
            return Err(BookingError::MinimumStay { minimum });
        }
    }

    Ok(PriceQuote::new(nights, request.listing.price_per_night))
}

#[derive(Debug, Clone, PartialEq)]
pub struct BookingConfirmation {
    pub booking_id: String,
    pub check_in: NaiveDate,
    pub check_out: NaiveDate,
    pub quote: PriceQuote,
}

pub struct BookingService {
    backend: Arc<dyn Backend>,
    session: Arc<Session>,
}

impl BookingService {
    pub fn new(backend: Arc<dyn Backend>, session: Arc<Session>) -> Self {
        Self { backend, session }
    }

    pub async fn submit(
        &self,
        request: &BookingRequest,
    ) -> Result<BookingConfirmation, BookingError> {
        if !self.session.is_signed_in() {
            return Err(BookingError::NotSignedIn);
        }
        let quote = validate(request)?;
        let (Some(check_in), Some(check_out)) =
            (request.selection.check_in(), request.selection.check_out())
        else {
            return Err(BookingError::MissingDates);
        };
        let listing = &request.listing;

        let available = self
            .backend
            .check_availability(&listing.id, listing.listing_type, check_in, check_out)
            .await
            .map_err(|e| log_failure(&listing.id, "availability check", e))?;
        if !available {
            info!(listing_id = %listing.id, %check_in, %check_out, "requested dates unavailable");
            return Err(BookingError::Unavailable);
        }

        let profile = self
            .session
            .profile(self.backend.as_ref())
            .await
            .map_err(|e| log_failure(&listing.id, "profile lookup", e))?
            .ok_or(BookingError::ProfileNotFound)?;

        let booking_id = self
            .backend
            .create_booking(&NewBooking {
                property_id: listing.id.clone(),
                guest_id: profile.id.clone(),
                check_in_date: check_in,
                check_out_date: check_out,
                total_price: quote.final_total,
                status: BookingStatus::Pending,
            })
            .await
            .map_err(|e| log_failure(&listing.id, "booking insert", e))?;

        let blocks: Vec<AvailabilityOverride> = request
            .selection
            .stay_nights()
            .into_iter()
            .map(|date| AvailabilityOverride {
                property_id: listing.id.clone(),
                property_type: listing.listing_type,
                date,
                available: false,
                notes: Some(BOOKED_NOTE.to_string()),
            })
            .collect();

        if let Err(block_error) = self.backend.upsert_availability(&blocks).await {
            error!(
                listing_id = %listing.id,
                booking_id = %booking_id,
                error = %block_error,
                "blocking booked nights failed, cancelling booking"
            );
            return Err(self.compensate(booking_id, block_error).await);
        }

        info!(
            listing_id = %listing.id,
            booking_id = %booking_id,
            nights = quote.nights,
            total = quote.final_total,
            "booking created"
        );
        Ok(BookingConfirmation {
            booking_id,
            check_in,
            check_out,
            quote,
        })
    }

    async fn compensate(&self, booking_id: String, block_error: ApiError) -> BookingError {
        match self
            .backend
            .update_booking_status(&booking_id, BookingStatus::Cancelled)
            .await
        {
            Ok(()) => {
                warn!(booking_id = %booking_id, "booking cancelled after partial failure");
                BookingError::PartialFailure {
                    booking_id,
                    source: block_error,
                }
            }
            Err(cancel_error) => {
                error!(
                    booking_id = %booking_id,
                    block_error = %block_error,
                    cancel_error = %cancel_error,
                    "booking left pending with unblocked dates"
                );
                BookingError::Orphaned {
                    booking_id,
                    source: cancel_error,
                }
            }
        }
    }
}

fn log_failure(listing_id: &str, step: &str, e: ApiError) -> BookingError {
    error!(listing_id, step, error = %e, "booking step failed");
    BookingError::Backend(e)
}

// Date-picker and guest count of the booking panel on a listing page
#[derive(Debug, Clone)]
pub struct BookingWidget {
    listing: Listing,
    engine: SelectionEngine,
    guests: u32,
    error: Option<String>,
}

impl BookingWidget {
    pub fn new(listing: Listing) -> Self {
        Self {
            listing,
            engine: SelectionEngine::new(),
            guests: 1,
            error: None,
        }
    }

    pub fn listing(&self) -> &Listing {
        &self.listing
    }

    pub fn selection(&self) -> DateSelection {
        self.engine.selection()
    }

    pub fn guests(&self) -> u32 {
        self.guests
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn click(
        &mut self,
        date: NaiveDate,
        feed: &AvailabilityFeed,
        today: NaiveDate,
    ) -> ClickOutcome {
        let outcome = self.engine.click(date, feed, today);
        debug!(listing_id = %self.listing.id, %date, ?outcome, "date clicked");
        outcome
    }

    // Clamped to 1..=max_guests
    pub fn set_guests(&mut self, guests: u32) {
        let max = self.listing.max_guests.unwrap_or(DEFAULT_MAX_GUESTS);
        self.guests = guests.clamp(1, max.max(1));
    }

    pub fn quote(&self) -> PriceQuote {
        PriceQuote::for_selection(&self.engine.selection(), self.listing.price_per_night)
    }

    pub fn request(&self) -> BookingRequest {
        BookingRequest {
            listing: self.listing.clone(),
            selection: self.engine.selection(),
            guests: self.guests,
        }
    }

    pub fn reset(&mut self) {
        self.engine.reset();
        self.guests = 1;
        self.error = None;
    }

    // On success the picker starts over; on failure the selection is kept and
    // the inline message is recorded.
    pub async fn submit(
        &mut self,
        service: &BookingService,
    ) -> Result<BookingConfirmation, BookingError> {
        self.error = None;
        match service.submit(&self.request()).await {
            Ok(confirmation) => {
                self.reset();
                Ok(confirmation)
            }
            Err(e) => {
                self.error = Some(e.user_message());
                Err(e)
            }
        }
    }
}

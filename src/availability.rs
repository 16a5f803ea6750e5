// Availability feed loading for the three-month calendar.
// Fetches are tagged with a request id; only the response to the most recent
// request is applied, so a slow reply for a month the user already left can
// never overwrite the feed for the month on screen.

use crate::backend::{ApiError, Backend};
use crate::calendar::{AvailabilityFeed, DayAvailability};
use crate::model::ListingType;
use chrono::{Datelike, Months, NaiveDate};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use tracing::{debug, error, warn};

// Months shown side by side
pub const MONTHS_SHOWN: u32 = 3;

// First day of the displayed month through the last day two months later
pub fn calendar_window(month: NaiveDate) -> (NaiveDate, NaiveDate) {
    let start = month.with_day(1).unwrap_or(month);
    let end = start
        .checked_add_months(Months::new(MONTHS_SHOWN))
        .and_then(|next| next.pred_opt())
        .unwrap_or(NaiveDate::MAX);
    (start, end)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeedTicket {
    pub request_id: u64,
    pub start: NaiveDate,
    pub end: NaiveDate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedUpdate {
    Applied { request_id: u64, days: usize },
    // A newer request was issued before this one completed
    Stale { request_id: u64, latest: u64 },
}

#[derive(Debug, Default)]
pub struct LoaderStats {
    pub applied: AtomicUsize,
    pub stale: AtomicUsize,
    pub failed: AtomicUsize,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LoaderStatsReport {
    pub applied: usize,
    pub stale: usize,
    pub failed: usize,
}

pub struct CalendarLoader {
    listing_id: String,
    listing_type: ListingType,
    month: Mutex<NaiveDate>,
    latest: AtomicU64,
    feed: Mutex<AvailabilityFeed>,
    stats: LoaderStats,
}

impl CalendarLoader {
    pub fn new(listing_id: &str, listing_type: ListingType, month: NaiveDate) -> Self {
        Self {
            listing_id: listing_id.to_string(),
            listing_type,
            month: Mutex::new(month.with_day(1).unwrap_or(month)),
            latest: AtomicU64::new(0),
            feed: Mutex::new(AvailabilityFeed::default()),
            stats: LoaderStats::default(),
        }
    }

    pub fn listing_id(&self) -> &str {
        &self.listing_id
    }

    pub fn listing_type(&self) -> ListingType {
        self.listing_type
    }

    pub fn month(&self) -> NaiveDate {
        *self.month.lock()
    }

    pub fn window(&self) -> (NaiveDate, NaiveDate) {
        calendar_window(self.month())
    }

    pub fn next_month(&self) -> NaiveDate {
        let mut month = self.month.lock();
        if let Some(next) = month.checked_add_months(Months::new(1)) {
            *month = next;
        }
        *month
    }

    pub fn previous_month(&self) -> NaiveDate {
        let mut month = self.month.lock();
        if let Some(previous) = month.checked_sub_months(Months::new(1)) {
            *month = previous;
        }
        *month
    }

    // Issue a new request id for the current window. Earlier tickets become stale.
    pub fn begin(&self) -> FeedTicket {
        let (start, end) = self.window();
        let request_id = self.latest.fetch_add(1, Ordering::SeqCst) + 1;
        FeedTicket {
            request_id,
            start,
            end,
        }
    }

    pub fn complete(&self, ticket: FeedTicket, records: Vec<DayAvailability>) -> FeedUpdate {
        let mut feed = self.feed.lock();
        // Checked under the feed lock so two completions cannot interleave
        let latest = self.latest.load(Ordering::SeqCst);
        if ticket.request_id != latest {
            self.stats.stale.fetch_add(1, Ordering::Relaxed);
            debug!(
                listing_id = %self.listing_id,
                request_id = ticket.request_id,
                latest,
                "discarding stale calendar response"
            );
            return FeedUpdate::Stale {
                request_id: ticket.request_id,
                latest,
            };
        }

        *feed = AvailabilityFeed::new(records);
        self.stats.applied.fetch_add(1, Ordering::Relaxed);
        FeedUpdate::Applied {
            request_id: ticket.request_id,
            days: feed.len(),
        }
    }

    // Fetch the current window. On failure the previous feed stays in place.
    pub async fn refresh(&self, backend: &dyn Backend) -> Result<FeedUpdate, ApiError> {
        let ticket = self.begin();
        let records = backend
            .get_calendar(&self.listing_id, self.listing_type, ticket.start, ticket.end)
            .await
            .map_err(|e| {
                self.stats.failed.fetch_add(1, Ordering::Relaxed);
                error!(
                    listing_id = %self.listing_id,
                    request_id = ticket.request_id,
                    error = %e,
                    "calendar fetch failed"
                );
                e
            })?;

        let update = self.complete(ticket, records);
        if let FeedUpdate::Stale { .. } = update {
            warn!(listing_id = %self.listing_id, "calendar refresh superseded");
        }
        Ok(update)
    }

    pub fn feed(&self) -> AvailabilityFeed {
        self.feed.lock().clone()
    }

    pub fn stats(&self) -> LoaderStatsReport {
        LoaderStatsReport {
            applied: self.stats.applied.load(Ordering::Relaxed),
            stale: self.stats.stale.load(Ordering::Relaxed),
            failed: self.stats.failed.load(Ordering::Relaxed),
        }
    }
}

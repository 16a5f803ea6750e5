// Host dashboard figures over a trailing time range.

use crate::backend::{decode_rows, ApiError, Backend};
use crate::host::listings_of;
use crate::model::{tables, timestamp, Booking, ListingSummary, Review};
use crate::query::Query;
use crate::review::average_rating;
use crate::session::{ServiceError, Session};
use chrono::{DateTime, Datelike, Duration, Months, NaiveDate, Utc};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, error};

// Months in the revenue chart, oldest first, ending with the current one
pub const REVENUE_MONTHS: u32 = 6;
pub const LIST_LIMIT: usize = 5;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TimeRange {
    Week,
    #[default]
    Month,
    Quarter,
    Year,
}

impl TimeRange {
    pub fn days(self) -> i64 {
        match self {
            TimeRange::Week => 7,
            TimeRange::Month => 30,
            TimeRange::Quarter => 90,
            TimeRange::Year => 365,
        }
    }

    pub fn start(self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - Duration::days(self.days())
    }
}

impl FromStr for TimeRange {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "7d" => Ok(TimeRange::Week),
            "30d" => Ok(TimeRange::Month),
            "90d" => Ok(TimeRange::Quarter),
            "1y" => Ok(TimeRange::Year),
            other => Err(format!("unknown time range: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MonthlyRevenue {
    // Short month name, e.g. "Jan"
    pub month: String,
    pub revenue: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ListingPerformance {
    pub listing_id: String,
    pub name: String,
    pub bookings: usize,
    pub revenue: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ListingRating {
    pub listing_id: String,
    pub name: String,
    pub rating: f64,
    pub reviews: usize,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AnalyticsReport {
    pub total_revenue: f64,
    pub total_bookings: usize,
    pub average_rating: f64,
    pub total_messages: usize,
    pub revenue_by_month: Vec<MonthlyRevenue>,
    pub bookings_by_listing: Vec<ListingPerformance>,
    pub ratings_by_listing: Vec<ListingRating>,
    pub upcoming_bookings: Vec<Booking>,
    pub recent_reviews: Vec<Review>,
}

fn month_start(at: DateTime<Utc>) -> NaiveDate {
    let date = at.date_naive();
    date.with_day(1).unwrap_or(date)
}

// Revenue per calendar month for the last REVENUE_MONTHS months, by booking creation time
pub fn revenue_by_month(bookings: &[Booking], now: DateTime<Utc>) -> Vec<MonthlyRevenue> {
    let current = month_start(now);
    (0..REVENUE_MONTHS)
        .rev()
        .filter_map(|back| current.checked_sub_months(Months::new(back)))
        .map(|start| {
            let revenue = bookings
                .iter()
                .filter(|b| month_start(b.created_at) == start)
                .map(|b| b.total_price)
                .sum();
            MonthlyRevenue {
                month: start.format("%b").to_string(),
                revenue,
            }
        })
        .collect()
}

// Totals and per-listing breakdowns from rows already limited to the time range
pub fn summarize(
    listings: &[ListingSummary],
    bookings: &[Booking],
    reviews: &[Review],
    total_messages: usize,
    now: DateTime<Utc>,
) -> AnalyticsReport {
    let bookings_by_listing = listings
        .iter()
        .map(|listing| {
            let own: Vec<&Booking> = bookings
                .iter()
                .filter(|b| b.property_id == listing.id)
                .collect();
            ListingPerformance {
                listing_id: listing.id.clone(),
                name: listing.name.clone(),
                bookings: own.len(),
                revenue: own.iter().map(|b| b.total_price).sum(),
            }
        })
        .collect();

    let ratings_by_listing = listings
        .iter()
        .map(|listing| {
            let own: Vec<Review> = reviews
                .iter()
                .filter(|r| r.property_id == listing.id)
                .cloned()
                .collect();
            ListingRating {
                listing_id: listing.id.clone(),
                name: listing.name.clone(),
                rating: average_rating(&own),
                reviews: own.len(),
            }
        })
        .collect();

    AnalyticsReport {
        total_revenue: bookings.iter().map(|b| b.total_price).sum(),
        total_bookings: bookings.len(),
        average_rating: average_rating(reviews),
        total_messages,
        revenue_by_month: revenue_by_month(bookings, now),
        bookings_by_listing,
        ratings_by_listing,
        upcoming_bookings: Vec::new(),
        recent_reviews: Vec::new(),
    }
}

pub struct AnalyticsService {
    backend: Arc<dyn Backend>,
    session: Arc<Session>,
}

impl AnalyticsService {
    pub fn new(backend: Arc<dyn Backend>, session: Arc<Session>) -> Self {
        Self { backend, session }
    }

    pub async fn report(
        &self,
        range: TimeRange,
        now: DateTime<Utc>,
    ) -> Result<AnalyticsReport, ServiceError> {
        let host = self
            .session
            .require_profile(self.backend.as_ref(), "view analytics")
            .await?;
        self.build(&host.id, range, now).await.map_err(|e| {
            error!(host_id = %host.id, error = %e, "analytics fetch failed");
            ServiceError::Backend(e)
        })
    }

    async fn build(
        &self,
        host_id: &str,
        range: TimeRange,
        now: DateTime<Utc>,
    ) -> Result<AnalyticsReport, ApiError> {
        let backend = self.backend.as_ref();
        let listings = listings_of(backend, host_id).await?;
        if listings.is_empty() {
            return Ok(AnalyticsReport::default());
        }
        let ids: Vec<String> = listings.iter().map(|l| l.id.clone()).collect();
        let from = timestamp(range.start(now));
        let to = timestamp(now);

        let in_range = |query: Query| {
            query
                .gte("created_at", from.as_str())
                .lte("created_at", to.as_str())
        };

        let bookings: Vec<Booking> = decode_rows(
            backend
                .select(
                    tables::BOOKINGS,
                    &in_range(Query::new().in_list("property_id", ids.clone())),
                )
                .await?,
        )?;
        let reviews: Vec<Review> = decode_rows(
            backend
                .select(
                    tables::REVIEWS,
                    &in_range(Query::new().in_list("property_id", ids.clone())),
                )
                .await?,
        )?;

        let conversations = backend
            .select(
                tables::CONVERSATIONS,
                &in_range(Query::new().select("id").eq("host_id", host_id)),
            )
            .await?;
        let conversation_ids: Vec<String> = conversations
            .iter()
            .filter_map(|row| row.get("id").and_then(|id| id.as_str()).map(str::to_string))
            .collect();
        let total_messages = if conversation_ids.is_empty() {
            0
        } else {
            backend
                .select(
                    tables::MESSAGES,
                    &Query::new().select("id").in_list("conversation_id", conversation_ids),
                )
                .await?
                .len()
        };

        let mut report = summarize(&listings, &bookings, &reviews, total_messages, now);

        report.upcoming_bookings = decode_rows(
            backend
                .select(
                    tables::BOOKINGS,
                    &Query::new()
                        .in_list("property_id", ids.clone())
                        .gte("check_in_date", now.date_naive().to_string())
                        .order("check_in_date", true)
                        .limit(LIST_LIMIT),
                )
                .await?,
        )?;
        report.recent_reviews = decode_rows(
            backend
                .select(
                    tables::REVIEWS,
                    &Query::new()
                        .in_list("property_id", ids)
                        .order("created_at", false)
                        .limit(LIST_LIMIT),
                )
                .await?,
        )?;

        debug!(
            host_id,
            bookings = report.total_bookings,
            revenue = report.total_revenue,
            "analytics report built"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryBackend;
    use crate::model::{BookingStatus, ListingType};
    use crate::session::AuthUser;
    use chrono::TimeZone;
    use serde_json::json;
    use test_case::test_case;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 15, 12, 0, 0).unwrap()
    }

    fn booking(id: &str, property_id: &str, price: f64, created: DateTime<Utc>) -> Booking {
        Booking {
            id: id.to_string(),
            property_id: property_id.to_string(),
            guest_id: "guest".to_string(),
            check_in_date: NaiveDate::from_ymd_opt(2024, 7, 1).unwrap(),
            check_out_date: NaiveDate::from_ymd_opt(2024, 7, 3).unwrap(),
            total_price: price,
            status: BookingStatus::Confirmed,
            created_at: created,
        }
    }

    #[test_case("7d", TimeRange::Week, 7)]
    #[test_case("30d", TimeRange::Month, 30)]
    #[test_case("90d", TimeRange::Quarter, 90)]
    #[test_case("1y", TimeRange::Year, 365)]
    fn test_time_ranges(raw: &str, range: TimeRange, days: i64) {
        assert_eq!(raw.parse::<TimeRange>(), Ok(range));
        assert_eq!(range.days(), days);
    }

    #[test]
    fn test_revenue_by_month_labels_and_sums() {
        let bookings = vec![
            booking("b1", "h1", 100.0, Utc.with_ymd_and_hms(2024, 6, 2, 0, 0, 0).unwrap()),
            booking("b2", "h1", 50.0, Utc.with_ymd_and_hms(2024, 6, 30, 23, 0, 0).unwrap()),
            booking("b3", "a1", 75.0, Utc.with_ymd_and_hms(2024, 2, 10, 0, 0, 0).unwrap()),
            booking("b4", "a1", 999.0, Utc.with_ymd_and_hms(2023, 12, 31, 0, 0, 0).unwrap()),
        ];

        let months = revenue_by_month(&bookings, now());
        let labels: Vec<&str> = months.iter().map(|m| m.month.as_str()).collect();
        assert_eq!(labels, vec!["Jan", "Feb", "Mar", "Apr", "May", "Jun"]);
        assert_eq!(months[1].revenue, 75.0);
        assert_eq!(months[5].revenue, 150.0);
        assert_eq!(months[0].revenue, 0.0);
    }

    #[test]
    fn test_summarize_per_listing() {
        let listings = vec![
            ListingSummary {
                id: "h1".to_string(),
                name: "Harbour".to_string(),
                listing_type: ListingType::Hotel,
            },
            ListingSummary {
                id: "a1".to_string(),
                name: "Loft".to_string(),
                listing_type: ListingType::Apartment,
            },
        ];
        let bookings = vec![
            booking("b1", "h1", 100.0, now()),
            booking("b2", "h1", 60.0, now()),
        ];
        let reviews: Vec<Review> = serde_json::from_value(json!([
            {"id": "r1", "property_id": "h1", "reviewer_id": "g1", "rating": 4,
             "created_at": "2024-06-10T00:00:00Z"},
            {"id": "r2", "property_id": "h1", "reviewer_id": "g2", "rating": 5,
             "created_at": "2024-06-11T00:00:00Z"}
        ]))
        .unwrap();

        let report = summarize(&listings, &bookings, &reviews, 3, now());
        assert_eq!(report.total_revenue, 160.0);
        assert_eq!(report.total_bookings, 2);
        assert_eq!(report.average_rating, 4.5);
        assert_eq!(report.total_messages, 3);
        assert_eq!(report.bookings_by_listing[0].bookings, 2);
        assert_eq!(report.bookings_by_listing[1].revenue, 0.0);
        assert_eq!(report.ratings_by_listing[1].rating, 0.0);
        assert_eq!(report.ratings_by_listing[0].reviews, 2);
    }

    fn service(backend: Arc<InMemoryBackend>) -> AnalyticsService {
        let session = Session::signed_in(AuthUser {
            id: "u-host".to_string(),
            email: None,
        });
        AnalyticsService::new(backend, Arc::new(session))
    }

    #[tokio::test]
    async fn test_host_without_listings_gets_empty_report() {
        let backend = InMemoryBackend::new();
        backend.seed(tables::PROFILES, vec![json!({"id": "host", "user_id": "u-host"})]);

        let report = service(Arc::new(backend))
            .report(TimeRange::default(), now())
            .await
            .unwrap();
        assert_eq!(report, AnalyticsReport::default());
    }

    #[tokio::test]
    async fn test_report_respects_time_range() {
        let backend = InMemoryBackend::new();
        backend.seed(tables::PROFILES, vec![json!({"id": "host", "user_id": "u-host"})]);
        backend.seed(
            tables::HOTELS,
            vec![json!({"id": "h1", "name": "Harbour", "host_id": "host"})],
        );
        backend.seed(
            tables::BOOKINGS,
            vec![
                json!({"id": "b1", "property_id": "h1", "guest_id": "g",
                       "check_in_date": "2024-06-20", "check_out_date": "2024-06-22",
                       "total_price": 200.0, "status": "confirmed",
                       "created_at": "2024-06-10T09:00:00Z"}),
                json!({"id": "b2", "property_id": "h1", "guest_id": "g",
                       "check_in_date": "2024-04-01", "check_out_date": "2024-04-03",
                       "total_price": 500.0, "status": "completed",
                       "created_at": "2024-03-01T09:00:00Z"}),
            ],
        );
        backend.seed(
            tables::REVIEWS,
            vec![json!({"id": "r1", "property_id": "h1", "reviewer_id": "g", "rating": 5,
                        "created_at": "2024-06-12T09:00:00Z"})],
        );
        backend.seed(
            tables::CONVERSATIONS,
            vec![json!({"id": "c1", "property_id": "h1", "guest_id": "g", "host_id": "host",
                        "created_at": "2024-06-01T09:00:00Z"})],
        );
        backend.seed(
            tables::MESSAGES,
            vec![
                json!({"conversation_id": "c1", "sender_id": "g", "content": "Hi"}),
                json!({"conversation_id": "c1", "sender_id": "host", "content": "Hello"}),
            ],
        );

        let report = service(Arc::new(backend))
            .report(TimeRange::Month, now())
            .await
            .unwrap();
        assert_eq!(report.total_bookings, 1);
        assert_eq!(report.total_revenue, 200.0);
        assert_eq!(report.average_rating, 5.0);
        assert_eq!(report.total_messages, 2);
        assert_eq!(report.upcoming_bookings.len(), 1);
        assert_eq!(report.upcoming_bookings[0].id, "b1");
        assert_eq!(report.recent_reviews.len(), 1);
    }

    #[tokio::test]
    async fn test_year_range_reaches_back() {
        let backend = InMemoryBackend::new();
        backend.seed(tables::PROFILES, vec![json!({"id": "host", "user_id": "u-host"})]);
        backend.seed(
            tables::APARTMENTS,
            vec![json!({"id": "a1", "name": "Loft", "host_id": "host"})],
        );
        backend.seed(
            tables::BOOKINGS,
            vec![
                json!({"id": "b1", "property_id": "a1", "guest_id": "g",
                       "check_in_date": "2024-06-20", "check_out_date": "2024-06-22",
                       "total_price": 200.0, "status": "pending",
                       "created_at": "2024-06-10T09:00:00Z"}),
                json!({"id": "b2", "property_id": "a1", "guest_id": "g",
                       "check_in_date": "2024-04-01", "check_out_date": "2024-04-03",
                       "total_price": 500.0, "status": "completed",
                       "created_at": "2023-09-01T09:00:00Z"}),
            ],
        );
        let report = service(Arc::new(backend))
            .report(TimeRange::Year, now())
            .await
            .unwrap();
        assert_eq!(report.total_bookings, 2);
        assert_eq!(report.total_revenue, 700.0);
    }
}

// Multi-table listing search.
// One query per listing table, run concurrently; results are tagged with their
// listing type, concatenated in table order and sorted afterwards.

use crate::backend::{decode_rows, ApiError, Backend};
use crate::model::ListingType;
use crate::query::Query;
use chrono::{DateTime, NaiveDate, Utc};
use futures::future::try_join_all;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceRange {
    pub min: f64,
    pub max: f64,
}

// Search criteria; unset or empty fields do not filter
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchFilters {
    pub location: Option<String>,
    // Accepted but not applied; availability is checked at booking time
    pub check_in: Option<NaiveDate>,
    pub check_out: Option<NaiveDate>,
    pub guests: Option<u32>,
    pub price_range: Option<PriceRange>,
    pub listing_type: Option<ListingType>,
    #[serde(default)]
    pub amenities: Vec<String>,
    pub rating: Option<f64>,
    #[serde(default)]
    pub categories: Vec<String>,
    pub bedrooms: Option<u32>,
    pub cuisine_type: Option<String>,
}

impl SearchFilters {
    // Listing types to search, in result order
    pub fn listing_types(&self) -> Vec<ListingType> {
        match self.listing_type {
            Some(only) => vec![only],
            None => ListingType::ALL.to_vec(),
        }
    }
}

pub fn build_query(listing_type: ListingType, filters: &SearchFilters) -> Query {
    let mut query = Query::new().select("*");

    if let Some(location) = filters.location.as_deref().map(str::trim) {
        if !location.is_empty() {
            query = query.ilike("location", &format!("%{location}%"));
        }
    }
    if let Some(range) = filters.price_range {
        query = query
            .gte("price_per_night", range.min)
            .lte("price_per_night", range.max);
    }
    if let Some(rating) = filters.rating.filter(|r| *r > 0.0) {
        query = query.gte("rating", rating);
    }

    // Restaurants carry neither amenities nor categories
    if listing_type != ListingType::Restaurant {
        if !filters.amenities.is_empty() {
            query = query.contains("amenities", &filters.amenities);
        }
        if !filters.categories.is_empty() {
            query = query.contains("categories", &filters.categories);
        }
    }

    match listing_type {
        ListingType::Apartment => {
            if let Some(bedrooms) = filters.bedrooms.filter(|n| *n > 0) {
                query = query.gte("bedrooms", bedrooms);
            }
            if let Some(guests) = filters.guests.filter(|n| *n > 0) {
                query = query.gte("max_guests", guests);
            }
        }
        ListingType::Restaurant => {
            if let Some(cuisine) = filters.cuisine_type.as_deref().filter(|c| !c.is_empty()) {
                query = query.eq("cuisine_type", cuisine);
            }
        }
        ListingType::Hotel => {}
    }

    query
}

// Columns every listing table shares
#[derive(Debug, Deserialize)]
struct ListingRow {
    id: String,
    name: String,
    #[serde(default)]
    location: String,
    #[serde(default)]
    price_per_night: f64,
    #[serde(default)]
    rating: Option<f64>,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub id: String,
    pub title: String,
    #[serde(rename = "type")]
    pub listing_type: ListingType,
    pub location: String,
    pub price_per_night: f64,
    pub rating: Option<f64>,
    pub created_at: Option<DateTime<Utc>>,
    // Table-specific columns (amenities, bedrooms, cuisine_type, ...)
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl SearchResult {
    fn from_row(listing_type: ListingType, row: ListingRow) -> Self {
        Self {
            id: row.id,
            title: row.name,
            listing_type,
            location: row.location,
            price_per_night: row.price_per_night,
            rating: row.rating,
            created_at: row.created_at,
            extra: row.extra,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortOrder {
    // Backend order, untouched
    #[default]
    Relevance,
    PriceLow,
    PriceHigh,
    Rating,
    Newest,
}

impl FromStr for SortOrder {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "relevance" => Ok(SortOrder::Relevance),
            "price_low" => Ok(SortOrder::PriceLow),
            "price_high" => Ok(SortOrder::PriceHigh),
            "rating" => Ok(SortOrder::Rating),
            "newest" => Ok(SortOrder::Newest),
            other => Err(format!("unknown sort order: {other}")),
        }
    }
}

// Stable: ties keep their table order
pub fn sort_results(results: &mut [SearchResult], order: SortOrder) {
    match order {
        SortOrder::Relevance => {}
        SortOrder::PriceLow => {
            results.sort_by(|a, b| a.price_per_night.total_cmp(&b.price_per_night))
        }
        SortOrder::PriceHigh => {
            results.sort_by(|a, b| b.price_per_night.total_cmp(&a.price_per_night))
        }
        SortOrder::Rating => results.sort_by(|a, b| rating(b).total_cmp(&rating(a))),
        // None orders below Some, so missing timestamps sort last
        SortOrder::Newest => results.sort_by(|a, b| b.created_at.cmp(&a.created_at)),
    }
}

fn rating(result: &SearchResult) -> f64 {
    result.rating.unwrap_or(0.0)
}

pub struct SearchComposer {
    backend: Arc<dyn Backend>,
}

impl SearchComposer {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self { backend }
    }

    // Any failing table fails the whole search
    pub async fn search(&self, filters: &SearchFilters) -> Result<Vec<SearchResult>, ApiError> {
        let started = Instant::now();
        let listing_types = filters.listing_types();

        let fetches = listing_types.iter().map(|listing_type| {
            let query = build_query(*listing_type, filters);
            let backend = Arc::clone(&self.backend);
            let listing_type = *listing_type;
            async move {
                let rows = backend.select(listing_type.table(), &query).await?;
                let rows: Vec<ListingRow> = decode_rows(rows)?;
                Ok::<_, ApiError>(
                    rows.into_iter()
                        .map(|row| SearchResult::from_row(listing_type, row))
                        .collect::<Vec<_>>(),
                )
            }
        });

        let per_table = try_join_all(fetches).await.map_err(|e| {
            error!(error = %e, "listing search failed");
            e
        })?;
        let results: Vec<SearchResult> = per_table.into_iter().flatten().collect();

        info!(
            tables = listing_types.len(),
            results = results.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "listing search finished"
        );
        Ok(results)
    }

    pub async fn search_sorted(
        &self,
        filters: &SearchFilters,
        order: SortOrder,
    ) -> Result<Vec<SearchResult>, ApiError> {
        let mut results = self.search(filters).await?;
        sort_results(&mut results, order);
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{InMemoryBackend, Operation};
    use crate::model::tables;
    use crate::query::Filter;
    use serde_json::json;
    use test_case::test_case;

    fn seeded() -> Arc<InMemoryBackend> {
        let backend = InMemoryBackend::new();
        backend.seed(
            tables::HOTELS,
            vec![
                json!({"id": "h1", "name": "Harbour Hotel", "location": "Lisbon, Portugal",
                       "price_per_night": 150.0, "rating": 4.6, "amenities": ["wifi", "pool"],
                       "created_at": "2024-03-01T00:00:00Z"}),
                json!({"id": "h2", "name": "Budget Inn", "location": "Porto, Portugal",
                       "price_per_night": 60.0, "rating": 3.9, "amenities": ["wifi"],
                       "created_at": "2024-05-01T00:00:00Z"}),
            ],
        );
        backend.seed(
            tables::APARTMENTS,
            vec![
                json!({"id": "a1", "name": "Alfama Loft", "location": "Lisbon",
                       "price_per_night": 95.0, "bedrooms": 2, "max_guests": 4,
                       "amenities": ["wifi", "pool", "kitchen"],
                       "created_at": "2024-04-01T00:00:00Z"}),
                json!({"id": "a2", "name": "Studio", "location": "Lisbon",
                       "price_per_night": 70.0, "bedrooms": 1, "max_guests": 2,
                       "amenities": ["wifi"], "created_at": "2024-01-01T00:00:00Z"}),
            ],
        );
        backend.seed(
            tables::RESTAURANTS,
            vec![json!({"id": "r1", "name": "Tasca", "location": "Lisbon",
                        "price_per_night": 0.0, "rating": 4.8, "cuisine_type": "portuguese",
                        "created_at": "2024-02-01T00:00:00Z"})],
        );
        Arc::new(backend)
    }

    fn ids(results: &[SearchResult]) -> Vec<&str> {
        results.iter().map(|r| r.id.as_str()).collect()
    }

    #[test]
    fn test_restaurant_query_skips_lodging_filters() {
        let filters = SearchFilters {
            amenities: vec!["wifi".to_string()],
            bedrooms: Some(2),
            cuisine_type: Some("thai".to_string()),
            ..SearchFilters::default()
        };

        let restaurant = build_query(ListingType::Restaurant, &filters);
        assert_eq!(
            restaurant.filters,
            vec![Filter::Eq("cuisine_type".to_string(), json!("thai"))]
        );

        let apartment = build_query(ListingType::Apartment, &filters);
        assert_eq!(apartment.filters.len(), 2);
        assert!(apartment
            .filters
            .contains(&Filter::Gte("bedrooms".to_string(), json!(2))));
    }

    #[test]
    fn test_price_and_rating_translation() {
        let filters = SearchFilters {
            price_range: Some(PriceRange {
                min: 50.0,
                max: 100.0,
            }),
            rating: Some(4.0),
            ..SearchFilters::default()
        };
        for listing_type in ListingType::ALL {
            assert_eq!(
                build_query(listing_type, &filters).filters,
                vec![
                    Filter::Gte("price_per_night".to_string(), json!(50.0)),
                    Filter::Lte("price_per_night".to_string(), json!(100.0)),
                    Filter::Gte("rating".to_string(), json!(4.0)),
                ]
            );
        }
    }

    fn price(min: f64, max: f64) -> SearchFilters {
        SearchFilters {
            price_range: Some(PriceRange { min, max }),
            ..SearchFilters::default()
        }
    }

    fn min_rating(floor: f64) -> SearchFilters {
        SearchFilters {
            rating: Some(floor),
            ..SearchFilters::default()
        }
    }

    fn cuisine(name: &str, listing_type: Option<ListingType>) -> SearchFilters {
        SearchFilters {
            cuisine_type: Some(name.to_string()),
            listing_type,
            ..SearchFilters::default()
        }
    }

    #[test_case(price(60.0, 95.0), vec!["h2", "a1", "a2"]; "price bounds are inclusive")]
    #[test_case(price(61.0, 94.0), vec!["a2"]; "price strictly inside")]
    #[test_case(min_rating(4.0), vec!["h1", "r1"]; "rating floor drops unrated")]
    #[test_case(cuisine("portuguese", Some(ListingType::Restaurant)), vec!["r1"]; "cuisine match")]
    #[test_case(
        cuisine("thai", None),
        vec!["h1", "h2", "a1", "a2"];
        "cuisine only filters restaurants"
    )]
    fn test_search_filters_end_to_end(filters: SearchFilters, expected: Vec<&str>) {
        let composer = SearchComposer::new(seeded());
        let results = tokio_test::block_on(composer.search(&filters)).unwrap();
        assert_eq!(ids(&results), expected);
    }

    #[test]
    fn test_blank_filters_do_not_filter() {
        let filters = SearchFilters {
            location: Some("  ".to_string()),
            rating: Some(0.0),
            guests: Some(0),
            ..SearchFilters::default()
        };
        for listing_type in ListingType::ALL {
            assert!(build_query(listing_type, &filters).filters.is_empty());
        }
    }

    #[tokio::test]
    async fn test_search_all_tables_in_order() {
        let composer = SearchComposer::new(seeded());
        let filters = SearchFilters {
            location: Some("lisbon".to_string()),
            ..SearchFilters::default()
        };

        let results = composer.search(&filters).await.unwrap();
        assert_eq!(ids(&results), vec!["h1", "a1", "a2", "r1"]);
        assert_eq!(results[0].title, "Harbour Hotel");
        assert_eq!(results[3].listing_type, ListingType::Restaurant);
        assert_eq!(results[3].extra["cuisine_type"], "portuguese");
    }

    #[tokio::test]
    async fn test_search_with_type_and_amenities() {
        let composer = SearchComposer::new(seeded());
        let filters = SearchFilters {
            listing_type: Some(ListingType::Apartment),
            amenities: vec!["pool".to_string()],
            guests: Some(3),
            ..SearchFilters::default()
        };

        let results = composer.search(&filters).await.unwrap();
        assert_eq!(ids(&results), vec!["a1"]);
    }

    #[tokio::test]
    async fn test_one_failing_table_fails_search() {
        let backend = seeded();
        backend.fail_next(Operation::Select, 1);
        let composer = SearchComposer::new(backend);

        assert!(composer.search(&SearchFilters::default()).await.is_err());
    }

    #[test_case(SortOrder::Relevance, vec!["h1", "h2", "a1", "a2", "r1"])]
    #[test_case(SortOrder::PriceLow, vec!["r1", "h2", "a2", "a1", "h1"])]
    #[test_case(SortOrder::PriceHigh, vec!["h1", "a1", "a2", "h2", "r1"])]
    #[test_case(SortOrder::Rating, vec!["r1", "h1", "h2", "a1", "a2"])]
    #[test_case(SortOrder::Newest, vec!["h2", "a1", "h1", "r1", "a2"])]
    fn test_sort_orders(order: SortOrder, expected: Vec<&str>) {
        let composer = SearchComposer::new(seeded());
        let filters = SearchFilters::default();
        let results = tokio_test::block_on(composer.search_sorted(&filters, order)).unwrap();
        assert_eq!(ids(&results), expected);
    }

    #[test]
    fn test_sort_order_parse() {
        assert_eq!("price_high".parse::<SortOrder>(), Ok(SortOrder::PriceHigh));
        assert!("cheapest".parse::<SortOrder>().is_err());
    }
}

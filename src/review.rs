// Guest reviews of listings. One review per guest and listing; the backend's
// unique key enforces it.

use crate::backend::{decode_row, decode_rows, ApiError, Backend};
use crate::model::{tables, Review};
use crate::query::Query;
use crate::session::{ServiceError, Session};
use serde_json::json;
use std::sync::Arc;
use tracing::{error, info};

pub const MAX_RATING: u8 = 5;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ReviewSort {
    #[default]
    Recent,
    Rating,
}

// Mean rating, 0 when there are no reviews
pub fn average_rating(reviews: &[Review]) -> f64 {
    if reviews.is_empty() {
        return 0.0;
    }
    let sum: u32 = reviews.iter().map(|r| u32::from(r.rating)).sum();
    f64::from(sum) / reviews.len() as f64
}

pub struct ReviewService {
    backend: Arc<dyn Backend>,
    session: Arc<Session>,
}

impl ReviewService {
    pub fn new(backend: Arc<dyn Backend>, session: Arc<Session>) -> Self {
        Self { backend, session }
    }

    pub async fn submit_review(
        &self,
        property_id: &str,
        rating: u8,
        comment: &str,
    ) -> Result<Review, ServiceError> {
        if !self.session.is_signed_in() {
            return Err(ServiceError::NotSignedIn("leave a review"));
        }
        if rating == 0 {
            return Err(ServiceError::Validation("Please select a rating".to_string()));
        }
        if rating > MAX_RATING {
            return Err(ServiceError::Validation(format!(
                "Rating must be between 1 and {MAX_RATING}"
            )));
        }
        let profile = self
            .session
            .require_profile(self.backend.as_ref(), "leave a review")
            .await?;

        let row = match self
            .backend
            .insert(
                tables::REVIEWS,
                json!({
                    "property_id": property_id,
                    "reviewer_id": profile.id,
                    "rating": rating,
                    "comment": comment.trim(),
                }),
            )
            .await
        {
            Ok(row) => row,
            Err(ApiError::UniqueViolation(_)) => {
                return Err(ServiceError::Validation(
                    "You have already reviewed this property".to_string(),
                ))
            }
            Err(e) => {
                error!(property_id, error = %e, "review insert failed");
                return Err(e.into());
            }
        };

        let review: Review = decode_row(row)?;
        info!(property_id, review_id = %review.id, rating, "review submitted");
        Ok(review)
    }

    pub async fn list_reviews(
        &self,
        property_id: &str,
        sort: ReviewSort,
    ) -> Result<Vec<Review>, ServiceError> {
        let column = match sort {
            ReviewSort::Recent => "created_at",
            ReviewSort::Rating => "rating",
        };
        let rows = self
            .backend
            .select(
                tables::REVIEWS,
                &Query::new().eq("property_id", property_id).order(column, false),
            )
            .await
            .map_err(|e| {
                error!(property_id, error = %e, "review fetch failed");
                ServiceError::Backend(e)
            })?;
        Ok(decode_rows(rows)?)
    }
}

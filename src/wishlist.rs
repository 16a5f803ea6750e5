// Named wishlists of saved listings. Every write is followed by a refetch so
// callers always get the stored state back.

use crate::backend::{decode_rows, ApiError, Backend};
use crate::model::{tables, Wishlist, WishlistItem};
use crate::query::Query;
use crate::session::{ServiceError, Session};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info};

pub struct WishlistService {
    backend: Arc<dyn Backend>,
    session: Arc<Session>,
}

impl WishlistService {
    pub fn new(backend: Arc<dyn Backend>, session: Arc<Session>) -> Self {
        Self { backend, session }
    }

    pub async fn fetch_wishlists(&self) -> Result<Vec<Wishlist>, ServiceError> {
        let profile = self
            .session
            .require_profile(self.backend.as_ref(), "view wishlists")
            .await?;

        let rows = self
            .backend
            .select(
                tables::WISHLISTS,
                &Query::new().eq("user_id", profile.id.as_str()).order("created_at", true),
            )
            .await
            .map_err(|e| log_failure("fetch wishlists", e))?;
        let mut wishlists: Vec<Wishlist> = decode_rows(rows)?;
        if wishlists.is_empty() {
            return Ok(wishlists);
        }

        let ids: Vec<String> = wishlists.iter().map(|w| w.id.clone()).collect();
        let rows = self
            .backend
            .select(tables::WISHLIST_ITEMS, &Query::new().in_list("wishlist_id", ids))
            .await
            .map_err(|e| log_failure("fetch wishlist items", e))?;

        let mut items: HashMap<String, Vec<WishlistItem>> = HashMap::new();
        for item in decode_rows::<WishlistItem>(rows)? {
            items.entry(item.wishlist_id.clone()).or_default().push(item);
        }
        for wishlist in &mut wishlists {
            wishlist.items = items.remove(&wishlist.id).unwrap_or_default();
        }
        Ok(wishlists)
    }

    pub async fn create_wishlist(&self, name: &str) -> Result<Vec<Wishlist>, ServiceError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ServiceError::Validation("Wishlist name cannot be empty".to_string()));
        }
        let profile = self
            .session
            .require_profile(self.backend.as_ref(), "create a wishlist")
            .await?;

        self.backend
            .insert(tables::WISHLISTS, json!({ "name": name, "user_id": profile.id }))
            .await
            .map_err(|e| log_failure("create wishlist", e))?;
        info!(profile_id = %profile.id, name, "wishlist created");
        self.fetch_wishlists().await
    }

    pub async fn add_to_wishlist(
        &self,
        wishlist_id: &str,
        property_id: &str,
    ) -> Result<Vec<Wishlist>, ServiceError> {
        self.require_signed_in()?;
        match self
            .backend
            .insert(
                tables::WISHLIST_ITEMS,
                json!({ "wishlist_id": wishlist_id, "property_id": property_id }),
            )
            .await
        {
            Ok(_) => {}
            Err(ApiError::UniqueViolation(_)) => {
                return Err(ServiceError::Validation(
                    "This listing is already in the wishlist".to_string(),
                ))
            }
            Err(e) => return Err(log_failure("add to wishlist", e)),
        }
        self.fetch_wishlists().await
    }

    pub async fn remove_from_wishlist(
        &self,
        wishlist_id: &str,
        property_id: &str,
    ) -> Result<Vec<Wishlist>, ServiceError> {
        self.require_signed_in()?;
        self.backend
            .delete(
                tables::WISHLIST_ITEMS,
                &Query::new()
                    .eq("wishlist_id", wishlist_id)
                    .eq("property_id", property_id),
            )
            .await
            .map_err(|e| log_failure("remove from wishlist", e))?;
        self.fetch_wishlists().await
    }

    fn require_signed_in(&self) -> Result<(), ServiceError> {
        if self.session.is_signed_in() {
            Ok(())
        } else {
            Err(ServiceError::NotSignedIn("manage wishlists"))
        }
    }
}

fn log_failure(step: &str, e: ApiError) -> ServiceError {
    error!(step, error = %e, "wishlist call failed");
    ServiceError::Backend(e)
}

// Explicit per-user session passed to every service.

use crate::backend::{ApiError, Backend};
use crate::model::{BookingStatus, Profile};
use parking_lot::Mutex;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthUser {
    pub id: String,
    pub email: Option<String>,
}

// Errors shared by the messaging, wishlist, review and host services
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Please sign in to {0}")]
    NotSignedIn(&'static str),

    #[error("Profile not found")]
    ProfileNotFound,

    #[error("{0}")]
    Validation(String),

    #[error("Cannot move booking from {from} to {to}")]
    InvalidTransition {
        from: BookingStatus,
        to: BookingStatus,
    },

    #[error("Backend error: {0}")]
    Backend(#[from] ApiError),
}

impl ServiceError {
    // Inline text for the UI; backend details stay in the logs
    pub fn user_message(&self, fallback: &str) -> String {
        match self {
            ServiceError::Backend(_) => fallback.to_string(),
            other => other.to_string(),
        }
    }
}

#[derive(Debug, Default)]
pub struct Session {
    user: Option<AuthUser>,
    profile: Mutex<Option<Profile>>,
}

impl Session {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn signed_in(user: AuthUser) -> Self {
        Self {
            user: Some(user),
            profile: Mutex::new(None),
        }
    }

    pub fn user(&self) -> Option<&AuthUser> {
        self.user.as_ref()
    }

    pub fn is_signed_in(&self) -> bool {
        self.user.is_some()
    }

    // Profile of the signed-in user, looked up once and remembered
    pub async fn profile(&self, backend: &dyn Backend) -> Result<Option<Profile>, ApiError> {
        let Some(user) = &self.user else {
            return Ok(None);
        };
        if let Some(profile) = self.profile.lock().clone() {
            return Ok(Some(profile));
        }

        let found = backend.find_profile(&user.id).await?;
        if let Some(profile) = &found {
            debug!(user_id = %user.id, profile_id = %profile.id, "profile resolved");
            *self.profile.lock() = Some(profile.clone());
        }
        Ok(found)
    }

    pub async fn require_profile(
        &self,
        backend: &dyn Backend,
        action: &'static str,
    ) -> Result<Profile, ServiceError> {
        if !self.is_signed_in() {
            return Err(ServiceError::NotSignedIn(action));
        }
        self.profile(backend)
            .await?
            .ok_or(ServiceError::ProfileNotFound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{InMemoryBackend, Operation};
    use crate::model::tables;
    use serde_json::json;

    fn user() -> AuthUser {
        AuthUser {
            id: "u1".to_string(),
            email: Some("guest@example.com".to_string()),
        }
    }

    #[tokio::test]
    async fn test_profile_is_cached_after_first_lookup() {
        let backend = InMemoryBackend::new();
        backend.seed(
            tables::PROFILES,
            vec![json!({"id": "p1", "user_id": "u1", "full_name": "Ana"})],
        );
        let session = Session::signed_in(user());

        let profile = session.profile(&backend).await.unwrap().unwrap();
        assert_eq!(profile.id, "p1");

        // A failing backend no longer matters once the profile is known
        backend.fail_next(Operation::Select, 1);
        assert!(session.profile(&backend).await.is_ok());
    }

    #[tokio::test]
    async fn test_require_profile_errors() {
        let backend = InMemoryBackend::new();

        let anonymous = Session::anonymous();
        let err = anonymous.require_profile(&backend, "send messages").await.unwrap_err();
        assert_eq!(err.to_string(), "Please sign in to send messages");

        let orphan = Session::signed_in(user());
        let err = orphan.require_profile(&backend, "send messages").await.unwrap_err();
        assert!(matches!(err, ServiceError::ProfileNotFound));
    }
}

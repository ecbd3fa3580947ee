//! Authentication extractors.
//!
//! Sign-in state belongs to the shopper's remote store session, so these
//! extractors ask the store rather than the cookie.

use axum::{extract::FromRequestParts, http::request::Parts};

use super::shopper::Shopper;
use crate::error::AppError;
use crate::remote::Identity;
use crate::state::AppState;

/// Extractor that requires a signed-in shopper.
///
/// Rejects with 401 when the shopper is a guest.
///
/// # Example
///
/// ```rust,ignore
/// async fn protected_handler(RequireIdentity(user): RequireIdentity) -> String {
///     format!("Hello, {}!", user.email)
/// }
/// ```
pub struct RequireIdentity(pub Identity);

impl FromRequestParts<AppState> for RequireIdentity {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let OptionalIdentity(identity) = OptionalIdentity::from_request_parts(parts, state).await?;
        identity
            .map(Self)
            .ok_or_else(|| AppError::Unauthorized("sign in required".to_string()))
    }
}

/// Extractor that optionally gets the signed-in shopper.
pub struct OptionalIdentity(pub Option<Identity>);

impl FromRequestParts<AppState> for OptionalIdentity {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let Shopper(shopper) = Shopper::from_request_parts(parts, state).await?;
        Ok(Self(shopper.identity().await?))
    }
}

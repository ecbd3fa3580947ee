//! Shopper session extractor.
//!
//! Every visitor gets a [`SessionId`] in their cookie session on first
//! contact; the id names their [`ShopperSession`] in the registry and scopes
//! their guest rows.

use std::sync::Arc;

use axum::{extract::FromRequestParts, http::request::Parts};
use tower_sessions::Session;
use tracing::Span;

use bazaar_core::SessionId;

use crate::error::AppError;
use crate::models::session_keys;
use crate::services::ShopperSession;
use crate::state::AppState;

/// Extractor for the calling shopper's session.
///
/// # Example
///
/// ```rust,ignore
/// async fn handler(Shopper(shopper): Shopper) -> impl IntoResponse {
///     Json(shopper.cart().snapshot().await)
/// }
/// ```
pub struct Shopper(pub Arc<ShopperSession>);

impl FromRequestParts<AppState> for Shopper {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let session = parts
            .extensions
            .get::<Session>()
            .ok_or_else(|| AppError::Internal("session layer not installed".to_string()))?;

        let session_id = shopper_session_id(session).await?;
        Span::current().record("session_id", tracing::field::display(session_id));

        Ok(Self(state.shoppers().get_or_start(session_id).await))
    }
}

/// The shopper id stored in the cookie session, minting one if absent.
///
/// # Errors
///
/// Returns an error if the session cannot be read or modified.
pub async fn shopper_session_id(
    session: &Session,
) -> Result<SessionId, tower_sessions::session::Error> {
    if let Some(id) = session.get::<SessionId>(session_keys::SHOPPER_SESSION_ID).await? {
        return Ok(id);
    }

    let id = SessionId::random();
    session.insert(session_keys::SHOPPER_SESSION_ID, id).await?;
    Ok(id)
}

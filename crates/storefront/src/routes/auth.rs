//! Authentication route handlers.
//!
//! Credentials are checked by the remote store; the shopper's store session
//! carries the result. The cookie session id is cycled on every change of
//! identity while the shopper id inside it is kept, so the guest cart is
//! there again after sign-out.

use axum::{Json, extract::State, http::StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tower_sessions::Session;
use tracing::{instrument, warn};

use bazaar_core::Email;

use super::cart::CartView;
use crate::error::{AppError, Result, clear_sentry_user, set_sentry_user};
use crate::middleware::{OptionalIdentity, Shopper};
use crate::remote::{Identity, RemoteError};
use crate::services::WishlistSnapshot;
use crate::state::AppState;

/// Login request body.
#[derive(Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// Response to a successful sign-in: the user and their own cart and
/// wishlist.
#[derive(Debug, Serialize)]
pub struct SignedIn {
    pub user: Identity,
    pub cart: CartView,
    pub wishlist: WishlistSnapshot,
}

/// Handle login.
#[instrument(skip(state, shopper, session, body))]
pub async fn login(
    State(state): State<AppState>,
    Shopper(shopper): Shopper,
    session: Session,
    Json(body): Json<LoginRequest>,
) -> Result<Json<SignedIn>> {
    let email = Email::parse(&body.email)
        .map_err(|_| AppError::BadRequest("Invalid email address".to_string()))?;
    let password = SecretString::from(body.password);

    let user = shopper
        .sign_in(&email, password.expose_secret())
        .await
        .map_err(|e| match e {
            RemoteError::Unauthorized(_) => AppError::Unauthorized("Invalid credentials".into()),
            other => AppError::Remote(other),
        })?;

    session.cycle_id().await?;
    set_sentry_user(&user.id, Some(user.email.as_str()));

    Ok(Json(SignedIn {
        user,
        cart: CartView::of(&shopper, &state).await,
        wishlist: shopper.wishlist().snapshot().await,
    }))
}

/// Handle logout.
///
/// The shopper is signed out locally even if the store could not revoke
/// the session.
#[instrument(skip(shopper, session))]
pub async fn logout(Shopper(shopper): Shopper, session: Session) -> Result<StatusCode> {
    if let Err(e) = shopper.sign_out().await {
        warn!(error = %e, "Remote sign-out failed");
    }
    session.cycle_id().await?;
    clear_sentry_user();
    Ok(StatusCode::NO_CONTENT)
}

/// The signed-in user, or `null` for guests.
pub async fn me(OptionalIdentity(user): OptionalIdentity) -> Json<Option<Identity>> {
    Json(user)
}

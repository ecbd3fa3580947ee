//! Pending shopper notifications.

use axum::Json;

use crate::middleware::Shopper;
use crate::services::Notification;

/// Hand over and forget everything queued for this shopper.
pub async fn drain(Shopper(shopper): Shopper) -> Json<Vec<Notification>> {
    Json(shopper.notifier().drain())
}

//! Database migration command.
//!
//! Migrations live in `crates/storefront/migrations/` and create the seven
//! storefront tables, their uniqueness constraints and the `place_order`
//! procedure.

use super::{CommandError, connect};

/// Run storefront migrations.
///
/// # Errors
///
/// Returns an error if the database URL is missing, the connection fails,
/// or a migration fails.
pub async fn run() -> Result<(), CommandError> {
    let pool = connect().await?;

    tracing::info!("Running storefront migrations...");
    sqlx::migrate!("../storefront/migrations").run(&pool).await?;

    tracing::info!("Storefront migrations complete!");
    Ok(())
}

//! Session-related types.

/// Session keys.
pub mod keys {
    /// Key for the shopper's [`SessionId`](bazaar_core::SessionId), which
    /// scopes guest cart and wishlist rows and names the shopper session.
    pub const SHOPPER_SESSION_ID: &str = "shopper_session_id";
}

//! HTTP middleware stack for storefront.
//!
//! # Middleware Order (outermost first)
//!
//! 1. Sentry layers (hub per request, HTTP transaction)
//! 2. `TraceLayer` (request span with `request_id` and `session_id` fields)
//! 3. Request ID (reuse or mint `x-request-id`)
//! 4. Session layer (tower-sessions with in-memory store)
//!
//! Handlers then pull their [`Shopper`] and, where needed, the signed-in
//! identity through extractors.

pub mod auth;
pub mod request_id;
pub mod session;
pub mod shopper;

pub use auth::{OptionalIdentity, RequireIdentity};
pub use request_id::request_id_middleware;
pub use session::create_session_layer;
pub use shopper::Shopper;

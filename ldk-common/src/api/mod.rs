//! Shared HTTP API functionality
//!
//! Request signing, the axum middleware enforcing it, and the JSON shapes
//! shared by both LotDesk services.

pub mod auth;
pub mod middleware;
pub mod types;

pub use auth::{
    calculate_hash, initialize_shared_secret, load_shared_secret, load_timestamp_tolerance,
    validate_hash, validate_timestamp, ApiAuthError,
};
pub use middleware::{require_signed_request, AuthConfig};
pub use types::{AuthErrorResponse, AuthQuery, AuthRequest, ErrorBody, ErrorDetail, Page, PageQuery};

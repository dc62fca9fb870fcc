//! Token handling for user requests.

pub mod jwt;

/// Role name granting access to operator endpoints.
pub const ROLE_ADMIN: &str = "admin";

//! Authentication and authorization extractors.
//!
//! - [`auth::AuthUser`] -- the user behind a JWT Bearer token.
//! - [`internal::Caller`] -- an internal caller (shared secret) or a user.
//! - [`internal::AdminOrInternal`] -- operator endpoints.
//! - [`internal::InternalHeader`] -- optional internal authority alongside a user token.

pub mod auth;
pub mod internal;

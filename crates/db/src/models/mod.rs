//! Row models mapping database tables to Rust structs.
//!
//! Rows use raw column types (`StatusId`, `String`, `serde_json::Value`);
//! each converts into its validated domain counterpart from
//! `atelier_core` via `TryFrom`.

pub mod credit;
pub mod generation_job;
pub mod result_asset;

/// Error raised when a stored row holds a value the domain layer does not
/// recognize (unknown status id, unparseable metadata).
#[derive(Debug, thiserror::Error)]
#[error("Corrupt {table} row {id}: {detail}")]
pub struct RowDecodeError {
    pub table: &'static str,
    pub id: atelier_core::types::DbId,
    pub detail: String,
}

//! Pure domain layer for the generation service.
//!
//! Nothing in this crate performs I/O: it holds identifiers, status
//! enums, the model catalog, the reconciliation planner and the
//! migration ordering rules shared by every other crate.

pub mod authority;
pub mod catalog;
pub mod error;
pub mod job;
pub mod metadata;
pub mod redact;
pub mod reconcile;
pub mod status;
pub mod task_state;
pub mod transfer;
pub mod types;
pub mod validation;
pub mod webhook_token;

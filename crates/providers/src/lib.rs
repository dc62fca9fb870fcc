//! Generation provider integration.
//!
//! Provides:
//! - [`client`] -- shared HTTP client with network-only retry.
//! - [`adapter`] -- the uniform `create_task` / `query_task` contract.
//! - [`adapters`] -- concrete provider adapters.
//! - [`callback`] -- parsing of provider webhook payloads.
//! - [`registry`] -- model resolution and adapter selection.

pub mod adapter;
pub mod adapters;
pub mod callback;
pub mod client;
pub mod error;
pub mod registry;

pub use adapter::{CreatedTask, ProviderAdapter, TaskRequest, TaskSnapshot};
pub use error::ProviderError;
pub use registry::{ProviderRegistry, ResolvedModel};

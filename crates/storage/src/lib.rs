//! Durable object storage and source fetching for result migration.
//!
//! Provides:
//! - [`object`] -- the `ObjectStorage` upload contract with S3 and in-memory backends.
//! - [`fetch`] -- the `SourceFetcher` download contract with a reqwest backend.
//! - [`images`] -- image validation and thumbnail derivation.

pub mod error;
pub mod fetch;
pub mod images;
pub mod object;

pub use error::StorageError;
pub use fetch::{FetchedObject, HttpFetcher, SourceFetcher};
pub use object::{MemoryStorage, ObjectStorage, S3Config, S3Storage, StoredObject};

//! Repository layer.
//!
//! Each repository is a zero-sized struct providing async methods that
//! accept `&PgPool` (or an open transaction when the operation must be
//! composed with others) as the first argument.

pub mod credit_repo;
pub mod generation_job_repo;
pub mod result_asset_repo;

pub use credit_repo::CreditRepo;
pub use generation_job_repo::GenerationJobRepo;
pub use result_asset_repo::ResultAssetRepo;

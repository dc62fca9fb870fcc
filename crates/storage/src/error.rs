/// Errors from downloading, validating or uploading result assets.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Download failed: {0}")]
    Download(#[from] reqwest::Error),

    #[error("Source returned HTTP {0}")]
    SourceStatus(u16),

    #[error("Source exceeds {limit} bytes")]
    TooLarge { limit: u64 },

    #[error("Source is empty")]
    Empty,

    #[error("Invalid image: {0}")]
    InvalidImage(#[from] image::ImageError),

    #[error("Upload of '{key}' failed: {message}")]
    Upload { key: String, message: String },
}

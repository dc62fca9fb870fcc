/// Primary key type. Jobs and assets use time-ordered UUIDs (v7).
pub type DbId = uuid::Uuid;

/// Timestamp type used across all entities.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Generate a fresh time-ordered identifier.
pub fn new_id() -> DbId {
    uuid::Uuid::now_v7()
}

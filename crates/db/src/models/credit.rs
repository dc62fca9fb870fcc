//! Credit ledger rows.

use atelier_core::types::{DbId, Timestamp};
use serde::Serialize;
use sqlx::FromRow;

/// Transaction kind for a generation debit.
pub const KIND_GENERATION: &str = "generation";

/// Transaction kind for an operator or system top-up.
pub const KIND_GRANT: &str = "grant";

/// A row from the `credit_accounts` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct CreditAccount {
    pub owner_id: DbId,
    pub balance: i32,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// A row from the `credit_transactions` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct CreditTransaction {
    pub id: DbId,
    pub owner_id: DbId,
    pub job_id: Option<DbId>,
    pub kind: String,
    pub amount: i32,
    pub description: Option<String>,
    pub is_voided: bool,
    pub voided_at: Option<Timestamp>,
    pub voided_reason: Option<String>,
    pub created_at: Timestamp,
}

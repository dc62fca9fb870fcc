//! Repository for the credit ledger (`credit_accounts`, `credit_transactions`).
//!
//! Debits are recorded as negative `generation` transactions, one per job.
//! Refunds soft-void that row and credit the amount back; restores
//! un-void it and debit again. Both are no-ops when nothing matches, so
//! neither can be applied twice in a row.

use atelier_core::types::{new_id, DbId};
use sqlx::{PgPool, Postgres, Transaction};

use crate::models::credit::{CreditAccount, CreditTransaction, KIND_GENERATION, KIND_GRANT};

/// Column list for `credit_transactions` queries.
const TX_COLUMNS: &str = "\
    id, owner_id, job_id, kind, amount, description, is_voided, voided_at, \
    voided_reason, created_at";

/// Provides ledger operations.
pub struct CreditRepo;

impl CreditRepo {
    /// Current balance; owners without an account have zero.
    pub async fn balance(pool: &PgPool, owner_id: DbId) -> Result<i32, sqlx::Error> {
        let balance: Option<i32> =
            sqlx::query_scalar("SELECT balance FROM credit_accounts WHERE owner_id = $1")
                .bind(owner_id)
                .fetch_optional(pool)
                .await?;
        Ok(balance.unwrap_or(0))
    }

    /// Add credits to an owner's account, creating it if needed.
    pub async fn grant(
        pool: &PgPool,
        owner_id: DbId,
        amount: i32,
        description: Option<&str>,
    ) -> Result<CreditAccount, sqlx::Error> {
        let mut tx = pool.begin().await?;
        let account = sqlx::query_as::<_, CreditAccount>(
            "INSERT INTO credit_accounts (owner_id, balance) VALUES ($1, $2) \
             ON CONFLICT (owner_id) DO UPDATE SET balance = credit_accounts.balance + EXCLUDED.balance \
             RETURNING owner_id, balance, created_at, updated_at",
        )
        .bind(owner_id)
        .bind(amount)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query(
            "INSERT INTO credit_transactions (id, owner_id, kind, amount, description) \
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(new_id())
        .bind(owner_id)
        .bind(KIND_GRANT)
        .bind(amount)
        .bind(description)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(account)
    }

    /// Debit `amount` for a job inside the caller's transaction.
    ///
    /// Returns `false` (and changes nothing) when the balance is too low.
    pub async fn decrease(
        tx: &mut Transaction<'_, Postgres>,
        owner_id: DbId,
        job_id: DbId,
        amount: i32,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE credit_accounts SET balance = balance - $2 \
             WHERE owner_id = $1 AND balance >= $2",
        )
        .bind(owner_id)
        .bind(amount)
        .execute(&mut **tx)
        .await?;
        if result.rows_affected() == 0 {
            return Ok(false);
        }

        sqlx::query(
            "INSERT INTO credit_transactions (id, owner_id, job_id, kind, amount, description) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(new_id())
        .bind(owner_id)
        .bind(job_id)
        .bind(KIND_GENERATION)
        .bind(-amount)
        .bind("generation charge")
        .execute(&mut **tx)
        .await?;
        Ok(true)
    }

    /// Void the job's live debit and credit it back. Returns the amount
    /// refunded, or zero when there was nothing to refund.
    pub async fn refund(
        tx: &mut Transaction<'_, Postgres>,
        job_id: DbId,
        reason: &str,
    ) -> Result<i32, sqlx::Error> {
        let refunded: Option<i32> = sqlx::query_scalar(
            "WITH voided AS ( \
                 UPDATE credit_transactions \
                 SET is_voided = TRUE, voided_at = NOW(), voided_reason = $2 \
                 WHERE job_id = $1 AND kind = $3 AND NOT is_voided \
                 RETURNING owner_id, amount \
             ) \
             UPDATE credit_accounts a SET balance = a.balance - v.amount \
             FROM voided v WHERE a.owner_id = v.owner_id \
             RETURNING -v.amount",
        )
        .bind(job_id)
        .bind(reason)
        .bind(KIND_GENERATION)
        .fetch_optional(&mut **tx)
        .await?;
        Ok(refunded.unwrap_or(0))
    }

    /// Undo a prior refund for the job. Returns the amount debited again,
    /// or zero when nothing had been refunded.
    pub async fn restore(
        tx: &mut Transaction<'_, Postgres>,
        job_id: DbId,
        reason: &str,
    ) -> Result<i32, sqlx::Error> {
        let restored: Option<i32> = sqlx::query_scalar(
            "WITH restored AS ( \
                 UPDATE credit_transactions \
                 SET is_voided = FALSE, voided_at = NULL, voided_reason = NULL, \
                     description = COALESCE(description, '') || ' [restored: ' || $2 || ']' \
                 WHERE job_id = $1 AND kind = $3 AND is_voided \
                 RETURNING owner_id, amount \
             ) \
             UPDATE credit_accounts a SET balance = a.balance + r.amount \
             FROM restored r WHERE a.owner_id = r.owner_id \
             RETURNING -r.amount",
        )
        .bind(job_id)
        .bind(reason)
        .bind(KIND_GENERATION)
        .fetch_optional(&mut **tx)
        .await?;
        Ok(restored.unwrap_or(0))
    }

    /// Most recent ledger entries for an owner.
    pub async fn list_transactions(
        pool: &PgPool,
        owner_id: DbId,
        limit: i64,
    ) -> Result<Vec<CreditTransaction>, sqlx::Error> {
        let query = format!(
            "SELECT {TX_COLUMNS} FROM credit_transactions \
             WHERE owner_id = $1 ORDER BY created_at DESC LIMIT $2"
        );
        sqlx::query_as::<_, CreditTransaction>(&query)
            .bind(owner_id)
            .bind(limit)
            .fetch_all(pool)
            .await
    }
}

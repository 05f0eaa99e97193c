//! The notified-signature ledger and duplicate suppressor.
//!
//! `transaction_history.signature` carries a `UNIQUE` constraint
//! (migrations/0001_init.sql); `claim()` is a plain insert, and the
//! database's uniqueness rejection *is* the coordination primitive across
//! cycles, subscribers, and process restarts. There is no read-then-write
//! race here because there is no read: the insert either lands or it
//! doesn't, atomically.

use sqlx::PgPool;

use crate::classifier::ClassifiedKind;
use crate::error::StorageError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimOutcome {
    Claimed,
    AlreadyClaimed,
}

pub struct Ledger {
    pool: PgPool,
}

impl Ledger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Whether `signature` has already been recorded — notified or dust.
    /// Callers skip processing entirely when this is true.
    pub async fn contains(&self, signature: &str) -> Result<bool, StorageError> {
        let exists: Option<i64> =
            sqlx::query_scalar("SELECT 1 FROM transaction_history WHERE signature = $1")
                .bind(signature)
                .fetch_optional(&self.pool)
                .await?;
        Ok(exists.is_some())
    }

    /// Insert-if-absent. One row per signature regardless of how many
    /// subscribers watch the account: the row is attributed to
    /// `subscriber` (conventionally the first subscriber discovered)
    /// purely for bookkeeping, never duplicated per subscriber.
    pub async fn claim(
        &self,
        signature: &str,
        subscriber: i64,
        account: &str,
        amount_sol: f64,
        kind: ClassifiedKind,
        dust: bool,
        block_time: Option<i64>,
    ) -> Result<ClaimOutcome, StorageError> {
        let tx_type = kind_label(kind, dust);

        let result = sqlx::query(
            r#"
            INSERT INTO transaction_history
                (wallet_address, chat_id, signature, amount, tx_type, timestamp, block_time, status, notified)
            VALUES ($1, $2, $3, $4, $5, now(), $6, 'confirmed', $7)
            ON CONFLICT (signature) DO NOTHING
            "#,
        )
        .bind(account)
        .bind(subscriber)
        .bind(signature)
        .bind(amount_sol.to_string())
        .bind(tx_type)
        .bind(block_time)
        .bind(!dust)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            Ok(ClaimOutcome::AlreadyClaimed)
        } else {
            Ok(ClaimOutcome::Claimed)
        }
    }
}

fn kind_label(kind: ClassifiedKind, dust: bool) -> &'static str {
    if dust {
        return "dust";
    }
    match kind {
        ClassifiedKind::Receive => "receive",
        ClassifiedKind::Send => "send",
        ClassifiedKind::Trade => "trade",
        ClassifiedKind::Generic => "generic",
    }
}

//! The watch registry.
//!
//! Backed by Postgres. Owns the set of active watches and their per-account
//! cursor. The uniqueness index on `(chat_id, wallet_address) WHERE is_active`
//! (migrations/0001_init.sql) is what makes `add()` of an already-owned
//! account a no-op `Duplicate` rather than a second row.

use std::str::FromStr;

use solana_sdk::pubkey::Pubkey;
use sqlx::PgPool;

use crate::error::StorageError;

/// One active (subscriber, account) relationship, as read back for the
/// scheduler's working set.
#[derive(Debug, Clone)]
pub struct Watch {
    pub id: i64,
    pub subscriber: i64,
    pub account: String,
    pub credential_encrypted: String,
    pub nickname: Option<String>,
    pub cursor: Option<String>,
    pub inception_time: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    Added,
    Duplicate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoveOutcome {
    Removed,
    NotFound,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TransferStats {
    pub transferred: u64,
}

pub struct WatchRegistry {
    pool: PgPool,
}

impl WatchRegistry {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Adds a watch for `(subscriber, account)`. A second `add` for the same
    /// pair while the first is still active is a no-op `Duplicate`.
    /// `account` is validated as a well-formed base58 Solana pubkey before
    /// anything is written, so a typo never reaches the poll scheduler.
    pub async fn add(
        &self,
        subscriber: i64,
        account: &str,
        credential_encrypted: &str,
        nickname: Option<&str>,
        now: i64,
    ) -> Result<AddOutcome, StorageError> {
        Pubkey::from_str(account).map_err(|_| StorageError::InvalidAddress(account.to_string()))?;

        let existing = sqlx::query_scalar::<_, i64>(
            "SELECT id FROM monitored_wallets WHERE chat_id = $1 AND wallet_address = $2 AND is_active",
        )
        .bind(subscriber)
        .bind(account)
        .fetch_optional(&self.pool)
        .await?;

        if existing.is_some() {
            return Ok(AddOutcome::Duplicate);
        }

        sqlx::query(
            r#"
            INSERT INTO monitored_wallets
                (chat_id, wallet_address, private_key_encrypted, nickname, is_active, monitoring_start_time)
            VALUES ($1, $2, $3, $4, TRUE, $5)
            "#,
        )
        .bind(subscriber)
        .bind(account)
        .bind(credential_encrypted)
        .bind(nickname)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(AddOutcome::Added)
    }

    pub async fn remove(&self, subscriber: i64, account: &str) -> Result<RemoveOutcome, StorageError> {
        let result = sqlx::query(
            "UPDATE monitored_wallets SET is_active = FALSE, updated_at = now() WHERE chat_id = $1 AND wallet_address = $2 AND is_active",
        )
        .bind(subscriber)
        .bind(account)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            Ok(RemoveOutcome::NotFound)
        } else {
            Ok(RemoveOutcome::Removed)
        }
    }

    pub async fn subscribers_of(&self, account: &str) -> Result<Vec<i64>, StorageError> {
        let rows: Vec<i64> = sqlx::query_scalar(
            "SELECT chat_id FROM monitored_wallets WHERE wallet_address = $1 AND is_active",
        )
        .bind(account)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// The scheduler's working set for one cycle. One row per active
    /// (subscriber, account) pair — callers that need "per account"
    /// semantics (the poll itself) group by `account` and reuse the first
    /// row's cursor, since the cursor is logically per-account.
    pub async fn all_active(&self) -> Result<Vec<Watch>, StorageError> {
        let rows = sqlx::query_as::<_, WatchRow>(
            r#"
            SELECT id, chat_id, wallet_address, private_key_encrypted, nickname,
                   last_signature, monitoring_start_time
            FROM monitored_wallets
            WHERE is_active
            ORDER BY wallet_address, id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Watch::from).collect())
    }

    /// Advances the cursor for every active watch on `account` at once: the
    /// cursor is conceptually per-account, but is stored per-row so that a
    /// subscriber added later still seeds from the account's existing
    /// history rather than re-reading it from genesis.
    pub async fn advance_cursor(&self, account: &str, signature: &str) -> Result<(), StorageError> {
        sqlx::query(
            "UPDATE monitored_wallets SET last_signature = $2, updated_at = now() WHERE wallet_address = $1 AND is_active",
        )
        .bind(account)
        .bind(signature)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn read_setting(&self, key: &str, default: &str) -> Result<String, StorageError> {
        let value: Option<String> =
            sqlx::query_scalar("SELECT setting_value FROM settings WHERE setting_key = $1")
                .bind(key)
                .fetch_optional(&self.pool)
                .await?;
        Ok(value.unwrap_or_else(|| default.to_string()))
    }

    pub async fn write_setting(&self, key: &str, value: &str) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            INSERT INTO settings (setting_key, setting_value, updated_at)
            VALUES ($1, $2, now())
            ON CONFLICT (setting_key)
            DO UPDATE SET setting_value = EXCLUDED.setting_value, updated_at = now()
            "#,
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Administrative re-assignment of every active watch to `subscriber`,
    /// for operator handoff. Collapses any watch the new owner already
    /// held on the same account rather than leaving duplicate active rows.
    pub async fn transfer_all_to(&self, subscriber: i64) -> Result<TransferStats, StorageError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            UPDATE monitored_wallets AS w
            SET is_active = FALSE, updated_at = now()
            WHERE w.is_active
              AND w.chat_id != $1
              AND EXISTS (
                  SELECT 1 FROM monitored_wallets AS other
                  WHERE other.chat_id = $1
                    AND other.wallet_address = w.wallet_address
                    AND other.is_active
              )
            "#,
        )
        .bind(subscriber)
        .execute(&mut *tx)
        .await?;

        let result = sqlx::query(
            "UPDATE monitored_wallets SET chat_id = $1, updated_at = now() WHERE is_active AND chat_id != $1",
        )
        .bind(subscriber)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(TransferStats {
            transferred: result.rows_affected(),
        })
    }
}

#[derive(sqlx::FromRow)]
struct WatchRow {
    id: i64,
    chat_id: i64,
    wallet_address: String,
    private_key_encrypted: String,
    nickname: Option<String>,
    last_signature: Option<String>,
    monitoring_start_time: i64,
}

impl From<WatchRow> for Watch {
    fn from(row: WatchRow) -> Self {
        Watch {
            id: row.id,
            subscriber: row.chat_id,
            account: row.wallet_address,
            credential_encrypted: row.private_key_encrypted,
            nickname: row.nickname,
            cursor: row.last_signature,
            inception_time: row.monitoring_start_time,
        }
    }
}

/// Groups the flat per-subscriber watch rows the registry returns into one
/// entry per distinct account, which is the unit the scheduler actually
/// polls. The cursor and inception time are taken from the earliest watch
/// on the account, since that is the row whose history is authoritative.
pub fn group_by_account(watches: &[Watch]) -> Vec<AccountGroup<'_>> {
    use std::collections::BTreeMap;

    let mut groups: BTreeMap<&str, Vec<&Watch>> = BTreeMap::new();
    for w in watches {
        groups.entry(w.account.as_str()).or_default().push(w);
    }

    groups
        .into_iter()
        .map(|(account, watches)| {
            let cursor = watches
                .iter()
                .filter_map(|w| w.cursor.as_deref())
                .next();
            let inception_time = watches.iter().map(|w| w.inception_time).min().unwrap_or(0);
            AccountGroup {
                account,
                cursor,
                inception_time,
                watches,
            }
        })
        .collect()
}

#[derive(Debug)]
pub struct AccountGroup<'a> {
    pub account: &'a str,
    pub cursor: Option<&'a str>,
    pub inception_time: i64,
    pub watches: Vec<&'a Watch>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn watch(account: &str, subscriber: i64, cursor: Option<&str>, inception: i64) -> Watch {
        Watch {
            id: subscriber,
            subscriber,
            account: account.to_string(),
            credential_encrypted: "enc".to_string(),
            nickname: None,
            cursor: cursor.map(String::from),
            inception_time: inception,
        }
    }

    #[test]
    fn groups_multiple_subscribers_on_one_account() {
        let watches = vec![
            watch("AAA", 1, Some("sig1"), 100),
            watch("AAA", 2, Some("sig1"), 200),
            watch("BBB", 1, None, 50),
        ];
        let groups = group_by_account(&watches);
        assert_eq!(groups.len(), 2);
        let aaa = groups.iter().find(|g| g.account == "AAA").unwrap();
        assert_eq!(aaa.watches.len(), 2);
        assert_eq!(aaa.inception_time, 100);
    }

    #[test]
    fn rejects_non_base58_pubkey_before_touching_storage() {
        use solana_sdk::pubkey::Pubkey;
        use std::str::FromStr;

        assert!(Pubkey::from_str("not-a-real-pubkey").is_err());
        assert!(Pubkey::from_str("11111111111111111111111111111111").is_ok());
    }
}

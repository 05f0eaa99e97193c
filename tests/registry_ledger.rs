//! Fixture-driven storage-layer tests for the watch registry and ledger.
//! `#[sqlx::test]` spins up a fresh, migrated database per test (migrations
//! auto-discovered from `./migrations`), so these exercise the real
//! uniqueness constraints the pure unit tests in `src/registry.rs` /
//! `src/ledger.rs` can't.

use eyre::Result;
use sqlx::PgPool;

use sol_watch_core::classifier::ClassifiedKind;
use sol_watch_core::ledger::{ClaimOutcome, Ledger};
use sol_watch_core::registry::{AddOutcome, RemoveOutcome, WatchRegistry};

const ACCOUNT_A: &str = "11111111111111111111111111111111"; // system program
const ACCOUNT_B: &str = "So11111111111111111111111111111111111111112"; // wrapped SOL mint

#[sqlx::test]
async fn add_is_idempotent_per_subscriber_account_pair(pool: PgPool) -> Result<()> {
    let registry = WatchRegistry::new(pool);

    let first = registry.add(1, ACCOUNT_A, "enc-blob", None, 1_000).await?;
    assert_eq!(first, AddOutcome::Added);

    let second = registry.add(1, ACCOUNT_A, "enc-blob", None, 1_000).await?;
    assert_eq!(second, AddOutcome::Duplicate);

    // A different subscriber on the same account is not a duplicate: a
    // single account may have multiple subscribers.
    let third = registry.add(2, ACCOUNT_A, "other-blob", Some("nick"), 1_000).await?;
    assert_eq!(third, AddOutcome::Added);

    let watches = registry.all_active().await?;
    assert_eq!(watches.len(), 2);

    Ok(())
}

#[sqlx::test]
async fn add_rejects_malformed_pubkey_before_touching_storage(pool: PgPool) -> Result<()> {
    let registry = WatchRegistry::new(pool);
    let result = registry.add(1, "not-a-real-pubkey", "enc", None, 1_000).await;
    assert!(result.is_err());

    let watches = registry.all_active().await?;
    assert!(watches.is_empty());
    Ok(())
}

#[sqlx::test]
async fn remove_deactivates_and_reports_not_found_on_retry(pool: PgPool) -> Result<()> {
    let registry = WatchRegistry::new(pool);
    registry.add(1, ACCOUNT_A, "enc", None, 1_000).await?;

    let removed = registry.remove(1, ACCOUNT_A).await?;
    assert_eq!(removed, RemoveOutcome::Removed);

    let again = registry.remove(1, ACCOUNT_A).await?;
    assert_eq!(again, RemoveOutcome::NotFound);

    assert!(registry.all_active().await?.is_empty());

    // Removing while active on the account frees the slot for a re-add.
    let readded = registry.add(1, ACCOUNT_A, "enc2", None, 2_000).await?;
    assert_eq!(readded, AddOutcome::Added);

    Ok(())
}

#[sqlx::test]
async fn advance_cursor_updates_every_active_watch_on_the_account(pool: PgPool) -> Result<()> {
    let registry = WatchRegistry::new(pool);
    registry.add(1, ACCOUNT_A, "enc", None, 1_000).await?;
    registry.add(2, ACCOUNT_A, "enc", None, 1_000).await?;

    registry.advance_cursor(ACCOUNT_A, "sig-123").await?;

    let watches = registry.all_active().await?;
    assert_eq!(watches.len(), 2);
    assert!(watches.iter().all(|w| w.cursor.as_deref() == Some("sig-123")));

    Ok(())
}

#[sqlx::test]
async fn settings_round_trip_and_default_when_absent(pool: PgPool) -> Result<()> {
    let registry = WatchRegistry::new(pool);

    let default = registry.read_setting("min_notification_amount", "0.0001").await?;
    assert_eq!(default, "0.0001");

    registry.write_setting("min_notification_amount", "0.01").await?;
    let updated = registry.read_setting("min_notification_amount", "0.0001").await?;
    assert_eq!(updated, "0.01");

    // Writing again overwrites rather than erroring (ON CONFLICT DO UPDATE).
    registry.write_setting("min_notification_amount", "0.02").await?;
    let twice_updated = registry.read_setting("min_notification_amount", "0.0001").await?;
    assert_eq!(twice_updated, "0.02");

    Ok(())
}

#[sqlx::test]
async fn transfer_all_to_reassigns_without_leaving_duplicate_active_rows(pool: PgPool) -> Result<()> {
    let registry = WatchRegistry::new(pool);
    registry.add(1, ACCOUNT_A, "enc", None, 1_000).await?;
    registry.add(2, ACCOUNT_A, "enc", None, 1_000).await?; // already shared: must collapse, not duplicate
    registry.add(1, ACCOUNT_B, "enc", None, 1_000).await?; // solely owned by 1: must actually transfer

    let stats = registry.transfer_all_to(2).await?;
    assert_eq!(stats.transferred, 1);

    let watches = registry.all_active().await?;
    // Both accounts now belong only to subscriber 2, one row each.
    assert_eq!(watches.len(), 2);
    assert!(watches.iter().all(|w| w.subscriber == 2));
    let accounts: std::collections::BTreeSet<_> =
        watches.iter().map(|w| w.account.as_str()).collect();
    assert_eq!(accounts.len(), 2);

    Ok(())
}

#[sqlx::test]
async fn ledger_claim_is_insert_if_absent_across_concurrent_callers(pool: PgPool) -> Result<()> {
    let ledger = Ledger::new(pool);

    assert!(!ledger.contains("sig-abc").await?);

    let first = ledger
        .claim("sig-abc", 1, ACCOUNT_A, 0.5, ClassifiedKind::Receive, false, Some(1_700_000_000))
        .await?;
    assert_eq!(first, ClaimOutcome::Claimed);
    assert!(ledger.contains("sig-abc").await?);

    // A second claim for the same signature — the scenario where a
    // restarted cycle re-discovers it — must not re-claim.
    let second = ledger
        .claim("sig-abc", 2, ACCOUNT_A, 0.5, ClassifiedKind::Receive, false, Some(1_700_000_000))
        .await?;
    assert_eq!(second, ClaimOutcome::AlreadyClaimed);

    Ok(())
}

#[sqlx::test]
async fn dust_signatures_are_recorded_once_not_per_subscriber(pool: PgPool) -> Result<()> {
    let ledger = Ledger::new(pool);

    let claim = ledger
        .claim("sig-dust", 1, ACCOUNT_A, 0.00005, ClassifiedKind::Generic, true, Some(1_700_000_000))
        .await?;
    assert_eq!(claim, ClaimOutcome::Claimed);

    // A second subscriber's pass over the same signature must not create a
    // second ledger row.
    let repeat = ledger
        .claim("sig-dust", 2, ACCOUNT_A, 0.00005, ClassifiedKind::Generic, true, Some(1_700_000_000))
        .await?;
    assert_eq!(repeat, ClaimOutcome::AlreadyClaimed);

    Ok(())
}

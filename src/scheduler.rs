//! The poll scheduler.
//!
//! The heart of the core: a single long-running cyclic task that asks the
//! watch registry for the working set, walks it in controller-sized
//! batches, and for each account discovers, classifies, and routes newly
//! observed signatures. The rate controller is consulted for pacing at
//! every suspension point; the scheduler itself never sleeps on its own
//! judgment.

use std::sync::Arc;

use futures::stream::{self, StreamExt};
use serde_json::json;

use crate::classifier;
use crate::config::{BATCH_DELAY, POLLING_INTERVAL, SIGNATURES_PER_ACCOUNT};
use crate::error::RpcError;
use crate::ledger::{ClaimOutcome, Ledger};
use crate::rate_controller::{batch_delay_factor, RateController};
use crate::registry::{group_by_account, AccountGroup, WatchRegistry};
use crate::rpc::types::{EncodedTransactionResult, SignatureInfo};
use crate::rpc::RpcClient;
use crate::router::route;

const MIN_AMOUNT_SETTING_KEY: &str = "min_notification_amount";

pub struct PollScheduler {
    rpc: Arc<RpcClient>,
    rate_controller: Arc<RateController>,
    registry: Arc<WatchRegistry>,
    ledger: Arc<Ledger>,
    admin_id: i64,
}

impl PollScheduler {
    pub fn new(
        rpc: Arc<RpcClient>,
        rate_controller: Arc<RateController>,
        registry: Arc<WatchRegistry>,
        ledger: Arc<Ledger>,
        admin_id: i64,
    ) -> Self {
        Self {
            rpc,
            rate_controller,
            registry,
            ledger,
            admin_id,
        }
    }

    /// Runs cycles forever. The supervisor is what notices if this
    /// future's task dies and respawns it; this loop itself never returns
    /// under normal operation.
    pub async fn run(&self) -> ! {
        loop {
            if let Err(err) = self.run_cycle().await {
                tracing::error!(error = %err, "poll cycle failed; continuing to next cycle");
            }
        }
    }

    /// One full pass over the registry: fetch the working set, batch it,
    /// poll each account, and pace between batches. Returns the number of
    /// notifications routed, mainly so tests and the supervisor's log line
    /// have something concrete to report.
    pub async fn run_cycle(&self) -> Result<usize, crate::error::StorageError> {
        let watches = self.registry.all_active().await?;
        if watches.is_empty() {
            tokio::time::sleep(POLLING_INTERVAL).await;
            return Ok(0);
        }

        let groups = group_by_account(&watches);
        let batch_size = self.rate_controller.optimal_batch_size().await;
        let mode = self.rate_controller.mode().await;

        let min_amount: f64 = self
            .registry
            .read_setting(
                MIN_AMOUNT_SETTING_KEY,
                &crate::config::DEFAULT_MIN_NOTIFICATION_AMOUNT.to_string(),
            )
            .await?
            .parse()
            .unwrap_or(crate::config::DEFAULT_MIN_NOTIFICATION_AMOUNT);

        let mut total_notified = 0usize;

        for (batch_index, batch) in groups.chunks(batch_size.max(1)).enumerate() {
            for group in batch {
                match self.check_account(group, min_amount).await {
                    Ok(notified) => total_notified += notified,
                    Err(err) => {
                        tracing::warn!(account = group.account, error = %err, "per-account poll failed");
                    }
                }
            }

            if batch_index + 1 < groups.len().div_ceil(batch_size.max(1)) {
                let delay = BATCH_DELAY.mul_f64(batch_delay_factor(mode));
                tokio::time::sleep(delay).await;
            }
        }

        tokio::time::sleep(POLLING_INTERVAL).await;
        Ok(total_notified)
    }

    /// Per-account check: pull the recent signature list, compare against
    /// the stored cursor, and advance the cursor before fanning out
    /// whatever is genuinely new.
    async fn check_account(
        &self,
        group: &AccountGroup<'_>,
        min_amount: f64,
    ) -> Result<usize, RpcError> {
        let params = json!([group.account, { "limit": SIGNATURES_PER_ACCOUNT }]);
        let raw = self.rpc.call("getSignaturesForAddress", params).await?;

        let signatures: Vec<SignatureInfo> = serde_json::from_value(raw)
            .map_err(|e| RpcError::MalformedResult(e.to_string()))?;

        if signatures.is_empty() {
            return Ok(0);
        }

        let newest = signatures[0].signature.clone();

        if group.cursor.is_none() {
            // First ever poll: seed the cursor, emit nothing. Otherwise a
            // freshly added watch would dump its whole recent-signatures
            // window as notifications.
            self.registry.advance_cursor(group.account, &newest).await.map_err(|e| {
                RpcError::MalformedResult(format!("failed to seed cursor: {e}"))
            })?;
            return Ok(0);
        }

        let fresh = new_signatures(&signatures, group.cursor, group.inception_time);
        if fresh.is_empty() {
            return Ok(0);
        }

        // Cursor advances before emission: a crash after this point only
        // risks losing a few just-discovered notifications, not replaying
        // ones already seen, and the ledger's uniqueness constraint covers
        // the rest.
        self.registry
            .advance_cursor(group.account, &newest)
            .await
            .map_err(|e| RpcError::MalformedResult(format!("failed to advance cursor: {e}")))?;

        let account = group.account.to_string();
        let subscribers: Vec<i64> = group.watches.iter().map(|w| w.subscriber).collect();
        let first_subscriber = subscribers.first().copied().unwrap_or(self.admin_id);
        let admin_watches = subscribers.contains(&self.admin_id);
        let others_watch = subscribers.iter().any(|s| *s != self.admin_id);

        // Chronological order: `fresh` was discovered newest-first, so
        // reverse it before fanning emissions out.
        let sigs: Vec<String> = fresh.iter().rev().map(|s| s.signature.clone()).collect();

        let results = stream::iter(sigs)
            .map(|sig| {
                let account = account.clone();
                async move {
                    self.process_signature(
                        &sig,
                        &account,
                        first_subscriber,
                        admin_watches,
                        others_watch,
                        min_amount,
                    )
                    .await
                }
            })
            .buffer_unordered(SIGNATURES_PER_ACCOUNT)
            .collect::<Vec<_>>()
            .await;

        let mut notified = 0usize;
        for r in results {
            match r {
                Ok(true) => notified += 1,
                Ok(false) => {}
                Err(err) => tracing::warn!(account = %account, error = %err, "signature processing failed"),
            }
        }

        Ok(notified)
    }

    /// Per-signature processing. Returns whether a notification was
    /// actually routed (vs. skipped as a duplicate or dust).
    async fn process_signature(
        &self,
        signature: &str,
        account: &str,
        first_subscriber: i64,
        admin_watches: bool,
        others_watch: bool,
        min_amount: f64,
    ) -> Result<bool, RpcError> {
        if self
            .ledger
            .contains(signature)
            .await
            .map_err(|e| RpcError::MalformedResult(e.to_string()))?
        {
            return Ok(false);
        }

        let params = json!([
            signature,
            { "encoding": "json", "maxSupportedTransactionVersion": 0 }
        ]);
        let raw = self.rpc.call("getTransaction", params).await?;
        let tx: EncodedTransactionResult = serde_json::from_value(raw)
            .map_err(|e| RpcError::MalformedResult(e.to_string()))?;

        let event = classifier::classify(&tx, account)
            .map_err(|e| RpcError::MalformedResult(e.to_string()))?;

        let dust = event.amount_sol.abs() < min_amount;

        let claim = self
            .ledger
            .claim(
                signature,
                first_subscriber,
                account,
                event.amount_sol,
                event.kind,
                dust,
                tx.block_time,
            )
            .await
            .map_err(|e| RpcError::MalformedResult(e.to_string()))?;

        if claim == ClaimOutcome::AlreadyClaimed || dust {
            return Ok(false);
        }

        let routed = route(account, &event, signature, tx.block_time, admin_watches, others_watch);
        for r in &routed {
            tracing::info!(account, signature, destination = ?r.destination, "notification routed");
        }
        Ok(!routed.is_empty())
    }
}

/// Pure helper: walks `signatures` (newest-first) from index 0, collecting
/// each entry until the cursor is hit (exclusive), then discarding any
/// whose `blockTime` predates `inception_time`. The result is still
/// newest-first; callers reverse it before emitting in chronological order.
pub fn new_signatures<'a>(
    signatures: &'a [SignatureInfo],
    cursor: Option<&str>,
    inception_time: i64,
) -> Vec<&'a SignatureInfo> {
    let Some(cursor) = cursor else {
        return Vec::new();
    };

    let mut out = Vec::new();
    for sig in signatures {
        if sig.signature == cursor {
            break;
        }
        out.push(sig);
    }

    out.into_iter()
        .filter(|s| s.block_time.unwrap_or(i64::MAX) >= inception_time)
        .collect()
}

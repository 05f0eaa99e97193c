//! The transaction classifier.
//!
//! A pure function of the transaction payload and the watched account: no
//! external state (ledger, thresholds, registry) is consulted here. Dust
//! thresholding is applied by the caller on top of this output.

use crate::error::ClassifyError;
use crate::rpc::types::EncodedTransactionResult;

const LAMPORTS_PER_SOL: f64 = 1_000_000_000.0;

/// DEX/AMM program ids that mark a transaction as a `Trade` outright.
const TRADING_PROGRAMS: &[&str] = &[
    "675kPX9MHTjS2zt1qfr1NYHuzeLXfQM9H24wFSUt1Mp8", // Raydium V4
    "CAMMCzo5YL8w4VFF8KVHrK22GGUsp5VTaW7grrKgrWqK", // Raydium CLMM
    "9W959DqEETiGZocYWCQPaJ6sBmUzgfxXfqGeTEdp3aQP", // Orca
    "whirLbMiicVdio4qvUfM5KAg6Ct8VwpYzGff3uctyCc",  // Orca Whirlpool
    "DjVE6JNiYqPL2QXyCUUh8rNjHrbz9hXHNYt99MQ59qw1",  // Orca V1
    "JUP4Fb2cqiRUcaTHdrPC8h2gNsA2ETXiPDD33WcGuJB",  // Jupiter V4
    "JUP6LkbZbjS1jKKwapdHNy74zcZ3tLUZoi5QNyVTaV4",  // Jupiter V6
    "PhoeNiXZ8ByJGLkxNfZRnkUfjvmuYqLR89jjFHGqdXY",  // Phoenix
    "MarBmsSgKXdrN1egZf5sqe1TMai9K1rChYNDJgjq7aD",  // Mango
    "5Q544fKrFoe6tsEbD7S8EmxGTJYAKtTVhAW5Q5pge4j1",  // GooseFX
    "SSwpkEEcbUqx4vtoEByFjSkhKdCT862DNVb52nZg1UZ",   // Saber
    "AMM55ShdkoGRB5jVYPjWzTURSGdQnQ8LbtE4jktMTG8P",  // Aldrin
    "EhYXEhg6JT5p2ZnhbRSFzKHigPuKFZuL9EGo7ZtDC5VY",  // Serum V1
    "srmqPvymJeFKQ4zGQed1GFppgkRHL9kaELCbyksJtPX",   // Serum V3
    "22Y43yTVxuUkoRKdm9thyRhQ3SdgQS7c7kB6UNCiaczD",  // Meteora
    "LBUZKhRxPF3XUpBCjp4YzTKgLccjZhTSDM9YuVaPwxo",   // Lifinity V1
    "EewxydAPCCVuNEyrVN68PuSYdQ7wKn27V9Gjeoi8dy3S",  // Lifinity V2
];

const SPL_TOKEN_PROGRAM: &str = "TokenkegQfeZyiNwAJbNbGKPFXCWuBvf9Ss623VQ5DA";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassifiedKind {
    Receive,
    Send,
    Trade,
    Generic,
}

#[derive(Debug, Clone)]
pub struct ClassifiedEvent {
    pub delta_lamports: i64,
    pub amount_sol: f64,
    pub kind: ClassifiedKind,
    pub counterparty: Option<String>,
}

/// Classifies `tx` from the perspective of `watched_account`. Pure function
/// of its inputs: calling it twice on the same payload yields identical
/// output.
pub fn classify(
    tx: &EncodedTransactionResult,
    watched_account: &str,
) -> Result<ClassifiedEvent, ClassifyError> {
    let account_keys = &tx.transaction.message.account_keys;
    let Some(index) = account_keys.iter().position(|k| k == watched_account) else {
        // Absent from accountKeys is not malformed, it just carries no
        // signal for this account — (0, generic), not an error.
        return Ok(ClassifiedEvent {
            delta_lamports: 0,
            amount_sol: 0.0,
            kind: ClassifiedKind::Generic,
            counterparty: None,
        });
    };

    let pre = *tx.meta.pre_balances.get(index).ok_or(ClassifyError::MissingBalances)?;
    let post = *tx.meta.post_balances.get(index).ok_or(ClassifyError::MissingBalances)?;
    let delta_lamports = post as i64 - pre as i64;
    let amount_sol = delta_lamports as f64 / LAMPORTS_PER_SOL;

    let kind = if is_trading_instruction(tx) {
        ClassifiedKind::Trade
    } else if is_token_swap(tx) {
        ClassifiedKind::Trade
    } else if delta_lamports > 0 {
        ClassifiedKind::Receive
    } else if delta_lamports < 0 {
        ClassifiedKind::Send
    } else {
        ClassifiedKind::Generic
    };

    let counterparty = if kind == ClassifiedKind::Send {
        find_counterparty(tx, index)
    } else {
        None
    };

    Ok(ClassifiedEvent {
        delta_lamports,
        amount_sol,
        kind,
        counterparty,
    })
}

fn is_trading_instruction(tx: &EncodedTransactionResult) -> bool {
    tx.transaction
        .message
        .instructions
        .iter()
        .any(|ix| TRADING_PROGRAMS.contains(&ix.program_id.as_str()))
}

fn is_token_swap(tx: &EncodedTransactionResult) -> bool {
    let touches_token_program = tx
        .transaction
        .message
        .instructions
        .iter()
        .any(|ix| ix.program_id == SPL_TOKEN_PROGRAM);

    if !touches_token_program {
        return false;
    }

    tx.meta.pre_token_balances.len() >= 2 || tx.meta.post_token_balances.len() >= 2
}

fn find_counterparty(tx: &EncodedTransactionResult, watched_index: usize) -> Option<String> {
    let account_keys = &tx.transaction.message.account_keys;
    for (i, key) in account_keys.iter().enumerate() {
        if i == watched_index {
            continue;
        }
        let pre = *tx.meta.pre_balances.get(i)?;
        let post = *tx.meta.post_balances.get(i)?;
        if post as i64 - pre as i64 > 0 {
            return Some(key.clone());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::types::{InnerTransaction, Instruction, TransactionMessage, TransactionMeta};

    fn tx(
        account_keys: Vec<&str>,
        pre: Vec<u64>,
        post: Vec<u64>,
        program_ids: Vec<&str>,
    ) -> EncodedTransactionResult {
        EncodedTransactionResult {
            block_time: Some(1_700_000_000),
            meta: TransactionMeta {
                pre_balances: pre,
                post_balances: post,
                pre_token_balances: vec![],
                post_token_balances: vec![],
            },
            transaction: InnerTransaction {
                message: TransactionMessage {
                    account_keys: account_keys.into_iter().map(String::from).collect(),
                    instructions: program_ids
                        .into_iter()
                        .map(|p| Instruction {
                            program_id: p.to_string(),
                        })
                        .collect(),
                },
            },
        }
    }

    #[test]
    fn classifies_receive() {
        let t = tx(vec!["watched", "other"], vec![100, 50], vec![200, 50], vec![]);
        let event = classify(&t, "watched").unwrap();
        assert_eq!(event.kind, ClassifiedKind::Receive);
        assert_eq!(event.delta_lamports, 100);
    }

    #[test]
    fn classifies_send_with_counterparty() {
        let t = tx(
            vec!["watched", "receiver"],
            vec![200, 50],
            vec![100, 150],
            vec![],
        );
        let event = classify(&t, "watched").unwrap();
        assert_eq!(event.kind, ClassifiedKind::Send);
        assert_eq!(event.counterparty.as_deref(), Some("receiver"));
    }

    #[test]
    fn dex_program_forces_trade_even_on_receive() {
        let t = tx(
            vec!["watched", "other"],
            vec![100, 50],
            vec![200, 50],
            vec!["675kPX9MHTjS2zt1qfr1NYHuzeLXfQM9H24wFSUt1Mp8"],
        );
        let event = classify(&t, "watched").unwrap();
        assert_eq!(event.kind, ClassifiedKind::Trade);
    }

    #[test]
    fn missing_account_yields_zero_generic_not_an_error() {
        let t = tx(vec!["someone_else"], vec![100], vec![200], vec![]);
        let event = classify(&t, "watched").unwrap();
        assert_eq!(event.delta_lamports, 0);
        assert_eq!(event.kind, ClassifiedKind::Generic);
    }

    #[test]
    fn classification_is_deterministic() {
        let t = tx(vec!["watched", "other"], vec![100, 50], vec![90, 60], vec![]);
        let first = classify(&t, "watched").unwrap();
        let second = classify(&t, "watched").unwrap();
        assert_eq!(first.delta_lamports, second.delta_lamports);
        assert_eq!(first.kind, second.kind);
    }
}

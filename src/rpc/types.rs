//! Wire shapes for the three JSON-RPC methods the core depends on.
//! Kept deliberately narrow: only the fields the scheduler and classifier
//! actually read are modeled; everything else in the RPC response is
//! ignored rather than rejected.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Serialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: &'static str,
    pub params: Value,
}

impl JsonRpcRequest {
    pub fn new(method: &'static str, params: Value) -> Self {
        Self {
            jsonrpc: "2.0",
            id: 1,
            method,
            params,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct JsonRpcResponse {
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<JsonRpcErrorObject>,
}

#[derive(Debug, Deserialize)]
pub struct JsonRpcErrorObject {
    pub code: i64,
    pub message: String,
}

/// One entry of `getSignaturesForAddress`'s result array.
#[derive(Debug, Clone, Deserialize)]
pub struct SignatureInfo {
    pub signature: String,
    #[serde(default)]
    pub slot: Option<u64>,
    #[serde(rename = "blockTime", default)]
    pub block_time: Option<i64>,
    #[serde(default)]
    pub err: Option<Value>,
}

/// The subset of `getTransaction`'s `result` the classifier needs.
#[derive(Debug, Clone, Deserialize)]
pub struct EncodedTransactionResult {
    #[serde(rename = "blockTime", default)]
    pub block_time: Option<i64>,
    pub meta: TransactionMeta,
    pub transaction: InnerTransaction,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TransactionMeta {
    #[serde(rename = "preBalances", default)]
    pub pre_balances: Vec<u64>,
    #[serde(rename = "postBalances", default)]
    pub post_balances: Vec<u64>,
    #[serde(rename = "preTokenBalances", default)]
    pub pre_token_balances: Vec<Value>,
    #[serde(rename = "postTokenBalances", default)]
    pub post_token_balances: Vec<Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InnerTransaction {
    pub message: TransactionMessage,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TransactionMessage {
    #[serde(rename = "accountKeys", default)]
    pub account_keys: Vec<String>,
    #[serde(default)]
    pub instructions: Vec<Instruction>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Instruction {
    #[serde(rename = "programId", default)]
    pub program_id: String,
}

//! The RPC client.
//!
//! A thin JSON-RPC 2.0 client over HTTP. Every attempt — successful or not —
//! is classified and reported to the `RateController` so that pacing
//! decisions always flow through the one backpressure authority in the
//! system. Retries are bounded (two attempts by default) with class-specific
//! backoff curves.

pub mod types;

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::error::RpcError;
use crate::rate_controller::RateController;
use types::{JsonRpcRequest, JsonRpcResponse};

const CALL_DEADLINE: Duration = Duration::from_secs(20);
const DEFAULT_MAX_RETRIES: u32 = 2;

pub struct RpcClient {
    http: reqwest::Client,
    url: String,
    rate_controller: Arc<RateController>,
}

impl RpcClient {
    pub fn new(url: impl Into<String>, rate_controller: Arc<RateController>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(CALL_DEADLINE)
            .build()
            .expect("reqwest client builds with static config");
        Self {
            http,
            url: url.into(),
            rate_controller,
        }
    }

    /// Issue `method(params)`, retrying with a class-specific backoff.
    pub async fn call(&self, method: &'static str, params: Value) -> Result<Value, RpcError> {
        self.call_with_retries(method, params, DEFAULT_MAX_RETRIES)
            .await
    }

    pub async fn call_with_retries(
        &self,
        method: &'static str,
        params: Value,
        max_retries: u32,
    ) -> Result<Value, RpcError> {
        let mut last_err = RpcError::Network("no attempts made".to_string());

        for attempt in 0..max_retries {
            self.rate_controller.acquire().await;

            match self.attempt(method, params.clone()).await {
                Ok(value) => {
                    self.rate_controller.on_success().await;
                    return Ok(value);
                }
                Err(err) => {
                    let is_last = attempt + 1 == max_retries;

                    match &err {
                        RpcError::RateLimited => {
                            self.rate_controller.on_rate_limit().await;
                            if !is_last {
                                let extra =
                                    Duration::from_secs_f64((5.0 * (attempt as f64 + 1.0)).min(30.0));
                                tracing::warn!(
                                    attempt,
                                    method,
                                    wait_s = extra.as_secs_f64(),
                                    "rate limited, retrying"
                                );
                                tokio::time::sleep(extra).await;
                            }
                        }
                        RpcError::MalformedResult(_) | RpcError::RpcObject { .. } | RpcError::Other(_) => {
                            // Not retryable: the endpoint answered, just not usefully.
                            return Err(err);
                        }
                        other if other.is_network_like() => {
                            self.rate_controller.on_network_error().await;
                            let wait = match other {
                                RpcError::ServerTransient { .. } => {
                                    Duration::from_secs_f64(2f64.powi(attempt as i32).min(15.0))
                                }
                                RpcError::Timeout(_) => Duration::from_secs_f64(
                                    (3.0 * (attempt as f64 + 1.0)).min(20.0),
                                ),
                                RpcError::Network(_) => {
                                    Duration::from_secs_f64(2f64.powi(attempt as i32).min(10.0))
                                }
                                _ => unreachable!("is_network_like only matches these three variants"),
                            };
                            if !is_last {
                                tracing::warn!(
                                    attempt,
                                    method,
                                    error = %other,
                                    wait_s = wait.as_secs_f64(),
                                    "network error, retrying"
                                );
                                tokio::time::sleep(wait).await;
                            }
                        }
                        _ => unreachable!("all RpcError variants are covered above"),
                    }

                    last_err = err;
                    if is_last {
                        tracing::error!(method, attempts = max_retries, "all RPC attempts failed");
                        return Err(last_err);
                    }
                }
            }
        }

        Err(last_err)
    }

    async fn attempt(&self, method: &'static str, params: Value) -> Result<Value, RpcError> {
        let body = JsonRpcRequest::new(method, params);

        let response = tokio::time::timeout(CALL_DEADLINE, self.http.post(&self.url).json(&body).send())
            .await
            .map_err(|_| RpcError::Timeout(CALL_DEADLINE))?
            .map_err(classify_transport_error)?;

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(RpcError::RateLimited);
        }
        if status.is_server_error() {
            return Err(RpcError::ServerTransient {
                status: status.as_u16(),
            });
        }
        if !status.is_success() {
            return Err(RpcError::Other(status.as_u16()));
        }

        let parsed: JsonRpcResponse = response
            .json()
            .await
            .map_err(|e| RpcError::MalformedResult(e.to_string()))?;

        if let Some(err) = parsed.error {
            return Err(RpcError::RpcObject {
                code: err.code,
                message: err.message,
            });
        }

        parsed
            .result
            .ok_or_else(|| RpcError::MalformedResult("missing `result` field".to_string()))
    }
}

fn classify_transport_error(err: reqwest::Error) -> RpcError {
    if err.is_timeout() {
        RpcError::Timeout(CALL_DEADLINE)
    } else {
        RpcError::Network(err.to_string())
    }
}

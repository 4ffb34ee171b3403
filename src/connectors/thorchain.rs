//! Thorchain swap venue client
//!
//! Talks to a THORNode REST endpoint for swap quotes, inbound address
//! discovery and swap status. All THORNode amounts are 1e8 fixed-point
//! integers regardless of the underlying chain's native decimals; values
//! are converted to coin units at this boundary.

use crate::config::ThorchainConfig;
use crate::connectors::traits::{SwapQuote, SwapQuoteRequest, SwapStatus, SwapVenue};
use crate::{ArbitrageError, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, trace};

/// Fixed-point base for all THORNode amounts
const THOR_BASE_UNITS: f64 = 1e8;

/// Client for a single THORNode endpoint
pub struct ThorchainClient {
    client: reqwest::Client,
    base_url: String,
}

impl ThorchainClient {
    /// Create a client for the configured node
    pub fn new(config: &ThorchainConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| ArbitrageError::RpcConnection(format!("Failed to build client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.node_url.trim_end_matches('/').to_string(),
        })
    }

    async fn get(&self, path: &str) -> Result<reqwest::Response> {
        let url = format!("{}{}", self.base_url, path);
        trace!(%url, "THORNode request");

        self.client.get(&url).send().await.map_err(|e| {
            if e.is_timeout() {
                ArbitrageError::RpcTimeout {
                    method: path.to_string(),
                }
                .into()
            } else {
                ArbitrageError::RpcConnection(format!("{}: {}", path, e)).into()
            }
        })
    }

    async fn get_json(&self, path: &str) -> Result<Value> {
        let response = self.get(path).await?;
        let status = response.status();

        if status.is_server_error() {
            return Err(ArbitrageError::VenueBusy(format!(
                "THORNode returned {} for {}",
                status, path
            ))
            .into());
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| ArbitrageError::MalformedResponse {
                method: path.to_string(),
                detail: format!("invalid JSON body: {}", e),
            })?;

        Ok(body)
    }

    fn parse_quote(path: &str, body: &Value) -> Result<SwapQuote> {
        if let Some(error) = body.get("error").and_then(Value::as_str) {
            return Err(ArbitrageError::SwapQuote(error.to_string()).into());
        }

        Ok(SwapQuote {
            expected_amount_out: Self::fixed_point(path, body, "expected_amount_out")?,
            outbound_fee: body
                .get("fees")
                .map(|fees| Self::fixed_point(path, fees, "outbound"))
                .transpose()?
                .unwrap_or(0.0),
            inbound_address: Self::field_str(path, body, "inbound_address")?,
            memo: Self::field_str(path, body, "memo")?,
            expiry_secs: body.get("expiry").and_then(Value::as_u64).unwrap_or(0),
        })
    }

    fn parse_status(body: &Value) -> SwapStatus {
        let stages = body.get("stages");
        let inbound_observed = stages
            .and_then(|s| s.get("inbound_observed"))
            .and_then(|s| s.get("completed"))
            .and_then(Value::as_bool)
            .unwrap_or(false);

        if !inbound_observed {
            return SwapStatus::Pending;
        }

        // An outbound carrying a REFUND memo means the swap bounced
        if let Some(out_txs) = body.get("out_txs").and_then(Value::as_array) {
            for out in out_txs {
                let memo = out.get("memo").and_then(Value::as_str).unwrap_or("");
                let out_id = out
                    .get("id")
                    .and_then(Value::as_str)
                    .map(str::to_string);
                if memo.starts_with("REFUND") {
                    return SwapStatus::Refunded {
                        refund_txid: out_id,
                    };
                }
                return SwapStatus::Completed { out_txid: out_id };
            }
        }

        let swap_finalised = stages
            .and_then(|s| s.get("swap_finalised"))
            .and_then(|s| s.get("completed"))
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let outbound_signed = stages
            .and_then(|s| s.get("outbound_signed"))
            .and_then(|s| s.get("completed"))
            .and_then(Value::as_bool)
            .unwrap_or(false);

        if swap_finalised && outbound_signed {
            SwapStatus::Completed { out_txid: None }
        } else {
            SwapStatus::Observed
        }
    }

    fn fixed_point(path: &str, value: &Value, field: &str) -> Result<f64> {
        let raw = value.get(field).ok_or_else(|| ArbitrageError::MalformedResponse {
            method: path.to_string(),
            detail: format!("missing field '{}'", field),
        })?;

        let units = match raw {
            Value::String(s) => s.parse::<u64>().map_err(|_| {
                ArbitrageError::MalformedResponse {
                    method: path.to_string(),
                    detail: format!("non-integer fixed-point string '{}' in '{}'", s, field),
                }
            })?,
            Value::Number(n) => n.as_u64().ok_or_else(|| ArbitrageError::MalformedResponse {
                method: path.to_string(),
                detail: format!("negative or fractional fixed-point value in '{}'", field),
            })?,
            other => {
                return Err(ArbitrageError::MalformedResponse {
                    method: path.to_string(),
                    detail: format!("expected fixed-point value in '{}', got {}", field, other),
                }
                .into())
            }
        };

        Ok(units as f64 / THOR_BASE_UNITS)
    }

    fn field_str(path: &str, value: &Value, field: &str) -> Result<String> {
        value
            .get(field)
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| {
                ArbitrageError::MalformedResponse {
                    method: path.to_string(),
                    detail: format!("missing or non-string field '{}'", field),
                }
                .into()
            })
    }
}

#[async_trait]
impl SwapVenue for ThorchainClient {
    async fn quote(&self, request: &SwapQuoteRequest) -> Result<SwapQuote> {
        let amount_units = (request.amount * THOR_BASE_UNITS).round() as u64;
        let path = format!(
            "/thorchain/quote/swap?from_asset={}&to_asset={}&amount={}&destination={}",
            request.from_asset, request.to_asset, amount_units, request.destination
        );

        let body = self.get_json(&path).await?;
        let quote = Self::parse_quote("/thorchain/quote/swap", &body)?;
        debug!(
            from = %request.from_asset,
            to = %request.to_asset,
            expected_out = quote.expected_amount_out,
            "Swap quote received"
        );
        Ok(quote)
    }

    async fn tx_status(&self, txid: &str) -> Result<SwapStatus> {
        let path = format!("/thorchain/tx/status/{}", txid);
        let response = self.get(&path).await?;

        // Unknown txid means the network has not observed it yet
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(SwapStatus::Pending);
        }
        if response.status().is_server_error() {
            return Err(ArbitrageError::VenueBusy(format!(
                "THORNode returned {} for {}",
                response.status(),
                path
            ))
            .into());
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| ArbitrageError::MalformedResponse {
                method: path.clone(),
                detail: format!("invalid JSON body: {}", e),
            })?;

        Ok(Self::parse_status(&body))
    }

    async fn path_halted(&self, from_chain: &str, to_chain: &str) -> Result<bool> {
        let body = self.get_json("/thorchain/inbound_addresses").await?;
        let entries = body
            .as_array()
            .ok_or_else(|| ArbitrageError::MalformedResponse {
                method: "/thorchain/inbound_addresses".to_string(),
                detail: "expected an array of chain entries".to_string(),
            })?;

        for chain in [from_chain, to_chain] {
            let entry = entries.iter().find(|e| {
                e.get("chain").and_then(Value::as_str) == Some(chain)
            });
            match entry {
                // A chain absent from the list is not accepting inbounds
                None => return Ok(true),
                Some(entry) => {
                    let halted = entry
                        .get("halted")
                        .and_then(Value::as_bool)
                        .unwrap_or(true);
                    let trading_paused = entry
                        .get("global_trading_paused")
                        .and_then(Value::as_bool)
                        .unwrap_or(false)
                        || entry
                            .get("chain_trading_paused")
                            .and_then(Value::as_bool)
                            .unwrap_or(false);
                    if halted || trading_paused {
                        return Ok(true);
                    }
                }
            }
        }

        Ok(false)
    }
}

//! Price and balance aggregator proxy client
//!
//! The proxy fronts the public price aggregators with local caching so the
//! strategy can poll tickers every evaluation tick without hitting upstream
//! rate limits.

use crate::config::PricingConfig;
use crate::connectors::traits::{PriceFeed, Ticker};
use crate::{ArbitrageError, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

/// HTTP client for the aggregator proxy
pub struct ProxyPriceClient {
    client: reqwest::Client,
    base_url: String,
}

impl ProxyPriceClient {
    /// Create a client for the configured proxy
    pub fn new(config: &PricingConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ArbitrageError::RpcConnection(format!("Failed to build client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.proxy_url.trim_end_matches('/').to_string(),
        })
    }

    async fn get_json(&self, path: &str) -> Result<Value> {
        let url = format!("{}{}", self.base_url, path);

        let response = self.client.get(&url).send().await.map_err(|e| {
            if e.is_timeout() {
                anyhow::Error::from(ArbitrageError::RpcTimeout {
                    method: path.to_string(),
                })
            } else {
                ArbitrageError::RpcConnection(format!("{}: {}", path, e)).into()
            }
        })?;

        if response.status().is_server_error() {
            return Err(ArbitrageError::VenueBusy(format!(
                "Proxy returned {} for {}",
                response.status(),
                path
            ))
            .into());
        }

        response
            .json()
            .await
            .map_err(|e| {
                ArbitrageError::MalformedResponse {
                    method: path.to_string(),
                    detail: format!("invalid JSON body: {}", e),
                }
                .into()
            })
    }

    fn parse_price(path: &str, body: &Value) -> Result<f64> {
        let raw = body
            .get("price")
            .or_else(|| body.get("last"))
            .ok_or_else(|| ArbitrageError::MalformedResponse {
                method: path.to_string(),
                detail: "missing price field".to_string(),
            })?;

        match raw {
            Value::Number(n) => n.as_f64().ok_or_else(|| {
                ArbitrageError::MalformedResponse {
                    method: path.to_string(),
                    detail: "non-finite price".to_string(),
                }
                .into()
            }),
            Value::String(s) => s.parse::<f64>().map_err(|_| {
                ArbitrageError::MalformedResponse {
                    method: path.to_string(),
                    detail: format!("unparseable price '{}'", s),
                }
                .into()
            }),
            other => Err(ArbitrageError::MalformedResponse {
                method: path.to_string(),
                detail: format!("expected a price, got {}", other),
            }
            .into()),
        }
    }
}

#[async_trait]
impl PriceFeed for ProxyPriceClient {
    async fn ticker(&self, base: &str, quote: &str) -> Result<Ticker> {
        let path = format!("/ticker/{}-{}", base, quote);
        let body = self.get_json(&path).await?;
        let last = Self::parse_price(&path, &body)?;

        Ok(Ticker {
            base: base.to_string(),
            quote: quote.to_string(),
            bid: body.get("bid").and_then(Value::as_f64),
            ask: body.get("ask").and_then(Value::as_f64),
            last,
            timestamp: chrono::Utc::now().timestamp_millis(),
        })
    }

    async fn balance(&self, token: &str) -> Result<f64> {
        let path = format!("/balance/{}", token);
        let body = self.get_json(&path).await?;
        Self::parse_price(&path, &body).or_else(|_| {
            body.get("balance")
                .and_then(Value::as_f64)
                .ok_or_else(|| {
                    ArbitrageError::MalformedResponse {
                        method: path.clone(),
                        detail: "missing balance field".to_string(),
                    }
                    .into()
                })
        })
    }
}

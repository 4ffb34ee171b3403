//! JSON-RPC 2.0 transport over HTTP basic auth
//!
//! Shared by the XBridge daemon client and the per-coin wallet clients.
//! Failures are mapped to [`ArbitrageError`] variants at this boundary so
//! the retry engine upstream sees an already-classified error.

use crate::connectors::traits::DexTransport;
use crate::{ArbitrageError, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, trace};
use url::Url;

/// Daemon error code reported while the node is still warming up
const RPC_IN_WARMUP: i64 = -28;

#[derive(Debug, Deserialize)]
struct RpcResponse {
    result: Option<Value>,
    error: Option<RpcErrorObject>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorObject {
    code: i64,
    message: String,
}

/// HTTP JSON-RPC client for a single daemon endpoint
pub struct JsonRpcTransport {
    client: reqwest::Client,
    url: Url,
    user: String,
    password: String,
}

impl JsonRpcTransport {
    /// Create a transport for the daemon at `host:port`
    pub fn new(
        host: &str,
        port: u16,
        user: &str,
        password: &str,
        timeout_secs: u64,
    ) -> Result<Self> {
        if user.is_empty() || password.is_empty() {
            return Err(ArbitrageError::Config(
                "RPC credentials are empty; set the credential environment variables".to_string(),
            )
            .into());
        }

        // Reject malformed hosts here instead of on the first request
        let url = Url::parse(&format!("http://{}:{}", host, port)).map_err(|e| {
            ArbitrageError::Config(format!("Invalid RPC endpoint {}:{}: {}", host, port, e))
        })?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| ArbitrageError::RpcConnection(format!("Failed to build client: {}", e)))?;

        Ok(Self {
            client,
            url,
            user: user.to_string(),
            password: password.to_string(),
        })
    }

    /// Invoke `method` with positional `params` and return the `result` value
    pub async fn request(&self, method: &str, params: Vec<Value>) -> Result<Value> {
        let payload = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });

        trace!(method, "Sending RPC request");

        let response = self
            .client
            .post(self.url.clone())
            .basic_auth(&self.user, Some(&self.password))
            .json(&payload)
            .send()
            .await
            .map_err(|e| Self::map_transport_error(method, e))?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED
            || status == reqwest::StatusCode::FORBIDDEN
        {
            return Err(ArbitrageError::Authentication(format!(
                "Daemon rejected RPC credentials ({})",
                status
            ))
            .into());
        }
        if status == reqwest::StatusCode::SERVICE_UNAVAILABLE {
            return Err(
                ArbitrageError::VenueBusy(format!("Daemon returned {}", status)).into(),
            );
        }

        // Daemons return RPC error objects with non-200 statuses too, so
        // parse the body before judging any remaining status code.
        let body: RpcResponse =
            response
                .json()
                .await
                .map_err(|e| ArbitrageError::MalformedResponse {
                    method: method.to_string(),
                    detail: format!("invalid JSON-RPC body: {}", e),
                })?;

        if let Some(err) = body.error {
            debug!(method, code = err.code, message = %err.message, "RPC error response");
            if err.code == RPC_IN_WARMUP {
                return Err(ArbitrageError::VenueBusy(err.message).into());
            }
            return Err(ArbitrageError::RpcError {
                method: method.to_string(),
                code: err.code,
                message: err.message,
            }
            .into());
        }

        body.result.ok_or_else(|| {
            ArbitrageError::MalformedResponse {
                method: method.to_string(),
                detail: "response had neither result nor error".to_string(),
            }
            .into()
        })
    }

    fn map_transport_error(method: &str, e: reqwest::Error) -> anyhow::Error {
        if e.is_timeout() {
            ArbitrageError::RpcTimeout {
                method: method.to_string(),
            }
            .into()
        } else {
            ArbitrageError::RpcConnection(format!("{}: {}", method, e)).into()
        }
    }
}

#[async_trait]
impl DexTransport for JsonRpcTransport {
    async fn call(&self, method: &str, params: Vec<Value>) -> Result<Value> {
        self.request(method, params).await
    }
}

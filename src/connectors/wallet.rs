//! Per-coin wallet RPC client
//!
//! The swap leg is initiated by the coin's own wallet daemon, not the dex:
//! funds go straight to the venue's inbound address with the quote memo
//! embedded. Each configured token maps to its own RPC transport.

use crate::connectors::traits::{DexTransport, WalletSender};
use crate::{ArbitrageError, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

/// Wallet daemon error code for insufficient funds
const RPC_WALLET_INSUFFICIENT_FUNDS: i64 = -6;

/// Memo-carrying sender backed by per-coin wallet daemons
pub struct CoinWalletRpc {
    wallets: HashMap<String, Arc<dyn DexTransport>>,
}

impl CoinWalletRpc {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            wallets: HashMap::new(),
        }
    }

    /// Register the wallet transport for a token
    pub fn register(&mut self, token: &str, transport: Arc<dyn DexTransport>) {
        self.wallets.insert(token.to_string(), transport);
    }

    /// Tokens with a registered wallet
    pub fn registered_tokens(&self) -> Vec<String> {
        self.wallets.keys().cloned().collect()
    }

    fn wallet_for(&self, token: &str) -> Result<&Arc<dyn DexTransport>> {
        self.wallets.get(token).ok_or_else(|| {
            ArbitrageError::Config(format!("No wallet RPC configured for token {}", token)).into()
        })
    }
}

impl Default for CoinWalletRpc {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WalletSender for CoinWalletRpc {
    async fn send_with_memo(
        &self,
        token: &str,
        address: &str,
        amount: f64,
        memo: &str,
    ) -> Result<String> {
        let wallet = self.wallet_for(token)?;

        let result = wallet
            .call(
                "sendtoaddress",
                vec![json!(address), json!(amount), json!(memo)],
            )
            .await
            .map_err(|e| match e.downcast_ref::<ArbitrageError>() {
                Some(ArbitrageError::RpcError { code, message, .. }) => {
                    if *code == RPC_WALLET_INSUFFICIENT_FUNDS {
                        anyhow::Error::from(ArbitrageError::InsufficientBalance {
                            token: token.to_string(),
                            needed: amount,
                            available: 0.0,
                        })
                    } else {
                        ArbitrageError::Wallet(format!("{} send failed: {}", token, message))
                            .into()
                    }
                }
                _ => e,
            })?;

        let txid = result
            .as_str()
            .map(str::to_string)
            .or_else(|| {
                result
                    .get("txid")
                    .and_then(Value::as_str)
                    .map(str::to_string)
            })
            .ok_or_else(|| ArbitrageError::MalformedResponse {
                method: "sendtoaddress".to_string(),
                detail: "response did not contain a txid".to_string(),
            })?;

        info!(token, address, amount, txid, "Wallet send broadcast");
        Ok(txid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedTransport {
        response: Result<Value>,
    }

    #[async_trait]
    impl DexTransport for FixedTransport {
        async fn call(&self, _method: &str, _params: Vec<Value>) -> Result<Value> {
            match &self.response {
                Ok(v) => Ok(v.clone()),
                Err(e) => Err(anyhow::anyhow!("{}", e)),
            }
        }
    }

    struct ErrTransport(i64, String);

    #[async_trait]
    impl DexTransport for ErrTransport {
        async fn call(&self, method: &str, _params: Vec<Value>) -> Result<Value> {
            Err(ArbitrageError::RpcError {
                method: method.to_string(),
                code: self.0,
                message: self.1.clone(),
            }
            .into())
        }
    }

    #[tokio::test]
    async fn test_send_returns_txid() {
        let mut wallets = CoinWalletRpc::new();
        wallets.register(
            "LTC",
            Arc::new(FixedTransport {
                response: Ok(json!("deadbeef")),
            }),
        );

        let txid = wallets
            .send_with_memo("LTC", "ltc1qaddr", 1.5, "=:BTC.BTC:bc1qdest")
            .await
            .unwrap();
        assert_eq!(txid, "deadbeef");
    }

    #[tokio::test]
    async fn test_unregistered_token_is_config_error() {
        let wallets = CoinWalletRpc::new();
        let err = wallets
            .send_with_memo("DOGE", "addr", 1.0, "memo")
            .await
            .unwrap_err();
        let err = err.downcast_ref::<ArbitrageError>().unwrap();
        assert!(matches!(err, ArbitrageError::Config(_)));
    }

    #[tokio::test]
    async fn test_insufficient_funds_mapped() {
        let mut wallets = CoinWalletRpc::new();
        wallets.register(
            "LTC",
            Arc::new(ErrTransport(-6, "Insufficient funds".to_string())),
        );

        let err = wallets
            .send_with_memo("LTC", "addr", 2.0, "memo")
            .await
            .unwrap_err();
        let err = err.downcast_ref::<ArbitrageError>().unwrap();
        assert!(matches!(err, ArbitrageError::InsufficientBalance { .. }));
    }
}

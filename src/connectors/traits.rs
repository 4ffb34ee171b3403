//! Venue connector traits and common types

use crate::{ArbitrageError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Low-level transport for the dex daemon's JSON-RPC interface
///
/// [`XBridgeClient`](super::xbridge::XBridgeClient) layers concurrency
/// limiting and caching on top of this; tests substitute a scripted mock.
#[async_trait]
pub trait DexTransport: Send + Sync {
    /// Invoke an RPC method and return the raw `result` value
    async fn call(&self, method: &str, params: Vec<Value>) -> Result<Value>;
}

/// Cross-chain swap venue
#[async_trait]
pub trait SwapVenue: Send + Sync {
    /// Fetch a swap quote for the given request
    async fn quote(&self, request: &SwapQuoteRequest) -> Result<SwapQuote>;

    /// Get the observed status of an inbound swap transaction
    async fn tx_status(&self, txid: &str) -> Result<SwapStatus>;

    /// Check whether the path between two chains accepts trades
    async fn path_halted(&self, from_chain: &str, to_chain: &str) -> Result<bool>;
}

/// Price and balance aggregator
#[async_trait]
pub trait PriceFeed: Send + Sync {
    /// Get the current mid-market price of `base` quoted in `quote`
    async fn ticker(&self, base: &str, quote: &str) -> Result<Ticker>;

    /// Get the spendable on-chain balance for a token
    async fn balance(&self, token: &str) -> Result<f64>;
}

/// Coin wallet capable of sending funds with an attached memo
#[async_trait]
pub trait WalletSender: Send + Sync {
    /// Send `amount` of `token` to `address`, embedding `memo`.
    /// Returns the broadcast transaction id.
    async fn send_with_memo(
        &self,
        token: &str,
        address: &str,
        amount: f64,
        memo: &str,
    ) -> Result<String>;
}

/// Ticker snapshot from the aggregator proxy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ticker {
    /// Base token symbol
    pub base: String,
    /// Quote token symbol
    pub quote: String,
    /// Best bid, when the source reports one
    pub bid: Option<f64>,
    /// Best ask, when the source reports one
    pub ask: Option<f64>,
    /// Last traded price
    pub last: f64,
    /// Snapshot timestamp (ms since epoch)
    pub timestamp: i64,
}

/// Dex atomic-swap order status as reported by the daemon
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DexOrderStatus {
    /// Order is listed and takeable
    Open,
    /// Taker request accepted, awaiting maker
    Accepting,
    /// Both sides locked in
    Hold,
    /// Swap channel initialized
    Initialized,
    /// Deposits created
    Created,
    /// Deposits committed on both chains
    Committed,
    /// Swap completed successfully
    Finished,
    /// Order timed out before completion
    Expired,
    /// Counterparty went offline
    Offline,
    /// Order was canceled
    Canceled,
    /// Order entered an invalid state
    Invalid,
    /// Swap was rolled back, funds returned
    RolledBack,
    /// Rollback itself failed; manual intervention needed
    RollbackFailed,
}

impl DexOrderStatus {
    /// Whether the swap completed with both sides exchanged
    pub fn is_filled(&self) -> bool {
        matches!(self, DexOrderStatus::Finished)
    }

    /// Whether the order can no longer progress
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DexOrderStatus::Finished
                | DexOrderStatus::Expired
                | DexOrderStatus::Offline
                | DexOrderStatus::Canceled
                | DexOrderStatus::Invalid
                | DexOrderStatus::RolledBack
                | DexOrderStatus::RollbackFailed
        )
    }
}

impl std::str::FromStr for DexOrderStatus {
    type Err = ArbitrageError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "open" | "new" => Ok(DexOrderStatus::Open),
            "accepting" => Ok(DexOrderStatus::Accepting),
            "hold" => Ok(DexOrderStatus::Hold),
            "initialized" => Ok(DexOrderStatus::Initialized),
            "created" => Ok(DexOrderStatus::Created),
            "commited" | "committed" => Ok(DexOrderStatus::Committed),
            "finished" => Ok(DexOrderStatus::Finished),
            "expired" => Ok(DexOrderStatus::Expired),
            "offline" => Ok(DexOrderStatus::Offline),
            "canceled" => Ok(DexOrderStatus::Canceled),
            "invalid" => Ok(DexOrderStatus::Invalid),
            "rolled back" => Ok(DexOrderStatus::RolledBack),
            "rollback failed" => Ok(DexOrderStatus::RollbackFailed),
            other => Err(ArbitrageError::MalformedResponse {
                method: "dxGetOrder".to_string(),
                detail: format!("unknown order status '{}'", other),
            }),
        }
    }
}

impl std::fmt::Display for DexOrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DexOrderStatus::Open => "open",
            DexOrderStatus::Accepting => "accepting",
            DexOrderStatus::Hold => "hold",
            DexOrderStatus::Initialized => "initialized",
            DexOrderStatus::Created => "created",
            DexOrderStatus::Committed => "commited",
            DexOrderStatus::Finished => "finished",
            DexOrderStatus::Expired => "expired",
            DexOrderStatus::Offline => "offline",
            DexOrderStatus::Canceled => "canceled",
            DexOrderStatus::Invalid => "invalid",
            DexOrderStatus::RolledBack => "rolled back",
            DexOrderStatus::RollbackFailed => "rollback failed",
        };
        write!(f, "{}", s)
    }
}

/// Dex order details
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DexOrderInfo {
    /// Order id assigned by the daemon
    pub id: String,
    /// Maker token symbol
    pub maker: String,
    /// Maker size
    pub maker_size: f64,
    /// Taker token symbol
    pub taker: String,
    /// Taker size
    pub taker_size: f64,
    /// Current status
    pub status: DexOrderStatus,
}

/// One price level of a dex order book
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderBookEntry {
    /// Price (taker per maker)
    pub price: f64,
    /// Size in maker units
    pub size: f64,
    /// Order id at this level
    pub order_id: String,
}

/// Dex order book snapshot for a market
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DexOrderBook {
    /// Maker token symbol
    pub maker: String,
    /// Taker token symbol
    pub taker: String,
    /// Bids, best (highest) price first
    pub bids: Vec<OrderBookEntry>,
    /// Asks, best (lowest) price first
    pub asks: Vec<OrderBookEntry>,
}

impl DexOrderBook {
    /// Best bid entry, if any
    pub fn best_bid(&self) -> Option<&OrderBookEntry> {
        self.bids.first()
    }

    /// Best ask entry, if any
    pub fn best_ask(&self) -> Option<&OrderBookEntry> {
        self.asks.first()
    }
}

/// A spendable unspent output reported by the daemon
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Utxo {
    /// Transaction id
    pub txid: String,
    /// Output index
    pub vout: u32,
    /// Value in coin units
    pub amount: f64,
    /// Holding address
    pub address: String,
    /// Whether the output is locked by a pending order
    #[serde(default)]
    pub locked: bool,
}

/// Token balances keyed by symbol
pub type TokenBalances = HashMap<String, f64>;

/// Swap quote request parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwapQuoteRequest {
    /// Source chain (e.g. "LTC")
    pub from_chain: String,
    /// Source asset in venue notation (e.g. "LTC.LTC")
    pub from_asset: String,
    /// Destination chain
    pub to_chain: String,
    /// Destination asset in venue notation
    pub to_asset: String,
    /// Input amount in coin units
    pub amount: f64,
    /// Destination address for the swap output
    pub destination: String,
}

/// Swap quote returned by the venue
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwapQuote {
    /// Expected output amount in coin units, net of fees
    pub expected_amount_out: f64,
    /// Outbound fee in destination coin units
    pub outbound_fee: f64,
    /// Address the input must be sent to
    pub inbound_address: String,
    /// Memo to embed in the inbound transaction
    pub memo: String,
    /// Seconds the quote remains valid
    pub expiry_secs: u64,
}

/// Observed status of an inbound swap transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SwapStatus {
    /// Not yet observed by the venue
    Pending,
    /// Observed, outbound not yet broadcast
    Observed,
    /// Swap completed, outbound broadcast
    Completed {
        /// Outbound transaction id, when reported
        out_txid: Option<String>,
    },
    /// Swap refunded to the sender
    Refunded {
        /// Refund transaction id, when reported
        refund_txid: Option<String>,
    },
}

impl SwapStatus {
    /// Whether the swap can no longer progress
    pub fn is_terminal(&self) -> bool {
        matches!(self, SwapStatus::Completed { .. } | SwapStatus::Refunded { .. })
    }
}

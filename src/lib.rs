//! XBridge/Thorchain Arbitrage Engine
//!
//! A resilient taker-side arbitrage system trading between the Blocknet
//! XBridge decentralized exchange (local daemon RPC) and the Thorchain
//! cross-chain swap protocol, with prices and balances sourced from an
//! external aggregator proxy. Every external call is concurrency-bounded,
//! classified on failure, and driven through a persistent per-trade state
//! machine that survives process restarts.

#![deny(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod connectors;
pub mod recovery;
pub mod state;
pub mod strategy;
pub mod utils;

// Re-export commonly used types
pub use config::ArbitrageConfig;
pub use connectors::xbridge::XBridgeClient;
pub use recovery::{ErrorClass, RetryPolicy, ShutdownCoordinator};
pub use state::{Leg, LegStatus, Trade, TradeStatus};
pub use strategy::ArbitrageEngine;

/// Result type used throughout the application
pub type Result<T> = anyhow::Result<T>;

/// Common error types for the arbitrage system
#[derive(thiserror::Error, Debug)]
pub enum ArbitrageError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// RPC request timed out before the daemon responded
    #[error("RPC timeout calling {method}")]
    RpcTimeout {
        /// RPC method that timed out
        method: String,
    },

    /// Could not reach the RPC endpoint at all
    #[error("RPC connection error: {0}")]
    RpcConnection(String),

    /// The daemon accepted the request but reported itself busy or rate limited
    #[error("Venue busy: {0}")]
    VenueBusy(String),

    /// Wallet balance cannot cover the requested amount
    #[error("Insufficient balance: need {needed} {token}, have {available}")]
    InsufficientBalance {
        /// Token symbol
        token: String,
        /// Amount required for the operation
        needed: f64,
        /// Amount currently spendable
        available: f64,
    },

    /// Order-level reject: unknown pair, order already taken or filled
    #[error("Order rejected: {0}")]
    OrderRejected(String),

    /// The daemon returned a JSON-RPC error object for a well-formed request
    #[error("RPC error from {method} (code {code}): {message}")]
    RpcError {
        /// RPC method that was called
        method: String,
        /// JSON-RPC error code
        code: i64,
        /// Error message from the daemon
        message: String,
    },

    /// Swap quote could not be obtained or was unusable
    #[error("Swap quote error: {0}")]
    SwapQuote(String),

    /// The swap path between two chains is halted by the protocol
    #[error("Swap path halted {from_chain}->{to_chain}: {reason}")]
    SwapPathHalted {
        /// Source chain
        from_chain: String,
        /// Destination chain
        to_chain: String,
        /// Reason reported by the protocol
        reason: String,
    },

    /// The swap was refunded by the protocol instead of completing
    #[error("Swap refunded: {txid}")]
    SwapRefunded {
        /// Transaction hash of the refunded swap
        txid: String,
    },

    /// Wallet send failed while initiating the swap leg
    #[error("Wallet error: {0}")]
    Wallet(String),

    /// RPC credentials were rejected
    #[error("Authentication failure: {0}")]
    Authentication(String),

    /// The venue returned a response we could not interpret
    #[error("Malformed response from {method}: {detail}")]
    MalformedResponse {
        /// RPC or HTTP operation that produced the response
        method: String,
        /// What was wrong with it
        detail: String,
    },

    /// Trade state could not be persisted or read back
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// A trade or leg was asked to make a transition its table forbids
    #[error("Illegal state transition: {from} -> {to}")]
    IllegalTransition {
        /// Current state
        from: String,
        /// Requested state
        to: String,
    },

    /// A transient failure survived every retry attempt
    #[error("Retries exhausted for {operation} after {attempts} attempts")]
    RetriesExhausted {
        /// Operation that kept failing
        operation: String,
        /// Number of attempts made
        attempts: u32,
    },
}

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");

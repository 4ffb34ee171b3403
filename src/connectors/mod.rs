//! Venue connector implementations

pub mod pricing;
pub mod rpc;
pub mod thorchain;
pub mod traits;
pub mod wallet;
pub mod xbridge;

pub use pricing::ProxyPriceClient;
pub use rpc::JsonRpcTransport;
pub use thorchain::ThorchainClient;
pub use traits::*;
pub use wallet::CoinWalletRpc;
pub use xbridge::XBridgeClient;

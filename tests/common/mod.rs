//! Shared test fixtures: scripted venue mocks and an engine harness

#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use xbridge_arbitrage::{
    config::ArbitrageConfig,
    connectors::{
        DexTransport, PriceFeed, SwapQuote, SwapQuoteRequest, SwapStatus, SwapVenue, Ticker,
        WalletSender, XBridgeClient,
    },
    recovery::ShutdownCoordinator,
    state::TradeStateStore,
    strategy::ArbitrageEngine,
    ArbitrageError, Result,
};

/// Chronological log of external calls across all mocks
pub type Events = Arc<Mutex<Vec<String>>>;

/// One scripted response for a dex RPC method
#[derive(Debug, Clone)]
pub enum Scripted {
    /// Successful result value
    Ok(Value),
    /// Transient: request timed out
    Timeout,
    /// Transient: endpoint unreachable
    Connection,
    /// Operational: daemon rejected the request
    Rejected(String),
}

/// Scripted dex daemon. Responses are consumed per method in order; the
/// last response for a method repeats indefinitely.
pub struct MockDexTransport {
    responses: Mutex<HashMap<String, VecDeque<Scripted>>>,
    events: Events,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    delay: Mutex<Option<Duration>>,
    on_call: Mutex<Option<Box<dyn Fn(&str) + Send + Sync>>>,
}

impl MockDexTransport {
    pub fn new(events: Events) -> Self {
        Self {
            responses: Mutex::new(HashMap::new()),
            events,
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            delay: Mutex::new(None),
            on_call: Mutex::new(None),
        }
    }

    pub fn script(&self, method: &str, response: Scripted) {
        self.responses
            .lock()
            .unwrap()
            .entry(method.to_string())
            .or_default()
            .push_back(response);
    }

    /// Drop any queued responses for a method
    pub fn clear_script(&self, method: &str) {
        self.responses.lock().unwrap().remove(method);
    }

    /// Artificial latency per call, for concurrency observation
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    /// Hook invoked at the start of every call
    pub fn set_on_call(&self, hook: impl Fn(&str) + Send + Sync + 'static) {
        *self.on_call.lock().unwrap() = Some(Box::new(hook));
    }

    pub fn calls_to(&self, method: &str) -> usize {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.as_str() == method)
            .count()
    }

    pub fn max_observed_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn next_response(&self, method: &str) -> Scripted {
        let mut map = self.responses.lock().unwrap();
        let queue = map
            .get_mut(method)
            .unwrap_or_else(|| panic!("no script for method {}", method));
        if queue.len() > 1 {
            queue.pop_front().unwrap()
        } else {
            queue
                .front()
                .cloned()
                .unwrap_or_else(|| panic!("script for {} exhausted", method))
        }
    }
}

#[async_trait]
impl DexTransport for MockDexTransport {
    async fn call(&self, method: &str, _params: Vec<Value>) -> Result<Value> {
        self.events.lock().unwrap().push(method.to_string());
        if let Some(hook) = &*self.on_call.lock().unwrap() {
            hook(method);
        }

        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        match self.next_response(method) {
            Scripted::Ok(value) => Ok(value),
            Scripted::Timeout => Err(ArbitrageError::RpcTimeout {
                method: method.to_string(),
            }
            .into()),
            Scripted::Connection => {
                Err(ArbitrageError::RpcConnection(format!("{}: refused", method)).into())
            }
            Scripted::Rejected(message) => Err(ArbitrageError::OrderRejected(message).into()),
        }
    }
}

/// Scripted swap venue. Statuses are consumed in order; the last repeats.
pub struct MockSwapVenue {
    pub quote_out: Mutex<f64>,
    pub statuses: Mutex<VecDeque<SwapStatus>>,
    pub halted: AtomicBool,
    events: Events,
}

impl MockSwapVenue {
    pub fn new(events: Events, quote_out: f64) -> Self {
        Self {
            quote_out: Mutex::new(quote_out),
            statuses: Mutex::new(VecDeque::new()),
            halted: AtomicBool::new(false),
            events,
        }
    }

    pub fn push_status(&self, status: SwapStatus) {
        self.statuses.lock().unwrap().push_back(status);
    }
}

#[async_trait]
impl SwapVenue for MockSwapVenue {
    async fn quote(&self, request: &SwapQuoteRequest) -> Result<SwapQuote> {
        self.events.lock().unwrap().push("swap_quote".to_string());
        Ok(SwapQuote {
            expected_amount_out: *self.quote_out.lock().unwrap(),
            outbound_fee: 0.0,
            inbound_address: "inbound-addr".to_string(),
            memo: format!(
                "=:{}.{}:{}",
                request.to_chain, request.to_chain, request.destination
            ),
            expiry_secs: 600,
        })
    }

    async fn tx_status(&self, _txid: &str) -> Result<SwapStatus> {
        self.events.lock().unwrap().push("swap_status".to_string());
        let mut statuses = self.statuses.lock().unwrap();
        let status = if statuses.len() > 1 {
            statuses.pop_front().unwrap()
        } else {
            statuses
                .front()
                .cloned()
                .unwrap_or(SwapStatus::Completed { out_txid: None })
        };
        Ok(status)
    }

    async fn path_halted(&self, _from_chain: &str, _to_chain: &str) -> Result<bool> {
        self.events.lock().unwrap().push("path_halted".to_string());
        Ok(self.halted.load(Ordering::SeqCst))
    }
}

/// Fixed-price aggregator
pub struct MockPriceFeed {
    pub price: Mutex<f64>,
    events: Events,
}

impl MockPriceFeed {
    pub fn new(events: Events, price: f64) -> Self {
        Self {
            price: Mutex::new(price),
            events,
        }
    }
}

#[async_trait]
impl PriceFeed for MockPriceFeed {
    async fn ticker(&self, base: &str, quote: &str) -> Result<Ticker> {
        self.events.lock().unwrap().push("ticker".to_string());
        let last = *self.price.lock().unwrap();
        Ok(Ticker {
            base: base.to_string(),
            quote: quote.to_string(),
            bid: Some(last),
            ask: Some(last),
            last,
            timestamp: 0,
        })
    }

    async fn balance(&self, _token: &str) -> Result<f64> {
        self.events.lock().unwrap().push("balance".to_string());
        Ok(0.0)
    }
}

/// Recording wallet that always broadcasts
pub struct MockWallet {
    pub sends: Mutex<Vec<(String, String, f64, String)>>,
    events: Events,
}

impl MockWallet {
    pub fn new(events: Events) -> Self {
        Self {
            sends: Mutex::new(Vec::new()),
            events,
        }
    }

    pub fn send_count(&self) -> usize {
        self.sends.lock().unwrap().len()
    }
}

#[async_trait]
impl WalletSender for MockWallet {
    async fn send_with_memo(
        &self,
        token: &str,
        address: &str,
        amount: f64,
        memo: &str,
    ) -> Result<String> {
        self.events.lock().unwrap().push("wallet_send".to_string());
        let mut sends = self.sends.lock().unwrap();
        sends.push((
            token.to_string(),
            address.to_string(),
            amount,
            memo.to_string(),
        ));
        Ok(format!("swaptx-{}", sends.len()))
    }
}

/// A fully wired engine over scripted venues
pub struct Harness {
    pub engine: Arc<ArbitrageEngine>,
    pub dex: Arc<MockDexTransport>,
    pub swap: Arc<MockSwapVenue>,
    pub prices: Arc<MockPriceFeed>,
    pub wallet: Arc<MockWallet>,
    pub store: Arc<TradeStateStore>,
    pub shutdown: ShutdownCoordinator,
    pub events: Events,
    state_dir: TempDir,
}

impl Harness {
    pub fn state_path(&self) -> &std::path::Path {
        self.state_dir.path()
    }

    pub fn event_index(&self, name: &str) -> Option<usize> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .position(|e| e.as_str() == name)
    }
}

/// Engine configuration tuned for fast deterministic tests: zero backoff,
/// zero poll intervals, zero dex fees, live (non-dry) mode
pub fn test_config(state_dir: &std::path::Path) -> ArbitrageConfig {
    let mut config = ArbitrageConfig::default();
    config.strategy.trading_tokens = vec!["LTC".to_string(), "BTC".to_string()];
    config.strategy.min_profit_margin = 0.05;
    config.strategy.dry_mode = false;
    config.strategy.evaluation_interval_secs = 1;
    config.xbridge.monitoring.timeout_secs = 5;
    config.xbridge.monitoring.poll_interval_secs = 0;
    config.thorchain.monitoring.timeout_secs = 5;
    config.thorchain.monitoring.poll_interval_secs = 0;
    config.retry.backoff_secs = vec![0, 0, 0];
    config.retry.max_attempts = 3;
    for fee in config.xbridge.fees.values_mut() {
        fee.fee_per_byte = 0;
        fee.min_tx_fee = 0;
    }
    config
        .xbridge
        .addresses
        .insert("LTC".to_string(), "ltc1qtest".to_string());
    config
        .xbridge
        .addresses
        .insert("BTC".to_string(), "bc1qtest".to_string());
    config.persistence.state_dir = state_dir.to_string_lossy().into_owned();
    config
}

pub fn harness() -> Harness {
    harness_with(10.6, |_| {})
}

/// Build a harness with the given swap quote output and a config tweak
pub fn harness_with(quote_out: f64, mutate: impl FnOnce(&mut ArbitrageConfig)) -> Harness {
    let state_dir = tempfile::tempdir().unwrap();
    let mut config = test_config(state_dir.path());
    mutate(&mut config);

    let events: Events = Arc::new(Mutex::new(Vec::new()));
    let dex = Arc::new(MockDexTransport::new(events.clone()));
    let swap = Arc::new(MockSwapVenue::new(events.clone(), quote_out));
    let prices = Arc::new(MockPriceFeed::new(events.clone(), 0.002));
    let wallet = Arc::new(MockWallet::new(events.clone()));
    let store = Arc::new(TradeStateStore::new(state_dir.path()).unwrap());
    let shutdown = ShutdownCoordinator::new();

    let client = Arc::new(XBridgeClient::new(dex.clone(), config.xbridge.clone()));
    let engine = Arc::new(ArbitrageEngine::new(
        config,
        client,
        swap.clone(),
        prices.clone(),
        wallet.clone(),
        store.clone(),
        shutdown.clone(),
    ));

    Harness {
        engine,
        dex,
        swap,
        prices,
        wallet,
        store,
        shutdown,
        events,
        state_dir,
    }
}

/// One bid of 10 LTC at 0.002 BTC, order id "ord-1"
pub fn book_with_bid() -> Value {
    json!({
        "bids": [["0.002", "10.0", "ord-1"]],
        "asks": [],
    })
}

pub fn order_json(id: &str, status: &str) -> Value {
    json!({
        "id": id,
        "maker": "LTC",
        "maker_size": "10.0",
        "taker": "BTC",
        "taker_size": "0.02",
        "status": status,
    })
}

pub fn balances_json() -> Value {
    json!({"BLOCK": "250.0", "LTC": "100.0", "BTC": "1.0"})
}

pub fn utxos_json() -> Value {
    json!([
        {"txid": "u1", "vout": 0, "amount": "60.0", "address": "ltc1qtest"},
        {"txid": "u2", "vout": 1, "amount": "60.0", "address": "ltc1qtest"},
    ])
}

/// Script the dex responses for a clean end-to-end round trip:
/// evaluation sees one bid, the order is taken and finishes immediately
pub fn script_happy_dex(dex: &MockDexTransport) {
    dex.script("dxGetOrderBook", Scripted::Ok(book_with_bid()));
    dex.script("dxGetTokenBalances", Scripted::Ok(balances_json()));
    dex.script("dxGetUtxos", Scripted::Ok(utxos_json()));
    dex.script("dxTakeOrder", Scripted::Ok(order_json("ord-1", "accepting")));
    dex.script("dxGetOrder", Scripted::Ok(order_json("ord-1", "finished")));
}

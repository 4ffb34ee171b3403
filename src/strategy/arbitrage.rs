//! Arbitrage execution state machine
//!
//! Drives each trade leg-by-leg: take an XBridge order, wait for the atomic
//! swap to finish, then send the proceeds through Thorchain and wait for the
//! outbound. Progress is persisted before and after every leg transition so
//! an unplanned restart can resume from the venue's true state. Pause and
//! shutdown are cooperative and only observed between legs; an in-flight leg
//! always runs to a terminal state first.

use crate::config::ArbitrageConfig;
use crate::connectors::traits::{
    PriceFeed, SwapQuoteRequest, SwapStatus, SwapVenue, TokenBalances, WalletSender,
};
use crate::connectors::xbridge::XBridgeClient;
use crate::recovery::{classify, ErrorClass, RetryPolicy, ShutdownCoordinator};
use crate::state::{LegStatus, LegVenue, Trade, TradeStateStore, TradeStatus};
use crate::strategy::evaluate::{ArbDirection, Opportunity};
use crate::{ArbitrageError, Result};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Book levels priced further than this from the aggregator reference are
/// treated as stale or bait and skipped
const MAX_REFERENCE_DEVIATION: f64 = 0.5;

/// Terminal outcome of one leg's execution
#[derive(Debug, Clone, PartialEq)]
enum LegOutcome {
    Filled(f64),
    Cancelled,
    Expired,
    Refunded(Option<String>),
    /// Pre-send re-check found the round trip no longer profitable
    Unprofitable,
    /// Shutdown observed mid-monitoring; leg state left as persisted
    Interrupted,
}

/// The execution state machine and evaluation loop
pub struct ArbitrageEngine {
    config: ArbitrageConfig,
    dex: Arc<XBridgeClient>,
    swap: Arc<dyn SwapVenue>,
    prices: Arc<dyn PriceFeed>,
    wallet: Arc<dyn WalletSender>,
    store: Arc<TradeStateStore>,
    retry: RetryPolicy,
    shutdown: ShutdownCoordinator,
    paused: AtomicBool,
    active_pairs: Mutex<HashSet<String>>,
    trades: RwLock<HashMap<Uuid, Trade>>,
}

impl ArbitrageEngine {
    /// Assemble the engine from its collaborators
    pub fn new(
        config: ArbitrageConfig,
        dex: Arc<XBridgeClient>,
        swap: Arc<dyn SwapVenue>,
        prices: Arc<dyn PriceFeed>,
        wallet: Arc<dyn WalletSender>,
        store: Arc<TradeStateStore>,
        shutdown: ShutdownCoordinator,
    ) -> Self {
        let retry = RetryPolicy::new(
            &config.retry.backoff_secs,
            config.retry.max_attempts,
            shutdown.clone(),
        );
        Self {
            config,
            dex,
            swap,
            prices,
            wallet,
            store,
            retry,
            shutdown,
            paused: AtomicBool::new(false),
            active_pairs: Mutex::new(HashSet::new()),
            trades: RwLock::new(HashMap::new()),
        }
    }

    /// Stop creating trades and pause in-flight ones at their next leg
    /// boundary
    pub fn pause(&self) {
        if !self.paused.swap(true, Ordering::SeqCst) {
            info!("Engine paused; in-flight legs will finish before halting");
        }
    }

    /// Lift a pause; paused trades continue on the next evaluation tick
    pub fn resume(&self) {
        if self.paused.swap(false, Ordering::SeqCst) {
            info!("Engine resumed");
        }
    }

    /// Whether a pause is currently requested
    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// All trades known this process lifetime, oldest first
    pub async fn status(&self) -> Vec<Trade> {
        let mut trades: Vec<Trade> = self.trades.read().await.values().cloned().collect();
        trades.sort_by_key(|t| t.created_at);
        trades
    }

    /// Resume every non-terminal persisted trade. Must run before the first
    /// evaluation tick.
    ///
    /// Never re-submits a leg that already has a venue identifier; it only
    /// re-attaches monitoring and lets the venue's true status decide the
    /// next transition.
    pub async fn recover(self: &Arc<Self>) -> Result<()> {
        let persisted = self.store.load_all()?;
        if persisted.is_empty() {
            info!("No interrupted trades to recover");
            return Ok(());
        }
        info!(count = persisted.len(), "Recovering interrupted trades");

        for trade in persisted {
            if trade.status.is_terminal() {
                // Terminal states should have been deleted or archived
                warn!(trade = %trade.log_prefix(), status = %trade.status, "Archiving stale terminal state");
                self.store.archive(trade.id, "stale")?;
                continue;
            }

            self.claim_pair(&trade.opportunity.pair_symbol).await;
            self.trades.write().await.insert(trade.id, trade.clone());

            if trade.status == TradeStatus::Paused {
                // The pause flag itself does not survive a restart, so a
                // recovered Paused trade re-pauses the engine until the
                // operator resumes explicitly
                info!(trade = %trade.log_prefix(), "Trade is paused; pausing engine until operator resume");
                self.pause();
                continue;
            }

            info!(
                trade = %trade.log_prefix(),
                pair = %trade.opportunity.pair_symbol,
                status = %trade.status,
                "Resuming interrupted trade"
            );
            self.execute_trade(trade).await?;
        }
        Ok(())
    }

    /// Run the evaluation loop until shutdown
    pub async fn run(self: &Arc<Self>) -> Result<()> {
        info!(
            interval_secs = self.config.strategy.evaluation_interval_secs,
            dry_mode = self.config.strategy.dry_mode,
            "Starting evaluation loop"
        );
        let interval = Duration::from_secs(self.config.strategy.evaluation_interval_secs);

        while !self.shutdown.is_shutting_down() {
            if let Err(e) = self.evaluate_and_maybe_execute().await {
                error!(error = %e, "Evaluation tick failed");
                if classify(&e) == ErrorClass::Critical {
                    self.shutdown.signal_critical("evaluation tick failed");
                    break;
                }
            }
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = self.shutdown.wait() => break,
            }
        }

        info!("Evaluation loop stopped");
        Ok(())
    }

    /// One scheduler tick: resume paused trades if unpaused, then look for a
    /// new opportunity on every configured pair
    pub async fn evaluate_and_maybe_execute(self: &Arc<Self>) -> Result<()> {
        if self.shutdown.is_shutting_down() {
            return Ok(());
        }

        if !self.is_paused() {
            self.resume_paused_trades().await?;
        }
        if self.is_paused() {
            debug!("Paused; skipping evaluation tick");
            return Ok(());
        }

        // The dex taker fee is paid in the fee token; without it every
        // submission would reject
        let balances = match self.fetch_balances().await {
            Ok(balances) => balances,
            Err(e) if classify(&e) == ErrorClass::Critical => return Err(e),
            Err(e) => {
                warn!(error = %e, "Balance fetch failed; skipping tick");
                return Ok(());
            }
        };
        let fee_token = &self.config.strategy.fee_token;
        let fee_balance = balances.get(fee_token).copied().unwrap_or(0.0);
        if fee_balance < self.config.strategy.taker_fee {
            warn!(
                token = %fee_token,
                balance = fee_balance,
                needed = self.config.strategy.taker_fee,
                "Fee token balance too low to take orders; skipping tick"
            );
            return Ok(());
        }

        let tokens = self.config.strategy.trading_tokens.clone();
        for i in 0..tokens.len() {
            for j in (i + 1)..tokens.len() {
                if self.shutdown.is_shutting_down() || self.is_paused() {
                    return Ok(());
                }
                let (base, quote) = (&tokens[i], &tokens[j]);
                let pair = format!("{}/{}", base, quote);
                if self.pair_active(&pair).await {
                    debug!(pair = %pair, "Pair already has a trade in flight");
                    continue;
                }

                match self.evaluate_pair(base, quote, &balances).await {
                    Ok(Some(opportunity)) => {
                        self.launch_trade(opportunity).await?;
                    }
                    Ok(None) => {}
                    Err(e) if classify(&e) == ErrorClass::Critical => return Err(e),
                    Err(e) => {
                        warn!(pair = %pair, error = %e, "Pair evaluation failed");
                    }
                }
            }
        }
        Ok(())
    }

    async fn resume_paused_trades(self: &Arc<Self>) -> Result<()> {
        let paused: Vec<Trade> = self
            .trades
            .read()
            .await
            .values()
            .filter(|t| t.status == TradeStatus::Paused)
            .cloned()
            .collect();

        for trade in paused {
            info!(trade = %trade.log_prefix(), "Resuming paused trade");
            self.execute_trade(trade).await?;
        }
        Ok(())
    }

    async fn launch_trade(self: &Arc<Self>, opportunity: Opportunity) -> Result<()> {
        if self.config.strategy.dry_mode {
            info!(
                pair = %opportunity.pair_symbol(),
                order = %opportunity.dex_order_id,
                profit = opportunity.net_profit(),
                ratio = opportunity.profit_ratio(),
                "Dry mode: actionable opportunity found, not executing"
            );
            return Ok(());
        }

        let trade = Trade::new(opportunity.snapshot(), opportunity.leg_plan());
        self.claim_pair(&trade.opportunity.pair_symbol).await;
        self.persist(&trade).await?;
        info!(
            trade = %trade.log_prefix(),
            pair = %trade.opportunity.pair_symbol,
            expected_profit = trade.opportunity.expected_profit,
            ratio = trade.opportunity.expected_profit_ratio,
            "New trade created"
        );
        self.execute_trade(trade).await
    }

    /// Evaluate one pair in both directions; return the first actionable
    /// opportunity
    async fn evaluate_pair(
        &self,
        base: &str,
        quote: &str,
        balances: &TokenBalances,
    ) -> Result<Option<Opportunity>> {
        let dex = self.dex.clone();
        let (base_owned, quote_owned) = (base.to_string(), quote.to_string());
        let book = self
            .retry
            .execute("order_book", move || {
                let dex = dex.clone();
                let base = base_owned.clone();
                let quote = quote_owned.clone();
                async move { dex.order_book(&base, &quote).await }
            })
            .await?;

        // Aggregator price is advisory: stale by its own refresh interval
        let reference = match self.prices.ticker(base, quote).await {
            Ok(ticker) => Some(ticker.last),
            Err(e) => {
                debug!(pair = %format!("{}/{}", base, quote), error = %e, "No reference price");
                None
            }
        };

        let sides = [
            (ArbDirection::SellBaseOnDex, &book.bids),
            (ArbDirection::BuyBaseOnDex, &book.asks),
        ];

        // Walk each side best-first, skipping levels we cannot fund or that
        // sit too far from the reference, and quote the first one left. Any
        // deeper level prices strictly worse, so one quote per side decides.
        for (direction, levels) in sides {
            for level in levels {
                if let Some(reference) = reference {
                    if reference > 0.0
                        && (level.price - reference).abs() / reference > MAX_REFERENCE_DEVIATION
                    {
                        debug!(
                            price = level.price,
                            reference, "Book level too far from reference price; skipping"
                        );
                        continue;
                    }
                }

                // Affordability gates run before quoting so skipped depth
                // costs no venue traffic
                let (start, cost) = match direction {
                    ArbDirection::SellBaseOnDex => (base, level.size),
                    ArbDirection::BuyBaseOnDex => (quote, level.size * level.price),
                };
                let available = balances.get(start).copied().unwrap_or(0.0);
                if available < cost {
                    debug!(
                        token = %start,
                        available,
                        needed = cost,
                        "Insufficient balance for this level"
                    );
                    continue;
                }
                if !self.has_spendable(start, cost).await? {
                    debug!(token = %start, "Not enough unlocked UTXOs for this level");
                    continue;
                }

                let opportunity = match self.build_opportunity(base, quote, direction, level).await
                {
                    Ok(opportunity) => opportunity,
                    Err(e) if classify(&e) == ErrorClass::Critical => return Err(e),
                    Err(e) => {
                        debug!(error = %e, "Direction not evaluable");
                        break;
                    }
                };

                if opportunity.is_actionable(self.config.strategy.min_profit_margin) {
                    return Ok(Some(opportunity));
                }
                debug!(
                    pair = %opportunity.pair_symbol(),
                    ratio = opportunity.profit_ratio(),
                    min = self.config.strategy.min_profit_margin,
                    "Best affordable level below margin"
                );
                break;
            }
        }
        Ok(None)
    }

    async fn build_opportunity(
        &self,
        base: &str,
        quote: &str,
        direction: ArbDirection,
        level: &crate::connectors::traits::OrderBookEntry,
    ) -> Result<Opportunity> {
        let (start, middle) = match direction {
            ArbDirection::SellBaseOnDex => (base, quote),
            ArbDirection::BuyBaseOnDex => (quote, base),
        };
        let dex_fee = self.dex.estimate_fee(start)?;

        if self.swap_path_halted(middle, start).await? {
            return Err(ArbitrageError::SwapPathHalted {
                from_chain: middle.to_string(),
                to_chain: start.to_string(),
                reason: "protocol reports path halted".to_string(),
            }
            .into());
        }

        let swap_amount = match direction {
            ArbDirection::SellBaseOnDex => level.size * level.price,
            ArbDirection::BuyBaseOnDex => level.size,
        };
        let request = SwapQuoteRequest {
            from_chain: middle.to_string(),
            from_asset: format!("{}.{}", middle, middle),
            to_chain: start.to_string(),
            to_asset: format!("{}.{}", start, start),
            amount: swap_amount,
            destination: self.address_for(start)?,
        };
        let swap = self.swap.clone();
        let quote_result = self
            .retry
            .execute("swap_quote", move || {
                let swap = swap.clone();
                let request = request.clone();
                async move { swap.quote(&request).await }
            })
            .await?;

        Ok(Opportunity::from_book_level(
            base,
            quote,
            direction,
            level,
            &quote_result,
            dex_fee,
        ))
    }

    /// Execute a trade to a terminal or parked state. The pair stays claimed
    /// until the trade is terminal so no other trade can double-spend the
    /// same balances.
    async fn execute_trade(self: &Arc<Self>, mut trade: Trade) -> Result<()> {
        let result = self.drive_legs(&mut trade).await;
        if trade.status.is_terminal() {
            self.release_pair(&trade.opportunity.pair_symbol).await;
        }
        result
    }

    async fn drive_legs(self: &Arc<Self>, trade: &mut Trade) -> Result<()> {
        loop {
            if self.shutdown.is_shutting_down() {
                self.persist(trade).await?;
                return Ok(());
            }

            // Pause is only honored here, between legs
            if self.is_paused() {
                if trade.status != TradeStatus::Paused {
                    trade.transition(TradeStatus::Paused)?;
                    self.persist(trade).await?;
                }
                info!(trade = %trade.log_prefix(), "Trade paused at leg boundary");
                return Ok(());
            }
            if trade.status == TradeStatus::Paused {
                trade.transition(TradeStatus::InProgress)?;
                self.persist(trade).await?;
            }

            let Some(idx) = trade.active_leg_index() else {
                return self.complete_trade(trade).await;
            };

            if trade.legs[idx].status.is_terminal() {
                // A non-filled terminal leg fails the whole trade
                return self.fail_trade(trade, "leg_terminal").await;
            }

            match self.execute_leg(trade, idx).await {
                Ok(LegOutcome::Filled(amount)) => {
                    trade.legs[idx].mark_filled(amount)?;
                    self.persist(trade).await?;
                    info!(
                        trade = %trade.log_prefix(),
                        leg = idx,
                        fill = amount,
                        "Leg filled"
                    );
                }
                Ok(LegOutcome::Cancelled) => {
                    trade.legs[idx].transition(LegStatus::Cancelled)?;
                    self.persist(trade).await?;
                    return self.fail_trade(trade, "leg_cancelled").await;
                }
                Ok(LegOutcome::Expired) => {
                    trade.legs[idx].transition(LegStatus::Expired)?;
                    self.persist(trade).await?;
                    self.cancel_best_effort(trade, idx).await;
                    return self.fail_trade(trade, "leg_expired").await;
                }
                Ok(LegOutcome::Refunded(refund_txid)) => {
                    warn!(
                        trade = %trade.log_prefix(),
                        refund_txid = refund_txid.as_deref().unwrap_or("unknown"),
                        "Swap refunded; pausing engine for inspection"
                    );
                    trade.legs[idx].transition(LegStatus::Cancelled)?;
                    self.persist(trade).await?;
                    // A refund means the protocol rejected a send our quote
                    // said was fine; stop creating trades until a human looks
                    self.pause();
                    return self.fail_trade(trade, "swap_refunded").await;
                }
                Ok(LegOutcome::Unprofitable) => {
                    trade.legs[idx].transition(LegStatus::Errored)?;
                    self.persist(trade).await?;
                    return self.fail_trade(trade, "no_longer_profitable").await;
                }
                Ok(LegOutcome::Interrupted) => {
                    self.persist(trade).await?;
                    return Ok(());
                }
                Err(e) => {
                    return match classify(&e) {
                        ErrorClass::Operational => {
                            warn!(
                                trade = %trade.log_prefix(),
                                leg = idx,
                                error = %e,
                                "Leg failed operationally"
                            );
                            trade.legs[idx].transition(LegStatus::Errored)?;
                            self.persist(trade).await?;
                            self.fail_trade(trade, "leg_errored").await
                        }
                        // Critical: leave the leg exactly as last persisted
                        // so the next startup can recover from venue truth
                        _ => {
                            self.persist(trade).await?;
                            Err(e)
                        }
                    };
                }
            }
        }
    }

    async fn execute_leg(&self, trade: &mut Trade, idx: usize) -> Result<LegOutcome> {
        match trade.legs[idx].venue {
            LegVenue::DexOrder => self.run_dex_leg(trade, idx).await,
            LegVenue::CrossChainSwap => self.run_swap_leg(trade, idx).await,
        }
    }

    async fn run_dex_leg(&self, trade: &mut Trade, idx: usize) -> Result<LegOutcome> {
        if trade.legs[idx].status == LegStatus::NotStarted {
            let from_address = self.address_for(&trade.legs[idx].from_token)?;
            let to_address = self.address_for(&trade.legs[idx].to_token)?;
            let order_id = trade.opportunity.dex_order_id.clone();

            let dex = self.dex.clone();
            let order = self
                .retry
                .execute("take_order", move || {
                    let dex = dex.clone();
                    let order_id = order_id.clone();
                    let from_address = from_address.clone();
                    let to_address = to_address.clone();
                    async move {
                        dex.take_order(&order_id, &from_address, &to_address, false)
                            .await
                    }
                })
                .await?;

            trade.legs[idx].mark_submitted(&order.id)?;
            if trade.status == TradeStatus::Pending {
                trade.transition(TradeStatus::InProgress)?;
            }
            self.persist(trade).await?;
            info!(
                trade = %trade.log_prefix(),
                order = %order.id,
                "Dex order taken"
            );
        }

        self.monitor_dex_leg(trade, idx).await
    }

    async fn monitor_dex_leg(&self, trade: &mut Trade, idx: usize) -> Result<LegOutcome> {
        let order_id = trade.legs[idx].venue_id.clone().ok_or_else(|| {
            ArbitrageError::IllegalTransition {
                from: trade.legs[idx].status.to_string(),
                to: "monitoring without venue id".to_string(),
            }
        })?;
        let poll = Duration::from_secs(self.config.xbridge.monitoring.poll_interval_secs);
        let deadline = tokio::time::Instant::now()
            + Duration::from_secs(self.config.xbridge.monitoring.timeout_secs);
        let mut last_status = None;

        loop {
            let dex = self.dex.clone();
            let id = order_id.clone();
            let order = self
                .retry
                .execute("order_status", move || {
                    let dex = dex.clone();
                    let id = id.clone();
                    async move { dex.order_status(&id).await }
                })
                .await?;

            // First successful read attaches monitoring; repeated identical
            // reads change nothing
            if trade.legs[idx].status == LegStatus::Submitted {
                trade.legs[idx].transition(LegStatus::Monitoring)?;
                self.persist(trade).await?;
            }
            if last_status != Some(order.status) {
                crate::log_leg!(
                    info,
                    trade.log_prefix(),
                    trade.legs[idx].venue,
                    order.status,
                    order = %order_id,
                    "Dex order status"
                );
                last_status = Some(order.status);
            }

            if order.status.is_filled() {
                self.dex.invalidate_utxos_all();
                let fill = if order.maker == trade.legs[idx].to_token {
                    order.maker_size
                } else {
                    order.taker_size
                };
                return Ok(LegOutcome::Filled(fill));
            }
            if order.status.is_terminal() {
                return Ok(LegOutcome::Cancelled);
            }
            if tokio::time::Instant::now() >= deadline {
                return Ok(LegOutcome::Expired);
            }

            tokio::select! {
                _ = tokio::time::sleep(poll) => {}
                _ = self.shutdown.wait() => return Ok(LegOutcome::Interrupted),
            }
        }
    }

    async fn run_swap_leg(&self, trade: &mut Trade, idx: usize) -> Result<LegOutcome> {
        if trade.legs[idx].status == LegStatus::NotStarted {
            let from = trade.legs[idx].from_token.clone();
            let to = trade.legs[idx].to_token.clone();
            // Send what the dex leg actually delivered, not the
            // evaluation-time estimate
            let amount = idx
                .checked_sub(1)
                .and_then(|prev| trade.legs[prev].fill_amount)
                .unwrap_or(trade.legs[idx].requested_amount);

            if self.swap_path_halted(&from, &to).await? {
                return Err(ArbitrageError::SwapPathHalted {
                    from_chain: from,
                    to_chain: to,
                    reason: "path halted before send".to_string(),
                }
                .into());
            }

            // The evaluation-time quote has typically expired by the time the
            // dex leg fills; fetch a fresh one for the address and memo
            let request = SwapQuoteRequest {
                from_chain: from.clone(),
                from_asset: format!("{}.{}", from, from),
                to_chain: to.clone(),
                to_asset: format!("{}.{}", to, to),
                amount,
                destination: self.address_for(&to)?,
            };
            let swap = self.swap.clone();
            let quote = self
                .retry
                .execute("swap_quote", move || {
                    let swap = swap.clone();
                    let request = request.clone();
                    async move { swap.quote(&request).await }
                })
                .await?;

            // Pre-flight re-check against the fresh quote before committing
            // the irreversible send. An unprofitable round trip leaves the
            // proceeds in the middle token for the operator to rebalance.
            let net = quote.expected_amount_out
                - quote.outbound_fee
                - trade.opportunity.cost_amount
                - trade.opportunity.dex_fee;
            let ratio = if trade.opportunity.cost_amount > 0.0 {
                net / trade.opportunity.cost_amount
            } else {
                0.0
            };
            let min_margin = self.config.strategy.min_profit_margin;
            if net <= 0.0 || ratio + crate::strategy::evaluate::PROFIT_EPSILON < min_margin {
                error!(
                    trade = %trade.log_prefix(),
                    quoted_net = net,
                    ratio,
                    min_margin,
                    "Swap leg no longer profitable; aborting before send"
                );
                return Ok(LegOutcome::Unprofitable);
            }

            let wallet = self.wallet.clone();
            let from_token = from.clone();
            let inbound = quote.inbound_address.clone();
            let memo = quote.memo.clone();
            let txid = self
                .retry
                .execute("wallet_send", move || {
                    let wallet = wallet.clone();
                    let from_token = from_token.clone();
                    let inbound = inbound.clone();
                    let memo = memo.clone();
                    async move {
                        wallet
                            .send_with_memo(&from_token, &inbound, amount, &memo)
                            .await
                    }
                })
                .await?;

            trade.legs[idx].mark_submitted(&txid)?;
            self.persist(trade).await?;
            self.dex.invalidate_utxos(&from);
            info!(
                trade = %trade.log_prefix(),
                txid = %txid,
                inbound = %quote.inbound_address,
                "Swap inbound sent"
            );
        }

        self.monitor_swap_leg(trade, idx).await
    }

    async fn monitor_swap_leg(&self, trade: &mut Trade, idx: usize) -> Result<LegOutcome> {
        let txid = trade.legs[idx].venue_id.clone().ok_or_else(|| {
            ArbitrageError::IllegalTransition {
                from: trade.legs[idx].status.to_string(),
                to: "monitoring without venue id".to_string(),
            }
        })?;
        let poll = Duration::from_secs(self.config.thorchain.monitoring.poll_interval_secs);
        let deadline = tokio::time::Instant::now()
            + Duration::from_secs(self.config.thorchain.monitoring.timeout_secs);
        let mut last_status: Option<SwapStatus> = None;

        loop {
            let swap = self.swap.clone();
            let id = txid.clone();
            let status = self
                .retry
                .execute("swap_status", move || {
                    let swap = swap.clone();
                    let id = id.clone();
                    async move { swap.tx_status(&id).await }
                })
                .await?;

            if trade.legs[idx].status == LegStatus::Submitted {
                trade.legs[idx].transition(LegStatus::Monitoring)?;
                self.persist(trade).await?;
            }
            if last_status.as_ref() != Some(&status) {
                info!(
                    trade = %trade.log_prefix(),
                    txid = %txid,
                    status = ?status,
                    "Swap status"
                );
                last_status = Some(status.clone());
            }

            match status {
                SwapStatus::Completed { .. } => {
                    let received =
                        trade.opportunity.cost_amount + trade.opportunity.expected_profit;
                    return Ok(LegOutcome::Filled(received));
                }
                SwapStatus::Refunded { refund_txid } => {
                    return Ok(LegOutcome::Refunded(refund_txid));
                }
                SwapStatus::Pending | SwapStatus::Observed => {}
            }

            if tokio::time::Instant::now() >= deadline {
                return Ok(LegOutcome::Expired);
            }

            tokio::select! {
                _ = tokio::time::sleep(poll) => {}
                _ = self.shutdown.wait() => return Ok(LegOutcome::Interrupted),
            }
        }
    }

    async fn complete_trade(&self, trade: &mut Trade) -> Result<()> {
        trade.transition(TradeStatus::Completed)?;
        self.trades.write().await.insert(trade.id, trade.clone());
        self.store.delete(trade.id)?;
        info!(
            trade = %trade.log_prefix(),
            pair = %trade.opportunity.pair_symbol,
            profit = trade.opportunity.expected_profit,
            "Trade completed"
        );
        Ok(())
    }

    async fn fail_trade(&self, trade: &mut Trade, reason: &str) -> Result<()> {
        trade.transition(TradeStatus::Failed)?;
        self.persist(trade).await?;
        self.store.archive(trade.id, reason)?;
        warn!(
            trade = %trade.log_prefix(),
            pair = %trade.opportunity.pair_symbol,
            reason,
            "Trade failed"
        );
        Ok(())
    }

    /// Best-effort cancel of an expired dex order, routed through the same
    /// retry policy as everything else
    async fn cancel_best_effort(&self, trade: &Trade, idx: usize) {
        if trade.legs[idx].venue != LegVenue::DexOrder {
            return;
        }
        let Some(order_id) = trade.legs[idx].venue_id.clone() else {
            return;
        };
        let dex = self.dex.clone();
        let result = self
            .retry
            .execute("cancel_order", move || {
                let dex = dex.clone();
                let order_id = order_id.clone();
                async move { dex.cancel_order(&order_id).await }
            })
            .await;
        if let Err(e) = result {
            warn!(trade = %trade.log_prefix(), error = %e, "Order cancel failed");
        }
    }

    async fn swap_path_halted(&self, from: &str, to: &str) -> Result<bool> {
        let swap = self.swap.clone();
        let (from, to) = (from.to_string(), to.to_string());
        self.retry
            .execute("path_halted", move || {
                let swap = swap.clone();
                let from = from.clone();
                let to = to.clone();
                async move { swap.path_halted(&from, &to).await }
            })
            .await
    }

    async fn fetch_balances(&self) -> Result<TokenBalances> {
        let dex = self.dex.clone();
        self.retry
            .execute("token_balances", move || {
                let dex = dex.clone();
                async move { dex.token_balances().await }
            })
            .await
    }

    async fn has_spendable(&self, token: &str, needed: f64) -> Result<bool> {
        let dex = self.dex.clone();
        let token_owned = token.to_string();
        let utxos = self
            .retry
            .execute("spendable_utxos", move || {
                let dex = dex.clone();
                let token = token_owned.clone();
                async move { dex.spendable_utxos(&token).await }
            })
            .await?;
        let unlocked: f64 = utxos.iter().filter(|u| !u.locked).map(|u| u.amount).sum();
        Ok(unlocked >= needed)
    }

    fn address_for(&self, token: &str) -> Result<String> {
        self.config
            .xbridge
            .addresses
            .get(token)
            .cloned()
            .ok_or_else(|| {
                ArbitrageError::Config(format!("No receiving address configured for {}", token))
                    .into()
            })
    }

    /// Write-ahead persistence: the store is updated before execution moves
    /// past the transition
    async fn persist(&self, trade: &Trade) -> Result<()> {
        self.store.upsert(trade)?;
        self.trades.write().await.insert(trade.id, trade.clone());
        Ok(())
    }

    async fn claim_pair(&self, pair: &str) {
        self.active_pairs.lock().await.insert(pair.to_string());
    }

    async fn release_pair(&self, pair: &str) {
        self.active_pairs.lock().await.remove(pair);
    }

    async fn pair_active(&self, pair: &str) -> bool {
        self.active_pairs.lock().await.contains(pair)
    }
}

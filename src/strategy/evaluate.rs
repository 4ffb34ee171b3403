//! Opportunity evaluation
//!
//! Pure profitability math over one dex book level and one swap quote.
//! Everything here is recomputed each evaluation tick and never persisted;
//! only an actionable opportunity is snapshotted into a trade.

use crate::connectors::traits::{OrderBookEntry, SwapQuote};
use crate::state::{Leg, LegSide, LegVenue, OpportunitySnapshot};
use serde::{Deserialize, Serialize};

/// Tolerance for comparing a profit ratio against the configured minimum.
/// A ratio exactly at the margin counts as actionable.
pub const PROFIT_EPSILON: f64 = 1e-9;

/// Which way the round trip runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArbDirection {
    /// Take a dex bid (sell base for quote), swap quote back to base
    SellBaseOnDex,
    /// Take a dex ask (buy base with quote), swap base back to quote
    BuyBaseOnDex,
}

impl ArbDirection {
    /// Wire/persistence encoding
    pub fn as_u8(self) -> u8 {
        match self {
            ArbDirection::SellBaseOnDex => 1,
            ArbDirection::BuyBaseOnDex => 2,
        }
    }
}

/// A transient, recomputed estimate that a profitable round trip exists
#[derive(Debug, Clone)]
pub struct Opportunity {
    /// Base token of the dex market
    pub base_token: String,
    /// Quote token of the dex market
    pub quote_token: String,
    /// Round-trip direction
    pub direction: ArbDirection,
    /// Dex order being taken
    pub dex_order_id: String,
    /// Price of that order
    pub dex_order_price: f64,
    /// Amount of the starting token given up on the dex leg
    pub cost_amount: f64,
    /// Amount of the other token received from the dex leg
    pub receive_amount: f64,
    /// Gross amount of the starting token the swap is expected to return
    pub expected_swap_out: f64,
    /// Estimated dex transaction fee, in starting-token units
    pub dex_fee: f64,
    /// Swap outbound fee quoted at evaluation time
    pub swap_outbound_fee: f64,
    /// Swap memo from the quote
    pub swap_memo: String,
    /// Protocol inbound address from the quote
    pub swap_inbound_address: String,
}

impl Opportunity {
    /// Build an opportunity from a dex book level and a swap quote.
    ///
    /// `dex_fee` must already be denominated in the starting token.
    pub fn from_book_level(
        base_token: &str,
        quote_token: &str,
        direction: ArbDirection,
        level: &OrderBookEntry,
        quote: &SwapQuote,
        dex_fee: f64,
    ) -> Self {
        // Book levels are sized in base units, priced in quote per base
        let (cost_amount, receive_amount) = match direction {
            ArbDirection::SellBaseOnDex => (level.size, level.size * level.price),
            ArbDirection::BuyBaseOnDex => (level.size * level.price, level.size),
        };

        Self {
            base_token: base_token.to_string(),
            quote_token: quote_token.to_string(),
            direction,
            dex_order_id: level.order_id.clone(),
            dex_order_price: level.price,
            cost_amount,
            receive_amount,
            expected_swap_out: quote.expected_amount_out,
            dex_fee,
            swap_outbound_fee: quote.outbound_fee,
            swap_memo: quote.memo.clone(),
            swap_inbound_address: quote.inbound_address.clone(),
        }
    }

    /// Token the round trip starts and ends in
    pub fn start_token(&self) -> &str {
        match self.direction {
            ArbDirection::SellBaseOnDex => &self.base_token,
            ArbDirection::BuyBaseOnDex => &self.quote_token,
        }
    }

    /// Token held between the two legs
    pub fn middle_token(&self) -> &str {
        match self.direction {
            ArbDirection::SellBaseOnDex => &self.quote_token,
            ArbDirection::BuyBaseOnDex => &self.base_token,
        }
    }

    /// Human-readable pair, base/quote
    pub fn pair_symbol(&self) -> String {
        format!("{}/{}", self.base_token, self.quote_token)
    }

    /// Expected net profit in starting-token units, after both venues' fees
    pub fn net_profit(&self) -> f64 {
        self.expected_swap_out - self.swap_outbound_fee - self.cost_amount - self.dex_fee
    }

    /// Expected net profit as a ratio of the cost
    pub fn profit_ratio(&self) -> f64 {
        if self.cost_amount <= 0.0 {
            return 0.0;
        }
        self.net_profit() / self.cost_amount
    }

    /// Whether the opportunity clears the configured minimum margin.
    ///
    /// Requires strictly positive absolute profit as well: a margin of 0.0
    /// must not admit a break-even or losing round trip.
    pub fn is_actionable(&self, min_profit_margin: f64) -> bool {
        self.net_profit() > 0.0 && self.profit_ratio() + PROFIT_EPSILON >= min_profit_margin
    }

    /// Freeze this opportunity for persistence inside a trade
    pub fn snapshot(&self) -> OpportunitySnapshot {
        OpportunitySnapshot {
            pair_symbol: self.pair_symbol(),
            direction: self.direction.as_u8(),
            dex_order_id: self.dex_order_id.clone(),
            dex_order_price: self.dex_order_price,
            cost_amount: self.cost_amount,
            swap_amount: self.receive_amount,
            expected_profit: self.net_profit(),
            expected_profit_ratio: self.profit_ratio(),
            dex_fee: self.dex_fee,
            swap_outbound_fee: self.swap_outbound_fee,
            swap_memo: self.swap_memo.clone(),
            swap_inbound_address: self.swap_inbound_address.clone(),
        }
    }

    /// Build the ordered leg plan: dex order first, then the swap back
    pub fn leg_plan(&self) -> Vec<Leg> {
        let dex_side = match self.direction {
            ArbDirection::SellBaseOnDex => LegSide::Sell,
            ArbDirection::BuyBaseOnDex => LegSide::Buy,
        };
        vec![
            Leg::new(
                LegVenue::DexOrder,
                dex_side,
                self.start_token(),
                self.middle_token(),
                self.cost_amount,
            ),
            Leg::new(
                LegVenue::CrossChainSwap,
                LegSide::Send,
                self.middle_token(),
                self.start_token(),
                self.receive_amount,
            ),
        ]
    }
}

//! Trade and leg state types
//!
//! Statuses form a closed set with an explicit transition table; an illegal
//! transition returns an error instead of silently no-opping.

use crate::{ArbitrageError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Overall status of a trade
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeStatus {
    /// Created and persisted, no leg submitted yet
    Pending,
    /// At least one leg submitted
    InProgress,
    /// Every leg filled
    Completed,
    /// A leg reached a non-filled terminal state
    Failed,
    /// Halted between legs by a cooperative pause signal
    Paused,
}

impl TradeStatus {
    /// Whether this status permits a transition to `to`
    pub fn can_transition(self, to: TradeStatus) -> bool {
        use TradeStatus::*;
        matches!(
            (self, to),
            (Pending, InProgress)
                | (Pending, Failed)
                | (Pending, Paused)
                | (InProgress, Completed)
                | (InProgress, Failed)
                | (InProgress, Paused)
                | (Paused, InProgress)
                | (Paused, Failed)
        )
    }

    /// Whether this status is terminal
    pub fn is_terminal(self) -> bool {
        matches!(self, TradeStatus::Completed | TradeStatus::Failed)
    }
}

impl fmt::Display for TradeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TradeStatus::Pending => write!(f, "pending"),
            TradeStatus::InProgress => write!(f, "in_progress"),
            TradeStatus::Completed => write!(f, "completed"),
            TradeStatus::Failed => write!(f, "failed"),
            TradeStatus::Paused => write!(f, "paused"),
        }
    }
}

/// Status of a single leg
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LegStatus {
    /// Defined at trade creation, not yet submitted
    NotStarted,
    /// Submission call returned a venue identifier
    Submitted,
    /// Poll loop attached, awaiting a terminal venue status
    Monitoring,
    /// Venue reports the leg complete
    Filled,
    /// Venue cancelled or refunded the leg
    Cancelled,
    /// Monitoring deadline passed without a terminal venue status
    Expired,
    /// Leg abandoned after an unrecoverable call failure
    Errored,
}

impl LegStatus {
    /// Whether this status permits a transition to `to`
    pub fn can_transition(self, to: LegStatus) -> bool {
        use LegStatus::*;
        matches!(
            (self, to),
            (NotStarted, Submitted)
                | (NotStarted, Errored)
                | (Submitted, Monitoring)
                | (Submitted, Filled)
                | (Submitted, Cancelled)
                | (Submitted, Expired)
                | (Submitted, Errored)
                | (Monitoring, Filled)
                | (Monitoring, Cancelled)
                | (Monitoring, Expired)
                | (Monitoring, Errored)
        )
    }

    /// Whether this status is terminal
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            LegStatus::Filled | LegStatus::Cancelled | LegStatus::Expired | LegStatus::Errored
        )
    }
}

impl fmt::Display for LegStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LegStatus::NotStarted => write!(f, "not_started"),
            LegStatus::Submitted => write!(f, "submitted"),
            LegStatus::Monitoring => write!(f, "monitoring"),
            LegStatus::Filled => write!(f, "filled"),
            LegStatus::Cancelled => write!(f, "cancelled"),
            LegStatus::Expired => write!(f, "expired"),
            LegStatus::Errored => write!(f, "errored"),
        }
    }
}

/// Venue a leg executes against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LegVenue {
    /// XBridge atomic-swap order on the local daemon
    DexOrder,
    /// Thorchain cross-chain swap
    CrossChainSwap,
}

impl fmt::Display for LegVenue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LegVenue::DexOrder => write!(f, "xbridge"),
            LegVenue::CrossChainSwap => write!(f, "thorchain"),
        }
    }
}

/// Direction of a leg from the engine's perspective
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LegSide {
    /// Taking an ask (we give the quote token)
    Buy,
    /// Taking a bid (we give the base token)
    Sell,
    /// Wallet send into the swap protocol
    Send,
}

impl fmt::Display for LegSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LegSide::Buy => write!(f, "buy"),
            LegSide::Sell => write!(f, "sell"),
            LegSide::Send => write!(f, "send"),
        }
    }
}

/// One atomic step within a trade
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Leg {
    /// Venue this leg executes against
    pub venue: LegVenue,
    /// Direction
    pub side: LegSide,
    /// Token given up by this leg
    pub from_token: String,
    /// Token received by this leg
    pub to_token: String,
    /// Requested amount of `from_token`
    pub requested_amount: f64,
    /// Observed fill amount of `to_token`, once known
    pub fill_amount: Option<f64>,
    /// Venue-assigned identifier (order id or swap tx hash)
    pub venue_id: Option<String>,
    /// Current status
    pub status: LegStatus,
    /// When the submission call returned
    pub submitted_at: Option<DateTime<Utc>>,
    /// When a terminal status was reached
    pub completed_at: Option<DateTime<Utc>>,
}

impl Leg {
    /// Define a leg at trade-creation time
    pub fn new(
        venue: LegVenue,
        side: LegSide,
        from_token: &str,
        to_token: &str,
        requested_amount: f64,
    ) -> Self {
        Self {
            venue,
            side,
            from_token: from_token.to_string(),
            to_token: to_token.to_string(),
            requested_amount,
            fill_amount: None,
            venue_id: None,
            status: LegStatus::NotStarted,
            submitted_at: None,
            completed_at: None,
        }
    }

    /// Validate and apply a status transition.
    ///
    /// Monitoring additionally requires a recorded venue identifier: a leg
    /// may only be monitored once its submission call has returned one.
    pub fn transition(&mut self, to: LegStatus) -> Result<()> {
        if !self.status.can_transition(to) {
            return Err(ArbitrageError::IllegalTransition {
                from: self.status.to_string(),
                to: to.to_string(),
            }
            .into());
        }
        if to == LegStatus::Monitoring && self.venue_id.is_none() {
            return Err(ArbitrageError::IllegalTransition {
                from: self.status.to_string(),
                to: format!("{} without venue id", to),
            }
            .into());
        }
        self.status = to;
        if to.is_terminal() {
            self.completed_at = Some(Utc::now());
        }
        Ok(())
    }

    /// Record a successful submission: venue id, timestamp, Submitted status
    pub fn mark_submitted(&mut self, venue_id: &str) -> Result<()> {
        self.venue_id = Some(venue_id.to_string());
        self.submitted_at = Some(Utc::now());
        self.transition(LegStatus::Submitted)
    }

    /// Record a fill with the observed amount received
    pub fn mark_filled(&mut self, fill_amount: f64) -> Result<()> {
        self.fill_amount = Some(fill_amount);
        self.transition(LegStatus::Filled)
    }
}

/// Snapshot of the opportunity a trade was created from
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpportunitySnapshot {
    /// Pair symbol, e.g. "LTC/BTC"
    pub pair_symbol: String,
    /// Which arbitrage direction: 1 = sell base on dex, 2 = buy base on dex
    pub direction: u8,
    /// XBridge order id being taken
    pub dex_order_id: String,
    /// Price of the dex order
    pub dex_order_price: f64,
    /// Amount given up on the first leg
    pub cost_amount: f64,
    /// Amount to push through the swap leg
    pub swap_amount: f64,
    /// Expected net profit, in units of the cost token
    pub expected_profit: f64,
    /// Expected net profit ratio over the cost amount
    pub expected_profit_ratio: f64,
    /// Estimated dex transaction fee
    pub dex_fee: f64,
    /// Swap outbound fee quoted at evaluation time
    pub swap_outbound_fee: f64,
    /// Swap memo quoted at evaluation time
    pub swap_memo: String,
    /// Protocol inbound address for the swap leg
    pub swap_inbound_address: String,
}

/// A full arbitrage attempt, tracked for crash recovery
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    /// Unique identifier
    pub id: Uuid,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Last transition timestamp
    pub updated_at: DateTime<Utc>,
    /// The opportunity this trade was created from
    pub opportunity: OpportunitySnapshot,
    /// Ordered legs; execution follows this order exactly
    pub legs: Vec<Leg>,
    /// Overall status
    pub status: TradeStatus,
}

impl Trade {
    /// Create a pending trade from an opportunity snapshot and its legs
    pub fn new(opportunity: OpportunitySnapshot, legs: Vec<Leg>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            created_at: now,
            updated_at: now,
            opportunity,
            legs,
            status: TradeStatus::Pending,
        }
    }

    /// Validate and apply a status transition
    pub fn transition(&mut self, to: TradeStatus) -> Result<()> {
        if !self.status.can_transition(to) {
            return Err(ArbitrageError::IllegalTransition {
                from: self.status.to_string(),
                to: to.to_string(),
            }
            .into());
        }
        self.status = to;
        self.touch();
        Ok(())
    }

    /// Refresh the last-updated timestamp
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Index of the first leg that has not filled, if any
    pub fn active_leg_index(&self) -> Option<usize> {
        self.legs.iter().position(|leg| leg.status != LegStatus::Filled)
    }

    /// Whether every leg has filled
    pub fn all_legs_filled(&self) -> bool {
        self.legs.iter().all(|leg| leg.status == LegStatus::Filled)
    }

    /// Short id used as a log prefix
    pub fn log_prefix(&self) -> String {
        self.id.to_string()[..8].to_string()
    }
}

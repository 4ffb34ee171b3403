//! Trade state model and persistence
//!
//! The unit of recovery is the [`Trade`]: an ordered list of venue legs with
//! a closed set of statuses and a validated transition table. Its durable
//! counterpart is written by [`store::TradeStateStore`] after every leg
//! transition (write-ahead) so an unplanned restart can resume in place.

pub mod store;
pub mod trade;

pub use store::TradeStateStore;
pub use trade::{
    Leg, LegSide, LegStatus, LegVenue, OpportunitySnapshot, Trade, TradeStatus,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::store::PnlStore;

/// Raw wire-format event as delivered by the upstream stream.
/// Numeric and time fields arrive string-encoded; the `messageType`
/// discriminator selects the variant. An unknown discriminator fails
/// deserialization outright.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "messageType")]
pub enum RawEvent {
    #[serde(rename = "trades")]
    Trade {
        #[serde(rename = "tradeType")]
        trade_type: String,
        volume: String,
        time: String,
    },
    #[serde(rename = "market")]
    Market {
        #[serde(rename = "buyPrice")]
        buy_price: String,
        #[serde(rename = "sellPrice")]
        sell_price: String,
        #[serde(rename = "startTime")]
        start_time: String,
        #[serde(rename = "endTime")]
        end_time: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

/// A normalized trade execution. Lives in the engine's buffer until a
/// period close consumes or discards it; never mutated after creation.
#[derive(Debug, Clone, PartialEq)]
pub struct TradeEvent {
    pub side: Side,
    /// Traded volume in MW
    pub volume: f64,
    pub timestamp: DateTime<Utc>,
}

/// A normalized market period announcement. Consumed immediately to
/// trigger one aggregation cycle; never stored.
#[derive(Debug, Clone, PartialEq)]
pub struct MarketEvent {
    pub buy_price: f64,
    pub sell_price: f64,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
}

/// Typed event produced by the normalizer.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Trade(TradeEvent),
    Market(MarketEvent),
}

/// Computed result for one closed period. Exactly one is emitted per
/// market event processed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PnlResult {
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub buy_price: f64,
    pub sell_price: f64,
    pub buy_volume: f64,
    pub sell_volume: f64,
    pub pnl: f64,
    pub computed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum WsMessage {
    PnlResult(PnlResult),
    Connected { mode: String },
    Error { message: String },
}

/// Shared application state
pub struct AppState {
    pub tx: broadcast::Sender<WsMessage>,
    pub store: Arc<PnlStore>,
}

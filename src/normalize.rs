//! Event Normalizer
//!
//! Converts raw wire-format events (string-encoded numbers and
//! timestamps) into typed in-memory events. Pure and deterministic,
//! no side effects - safe to retry on the same input.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};

use crate::types::{Event, MarketEvent, RawEvent, Side, TradeEvent};

fn parse_decimal(field: &str, raw: &str) -> Result<f64> {
    let value: f64 = raw
        .trim()
        .parse()
        .with_context(|| format!("{}: not a decimal number: {:?}", field, raw))?;
    if !value.is_finite() {
        bail!("{}: not a finite number: {:?}", field, raw);
    }
    Ok(value)
}

fn parse_instant(field: &str, raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw.trim())
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("{}: not a valid timestamp: {:?}", field, raw))
}

/// Normalize a raw event into its typed representation, or fail.
pub fn normalize(raw: &RawEvent) -> Result<Event> {
    match raw {
        RawEvent::Trade {
            trade_type,
            volume,
            time,
        } => {
            let side = match trade_type.as_str() {
                "BUY" => Side::Buy,
                "SELL" => Side::Sell,
                other => bail!("tradeType: unknown side: {:?}", other),
            };
            Ok(Event::Trade(TradeEvent {
                side,
                volume: parse_decimal("volume", volume)?,
                timestamp: parse_instant("time", time)?,
            }))
        }
        RawEvent::Market {
            buy_price,
            sell_price,
            start_time,
            end_time,
        } => Ok(Event::Market(MarketEvent {
            buy_price: parse_decimal("buyPrice", buy_price)?,
            sell_price: parse_decimal("sellPrice", sell_price)?,
            period_start: parse_instant("startTime", start_time)?,
            period_end: parse_instant("endTime", end_time)?,
        })),
    }
}

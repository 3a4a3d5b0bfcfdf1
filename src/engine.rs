//! Windowed PnL aggregation engine
//!
//! Buffers incoming trades and, on each market event, closes the
//! announced period: trades inside `[period_start, period_end]` are
//! aggregated into one PnL result, trades after `period_end` stay
//! buffered for a later period, and anything older is permanently
//! discarded. Assumes periods are contiguous and market events arrive
//! in non-decreasing `period_end` order.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, error, info};

use crate::store::ResultSink;
use crate::types::{MarketEvent, PnlResult, Side, TradeEvent};

/// Stateful aggregation core. One instance per logical stream
/// partition; the trade buffer is its only mutable state.
pub struct AggregationEngine {
    trade_buffer: Vec<TradeEvent>,
    sink: Arc<dyn ResultSink>,
}

impl AggregationEngine {
    pub fn new(sink: Arc<dyn ResultSink>) -> Self {
        Self {
            trade_buffer: Vec::new(),
            sink,
        }
    }

    /// Number of trades currently awaiting a period close.
    pub fn buffered_trades(&self) -> usize {
        self.trade_buffer.len()
    }

    /// Buffer a trade until a market event closes a period. Trades are
    /// accepted unconditionally, in arrival order; there is no open
    /// period to validate against.
    pub fn on_trade(&mut self, trade: TradeEvent) {
        self.trade_buffer.push(trade);
    }

    /// Close the period announced by `market`. Partitions the buffer,
    /// aggregates volumes by side, persists the result best-effort and
    /// returns it. Exactly one result per market event.
    pub async fn on_market(&mut self, market: MarketEvent) -> PnlResult {
        let mut in_period = Vec::new();
        let mut retained = Vec::new();
        let mut discarded = 0usize;

        for trade in self.trade_buffer.drain(..) {
            if trade.timestamp >= market.period_start && trade.timestamp <= market.period_end {
                in_period.push(trade);
            } else if trade.timestamp > market.period_end {
                retained.push(trade);
            } else {
                // Predates the period and no later period can cover it
                discarded += 1;
            }
        }
        self.trade_buffer = retained;

        if discarded > 0 {
            debug!(
                "Discarded {} stale trades predating period start {}",
                discarded, market.period_start
            );
        }

        let mut buy_volume = 0.0;
        let mut sell_volume = 0.0;
        for trade in &in_period {
            match trade.side {
                Side::Buy => buy_volume += trade.volume,
                Side::Sell => sell_volume += trade.volume,
            }
        }

        let pnl = (market.sell_price - market.buy_price) * (sell_volume - buy_volume);

        let result = PnlResult {
            period_start: market.period_start,
            period_end: market.period_end,
            buy_price: market.buy_price,
            sell_price: market.sell_price,
            buy_volume,
            sell_volume,
            pnl,
            computed_at: Utc::now(),
        };

        info!(
            "Closed period {} - {}: pnl={:.2} (buy={} MW, sell={} MW, {} trades)",
            result.period_start,
            result.period_end,
            result.pnl,
            buy_volume,
            sell_volume,
            in_period.len()
        );

        // Best-effort persistence: a failed store is logged with the
        // full result for manual recovery and never retried. The
        // buffer prune above is kept either way.
        if let Err(e) = self.sink.store(&result).await {
            error!("Failed to persist PnL result {:?}: {:?}", result, e);
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use parking_lot::Mutex;

    #[derive(Default)]
    struct MemorySink {
        results: Mutex<Vec<PnlResult>>,
    }

    #[async_trait]
    impl ResultSink for MemorySink {
        async fn store(&self, result: &PnlResult) -> Result<()> {
            self.results.lock().push(result.clone());
            Ok(())
        }
    }

    struct FailingSink;

    #[async_trait]
    impl ResultSink for FailingSink {
        async fn store(&self, _result: &PnlResult) -> Result<()> {
            anyhow::bail!("sink unavailable")
        }
    }

    fn ts(hhmm: &str) -> DateTime<Utc> {
        format!("2024-03-01T{}:00Z", hhmm).parse().unwrap()
    }

    fn trade(side: Side, volume: f64, hhmm: &str) -> TradeEvent {
        TradeEvent {
            side,
            volume,
            timestamp: ts(hhmm),
        }
    }

    fn market(buy_price: f64, sell_price: f64, start: &str, end: &str) -> MarketEvent {
        MarketEvent {
            buy_price,
            sell_price,
            period_start: ts(start),
            period_end: ts(end),
        }
    }

    fn engine_with_memory_sink() -> (AggregationEngine, Arc<MemorySink>) {
        let sink = Arc::new(MemorySink::default());
        (AggregationEngine::new(sink.clone()), sink)
    }

    #[tokio::test]
    async fn computes_pnl_for_trades_in_period() {
        let (mut engine, sink) = engine_with_memory_sink();

        engine.on_trade(trade(Side::Buy, 10.0, "10:00"));
        engine.on_trade(trade(Side::Sell, 4.0, "10:05"));

        let result = engine.on_market(market(50.0, 55.0, "10:00", "10:10")).await;

        assert_eq!(result.buy_volume, 10.0);
        assert_eq!(result.sell_volume, 4.0);
        assert_eq!(result.pnl, (55.0 - 50.0) * (4.0 - 10.0)); // -30
        assert_eq!(engine.buffered_trades(), 0);
        assert_eq!(sink.results.lock().len(), 1);
    }

    #[tokio::test]
    async fn empty_period_yields_zero_result() {
        let (mut engine, _sink) = engine_with_memory_sink();

        let result = engine.on_market(market(20.0, 22.0, "11:00", "11:10")).await;

        assert_eq!(result.buy_volume, 0.0);
        assert_eq!(result.sell_volume, 0.0);
        assert_eq!(result.pnl, 0.0);
    }

    #[tokio::test]
    async fn stale_trade_is_discarded_permanently() {
        let (mut engine, sink) = engine_with_memory_sink();

        // Before any period the engine ever learns about
        engine.on_trade(trade(Side::Buy, 7.0, "09:50"));

        let result = engine.on_market(market(50.0, 55.0, "10:00", "10:10")).await;

        assert_eq!(result.buy_volume, 0.0);
        assert_eq!(engine.buffered_trades(), 0);

        // Even a later window that would have covered it sees nothing
        let late = engine.on_market(market(50.0, 55.0, "09:45", "10:10")).await;
        assert_eq!(late.buy_volume, 0.0);

        for stored in sink.results.lock().iter() {
            assert_eq!(stored.buy_volume, 0.0);
        }
    }

    #[tokio::test]
    async fn boundary_trades_are_inclusive() {
        let (mut engine, _sink) = engine_with_memory_sink();

        engine.on_trade(trade(Side::Buy, 1.0, "10:00"));
        engine.on_trade(trade(Side::Sell, 2.0, "10:10"));

        let result = engine.on_market(market(50.0, 55.0, "10:00", "10:10")).await;

        assert_eq!(result.buy_volume, 1.0);
        assert_eq!(result.sell_volume, 2.0);
        assert_eq!(engine.buffered_trades(), 0);
    }

    #[tokio::test]
    async fn future_trades_stay_buffered_for_the_next_period() {
        let (mut engine, _sink) = engine_with_memory_sink();

        engine.on_trade(trade(Side::Buy, 3.0, "10:05"));
        engine.on_trade(trade(Side::Sell, 5.0, "10:15"));

        let first = engine.on_market(market(50.0, 55.0, "10:00", "10:10")).await;
        assert_eq!(first.buy_volume, 3.0);
        assert_eq!(first.sell_volume, 0.0);
        assert_eq!(engine.buffered_trades(), 1);

        let second = engine.on_market(market(51.0, 56.0, "10:11", "10:20")).await;
        assert_eq!(second.sell_volume, 5.0);
        assert_eq!(engine.buffered_trades(), 0);
    }

    #[tokio::test]
    async fn exactly_one_result_per_market_event() {
        let (mut engine, sink) = engine_with_memory_sink();

        engine.on_trade(trade(Side::Buy, 1.0, "10:05"));
        engine.on_market(market(50.0, 55.0, "10:00", "10:10")).await;

        assert_eq!(sink.results.lock().len(), 1);
    }

    #[tokio::test]
    async fn volume_is_conserved_over_the_window() {
        let (mut engine, _sink) = engine_with_memory_sink();

        let in_window = [
            trade(Side::Buy, 2.5, "10:01"),
            trade(Side::Sell, 1.5, "10:03"),
            trade(Side::Buy, 4.0, "10:07"),
            trade(Side::Sell, 0.5, "10:09"),
        ];
        let expected: f64 = in_window.iter().map(|t| t.volume).sum();

        for t in in_window {
            engine.on_trade(t);
        }
        engine.on_trade(trade(Side::Buy, 9.0, "10:15")); // outside

        let result = engine.on_market(market(50.0, 55.0, "10:00", "10:10")).await;

        assert_eq!(result.buy_volume + result.sell_volume, expected);
        assert_eq!(
            result.pnl,
            (result.sell_price - result.buy_price) * (result.sell_volume - result.buy_volume)
        );
    }

    #[tokio::test]
    async fn sink_failure_keeps_buffer_pruned_and_processing_alive() {
        let mut engine = AggregationEngine::new(Arc::new(FailingSink));

        engine.on_trade(trade(Side::Buy, 10.0, "10:05"));
        let result = engine.on_market(market(50.0, 55.0, "10:00", "10:10")).await;

        // The result is still computed and the prune is not rolled back:
        // the qualifying trades are gone and cannot be retried.
        assert_eq!(result.buy_volume, 10.0);
        assert_eq!(engine.buffered_trades(), 0);

        // Subsequent events keep flowing
        engine.on_trade(trade(Side::Sell, 2.0, "10:15"));
        let next = engine.on_market(market(50.0, 55.0, "10:11", "10:20")).await;
        assert_eq!(next.sell_volume, 2.0);
    }
}

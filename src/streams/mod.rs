//! Upstream event consumption
//!
//! A single sequential consumer task owns the aggregation engine:
//! events are dispatched to completion one at a time, in arrival
//! order, so the trade buffer needs no locking. The message broker
//! itself is an external collaborator; what arrives here is its
//! delivery of newline-delimited JSON events.

mod live;
mod replay;

pub use live::run_live_stream;
pub use replay::run_file_replay;

use tokio::sync::broadcast;
use tracing::warn;

use crate::engine::AggregationEngine;
use crate::normalize::normalize;
use crate::types::{Event, RawEvent, WsMessage};

/// Dispatch one raw line from the upstream stream. A line that fails
/// to parse or normalize is dropped and logged with its raw content;
/// processing always continues with the next line.
pub async fn dispatch_line(
    line: &str,
    engine: &mut AggregationEngine,
    tx: &broadcast::Sender<WsMessage>,
) {
    let line = line.trim();
    if line.is_empty() {
        return;
    }

    let raw: RawEvent = match serde_json::from_str(line) {
        Ok(raw) => raw,
        Err(e) => {
            warn!("Dropping unparseable event: {} (raw: {})", e, line);
            return;
        }
    };

    match normalize(&raw) {
        Ok(Event::Trade(trade)) => engine.on_trade(trade),
        Ok(Event::Market(market)) => {
            let result = engine.on_market(market).await;
            // No receivers is fine - the read side may be idle
            let _ = tx.send(WsMessage::PnlResult(result));
        }
        Err(e) => warn!("Dropping unnormalizable event: {:?} (raw: {})", e, line),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::PnlStore;
    use std::sync::Arc;

    fn setup() -> (AggregationEngine, Arc<PnlStore>, broadcast::Sender<WsMessage>) {
        let store = Arc::new(PnlStore::open_in_memory().unwrap());
        let engine = AggregationEngine::new(store.clone());
        let (tx, _rx) = broadcast::channel(16);
        (engine, store, tx)
    }

    #[tokio::test]
    async fn dispatches_trades_and_market_close() {
        let (mut engine, store, tx) = setup();

        let lines = [
            r#"{"messageType":"trades","tradeType":"BUY","volume":"10","time":"2024-03-01T10:00:00Z"}"#,
            r#"{"messageType":"trades","tradeType":"SELL","volume":"4","time":"2024-03-01T10:05:00Z"}"#,
            r#"{"messageType":"market","buyPrice":"50","sellPrice":"55","startTime":"2024-03-01T10:00:00Z","endTime":"2024-03-01T10:10:00Z"}"#,
        ];
        for line in lines {
            dispatch_line(line, &mut engine, &tx).await;
        }

        let results = store.recent(10).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].pnl, -30.0);
    }

    #[tokio::test]
    async fn malformed_line_is_skipped_without_buffer_mutation() {
        let (mut engine, store, tx) = setup();

        // Non-numeric volume: normalization fails, nothing is buffered
        dispatch_line(
            r#"{"messageType":"trades","tradeType":"BUY","volume":"plenty","time":"2024-03-01T10:00:00Z"}"#,
            &mut engine,
            &tx,
        )
        .await;
        assert_eq!(engine.buffered_trades(), 0);

        // Subsequent valid events still flow
        dispatch_line(
            r#"{"messageType":"trades","tradeType":"BUY","volume":"2","time":"2024-03-01T10:02:00Z"}"#,
            &mut engine,
            &tx,
        )
        .await;
        assert_eq!(engine.buffered_trades(), 1);

        dispatch_line("this is not json", &mut engine, &tx).await;
        dispatch_line("", &mut engine, &tx).await;
        assert_eq!(engine.buffered_trades(), 1);
        assert_eq!(store.count().unwrap(), 0);
    }

    #[tokio::test]
    async fn market_close_broadcasts_the_result() {
        let (mut engine, _store, tx) = setup();
        let mut rx = tx.subscribe();

        dispatch_line(
            r#"{"messageType":"market","buyPrice":"20","sellPrice":"22","startTime":"2024-03-01T11:00:00Z","endTime":"2024-03-01T11:10:00Z"}"#,
            &mut engine,
            &tx,
        )
        .await;

        match rx.try_recv().unwrap() {
            WsMessage::PnlResult(result) => assert_eq!(result.pnl, 0.0),
            other => panic!("unexpected message: {:?}", other),
        }
    }
}

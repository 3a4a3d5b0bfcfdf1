//! Live mode: consume the upstream HTTP event stream

use anyhow::{bail, Context, Result};
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use super::dispatch_line;
use crate::engine::AggregationEngine;
use crate::types::{AppState, WsMessage};

const MAX_CONNECT_ATTEMPTS: u32 = 5;

/// Connect to the upstream stream with bounded retries and exponential
/// backoff. Exhausting the attempts is a fatal startup error.
async fn connect(client: &reqwest::Client, url: &str) -> Result<reqwest::Response> {
    let mut attempts = 0u32;
    loop {
        match client
            .get(url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
        {
            Ok(response) => {
                info!("Connected to event stream at {}", url);
                return Ok(response);
            }
            Err(e) => {
                attempts += 1;
                if attempts >= MAX_CONNECT_ATTEMPTS {
                    bail!(
                        "Max connect attempts ({}) exceeded: {}",
                        MAX_CONNECT_ATTEMPTS,
                        e
                    );
                }
                let delay = Duration::from_secs(2u64.pow(attempts));
                warn!(
                    "Event stream connect failed (attempt {}/{}), retrying in {:?}: {}",
                    attempts, MAX_CONNECT_ATTEMPTS, delay, e
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

/// Stream newline-delimited JSON events from the upstream endpoint
/// into the aggregation engine until the stream ends.
pub async fn run_live_stream(
    url: String,
    mut engine: AggregationEngine,
    state: Arc<AppState>,
) -> Result<()> {
    let client = reqwest::Client::new();
    let response = connect(&client, &url).await?;

    let _ = state.tx.send(WsMessage::Connected {
        mode: "live".to_string(),
    });

    let mut stream = response.bytes_stream();
    let mut pending = String::new();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.context("Event stream read failed")?;
        pending.push_str(&String::from_utf8_lossy(&chunk));

        while let Some(pos) = pending.find('\n') {
            let line: String = pending.drain(..=pos).collect();
            dispatch_line(&line, &mut engine, &state.tx).await;
        }
    }

    // Trailing line without a newline terminator
    if !pending.trim().is_empty() {
        dispatch_line(&pending, &mut engine, &state.tx).await;
    }

    warn!(
        "Event stream ended ({} trades left unflushed)",
        engine.buffered_trades()
    );
    Ok(())
}

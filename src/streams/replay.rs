//! Replay mode: feed events from a local newline-delimited JSON file

use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

use super::dispatch_line;
use crate::engine::AggregationEngine;
use crate::types::{AppState, WsMessage};

/// Run the aggregation pipeline over a recorded event file. Same
/// dispatch path as the live stream; useful for demos and offline
/// inspection of a captured stream.
pub async fn run_file_replay(
    path: &Path,
    mut engine: AggregationEngine,
    state: Arc<AppState>,
) -> Result<()> {
    let contents = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read replay file {}", path.display()))?;

    let _ = state.tx.send(WsMessage::Connected {
        mode: "replay".to_string(),
    });

    let mut dispatched = 0usize;
    for line in contents.lines() {
        dispatch_line(line, &mut engine, &state.tx).await;
        dispatched += 1;
    }

    info!(
        "Replay finished: {} lines dispatched from {}",
        dispatched,
        path.display()
    );
    Ok(())
}

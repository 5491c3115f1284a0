//! Wave-parallel execution.
//!
//! Nodes whose dependencies have all settled run together, bounded by
//! `max_parallel_nodes`. The reported result matches sequential mode.

use futures::stream::{FuturesUnordered, StreamExt};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use super::engine::{resolve_inputs, run_node, RunState};
use super::registry::NodeRegistry;
use crate::core::config::EngineConfig;

/// Executes the graph wave by wave, running the nodes of one wave concurrently.
///
/// Every dependency of a node sits in an earlier wave, so inputs are resolved
/// before the wave starts. Outcomes are reported in topological order, which
/// keeps the result independent of completion timing.
pub(super) async fn execute_waves(registry: &NodeRegistry, config: &EngineConfig, state: &mut RunState) {
    let (order, _) = registry.topological_order();
    state.plan(registry, &order);
    let (waves, leftover) = registry.waves();
    let semaphore = Arc::new(Semaphore::new(config.max_parallel_nodes));

    for (wave_number, wave) in waves.into_iter().enumerate() {
        debug!("Starting wave {} with {} nodes", wave_number, wave.len());

        let mut ready = Vec::with_capacity(wave.len());
        for index in wave {
            let node = registry.node_at(index);
            match resolve_inputs(registry, node, &state.results, config.upstream_failure) {
                Ok(inputs) => {
                    state.node_started(node);
                    ready.push((node, inputs));
                }
                Err((error, inputs)) => state.skip(node, error, inputs),
            }
        }

        let mut running = FuturesUnordered::new();
        for (position, (node, inputs)) in ready.into_iter().enumerate() {
            let semaphore = semaphore.clone();
            running.push(async move {
                // The semaphore is never closed
                let _permit = semaphore.acquire().await.ok();
                (position, node, run_node(node, inputs, config).await)
            });
        }

        let mut finished = Vec::with_capacity(running.len());
        while let Some(outcome) = running.next().await {
            finished.push(outcome);
        }
        finished.sort_by_key(|(position, _, _)| *position);

        for (_, node, run) in finished {
            state.record(node, run);
        }
    }

    if !leftover.is_empty() {
        warn!("{} nodes could not be scheduled", leftover.len());
    }
    state.record_unordered(registry, leftover);
}

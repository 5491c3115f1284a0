use anyhow::Result;
use std::sync::Arc;
use tracing::info;

use layerdag::{create_sample_dag, EngineConfig, LayerDagEngine, LoggingEventSink};

/// Runs the three-layer sample graph and prints its results, statistics and
/// graph exports. An optional first argument names a YAML engine config.
#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().init();

    let mut engine = create_sample_dag()?;
    if let Some(path) = std::env::args().nth(1) {
        let config = EngineConfig::from_yaml_file(&path)?;
        info!("Using engine config from {}", path);
        engine = rebuild_with_config(config)?;
    }
    engine.set_event_sink(Arc::new(LoggingEventSink));

    let result = engine.execute().await;
    println!("success: {}", result.success);
    println!("order:   {}", result.execution_order.join(" -> "));
    for node_id in &result.execution_order {
        if let Some(value) = result.result(node_id) {
            println!("  {}: {}", node_id, value);
        }
    }
    for error in &result.errors {
        println!("  {} failed: {}", error.node_id, error.error);
    }
    println!("time:    {:.3}ms", result.execution_time_ms());

    let stats = engine.statistics();
    println!(
        "\n{} nodes across {} layers: {:?}",
        stats.total_nodes, stats.layer_count, stats.layer_distribution
    );

    let report = result.report();
    println!("\n{}", serde_json::to_string_pretty(&report)?);

    let visualization = engine.generate_visualization_data();
    println!("\n{}", visualization.to_json()?);
    println!("\n{}", visualization.to_dot());

    Ok(())
}

/// The sample graph, registered on an engine using `config`
fn rebuild_with_config(config: EngineConfig) -> Result<LayerDagEngine> {
    let sample = create_sample_dag()?;
    let mut engine = LayerDagEngine::with_config(config)?;
    for node in sample.get_nodes().iter() {
        engine.add_node(node.clone())?;
    }
    Ok(engine)
}

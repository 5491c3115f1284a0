//! A small three-layer graph for demos and smoke tests: business metrics
//! (layer 1) feed a product-market-fit check (layer 100), which selects a
//! package to run (layer 950).

use serde::{Deserialize, Serialize};
use serde_json::json;

use super::engine::LayerDagEngine;
use super::node::{Node, NodeInputs};
use crate::core::errors::Result;

pub const SYMBOLS_NODE: &str = "M^1-001";
pub const PMF_NODE: &str = "D^100-001";
pub const PKG_NODE: &str = "X^950-001";

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct BusinessSymbols {
    pub b_mrr: f64,
    pub u_dau_mau: f64,
    pub t_uptime: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PmfDecision {
    pub pmf_achieved: bool,
    pub confidence: f64,
}

pub fn create_engine() -> LayerDagEngine {
    LayerDagEngine::new()
}

pub fn create_sample_dag() -> Result<LayerDagEngine> {
    let mut engine = create_engine();

    engine.add_node(
        Node::from_fn(SYMBOLS_NODE, |_| async {
            Ok::<_, anyhow::Error>(serde_json::to_value(BusinessSymbols {
                b_mrr: 0.45,
                u_dau_mau: 0.62,
                t_uptime: 0.98,
            })?)
        })
        .with_description("Symbol generation: business metrics")
        .with_estimated_execution_ms(5),
    )?;

    engine.add_node(
        Node::from_fn(PMF_NODE, |inputs: NodeInputs| async move {
            let symbols: BusinessSymbols = inputs.get_as(SYMBOLS_NODE)?;
            Ok::<_, anyhow::Error>(serde_json::to_value(PmfDecision {
                pmf_achieved: symbols.b_mrr > 0.3 && symbols.u_dau_mau > 0.5,
                confidence: 0.89,
            })?)
        })
        .with_dependencies([SYMBOLS_NODE])
        .with_description("PMF achievement check")
        .with_estimated_execution_ms(3),
    )?;

    engine.add_node(
        Node::from_fn(PKG_NODE, |inputs: NodeInputs| async move {
            let decision: PmfDecision = inputs.get_as(PMF_NODE)?;
            let package = if decision.pmf_achieved {
                "GROWTH_VIRAL_SCALE"
            } else {
                "CRISIS_MRR_RECOVERY"
            };
            Ok::<_, anyhow::Error>(json!({
                "selectedPKG": package,
                "executionScheduled": true,
            }))
        })
        .with_dependencies([PMF_NODE])
        .with_description("PKG selection and execution")
        .with_estimated_execution_ms(2),
    )?;

    Ok(engine)
}

pub mod engine;
pub mod events;
pub mod layer;
pub mod node;
mod parallel;
pub mod registry;
pub mod result;
pub mod sample;
pub mod statistics;

pub use engine::LayerDagEngine;
pub use events::{BufferingEventSink, EngineEvent, EngineEventEnvelope, EventSink, LoggingEventSink};
pub use layer::{extract_layer, Layer, LayeredId, UNLAYERED};
pub use node::{FunctionAction, Node, NodeAction, NodeInputs, NodeMetadata, ResourceRequirements};
pub use registry::NodeRegistry;
pub use result::{
    ExecutionError, ExecutionReport, ExecutionResult, ExecutionSummary, NodeOutcome, NodeTiming,
    PerformanceWarning,
};
pub use sample::{create_engine, create_sample_dag};
pub use statistics::{DagStatistics, VisualEdge, VisualNode, VisualizationData};

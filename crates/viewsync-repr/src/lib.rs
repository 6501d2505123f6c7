//! # ViewSync Representation
//!
//! 表示物件與更新抑制執行器

pub mod events;
pub mod executive;
pub mod pipeline;
pub mod representation;

// Re-export 主要類型
pub use events::{DataUpdated, DataUpdatedEmitter, DataUpdatedObserver};
pub use executive::{AlwaysExecute, SuppressingExecutive, Suppressible, SuppressionGate};
pub use pipeline::{
    Algorithm, DemandDrivenExecutive, ExecutionOutcome, ExecutionRequest, PipelineStage,
    SharedStage, Timestamp, Upstream,
};
pub use representation::{
    DataRepresentation, Representation, RepresentationAlgorithm, RepresentationState,
    SharedRepresentation,
};

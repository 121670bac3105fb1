// src/core/operation/mod.rs

//! The operation taxonomy and DAG-scheduled processor: the master-side
//! worker pool that executes cluster mutations while respecting the
//! exclusivity/dependency/obstruction constraint sets.

pub mod graph;
pub mod labels;
pub mod processor;
pub mod types;

pub use graph::OperationGraph;
pub use processor::{OperationProcessor, ProcessorContext};
pub use types::{DependencySets, Operation, OperationState, OperationType};

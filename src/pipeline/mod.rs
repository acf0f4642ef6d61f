// src/pipeline/mod.rs

pub mod context;
pub mod frame_context;
pub mod metrics;

pub use context::{FrameSummary, PipelineContext, PipelineOptions};
pub use frame_context::FrameContext;
pub use metrics::{MetricsSummary, PipelineMetrics};

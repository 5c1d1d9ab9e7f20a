pub mod abnormality;
pub mod cache;
pub mod config;
pub mod errors;
pub mod imageops;
pub mod loader;
pub mod mask_codec;
pub mod model;
pub mod pipeline;
pub mod segmenter;
pub mod server;
pub mod traits;

pub mod mocks;

pub use abnormality::{detect_abnormalities, Finding, ScoringParams};
pub use cache::SegmenterCache;
pub use config::Config;
pub use errors::{MedSegError, Result};
pub use model::{load_segmenter, OnnxSegmenter};
pub use pipeline::{AnalysisPipeline, AnalysisRequest, AnalysisResult, PipelineSettings};
pub use segmenter::{segment_slice, HeuristicParams, ThresholdSegmenter};
pub use traits::*;

#[cfg(test)]
pub use mocks::*;

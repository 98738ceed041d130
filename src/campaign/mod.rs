//! Campaign files and the built-in pipeline kinds they can refer to.

pub mod builtin;
pub mod file;

pub use builtin::{
    parse_scores, random_branching, split_on_regression, GenerationalPipeline, ScoreSplitPipeline,
    DEFAULT_MAX_SUB_PIPELINES, DEFAULT_SPAWN_PROBABILITY,
};
pub use file::{CampaignFile, PipelineEntry};

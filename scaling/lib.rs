#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]
#![deny(clippy::no_effect_underscore_binding)]
pub mod config;
pub mod data;
pub mod design;
pub mod experiment;
pub mod goodness;
pub mod moments;
pub mod progress;
pub mod regression;
pub mod report;
pub mod split;
pub mod types;

pub use experiment::{
    ConfigFailure, EvaluationResult, ExperimentPlan, ExperimentReport, FailureKind,
    PipelineError, evaluate_configuration, run_experiment,
};
pub use types::{ConfigKey, RankWindow, SampleMatrix, SplitOrientation, SplitPlan, SplitSize};

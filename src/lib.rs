//! Data preparation for the crayfish/snail predation trials: loads the
//! crayfish and snail-trial sheets, joins them, derives consumption and
//! availability metrics, applies the exclusion rules and exports the
//! analysis tables for model fitting.

pub mod config;
pub mod data;
pub mod error;
pub mod export;
pub mod sample;
pub mod summary;
pub mod theme;

pub use config::PipelineConfig;
pub use data::{Pipeline, PipelineOutput, RunReport};
pub use error::{PipelineError, Result};

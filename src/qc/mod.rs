//! Quality control of a genotyped case/control cohort before imputation.
//!
//! A fixed sequence of filter stages removes low-quality variants and samples.
//! Every stage computes its metrics on the dataset left by the previous stage.

pub mod cli;
pub mod dataset;
pub mod io;
pub mod metrics;
pub mod params;
pub mod pipeline;
pub mod report;
pub mod sex;
pub mod stage;
pub mod stats;

use std::process::{ExitCode, Termination};

use crate::qc::stage::StageKind;

/// Fatal conditions of a QC run.
///
/// None of these is recoverable, every later stage depends on a valid and
/// non-empty dataset from every earlier stage.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum QcError {
    /// Required sample or variant annotations are missing or inconsistent.
    #[error("invalid dataset: {0}")]
    DatasetFormat(String),
    /// A metric could not be computed for the current dataset.
    #[error(
        "metrics unavailable in stage {stage} ({threshold}): {reason}; had {n_samples_before} \
         samples and {n_variants_before} variants before the stage"
    )]
    MetricsUnavailable {
        stage: StageKind,
        threshold: String,
        reason: String,
        n_samples_before: usize,
        n_variants_before: usize,
    },
    /// A stage removed all samples or all variants.
    #[error(
        "dataset exhausted in stage {stage} ({threshold}): had {n_samples_before} samples and \
         {n_variants_before} variants before the stage"
    )]
    DatasetExhausted {
        stage: StageKind,
        threshold: String,
        n_samples_before: usize,
        n_variants_before: usize,
    },
    /// The stage is declared but has no implementation.
    #[error("stage {stage} ({threshold}) is not implemented, disable it explicitly")]
    NotImplementedStage { stage: StageKind, threshold: String },
    /// Threshold parameters out of range.
    #[error("invalid QC parameters: {0}")]
    InvalidParams(String),
}

impl QcError {
    /// Process exit code to use for this error.
    pub fn exit_code(&self) -> u8 {
        match self {
            QcError::DatasetFormat(_) => 2,
            QcError::MetricsUnavailable { .. } => 3,
            QcError::DatasetExhausted { .. } => 4,
            QcError::NotImplementedStage { .. } => 5,
            QcError::InvalidParams(_) => 6,
        }
    }
}

impl Termination for QcError {
    fn report(self) -> ExitCode {
        ExitCode::from(self.exit_code())
    }
}

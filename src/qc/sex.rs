//! Stages 3 to 5: reported sex against sex inferred from chrX heterozygosity.

use indexmap::IndexMap;

use crate::err::QcError;

use super::{
    dataset::{Dataset, Sex},
    metrics::{InferredSex, MetricsProvider, SexImputation, SexThresholds},
    stage::{
        filter_samples, unavailable, Distribution, FStatPoint, FilterStage, StageKind,
        StageOutcome,
    },
};

fn impute<S: FilterStage>(
    stage: &S,
    provider: &dyn MetricsProvider,
    dataset: &Dataset,
    thresholds: &SexThresholds,
) -> Result<IndexMap<String, SexImputation>, QcError> {
    provider
        .impute_sex(dataset, thresholds)
        .map_err(unavailable(stage, dataset))
}

/// F statistics with the reported sex, in dataset order.
fn f_stat_points(dataset: &Dataset, imputed: &IndexMap<String, SexImputation>) -> Distribution {
    Distribution::FStatistic(
        dataset
            .samples()
            .iter()
            .map(|s| FStatPoint {
                sample: s.id.clone(),
                f_stat: imputed.get(&s.id).and_then(|i| i.f_stat),
                reported_sex: s.sex,
            })
            .collect(),
    )
}

/// Stage 3: exclude samples whose F statistic contradicts the reported sex.
///
/// A reported male with `F < fhet_x` or a reported female with `F > fhet_y`
/// is excluded. Samples without an F statistic are kept.
#[derive(Debug, Clone, Copy)]
pub struct SexCheckStage {
    pub thresholds: SexThresholds,
}

impl FilterStage for SexCheckStage {
    type Metrics = IndexMap<String, SexImputation>;

    fn kind(&self) -> StageKind {
        StageKind::SexCheck
    }

    fn threshold_label(&self) -> String {
        format!(
            "F < {:.2} (male) or F > {:.2} (female)",
            self.thresholds.fhet_x, self.thresholds.fhet_y
        )
    }

    fn compute_metrics(
        &self,
        provider: &dyn MetricsProvider,
        dataset: &Dataset,
    ) -> Result<Self::Metrics, QcError> {
        impute(self, provider, dataset, &self.thresholds)
    }

    fn apply(&self, dataset: &Dataset, metrics: &Self::Metrics) -> Result<StageOutcome, QcError> {
        let SexThresholds { fhet_y, fhet_x } = self.thresholds;
        let (kept, excluded) =
            filter_samples(self, dataset, metrics, |sample, imputed| {
                match (sample.sex, imputed.f_stat) {
                    (Sex::Male, Some(f)) => f < fhet_x,
                    (Sex::Female, Some(f)) => f > fhet_y,
                    _ => false,
                }
            })?;
        Ok(StageOutcome {
            dataset: kept,
            excluded,
            flagged: Vec::new(),
            distribution: Some(f_stat_points(dataset, metrics)),
        })
    }
}

/// Whether the reported sex and the inferred sex are both known and differ.
fn is_violation(reported: Sex, inferred: InferredSex) -> bool {
    matches!(
        (reported, inferred),
        (Sex::Male, InferredSex::Female) | (Sex::Female, InferredSex::Male)
    )
}

/// Whether the reported sex is undefined or the inferred sex is ambiguous.
fn is_warning(reported: Sex, inferred: InferredSex) -> bool {
    reported == Sex::Unknown || inferred == InferredSex::Ambiguous
}

/// Stage 4: exclude samples whose reported sex differs from the inferred sex.
#[derive(Debug, Clone, Copy)]
pub struct SexViolationStage {
    pub thresholds: SexThresholds,
}

impl FilterStage for SexViolationStage {
    type Metrics = IndexMap<String, SexImputation>;

    fn kind(&self) -> StageKind {
        StageKind::SexViolation
    }

    fn threshold_label(&self) -> String {
        "reported sex != inferred sex".to_string()
    }

    fn compute_metrics(
        &self,
        provider: &dyn MetricsProvider,
        dataset: &Dataset,
    ) -> Result<Self::Metrics, QcError> {
        impute(self, provider, dataset, &self.thresholds)
    }

    fn apply(&self, dataset: &Dataset, metrics: &Self::Metrics) -> Result<StageOutcome, QcError> {
        let (kept, excluded) =
            filter_samples(self, dataset, metrics, |sample, imputed| {
                is_violation(sample.sex, imputed.inferred_sex)
            })?;
        Ok(StageOutcome {
            dataset: kept,
            excluded,
            flagged: Vec::new(),
            distribution: None,
        })
    }
}

/// Stage 5: flag samples with undefined reported or ambiguous inferred sex.
///
/// Flagged samples stay in the dataset.
#[derive(Debug, Clone, Copy)]
pub struct SexWarningStage {
    pub thresholds: SexThresholds,
}

impl FilterStage for SexWarningStage {
    type Metrics = IndexMap<String, SexImputation>;

    fn kind(&self) -> StageKind {
        StageKind::SexWarning
    }

    fn threshold_label(&self) -> String {
        "reported sex unknown or inferred sex ambiguous".to_string()
    }

    fn compute_metrics(
        &self,
        provider: &dyn MetricsProvider,
        dataset: &Dataset,
    ) -> Result<Self::Metrics, QcError> {
        impute(self, provider, dataset, &self.thresholds)
    }

    fn apply(&self, dataset: &Dataset, metrics: &Self::Metrics) -> Result<StageOutcome, QcError> {
        // nothing is excluded, the lookup only checks that the metrics are fresh
        let (_, flagged) = filter_samples(self, dataset, metrics, |sample, imputed| {
            is_warning(sample.sex, imputed.inferred_sex)
        })?;
        Ok(StageOutcome {
            dataset: dataset.clone(),
            excluded: Vec::new(),
            flagged,
            distribution: None,
        })
    }
}

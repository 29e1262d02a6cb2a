//! The pipeline report and its aggregation into summary tables.

use super::{
    dataset::{CohortCounts, Dataset, Phenotype},
    metrics::MetricsProvider,
    params::QcParams,
    stage::{StageKind, StageResult, StageStatus},
};

/// P-value below which an association counts as genome-wide significant.
pub const GENOME_WIDE_SIGNIFICANCE: f64 = 5e-8;

/// Call rates split by case/control status; `None` for an empty group.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct CallRateSeries {
    pub cases: Option<Vec<f64>>,
    pub controls: Option<Vec<f64>>,
}

/// Summary of the case/control association scan.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct AssociationSummary {
    /// Variants with a defined p-value.
    pub n_tested: usize,
    /// Variants with `p < GENOME_WIDE_SIGNIFICANCE`.
    pub n_significant: usize,
    pub min_p_value: Option<f64>,
    /// All defined p-values, in variant order.
    pub p_values: Vec<f64>,
}

impl AssociationSummary {
    pub fn from_p_values<I: IntoIterator<Item = Option<f64>>>(p_values: I) -> Self {
        let p_values = p_values.into_iter().flatten().collect::<Vec<_>>();
        Self {
            n_tested: p_values.len(),
            n_significant: p_values
                .iter()
                .filter(|p| **p < GENOME_WIDE_SIGNIFICANCE)
                .count(),
            min_p_value: p_values.iter().copied().reduce(f64::min),
            p_values,
        }
    }
}

/// Metric series for plotting the cohort before or after QC.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Diagnostics {
    /// Variant call rates computed within cases and within controls.
    pub variant_call_rate: CallRateSeries,
    /// Sample call rates of cases and of controls.
    pub sample_call_rate: CallRateSeries,
    /// Only present when the association scan was requested.
    pub association: Option<AssociationSummary>,
}

/// Cohort composition and diagnostics at one point of the pipeline.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct CohortSnapshot {
    pub counts: CohortCounts,
    pub diagnostics: Diagnostics,
}

impl CohortSnapshot {
    /// Capture counts and diagnostics of `dataset`.
    ///
    /// Diagnostics never fail the run: groups without samples or a missing
    /// case/control contrast leave the respective series empty.
    pub fn capture(
        dataset: &Dataset,
        provider: &dyn MetricsProvider,
        with_association: bool,
    ) -> Self {
        let mut diagnostics = Diagnostics::default();
        for phenotype in [Phenotype::Case, Phenotype::Control] {
            let group = dataset.restrict_to_phenotype(phenotype);
            let variant_rates = match provider.variant_metrics(&group) {
                Ok(metrics) if !group.is_exhausted() => {
                    Some(metrics.values().map(|m| m.call_rate).collect::<Vec<_>>())
                }
                _ => None,
            };
            let sample_rates = match provider.sample_metrics(&group) {
                Ok(metrics) if !group.is_exhausted() => {
                    Some(metrics.values().map(|m| m.call_rate).collect::<Vec<_>>())
                }
                _ => None,
            };
            match phenotype {
                Phenotype::Case => {
                    diagnostics.variant_call_rate.cases = variant_rates;
                    diagnostics.sample_call_rate.cases = sample_rates;
                }
                _ => {
                    diagnostics.variant_call_rate.controls = variant_rates;
                    diagnostics.sample_call_rate.controls = sample_rates;
                }
            }
        }
        if with_association {
            diagnostics.association = match provider.association_p_values(dataset) {
                Ok(p_values) => Some(AssociationSummary::from_p_values(p_values.into_values())),
                Err(e) => {
                    tracing::warn!("skipping association diagnostics: {}", e);
                    None
                }
            };
        }

        Self {
            counts: dataset.cohort_counts(),
            diagnostics,
        }
    }
}

/// Ordered stage results with the cohort before and after QC.
///
/// Only `ReportBuilder::finish` creates a report; it cannot be changed after.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct PipelineReport {
    qc_round: String,
    params: QcParams,
    pre_qc: CohortSnapshot,
    post_qc: CohortSnapshot,
    stages: Vec<StageResult>,
}

impl PipelineReport {
    pub fn qc_round(&self) -> &str {
        &self.qc_round
    }

    pub fn params(&self) -> &QcParams {
        &self.params
    }

    pub fn pre_qc(&self) -> &CohortSnapshot {
        &self.pre_qc
    }

    pub fn post_qc(&self) -> &CohortSnapshot {
        &self.post_qc
    }

    pub fn stages(&self) -> &[StageResult] {
        &self.stages
    }

    pub fn stage(&self, kind: StageKind) -> Option<&StageResult> {
        self.stages.iter().find(|s| s.stage == kind)
    }
}

/// Accumulates stage results while the pipeline runs.
#[derive(Debug, Clone)]
pub struct ReportBuilder {
    params: QcParams,
    pre_qc: CohortSnapshot,
    stages: Vec<StageResult>,
}

impl ReportBuilder {
    pub fn new(params: QcParams, pre_qc: CohortSnapshot) -> Self {
        Self {
            params,
            pre_qc,
            stages: Vec::new(),
        }
    }

    /// Append the result of the next stage.
    pub fn push(&mut self, result: StageResult) {
        self.stages.push(result);
    }

    pub fn stages(&self) -> &[StageResult] {
        &self.stages
    }

    /// Give up on the report, keeping the stage results gathered so far.
    pub fn into_stages(self) -> Vec<StageResult> {
        self.stages
    }

    pub fn finish(self, post_qc: CohortSnapshot) -> PipelineReport {
        PipelineReport {
            qc_round: self.params.qc_round.clone(),
            params: self.params,
            pre_qc: self.pre_qc,
            post_qc,
            stages: self.stages,
        }
    }
}

/// One category of the cohort composition.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct CompositionRow {
    pub category: String,
    pub pre_qc: usize,
    pub post_qc: usize,
    /// `pre_qc - post_qc`.
    pub excluded: usize,
}

impl CompositionRow {
    fn new(category: &str, pre_qc: usize, post_qc: usize) -> Self {
        Self {
            category: category.to_string(),
            pre_qc,
            post_qc,
            excluded: pre_qc.saturating_sub(post_qc),
        }
    }
}

/// Cohort composition before and after QC.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct SizeOfSampleTable {
    pub rows: Vec<CompositionRow>,
}

impl SizeOfSampleTable {
    pub fn row(&self, category: &str) -> Option<&CompositionRow> {
        self.rows.iter().find(|r| r.category == category)
    }
}

/// Exclusions of one stage.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ExclusionRow {
    pub order: usize,
    pub stage: StageKind,
    pub description: String,
    pub status: StageStatus,
    pub threshold: String,
    pub n_excluded: usize,
    pub n_flagged: usize,
}

/// Exclusions by stage, in pipeline order.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ExclusionOverviewTable {
    pub rows: Vec<ExclusionRow>,
}

/// Project a report onto the two summary tables.
///
/// The composition table only uses the pre- and post-QC snapshots; stage
/// exclusion counts are never summed into it.
pub fn aggregate(report: &PipelineReport) -> (SizeOfSampleTable, ExclusionOverviewTable) {
    let pre = &report.pre_qc().counts;
    let post = &report.post_qc().counts;
    let size_of_sample = SizeOfSampleTable {
        rows: vec![
            CompositionRow::new("cases", pre.phenotype.cases, post.phenotype.cases),
            CompositionRow::new("controls", pre.phenotype.controls, post.phenotype.controls),
            CompositionRow::new(
                "unknown phenotype",
                pre.phenotype.unknown,
                post.phenotype.unknown,
            ),
            CompositionRow::new("males", pre.sex.males, post.sex.males),
            CompositionRow::new("females", pre.sex.females, post.sex.females),
            CompositionRow::new("unknown sex", pre.sex.unknown, post.sex.unknown),
            CompositionRow::new("samples", pre.n_samples, post.n_samples),
            CompositionRow::new("variants", pre.n_variants, post.n_variants),
        ],
    };
    let exclusion_overview = ExclusionOverviewTable {
        rows: report
            .stages()
            .iter()
            .map(|s| ExclusionRow {
                order: s.stage.order(),
                stage: s.stage,
                description: s.stage.title().to_string(),
                status: s.status,
                threshold: s.threshold.clone(),
                n_excluded: s.n_excluded,
                n_flagged: s.flagged.len(),
            })
            .collect(),
    };

    (size_of_sample, exclusion_overview)
}

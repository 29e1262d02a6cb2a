//! The filter stages and their fixed-shape results.

use std::collections::HashSet;

use indexmap::IndexMap;

use crate::err::QcError;

use super::{
    dataset::{Dataset, Phenotype, Sample, Sex},
    metrics::{MetricsProvider, SampleMetrics, VariantMetrics},
};

/// The QC stages in pipeline order.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    strum::Display,
    strum::EnumIter,
    serde::Serialize,
    serde::Deserialize,
)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum StageKind {
    /// Variant call rate before sample filtering (`pre_geno`).
    PreFilterVariantCallRate,
    /// Sample call rate (`mind`).
    SampleCallRate,
    /// F statistic inconsistent with reported sex (`fhet_x`, `fhet_y`).
    SexCheck,
    /// Reported sex differs from inferred sex.
    SexViolation,
    /// Reported sex unknown or inferred sex ambiguous; recorded only.
    SexWarning,
    /// Stringent variant call rate (`geno`).
    VariantCallRate,
    /// Call rate difference between cases and controls (`midi`).
    MissingnessDifference,
    /// Variants without an observed minor allele.
    InvariantVariant,
    /// Minor allele frequency (`maf`).
    Maf,
    /// HWE p-value in controls (`hwe_threshold_control`).
    HweControls,
    /// HWE p-value in cases (`hwe_threshold_case`).
    HweCases,
}

/// The entity kind a stage filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, serde::Serialize, serde::Deserialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Axis {
    Samples,
    Variants,
}

impl StageKind {
    /// 1-based position in the pipeline.
    pub fn order(&self) -> usize {
        *self as usize + 1
    }

    /// Axis along which the stage excludes, `None` for the warning stage.
    pub fn axis(&self) -> Option<Axis> {
        match self {
            StageKind::SampleCallRate | StageKind::SexCheck | StageKind::SexViolation => {
                Some(Axis::Samples)
            }
            StageKind::SexWarning => None,
            StageKind::PreFilterVariantCallRate
            | StageKind::VariantCallRate
            | StageKind::MissingnessDifference
            | StageKind::InvariantVariant
            | StageKind::Maf
            | StageKind::HweControls
            | StageKind::HweCases => Some(Axis::Variants),
        }
    }

    /// Human readable description for the exclusion overview.
    pub fn title(&self) -> &'static str {
        match self {
            StageKind::PreFilterVariantCallRate => "SNPs: call rate (pre-filter)",
            StageKind::SampleCallRate => "IDs: call rate (cases/controls)",
            StageKind::SexCheck => "IDs: FHET outside of the sex thresholds",
            StageKind::SexViolation => "IDs: sex violations -excluded-",
            StageKind::SexWarning => "IDs: sex warnings (undefined/ambiguous)",
            StageKind::VariantCallRate => "SNPs: call rate",
            StageKind::MissingnessDifference => "SNPs: missing rate difference (cases/controls)",
            StageKind::InvariantVariant => "SNPs: without valid association p-value (invariant)",
            StageKind::Maf => "SNPs: minor allele frequency",
            StageKind::HweControls => "SNPs: HWE in controls",
            StageKind::HweCases => "SNPs: HWE in cases",
        }
    }
}

/// How a stage took part in the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, serde::Serialize, serde::Deserialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum StageStatus {
    /// Predicate evaluated and exclusions applied.
    Applied,
    /// Evaluated, flagged entities are recorded but kept.
    Recorded,
    /// Disabled by configuration.
    Skipped,
}

/// F statistic of one sample, for plotting.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct FStatPoint {
    pub sample: String,
    pub f_stat: Option<f64>,
    pub reported_sex: Sex,
}

/// Metric distribution captured when a stage ran.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "kind", content = "values", rename_all = "kebab-case")]
pub enum Distribution {
    VariantCallRate(Vec<f64>),
    SampleCallRate(Vec<f64>),
    FStatistic(Vec<FStatPoint>),
    MinorAlleleFrequency(Vec<f64>),
    HwePValue(Vec<f64>),
}

/// Number of samples and variants at one point.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct DatasetSize {
    pub n_samples: usize,
    pub n_variants: usize,
}

impl From<&Dataset> for DatasetSize {
    fn from(dataset: &Dataset) -> Self {
        Self {
            n_samples: dataset.n_samples(),
            n_variants: dataset.n_variants(),
        }
    }
}

/// Record of one executed (or skipped) stage.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct StageResult {
    pub stage: StageKind,
    pub status: StageStatus,
    /// The predicate with its threshold, e.g. `call_rate < 0.950`.
    pub threshold: String,
    /// Entity kind of `excluded`, `None` for a stage that excludes nothing.
    pub axis: Option<Axis>,
    /// Identifiers excluded along `axis`.
    pub excluded: Vec<String>,
    /// Always `excluded.len()`.
    pub n_excluded: usize,
    /// Identifiers flagged but kept.
    pub flagged: Vec<String>,
    pub before: DatasetSize,
    pub after: DatasetSize,
    pub distribution: Option<Distribution>,
}

impl StageResult {
    /// Record an evaluated stage.
    pub fn new(
        stage: StageKind,
        threshold: String,
        before: DatasetSize,
        outcome: &StageOutcome,
    ) -> Self {
        Self {
            stage,
            status: if stage.axis().is_some() {
                StageStatus::Applied
            } else {
                StageStatus::Recorded
            },
            threshold,
            axis: stage.axis(),
            n_excluded: outcome.excluded.len(),
            excluded: outcome.excluded.clone(),
            flagged: outcome.flagged.clone(),
            before,
            after: DatasetSize::from(&outcome.dataset),
            distribution: outcome.distribution.clone(),
        }
    }

    /// Record a stage disabled by configuration.
    pub fn skipped(stage: StageKind, threshold: String, size: DatasetSize) -> Self {
        Self {
            stage,
            status: StageStatus::Skipped,
            threshold,
            axis: stage.axis(),
            excluded: Vec::new(),
            n_excluded: 0,
            flagged: Vec::new(),
            before: size,
            after: size,
            distribution: None,
        }
    }
}

/// What applying a stage yields.
#[derive(Debug, Clone, PartialEq)]
pub struct StageOutcome {
    /// The kept dataset, equal to the input if nothing was excluded.
    pub dataset: Dataset,
    pub excluded: Vec<String>,
    pub flagged: Vec<String>,
    pub distribution: Option<Distribution>,
}

impl StageOutcome {
    pub fn excluded_count(&self) -> usize {
        self.excluded.len()
    }
}

/// One named, parameterized filtering operation.
///
/// `compute_metrics` must be called on exactly the dataset that is then passed
/// to `apply`; the pipeline does so for every stage.
pub trait FilterStage {
    /// The fresh metrics the predicate needs.
    type Metrics;

    fn kind(&self) -> StageKind;

    /// Predicate and threshold in effect, for reports and error messages.
    fn threshold_label(&self) -> String;

    fn compute_metrics(
        &self,
        provider: &dyn MetricsProvider,
        dataset: &Dataset,
    ) -> Result<Self::Metrics, QcError>;

    fn apply(&self, dataset: &Dataset, metrics: &Self::Metrics) -> Result<StageOutcome, QcError>;
}

/// Metrics failure in `stage` on `dataset`, the dataset the stage started from.
pub(crate) fn metrics_unavailable<S: FilterStage + ?Sized>(
    stage: &S,
    dataset: &Dataset,
    reason: String,
) -> QcError {
    QcError::MetricsUnavailable {
        stage: stage.kind(),
        threshold: stage.threshold_label(),
        reason,
        n_samples_before: dataset.n_samples(),
        n_variants_before: dataset.n_variants(),
    }
}

/// Map a provider failure to the stage that needed the metrics.
pub(crate) fn unavailable<'a, S: FilterStage + ?Sized>(
    stage: &'a S,
    dataset: &'a Dataset,
) -> impl Fn(super::metrics::error::Error) -> QcError + 'a {
    move |e| metrics_unavailable(stage, dataset, e.to_string())
}

/// Look up the metrics of every live entity, in dataset order.
fn lookup<'a, S: FilterStage + ?Sized, M>(
    stage: &S,
    dataset: &Dataset,
    ids: impl Iterator<Item = &'a str>,
    metrics: &'a IndexMap<String, M>,
) -> Result<Vec<(&'a str, &'a M)>, QcError> {
    ids.map(|id| {
        metrics.get(id).map(|m| (id, m)).ok_or_else(|| {
            metrics_unavailable(
                stage,
                dataset,
                format!("no metrics for {:?}, metrics are stale", id),
            )
        })
    })
    .collect()
}

/// Exclude the variants for which `exclude` holds on their metrics.
pub fn filter_variants<S, M, F>(
    stage: &S,
    dataset: &Dataset,
    metrics: &IndexMap<String, M>,
    exclude: F,
) -> Result<(Dataset, Vec<String>), QcError>
where
    S: FilterStage + ?Sized,
    F: Fn(&M) -> bool,
{
    let variant_ids = dataset.variants().iter().map(|v| v.id.as_str());
    let excluded = lookup(stage, dataset, variant_ids, metrics)?
        .into_iter()
        .filter(|(_, m)| exclude(*m))
        .map(|(id, _)| id.to_string())
        .collect::<Vec<_>>();
    let ids = excluded.iter().map(|s| s.as_str()).collect::<HashSet<_>>();
    Ok((dataset.without_variants(&ids), excluded))
}

/// Exclude the samples for which `exclude` holds on the sample and its metrics.
pub fn filter_samples<S, M, F>(
    stage: &S,
    dataset: &Dataset,
    metrics: &IndexMap<String, M>,
    exclude: F,
) -> Result<(Dataset, Vec<String>), QcError>
where
    S: FilterStage + ?Sized,
    F: Fn(&Sample, &M) -> bool,
{
    let sample_ids = dataset.samples().iter().map(|s| s.id.as_str());
    let looked_up = lookup(stage, dataset, sample_ids, metrics)?;
    let excluded = dataset
        .samples()
        .iter()
        .zip(looked_up)
        .filter(|(sample, (_, m))| exclude(*sample, *m))
        .map(|(sample, _)| sample.id.clone())
        .collect::<Vec<_>>();
    let ids = excluded.iter().map(|s| s.as_str()).collect::<HashSet<_>>();
    Ok((dataset.without_samples(&ids), excluded))
}

/// Stages 1 and 6: exclude variants with `call_rate < 1 - geno`.
#[derive(Debug, Clone, Copy)]
pub struct VariantCallRateStage {
    pub kind: StageKind,
    pub geno: f64,
}

impl FilterStage for VariantCallRateStage {
    type Metrics = IndexMap<String, VariantMetrics>;

    fn kind(&self) -> StageKind {
        self.kind
    }

    fn threshold_label(&self) -> String {
        format!("call_rate < {:.3}", 1.0 - self.geno)
    }

    fn compute_metrics(
        &self,
        provider: &dyn MetricsProvider,
        dataset: &Dataset,
    ) -> Result<Self::Metrics, QcError> {
        provider
            .variant_metrics(dataset)
            .map_err(unavailable(self, dataset))
    }

    fn apply(&self, dataset: &Dataset, metrics: &Self::Metrics) -> Result<StageOutcome, QcError> {
        let min_call_rate = 1.0 - self.geno;
        let (kept, excluded) =
            filter_variants(self, dataset, metrics, |m| m.call_rate < min_call_rate)?;
        Ok(StageOutcome {
            dataset: kept,
            excluded,
            flagged: Vec::new(),
            distribution: Some(Distribution::VariantCallRate(
                metrics.values().map(|m| m.call_rate).collect(),
            )),
        })
    }
}

/// Stage 2: exclude samples with `call_rate < 1 - mind`.
#[derive(Debug, Clone, Copy)]
pub struct SampleCallRateStage {
    pub mind: f64,
}

impl FilterStage for SampleCallRateStage {
    type Metrics = IndexMap<String, SampleMetrics>;

    fn kind(&self) -> StageKind {
        StageKind::SampleCallRate
    }

    fn threshold_label(&self) -> String {
        format!("call_rate < {:.3}", 1.0 - self.mind)
    }

    fn compute_metrics(
        &self,
        provider: &dyn MetricsProvider,
        dataset: &Dataset,
    ) -> Result<Self::Metrics, QcError> {
        provider
            .sample_metrics(dataset)
            .map_err(unavailable(self, dataset))
    }

    fn apply(&self, dataset: &Dataset, metrics: &Self::Metrics) -> Result<StageOutcome, QcError> {
        let min_call_rate = 1.0 - self.mind;
        let (kept, excluded) = filter_samples(self, dataset, metrics, |_, m| {
            m.call_rate < min_call_rate
        })?;
        Ok(StageOutcome {
            dataset: kept,
            excluded,
            flagged: Vec::new(),
            distribution: Some(Distribution::SampleCallRate(
                metrics.values().map(|m| m.call_rate).collect(),
            )),
        })
    }
}

/// Stage 7: call rate difference between cases and controls.
///
/// Declared without an implementation; computing its metrics always fails so
/// that it can never pass silently.
#[derive(Debug, Clone, Copy)]
pub struct MissingnessDifferenceStage {
    pub midi: f64,
}

impl FilterStage for MissingnessDifferenceStage {
    type Metrics = ();

    fn kind(&self) -> StageKind {
        StageKind::MissingnessDifference
    }

    fn threshold_label(&self) -> String {
        format!("|call_rate_case - call_rate_control| > {:.3}", self.midi)
    }

    fn compute_metrics(
        &self,
        _provider: &dyn MetricsProvider,
        _dataset: &Dataset,
    ) -> Result<Self::Metrics, QcError> {
        Err(QcError::NotImplementedStage {
            stage: self.kind(),
            threshold: self.threshold_label(),
        })
    }

    fn apply(&self, _dataset: &Dataset, _metrics: &Self::Metrics) -> Result<StageOutcome, QcError> {
        Err(QcError::NotImplementedStage {
            stage: self.kind(),
            threshold: self.threshold_label(),
        })
    }
}

/// Stage 8: exclude variants without an observed minor allele (`MAC == 0`).
#[derive(Debug, Clone, Copy, Default)]
pub struct InvariantVariantStage;

impl FilterStage for InvariantVariantStage {
    type Metrics = IndexMap<String, VariantMetrics>;

    fn kind(&self) -> StageKind {
        StageKind::InvariantVariant
    }

    fn threshold_label(&self) -> String {
        "MAC == 0".to_string()
    }

    fn compute_metrics(
        &self,
        provider: &dyn MetricsProvider,
        dataset: &Dataset,
    ) -> Result<Self::Metrics, QcError> {
        provider
            .variant_metrics(dataset)
            .map_err(unavailable(self, dataset))
    }

    fn apply(&self, dataset: &Dataset, metrics: &Self::Metrics) -> Result<StageOutcome, QcError> {
        let (kept, excluded) = filter_variants(self, dataset, metrics, |m| m.mac == 0)?;
        Ok(StageOutcome {
            dataset: kept,
            excluded,
            flagged: Vec::new(),
            distribution: None,
        })
    }
}

/// Stage 9: exclude variants with `MAF < maf`.
#[derive(Debug, Clone, Copy)]
pub struct MafStage {
    pub maf: f64,
}

impl FilterStage for MafStage {
    type Metrics = IndexMap<String, VariantMetrics>;

    fn kind(&self) -> StageKind {
        StageKind::Maf
    }

    fn threshold_label(&self) -> String {
        format!("MAF < {}", self.maf)
    }

    fn compute_metrics(
        &self,
        provider: &dyn MetricsProvider,
        dataset: &Dataset,
    ) -> Result<Self::Metrics, QcError> {
        provider
            .variant_metrics(dataset)
            .map_err(unavailable(self, dataset))
    }

    fn apply(&self, dataset: &Dataset, metrics: &Self::Metrics) -> Result<StageOutcome, QcError> {
        let (kept, excluded) = filter_variants(self, dataset, metrics, |m| {
            m.maf.map(|maf| maf < self.maf).unwrap_or(false)
        })?;
        Ok(StageOutcome {
            dataset: kept,
            excluded,
            flagged: Vec::new(),
            distribution: Some(Distribution::MinorAlleleFrequency(
                metrics.values().filter_map(|m| m.maf).collect(),
            )),
        })
    }
}

/// Stages 10 and 11: HWE p-value computed within one phenotype group.
///
/// The metrics come from the cases-only or controls-only sub-dataset, the
/// exclusions are applied to the full dataset.
#[derive(Debug, Clone, Copy)]
pub struct HweStage {
    pub phenotype: Phenotype,
    pub threshold: f64,
}

impl HweStage {
    pub fn controls(threshold: f64) -> Self {
        Self {
            phenotype: Phenotype::Control,
            threshold,
        }
    }

    pub fn cases(threshold: f64) -> Self {
        Self {
            phenotype: Phenotype::Case,
            threshold,
        }
    }
}

impl FilterStage for HweStage {
    type Metrics = IndexMap<String, VariantMetrics>;

    fn kind(&self) -> StageKind {
        match self.phenotype {
            Phenotype::Case => StageKind::HweCases,
            Phenotype::Control | Phenotype::Unknown => StageKind::HweControls,
        }
    }

    fn threshold_label(&self) -> String {
        let group = match self.phenotype {
            Phenotype::Case => "cases",
            Phenotype::Control | Phenotype::Unknown => "controls",
        };
        format!("p_hwe({}) < {:e}", group, self.threshold)
    }

    fn compute_metrics(
        &self,
        provider: &dyn MetricsProvider,
        dataset: &Dataset,
    ) -> Result<Self::Metrics, QcError> {
        let restricted = dataset.restrict_to_phenotype(self.phenotype);
        if restricted.n_samples() == 0 {
            return Err(metrics_unavailable(
                self,
                dataset,
                format!("no {} samples left for the HWE test", self.phenotype),
            ));
        }
        provider
            .variant_metrics(&restricted)
            .map_err(unavailable(self, dataset))
    }

    fn apply(&self, dataset: &Dataset, metrics: &Self::Metrics) -> Result<StageOutcome, QcError> {
        let (kept, excluded) = filter_variants(self, dataset, metrics, |m| {
            m.hwe_p_value
                .map(|p| p < self.threshold)
                .unwrap_or(false)
        })?;
        Ok(StageOutcome {
            dataset: kept,
            excluded,
            flagged: Vec::new(),
            distribution: Some(Distribution::HwePValue(
                metrics.values().filter_map(|m| m.hwe_p_value).collect(),
            )),
        })
    }
}

/// Compute fresh metrics on `dataset` and apply `stage` to it.
pub fn run_stage<S: FilterStage>(
    stage: &S,
    provider: &dyn MetricsProvider,
    dataset: &Dataset,
) -> Result<StageOutcome, QcError> {
    let metrics = stage.compute_metrics(provider, dataset)?;
    stage.apply(dataset, &metrics)
}

#[cfg(test)]
pub(crate) mod test {
    use pretty_assertions::assert_eq;
    use rstest::rstest;
    use strum::IntoEnumIterator;

    use super::*;
    use crate::qc::{
        dataset::test::build,
        metrics::{error, GenotypeMetrics, SexImputation, SexThresholds},
    };

    /// Wraps `GenotypeMetrics` but reports fixed HWE p-values per variant
    /// whenever the dataset contains only samples of `phenotype`.
    pub struct FixedHwe {
        pub phenotype: Phenotype,
        pub p_values: IndexMap<String, f64>,
    }

    impl MetricsProvider for FixedHwe {
        fn variant_metrics(
            &self,
            dataset: &Dataset,
        ) -> Result<IndexMap<String, VariantMetrics>, error::Error> {
            let mut result = GenotypeMetrics::default().variant_metrics(dataset)?;
            if dataset.samples().iter().all(|s| s.phenotype == self.phenotype) {
                for (id, m) in result.iter_mut() {
                    if let Some(p) = self.p_values.get(id) {
                        m.hwe_p_value = Some(*p);
                    }
                }
            }
            Ok(result)
        }

        fn sample_metrics(
            &self,
            dataset: &Dataset,
        ) -> Result<IndexMap<String, SampleMetrics>, error::Error> {
            GenotypeMetrics::default().sample_metrics(dataset)
        }

        fn impute_sex(
            &self,
            dataset: &Dataset,
            thresholds: &SexThresholds,
        ) -> Result<IndexMap<String, SexImputation>, error::Error> {
            GenotypeMetrics::default().impute_sex(dataset, thresholds)
        }

        fn association_p_values(
            &self,
            dataset: &Dataset,
        ) -> Result<IndexMap<String, Option<f64>>, error::Error> {
            GenotypeMetrics::default().association_p_values(dataset)
        }
    }

    fn cohort() -> Dataset {
        build(
            &[
                ("s1", Phenotype::Case, Sex::Male),
                ("s2", Phenotype::Case, Sex::Female),
                ("s3", Phenotype::Control, Sex::Male),
                ("s4", Phenotype::Control, Sex::Female),
            ],
            &[
                ("ok", "1", 100, &["0/0", "0/1", "0/1", "1/1"]),
                ("gappy", "1", 200, &["0/0", "./.", "0/1", "0/0"]),
                ("mono", "1", 300, &["0/0", "0/0", "0/0", "0/0"]),
                ("rare", "1", 400, &["0/0", "0/0", "0/0", "0/1"]),
            ],
        )
    }

    #[test]
    fn stage_order_is_fixed() {
        let order = StageKind::iter().map(|s| s.order()).collect::<Vec<_>>();
        assert_eq!((1..=11).collect::<Vec<_>>(), order);
        assert_eq!(11, StageKind::HweCases.order());
        assert_eq!(
            "pre-filter-variant-call-rate",
            StageKind::PreFilterVariantCallRate.to_string()
        );
        assert_eq!(None, StageKind::SexWarning.axis());
        assert_eq!(Some(Axis::Samples), StageKind::SexViolation.axis());
    }

    #[test]
    fn variant_call_rate_excludes_below() -> Result<(), anyhow::Error> {
        let stage = VariantCallRateStage {
            kind: StageKind::VariantCallRate,
            geno: 0.02,
        };
        let ds = cohort();
        let outcome = run_stage(&stage, &GenotypeMetrics::default(), &ds)?;

        assert_eq!(vec!["gappy".to_string()], outcome.excluded);
        assert_eq!(1, outcome.excluded_count());
        assert_eq!(3, outcome.dataset.n_variants());
        assert_eq!("call_rate < 0.980", stage.threshold_label());
        assert_eq!(
            Some(Distribution::VariantCallRate(vec![1.0, 0.75, 1.0, 1.0])),
            outcome.distribution
        );

        Ok(())
    }

    #[test]
    fn sample_call_rate_excludes_below() -> Result<(), anyhow::Error> {
        let stage = SampleCallRateStage { mind: 0.02 };
        let outcome = run_stage(&stage, &GenotypeMetrics::default(), &cohort())?;

        assert_eq!(vec!["s2".to_string()], outcome.excluded);
        assert_eq!(3, outcome.dataset.n_samples());

        Ok(())
    }

    #[test]
    fn zero_exclusions_keep_dataset_equal() -> Result<(), anyhow::Error> {
        let stage = SampleCallRateStage { mind: 0.5 };
        let ds = cohort();
        let outcome = run_stage(&stage, &GenotypeMetrics::default(), &ds)?;

        assert_eq!(0, outcome.excluded_count());
        assert_eq!(ds, outcome.dataset);

        Ok(())
    }

    #[test]
    fn invariant_and_maf() -> Result<(), anyhow::Error> {
        let provider = GenotypeMetrics::default();
        let ds = cohort();

        let outcome = run_stage(&InvariantVariantStage, &provider, &ds)?;
        assert_eq!(vec!["mono".to_string()], outcome.excluded);

        // "gappy" has MAF 1/6, "rare" has MAF 1/8, "mono" has MAF 0
        let outcome = run_stage(&MafStage { maf: 0.15 }, &provider, &ds)?;
        assert_eq!(vec!["mono".to_string(), "rare".to_string()], outcome.excluded);

        Ok(())
    }

    #[rstest]
    #[case(1e-6, true)]
    #[case(1e-8, false)]
    fn hwe_controls_threshold_and_scope(
        #[case] threshold: f64,
        #[case] expect_excluded: bool,
    ) -> Result<(), anyhow::Error> {
        let provider = FixedHwe {
            phenotype: Phenotype::Control,
            p_values: IndexMap::from([("ok".to_string(), 1e-7)]),
        };
        let ds = cohort();

        let outcome = run_stage(&HweStage::controls(threshold), &provider, &ds)?;
        if expect_excluded {
            assert_eq!(vec!["ok".to_string()], outcome.excluded);
        } else {
            assert!(outcome.excluded.is_empty());
        }
        // the case group does not see the fixed p-value
        let outcome = run_stage(&HweStage::cases(threshold), &provider, &ds)?;
        assert!(outcome.excluded.is_empty());

        Ok(())
    }

    #[test]
    fn hwe_keeps_all_samples() -> Result<(), anyhow::Error> {
        let provider = FixedHwe {
            phenotype: Phenotype::Case,
            p_values: IndexMap::from([("ok".to_string(), 1e-12)]),
        };
        let ds = cohort();
        let outcome = run_stage(&HweStage::cases(1e-6), &provider, &ds)?;

        assert_eq!(vec!["ok".to_string()], outcome.excluded);
        assert_eq!(4, outcome.dataset.n_samples());
        assert_eq!("p_hwe(cases) < 1e-6", HweStage::cases(1e-6).threshold_label());

        Ok(())
    }

    #[test]
    fn hwe_without_group_is_unavailable() {
        let ds = cohort().restrict_to_phenotype(Phenotype::Case);
        let res = run_stage(
            &HweStage::controls(1e-6),
            &GenotypeMetrics::default(),
            &ds,
        );

        assert!(matches!(
            res,
            Err(QcError::MetricsUnavailable {
                stage: StageKind::HweControls,
                ref threshold,
                n_samples_before: 2,
                n_variants_before: 4,
                ..
            }) if threshold == "p_hwe(controls) < 1e-6"
        ));
    }

    #[test]
    fn missingness_difference_fails_loudly() {
        let res = run_stage(
            &MissingnessDifferenceStage { midi: 0.02 },
            &GenotypeMetrics::default(),
            &cohort(),
        );

        assert_eq!(
            Err(QcError::NotImplementedStage {
                stage: StageKind::MissingnessDifference,
                threshold: "|call_rate_case - call_rate_control| > 0.020".to_string(),
            }),
            res
        );
    }

    #[test]
    fn stale_metrics_are_rejected() -> Result<(), anyhow::Error> {
        let ds = cohort();
        let stage = InvariantVariantStage;
        let stale = stage.compute_metrics(
            &GenotypeMetrics::default(),
            &ds.retain_variants(|v| v.id != "rare"),
        )?;

        assert!(matches!(
            stage.apply(&ds, &stale),
            Err(QcError::MetricsUnavailable { .. })
        ));

        Ok(())
    }

    /// Running `stage` a second time on its own output excludes nothing.
    fn assert_idempotent<S: FilterStage>(stage: &S) -> Result<(), anyhow::Error> {
        let provider = GenotypeMetrics::default();
        let once = run_stage(stage, &provider, &cohort())?;
        let twice = run_stage(stage, &provider, &once.dataset)?;

        assert_eq!(0, twice.excluded_count(), "{}", stage.threshold_label());
        assert_eq!(once.dataset, twice.dataset);

        Ok(())
    }

    #[rstest]
    #[case(0.02)]
    #[case(0.3)]
    fn filter_stages_are_idempotent(#[case] threshold: f64) -> Result<(), anyhow::Error> {
        assert_idempotent(&VariantCallRateStage {
            kind: StageKind::PreFilterVariantCallRate,
            geno: threshold,
        })?;
        assert_idempotent(&SampleCallRateStage { mind: threshold })?;
        assert_idempotent(&InvariantVariantStage)?;
        assert_idempotent(&MafStage { maf: threshold })?;
        assert_idempotent(&HweStage::controls(threshold))?;
        assert_idempotent(&HweStage::cases(threshold))?;

        Ok(())
    }
}

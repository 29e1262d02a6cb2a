//! The orchestrator running the fixed sequence of QC stages.

use std::time::{Duration, Instant};

use rayon::prelude::*;
use thousands::Separable;

use crate::err::QcError;

use super::{
    dataset::Dataset,
    metrics::MetricsProvider,
    params::QcParams,
    report::{CohortSnapshot, PipelineReport, ReportBuilder},
    sex::{SexCheckStage, SexViolationStage, SexWarningStage},
    stage::{
        run_stage, DatasetSize, FilterStage, HweStage, InvariantVariantStage, MafStage,
        MissingnessDifferenceStage, SampleCallRateStage, StageKind, StageResult, StageStatus,
        VariantCallRateStage,
    },
};

/// Progress of a pipeline run.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    Started {
        qc_round: String,
        size: DatasetSize,
    },
    StageStarted {
        stage: StageKind,
        threshold: String,
        size: DatasetSize,
    },
    StageFinished {
        stage: StageKind,
        status: StageStatus,
        n_excluded: usize,
        n_flagged: usize,
        size: DatasetSize,
    },
    Halted {
        stage: Option<StageKind>,
        reason: String,
    },
    Finished {
        size: DatasetSize,
        elapsed: Duration,
    },
}

/// Consumer of pipeline events.
pub trait EventSink {
    fn emit(&mut self, event: PipelineEvent);
}

impl EventSink for Vec<PipelineEvent> {
    fn emit(&mut self, event: PipelineEvent) {
        self.push(event);
    }
}

/// Forwards events to `tracing`, optionally tagged with a cohort name.
#[derive(Debug, Clone, Default)]
pub struct TracingSink {
    pub cohort: Option<String>,
}

impl TracingSink {
    pub fn new(cohort: &str) -> Self {
        Self {
            cohort: Some(cohort.to_string()),
        }
    }

    fn prefix(&self) -> String {
        self.cohort
            .as_ref()
            .map(|c| format!("[{}] ", c))
            .unwrap_or_default()
    }
}

impl EventSink for TracingSink {
    fn emit(&mut self, event: PipelineEvent) {
        let prefix = self.prefix();
        match event {
            PipelineEvent::Started { qc_round, size } => tracing::info!(
                "{}starting QC round {} on {} samples and {} variants",
                prefix,
                qc_round,
                size.n_samples.separate_with_commas(),
                size.n_variants.separate_with_commas()
            ),
            PipelineEvent::StageStarted {
                stage, threshold, ..
            } => tracing::info!(
                "{}stage {} ({}): {} ...",
                prefix,
                stage.order(),
                stage,
                threshold
            ),
            PipelineEvent::StageFinished {
                stage,
                status,
                n_excluded,
                n_flagged,
                size,
            } => tracing::info!(
                "{}... stage {} {}: excluded {}, flagged {}, now {} samples and {} variants",
                prefix,
                stage,
                status,
                n_excluded.separate_with_commas(),
                n_flagged.separate_with_commas(),
                size.n_samples.separate_with_commas(),
                size.n_variants.separate_with_commas()
            ),
            PipelineEvent::Halted { stage, reason } => match stage {
                Some(stage) => tracing::error!("{}halted in stage {}: {}", prefix, stage, reason),
                None => tracing::error!("{}halted before the first stage: {}", prefix, reason),
            },
            PipelineEvent::Finished { size, elapsed } => tracing::info!(
                "{}QC done in {:?}, kept {} samples and {} variants",
                prefix,
                elapsed,
                size.n_samples.separate_with_commas(),
                size.n_variants.separate_with_commas()
            ),
        }
    }
}

/// A pipeline run that failed, with the stages completed before the failure.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
#[error("QC aborted after {} stage(s)", .stages.len())]
pub struct Aborted {
    #[source]
    pub error: QcError,
    /// Stage results in order; the last one is the failing stage if it
    /// exhausted the dataset.
    pub stages: Vec<StageResult>,
}

/// Final dataset and report of a successful run.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineOutput {
    pub dataset: Dataset,
    pub report: PipelineReport,
}

/// Runs the QC stages in their fixed order.
#[derive(Debug, Clone)]
pub struct Pipeline<P> {
    params: QcParams,
    provider: P,
    with_association: bool,
}

impl<P: MetricsProvider> Pipeline<P> {
    pub fn new(params: QcParams, provider: P) -> Self {
        Self {
            params,
            provider,
            with_association: false,
        }
    }

    /// Also compute association diagnostics for the pre- and post-QC snapshots.
    pub fn with_association(mut self, with_association: bool) -> Self {
        self.with_association = with_association;
        self
    }

    pub fn params(&self) -> &QcParams {
        &self.params
    }

    /// Run all stages on `dataset`.
    ///
    /// Metrics are recomputed on the current dataset for every stage. The run
    /// stops at the first error, including a stage that leaves no samples or
    /// no variants.
    pub fn run(
        &self,
        dataset: Dataset,
        sink: &mut dyn EventSink,
    ) -> Result<PipelineOutput, Aborted> {
        let start = Instant::now();
        if let Err(error) = self.check_input(&dataset) {
            sink.emit(PipelineEvent::Halted {
                stage: None,
                reason: error.to_string(),
            });
            return Err(Aborted {
                error,
                stages: Vec::new(),
            });
        }
        sink.emit(PipelineEvent::Started {
            qc_round: self.params.qc_round.clone(),
            size: DatasetSize::from(&dataset),
        });

        let pre_qc = CohortSnapshot::capture(&dataset, &self.provider, self.with_association);
        let mut builder = ReportBuilder::new(self.params.clone(), pre_qc);
        let mut current = dataset;
        if let Err(error) = self.run_stages(&mut current, &mut builder, sink) {
            let last_stage = builder.stages().last().map(|s| s.stage);
            sink.emit(PipelineEvent::Halted {
                stage: match &error {
                    QcError::MetricsUnavailable { stage, .. }
                    | QcError::DatasetExhausted { stage, .. }
                    | QcError::NotImplementedStage { stage, .. } => Some(*stage),
                    _ => last_stage,
                },
                reason: error.to_string(),
            });
            return Err(Aborted {
                error,
                stages: builder.into_stages(),
            });
        }

        let post_qc = CohortSnapshot::capture(&current, &self.provider, self.with_association);
        let report = builder.finish(post_qc);
        sink.emit(PipelineEvent::Finished {
            size: DatasetSize::from(&current),
            elapsed: start.elapsed(),
        });

        Ok(PipelineOutput {
            dataset: current,
            report,
        })
    }

    fn check_input(&self, dataset: &Dataset) -> Result<(), QcError> {
        self.params.validate()?;
        if dataset.is_exhausted() {
            return Err(QcError::DatasetFormat(format!(
                "need at least one sample and one variant, have {} samples and {} variants",
                dataset.n_samples(),
                dataset.n_variants()
            )));
        }
        Ok(())
    }

    fn run_stages(
        &self,
        current: &mut Dataset,
        builder: &mut ReportBuilder,
        sink: &mut dyn EventSink,
    ) -> Result<(), QcError> {
        let params = &self.params;
        let thresholds = params.sex_thresholds();

        self.step(
            &VariantCallRateStage {
                kind: StageKind::PreFilterVariantCallRate,
                geno: params.pre_geno,
            },
            current,
            builder,
            sink,
        )?;
        self.step(&SampleCallRateStage { mind: params.mind }, current, builder, sink)?;
        self.step(&SexCheckStage { thresholds }, current, builder, sink)?;
        self.step(&SexViolationStage { thresholds }, current, builder, sink)?;
        self.step(&SexWarningStage { thresholds }, current, builder, sink)?;
        self.step(
            &VariantCallRateStage {
                kind: StageKind::VariantCallRate,
                geno: params.geno,
            },
            current,
            builder,
            sink,
        )?;
        let midi = MissingnessDifferenceStage { midi: params.midi };
        if params.run_midi {
            self.step(&midi, current, builder, sink)?;
        } else {
            self.skip(&midi, current, builder, sink);
        }
        if params.with_pna {
            self.skip(&InvariantVariantStage, current, builder, sink);
        } else {
            self.step(&InvariantVariantStage, current, builder, sink)?;
        }
        self.step(&MafStage { maf: params.maf }, current, builder, sink)?;
        self.step(
            &HweStage::controls(params.hwe_threshold_control),
            current,
            builder,
            sink,
        )?;
        self.step(
            &HweStage::cases(params.hwe_threshold_case),
            current,
            builder,
            sink,
        )?;

        Ok(())
    }

    /// Run one stage on fresh metrics and replace `current` by its output.
    fn step<S: FilterStage>(
        &self,
        stage: &S,
        current: &mut Dataset,
        builder: &mut ReportBuilder,
        sink: &mut dyn EventSink,
    ) -> Result<(), QcError> {
        let before = DatasetSize::from(&*current);
        let threshold = stage.threshold_label();
        sink.emit(PipelineEvent::StageStarted {
            stage: stage.kind(),
            threshold: threshold.clone(),
            size: before,
        });

        let outcome = run_stage(stage, &self.provider, current)?;
        let result = StageResult::new(stage.kind(), threshold.clone(), before, &outcome);
        sink.emit(PipelineEvent::StageFinished {
            stage: result.stage,
            status: result.status,
            n_excluded: result.n_excluded,
            n_flagged: result.flagged.len(),
            size: result.after,
        });
        builder.push(result);

        if outcome.dataset.is_exhausted() {
            return Err(QcError::DatasetExhausted {
                stage: stage.kind(),
                threshold,
                n_samples_before: before.n_samples,
                n_variants_before: before.n_variants,
            });
        }
        *current = outcome.dataset;

        Ok(())
    }

    /// Record a stage disabled by configuration.
    fn skip<S: FilterStage>(
        &self,
        stage: &S,
        current: &Dataset,
        builder: &mut ReportBuilder,
        sink: &mut dyn EventSink,
    ) {
        let result =
            StageResult::skipped(stage.kind(), stage.threshold_label(), DatasetSize::from(current));
        sink.emit(PipelineEvent::StageFinished {
            stage: result.stage,
            status: result.status,
            n_excluded: 0,
            n_flagged: 0,
            size: result.after,
        });
        builder.push(result);
    }
}

impl<P: MetricsProvider + Sync> Pipeline<P> {
    /// Run independent cohorts in parallel, each with its own dataset lineage.
    ///
    /// Results are returned in input order, events go to `tracing`.
    pub fn run_batch(
        &self,
        cohorts: Vec<(String, Dataset)>,
    ) -> Vec<(String, Result<PipelineOutput, Aborted>)> {
        cohorts
            .into_par_iter()
            .map(|(name, dataset)| {
                let mut sink = TracingSink::new(&name);
                let result = self.run(dataset, &mut sink);
                (name, result)
            })
            .collect()
    }
}

//! Per-variant and per-sample metrics, computed fresh for one dataset snapshot.
//!
//! The pipeline only talks to the `MetricsProvider` trait. `GenotypeMetrics`
//! is the provider that derives everything from the genotype calls, in
//! parallel over variants or samples.

use indexmap::IndexMap;
use rayon::prelude::*;

use crate::common::GenomeRelease;

use super::{
    dataset::{Call, Dataset, Phenotype, Variant},
    stats::{hwe_exact_p_value, linear_regression, InbreedingAccumulator},
};

/// Supporting code for `MetricsProvider`.
pub mod error {
    /// Error type for the metrics computations.
    #[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
    pub enum Error {
        #[error("dataset has no samples")]
        NoSamples,
        #[error("dataset has no variants")]
        NoVariants,
        #[error("need both cases and controls, have {cases} cases and {controls} controls")]
        NoPhenotypeContrast { cases: usize, controls: usize },
    }
}

/// Metrics of one variant over the samples currently in the dataset.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct VariantMetrics {
    /// Number of samples with a call.
    pub n_called: usize,
    /// Number of samples without a call.
    pub n_not_called: usize,
    /// Fraction of samples with a call.
    pub call_rate: f64,
    /// Called allele count, per allele.
    pub allele_counts: Vec<u32>,
    /// Total number of called alleles.
    pub allele_number: u32,
    /// Allele frequency, per allele; `None` if no allele was called.
    pub allele_frequencies: Option<Vec<f64>>,
    /// Minor allele frequency, smallest of `allele_frequencies`.
    pub maf: Option<f64>,
    /// Minor allele count, smallest of `allele_counts`.
    pub mac: u32,
    /// Diploid homozygous reference calls.
    pub n_hom_ref: usize,
    /// Diploid heterozygous calls.
    pub n_het: usize,
    /// Diploid homozygous non-reference calls.
    pub n_hom_var: usize,
    /// Exact HWE test p-value, only for biallelic sites.
    pub hwe_p_value: Option<f64>,
}

impl VariantMetrics {
    /// Compute metrics from the calls of all samples at `variant`.
    pub fn from_calls(variant: &Variant, calls: &[Call]) -> Self {
        let mut result = Self {
            allele_counts: vec![0; variant.alleles.len()],
            ..Default::default()
        };
        for call in calls {
            if !call.is_called() {
                result.n_not_called += 1;
                continue;
            }
            result.n_called += 1;
            for allele in call.alleles() {
                result.allele_counts[allele as usize] += 1;
            }
            match call {
                Call::Diploid(0, 0) => result.n_hom_ref += 1,
                Call::Diploid(a, b) if a == b => result.n_hom_var += 1,
                Call::Diploid(_, _) => result.n_het += 1,
                Call::Haploid(_) | Call::Missing => (),
            }
        }

        result.call_rate = if calls.is_empty() {
            0.0
        } else {
            result.n_called as f64 / calls.len() as f64
        };
        result.allele_number = result.allele_counts.iter().sum();
        if result.allele_number > 0 {
            let an = result.allele_number as f64;
            let freqs = result
                .allele_counts
                .iter()
                .map(|ac| *ac as f64 / an)
                .collect::<Vec<_>>();
            result.maf = freqs.iter().copied().reduce(f64::min);
            result.allele_frequencies = Some(freqs);
        }
        result.mac = result.allele_counts.iter().copied().min().unwrap_or(0);
        if variant.is_biallelic() {
            result.hwe_p_value = Some(hwe_exact_p_value(
                result.n_hom_ref,
                result.n_het,
                result.n_hom_var,
            ));
        }

        result
    }
}

/// Metrics of one sample over the variants currently in the dataset.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct SampleMetrics {
    pub n_called: usize,
    pub n_not_called: usize,
    pub call_rate: f64,
}

/// Sex inferred from the X chromosome inbreeding coefficient.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, serde::Serialize, serde::Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum InferredSex {
    Male,
    Female,
    Ambiguous,
}

/// Thresholds on the F statistic used for classifying genetic sex.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct SexThresholds {
    /// Samples with `F < fhet_y` are inferred female.
    pub fhet_y: f64,
    /// Samples with `F > fhet_x` are inferred male.
    pub fhet_x: f64,
}

impl SexThresholds {
    /// Classify an F statistic; values on a threshold are ambiguous.
    pub fn classify(&self, f_stat: Option<f64>) -> InferredSex {
        match f_stat {
            Some(f) if f > self.fhet_x => InferredSex::Male,
            Some(f) if f < self.fhet_y => InferredSex::Female,
            _ => InferredSex::Ambiguous,
        }
    }
}

/// Result of sex imputation for one sample.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct SexImputation {
    /// Inbreeding coefficient on non-PAR chrX, `None` without informative calls.
    pub f_stat: Option<f64>,
    pub inferred_sex: InferredSex,
    /// Number of informative chrX sites with a call.
    pub n_called: usize,
    pub observed_homs: usize,
    pub expected_homs: f64,
}

/// Capability for computing metrics on a dataset snapshot.
///
/// Every call must be a pure function of the dataset passed in. Results are
/// keyed by identifier, in dataset order.
pub trait MetricsProvider {
    /// Call rate, allele counts/frequencies and HWE p-value per variant.
    fn variant_metrics(
        &self,
        dataset: &Dataset,
    ) -> Result<IndexMap<String, VariantMetrics>, error::Error>;

    /// Call rate per sample over the variants present.
    fn sample_metrics(
        &self,
        dataset: &Dataset,
    ) -> Result<IndexMap<String, SampleMetrics>, error::Error>;

    /// F statistic and inferred sex per sample.
    fn impute_sex(
        &self,
        dataset: &Dataset,
        thresholds: &SexThresholds,
    ) -> Result<IndexMap<String, SexImputation>, error::Error>;

    /// Case/control association p-value per variant (diagnostics only).
    fn association_p_values(
        &self,
        dataset: &Dataset,
    ) -> Result<IndexMap<String, Option<f64>>, error::Error>;
}

/// Metrics computed directly from the genotype calls.
#[derive(Debug, Clone, Copy, Default)]
pub struct GenotypeMetrics {
    /// Genome release, determines the chrX pseudoautosomal regions.
    pub genome_release: GenomeRelease,
}

impl GenotypeMetrics {
    pub fn new(genome_release: GenomeRelease) -> Self {
        Self { genome_release }
    }

    /// Indices and alternate allele frequencies of informative non-PAR chrX sites.
    fn informative_x_sites(&self, dataset: &Dataset) -> Vec<(usize, f64)> {
        dataset
            .variants()
            .par_iter()
            .enumerate()
            .filter(|(_, v)| {
                v.is_biallelic() && v.chrom().is_x_nonpar(v.locus.pos, self.genome_release)
            })
            .filter_map(|(idx, v)| {
                let metrics = VariantMetrics::from_calls(v, dataset.variant_calls(idx));
                let aaf = metrics.allele_frequencies?.get(1).copied()?;
                (aaf > 0.0 && aaf < 1.0).then_some((idx, aaf))
            })
            .collect()
    }
}

impl MetricsProvider for GenotypeMetrics {
    fn variant_metrics(
        &self,
        dataset: &Dataset,
    ) -> Result<IndexMap<String, VariantMetrics>, error::Error> {
        if dataset.n_samples() == 0 {
            return Err(error::Error::NoSamples);
        }
        let metrics = dataset
            .variants()
            .par_iter()
            .enumerate()
            .map(|(idx, v)| VariantMetrics::from_calls(v, dataset.variant_calls(idx)))
            .collect::<Vec<_>>();
        Ok(dataset
            .variants()
            .iter()
            .map(|v| v.id.clone())
            .zip(metrics)
            .collect())
    }

    fn sample_metrics(
        &self,
        dataset: &Dataset,
    ) -> Result<IndexMap<String, SampleMetrics>, error::Error> {
        if dataset.n_variants() == 0 {
            return Err(error::Error::NoVariants);
        }
        let n_variants = dataset.n_variants();
        let metrics = (0..dataset.n_samples())
            .into_par_iter()
            .map(|idx| {
                let n_called = dataset.sample_calls(idx).filter(|c| c.is_called()).count();
                SampleMetrics {
                    n_called,
                    n_not_called: n_variants - n_called,
                    call_rate: n_called as f64 / n_variants as f64,
                }
            })
            .collect::<Vec<_>>();
        Ok(dataset
            .samples()
            .iter()
            .map(|s| s.id.clone())
            .zip(metrics)
            .collect())
    }

    fn impute_sex(
        &self,
        dataset: &Dataset,
        thresholds: &SexThresholds,
    ) -> Result<IndexMap<String, SexImputation>, error::Error> {
        if dataset.n_samples() == 0 {
            return Err(error::Error::NoSamples);
        }
        let sites = self.informative_x_sites(dataset);
        if sites.is_empty() {
            tracing::warn!("no informative non-PAR chrX variants, F statistics are undefined");
        }
        let imputations = (0..dataset.n_samples())
            .into_par_iter()
            .map(|sample_idx| {
                let mut acc = InbreedingAccumulator::default();
                for (variant_idx, aaf) in &sites {
                    let call = dataset.call(*variant_idx, sample_idx);
                    if call.is_called() {
                        acc.push(call.is_hom(), *aaf);
                    }
                }
                let f_stat = acc.f_stat();
                SexImputation {
                    f_stat,
                    inferred_sex: thresholds.classify(f_stat),
                    n_called: acc.n_called,
                    observed_homs: acc.observed_homs,
                    expected_homs: acc.expected_homs,
                }
            })
            .collect::<Vec<_>>();
        Ok(dataset
            .samples()
            .iter()
            .map(|s| s.id.clone())
            .zip(imputations)
            .collect())
    }

    fn association_p_values(
        &self,
        dataset: &Dataset,
    ) -> Result<IndexMap<String, Option<f64>>, error::Error> {
        let counts = dataset.cohort_counts();
        if counts.phenotype.cases == 0 || counts.phenotype.controls == 0 {
            return Err(error::Error::NoPhenotypeContrast {
                cases: counts.phenotype.cases,
                controls: counts.phenotype.controls,
            });
        }
        let status = dataset
            .samples()
            .iter()
            .map(|s| match s.phenotype {
                Phenotype::Case => Some(1.0),
                Phenotype::Control => Some(0.0),
                Phenotype::Unknown => None,
            })
            .collect::<Vec<_>>();
        let p_values = (0..dataset.n_variants())
            .into_par_iter()
            .map(|idx| {
                let (xs, ys): (Vec<f64>, Vec<f64>) = dataset
                    .variant_calls(idx)
                    .iter()
                    .zip(&status)
                    .filter_map(|(call, y)| Some((call.n_alt_alleles()? as f64, (*y)?)))
                    .unzip();
                linear_regression(&xs, &ys).map(|fit| fit.p_value)
            })
            .collect::<Vec<_>>();
        Ok(dataset
            .variants()
            .iter()
            .map(|v| v.id.clone())
            .zip(p_values)
            .collect())
    }
}

#[cfg(test)]
mod test {
    use float_cmp::approx_eq;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::qc::dataset::{test::build, Sex};

    fn cohort() -> Dataset {
        build(
            &[
                ("m1", Phenotype::Case, Sex::Male),
                ("m2", Phenotype::Control, Sex::Male),
                ("f1", Phenotype::Case, Sex::Female),
                ("f2", Phenotype::Control, Sex::Female),
            ],
            &[
                ("a1", "1", 100, &["0/0", "0/1", "1/1", "./."]),
                ("a2", "1", 200, &["0/0", "0/0", "0/0", "0/0"]),
                ("x1", "X", 5_000_000, &["1/1", "0/0", "0/1", "0/1"]),
                ("x2", "X", 6_000_000, &["0", "1", "0/1", "0/1"]),
                ("par", "X", 20_000, &["0/1", "0/1", "0/0", "1/1"]),
            ],
        )
    }

    #[test]
    fn variant_metrics_counts() -> Result<(), anyhow::Error> {
        let metrics = GenotypeMetrics::default().variant_metrics(&cohort())?;

        assert_eq!(
            vec!["a1", "a2", "x1", "x2", "par"],
            metrics.keys().map(|k| k.as_str()).collect::<Vec<_>>()
        );
        let a1 = &metrics["a1"];
        assert_eq!(3, a1.n_called);
        assert_eq!(1, a1.n_not_called);
        assert!(approx_eq!(f64, a1.call_rate, 0.75, ulps = 2));
        assert_eq!(vec![3, 3], a1.allele_counts);
        assert_eq!(6, a1.allele_number);
        assert_eq!(Some(0.5), a1.maf);
        assert_eq!(3, a1.mac);
        assert_eq!((1, 1, 1), (a1.n_hom_ref, a1.n_het, a1.n_hom_var));
        assert!(a1.hwe_p_value.is_some());

        let a2 = &metrics["a2"];
        assert_eq!(0, a2.mac);
        assert_eq!(Some(0.0), a2.maf);
        assert_eq!(Some(1.0), a2.hwe_p_value);

        // haploid calls count one allele and no HWE genotype
        let x2 = &metrics["x2"];
        assert_eq!(vec![3, 3], x2.allele_counts);
        assert_eq!((0, 2, 0), (x2.n_hom_ref, x2.n_het, x2.n_hom_var));

        Ok(())
    }

    #[test]
    fn variant_metrics_all_missing() {
        let variant = Variant::new("1", 1, "v", &["A", "C"]);
        let metrics = VariantMetrics::from_calls(&variant, &[Call::Missing, Call::Missing]);

        assert_eq!(0.0, metrics.call_rate);
        assert_eq!(None, metrics.maf);
        assert_eq!(0, metrics.mac);
    }

    #[test]
    fn sample_metrics_call_rate() -> Result<(), anyhow::Error> {
        let metrics = GenotypeMetrics::default().sample_metrics(&cohort())?;

        assert_eq!(5, metrics["m1"].n_called);
        assert!(approx_eq!(f64, metrics["f2"].call_rate, 0.8, ulps = 2));
        assert_eq!(1, metrics["f2"].n_not_called);

        Ok(())
    }

    #[test]
    fn empty_datasets_are_errors() {
        let provider = GenotypeMetrics::default();
        let ds = cohort();

        let no_samples = ds.retain_samples(|_| false);
        assert_eq!(
            Err(error::Error::NoSamples),
            provider.variant_metrics(&no_samples)
        );
        let no_variants = ds.retain_variants(|_| false);
        assert_eq!(
            Err(error::Error::NoVariants),
            provider.sample_metrics(&no_variants)
        );
    }

    #[test]
    fn impute_sex_uses_nonpar_x_only() -> Result<(), anyhow::Error> {
        let thresholds = SexThresholds {
            fhet_y: 0.4,
            fhet_x: 0.8,
        };
        let imputed =
            GenotypeMetrics::new(GenomeRelease::Grch38).impute_sex(&cohort(), &thresholds)?;

        // x1 and x2 are informative, "par" is in PAR1
        assert_eq!(2, imputed["m1"].n_called);
        assert_eq!(2, imputed["m1"].observed_homs);
        assert_eq!(InferredSex::Male, imputed["m1"].inferred_sex);
        assert_eq!(0, imputed["f1"].observed_homs);
        assert_eq!(InferredSex::Female, imputed["f1"].inferred_sex);
        assert!(imputed["f1"].f_stat.unwrap() < 0.0);
        assert!(approx_eq!(f64, imputed["m2"].f_stat.unwrap(), 1.0, epsilon = 1e-12));

        Ok(())
    }

    #[test]
    fn impute_sex_without_x() -> Result<(), anyhow::Error> {
        let thresholds = SexThresholds {
            fhet_y: 0.4,
            fhet_x: 0.8,
        };
        let ds = cohort().retain_variants(|v| v.locus.chrom == "1");
        let imputed = GenotypeMetrics::default().impute_sex(&ds, &thresholds)?;

        assert!(imputed
            .values()
            .all(|i| i.f_stat.is_none() && i.inferred_sex == InferredSex::Ambiguous));

        Ok(())
    }

    #[rstest::rstest]
    #[case(Some(0.9), InferredSex::Male)]
    #[case(Some(0.8), InferredSex::Ambiguous)]
    #[case(Some(0.6), InferredSex::Ambiguous)]
    #[case(Some(0.4), InferredSex::Ambiguous)]
    #[case(Some(0.1), InferredSex::Female)]
    #[case(None, InferredSex::Ambiguous)]
    fn classify(#[case] f_stat: Option<f64>, #[case] expected: InferredSex) {
        let thresholds = SexThresholds {
            fhet_y: 0.4,
            fhet_x: 0.8,
        };
        assert_eq!(expected, thresholds.classify(f_stat));
    }

    #[test]
    fn association_requires_cases_and_controls() -> Result<(), anyhow::Error> {
        let provider = GenotypeMetrics::default();
        let p_values = provider.association_p_values(&cohort())?;

        assert_eq!(5, p_values.len());
        // monomorphic site has no dosage variance
        assert_eq!(None, p_values["a2"]);

        let cases_only = cohort().restrict_to_phenotype(Phenotype::Case);
        assert_eq!(
            Err(error::Error::NoPhenotypeContrast {
                cases: 2,
                controls: 0
            }),
            provider.association_p_values(&cases_only)
        );

        Ok(())
    }
}

//! The genotyped cohort: samples x variants with a call for each cell.
//!
//! A `Dataset` is a value: every filter operation returns a new one and no
//! operation mutates a dataset in place.

use std::collections::HashSet;

use indexmap::IndexMap;

use crate::{common::Chrom, err::QcError};

/// Case/control status of a sample.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    strum::Display,
    serde::Serialize,
    serde::Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Phenotype {
    Case,
    Control,
    #[default]
    Unknown,
}

impl Phenotype {
    /// Interpret a PED/FAM phenotype column (`2` = case, `1` = control).
    pub fn from_ped(value: &str) -> Self {
        match value.trim() {
            "2" => Phenotype::Case,
            "1" => Phenotype::Control,
            _ => Phenotype::Unknown,
        }
    }
}

/// Sex of a sample as reported in the pedigree.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    strum::Display,
    serde::Serialize,
    serde::Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Sex {
    Male,
    Female,
    #[default]
    Unknown,
}

impl Sex {
    /// Interpret a PED/FAM sex column (`1` = male, `2` = female).
    pub fn from_ped(value: &str) -> Self {
        match value.trim() {
            "1" => Sex::Male,
            "2" => Sex::Female,
            _ => Sex::Unknown,
        }
    }
}

/// A genotype call; allele `0` is the reference allele.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Call {
    #[default]
    Missing,
    Haploid(u8),
    Diploid(u8, u8),
}

impl Call {
    pub fn is_called(&self) -> bool {
        !matches!(self, Call::Missing)
    }

    /// Whether all called alleles are identical (haploid calls always are).
    pub fn is_hom(&self) -> bool {
        match self {
            Call::Missing => false,
            Call::Haploid(_) => true,
            Call::Diploid(a, b) => a == b,
        }
    }

    /// Number of non-reference alleles, `None` for no-calls.
    pub fn n_alt_alleles(&self) -> Option<u8> {
        match self {
            Call::Missing => None,
            Call::Haploid(a) => Some(u8::from(*a != 0)),
            Call::Diploid(a, b) => Some(u8::from(*a != 0) + u8::from(*b != 0)),
        }
    }

    /// Iterate over the called allele indices.
    pub fn alleles(&self) -> impl Iterator<Item = u8> {
        let (first, second) = match self {
            Call::Missing => (None, None),
            Call::Haploid(a) => (Some(*a), None),
            Call::Diploid(a, b) => (Some(*a), Some(*b)),
        };
        first.into_iter().chain(second)
    }
}

impl std::str::FromStr for Call {
    type Err = anyhow::Error;

    /// Parse a VCF `GT` value; a call with any missing allele is a no-call.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parse_allele = |allele: &str| -> Result<Option<u8>, anyhow::Error> {
            if allele == "." {
                Ok(None)
            } else {
                Ok(Some(allele.parse::<u8>().map_err(|e| {
                    anyhow::anyhow!("invalid genotype value: {:?}: {}", s, e)
                })?))
            }
        };

        let alleles = s
            .split(['/', '|'])
            .map(parse_allele)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(match alleles.as_slice() {
            [Some(a)] => Call::Haploid(*a),
            [Some(a), Some(b)] => Call::Diploid(*a, *b),
            [_] | [_, _] => Call::Missing,
            _ => anyhow::bail!("unsupported ploidy in genotype value: {:?}", s),
        })
    }
}

/// One study participant.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Sample {
    /// Unique sample identifier.
    pub id: String,
    /// Case/control status.
    pub phenotype: Phenotype,
    /// Sex as reported.
    pub sex: Sex,
    /// Any further annotation columns.
    pub annotations: IndexMap<String, String>,
}

impl Sample {
    pub fn new(id: &str, phenotype: Phenotype, sex: Sex) -> Self {
        Self {
            id: id.to_string(),
            phenotype,
            sex,
            annotations: Default::default(),
        }
    }
}

/// Genomic position of a variant.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct Locus {
    /// Chromosome name as given in the input.
    pub chrom: String,
    /// 1-based position.
    pub pos: usize,
}

/// One genotyped site.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Variant {
    pub locus: Locus,
    /// Unique identifier (rsid or `chrom:pos:ref:alt`).
    pub id: String,
    /// Reference allele followed by the alternate alleles.
    pub alleles: Vec<String>,
}

impl Variant {
    pub fn new(chrom: &str, pos: usize, id: &str, alleles: &[&str]) -> Self {
        Self {
            locus: Locus {
                chrom: chrom.to_string(),
                pos,
            },
            id: id.to_string(),
            alleles: alleles.iter().map(|a| a.to_string()).collect(),
        }
    }

    pub fn chrom(&self) -> Chrom {
        self.locus.chrom.parse().unwrap_or(Chrom::Auto)
    }

    pub fn is_biallelic(&self) -> bool {
        self.alleles.len() == 2
    }
}

/// Counts by case/control status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct PhenotypeCounts {
    pub cases: usize,
    pub controls: usize,
    pub unknown: usize,
}

/// Counts by reported sex.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct SexCounts {
    pub males: usize,
    pub females: usize,
    pub unknown: usize,
}

/// Composition of a cohort at one point in time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct CohortCounts {
    pub phenotype: PhenotypeCounts,
    pub sex: SexCounts,
    pub n_samples: usize,
    pub n_variants: usize,
}

/// Samples x variants with one `Call` per cell, stored variant-major.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dataset {
    samples: Vec<Sample>,
    variants: Vec<Variant>,
    calls: Vec<Call>,
}

impl Dataset {
    /// Construct and validate a dataset.
    ///
    /// `calls` holds `variants.len()` rows of `samples.len()` calls each.
    ///
    /// # Error
    ///
    /// Returns `QcError::DatasetFormat` on duplicate identifiers, a call
    /// matrix of the wrong size, or allele indices beyond a variant's alleles.
    pub fn new(
        samples: Vec<Sample>,
        variants: Vec<Variant>,
        calls: Vec<Call>,
    ) -> Result<Self, QcError> {
        if calls.len() != samples.len() * variants.len() {
            return Err(QcError::DatasetFormat(format!(
                "expected {} x {} genotype calls, got {}",
                variants.len(),
                samples.len(),
                calls.len()
            )));
        }
        let mut seen = HashSet::new();
        if let Some(sample) = samples.iter().find(|s| !seen.insert(s.id.as_str())) {
            return Err(QcError::DatasetFormat(format!(
                "duplicate sample identifier {:?}",
                &sample.id
            )));
        }
        let mut seen = HashSet::new();
        if let Some(variant) = variants.iter().find(|v| !seen.insert(v.id.as_str())) {
            return Err(QcError::DatasetFormat(format!(
                "duplicate variant identifier {:?}",
                &variant.id
            )));
        }
        if let Some(variant) = variants.iter().find(|v| v.alleles.is_empty()) {
            return Err(QcError::DatasetFormat(format!(
                "variant {:?} has no alleles",
                &variant.id
            )));
        }
        if !samples.is_empty() {
            for (variant, row) in variants.iter().zip(calls.chunks(samples.len())) {
                let n_alleles = variant.alleles.len();
                if row
                    .iter()
                    .flat_map(|call| call.alleles())
                    .any(|allele| allele as usize >= n_alleles)
                {
                    return Err(QcError::DatasetFormat(format!(
                        "variant {:?} has calls with undeclared alleles",
                        &variant.id
                    )));
                }
            }
        }

        Ok(Self {
            samples,
            variants,
            calls,
        })
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    pub fn variants(&self) -> &[Variant] {
        &self.variants
    }

    pub fn n_samples(&self) -> usize {
        self.samples.len()
    }

    pub fn n_variants(&self) -> usize {
        self.variants.len()
    }

    /// Whether there is no sample or no variant left.
    pub fn is_exhausted(&self) -> bool {
        self.samples.is_empty() || self.variants.is_empty()
    }

    /// Calls of all samples at variant `variant_idx`.
    pub fn variant_calls(&self, variant_idx: usize) -> &[Call] {
        let n = self.samples.len();
        &self.calls[variant_idx * n..(variant_idx + 1) * n]
    }

    /// Calls of sample `sample_idx` at all variants.
    pub fn sample_calls(&self, sample_idx: usize) -> impl Iterator<Item = &Call> + '_ {
        self.calls
            .iter()
            .skip(sample_idx)
            .step_by(self.samples.len().max(1))
    }

    pub fn call(&self, variant_idx: usize, sample_idx: usize) -> Call {
        self.calls[variant_idx * self.samples.len() + sample_idx]
    }

    /// Keep the samples for which `keep` is true.
    pub fn retain_samples<F>(&self, keep: F) -> Self
    where
        F: Fn(&Sample) -> bool,
    {
        let mask = self.samples.iter().map(keep).collect::<Vec<_>>();
        if mask.iter().all(|k| *k) {
            return self.clone();
        }
        let samples = self
            .samples
            .iter()
            .zip(&mask)
            .filter(|(_, k)| **k)
            .map(|(s, _)| s.clone())
            .collect::<Vec<_>>();
        let calls = if self.samples.is_empty() {
            Vec::new()
        } else {
            self.calls
                .chunks(self.samples.len())
                .flat_map(|row| row.iter().zip(&mask).filter(|(_, k)| **k).map(|(c, _)| *c))
                .collect()
        };
        Self {
            samples,
            variants: self.variants.clone(),
            calls,
        }
    }

    /// Keep the variants for which `keep` is true.
    pub fn retain_variants<F>(&self, keep: F) -> Self
    where
        F: Fn(&Variant) -> bool,
    {
        let mask = self.variants.iter().map(keep).collect::<Vec<_>>();
        if mask.iter().all(|k| *k) {
            return self.clone();
        }
        let mut variants = Vec::new();
        let mut calls = Vec::new();
        for (idx, variant) in self.variants.iter().enumerate() {
            if mask[idx] {
                variants.push(variant.clone());
                calls.extend_from_slice(self.variant_calls(idx));
            }
        }
        Self {
            samples: self.samples.clone(),
            variants,
            calls,
        }
    }

    /// Remove the samples with the given identifiers.
    pub fn without_samples(&self, ids: &HashSet<&str>) -> Self {
        self.retain_samples(|s| !ids.contains(s.id.as_str()))
    }

    /// Remove the variants with the given identifiers.
    pub fn without_variants(&self, ids: &HashSet<&str>) -> Self {
        self.retain_variants(|v| !ids.contains(v.id.as_str()))
    }

    /// Sub-dataset with only the samples of the given phenotype.
    pub fn restrict_to_phenotype(&self, phenotype: Phenotype) -> Self {
        self.retain_samples(|s| s.phenotype == phenotype)
    }

    /// Count samples by phenotype and reported sex.
    pub fn cohort_counts(&self) -> CohortCounts {
        let mut result = CohortCounts {
            n_samples: self.samples.len(),
            n_variants: self.variants.len(),
            ..Default::default()
        };
        for sample in &self.samples {
            match sample.phenotype {
                Phenotype::Case => result.phenotype.cases += 1,
                Phenotype::Control => result.phenotype.controls += 1,
                Phenotype::Unknown => result.phenotype.unknown += 1,
            }
            match sample.sex {
                Sex::Male => result.sex.males += 1,
                Sex::Female => result.sex.females += 1,
                Sex::Unknown => result.sex.unknown += 1,
            }
        }
        result
    }
}

#[cfg(test)]
pub(crate) mod test {
    use std::collections::HashSet;

    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;

    /// Build a dataset from `(id, phenotype, sex)` samples and rows of `GT` strings.
    pub fn build(
        samples: &[(&str, Phenotype, Sex)],
        rows: &[(&str, &str, usize, &[&str])],
    ) -> Dataset {
        let samples = samples
            .iter()
            .map(|(id, pheno, sex)| Sample::new(id, *pheno, *sex))
            .collect::<Vec<_>>();
        let mut variants = Vec::new();
        let mut calls = Vec::new();
        for (id, chrom, pos, gts) in rows {
            variants.push(Variant::new(chrom, *pos, id, &["A", "G"]));
            calls.extend(gts.iter().map(|gt| gt.parse::<Call>().unwrap()));
        }
        Dataset::new(samples, variants, calls).unwrap()
    }

    fn small() -> Dataset {
        build(
            &[
                ("s1", Phenotype::Case, Sex::Male),
                ("s2", Phenotype::Control, Sex::Female),
                ("s3", Phenotype::Unknown, Sex::Unknown),
            ],
            &[
                ("v1", "1", 100, &["0/0", "0/1", "./."]),
                ("v2", "1", 200, &["1/1", "0/0", "0/1"]),
            ],
        )
    }

    #[rstest]
    #[case("0/0", Call::Diploid(0, 0))]
    #[case("0|1", Call::Diploid(0, 1))]
    #[case("1/2", Call::Diploid(1, 2))]
    #[case("1", Call::Haploid(1))]
    #[case("./.", Call::Missing)]
    #[case("./1", Call::Missing)]
    #[case(".", Call::Missing)]
    fn parse_call(#[case] gt: &str, #[case] expected: Call) -> Result<(), anyhow::Error> {
        assert_eq!(expected, gt.parse::<Call>()?);

        Ok(())
    }

    #[rstest]
    #[case("0/x")]
    #[case("0/1/1")]
    fn parse_call_invalid(#[case] gt: &str) {
        assert!(gt.parse::<Call>().is_err());
    }

    #[test]
    fn call_helpers() {
        assert_eq!(Some(1), Call::Diploid(0, 1).n_alt_alleles());
        assert_eq!(Some(2), Call::Diploid(1, 2).n_alt_alleles());
        assert_eq!(Some(1), Call::Haploid(1).n_alt_alleles());
        assert_eq!(None, Call::Missing.n_alt_alleles());
        assert!(Call::Haploid(0).is_hom());
        assert!(!Call::Diploid(0, 1).is_hom());
        assert_eq!(vec![0, 1], Call::Diploid(0, 1).alleles().collect::<Vec<_>>());
    }

    #[test]
    fn new_rejects_duplicates_and_shape() {
        let samples = vec![
            Sample::new("s1", Phenotype::Case, Sex::Male),
            Sample::new("s1", Phenotype::Case, Sex::Male),
        ];
        let variants = vec![Variant::new("1", 1, "v1", &["A", "C"])];
        assert!(matches!(
            Dataset::new(samples.clone(), variants.clone(), vec![Call::Missing; 2]),
            Err(QcError::DatasetFormat(_))
        ));
        assert!(matches!(
            Dataset::new(samples[..1].to_vec(), variants.clone(), vec![Call::Missing; 2]),
            Err(QcError::DatasetFormat(_))
        ));
        assert!(matches!(
            Dataset::new(samples[..1].to_vec(), variants, vec![Call::Diploid(0, 3)]),
            Err(QcError::DatasetFormat(_))
        ));
    }

    #[test]
    fn accessors() {
        let ds = small();
        assert_eq!(3, ds.n_samples());
        assert_eq!(2, ds.n_variants());
        assert_eq!(Call::Diploid(0, 1), ds.call(0, 1));
        assert_eq!(
            vec![Call::Diploid(0, 1), Call::Diploid(0, 0)],
            ds.sample_calls(1).copied().collect::<Vec<_>>()
        );
        assert_eq!(Call::Missing, ds.variant_calls(0)[2]);
    }

    #[test]
    fn without_samples_drops_cells() {
        let ds = small();
        let reduced = ds.without_samples(&HashSet::from(["s2"]));

        assert_eq!(2, reduced.n_samples());
        assert_eq!(
            vec![Call::Diploid(0, 0), Call::Missing],
            reduced.variant_calls(0).to_vec()
        );
        assert_eq!(
            vec![Call::Diploid(1, 1), Call::Diploid(0, 1)],
            reduced.variant_calls(1).to_vec()
        );
        // the input is untouched
        assert_eq!(3, ds.n_samples());
    }

    #[test]
    fn without_variants_drops_rows() {
        let ds = small();
        let reduced = ds.without_variants(&HashSet::from(["v1"]));

        assert_eq!(1, reduced.n_variants());
        assert_eq!("v2", reduced.variants()[0].id);
        assert_eq!(Call::Diploid(1, 1), reduced.call(0, 0));
    }

    #[test]
    fn no_removal_is_equal() {
        let ds = small();

        assert_eq!(ds, ds.without_samples(&HashSet::new()));
        assert_eq!(ds, ds.without_variants(&HashSet::from(["unknown"])));
    }

    #[test]
    fn restrict_and_count() {
        let ds = small();
        let controls = ds.restrict_to_phenotype(Phenotype::Control);

        assert_eq!(1, controls.n_samples());
        assert_eq!("s2", controls.samples()[0].id);
        assert_eq!(
            CohortCounts {
                phenotype: PhenotypeCounts {
                    cases: 1,
                    controls: 1,
                    unknown: 1
                },
                sex: SexCounts {
                    males: 1,
                    females: 1,
                    unknown: 1
                },
                n_samples: 3,
                n_variants: 2,
            },
            ds.cohort_counts()
        );
        assert!(!ds.is_exhausted());
        assert!(ds
            .restrict_to_phenotype(Phenotype::Unknown)
            .without_samples(&HashSet::from(["s3"]))
            .is_exhausted());
    }

    #[rstest]
    #[case("2", Phenotype::Case, Sex::Female)]
    #[case("1", Phenotype::Control, Sex::Male)]
    #[case("0", Phenotype::Unknown, Sex::Unknown)]
    #[case("-9", Phenotype::Unknown, Sex::Unknown)]
    fn from_ped(#[case] value: &str, #[case] pheno: Phenotype, #[case] sex: Sex) {
        assert_eq!(pheno, Phenotype::from_ped(value));
        assert_eq!(sex, Sex::from_ped(value));
    }
}

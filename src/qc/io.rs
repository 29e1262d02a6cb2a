//! Reading the cohort from VCF + PED and writing the QC outputs.

use std::{collections::HashSet, io::Write, path::Path};

use indexmap::IndexMap;
use noodles_vcf as vcf;
use thousands::Separable;

use crate::{common::io::open_read_maybe_gz, common::io::open_write_maybe_gz, err::QcError};

use super::{
    dataset::{Call, Dataset, Phenotype, Sample, Sex, Variant},
    pipeline::Aborted,
    report::{ExclusionOverviewTable, PipelineReport, SizeOfSampleTable},
    stage::StageResult,
};

/// One line of a PED/FAM file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PedEntry {
    pub family_id: String,
    pub individual_id: String,
    pub father_id: String,
    pub mother_id: String,
    pub sex: Sex,
    pub phenotype: Phenotype,
}

/// Read a PED or FAM file, tab or whitespace separated.
pub fn read_ped<P: AsRef<Path>>(path: P) -> Result<IndexMap<String, PedEntry>, anyhow::Error> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .delimiter(b'\t')
        .comment(Some(b'#'))
        .flexible(true)
        .from_reader(open_read_maybe_gz(path.as_ref())?);

    let mut result = IndexMap::new();
    for (lineno, record) in reader.records().enumerate() {
        let record = record?;
        let fields: Vec<&str> = if record.len() == 1 {
            record[0].split_whitespace().collect()
        } else {
            record.iter().map(|f| f.trim()).collect()
        };
        if fields.is_empty() || fields.iter().all(|f| f.is_empty()) {
            continue;
        }
        if fields.len() < 6 {
            anyhow::bail!(
                "line {} of {:?} has {} columns, need 6",
                lineno + 1,
                path.as_ref(),
                fields.len()
            );
        }
        let entry = PedEntry {
            family_id: fields[0].to_string(),
            individual_id: fields[1].to_string(),
            father_id: fields[2].to_string(),
            mother_id: fields[3].to_string(),
            sex: Sex::from_ped(fields[4]),
            phenotype: Phenotype::from_ped(fields[5]),
        };
        if result.contains_key(&entry.individual_id) {
            anyhow::bail!("duplicate individual {} in pedigree", &entry.individual_id);
        }
        result.insert(entry.individual_id.clone(), entry);
    }

    Ok(result)
}

/// Variant identifier from the VCF ID column, `chrom:pos:ref:alt` if empty.
fn variant_id(record: &vcf::Record, chrom: &str, pos: usize, alleles: &[String]) -> String {
    let ids = record.ids().to_string();
    if ids.is_empty() || ids == "." {
        format!("{}:{}:{}", chrom, pos, alleles.join(":"))
    } else {
        ids
    }
}

/// Read genotypes from a VCF file, annotating samples from the pedigree.
///
/// Every VCF sample must be in the pedigree; pedigree members without
/// genotypes are ignored.
pub fn read_vcf<P: AsRef<Path>>(
    path: P,
    pedigree: &IndexMap<String, PedEntry>,
) -> Result<Dataset, anyhow::Error> {
    let mut reader = vcf::Reader::new(open_read_maybe_gz(path.as_ref())?);
    let header = reader.read_header()?;

    let samples = header
        .sample_names()
        .iter()
        .map(|name| {
            let entry = pedigree.get(name).ok_or_else(|| {
                QcError::DatasetFormat(format!("sample {} not found in pedigree", name))
            })?;
            let mut sample = Sample::new(name, entry.phenotype, entry.sex);
            sample
                .annotations
                .insert("family_id".to_string(), entry.family_id.clone());
            sample
                .annotations
                .insert("father_id".to_string(), entry.father_id.clone());
            sample
                .annotations
                .insert("mother_id".to_string(), entry.mother_id.clone());
            Ok(sample)
        })
        .collect::<Result<Vec<_>, QcError>>()?;

    let mut variants = Vec::new();
    let mut calls = Vec::new();
    for record in reader.records(&header) {
        let record = record?;
        let chrom = record.chromosome().to_string();
        let pos: usize = record.position().into();
        let alleles = std::iter::once(record.reference_bases().to_string())
            .chain(record.alternate_bases().iter().map(|a| a.to_string()))
            .collect::<Vec<_>>();
        let id = variant_id(&record, &chrom, pos, &alleles);

        for sample in record.genotypes().values() {
            let call = if let Some(Some(vcf::record::genotypes::sample::Value::String(gt))) =
                sample.get(&vcf::record::genotypes::keys::key::GENOTYPE)
            {
                gt.as_str()
                    .parse::<Call>()
                    .map_err(|e| anyhow::anyhow!("variant {}: {}", &id, e))?
            } else {
                Call::Missing
            };
            calls.push(call);
        }
        let allele_refs = alleles.iter().map(|a| a.as_str()).collect::<Vec<_>>();
        variants.push(Variant::new(&chrom, pos, &id, &allele_refs));

        if variants.len() % 100_000 == 0 {
            tracing::debug!("  read {} variants", variants.len().separate_with_commas());
        }
    }

    Ok(Dataset::new(samples, variants, calls)?)
}

/// Load the cohort from a VCF and a PED file.
pub fn load_dataset(path_vcf: &str, path_ped: &str) -> Result<Dataset, anyhow::Error> {
    let pedigree = read_ped(path_ped)
        .map_err(|e| QcError::DatasetFormat(format!("reading pedigree {}: {}", path_ped, e)))?;
    read_vcf(path_vcf, &pedigree).map_err(|e| match e.downcast::<QcError>() {
        Ok(e) => e.into(),
        Err(e) => QcError::DatasetFormat(format!("reading VCF {}: {}", path_vcf, e)).into(),
    })
}

/// Write rows as TSV with a header line.
pub fn write_tsv<P, T>(path: P, rows: &[T]) -> Result<(), anyhow::Error>
where
    P: AsRef<Path>,
    T: serde::Serialize,
{
    let mut writer = csv::WriterBuilder::new()
        .delimiter(b'\t')
        .has_headers(true)
        .from_writer(open_write_maybe_gz(path.as_ref())?);
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}

/// Write one identifier per line.
pub fn write_ids<'a, P, I>(path: P, ids: I) -> Result<(), anyhow::Error>
where
    P: AsRef<Path>,
    I: IntoIterator<Item = &'a str>,
{
    let mut writer = open_write_maybe_gz(path.as_ref())?;
    for id in ids {
        writeln!(writer, "{}", id)?;
    }
    writer.flush()?;
    Ok(())
}

/// Sample list as `FID IID` pairs, the format PLINK's `--keep` expects.
///
/// Samples without a family fall back to their individual ID.
fn keep_sample_lines(dataset: &Dataset) -> Vec<String> {
    dataset
        .samples()
        .iter()
        .map(|s| {
            let family_id = s
                .annotations
                .get("family_id")
                .map(|f| f.as_str())
                .unwrap_or(s.id.as_str());
            format!("{}\t{}", family_id, s.id)
        })
        .collect()
}

/// Re-stream the VCF at `path_in` into `path_out`, keeping only the records
/// and sample columns that are still in `dataset`.
pub fn write_filtered_vcf<P, Q>(
    path_in: P,
    path_out: Q,
    dataset: &Dataset,
) -> Result<(), anyhow::Error>
where
    P: AsRef<Path>,
    Q: AsRef<Path>,
{
    let mut reader = vcf::Reader::new(open_read_maybe_gz(path_in.as_ref())?);
    let input_header = reader.read_header()?;

    let keep_samples = dataset
        .samples()
        .iter()
        .map(|s| s.id.as_str())
        .collect::<HashSet<_>>();
    let keep_variants = dataset
        .variants()
        .iter()
        .map(|v| v.id.as_str())
        .collect::<HashSet<_>>();
    let sample_mask = input_header
        .sample_names()
        .iter()
        .map(|name| keep_samples.contains(name.as_str()))
        .collect::<Vec<_>>();

    let mut output_header = input_header.clone();
    output_header
        .sample_names_mut()
        .retain(|name| keep_samples.contains(name.as_str()));

    let mut writer = vcf::Writer::new(open_write_maybe_gz(path_out.as_ref())?);
    writer.write_header(&output_header)?;

    let mut n_written = 0usize;
    for record in reader.records(&input_header) {
        let mut record = record?;
        let chrom = record.chromosome().to_string();
        let pos: usize = record.position().into();
        let alleles = std::iter::once(record.reference_bases().to_string())
            .chain(record.alternate_bases().iter().map(|a| a.to_string()))
            .collect::<Vec<_>>();
        if !keep_variants.contains(variant_id(&record, &chrom, pos, &alleles).as_str()) {
            continue;
        }

        let keys = record.genotypes().keys().clone();
        let values = record
            .genotypes()
            .values()
            .zip(sample_mask.iter())
            .filter(|(_, keep)| **keep)
            .map(|(sample, _)| sample.values().to_vec())
            .collect::<Vec<_>>();
        *record.genotypes_mut() = vcf::record::Genotypes::new(keys, values);

        writer.write_record(&output_header, &record)?;
        n_written += 1;
    }
    tracing::debug!(
        "  wrote {} records to {:?}",
        n_written.separate_with_commas(),
        path_out.as_ref()
    );

    Ok(())
}

/// The report file: full report plus the aggregated tables.
#[derive(Debug, serde::Serialize)]
struct ReportFile<'a> {
    worker_version: &'a str,
    report: &'a PipelineReport,
    size_of_sample: &'a SizeOfSampleTable,
    exclusion_overview: &'a ExclusionOverviewTable,
}

/// Record of a run that was aborted.
#[derive(Debug, serde::Serialize)]
struct AbortedFile<'a> {
    worker_version: &'a str,
    error: String,
    stages: &'a [StageResult],
}

/// Paths of the QC outputs of one round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputPaths {
    pub report_json: String,
    pub aborted_json: String,
    pub size_of_sample_tsv: String,
    pub exclusion_overview_tsv: String,
    pub keep_samples: String,
    pub keep_variants: String,
    pub vcf: String,
}

impl OutputPaths {
    /// Paths below `<prefix>_qc<round>`.
    pub fn new(prefix: &str, qc_round: &str) -> Self {
        let base = format!("{}_qc{}", prefix, qc_round);
        Self {
            report_json: format!("{}.report.json", base),
            aborted_json: format!("{}.aborted.json", base),
            size_of_sample_tsv: format!("{}.size_of_sample.tsv", base),
            exclusion_overview_tsv: format!("{}.exclusion_overview.tsv", base),
            keep_samples: format!("{}.keep.samples.txt", base),
            keep_variants: format!("{}.keep.variants.txt", base),
            vcf: format!("{}.vcf.gz", base),
        }
    }
}

/// Write report, tables, keep-lists and the filtered VCF of a finished run.
///
/// `path_vcf` is the VCF the dataset was loaded from.
pub fn write_outputs(
    paths: &OutputPaths,
    path_vcf: &str,
    dataset: &Dataset,
    report: &PipelineReport,
    size_of_sample: &SizeOfSampleTable,
    exclusion_overview: &ExclusionOverviewTable,
) -> Result<(), anyhow::Error> {
    let worker_version = crate::common::worker_version();
    let file = std::fs::File::create(&paths.report_json)
        .map_err(|e| anyhow::anyhow!("could not create {}: {}", &paths.report_json, e))?;
    serde_json::to_writer_pretty(
        std::io::BufWriter::new(file),
        &ReportFile {
            worker_version,
            report,
            size_of_sample,
            exclusion_overview,
        },
    )?;
    write_tsv(&paths.size_of_sample_tsv, &size_of_sample.rows)?;
    write_tsv(&paths.exclusion_overview_tsv, &exclusion_overview.rows)?;
    let keep_samples = keep_sample_lines(dataset);
    write_ids(&paths.keep_samples, keep_samples.iter().map(|l| l.as_str()))?;
    write_ids(
        &paths.keep_variants,
        dataset.variants().iter().map(|v| v.id.as_str()),
    )?;
    write_filtered_vcf(path_vcf, &paths.vcf, dataset)?;
    Ok(())
}

/// Write the stages completed before an abort.
pub fn write_aborted(paths: &OutputPaths, aborted: &Aborted) -> Result<(), anyhow::Error> {
    let file = std::fs::File::create(&paths.aborted_json)
        .map_err(|e| anyhow::anyhow!("could not create {}: {}", &paths.aborted_json, e))?;
    serde_json::to_writer_pretty(
        std::io::BufWriter::new(file),
        &AbortedFile {
            worker_version: crate::common::worker_version(),
            error: aborted.error.to_string(),
            stages: &aborted.stages,
        },
    )?;
    Ok(())
}

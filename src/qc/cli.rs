//! Implementation of the `qc run` and `qc stats` sub commands.

use crate::common::{self, trace_rss_now};

use super::{
    io::{load_dataset, write_aborted, write_outputs, OutputPaths},
    metrics::GenotypeMetrics,
    params::QcParams,
    pipeline::{Pipeline, TracingSink},
    report::{aggregate, CohortSnapshot},
};

/// Set the size of the global rayon thread pool.
fn init_thread_pool(num_threads: Option<usize>) -> Result<(), anyhow::Error> {
    if let Some(num_threads) = num_threads {
        rayon::ThreadPoolBuilder::new()
            .num_threads(num_threads)
            .build_global()
            .map_err(|e| anyhow::anyhow!("building global Rayon thread pool failed: {}", e))?;
    }
    Ok(())
}

pub mod run {
    use super::*;

    /// Command line arguments for `qc run` sub command.
    #[derive(Debug, clap::Parser)]
    #[command(author, version, about = "run the QC filter stages on a cohort", long_about = None)]
    pub struct Args {
        /// Path to the input VCF file with genotypes.
        #[clap(long)]
        pub path_vcf: String,
        /// Path to the PED/FAM file with sex and case/control status.
        #[clap(long)]
        pub path_ped: String,
        /// Prefix of the output files, `_qc<round>` is appended.
        #[clap(long)]
        pub path_out_prefix: String,
        /// Load the QC parameters from a JSON file instead of the flags.
        #[clap(long)]
        pub path_params: Option<String>,
        /// Add case/control association diagnostics to the report.
        #[clap(long, default_value_t = false)]
        pub with_association: bool,
        /// Set the number of threads to use, defaults to number of cores.
        #[clap(long)]
        pub num_threads: Option<usize>,
        #[command(flatten)]
        pub params: QcParams,
    }

    /// Main entry point for `qc run` sub command.
    pub fn run(args_common: &common::Args, args: &Args) -> Result<(), anyhow::Error> {
        let before_anything = std::time::Instant::now();
        tracing::info!("args_common = {:#?}", &args_common);
        tracing::info!("args = {:#?}", &args);

        init_thread_pool(args.num_threads)?;

        let params = match &args.path_params {
            Some(path) => QcParams::load(path)?,
            None => args.params.clone(),
        };
        params.validate()?;
        tracing::info!("params = {:#?}", &params);
        let paths = OutputPaths::new(&args.path_out_prefix, &params.qc_round);

        tracing::info!("loading cohort ...");
        let before_loading = std::time::Instant::now();
        let dataset = load_dataset(&args.path_vcf, &args.path_ped)?;
        tracing::info!("... done loading cohort in {:?}", before_loading.elapsed());
        trace_rss_now();

        let pipeline = Pipeline::new(params.clone(), GenotypeMetrics::new(params.genome_release))
            .with_association(args.with_association);
        let output = match pipeline.run(dataset, &mut TracingSink::default()) {
            Ok(output) => output,
            Err(aborted) => {
                write_aborted(&paths, &aborted)?;
                tracing::info!("wrote completed stages to {}", &paths.aborted_json);
                return Err(aborted.into());
            }
        };
        trace_rss_now();

        let (size_of_sample, exclusion_overview) = aggregate(&output.report);
        for row in &size_of_sample.rows {
            tracing::info!(
                "  {:<20} pre-QC {:>8}  post-QC {:>8}  excluded {:>8}",
                row.category,
                row.pre_qc,
                row.post_qc,
                row.excluded
            );
        }
        for row in &exclusion_overview.rows {
            tracing::info!(
                "  {:>2}. {:<55} {:>8} ({})",
                row.order,
                row.description,
                row.n_excluded,
                row.status
            );
        }

        tracing::info!("writing outputs ...");
        write_outputs(
            &paths,
            &args.path_vcf,
            &output.dataset,
            &output.report,
            &size_of_sample,
            &exclusion_overview,
        )?;
        tracing::info!("... wrote {}", &paths.report_json);

        tracing::info!(
            "All of `qc run` completed in {:?}",
            before_anything.elapsed()
        );
        Ok(())
    }
}

pub mod stats {
    use super::*;

    /// Command line arguments for `qc stats` sub command.
    #[derive(Debug, clap::Parser)]
    #[command(author, version, about = "summarize a cohort before QC", long_about = None)]
    pub struct Args {
        /// Path to the input VCF file with genotypes.
        #[clap(long)]
        pub path_vcf: String,
        /// Path to the PED/FAM file with sex and case/control status.
        #[clap(long)]
        pub path_ped: String,
        /// Path to the output JSON file, standard output if omitted.
        #[clap(long)]
        pub path_out: Option<String>,
        /// Run the case/control association scan.
        #[clap(long, default_value_t = false)]
        pub with_association: bool,
        /// Set the number of threads to use, defaults to number of cores.
        #[clap(long)]
        pub num_threads: Option<usize>,
    }

    /// Main entry point for `qc stats` sub command.
    pub fn run(args_common: &common::Args, args: &Args) -> Result<(), anyhow::Error> {
        let before_anything = std::time::Instant::now();
        tracing::info!("args_common = {:#?}", &args_common);
        tracing::info!("args = {:#?}", &args);

        init_thread_pool(args.num_threads)?;

        let dataset = load_dataset(&args.path_vcf, &args.path_ped)?;
        trace_rss_now();
        let snapshot =
            CohortSnapshot::capture(&dataset, &GenotypeMetrics::default(), args.with_association);
        let counts = &snapshot.counts;
        tracing::info!(
            "{} samples ({} cases, {} controls, {} unknown), {} variants",
            counts.n_samples,
            counts.phenotype.cases,
            counts.phenotype.controls,
            counts.phenotype.unknown,
            counts.n_variants
        );
        tracing::info!(
            "{} males, {} females, {} unknown sex",
            counts.sex.males,
            counts.sex.females,
            counts.sex.unknown
        );
        if let Some(association) = &snapshot.diagnostics.association {
            tracing::info!(
                "{} of {} tested variants genome-wide significant",
                association.n_significant,
                association.n_tested
            );
        }

        match &args.path_out {
            Some(path) => {
                let file = std::fs::File::create(path)
                    .map_err(|e| anyhow::anyhow!("could not create {}: {}", path, e))?;
                serde_json::to_writer_pretty(std::io::BufWriter::new(file), &snapshot)?;
            }
            None => {
                serde_json::to_writer_pretty(std::io::stdout().lock(), &snapshot)?;
                println!();
            }
        }

        tracing::info!(
            "All of `qc stats` completed in {:?}",
            before_anything.elapsed()
        );
        Ok(())
    }
}

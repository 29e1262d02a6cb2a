//! Common functionality.

use clap::Parser;
use clap_verbosity_flag::{InfoLevel, Verbosity};

pub mod io;

/// Commonly used command line arguments.
#[derive(Parser, Debug)]
pub struct Args {
    /// Verbosity of the program
    #[clap(flatten)]
    pub verbose: Verbosity<InfoLevel>,
}

impl Default for Args {
    fn default() -> Self {
        Self {
            verbose: Verbosity::new(0, 0),
        }
    }
}

/// Helper to print the current memory resident set size via `tracing`.
pub fn trace_rss_now() {
    let rss = procfs::process::Process::myself()
        .and_then(|me| me.stat())
        .map(|stat| stat.rss * procfs::page_size());
    match rss {
        Ok(rss) => tracing::debug!("RSS now: {}", bytesize::ByteSize::b(rss)),
        Err(e) => tracing::debug!("could not determine RSS: {}", e),
    }
}

/// Select the genome release to use.
#[derive(
    clap::ValueEnum,
    Clone,
    Copy,
    Debug,
    Default,
    strum::Display,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    serde::Serialize,
    serde::Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum GenomeRelease {
    /// GRCh37 / hg19
    #[strum(serialize = "grch37")]
    Grch37,
    /// GRCh38 / hg38
    #[default]
    #[strum(serialize = "grch38")]
    Grch38,
}

impl GenomeRelease {
    /// Pseudoautosomal regions on chrX as 1-based, closed intervals.
    pub fn x_par_regions(&self) -> &'static [(usize, usize)] {
        match self {
            GenomeRelease::Grch37 => &[(60_001, 2_699_520), (154_931_044, 155_260_560)],
            GenomeRelease::Grch38 => &[(10_001, 2_781_479), (155_701_383, 156_030_895)],
        }
    }
}

/// Coarse chromosome class, enough for sex-aware genotype handling.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Chrom {
    /// Autosomes and chrMT.
    Auto,
    X,
    Y,
    /// PLINK's `XY` (code 25), the pseudoautosomal part of chrX.
    XyPar,
}

impl std::str::FromStr for Chrom {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.strip_prefix("chr").unwrap_or(s);
        Ok(match s {
            "X" | "x" | "23" => Chrom::X,
            "Y" | "y" | "24" => Chrom::Y,
            "XY" | "xy" | "25" => Chrom::XyPar,
            _ => Chrom::Auto,
        })
    }
}

impl Chrom {
    /// Whether a site at 1-based `pos` on this chromosome is on chrX outside
    /// of the pseudoautosomal regions.
    pub fn is_x_nonpar(&self, pos: usize, release: GenomeRelease) -> bool {
        match self {
            Chrom::X => !release
                .x_par_regions()
                .iter()
                .any(|(start, end)| (*start..=*end).contains(&pos)),
            Chrom::Auto | Chrom::Y | Chrom::XyPar => false,
        }
    }
}

/// Return the version of the `preimp-qc` crate and `x.y.z` in tests.
pub fn worker_version() -> &'static str {
    if cfg!(test) {
        "x.y.z"
    } else {
        env!("CARGO_PKG_VERSION")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[rstest::rstest]
    #[case("X", Chrom::X)]
    #[case("chrX", Chrom::X)]
    #[case("23", Chrom::X)]
    #[case("Y", Chrom::Y)]
    #[case("25", Chrom::XyPar)]
    #[case("chr1", Chrom::Auto)]
    #[case("MT", Chrom::Auto)]
    fn parse_chrom(#[case] name: &str, #[case] expected: Chrom) -> Result<(), anyhow::Error> {
        assert_eq!(expected, name.parse::<Chrom>()?);

        Ok(())
    }

    #[rstest::rstest]
    #[case(GenomeRelease::Grch37, 60_000, true)]
    #[case(GenomeRelease::Grch37, 60_001, false)]
    #[case(GenomeRelease::Grch37, 2_699_520, false)]
    #[case(GenomeRelease::Grch37, 2_699_521, true)]
    #[case(GenomeRelease::Grch38, 2_699_521, false)]
    #[case(GenomeRelease::Grch38, 155_701_383, false)]
    #[case(GenomeRelease::Grch38, 100_000_000, true)]
    fn x_nonpar(#[case] release: GenomeRelease, #[case] pos: usize, #[case] expected: bool) {
        assert_eq!(expected, Chrom::X.is_x_nonpar(pos, release));
        assert!(!Chrom::Auto.is_x_nonpar(pos, release));
    }

    #[test]
    fn genome_release_display() {
        assert_eq!("grch37", GenomeRelease::Grch37.to_string());
        assert_eq!("grch38", GenomeRelease::Grch38.to_string());
    }
}

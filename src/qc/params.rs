//! QC thresholds and switches.

use crate::{common::GenomeRelease, err::QcError};

use super::metrics::SexThresholds;

/// Parameters of one QC round.
///
/// Also serves as the argument group of `qc run`, so every field has a flag.
#[derive(clap::Args, Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct QcParams {
    /// Maximal missing rate of variants before the sample filter.
    #[arg(long, default_value_t = 0.05)]
    pub pre_geno: f64,
    /// Maximal missing rate of samples.
    #[arg(long, default_value_t = 0.02)]
    pub mind: f64,
    /// F statistic at or below which a reported female passes the sex check.
    #[arg(long, default_value_t = 0.4)]
    pub fhet_y: f64,
    /// F statistic at or above which a reported male passes the sex check.
    #[arg(long, default_value_t = 0.8)]
    pub fhet_x: f64,
    /// Maximal missing rate of variants after the sample filter.
    #[arg(long, default_value_t = 0.02)]
    pub geno: f64,
    /// Maximal missing rate difference between cases and controls.
    #[arg(long, default_value_t = 0.02)]
    pub midi: f64,
    /// Run the missing rate difference filter; it has no implementation and fails.
    #[arg(long, default_value_t = false)]
    pub run_midi: bool,
    /// Keep invariant variants, i.e., skip the monomorphic variant filter.
    #[arg(long, default_value_t = false)]
    pub with_pna: bool,
    /// Minimal minor allele frequency.
    #[arg(long, default_value_t = 0.01)]
    pub maf: f64,
    /// HWE p-value threshold in controls.
    #[arg(long = "hwe-th-con", default_value_t = 1e-6)]
    pub hwe_threshold_control: f64,
    /// HWE p-value threshold in cases.
    #[arg(long = "hwe-th-cas", default_value_t = 1e-6)]
    pub hwe_threshold_case: f64,
    /// Label of the QC round, used in report and output file names.
    #[arg(long, default_value = "1")]
    pub qc_round: String,
    /// Genome release, selects the chrX pseudoautosomal regions.
    #[arg(long, value_enum, default_value_t = GenomeRelease::Grch38)]
    pub genome_release: GenomeRelease,
}

impl Default for QcParams {
    fn default() -> Self {
        Self {
            pre_geno: 0.05,
            mind: 0.02,
            fhet_y: 0.4,
            fhet_x: 0.8,
            geno: 0.02,
            midi: 0.02,
            run_midi: false,
            with_pna: false,
            maf: 0.01,
            hwe_threshold_control: 1e-6,
            hwe_threshold_case: 1e-6,
            qc_round: "1".to_string(),
            genome_release: GenomeRelease::default(),
        }
    }
}

impl QcParams {
    /// Check that rates are in `[0, 1]` and p-value thresholds in `(0, 1]`.
    pub fn validate(&self) -> Result<(), QcError> {
        let rates = [
            ("pre_geno", self.pre_geno),
            ("mind", self.mind),
            ("geno", self.geno),
            ("midi", self.midi),
            ("maf", self.maf),
        ];
        for (name, value) in rates {
            if !(0.0..=1.0).contains(&value) {
                return Err(QcError::InvalidParams(format!(
                    "{} must be in [0, 1], is {}",
                    name, value
                )));
            }
        }
        for (name, value) in [
            ("hwe_threshold_control", self.hwe_threshold_control),
            ("hwe_threshold_case", self.hwe_threshold_case),
        ] {
            if !(value > 0.0 && value <= 1.0) {
                return Err(QcError::InvalidParams(format!(
                    "{} must be in (0, 1], is {}",
                    name, value
                )));
            }
        }
        if !self.fhet_y.is_finite() || !self.fhet_x.is_finite() {
            return Err(QcError::InvalidParams(
                "fhet_y and fhet_x must be finite".to_string(),
            ));
        }
        if self.fhet_y > self.fhet_x {
            return Err(QcError::InvalidParams(format!(
                "fhet_y ({}) must not be larger than fhet_x ({})",
                self.fhet_y, self.fhet_x
            )));
        }
        if self.qc_round.trim().is_empty() {
            return Err(QcError::InvalidParams("qc_round must not be empty".to_string()));
        }

        Ok(())
    }

    pub fn sex_thresholds(&self) -> SexThresholds {
        SexThresholds {
            fhet_y: self.fhet_y,
            fhet_x: self.fhet_x,
        }
    }

    /// Load parameters from a JSON file; missing keys take their default.
    pub fn load(path: &str) -> Result<Self, anyhow::Error> {
        let file = std::fs::File::open(path)
            .map_err(|e| anyhow::anyhow!("failed to open QC params file {}: {}", path, e))?;
        serde_json::from_reader(std::io::BufReader::new(file))
            .map_err(|e| anyhow::anyhow!("failed to parse QC params from {}: {}", path, e))
    }
}

#[cfg(test)]
mod test {
    use clap::Parser;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;

    #[derive(clap::Parser, Debug)]
    struct Cli {
        #[command(flatten)]
        params: QcParams,
    }

    #[test]
    fn cli_defaults_match_default() {
        let cli = Cli::parse_from(["qc"]);

        assert_eq!(QcParams::default(), cli.params);
    }

    #[test]
    fn cli_flags() {
        let cli = Cli::parse_from([
            "qc",
            "--mind",
            "0.05",
            "--hwe-th-con",
            "1e-5",
            "--with-pna",
            "--qc-round",
            "2",
            "--genome-release",
            "grch37",
        ]);

        assert_eq!(0.05, cli.params.mind);
        assert_eq!(1e-5, cli.params.hwe_threshold_control);
        assert!(cli.params.with_pna);
        assert_eq!("2", cli.params.qc_round);
        assert_eq!(GenomeRelease::Grch37, cli.params.genome_release);
    }

    #[test]
    fn defaults_validate() {
        assert_eq!(Ok(()), QcParams::default().validate());
    }

    #[rstest]
    #[case(QcParams { mind: 1.5, ..Default::default() })]
    #[case(QcParams { maf: -0.1, ..Default::default() })]
    #[case(QcParams { hwe_threshold_case: 0.0, ..Default::default() })]
    #[case(QcParams { fhet_y: 0.9, ..Default::default() })]
    #[case(QcParams { qc_round: String::new(), ..Default::default() })]
    fn invalid_params(#[case] params: QcParams) {
        assert!(matches!(params.validate(), Err(QcError::InvalidParams(_))));
    }

    #[test]
    fn load_partial_json() -> Result<(), anyhow::Error> {
        let tmp_dir = temp_testdir::TempDir::default();
        let path = tmp_dir.join("params.json");
        std::fs::write(&path, r#"{"maf": 0.05, "with_pna": true}"#)?;

        let params = QcParams::load(path.to_str().unwrap())?;

        assert_eq!(
            QcParams {
                maf: 0.05,
                with_pna: true,
                ..Default::default()
            },
            params
        );

        Ok(())
    }
}

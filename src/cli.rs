use crate::prior::{DEFAULT_PRIOR_SEED, DEFAULT_PRIOR_SIZE};
use clap::{ArgAction, Parser};
use std::path::PathBuf;

/// Boolean options take an explicit value (`--use-disk false`).
#[derive(Parser, Debug, Clone)]
#[command(
    author,
    version,
    about = "Genotype calling for two-allele SNP arrays from raw probe intensities.",
    long_about = None,
    propagate_version = true
)]
pub struct CliArgs {
    // --- Inputs ---
    /// Input intensity files (.gcin binary or .txt).
    #[arg(value_name = "INTENSITY_FILE")]
    pub inputs: Vec<PathBuf>,

    /// File listing input intensity files, one per line.
    #[arg(long = "cel-files")]
    pub cel_files: Option<PathBuf>,

    /// Probeset design file (TSV).
    #[arg(short = 'd', long = "design-file", required = true)]
    pub design_file: PathBuf,

    #[arg(short = 'o', long = "out-dir", default_value = ".")]
    pub out_dir: PathBuf,

    /// Method string: a standard name or `stage,...,method` with `.key=value` parameters.
    #[arg(short = 'a', long, default_value = "birdseed-v2")]
    pub analysis: String,

    /// Output file prefix; defaults to the method name.
    #[arg(long = "analysis-name")]
    pub analysis_name: Option<String>,

    // --- Gender ---
    /// Tab-separated `file<TAB>gender` table.
    #[arg(long = "read-genders")]
    pub read_genders: Option<PathBuf>,

    /// Force one gender provenance (e.g. em-cluster-chrX-het-contrast, none).
    #[arg(long = "set-gender-method")]
    pub set_gender_method: Option<String>,

    /// Proceed with unknown genders when no gender evidence is usable.
    #[arg(long = "no-gender-force")]
    pub no_gender_force: bool,

    /// Non-pseudoautosomal chrX probeset ids.
    #[arg(long = "chrX-snps")]
    pub chrx_snps: Option<PathBuf>,

    /// chrX (or chrZ) copy-number probe ids.
    #[arg(long = "chrX-probes")]
    pub chrx_probes: Option<PathBuf>,

    /// chrY (or chrW) copy-number probe ids.
    #[arg(long = "chrY-probes")]
    pub chry_probes: Option<PathBuf>,

    #[arg(long = "female-thresh", default_value_t = 0.48)]
    pub female_thresh: f64,

    #[arg(long = "male-thresh", default_value_t = 0.71)]
    pub male_thresh: f64,

    /// Treat the probe files as chrZ/chrW and swap the ratio labels.
    #[arg(long = "zw-gender-calling")]
    pub zw_gender_calling: bool,

    #[arg(long = "em-gender", action = ArgAction::Set, default_value_t = true)]
    pub em_gender: bool,

    /// Precomputed genotype table used for the chrX het-rate gender call.
    #[arg(long)]
    pub genotypes: Option<PathBuf>,

    // --- Inbreeding ---
    /// Tab-separated `file<TAB>penalty` table.
    #[arg(long = "read-inbred")]
    pub read_inbred: Option<PathBuf>,

    // --- Priors ---
    #[arg(long = "prior-size", default_value_t = DEFAULT_PRIOR_SIZE)]
    pub prior_size: usize,

    #[arg(long = "read-priors")]
    pub read_priors: Option<PathBuf>,

    #[arg(long = "write-prior")]
    pub write_prior: Option<PathBuf>,

    #[arg(long = "prior-seed", default_value_t = DEFAULT_PRIOR_SEED)]
    pub prior_seed: u64,

    // --- Normalization ---
    #[arg(long = "target-sketch")]
    pub target_sketch: Option<PathBuf>,

    #[arg(long = "write-sketch")]
    pub write_sketch: Option<PathBuf>,

    // --- Subset ---
    /// Only genotype these probesets.
    #[arg(long = "probeset-ids")]
    pub probeset_ids: Option<PathBuf>,

    // --- Intensity store ---
    #[arg(long = "use-disk", action = ArgAction::Set, default_value_t = true)]
    pub use_disk: bool,

    /// Disk store cache window in bytes.
    #[arg(long = "cache-size", default_value_t = 50_000_000)]
    pub cache_size: usize,

    /// Directory for the disk store; defaults to the output directory.
    #[arg(long = "temp-dir")]
    pub temp_dir: Option<PathBuf>,

    // --- Outputs ---
    #[arg(long = "table-output", action = ArgAction::Set, default_value_t = true)]
    pub table_output: bool,

    #[arg(long = "chp-output", action = ArgAction::Set, default_value_t = false)]
    pub chp_output: bool,

    #[arg(long = "summary-output", action = ArgAction::Set, default_value_t = true)]
    pub summary_output: bool,

    // --- Misc ---
    #[arg(long = "disk-check", action = ArgAction::Set, default_value_t = true)]
    pub disk_check: bool,

    #[arg(long, default_value = "Info")]
    pub log_level: String,

    #[arg(long = "no-progress")]
    pub no_progress: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let args = CliArgs::try_parse_from(["genocall", "-d", "design.tsv", "a.gcin", "b.gcin"]).unwrap();
        assert_eq!(args.inputs.len(), 2);
        assert_eq!(args.analysis, "birdseed-v2");
        assert!(args.use_disk && args.em_gender && args.table_output && args.summary_output);
        assert!(!args.chp_output);
        assert_eq!(args.prior_size, 10_000);
        assert_eq!(args.female_thresh, 0.48);
        assert_eq!(args.male_thresh, 0.71);
    }

    #[test]
    fn test_explicit_booleans_and_mixed_case_names() {
        let args = CliArgs::try_parse_from([
            "genocall",
            "-d",
            "design.tsv",
            "--use-disk",
            "false",
            "--chp-output",
            "true",
            "--chrX-snps",
            "x.txt",
            "--no-gender-force",
            "a.gcin",
        ])
        .unwrap();
        assert!(!args.use_disk);
        assert!(args.chp_output);
        assert!(args.no_gender_force);
        assert_eq!(args.chrx_snps, Some(PathBuf::from("x.txt")));
    }

    #[test]
    fn test_design_file_is_required() {
        assert!(CliArgs::try_parse_from(["genocall", "a.gcin"]).is_err());
    }
}

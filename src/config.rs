//! The immutable run configuration.
//!
//! `RunConfig::try_from(&CliArgs)` performs every check that does not need
//! to open an intensity file, so contradictory or incomplete options fail
//! before any expensive work starts.

use crate::cli::CliArgs;
use crate::covariate::provenance;
use crate::covariate::ratio::RatioThresholds;
use crate::error::{GenoError, Result};
use crate::intensity::StoreBacking;
use crate::prior::PriorOptions;
use crate::quant::{build_method, MethodSpec};
use crate::samples::{read_sample_list, SampleSet};
use crate::transform::{StagedTransformPipeline, TransformOptions};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq)]
pub struct GenderConfig {
    pub read_genders: Option<PathBuf>,
    /// Provenance name forced with `--set-gender-method`.
    pub set_method: Option<String>,
    pub tolerate_none: bool,
    pub chrx_snps: Option<PathBuf>,
    pub chrx_probes: Option<PathBuf>,
    pub chry_probes: Option<PathBuf>,
    pub thresholds: RatioThresholds,
    pub zw: bool,
    pub em_gender: bool,
    pub genotypes: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PriorConfig {
    pub size: usize,
    pub seed: u64,
    pub read: Option<PathBuf>,
    pub write: Option<PathBuf>,
}

impl PriorConfig {
    pub fn options(&self, k: f64) -> PriorOptions {
        PriorOptions {
            size: self.size,
            seed: self.seed,
            k,
            ..PriorOptions::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputConfig {
    pub table: bool,
    pub chp: bool,
    pub summary: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunConfig {
    pub samples: SampleSet,
    pub design_file: PathBuf,
    pub out_dir: PathBuf,
    pub method: MethodSpec,
    /// Output file prefix.
    pub analysis_name: String,
    pub gender: GenderConfig,
    pub read_inbred: Option<PathBuf>,
    pub prior: PriorConfig,
    pub transform: TransformOptions,
    pub probeset_ids: Option<PathBuf>,
    pub backing: StoreBacking,
    pub outputs: OutputConfig,
    pub disk_check: bool,
    pub show_progress: bool,
}

impl RunConfig {
    /// Contrast constant of the configured method.
    pub fn contrast_k(&self) -> f64 {
        self.method
            .method
            .param::<f64>(&["K"])
            .ok()
            .flatten()
            .unwrap_or(crate::quant::contrast::DEFAULT_K)
    }
}

fn require_file(path: &Path, what: &str) -> Result<()> {
    if !path.is_file() {
        return Err(GenoError::config(format!(
            "{} '{}' does not exist or is not a file.",
            what,
            path.display()
        )));
    }
    Ok(())
}

fn require_optional(path: &Option<PathBuf>, what: &str) -> Result<()> {
    match path {
        Some(p) => require_file(p, what),
        None => Ok(()),
    }
}

fn check_gender_method(args: &CliArgs) -> Result<()> {
    let Some(method) = args.set_gender_method.as_deref() else {
        return Ok(());
    };
    if !provenance::GENDER_METHODS.contains(&method) {
        return Err(GenoError::config(format!(
            "Unknown gender method '{}'. Known: {}",
            method,
            provenance::GENDER_METHODS.join(", ")
        )));
    }
    let missing = |flag: &str| {
        GenoError::config(format!("Gender method '{}' requires {}.", method, flag))
    };
    match method {
        provenance::CN_PROBE_XY_RATIO | provenance::CN_PROBE_ZW_RATIO => {
            let zw_method = method == provenance::CN_PROBE_ZW_RATIO;
            if zw_method != args.zw_gender_calling {
                return Err(GenoError::config(format!(
                    "Gender method '{}' contradicts --zw-gender-calling {}.",
                    method, args.zw_gender_calling
                )));
            }
            if args.chrx_probes.is_none() || args.chry_probes.is_none() {
                return Err(missing("--chrX-probes and --chrY-probes"));
            }
        }
        provenance::EM_CLUSTER | provenance::DM_HET_RATE => {
            if args.chrx_snps.is_none() {
                return Err(missing("--chrX-snps"));
            }
            if method == provenance::EM_CLUSTER && !args.em_gender {
                return Err(GenoError::config(format!(
                    "Gender method '{}' was requested with --em-gender false.",
                    method
                )));
            }
        }
        provenance::SUPPLIED_GENOTYPES => {
            if args.chrx_snps.is_none() || args.genotypes.is_none() {
                return Err(missing("--chrX-snps and --genotypes"));
            }
        }
        provenance::USER_SUPPLIED => return Err(missing("--read-genders instead")),
        _ => {}
    }
    Ok(())
}

impl TryFrom<&CliArgs> for RunConfig {
    type Error = GenoError;

    fn try_from(args: &CliArgs) -> Result<Self> {
        // --- Inputs ---
        require_file(&args.design_file, "Design file")?;
        let mut inputs = args.inputs.clone();
        if let Some(list) = &args.cel_files {
            require_file(list, "Input list")?;
            inputs.extend(read_sample_list(list)?);
        }
        for input in &inputs {
            require_file(input, "Input file")?;
        }
        let samples = SampleSet::new(inputs)?;
        if args.chp_output {
            samples.check_unique_stems()?;
        }

        // --- Method ---
        let method = MethodSpec::parse(&args.analysis)?;
        StagedTransformPipeline::from_specs(&method.stages, &TransformOptions::default())?;
        let mut probe = build_method(&method)?;
        let needs_prior = probe.prior_consumer().is_some();
        let analysis_name = args
            .analysis_name
            .clone()
            .unwrap_or_else(|| method.method.name.clone());
        if analysis_name.is_empty() || analysis_name.contains(['/', '\\']) {
            return Err(GenoError::config(format!(
                "Analysis name '{}' must be a non-empty file name prefix.",
                analysis_name
            )));
        }

        // --- Gender ---
        if args.read_genders.is_some() && args.set_gender_method.is_some() {
            return Err(GenoError::config(
                "--read-genders and --set-gender-method cannot be used together.",
            ));
        }
        check_gender_method(args)?;
        if !(args.female_thresh.is_finite() && args.male_thresh.is_finite()) {
            return Err(GenoError::config("Gender ratio thresholds must be finite."));
        }
        if args.male_thresh < args.female_thresh {
            return Err(GenoError::config(format!(
                "--male-thresh {} is below --female-thresh {}.",
                args.male_thresh, args.female_thresh
            )));
        }
        for (path, what) in [
            (&args.read_genders, "Gender file"),
            (&args.chrx_snps, "chrX SNP list"),
            (&args.chrx_probes, "chrX probe list"),
            (&args.chry_probes, "chrY probe list"),
            (&args.genotypes, "Genotype file"),
            (&args.read_inbred, "Inbred file"),
            (&args.read_priors, "Prior file"),
            (&args.target_sketch, "Target sketch"),
            (&args.probeset_ids, "Probeset id list"),
        ] {
            require_optional(path, what)?;
        }
        let explicit_none = args.set_gender_method.as_deref() == Some(provenance::NONE);

        // --- Priors ---
        if needs_prior && args.prior_size == 0 && args.read_priors.is_none() {
            return Err(GenoError::config(format!(
                "Method '{}' needs a prior: give --read-priors or a positive --prior-size.",
                method.method.name
            )));
        }

        // --- Store ---
        let backing = if args.use_disk {
            if args.cache_size == 0 {
                return Err(GenoError::config("--cache-size must be positive for the disk store."));
            }
            StoreBacking::Disk {
                cache_bytes: args.cache_size,
                temp_dir: args.temp_dir.clone().unwrap_or_else(|| args.out_dir.clone()),
            }
        } else {
            StoreBacking::Memory
        };

        Ok(Self {
            samples,
            design_file: args.design_file.clone(),
            out_dir: args.out_dir.clone(),
            method,
            analysis_name,
            gender: GenderConfig {
                read_genders: args.read_genders.clone(),
                set_method: args.set_gender_method.clone(),
                tolerate_none: args.no_gender_force || explicit_none,
                chrx_snps: args.chrx_snps.clone(),
                chrx_probes: args.chrx_probes.clone(),
                chry_probes: args.chry_probes.clone(),
                thresholds: RatioThresholds {
                    female: args.female_thresh,
                    male: args.male_thresh,
                },
                zw: args.zw_gender_calling,
                em_gender: args.em_gender,
                genotypes: args.genotypes.clone(),
            },
            read_inbred: args.read_inbred.clone(),
            prior: PriorConfig {
                size: args.prior_size,
                seed: args.prior_seed,
                read: args.read_priors.clone(),
                write: args.write_prior.clone(),
            },
            transform: TransformOptions {
                target_sketch: args.target_sketch.clone(),
                write_sketch: args.write_sketch.clone(),
            },
            probeset_ids: args.probeset_ids.clone(),
            backing,
            outputs: OutputConfig {
                table: args.table_output,
                chp: args.chp_output,
                summary: args.summary_output,
            },
            disk_check: args.disk_check,
            show_progress: !args.no_progress,
        })
    }
}

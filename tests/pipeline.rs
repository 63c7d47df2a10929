//! End-to-end runs over small synthetic arrays.

use clap::Parser;
use genocall::cli::CliArgs;
use genocall::config::RunConfig;
use genocall::covariate::Gender;
use genocall::engine::{GenotypeCallOrchestrator, RunOutcome, RunState};
use genocall::genotype::GenotypeCall;
use genocall::intensity::write_intensity_file;
use genocall::report::chp::read_chp;
use genocall::GenoError;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::Normal;
use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

const SAMPLES: usize = 12;

/// Codes as written to the calls table: 0 = AA, 1 = AB, 2 = BB.
fn genotype_signal(code: i8) -> (f32, f32) {
    match code {
        0 => (1000.0, 100.0),
        1 => (550.0, 550.0),
        _ => (100.0, 1000.0),
    }
}

fn is_male(sample: usize) -> bool {
    sample % 2 == 0
}

struct Chip {
    dir: TempDir,
    design: PathBuf,
    inputs: Vec<PathBuf>,
    /// Probeset name -> true genotype code per sample.
    truth: HashMap<String, Vec<i8>>,
    /// Genotyping probeset names in design order.
    snp_names: Vec<String>,
    chrx_snps: PathBuf,
    chrx_probes: PathBuf,
    chry_probes: PathBuf,
}

impl Chip {
    /// Builds `autosomal` SNPs where every sample holds the same number of
    /// each genotype, `chrx` haploid-in-males SNPs and `cn` copy-number
    /// probes per sex chromosome.
    fn build(autosomal: usize, chrx: usize, cn: usize, seed: u64) -> Chip {
        let dir = TempDir::new().unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let noise = Normal::new(0.0f32, 20.0).unwrap();

        let mut design = String::new();
        let mut truth = HashMap::new();
        let mut snp_names = Vec::new();
        let mut chrx_names = Vec::new();
        // probes[id - 1] holds the per-sample values of 1-based probe `id`.
        let mut probes: Vec<Vec<f32>> = Vec::new();

        let mut add_snp = |name: String, codes: Vec<i8>, design: &mut String, probes: &mut Vec<Vec<f32>>| {
            let a_id = probes.len() + 1;
            let b_id = a_id + 1;
            let (mut a, mut b) = (Vec::new(), Vec::new());
            for code in &codes {
                let (sa, sb) = genotype_signal(*code);
                a.push(sa);
                b.push(sb);
            }
            probes.push(a);
            probes.push(b);
            design.push_str(&format!("{}\tgenotyping\t{}\t{}\n", name, a_id, b_id));
            truth.insert(name.clone(), codes);
            snp_names.push(name);
        };

        for j in 0..autosomal {
            let codes = (0..SAMPLES).map(|s| ((s + j) % 3) as i8).collect();
            add_snp(format!("SNP_A-{}", j + 1), codes, &mut design, &mut probes);
        }
        for j in 0..chrx {
            let codes = (0..SAMPLES)
                .map(|s| {
                    if is_male(s) {
                        if (s / 2 + j) % 2 == 0 {
                            0
                        } else {
                            2
                        }
                    } else {
                        ((s + j) % 3) as i8
                    }
                })
                .collect();
            let name = format!("SNP_X-{}", j + 1);
            chrx_names.push(name.clone());
            add_snp(name, codes, &mut design, &mut probes);
        }

        let mut x_ids = Vec::new();
        let mut y_ids = Vec::new();
        for j in 0..cn {
            for (chrom, ids) in [("X", &mut x_ids), ("Y", &mut y_ids)] {
                let values = (0..SAMPLES)
                    .map(|s| match (chrom, is_male(s)) {
                        (_, true) => 500.0,
                        ("X", false) => 1000.0,
                        _ => 100.0,
                    })
                    .collect();
                probes.push(values);
                let id = probes.len();
                ids.push(id);
                design.push_str(&format!("CN_{}-{}\tmarker\t{}\t-\n", chrom, j + 1, id));
            }
        }

        let header = format!(
            "#%probe-count={}\nprobeset_id\ttype\tallele_a_probes\tallele_b_probes\n",
            probes.len()
        );
        let design_path = dir.path().join("design.tsv");
        fs::write(&design_path, header + &design).unwrap();

        let mut inputs = Vec::new();
        for s in 0..SAMPLES {
            let values: Vec<f32> = probes
                .iter()
                .map(|p| (p[s] + rng.sample(noise)).max(1.0))
                .collect();
            // One text input keeps the text reader on the streaming path.
            let file = if s == 3 {
                format!("array_{:02}.txt", s)
            } else {
                format!("array_{:02}.gcin", s)
            };
            let path = dir.path().join(file);
            write_intensity_file(&path, &values).unwrap();
            inputs.push(path);
        }

        let write_list = |name: &str, lines: Vec<String>| {
            let path = dir.path().join(name);
            fs::write(&path, lines.join("\n") + "\n").unwrap();
            path
        };
        let chrx_snps = write_list("chrx_snps.txt", chrx_names);
        let chrx_probes = write_list("chrx_probes.txt", x_ids.iter().map(|i| i.to_string()).collect());
        let chry_probes = write_list("chry_probes.txt", y_ids.iter().map(|i| i.to_string()).collect());

        Chip {
            design: design_path,
            inputs,
            truth,
            snp_names,
            chrx_snps,
            chrx_probes,
            chry_probes,
            dir,
        }
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    fn sample_names(&self) -> Vec<String> {
        self.inputs
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect()
    }

    fn run(&self, out: &Path, extra: &[&str]) -> genocall::Result<RunOutcome> {
        let mut argv: Vec<String> = vec![
            "genocall".into(),
            "-d".into(),
            self.design.display().to_string(),
            "-o".into(),
            out.display().to_string(),
            "--no-progress".into(),
        ];
        argv.extend(extra.iter().map(|s| s.to_string()));
        argv.extend(self.inputs.iter().map(|p| p.display().to_string()));
        let args = CliArgs::try_parse_from(argv).unwrap();
        let config = RunConfig::try_from(&args)?;
        let mut orchestrator = GenotypeCallOrchestrator::new(&config);
        let result = orchestrator.run();
        match &result {
            Ok(_) => assert_eq!(orchestrator.state(), RunState::Done),
            Err(_) => assert_eq!(orchestrator.state(), RunState::Failed),
        }
        result
    }
}

/// Reads a calls table into probeset name -> codes, preserving row order.
fn read_calls(path: &Path) -> Vec<(String, Vec<i8>)> {
    let text = fs::read_to_string(path).unwrap();
    let mut lines = text.lines();
    let header = lines.next().unwrap();
    assert!(header.starts_with("probeset_id\t"));
    lines
        .map(|line| {
            let mut fields = line.split('\t');
            let name = fields.next().unwrap().to_string();
            let codes = fields.map(|f| f.parse::<i8>().unwrap()).collect();
            (name, codes)
        })
        .collect()
}

/// Summary rows as (sample, computed gender).
fn read_report_genders(path: &Path) -> Vec<(String, String)> {
    fs::read_to_string(path)
        .unwrap()
        .lines()
        .filter(|l| !l.starts_with('#') && !l.starts_with("cel_files"))
        .map(|l| {
            let mut fields = l.split('\t');
            (fields.next().unwrap().to_string(), fields.next().unwrap().to_string())
        })
        .collect()
}

fn list_dir(dir: &Path) -> Vec<String> {
    if !dir.exists() {
        return Vec::new();
    }
    let mut names: Vec<String> = fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

fn expected_genders() -> Vec<String> {
    (0..SAMPLES)
        .map(|s| if is_male(s) { "male" } else { "female" }.to_string())
        .collect()
}

#[test]
fn test_quantile_normalized_run_recovers_every_genotype() {
    let chip = Chip::build(30, 0, 0, 11);
    let out = chip.path("out");
    let outcome = chip
        .run(&out, &["--no-gender-force", "--cache-size", "512"])
        .unwrap();

    assert_eq!(outcome.analysis_name, "birdseed-v2");
    assert_eq!(outcome.sample_count, SAMPLES);
    assert_eq!(outcome.probeset_count, 30);
    assert_eq!(outcome.failed_probeset_count, 0);
    assert_eq!(outcome.gender_method, "none");
    assert_eq!(outcome.inbred_method, "none");
    assert!(outcome.prior_source.starts_with("learned:"));
    assert_eq!(outcome.stages.len(), 1);
    assert_eq!(outcome.stages[0].name, "quant-norm.sketch=50000");
    assert!(outcome.stages[0].changed);

    let rows = read_calls(&out.join("birdseed-v2.calls.txt"));
    let names: Vec<&String> = rows.iter().map(|(n, _)| n).collect();
    let expected: Vec<&String> = chip.snp_names.iter().collect();
    assert_eq!(names, expected);
    for (name, codes) in &rows {
        assert_eq!(codes, &chip.truth[name], "calls for {}", name);
    }

    let genders = read_report_genders(&out.join("birdseed-v2.report.txt"));
    assert_eq!(genders.len(), SAMPLES);
    assert!(genders.iter().all(|(_, g)| g == "unknown"));
    let sample_names: Vec<String> = genders.into_iter().map(|(s, _)| s).collect();
    assert_eq!(sample_names, chip.sample_names());

    // Only committed outputs remain; the disk store file is gone.
    assert_eq!(
        list_dir(&out),
        vec![
            "birdseed-v2.calls.txt",
            "birdseed-v2.confidences.txt",
            "birdseed-v2.report.txt",
            "birdseed-v2.run.json",
        ]
    );
    let json: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(out.join("birdseed-v2.run.json")).unwrap()).unwrap();
    assert_eq!(json["probeset_count"], 30);
    assert_eq!(json["gender_method"], "none");
}

#[test]
fn test_probe_ratio_genders_feed_haploid_calls_and_chp_files() {
    let chip = Chip::build(30, 18, 5, 23);
    let out = chip.path("out");
    let chrx_snps = chip.chrx_snps.display().to_string();
    let chrx_probes = chip.chrx_probes.display().to_string();
    let chry_probes = chip.chry_probes.display().to_string();
    let outcome = chip
        .run(
            &out,
            &[
                "-a",
                "birdseed-v2.K=2",
                "--analysis-name",
                "ratio",
                "--chrX-snps",
                &chrx_snps,
                "--chrX-probes",
                &chrx_probes,
                "--chrY-probes",
                &chry_probes,
                "--use-disk",
                "false",
                "--chp-output",
                "true",
            ],
        )
        .unwrap();

    assert_eq!(outcome.gender_method, "cn-probe-chrXY-ratio");
    assert_eq!(outcome.probeset_count, 48);
    assert!(outcome.stages.is_empty());

    let genders: Vec<String> = read_report_genders(&out.join("ratio.report.txt"))
        .into_iter()
        .map(|(_, g)| g)
        .collect();
    assert_eq!(genders, expected_genders());

    let report = fs::read_to_string(out.join("ratio.report.txt")).unwrap();
    assert!(report.contains("#%gender-method=cn-probe-chrXY-ratio"));
    assert!(report.contains("cn-probe-chrXY-ratio_ratio"));

    let rows = read_calls(&out.join("ratio.calls.txt"));
    assert_eq!(rows.len(), 48);
    for (name, codes) in &rows {
        assert_eq!(codes, &chip.truth[name], "calls for {}", name);
        if name.starts_with("SNP_X") {
            for (s, code) in codes.iter().enumerate() {
                if is_male(s) {
                    assert_ne!(*code, 1, "male heterozygote on {}", name);
                }
            }
        }
    }

    let chp_dir = out.join("chp");
    let chp_files = list_dir(&chp_dir);
    assert_eq!(chp_files.len(), SAMPLES);
    assert!(chp_files.iter().all(|f| f.ends_with(".ratio.gtchp")));
    for s in 0..SAMPLES {
        let chp = read_chp(&chp_dir.join(format!("array_{:02}.ratio.gtchp", s))).unwrap();
        assert_eq!(chp.header.algorithm, "birdseed-v2");
        assert_eq!(
            chp.gender,
            if is_male(s) { Gender::Male } else { Gender::Female }
        );
        assert_eq!(chp.entries.len(), 48);
        assert_eq!(chp.entries[0].name, "SNP_A-1");
        let expected = GenotypeCall::from_code(i64::from(chip.truth["SNP_A-1"][s]));
        assert_eq!(Some(chp.entries[0].call), expected);
    }
    assert!(list_dir(&out).iter().all(|f| !f.ends_with(".tmp")));
}

#[test]
fn test_method_family_picks_its_chrx_gender_provider() {
    let chip = Chip::build(30, 18, 0, 5);
    let chrx_snps = chip.chrx_snps.display().to_string();

    let out = chip.path("v1");
    let outcome = chip
        .run(&out, &["-a", "birdseed-v1.K=2", "--chrX-snps", &chrx_snps, "--use-disk", "false"])
        .unwrap();
    assert_eq!(outcome.gender_method, "em-cluster-chrX-het-contrast");
    let genders: Vec<String> = read_report_genders(&out.join("birdseed-v1.report.txt"))
        .into_iter()
        .map(|(_, g)| g)
        .collect();
    assert_eq!(genders, expected_genders());

    let out = chip.path("brlmm");
    let outcome = chip
        .run(&out, &["-a", "brlmm.K=2", "--chrX-snps", &chrx_snps, "--use-disk", "false"])
        .unwrap();
    assert_eq!(outcome.gender_method, "dm-chrX-het-rate");
    let genders: Vec<String> = read_report_genders(&out.join("brlmm.report.txt"))
        .into_iter()
        .map(|(_, g)| g)
        .collect();
    assert_eq!(genders, expected_genders());

    // A pinned method wins over the family default.
    let out = chip.path("pinned");
    let outcome = chip
        .run(
            &out,
            &[
                "-a",
                "brlmm.K=2",
                "--chrX-snps",
                &chrx_snps,
                "--set-gender-method",
                "em-cluster-chrX-het-contrast",
            ],
        )
        .unwrap();
    assert_eq!(outcome.gender_method, "em-cluster-chrX-het-contrast");
}

#[test]
fn test_missing_gender_evidence_is_fatal_and_leaves_no_outputs() {
    let chip = Chip::build(30, 0, 0, 3);
    let out = chip.path("out");
    let err = chip.run(&out, &[]).unwrap_err();
    assert!(matches!(err, GenoError::Evidence { .. }), "{}", err);
    assert!(list_dir(&out).is_empty(), "left behind: {:?}", list_dir(&out));

    let outcome = chip.run(&out, &["--set-gender-method", "none"]).unwrap();
    assert_eq!(outcome.gender_method, "none");
}

#[test]
fn test_supplied_covariates_and_probeset_subset() {
    let chip = Chip::build(30, 0, 0, 17);
    let names = chip.sample_names();

    let mut genders = fs::File::create(chip.path("genders.txt")).unwrap();
    writeln!(genders, "cel_files\tgender").unwrap();
    for (s, name) in names.iter().enumerate() {
        writeln!(genders, "{}\t{}", name, if is_male(s) { "male" } else { "female" }).unwrap();
    }
    let mut inbred = fs::File::create(chip.path("inbred.txt")).unwrap();
    for name in &names {
        writeln!(inbred, "{}\t0.0", name).unwrap();
    }
    // Requested out of order; results still follow the design file.
    fs::write(chip.path("subset.txt"), "SNP_A-20\nSNP_A-3\nSNP_A-11\nNOT_ON_CHIP\n").unwrap();

    // Three probesets are too few to learn a prior from; borrow one from a
    // full run.
    let prior = chip.path("prior.json").display().to_string();
    let full = chip.path("full");
    chip.run(
        &full,
        &["-a", "birdseed-v2.K=2", "--no-gender-force", "--use-disk", "false", "--write-prior", &prior],
    )
    .unwrap();

    let out = chip.path("out");
    let genders_path = chip.path("genders.txt").display().to_string();
    let inbred_path = chip.path("inbred.txt").display().to_string();
    let subset_path = chip.path("subset.txt").display().to_string();
    let outcome = chip
        .run(
            &out,
            &[
                "-a",
                "birdseed-v2.K=2",
                "--read-genders",
                &genders_path,
                "--read-inbred",
                &inbred_path,
                "--probeset-ids",
                &subset_path,
                "--read-priors",
                &prior,
                "--prior-size",
                "0",
            ],
        )
        .unwrap();

    assert_eq!(outcome.gender_method, "user-supplied");
    assert_eq!(outcome.inbred_method, "user-supplied");
    assert_eq!(outcome.probeset_count, 3);

    let rows = read_calls(&out.join("birdseed-v2.calls.txt"));
    let order: Vec<&str> = rows.iter().map(|(n, _)| n.as_str()).collect();
    assert_eq!(order, vec!["SNP_A-3", "SNP_A-11", "SNP_A-20"]);
    let full_rows: HashMap<String, Vec<i8>> = read_calls(&full.join("birdseed-v2.calls.txt")).into_iter().collect();
    for (name, codes) in &rows {
        assert_eq!(codes, &chip.truth[name]);
        assert_eq!(codes, &full_rows[name]);
    }
    let genders: Vec<String> = read_report_genders(&out.join("birdseed-v2.report.txt"))
        .into_iter()
        .map(|(_, g)| g)
        .collect();
    assert_eq!(genders, expected_genders());
}

#[test]
fn test_written_prior_reproduces_calls() {
    let chip = Chip::build(30, 0, 0, 29);
    let prior = chip.path("prior.json");
    let prior_arg = prior.display().to_string();

    let first = chip.path("first");
    chip.run(
        &first,
        &["--no-gender-force", "--use-disk", "false", "--write-prior", &prior_arg],
    )
    .unwrap();
    assert!(prior.is_file());

    let second = chip.path("second");
    let outcome = chip
        .run(
            &second,
            &[
                "--no-gender-force",
                "--use-disk",
                "false",
                "--read-priors",
                &prior_arg,
                "--prior-size",
                "0",
            ],
        )
        .unwrap();
    assert_eq!(outcome.prior_source, prior_arg);

    let a = fs::read_to_string(first.join("birdseed-v2.calls.txt")).unwrap();
    let b = fs::read_to_string(second.join("birdseed-v2.calls.txt")).unwrap();
    assert_eq!(a, b);
}

#[test]
fn test_corrupt_input_aborts_without_outputs() {
    let chip = Chip::build(30, 0, 0, 41);
    let victim = &chip.inputs[5];
    let bytes = fs::read(victim).unwrap();
    fs::write(victim, &bytes[..bytes.len() - 6]).unwrap();

    let out = chip.path("out");
    let err = chip.run(&out, &["--no-gender-force"]).unwrap_err();
    assert!(matches!(err, GenoError::DataIntegrity { .. }), "{}", err);
    assert!(list_dir(&out).is_empty(), "left behind: {:?}", list_dir(&out));
}

#[test]
fn test_probe_count_mismatch_aborts() {
    let chip = Chip::build(30, 0, 0, 43);
    write_intensity_file(&chip.inputs[7], &[500.0; 10]).unwrap();

    let out = chip.path("out");
    let err = chip.run(&out, &["--no-gender-force", "--use-disk", "false"]).unwrap_err();
    assert!(matches!(err, GenoError::DataIntegrity { .. }), "{}", err);
}

#[test]
fn test_invalid_configuration_is_rejected_before_any_io() {
    let chip = Chip::build(3, 0, 0, 1);
    let out = chip.path("out");
    let err = chip
        .run(&out, &["--set-gender-method", "cn-probe-chrXY-ratio"])
        .unwrap_err();
    assert!(matches!(err, GenoError::Config { .. }), "{}", err);
    assert!(!out.exists());
}

//! The genotype-calling run: a linear state machine from configuration to
//! committed outputs.
//!
//! Every resource a run opens (intensity stores, temporary store files,
//! partially written outputs) is a local of [`GenotypeCallOrchestrator::run`]
//! and is released when it goes out of scope, so a failure in any state
//! leaves no half-written file under a final name.

use crate::config::RunConfig;
use crate::covariate::em_cluster::EmGenderParams;
use crate::covariate::file::{read_gender_file, read_inbred_file};
use crate::covariate::genotype::read_supplied_genotypes;
use crate::covariate::selector::{gender_priority, SelectionPolicy};
use crate::covariate::{
    provenance, CovariateSelector, CovariateSource, EmClusterCovariate, FixedCovariate, Gender,
    QuickCallListener, RatioThresholdCovariate, SampleMetric, SnpProbes,
};
use crate::error::{GenoError, Result};
use crate::intensity::{IntensityFile, IntensityListener, IntensityStore, StoreFactory};
use crate::layout::{read_name_list, read_probe_list, DesiredProbeOrder, ProbesetLayout};
use crate::prior::{learn_prior, ClusterPrior};
use crate::quant::{build_method, MethodFamily, ProbesetData, QuantMethod};
use crate::report::chp::ChpHeader;
use crate::report::summary::{SummaryInfo, SummaryRow};
use crate::report::{
    AtomicOutput, ChpSink, ProbesetResult, ReporterFanout, SummarySink, TableSink,
};
use crate::samples::SampleSet;
use crate::transform::{RunBoard, StagedTransformPipeline};
use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, info, warn};
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

/// Output bytes per probeset per sample across every sink.
const OUTPUT_BYTES_PER_CALL: f64 = 35.49;
/// Disk store bytes per probe per sample.
const STORE_BYTES_PER_VALUE: u64 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Configuring,
    LayoutLoaded,
    CovariatesResolved,
    PriorsLearned,
    Transformed,
    Dispatching,
    Finalizing,
    Done,
    Failed,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunState::Configuring => "configuring",
            RunState::LayoutLoaded => "layout-loaded",
            RunState::CovariatesResolved => "covariates-resolved",
            RunState::PriorsLearned => "priors-learned",
            RunState::Transformed => "transformed",
            RunState::Dispatching => "dispatching",
            RunState::Finalizing => "finalizing",
            RunState::Done => "done",
            RunState::Failed => "failed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageSummary {
    pub name: String,
    pub changed: bool,
}

/// Final tally of a completed run; also written as `<name>.run.json`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunOutcome {
    pub analysis_name: String,
    pub method: String,
    pub method_version: String,
    pub gender_method: String,
    pub inbred_method: String,
    pub sample_count: usize,
    pub probeset_count: usize,
    pub failed_probeset_count: usize,
    pub prior_source: String,
    pub stages: Vec<StageSummary>,
    pub outputs: Vec<PathBuf>,
}

/// Asserts that dispatch visited every listed probeset exactly once.
pub fn check_dispatch_count(visited: usize, expected: usize) -> Result<()> {
    if visited != expected {
        return Err(GenoError::data_integrity(format!(
            "Dispatched {} probesets but the layout lists {}.",
            visited, expected
        )));
    }
    Ok(())
}

/// Bytes a run needs in the output directory.
pub fn estimate_required_bytes(probesets: usize, samples: usize, probes: usize, disk_store: bool) -> u64 {
    let outputs = (probesets as f64 * samples as f64 * OUTPUT_BYTES_PER_CALL).ceil() as u64;
    let store = if disk_store {
        probes as u64 * samples as u64 * STORE_BYTES_PER_VALUE
    } else {
        0
    };
    outputs + store
}

/// Free bytes available to unprivileged users on the file system holding `path`.
#[cfg(unix)]
pub fn free_space(path: &Path) -> Option<u64> {
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;

    let c_path = CString::new(path.as_os_str().as_bytes()).ok()?;
    // SAFETY: statvfs only writes into the zeroed struct we own, and the path
    // is a valid NUL-terminated string for the duration of the call.
    let mut stat: libc::statvfs = unsafe { std::mem::zeroed() };
    let rc = unsafe { libc::statvfs(c_path.as_ptr(), &mut stat) };
    if rc != 0 {
        return None;
    }
    Some(stat.f_bavail as u64 * stat.f_frsize as u64)
}

#[cfg(not(unix))]
pub fn free_space(_path: &Path) -> Option<u64> {
    None
}

pub fn check_disk_space(dir: &Path, required: u64) -> Result<()> {
    match free_space(dir) {
        None => {
            info!("Free space of {} is unknown; skipping the disk check.", dir.display());
            Ok(())
        }
        Some(free) if free < required => Err(GenoError::resource(format!(
            "{} has {} bytes free but the run needs about {} bytes.",
            dir.display(),
            free,
            required
        ))),
        Some(free) => {
            debug!("Disk check: {} bytes needed, {} free.", required, free);
            Ok(())
        }
    }
}

fn progress_bar(len: usize, what: &str, show: bool) -> Result<ProgressBar> {
    if !show {
        return Ok(ProgressBar::hidden());
    }
    let style = ProgressStyle::default_bar()
        .template(&format!(
            "{{spinner:.green}} [{{elapsed_precise}}] [{{bar:40.cyan/blue}}] {{pos}}/{{len}} {} ({{percent}}%) ETA: {{eta}}",
            what
        ))
        .map_err(|e| GenoError::config(format!("Failed to create progress bar style: {}", e)))?
        .progress_chars("=> ");
    Ok(ProgressBar::new(len as u64).with_style(style))
}

/// Layout plus everything derived from it before any intensity is read.
struct LoadedLayout {
    layout: ProbesetLayout,
    probe_count: usize,
    /// Layout indices of the probesets to genotype, in layout order.
    dispatch: Vec<usize>,
    haploid: HashSet<String>,
}

/// Gender and inbred values chosen for the run.
struct ResolvedCovariates {
    genders: Vec<Gender>,
    gender_method: String,
    inbred: Vec<f64>,
    inbred_method: String,
    metrics: Vec<Vec<SampleMetric>>,
}

pub struct GenotypeCallOrchestrator<'c> {
    config: &'c RunConfig,
    state: RunState,
}

impl<'c> GenotypeCallOrchestrator<'c> {
    pub fn new(config: &'c RunConfig) -> Self {
        Self {
            config,
            state: RunState::Configuring,
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    fn advance(&mut self, next: RunState) {
        info!("Run state: {} -> {}", self.state, next);
        self.state = next;
    }

    /// Runs to completion. On error the state is `Failed` and every
    /// temporary resource has been released.
    pub fn run(&mut self) -> Result<RunOutcome> {
        if self.state != RunState::Configuring {
            return Err(GenoError::data_integrity(format!(
                "A run cannot be restarted once it is {}.",
                self.state
            )));
        }
        let started = Instant::now();
        match self.execute() {
            Ok(outcome) => {
                self.advance(RunState::Done);
                info!("Run '{}' finished in {:.2?}.", outcome.analysis_name, started.elapsed());
                Ok(outcome)
            }
            Err(e) => {
                warn!("Run aborted while {}.", self.state);
                self.state = RunState::Failed;
                Err(e)
            }
        }
    }

    fn execute(&mut self) -> Result<RunOutcome> {
        let config = self.config;
        let samples = &config.samples;

        // --- 1. Layout ---
        info!("--- 1. Loading probeset layout ---");
        let loaded = self.load_layout()?;
        fs::create_dir_all(&config.out_dir).map_err(|e| {
            GenoError::resource(format!(
                "Cannot create output directory {}: {}",
                config.out_dir.display(),
                e
            ))
        })?;
        if config.disk_check {
            let disk_store = matches!(config.backing, crate::intensity::StoreBacking::Disk { .. });
            let required =
                estimate_required_bytes(loaded.dispatch.len(), samples.len(), loaded.probe_count, disk_store);
            check_disk_space(&config.out_dir, required)?;
        }
        self.advance(RunState::LayoutLoaded);

        // --- 2. Streaming pass and covariates ---
        info!("--- 2. Streaming {} intensity files ---", samples.len());
        let order = Arc::new(DesiredProbeOrder::from_layout(&loaded.layout, loaded.probe_count)?);
        let factory = StoreFactory::new(config.backing.clone(), order, samples.len());
        let (store, covariates) = self.stream_and_resolve(&loaded, &factory)?;
        self.advance(RunState::CovariatesResolved);

        // --- 3. Method setup and priors ---
        info!("--- 3. Preparing method '{}' ---", config.method.method.name);
        let mut method = build_method(&config.method)?;
        let prior_source = self.install_prior(method.as_mut(), store.as_ref(), &loaded)?;
        if let Some(consumer) = method.covariate_consumer() {
            consumer.set_genders(&covariates.genders);
            consumer.set_inbred_penalties(&covariates.inbred);
        }
        if let Some(consumer) = method.special_snp_consumer() {
            consumer.set_haploid_snps(&loaded.haploid);
        }
        self.advance(RunState::PriorsLearned);

        // --- 4. Transforms ---
        info!("--- 4. Applying {} transform stage(s) ---", config.method.stages.len());
        let mut pipeline = StagedTransformPipeline::from_specs(&config.method.stages, &config.transform)?;
        let board = RunBoard {
            layout: &loaded.layout,
            samples,
            factory: &factory,
        };
        let store = pipeline.run(&board, store)?;
        self.advance(RunState::Transformed);

        // --- 5. Dispatch ---
        info!("--- 5. Genotyping {} probesets ---", loaded.dispatch.len());
        let names: Arc<[String]> = loaded
            .dispatch
            .iter()
            .filter_map(|&i| loaded.layout.get(i).map(|p| p.name.clone()))
            .collect::<Vec<_>>()
            .into();
        let mut fanout =
            self.build_fanout(method.as_ref(), &covariates, &names, loaded.layout.max_name_length())?;
        fanout.prepare(names.len())?;
        self.advance(RunState::Dispatching);
        let visited = self.dispatch(method.as_ref(), store.as_ref(), &loaded, &mut fanout)?;
        check_dispatch_count(visited, names.len())?;

        // --- 6. Finalize ---
        self.advance(RunState::Finalizing);
        let tally = fanout.finish()?;
        if tally.failed > 0 {
            warn!("{} of {} probesets failed to compute and were reported as no calls.", tally.failed, tally.written);
        }
        let mut outcome = RunOutcome {
            analysis_name: config.analysis_name.clone(),
            method: config.method.to_string(),
            method_version: method.version().to_string(),
            gender_method: covariates.gender_method,
            inbred_method: covariates.inbred_method,
            sample_count: samples.len(),
            probeset_count: tally.written,
            failed_probeset_count: tally.failed,
            prior_source,
            stages: pipeline
                .history()
                .iter()
                .map(|r| StageSummary {
                    name: r.name.clone(),
                    changed: r.changed,
                })
                .collect(),
            outputs: tally.outputs,
        };
        let run_json = config.out_dir.join(format!("{}.run.json", config.analysis_name));
        let mut out = AtomicOutput::create(&run_json)?;
        serde_json::to_writer_pretty(&mut out, &outcome)?;
        outcome.outputs.push(out.commit()?);
        Ok(outcome)
    }

    fn load_layout(&self) -> Result<LoadedLayout> {
        let config = self.config;
        let layout = ProbesetLayout::load(&config.design_file)?;
        if layout.is_empty() {
            return Err(GenoError::config(format!(
                "Design file {} lists no probesets.",
                config.design_file.display()
            )));
        }
        let probe_count = match layout.declared_probe_count() {
            Some(n) => n,
            None => {
                let first = config
                    .samples
                    .get(0)
                    .ok_or_else(|| GenoError::config("No input intensity files were given."))?;
                IntensityFile::open(&first.path).read_header()?.probe_count
            }
        };
        if probe_count < layout.min_probe_count() {
            return Err(GenoError::data_integrity(format!(
                "The layout references probe {} but the chip has {} probes.",
                layout.min_probe_count(),
                probe_count
            )));
        }
        info!("Layout: {} probesets over {} probes.", layout.len(), probe_count);

        let wanted: Option<HashSet<String>> = match &config.probeset_ids {
            Some(path) => {
                let names: HashSet<String> = read_name_list(path)?.into_iter().collect();
                let unknown = names.iter().filter(|n| layout.index_of(n).is_none()).count();
                if unknown > 0 {
                    warn!("{} of {} requested probesets are not in the layout.", unknown, names.len());
                }
                Some(names)
            }
            None => None,
        };
        let dispatch: Vec<usize> = layout
            .iter()
            .enumerate()
            .filter(|(_, p)| p.is_genotyping())
            .filter(|(_, p)| wanted.as_ref().map_or(true, |w| w.contains(&p.name)))
            .map(|(i, _)| i)
            .collect();
        if dispatch.is_empty() {
            return Err(GenoError::config("No genotyping probesets are selected for this run."));
        }

        let haploid: HashSet<String> = match &config.gender.chrx_snps {
            Some(path) => {
                let names: HashSet<String> = read_name_list(path)?.into_iter().collect();
                let missing = names.iter().filter(|n| layout.index_of(n).is_none()).count();
                if missing > 0 {
                    warn!("{} chrX SNPs are not in the layout and are ignored.", missing);
                }
                names.into_iter().filter(|n| layout.index_of(n).is_some()).collect()
            }
            None => HashSet::new(),
        };
        debug!(
            "Dispatching {} of {} probesets; {} haploid chrX SNPs.",
            dispatch.len(),
            layout.len(),
            haploid.len()
        );
        Ok(LoadedLayout {
            layout,
            probe_count,
            dispatch,
            haploid,
        })
    }

    fn chrx_snp_probes(&self, loaded: &LoadedLayout) -> Vec<SnpProbes> {
        loaded
            .layout
            .iter()
            .filter(|p| p.is_genotyping() && loaded.haploid.contains(&p.name))
            .map(SnpProbes::from_probeset)
            .collect()
    }

    /// Reads every input once, feeding the intensity-based gender providers
    /// and the store builder, then selects the covariates.
    fn stream_and_resolve(
        &self,
        loaded: &LoadedLayout,
        factory: &StoreFactory,
    ) -> Result<(Box<dyn IntensityStore>, ResolvedCovariates)> {
        let config = self.config;
        let gender = &config.gender;
        let samples = &config.samples;
        let family = config.method.family;
        let k = config.contrast_k();
        let pinned = gender.set_method.as_deref();
        let snps = self.chrx_snp_probes(loaded);

        let mut ratio = match (&gender.chrx_probes, &gender.chry_probes) {
            (Some(x), Some(y)) => Some(RatioThresholdCovariate::new(
                read_probe_list(x)?,
                read_probe_list(y)?,
                gender.thresholds,
                gender.zw,
                loaded.probe_count,
            )),
            _ => None,
        };
        let mut em = if gender.em_gender && gender.chrx_snps.is_some() {
            let params = EmGenderParams {
                k,
                ..EmGenderParams::default()
            };
            Some(EmClusterCovariate::new(snps.clone(), params))
        } else {
            None
        };
        let quick_wanted = family == MethodFamily::Brlmm || pinned == Some(provenance::DM_HET_RATE);
        let mut quick = if quick_wanted && gender.chrx_snps.is_some() {
            Some(QuickCallListener::new(snps, k))
        } else {
            None
        };

        // Pinned intensity providers must be able to run before the pass starts.
        match (pinned, &ratio, &em) {
            (Some(provenance::CN_PROBE_XY_RATIO | provenance::CN_PROBE_ZW_RATIO), Some(r), _) => r.ensure_usable()?,
            (Some(provenance::EM_CLUSTER), _, Some(e)) => e.ensure_usable()?,
            _ => {}
        }

        let store = {
            let mut listeners: Vec<&mut dyn IntensityListener> = Vec::new();
            if let Some(r) = ratio.as_mut() {
                listeners.push(r);
            }
            if let Some(e) = em.as_mut() {
                listeners.push(e);
            }
            if let Some(q) = quick.as_mut() {
                listeners.push(q);
            }
            debug!("{} gender listener(s) attached to the streaming pass.", listeners.len());
            stream_inputs(samples, loaded.probe_count, factory, &mut listeners, config.show_progress)?
        };

        // --- Gender selection ---
        let mut genders = CovariateSelector::for_genders(samples.len());
        if let Some(path) = &gender.read_genders {
            genders.register(Box::new(read_gender_file(path, samples)?))?;
        }
        if let Some(r) = ratio {
            genders.register(Box::new(r))?;
        }
        if let Some(e) = em {
            genders.register(Box::new(e))?;
        }
        if let Some(q) = quick {
            let covariate = q.into_covariate();
            if pinned == Some(provenance::DM_HET_RATE) {
                covariate.ensure_usable()?;
            }
            genders.register(Box::new(covariate))?;
        }
        if let (Some(path), Some(_)) = (&gender.genotypes, &gender.chrx_snps) {
            let covariate = read_supplied_genotypes(path, samples, &loaded.haploid)?;
            if pinned == Some(provenance::SUPPLIED_GENOTYPES) {
                covariate.ensure_usable()?;
            }
            genders.register(Box::new(covariate))?;
        }
        genders.register(Box::new(FixedCovariate::none(samples.len(), Gender::Unknown)))?;

        let priority: Vec<&str> = gender_priority(family)
            .iter()
            .map(|name| {
                if gender.zw && *name == provenance::CN_PROBE_XY_RATIO {
                    provenance::CN_PROBE_ZW_RATIO
                } else {
                    *name
                }
            })
            .collect();
        let policy = SelectionPolicy {
            override_name: gender.set_method.clone(),
            tolerate_none: gender.tolerate_none,
        };
        let chosen = genders.select(&priority, &policy)?;
        let gender_values = chosen.values().to_vec();
        let gender_method = chosen.name().to_string();
        let counts = [Gender::Male, Gender::Female, Gender::Unknown]
            .map(|g| gender_values.iter().filter(|v| **v == g).count());
        info!(
            "Genders from '{}': {} male, {} female, {} unknown.",
            gender_method, counts[0], counts[1], counts[2]
        );
        let metrics: Vec<Vec<SampleMetric>> = (0..samples.len())
            .map(|s| genders.registered().flat_map(|src| src.sample_metrics(s)).collect())
            .collect();

        // --- Inbred selection ---
        let mut inbred = CovariateSelector::for_inbred(samples.len());
        if let Some(path) = &config.read_inbred {
            inbred.register(Box::new(read_inbred_file(path, samples)?))?;
        }
        inbred.register(Box::new(FixedCovariate::none(samples.len(), 0.0)))?;
        let chosen = inbred.select(
            &[],
            &SelectionPolicy {
                override_name: None,
                tolerate_none: true,
            },
        )?;

        Ok((
            store,
            ResolvedCovariates {
                genders: gender_values,
                gender_method,
                inbred: chosen.values().to_vec(),
                inbred_method: chosen.name().to_string(),
                metrics,
            },
        ))
    }

    /// Loads or learns the prior when the method accepts one. Returns where
    /// the prior came from.
    fn install_prior(
        &self,
        method: &mut dyn QuantMethod,
        store: &dyn IntensityStore,
        loaded: &LoadedLayout,
    ) -> Result<String> {
        let config = self.config;
        let Some(consumer) = method.prior_consumer() else {
            debug!("Method takes no prior.");
            return Ok(provenance::NONE.to_string());
        };
        let (prior, source) = match &config.prior.read {
            Some(path) => {
                info!("Loading prior from {}", path.display());
                (ClusterPrior::load(path)?, path.display().to_string())
            }
            None => {
                let options = config.prior.options(config.contrast_k());
                let prior = learn_prior(store, &loaded.layout, &loaded.dispatch, &options)?;
                (prior, format!("learned:{}:{}", options.size, options.seed))
            }
        };
        if let Some(path) = &config.prior.write {
            prior.save(path)?;
        }
        consumer.set_prior(&prior)?;
        Ok(source)
    }

    fn build_fanout(
        &self,
        method: &dyn QuantMethod,
        covariates: &ResolvedCovariates,
        names: &Arc<[String]>,
        name_width: usize,
    ) -> Result<ReporterFanout> {
        let config = self.config;
        let sample_names = config.samples.names();
        let mut fanout = ReporterFanout::new();
        if config.outputs.table {
            fanout.add_sink(Box::new(TableSink::create(
                &config.out_dir,
                &config.analysis_name,
                &sample_names,
                Arc::clone(names),
            )?));
        }
        if config.outputs.chp {
            let header = ChpHeader {
                algorithm: method.method_type().to_string(),
                version: method.version().to_string(),
            };
            fanout.add_sink(Box::new(ChpSink::create(
                &config.out_dir.join("chp"),
                &config.analysis_name,
                &config.samples.stems(),
                &covariates.genders,
                &header,
                Arc::clone(names),
                name_width,
            )?));
        }
        if config.outputs.summary {
            let rows = sample_names
                .iter()
                .zip(&covariates.genders)
                .zip(&covariates.metrics)
                .map(|((sample, gender), metrics)| SummaryRow {
                    sample: sample.clone(),
                    gender: *gender,
                    metrics: metrics.clone(),
                })
                .collect();
            let info = SummaryInfo {
                method: config.method.to_string(),
                version: method.version().to_string(),
                gender_method: covariates.gender_method.clone(),
            };
            fanout.add_sink(Box::new(SummarySink::create(
                &config.out_dir,
                &config.analysis_name,
                info,
                rows,
                Arc::clone(names),
            )?));
        }
        if fanout.sink_count() == 0 {
            warn!("Every output sink is disabled; only the run summary will be written.");
        }
        Ok(fanout)
    }

    fn dispatch(
        &self,
        method: &dyn QuantMethod,
        store: &dyn IntensityStore,
        loaded: &LoadedLayout,
        fanout: &mut ReporterFanout,
    ) -> Result<usize> {
        let pb = progress_bar(loaded.dispatch.len(), "probesets", self.config.show_progress)?;
        let visited = dispatch_probesets(method, store, &loaded.layout, &loaded.dispatch, &loaded.haploid, fanout, &pb)?;
        pb.finish_with_message("Genotyping complete.");
        Ok(visited)
    }
}

/// Computes every listed probeset in order and forwards the results. A
/// compute error becomes the method's failure result; any other error ends
/// the loop. Returns how many probesets were visited.
pub fn dispatch_probesets(
    method: &dyn QuantMethod,
    store: &dyn IntensityStore,
    layout: &ProbesetLayout,
    dispatch: &[usize],
    haploid: &HashSet<String>,
    fanout: &mut ReporterFanout,
    pb: &ProgressBar,
) -> Result<usize> {
    let sample_count = store.sample_count();
    let mut visited = 0usize;
    for (index, &layout_index) in dispatch.iter().enumerate() {
        let probeset = layout.get(layout_index).ok_or_else(|| {
            GenoError::data_integrity(format!("Dispatch index {} is outside the layout.", layout_index))
        })?;
        let data = ProbesetData::gather(index, probeset, store)?;
        let (calls, failed) = match method.compute(&data) {
            Ok(calls) if calls.len() == sample_count => (calls, false),
            Ok(calls) => {
                return Err(GenoError::data_integrity(format!(
                    "Method returned {} results for {} samples on '{}'.",
                    calls.len(),
                    sample_count,
                    probeset.name
                )))
            }
            Err(e) => {
                debug!("{}", e);
                (method.failure_result(&data), true)
            }
        };
        fanout.write(&ProbesetResult {
            index,
            name: &probeset.name,
            calls: &calls,
            failed,
            haploid: haploid.contains(&probeset.name),
        })?;
        visited += 1;
        pb.inc(1);
    }
    Ok(visited)
}

/// The single pass over every input file.
fn stream_inputs(
    samples: &SampleSet,
    probe_count: usize,
    factory: &StoreFactory,
    listeners: &mut [&mut dyn IntensityListener],
    show_progress: bool,
) -> Result<Box<dyn IntensityStore>> {
    let mut builder = factory.builder()?;
    let pb = progress_bar(samples.len(), "arrays", show_progress)?;
    for sample in samples.iter() {
        let mut file = IntensityFile::open(&sample.path);
        let values = file.read()?;
        if values.len() != probe_count {
            return Err(GenoError::data_integrity(format!(
                "{} has {} probes; expected {}.",
                file.file_name().display(),
                values.len(),
                probe_count
            )));
        }
        for listener in listeners.iter_mut() {
            listener.new_sample(sample, &values)?;
        }
        builder.push_sample(sample.index, &values)?;
        pb.inc(1);
    }
    pb.finish_with_message("Streaming pass complete.");
    builder.commit()
}

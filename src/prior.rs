//! Run-level cluster prior: learned from a reproducible random subset of
//! probesets, or loaded from a JSON file that supersedes learning.

use crate::em::{self, EmParams, EmPrior, EmSeed};
use crate::error::{GenoError, Result};
use crate::intensity::IntensityStore;
use crate::layout::ProbesetLayout;
use crate::quant::ProbesetData;
use crate::report::AtomicOutput;
use crate::stats::{contrast, RunningStats};
use log::{debug, info, warn};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, Write};
use std::path::Path;

pub const DEFAULT_PRIOR_SIZE: usize = 10_000;
pub const DEFAULT_PRIOR_SEED: u64 = 0x5EED_6E0C;
pub const MIN_FITTABLE_SNPS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PriorGenotype {
    AA,
    AB,
    BB,
}

impl PriorGenotype {
    /// Index on the contrast axis: BB, AB, AA.
    fn cluster(self) -> usize {
        match self {
            PriorGenotype::BB => 0,
            PriorGenotype::AB => 1,
            PriorGenotype::AA => 2,
        }
    }

    const BY_CLUSTER: [PriorGenotype; 3] = [PriorGenotype::BB, PriorGenotype::AB, PriorGenotype::AA];
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterStats {
    pub genotype: PriorGenotype,
    /// Mean contrast of the cluster.
    pub center: f64,
    /// Within-cluster contrast variance.
    pub var: f64,
    /// Variance of the center across probesets.
    pub center_var: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterPrior {
    /// Probesets that contributed to the fit; 0 for a built-in prior.
    pub snp_count: usize,
    pub clusters: Vec<ClusterStats>,
}

impl ClusterPrior {
    pub fn from_em_prior(prior: &EmPrior, snp_count: usize) -> Self {
        let clusters = PriorGenotype::BY_CLUSTER
            .iter()
            .map(|g| {
                let j = g.cluster();
                ClusterStats {
                    genotype: *g,
                    center: prior.mu[j],
                    var: prior.sigma[j] * prior.sigma[j],
                    center_var: prior.mu_sd[j] * prior.mu_sd[j],
                }
            })
            .collect();
        Self { snp_count, clusters }
    }

    pub fn cluster(&self, genotype: PriorGenotype) -> Option<&ClusterStats> {
        self.clusters.iter().find(|c| c.genotype == genotype)
    }

    /// Centers and standard deviations ordered BB, AB, AA.
    pub fn centers_and_sds(&self) -> Result<([f64; 3], [f64; 3])> {
        let mut centers = [0.0; 3];
        let mut sds = [0.0; 3];
        for g in PriorGenotype::BY_CLUSTER {
            let stats = self
                .cluster(g)
                .ok_or_else(|| GenoError::model(format!("Prior has no {:?} cluster.", g)))?;
            if !stats.center.is_finite() || !stats.var.is_finite() || stats.var <= 0.0 {
                return Err(GenoError::model(format!(
                    "Prior {:?} cluster is unusable: center {}, var {}.",
                    g, stats.center, stats.var
                )));
            }
            centers[g.cluster()] = stats.center;
            sds[g.cluster()] = stats.var.sqrt();
        }
        if !(centers[0] < centers[1] && centers[1] < centers[2]) {
            return Err(GenoError::model(format!(
                "Prior centers are not ordered BB < AB < AA: {:?}",
                centers
            )));
        }
        Ok((centers, sds))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| GenoError::io(path, e))?;
        let prior: ClusterPrior = serde_json::from_reader(BufReader::new(file))?;
        prior.centers_and_sds()?;
        info!(
            "Loaded prior from {} ({} contributing probesets).",
            path.display(),
            prior.snp_count
        );
        Ok(prior)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let mut out = AtomicOutput::create(path)?;
        serde_json::to_writer_pretty(&mut out, self)?;
        writeln!(out).map_err(|e| GenoError::io(path, e))?;
        out.commit()?;
        info!("Wrote prior to {}", path.display());
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PriorOptions {
    pub size: usize,
    pub seed: u64,
    pub min_fittable: usize,
    /// Contrast shape constant.
    pub k: f64,
}

impl Default for PriorOptions {
    fn default() -> Self {
        Self {
            size: DEFAULT_PRIOR_SIZE,
            seed: DEFAULT_PRIOR_SEED,
            min_fittable: MIN_FITTABLE_SNPS,
            k: 2.0,
        }
    }
}

/// Draws `size` entries of `pool` without replacement and returns them in
/// pool order. The same seed always yields the same subset.
pub fn sample_probesets(pool: &[usize], size: usize, seed: u64) -> Vec<usize> {
    if size >= pool.len() {
        if size > pool.len() {
            warn!(
                "Prior size {} exceeds the {} eligible probesets; using all of them.",
                size,
                pool.len()
            );
        }
        return pool.to_vec();
    }
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut picked = rand::seq::index::sample(&mut rng, pool.len(), size).into_vec();
    picked.sort_unstable();
    picked.into_iter().map(|i| pool[i]).collect()
}

/// Fits the EM mixture on each sampled probeset and pools the per-cluster
/// centers and spreads. Probesets where fewer than two clusters survive do
/// not count toward `min_fittable`.
pub fn learn_prior(
    store: &dyn IntensityStore,
    layout: &ProbesetLayout,
    pool: &[usize],
    options: &PriorOptions,
) -> Result<ClusterPrior> {
    let chosen = sample_probesets(pool, options.size, options.seed);
    info!(
        "Learning prior from {} of {} eligible probesets (seed {}).",
        chosen.len(),
        pool.len(),
        options.seed
    );

    let seed = EmSeed::default();
    let params = EmParams::default();
    let mut centers = vec![RunningStats::new(); 3];
    let mut vars = vec![RunningStats::new(); 3];
    let mut fittable = 0usize;

    for &idx in &chosen {
        let Some(probeset) = layout.get(idx) else {
            return Err(GenoError::data_integrity(format!(
                "Prior pool index {} is outside the layout.",
                idx
            )));
        };
        let data = ProbesetData::gather(idx, probeset, store)?;
        let contrasts: Vec<f64> = data
            .signal_a
            .iter()
            .zip(&data.signal_b)
            .filter_map(|(a, b)| contrast(*a, *b, options.k))
            .collect();
        if contrasts.len() < 3 {
            continue;
        }
        let fit = em::fit(&contrasts, &seed, &params);
        if fit.valid_clusters() < 2 {
            debug!("Prior: {} kept {} cluster(s); skipped.", probeset.name, fit.valid_clusters());
            continue;
        }
        fittable += 1;
        for j in 0..3 {
            if fit.valid[j] {
                centers[j].push(fit.mu[j]);
                vars[j].push(fit.sigma[j] * fit.sigma[j]);
            }
        }
    }

    if fittable < options.min_fittable {
        return Err(GenoError::model(format!(
            "Only {} of {} sampled probesets produced a usable fit; at least {} are needed.",
            fittable,
            chosen.len(),
            options.min_fittable
        )));
    }

    let fallback = EmPrior::default();
    let clusters = PriorGenotype::BY_CLUSTER
        .iter()
        .map(|g| {
            let j = g.cluster();
            if centers[j].count() == 0 {
                warn!("No sampled probeset produced a {:?} cluster; using the built-in values.", g);
                return ClusterStats {
                    genotype: *g,
                    center: fallback.mu[j],
                    var: fallback.sigma[j] * fallback.sigma[j],
                    center_var: fallback.mu_sd[j] * fallback.mu_sd[j],
                };
            }
            let center_var = if centers[j].count() >= 2 {
                centers[j].stdev().powi(2)
            } else {
                fallback.mu_sd[j] * fallback.mu_sd[j]
            };
            ClusterStats {
                genotype: *g,
                center: centers[j].mean(),
                var: vars[j].mean(),
                center_var,
            }
        })
        .collect();

    let prior = ClusterPrior {
        snp_count: fittable,
        clusters,
    };
    for c in &prior.clusters {
        info!(
            "Prior {:?}: center {:.4}, var {:.5}, center var {:.5}",
            c.genotype, c.center, c.var, c.center_var
        );
    }
    Ok(prior)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intensity::MemoryIntensityStore;
    use crate::layout::{ProbeId, Probeset, ProbesetKind};
    use ndarray::Array2;

    #[test]
    fn test_sampling_is_reproducible_and_ordered() {
        let pool: Vec<usize> = (0..1000).map(|i| i * 2).collect();
        let a = sample_probesets(&pool, 50, 7);
        let b = sample_probesets(&pool, 50, 7);
        let c = sample_probesets(&pool, 50, 8);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 50);
        assert!(a.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(sample_probesets(&pool[..5], 50, 7), pool[..5].to_vec());
    }

    #[test]
    fn test_round_trip_through_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prior.json");
        let prior = ClusterPrior::from_em_prior(&EmPrior::default(), 12);
        prior.save(&path).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("\"genotype\": \"AA\""));
        assert_eq!(ClusterPrior::load(&path).unwrap(), prior);
    }

    #[test]
    fn test_unordered_prior_is_rejected() {
        let mut prior = ClusterPrior::from_em_prior(&EmPrior::default(), 0);
        prior.clusters[0].center = 0.9;
        assert!(matches!(prior.centers_and_sds(), Err(GenoError::Model { .. })));
    }

    /// 30 SNPs over 9 samples: three samples per genotype. SNP i uses probes
    /// 2i (A) and 2i+1 (B).
    fn three_genotype_store(snps: usize) -> (MemoryIntensityStore, ProbesetLayout) {
        let samples = 9;
        let mut data = Array2::<f32>::zeros((samples, snps * 2));
        for snp in 0..snps {
            for s in 0..samples {
                let jitter = (((snp * 7 + s * 3) % 5) as f32) * 10.0;
                let (a, b) = match s % 3 {
                    0 => (1000.0 + jitter, 60.0),
                    1 => (520.0 + jitter, 500.0),
                    _ => (60.0, 1000.0 + jitter),
                };
                data[[s, 2 * snp]] = a;
                data[[s, 2 * snp + 1]] = b;
            }
        }
        let layout = ProbesetLayout::from_probesets(
            (0..snps)
                .map(|i| Probeset {
                    name: format!("SNP{}", i),
                    kind: ProbesetKind::Genotyping,
                    allele_a: vec![ProbeId(2 * i as u32)],
                    allele_b: vec![ProbeId(2 * i as u32 + 1)],
                })
                .collect(),
            Some(snps * 2),
        )
        .unwrap();
        (MemoryIntensityStore::from_matrix(data), layout)
    }

    #[test]
    fn test_learned_prior_orders_clusters() {
        let (store, layout) = three_genotype_store(30);
        let pool: Vec<usize> = (0..30).collect();
        let options = PriorOptions {
            size: 20,
            ..PriorOptions::default()
        };
        let prior = learn_prior(&store, &layout, &pool, &options).unwrap();
        assert!(prior.snp_count >= MIN_FITTABLE_SNPS);
        let (centers, _) = prior.centers_and_sds().unwrap();
        assert!(centers[0] < -0.3 && centers[2] > 0.3 && centers[1].abs() < 0.2);

        let again = learn_prior(&store, &layout, &pool, &options).unwrap();
        assert_eq!(prior, again);
    }

    #[test]
    fn test_too_few_fittable_probesets_is_fatal() {
        let (store, layout) = three_genotype_store(5);
        let pool: Vec<usize> = (0..5).collect();
        assert!(matches!(
            learn_prior(&store, &layout, &pool, &PriorOptions::default()),
            Err(GenoError::Model { .. })
        ));
    }
}

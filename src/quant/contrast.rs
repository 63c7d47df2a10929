//! Genotype calling on the allele contrast axis.
//!
//! Each genotype owns a Gaussian on the contrast axis (BB negative, AB near
//! zero, AA positive). Cluster centers start at the run prior and are pulled
//! toward the probeset's own data with the prior acting as `PRIOR_WEIGHT`
//! pseudo-observations. Each sample then gets the genotype with the highest
//! posterior, subject to its covariates.

use super::{
    ComputeError, CovariateConsumer, MethodFamily, PriorConsumer, ProbesetData, QuantMethod,
    SampleCall, SpecialSnpConsumer,
};
use crate::covariate::{Gender, InbredPenalty};
use crate::em::EmPrior;
use crate::error::Result;
use crate::genotype::GenotypeCall;
use crate::prior::ClusterPrior;
use crate::stats::contrast;
use statrs::distribution::{Continuous, Normal};
use std::collections::HashSet;

pub const DEFAULT_K: f64 = 2.0;

/// Weight of the run prior when re-centering clusters on one probeset.
const PRIOR_WEIGHT: f64 = 5.0;

const CLUSTERS: usize = 3;
const AB: usize = 1;

pub struct ContrastClusterCaller {
    name: String,
    family: MethodFamily,
    k: f64,
    conf_threshold: f64,
    /// BB, AB, AA.
    centers: [f64; CLUSTERS],
    sds: [f64; CLUSTERS],
    genders: Vec<Gender>,
    inbred: Vec<InbredPenalty>,
    haploid: HashSet<String>,
}

impl ContrastClusterCaller {
    pub fn new(name: impl Into<String>, family: MethodFamily, k: f64, conf_threshold: f64) -> Self {
        let prior = EmPrior::default();
        Self {
            name: name.into(),
            family,
            k,
            conf_threshold,
            centers: prior.mu,
            sds: prior.sigma,
            genders: Vec::new(),
            inbred: Vec::new(),
            haploid: HashSet::new(),
        }
    }

    pub fn centers(&self) -> [f64; CLUSTERS] {
        self.centers
    }

    /// Genotypes a sample may take on this probeset.
    fn allowed(&self, sample: usize, haploid: bool) -> [bool; CLUSTERS] {
        let male = self.genders.get(sample) == Some(&Gender::Male);
        [true, !(haploid && male), true]
    }

    fn best_cluster(&self, c: f64, centers: &[f64; CLUSTERS], allowed: &[bool; CLUSTERS]) -> usize {
        let mut best = 0;
        let mut best_z = f64::INFINITY;
        for j in 0..CLUSTERS {
            if !allowed[j] {
                continue;
            }
            let z = ((c - centers[j]) / self.sds[j]).abs();
            if z < best_z {
                best_z = z;
                best = j;
            }
        }
        best
    }

    /// Prior centers moved toward the mean contrast of their hard-assigned
    /// members.
    fn adapted_centers(&self, contrasts: &[Option<f64>], haploid: bool) -> [f64; CLUSTERS] {
        let mut sums = [0.0; CLUSTERS];
        let mut counts = [0usize; CLUSTERS];
        for (s, c) in contrasts.iter().enumerate() {
            if let Some(c) = c {
                let j = self.best_cluster(*c, &self.centers, &self.allowed(s, haploid));
                sums[j] += c;
                counts[j] += 1;
            }
        }
        let mut centers = self.centers;
        for j in 0..CLUSTERS {
            centers[j] = (PRIOR_WEIGHT * self.centers[j] + sums[j]) / (PRIOR_WEIGHT + counts[j] as f64);
        }
        centers
    }
}

impl QuantMethod for ContrastClusterCaller {
    fn method_type(&self) -> &str {
        &self.name
    }

    fn version(&self) -> &str {
        env!("CARGO_PKG_VERSION")
    }

    fn family(&self) -> MethodFamily {
        self.family
    }

    fn compute(&self, data: &ProbesetData<'_>) -> std::result::Result<Vec<SampleCall>, ComputeError> {
        let probeset = &data.probeset.name;
        if data.probeset.allele_a.is_empty() || data.probeset.allele_b.is_empty() {
            return Err(ComputeError::NotGenotyping {
                probeset: probeset.clone(),
            });
        }
        let contrasts: Vec<Option<f64>> = data
            .signal_a
            .iter()
            .zip(&data.signal_b)
            .map(|(a, b)| contrast(*a, *b, self.k))
            .collect();
        if contrasts.iter().all(Option::is_none) {
            return Err(ComputeError::NoSignal {
                probeset: probeset.clone(),
            });
        }

        let haploid = self.haploid.contains(probeset);
        let centers = self.adapted_centers(&contrasts, haploid);
        let mut clusters = Vec::with_capacity(CLUSTERS);
        for j in 0..CLUSTERS {
            clusters.push(Normal::new(centers[j], self.sds[j]).map_err(|e| ComputeError::Degenerate {
                probeset: probeset.clone(),
                message: format!("cluster {}: {}", j, e),
            })?);
        }

        let mut calls = Vec::with_capacity(contrasts.len());
        for (s, c) in contrasts.iter().enumerate() {
            let Some(c) = *c else {
                calls.push(SampleCall {
                    signal_a: data.signal_a[s],
                    signal_b: data.signal_b[s],
                    ..SampleCall::failed()
                });
                continue;
            };
            let allowed = self.allowed(s, haploid);
            let penalty = self.inbred.get(s).copied().unwrap_or(0.0);
            let mut log_lik = [f64::NEG_INFINITY; CLUSTERS];
            for j in 0..CLUSTERS {
                if allowed[j] {
                    log_lik[j] = clusters[j].ln_pdf(c) - if j == AB { penalty } else { 0.0 };
                }
            }
            let max = log_lik.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
            let weights: Vec<f64> = log_lik.iter().map(|l| (l - max).exp()).collect();
            let total: f64 = weights.iter().sum();
            let best = (0..CLUSTERS)
                .filter(|j| allowed[*j])
                .max_by(|a, b| weights[*a].total_cmp(&weights[*b]))
                .unwrap_or(0);
            let confidence = 1.0 - weights[best] / total;
            let call = if confidence <= self.conf_threshold {
                GenotypeCall::from_cluster(best)
            } else {
                GenotypeCall::NoCall
            };
            calls.push(SampleCall {
                call,
                confidence,
                distance: ((c - centers[best]) / self.sds[best]).abs(),
                contrast: c,
                signal_a: data.signal_a[s],
                signal_b: data.signal_b[s],
            });
        }
        Ok(calls)
    }

    fn prior_consumer(&mut self) -> Option<&mut dyn PriorConsumer> {
        Some(self)
    }

    fn covariate_consumer(&mut self) -> Option<&mut dyn CovariateConsumer> {
        Some(self)
    }

    fn special_snp_consumer(&mut self) -> Option<&mut dyn SpecialSnpConsumer> {
        Some(self)
    }
}

impl PriorConsumer for ContrastClusterCaller {
    fn set_prior(&mut self, prior: &ClusterPrior) -> Result<()> {
        let (centers, sds) = prior.centers_and_sds()?;
        self.centers = centers;
        self.sds = sds;
        Ok(())
    }
}

impl CovariateConsumer for ContrastClusterCaller {
    fn set_genders(&mut self, genders: &[Gender]) {
        self.genders = genders.to_vec();
    }

    fn set_inbred_penalties(&mut self, penalties: &[InbredPenalty]) {
        self.inbred = penalties.to_vec();
    }
}

impl SpecialSnpConsumer for ContrastClusterCaller {
    fn set_haploid_snps(&mut self, names: &HashSet<String>) {
        self.haploid = names.clone();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::{ProbeId, Probeset, ProbesetKind};

    fn probeset(name: &str) -> Probeset {
        Probeset {
            name: name.into(),
            kind: ProbesetKind::Genotyping,
            allele_a: vec![ProbeId(0)],
            allele_b: vec![ProbeId(1)],
        }
    }

    fn data<'a>(ps: &'a Probeset, pairs: &[(f64, f64)]) -> ProbesetData<'a> {
        ProbesetData {
            index: 0,
            probeset: ps,
            signal_a: pairs.iter().map(|p| p.0).collect(),
            signal_b: pairs.iter().map(|p| p.1).collect(),
        }
    }

    fn caller() -> ContrastClusterCaller {
        ContrastClusterCaller::new("birdseed-v2", MethodFamily::BirdseedV2, DEFAULT_K, 0.1)
    }

    #[test]
    fn test_calls_three_clear_clusters() {
        let ps = probeset("SNP1");
        let d = data(&ps, &[(1000.0, 50.0), (500.0, 520.0), (40.0, 900.0), (1100.0, 60.0)]);
        let calls = caller().compute(&d).unwrap();
        let genotypes: Vec<GenotypeCall> = calls.iter().map(|c| c.call).collect();
        assert_eq!(
            genotypes,
            vec![GenotypeCall::AA, GenotypeCall::AB, GenotypeCall::BB, GenotypeCall::AA]
        );
        assert!(calls.iter().all(|c| c.confidence < 0.1 && c.distance.is_finite()));
    }

    #[test]
    fn test_haploid_snp_forbids_male_heterozygotes() {
        let ps = probeset("X1");
        let d = data(&ps, &[(500.0, 500.0), (500.0, 500.0)]);
        let mut method = caller();
        method
            .covariate_consumer()
            .unwrap()
            .set_genders(&[Gender::Male, Gender::Female]);
        let mut haploid = HashSet::new();
        haploid.insert("X1".to_string());
        method.special_snp_consumer().unwrap().set_haploid_snps(&haploid);
        let calls = method.compute(&d).unwrap();
        assert_ne!(calls[0].call, GenotypeCall::AB);
        assert_eq!(calls[1].call, GenotypeCall::AB);
    }

    #[test]
    fn test_inbred_penalty_lowers_het_posterior() {
        let ps = probeset("SNP2");
        // A contrast between the AB and AA centers.
        let d = data(&ps, &[(700.0, 420.0), (700.0, 420.0)]);
        let mut method = ContrastClusterCaller::new("brlmm", MethodFamily::Brlmm, DEFAULT_K, 1.0);
        method.covariate_consumer().unwrap().set_inbred_penalties(&[0.0, 50.0]);
        let calls = method.compute(&d).unwrap();
        assert_eq!(calls[1].call, GenotypeCall::AA);
        assert_eq!(calls[0].contrast, calls[1].contrast);
    }

    #[test]
    fn test_missing_signal_fails_the_probeset() {
        let ps = probeset("SNP3");
        let d = data(&ps, &[(0.0, 0.0), (f64::NAN, 1.0)]);
        assert!(matches!(caller().compute(&d), Err(ComputeError::NoSignal { .. })));

        let failed = caller().failure_result(&d);
        assert_eq!(failed.len(), 2);
        assert!(failed.iter().all(|c| c.call == GenotypeCall::NoCall && c.confidence == 1.0));
    }

    #[test]
    fn test_single_sample_without_signal_is_a_no_call() {
        let ps = probeset("SNP4");
        let d = data(&ps, &[(1000.0, 50.0), (0.0, 0.0)]);
        let calls = caller().compute(&d).unwrap();
        assert_eq!(calls[0].call, GenotypeCall::AA);
        assert_eq!(calls[1].call, GenotypeCall::NoCall);
        assert_eq!(calls[1].confidence, 1.0);
    }

    #[test]
    fn test_prior_replaces_centers() {
        let mut method = caller();
        let prior = ClusterPrior::from_em_prior(
            &EmPrior {
                mu: [-0.5, 0.1, 0.5],
                ..EmPrior::default()
            },
            0,
        );
        method.prior_consumer().unwrap().set_prior(&prior).unwrap();
        assert_eq!(method.centers(), [-0.5, 0.1, 0.5]);
    }
}

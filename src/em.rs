//! Three-cluster Gaussian EM on a one-dimensional contrast axis.
//!
//! Clusters are indexed 0, 1, 2 from negative to positive contrast and map to
//! BB, AB, AA calls. A fit always starts from the same seed, so identical input
//! produces identical output.
//!
//! The mixture uses Gaussians with an exponential tail beyond `tail_cut`
//! standard deviations, drops clusters whose total membership falls below
//! `cluster_drop_threshold`, and clamps means and spreads to the seed bounds
//! after every maximization step.

use crate::genotype::GenotypeCall;

const CLUSTERS: usize = 3;

/// Fitting constants.
#[derive(Debug, Clone, PartialEq)]
pub struct EmParams {
    pub tolerance: f64,
    pub max_iterations: usize,
    /// z beyond which the density decays exponentially instead of quadratically.
    pub tail_cut: f64,
    /// Scale applied to z^2 when scoring the final call probability.
    pub factor: f64,
    pub use_weight: bool,
    /// Confidence above this is a no call. Lower confidence is better.
    pub threshold: f64,
    pub cluster_drop_threshold: f64,
}

impl Default for EmParams {
    fn default() -> Self {
        Self {
            tolerance: 0.001,
            max_iterations: 50,
            tail_cut: 2.5,
            factor: 0.01,
            use_weight: false,
            threshold: 0.05,
            cluster_drop_threshold: 0.8,
        }
    }
}

/// Centers and spreads, with their uncertainty, that a seed is built from.
#[derive(Debug, Clone, PartialEq)]
pub struct EmPrior {
    pub mu: [f64; CLUSTERS],
    pub mu_sd: [f64; CLUSTERS],
    pub sigma: [f64; CLUSTERS],
    pub sigma_sd: [f64; CLUSTERS],
}

impl Default for EmPrior {
    fn default() -> Self {
        Self {
            mu: [-0.66, 0.0, 0.66],
            mu_sd: [0.125, 0.175, 0.125],
            sigma: [0.065, 0.085, 0.065],
            sigma_sd: [0.035, 0.015, 0.035],
        }
    }
}

/// Starting point and box constraints for one fit.
#[derive(Debug, Clone, PartialEq)]
pub struct EmSeed {
    pub mu: [f64; CLUSTERS],
    pub sigma: [f64; CLUSTERS],
    pub weight: [f64; CLUSTERS],
    pub min_mu: [f64; CLUSTERS],
    pub max_mu: [f64; CLUSTERS],
    pub min_sigma: [f64; CLUSTERS],
    pub max_sigma: [f64; CLUSTERS],
}

const MIN_SIGMA_FLOOR: f64 = 0.01;

impl EmSeed {
    /// Seed at the prior centers with bounds three prior deviations wide.
    pub fn from_prior(prior: &EmPrior) -> Self {
        let mut seed = Self {
            mu: prior.mu,
            sigma: prior.sigma,
            weight: [1.0 / CLUSTERS as f64; CLUSTERS],
            min_mu: [0.0; CLUSTERS],
            max_mu: [0.0; CLUSTERS],
            min_sigma: [0.0; CLUSTERS],
            max_sigma: [0.0; CLUSTERS],
        };
        for j in 0..CLUSTERS {
            seed.min_mu[j] = prior.mu[j] - 3.0 * prior.mu_sd[j];
            seed.max_mu[j] = prior.mu[j] + 3.0 * prior.mu_sd[j];
            seed.min_sigma[j] = (prior.sigma[j] - 3.0 * prior.sigma_sd[j]).max(MIN_SIGMA_FLOOR);
            seed.max_sigma[j] = prior.sigma[j] + 3.0 * prior.sigma_sd[j];
        }
        seed
    }
}

impl Default for EmSeed {
    fn default() -> Self {
        Self::from_prior(&EmPrior::default())
    }
}

/// Gaussian kernel with an exponential tail. The exponent is floored at -200.
pub fn gaussian_with_exp_tail(z: f64, z_cut: f64, factor: f64) -> f64 {
    let abs_z = z.abs();
    let exponent = if abs_z < z_cut {
        -0.5 * abs_z * abs_z * factor
    } else {
        -0.5 * z_cut * abs_z * factor
    };
    exponent.max(-200.0).exp()
}

fn probability(x: f64, mu: f64, sigma: f64, weight: f64, z_cut: f64, use_weight: bool) -> f64 {
    let z = (mu - x) / sigma;
    let kernel = gaussian_with_exp_tail(z, z_cut, 1.0);
    if use_weight {
        weight * kernel / sigma
    } else {
        kernel / sigma
    }
}

/// Result of one fit.
#[derive(Debug, Clone, PartialEq)]
pub struct EmFit {
    pub mu: [f64; CLUSTERS],
    pub sigma: [f64; CLUSTERS],
    pub weight: [f64; CLUSTERS],
    pub valid: [bool; CLUSTERS],
    pub calls: Vec<GenotypeCall>,
    pub confidences: Vec<f64>,
    pub iterations: usize,
}

impl EmFit {
    pub fn valid_clusters(&self) -> usize {
        self.valid.iter().filter(|v| **v).count()
    }
}

#[derive(Debug, Clone)]
struct Estimate {
    mu: [f64; CLUSTERS],
    sigma: [f64; CLUSTERS],
    weight: [f64; CLUSTERS],
    valid: [bool; CLUSTERS],
}

struct EmState<'a> {
    data: &'a [f64],
    params: &'a EmParams,
    seed: &'a EmSeed,
    est: Estimate,
    /// Normalized membership per point and cluster.
    np: Vec<[f64; CLUSTERS]>,
    cluster_np: [f64; CLUSTERS],
    sum_np: f64,
}

impl<'a> EmState<'a> {
    fn new(data: &'a [f64], seed: &'a EmSeed, params: &'a EmParams) -> Self {
        let mut est = Estimate {
            mu: seed.mu,
            sigma: seed.sigma,
            weight: seed.weight,
            valid: [false; CLUSTERS],
        };
        for j in 0..CLUSTERS {
            if seed.weight[j] > 0.0 {
                est.valid[j] = true;
                est.mu[j] = est.mu[j].clamp(seed.min_mu[j], seed.max_mu[j]);
                est.sigma[j] = est.sigma[j].clamp(seed.min_sigma[j], seed.max_sigma[j]);
            }
        }
        Self {
            data,
            params,
            seed,
            est,
            np: vec![[0.0; CLUSTERS]; data.len()],
            cluster_np: [0.0; CLUSTERS],
            sum_np: 0.0,
        }
    }

    fn e_step(&mut self, final_pass: bool) {
        let mut raw = vec![[0.0; CLUSTERS]; self.data.len()];
        let mut sum_p = vec![0.0; self.data.len()];
        for j in 0..CLUSTERS {
            if !self.est.valid[j] {
                continue;
            }
            for (i, &x) in self.data.iter().enumerate() {
                let z = (x - self.est.mu[j]).abs() / self.est.sigma[j];
                raw[i][j] = if final_pass || z < 50.0 {
                    probability(
                        x,
                        self.est.mu[j],
                        self.est.sigma[j],
                        self.est.weight[j],
                        self.params.tail_cut,
                        self.params.use_weight,
                    )
                } else {
                    0.0
                };
                sum_p[i] += raw[i][j];
            }
        }

        self.sum_np = 0.0;
        self.cluster_np = [0.0; CLUSTERS];
        for j in 0..CLUSTERS {
            if !self.est.valid[j] {
                continue;
            }
            for i in 0..self.data.len() {
                self.np[i][j] = if sum_p[i] > 0.0 { raw[i][j] / sum_p[i] } else { 0.0 };
                self.cluster_np[j] += self.np[i][j];
            }
            self.sum_np += self.cluster_np[j];
        }

        if !final_pass {
            for j in 0..CLUSTERS {
                if self.cluster_np[j] < self.params.cluster_drop_threshold {
                    self.est.valid[j] = false;
                }
            }
        }
    }

    fn m_step(&mut self) {
        for j in 0..CLUSTERS {
            if !self.est.valid[j] {
                continue;
            }
            let weighted: f64 = self
                .data
                .iter()
                .zip(&self.np)
                .map(|(x, np)| np[j] * x)
                .sum();
            self.est.mu[j] = (weighted / self.cluster_np[j])
                .clamp(self.seed.min_mu[j], self.seed.max_mu[j]);
            self.est.weight[j] = self.cluster_np[j] / self.sum_np;
            let s2: f64 = self
                .data
                .iter()
                .zip(&self.np)
                .map(|(x, np)| np[j] * (x - self.est.mu[j]).powi(2))
                .sum::<f64>()
                / self.cluster_np[j];
            self.est.sigma[j] = s2
                .sqrt()
                .clamp(self.seed.min_sigma[j], self.seed.max_sigma[j]);
        }
    }

    fn changed_since(&self, previous: &Estimate) -> bool {
        (0..CLUSTERS).filter(|&j| self.est.valid[j]).any(|j| {
            (previous.weight[j] - self.est.weight[j]).abs() > self.params.tolerance
                || (previous.mu[j] - self.est.mu[j]).abs() > self.params.tolerance
                || (previous.sigma[j] - self.est.sigma[j]).abs() > self.params.tolerance
        })
    }

    /// Best cluster, its confidence and the resulting call for point `i`.
    fn classify(&self, i: usize) -> (GenotypeCall, f64) {
        let x = self.data[i];
        let np = &self.np[i];
        let mut order: Vec<usize> = (0..CLUSTERS).filter(|&j| self.est.valid[j]).collect();
        let n_valid = order.len();
        if n_valid == 0 {
            return (GenotypeCall::NoCall, 1.0);
        }
        let neg_log = |j: usize| if np[j] > 0.0 { -np[j].ln() } else { f64::MAX };
        order.sort_by(|&a, &b| neg_log(a).total_cmp(&neg_log(b)));

        let mut best = order[0];
        let mut second = order.get(1).copied();
        if let Some(mut s) = second {
            if (x - self.est.mu[s]) * (self.est.mu[best] - self.est.mu[s]) < 0.0 {
                std::mem::swap(&mut best, &mut s);
            }
            if let Some(&third) = order.get(2) {
                if (x - self.est.mu[third]) * (self.est.mu[best] - self.est.mu[third]) < 0.0 {
                    s = best;
                    best = third;
                }
            }
            second = Some(s);
        }

        let z = (x - self.est.mu[best]) / self.est.sigma[best];
        let prob = gaussian_with_exp_tail(z, self.params.tail_cut, self.params.factor);
        let confidence = match second {
            Some(s) if n_valid > 1 => {
                let ratio = if np[s] == 0.0 {
                    0.0
                } else {
                    (np[best] / np[s]).min(f64::MAX)
                };
                1.0 - prob * (ratio / (ratio + 1.0))
            }
            _ => 1.0 - prob,
        };

        if confidence > self.params.threshold {
            (GenotypeCall::NoCall, confidence)
        } else {
            (GenotypeCall::from_cluster(best), confidence)
        }
    }
}

/// Fits the mixture to `data` and classifies every point.
pub fn fit(data: &[f64], seed: &EmSeed, params: &EmParams) -> EmFit {
    let mut state = EmState::new(data, seed, params);
    if data.is_empty() {
        return EmFit {
            mu: state.est.mu,
            sigma: state.est.sigma,
            weight: state.est.weight,
            valid: [false; CLUSTERS],
            calls: Vec::new(),
            confidences: Vec::new(),
            iterations: 0,
        };
    }

    let mut iterations = 0;
    let mut previous = state.est.clone();
    while iterations < params.max_iterations {
        state.e_step(false);
        state.m_step();
        if iterations > 0 && !state.changed_since(&previous) {
            break;
        }
        previous = state.est.clone();
        iterations += 1;
    }
    state.e_step(true);

    let (calls, confidences): (Vec<GenotypeCall>, Vec<f64>) =
        (0..data.len()).map(|i| state.classify(i)).unzip();
    EmFit {
        mu: state.est.mu,
        sigma: state.est.sigma,
        weight: state.est.weight,
        valid: state.est.valid,
        calls,
        confidences,
        iterations,
    }
}

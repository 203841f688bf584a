//! Evolutionary update of trait-variant frequencies.

use crate::config::EvolutionConfig;
use crate::encounter::Delta;
use crate::error::SimError;
use crate::traits::{Cohort, SpeciesSet, TraitDistribution, TraitSet};
use rand::prelude::*;
use rand_distr::LogNormal;

/// Frequencies below this value are treated as lost.
const LOST_FREQ: f64 = 1e-12;

/// Per-variant exposure and predation totals accumulated over one generation.
#[derive(Debug, Clone)]
pub struct FitnessLedger {
    steps: usize,
    exposure: Vec<Vec<f64>>,
    loss: Vec<Vec<f64>>,
    gain: Vec<Vec<f64>>,
    toxin: Vec<Vec<f64>>,
}

impl FitnessLedger {
    pub fn new(species: &SpeciesSet) -> Self {
        let zeros: Vec<Vec<f64>> = species
            .species
            .iter()
            .map(|sp| vec![0.0; sp.freqs().len()])
            .collect();
        Self {
            steps: 0,
            exposure: zeros.clone(),
            loss: zeros.clone(),
            gain: zeros.clone(),
            toxin: zeros,
        }
    }

    /// Record one step, using the populations the deltas were sampled from.
    pub fn record(&mut self, species: &SpeciesSet, deltas: &[Delta]) {
        self.steps += 1;
        for (sp, delta) in species.species.iter().zip(deltas) {
            let id = sp.id;
            for (acc, density) in self.exposure[id].iter_mut().zip(sp.variant_densities()) {
                *acc += density;
            }
            add_assign(&mut self.loss[id], &delta.variant_loss);
            add_assign(&mut self.gain[id], &delta.variant_gain);
            add_assign(&mut self.toxin[id], &delta.variant_toxin);
        }
    }

    /// Relative fitness of each variant of every species.
    ///
    /// Prey: base fitness times survival of the generation's predation hazard.
    /// Predators: exponential of per capita net intake over the generation.
    /// Values are scaled so the fittest variant of each species has fitness 1.
    pub fn fitness(&self, species: &SpeciesSet) -> Vec<Vec<f64>> {
        self.log_fitness(species)
            .into_iter()
            .map(|log_fit| relative_fitness(&log_fit))
            .collect()
    }

    fn log_fitness(&self, species: &SpeciesSet) -> Vec<Vec<f64>> {
        let steps = self.steps as f64;
        species
            .species
            .iter()
            .map(|sp| {
                let id = sp.id;
                match &sp.cohort {
                    Cohort::Prey(prey) => prey
                        .distribution
                        .variants()
                        .iter()
                        .enumerate()
                        .map(|(i_var, var)| {
                            let exposure = self.exposure[id][i_var];
                            if exposure <= 0.0 {
                                return var.base_fitness.ln();
                            }
                            let hazard = (self.loss[id][i_var] / exposure).min(1.0);
                            var.base_fitness.ln() - steps * hazard
                        })
                        .collect(),
                    Cohort::Predator(predator) => (0..predator.distribution.len())
                        .map(|i_var| {
                            let exposure = self.exposure[id][i_var];
                            if exposure <= 0.0 {
                                return 0.0;
                            }
                            let net = predator.efficiency * self.gain[id][i_var]
                                - predator.toxin_lethality * self.toxin[id][i_var];
                            steps * net / exposure
                        })
                        .collect(),
                }
            })
            .collect()
    }
}

// Subtracting the maximum keeps the fittest variant at 1 however large the exponents get.
fn relative_fitness(log_fit: &[f64]) -> Vec<f64> {
    if log_fit.iter().any(|val| val.is_nan()) {
        return vec![f64::NAN; log_fit.len()];
    }
    let max = log_fit.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if max == f64::NEG_INFINITY {
        return vec![0.0; log_fit.len()];
    }
    log_fit.iter().map(|val| (val - max).exp()).collect()
}

fn add_assign(acc: &mut [f64], vals: &[f64]) {
    for (a, v) in acc.iter_mut().zip(vals) {
        *a += v;
    }
}

/// Apply selection, mutation and drift to one distribution.
pub fn advance_generation<T: TraitSet, R: Rng + ?Sized>(
    distribution: &TraitDistribution<T>,
    fitness: &[f64],
    cfg: &EvolutionConfig,
    rng: &mut R,
) -> Result<TraitDistribution<T>, SimError> {
    let n_var = distribution.len();
    if fitness.len() != n_var {
        return Err(SimError::instability(format!(
            "got {} fitness values for {n_var} variants",
            fitness.len()
        )));
    }

    if let Some(fit) = fitness.iter().find(|fit| fit.is_nan()) {
        return Err(SimError::instability(format!("variant fitness is {fit}")));
    }

    // Selection.
    let mut freqs: Vec<f64> = distribution
        .freqs()
        .iter()
        .zip(fitness)
        .map(|(&freq, &fit)| freq * fit.max(0.0).powf(cfg.selection_strength))
        .collect();
    let total: f64 = freqs.iter().sum();
    if !total.is_finite() {
        return Err(SimError::instability(format!(
            "selection weights sum to {total}"
        )));
    }
    if total > 0.0 {
        freqs.iter_mut().for_each(|freq| *freq /= total);
    } else {
        freqs = distribution.freqs().to_vec();
    }

    // Mutation spreads a fraction of every lineage uniformly.
    let mu = cfg.mutation_rate;
    freqs
        .iter_mut()
        .for_each(|freq| *freq = (1.0 - mu) * *freq + mu / n_var as f64);

    // Multiplicative drift keeps lost variants lost.
    if cfg.drift_std_dev > 0.0 {
        let drift = LogNormal::new(0.0, cfg.drift_std_dev)
            .map_err(|err| SimError::instability(format!("invalid drift law: {err}")))?;
        for freq in &mut freqs {
            *freq *= drift.sample(rng);
        }
    }

    freqs.iter_mut().for_each(|freq| {
        if *freq < LOST_FREQ {
            *freq = 0.0;
        }
    });
    let total: f64 = freqs.iter().sum();
    if !(total.is_finite() && total > 0.0) {
        return Err(SimError::instability(format!(
            "variant frequencies sum to {total}"
        )));
    }
    freqs.iter_mut().for_each(|freq| *freq /= total);

    Ok(distribution.with_freqs(freqs))
}

/// Apply one generation boundary to every living species of the set.
pub fn evolve<R: Rng + ?Sized>(
    species: &mut SpeciesSet,
    ledger: &FitnessLedger,
    cfg: &EvolutionConfig,
    rng: &mut R,
) -> Result<(), SimError> {
    let fitness = ledger.fitness(species);
    for (sp, fit) in species.species.iter_mut().zip(fitness) {
        if sp.extinct {
            continue;
        }
        match &mut sp.cohort {
            Cohort::Prey(prey) => {
                prey.distribution = advance_generation(&prey.distribution, &fit, cfg, rng)?;
                prey.traits = prey.distribution.realize();
            }
            Cohort::Predator(predator) => {
                predator.distribution =
                    advance_generation(&predator.distribution, &fit, cfg, rng)?;
                predator.traits = predator.distribution.realize();
            }
        }
    }
    Ok(())
}

//! Encounter and predation model.
//!
//! Every step, each predator variant hunts each prey variant. Attack rates
//! combine search effort, detection, hunger and learned aversion. Attempts
//! and captures are sampled from the run's generator.

use crate::config::{Config, Sampling};
use crate::error::SimError;
use crate::learning::LearningState;
use crate::traits::SpeciesSet;
use rand::prelude::*;
use rand_distr::{Binomial, Poisson};
use serde::{Deserialize, Serialize};

/// Attacks of one predator variant on one prey variant during a step.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct EncounterOutcome {
    pub predator_id: usize,
    pub predator_variant: usize,
    pub prey_id: usize,
    pub prey_variant: usize,
    pub attempted: u64,
    pub successful: u64,
    /// Signal shown by the prey variant.
    pub signal: f64,
    /// Toxin cost paid by the predator per successful attack.
    pub realized_cost: f64,
}

/// Per-species change produced by one step of predation.
///
/// Prey fill the `loss` fields, predators the `gain` and `toxin` fields.
#[derive(Debug, PartialEq, Clone, Default)]
pub struct Delta {
    pub loss: f64,
    pub gain: f64,
    pub toxin: f64,
    pub variant_loss: Vec<f64>,
    pub variant_gain: Vec<f64>,
    pub variant_toxin: Vec<f64>,
}

impl Delta {
    fn zeroed(n_variants: usize) -> Self {
        Self {
            variant_loss: vec![0.0; n_variants],
            variant_gain: vec![0.0; n_variants],
            variant_toxin: vec![0.0; n_variants],
            ..Self::default()
        }
    }
}

#[derive(Debug, PartialEq, Clone)]
pub struct EncounterReport {
    pub outcomes: Vec<EncounterOutcome>,
    /// Indexed by species id.
    pub deltas: Vec<Delta>,
}

struct Target {
    prey_id: usize,
    prey_variant: usize,
    density: f64,
    detectability: f64,
    signal: f64,
    toxicity: f64,
}

/// Sample one step of encounters.
pub fn step<R: Rng + ?Sized>(
    species: &SpeciesSet,
    learning: &[LearningState],
    cfg: &Config,
    rng: &mut R,
) -> Result<EncounterReport, SimError> {
    let dt = cfg.run.dt;
    let aversion = cfg.encounter.aversion;

    let mut deltas: Vec<Delta> = species
        .species
        .iter()
        .map(|sp| Delta::zeroed(sp.freqs().len()))
        .collect();
    let mut outcomes = Vec::new();

    let mut targets = Vec::new();
    for (sp, prey) in species.prey() {
        for (i_var, (var, density)) in prey
            .distribution
            .variants()
            .iter()
            .zip(sp.variant_densities())
            .enumerate()
        {
            targets.push(Target {
                prey_id: sp.id,
                prey_variant: i_var,
                density,
                detectability: var.effective_detectability(),
                signal: var.signal,
                toxicity: var.toxicity,
            });
        }
    }

    // Whole prey individuals left to be attacked this step.
    let mut available: Vec<u64> = targets
        .iter()
        .map(|tgt| tgt.density.max(0.0).floor() as u64)
        .collect();

    let predators: Vec<_> = species.predators().zip(learning).collect();

    // Hunters take turns on the remaining prey in a random order each step.
    let mut hunters: Vec<(usize, usize)> = predators
        .iter()
        .enumerate()
        .flat_map(|(i_pred, ((sp, _), _))| {
            (0..sp.freqs().len()).map(move |i_pvar| (i_pred, i_pvar))
        })
        .collect();
    hunters.shuffle(rng);

    for (i_pred, i_pvar) in hunters {
        let ((sp, predator), state) = predators[i_pred];
        debug_assert_eq!(sp.id, state.species_id());

        let pvar = &predator.distribution.variants()[i_pvar];
        let active = sp.population * sp.freqs()[i_pvar] * (1.0 - predator.sick_fraction);
        if active <= 0.0 {
            continue;
        }

        // Holling type II saturation over all detectable prey.
        let encounter_load: f64 = targets
            .iter()
            .map(|tgt| tgt.density * pvar.detection * tgt.detectability)
            .sum();
        let hunger = 1.0 / (1.0 + predator.handling_time * predator.attack_rate * encounter_load);

        for (tgt, avail) in targets.iter().zip(available.iter_mut()) {
            if *avail == 0 {
                continue;
            }

            let propensity = 1.0 - aversion * state.cost(tgt.signal);
            let rate = predator.attack_rate
                * pvar.detection
                * tgt.detectability
                * propensity
                * hunger;
            let expected = rate * active * tgt.density * dt;
            if !expected.is_finite() {
                return Err(SimError::instability(format!(
                    "expected attacks of species {} on species {} is {expected}",
                    sp.id, tgt.prey_id
                )));
            }

            let attempted = sample_attempts(cfg.encounter.sampling, expected, *avail, rng)?;
            if attempted == 0 {
                continue;
            }
            let successful = sample_binomial(attempted, predator.capture_success, rng)?;
            *avail -= successful;

            let realized_cost = pvar.meal_cost(tgt.toxicity);
            let eaten = successful as f64;

            let prey_delta = &mut deltas[tgt.prey_id];
            prey_delta.loss += eaten;
            prey_delta.variant_loss[tgt.prey_variant] += eaten;

            let predator_delta = &mut deltas[sp.id];
            predator_delta.gain += eaten * (1.0 - realized_cost);
            predator_delta.toxin += eaten * realized_cost;
            predator_delta.variant_gain[i_pvar] += eaten * (1.0 - realized_cost);
            predator_delta.variant_toxin[i_pvar] += eaten * realized_cost;

            outcomes.push(EncounterOutcome {
                predator_id: sp.id,
                predator_variant: i_pvar,
                prey_id: tgt.prey_id,
                prey_variant: tgt.prey_variant,
                attempted,
                successful,
                signal: tgt.signal,
                realized_cost,
            });
        }
    }

    Ok(EncounterReport { outcomes, deltas })
}

/// Number of attack attempts, never more than the available prey.
fn sample_attempts<R: Rng + ?Sized>(
    sampling: Sampling,
    expected: f64,
    available: u64,
    rng: &mut R,
) -> Result<u64, SimError> {
    if expected <= 0.0 || available == 0 {
        return Ok(0);
    }
    let attempted = match sampling {
        Sampling::Poisson => {
            let dist = Poisson::new(expected)
                .map_err(|err| SimError::instability(format!("invalid attack rate: {err}")))?;
            let draw: f64 = dist.sample(rng);
            draw as u64
        }
        Sampling::Binomial => {
            let prob = (expected / available as f64).min(1.0);
            sample_binomial(available, prob, rng)?
        }
    };
    Ok(attempted.min(available))
}

fn sample_binomial<R: Rng + ?Sized>(n: u64, p: f64, rng: &mut R) -> Result<u64, SimError> {
    if n == 0 || p <= 0.0 {
        return Ok(0);
    }
    let dist = Binomial::new(n, p)
        .map_err(|err| SimError::instability(format!("invalid binomial law: {err}")))?;
    Ok(dist.sample(rng))
}

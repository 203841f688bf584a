//! Population dynamics integrator.
//!
//! Forward Euler step of logistic prey growth and predator numerical
//! response. Predation counts come already integrated over `dt`.

use crate::config::Config;
use crate::encounter::Delta;
use crate::error::SimError;
use crate::traits::{Cohort, PredatorCohort, Species, SpeciesSet};

/// Advance every species by one time step.
pub fn advance(
    mut species: SpeciesSet,
    deltas: &[Delta],
    cfg: &Config,
) -> Result<SpeciesSet, SimError> {
    let dt = cfg.run.dt;
    let threshold = cfg.run.extinction_threshold;

    for (sp, delta) in species.species.iter_mut().zip(deltas) {
        if sp.extinct {
            continue;
        }

        let pop = sp.population;
        let next = match &mut sp.cohort {
            Cohort::Prey(prey) => {
                let crowding = sp.carrying_capacity.map_or(0.0, |cap| pop / cap);
                pop + dt * prey.growth_rate * pop * (1.0 - crowding) - delta.loss
            }
            Cohort::Predator(predator) => {
                update_sickness(predator, pop, delta.toxin);
                pop + predator.efficiency * delta.gain
                    - dt * predator.mortality * pop
                    - predator.toxin_lethality * delta.toxin
            }
        };

        if !next.is_finite() {
            return Err(SimError::instability(format!(
                "population of species {} ({}) is {next}",
                sp.id, sp.name
            )));
        }

        settle(sp, next, threshold);
    }

    Ok(species)
}

/// Store a new population, clamped to `[0, K]`, marking local extinction.
fn settle(sp: &mut Species, next: f64, threshold: f64) {
    let capped = sp.carrying_capacity.map_or(next, |cap| next.min(cap));
    if capped < threshold || capped <= 0.0 {
        sp.population = 0.0;
        sp.extinct = true;
        log::debug!("species {} ({}) went locally extinct", sp.id, sp.name);
    } else {
        sp.population = capped;
    }
}

// Poisoned predators stop hunting and recover at rate `1 / sickness_duration`.
fn update_sickness(predator: &mut PredatorCohort, pop: f64, toxin: f64) {
    if predator.sickness_duration <= 0.0 || pop <= 0.0 {
        predator.sick_fraction = 0.0;
        return;
    }
    let sick = predator.sick_fraction;
    let recovered = sick * (1.0 / predator.sickness_duration).min(1.0);
    let poisoned = (toxin / pop).min(1.0 - sick);
    predator.sick_fraction = (sick - recovered + poisoned).clamp(0.0, 1.0);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::sample_config;

    fn deltas(set: &SpeciesSet) -> Vec<Delta> {
        set.species
            .iter()
            .map(|sp| Delta {
                variant_loss: vec![0.0; sp.freqs().len()],
                variant_gain: vec![0.0; sp.freqs().len()],
                variant_toxin: vec![0.0; sp.freqs().len()],
                ..Delta::default()
            })
            .collect()
    }

    #[test]
    fn prey_grows_logistically_up_to_capacity() {
        let cfg = sample_config();
        let mut set = SpeciesSet::initialize(&cfg).unwrap();
        let cap = set.species[0].carrying_capacity.unwrap();
        let mut prev = set.species[0].population;
        for _ in 0..1000 {
            let d = deltas(&set);
            set = advance(set, &d, &cfg).unwrap();
            let pop = set.species[0].population;
            assert!(pop >= prev - 1e-9);
            assert!(pop <= cap);
            prev = pop;
        }
        assert!((prev - cap).abs() < 1.0);
    }

    #[test]
    fn first_step_matches_euler_formula() {
        let cfg = sample_config();
        let set = SpeciesSet::initialize(&cfg).unwrap();
        let mut d = deltas(&set);
        d[0].loss = 10.0;
        d[1].gain = 4.0;
        d[1].toxin = 2.0;
        let next = advance(set, &d, &cfg).unwrap();

        // 400 + 0.1 * 1.0 * 400 * (1 - 0.4) - 10
        assert!((next.species[0].population - 414.0).abs() < 1e-9);
        // 20 + 0.5 * 4 - 0.1 * 0.2 * 20 - 0.02 * 2
        assert!((next.species[1].population - 21.56).abs() < 1e-9);
    }

    #[test]
    fn overshoot_below_zero_is_local_extinction() {
        let cfg = sample_config();
        let set = SpeciesSet::initialize(&cfg).unwrap();
        let mut d = deltas(&set);
        d[0].loss = 1e4;
        let next = advance(set, &d, &cfg).unwrap();
        assert_eq!(next.species[0].population, 0.0);
        assert!(next.species[0].extinct);

        // Extinction is terminal for the species.
        let d = deltas(&next);
        let after = advance(next, &d, &cfg).unwrap();
        assert_eq!(after.species[0].population, 0.0);
    }

    #[test]
    fn predators_starve_without_prey() {
        let cfg = sample_config();
        let mut set = SpeciesSet::initialize(&cfg).unwrap();
        let mut prev = set.species[1].population;
        for _ in 0..20 {
            let d = deltas(&set);
            set = advance(set, &d, &cfg).unwrap();
            assert!(set.species[1].population < prev);
            prev = set.species[1].population;
        }
    }

    #[test]
    fn toxin_makes_predators_sick_then_recover() {
        let cfg = sample_config();
        let set = SpeciesSet::initialize(&cfg).unwrap();
        let mut d = deltas(&set);
        d[1].toxin = 5.0;
        let mut set = advance(set, &d, &cfg).unwrap();
        let sick_fraction = |set: &SpeciesSet| match &set.species[1].cohort {
            Cohort::Predator(predator) => predator.sick_fraction,
            Cohort::Prey(_) => unreachable!(),
        };
        assert!((sick_fraction(&set) - 0.25).abs() < 1e-12);
        for _ in 0..50 {
            let d = deltas(&set);
            set = advance(set, &d, &cfg).unwrap();
        }
        assert!(sick_fraction(&set) < 0.01);
    }

    #[test]
    fn non_finite_population_is_instability() {
        let cfg = sample_config();
        let set = SpeciesSet::initialize(&cfg).unwrap();
        let mut d = deltas(&set);
        d[1].gain = f64::INFINITY;
        let err = advance(set, &d, &cfg).unwrap_err();
        assert!(matches!(err, SimError::NumericalInstability { .. }));
    }
}

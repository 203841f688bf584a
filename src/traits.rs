//! Trait and signal model.
//!
//! Species carry a distribution over discrete trait variants. The realized
//! traits of a cohort are the frequency-weighted mean of its variants.

use crate::config::{Config, PredatorConfig, PreyConfig, check_num};
use crate::error::SimError;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt::Debug, ops::RangeInclusive};

/// Bounds shared by every trait.
pub const TRAIT_BOUNDS: RangeInclusive<f64> = 0.0..=1.0;

/// A fixed set of named numeric traits.
pub trait TraitSet: Clone + Debug {
    /// Trait names in declaration order.
    const NAMES: &'static [&'static str];

    /// Trait values in the order of [`TraitSet::NAMES`].
    fn values(&self) -> Vec<f64>;

    /// Build a trait set from values in the order of [`TraitSet::NAMES`].
    fn from_values(values: &[f64]) -> Self;

    /// Check every trait against [`TRAIT_BOUNDS`].
    fn check(&self) -> Result<()> {
        for (name, val) in Self::NAMES.iter().zip(self.values()) {
            check_num(val, TRAIT_BOUNDS).with_context(|| format!("invalid {name}"))?;
        }
        Ok(())
    }

    /// Trait values keyed by name.
    fn to_map(&self) -> BTreeMap<String, f64> {
        Self::NAMES
            .iter()
            .zip(self.values())
            .map(|(name, val)| (name.to_string(), val))
            .collect()
    }
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct PreyTraits {
    /// Conspicuousness of the warning signal.
    pub signal: f64,
    /// Unpalatability experienced by a predator that eats the prey.
    pub toxicity: f64,
    /// Detectability of the prey in the absence of any signal.
    pub detectability: f64,
    /// Relative reproductive output (toxin production may lower it).
    pub base_fitness: f64,
}

impl PreyTraits {
    /// Detectability after accounting for the signal: conspicuous prey are easier to find.
    pub fn effective_detectability(&self) -> f64 {
        self.detectability + (1.0 - self.detectability) * self.signal
    }
}

impl TraitSet for PreyTraits {
    const NAMES: &'static [&'static str] = &["signal", "toxicity", "detectability", "base_fitness"];

    fn values(&self) -> Vec<f64> {
        vec![
            self.signal,
            self.toxicity,
            self.detectability,
            self.base_fitness,
        ]
    }

    fn from_values(values: &[f64]) -> Self {
        Self {
            signal: values[0],
            toxicity: values[1],
            detectability: values[2],
            base_fitness: values[3],
        }
    }
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct PredatorTraits {
    /// Ability to detect prey.
    pub detection: f64,
    /// Fraction of ingested toxin that is neutralized.
    pub tolerance: f64,
}

impl PredatorTraits {
    /// Cost of eating one prey with the given toxicity.
    pub fn meal_cost(&self, toxicity: f64) -> f64 {
        toxicity * (1.0 - self.tolerance)
    }
}

impl TraitSet for PredatorTraits {
    const NAMES: &'static [&'static str] = &["detection", "tolerance"];

    fn values(&self) -> Vec<f64> {
        vec![self.detection, self.tolerance]
    }

    fn from_values(values: &[f64]) -> Self {
        Self {
            detection: values[0],
            tolerance: values[1],
        }
    }
}

/// Frequencies of the trait variants of one species.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct TraitDistribution<T> {
    variants: Vec<T>,
    freqs: Vec<f64>,
}

impl<T: TraitSet> TraitDistribution<T> {
    pub fn new(variants: Vec<T>, freqs: Vec<f64>) -> Self {
        debug_assert_eq!(variants.len(), freqs.len());
        Self { variants, freqs }
    }

    pub fn variants(&self) -> &[T] {
        &self.variants
    }

    pub fn freqs(&self) -> &[f64] {
        &self.freqs
    }

    pub fn len(&self) -> usize {
        self.variants.len()
    }

    /// Same variants with new frequencies.
    pub fn with_freqs(&self, freqs: Vec<f64>) -> Self {
        debug_assert_eq!(self.variants.len(), freqs.len());
        Self {
            variants: self.variants.clone(),
            freqs,
        }
    }

    /// Frequency-weighted mean of the variant traits.
    pub fn realize(&self) -> T {
        let mut mean = vec![0.0; T::NAMES.len()];
        for (var, &freq) in self.variants.iter().zip(&self.freqs) {
            for (acc, val) in mean.iter_mut().zip(var.values()) {
                *acc += freq * val;
            }
        }
        T::from_values(&mean)
    }
}

#[derive(Debug, PartialEq, Eq, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Prey,
    Predator,
}

#[derive(Debug, PartialEq, Clone)]
pub struct PreyCohort {
    pub growth_rate: f64,
    pub distribution: TraitDistribution<PreyTraits>,
    pub traits: PreyTraits,
}

#[derive(Debug, PartialEq, Clone)]
pub struct PredatorCohort {
    pub mortality: f64,
    pub efficiency: f64,
    pub attack_rate: f64,
    pub handling_time: f64,
    pub capture_success: f64,
    pub toxin_lethality: f64,
    pub sickness_duration: f64,
    /// Fraction of the cohort currently too sick to hunt.
    pub sick_fraction: f64,
    pub distribution: TraitDistribution<PredatorTraits>,
    pub traits: PredatorTraits,
}

/// Role-specific state of a species.
#[derive(Debug, PartialEq, Clone)]
pub enum Cohort {
    Prey(PreyCohort),
    Predator(PredatorCohort),
}

#[derive(Debug, PartialEq, Clone)]
pub struct Species {
    pub id: usize,
    pub name: String,
    pub population: f64,
    /// `None` when unbounded.
    pub carrying_capacity: Option<f64>,
    /// Locally extinct: the population stays at zero for the rest of the run.
    pub extinct: bool,
    pub cohort: Cohort,
}

impl Species {
    pub fn role(&self) -> Role {
        match self.cohort {
            Cohort::Prey(_) => Role::Prey,
            Cohort::Predator(_) => Role::Predator,
        }
    }

    /// Variant frequencies regardless of role.
    pub fn freqs(&self) -> &[f64] {
        match &self.cohort {
            Cohort::Prey(prey) => prey.distribution.freqs(),
            Cohort::Predator(predator) => predator.distribution.freqs(),
        }
    }

    /// Realized trait values keyed by name.
    pub fn trait_map(&self) -> BTreeMap<String, f64> {
        match &self.cohort {
            Cohort::Prey(prey) => prey.traits.to_map(),
            Cohort::Predator(predator) => predator.traits.to_map(),
        }
    }

    /// Density of each variant.
    pub fn variant_densities(&self) -> Vec<f64> {
        self.freqs()
            .iter()
            .map(|freq| freq * self.population)
            .collect()
    }

    fn from_prey(id: usize, cfg: &PreyConfig, extinction_threshold: f64) -> Self {
        let distribution = TraitDistribution::new(
            cfg.variants.iter().map(|var| var.traits.clone()).collect(),
            cfg.variants.iter().map(|var| var.frequency).collect(),
        );
        let traits = distribution.realize();
        let extinct = cfg.population < extinction_threshold;
        Self {
            id,
            name: cfg.name.clone(),
            population: if extinct { 0.0 } else { cfg.population },
            carrying_capacity: cfg.carrying_capacity,
            extinct,
            cohort: Cohort::Prey(PreyCohort {
                growth_rate: cfg.growth_rate,
                distribution,
                traits,
            }),
        }
    }

    fn from_predator(id: usize, cfg: &PredatorConfig, extinction_threshold: f64) -> Self {
        let distribution = TraitDistribution::new(
            cfg.variants.iter().map(|var| var.traits.clone()).collect(),
            cfg.variants.iter().map(|var| var.frequency).collect(),
        );
        let traits = distribution.realize();
        let extinct = cfg.population < extinction_threshold;
        Self {
            id,
            name: cfg.name.clone(),
            population: if extinct { 0.0 } else { cfg.population },
            carrying_capacity: cfg.carrying_capacity,
            extinct,
            cohort: Cohort::Predator(PredatorCohort {
                mortality: cfg.mortality,
                efficiency: cfg.efficiency,
                attack_rate: cfg.attack_rate,
                handling_time: cfg.handling_time,
                capture_success: cfg.capture_success,
                toxin_lethality: cfg.toxin_lethality,
                sickness_duration: cfg.sickness_duration,
                sick_fraction: 0.0,
                distribution,
                traits,
            }),
        }
    }
}

/// All species of a run. Prey come first, then predators; `id` is the index.
#[derive(Debug, PartialEq, Clone, Default)]
pub struct SpeciesSet {
    pub species: Vec<Species>,
}

impl SpeciesSet {
    /// Validate the configuration and build the initial species set.
    pub fn initialize(cfg: &Config) -> Result<Self, SimError> {
        cfg.validate()?;

        let threshold = cfg.run.extinction_threshold;
        let mut species = Vec::with_capacity(cfg.prey.len() + cfg.predators.len());
        for prey in &cfg.prey {
            species.push(Species::from_prey(species.len(), prey, threshold));
        }
        for predator in &cfg.predators {
            species.push(Species::from_predator(species.len(), predator, threshold));
        }

        Ok(Self { species })
    }

    pub fn prey(&self) -> impl Iterator<Item = (&Species, &PreyCohort)> {
        self.species.iter().filter_map(|sp| match &sp.cohort {
            Cohort::Prey(prey) => Some((sp, prey)),
            Cohort::Predator(_) => None,
        })
    }

    pub fn predators(&self) -> impl Iterator<Item = (&Species, &PredatorCohort)> {
        self.species.iter().filter_map(|sp| match &sp.cohort {
            Cohort::Predator(predator) => Some((sp, predator)),
            Cohort::Prey(_) => None,
        })
    }

    /// Role whose species are all extinct, if any. Prey are checked first.
    pub fn extinct_role(&self) -> Option<Role> {
        [Role::Prey, Role::Predator].into_iter().find(|&role| {
            self.species
                .iter()
                .filter(|sp| sp.role() == role)
                .all(|sp| sp.population <= 0.0)
        })
    }
}

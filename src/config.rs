use crate::traits::{PredatorTraits, PreyTraits, TraitSet};
use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::{fmt::Debug, fs, ops::RangeBounds, path::Path};

/// Simulation configuration parameters.
///
/// Loaded from a TOML file and validated before use.
/// See [`Config::from_file`] for loading.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Seed of the random number generator.
    pub seed: u64,
    /// Declared predator/prey cardinality.
    pub topology: Topology,

    pub run: RunConfig,
    pub learning: LearningConfig,
    pub encounter: EncounterConfig,
    pub evolution: EvolutionConfig,

    pub prey: Vec<PreyConfig>,
    pub predators: Vec<PredatorConfig>,
}

/// Supported predator/prey cardinalities.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Topology {
    SinglePreySinglePredator,
    SinglePreyMultiPredator,
    MultiPreyMultiPredator,
    MultiPreySinglePredator,
}

impl Topology {
    /// Whether the topology declares more than one prey species.
    pub fn multi_prey(self) -> bool {
        matches!(
            self,
            Self::MultiPreyMultiPredator | Self::MultiPreySinglePredator
        )
    }

    /// Whether the topology declares more than one predator species.
    pub fn multi_predator(self) -> bool {
        matches!(
            self,
            Self::SinglePreyMultiPredator | Self::MultiPreyMultiPredator
        )
    }

    /// Check the number of prey and predator species against the topology.
    pub fn check(self, n_prey: usize, n_predators: usize) -> Result<()> {
        check_cardinality(n_prey, self.multi_prey()).context("invalid number of prey species")?;
        check_cardinality(n_predators, self.multi_predator())
            .context("invalid number of predator species")?;
        Ok(())
    }
}

/// Time step and run budget.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Integration time step.
    pub dt: f64,
    /// Number of generations.
    pub n_generations: usize,
    /// Number of time steps per generation.
    pub steps_per_generation: usize,
    /// Populations below this size are treated as extinct.
    #[serde(default = "default_extinction_threshold")]
    pub extinction_threshold: f64,
}

fn default_extinction_threshold() -> f64 {
    0.5
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct LearningConfig {
    /// Number of bins the signal range `[0, 1]` is discretized into.
    pub signal_bins: usize,
    /// Prior expected cost of attacking an unfamiliar signal.
    pub naive_cost: f64,
}

/// Law used to sample attack attempts.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sampling {
    Poisson,
    Binomial,
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct EncounterConfig {
    pub sampling: Sampling,
    /// How strongly a learned cost suppresses attacks (0 disables avoidance).
    pub aversion: f64,
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct EvolutionConfig {
    /// Exponent applied to relative fitness (0 is neutral).
    pub selection_strength: f64,
    /// Fraction of each generation redistributed uniformly over variants.
    pub mutation_rate: f64,
    /// Standard deviation of the log-normal drift noise.
    pub drift_std_dev: f64,
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct PreyConfig {
    pub name: String,
    pub population: f64,
    /// Unbounded when absent.
    pub carrying_capacity: Option<f64>,
    /// Intrinsic growth rate `r`.
    pub growth_rate: f64,
    pub variants: Vec<PreyVariant>,
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct PreyVariant {
    pub frequency: f64,
    #[serde(flatten)]
    pub traits: PreyTraits,
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct PredatorConfig {
    pub name: String,
    pub population: f64,
    /// Unbounded when absent.
    pub carrying_capacity: Option<f64>,
    /// Per capita death rate.
    pub mortality: f64,
    /// Conversion of consumed prey into new predators.
    pub efficiency: f64,
    /// Per capita search rate.
    pub attack_rate: f64,
    /// Time spent handling each detected prey.
    pub handling_time: f64,
    /// Probability that an attempted attack ends with the prey eaten.
    pub capture_success: f64,
    /// Predator deaths per unit of ingested toxin.
    pub toxin_lethality: f64,
    pub learning_rate: f64,
    pub forgetting_rate: f64,
    /// Mean number of steps a poisoned predator stops hunting (0 disables sickness).
    #[serde(default)]
    pub sickness_duration: f64,
    pub variants: Vec<PredatorVariant>,
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct PredatorVariant {
    pub frequency: f64,
    #[serde(flatten)]
    pub traits: PredatorTraits,
}

impl Config {
    /// Load a [`Config`] from a file.
    ///
    /// The file must be TOML-encoded and contain a serialized [`Config`].
    /// Performs validation on all parameters before returning.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, deserialized,
    /// or if the configuration values are invalid.
    pub fn from_file<P: AsRef<Path>>(file: P) -> Result<Self> {
        let file = file.as_ref();
        let contents =
            fs::read_to_string(file).with_context(|| format!("failed to read {file:?}"))?;

        let config = Self::from_toml(&contents)?;

        Ok(config)
    }

    /// Parse and validate a [`Config`] from a TOML string.
    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents).context("failed to deserialize config")?;

        config.validate().context("failed to validate config")?;

        Ok(config)
    }

    /// Copy of this configuration with a different seed.
    pub fn with_seed(&self, seed: u64) -> Self {
        Self {
            seed,
            ..self.clone()
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.topology
            .check(self.prey.len(), self.predators.len())
            .context("species do not match topology")?;

        check_num(self.run.dt, f64::MIN_POSITIVE..=1.0).context("invalid time step")?;
        check_num(self.run.n_generations, 1..100_000).context("invalid number of generations")?;
        check_num(self.run.steps_per_generation, 1..100_000)
            .context("invalid number of steps per generation")?;
        check_num(self.run.extinction_threshold, 0.0..1e6)
            .context("invalid extinction threshold")?;

        check_num(self.learning.signal_bins, 2..=1000).context("invalid number of signal bins")?;
        check_num(self.learning.naive_cost, 0.0..=1.0).context("invalid naive cost")?;

        check_num(self.encounter.aversion, 0.0..=1.0).context("invalid aversion")?;

        check_num(self.evolution.selection_strength, 0.0..=10.0)
            .context("invalid selection strength")?;
        check_num(self.evolution.mutation_rate, 0.0..1.0).context("invalid mutation rate")?;
        check_num(self.evolution.drift_std_dev, 0.0..1.0)
            .context("invalid drift standard deviation")?;

        for prey in &self.prey {
            self.check_prey(prey)
                .with_context(|| format!("invalid prey {:?}", prey.name))?;
        }
        for predator in &self.predators {
            self.check_predator(predator)
                .with_context(|| format!("invalid predator {:?}", predator.name))?;
        }

        Ok(())
    }

    fn check_prey(&self, prey: &PreyConfig) -> Result<()> {
        check_population(prey.population, prey.carrying_capacity)?;
        check_num(prey.growth_rate, 0.0..100.0).context("invalid growth rate")?;
        check_stable(self.run.dt, prey.growth_rate).context("unstable growth")?;

        let freqs: Vec<f64> = prey.variants.iter().map(|var| var.frequency).collect();
        check_vec(&freqs).context("invalid variant frequencies")?;
        for (i_var, var) in prey.variants.iter().enumerate() {
            var.traits
                .check()
                .with_context(|| format!("invalid variant {i_var}"))?;
        }

        Ok(())
    }

    fn check_predator(&self, predator: &PredatorConfig) -> Result<()> {
        check_population(predator.population, predator.carrying_capacity)?;
        check_num(predator.mortality, 0.0..100.0).context("invalid mortality")?;
        check_stable(self.run.dt, predator.mortality).context("unstable mortality")?;
        check_num(predator.efficiency, 0.0..=100.0).context("invalid efficiency")?;
        check_num(predator.attack_rate, 0.0..1e6).context("invalid attack rate")?;
        check_num(predator.handling_time, 0.0..1e6).context("invalid handling time")?;
        check_num(predator.capture_success, 0.0..=1.0).context("invalid capture success")?;
        check_num(predator.toxin_lethality, 0.0..=1.0).context("invalid toxin lethality")?;
        check_num(predator.learning_rate, 0.0..=1.0).context("invalid learning rate")?;
        check_num(predator.forgetting_rate, 0.0..1.0).context("invalid forgetting rate")?;
        check_num(predator.sickness_duration, 0.0..1e6).context("invalid sickness duration")?;

        let freqs: Vec<f64> = predator.variants.iter().map(|var| var.frequency).collect();
        check_vec(&freqs).context("invalid variant frequencies")?;
        for (i_var, var) in predator.variants.iter().enumerate() {
            var.traits
                .check()
                .with_context(|| format!("invalid variant {i_var}"))?;
        }

        Ok(())
    }
}

pub fn check_num<T, R>(num: T, range: R) -> Result<()>
where
    T: PartialOrd + Debug,
    R: RangeBounds<T> + Debug,
{
    if !range.contains(&num) {
        bail!("number must be in the range {range:?}, but is {num:?}");
    }
    Ok(())
}

/// Check that `vec` is a probability vector.
pub fn check_vec(vec: &[f64]) -> Result<()> {
    if vec.is_empty() {
        bail!("vector must not be empty");
    }
    if vec.iter().any(|&ele| !(ele >= 0.0)) {
        bail!("vector must have only non-negative elements");
    }
    let sum: f64 = vec.iter().sum();
    let tol = 1e-6;
    if (sum - 1.0).abs() > tol {
        bail!("vector must sum to 1.0 (tolerance: {tol}), but sums to {sum}");
    }
    Ok(())
}

fn check_cardinality(count: usize, multi: bool) -> Result<()> {
    if multi {
        check_num(count, 2..=16)
    } else {
        check_num(count, 1..=1)
    }
}

fn check_population(population: f64, carrying_capacity: Option<f64>) -> Result<()> {
    if let Some(capacity) = carrying_capacity {
        check_num(capacity, f64::MIN_POSITIVE..f64::INFINITY)
            .context("invalid carrying capacity")?;
        check_num(population, 0.0..=capacity).context("invalid initial population")?;
    } else {
        check_num(population, 0.0..f64::INFINITY).context("invalid initial population")?;
    }
    Ok(())
}

// Forward Euler keeps the sign of `dN = -rate * N * dt` only while `rate * dt < 1`.
fn check_stable(dt: f64, rate: f64) -> Result<()> {
    let product = dt * rate;
    if product >= 1.0 {
        bail!("time step {dt} times rate {rate} must be below 1.0, but is {product}");
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub const SINGLE_SINGLE: &str = r#"
seed = 42
topology = "single_prey_single_predator"

[run]
dt = 0.1
n_generations = 4
steps_per_generation = 50

[learning]
signal_bins = 11
naive_cost = 0.2

[encounter]
sampling = "poisson"
aversion = 0.9

[evolution]
selection_strength = 1.0
mutation_rate = 0.001
drift_std_dev = 0.0

[[prey]]
name = "moth"
population = 400.0
carrying_capacity = 1000.0
growth_rate = 1.0

[[prey.variants]]
frequency = 0.5
signal = 0.9
toxicity = 1.0
detectability = 0.3
base_fitness = 0.9

[[prey.variants]]
frequency = 0.5
signal = 0.1
toxicity = 0.0
detectability = 0.3
base_fitness = 1.0

[[predators]]
name = "bird"
population = 20.0
carrying_capacity = 200.0
mortality = 0.2
efficiency = 0.5
attack_rate = 0.02
handling_time = 0.1
capture_success = 0.6
toxin_lethality = 0.02
learning_rate = 0.5
forgetting_rate = 0.01
sickness_duration = 5.0

[[predators.variants]]
frequency = 1.0
detection = 0.8
tolerance = 0.0
"#;

    /// Single prey, single predator configuration used across tests.
    pub fn sample_config() -> Config {
        Config::from_toml(SINGLE_SINGLE).expect("failed to parse sample config")
    }

    /// Sample configuration reshaped to the given topology.
    pub fn config_with_topology(topology: Topology) -> Config {
        let mut cfg = sample_config();
        cfg.topology = topology;
        if topology.multi_prey() {
            let mut second = cfg.prey[0].clone();
            second.name = "beetle".to_string();
            second.population = 250.0;
            second.variants[0].traits.signal = 0.6;
            cfg.prey.push(second);
        }
        if topology.multi_predator() {
            let mut second = cfg.predators[0].clone();
            second.name = "lizard".to_string();
            second.population = 10.0;
            second.learning_rate = 0.1;
            cfg.predators.push(second);
        }
        cfg.validate().expect("reshaped config should be valid");
        cfg
    }

    #[test]
    fn parses_sample() {
        let cfg = sample_config();
        assert_eq!(cfg.topology, Topology::SinglePreySinglePredator);
        assert_eq!(cfg.encounter.sampling, Sampling::Poisson);
        assert_eq!(cfg.prey[0].variants.len(), 2);
        assert_eq!(cfg.prey[0].variants[0].traits.toxicity, 1.0);
        assert_eq!(cfg.predators[0].variants[0].traits.detection, 0.8);
        assert_eq!(cfg.run.extinction_threshold, 0.5);
    }

    #[test]
    fn accepts_all_topologies() {
        for topology in [
            Topology::SinglePreySinglePredator,
            Topology::SinglePreyMultiPredator,
            Topology::MultiPreyMultiPredator,
            Topology::MultiPreySinglePredator,
        ] {
            config_with_topology(topology);
        }
    }

    #[test]
    fn rejects_topology_mismatch() {
        let mut cfg = sample_config();
        cfg.topology = Topology::MultiPreySinglePredator;
        assert!(cfg.validate().is_err());

        let mut cfg = sample_config();
        cfg.predators.clear();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_trait_out_of_bounds() {
        let mut cfg = sample_config();
        cfg.prey[0].variants[0].traits.toxicity = 1.5;
        let err = cfg.validate().unwrap_err();
        assert!(format!("{err:#}").contains("toxicity"));
    }

    #[test]
    fn rejects_unstable_time_step() {
        let mut cfg = sample_config();
        cfg.prey[0].growth_rate = 12.0;
        let err = cfg.validate().unwrap_err();
        assert!(format!("{err:#}").contains("unstable growth"));
    }

    #[test]
    fn rejects_frequencies_not_summing_to_one() {
        let mut cfg = sample_config();
        cfg.prey[0].variants[0].frequency = 0.7;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_population_above_capacity() {
        let mut cfg = sample_config();
        cfg.prey[0].population = 2000.0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn with_seed_only_changes_seed() {
        let cfg = sample_config();
        let other = cfg.with_seed(7);
        assert_eq!(other.seed, 7);
        assert_eq!(other.with_seed(cfg.seed), cfg);
    }
}

//! Predator learning of signal/cost associations.

use crate::config::{Config, LearningConfig};
use crate::encounter::EncounterOutcome;
use crate::error::SimError;
use serde::{Deserialize, Serialize};

/// Range of learned cost estimates.
const COST_MIN: f64 = 0.0;
const COST_MAX: f64 = 1.0;

/// Learned expected cost of attacking each signal bin, for one predator species.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct LearningState {
    species_id: usize,
    costs: Vec<f64>,
    naive_cost: f64,
    learning_rate: f64,
    forgetting_rate: f64,
}

/// Compact view of a [`LearningState`] stored in the trajectory.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct LearningSummary {
    pub mean_cost: f64,
    pub max_cost: f64,
    pub costs: Vec<f64>,
}

impl LearningState {
    /// Naive state: every bin starts at the prior.
    pub fn new(
        species_id: usize,
        cfg: &LearningConfig,
        learning_rate: f64,
        forgetting_rate: f64,
    ) -> Self {
        Self {
            species_id,
            costs: vec![cfg.naive_cost; cfg.signal_bins],
            naive_cost: cfg.naive_cost,
            learning_rate,
            forgetting_rate,
        }
    }

    /// One naive state per predator species, in species order.
    pub fn for_predators(cfg: &Config) -> Vec<Self> {
        let first_id = cfg.prey.len();
        cfg.predators
            .iter()
            .enumerate()
            .map(|(idx, predator)| {
                Self::new(
                    first_id + idx,
                    &cfg.learning,
                    predator.learning_rate,
                    predator.forgetting_rate,
                )
            })
            .collect()
    }

    pub fn species_id(&self) -> usize {
        self.species_id
    }

    pub fn costs(&self) -> &[f64] {
        &self.costs
    }

    /// Bin of a signal value in `[0, 1]`.
    pub fn bin(&self, signal: f64) -> usize {
        let last = self.costs.len() - 1;
        let bin = (signal.clamp(0.0, 1.0) * last as f64).round() as usize;
        bin.min(last)
    }

    /// Learned cost of attacking prey showing `signal`.
    pub fn cost(&self, signal: f64) -> f64 {
        self.costs[self.bin(signal)]
    }

    /// Apply one step of forgetting followed by the outcomes of this predator.
    ///
    /// Each successful attack moves the estimate of its signal bin toward the
    /// realized meal cost by the learning rate. Failed captures carry no
    /// taste information.
    pub fn update(&self, outcomes: &[EncounterOutcome]) -> Result<Self, SimError> {
        let mut next = self.clone();

        for cost in &mut next.costs {
            *cost += self.forgetting_rate * (self.naive_cost - *cost);
        }

        for outcome in outcomes {
            if outcome.predator_id != self.species_id || outcome.successful == 0 {
                continue;
            }
            let bin = next.bin(outcome.signal);
            let weight = 1.0 - (1.0 - self.learning_rate).powf(outcome.successful as f64);
            let cost = &mut next.costs[bin];
            *cost += weight * (outcome.realized_cost - *cost);
        }

        for (bin, cost) in next.costs.iter_mut().enumerate() {
            if !cost.is_finite() {
                return Err(SimError::instability(format!(
                    "learned cost of species {} diverged in bin {bin}: {cost}",
                    self.species_id
                )));
            }
            *cost = cost.clamp(COST_MIN, COST_MAX);
        }

        Ok(next)
    }

    pub fn summary(&self) -> LearningSummary {
        let costs = self.costs();
        let mean_cost = costs.iter().sum::<f64>() / costs.len() as f64;
        let max_cost = costs.iter().copied().fold(COST_MIN, f64::max);
        LearningSummary {
            mean_cost,
            max_cost,
            costs: costs.to_vec(),
        }
    }
}

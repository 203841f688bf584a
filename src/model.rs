//! Trajectory data types.

use crate::learning::{LearningState, LearningSummary};
use crate::traits::{Cohort, Role, SpeciesSet};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// State of one species at a given step.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct SpeciesRecord {
    pub id: usize,
    pub name: String,
    pub role: Role,
    pub population: f64,

    /// Realized (frequency-weighted mean) trait values.
    pub traits: BTreeMap<String, f64>,

    /// Current trait-variant frequencies.
    pub freqs: Vec<f64>,

    /// Learned costs; predators only.
    pub learning: Option<LearningSummary>,

    /// Fraction of the cohort too sick to hunt; predators only.
    pub sick_fraction: Option<f64>,
}

/// Record of the simulation at a single step.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    /// Current simulation step.
    pub step: usize,

    /// Generation the step belongs to.
    pub generation: usize,

    /// Simulated time (`step * dt`).
    pub time: f64,

    pub species: Vec<SpeciesRecord>,
}

impl Snapshot {
    pub fn capture(
        step: usize,
        generation: usize,
        time: f64,
        species: &SpeciesSet,
        learning: &[LearningState],
    ) -> Self {
        let species = species
            .species
            .iter()
            .map(|sp| {
                let (learning, sick_fraction) = match &sp.cohort {
                    Cohort::Prey(_) => (None, None),
                    Cohort::Predator(predator) => (
                        learning
                            .iter()
                            .find(|st| st.species_id() == sp.id)
                            .map(LearningState::summary),
                        Some(predator.sick_fraction),
                    ),
                };
                SpeciesRecord {
                    id: sp.id,
                    name: sp.name.clone(),
                    role: sp.role(),
                    population: sp.population,
                    traits: sp.trait_map(),
                    freqs: sp.freqs().to_vec(),
                    learning,
                    sick_fraction,
                }
            })
            .collect();
        Self {
            step,
            generation,
            time,
            species,
        }
    }
}

/// Append-only sequence of snapshots produced by one run.
#[derive(Debug, PartialEq, Clone, Default, Serialize, Deserialize)]
pub struct Trajectory {
    snapshots: Vec<Snapshot>,
}

impl Trajectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, snapshot: Snapshot) {
        self.snapshots.push(snapshot);
    }

    pub fn snapshots(&self) -> &[Snapshot] {
        &self.snapshots
    }

    pub fn last(&self) -> Option<&Snapshot> {
        self.snapshots.last()
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }
}

/// Lifecycle of a run.
///
/// A run that has not been configured yet has no engine at all.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Status {
    Configured,
    Running,
    /// The step and generation budget was exhausted.
    Completed,
    /// Every species of `role` reached zero.
    Extinct { role: Role, step: usize },
    /// A child component reported an unrecoverable numerical failure.
    Aborted { step: usize, reason: String },
}

impl Status {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Extinct { .. } | Self::Aborted { .. }
        )
    }
}

/// Terminal status and trajectory of a finished run.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub seed: u64,
    pub status: Status,
    pub trajectory: Trajectory,
}

use crate::config::Config;
use crate::dynamics;
use crate::encounter;
use crate::error::SimError;
use crate::evolution::{self, FitnessLedger};
use crate::learning::LearningState;
use crate::model::{RunReport, Snapshot, Status, Trajectory};
use crate::traits::SpeciesSet;
use rand::prelude::*;
use rand_chacha::ChaCha12Rng;

/// Simulation engine.
///
/// Holds the configuration, species, learning states and random number
/// generator of a single run, and drives it to a terminal [`Status`].
pub struct Engine {
    cfg: Config,
    species: SpeciesSet,
    learning: Vec<LearningState>,
    rng: ChaCha12Rng,
    trajectory: Trajectory,
    status: Status,
    step: usize,
}

impl Engine {
    /// Validate the configuration and build a `Configured` engine.
    pub fn configure(cfg: Config) -> Result<Self, SimError> {
        let species = SpeciesSet::initialize(&cfg)?;
        let learning = LearningState::for_predators(&cfg);
        let rng = ChaCha12Rng::seed_from_u64(cfg.seed);

        Ok(Self {
            cfg,
            species,
            learning,
            rng,
            trajectory: Trajectory::new(),
            status: Status::Configured,
            step: 0,
        })
    }

    pub fn status(&self) -> &Status {
        &self.status
    }

    /// Run the simulation until the budget is exhausted, a role goes extinct
    /// or a component fails.
    pub fn run(mut self) -> RunReport {
        self.status = Status::Running;
        log::info!("running seed {}", self.cfg.seed);

        self.status = self.run_loop();
        debug_assert!(self.status.is_terminal());

        if let Some(last) = self.trajectory.last() {
            log::debug!(
                "recorded {} snapshots, last at time {:.3}",
                self.trajectory.len(),
                last.time
            );
        }
        match self.status() {
            Status::Completed => log::info!("completed {} steps", self.step),
            Status::Extinct { role, step } => log::warn!("{role:?} extinct at step {step}"),
            Status::Aborted { step, reason } => log::warn!("aborted at step {step}: {reason}"),
            Status::Configured | Status::Running => {}
        }

        RunReport {
            seed: self.cfg.seed,
            status: self.status,
            trajectory: self.trajectory,
        }
    }

    fn run_loop(&mut self) -> Status {
        self.record(0);
        if let Some(role) = self.species.extinct_role() {
            return Status::Extinct { role, step: 0 };
        }

        let n_generations = self.cfg.run.n_generations;
        let steps_per_generation = self.cfg.run.steps_per_generation;
        for generation in 0..n_generations {
            let mut ledger = FitnessLedger::new(&self.species);

            for i_step in 0..steps_per_generation {
                self.step += 1;

                if let Err(err) = self.perform_step(&mut ledger) {
                    return aborted(err.at_step(self.step));
                }

                // The last snapshot of a generation carries the selected frequencies.
                if i_step + 1 == steps_per_generation {
                    if let Err(err) = evolution::evolve(
                        &mut self.species,
                        &ledger,
                        &self.cfg.evolution,
                        &mut self.rng,
                    ) {
                        return aborted(err.at_step(self.step));
                    }
                }
                self.record(generation);

                if let Some(role) = self.species.extinct_role() {
                    return Status::Extinct {
                        role,
                        step: self.step,
                    };
                }
            }

            let progress = 100.0 * (generation + 1) as f64 / n_generations as f64;
            log::info!("completed {progress:06.2}%");
        }

        Status::Completed
    }

    fn perform_step(&mut self, ledger: &mut FitnessLedger) -> Result<(), SimError> {
        // Sample encounters from the current populations and learned costs.
        let report = encounter::step(&self.species, &self.learning, &self.cfg, &mut self.rng)?;
        log::debug!(
            "step {}: {} encounter outcomes",
            self.step,
            report.outcomes.len()
        );

        // Predators learn from this step's outcomes.
        self.learning = self
            .learning
            .iter()
            .map(|state| state.update(&report.outcomes))
            .collect::<Result<_, _>>()?;

        // Selection sees the populations the encounters were sampled from.
        ledger.record(&self.species, &report.deltas);

        let species = std::mem::take(&mut self.species);
        self.species = dynamics::advance(species, &report.deltas, &self.cfg)?;

        Ok(())
    }

    fn record(&mut self, generation: usize) {
        let snapshot = Snapshot::capture(
            self.step,
            generation,
            self.step as f64 * self.cfg.run.dt,
            &self.species,
            &self.learning,
        );
        self.trajectory.push(snapshot);
    }
}

fn aborted(err: SimError) -> Status {
    match err {
        SimError::NumericalInstability { step, reason } => Status::Aborted { step, reason },
        SimError::Configuration(reason) => Status::Aborted { step: 0, reason },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Topology;
    use crate::config::tests::{config_with_topology, sample_config};
    use crate::traits::{Cohort, Role, TraitDistribution};

    fn run(cfg: Config) -> RunReport {
        Engine::configure(cfg).unwrap().run()
    }

    #[test]
    fn configure_rejects_invalid_config() {
        let mut cfg = sample_config();
        cfg.run.dt = 2.0;
        assert!(matches!(
            Engine::configure(cfg),
            Err(SimError::Configuration(_))
        ));
    }

    #[test]
    fn configured_engine_reports_status() {
        let engine = Engine::configure(sample_config()).unwrap();
        assert_eq!(engine.status(), &Status::Configured);
        assert!(!engine.status().is_terminal());
    }

    #[test]
    fn same_seed_gives_identical_trajectories() {
        let cfg = config_with_topology(Topology::MultiPreyMultiPredator);
        let a = run(cfg.clone());
        let b = run(cfg.clone());
        assert_eq!(a, b);

        let c = run(cfg.with_seed(cfg.seed + 1));
        assert_ne!(a.trajectory, c.trajectory);
    }

    #[test]
    fn all_topologies_run_to_a_terminal_state() {
        for topology in [
            Topology::SinglePreySinglePredator,
            Topology::SinglePreyMultiPredator,
            Topology::MultiPreyMultiPredator,
            Topology::MultiPreySinglePredator,
        ] {
            let report = run(config_with_topology(topology));
            assert!(report.status.is_terminal());
            assert!(!matches!(report.status, Status::Aborted { .. }));
            assert!(!report.trajectory.is_empty());
        }
    }

    #[test]
    fn completed_run_has_one_snapshot_per_step() {
        let cfg = sample_config();
        let n_steps = cfg.run.n_generations * cfg.run.steps_per_generation;
        let report = run(cfg);
        assert_eq!(report.status, Status::Completed);
        assert_eq!(report.trajectory.len(), n_steps + 1);
        for (idx, snap) in report.trajectory.snapshots().iter().enumerate() {
            assert_eq!(snap.step, idx);
        }
    }

    #[test]
    fn generation_update_reaches_trajectory() {
        let cfg = sample_config();
        let steps_per_generation = cfg.run.steps_per_generation;
        let report = run(cfg);
        assert_eq!(report.status, Status::Completed);

        let snaps = report.trajectory.snapshots();
        let prey_freqs = |idx: usize| snaps[idx].species[0].freqs.clone();

        // Frequencies only move at generation boundaries.
        assert_eq!(prey_freqs(1), prey_freqs(steps_per_generation - 1));
        assert_ne!(
            prey_freqs(steps_per_generation),
            prey_freqs(steps_per_generation - 1)
        );
        let n_snaps = snaps.len();
        assert_ne!(prey_freqs(n_snaps - 1), prey_freqs(n_snaps - 2));
    }

    #[test]
    fn instability_aborts_at_offending_step() {
        let cfg = sample_config();
        let steps_per_generation = cfg.run.steps_per_generation;
        let mut engine = Engine::configure(cfg).unwrap();
        match &mut engine.species.species[0].cohort {
            Cohort::Prey(prey) => {
                let mut variants = prey.distribution.variants().to_vec();
                variants[1].base_fitness = f64::NAN;
                let freqs = prey.distribution.freqs().to_vec();
                prey.distribution = TraitDistribution::new(variants, freqs);
            }
            Cohort::Predator(_) => unreachable!(),
        }

        let report = engine.run();
        match &report.status {
            Status::Aborted { step, reason } => {
                assert_eq!(*step, steps_per_generation);
                assert!(reason.contains("fitness"));
            }
            other => panic!("expected an aborted run, got {other:?}"),
        }
        let last = report.trajectory.last().unwrap();
        assert_eq!(last.step, steps_per_generation - 1);
        assert_eq!(report.trajectory.len(), steps_per_generation);
    }

    #[test]
    fn aborted_keeps_instability_step() {
        let status = aborted(SimError::instability("population is inf").at_step(12));
        assert_eq!(
            status,
            Status::Aborted {
                step: 12,
                reason: "population is inf".to_string()
            }
        );
        assert!(status.is_terminal());
    }

    #[test]
    fn populations_stay_within_bounds() {
        for topology in [
            Topology::SinglePreySinglePredator,
            Topology::MultiPreyMultiPredator,
        ] {
            let cfg = config_with_topology(topology);
            let caps: Vec<Option<f64>> = cfg
                .prey
                .iter()
                .map(|prey| prey.carrying_capacity)
                .chain(cfg.predators.iter().map(|pred| pred.carrying_capacity))
                .collect();
            let report = run(cfg);
            for snap in report.trajectory.snapshots() {
                for (rec, cap) in snap.species.iter().zip(&caps) {
                    assert!(rec.population >= 0.0);
                    if let Some(cap) = cap {
                        assert!(rec.population <= *cap);
                    }
                }
            }
        }
    }

    #[test]
    fn frequencies_sum_to_one_every_generation() {
        let mut cfg = config_with_topology(Topology::MultiPreyMultiPredator);
        cfg.evolution.drift_std_dev = 0.2;
        let report = run(cfg);
        for snap in report.trajectory.snapshots() {
            for rec in &snap.species {
                let sum: f64 = rec.freqs.iter().sum();
                assert!((sum - 1.0).abs() < 1e-6);
            }
        }
    }

    #[test]
    fn zero_learning_rate_keeps_naive_costs() {
        let mut cfg = sample_config();
        cfg.predators[0].learning_rate = 0.0;
        let naive = cfg.learning.naive_cost;
        let report = run(cfg);
        for snap in report.trajectory.snapshots() {
            let learning = snap.species[1].learning.as_ref().unwrap();
            assert!(learning.costs.iter().all(|&c| c == naive));
        }
    }

    #[test]
    fn lone_empty_prey_goes_extinct_immediately() {
        let mut cfg = sample_config();
        cfg.prey[0].population = 0.0;
        let report = run(cfg);
        assert_eq!(
            report.status,
            Status::Extinct {
                role: Role::Prey,
                step: 0
            }
        );
        assert_eq!(report.trajectory.len(), 1);
    }

    #[test]
    fn empty_prey_species_never_regrows() {
        let mut cfg = config_with_topology(Topology::MultiPreySinglePredator);
        cfg.prey[1].population = 0.0;
        let report = run(cfg);
        for snap in report.trajectory.snapshots() {
            assert_eq!(snap.species[1].population, 0.0);
        }
    }

    #[test]
    fn toxic_prey_is_learned_and_slows_predator_growth() {
        let mut toxic = sample_config();
        toxic.run.n_generations = 2;
        toxic.prey[0].variants[0].traits.toxicity = 1.0;
        toxic.prey[0].variants[1].traits.toxicity = 1.0;
        toxic.predators[0].learning_rate = 0.5;
        toxic.predators[0].forgetting_rate = 0.001;

        let mut control = toxic.clone();
        control.prey[0].variants[0].traits.toxicity = 0.0;
        control.prey[0].variants[1].traits.toxicity = 0.0;

        let toxic_report = run(toxic.clone());
        let control_report = run(control);

        let last = toxic_report.trajectory.last().unwrap();
        let learning = last.species[1].learning.as_ref().unwrap();
        let bright_bin = (0.9 * (toxic.learning.signal_bins - 1) as f64).round() as usize;
        assert!(learning.costs[bright_bin] > 0.5);

        let growth = |report: &RunReport| {
            let snaps = report.trajectory.snapshots();
            let first = snaps[0].species[1].population;
            let last = snaps[snaps.len() - 1].species[1].population;
            last - first
        };
        assert!(growth(&toxic_report) < growth(&control_report));
    }
}

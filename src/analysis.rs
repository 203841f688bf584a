use crate::model::{RunReport, Snapshot};
use crate::stats::{Accumulator, TimeSeries, pearson};
use crate::traits::Role;
use anyhow::{Context, Result};
use rmp_serde::decode;
use std::{
    collections::BTreeMap,
    fs::File,
    io::{BufReader, BufWriter},
    path::Path,
};

pub trait Obs {
    fn update(&mut self, snapshot: &Snapshot);
    fn report(&self) -> serde_json::Value;
}

/// Population time series of every species.
pub struct Population {
    series: BTreeMap<String, TimeSeries>,
}

impl Population {
    pub fn new() -> Self {
        Self {
            series: BTreeMap::new(),
        }
    }
}

impl Obs for Population {
    fn update(&mut self, snapshot: &Snapshot) {
        for rec in &snapshot.species {
            self.series
                .entry(rec.name.clone())
                .or_default()
                .push(rec.population);
        }
    }

    fn report(&self) -> serde_json::Value {
        let reports: BTreeMap<_, _> = self
            .series
            .iter()
            .map(|(name, series)| (name, series.report()))
            .collect();
        serde_json::json!({ "population": reports })
    }
}

/// Time-averaged realized traits of every species.
pub struct AvgTraits {
    acc_map: BTreeMap<String, BTreeMap<String, Accumulator>>,
}

impl AvgTraits {
    pub fn new() -> Self {
        Self {
            acc_map: BTreeMap::new(),
        }
    }
}

impl Obs for AvgTraits {
    fn update(&mut self, snapshot: &Snapshot) {
        for rec in &snapshot.species {
            let accs = self.acc_map.entry(rec.name.clone()).or_default();
            for (name, &val) in &rec.traits {
                accs.entry(name.clone()).or_default().add(val);
            }
        }
    }

    fn report(&self) -> serde_json::Value {
        let reports: BTreeMap<_, BTreeMap<_, _>> = self
            .acc_map
            .iter()
            .map(|(species, accs)| {
                (
                    species,
                    accs.iter().map(|(name, acc)| (name, acc.report())).collect(),
                )
            })
            .collect();
        serde_json::json!({ "avg_traits": reports })
    }
}

/// Mean learned cost of every predator.
pub struct LearnedCost {
    acc_map: BTreeMap<String, Accumulator>,
}

impl LearnedCost {
    pub fn new() -> Self {
        Self {
            acc_map: BTreeMap::new(),
        }
    }
}

impl Obs for LearnedCost {
    fn update(&mut self, snapshot: &Snapshot) {
        for rec in &snapshot.species {
            if let Some(learning) = &rec.learning {
                self.acc_map
                    .entry(rec.name.clone())
                    .or_default()
                    .add(learning.mean_cost);
            }
        }
    }

    fn report(&self) -> serde_json::Value {
        let reports: BTreeMap<_, _> = self
            .acc_map
            .iter()
            .map(|(name, acc)| (name, acc.report()))
            .collect();
        serde_json::json!({ "learned_cost": reports })
    }
}

/// Time-averaged traits and population of one prey species in one run.
struct PreyOutcome {
    traits: BTreeMap<String, f64>,
    population: f64,
}

/// Analyzes finished runs and correlates prey traits with population success.
pub struct Analyzer {
    runs: Vec<serde_json::Value>,
    prey_outcomes: Vec<PreyOutcome>,
}

impl Analyzer {
    pub fn new() -> Self {
        Self {
            runs: Vec::new(),
            prey_outcomes: Vec::new(),
        }
    }

    pub fn add_file<P: AsRef<Path>>(&mut self, file: P) -> Result<()> {
        let file = file.as_ref();
        let file = File::open(file).with_context(|| format!("failed to open {file:?}"))?;
        let mut reader = BufReader::new(file);

        let report: RunReport =
            decode::from_read(&mut reader).context("failed to deserialize run report")?;
        self.add_report(&report);
        Ok(())
    }

    pub fn add_report(&mut self, report: &RunReport) {
        if report.trajectory.is_empty() {
            log::warn!("skipping run with seed {}: empty trajectory", report.seed);
            return;
        }

        let mut obs_ptr_vec: Vec<Box<dyn Obs>> = vec![
            Box::new(Population::new()),
            Box::new(AvgTraits::new()),
            Box::new(LearnedCost::new()),
        ];

        let mut prey_accs: BTreeMap<usize, (BTreeMap<String, Accumulator>, Accumulator)> =
            BTreeMap::new();

        for snapshot in report.trajectory.snapshots() {
            for obs in &mut obs_ptr_vec {
                obs.update(snapshot);
            }
            for rec in snapshot.species.iter().filter(|rec| rec.role == Role::Prey) {
                let (trait_accs, pop_acc) = prey_accs.entry(rec.id).or_default();
                for (name, &val) in &rec.traits {
                    trait_accs.entry(name.clone()).or_default().add(val);
                }
                pop_acc.add(rec.population);
            }
        }

        for (trait_accs, pop_acc) in prey_accs.into_values() {
            self.prey_outcomes.push(PreyOutcome {
                traits: trait_accs
                    .into_iter()
                    .map(|(name, acc)| (name, acc.mean()))
                    .collect(),
                population: pop_acc.mean(),
            });
        }

        let obs_reports: Vec<_> = obs_ptr_vec.iter().map(|obs| obs.report()).collect();
        self.runs.push(serde_json::json!({
            "seed": report.seed,
            "status": report.status,
            "observables": obs_reports,
        }));
    }

    /// Pearson correlation of each prey trait with mean prey population across runs.
    pub fn trait_correlations(&self) -> BTreeMap<String, f64> {
        let mut names: Vec<&String> = self
            .prey_outcomes
            .iter()
            .flat_map(|out| out.traits.keys())
            .collect();
        names.sort();
        names.dedup();

        names
            .into_iter()
            .map(|name| {
                let (xs, ys): (Vec<f64>, Vec<f64>) = self
                    .prey_outcomes
                    .iter()
                    .filter_map(|out| out.traits.get(name).map(|&val| (val, out.population)))
                    .unzip();
                (name.clone(), pearson(&xs, &ys))
            })
            .collect()
    }

    pub fn results(&self) -> serde_json::Value {
        let correlations: BTreeMap<_, _> = self
            .trait_correlations()
            .into_iter()
            .map(|(name, r)| (name, if r.is_finite() { Some(r) } else { None }))
            .collect();
        serde_json::json!({
            "runs": self.runs,
            "trait_population_correlation": correlations,
        })
    }

    pub fn save_results<P: AsRef<Path>>(&self, file: P) -> Result<()> {
        let file = file.as_ref();
        let file = File::create(file).with_context(|| format!("failed to create {file:?}"))?;
        let writer = BufWriter::new(file);
        serde_json::to_writer_pretty(writer, &self.results())
            .context("failed to serialize results")?;
        Ok(())
    }
}

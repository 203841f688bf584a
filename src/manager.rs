use crate::analysis::Analyzer;
use crate::config::Config;
use crate::engine::Engine;
use crate::model::RunReport;
use anyhow::{Context, Result};
use glob::glob;
use rayon::prelude::*;
use rmp_serde::encode;
use std::{
    fs::{self, File},
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};

pub struct Manager {
    sim_dir: PathBuf,
    cfg: Config,
}

impl Manager {
    pub fn new<P: AsRef<Path>>(sim_dir: P) -> Result<Self> {
        let sim_dir = sim_dir.as_ref().to_path_buf();

        let cfg =
            Config::from_file(sim_dir.join("config.toml")).context("failed to construct cfg")?;
        log::info!("{cfg:#?}");

        Ok(Self { sim_dir, cfg })
    }

    /// Perform one new run.
    pub fn create_run(&self) -> Result<()> {
        let run_idx = self.count_run_dirs().context("failed to count run dirs")?;
        self.perform_run(run_idx)
    }

    /// Perform `n_runs` new independent runs in parallel.
    pub fn sweep(&self, n_runs: usize) -> Result<()> {
        let first_idx = self.count_run_dirs().context("failed to count run dirs")?;
        log::info!("sweeping runs {first_idx}..{}", first_idx + n_runs);

        (first_idx..first_idx + n_runs)
            .into_par_iter()
            .try_for_each(|run_idx| {
                self.perform_run(run_idx)
                    .with_context(|| format!("failed to perform run {run_idx}"))
            })?;

        Ok(())
    }

    /// Analyze every run and save the results.
    pub fn analyze_sim(&self) -> Result<()> {
        let n_runs = self.count_run_dirs().context("failed to count run dirs")?;

        let mut analyzer = Analyzer::new();
        for run_idx in 0..n_runs {
            let file = self.trajectory_file(run_idx);
            analyzer
                .add_file(&file)
                .with_context(|| format!("failed to add {file:?}"))?;
        }

        let results_file = self.results_file();
        analyzer
            .save_results(&results_file)
            .context("failed to save results")?;
        log::info!("saved {results_file:?}");

        Ok(())
    }

    /// Remove every run and the analysis results.
    pub fn clean_sim(&self) -> Result<()> {
        for run_dir in self.run_dirs().context("failed to list run dirs")? {
            fs::remove_dir_all(&run_dir)
                .with_context(|| format!("failed to remove {run_dir:?}"))?;
            log::info!("removed {run_dir:?}");
        }

        let results_file = self.results_file();
        if results_file.exists() {
            fs::remove_file(&results_file)
                .with_context(|| format!("failed to remove {results_file:?}"))?;
            log::info!("removed {results_file:?}");
        }

        Ok(())
    }

    fn perform_run(&self, run_idx: usize) -> Result<()> {
        let run_dir = self.run_dir(run_idx);
        fs::create_dir_all(&run_dir).with_context(|| format!("failed to create {run_dir:?}"))?;
        log::info!("created {run_dir:?}");

        let seed = self.cfg.seed.wrapping_add(run_idx as u64);
        let engine = Engine::configure(self.cfg.with_seed(seed))
            .context("failed to configure engine")?;
        let report = engine.run();

        save_report(&report, self.trajectory_file(run_idx)).context("failed to save report")?;

        Ok(())
    }

    fn run_dirs(&self) -> Result<Vec<PathBuf>> {
        let pattern = self.sim_dir.join("run-*");
        let pattern = pattern.to_str().context("pattern is not valid UTF-8")?;
        let mut dirs: Vec<PathBuf> = glob(pattern)
            .context("failed to glob run dirs")?
            .filter_map(Result::ok)
            .filter(|p| p.is_dir())
            .collect();
        dirs.sort();
        Ok(dirs)
    }

    fn count_run_dirs(&self) -> Result<usize> {
        Ok(self.run_dirs()?.len())
    }

    fn run_dir(&self, run_idx: usize) -> PathBuf {
        self.sim_dir.join(format!("run-{run_idx:04}"))
    }

    fn trajectory_file(&self, run_idx: usize) -> PathBuf {
        self.run_dir(run_idx).join("trajectory.msgpack")
    }

    fn results_file(&self) -> PathBuf {
        self.sim_dir.join("analysis.json")
    }
}

fn save_report<P: AsRef<Path>>(report: &RunReport, file: P) -> Result<()> {
    let file = file.as_ref();
    let file = File::create(file).with_context(|| format!("failed to create {file:?}"))?;
    let mut writer = BufWriter::new(file);
    encode::write_named(&mut writer, report).context("failed to serialize report")?;
    writer.flush().context("failed to flush writer stream")?;
    Ok(())
}

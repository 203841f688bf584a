use serde::{Deserialize, Serialize};

/// Running mean and variance (Welford).
#[derive(Debug, Clone, Default)]
pub struct Accumulator {
    n_vals: usize,
    mean: f64,
    diff_2_sum: f64,
}

#[derive(Debug, PartialEq, Serialize, Deserialize)]
pub struct AccumulatorReport {
    pub mean: f64,
    pub std_dev: f64,
}

impl Accumulator {
    pub fn add(&mut self, val: f64) {
        self.n_vals += 1;

        let diff_a = val - self.mean;
        self.mean += diff_a / self.n_vals as f64;

        let diff_b = val - self.mean;
        self.diff_2_sum += diff_a * diff_b;
    }

    pub fn mean(&self) -> f64 {
        if self.n_vals == 0 {
            f64::NAN
        } else {
            self.mean
        }
    }

    pub fn report(&self) -> AccumulatorReport {
        AccumulatorReport {
            mean: self.mean(),
            std_dev: if self.n_vals > 1 {
                (self.diff_2_sum / (self.n_vals as f64 - 1.0)).sqrt()
            } else {
                f64::NAN
            },
        }
    }
}

/// Population time series of one species.
#[derive(Debug, Clone, Default)]
pub struct TimeSeries {
    vals: Vec<f64>,
}

#[derive(Debug, PartialEq, Serialize, Deserialize)]
pub struct TimeSeriesReport {
    pub mean: f64,
    pub std_dev: f64,
    pub sem: f64,
    /// Initial transient was detected and discarded.
    pub is_equil: bool,
    pub final_val: f64,
}

impl TimeSeries {
    pub fn push(&mut self, val: f64) {
        self.vals.push(val);
    }

    pub fn report(&self) -> TimeSeriesReport {
        let final_val = self.vals.last().copied().unwrap_or(f64::NAN);
        if self.vals.is_empty() {
            return TimeSeriesReport {
                mean: f64::NAN,
                std_dev: f64::NAN,
                sem: f64::NAN,
                is_equil: false,
                final_val,
            };
        }
        let i_equil = compute_opt_i_equil(&self.vals);
        let equil = &self.vals[i_equil..];
        TimeSeriesReport {
            mean: compute_mean(equil),
            std_dev: compute_var(equil).sqrt(),
            sem: compute_sem(equil),
            is_equil: i_equil != self.vals.len() / 2,
            final_val,
        }
    }
}

/// Pearson correlation coefficient of paired samples.
///
/// Returns NaN with fewer than two pairs or a constant sample.
pub fn pearson(xs: &[f64], ys: &[f64]) -> f64 {
    let n_vals = xs.len().min(ys.len());
    if n_vals < 2 {
        return f64::NAN;
    }
    let (xs, ys) = (&xs[..n_vals], &ys[..n_vals]);
    let mean_x = compute_mean(xs);
    let mean_y = compute_mean(ys);

    let mut cov = 0.0;
    let mut var_x = 0.0;
    let mut var_y = 0.0;
    for (&x, &y) in xs.iter().zip(ys) {
        cov += (x - mean_x) * (y - mean_y);
        var_x += (x - mean_x).powi(2);
        var_y += (y - mean_y).powi(2);
    }
    if var_x == 0.0 || var_y == 0.0 {
        return f64::NAN;
    }
    cov / (var_x * var_y).sqrt()
}

fn compute_mean(vals: &[f64]) -> f64 {
    if vals.is_empty() {
        return f64::NAN;
    }
    vals.iter().sum::<f64>() / vals.len() as f64
}

fn compute_var(vals: &[f64]) -> f64 {
    let n_vals = vals.len();
    if n_vals < 2 {
        return f64::NAN;
    }
    let mean = compute_mean(vals);
    vals.iter().map(|&val| (val - mean).powi(2)).sum::<f64>() / (n_vals - 1) as f64
}

/// Standard error of the mean by Flyvbjerg-Petersen blocking.
fn compute_sem(vals: &[f64]) -> f64 {
    let mut blocked = vals.to_vec();
    let mut sem2_ests = Vec::new();
    let mut sem2_errs = Vec::new();

    while blocked.len() >= 2 {
        let n_vals = blocked.len() as f64;
        let sem2_est = compute_var(&blocked) / n_vals;
        sem2_ests.push(sem2_est);
        sem2_errs.push(sem2_est * (2.0 / (n_vals - 1.0)).sqrt());

        blocked = blocked
            .chunks_exact(2)
            .map(|pair| (pair[0] + pair[1]) / 2.0)
            .collect();
    }

    // First blocking level whose estimate lies above every later lower bound.
    for (idx, &sem2_est) in sem2_ests.iter().enumerate() {
        let max_low = sem2_ests[idx..]
            .iter()
            .zip(&sem2_errs[idx..])
            .map(|(est, err)| est - err)
            .fold(f64::NEG_INFINITY, f64::max);
        if sem2_est > max_low {
            return sem2_est.sqrt();
        }
    }

    sem2_ests.last().copied().unwrap_or(f64::NAN).sqrt()
}

/// Start of the equilibrated region by the marginal standard error rule.
fn compute_opt_i_equil(vals: &[f64]) -> usize {
    let n_vals = vals.len();
    let mut opt_i_equil = n_vals / 2;
    let mut min_mse = f64::INFINITY;

    let n_idxs = n_vals.ilog2() + 1;
    for idx in 0..n_idxs {
        let i_equil = n_vals / 2usize.pow(n_idxs - idx);
        let tail = &vals[i_equil..];
        let n_tail = tail.len();
        let mse = compute_var(tail) * (n_tail - 1) as f64 / n_tail.pow(2) as f64;
        if mse < min_mse {
            min_mse = mse;
            opt_i_equil = i_equil;
        }
    }

    opt_i_equil
}

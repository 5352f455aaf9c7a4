use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use rand::rngs::SmallRng;
use rand::{RngCore, SeedableRng};
use rayon::prelude::*;
use tracing::{debug, warn};

use super::engine::{run_projection, simulate_path};
use super::error::SimulationError;
use super::returns::{Stochastic, derive_seed};
use super::stats::{percentile, percentile_band, sort_ascending};
use super::types::{
    MonteCarloSummary, SimulationInputs, StrategyComparison, WithdrawalStrategy, YearBand,
    YearRecord,
};

#[derive(Debug, Clone, Copy, Default)]
pub struct MonteCarloConfig {
    pub runs: u32,
    /// Base seed for per-run generators. `None` draws one from OS entropy.
    pub seed: Option<u64>,
}

/// Stops a batch from issuing further runs. Clones share the flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Per-worker partial results, merged once all runs finish.
struct RunAccumulator {
    year_ends: Vec<Vec<f64>>,
    final_balances: Vec<f64>,
    ruin_ages: Vec<f64>,
    successes: u32,
    completed: u32,
    trace: Vec<YearRecord>,
}

impl RunAccumulator {
    /// Pre-sizes the per-year buffers for about `expected_runs` paths.
    fn new(horizon: usize, expected_runs: usize) -> Self {
        Self {
            year_ends: (0..horizon)
                .map(|_| Vec::with_capacity(expected_runs))
                .collect(),
            final_balances: Vec::with_capacity(expected_runs),
            ruin_ages: Vec::new(),
            successes: 0,
            completed: 0,
            trace: Vec::with_capacity(horizon),
        }
    }

    fn merge(mut self, other: Self) -> Self {
        for (mine, theirs) in self.year_ends.iter_mut().zip(other.year_ends) {
            mine.extend(theirs);
        }
        self.final_balances.extend(other.final_balances);
        self.ruin_ages.extend(other.ruin_ages);
        self.successes += other.successes;
        self.completed += other.completed;
        self
    }

    fn into_summary(
        mut self,
        inputs: &SimulationInputs,
        strategy: WithdrawalStrategy,
    ) -> MonteCarloSummary {
        let year_bands = self
            .year_ends
            .iter_mut()
            .enumerate()
            .map(|(idx, ends)| {
                sort_ascending(ends);
                YearBand {
                    year: idx as u32 + 1,
                    age: inputs.retirement_age + idx as u32,
                    band: percentile_band(ends),
                }
            })
            .collect();

        sort_ascending(&mut self.final_balances);
        sort_ascending(&mut self.ruin_ages);
        let median_ruin_age =
            (!self.ruin_ages.is_empty()).then(|| percentile(&self.ruin_ages, 50.0));

        MonteCarloSummary {
            strategy,
            runs: self.completed,
            successes: self.successes,
            success_rate: success_rate(self.successes, self.completed),
            median_ruin_age,
            year_bands,
            final_balance_band: percentile_band(&self.final_balances),
            final_balances: self.final_balances,
        }
    }
}

pub fn success_rate(successes: u32, runs: u32) -> f64 {
    if runs == 0 {
        return 0.0;
    }
    (successes as f64 / runs as f64 * 100.0).clamp(0.0, 100.0)
}

/// Runs `runs` independent stochastic paths and aggregates them.
pub fn run_monte_carlo(
    inputs: &SimulationInputs,
    strategy: WithdrawalStrategy,
    runs: u32,
) -> MonteCarloSummary {
    let config = MonteCarloConfig { runs, seed: None };
    collect_runs(inputs, strategy, &config, None).into_summary(inputs, strategy)
}

pub fn run_monte_carlo_with(
    inputs: &SimulationInputs,
    strategy: WithdrawalStrategy,
    config: &MonteCarloConfig,
    cancel: &CancelToken,
) -> Result<MonteCarloSummary, SimulationError> {
    let acc = collect_runs(inputs, strategy, config, Some(cancel));
    if acc.completed < config.runs {
        warn!(
            strategy = strategy.label(),
            completed = acc.completed,
            requested = config.runs,
            "Monte Carlo batch cancelled"
        );
        return Err(SimulationError::Cancelled {
            completed: acc.completed,
            requested: config.runs,
        });
    }
    Ok(acc.into_summary(inputs, strategy))
}

fn collect_runs(
    inputs: &SimulationInputs,
    strategy: WithdrawalStrategy,
    config: &MonteCarloConfig,
    cancel: Option<&CancelToken>,
) -> RunAccumulator {
    let horizon = inputs.horizon_years() as usize;
    let base_seed = config.seed.unwrap_or_else(|| rand::rng().next_u64());
    debug!(
        strategy = strategy.label(),
        runs = config.runs,
        horizon,
        base_seed,
        "Starting Monte Carlo batch"
    );

    // Roughly one chunk per worker, so each accumulator's reservation covers its share.
    let chunk = (config.runs as usize)
        .div_ceil(rayon::current_num_threads())
        .max(1);
    let acc = (0..config.runs)
        .into_par_iter()
        .with_min_len(chunk)
        .fold(
            || RunAccumulator::new(horizon, chunk),
            |mut acc, run_index| {
                if cancel.is_some_and(CancelToken::is_cancelled) {
                    return acc;
                }
                let rng = SmallRng::seed_from_u64(derive_seed(base_seed, run_index));
                let mut source = Stochastic::new(rng);
                acc.trace.clear();
                let outcome = simulate_path(inputs, strategy, &mut source, Some(&mut acc.trace));

                for (idx, row) in acc.trace.iter().enumerate() {
                    acc.year_ends[idx].push(row.portfolio_end);
                }
                acc.final_balances.push(outcome.final_balance);
                match outcome.ruin_age {
                    Some(age) => acc.ruin_ages.push(age as f64),
                    None => acc.successes += 1,
                }
                acc.completed += 1;
                acc
            },
        )
        .reduce(|| RunAccumulator::new(horizon, 0), RunAccumulator::merge);

    debug!(
        strategy = strategy.label(),
        completed = acc.completed,
        success_rate = success_rate(acc.successes, acc.completed),
        "Finished Monte Carlo batch"
    );
    acc
}

/// Projection plus Monte Carlo for every strategy, sharing one base seed.
pub fn compare_strategies(
    inputs: &SimulationInputs,
    config: &MonteCarloConfig,
    cancel: &CancelToken,
) -> Result<Vec<StrategyComparison>, SimulationError> {
    let shared = MonteCarloConfig {
        runs: config.runs,
        seed: Some(config.seed.unwrap_or_else(|| rand::rng().next_u64())),
    };

    WithdrawalStrategy::ALL
        .iter()
        .map(|&strategy| {
            let projection = run_projection(inputs, strategy);
            let summary = run_monte_carlo_with(inputs, strategy, &shared, cancel)?;
            Ok(StrategyComparison {
                strategy,
                success_rate: summary.success_rate,
                median_final_balance: summary.final_balance_band.p50,
                p10_final_balance: summary.final_balance_band.p10,
                projected_final_balance: projection.final_balance,
                projected_total_withdrawals: projection.total_withdrawals,
                projected_ruin_age: projection.ruin_age,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    fn fixed_income_inputs(starting_portfolio: f64) -> SimulationInputs {
        SimulationInputs {
            current_age: 65,
            retirement_age: 65,
            planning_age: 95,
            starting_portfolio,
            expected_return: 6.0,
            volatility: 15.0,
            inflation_rate: 2.5,
            starting_withdrawal: 60_000.0,
            ..SimulationInputs::default()
        }
    }

    fn seeded(runs: u32, seed: u64) -> MonteCarloConfig {
        MonteCarloConfig {
            runs,
            seed: Some(seed),
        }
    }

    #[test]
    fn success_rate_is_a_percentage() {
        assert_eq!(success_rate(0, 0), 0.0);
        assert_eq!(success_rate(3, 4), 75.0);
        assert_eq!(success_rate(10, 10), 100.0);
    }

    #[test]
    fn larger_portfolio_has_higher_success_rate() {
        let token = CancelToken::new();
        let small = run_monte_carlo_with(
            &fixed_income_inputs(500_000.0),
            WithdrawalStrategy::ConstantReal,
            &seeded(200, 11),
            &token,
        )
        .expect("not cancelled");
        let large = run_monte_carlo_with(
            &fixed_income_inputs(2_000_000.0),
            WithdrawalStrategy::ConstantReal,
            &seeded(200, 11),
            &token,
        )
        .expect("not cancelled");
        assert!(large.success_rate > small.success_rate);
        assert!((0.0..=100.0).contains(&small.success_rate));
        assert!((0.0..=100.0).contains(&large.success_rate));
    }

    #[test]
    fn seeded_batches_are_reproducible() {
        let inputs = fixed_income_inputs(1_000_000.0);
        let token = CancelToken::new();
        let a = run_monte_carlo_with(&inputs, WithdrawalStrategy::Guardrails, &seeded(300, 5), &token)
            .expect("not cancelled");
        let b = run_monte_carlo_with(&inputs, WithdrawalStrategy::Guardrails, &seeded(300, 5), &token)
            .expect("not cancelled");
        assert_eq!(a.successes, b.successes);
        assert_eq!(a.final_balances, b.final_balances);
        assert_eq!(a.year_bands.len(), b.year_bands.len());
        for (x, y) in a.year_bands.iter().zip(&b.year_bands) {
            assert_eq!(x.band, y.band);
        }
    }

    #[test]
    fn bands_cover_every_year_and_are_ordered() {
        let inputs = fixed_income_inputs(1_000_000.0);
        let summary = run_monte_carlo(&inputs, WithdrawalStrategy::Vpw, 400);
        assert_eq!(summary.runs, 400);
        assert_eq!(summary.year_bands.len(), 30);
        assert_eq!(summary.final_balances.len(), 400);
        assert!(summary.final_balances.windows(2).all(|w| w[0] <= w[1]));
        for (idx, year) in summary.year_bands.iter().enumerate() {
            assert_eq!(year.year as usize, idx + 1);
            assert_eq!(year.age, 65 + idx as u32);
            let b = year.band;
            assert!(b.p10 >= 0.0);
            assert!(b.p10 <= b.p25 && b.p25 <= b.p50 && b.p50 <= b.p75 && b.p75 <= b.p90);
        }
        let last = summary.year_bands.last().unwrap().band;
        assert!((last.p50 - summary.final_balance_band.p50).abs() < 1e-6);
    }

    #[test]
    fn ruined_runs_report_median_ruin_age() {
        let inputs = fixed_income_inputs(300_000.0);
        let summary = run_monte_carlo(&inputs, WithdrawalStrategy::ConstantReal, 100);
        assert!(summary.successes < summary.runs);
        let median = summary.median_ruin_age.expect("some runs ruin");
        assert!((65.0..95.0).contains(&median));
    }

    #[test]
    fn zero_runs_and_zero_horizon_are_empty() {
        let inputs = fixed_income_inputs(1_000_000.0);
        let none = run_monte_carlo(&inputs, WithdrawalStrategy::Rmd, 0);
        assert_eq!(none.runs, 0);
        assert_eq!(none.success_rate, 0.0);
        assert!(none.final_balances.is_empty());

        let mut flat = inputs.clone();
        flat.planning_age = flat.retirement_age;
        let summary = run_monte_carlo(&flat, WithdrawalStrategy::Rmd, 10);
        assert!(summary.year_bands.is_empty());
        assert_eq!(summary.success_rate, 100.0);
        assert_eq!(summary.final_balance_band.p50, 1_000_000.0);
    }

    #[test]
    fn accumulator_reserves_per_year_capacity_and_merges_counts() {
        let a = RunAccumulator::new(30, 250);
        assert_eq!(a.year_ends.len(), 30);
        assert!(a.year_ends.iter().all(|ends| ends.capacity() >= 250));
        assert!(a.final_balances.capacity() >= 250);

        let mut b = RunAccumulator::new(2, 4);
        b.year_ends[0].push(1.0);
        b.year_ends[1].push(2.0);
        b.final_balances.push(2.0);
        b.successes = 1;
        b.completed = 1;
        let merged = RunAccumulator::new(2, 0).merge(b);
        assert_eq!(merged.year_ends, vec![vec![1.0], vec![2.0]]);
        assert_eq!(merged.final_balances, vec![2.0]);
        assert_eq!((merged.successes, merged.completed), (1, 1));
    }

    #[test]
    fn chunked_batches_match_across_run_counts() {
        let inputs = fixed_income_inputs(1_000_000.0);
        let token = CancelToken::new();
        for runs in [1, 7, 333] {
            let summary =
                run_monte_carlo_with(&inputs, WithdrawalStrategy::Rmd, &seeded(runs, 21), &token)
                    .expect("not cancelled");
            assert_eq!(summary.runs, runs);
            assert_eq!(summary.final_balances.len(), runs as usize);
            assert!(summary.year_bands.iter().all(|b| b.band.p10 <= b.band.p90));
        }
    }

    #[test]
    fn cancelled_token_stops_the_batch() {
        let token = CancelToken::new();
        token.cancel();
        let err = run_monte_carlo_with(
            &fixed_income_inputs(1_000_000.0),
            WithdrawalStrategy::ConstantReal,
            &seeded(50, 1),
            &token,
        )
        .expect_err("cancelled before start");
        assert_eq!(
            err,
            SimulationError::Cancelled {
                completed: 0,
                requested: 50
            }
        );
    }

    #[test]
    fn comparison_has_one_row_per_strategy() {
        let rows = compare_strategies(
            &fixed_income_inputs(1_500_000.0),
            &seeded(100, 3),
            &CancelToken::new(),
        )
        .expect("not cancelled");
        assert_eq!(rows.len(), 5);
        for (row, strategy) in rows.iter().zip(WithdrawalStrategy::ALL) {
            assert_eq!(row.strategy, strategy);
            assert!((0.0..=100.0).contains(&row.success_rate));
            assert!(row.p10_final_balance <= row.median_final_balance);
        }
    }

    #[test]
    fn thousand_runs_within_one_second() {
        let inputs = fixed_income_inputs(1_000_000.0);
        let start = Instant::now();
        let summary = run_monte_carlo(&inputs, WithdrawalStrategy::Guardrails, 1_000);
        assert_eq!(summary.runs, 1_000);
        assert!(start.elapsed() < Duration::from_secs(1), "{:?}", start.elapsed());
    }

    #[test]
    fn ten_thousand_runs_within_five_seconds() {
        let inputs = fixed_income_inputs(1_000_000.0);
        let start = Instant::now();
        let summary = run_monte_carlo(&inputs, WithdrawalStrategy::ConstantReal, 10_000);
        assert_eq!(summary.runs, 10_000);
        assert!(start.elapsed() < Duration::from_secs(5), "{:?}", start.elapsed());
    }
}

use serde::Serialize;
use tracing::debug;

use super::error::SolveError;
use super::monte_carlo::{CancelToken, MonteCarloConfig, run_monte_carlo_with};
use super::types::{SimulationInputs, WithdrawalStrategy};

// Success rates are compared with a little slack so 100% stays reachable.
const RATE_EPSILON: f64 = 1e-9;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum GoalType {
    /// Largest year-one withdrawal that still meets the target.
    MaxStartingWithdrawal,
    /// Smallest starting balance that meets the target.
    MinStartingPortfolio,
}

#[derive(Debug, Clone, Copy)]
pub struct GoalSolveConfig {
    pub goal_type: GoalType,
    pub strategy: WithdrawalStrategy,
    /// Required success rate in percent.
    pub target_success_rate: f64,
    pub search_min: f64,
    pub search_max: f64,
    pub tolerance: f64,
    pub max_iterations: u32,
    pub runs_per_iteration: u32,
    pub final_runs: u32,
    pub seed: u64,
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GoalSolveIteration {
    pub iteration: u32,
    pub lower_bound: f64,
    pub upper_bound: f64,
    pub candidate_value: f64,
    pub success_rate: f64,
    pub success_ci_half_width: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GoalSolveResult {
    pub goal_type: GoalType,
    pub strategy: WithdrawalStrategy,
    pub target_success_rate: f64,
    pub search_min: f64,
    pub search_max: f64,
    pub tolerance: f64,
    pub solved_value: Option<f64>,
    pub achieved_success_rate: Option<f64>,
    pub achieved_success_ci_half_width: Option<f64>,
    pub iterations: Vec<GoalSolveIteration>,
    pub converged: bool,
    pub feasible: bool,
    pub message: String,
}

#[derive(Debug, Clone, Copy)]
struct CandidateEval {
    success_rate: f64,
    success_ci_half_width: f64,
}

impl CandidateEval {
    fn meets(self, target: f64) -> bool {
        self.success_rate + RATE_EPSILON >= target
    }
}

struct Evaluator<'a> {
    inputs: &'a SimulationInputs,
    config: &'a GoalSolveConfig,
    cancel: &'a CancelToken,
}

impl Evaluator<'_> {
    fn eval(&self, candidate: f64, runs: u32) -> Result<CandidateEval, SolveError> {
        let mut inputs = self.inputs.clone();
        match self.config.goal_type {
            GoalType::MaxStartingWithdrawal => inputs.starting_withdrawal = candidate.max(0.0),
            GoalType::MinStartingPortfolio => inputs.starting_portfolio = candidate.max(0.0),
        }
        let mc = MonteCarloConfig {
            runs,
            seed: Some(self.config.seed),
        };
        let summary = run_monte_carlo_with(&inputs, self.config.strategy, &mc, self.cancel)?;
        Ok(CandidateEval {
            success_rate: summary.success_rate,
            success_ci_half_width: binomial_ci_half_width(summary.success_rate, summary.runs),
        })
    }
}

/// Bisects one input against Monte Carlo success rate. Every candidate reuses
/// the same seed, so rates differ only through the input being searched.
pub fn solve_goal(
    inputs: &SimulationInputs,
    config: &GoalSolveConfig,
    cancel: &CancelToken,
) -> Result<GoalSolveResult, SolveError> {
    validate_config(config)?;

    let evaluator = Evaluator {
        inputs,
        config,
        cancel,
    };
    let target = config.target_success_rate;
    let runs = config.runs_per_iteration;
    let low_eval = evaluator.eval(config.search_min, runs)?;
    let high_eval = evaluator.eval(config.search_max, runs)?;

    // Raising a withdrawal lowers success; raising a portfolio raises it.
    let feasible_side_is_low = config.goal_type == GoalType::MaxStartingWithdrawal;
    let (inner, outer) = if feasible_side_is_low {
        (low_eval, high_eval)
    } else {
        (high_eval, low_eval)
    };

    let mut iterations = Vec::with_capacity(config.max_iterations.min(64) as usize);
    let mut solved_value = None;
    let mut converged = false;
    let feasible;
    let message;

    if !inner.meets(target) {
        feasible = false;
        message = match config.goal_type {
            GoalType::MaxStartingWithdrawal => {
                "No feasible withdrawal found within the search bounds."
            }
            GoalType::MinStartingPortfolio => {
                "No feasible portfolio found within the search bounds."
            }
        }
        .to_string();
    } else if outer.meets(target) {
        feasible = true;
        converged = true;
        if feasible_side_is_low {
            solved_value = Some(config.search_max);
            message = "Upper withdrawal bound still meets target; increase search max.".to_string();
        } else {
            solved_value = Some(config.search_min);
            message = "Already meets target at lower portfolio bound.".to_string();
        }
    } else {
        let mut lo = config.search_min;
        let mut hi = config.search_max;
        for iteration in 1..=config.max_iterations {
            let mid = (lo + hi) * 0.5;
            // Bracket is down to adjacent floats; further steps cannot narrow it.
            if mid <= lo || mid >= hi {
                break;
            }
            let eval = evaluator.eval(mid, runs)?;
            debug!(
                iteration,
                candidate = mid,
                success_rate = eval.success_rate,
                "Goal solver iteration"
            );
            iterations.push(GoalSolveIteration {
                iteration,
                lower_bound: lo,
                upper_bound: hi,
                candidate_value: mid,
                success_rate: eval.success_rate,
                success_ci_half_width: eval.success_ci_half_width,
            });

            if eval.meets(target) == feasible_side_is_low {
                lo = mid;
            } else {
                hi = mid;
            }

            if (hi - lo).abs() <= config.tolerance {
                converged = true;
                break;
            }
        }
        solved_value = Some(if feasible_side_is_low { lo } else { hi });
        feasible = true;
        message = if converged {
            match config.goal_type {
                GoalType::MaxStartingWithdrawal => "Solved maximum starting withdrawal.",
                GoalType::MinStartingPortfolio => "Solved minimum starting portfolio.",
            }
            .to_string()
        } else {
            "Reached max iterations before tolerance was met; returning best estimate.".to_string()
        };
    }

    let mut achieved_success_rate = None;
    let mut achieved_success_ci_half_width = None;
    if let Some(value) = solved_value {
        let final_eval = evaluator.eval(value, config.final_runs)?;
        achieved_success_rate = Some(final_eval.success_rate);
        achieved_success_ci_half_width = Some(final_eval.success_ci_half_width);
    }

    Ok(GoalSolveResult {
        goal_type: config.goal_type,
        strategy: config.strategy,
        target_success_rate: target,
        search_min: config.search_min,
        search_max: config.search_max,
        tolerance: config.tolerance,
        solved_value,
        achieved_success_rate,
        achieved_success_ci_half_width,
        iterations,
        converged,
        feasible,
        message,
    })
}

/// 95% normal-approximation half-width, in percentage points.
pub fn binomial_ci_half_width(success_rate_pct: f64, runs: u32) -> f64 {
    if runs == 0 {
        return 0.0;
    }
    let p = (success_rate_pct / 100.0).clamp(0.0, 1.0);
    1.96 * (p * (1.0 - p) / runs as f64).sqrt() * 100.0
}

fn validate_config(config: &GoalSolveConfig) -> Result<(), SolveError> {
    let target = config.target_success_rate;
    if !(0.0..=100.0).contains(&target) {
        return Err(SolveError::InvalidThreshold(target));
    }
    if !config.search_min.is_finite()
        || !config.search_max.is_finite()
        || config.search_min < 0.0
        || config.search_max <= config.search_min
    {
        return Err(SolveError::InvalidBounds);
    }
    // A zero starting withdrawal means "use the strategy default", so it cannot be a candidate.
    if config.goal_type == GoalType::MaxStartingWithdrawal && config.search_min <= 0.0 {
        return Err(SolveError::InvalidBounds);
    }
    if !config.tolerance.is_finite() || config.tolerance <= 0.0 {
        return Err(SolveError::InvalidTolerance);
    }
    if config.max_iterations == 0 {
        return Err(SolveError::ZeroIterations);
    }
    if config.runs_per_iteration == 0 || config.final_runs == 0 {
        return Err(SolveError::ZeroRuns);
    }
    Ok(())
}

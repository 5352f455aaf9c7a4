mod engine;
mod error;
mod monte_carlo;
mod policy;
mod returns;
mod solver;
mod stats;
mod tables;
mod types;

pub use engine::{run_projection, run_simulation, run_with_source};
pub use error::{SimulationError, SolveError};
pub use monte_carlo::{
    CancelToken, MonteCarloConfig, compare_strategies, run_monte_carlo, run_monte_carlo_with,
    success_rate,
};
pub use policy::{
    CONSTANT_PERCENT_RATE, CONSTANT_REAL_RATE, GUARDRAIL_ADJUSTMENT, GUARDRAIL_INITIAL_RATE,
    GUARDRAIL_LOWER, GUARDRAIL_UPPER, SpendingBounds, Target, WithdrawalPolicy, YearContext,
};
pub use returns::{
    Deterministic, ReturnSource, ScriptedReturns, Stochastic, derive_seed, generate_return,
    standard_normal,
};
pub use solver::{
    GoalSolveConfig, GoalSolveIteration, GoalSolveResult, GoalType, binomial_ci_half_width,
    solve_goal,
};
pub use stats::{percentile, percentile_band, sort_ascending};
pub use tables::{DEFAULT_STOCK_ALLOCATION, life_expectancy, vpw_percentage};
pub use types::{
    MonteCarloSummary, PercentileBand, SimulationInputs, SimulationResult, StrategyComparison,
    WithdrawalStrategy, YearBand, YearDiagnostics, YearRecord,
};

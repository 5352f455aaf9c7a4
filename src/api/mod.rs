use axum::{
    Router,
    extract::{Json, Query},
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use clap::{Args, Parser, Subcommand, ValueEnum};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use thiserror::Error;
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::core::{
    CancelToken, GoalSolveConfig, GoalSolveResult, GoalType, MonteCarloConfig, MonteCarloSummary,
    SimulationError, SimulationInputs, SimulationResult, SolveError, StrategyComparison,
    WithdrawalStrategy, compare_strategies, run_monte_carlo_with, run_projection, solve_goal,
};

pub const MAX_RUNS: u32 = 100_000;
pub const MAX_AGE: u32 = 130;
const DEFAULT_RUNS: u32 = 1_000;
const DEFAULT_PORTFOLIO_SEARCH_MAX: f64 = 20_000_000.0;
pub const MAX_SOLVER_ITERATIONS: u32 = 200;
// Tolerance below this fraction of the search range cannot be resolved by bisection.
const MIN_RELATIVE_TOLERANCE: f64 = 1e-12;

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum CliStrategy {
    ConstantReal,
    ConstantPercent,
    Vpw,
    Guardrails,
    Rmd,
}

impl From<CliStrategy> for WithdrawalStrategy {
    fn from(value: CliStrategy) -> Self {
        match value {
            CliStrategy::ConstantReal => WithdrawalStrategy::ConstantReal,
            CliStrategy::ConstantPercent => WithdrawalStrategy::ConstantPercent,
            CliStrategy::Vpw => WithdrawalStrategy::Vpw,
            CliStrategy::Guardrails => WithdrawalStrategy::Guardrails,
            CliStrategy::Rmd => WithdrawalStrategy::Rmd,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum CliGoal {
    MaxStartingWithdrawal,
    MinStartingPortfolio,
}

impl From<CliGoal> for GoalType {
    fn from(value: CliGoal) -> Self {
        match value {
            CliGoal::MaxStartingWithdrawal => GoalType::MaxStartingWithdrawal,
            CliGoal::MinStartingPortfolio => GoalType::MinStartingPortfolio,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case")]
enum ApiStrategy {
    #[serde(alias = "constantReal", alias = "constant_real")]
    ConstantReal,
    #[serde(alias = "constantPercent", alias = "constant_percent")]
    ConstantPercent,
    Vpw,
    #[serde(alias = "guyton-klinger", alias = "guytonKlinger")]
    Guardrails,
    Rmd,
}

impl From<ApiStrategy> for CliStrategy {
    fn from(value: ApiStrategy) -> Self {
        match value {
            ApiStrategy::ConstantReal => CliStrategy::ConstantReal,
            ApiStrategy::ConstantPercent => CliStrategy::ConstantPercent,
            ApiStrategy::Vpw => CliStrategy::Vpw,
            ApiStrategy::Guardrails => CliStrategy::Guardrails,
            ApiStrategy::Rmd => CliStrategy::Rmd,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case")]
enum ApiGoal {
    #[serde(alias = "maxStartingWithdrawal", alias = "max_starting_withdrawal")]
    MaxStartingWithdrawal,
    #[serde(alias = "minStartingPortfolio", alias = "min_starting_portfolio")]
    MinStartingPortfolio,
}

impl From<ApiGoal> for CliGoal {
    fn from(value: ApiGoal) -> Self {
        match value {
            ApiGoal::MaxStartingWithdrawal => CliGoal::MaxStartingWithdrawal,
            ApiGoal::MinStartingPortfolio => CliGoal::MinStartingPortfolio,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct SimulatePayload {
    current_age: Option<u32>,
    retirement_age: Option<u32>,
    planning_age: Option<u32>,
    starting_portfolio: Option<f64>,
    expected_return: Option<f64>,
    volatility: Option<f64>,
    inflation_rate: Option<f64>,
    social_security: Option<f64>,
    ss_start_age: Option<u32>,
    one_time_expense: Option<f64>,
    min_spending: Option<f64>,
    max_spending: Option<f64>,
    starting_withdrawal: Option<f64>,
    stock_allocation: Option<f64>,
    strategy: Option<ApiStrategy>,
    runs: Option<u32>,
    seed: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct SolvePayload {
    #[serde(flatten)]
    scenario: SimulatePayload,
    goal: Option<ApiGoal>,
    target_success_rate: Option<f64>,
    search_min: Option<f64>,
    search_max: Option<f64>,
    tolerance: Option<f64>,
    max_iterations: Option<u32>,
    final_runs: Option<u32>,
}

#[derive(Parser, Debug)]
#[command(
    name = "drawdown",
    about = "Retirement drawdown simulator (five withdrawal strategies, Monte Carlo success rates)"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Deterministic projection plus Monte Carlo summary for one strategy.
    Simulate(ScenarioArgs),
    /// All five strategies side by side.
    Compare(ScenarioArgs),
    /// Bisect an input until the success rate meets a target.
    Solve(SolveArgs),
    /// Start the HTTP API.
    Serve {
        #[arg(long, default_value_t = 8080)]
        port: u16,
    },
}

#[derive(Args, Debug, Clone)]
pub struct ScenarioArgs {
    #[arg(long, default_value_t = 60)]
    current_age: u32,
    #[arg(long, default_value_t = 65)]
    retirement_age: u32,
    #[arg(long, default_value_t = 95)]
    planning_age: u32,
    #[arg(long, default_value_t = 1_000_000.0)]
    starting_portfolio: f64,
    #[arg(long, default_value_t = 7.0, help = "Mean annual return in percent")]
    expected_return: f64,
    #[arg(long, default_value_t = 15.0, help = "Annual return volatility in percent")]
    volatility: f64,
    #[arg(long, default_value_t = 2.5, help = "Annual inflation in percent")]
    inflation_rate: f64,
    #[arg(long, default_value_t = 0.0, help = "Annual Social Security benefit in today's money")]
    social_security: f64,
    #[arg(long, default_value_t = 67)]
    ss_start_age: u32,
    #[arg(long, default_value_t = 0.0, help = "Expense charged every fifth retirement year")]
    one_time_expense: f64,
    #[arg(long, default_value_t = 0.0, help = "Spending floor, 0 disables")]
    min_spending: f64,
    #[arg(long, default_value_t = 0.0, help = "Spending ceiling, 0 disables")]
    max_spending: f64,
    #[arg(long, default_value_t = 0.0, help = "Year-one withdrawal override, 0 disables")]
    starting_withdrawal: f64,
    #[arg(long, default_value_t = 60.0, help = "Stock allocation for VPW, in percent")]
    stock_allocation: f64,
    #[arg(long, value_enum, default_value_t = CliStrategy::ConstantReal)]
    strategy: CliStrategy,
    #[arg(long, default_value_t = DEFAULT_RUNS)]
    runs: u32,
    #[arg(long)]
    seed: Option<u64>,
}

#[derive(Args, Debug, Clone)]
pub struct SolveArgs {
    #[command(flatten)]
    scenario: ScenarioArgs,
    #[arg(long, value_enum, default_value_t = CliGoal::MaxStartingWithdrawal)]
    goal: CliGoal,
    #[arg(long, default_value_t = 90.0, help = "Required success rate in percent")]
    target_success_rate: f64,
    #[arg(long)]
    search_min: Option<f64>,
    #[arg(long)]
    search_max: Option<f64>,
    #[arg(long, default_value_t = 100.0)]
    tolerance: f64,
    #[arg(long, default_value_t = 30)]
    max_iterations: u32,
    #[arg(long, help = "Runs for the final estimate; defaults to --runs")]
    final_runs: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum InputError {
    #[error("--{flag} must be a finite number")]
    NotFinite { flag: &'static str },
    #[error("--volatility must be between 0 and 100, got {0}")]
    Volatility(f64),
    #[error("--{flag} must be between 1 and 100000, got {value}")]
    Runs { flag: &'static str, value: u32 },
    #[error("--{flag} must be <= 130, got {value}")]
    Age { flag: &'static str, value: u32 },
    #[error("--target-success-rate must be between 0 and 100, got {0}")]
    SuccessTarget(f64),
    #[error("--max-iterations must be between 1 and 200, got {0}")]
    MaxIterations(u32),
    #[error("--tolerance must be at least {min}, got {tolerance}")]
    Tolerance { tolerance: f64, min: f64 },
}

#[derive(Debug, Error)]
pub enum CommandError {
    #[error(transparent)]
    Input(#[from] InputError),
    #[error(transparent)]
    Simulation(#[from] SimulationError),
    #[error(transparent)]
    Solve(#[from] SolveError),
    #[error("failed to encode report: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug)]
struct ApiRequest {
    inputs: SimulationInputs,
    strategy: WithdrawalStrategy,
    config: MonteCarloConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SimulateResponse {
    strategy: WithdrawalStrategy,
    inputs: SimulationInputs,
    projection: SimulationResult,
    monte_carlo: MonteCarloSummary,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CompareResponse {
    inputs: SimulationInputs,
    runs: u32,
    strategies: Vec<StrategyComparison>,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
}

fn build_inputs(args: &ScenarioArgs) -> Result<SimulationInputs, InputError> {
    let finite = [
        ("starting-portfolio", args.starting_portfolio),
        ("expected-return", args.expected_return),
        ("volatility", args.volatility),
        ("inflation-rate", args.inflation_rate),
        ("social-security", args.social_security),
        ("one-time-expense", args.one_time_expense),
        ("min-spending", args.min_spending),
        ("max-spending", args.max_spending),
        ("starting-withdrawal", args.starting_withdrawal),
        ("stock-allocation", args.stock_allocation),
    ];
    if let Some(&(flag, _)) = finite.iter().find(|(_, v)| !v.is_finite()) {
        return Err(InputError::NotFinite { flag });
    }

    if !(0.0..=100.0).contains(&args.volatility) {
        return Err(InputError::Volatility(args.volatility));
    }
    check_runs("runs", args.runs)?;

    let ages = [
        ("current-age", args.current_age),
        ("retirement-age", args.retirement_age),
        ("planning-age", args.planning_age),
        ("ss-start-age", args.ss_start_age),
    ];
    if let Some(&(flag, value)) = ages.iter().find(|(_, v)| *v > MAX_AGE) {
        return Err(InputError::Age { flag, value });
    }

    Ok(SimulationInputs {
        current_age: args.current_age,
        retirement_age: args.retirement_age,
        planning_age: args.planning_age,
        starting_portfolio: args.starting_portfolio,
        expected_return: args.expected_return,
        volatility: args.volatility,
        inflation_rate: args.inflation_rate,
        social_security: args.social_security,
        ss_start_age: args.ss_start_age,
        one_time_expense: args.one_time_expense,
        min_spending: args.min_spending,
        max_spending: args.max_spending,
        starting_withdrawal: args.starting_withdrawal,
        stock_allocation: args.stock_allocation,
    })
}

fn check_runs(flag: &'static str, value: u32) -> Result<(), InputError> {
    if (1..=MAX_RUNS).contains(&value) {
        Ok(())
    } else {
        Err(InputError::Runs { flag, value })
    }
}

fn build_request(args: &ScenarioArgs) -> Result<ApiRequest, InputError> {
    Ok(ApiRequest {
        inputs: build_inputs(args)?,
        strategy: args.strategy.into(),
        config: MonteCarloConfig {
            runs: args.runs,
            seed: args.seed,
        },
    })
}

fn build_solve_config(
    args: &SolveArgs,
    inputs: &SimulationInputs,
) -> Result<GoalSolveConfig, InputError> {
    if !(0.0..=100.0).contains(&args.target_success_rate) {
        return Err(InputError::SuccessTarget(args.target_success_rate));
    }
    let optional = [
        ("search-min", args.search_min),
        ("search-max", args.search_max),
    ];
    if let Some(&(flag, _)) = optional
        .iter()
        .find(|(_, v)| v.is_some_and(|v| !v.is_finite()))
    {
        return Err(InputError::NotFinite { flag });
    }
    if !args.tolerance.is_finite() {
        return Err(InputError::NotFinite { flag: "tolerance" });
    }
    if !(1..=MAX_SOLVER_ITERATIONS).contains(&args.max_iterations) {
        return Err(InputError::MaxIterations(args.max_iterations));
    }
    let final_runs = args.final_runs.unwrap_or(args.scenario.runs);
    check_runs("final-runs", final_runs)?;

    let goal_type = GoalType::from(args.goal);
    let (default_min, default_max) = match goal_type {
        GoalType::MaxStartingWithdrawal => (1.0, inputs.starting_portfolio.max(2.0)),
        GoalType::MinStartingPortfolio => (0.0, DEFAULT_PORTFOLIO_SEARCH_MAX),
    };
    let search_max = args.search_max.unwrap_or(default_max);
    let min_tolerance = search_max.abs() * MIN_RELATIVE_TOLERANCE;
    if args.tolerance <= 0.0 || args.tolerance < min_tolerance {
        return Err(InputError::Tolerance {
            tolerance: args.tolerance,
            min: min_tolerance,
        });
    }

    Ok(GoalSolveConfig {
        goal_type,
        strategy: args.scenario.strategy.into(),
        target_success_rate: args.target_success_rate,
        search_min: args.search_min.unwrap_or(default_min),
        search_max,
        tolerance: args.tolerance,
        max_iterations: args.max_iterations,
        runs_per_iteration: args.scenario.runs,
        final_runs,
        seed: args.scenario.seed.unwrap_or_else(|| rand::rng().next_u64()),
    })
}

fn simulate_report(request: ApiRequest) -> Result<SimulateResponse, SimulationError> {
    let projection = run_projection(&request.inputs, request.strategy);
    let monte_carlo = run_monte_carlo_with(
        &request.inputs,
        request.strategy,
        &request.config,
        &CancelToken::new(),
    )?;
    Ok(SimulateResponse {
        strategy: request.strategy,
        inputs: request.inputs,
        projection,
        monte_carlo,
    })
}

fn compare_report(request: ApiRequest) -> Result<CompareResponse, SimulationError> {
    let strategies = compare_strategies(&request.inputs, &request.config, &CancelToken::new())?;
    Ok(CompareResponse {
        inputs: request.inputs,
        runs: request.config.runs,
        strategies,
    })
}

fn solve_report(args: &SolveArgs) -> Result<GoalSolveResult, CommandError> {
    let inputs = build_inputs(&args.scenario)?;
    let config = build_solve_config(args, &inputs)?;
    Ok(solve_goal(&inputs, &config, &CancelToken::new())?)
}

/// Runs a report subcommand and returns its JSON. `Serve` is handled by the caller.
pub fn run_command(command: &Command) -> Result<Option<String>, CommandError> {
    let json = match command {
        Command::Simulate(args) => {
            serde_json::to_string_pretty(&simulate_report(build_request(args)?)?)?
        }
        Command::Compare(args) => {
            serde_json::to_string_pretty(&compare_report(build_request(args)?)?)?
        }
        Command::Solve(args) => serde_json::to_string_pretty(&solve_report(args)?)?,
        Command::Serve { .. } => return Ok(None),
    };
    Ok(Some(json))
}

pub async fn run_http_server(port: u16) -> std::io::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let app = Router::new()
        .route("/api/health", get(health_handler))
        .route(
            "/api/simulate",
            get(simulate_get_handler).post(simulate_post_handler),
        )
        .route(
            "/api/compare",
            get(compare_get_handler).post(compare_post_handler),
        )
        .route("/api/solve", post(solve_handler))
        .fallback(not_found_handler);

    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "Drawdown HTTP API listening");

    axum::serve(listener, app).await
}

async fn health_handler() -> Response {
    json_response(StatusCode::OK, HealthResponse { status: "ok" })
}

async fn not_found_handler() -> Response {
    error_response(StatusCode::NOT_FOUND, "Not found")
}

async fn simulate_get_handler(Query(payload): Query<SimulatePayload>) -> Response {
    run_blocking(move || simulate_handler_impl(payload)).await
}

async fn simulate_post_handler(Json(payload): Json<SimulatePayload>) -> Response {
    run_blocking(move || simulate_handler_impl(payload)).await
}

fn simulate_handler_impl(payload: SimulatePayload) -> Response {
    let request = match api_request_from_payload(payload) {
        Ok(request) => request,
        Err(err) => return rejected(StatusCode::BAD_REQUEST, err),
    };
    match simulate_report(request) {
        Ok(response) => json_response(StatusCode::OK, response),
        Err(err) => rejected(StatusCode::UNPROCESSABLE_ENTITY, err),
    }
}

async fn compare_get_handler(Query(payload): Query<SimulatePayload>) -> Response {
    run_blocking(move || compare_handler_impl(payload)).await
}

async fn compare_post_handler(Json(payload): Json<SimulatePayload>) -> Response {
    run_blocking(move || compare_handler_impl(payload)).await
}

fn compare_handler_impl(payload: SimulatePayload) -> Response {
    let request = match api_request_from_payload(payload) {
        Ok(request) => request,
        Err(err) => return rejected(StatusCode::BAD_REQUEST, err),
    };
    match compare_report(request) {
        Ok(response) => json_response(StatusCode::OK, response),
        Err(err) => rejected(StatusCode::UNPROCESSABLE_ENTITY, err),
    }
}

async fn solve_handler(Json(payload): Json<SolvePayload>) -> Response {
    run_blocking(move || solve_handler_impl(payload)).await
}

fn solve_handler_impl(payload: SolvePayload) -> Response {
    let args = solve_args_from_payload(payload);
    match solve_report(&args) {
        Ok(response) => json_response(StatusCode::OK, response),
        Err(err @ CommandError::Input(_)) => rejected(StatusCode::BAD_REQUEST, err),
        Err(err) => rejected(StatusCode::UNPROCESSABLE_ENTITY, err),
    }
}

// Simulation work runs off the async workers so other routes stay responsive.
async fn run_blocking<F>(job: F) -> Response
where
    F: FnOnce() -> Response + Send + 'static,
{
    match tokio::task::spawn_blocking(job).await {
        Ok(response) => response,
        Err(err) => rejected(StatusCode::INTERNAL_SERVER_ERROR, err),
    }
}

fn rejected(status: StatusCode, err: impl std::fmt::Display) -> Response {
    let msg = err.to_string();
    warn!(status = status.as_u16(), error = %msg, "Rejected request");
    error_response(status, &msg)
}

fn json_response<T: Serialize>(status: StatusCode, body: T) -> Response {
    let mut response = (status, Json(body)).into_response();
    response
        .headers_mut()
        .insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    response
}

fn error_response(status: StatusCode, msg: &str) -> Response {
    json_response(
        status,
        ErrorResponse {
            error: msg.to_string(),
        },
    )
}

fn api_request_from_payload(payload: SimulatePayload) -> Result<ApiRequest, InputError> {
    build_request(&scenario_args_from_payload(payload))
}

fn scenario_args_from_payload(payload: SimulatePayload) -> ScenarioArgs {
    let mut args = default_args_for_api();

    if let Some(v) = payload.current_age {
        args.current_age = v;
    }
    if let Some(v) = payload.retirement_age {
        args.retirement_age = v;
    }
    if let Some(v) = payload.planning_age {
        args.planning_age = v;
    }
    if let Some(v) = payload.starting_portfolio {
        args.starting_portfolio = v;
    }
    if let Some(v) = payload.expected_return {
        args.expected_return = v;
    }
    if let Some(v) = payload.volatility {
        args.volatility = v;
    }
    if let Some(v) = payload.inflation_rate {
        args.inflation_rate = v;
    }
    if let Some(v) = payload.social_security {
        args.social_security = v;
    }
    if let Some(v) = payload.ss_start_age {
        args.ss_start_age = v;
    }
    if let Some(v) = payload.one_time_expense {
        args.one_time_expense = v;
    }
    if let Some(v) = payload.min_spending {
        args.min_spending = v;
    }
    if let Some(v) = payload.max_spending {
        args.max_spending = v;
    }
    if let Some(v) = payload.starting_withdrawal {
        args.starting_withdrawal = v;
    }
    if let Some(v) = payload.stock_allocation {
        args.stock_allocation = v;
    }
    if let Some(v) = payload.strategy {
        args.strategy = v.into();
    }
    if let Some(v) = payload.runs {
        args.runs = v;
    }
    if payload.seed.is_some() {
        args.seed = payload.seed;
    }

    args
}

fn solve_args_from_payload(payload: SolvePayload) -> SolveArgs {
    SolveArgs {
        scenario: scenario_args_from_payload(payload.scenario),
        goal: payload.goal.map_or(CliGoal::MaxStartingWithdrawal, CliGoal::from),
        target_success_rate: payload.target_success_rate.unwrap_or(90.0),
        search_min: payload.search_min,
        search_max: payload.search_max,
        tolerance: payload.tolerance.unwrap_or(100.0),
        max_iterations: payload.max_iterations.unwrap_or(30),
        final_runs: payload.final_runs,
    }
}

fn default_args_for_api() -> ScenarioArgs {
    let defaults = SimulationInputs::default();
    ScenarioArgs {
        current_age: defaults.current_age,
        retirement_age: defaults.retirement_age,
        planning_age: defaults.planning_age,
        starting_portfolio: defaults.starting_portfolio,
        expected_return: defaults.expected_return,
        volatility: defaults.volatility,
        inflation_rate: defaults.inflation_rate,
        social_security: defaults.social_security,
        ss_start_age: defaults.ss_start_age,
        one_time_expense: defaults.one_time_expense,
        min_spending: defaults.min_spending,
        max_spending: defaults.max_spending,
        starting_withdrawal: defaults.starting_withdrawal,
        stock_allocation: defaults.stock_allocation,
        strategy: CliStrategy::ConstantReal,
        runs: DEFAULT_RUNS,
        seed: None,
    }
}

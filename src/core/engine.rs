use rand::rngs::SmallRng;
use rand::{RngCore, SeedableRng};

use super::policy::{WithdrawalPolicy, YearContext, non_negative};
use super::returns::{Deterministic, ReturnSource, Stochastic};
use super::types::{SimulationInputs, SimulationResult, WithdrawalStrategy, YearRecord};

/// Summary of one path, without the per-year rows.
#[derive(Debug, Clone, Copy)]
pub(crate) struct PathOutcome {
    pub final_balance: f64,
    pub total_withdrawals: f64,
    pub ruin_age: Option<u32>,
}

/// Runs one path. Deterministic mode uses the mean return every year and never
/// draws entropy; otherwise returns are sampled from a freshly seeded generator.
pub fn run_simulation(
    inputs: &SimulationInputs,
    strategy: WithdrawalStrategy,
    deterministic: bool,
) -> SimulationResult {
    if deterministic {
        return run_with_source(inputs, strategy, &mut Deterministic);
    }
    let seed = rand::rng().next_u64();
    let mut source = Stochastic::new(SmallRng::seed_from_u64(seed));
    run_with_source(inputs, strategy, &mut source)
}

pub fn run_projection(inputs: &SimulationInputs, strategy: WithdrawalStrategy) -> SimulationResult {
    run_simulation(inputs, strategy, true)
}

pub fn run_with_source<S: ReturnSource + ?Sized>(
    inputs: &SimulationInputs,
    strategy: WithdrawalStrategy,
    source: &mut S,
) -> SimulationResult {
    let mut years = Vec::with_capacity(inputs.horizon_years() as usize);
    let outcome = simulate_path(inputs, strategy, source, Some(&mut years));

    SimulationResult {
        strategy,
        years,
        final_balance: outcome.final_balance,
        total_withdrawals: outcome.total_withdrawals,
        ruined: outcome.ruin_age.is_some(),
        ruin_age: outcome.ruin_age,
    }
}

pub(crate) fn simulate_path<S: ReturnSource + ?Sized>(
    inputs: &SimulationInputs,
    strategy: WithdrawalStrategy,
    source: &mut S,
    mut trace: Option<&mut Vec<YearRecord>>,
) -> PathOutcome {
    let mut policy = WithdrawalPolicy::new(inputs, strategy);
    let mut portfolio = non_negative(inputs.starting_portfolio);
    let mut total_withdrawals = 0.0;
    let mut ruin_age = None;

    for year_index in 0..inputs.horizon_years() {
        let record = advance_year(
            inputs,
            &mut policy,
            source,
            year_index,
            &mut portfolio,
            &mut ruin_age,
        );
        total_withdrawals += record.withdrawal;
        if let Some(rows) = trace.as_deref_mut() {
            rows.push(record);
        }
    }

    PathOutcome {
        final_balance: portfolio,
        total_withdrawals,
        ruin_age,
    }
}

fn advance_year<S: ReturnSource + ?Sized>(
    inputs: &SimulationInputs,
    policy: &mut WithdrawalPolicy,
    source: &mut S,
    year_index: u32,
    portfolio: &mut f64,
    ruin_age: &mut Option<u32>,
) -> YearRecord {
    let age = inputs.retirement_age + year_index;
    let portfolio_start = *portfolio;
    let price_index = inputs.inflation_multiplier().powi(year_index as i32);

    let target = policy.next_target(&YearContext {
        year_index,
        age,
        years_remaining: inputs.planning_age.saturating_sub(age),
        portfolio_start,
        price_index,
    });

    let ss_received = social_security_income(inputs, age);
    let one_time_expense = scheduled_expense(inputs, year_index, price_index);
    let requested_withdrawal = (target.amount - ss_received).max(0.0) + one_time_expense;

    let withdrawal = requested_withdrawal.min(portfolio_start);
    *portfolio = portfolio_start - withdrawal;
    if requested_withdrawal > portfolio_start && ruin_age.is_none() {
        *ruin_age = Some(age);
    }

    let return_fraction = source.next_return(year_index, inputs.expected_return, inputs.volatility);
    *portfolio = (*portfolio * (1.0 + return_fraction)).max(0.0);
    if *portfolio <= 0.0 && ruin_age.is_none() {
        *ruin_age = Some(age);
    }

    YearRecord {
        year: year_index + 1,
        age,
        portfolio_start,
        return_pct: return_fraction * 100.0,
        target_withdrawal: target.amount,
        requested_withdrawal,
        withdrawal,
        ss_received,
        one_time_expense,
        portfolio_end: *portfolio,
        ruined: ruin_age.is_some(),
        diagnostics: target.diagnostics,
    }
}

fn social_security_income(inputs: &SimulationInputs, age: u32) -> f64 {
    if age < inputs.ss_start_age {
        return 0.0;
    }
    let years_collecting = (age - inputs.ss_start_age) as i32;
    non_negative(inputs.social_security) * inputs.inflation_multiplier().powi(years_collecting)
}

// Recurs every fifth retirement year, inflated from today's money.
fn scheduled_expense(inputs: &SimulationInputs, year_index: u32, price_index: f64) -> f64 {
    if (year_index + 1) % 5 != 0 {
        return 0.0;
    }
    non_negative(inputs.one_time_expense) * price_index
}

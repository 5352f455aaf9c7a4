use serde::Serialize;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum WithdrawalStrategy {
    ConstantReal,
    ConstantPercent,
    Vpw,
    Guardrails,
    Rmd,
}

impl WithdrawalStrategy {
    pub const ALL: [WithdrawalStrategy; 5] = [
        WithdrawalStrategy::ConstantReal,
        WithdrawalStrategy::ConstantPercent,
        WithdrawalStrategy::Vpw,
        WithdrawalStrategy::Guardrails,
        WithdrawalStrategy::Rmd,
    ];

    pub fn label(self) -> &'static str {
        match self {
            WithdrawalStrategy::ConstantReal => "constant-real",
            WithdrawalStrategy::ConstantPercent => "constant-percent",
            WithdrawalStrategy::Vpw => "vpw",
            WithdrawalStrategy::Guardrails => "guardrails",
            WithdrawalStrategy::Rmd => "rmd",
        }
    }
}

/// Read-only scenario for one simulation call.
///
/// Rates (`expected_return`, `volatility`, `inflation_rate`) are in percentage
/// points per year. Spending bounds and `starting_withdrawal` use 0 for "not set".
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationInputs {
    pub current_age: u32,
    pub retirement_age: u32,
    pub planning_age: u32,
    pub starting_portfolio: f64,
    pub expected_return: f64,
    pub volatility: f64,
    pub inflation_rate: f64,
    pub social_security: f64,
    pub ss_start_age: u32,
    pub one_time_expense: f64,
    pub min_spending: f64,
    pub max_spending: f64,
    pub starting_withdrawal: f64,
    pub stock_allocation: f64,
}

impl SimulationInputs {
    pub fn horizon_years(&self) -> u32 {
        self.planning_age.saturating_sub(self.retirement_age)
    }

    pub fn inflation_multiplier(&self) -> f64 {
        1.0 + self.inflation_rate / 100.0
    }
}

impl Default for SimulationInputs {
    fn default() -> Self {
        Self {
            current_age: 60,
            retirement_age: 65,
            planning_age: 95,
            starting_portfolio: 1_000_000.0,
            expected_return: 7.0,
            volatility: 15.0,
            inflation_rate: 2.5,
            social_security: 0.0,
            ss_start_age: 67,
            one_time_expense: 0.0,
            min_spending: 0.0,
            max_spending: 0.0,
            starting_withdrawal: 0.0,
            stock_allocation: 60.0,
        }
    }
}

/// Strategy-specific values attached to a year for charting and debugging.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct YearDiagnostics {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_withdrawal: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vpw_pct: Option<f64>,
    #[serde(rename = "lifeExp", skip_serializing_if = "Option::is_none")]
    pub life_expectancy: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_rate: Option<f64>,
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct YearRecord {
    pub year: u32,
    pub age: u32,
    pub portfolio_start: f64,
    pub return_pct: f64,
    pub target_withdrawal: f64,
    pub requested_withdrawal: f64,
    pub withdrawal: f64,
    pub ss_received: f64,
    pub one_time_expense: f64,
    pub portfolio_end: f64,
    pub ruined: bool,
    #[serde(flatten)]
    pub diagnostics: YearDiagnostics,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationResult {
    pub strategy: WithdrawalStrategy,
    pub years: Vec<YearRecord>,
    pub final_balance: f64,
    pub total_withdrawals: f64,
    pub ruined: bool,
    pub ruin_age: Option<u32>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct PercentileBand {
    pub p10: f64,
    pub p25: f64,
    pub p50: f64,
    pub p75: f64,
    pub p90: f64,
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct YearBand {
    pub year: u32,
    pub age: u32,
    #[serde(flatten)]
    pub band: PercentileBand,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonteCarloSummary {
    pub strategy: WithdrawalStrategy,
    pub runs: u32,
    pub successes: u32,
    pub success_rate: f64,
    pub median_ruin_age: Option<f64>,
    pub year_bands: Vec<YearBand>,
    pub final_balance_band: PercentileBand,
    /// Sorted ascending.
    pub final_balances: Vec<f64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StrategyComparison {
    pub strategy: WithdrawalStrategy,
    pub success_rate: f64,
    pub median_final_balance: f64,
    pub p10_final_balance: f64,
    pub projected_final_balance: f64,
    pub projected_total_withdrawals: f64,
    pub projected_ruin_age: Option<u32>,
}

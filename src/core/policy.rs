use super::tables::{life_expectancy, vpw_percentage};
use super::types::{SimulationInputs, WithdrawalStrategy, YearDiagnostics};

pub const CONSTANT_REAL_RATE: f64 = 0.045;
pub const CONSTANT_PERCENT_RATE: f64 = 0.04;

/// Guardrails initial withdrawal rate, in percent of the starting balance.
pub const GUARDRAIL_INITIAL_RATE: f64 = 5.0;
pub const GUARDRAIL_UPPER: f64 = GUARDRAIL_INITIAL_RATE * 1.20;
pub const GUARDRAIL_LOWER: f64 = GUARDRAIL_INITIAL_RATE * 0.80;
pub const GUARDRAIL_ADJUSTMENT: f64 = 0.10;

/// What a policy sees of the year being simulated.
#[derive(Debug, Clone, Copy)]
pub struct YearContext {
    pub year_index: u32,
    pub age: u32,
    pub years_remaining: u32,
    pub portfolio_start: f64,
    /// Cumulative inflation since retirement, `(1 + inflation)^year_index`.
    pub price_index: f64,
}

#[derive(Debug, Clone, Copy)]
pub struct Target {
    pub amount: f64,
    pub diagnostics: YearDiagnostics,
}

/// Inflation-indexed floor and ceiling on the annual target. Zero disables a side.
#[derive(Debug, Clone, Copy)]
pub struct SpendingBounds {
    min: f64,
    max: f64,
}

impl SpendingBounds {
    pub fn from_inputs(inputs: &SimulationInputs) -> Self {
        Self {
            min: non_negative(inputs.min_spending),
            max: non_negative(inputs.max_spending),
        }
    }

    /// Floor first, then ceiling: when the floor exceeds the ceiling the ceiling wins.
    pub fn clamp(self, target: f64, price_index: f64) -> f64 {
        let mut amount = target;
        if self.min > 0.0 {
            amount = amount.max(self.min * price_index);
        }
        if self.max > 0.0 {
            amount = amount.min(self.max * price_index);
        }
        amount
    }
}

#[derive(Debug, Clone, Copy)]
enum PolicyState {
    ConstantReal { base: f64 },
    ConstantPercent,
    Vpw { stock_allocation: f64 },
    Guardrails { base: f64 },
    Rmd,
}

/// Per-path withdrawal policy. Holds the state a strategy carries between years.
#[derive(Debug, Clone)]
pub struct WithdrawalPolicy {
    state: PolicyState,
    bounds: SpendingBounds,
    starting_withdrawal: Option<f64>,
    starting_portfolio: f64,
    inflation_multiplier: f64,
}

impl WithdrawalPolicy {
    pub fn new(inputs: &SimulationInputs, strategy: WithdrawalStrategy) -> Self {
        let state = match strategy {
            WithdrawalStrategy::ConstantReal => PolicyState::ConstantReal { base: 0.0 },
            WithdrawalStrategy::ConstantPercent => PolicyState::ConstantPercent,
            WithdrawalStrategy::Vpw => PolicyState::Vpw {
                stock_allocation: inputs.stock_allocation,
            },
            WithdrawalStrategy::Guardrails => PolicyState::Guardrails { base: 0.0 },
            WithdrawalStrategy::Rmd => PolicyState::Rmd,
        };
        let starting_withdrawal =
            Some(non_negative(inputs.starting_withdrawal)).filter(|amount| *amount > 0.0);

        Self {
            state,
            bounds: SpendingBounds::from_inputs(inputs),
            starting_withdrawal,
            starting_portfolio: non_negative(inputs.starting_portfolio),
            inflation_multiplier: inputs.inflation_multiplier(),
        }
    }

    pub fn next_target(&mut self, ctx: &YearContext) -> Target {
        let first_year = ctx.year_index == 0;
        let override_amount = self.starting_withdrawal.filter(|_| first_year);
        let bounds = self.bounds;
        let clamp = |raw: f64| bounds.clamp(raw, ctx.price_index);

        match &mut self.state {
            PolicyState::ConstantReal { base } => {
                let raw = if first_year {
                    override_amount.unwrap_or(CONSTANT_REAL_RATE * self.starting_portfolio)
                } else {
                    *base * self.inflation_multiplier
                };
                let amount = clamp(raw);
                *base = amount;
                Target {
                    amount,
                    diagnostics: YearDiagnostics {
                        base_withdrawal: Some(amount),
                        ..YearDiagnostics::default()
                    },
                }
            }
            PolicyState::ConstantPercent => Target {
                amount: clamp(
                    override_amount.unwrap_or(CONSTANT_PERCENT_RATE * ctx.portfolio_start),
                ),
                diagnostics: YearDiagnostics::default(),
            },
            PolicyState::Vpw { stock_allocation } => {
                let pct = vpw_percentage(ctx.years_remaining, *stock_allocation);
                Target {
                    amount: clamp(override_amount.unwrap_or(pct / 100.0 * ctx.portfolio_start)),
                    diagnostics: YearDiagnostics {
                        vpw_pct: Some(pct),
                        ..YearDiagnostics::default()
                    },
                }
            }
            PolicyState::Rmd => {
                let years = life_expectancy(ctx.age);
                Target {
                    amount: clamp(override_amount.unwrap_or(ctx.portfolio_start / years)),
                    diagnostics: YearDiagnostics {
                        life_expectancy: Some(years),
                        ..YearDiagnostics::default()
                    },
                }
            }
            PolicyState::Guardrails { base } => {
                let initial = GUARDRAIL_INITIAL_RATE / 100.0 * self.starting_portfolio;
                let mut withdrawal = if first_year {
                    override_amount.unwrap_or(initial)
                } else {
                    *base
                };
                let current_rate = if ctx.portfolio_start > 0.0 {
                    withdrawal / ctx.portfolio_start * 100.0
                } else {
                    0.0
                };

                // An explicit year-one amount is taken as-is.
                let skip_check = first_year && override_amount.is_some();
                if !skip_check && ctx.portfolio_start > 0.0 {
                    if current_rate > GUARDRAIL_UPPER {
                        withdrawal *= 1.0 - GUARDRAIL_ADJUSTMENT;
                    } else if current_rate < GUARDRAIL_LOWER {
                        withdrawal *= 1.0 + GUARDRAIL_ADJUSTMENT;
                    }
                }

                let amount = clamp(withdrawal);
                *base = amount * self.inflation_multiplier;
                Target {
                    amount,
                    diagnostics: YearDiagnostics {
                        base_withdrawal: Some(amount),
                        current_rate: Some(current_rate),
                        ..YearDiagnostics::default()
                    },
                }
            }
        }
    }
}

pub(crate) fn non_negative(value: f64) -> f64 {
    if value.is_finite() { value.max(0.0) } else { 0.0 }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_approx(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() <= 1e-6,
            "expected {expected}, got {actual}"
        );
    }

    fn inputs() -> SimulationInputs {
        SimulationInputs {
            retirement_age: 65,
            planning_age: 95,
            starting_portfolio: 1_000_000.0,
            inflation_rate: 0.0,
            ..SimulationInputs::default()
        }
    }

    fn ctx(year_index: u32, portfolio_start: f64) -> YearContext {
        YearContext {
            year_index,
            age: 65 + year_index,
            years_remaining: 30 - year_index,
            portfolio_start,
            price_index: 1.0,
        }
    }

    #[test]
    fn bounds_apply_floor_then_ceiling() {
        let bounds = SpendingBounds { min: 50.0, max: 40.0 };
        assert_approx(bounds.clamp(10.0, 1.0), 40.0);
        assert_approx(bounds.clamp(100.0, 2.0), 80.0);

        let open = SpendingBounds { min: 0.0, max: 0.0 };
        assert_approx(open.clamp(123.0, 3.0), 123.0);
    }

    #[test]
    fn bounds_treat_negative_inputs_as_unset() {
        let mut i = inputs();
        i.min_spending = -10.0;
        i.max_spending = f64::NAN;
        let bounds = SpendingBounds::from_inputs(&i);
        assert_approx(bounds.clamp(77.0, 1.0), 77.0);
    }

    #[test]
    fn constant_percent_recomputes_from_current_balance() {
        let mut policy = WithdrawalPolicy::new(&inputs(), WithdrawalStrategy::ConstantPercent);
        assert_approx(policy.next_target(&ctx(0, 1_000_000.0)).amount, 40_000.0);
        assert_approx(policy.next_target(&ctx(1, 500_000.0)).amount, 20_000.0);
    }

    #[test]
    fn vpw_uses_years_remaining() {
        let mut policy = WithdrawalPolicy::new(&inputs(), WithdrawalStrategy::Vpw);
        let target = policy.next_target(&ctx(0, 1_000_000.0));
        assert_approx(target.diagnostics.vpw_pct.unwrap(), 4.2);
        assert_approx(target.amount, 42_000.0);
    }

    #[test]
    fn rmd_divides_by_life_expectancy() {
        let mut policy = WithdrawalPolicy::new(&inputs(), WithdrawalStrategy::Rmd);
        let target = policy.next_target(&ctx(0, 1_000_000.0));
        assert_approx(target.diagnostics.life_expectancy.unwrap(), 25.0);
        assert_approx(target.amount, 40_000.0);
    }

    #[test]
    fn starting_withdrawal_overrides_first_year_only() {
        let mut i = inputs();
        i.starting_withdrawal = 70_000.0;
        let mut policy = WithdrawalPolicy::new(&i, WithdrawalStrategy::ConstantPercent);
        assert_approx(policy.next_target(&ctx(0, 1_000_000.0)).amount, 70_000.0);
        assert_approx(policy.next_target(&ctx(1, 1_000_000.0)).amount, 40_000.0);
    }

    #[test]
    fn guardrails_cut_when_rate_exceeds_upper_guardrail() {
        let mut policy = WithdrawalPolicy::new(&inputs(), WithdrawalStrategy::Guardrails);
        assert_approx(policy.next_target(&ctx(0, 1_000_000.0)).amount, 50_000.0);

        let target = policy.next_target(&ctx(1, 700_000.0));
        assert!(target.diagnostics.current_rate.unwrap() > GUARDRAIL_UPPER);
        assert_approx(target.amount, 45_000.0);
    }

    #[test]
    fn guardrails_raise_when_rate_falls_below_lower_guardrail() {
        let mut policy = WithdrawalPolicy::new(&inputs(), WithdrawalStrategy::Guardrails);
        policy.next_target(&ctx(0, 1_000_000.0));
        let target = policy.next_target(&ctx(1, 1_500_000.0));
        assert!(target.diagnostics.current_rate.unwrap() < GUARDRAIL_LOWER);
        assert_approx(target.amount, 55_000.0);
    }

    #[test]
    fn guardrails_respect_explicit_first_year_amount() {
        let mut i = inputs();
        i.starting_withdrawal = 90_000.0;
        let mut policy = WithdrawalPolicy::new(&i, WithdrawalStrategy::Guardrails);
        let first = policy.next_target(&ctx(0, 1_000_000.0));
        assert_approx(first.amount, 90_000.0);
        assert_approx(first.diagnostics.current_rate.unwrap(), 9.0);

        let second = policy.next_target(&ctx(1, 1_000_000.0));
        assert_approx(second.amount, 81_000.0);
    }

    #[test]
    fn guardrails_hold_steady_on_empty_portfolio() {
        let mut policy = WithdrawalPolicy::new(&inputs(), WithdrawalStrategy::Guardrails);
        policy.next_target(&ctx(0, 1_000_000.0));
        let target = policy.next_target(&ctx(1, 0.0));
        assert_approx(target.amount, 50_000.0);
        assert_eq!(target.diagnostics.current_rate, Some(0.0));
    }
}

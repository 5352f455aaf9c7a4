//! Fixed lookup tables consulted by the RMD and VPW policies.

pub const DEFAULT_STOCK_ALLOCATION: f64 = 60.0;

/// Lower bound on remaining life expectancy, so RMD division is always safe.
pub const MIN_LIFE_EXPECTANCY: f64 = 2.0;

/// Remaining life expectancy in years for someone of `age`.
pub fn life_expectancy(age: u32) -> f64 {
    let age = age as f64;
    let years = if age < 60.0 {
        95.0 - age
    } else if age < 70.0 {
        90.0 - age
    } else if age < 80.0 {
        87.0 - age
    } else if age < 90.0 {
        94.0 - age
    } else {
        100.0 - age
    };
    years.max(MIN_LIFE_EXPECTANCY)
}

/// Withdrawal percentage (0..=100) for a VPW schedule with `years_remaining`
/// left in the plan and the given equity share in percent.
pub fn vpw_percentage(years_remaining: u32, stock_allocation: f64) -> f64 {
    let stocks = if stock_allocation.is_finite() {
        stock_allocation.clamp(0.0, 100.0)
    } else {
        DEFAULT_STOCK_ALLOCATION
    };
    let pct = match years_remaining {
        30.. => 3.0 + 0.02 * stocks,
        25..=29 => 3.5 + 0.02 * stocks,
        20..=24 => 4.0 + 0.025 * stocks,
        15..=19 => 5.0 + 0.03 * stocks,
        10..=14 => 6.5 + 0.035 * stocks,
        5..=9 => 9.0 + 0.04 * stocks,
        _ => 20.0 + 2.0 * years_remaining as f64,
    };
    pct.min(100.0)
}

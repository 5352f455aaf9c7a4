use std::f64::consts::PI;

use rand::RngCore;

/// Supplies one annual return per simulated year, as a fraction (0.07 = 7%).
pub trait ReturnSource {
    fn next_return(&mut self, year_index: u32, mean: f64, volatility: f64) -> f64;
}

/// Always returns the mean. Never touches an RNG.
#[derive(Debug, Clone, Copy, Default)]
pub struct Deterministic;

impl ReturnSource for Deterministic {
    fn next_return(&mut self, _year_index: u32, mean: f64, _volatility: f64) -> f64 {
        mean / 100.0
    }
}

/// Normally distributed returns drawn from an injected generator.
#[derive(Debug, Clone)]
pub struct Stochastic<R> {
    rng: R,
}

impl<R: RngCore> Stochastic<R> {
    pub fn new(rng: R) -> Self {
        Self { rng }
    }
}

impl<R: RngCore> ReturnSource for Stochastic<R> {
    fn next_return(&mut self, _year_index: u32, mean: f64, volatility: f64) -> f64 {
        generate_return(&mut self.rng, mean, volatility, false)
    }
}

/// Replays fixed annual returns in percent, then falls back to the mean.
#[derive(Debug, Clone, Default)]
pub struct ScriptedReturns {
    returns_pct: Vec<f64>,
}

impl ScriptedReturns {
    pub fn new(returns_pct: Vec<f64>) -> Self {
        Self { returns_pct }
    }
}

impl ReturnSource for ScriptedReturns {
    fn next_return(&mut self, year_index: u32, mean: f64, _volatility: f64) -> f64 {
        self.returns_pct
            .get(year_index as usize)
            .copied()
            .unwrap_or(mean)
            / 100.0
    }
}

/// Annual return fraction for `mean`/`volatility` given in percent.
///
/// Deterministic mode returns exactly `mean / 100` and consumes no entropy.
pub fn generate_return<R: RngCore + ?Sized>(
    rng: &mut R,
    mean: f64,
    volatility: f64,
    deterministic: bool,
) -> f64 {
    if deterministic {
        return mean / 100.0;
    }
    let z = standard_normal(rng);
    (mean + z * volatility) / 100.0
}

/// Box-Muller deviate. One value per call; the paired sine deviate is discarded.
pub fn standard_normal<R: RngCore + ?Sized>(rng: &mut R) -> f64 {
    let u = open_unit(rng);
    let v = open_unit(rng);
    (-2.0 * u.ln()).sqrt() * (2.0 * PI * v).cos()
}

// Uniform in the open interval (0, 1). 52 bits keep `bits + 0.5` exact.
fn open_unit<R: RngCore + ?Sized>(rng: &mut R) -> f64 {
    const DENOM: f64 = (1_u64 << 52) as f64;
    let bits = rng.next_u64() >> 12;
    ((bits as f64) + 0.5) / DENOM
}

pub fn derive_seed(base_seed: u64, run_index: u32) -> u64 {
    splitmix64(base_seed ^ ((run_index as u64) << 17) ^ run_index as u64)
}

fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9E3779B97F4A7C15);
    let mut z = x;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58476D1CE4E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D049BB133111EB);
    z ^ (z >> 31)
}

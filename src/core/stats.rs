use super::types::PercentileBand;

pub fn sort_ascending(values: &mut [f64]) {
    values.sort_by(|a, b| a.total_cmp(b));
}

/// Linearly interpolated percentile of `sorted` (ascending), `p` in 0..=100.
/// Returns 0 for an empty slice.
pub fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }

    let n = sorted.len();
    if n == 1 {
        return sorted[0];
    }

    let p = if p.is_finite() {
        p.clamp(0.0, 100.0)
    } else if p > 0.0 {
        100.0
    } else {
        0.0
    };
    let rank = (p / 100.0) * (n as f64 - 1.0);
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;

    if lower == upper {
        sorted[lower]
    } else {
        let w = rank - lower as f64;
        sorted[lower] * (1.0 - w) + sorted[upper] * w
    }
}

pub fn percentile_band(sorted: &[f64]) -> PercentileBand {
    PercentileBand {
        p10: percentile(sorted, 10.0),
        p25: percentile(sorted, 25.0),
        p50: percentile(sorted, 50.0),
        p75: percentile(sorted, 75.0),
        p90: percentile(sorted, 90.0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::{prop_assert, proptest};
    use proptest::collection::vec;

    fn assert_approx(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() <= 1e-9,
            "expected {expected}, got {actual}"
        );
    }

    #[test]
    fn median_of_one_to_ten_interpolates() {
        let values: Vec<f64> = (1..=10).map(f64::from).collect();
        assert_approx(percentile(&values, 50.0), 5.5);
    }

    #[test]
    fn tenth_percentile_of_one_to_hundred() {
        let values: Vec<f64> = (1..=100).map(f64::from).collect();
        assert_approx(percentile(&values, 10.0), 10.9);
    }

    #[test]
    fn percentile_interpolates_between_points() {
        assert_approx(percentile(&[1.0, 2.0, 3.0, 4.0], 25.0), 1.75);
    }

    #[test]
    fn empty_and_single_inputs() {
        assert_eq!(percentile(&[], 50.0), 0.0);
        assert_eq!(percentile(&[42.0], 90.0), 42.0);
    }

    #[test]
    fn out_of_range_percentiles_hit_the_ends() {
        let values = [1.0, 5.0, 9.0];
        assert_eq!(percentile(&values, -10.0), 1.0);
        assert_eq!(percentile(&values, 250.0), 9.0);
        assert_eq!(percentile(&values, f64::NAN), 1.0);
    }

    #[test]
    fn band_is_ordered() {
        let mut values = vec![9.0, 1.0, 4.0, 7.0, 3.0];
        sort_ascending(&mut values);
        assert_eq!(values, vec![1.0, 3.0, 4.0, 7.0, 9.0]);
        let band = percentile_band(&values);
        assert_eq!(band.p50, 4.0);
        assert!(band.p10 <= band.p25 && band.p25 <= band.p50);
        assert!(band.p50 <= band.p75 && band.p75 <= band.p90);
    }

    proptest! {
        #[test]
        fn prop_percentile_stays_within_range_and_is_monotone(
            mut values in vec(-1e9f64..1e9, 1..64),
            p in 0.0f64..100.0,
            q in 0.0f64..100.0
        ) {
            sort_ascending(&mut values);
            let lo = values[0];
            let hi = values[values.len() - 1];
            let at_p = percentile(&values, p);
            prop_assert!(at_p >= lo - 1e-6 && at_p <= hi + 1e-6);
            let (small, large) = if p <= q { (p, q) } else { (q, p) };
            prop_assert!(percentile(&values, small) <= percentile(&values, large) + 1e-6);
        }
    }
}

//! Axis tick selection and label formatting.

const NICE_STEPS: [f64; 5] = [1.0, 2.0, 2.5, 5.0, 10.0];

/// Tick values inside `[lo, hi]` with at most `max_bins` intervals.
///
/// The step is the smallest of 1, 2, 2.5, 5 or 10 times a power of ten that
/// covers the range in `max_bins` intervals.
pub fn nice_ticks(lo: f64, hi: f64, max_bins: u32) -> Vec<f64> {
    if !lo.is_finite() || !hi.is_finite() || hi <= lo {
        return vec![lo];
    }
    let step = tick_step(lo, hi, max_bins.max(1));
    let decimals = decimals_for_step(step);
    let first = (lo / step - 1e-9).ceil() as i64;
    let last = (hi / step + 1e-9).floor() as i64;
    let ticks: Vec<f64> = (first..=last)
        .map(|k| round_to(k as f64 * step, decimals))
        .filter(|v| *v >= lo - step * 1e-9 && *v <= hi + step * 1e-9)
        .collect();
    if ticks.is_empty() {
        vec![lo]
    } else {
        ticks
    }
}

/// Round so that `0.6000000000000001` prints and compares as `0.6`.
fn round_to(value: f64, decimals: usize) -> f64 {
    let factor = 10f64.powi(decimals as i32);
    let rounded = (value * factor).round() / factor;
    if rounded == 0.0 {
        0.0
    } else {
        rounded
    }
}

/// The step `nice_ticks` would choose for this range.
pub fn tick_step(lo: f64, hi: f64, max_bins: u32) -> f64 {
    let raw = (hi - lo) / max_bins as f64;
    let scale = 10f64.powf(raw.log10().floor());
    for candidate in NICE_STEPS {
        let step = candidate * scale;
        if step < raw * (1.0 - 1e-9) {
            continue;
        }
        let start = (lo / step).floor() * step;
        let intervals = ((hi - start) / step - 1e-9).ceil();
        if intervals <= max_bins as f64 {
            return step;
        }
    }
    10.0 * scale
}

/// Number of decimals needed to print ticks spaced `step` apart.
pub fn decimals_for_step(step: f64) -> usize {
    for decimals in 0..8 {
        let scaled = step * 10f64.powi(decimals as i32);
        if (scaled - scaled.round()).abs() < 1e-6 * scaled.abs().max(1.0) {
            return decimals;
        }
    }
    8
}

pub fn format_tick(value: f64, decimals: usize) -> String {
    format!("{:.*}", decimals, value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn picks_round_steps() {
        assert_eq!(nice_ticks(0.0, 5.0, 25), vec![
            0.0, 0.2, 0.4, 0.6, 0.8, 1.0, 1.2, 1.4, 1.6, 1.8, 2.0, 2.2, 2.4, 2.6, 2.8, 3.0,
            3.2, 3.4, 3.6, 3.8, 4.0, 4.2, 4.4, 4.6, 4.8, 5.0
        ]);
        assert_eq!(nice_ticks(0.0, 100.0, 4), vec![0.0, 25.0, 50.0, 75.0, 100.0]);
        assert_eq!(nice_ticks(0.0, 100.0, 10), vec![
            0.0, 10.0, 20.0, 30.0, 40.0, 50.0, 60.0, 70.0, 80.0, 90.0, 100.0
        ]);
    }

    #[test]
    fn never_exceeds_bin_count() {
        for (lo, hi) in [(950.0, 1212.5), (0.0, 137.3), (-12.0, 4.0), (0.001, 0.0173)] {
            for bins in [1, 3, 7, 25, 50] {
                let ticks = nice_ticks(lo, hi, bins);
                assert!(!ticks.is_empty());
                assert!(ticks.len() as u32 <= bins + 1, "{lo}..{hi} bins {bins}: {ticks:?}");
                assert!(ticks.iter().all(|t| *t >= lo - 1e-9 && *t <= hi + 1e-9));
            }
        }
    }

    #[test]
    fn degenerate_range_yields_single_tick() {
        assert_eq!(nice_ticks(3.0, 3.0, 10), vec![3.0]);
    }

    #[test]
    fn decimals_follow_step() {
        assert_eq!(decimals_for_step(25.0), 0);
        assert_eq!(decimals_for_step(0.2), 1);
        assert_eq!(decimals_for_step(2.5), 1);
        assert_eq!(decimals_for_step(0.25), 2);
        assert_eq!(format_tick(1.2000001, 1), "1.2");
    }
}

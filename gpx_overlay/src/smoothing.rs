//! One-dimensional Gaussian smoothing of the elevation series.

use ndarray::{s, Array1};

/// Kernel half-width in standard deviations.
const TRUNCATE: f64 = 4.0;

/// Smooth `values` with a Gaussian of standard deviation `sigma` samples.
///
/// `sigma == 0` returns the input untouched. Edges are extended by
/// half-sample symmetric reflection (`d c b a | a b c d | d c b a`).
pub fn gaussian_smooth(values: &[f64], sigma: f64) -> Vec<f64> {
    if sigma <= 0.0 || values.len() < 2 {
        return values.to_vec();
    }

    let kernel = gaussian_kernel(sigma);
    let radius = kernel.len() / 2;
    let n = values.len();

    let padded: Array1<f64> = (0..n + 2 * radius)
        .map(|i| values[reflect_index(i as isize - radius as isize, n)])
        .collect();

    // The kernel is symmetric, so correlation and convolution coincide.
    (0..n)
        .map(|i| padded.slice(s![i..i + kernel.len()]).dot(&kernel))
        .collect()
}

fn gaussian_kernel(sigma: f64) -> Array1<f64> {
    let radius = (TRUNCATE * sigma + 0.5) as isize;
    let two_var = 2.0 * sigma * sigma;
    let mut kernel: Array1<f64> = (-radius..=radius)
        .map(|x| (-((x * x) as f64) / two_var).exp())
        .collect();
    let total = kernel.sum();
    kernel.mapv_inplace(|w| w / total);
    kernel
}

/// Map an out-of-range index back into `0..n` by repeated reflection.
fn reflect_index(i: isize, n: usize) -> usize {
    let n = n as isize;
    let period = 2 * n;
    let mut m = i.rem_euclid(period);
    if m >= n {
        m = period - 1 - m;
    }
    m as usize
}

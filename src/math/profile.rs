//! Peak-normalised line profiles.
//!
//! - `gaussian(x, c, σ) = exp(-(x - c)² / (2σ²))`
//! - `sincgauss(x, c, σ, w)`: the Gaussian convolved with the sinc instrument
//!   line shape `sinc(π x / w)`, normalised so the peak is 1:
//!
//!   `P(b; a) = exp(-b²) Re[erf(a + ib)] / erf(a)`,
//!   `a = π σ / (√2 w)`, `b = (x - c) / (√2 σ)`.
//!
//! Numerical notes:
//! - `Re erf(a + ib)` uses the Abramowitz & Stegun 7.1.29 series. Multiplying
//!   it by `exp(-b²)` lets every `cosh(nb)`/`sinh(nb)` product collapse into
//!   `exp(-(b ∓ n/2)²)`, which never overflows, and only the terms with `n`
//!   near `2|b|` survive, so the sum runs over a fixed-width window.
//! - As `w → 0` (`a → ∞`) `exp(-a²)` underflows to zero and the profile is
//!   exactly the Gaussian.

use std::f64::consts::PI;

/// Half-width (in `n`) of the series window around `n ≈ 2|b|`.
const SERIES_HALF_WIDTH: i64 = 14;

const SQRT_2PI: f64 = 2.506_628_274_631_000_5;

/// Unit-peak Gaussian.
pub fn gaussian(x: f64, center: f64, sigma: f64) -> f64 {
    let d = (x - center) / sigma;
    (-0.5 * d * d).exp()
}

/// `exp(-b²) · Re[erf(a + ib)]` for `a > 0`.
pub fn scaled_re_erf(a: f64, b: f64) -> f64 {
    let b = b.abs();
    let exp_b2 = (-b * b).exp();
    let mut out = libm::erf(a) * exp_b2;

    let exp_a2 = (-a * a).exp();
    if exp_a2 == 0.0 {
        return out;
    }

    let (sin_2ab, cos_2ab) = (2.0 * a * b).sin_cos();
    out += exp_a2 / (2.0 * PI * a) * exp_b2 * (1.0 - cos_2ab);

    let centre = (2.0 * b).round() as i64;
    let n_lo = (centre - SERIES_HALF_WIDTH).max(1);
    let n_hi = centre + SERIES_HALF_WIDTH;

    let mut sum = 0.0;
    for n in n_lo..=n_hi {
        let nf = n as f64;
        let half = 0.5 * nf;
        let minus = (-(b - half) * (b - half)).exp();
        let plus = (-(b + half) * (b + half)).exp();
        // exp(-n²/4 - b²) cosh(nb) and exp(-n²/4 - b²) sinh(nb)
        let cosh_term = 0.5 * (minus + plus);
        let sinh_term = 0.5 * (minus - plus);
        let base = (-0.25 * nf * nf - b * b).exp();
        sum += (2.0 * a * base - 2.0 * a * cos_2ab * cosh_term + nf * sin_2ab * sinh_term)
            / (nf * nf + 4.0 * a * a);
    }

    out + 2.0 / PI * exp_a2 * sum
}

/// Dimensionless sinc/Gaussian width ratio `a = π σ / (√2 w)`.
pub fn sincgauss_ratio(sigma: f64, sinc_width: f64) -> f64 {
    PI * sigma / (std::f64::consts::SQRT_2 * sinc_width)
}

/// Unit-peak sinc-convolved Gaussian.
pub fn sincgauss(x: f64, center: f64, sigma: f64, sinc_width: f64) -> f64 {
    let a = sincgauss_ratio(sigma, sinc_width);
    let b = (x - center) / (std::f64::consts::SQRT_2 * sigma);
    scaled_re_erf(a, b) / libm::erf(a)
}

/// Integral of the unit-peak Gaussian: `√(2π) σ`.
pub fn gaussian_area(sigma: f64) -> f64 {
    SQRT_2PI * sigma
}

/// Integral of the unit-peak sincgauss: `√(2π) σ / erf(a)`.
pub fn sincgauss_area(sigma: f64, sinc_width: f64) -> f64 {
    SQRT_2PI * sigma / libm::erf(sincgauss_ratio(sigma, sinc_width))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Direct quadrature of the defining Fourier integral:
    /// `∫₀ᴸ exp(-2π²σ²k²) cos(2πkx) dk / ∫₀ᴸ exp(-2π²σ²k²) dk`, `L = 1 / (2w)`.
    fn sincgauss_by_quadrature(x: f64, sigma: f64, w: f64) -> f64 {
        let l = 0.5 / w;
        let n = 20_000;
        let h = l / n as f64;
        let alpha = 2.0 * PI * PI * sigma * sigma;
        let mut num = 0.0;
        let mut den = 0.0;
        for i in 0..=n {
            let k = i as f64 * h;
            let weight = if i == 0 || i == n {
                1.0
            } else if i % 2 == 1 {
                4.0
            } else {
                2.0
            };
            let g = (-alpha * k * k).exp();
            num += weight * g * (2.0 * PI * k * x).cos();
            den += weight * g;
        }
        num / den
    }

    #[test]
    fn gaussian_peak_and_width() {
        assert!((gaussian(3.0, 3.0, 0.7) - 1.0).abs() < 1e-15);
        assert!((gaussian(4.0, 3.0, 1.0) - (-0.5f64).exp()).abs() < 1e-15);
    }

    #[test]
    fn sincgauss_is_unit_peak_and_symmetric() {
        for &(sigma, w) in &[(0.3, 2.5), (1.0, 1.0), (4.0, 0.5)] {
            assert!((sincgauss(10.0, 10.0, sigma, w) - 1.0).abs() < 1e-12);
            for &dx in &[0.2, 1.3, 7.5] {
                let left = sincgauss(10.0 - dx, 10.0, sigma, w);
                let right = sincgauss(10.0 + dx, 10.0, sigma, w);
                assert!((left - right).abs() < 1e-12);
            }
        }
    }

    #[test]
    fn sincgauss_matches_fourier_quadrature() {
        for &(sigma, w) in &[(0.3, 2.5), (1.0, 1.0), (2.5, 1.5)] {
            for &x in &[0.0, 0.4, 1.1, 2.7, 5.0, 12.0] {
                let series = sincgauss(x, 0.0, sigma, w);
                let quad = sincgauss_by_quadrature(x, sigma, w);
                assert!(
                    (series - quad).abs() < 1e-6,
                    "sigma={sigma} w={w} x={x}: series={series} quad={quad}"
                );
            }
        }
    }

    #[test]
    fn sincgauss_reduces_to_gaussian_for_narrow_sinc() {
        let sigma = 2.0;
        for i in 0..200 {
            let x = -20.0 + 0.2 * i as f64;
            let g = gaussian(x, 0.0, sigma);
            let sg = sincgauss(x, 0.0, sigma, 1e-3);
            assert!((g - sg).abs() < 1e-12, "x={x}: {g} vs {sg}");
        }
    }

    #[test]
    fn narrow_line_tends_to_sinc() {
        // σ ≪ w: the profile approaches sinc(π x / w).
        let w = 2.0;
        let x: f64 = 1.0;
        let sinc = (PI * x / w).sin() / (PI * x / w);
        assert!((sincgauss(x, 0.0, 1e-3, w) - sinc).abs() < 1e-4);
    }

    #[test]
    fn areas() {
        assert!((gaussian_area(1.0) - (2.0 * PI).sqrt()).abs() < 1e-12);
        // Narrow sinc: same area as the Gaussian.
        assert!((sincgauss_area(1.5, 1e-4) - gaussian_area(1.5)).abs() < 1e-12);
        // Wider sinc spreads the profile, so the unit-peak area grows.
        assert!(sincgauss_area(1.5, 3.0) > gaussian_area(1.5));
    }
}

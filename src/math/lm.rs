//! Bounded Levenberg–Marquardt least squares.
//!
//! Minimises `½ Σ rᵢ(p)²` subject to box constraints `lower ≤ p ≤ upper`.
//!
//! - Jacobian by forward differences (backward when the forward probe would
//!   leave the box).
//! - Damped normal equations `(JᵀJ + λ D) δ = -Jᵀr`, with `D = diag(JᵀJ)`
//!   floored so that parameters with a vanishing column still get damped.
//! - Every trial point is projected back onto the box before it is evaluated;
//!   a step is accepted only if it lowers the sum of squares.

use nalgebra::DVector;
use nalgebra::DMatrix;

use super::ols::{normal_matrix, solve_least_squares};

/// Relative finite-difference step (≈ √ε).
const FD_STEP: f64 = 1.49e-8;
/// Floor for the damping diagonal.
const DIAG_FLOOR: f64 = 1e-12;
/// Sums of squares at or below this count as an exact fit.
const ZERO_SSR: f64 = 1e-30;

/// Residual vector `r(p)` of a least-squares problem.
pub trait ResidualModel {
    fn n_residuals(&self) -> usize;

    /// Write `r(params)` into `out` (length [`ResidualModel::n_residuals`]).
    fn residuals(&self, params: &[f64], out: &mut [f64]);
}

/// Configuration for Levenberg-Marquardt optimization.
#[derive(Debug, Clone)]
pub struct LmConfig {
    pub max_iterations: usize,
    /// Relative decrease of the sum of squares below which an accepted step ends the fit.
    pub ftol: f64,
    /// Relative step size below which an accepted step ends the fit.
    pub xtol: f64,
    /// Max-norm of the projected gradient below which the fit ends.
    pub gtol: f64,
    pub initial_lambda: f64,
    pub lambda_up: f64,
    pub lambda_down: f64,
    /// Damping beyond which no improving step is considered possible.
    pub max_lambda: f64,
}

impl Default for LmConfig {
    fn default() -> Self {
        Self {
            max_iterations: 200,
            ftol: 1e-12,
            xtol: 1e-10,
            gtol: 1e-14,
            initial_lambda: 1e-3,
            lambda_up: 10.0,
            lambda_down: 0.1,
            max_lambda: 1e16,
        }
    }
}

/// Why the optimiser stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    SmallCostChange,
    SmallStep,
    SmallGradient,
    ZeroResidual,
    /// Damping exceeded `max_lambda` without finding a better point.
    NoImprovement,
    IterationLimit,
    /// The residuals at the starting point were not finite.
    NonFinite,
}

impl Termination {
    /// Whether the stop reason is a proper local minimum.
    pub fn converged(self) -> bool {
        !matches!(self, Termination::IterationLimit | Termination::NonFinite)
    }
}

#[derive(Debug, Clone)]
pub struct LmReport {
    pub params: Vec<f64>,
    /// Final sum of squared residuals.
    pub ssr: f64,
    pub iterations: usize,
    pub termination: Termination,
    /// Jacobian at `params` (empty when `termination` is `NonFinite`).
    pub jacobian: DMatrix<f64>,
}

fn sum_sq(r: &[f64]) -> f64 {
    r.iter().map(|v| v * v).sum()
}

fn project(params: &mut [f64], lower: &[f64], upper: &[f64]) {
    for ((p, &lo), &hi) in params.iter_mut().zip(lower).zip(upper) {
        *p = p.clamp(lo, hi);
    }
}

/// Forward-difference Jacobian at `params`, given `r0 = r(params)`.
pub fn jacobian<M: ResidualModel + ?Sized>(
    model: &M,
    params: &[f64],
    upper: &[f64],
    r0: &[f64],
) -> DMatrix<f64> {
    let n = r0.len();
    let mut jac = DMatrix::zeros(n, params.len());
    let mut probe = params.to_vec();
    let mut r = vec![0.0; n];

    for j in 0..params.len() {
        let h = FD_STEP * params[j].abs().max(1.0);
        probe[j] = if params[j] + h > upper[j] {
            params[j] - h
        } else {
            params[j] + h
        };
        let h = probe[j] - params[j];
        model.residuals(&probe, &mut r);
        for i in 0..n {
            jac[(i, j)] = (r[i] - r0[i]) / h;
        }
        probe[j] = params[j];
    }
    jac
}

/// Gradient components that point out of the box are zeroed for parameters
/// sitting on a bound.
fn projected_gradient_norm(g: &DVector<f64>, params: &[f64], lower: &[f64], upper: &[f64]) -> f64 {
    g.iter()
        .enumerate()
        .map(|(i, &gi)| {
            let blocked = (params[i] <= lower[i] && gi > 0.0) || (params[i] >= upper[i] && gi < 0.0);
            if blocked { 0.0 } else { gi.abs() }
        })
        .fold(0.0, f64::max)
}

/// Run the optimiser from `initial` (projected onto the box first).
pub fn minimize<M: ResidualModel + ?Sized>(
    model: &M,
    initial: &[f64],
    lower: &[f64],
    upper: &[f64],
    config: &LmConfig,
) -> LmReport {
    let n = model.n_residuals();
    let mut params = initial.to_vec();
    project(&mut params, lower, upper);

    let mut r = vec![0.0; n];
    model.residuals(&params, &mut r);
    let mut ssr = sum_sq(&r);
    if !ssr.is_finite() {
        return LmReport {
            params,
            ssr,
            iterations: 0,
            termination: Termination::NonFinite,
            jacobian: DMatrix::zeros(0, 0),
        };
    }

    let mut lambda = config.initial_lambda;
    let mut termination = None;
    let mut iterations = 0;
    let mut trial = params.clone();
    let mut r_trial = vec![0.0; n];

    if ssr <= ZERO_SSR {
        termination = Some(Termination::ZeroResidual);
    }

    while termination.is_none() && iterations < config.max_iterations {
        iterations += 1;

        let jac = jacobian(model, &params, upper, &r);
        let jtj = normal_matrix(&jac);
        let g = jac.tr_mul(&DVector::from_column_slice(&r));
        if projected_gradient_norm(&g, &params, lower, upper) <= config.gtol {
            termination = Some(Termination::SmallGradient);
            break;
        }
        let neg_g = -&g;

        loop {
            let mut damped = jtj.clone();
            for i in 0..damped.nrows() {
                damped[(i, i)] += lambda * jtj[(i, i)].max(DIAG_FLOOR);
            }

            let improved = match solve_least_squares(&damped, &neg_g) {
                Some(delta) => {
                    for (t, (p, d)) in trial.iter_mut().zip(params.iter().zip(delta.iter())) {
                        *t = p + d;
                    }
                    project(&mut trial, lower, upper);
                    model.residuals(&trial, &mut r_trial);
                    let ssr_trial = sum_sq(&r_trial);
                    (ssr_trial.is_finite() && ssr_trial < ssr).then_some(ssr_trial)
                }
                None => None,
            };

            match improved {
                Some(ssr_trial) => {
                    let step_norm = trial
                        .iter()
                        .zip(&params)
                        .map(|(t, p)| (t - p) * (t - p))
                        .sum::<f64>()
                        .sqrt();
                    let param_norm = params.iter().map(|p| p * p).sum::<f64>().sqrt();
                    let decrease = ssr - ssr_trial;

                    params.copy_from_slice(&trial);
                    std::mem::swap(&mut r, &mut r_trial);
                    let previous = ssr;
                    ssr = ssr_trial;
                    lambda = (lambda * config.lambda_down).max(f64::MIN_POSITIVE);

                    if ssr <= ZERO_SSR {
                        termination = Some(Termination::ZeroResidual);
                    } else if decrease <= config.ftol * previous {
                        termination = Some(Termination::SmallCostChange);
                    } else if step_norm <= config.xtol * (param_norm + config.xtol) {
                        termination = Some(Termination::SmallStep);
                    }
                    break;
                }
                None => {
                    lambda *= config.lambda_up;
                    if lambda > config.max_lambda {
                        termination = Some(Termination::NoImprovement);
                        break;
                    }
                }
            }
        }
    }

    let termination = termination.unwrap_or(Termination::IterationLimit);
    let jacobian = jacobian(model, &params, upper, &r);
    LmReport {
        params,
        ssr,
        iterations,
        termination,
        jacobian,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// y = a · exp(-b · x)
    struct Decay {
        x: Vec<f64>,
        y: Vec<f64>,
    }

    impl Decay {
        fn new(a: f64, b: f64) -> Self {
            let x: Vec<f64> = (0..40).map(|i| i as f64 * 0.1).collect();
            let y = x.iter().map(|&x| a * (-b * x).exp()).collect();
            Self { x, y }
        }
    }

    impl ResidualModel for Decay {
        fn n_residuals(&self) -> usize {
            self.x.len()
        }

        fn residuals(&self, p: &[f64], out: &mut [f64]) {
            for ((o, &x), &y) in out.iter_mut().zip(&self.x).zip(&self.y) {
                *o = p[0] * (-p[1] * x).exp() - y;
            }
        }
    }

    #[test]
    fn recovers_exact_parameters() {
        let problem = Decay::new(3.0, 0.7);
        let report = minimize(
            &problem,
            &[1.0, 0.1],
            &[0.0, 0.0],
            &[10.0, 5.0],
            &LmConfig::default(),
        );
        assert!(report.termination.converged(), "{:?}", report.termination);
        assert!((report.params[0] - 3.0).abs() < 1e-6);
        assert!((report.params[1] - 0.7).abs() < 1e-6);
        assert!(report.ssr < 1e-12);
        assert_eq!(report.jacobian.shape(), (40, 2));
    }

    #[test]
    fn respects_bounds() {
        let problem = Decay::new(3.0, 0.7);
        let report = minimize(
            &problem,
            &[1.0, 0.1],
            &[0.0, 0.0],
            &[2.0, 5.0],
            &LmConfig::default(),
        );
        assert!(report.params[0] <= 2.0);
        assert!((report.params[0] - 2.0).abs() < 1e-6);
        assert!(report.params[1] >= 0.0 && report.params[1] <= 5.0);
    }

    #[test]
    fn start_outside_box_is_projected() {
        let problem = Decay::new(1.0, 0.5);
        let report = minimize(
            &problem,
            &[50.0, -3.0],
            &[0.0, 0.0],
            &[10.0, 5.0],
            &LmConfig::default(),
        );
        assert!(report.params.iter().all(|p| p.is_finite()));
        assert!(report.params[0] <= 10.0 && report.params[1] >= 0.0);
    }

    #[test]
    fn iteration_cap_is_reported() {
        let problem = Decay::new(3.0, 0.7);
        let config = LmConfig {
            max_iterations: 1,
            ..LmConfig::default()
        };
        let report = minimize(&problem, &[0.5, 3.0], &[0.0, 0.0], &[10.0, 5.0], &config);
        assert_eq!(report.iterations, 1);
        assert_eq!(report.termination, Termination::IterationLimit);
        assert!(!report.termination.converged());
    }

    #[test]
    fn non_finite_start_stops_immediately() {
        let mut problem = Decay::new(3.0, 0.7);
        problem.y[3] = f64::NAN;
        let report = minimize(&problem, &[1.0, 1.0], &[0.0, 0.0], &[10.0, 5.0], &LmConfig::default());
        assert_eq!(report.termination, Termination::NonFinite);
        assert_eq!(report.iterations, 0);
    }
}

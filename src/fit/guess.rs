//! Initial parameter guesses.
//!
//! Three strategies share one finishing step (amplitudes, continuum, clipping
//! into the bounds):
//!
//! - `Heuristic`: grid search over velocity for each velocity slot, scoring
//!   the summed intensity at the shifted line positions, then a parabolic
//!   refinement around the best grid point. Broadening starts at a fixed value.
//! - `Template`: caller-supplied kinematics, one entry per line group.
//! - `Predictor`: an external model (e.g. a trained network) that may decline;
//!   declining or answering with the wrong shape falls back to the heuristic.

use std::fmt;
use std::ops::Range;

use tracing::{debug, warn};

use crate::domain::{Kinematics, LineComplex, SPEED_OF_LIGHT_KMS, SpectralAxis};
use crate::error::FitError;
use crate::models::{LineModel, ParamBounds, PhysicalParams, encode};

/// Samples either side of the guessed centre searched for the peak height.
const PEAK_HALF_WINDOW: usize = 4;
/// Cap on the number of velocity grid points per slot.
const MAX_VELOCITY_GRID: f64 = 20_000.0;

/// External source of initial kinematics.
pub trait GuessPredictor: Sync {
    /// One [`Kinematics`] per line group (in `LineComplex::groups` order), or
    /// `None` to decline.
    fn predict(&self, axis: &SpectralAxis, spectrum: &[f64], complex: &LineComplex) -> Option<Vec<Kinematics>>;
}

#[derive(Clone, Default)]
pub enum GuessStrategy<'a> {
    #[default]
    Heuristic,
    Template(Vec<Kinematics>),
    Predictor(&'a dyn GuessPredictor),
}

impl fmt::Debug for GuessStrategy<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GuessStrategy::Heuristic => f.write_str("Heuristic"),
            GuessStrategy::Template(k) => f.debug_tuple("Template").field(k).finish(),
            GuessStrategy::Predictor(_) => f.write_str("Predictor(..)"),
        }
    }
}

/// Everything the guess needs to know about the spectrum being fit.
pub struct GuessInput<'a> {
    pub axis: &'a SpectralAxis,
    /// Background-subtracted samples over the whole axis.
    pub spectrum: &'a [f64],
    pub window: Range<usize>,
    pub bounds: &'a ParamBounds,
    pub default_broadening: f64,
}

/// Produce a parameter vector inside `input.bounds`.
pub fn initial_guess(
    strategy: &GuessStrategy<'_>,
    model: &LineModel<'_>,
    input: &GuessInput<'_>,
) -> Result<Vec<f64>, FitError> {
    let layout = model.layout();
    let complex = model.complex();
    let xs = &input.axis.values()[input.window.clone()];
    let ys = &input.spectrum[input.window.clone()];
    if xs.len() < 2 {
        return Err(FitError::GuessUnavailable(
            "fit window holds fewer than two samples".to_string(),
        ));
    }
    let (lo, hi) = (xs[0], xs[xs.len() - 1]);

    let any_inside = (0..layout.n_lines()).any(|line| {
        let c = model.center_at(line, 0.0);
        c >= lo && c <= hi
    });
    if !any_inside {
        return Err(FitError::GuessUnavailable(format!(
            "no line centre falls inside the fit window [{lo}, {hi}]"
        )));
    }

    let group_kinematics = match strategy {
        GuessStrategy::Heuristic => None,
        GuessStrategy::Template(k) => {
            if k.len() != complex.groups().len() {
                return Err(FitError::validation(format!(
                    "template has {} entries for {} line groups",
                    k.len(),
                    complex.groups().len()
                )));
            }
            Some(k.clone())
        }
        GuessStrategy::Predictor(p) => match p.predict(input.axis, input.spectrum, complex) {
            Some(k) if k.len() == complex.groups().len()
                && k.iter().all(|k| k.velocity.is_finite() && k.broadening.is_finite()) =>
            {
                Some(k)
            }
            Some(k) => {
                warn!(
                    entries = k.len(),
                    groups = complex.groups().len(),
                    "predictor returned unusable kinematics; using heuristic guess"
                );
                None
            }
            None => {
                debug!("predictor declined; using heuristic guess");
                None
            }
        },
    };

    let groups = complex.groups();
    let group_of = |line: usize| {
        let g = complex.lines()[line].group;
        groups.iter().position(|&x| x == g).unwrap_or(0)
    };

    let velocity: Vec<f64> = (0..layout.n_velocity())
        .map(|slot| {
            let lines = layout.lines_in_velocity_slot(slot);
            let index = layout.velocity_index(lines[0]);
            match &group_kinematics {
                Some(k) => k[group_of(lines[0])].velocity,
                None => heuristic_velocity(
                    model,
                    &lines,
                    xs,
                    ys,
                    input.bounds.lower[index],
                    input.bounds.upper[index],
                ),
            }
        })
        .collect();

    let broadening: Vec<f64> = (0..layout.n_broadening())
        .map(|slot| match &group_kinematics {
            Some(k) => k[group_of(layout.broadening_owner(slot))].broadening,
            None => input.default_broadening,
        })
        .collect();

    let continuum = if layout.has_continuum() {
        let mut values: Vec<f64> = ys.iter().copied().filter(|v| v.is_finite()).collect();
        median_mut(&mut values)
    } else {
        None
    };
    let base = continuum.unwrap_or(0.0);

    let amplitude: Vec<f64> = (0..layout.n_lines())
        .map(|line| {
            let center = model.center_at(line, velocity[layout.velocity_slot(line)]);
            if center < lo || center > hi {
                return 0.0;
            }
            let idx = input.axis.nearest_index(center);
            let start = idx.saturating_sub(PEAK_HALF_WINDOW).max(input.window.start);
            let end = (idx + PEAK_HALF_WINDOW + 1).min(input.window.end);
            let peak = input.spectrum[start..end]
                .iter()
                .copied()
                .fold(f64::NEG_INFINITY, f64::max);
            peak - base
        })
        .collect();

    let physical = PhysicalParams {
        velocity,
        broadening,
        amplitude,
        continuum: layout.has_continuum().then_some(base),
    };
    let mut guess = encode(layout, &physical)?;
    input.bounds.clip(&mut guess);
    Ok(guess)
}

/// Linear interpolation of `ys` at `x`; `None` outside `xs`.
fn interpolate(xs: &[f64], ys: &[f64], x: f64) -> Option<f64> {
    let last = xs.len() - 1;
    if x < xs[0] || x > xs[last] {
        return None;
    }
    let i = xs.partition_point(|&v| v <= x).clamp(1, last);
    let t = (x - xs[i - 1]) / (xs[i] - xs[i - 1]);
    Some(ys[i - 1] + t * (ys[i] - ys[i - 1]))
}

fn velocity_score(model: &LineModel<'_>, lines: &[usize], xs: &[f64], ys: &[f64], velocity: f64) -> Option<f64> {
    let mut hit = false;
    let mut score = 0.0;
    for &line in lines {
        if let Some(v) = interpolate(xs, ys, model.center_at(line, velocity)) {
            if v.is_finite() {
                hit = true;
                score += v;
            }
        }
    }
    hit.then_some(score)
}

/// Best velocity for one slot by grid search with a one-sample step.
fn heuristic_velocity(model: &LineModel<'_>, lines: &[usize], xs: &[f64], ys: &[f64], lo: f64, hi: f64) -> f64 {
    let first = xs[0];
    let last = xs[xs.len() - 1];
    let step = (last - first) / (xs.len() - 1) as f64;
    let per_sample = SPEED_OF_LIGHT_KMS * step / (0.5 * (first + last)).abs();
    if !(per_sample > 0.0 && hi > lo) {
        return 0.0_f64.clamp(lo, hi);
    }

    let n = ((hi - lo) / per_sample).ceil().clamp(1.0, MAX_VELOCITY_GRID) as usize;
    let dv = (hi - lo) / n as f64;
    let scores: Vec<Option<f64>> = (0..=n)
        .map(|k| velocity_score(model, lines, xs, ys, lo + dv * k as f64))
        .collect();

    let mut best: Option<(usize, f64)> = None;
    for (k, s) in scores.iter().enumerate() {
        if let Some(s) = *s {
            if best.is_none_or(|(_, b)| s > b) {
                best = Some((k, s));
            }
        }
    }
    let Some((k, s)) = best else {
        return 0.0_f64.clamp(lo, hi);
    };

    let mut velocity = lo + dv * k as f64;
    if k > 0 && k < n {
        if let (Some(left), Some(right)) = (scores[k - 1], scores[k + 1]) {
            let denom = left - 2.0 * s + right;
            if denom < 0.0 {
                let offset = (0.5 * (left - right) / denom).clamp(-1.0, 1.0);
                velocity += offset * dv;
            }
        }
    }
    velocity.clamp(lo, hi)
}

pub(crate) fn median_mut(values: &mut [f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let mid = values.len() / 2;
    if values.len() % 2 == 1 {
        Some(values[mid])
    } else {
        Some((values[mid - 1] + values[mid]) / 2.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{LineShape, SpectralUnit};
    use crate::models::{BoundsConfig, bounds};

    fn oii() -> LineComplex {
        let names: Vec<String> = ["OII3726", "OII3729"].iter().map(|s| s.to_string()).collect();
        LineComplex::from_names(&names, &[]).unwrap()
    }

    fn synthetic(model: &LineModel<'_>, axis: &SpectralAxis, params: &[f64]) -> Vec<f64> {
        model.evaluate(axis.values(), params).unwrap()
    }

    struct Fixed(Option<Vec<Kinematics>>);

    impl GuessPredictor for Fixed {
        fn predict(&self, _: &SpectralAxis, _: &[f64], _: &LineComplex) -> Option<Vec<Kinematics>> {
            self.0.clone()
        }
    }

    #[test]
    fn heuristic_finds_velocity_and_amplitudes() {
        let complex = oii();
        let axis = SpectralAxis::linspace(26_600.0, 27_100.0, 1000, SpectralUnit::Wavenumber).unwrap();
        let model = LineModel::new(&complex, LineShape::Gaussian, SpectralUnit::Wavenumber, 0.0);
        let truth = [150.0, 30.0, 5.0, 3.0];
        let y = synthetic(&model, &axis, &truth);
        let b = bounds(complex.layout(), &y, &BoundsConfig::default()).unwrap();
        let input = GuessInput {
            axis: &axis,
            spectrum: &y,
            window: 0..axis.len(),
            bounds: &b,
            default_broadening: 10.0,
        };

        let guess = initial_guess(&GuessStrategy::Heuristic, &model, &input).unwrap();
        // one-sample step is ~5.6 km/s here
        assert!((guess[0] - 150.0).abs() < 6.0, "velocity guess {}", guess[0]);
        assert_eq!(guess[1], 10.0);
        assert!((guess[2] - 5.0).abs() < 0.5);
        assert!((guess[3] - 3.0).abs() < 0.5);
        assert!(b.contains(&guess));
    }

    #[test]
    fn template_and_predictor_paths() {
        let complex = oii();
        let axis = SpectralAxis::linspace(26_600.0, 27_100.0, 1000, SpectralUnit::Wavenumber).unwrap();
        let model = LineModel::new(&complex, LineShape::Gaussian, SpectralUnit::Wavenumber, 0.0);
        let y = synthetic(&model, &axis, &[40.0, 30.0, 5.0, 5.0]);
        let b = bounds(complex.layout(), &y, &BoundsConfig::default()).unwrap();
        let input = GuessInput {
            axis: &axis,
            spectrum: &y,
            window: 0..axis.len(),
            bounds: &b,
            default_broadening: 10.0,
        };

        let template = vec![Kinematics {
            velocity: 55.0,
            broadening: 25.0,
        }];
        let guess = initial_guess(&GuessStrategy::Template(template), &model, &input).unwrap();
        assert_eq!(&guess[..2], &[55.0, 25.0]);

        let wrong = GuessStrategy::Template(vec![]);
        assert!(matches!(initial_guess(&wrong, &model, &input), Err(FitError::Validation(_))));

        let predictor = Fixed(Some(vec![Kinematics {
            velocity: 45.0,
            broadening: 28.0,
        }]));
        let guess = initial_guess(&GuessStrategy::Predictor(&predictor), &model, &input).unwrap();
        assert_eq!(&guess[..2], &[45.0, 28.0]);

        // Declining falls back to the heuristic.
        let declining = Fixed(None);
        let guess = initial_guess(&GuessStrategy::Predictor(&declining), &model, &input).unwrap();
        assert_eq!(guess[1], 10.0);
        assert!((guess[0] - 40.0).abs() < 6.0);
    }

    #[test]
    fn guess_is_clipped_into_bounds() {
        let complex = oii();
        let axis = SpectralAxis::linspace(26_600.0, 27_100.0, 1000, SpectralUnit::Wavenumber).unwrap();
        let model = LineModel::new(&complex, LineShape::Gaussian, SpectralUnit::Wavenumber, 0.0);
        let y = synthetic(&model, &axis, &[0.0, 30.0, 5.0, 5.0]);
        let b = bounds(complex.layout(), &y, &BoundsConfig::default()).unwrap();
        let input = GuessInput {
            axis: &axis,
            spectrum: &y,
            window: 0..axis.len(),
            bounds: &b,
            default_broadening: 10.0,
        };
        let template = vec![Kinematics {
            velocity: 9_000.0,
            broadening: 900.0,
        }];
        let guess = initial_guess(&GuessStrategy::Template(template), &model, &input).unwrap();
        assert_eq!(guess[0], 2000.0);
        assert_eq!(guess[1], 300.0);
    }

    #[test]
    fn no_line_in_window_is_guess_unavailable() {
        let complex = oii();
        let axis = SpectralAxis::linspace(14_000.0, 15_000.0, 500, SpectralUnit::Wavenumber).unwrap();
        let model = LineModel::new(&complex, LineShape::Gaussian, SpectralUnit::Wavenumber, 0.0);
        let y = vec![1.0; 500];
        let b = bounds(complex.layout(), &y, &BoundsConfig::default()).unwrap();
        let input = GuessInput {
            axis: &axis,
            spectrum: &y,
            window: 0..axis.len(),
            bounds: &b,
            default_broadening: 10.0,
        };
        let err = initial_guess(&GuessStrategy::Heuristic, &model, &input).unwrap_err();
        assert!(matches!(err, FitError::GuessUnavailable(_)));
    }

    #[test]
    fn median_of_even_and_odd() {
        assert_eq!(median_mut(&mut [3.0, 1.0, 2.0]), Some(2.0));
        assert_eq!(median_mut(&mut [4.0, 1.0, 2.0, 3.0]), Some(2.5));
        assert_eq!(median_mut(&mut []), None);
    }
}

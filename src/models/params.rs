//! Parameter vector layout, encoding and bounds.
//!
//! The optimiser works on one flat vector:
//!
//! ```text
//! [velocity slots | broadening slots | one amplitude per line | continuum?]
//! ```
//!
//! Slots are numbered by first appearance while walking the lines in order.
//! Lines tied in the same group share a slot; an untied line always gets a
//! slot of its own. Tying is therefore structural: there is no penalty term
//! and no way for two tied lines to drift apart.

use serde::{Deserialize, Serialize};

use crate::domain::{LineDefinition, TieFlags};
use crate::error::FitError;

/// What one entry of the parameter vector means.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    Velocity(usize),
    Broadening(usize),
    Amplitude(usize),
    Continuum,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamLayout {
    velocity_slot: Vec<usize>,
    broadening_slot: Vec<usize>,
    n_velocity: usize,
    n_broadening: usize,
    continuum: bool,
}

/// Assign slots for one kinematic quantity.
fn assign_slots(lines: &[LineDefinition], tied: impl Fn(usize) -> bool) -> (Vec<usize>, usize) {
    let mut group_slot: Vec<(usize, usize)> = Vec::new();
    let mut slots = Vec::with_capacity(lines.len());
    let mut next = 0;
    for (i, line) in lines.iter().enumerate() {
        let existing = if tied(i) {
            group_slot.iter().find(|(g, _)| *g == line.group).map(|(_, s)| *s)
        } else {
            None
        };
        let slot = match existing {
            Some(slot) => slot,
            None => {
                let slot = next;
                next += 1;
                if tied(i) {
                    group_slot.push((line.group, slot));
                }
                slot
            }
        };
        slots.push(slot);
    }
    (slots, next)
}

impl ParamLayout {
    /// `ties` must have one entry per line (checked by `LineComplex::new`).
    pub fn build(lines: &[LineDefinition], ties: &[TieFlags], continuum: bool) -> Self {
        let (velocity_slot, n_velocity) = assign_slots(lines, |i| ties[i].velocity);
        let (broadening_slot, n_broadening) = assign_slots(lines, |i| ties[i].broadening);
        Self {
            velocity_slot,
            broadening_slot,
            n_velocity,
            n_broadening,
            continuum,
        }
    }

    pub fn len(&self) -> usize {
        self.n_velocity + self.n_broadening + self.n_lines() + usize::from(self.continuum)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn n_lines(&self) -> usize {
        self.velocity_slot.len()
    }

    pub fn n_velocity(&self) -> usize {
        self.n_velocity
    }

    pub fn n_broadening(&self) -> usize {
        self.n_broadening
    }

    pub fn has_continuum(&self) -> bool {
        self.continuum
    }

    pub fn velocity_slot(&self, line: usize) -> usize {
        self.velocity_slot[line]
    }

    pub fn velocity_index(&self, line: usize) -> usize {
        self.velocity_slot[line]
    }

    pub fn broadening_index(&self, line: usize) -> usize {
        self.n_velocity + self.broadening_slot[line]
    }

    pub fn amplitude_index(&self, line: usize) -> usize {
        self.n_velocity + self.n_broadening + line
    }

    pub fn continuum_index(&self) -> Option<usize> {
        self.continuum
            .then(|| self.n_velocity + self.n_broadening + self.n_lines())
    }

    /// Lines whose velocity is the given slot.
    pub fn lines_in_velocity_slot(&self, slot: usize) -> Vec<usize> {
        (0..self.n_lines())
            .filter(|&l| self.velocity_slot[l] == slot)
            .collect()
    }

    /// First line using the given broadening slot.
    pub fn broadening_owner(&self, slot: usize) -> usize {
        self.broadening_slot
            .iter()
            .position(|&s| s == slot)
            .unwrap_or(0)
    }

    pub fn kind(&self, index: usize) -> ParamKind {
        let amp_start = self.n_velocity + self.n_broadening;
        if index < self.n_velocity {
            ParamKind::Velocity(index)
        } else if index < amp_start {
            ParamKind::Broadening(index - self.n_velocity)
        } else if index < amp_start + self.n_lines() {
            ParamKind::Amplitude(index - amp_start)
        } else {
            ParamKind::Continuum
        }
    }

    /// Whether an entry scales with the data (amplitudes and the continuum).
    pub fn is_intensity(&self, index: usize) -> bool {
        matches!(self.kind(index), ParamKind::Amplitude(_) | ParamKind::Continuum)
    }

    pub fn check_len(&self, params: &[f64]) -> Result<(), FitError> {
        if params.len() != self.len() {
            return Err(FitError::validation(format!(
                "parameter vector has {} entries, layout expects {}",
                params.len(),
                self.len()
            )));
        }
        Ok(())
    }

    /// Human-readable name of one entry, used in diagnostics.
    pub fn describe(&self, index: usize, lines: &[LineDefinition]) -> String {
        match self.kind(index) {
            ParamKind::Velocity(slot) => {
                let line = self.lines_in_velocity_slot(slot).first().copied().unwrap_or(0);
                format!("velocity[{}]", lines[line].name)
            }
            ParamKind::Broadening(slot) => {
                format!("broadening[{}]", lines[self.broadening_owner(slot)].name)
            }
            ParamKind::Amplitude(line) => format!("amplitude[{}]", lines[line].name),
            ParamKind::Continuum => "continuum".to_string(),
        }
    }
}

/// Physical values laid out by slot, before flattening.
#[derive(Debug, Clone, PartialEq)]
pub struct PhysicalParams {
    pub velocity: Vec<f64>,
    pub broadening: Vec<f64>,
    pub amplitude: Vec<f64>,
    pub continuum: Option<f64>,
}

/// Flatten slot values into the optimiser vector.
pub fn encode(layout: &ParamLayout, physical: &PhysicalParams) -> Result<Vec<f64>, FitError> {
    if physical.velocity.len() != layout.n_velocity()
        || physical.broadening.len() != layout.n_broadening()
        || physical.amplitude.len() != layout.n_lines()
        || physical.continuum.is_some() != layout.has_continuum()
    {
        return Err(FitError::validation(format!(
            "physical parameters ({} velocities, {} broadenings, {} amplitudes) do not match layout ({}, {}, {})",
            physical.velocity.len(),
            physical.broadening.len(),
            physical.amplitude.len(),
            layout.n_velocity(),
            layout.n_broadening(),
            layout.n_lines()
        )));
    }
    let mut out = Vec::with_capacity(layout.len());
    out.extend_from_slice(&physical.velocity);
    out.extend_from_slice(&physical.broadening);
    out.extend_from_slice(&physical.amplitude);
    out.extend(physical.continuum);
    Ok(out)
}

/// Split the optimiser vector back into slot values.
pub fn split(layout: &ParamLayout, params: &[f64]) -> Result<PhysicalParams, FitError> {
    layout.check_len(params)?;
    let nv = layout.n_velocity();
    let nb = layout.n_broadening();
    let nl = layout.n_lines();
    Ok(PhysicalParams {
        velocity: params[..nv].to_vec(),
        broadening: params[nv..nv + nb].to_vec(),
        amplitude: params[nv + nb..nv + nb + nl].to_vec(),
        continuum: layout.continuum_index().map(|i| params[i]),
    })
}

/// Construction-time knobs for [`ParamBounds`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundsConfig {
    /// Velocities are bounded to `±max_velocity_offset` km/s.
    pub max_velocity_offset: f64,
    pub min_broadening: f64,
    pub max_broadening: f64,
    /// Amplitude upper bound as a multiple of the window's peak intensity.
    pub amplitude_headroom: f64,
}

impl Default for BoundsConfig {
    fn default() -> Self {
        Self {
            max_velocity_offset: 2000.0,
            min_broadening: 0.1,
            max_broadening: 300.0,
            amplitude_headroom: 1.5,
        }
    }
}

impl BoundsConfig {
    pub fn validate(&self) -> Result<(), FitError> {
        if !(self.max_velocity_offset.is_finite() && self.max_velocity_offset > 0.0) {
            return Err(FitError::validation("maximum velocity offset must be > 0"));
        }
        if !(self.min_broadening > 0.0 && self.min_broadening < self.max_broadening) {
            return Err(FitError::validation(format!(
                "broadening bounds must satisfy 0 < min < max, got [{}, {}]",
                self.min_broadening, self.max_broadening
            )));
        }
        if !(self.amplitude_headroom.is_finite() && self.amplitude_headroom >= 1.0) {
            return Err(FitError::validation("amplitude headroom must be >= 1"));
        }
        Ok(())
    }
}

/// Per-entry box constraints, same length as the parameter vector.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamBounds {
    pub lower: Vec<f64>,
    pub upper: Vec<f64>,
}

impl ParamBounds {
    pub fn len(&self) -> usize {
        self.lower.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lower.is_empty()
    }

    pub fn contains(&self, params: &[f64]) -> bool {
        params.len() == self.len()
            && params
                .iter()
                .zip(self.lower.iter().zip(&self.upper))
                .all(|(p, (lo, hi))| p >= lo && p <= hi)
    }

    /// Clamp every entry into its interval.
    pub fn clip(&self, params: &mut [f64]) {
        for (p, (lo, hi)) in params.iter_mut().zip(self.lower.iter().zip(&self.upper)) {
            *p = p.clamp(*lo, *hi);
        }
    }

    /// Whether `value` sits exactly on either bound of entry `i`.
    pub fn on_bound(&self, i: usize, value: f64) -> bool {
        value == self.lower[i] || value == self.upper[i]
    }
}

/// Box constraints for a layout, given the (background-subtracted) samples
/// of the fit window.
pub fn bounds(layout: &ParamLayout, window: &[f64], config: &BoundsConfig) -> Result<ParamBounds, FitError> {
    config.validate()?;

    let finite = || window.iter().copied().filter(|v| v.is_finite());
    let peak = finite().fold(f64::NEG_INFINITY, f64::max);
    let floor = finite().fold(f64::INFINITY, f64::min);
    if !(peak.is_finite() && peak > 0.0) {
        return Err(FitError::DegenerateFit(
            "no positive signal in the fit window".to_string(),
        ));
    }

    let mut lower = Vec::with_capacity(layout.len());
    let mut upper = Vec::with_capacity(layout.len());
    for index in 0..layout.len() {
        let (lo, hi) = match layout.kind(index) {
            ParamKind::Velocity(_) => (-config.max_velocity_offset, config.max_velocity_offset),
            ParamKind::Broadening(_) => (config.min_broadening, config.max_broadening),
            ParamKind::Amplitude(_) => (0.0, config.amplitude_headroom * peak),
            ParamKind::Continuum => (floor - (peak - floor), peak),
        };
        lower.push(lo);
        upper.push(hi);
    }
    Ok(ParamBounds { lower, upper })
}

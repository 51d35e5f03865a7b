//! Emission-line catalogue and line complexes.
//!
//! A [`LineComplex`] is the unit the fitter works on: an ordered list of
//! lines, their tie groups, and the parameter layout derived from them.

use serde::{Deserialize, Serialize};

use crate::error::FitError;
use crate::models::ParamLayout;

/// Rest wavelengths (nm) of the lines the tool knows by name.
pub const LINE_CATALOGUE: [(&str, f64); 10] = [
    ("Halpha", 656.280),
    ("NII6583", 658.341),
    ("NII6548", 654.803),
    ("SII6716", 671.647),
    ("SII6731", 673.085),
    ("OII3726", 372.603),
    ("OII3729", 372.882),
    ("OIII4959", 495.891),
    ("OIII5007", 500.684),
    ("Hbeta", 486.133),
];

/// Look up a catalogue line by name (case-sensitive, as written in the catalogue).
pub fn rest_wavelength(name: &str) -> Option<f64> {
    LINE_CATALOGUE
        .iter()
        .find(|(n, _)| *n == name)
        .map(|(_, nm)| *nm)
}

/// A named line with its rest wavelength and tie group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineDefinition {
    pub name: String,
    pub rest_nm: f64,
    pub group: usize,
}

impl LineDefinition {
    pub fn new(name: impl Into<String>, rest_nm: f64, group: usize) -> Self {
        Self {
            name: name.into(),
            rest_nm,
            group,
        }
    }

    /// Build from the catalogue; unknown names are validation errors.
    pub fn from_catalogue(name: &str, group: usize) -> Result<Self, FitError> {
        let rest_nm = rest_wavelength(name).ok_or_else(|| {
            let known: Vec<&str> = LINE_CATALOGUE.iter().map(|(n, _)| *n).collect();
            FitError::validation(format!(
                "unknown line '{name}' (available: {})",
                known.join(", ")
            ))
        })?;
        Ok(Self::new(name, rest_nm, group))
    }
}

/// Which kinematic parameters a line shares with the rest of its group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TieFlags {
    pub velocity: bool,
    pub broadening: bool,
}

impl Default for TieFlags {
    fn default() -> Self {
        Self {
            velocity: true,
            broadening: true,
        }
    }
}

/// Lines fit jointly, with their tying rules resolved into a [`ParamLayout`].
#[derive(Debug, Clone, PartialEq)]
pub struct LineComplex {
    lines: Vec<LineDefinition>,
    ties: Vec<TieFlags>,
    layout: ParamLayout,
}

impl LineComplex {
    pub fn new(lines: Vec<LineDefinition>, ties: Vec<TieFlags>) -> Result<Self, FitError> {
        if lines.is_empty() {
            return Err(FitError::validation("a line complex needs at least one line"));
        }
        if ties.len() != lines.len() {
            return Err(FitError::validation(format!(
                "{} tie flags supplied for {} lines",
                ties.len(),
                lines.len()
            )));
        }
        if let Some(bad) = lines.iter().find(|l| !(l.rest_nm.is_finite() && l.rest_nm > 0.0)) {
            return Err(FitError::validation(format!(
                "line '{}' has invalid rest wavelength {}",
                bad.name, bad.rest_nm
            )));
        }
        let layout = ParamLayout::build(&lines, &ties, false);
        Ok(Self { lines, ties, layout })
    }

    /// Every line tied within its group.
    pub fn tied(lines: Vec<LineDefinition>) -> Result<Self, FitError> {
        let ties = vec![TieFlags::default(); lines.len()];
        Self::new(lines, ties)
    }

    /// Build from catalogue names with per-line groups (all group 0 when `groups` is empty).
    pub fn from_names(names: &[String], groups: &[usize]) -> Result<Self, FitError> {
        if !groups.is_empty() && groups.len() != names.len() {
            return Err(FitError::validation(format!(
                "{} groups supplied for {} lines",
                groups.len(),
                names.len()
            )));
        }
        let lines = names
            .iter()
            .enumerate()
            .map(|(i, name)| LineDefinition::from_catalogue(name, groups.get(i).copied().unwrap_or(0)))
            .collect::<Result<Vec<_>, _>>()?;
        Self::tied(lines)
    }

    /// Untie velocity and/or broadening for a named line.
    pub fn untie(mut self, name: &str, velocity: bool, broadening: bool) -> Result<Self, FitError> {
        let idx = self
            .lines
            .iter()
            .position(|l| l.name == name)
            .ok_or_else(|| FitError::validation(format!("line '{name}' is not part of the complex")))?;
        if velocity {
            self.ties[idx].velocity = false;
        }
        if broadening {
            self.ties[idx].broadening = false;
        }
        self.layout = ParamLayout::build(&self.lines, &self.ties, self.layout.has_continuum());
        Ok(self)
    }

    /// Add (or remove) a constant continuum term at the end of the parameter vector.
    pub fn with_continuum(mut self, continuum: bool) -> Self {
        self.layout = ParamLayout::build(&self.lines, &self.ties, continuum);
        self
    }

    pub fn lines(&self) -> &[LineDefinition] {
        &self.lines
    }

    pub fn layout(&self) -> &ParamLayout {
        &self.layout
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Distinct group identifiers in order of first appearance.
    pub fn groups(&self) -> Vec<usize> {
        let mut out = Vec::new();
        for line in &self.lines {
            if !out.contains(&line.group) {
                out.push(line.group);
            }
        }
        out
    }
}

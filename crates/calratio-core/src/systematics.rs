use std::fmt::Display;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::{CalRatioError, CalRatioResult};

/// Prefix shared by every Monte Carlo systematic.
pub const MC_PREFIX: &str = "mc_";

/// Relative Monte Carlo systematic uncertainties on the signal efficiency at one mass point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct McSystematics {
    /// Jet energy scale.
    pub jes: f64,
    /// Jet energy scale of the electromagnetic fraction.
    pub jesemf: f64,
    /// Jet energy resolution.
    pub jer: f64,
    pub trigger: f64,
    pub pileup: f64,
}

impl McSystematics {
    /// Mass points with tabulated uncertainties, in GeV.
    pub const KNOWN_MASS_POINTS: [u32; 5] = [125, 200, 400, 600, 1000];

    /// The tabulated uncertainties for a heavy-boson mass point.
    pub fn for_mass_point(mass: u32) -> CalRatioResult<Self> {
        let (jes, jesemf, jer, trigger, pileup) = match mass {
            125 => (0.037, 0.173, 0.155, 0.045, 0.047),
            200 => (0.051, 0.096, 0.015, 0.058, 0.005),
            400 => (0.01, 0.033, 0.016, 0.017, 0.047),
            600 => (0.006, 0.01, 0.011, 0.011, 0.019),
            1000 => (0.009, 0.007, 0.01, 0.007, 0.027),
            _ => return Err(CalRatioError::UnknownMassPoint { mass }),
        };
        Ok(Self {
            jes,
            jesemf,
            jer,
            trigger,
            pileup,
        })
    }

    /// Stand-in values for unofficial runs at untabulated mass points (the 400 GeV table with a
    /// smaller resolution term).
    pub fn unofficial() -> Self {
        Self {
            jes: 0.01,
            jesemf: 0.033,
            jer: 0.0016,
            trigger: 0.017,
            pileup: 0.047,
        }
    }

    /// `(name, value)` pairs, names carrying the [`MC_PREFIX`].
    pub fn entries(&self) -> [(&'static str, f64); 5] {
        [
            ("mc_jes", self.jes),
            ("mc_jesemf", self.jesemf),
            ("mc_jer", self.jer),
            ("mc_trigger", self.trigger),
            ("mc_pileup", self.pileup),
        ]
    }
}

/// Extract the mass point from a sample name containing `mH<mass>_`, e.g.
/// `mH600_mS150_lt5m.root` gives 600.
pub fn mass_point_from_file_name(name: &str) -> Option<u32> {
    name.match_indices("mH").find_map(|(start, _)| {
        let rest = &name[start + 2..];
        let digits_end = rest.find(|c: char| !c.is_ascii_digit())?;
        if digits_end == 0 || !rest[digits_end..].starts_with('_') {
            return None;
        }
        rest[..digits_end].parse().ok()
    })
}

/// Knobs of the systematic budget which do not depend on the mass point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SystematicsOptions {
    /// Relative luminosity uncertainty.
    pub lumi_error: f64,
    /// Relative uncertainty on the ABCD background estimate.
    pub abcd_error: f64,
    /// Factor applied to the combined MC uncertainty.
    pub mc_error_scale: f64,
    /// Fall back to stand-in values instead of failing for unknown mass points.
    pub unofficial: bool,
}

impl Default for SystematicsOptions {
    fn default() -> Self {
        Self {
            lumi_error: 0.022,
            abcd_error: 0.36,
            mc_error_scale: 1.0,
            unofficial: false,
        }
    }
}

impl SystematicsOptions {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn abcd_error(mut self, value: f64) -> Self {
        self.abcd_error = value;
        self
    }
    pub fn mc_error_scale(mut self, value: f64) -> Self {
        self.mc_error_scale = value;
        self
    }
    pub fn unofficial(mut self, unofficial: bool) -> Self {
        self.unofficial = unofficial;
        self
    }
}

/// Every named relative systematic uncertainty that enters the limit setting, including the
/// combined `mc_eff` entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystematicBudget {
    /// The mass point the MC entries belong to.
    pub mass_point: u32,
    errors: IndexMap<String, f64>,
}

impl SystematicBudget {
    /// Build the budget for a mass point.
    pub fn for_mass_point(mass: u32, options: &SystematicsOptions) -> CalRatioResult<Self> {
        let mc = match McSystematics::for_mass_point(mass) {
            Ok(mc) => mc,
            Err(_) if options.unofficial => {
                warn!(mass, "unknown systematic errors for this mass point, using 400 GeV values");
                McSystematics::unofficial()
            }
            Err(err) => return Err(err),
        };
        let mut errors = IndexMap::new();
        errors.insert("lumi".to_string(), options.lumi_error);
        errors.insert("abcd".to_string(), options.abcd_error);
        for (name, value) in mc.entries() {
            errors.insert(name.to_string(), value);
        }
        let mut budget = Self {
            mass_point: mass,
            errors,
        };
        let mc_eff = budget.bundle(MC_PREFIX) * options.mc_error_scale;
        budget.errors.insert("mc_eff".to_string(), mc_eff);
        Ok(budget)
    }

    /// Build the budget for a sample, reading the mass point from its file name.
    ///
    /// Unofficial runs fall back to 400 GeV when no mass point can be found.
    pub fn for_sample(file_name: &str, options: &SystematicsOptions) -> CalRatioResult<Self> {
        let mass = match mass_point_from_file_name(file_name) {
            Some(mass) => mass,
            None if options.unofficial => {
                warn!(file_name, "unable to determine a mass point, using 400 GeV");
                400
            }
            None => {
                return Err(CalRatioError::Custom(format!(
                    "Unable to determine the mass point from the input file {file_name}"
                )))
            }
        };
        Self::for_mass_point(mass, options)
    }

    /// Look up one entry.
    pub fn get(&self, name: &str) -> Option<f64> {
        self.errors.get(name).copied()
    }

    /// All entries in insertion order.
    pub fn errors(&self) -> &IndexMap<String, f64> {
        &self.errors
    }

    /// Quadrature sum of every entry whose name starts with `prefix`.
    pub fn bundle(&self, prefix: &str) -> f64 {
        self.errors
            .iter()
            .filter(|(name, _)| name.starts_with(prefix))
            .map(|(_, value)| value * value)
            .sum::<f64>()
            .sqrt()
    }
}

impl Display for SystematicBudget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "**********")?;
        writeln!(f, "* Systematic Errors (mass point {} GeV): ", self.mass_point)?;
        writeln!(f, "* ")?;
        let mut sorted: Vec<_> = self.errors.iter().collect();
        sorted.sort_by(|a, b| a.0.cmp(b.0));
        for (name, value) in sorted {
            writeln!(f, "* {name} -> {value}")?;
        }
        writeln!(f, "* ")?;
        write!(f, "**********")
    }
}

use std::{fmt::Display, str::FromStr};

use accurate::{sum::Klein, traits::*};
use auto_ops::impl_op_ex;
#[cfg(feature = "rayon")]
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::{slim::SlimRecord, CalRatioError, CalRatioResult};

/// A quadrant of the ABCD plane spanned by the event BDT score and `sumMinDR`.
///
/// The discriminant values match the integer labels used by the downstream tools, with `0`
/// meaning "no region".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u8)]
pub enum Region {
    /// Outside the plane (below a floor, or a non-finite discriminant).
    #[default]
    None = 0,
    /// High BDT, high `sumMinDR`: the signal region.
    A = 1,
    /// High BDT, low `sumMinDR`.
    B = 2,
    /// Low BDT, high `sumMinDR`.
    C = 3,
    /// Low BDT, low `sumMinDR`.
    D = 4,
}

impl Region {
    /// The four populated regions in label order.
    pub const ALL: [Region; 4] = [Region::A, Region::B, Region::C, Region::D];

    /// The integer label (`0` to `4`).
    pub fn label(self) -> u8 {
        self as u8
    }

    /// Position in [`Region::ALL`], or [`None`] for [`Region::None`].
    pub fn slot(self) -> Option<usize> {
        match self {
            Region::None => None,
            region => Some(region as usize - 1),
        }
    }

    /// Convert an integer label back into a region.
    pub fn from_label(label: i64) -> CalRatioResult<Self> {
        match label {
            0 => Ok(Region::None),
            1 => Ok(Region::A),
            2 => Ok(Region::B),
            3 => Ok(Region::C),
            4 => Ok(Region::D),
            _ => Err(CalRatioError::ParseError {
                name: label.to_string(),
                object: "Region".to_string(),
            }),
        }
    }
}

impl Display for Region {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Region::None => write!(f, "none"),
            Region::A => write!(f, "A"),
            Region::B => write!(f, "B"),
            Region::C => write!(f, "C"),
            Region::D => write!(f, "D"),
        }
    }
}

impl FromStr for Region {
    type Err = CalRatioError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "a" | "1" => Ok(Region::A),
            "b" | "2" => Ok(Region::B),
            "c" | "3" => Ok(Region::C),
            "d" | "4" => Ok(Region::D),
            "none" | "0" => Ok(Region::None),
            _ => Err(CalRatioError::ParseError {
                name: s.to_string(),
                object: "Region".to_string(),
            }),
        }
    }
}

/// Maps the two ABCD discriminants of an event onto a [`Region`].
///
/// Implementations must depend on nothing but the two arguments. Any `Fn(f64, f64) -> Region`
/// closure is a classifier, which makes it easy to try alternative planes in tests.
pub trait RegionClassifier: Send + Sync {
    /// Classify an event from its event-level BDT score and its `sumMinDR`.
    fn classify(&self, event_bdt: f64, sum_min_dr: f64) -> Region;
}

impl<F> RegionClassifier for F
where
    F: Fn(f64, f64) -> Region + Send + Sync,
{
    fn classify(&self, event_bdt: f64, sum_min_dr: f64) -> Region {
        self(event_bdt, sum_min_dr)
    }
}

/// The default 2×2 plane: one cut on each discriminant, plus optional lower floors.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AbcdPlane {
    /// Events with a BDT score above this are in A or B.
    pub bdt_cut: f64,
    /// Events with `sumMinDR` above this are in A or C.
    pub sum_min_dr_cut: f64,
    /// Events with a BDT score below this floor are not classified.
    pub bdt_floor: Option<f64>,
    /// Events with `sumMinDR` below this floor are not classified.
    pub sum_min_dr_floor: Option<f64>,
}

impl Default for AbcdPlane {
    fn default() -> Self {
        Self {
            bdt_cut: 0.1,
            sum_min_dr_cut: 1.5,
            bdt_floor: None,
            sum_min_dr_floor: None,
        }
    }
}

impl RegionClassifier for AbcdPlane {
    fn classify(&self, event_bdt: f64, sum_min_dr: f64) -> Region {
        if event_bdt.is_nan() || sum_min_dr.is_nan() {
            return Region::None;
        }
        if self.bdt_floor.is_some_and(|floor| event_bdt < floor)
            || self.sum_min_dr_floor.is_some_and(|floor| sum_min_dr < floor)
        {
            return Region::None;
        }
        match (event_bdt > self.bdt_cut, sum_min_dr > self.sum_min_dr_cut) {
            (true, true) => Region::A,
            (true, false) => Region::B,
            (false, true) => Region::C,
            (false, false) => Region::D,
        }
    }
}

/// The four `RegionA..RegionD` indicators written for an event.
///
/// At most one flag is ever set: the one matching the event's region, and only if the event
/// fired the trigger and passed the selection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionFlags([bool; 4]);

impl RegionFlags {
    /// Build the indicators for an event in `region`.
    pub fn new(region: Region, pass_trigger: bool, is_selected: bool) -> Self {
        let mut flags = [false; 4];
        if pass_trigger && is_selected {
            if let Some(slot) = region.slot() {
                flags[slot] = true;
            }
        }
        Self(flags)
    }

    /// Rebuild from the four stored indicators.
    pub fn from_indicators(indicators: [bool; 4]) -> CalRatioResult<Self> {
        if indicators.iter().filter(|flag| **flag).count() > 1 {
            return Err(CalRatioError::Custom(format!(
                "More than one region flag is set: {indicators:?}"
            )));
        }
        Ok(Self(indicators))
    }

    /// Whether the indicator for `region` is set.
    pub fn is_set(&self, region: Region) -> bool {
        region.slot().is_some_and(|slot| self.0[slot])
    }

    /// The flagged region, or [`Region::None`].
    pub fn active(&self) -> Region {
        Region::ALL
            .into_iter()
            .find(|region| self.is_set(*region))
            .unwrap_or_default()
    }

    /// The indicators as the `0`/`1` integers stored in the output tree.
    pub fn as_i32(&self) -> [i32; 4] {
        self.0.map(i32::from)
    }
}

/// Weighted event counts in each region of the plane.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RegionYields {
    /// Number of (unweighted) events per region, in [`Region::ALL`] order.
    pub entries: [u64; 4],
    /// Sum of weights per region.
    pub sum_w: [f64; 4],
    /// Sum of squared weights per region.
    pub sum_w2: [f64; 4],
}

/// A predicted yield and its statistical uncertainty.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AbcdEstimate {
    pub value: f64,
    pub error: f64,
}

impl RegionYields {
    /// Add one event with `weight` to whichever region its flags select.
    pub fn fill(&mut self, flags: &RegionFlags, weight: f64) {
        if let Some(slot) = flags.active().slot() {
            self.entries[slot] += 1;
            self.sum_w[slot] += weight;
            self.sum_w2[slot] += weight * weight;
        }
    }

    /// Accumulate the yields of a set of slimmed records.
    pub fn from_records(records: &[SlimRecord]) -> Self {
        let mut yields = Self::default();
        for region in Region::ALL {
            let Some(slot) = region.slot() else {
                continue;
            };
            let selected = || records.iter().filter(move |r| r.regions.is_set(region));
            yields.entries[slot] = selected().count() as u64;
            yields.sum_w[slot] = selected()
                .map(|r| r.weight)
                .sum_with_accumulator::<Klein<f64>>();
            yields.sum_w2[slot] = selected()
                .map(|r| r.weight * r.weight)
                .sum_with_accumulator::<Klein<f64>>();
        }
        yields
    }

    /// Parallel version of [`RegionYields::from_records`].
    #[cfg(feature = "rayon")]
    pub fn from_records_par(records: &[SlimRecord]) -> Self {
        records
            .par_chunks(4096)
            .map(Self::from_records)
            .reduce(Self::default, |a, b| a + b)
    }

    /// Weighted yield in `region` (zero for [`Region::None`]).
    pub fn yield_in(&self, region: Region) -> f64 {
        region.slot().map_or(0.0, |slot| self.sum_w[slot])
    }

    /// Statistical uncertainty on the yield in `region`.
    pub fn error_in(&self, region: Region) -> f64 {
        region.slot().map_or(0.0, |slot| self.sum_w2[slot].sqrt())
    }

    /// The ABCD prediction for region A, `B * C / D`.
    ///
    /// Returns [`None`] when region D is empty, since the prediction is undefined there.
    pub fn abcd_prediction(&self) -> Option<AbcdEstimate> {
        let b = self.yield_in(Region::B);
        let c = self.yield_in(Region::C);
        let d = self.yield_in(Region::D);
        if d == 0.0 {
            return None;
        }
        let (sb, sc, sd) = (
            self.error_in(Region::B),
            self.error_in(Region::C),
            self.error_in(Region::D),
        );
        let value = b * c / d;
        let error = ((c / d * sb).powi(2) + (b / d * sc).powi(2) + (b * c / (d * d) * sd).powi(2))
            .sqrt();
        Some(AbcdEstimate { value, error })
    }
}

impl_op_ex!(+ |a: &RegionYields, b: &RegionYields| -> RegionYields {
    let mut out = *a;
    out += b;
    out
});

impl_op_ex!(+= |a: &mut RegionYields, b: &RegionYields| {
    for slot in 0..4 {
        a.entries[slot] += b.entries[slot];
        a.sum_w[slot] += b.sum_w[slot];
        a.sum_w2[slot] += b.sum_w2[slot];
    }
});

impl Display for RegionYields {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for region in Region::ALL {
            let slot = region as usize - 1;
            writeln!(
                f,
                "Region {region}: {:>10.4} +/- {:<10.4} ({} events)",
                self.sum_w[slot],
                self.sum_w2[slot].sqrt(),
                self.entries[slot]
            )?;
        }
        match self.abcd_prediction() {
            Some(estimate) => write!(
                f,
                "ABCD prediction for A (B*C/D): {:.4} +/- {:.4}",
                estimate.value, estimate.error
            ),
            None => write!(f, "ABCD prediction for A (B*C/D): undefined, region D is empty"),
        }
    }
}

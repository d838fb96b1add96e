use serde::{Deserialize, Serialize};

use crate::{
    data::{EventRecord, LlpCandidate},
    regions::RegionFlags,
    selection::SelectionOutcome,
};

/// Persistence of [`SlimRecord`]s (the `extrapTree` layout).
pub mod io;

pub use io::{read_slim, write_slim, SlimWriteOptions};

/// One row of the slimmed output: LLP kinematics, the event weight and the region indicators.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SlimRecord {
    pub event_number: i64,
    /// Whether the CalRatio trigger fired (written as `PassedCalRatio`).
    pub passed: bool,
    pub llps: [LlpCandidate; 2],
    /// `eventWeight * |pileupEventWeight|`.
    pub weight: f64,
    pub regions: RegionFlags,
}

impl SlimRecord {
    /// Assemble the output row of `event` from the decision the selector made about it.
    pub fn new(event: &EventRecord, outcome: &SelectionOutcome) -> Self {
        Self {
            event_number: event.event_number,
            passed: event.pass_trigger,
            llps: event.llps,
            weight: event.combined_weight(),
            regions: outcome.flags,
        }
    }

    /// Both LLP decay lengths in metres.
    pub fn lxy_m(&self) -> [f64; 2] {
        self.llps.map(|llp| llp.lxy / 1000.0)
    }
}

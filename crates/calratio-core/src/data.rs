use serde::{Deserialize, Serialize};
use std::fmt::Display;

/// Ntuple I/O for [`EventRecord`]s.
pub mod io;

pub use io::{read_events, read_parquet, read_root, write_parquet, EventReadOptions};

/// A calibrated jet and the per-jet discriminants used by the CalRatio selection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Jet {
    /// Transverse momentum in GeV.
    pub pt: f64,
    /// Pseudorapidity.
    pub eta: f64,
    /// Output of the per-jet BDT trained against beam-induced background.
    pub bib_weight: f64,
    /// Output of the per-jet BDT trained to select displaced signal jets.
    pub signal_weight: f64,
    /// Whether the jet passes the "good LLP candidate" cleaning.
    pub is_good_llp: bool,
    /// Whether the jet is matched to a CalRatio trigger object.
    pub is_cr_hlt: bool,
    /// Calorimeter timing in ns.
    pub time: f64,
    /// `log10(E_had / E_em)`.
    pub log_ratio: f64,
    /// Minimum angular distance to a track with pT > 2 GeV.
    pub min_dr_trk_pt2: f64,
}

/// A truth-level long-lived particle candidate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LlpCandidate {
    /// Transverse momentum in GeV.
    pub pt: f64,
    /// Pseudorapidity.
    pub eta: f64,
    /// Azimuthal angle.
    pub phi: f64,
    /// Energy in GeV.
    pub e: f64,
    /// Transverse decay length in mm.
    pub lxy: f64,
}

/// A single event as read from the input ntuple.
///
/// Index lists are kept exactly as stored in the ntuple (signed, possibly out of range). Use
/// [`EventRecord::signal_jet`] and [`EventRecord::bib_pair_jet`] to resolve them; both return
/// [`None`] instead of panicking on bad indices.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    /// Unique event identifier.
    pub event_number: i64,
    /// Calibrated jets in the event.
    pub jets: Vec<Jet>,
    /// Indices into [`EventRecord::jets`] of the two most signal-like clean jets.
    pub signal_indices: Vec<i64>,
    /// Indices into [`EventRecord::jets`] of the two most BIB-like clean jets.
    pub bib_indices: Vec<i64>,
    /// Event-level BDT score.
    pub event_bdt: f64,
    /// Missing over total hadronic transverse energy.
    pub mht_over_ht: f64,
    /// Sum of the minimum angular separations of the two leading objects.
    pub sum_min_dr: f64,
    /// Whether the CalRatio trigger fired.
    pub pass_trigger: bool,
    /// Generator event weight.
    pub weight: f64,
    /// Pileup reweighting factor.
    pub pileup_weight: f64,
    /// The two long-lived particle candidates.
    pub llps: [LlpCandidate; 2],
}

impl EventRecord {
    fn jet_at(&self, indices: &[i64], slot: usize) -> Option<&Jet> {
        let index = *indices.get(slot)?;
        self.jets.get(usize::try_from(index).ok()?)
    }

    /// The signal-like jet in position `slot` (0 is the leading one), if it resolves.
    pub fn signal_jet(&self, slot: usize) -> Option<&Jet> {
        self.jet_at(&self.signal_indices, slot)
    }

    /// The BIB-like jet in position `slot`, if it resolves.
    pub fn bib_pair_jet(&self, slot: usize) -> Option<&Jet> {
        self.jet_at(&self.bib_indices, slot)
    }

    /// The weight written to the slimmed output, `weight * |pileup_weight|`.
    pub fn combined_weight(&self) -> f64 {
        self.weight * self.pileup_weight.abs()
    }
}

impl Display for EventRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Event {}:", self.event_number)?;
        writeln!(f, "  jets:")?;
        for (idx, jet) in self.jets.iter().enumerate() {
            writeln!(
                f,
                "    [{idx}] pT={:.1} eta={:.2} t={:.2} logR={:.2} bib={:.2} good={} hlt={}",
                jet.pt,
                jet.eta,
                jet.time,
                jet.log_ratio,
                jet.bib_weight,
                jet.is_good_llp,
                jet.is_cr_hlt
            )?;
        }
        writeln!(f, "  signal jets: {:?}", self.signal_indices)?;
        writeln!(f, "  bib jets: {:?}", self.bib_indices)?;
        writeln!(
            f,
            "  eventBDT={} sumMinDR={} MHT/HT={} trigger={}",
            self.event_bdt, self.sum_min_dr, self.mht_over_ht, self.pass_trigger
        )?;
        writeln!(f, "  weight: {} (pileup {})", self.weight, self.pileup_weight)?;
        Ok(())
    }
}

/// A named collection of [`EventRecord`]s, typically one Monte Carlo sample.
#[derive(Debug, Clone, Default)]
pub struct EventSample {
    /// Label used when reporting results, usually the input file name.
    pub name: String,
    /// The events, in file order.
    pub events: Vec<EventRecord>,
}

impl EventSample {
    /// Wrap a list of events under a sample name.
    pub fn new<S: Into<String>>(name: S, events: Vec<EventRecord>) -> Self {
        Self {
            name: name.into(),
            events,
        }
    }

    /// Number of events in the sample.
    pub fn n_events(&self) -> usize {
        self.events.len()
    }

    /// Iterate over the events.
    pub fn iter(&self) -> std::slice::Iter<'_, EventRecord> {
        self.events.iter()
    }
}

impl<'a> IntoIterator for &'a EventSample {
    type Item = &'a EventRecord;
    type IntoIter = std::slice::Iter<'a, EventRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.events.iter()
    }
}

/// An event which passes every stage of the default selection for both variants and lands in
/// region A of the default ABCD plane. Tests tweak individual fields from here.
pub fn test_event() -> EventRecord {
    EventRecord {
        event_number: 1234,
        jets: vec![
            Jet {
                pt: 180.0,
                eta: 0.4,
                bib_weight: 0.1,
                signal_weight: 0.8,
                is_good_llp: true,
                is_cr_hlt: true,
                time: 1.5,
                log_ratio: 1.6,
                min_dr_trk_pt2: 0.4,
            },
            Jet {
                pt: 90.0,
                eta: -1.1,
                bib_weight: 0.2,
                signal_weight: 0.7,
                is_good_llp: true,
                is_cr_hlt: false,
                time: 0.5,
                log_ratio: 1.0,
                min_dr_trk_pt2: 0.1,
            },
            Jet {
                pt: 45.0,
                eta: 2.1,
                bib_weight: 0.3,
                signal_weight: 0.1,
                is_good_llp: false,
                is_cr_hlt: false,
                time: 2.0,
                log_ratio: -0.2,
                min_dr_trk_pt2: 0.05,
            },
        ],
        signal_indices: vec![0, 1],
        bib_indices: vec![2, 1],
        event_bdt: 0.2,
        mht_over_ht: 0.3,
        sum_min_dr: 2.0,
        pass_trigger: true,
        weight: 0.8,
        pileup_weight: 1.25,
        llps: [
            LlpCandidate {
                pt: 210.0,
                eta: 0.5,
                phi: 1.2,
                e: 260.0,
                lxy: 2500.0,
            },
            LlpCandidate {
                pt: 120.0,
                eta: -1.0,
                phi: -1.9,
                e: 190.0,
                lxy: 3100.0,
            },
        ],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_signal_jet_lookup() {
        let event = test_event();
        assert_relative_eq!(event.signal_jet(0).unwrap().pt, 180.0);
        assert_relative_eq!(event.signal_jet(1).unwrap().pt, 90.0);
        assert!(event.signal_jet(2).is_none());
    }

    #[test]
    fn test_bad_indices_do_not_resolve() {
        let mut event = test_event();
        event.signal_indices = vec![-1, 7];
        assert!(event.signal_jet(0).is_none());
        assert!(event.signal_jet(1).is_none());
        event.bib_indices.clear();
        assert!(event.bib_pair_jet(0).is_none());
    }

    #[test]
    fn test_combined_weight_uses_absolute_pileup() {
        let mut event = test_event();
        event.weight = 2.0;
        event.pileup_weight = -0.5;
        assert_relative_eq!(event.combined_weight(), 1.0);
    }

    #[test]
    fn test_sample_iteration() {
        let sample = EventSample::new("mH125_mS15", vec![test_event(), test_event()]);
        assert_eq!(sample.n_events(), 2);
        assert_eq!(sample.iter().count(), 2);
        assert_eq!((&sample).into_iter().map(|e| e.event_number).sum::<i64>(), 2468);
    }

    #[test]
    fn test_display_lists_jets() {
        let text = test_event().to_string();
        assert!(text.starts_with("Event 1234:"));
        assert!(text.contains("[2] pT=45.0"));
    }
}

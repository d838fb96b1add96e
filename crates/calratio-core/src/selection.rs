use std::{fmt::Display, str::FromStr};

use auto_ops::impl_op_ex;
#[cfg(feature = "rayon")]
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    data::{EventRecord, Jet},
    regions::{AbcdPlane, Region, RegionClassifier, RegionFlags},
    slim::SlimRecord,
    CalRatioError,
};

/// The two selections, which differ only in the leading signal-jet pT threshold.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SelectionVariant {
    /// Selection 1, leading signal jet pT > 100 GeV by default.
    #[default]
    LowPt,
    /// Selection 2, leading signal jet pT > 160 GeV by default.
    HighPt,
}

impl SelectionVariant {
    /// Both variants, in the order they are reported.
    pub const ALL: [SelectionVariant; 2] = [SelectionVariant::LowPt, SelectionVariant::HighPt];

    /// The number used on the command line and in the cutflow printout.
    pub fn number(self) -> u8 {
        match self {
            SelectionVariant::LowPt => 1,
            SelectionVariant::HighPt => 2,
        }
    }
}

impl Display for SelectionVariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.number())
    }
}

impl FromStr for SelectionVariant {
    type Err = CalRatioError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "1" | "lowpt" | "low" => Ok(SelectionVariant::LowPt),
            "2" | "highpt" | "high" => Ok(SelectionVariant::HighPt),
            _ => Err(CalRatioError::ParseError {
                name: s.to_string(),
                object: "SelectionVariant".to_string(),
            }),
        }
    }
}

/// Every threshold of the cutflow.
///
/// Missing keys in a YAML file fall back to the values in [`SelectionConfig::default`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectionConfig {
    /// A jet counts as a BIB jet above this BIB-BDT weight...
    pub bib_jet_weight: f64,
    /// ...and this pT (GeV)...
    pub bib_jet_pt: f64,
    /// ...and below this |eta|, if it is also a good LLP candidate.
    pub bib_jet_abs_eta: f64,
    /// Preselection lower bound on `sumMinDR`.
    pub preselection_sum_min_dr: f64,
    /// Lower bound on the event BDT score.
    pub event_bdt: f64,
    /// Trigger matching lower bound on `minDRTrkpt2`.
    pub trigger_min_dr_trk_pt2: f64,
    /// Trigger matching lower bound on `logRatio`.
    pub trigger_log_ratio: f64,
    /// Lower edge of the (open) jet timing window, in ns.
    pub time_min: f64,
    /// Upper edge of the (open) jet timing window, in ns.
    pub time_max: f64,
    /// Upper bound on `MHT/HT`.
    pub mht_over_ht: f64,
    /// Lower bound on the summed `logRatio` of the two signal jets.
    pub sum_log_ratio: f64,
    /// Leading signal-jet pT threshold for selection 1.
    pub leading_pt_low: f64,
    /// Leading signal-jet pT threshold for selection 2.
    pub leading_pt_high: f64,
    /// Diagnostic region-A tag lower bound on `sumMinDR`.
    pub region_a_sum_min_dr: f64,
    /// Diagnostic region-A tag lower bound on the event BDT score.
    pub region_a_event_bdt: f64,
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self {
            bib_jet_weight: 0.6,
            bib_jet_pt: 40.0,
            bib_jet_abs_eta: 2.5,
            preselection_sum_min_dr: 0.5,
            event_bdt: 0.05,
            trigger_min_dr_trk_pt2: 0.2,
            trigger_log_ratio: 1.2,
            time_min: -3.0,
            time_max: 15.0,
            mht_over_ht: 0.8,
            sum_log_ratio: 2.0,
            leading_pt_low: 100.0,
            leading_pt_high: 160.0,
            region_a_sum_min_dr: 1.5,
            region_a_event_bdt: 0.1,
        }
    }
}

impl SelectionConfig {
    /// The leading signal-jet pT threshold for `variant`.
    pub fn leading_pt(&self, variant: SelectionVariant) -> f64 {
        match variant {
            SelectionVariant::LowPt => self.leading_pt_low,
            SelectionVariant::HighPt => self.leading_pt_high,
        }
    }

    fn in_time_window(&self, jet: &Jet) -> bool {
        jet.time > self.time_min && jet.time < self.time_max
    }

    fn is_bib_jet(&self, jet: &Jet) -> bool {
        jet.bib_weight > self.bib_jet_weight
            && jet.pt > self.bib_jet_pt
            && jet.eta.abs() < self.bib_jet_abs_eta
            && jet.is_good_llp
    }
}

/// One counted step of the cutflow, in the order it is reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Stage {
    Preselection,
    EventBdt,
    TriggerMatching,
    Timing,
    BibVeto,
    MhtOverHt,
    SumLogRatio,
    /// Leading signal-jet pT, evaluated for each variant independently.
    LeadingPt(SelectionVariant),
    /// Diagnostic tag of events in region A, counted inside each passed variant.
    RegionA(SelectionVariant),
}

impl Stage {
    /// Number of counted stages.
    pub const COUNT: usize = 11;

    /// All stages in report order.
    pub const ALL: [Stage; Stage::COUNT] = [
        Stage::Preselection,
        Stage::EventBdt,
        Stage::TriggerMatching,
        Stage::Timing,
        Stage::BibVeto,
        Stage::MhtOverHt,
        Stage::SumLogRatio,
        Stage::LeadingPt(SelectionVariant::LowPt),
        Stage::RegionA(SelectionVariant::LowPt),
        Stage::LeadingPt(SelectionVariant::HighPt),
        Stage::RegionA(SelectionVariant::HighPt),
    ];

    /// Position of the stage in [`Stage::ALL`].
    pub fn index(self) -> usize {
        match self {
            Stage::Preselection => 0,
            Stage::EventBdt => 1,
            Stage::TriggerMatching => 2,
            Stage::Timing => 3,
            Stage::BibVeto => 4,
            Stage::MhtOverHt => 5,
            Stage::SumLogRatio => 6,
            Stage::LeadingPt(SelectionVariant::LowPt) => 7,
            Stage::RegionA(SelectionVariant::LowPt) => 8,
            Stage::LeadingPt(SelectionVariant::HighPt) => 9,
            Stage::RegionA(SelectionVariant::HighPt) => 10,
        }
    }

    /// The stage a count must not exceed, if any.
    pub fn parent(self) -> Option<Stage> {
        match self {
            Stage::Preselection => None,
            Stage::LeadingPt(SelectionVariant::LowPt) => Some(Stage::SumLogRatio),
            Stage::LeadingPt(SelectionVariant::HighPt) => {
                Some(Stage::LeadingPt(SelectionVariant::LowPt))
            }
            Stage::RegionA(variant) => Some(Stage::LeadingPt(variant)),
            stage => Some(Stage::ALL[stage.index() - 1]),
        }
    }

    /// Human-readable description of the cut, using the thresholds in `config`.
    pub fn label(self, config: &SelectionConfig) -> String {
        match self {
            Stage::Preselection => "Preselection".to_string(),
            Stage::EventBdt => format!("eventBDT > {}", config.event_bdt),
            Stage::TriggerMatching => "Trigger matching".to_string(),
            Stage::Timing => format!(
                "{} < time(sig,bib) < {}",
                config.time_min, config.time_max
            ),
            Stage::BibVeto => "0 BIB jets".to_string(),
            Stage::MhtOverHt => format!("HTmiss/HT < {}", config.mht_over_ht),
            Stage::SumLogRatio => {
                format!("sum(logRatio(jet1,jet2)) > {}", config.sum_log_ratio)
            }
            Stage::LeadingPt(variant) => format!(
                "Selection {}  pT > {}",
                variant.number(),
                config.leading_pt(variant)
            ),
            Stage::RegionA(_) => "Region A".to_string(),
        }
    }
}

/// Monotonic per-stage event counts.
///
/// Counters from independent chunks of events can be merged with `+`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CutflowCounters([u64; Stage::COUNT]);

impl CutflowCounters {
    /// Count one more event passing `stage`.
    pub fn increment(&mut self, stage: Stage) {
        self.0[stage.index()] += 1;
    }

    /// Number of events which passed `stage`.
    pub fn get(&self, stage: Stage) -> u64 {
        self.0[stage.index()]
    }

    /// `(stage, count)` pairs in report order.
    pub fn iter(&self) -> impl Iterator<Item = (Stage, u64)> + '_ {
        Stage::ALL.into_iter().map(|stage| (stage, self.get(stage)))
    }

    /// Whether no count exceeds the count of the looser stage before it.
    pub fn is_monotonic(&self) -> bool {
        Stage::ALL.into_iter().all(|stage| {
            stage
                .parent()
                .map_or(true, |parent| self.get(stage) <= self.get(parent))
        })
    }
}

impl_op_ex!(+ |a: &CutflowCounters, b: &CutflowCounters| -> CutflowCounters {
    let mut out = *a;
    out += b;
    out
});

impl_op_ex!(+= |a: &mut CutflowCounters, b: &CutflowCounters| {
    for (lhs, rhs) in a.0.iter_mut().zip(b.0.iter()) {
        *lhs += rhs;
    }
});

/// The cutflow summary printed after a run.
#[derive(Debug, Clone)]
pub struct CutflowReport {
    /// Sample label shown in the header.
    pub sample: String,
    /// Thresholds used to label the stages.
    pub config: SelectionConfig,
    /// The counts.
    pub counters: CutflowCounters,
}

impl CutflowReport {
    pub fn new<S: Into<String>>(
        sample: S,
        config: &SelectionConfig,
        counters: CutflowCounters,
    ) -> Self {
        Self {
            sample: sample.into(),
            config: config.clone(),
            counters,
        }
    }
}

impl Display for CutflowReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Cutflow results for sample {}", self.sample)?;
        writeln!(f, "{}", "=".repeat(49))?;
        for (stage, count) in self.counters.iter() {
            if matches!(stage, Stage::LeadingPt(_)) {
                writeln!(f, "{}", "-".repeat(49))?;
            }
            writeln!(f, "{:>28} : {}", stage.label(&self.config), count)?;
        }
        Ok(())
    }
}

/// Everything the [`Selector`] decided about one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelectionOutcome {
    /// Which stages the event passed, indexed by [`Stage::index`].
    pub stages: [bool; Stage::COUNT],
    /// Whether the event passed the full selection of the requested variant.
    pub is_selected: bool,
    /// Whether any jet in the event looks like beam-induced background.
    pub has_bib_jet: bool,
    /// Position in the ABCD plane, regardless of the selection.
    pub region: Region,
    /// Region indicators, set only for selected events which fired the trigger.
    pub flags: RegionFlags,
}

impl SelectionOutcome {
    /// Whether the event passed `stage`.
    pub fn passed(&self, stage: Stage) -> bool {
        self.stages[stage.index()]
    }
}

/// Per-event quantities shared by the stage predicates.
struct EventView<'a> {
    event: &'a EventRecord,
    signal: Option<[&'a Jet; 2]>,
    bib_pair: Option<[&'a Jet; 2]>,
    has_bib_jet: bool,
}

impl<'a> EventView<'a> {
    fn new(event: &'a EventRecord, config: &SelectionConfig) -> Self {
        let pair = |lookup: fn(&'a EventRecord, usize) -> Option<&'a Jet>| {
            Some([lookup(event, 0)?, lookup(event, 1)?])
        };
        Self {
            event,
            signal: pair(EventRecord::signal_jet),
            bib_pair: pair(EventRecord::bib_pair_jet),
            has_bib_jet: event.jets.iter().any(|jet| config.is_bib_jet(jet)),
        }
    }
}

type StageCut = fn(&SelectionConfig, &EventView<'_>) -> bool;

fn preselection(config: &SelectionConfig, view: &EventView<'_>) -> bool {
    view.event.signal_indices.len() >= 2
        && view.event.sum_min_dr > config.preselection_sum_min_dr
        && view.event.pass_trigger
        && view
            .signal
            .is_some_and(|[lead, sub]| lead.is_good_llp && sub.is_good_llp)
}

fn event_bdt(config: &SelectionConfig, view: &EventView<'_>) -> bool {
    view.event.event_bdt > config.event_bdt
}

fn trigger_matching(config: &SelectionConfig, view: &EventView<'_>) -> bool {
    view.signal.is_some_and(|jets| {
        jets.iter().any(|jet| {
            jet.is_cr_hlt
                && jet.min_dr_trk_pt2 > config.trigger_min_dr_trk_pt2
                && jet.log_ratio > config.trigger_log_ratio
        })
    })
}

fn timing(config: &SelectionConfig, view: &EventView<'_>) -> bool {
    match (view.signal, view.bib_pair) {
        (Some(signal), Some(bib)) => signal
            .iter()
            .chain(bib.iter())
            .all(|jet| config.in_time_window(jet)),
        _ => false,
    }
}

fn bib_veto(_: &SelectionConfig, view: &EventView<'_>) -> bool {
    !view.has_bib_jet
}

fn mht_over_ht(config: &SelectionConfig, view: &EventView<'_>) -> bool {
    view.event.mht_over_ht < config.mht_over_ht
}

fn sum_log_ratio(config: &SelectionConfig, view: &EventView<'_>) -> bool {
    view.signal
        .is_some_and(|[lead, sub]| lead.log_ratio + sub.log_ratio > config.sum_log_ratio)
}

/// The shared stages, applied in order with short-circuit AND.
const CUTS: [(Stage, StageCut); 7] = [
    (Stage::Preselection, preselection),
    (Stage::EventBdt, event_bdt),
    (Stage::TriggerMatching, trigger_matching),
    (Stage::Timing, timing),
    (Stage::BibVeto, bib_veto),
    (Stage::MhtOverHt, mht_over_ht),
    (Stage::SumLogRatio, sum_log_ratio),
];

/// Runs events through the CalRatio cutflow for one requested [`SelectionVariant`].
///
/// The region classifier is injected, [`AbcdPlane`] being the default.
///
/// # Examples
/// ```
/// use calratio_core::{data::test_event, CutflowCounters, Region, SelectionVariant, Selector};
///
/// let selector = Selector::new(SelectionVariant::LowPt);
/// let mut counters = CutflowCounters::default();
/// let outcome = selector.evaluate(&test_event(), &mut counters);
/// assert!(outcome.is_selected);
/// assert_eq!(outcome.region, Region::A);
/// ```
#[derive(Debug, Clone)]
pub struct Selector<C: RegionClassifier = AbcdPlane> {
    variant: SelectionVariant,
    config: SelectionConfig,
    classifier: C,
}

impl Selector<AbcdPlane> {
    /// A selector with the default thresholds and the default ABCD plane.
    pub fn new(variant: SelectionVariant) -> Self {
        Self {
            variant,
            config: SelectionConfig::default(),
            classifier: AbcdPlane::default(),
        }
    }
}

impl<C: RegionClassifier> Selector<C> {
    /// Replace the cut thresholds.
    pub fn with_config(mut self, config: SelectionConfig) -> Self {
        self.config = config;
        self
    }

    /// Replace the region classifier.
    pub fn with_classifier<D: RegionClassifier>(self, classifier: D) -> Selector<D> {
        Selector {
            variant: self.variant,
            config: self.config,
            classifier,
        }
    }

    pub fn variant(&self) -> SelectionVariant {
        self.variant
    }

    pub fn config(&self) -> &SelectionConfig {
        &self.config
    }

    pub fn classifier(&self) -> &C {
        &self.classifier
    }

    /// Walk one event through the cutflow, counting every stage it passes.
    pub fn evaluate(
        &self,
        event: &EventRecord,
        counters: &mut CutflowCounters,
    ) -> SelectionOutcome {
        let view = EventView::new(event, &self.config);
        let mut stages = [false; Stage::COUNT];
        let passed_common = CUTS.iter().all(|(stage, cut)| {
            let pass = cut(&self.config, &view);
            if pass {
                counters.increment(*stage);
                stages[stage.index()] = true;
            }
            pass
        });

        let mut is_selected = false;
        if let (true, Some([lead, _])) = (passed_common, view.signal) {
            let tagged_a = event.sum_min_dr > self.config.region_a_sum_min_dr
                && event.event_bdt > self.config.region_a_event_bdt;
            for variant in SelectionVariant::ALL {
                if lead.pt <= self.config.leading_pt(variant) {
                    continue;
                }
                counters.increment(Stage::LeadingPt(variant));
                stages[Stage::LeadingPt(variant).index()] = true;
                if variant == self.variant {
                    is_selected = true;
                }
                if tagged_a {
                    counters.increment(Stage::RegionA(variant));
                    stages[Stage::RegionA(variant).index()] = true;
                }
            }
        }

        let region = self.classifier.classify(event.event_bdt, event.sum_min_dr);
        SelectionOutcome {
            stages,
            is_selected,
            has_bib_jet: view.has_bib_jet,
            region,
            flags: RegionFlags::new(region, event.pass_trigger, is_selected),
        }
    }

    /// Evaluate one event and build its slimmed output record.
    pub fn process(&self, event: &EventRecord, counters: &mut CutflowCounters) -> SlimRecord {
        let outcome = self.evaluate(event, counters);
        SlimRecord::new(event, &outcome)
    }

    /// Process a sequence of events in order, returning one record per event and the counters.
    pub fn run(&self, events: &[EventRecord]) -> (Vec<SlimRecord>, CutflowCounters) {
        let mut counters = CutflowCounters::default();
        let records = events
            .iter()
            .map(|event| self.process(event, &mut counters))
            .collect();
        debug!(n_events = events.len(), variant = %self.variant, "processed events");
        (records, counters)
    }

    /// Parallel version of [`Selector::run`].
    ///
    /// Events are processed in chunks whose counters are summed afterwards; both the records
    /// (in input order) and the counters are identical to the sequential result.
    #[cfg(feature = "rayon")]
    pub fn run_par(&self, events: &[EventRecord]) -> (Vec<SlimRecord>, CutflowCounters) {
        let chunk_size = (events.len() / rayon::current_num_threads().max(1)).clamp(256, 65_536);
        let chunks: Vec<(Vec<SlimRecord>, CutflowCounters)> = events
            .par_chunks(chunk_size)
            .map(|chunk| self.run(chunk))
            .collect();
        let mut records = Vec::with_capacity(events.len());
        let mut counters = CutflowCounters::default();
        for (chunk_records, chunk_counters) in chunks {
            records.extend(chunk_records);
            counters += chunk_counters;
        }
        debug!(n_events = events.len(), variant = %self.variant, "processed events in parallel");
        (records, counters)
    }
}

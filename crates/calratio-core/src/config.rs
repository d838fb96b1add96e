use std::fs;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    data::io::canonicalize_path, efficiency::LxyBinning, regions::AbcdPlane,
    selection::SelectionConfig, systematics::SystematicsOptions, CalRatioResult,
};

/// All tunable settings of an analysis run.
///
/// Every section (and every key inside a section) is optional in YAML; anything left out keeps
/// its default:
///
/// ```yaml
/// selection:
///   event_bdt: 0.1
///   leading_pt_high: 200.0
/// abcd:
///   bdt_cut: 0.2
///   sum_min_dr_floor: 0.5
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AnalysisConfig {
    /// Cutflow thresholds.
    pub selection: SelectionConfig,
    /// ABCD plane used to classify events.
    pub abcd: AbcdPlane,
    /// Lxy binning of the efficiency maps.
    pub lxy: LxyBinning,
    /// Constant systematic uncertainties.
    pub systematics: SystematicsOptions,
}

impl AnalysisConfig {
    /// Parse a configuration from YAML text.
    pub fn from_yaml_str(text: &str) -> CalRatioResult<Self> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(text)?)
    }

    /// Read a YAML configuration file. The path may contain `~` and environment variables.
    pub fn from_yaml_file(file_path: &str) -> CalRatioResult<Self> {
        let path = canonicalize_path(file_path)?;
        let config = Self::from_yaml_str(&fs::read_to_string(&path)?)?;
        debug!(path = %path.display(), ?config, "loaded configuration");
        Ok(config)
    }

    /// Serialize to YAML, e.g. to dump the defaults as a starting point.
    pub fn to_yaml(&self) -> CalRatioResult<String> {
        Ok(serde_yaml::to_string(self)?)
    }
}

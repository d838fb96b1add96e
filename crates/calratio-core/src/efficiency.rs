use std::{fs::File, io::BufWriter};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{
    data::io::expand_output_path,
    regions::Region,
    slim::SlimRecord,
    utils::{Histogram, Histogram2D},
    CalRatioError, CalRatioResult,
};

/// Binning of the LLP transverse decay length, in metres.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LxyBinning {
    pub bins: usize,
    pub min: f64,
    pub max: f64,
}

impl Default for LxyBinning {
    fn default() -> Self {
        Self {
            bins: 30,
            min: 0.0,
            max: 5.0,
        }
    }
}

impl LxyBinning {
    fn histogram(&self) -> CalRatioResult<Histogram> {
        Histogram::new(self.bins, (self.min, self.max))
    }

    fn histogram_2d(&self) -> CalRatioResult<Histogram2D> {
        Histogram2D::new(self.bins, (self.min, self.max))
    }
}

fn region_slot(region: Region) -> CalRatioResult<usize> {
    region.slot().ok_or_else(|| {
        CalRatioError::Custom(format!("Illegal region for an efficiency lookup: {region}"))
    })
}

/// Per-bin binomial ratios of each region's passed counts over the generated counts.
fn region_ratios(
    passed: &[(Vec<f64>, Vec<f64>); 4],
    generated: (&[f64], &[f64]),
) -> [Vec<(f64, f64)>; 4] {
    passed.each_ref().map(|(counts, sumw2)| {
        (0..counts.len())
            .map(|bin| binomial_ratio(counts[bin], sumw2[bin], generated.0[bin], generated.1[bin]))
            .collect()
    })
}

/// One point of an efficiency curve, in the shape the plotting scripts read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlotPoint {
    pub label: String,
    pub x: f64,
    pub y: f64,
    pub y_err_up: f64,
    pub y_err_down: f64,
}

/// Per-region analysis efficiency as a function of LLP decay length.
///
/// Both LLPs of every event fill the denominator; both LLPs of events flagged in a region fill
/// that region's numerator. Decay lengths are converted from mm to m.
#[derive(Debug, Clone)]
pub struct LxyEfficiency {
    binning: LxyBinning,
    generated: Histogram,
    efficiencies: [Vec<(f64, f64)>; 4],
}

impl LxyEfficiency {
    /// Fill the generated and passed histograms from slimmed records.
    pub fn from_records(records: &[SlimRecord], binning: LxyBinning) -> CalRatioResult<Self> {
        let mut generated = binning.histogram()?;
        let mut passed = [
            binning.histogram()?,
            binning.histogram()?,
            binning.histogram()?,
            binning.histogram()?,
        ];
        for record in records {
            let lxy = record.lxy_m();
            for value in lxy {
                generated.fill(value, record.weight);
            }
            if let Some(slot) = record.regions.active().slot() {
                for value in lxy {
                    passed[slot].fill(value, record.weight);
                }
            }
        }
        info!(
            n_records = records.len(),
            bins = binning.bins,
            generated = generated.integral(),
            "filled Lxy efficiency histograms"
        );
        let efficiencies = region_ratios(
            &passed.map(|hist| (hist.counts, hist.sumw2)),
            (&generated.counts, &generated.sumw2),
        );
        Ok(Self {
            binning,
            generated,
            efficiencies,
        })
    }

    pub fn binning(&self) -> &LxyBinning {
        &self.binning
    }

    /// Per-bin `(efficiency, binomial error)` for `region`. Bins with nothing generated give
    /// `(0, 0)`.
    pub fn efficiency(&self, region: Region) -> CalRatioResult<&[(f64, f64)]> {
        Ok(&self.efficiencies[region_slot(region)?])
    }

    /// The extrapolation weight of an event with decay lengths `lxy1` and `lxy2` (in metres),
    /// `sqrt(eff(lxy1) * eff(lxy2))`. Decay lengths outside the binning have zero efficiency.
    pub fn weight(&self, region: Region, lxy1: f64, lxy2: f64) -> CalRatioResult<f64> {
        let efficiency = self.efficiency(region)?;
        let lookup = |lxy: f64| {
            self.generated
                .find_bin(lxy)
                .map_or(0.0, |bin| efficiency[bin].0)
        };
        Ok((lookup(lxy1) * lookup(lxy2)).sqrt())
    }

    /// The efficiency curve of `region` as plot points, with errors clipped to `[0, 1]`.
    pub fn points(&self, region: Region) -> CalRatioResult<Vec<PlotPoint>> {
        let label = format!("Region {region}");
        let centers = self.generated.bin_centers();
        Ok(self
            .efficiency(region)?
            .iter()
            .copied()
            .zip(centers)
            .map(|((y, err), x)| PlotPoint {
                label: label.clone(),
                x,
                y,
                y_err_up: err.min(1.0 - y).max(0.0),
                y_err_down: err.min(y).max(0.0),
            })
            .collect())
    }

    /// The curves of all four regions, A to D.
    pub fn all_points(&self) -> Vec<PlotPoint> {
        Region::ALL
            .into_iter()
            .flat_map(|region| self.points(region).unwrap_or_default())
            .collect()
    }
}

/// One cell of a 2D efficiency map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapCell {
    pub label: String,
    /// Bin centre of the first LLP decay length, in metres.
    pub lxy1: f64,
    /// Bin centre of the second LLP decay length, in metres.
    pub lxy2: f64,
    pub efficiency: f64,
    pub error: f64,
}

/// Per-region analysis efficiency as a joint function of both LLP decay lengths.
///
/// Each event fills one `(lxy1, lxy2)` cell. The per-region passed maps are smoothed before
/// dividing by the generated map, which is left as filled.
#[derive(Debug, Clone)]
pub struct LxyEfficiency2D {
    binning: LxyBinning,
    generated: Histogram2D,
    efficiencies: [Vec<(f64, f64)>; 4],
}

impl LxyEfficiency2D {
    /// Fill, smooth and divide the 2D maps from slimmed records.
    pub fn from_records(records: &[SlimRecord], binning: LxyBinning) -> CalRatioResult<Self> {
        let mut generated = binning.histogram_2d()?;
        let mut passed = [
            binning.histogram_2d()?,
            binning.histogram_2d()?,
            binning.histogram_2d()?,
            binning.histogram_2d()?,
        ];
        for record in records {
            let [lxy1, lxy2] = record.lxy_m();
            generated.fill(lxy1, lxy2, record.weight);
            if let Some(slot) = record.regions.active().slot() {
                passed[slot].fill(lxy1, lxy2, record.weight);
            }
        }
        for hist in &mut passed {
            hist.smooth();
        }
        info!(
            n_records = records.len(),
            bins = binning.bins,
            generated = generated.integral(),
            "filled 2D Lxy efficiency maps"
        );
        let efficiencies = region_ratios(
            &passed.map(|hist| (hist.counts, hist.sumw2)),
            (&generated.counts, &generated.sumw2),
        );
        Ok(Self {
            binning,
            generated,
            efficiencies,
        })
    }

    pub fn binning(&self) -> &LxyBinning {
        &self.binning
    }

    /// Per-cell `(efficiency, binomial error)` for `region`, row-major in `lxy1`.
    pub fn efficiency(&self, region: Region) -> CalRatioResult<&[(f64, f64)]> {
        Ok(&self.efficiencies[region_slot(region)?])
    }

    /// Every cell of all four region maps, A to D.
    pub fn cells(&self) -> Vec<MapCell> {
        let centers = self.binning.histogram().map(|h| h.bin_centers()).unwrap_or_default();
        let n = centers.len();
        Region::ALL
            .into_iter()
            .zip(&self.efficiencies)
            .flat_map(|(region, efficiency)| {
                let centers = &centers;
                efficiency.iter().enumerate().map(move |(cell, (eff, err))| MapCell {
                    label: format!("Region {region}"),
                    lxy1: centers[cell / n],
                    lxy2: centers[cell % n],
                    efficiency: *eff,
                    error: *err,
                })
            })
            .collect()
    }

    /// The extrapolation weight of an event, read from the `(lxy1, lxy2)` cell (in metres).
    /// Pairs outside the map have zero efficiency.
    pub fn weight(&self, region: Region, lxy1: f64, lxy2: f64) -> CalRatioResult<f64> {
        let efficiency = self.efficiency(region)?;
        Ok(self
            .generated
            .find_bin(lxy1, lxy2)
            .map_or(0.0, |cell| efficiency[cell].0))
    }
}

/// Ratio of two weighted counts with the binomial error used for efficiencies of weighted
/// histograms.
pub fn binomial_ratio(pass: f64, pass_w2: f64, total: f64, total_w2: f64) -> (f64, f64) {
    if total == 0.0 {
        return (0.0, 0.0);
    }
    let eff = pass / total;
    let variance = ((1.0 - 2.0 * eff) * pass_w2 + eff * eff * total_w2).abs() / (total * total);
    (eff, variance.sqrt())
}

/// Write plot points as a pretty-printed JSON array.
pub fn write_points_json(points: &[PlotPoint], file_path: &str) -> CalRatioResult<()> {
    let path = expand_output_path(file_path)?;
    let writer = BufWriter::new(File::create(&path)?);
    serde_json::to_writer_pretty(writer, points)?;
    info!(path = %path.display(), n_points = points.len(), "wrote plot points");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{data::LlpCandidate, regions::RegionFlags};
    use approx::assert_relative_eq;

    fn record(lxy_mm: [f64; 2], region: Region, weight: f64) -> SlimRecord {
        let llp = |lxy| LlpCandidate {
            lxy,
            ..Default::default()
        };
        SlimRecord {
            event_number: 0,
            passed: true,
            llps: [llp(lxy_mm[0]), llp(lxy_mm[1])],
            weight,
            regions: RegionFlags::new(region, true, true),
        }
    }

    fn binning() -> LxyBinning {
        LxyBinning {
            bins: 5,
            min: 0.0,
            max: 5.0,
        }
    }

    #[test]
    fn test_binomial_ratio() {
        let (eff, err) = binomial_ratio(2.0, 2.0, 4.0, 4.0);
        assert_relative_eq!(eff, 0.5);
        // Unit weights reduce to sqrt(eff * (1 - eff) / n).
        assert_relative_eq!(err, (0.5 * 0.5 / 4.0_f64).sqrt());
        assert_eq!(binomial_ratio(1.0, 1.0, 0.0, 0.0), (0.0, 0.0));
        let (eff, err) = binomial_ratio(4.0, 4.0, 4.0, 4.0);
        assert_relative_eq!(eff, 1.0);
        assert_relative_eq!(err, 0.0);
    }

    #[test]
    fn test_efficiency_per_region() {
        let records = vec![
            record([500.0, 1500.0], Region::A, 1.0),
            record([500.0, 1500.0], Region::None, 1.0),
            record([500.0, 2500.0], Region::B, 1.0),
            record([9000.0, 2500.0], Region::A, 1.0),
        ];
        let eff = LxyEfficiency::from_records(&records, binning()).unwrap();
        let a = eff.efficiency(Region::A).unwrap();
        // Bin 0 (0-1 m): three generated, one in A.
        assert_relative_eq!(a[0].0, 1.0 / 3.0);
        // Bin 1 (1-2 m): two generated, one in A.
        assert_relative_eq!(a[1].0, 0.5);
        // Bin 2 (2-3 m): two generated, one in A, one in B.
        assert_relative_eq!(a[2].0, 0.5);
        assert_relative_eq!(a[4].0, 0.0);
        let b = eff.efficiency(Region::B).unwrap();
        assert_relative_eq!(b[2].0, 0.5);
        assert!(eff.efficiency(Region::None).is_err());
    }

    #[test]
    fn test_event_weight_lookup() {
        let records = vec![
            record([500.0, 1500.0], Region::A, 1.0),
            record([500.0, 1500.0], Region::None, 1.0),
            record([1500.0, 1500.0], Region::None, 1.0),
        ];
        let eff = LxyEfficiency::from_records(&records, binning()).unwrap();
        // eff(0.5 m) = 1/2, eff(1.5 m) = 1/4.
        assert_relative_eq!(eff.weight(Region::A, 0.5, 1.5).unwrap(), (0.125_f64).sqrt());
        assert_relative_eq!(eff.weight(Region::A, 0.5, 7.0).unwrap(), 0.0);
        assert_relative_eq!(eff.weight(Region::C, 0.5, 1.5).unwrap(), 0.0);
        assert!(eff.weight(Region::None, 0.5, 1.5).is_err());
    }

    #[test]
    fn test_2d_map_lookup() {
        let records = vec![
            record([500.0, 1500.0], Region::A, 1.0),
            record([500.0, 1500.0], Region::None, 1.0),
        ];
        // A single cell is unchanged by smoothing.
        let binning = LxyBinning {
            bins: 1,
            min: 0.0,
            max: 5.0,
        };
        let eff = LxyEfficiency2D::from_records(&records, binning).unwrap();
        assert_relative_eq!(eff.weight(Region::A, 0.5, 1.5).unwrap(), 0.5);
        assert_relative_eq!(eff.weight(Region::A, 4.0, 0.1).unwrap(), 0.5);
        assert_relative_eq!(eff.weight(Region::A, 5.5, 1.5).unwrap(), 0.0);
        assert_relative_eq!(eff.weight(Region::B, 0.5, 1.5).unwrap(), 0.0);
        assert!(eff.weight(Region::None, 0.5, 1.5).is_err());
        assert!(eff.efficiency(Region::None).is_err());
    }

    #[test]
    fn test_2d_map_smooths_passed_counts() {
        let records = vec![
            record([500.0, 500.0], Region::A, 1.0),
            record([500.0, 1500.0], Region::None, 1.0),
            record([1500.0, 500.0], Region::None, 1.0),
            record([1500.0, 1500.0], Region::None, 1.0),
        ];
        let binning = LxyBinning {
            bins: 2,
            min: 0.0,
            max: 2.0,
        };
        let eff = LxyEfficiency2D::from_records(&records, binning).unwrap();
        // Every cell of a 2x2 map sees kernel cells summing to 11.
        assert_relative_eq!(eff.weight(Region::A, 0.5, 0.5).unwrap(), 5.0 / 11.0);
        assert_relative_eq!(eff.weight(Region::A, 0.5, 1.5).unwrap(), 2.0 / 11.0);
        assert_relative_eq!(eff.weight(Region::A, 1.5, 1.5).unwrap(), 2.0 / 11.0);
        assert_eq!(eff.efficiency(Region::A).unwrap().len(), 4);
        assert_eq!(eff.binning().bins, 2);

        let cells = eff.cells();
        assert_eq!(cells.len(), 16);
        assert_eq!(cells[1].label, "Region A");
        assert_relative_eq!(cells[1].lxy1, 0.5);
        assert_relative_eq!(cells[1].lxy2, 1.5);
        assert_relative_eq!(cells[1].efficiency, 2.0 / 11.0);
        assert_eq!(cells[4].label, "Region B");
    }

    #[test]
    fn test_points_are_clipped() {
        let records = vec![record([500.0, 500.0], Region::D, 1.0)];
        let eff = LxyEfficiency::from_records(&records, binning()).unwrap();
        let points = eff.points(Region::D).unwrap();
        assert_eq!(points.len(), 5);
        assert_eq!(points[0].label, "Region D");
        assert_relative_eq!(points[0].x, 0.5);
        assert_relative_eq!(points[0].y, 1.0);
        assert_relative_eq!(points[0].y_err_up, 0.0);
        assert_eq!(eff.all_points().len(), 20);

        let json = serde_json::to_value(&points[0]).unwrap();
        assert!(json.get("yErrUp").is_some());
        assert!(json.get("yErrDown").is_some());
    }
}

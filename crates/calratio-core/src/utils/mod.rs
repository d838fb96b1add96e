use serde::{Deserialize, Serialize};

use crate::{CalRatioError, CalRatioResult};

/// A helper method to get histogram edges from evenly-spaced `bins` over a given `range`
/// # See Also
/// [`Histogram`]
/// [`get_bin_index`]
pub fn get_bin_edges(bins: usize, range: (f64, f64)) -> Vec<f64> {
    let bin_width = (range.1 - range.0) / (bins as f64);
    (0..=bins)
        .map(|i| range.0 + (i as f64 * bin_width))
        .collect()
}

/// A helper method to obtain the index of a bin where a value should go in a histogram with evenly
/// spaced `bins` over a given `range`
///
/// # See Also
/// [`Histogram`]
/// [`get_bin_edges`]
pub fn get_bin_index(value: f64, bins: usize, limits: (f64, f64)) -> Option<usize> {
    if value >= limits.0 && value < limits.1 {
        let bin_width = (limits.1 - limits.0) / bins as f64;
        let bin_index = ((value - limits.0) / bin_width).floor() as usize;
        Some(bin_index.min(bins - 1))
    } else {
        None
    }
}

/// A weighted histogram with evenly spaced bins which also tracks the sum of squared weights.
///
/// Values outside of the range are dropped, there are no under- or overflow bins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Histogram {
    /// The sum of weights in each bin
    pub counts: Vec<f64>,
    /// The sum of squared weights in each bin
    pub sumw2: Vec<f64>,
    /// The edges of each bin (length is one greater than `counts`)
    pub bin_edges: Vec<f64>,
    range: (f64, f64),
}

impl Histogram {
    /// Create an empty histogram with `bins` evenly spaced bins over `range`.
    pub fn new(bins: usize, range: (f64, f64)) -> CalRatioResult<Self> {
        if bins == 0 {
            return Err(CalRatioError::Custom(
                "Number of bins must be greater than zero!".to_string(),
            ));
        }
        if !(range.1 > range.0) {
            return Err(CalRatioError::Custom(format!(
                "The lower edge of the range must be smaller than the upper edge! (got {range:?})"
            )));
        }
        Ok(Self {
            counts: vec![0.0; bins],
            sumw2: vec![0.0; bins],
            bin_edges: get_bin_edges(bins, range),
            range,
        })
    }

    /// Number of bins.
    pub fn bins(&self) -> usize {
        self.counts.len()
    }

    /// The lower and upper edges of the histogram.
    pub fn range(&self) -> (f64, f64) {
        self.range
    }

    /// Add `weight` to the bin containing `value`. Returns the bin index, or [`None`] if the
    /// value fell outside the range.
    pub fn fill(&mut self, value: f64, weight: f64) -> Option<usize> {
        let index = get_bin_index(value, self.bins(), self.range)?;
        self.counts[index] += weight;
        self.sumw2[index] += weight * weight;
        Some(index)
    }

    /// The bin a value would be filled into.
    pub fn find_bin(&self, value: f64) -> Option<usize> {
        get_bin_index(value, self.bins(), self.range)
    }

    /// Midpoints of every bin.
    pub fn bin_centers(&self) -> Vec<f64> {
        self.bin_edges
            .windows(2)
            .map(|edges| 0.5 * (edges[0] + edges[1]))
            .collect()
    }

    /// Sum of weights over all bins.
    pub fn integral(&self) -> f64 {
        self.counts.iter().sum()
    }
}

/// Smoothing kernel applied by [`Histogram2D::smooth`].
const K5A: [[f64; 5]; 5] = [
    [0.0, 0.0, 1.0, 0.0, 0.0],
    [0.0, 2.0, 2.0, 2.0, 0.0],
    [1.0, 2.0, 5.0, 2.0, 1.0],
    [0.0, 2.0, 2.0, 2.0, 0.0],
    [0.0, 0.0, 1.0, 0.0, 0.0],
];

/// A weighted 2D histogram with the same evenly spaced binning on both axes.
///
/// Bins are stored row-major, `x` varying slowest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Histogram2D {
    pub counts: Vec<f64>,
    pub sumw2: Vec<f64>,
    bins: usize,
    range: (f64, f64),
}

impl Histogram2D {
    /// Create an empty `bins` x `bins` histogram over `range` on each axis.
    pub fn new(bins: usize, range: (f64, f64)) -> CalRatioResult<Self> {
        Histogram::new(bins, range)?;
        Ok(Self {
            counts: vec![0.0; bins * bins],
            sumw2: vec![0.0; bins * bins],
            bins,
            range,
        })
    }

    /// Number of bins along each axis.
    pub fn bins(&self) -> usize {
        self.bins
    }

    /// Flat index of the bin containing `(x, y)`, or [`None`] if either is out of range.
    pub fn find_bin(&self, x: f64, y: f64) -> Option<usize> {
        let ix = get_bin_index(x, self.bins, self.range)?;
        let iy = get_bin_index(y, self.bins, self.range)?;
        Some(ix * self.bins + iy)
    }

    pub fn fill(&mut self, x: f64, y: f64, weight: f64) -> Option<usize> {
        let index = self.find_bin(x, y)?;
        self.counts[index] += weight;
        self.sumw2[index] += weight * weight;
        Some(index)
    }

    /// Replace every bin by the kernel-weighted average of its 5x5 neighbourhood.
    ///
    /// Neighbours outside the histogram are left out of both the sum and the normalisation.
    /// Squared weights are propagated with the squared kernel.
    pub fn smooth(&mut self) {
        let n = self.bins as isize;
        let mut counts = vec![0.0; self.counts.len()];
        let mut sumw2 = vec![0.0; self.sumw2.len()];
        for ix in 0..n {
            for iy in 0..n {
                let (mut sum, mut err, mut norm) = (0.0, 0.0, 0.0);
                for (dx, row) in K5A.iter().enumerate() {
                    for (dy, k) in row.iter().enumerate() {
                        let (jx, jy) = (ix + dx as isize - 2, iy + dy as isize - 2);
                        if *k == 0.0 || jx < 0 || jy < 0 || jx >= n || jy >= n {
                            continue;
                        }
                        let j = (jx * n + jy) as usize;
                        sum += k * self.counts[j];
                        err += k * k * self.sumw2[j];
                        norm += k;
                    }
                }
                let i = (ix * n + iy) as usize;
                counts[i] = sum / norm;
                sumw2[i] = err / (norm * norm);
            }
        }
        self.counts = counts;
        self.sumw2 = sumw2;
    }

    /// Sum of weights over all bins.
    pub fn integral(&self) -> f64 {
        self.counts.iter().sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_binning() {
        assert_eq!(get_bin_index(0.0, 3, (0.0, 1.0)), Some(0));
        assert_eq!(get_bin_index(0.1, 3, (0.0, 1.0)), Some(0));
        assert_eq!(get_bin_index(0.5, 3, (0.0, 1.0)), Some(1));
        assert_eq!(get_bin_index(0.9, 3, (0.0, 1.0)), Some(2));
        assert_eq!(get_bin_index(1.0, 3, (0.0, 1.0)), None);
        assert_eq!(get_bin_index(-0.1, 3, (0.0, 1.0)), None);
        assert_eq!(get_bin_index(f64::NAN, 3, (0.0, 1.0)), None);
        let edges = get_bin_edges(3, (0.0, 1.0));
        assert_eq!(edges.len(), 4);
        assert_relative_eq!(edges[1], 1.0 / 3.0);
    }

    #[test]
    fn test_histogram_tracks_sumw2() {
        let mut hist = Histogram::new(2, (0.0, 1.0)).unwrap();
        for (value, weight) in [(0.1, 1.0), (0.2, 2.0), (0.8, 0.5), (5.0, 10.0)] {
            hist.fill(value, weight);
        }
        assert_eq!(hist.counts, vec![3.0, 0.5]);
        assert_eq!(hist.sumw2, vec![5.0, 0.25]);
        assert_relative_eq!(hist.integral(), 3.5);
        assert_eq!(hist.bin_centers(), vec![0.25, 0.75]);
        assert_eq!(hist.find_bin(1.0), None);
    }

    #[test]
    fn test_histogram_2d_fill() {
        let mut hist = Histogram2D::new(2, (0.0, 1.0)).unwrap();
        assert_eq!(hist.fill(0.1, 0.9, 2.0), Some(1));
        assert_eq!(hist.fill(0.9, 0.1, 1.0), Some(2));
        assert_eq!(hist.fill(0.9, 1.5, 1.0), None);
        assert_eq!(hist.counts, vec![0.0, 2.0, 1.0, 0.0]);
        assert_eq!(hist.sumw2, vec![0.0, 4.0, 1.0, 0.0]);
        assert!(Histogram2D::new(0, (0.0, 1.0)).is_err());
    }

    #[test]
    fn test_smoothing() {
        // A flat histogram stays flat.
        let mut flat = Histogram2D::new(4, (0.0, 4.0)).unwrap();
        flat.counts = vec![3.0; 16];
        flat.smooth();
        for value in &flat.counts {
            assert_relative_eq!(*value, 3.0);
        }

        // A single spike in the corner spreads with the kernel weights of the in-range cells.
        let mut spike = Histogram2D::new(3, (0.0, 3.0)).unwrap();
        spike.fill(0.5, 0.5, 1.0);
        spike.smooth();
        // Corner bin: in-range kernel cells are 5, 2, 2, 2, 1, 1 -> norm 13.
        assert_relative_eq!(spike.counts[0], 5.0 / 13.0);
        assert_relative_eq!(spike.sumw2[0], 25.0 / 169.0);
        // Centre bin: only the inner 3x3 of the kernel is in range, norm 21.
        assert_relative_eq!(spike.counts[4], 2.0 / 21.0);
    }

    #[test]
    fn test_histogram_rejects_bad_input() {
        assert!(Histogram::new(0, (0.0, 1.0)).is_err());
        assert!(Histogram::new(3, (1.0, 1.0)).is_err());
    }
}

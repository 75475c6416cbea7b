//! Rainflow cycle counting and fixed-size cycle histograms.
//!
//! Cycles are extracted with the four-point rule on the turning points of the
//! signal. The residue left after one pass is closed either by repeating it
//! once and extracting again (`ResidueClosure::Repeated`), or by counting each
//! residue reversal as a half cycle (`ResidueClosure::HalfCycles`, ASTM E1049).
use serde::{Deserialize, Serialize};

/// How the open residue of the first extraction pass is turned into cycles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResidueClosure {
    /// Concatenate the residue with itself and extract full cycles again.
    #[default]
    Repeated,
    /// Count every residue reversal as half a cycle.
    HalfCycles,
}

/// A single extracted cycle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Cycle {
    pub range: f64,
    pub mean: f64,
    /// 1.0 for a closed cycle, 0.5 for a half cycle.
    pub count: f64,
}

/// (range, count) pairs of one signal. Fixed-size histograms keep zero-count
/// placeholder bins so that every sector of a case stores the same shape.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CycleHistogram {
    ranges: Vec<f64>,
    counts: Vec<f64>,
}

impl CycleHistogram {
    pub fn zeros(bins: usize) -> Self {
        CycleHistogram {
            ranges: vec![0.0; bins],
            counts: vec![0.0; bins],
        }
    }

    pub fn from_pairs<I: IntoIterator<Item = (f64, f64)>>(pairs: I) -> Self {
        let (ranges, counts) = pairs.into_iter().unzip();
        CycleHistogram { ranges, counts }
    }

    /// One entry per cycle, without binning.
    pub fn from_cycles(cycles: &[Cycle]) -> Self {
        Self::from_pairs(cycles.iter().map(|c| (c.range, c.count)))
    }

    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    pub fn ranges(&self) -> &[f64] {
        &self.ranges
    }

    pub fn counts(&self) -> &[f64] {
        &self.counts
    }

    pub fn iter(&self) -> impl Iterator<Item = (f64, f64)> + '_ {
        self.ranges.iter().copied().zip(self.counts.iter().copied())
    }

    pub fn total_count(&self) -> f64 {
        self.counts.iter().sum()
    }

    /// Multiplies every range by `factor`; counts are untouched.
    pub fn scale_ranges(&self, factor: f64) -> Self {
        CycleHistogram {
            ranges: self.ranges.iter().map(|r| r * factor).collect(),
            counts: self.counts.clone(),
        }
    }

    /// Multiplies every count by `factor`; ranges are untouched.
    pub fn scale_counts(&self, factor: f64) -> Self {
        CycleHistogram {
            ranges: self.ranges.clone(),
            counts: self.counts.iter().map(|n| n * factor).collect(),
        }
    }

    /// Appends the bins of `other` after the bins of `self`.
    pub fn extend(&mut self, other: &CycleHistogram) {
        self.ranges.extend_from_slice(&other.ranges);
        self.counts.extend_from_slice(&other.counts);
    }

    /// Σ nᵢ · (ΔMᵢ · correction)^m, the bracketed term of the DEM formula.
    pub fn dem_sum(&self, wohler_exponent: f64, correction: f64) -> f64 {
        self.iter()
            .map(|(range, count)| count * (range * correction).powf(wohler_exponent))
            .sum()
    }
}

/// Reduces a signal to its turning points. The first and last samples are
/// always kept, repeated values and points on a monotonic run are dropped.
/// Non-finite samples are ignored.
pub fn reversals(series: &[f64]) -> Vec<f64> {
    let mut out: Vec<f64> = Vec::new();
    for x in series.iter().copied().filter(|v| v.is_finite()) {
        let n = out.len();
        if n == 0 {
            out.push(x);
            continue;
        }
        let last = out[n - 1];
        if x == last {
            continue;
        }
        if n >= 2 && (last - out[n - 2]) * (x - last) > 0.0 {
            out[n - 1] = x;
        } else {
            out.push(x);
        }
    }
    out
}

/// Four-point extraction. Returns the closed cycles and the residue.
fn extract_closed(points: &[f64]) -> (Vec<Cycle>, Vec<f64>) {
    let mut cycles = Vec::new();
    let mut stack: Vec<f64> = Vec::with_capacity(points.len());
    for &p in points {
        stack.push(p);
        while stack.len() >= 4 {
            let n = stack.len();
            let s1 = (stack[n - 3] - stack[n - 4]).abs();
            let s2 = (stack[n - 2] - stack[n - 3]).abs();
            let s3 = (stack[n - 1] - stack[n - 2]).abs();
            if s2 <= s1 && s2 <= s3 {
                cycles.push(Cycle {
                    range: s2,
                    mean: (stack[n - 2] + stack[n - 3]) / 2.0,
                    count: 1.0,
                });
                stack.drain(n - 3..n - 1);
            } else {
                break;
            }
        }
    }
    (cycles, stack)
}

/// All rainflow cycles of `series`, first-pass cycles first, residue last.
pub fn extract_cycles(series: &[f64], closure: ResidueClosure) -> Vec<Cycle> {
    let points = reversals(series);
    if points.len() < 2 {
        return Vec::new();
    }
    let (mut cycles, residue) = extract_closed(&points);
    match closure {
        ResidueClosure::Repeated => {
            let doubled: Vec<f64> = residue.iter().chain(residue.iter()).copied().collect();
            let (closed, _) = extract_closed(&reversals(&doubled));
            cycles.extend(closed);
        }
        ResidueClosure::HalfCycles => {
            cycles.extend(residue.windows(2).map(|w| Cycle {
                range: (w[1] - w[0]).abs(),
                mean: (w[1] + w[0]) / 2.0,
                count: 0.5,
            }));
        }
    }
    cycles
}

/// Means and ranges of every extracted cycle, residue counted as half cycles.
pub fn rainflow(series: &[f64]) -> (Vec<f64>, Vec<f64>) {
    extract_cycles(series, ResidueClosure::HalfCycles)
        .into_iter()
        .map(|c| (c.mean, c.range))
        .unzip()
}

/// Groups cycles into `bins` equal-width bins spanning the observed minimum to
/// maximum range. Each bin reports its centre as range; counts are summed.
pub fn bin_cycles(cycles: &[Cycle], bins: usize) -> CycleHistogram {
    if bins == 0 {
        return CycleHistogram::default();
    }
    let mut histogram = CycleHistogram::zeros(bins);
    if cycles.is_empty() {
        return histogram;
    }
    let (min, max) = cycles.iter().fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), c| {
        (lo.min(c.range), hi.max(c.range))
    });
    let width = (max - min) / bins as f64;
    if width > 0.0 {
        for (i, range) in histogram.ranges.iter_mut().enumerate() {
            *range = min + (i as f64 + 0.5) * width;
        }
        for c in cycles {
            let idx = (((c.range - min) / width).floor() as usize).min(bins - 1);
            histogram.counts[idx] += c.count;
        }
    } else {
        // A single distinct range: every bin reports it, the first holds the count.
        histogram.ranges.iter_mut().for_each(|r| *r = min);
        histogram.counts[0] = cycles.iter().map(|c| c.count).sum();
    }
    histogram
}

/// Rainflow counter producing fixed-size histograms.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RainflowCounter {
    pub bins: usize,
    pub closure: ResidueClosure,
}

impl Default for RainflowCounter {
    fn default() -> Self {
        RainflowCounter {
            bins: 128,
            closure: ResidueClosure::Repeated,
        }
    }
}

impl RainflowCounter {
    pub fn new(bins: usize, closure: ResidueClosure) -> Self {
        RainflowCounter { bins, closure }
    }

    /// Histogram of exactly `self.bins` entries. Signals with fewer than two
    /// turning points give an all-zero histogram.
    pub fn count(&self, series: &[f64]) -> CycleHistogram {
        let cycles = extract_cycles(series, self.closure);
        if cycles.is_empty() {
            tracing::warn!(
                samples = series.len(),
                "degenerate rainflow input, returning zero-count histogram"
            );
            return CycleHistogram::zeros(self.bins);
        }
        bin_cycles(&cycles, self.bins)
    }

    /// One entry per extracted cycle, without binning.
    pub fn count_exact(&self, series: &[f64]) -> CycleHistogram {
        CycleHistogram::from_cycles(&extract_cycles(series, self.closure))
    }
}

//! Probability-weighted reduction of per-case results into per-DLC and
//! all-DLC tables indexed by (geometry, sector).

use nalgebra::DMatrix;

use crate::engine::{CaseOutcome, Mode};
use crate::error::{FatigueError, Result};
use crate::rainflow::CycleHistogram;

/// Simulated cases are 10 minutes long.
pub const CASES_PER_HOUR: f64 = 6.0;

/// Per-case values of one DLC, indexed by (case, geometry, sector).
#[derive(Debug, Clone, PartialEq)]
pub struct DamageTable {
    n_geometry: usize,
    n_sectors: usize,
    cases: Vec<DMatrix<f64>>,
}

impl DamageTable {
    pub fn new(n_geometry: usize, n_sectors: usize) -> Self {
        DamageTable {
            n_geometry,
            n_sectors,
            cases: Vec::new(),
        }
    }

    pub fn from_cases(n_geometry: usize, n_sectors: usize, cases: Vec<DMatrix<f64>>) -> Result<Self> {
        let mut table = DamageTable::new(n_geometry, n_sectors);
        for case in cases {
            table.push_matrix(case)?;
        }
        Ok(table)
    }

    pub fn len(&self) -> usize {
        self.cases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cases.is_empty()
    }

    pub fn shape(&self) -> (usize, usize, usize) {
        (self.cases.len(), self.n_geometry, self.n_sectors)
    }

    pub fn case(&self, index: usize) -> Option<&DMatrix<f64>> {
        self.cases.get(index)
    }

    pub fn cases(&self) -> &[DMatrix<f64>] {
        &self.cases
    }

    pub fn push_matrix(&mut self, values: DMatrix<f64>) -> Result<()> {
        if values.shape() != (self.n_geometry, self.n_sectors) {
            return Err(FatigueError::InvalidInput(format!(
                "case table of shape {:?} does not fit {} geometries x {} sectors",
                values.shape(),
                self.n_geometry,
                self.n_sectors
            )));
        }
        self.cases.push(values);
        Ok(())
    }

    /// Appends the per-member values of one evaluated case.
    pub fn push_outcome(&mut self, outcome: &CaseOutcome) -> Result<()> {
        if outcome.members.len() != self.n_geometry
            || outcome.members.iter().any(|m| m.values.len() != self.n_sectors)
        {
            return Err(FatigueError::InvalidInput(format!(
                "case {} does not match {} geometries x {} sectors",
                outcome.case, self.n_geometry, self.n_sectors
            )));
        }
        let values = DMatrix::from_fn(self.n_geometry, self.n_sectors, |g, s| {
            outcome.members[g].values[s]
        });
        self.cases.push(values);
        Ok(())
    }
}

/// Weighted sum over the cases of a DLC.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProbabilityWeightedAggregator {
    unit_factor: f64,
}

impl ProbabilityWeightedAggregator {
    /// DEM sums are converted from per 10 minutes to per hour while
    /// aggregating. Damage stays per 10 minutes until the lifetime is computed.
    pub fn for_mode(mode: Mode) -> Self {
        match mode {
            Mode::Dem => ProbabilityWeightedAggregator {
                unit_factor: CASES_PER_HOUR,
            },
            Mode::Damage => ProbabilityWeightedAggregator { unit_factor: 1.0 },
        }
    }

    pub fn unit_factor(&self) -> f64 {
        self.unit_factor
    }

    /// combined[g, s] = Σ_case w[case] · table[case, g, s] · unit_factor
    pub fn accumulate(&self, table: &DamageTable, weights: &[f64]) -> Result<DMatrix<f64>> {
        if weights.len() != table.len() {
            return Err(FatigueError::InvalidInput(format!(
                "{} weights given for {} cases",
                weights.len(),
                table.len()
            )));
        }
        if let Some(bad) = weights.iter().find(|w| !w.is_finite() || **w < 0.0) {
            return Err(FatigueError::InvalidInput(format!(
                "case probability must be a non-negative number, got {}",
                bad
            )));
        }
        let mut combined = DMatrix::zeros(table.n_geometry, table.n_sectors);
        for (values, weight) in table.cases.iter().zip(weights) {
            combined += values * (*weight * self.unit_factor);
        }
        Ok(combined)
    }
}

/// Running sum of combined DLC tables. Addition is the only mutation, so the
/// result does not depend on the order DLCs are added in.
#[derive(Debug, Clone, PartialEq)]
pub struct CombinedTable {
    values: DMatrix<f64>,
    dlcs: Vec<String>,
}

impl CombinedTable {
    pub fn new(n_geometry: usize, n_sectors: usize) -> Self {
        CombinedTable {
            values: DMatrix::zeros(n_geometry, n_sectors),
            dlcs: Vec::new(),
        }
    }

    pub fn add(&mut self, dlc: &str, combined: &DMatrix<f64>) -> Result<()> {
        if combined.shape() != self.values.shape() {
            return Err(FatigueError::InvalidInput(format!(
                "DLC {} table of shape {:?} cannot be added to {:?}",
                dlc,
                combined.shape(),
                self.values.shape()
            )));
        }
        self.values += combined;
        self.dlcs.push(dlc.to_owned());
        Ok(())
    }

    pub fn values(&self) -> &DMatrix<f64> {
        &self.values
    }

    pub fn dlcs(&self) -> &[String] {
        &self.dlcs
    }

    pub fn into_values(self) -> DMatrix<f64> {
        self.values
    }
}

/// Yearly cycle histogram per sector of one member, built by concatenating
/// the per-case histograms of every DLC with counts scaled by
/// probability · 6.
#[derive(Debug, Clone, PartialEq)]
pub struct CycleTotals {
    sectors: Vec<CycleHistogram>,
}

impl CycleTotals {
    pub fn new(n_sectors: usize) -> Self {
        CycleTotals {
            sectors: vec![CycleHistogram::default(); n_sectors],
        }
    }

    pub fn add_case(&mut self, histograms: &[CycleHistogram], probability: f64) -> Result<()> {
        if histograms.len() != self.sectors.len() {
            return Err(FatigueError::InvalidInput(format!(
                "case has {} sector histograms, expected {}",
                histograms.len(),
                self.sectors.len()
            )));
        }
        let factor = probability * CASES_PER_HOUR;
        for (total, histogram) in self.sectors.iter_mut().zip(histograms) {
            total.extend(&histogram.scale_counts(factor));
        }
        Ok(())
    }

    pub fn sectors(&self) -> &[CycleHistogram] {
        &self.sectors
    }

    pub fn into_histograms(self) -> Vec<CycleHistogram> {
        self.sectors
    }
}

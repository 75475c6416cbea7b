//! Conversion of yearly damage into years to failure.

use nalgebra::DMatrix;
use serde::{Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;

use crate::aggregate::CASES_PER_HOUR;
use crate::error::{FatigueError, Result};

/// Years to failure. No damage means the detail never fails.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Lifetime {
    Finite(f64),
    Infinite,
}

impl Lifetime {
    pub fn from_yearly_damage(damage: f64) -> Lifetime {
        if damage > 0.0 {
            Lifetime::Finite(1.0 / damage)
        } else {
            Lifetime::Infinite
        }
    }

    /// Years as a float, `f64::INFINITY` for the sentinel.
    pub fn years(&self) -> f64 {
        match self {
            Lifetime::Finite(years) => *years,
            Lifetime::Infinite => f64::INFINITY,
        }
    }

    pub fn is_infinite(&self) -> bool {
        matches!(self, Lifetime::Infinite)
    }

    fn compare(&self, other: &Lifetime) -> Ordering {
        self.years().total_cmp(&other.years())
    }
}

impl fmt::Display for Lifetime {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Lifetime::Finite(years) => write!(f, "{:.1} years", years),
            Lifetime::Infinite => write!(f, "infinite"),
        }
    }
}

impl Serialize for Lifetime {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Lifetime::Finite(years) => serializer.serialize_f64(*years),
            Lifetime::Infinite => serializer.serialize_str("infinite"),
        }
    }
}

/// Lifetime per sector and the governing (shortest) one.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SectorLifetimes {
    pub yearly_damage: Vec<f64>,
    pub lifetimes: Vec<Lifetime>,
    pub governing_sector: usize,
    pub governing: Lifetime,
}

impl SectorLifetimes {
    pub fn from_yearly_damage(yearly_damage: Vec<f64>) -> SectorLifetimes {
        let lifetimes: Vec<Lifetime> = yearly_damage
            .iter()
            .map(|d| Lifetime::from_yearly_damage(*d))
            .collect();
        let (governing_sector, governing) = governing(&lifetimes);
        SectorLifetimes {
            yearly_damage,
            lifetimes,
            governing_sector,
            governing,
        }
    }
}

/// Shortest lifetime and its index; the first wins a tie.
pub fn governing(lifetimes: &[Lifetime]) -> (usize, Lifetime) {
    lifetimes
        .iter()
        .enumerate()
        .fold((0, Lifetime::Infinite), |(best, min), (i, l)| {
            if l.compare(&min) == Ordering::Less {
                (i, *l)
            } else {
                (best, min)
            }
        })
}

/// Lifetime per sector from per-case damage that already includes the DFF.
/// Yearly damage = Σ_case probability · 6 · damage.
pub fn lifetime_from_cases(probabilities: &[f64], damage: &[Vec<f64>]) -> Result<SectorLifetimes> {
    if probabilities.len() != damage.len() {
        return Err(FatigueError::InvalidInput(format!(
            "{} probabilities for {} damage rows",
            probabilities.len(),
            damage.len()
        )));
    }
    let n_sectors = damage.first().map(|row| row.len()).unwrap_or(0);
    if damage.iter().any(|row| row.len() != n_sectors) {
        return Err(FatigueError::InvalidInput("damage rows differ in sector count".into()));
    }
    let mut yearly = vec![0.0; n_sectors];
    for (probability, row) in probabilities.iter().zip(damage) {
        for (total, d) in yearly.iter_mut().zip(row) {
            *total += probability * CASES_PER_HOUR * d;
        }
    }
    Ok(SectorLifetimes::from_yearly_damage(yearly))
}

/// Lifetime per geometry and sector from combined damage tables of all DLCs
/// (probability-weighted, per 10 minutes). Yearly damage = Σ_DLC combined · 6 · DFF.
pub fn lifetime_from_combined(tables: &[DMatrix<f64>], dffs: &[f64]) -> Result<Vec<SectorLifetimes>> {
    let (n_geometry, n_sectors) = match tables.first() {
        Some(first) => first.shape(),
        None => return Ok(Vec::new()),
    };
    if tables.iter().any(|t| t.shape() != (n_geometry, n_sectors)) {
        return Err(FatigueError::InvalidInput("combined tables differ in shape".into()));
    }
    if dffs.len() != n_geometry {
        return Err(FatigueError::InvalidInput(format!(
            "{} DFFs for {} geometries",
            dffs.len(),
            n_geometry
        )));
    }
    let mut total = DMatrix::zeros(n_geometry, n_sectors);
    for table in tables {
        total += table;
    }
    Ok((0..n_geometry)
        .map(|g| {
            let yearly = total
                .row(g)
                .iter()
                .map(|d| d * CASES_PER_HOUR * dffs[g])
                .collect();
            SectorLifetimes::from_yearly_damage(yearly)
        })
        .collect())
}

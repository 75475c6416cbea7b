//! Linear interpolation of damage equivalent moments between instrumented
//! members, and the scaling factor that carries a member's cycle histogram
//! over to a non-instrumented hotspot.

use nalgebra::DMatrix;

use crate::config::DemSettings;
use crate::error::{FatigueError, Result};
use crate::geometry::nearest_index;

/// DEM per sector of one instrumented member.
#[derive(Debug, Clone, PartialEq)]
pub struct MemberDem {
    pub elevation: f64,
    pub dem: Vec<f64>,
}

/// Members used for a target elevation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bracket {
    /// The target coincides with a member.
    Exact(usize),
    Between { below: usize, above: usize },
}

/// Interpolated DEM at a hotspot with its closest member and sector.
#[derive(Debug, Clone, PartialEq)]
pub struct HotspotDem {
    pub dem: Vec<f64>,
    pub closest_member: usize,
    pub closest_sector: usize,
}

/// Interpolated DEM at a hotspot and how it relates to the closest member.
#[derive(Debug, Clone, PartialEq)]
pub struct HotspotScaling {
    pub dem: Vec<f64>,
    pub closest_member: usize,
    pub closest_sector: usize,
    /// DEM at the hotspot over DEM at the closest member, in the closest sector.
    pub factor: f64,
}

#[derive(Debug, Clone)]
pub struct DemInterpolator {
    members: Vec<MemberDem>,
}

impl DemInterpolator {
    pub fn new(members: Vec<MemberDem>) -> Result<Self> {
        let n_sectors = match members.first() {
            Some(first) => first.dem.len(),
            None => {
                return Err(FatigueError::InvalidInput(
                    "DEM interpolation needs at least one member".into(),
                ))
            }
        };
        for (i, member) in members.iter().enumerate() {
            if !member.elevation.is_finite() {
                return Err(FatigueError::InvalidInput(format!(
                    "member {} has a non-finite elevation",
                    i
                )));
            }
            if member.dem.len() != n_sectors {
                return Err(FatigueError::InvalidInput(format!(
                    "member at {} mLAT has {} sectors, expected {}",
                    member.elevation,
                    member.dem.len(),
                    n_sectors
                )));
            }
        }
        Ok(DemInterpolator { members })
    }

    /// Member DEMs from accumulated internal sums (member × sector) for a
    /// given lifetime and reference cycle count.
    pub fn from_sums(
        elevations: &[f64],
        sums: &DMatrix<f64>,
        settings: &DemSettings,
        lifetime: f64,
        n_reference: f64,
    ) -> Result<Self> {
        if elevations.len() != sums.nrows() {
            return Err(FatigueError::InvalidInput(format!(
                "{} member elevations for {} rows of DEM sums",
                elevations.len(),
                sums.nrows()
            )));
        }
        let members = elevations
            .iter()
            .enumerate()
            .map(|(g, &elevation)| MemberDem {
                elevation,
                dem: sums
                    .row(g)
                    .iter()
                    .map(|sum| settings.dem_over(lifetime, n_reference, *sum))
                    .collect(),
            })
            .collect();
        DemInterpolator::new(members)
    }

    pub fn members(&self) -> &[MemberDem] {
        &self.members
    }

    pub fn span(&self) -> (f64, f64) {
        self.members
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), m| {
                (lo.min(m.elevation), hi.max(m.elevation))
            })
    }

    /// The member at the target elevation, or the nearest member strictly
    /// below and strictly above it.
    pub fn bracket(&self, target: f64) -> Result<Bracket> {
        if let Some(idx) = self.members.iter().position(|m| m.elevation == target) {
            return Ok(Bracket::Exact(idx));
        }
        let mut below: Option<usize> = None;
        let mut above: Option<usize> = None;
        for (i, member) in self.members.iter().enumerate() {
            if member.elevation < target
                && below.map_or(true, |b| member.elevation > self.members[b].elevation)
            {
                below = Some(i);
            }
            if member.elevation > target
                && above.map_or(true, |a| member.elevation < self.members[a].elevation)
            {
                above = Some(i);
            }
        }
        match (below, above) {
            (Some(below), Some(above)) => Ok(Bracket::Between { below, above }),
            _ => {
                let (lowest, highest) = self.span();
                Err(FatigueError::Range {
                    target,
                    lowest,
                    highest,
                })
            }
        }
    }

    /// DEM per sector at the target elevation.
    pub fn interpolate(&self, target: f64) -> Result<Vec<f64>> {
        match self.bracket(target)? {
            Bracket::Exact(idx) => Ok(self.members[idx].dem.clone()),
            Bracket::Between { below, above } => {
                let (lo, hi) = (&self.members[below], &self.members[above]);
                let fraction = (target - lo.elevation) / (hi.elevation - lo.elevation);
                Ok(lo
                    .dem
                    .iter()
                    .zip(&hi.dem)
                    .map(|(b, a)| b + (a - b) * fraction)
                    .collect())
            }
        }
    }

    /// Index of the member nearest the target; the first wins a tie.
    pub fn closest_member(&self, target: f64) -> usize {
        let elevations: Vec<f64> = self.members.iter().map(|m| m.elevation).collect();
        nearest_index(&elevations, target).unwrap_or(0)
    }

    /// Interpolated DEM at the target, its closest member and governing sector.
    pub fn locate(&self, target: f64, sectors: &[f64], orientation: Option<f64>) -> Result<HotspotDem> {
        let dem = self.interpolate(target)?;
        if sectors.len() != dem.len() {
            return Err(FatigueError::InvalidInput(format!(
                "{} sector angles for {} DEM values",
                sectors.len(),
                dem.len()
            )));
        }
        let closest_member = self.closest_member(target);
        let closest_sector = closest_sector(sectors, &dem, orientation);
        Ok(HotspotDem {
            dem,
            closest_member,
            closest_sector,
        })
    }

    /// Interpolated DEM at the target and the factor relating it to the
    /// closest member in the governing sector.
    pub fn scaling(&self, target: f64, sectors: &[f64], orientation: Option<f64>) -> Result<HotspotScaling> {
        let located = self.locate(target, sectors, orientation)?;
        self.scaling_of(located, sectors)
    }

    /// Scaling factor of an already located hotspot. The closest member must
    /// have a positive DEM in the governing sector.
    pub fn scaling_of(&self, located: HotspotDem, sectors: &[f64]) -> Result<HotspotScaling> {
        let HotspotDem {
            dem,
            closest_member,
            closest_sector,
        } = located;
        let reference = self.members[closest_member].dem[closest_sector];
        if !(reference > 0.0) {
            return Err(FatigueError::InvalidInput(format!(
                "member at {} mLAT has zero DEM in sector {}",
                self.members[closest_member].elevation, sectors[closest_sector]
            )));
        }
        let factor = dem[closest_sector] / reference;
        Ok(HotspotScaling {
            dem,
            closest_member,
            closest_sector,
            factor,
        })
    }
}

/// Sector nearest the orientation, or the sector with the largest DEM when
/// the hotspot has no orientation. The first wins a tie.
pub fn closest_sector(sectors: &[f64], dem: &[f64], orientation: Option<f64>) -> usize {
    match orientation {
        Some(angle) => nearest_index(sectors, angle).unwrap_or(0),
        None => dem
            .iter()
            .enumerate()
            .fold((0, f64::NEG_INFINITY), |(best, max), (i, v)| {
                if *v > max {
                    (i, *v)
                } else {
                    (best, max)
                }
            })
            .0,
    }
}

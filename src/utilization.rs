//! DFF-scaled fatigue utilization of non-instrumented hotspot elevations.

use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};

use crate::config::DemSettings;
use crate::engine::PA_TO_MPA;
use crate::error::{FatigueError, Result};
use crate::geometry::{turbine_to_compass, AngleFrame, CrossSection, ValidationType};
use crate::interpolate::{DemInterpolator, HotspotDem, HotspotScaling};
use crate::rainflow::CycleHistogram;

/// What to do with a hotspot outside the span of the instrumented members.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutOfRangePolicy {
    #[default]
    Error,
    /// Leave the hotspot out of the report and log it.
    Skip,
}

/// Utilization of one hotspot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UtilizationRow {
    /// Position of the hotspot in its table.
    pub index: usize,
    pub elevation: f64,
    pub name: Option<String>,
    pub curve: String,
    pub validation: ValidationType,
    /// DEM at the hotspot in the governing sector, MNm.
    pub dem_hotspot: f64,
    /// Nominal equivalent stress range, MPa.
    pub seq: f64,
    /// Hotspot equivalent stress range, MPa.
    pub seq_hotspot: f64,
    pub scf: f64,
    pub gritblast: f64,
    pub effective_thickness: f64,
    pub alpha: f64,
    pub miner_sum: f64,
    pub dff: f64,
    /// Miner sum · DFF in percent.
    pub utilization: f64,
    pub reported_utilization: Option<f64>,
    /// DEM ratio applied to the member cycles; only used by `RAINFLOW`.
    pub scaling_factor: Option<f64>,
    pub closest_member: usize,
    pub closest_member_elevation: f64,
    pub closest_sector: usize,
    /// Governing sector angle in the compass frame.
    pub reference_orientation: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkippedHotspot {
    pub elevation: f64,
    pub reported_utilization: Option<f64>,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UtilizationReport {
    pub rows: Vec<UtilizationRow>,
    pub skipped: Vec<SkippedHotspot>,
    /// Index into `rows` of the governing hotspot.
    pub worst: Option<usize>,
}

impl UtilizationReport {
    pub fn worst_row(&self) -> Option<&UtilizationRow> {
        self.worst.map(|i| &self.rows[i])
    }

    /// Largest reported utilization among hotspots left out of the report.
    pub fn worst_skipped_reported(&self) -> Option<f64> {
        self.skipped
            .iter()
            .filter_map(|s| s.reported_utilization)
            .fold(None, |acc: Option<f64>, u| Some(acc.map_or(u, |a| a.max(u))))
    }
}

/// Index of the largest utilization; the first wins a tie.
pub fn worst_index(rows: &[UtilizationRow]) -> Option<usize> {
    rows.iter()
        .enumerate()
        .fold(None, |best: Option<(usize, f64)>, (i, row)| match best {
            Some((_, max)) if row.utilization <= max => best,
            _ => Some((i, row.utilization)),
        })
        .map(|(i, _)| i)
}

/// Member data the hotspots are interpolated from.
#[derive(Debug, Clone)]
pub struct UtilizationCalculator<'a> {
    pub member_elevations: &'a [f64],
    /// Total internal DEM sums, member × sector.
    pub dem_sums: &'a DMatrix<f64>,
    /// Yearly moment cycle histograms, per member and sector.
    pub member_cycles: &'a [Vec<CycleHistogram>],
    pub sectors: &'a [f64],
    pub settings: DemSettings,
    pub frame: AngleFrame,
    pub policy: OutOfRangePolicy,
}

impl<'a> UtilizationCalculator<'a> {
    /// Evaluates every hotspot with its DFF. A DFF given on the hotspot row
    /// takes precedence over the one passed in.
    pub fn evaluate(&self, hotspots: &[CrossSection], dffs: &[f64]) -> Result<UtilizationReport> {
        if dffs.len() != hotspots.len() {
            return Err(FatigueError::InvalidInput(format!(
                "{} DFFs for {} hotspots",
                dffs.len(),
                hotspots.len()
            )));
        }
        let mut rows = Vec::with_capacity(hotspots.len());
        let mut skipped = Vec::new();
        for (index, (hotspot, dff)) in hotspots.iter().zip(dffs).enumerate() {
            let dff = hotspot.dff.unwrap_or(*dff);
            match self.evaluate_one(index, hotspot, dff) {
                Ok(row) => rows.push(row),
                Err(err @ FatigueError::Range { .. }) if self.policy == OutOfRangePolicy::Skip => {
                    tracing::warn!(elevation = hotspot.elevation, "skipping hotspot: {}", err);
                    skipped.push(SkippedHotspot {
                        elevation: hotspot.elevation,
                        reported_utilization: hotspot.reported_utilization,
                        reason: err.to_string(),
                    });
                }
                Err(err) => return Err(err.at(hotspot.location())),
            }
        }
        let worst = worst_index(&rows);
        Ok(UtilizationReport {
            rows,
            skipped,
            worst,
        })
    }

    fn interpolator(&self, hotspot: &CrossSection) -> Result<DemInterpolator> {
        let lifetime = hotspot.lifetime.unwrap_or(self.settings.lifetime);
        let n_reference = hotspot.n_ref.unwrap_or(self.settings.n_equivalent);
        DemInterpolator::from_sums(
            self.member_elevations,
            self.dem_sums,
            &self.settings,
            lifetime,
            n_reference,
        )
    }

    fn locate(&self, interpolator: &DemInterpolator, hotspot: &CrossSection) -> Result<HotspotDem> {
        interpolator.locate(
            hotspot.elevation,
            self.sectors,
            hotspot.primary_orientation(self.frame),
        )
    }

    /// Interpolated DEM and scaling factor for a hotspot.
    pub fn scaling(&self, hotspot: &CrossSection) -> Result<HotspotScaling> {
        let interpolator = self.interpolator(hotspot)?;
        let located = self.locate(&interpolator, hotspot)?;
        interpolator.scaling_of(located, self.sectors)
    }

    pub fn evaluate_one(&self, index: usize, hotspot: &CrossSection, dff: f64) -> Result<UtilizationRow> {
        let interpolator = self.interpolator(hotspot)?;
        let located = self.locate(&interpolator, hotspot)?;
        let lifetime = hotspot.lifetime.unwrap_or(self.settings.lifetime);
        let n_reference = hotspot.n_ref.unwrap_or(self.settings.n_equivalent);
        let modulus = hotspot.section_modulus();
        let alpha = hotspot.thickness_factor();
        let cs = located.closest_sector;
        let closest_member = located.closest_member;

        let dem_hotspot = located.dem[cs] * PA_TO_MPA;
        let seq = dem_hotspot / modulus;
        let seq_hotspot = seq * hotspot.scf * hotspot.gritblast;

        let (cycles, scaling_factor) = match hotspot.validation {
            ValidationType::Equivalent => (
                CycleHistogram::from_pairs(vec![(seq_hotspot * alpha, n_reference)]),
                None,
            ),
            ValidationType::Rainflow => {
                let scaling = interpolator.scaling_of(located, self.sectors)?;
                let reference = self
                    .member_cycles
                    .get(closest_member)
                    .and_then(|sectors| sectors.get(cs))
                    .ok_or_else(|| {
                        FatigueError::InvalidInput(format!(
                            "no cycle totals for member {} sector {}",
                            closest_member, cs
                        ))
                    })?;
                let to_stress = scaling.factor / modulus
                    * hotspot.scf
                    * hotspot.gritblast
                    * alpha
                    * PA_TO_MPA;
                (
                    reference.scale_ranges(to_stress).scale_counts(lifetime),
                    Some(scaling.factor),
                )
            }
        };
        let miner_sum = hotspot.sn_curve.miner_sum(&cycles);

        Ok(UtilizationRow {
            index,
            elevation: hotspot.elevation,
            name: hotspot.name.clone(),
            curve: hotspot.sn_curve.name.clone(),
            validation: hotspot.validation,
            dem_hotspot,
            seq,
            seq_hotspot,
            scf: hotspot.scf,
            gritblast: hotspot.gritblast,
            effective_thickness: hotspot.effective_thickness(),
            alpha,
            miner_sum,
            dff,
            utilization: miner_sum * dff * 100.0,
            reported_utilization: hotspot.reported_utilization,
            scaling_factor,
            closest_member,
            closest_member_elevation: self.member_elevations[closest_member],
            closest_sector: cs,
            reference_orientation: turbine_to_compass(self.sectors[cs]),
        })
    }
}

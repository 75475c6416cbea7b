//! Per-case evaluation: sector resolution, rainflow counting and either the
//! internal DEM sum of the moment cycles or the Miner sum of the stress cycles.

use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::config::DemSettings;
use crate::error::{FatigueError, Result};
use crate::geometry::{AngleFrame, CrossSection, MemberChannels, SectorLayout};
use crate::rainflow::{CycleHistogram, RainflowCounter};
use crate::sector::SectorResolver;
use crate::timeseries::{read_simulation_file, ChannelTimeSeries};

/// Pa to MPa.
pub const PA_TO_MPA: f64 = 1.0e-6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Mode {
    /// Internal DEM sums of the sector moments.
    #[default]
    Dem,
    /// Miner sums of the sector hotspot stresses.
    Damage,
}

/// Everything precomputed for one instrumented member.
#[derive(Debug, Clone)]
pub struct MemberPlan {
    pub section: CrossSection,
    pub channels: MemberChannels,
    /// Sector angles with SCF orientations snapped in, and the SCF per sector.
    /// Both modes resolve the loads on these angles.
    pub layout: SectorLayout,
    pub alpha: f64,
}

impl MemberPlan {
    pub fn new(section: CrossSection, sectors: &[f64], frame: AngleFrame) -> Result<MemberPlan> {
        let channels = section.channels.ok_or_else(|| {
            FatigueError::Configuration(format!(
                "member at {} mLAT has no channel columns",
                section.elevation
            ))
        })?;
        let layout = section.sector_layout(sectors, frame);
        let alpha = section.thickness_factor();
        Ok(MemberPlan {
            section,
            channels,
            layout,
            alpha,
        })
    }

    pub fn elevation(&self) -> f64 {
        self.section.elevation
    }
}

/// Result of one member in one case: a value per sector and, if requested,
/// the histogram per sector it was computed from.
#[derive(Debug, Clone, PartialEq)]
pub struct MemberOutcome {
    pub values: Vec<f64>,
    pub histograms: Option<Vec<CycleHistogram>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CaseOutcome {
    pub case: usize,
    pub members: Vec<MemberOutcome>,
}

#[derive(Debug, Clone, Copy)]
pub struct CaseEngine {
    pub mode: Mode,
    pub counter: RainflowCounter,
    pub dem: DemSettings,
    pub keep_histograms: bool,
}

impl CaseEngine {
    pub fn new(mode: Mode, counter: RainflowCounter, dem: DemSettings, keep_histograms: bool) -> Self {
        CaseEngine {
            mode,
            counter,
            dem,
            keep_histograms,
        }
    }

    /// Reads a result file pair and evaluates every member on it.
    pub fn process_file<P: AsRef<Path>, Q: AsRef<Path>>(
        &self,
        case: usize,
        binary: P,
        descriptor: Q,
        plans: &[MemberPlan],
    ) -> Result<CaseOutcome> {
        let series = read_simulation_file(binary, descriptor)?;
        self.process(case, &series, plans)
    }

    pub fn process(
        &self,
        case: usize,
        series: &ChannelTimeSeries,
        plans: &[MemberPlan],
    ) -> Result<CaseOutcome> {
        let members = plans
            .iter()
            .map(|plan| {
                self.process_member(series, plan)
                    .map_err(|e| e.at(plan.section.location()))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(CaseOutcome { case, members })
    }

    fn process_member(&self, series: &ChannelTimeSeries, plan: &MemberPlan) -> Result<MemberOutcome> {
        let mx = series.channel(plan.channels.mx)?;
        let my = series.channel(plan.channels.my)?;
        let resolver = SectorResolver::new(plan.layout.angles.clone());
        let signals: DMatrix<f64> = match self.mode {
            Mode::Dem => resolver.moments(&mx, &my)?,
            Mode::Damage => {
                let fz = series.channel(plan.channels.fz)?;
                let mut stress = resolver.nominal_stress(&mx, &my, &fz, &plan.section)?;
                let common = plan.section.gritblast * plan.alpha * PA_TO_MPA;
                for (s, mut row) in stress.row_iter_mut().enumerate() {
                    row *= plan.layout.scf[s] * common;
                }
                stress
            }
        };

        let histograms: Vec<CycleHistogram> = signals
            .row_iter()
            .map(|row| {
                let signal: Vec<f64> = row.iter().copied().collect();
                self.counter.count(&signal)
            })
            .collect();
        let values = match self.mode {
            Mode::Dem => histograms
                .iter()
                .map(|h| h.dem_sum(self.dem.wohler_exponent, self.dem.range_correction))
                .collect(),
            Mode::Damage => histograms
                .iter()
                .map(|h| plan.section.sn_curve.miner_sum(h))
                .collect(),
        };
        Ok(MemberOutcome {
            values,
            histograms: self.keep_histograms.then_some(histograms),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::tests::section;
    use crate::geometry::uniform_sectors;
    use crate::rainflow::ResidueClosure;
    use approx::assert_relative_eq;
    use std::f64::consts::PI;

    fn sine(amplitude: f64, period: f64, n: usize) -> Vec<f64> {
        (0..n)
            .map(|t| amplitude * (2.0 * PI * t as f64 / period).sin())
            .collect()
    }

    fn plan(sectors: &[f64]) -> MemberPlan {
        let mut s = section(-5.0, "omni");
        s.channels = Some(MemberChannels { mx: 1, my: 2, fz: 3 });
        MemberPlan::new(s, sectors, AngleFrame::Turbine).unwrap()
    }

    #[test]
    fn test_dem_mode_matches_internal_sum() {
        // Mx oscillates, My is zero: sector 90 sees the full Mx signal
        let series = ChannelTimeSeries::from_channels(&[
            sine(1000.0, 60.0, 600),
            vec![0.0; 600],
            vec![0.0; 600],
        ])
        .unwrap();
        let engine = CaseEngine::new(
            Mode::Dem,
            RainflowCounter::new(128, ResidueClosure::Repeated),
            DemSettings::default(),
            true,
        );
        let sectors = vec![0.0, 90.0];
        let outcome = engine.process(7, &series, &[plan(&sectors)]).unwrap();
        assert_eq!(outcome.case, 7);
        let member = &outcome.members[0];
        // sin(0) * Mx - cos(0) * 0 is identically zero
        assert_eq!(member.values[0], 0.0);
        assert_relative_eq!(
            member.values[1],
            10.0 * (2000.0f64 * 1.01).powf(5.0),
            max_relative = 1e-6
        );
        let histograms = member.histograms.as_ref().unwrap();
        assert_eq!(histograms.len(), 2);
        assert!(histograms.iter().all(|h| h.len() == 128));
    }

    #[test]
    fn test_dem_mode_resolves_on_snapped_orientation() {
        let series = ChannelTimeSeries::from_channels(&[
            sine(1000.0, 60.0, 600),
            sine(250.0, 45.0, 600),
            vec![0.0; 600],
        ])
        .unwrap();
        let engine = CaseEngine::new(
            Mode::Dem,
            RainflowCounter::default(),
            DemSettings::default(),
            false,
        );
        let mut s = section(-5.0, "40");
        s.channels = Some(MemberChannels { mx: 1, my: 2, fz: 3 });
        let sectors = uniform_sectors(15.0).unwrap();
        let oriented = MemberPlan::new(s, &sectors, AngleFrame::Turbine).unwrap();
        assert_eq!(oriented.layout.angles[3], 40.0);

        let snapped = engine.process(0, &series, &[oriented]).unwrap();
        let at_40 = engine.process(0, &series, &[plan(&[40.0])]).unwrap();
        let at_45 = engine.process(0, &series, &[plan(&[45.0])]).unwrap();
        let value = snapped.members[0].values[3];
        assert_relative_eq!(value, at_40.members[0].values[0], max_relative = 1e-9);
        assert!((value - at_45.members[0].values[0]).abs() > 1e-3 * value);
    }

    #[test]
    fn test_damage_mode_uses_stress_in_mpa() {
        let sectors = uniform_sectors(90.0).unwrap();
        let p = plan(&sectors);
        let z = p.section.section_modulus();
        // Moment amplitude giving a 50 MPa nominal stress range
        let amplitude = 25.0e6 * z;
        let series = ChannelTimeSeries::from_channels(&[
            sine(amplitude, 40.0, 400),
            vec![0.0; 400],
            vec![0.0; 400],
        ])
        .unwrap();
        let engine = CaseEngine::new(
            Mode::Damage,
            RainflowCounter::new(16, ResidueClosure::Repeated),
            DemSettings::default(),
            false,
        );
        let outcome = engine.process(0, &series, &[p.clone()]).unwrap();
        let member = &outcome.members[0];
        assert!(member.histograms.is_none());
        let range = 50.0 * p.layout.scf[1] * p.section.gritblast * p.alpha;
        let expected = 10.0 / p.section.sn_curve.endurance(range);
        assert_relative_eq!(member.values[1], expected, max_relative = 1e-4);
        assert_relative_eq!(member.values[3], expected, max_relative = 1e-4);
    }

    #[test]
    fn test_missing_channel_is_located() {
        let series = ChannelTimeSeries::from_channels(&[vec![0.0, 1.0]]).unwrap();
        let engine = CaseEngine::new(
            Mode::Dem,
            RainflowCounter::default(),
            DemSettings::default(),
            false,
        );
        let err = engine.process(0, &series, &[plan(&[0.0])]).unwrap_err();
        assert!(err.to_string().contains("elevation -5.00"));
        assert!(matches!(err.root(), FatigueError::Format(_)));
    }
}

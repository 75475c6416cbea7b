//! A module for loading and validating the run configuration.

use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::engine::Mode;
use crate::error::{FatigueError, Result};
use crate::geometry::{uniform_sectors, AngleFrame};
use crate::rainflow::{RainflowCounter, ResidueClosure};
use crate::utilization::OutOfRangePolicy;

/// Represents the configuration of one assessment run.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub project: Project,
    #[serde(default)]
    pub analysis: Analysis,
    #[serde(default)]
    pub dem: DemSettings,
    #[serde(default)]
    pub safety: Safety,
    #[serde(default)]
    pub utilization: UtilizationSettings,
    pub inputs: Inputs,
}

impl Config {
    /// Validates the entire configuration.
    ///
    /// Each section is checked on its own; the first violation is returned as a
    /// `Configuration` error.
    pub fn validate(&self) -> Result<()> {
        self.project.validate()?;
        self.analysis.validate()?;
        self.dem.validate()?;
        self.safety.validate()?;
        self.inputs.validate()?;
        Ok(())
    }

    pub fn sectors(&self) -> Result<Vec<f64>> {
        uniform_sectors(self.analysis.sector_step)
    }

    pub fn counter(&self) -> RainflowCounter {
        RainflowCounter::new(self.analysis.bins, self.analysis.closure)
    }
}

/// Identifies the cluster under assessment and where results go.
#[derive(Debug, Clone, Deserialize)]
pub struct Project {
    pub cluster: String,
    pub output: PathBuf,
}

impl Project {
    pub fn validate(&self) -> Result<()> {
        if self.cluster.trim().is_empty() {
            return Err(FatigueError::Configuration("cluster must not be empty".into()));
        }
        if self.output.as_os_str().is_empty() {
            return Err(FatigueError::Configuration("output directory must not be empty".into()));
        }
        Ok(())
    }
}

/// Settings of the per-case evaluation.
#[derive(Debug, Clone, Deserialize)]
pub struct Analysis {
    /// `DEM` accumulates internal DEM sums of moments, `DAMAGE` Miner sums of stress.
    #[serde(default)]
    pub mode: Mode,
    /// Number of rainflow histogram bins.
    #[serde(default = "default_bins")]
    pub bins: usize,
    /// Spacing of the sectors around the circumference in degrees.
    #[serde(default = "default_sector_step")]
    pub sector_step: f64,
    /// Frame the SCF orientations of the geometry tables are given in.
    #[serde(default)]
    pub angle_frame: AngleFrame,
    #[serde(default)]
    pub closure: ResidueClosure,
    /// Cases evaluated per parallel batch.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Persist per-case cycle histograms for the interpolation path.
    #[serde(default = "default_true")]
    pub store_histograms: bool,
}

fn default_bins() -> usize {
    128
}

fn default_sector_step() -> f64 {
    15.0
}

fn default_chunk_size() -> usize {
    64
}

fn default_true() -> bool {
    true
}

impl Default for Analysis {
    fn default() -> Self {
        Analysis {
            mode: Mode::default(),
            bins: default_bins(),
            sector_step: default_sector_step(),
            angle_frame: AngleFrame::default(),
            closure: ResidueClosure::default(),
            chunk_size: default_chunk_size(),
            store_histograms: true,
        }
    }
}

impl Analysis {
    pub fn validate(&self) -> Result<()> {
        if self.bins == 0 {
            return Err(FatigueError::Configuration("bins must be greater than 0".into()));
        }
        if self.chunk_size == 0 {
            return Err(FatigueError::Configuration("chunk_size must be greater than 0".into()));
        }
        uniform_sectors(self.sector_step)?;
        Ok(())
    }
}

/// Parameters of the damage equivalent moment.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct DemSettings {
    #[serde(default = "default_wohler_exponent")]
    pub wohler_exponent: f64,
    /// Range multiplier covering load cycles outside the simulated production window.
    #[serde(default = "default_range_correction")]
    pub range_correction: f64,
    /// Lifetime in years.
    #[serde(default = "default_lifetime")]
    pub lifetime: f64,
    #[serde(default = "default_n_equivalent")]
    pub n_equivalent: f64,
}

fn default_wohler_exponent() -> f64 {
    5.0
}

fn default_range_correction() -> f64 {
    1.01
}

fn default_lifetime() -> f64 {
    25.0
}

fn default_n_equivalent() -> f64 {
    1.0e7
}

impl Default for DemSettings {
    fn default() -> Self {
        DemSettings {
            wohler_exponent: default_wohler_exponent(),
            range_correction: default_range_correction(),
            lifetime: default_lifetime(),
            n_equivalent: default_n_equivalent(),
        }
    }
}

impl DemSettings {
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("wohler_exponent", self.wohler_exponent),
            ("range_correction", self.range_correction),
            ("lifetime", self.lifetime),
            ("n_equivalent", self.n_equivalent),
        ] {
            if !(value > 0.0) || !value.is_finite() {
                return Err(FatigueError::Configuration(format!(
                    "{} must be a positive number, got {}",
                    name, value
                )));
            }
        }
        Ok(())
    }

    /// DEM = (T / N_eq · Σ)^(1/m) for an accumulated internal DEM sum.
    pub fn dem(&self, internal_sum: f64) -> f64 {
        self.dem_over(self.lifetime, self.n_equivalent, internal_sum)
    }

    /// DEM for an explicit lifetime and reference cycle count.
    pub fn dem_over(&self, lifetime: f64, n_equivalent: f64, internal_sum: f64) -> f64 {
        (lifetime / n_equivalent * internal_sum).powf(1.0 / self.wohler_exponent)
    }
}

/// Design fatigue factors.
#[derive(Debug, Clone, Deserialize)]
pub struct Safety {
    #[serde(default = "default_dff")]
    pub dff: f64,
    /// Optional DFF per hotspot elevation, in table order.
    #[serde(default)]
    pub dffs: Option<Vec<f64>>,
}

fn default_dff() -> f64 {
    3.0
}

impl Default for Safety {
    fn default() -> Self {
        Safety {
            dff: default_dff(),
            dffs: None,
        }
    }
}

impl Safety {
    pub fn validate(&self) -> Result<()> {
        check_dff(self.dff)?;
        if let Some(dffs) = &self.dffs {
            dffs.iter().try_for_each(|d| check_dff(*d))?;
        }
        Ok(())
    }
}

fn check_dff(dff: f64) -> Result<()> {
    if !(dff > 0.0) || !dff.is_finite() {
        return Err(FatigueError::Configuration(format!(
            "DFF must be a positive number, got {}",
            dff
        )));
    }
    Ok(())
}

/// Expands the configured DFFs to one value per elevation.
///
/// No list gives the default everywhere; a list of the right length is used
/// as given; any other length falls back to its first value for every
/// elevation. Each fallback is logged.
pub fn resolve_dffs(count: usize, default: f64, dffs: Option<&[f64]>) -> Result<Vec<f64>> {
    check_dff(default)?;
    match dffs {
        None | Some([]) => {
            tracing::info!(dff = default, "no DFF list given, using the default for all elevations");
            Ok(vec![default; count])
        }
        Some(list) => {
            list.iter().try_for_each(|d| check_dff(*d))?;
            if list.len() == count {
                Ok(list.to_vec())
            } else {
                tracing::warn!(
                    given = list.len(),
                    expected = count,
                    dff = list[0],
                    "DFF list length does not match the elevations, using its first value for all"
                );
                Ok(vec![list[0]; count])
            }
        }
    }
}

/// Settings of the utilization stage.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UtilizationSettings {
    #[serde(default)]
    pub out_of_range: OutOfRangePolicy,
}

/// Input tables.
#[derive(Debug, Clone, Deserialize)]
pub struct Inputs {
    /// Instrumented members with channel columns.
    pub geometry: PathBuf,
    /// Non-instrumented elevations assessed by interpolation.
    #[serde(default)]
    pub hotspots: Option<PathBuf>,
    pub simulation_root: PathBuf,
    pub dlcs: Vec<DlcInput>,
}

impl Inputs {
    pub fn validate(&self) -> Result<()> {
        if self.dlcs.is_empty() {
            return Err(FatigueError::Configuration("at least one DLC must be listed".into()));
        }
        for (i, dlc) in self.dlcs.iter().enumerate() {
            if dlc.id.trim().is_empty() {
                return Err(FatigueError::Configuration(format!("DLC {} has an empty id", i)));
            }
            if self.dlcs[..i].iter().any(|other| other.id == dlc.id) {
                return Err(FatigueError::Configuration(format!("DLC '{}' is listed twice", dlc.id)));
            }
        }
        Ok(())
    }
}

/// One design load case and its case table.
#[derive(Debug, Clone, Deserialize)]
pub struct DlcInput {
    pub id: String,
    pub cases: PathBuf,
}

/// Loads a configuration from YAML, or from TOML when the extension is `.toml`.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path)?;
    let is_toml = path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("toml"))
        .unwrap_or(false);
    let config: Config = if is_toml {
        toml::from_str(&contents)?
    } else {
        serde_yaml::from_str(&contents)?
    };
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_yaml_config() {
        let conf = load_config("tests/config.yaml").unwrap();
        assert_eq!(conf.project.cluster, "JLO");
        assert_eq!(conf.analysis.mode, Mode::Dem);
        assert_eq!(conf.analysis.bins, 128);
        assert_eq!(conf.analysis.closure, ResidueClosure::Repeated);
        assert_eq!(conf.dem.wohler_exponent, 5.0);
        assert_eq!(conf.safety.dff, 3.0);
        assert_eq!(conf.inputs.dlcs.len(), 2);
        assert_eq!(conf.sectors().unwrap().len(), 24);
    }

    #[test]
    fn test_load_toml_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.toml");
        fs::write(
            &path,
            r#"
[project]
cluster = "JLN"
output = "out"

[analysis]
mode = "DAMAGE"
closure = "HALF_CYCLES"
angle_frame = "COMPASS"

[inputs]
geometry = "geometry.csv"
simulation_root = "sims"
dlcs = [{ id = "DLC12", cases = "dlc12.csv" }]
"#,
        )
        .unwrap();
        let conf = load_config(&path).unwrap();
        assert_eq!(conf.analysis.mode, Mode::Damage);
        assert_eq!(conf.analysis.closure, ResidueClosure::HalfCycles);
        assert_eq!(conf.analysis.angle_frame, AngleFrame::Compass);
        assert_eq!(conf.utilization.out_of_range, OutOfRangePolicy::Error);
    }

    #[test]
    fn test_invalid_numbers_are_rejected() {
        let mut dem = DemSettings::default();
        dem.lifetime = 0.0;
        assert!(matches!(dem.validate(), Err(FatigueError::Configuration(_))));
        let safety = Safety {
            dff: 3.0,
            dffs: Some(vec![2.0, f64::NAN]),
        };
        assert!(safety.validate().is_err());
    }

    #[test]
    fn test_resolve_dffs_policy() {
        assert_eq!(resolve_dffs(3, 3.0, None).unwrap(), vec![3.0; 3]);
        assert_eq!(resolve_dffs(2, 3.0, Some(&[])).unwrap(), vec![3.0; 2]);
        assert_eq!(resolve_dffs(2, 3.0, Some(&[1.0, 2.0])).unwrap(), vec![1.0, 2.0]);
        assert_eq!(resolve_dffs(3, 3.0, Some(&[10.0, 2.0])).unwrap(), vec![10.0; 3]);
        assert!(resolve_dffs(2, 3.0, Some(&[1.0, -2.0])).is_err());
    }

    #[test]
    fn test_dem_formula() {
        let dem = DemSettings::default();
        let sum = 4.0e7 * 2.0f64.powi(5);
        assert!((dem.dem(sum) - (25.0f64 * 4.0 * 32.0).powf(0.2)).abs() < 1e-9);
    }
}

//! Cross-section geometry, derived section properties and per-sector SCF.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use std::path::Path;
use std::sync::OnceLock;

use crate::error::{FatigueError, Location, Result};
use crate::sn_curve::SnCurve;

/// Default weld length L_t in mm when the table leaves it empty.
pub const DEFAULT_WELD_LENGTH_MM: f64 = 70.0;

fn angle_separator() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"[,;/\s]+").expect("static regex"))
}

/// Which surface of the tube the hotspot sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Face {
    Inside,
    Outside,
}

impl Face {
    pub fn parse(value: &str) -> Result<Face> {
        match value.trim().to_ascii_lowercase().as_str() {
            "i" | "in" | "inside" => Ok(Face::Inside),
            "o" | "out" | "outside" => Ok(Face::Outside),
            other => Err(FatigueError::Configuration(format!(
                "in_out must be 'i' or 'o', got '{}'",
                other
            ))),
        }
    }
}

/// Reference frame of an angle given in a geometry table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AngleFrame {
    /// 0° = S, 90° = E, counter-clockwise. Sector angles live in this frame.
    #[default]
    Turbine,
    /// 0° = N, 90° = E, clockwise.
    Compass,
}

/// Converts between the turbine and compass frames. The map is its own inverse.
pub fn turbine_to_compass(angle: f64) -> f64 {
    (180.0 - angle).rem_euclid(360.0)
}

pub fn compass_to_turbine(angle: f64) -> f64 {
    turbine_to_compass(angle)
}

/// Angles at which the SCF applies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Orientation {
    /// The SCF applies around the whole circumference.
    Omni,
    Angles(Vec<f64>),
}

impl Orientation {
    /// Parses `omni`, an empty cell, or a list of angles in degrees separated
    /// by commas, semicolons, slashes or whitespace.
    pub fn parse(value: &str) -> Result<Orientation> {
        let trimmed = value.trim();
        if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("omni") {
            return Ok(Orientation::Omni);
        }
        let angles = angle_separator()
            .split(trimmed)
            .filter(|token| !token.is_empty())
            .map(|token| {
                token.parse::<f64>().map_err(|_| {
                    FatigueError::Configuration(format!(
                        "malformed orientation '{}': '{}' is not an angle",
                        trimmed, token
                    ))
                })
            })
            .collect::<Result<Vec<f64>>>()?;
        if let Some(bad) = angles.iter().find(|a| !a.is_finite() || **a < 0.0 || **a >= 360.0) {
            return Err(FatigueError::Configuration(format!(
                "orientation angle {} must lie in [0, 360)",
                bad
            )));
        }
        Ok(Orientation::Angles(angles))
    }

    /// Angles expressed in the turbine frame.
    pub fn in_turbine_frame(&self, frame: AngleFrame) -> Option<Vec<f64>> {
        match self {
            Orientation::Omni => None,
            Orientation::Angles(angles) => Some(match frame {
                AngleFrame::Turbine => angles.clone(),
                AngleFrame::Compass => angles.iter().map(|a| compass_to_turbine(*a)).collect(),
            }),
        }
    }
}

/// How a hotspot's utilization is validated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ValidationType {
    /// Scale the reference member's cycle histogram.
    #[default]
    Rainflow,
    /// A single equivalent stress cycle at N_ref.
    Equivalent,
}

impl ValidationType {
    /// `rainflow` or `equivalent`, case-insensitive. An empty cell means
    /// `rainflow`.
    pub fn parse(value: &str) -> Result<ValidationType> {
        let trimmed = value.trim();
        if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("rainflow") {
            Ok(ValidationType::Rainflow)
        } else if trimmed.eq_ignore_ascii_case("equivalent") {
            Ok(ValidationType::Equivalent)
        } else {
            Err(FatigueError::Configuration(format!(
                "unknown validation type '{}', expected RAINFLOW or EQUIVALENT",
                trimmed
            )))
        }
    }
}

/// One-based channel columns of an instrumented member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberChannels {
    pub mx: usize,
    pub my: usize,
    pub fz: usize,
}

/// A row of a geometry or hotspot table as written on disk.
#[derive(Debug, Clone, Deserialize)]
pub struct GeometryRecord {
    pub elevation: f64,
    #[serde(default)]
    pub name: Option<String>,
    /// Outer diameter in m.
    pub diameter: f64,
    /// Wall thickness in mm.
    pub wall_thickness: f64,
    pub in_out: String,
    #[serde(default)]
    pub scf: Option<f64>,
    #[serde(default)]
    pub scf_orientation: Option<String>,
    #[serde(default)]
    pub gritblast: Option<f64>,
    pub sn_curve: String,
    #[serde(default)]
    pub weld_length: Option<f64>,
    #[serde(default)]
    pub large_thickness: Option<f64>,
    #[serde(default)]
    pub mx: Option<usize>,
    #[serde(default)]
    pub my: Option<usize>,
    #[serde(default)]
    pub fz: Option<usize>,
    #[serde(default)]
    pub dff: Option<f64>,
    #[serde(default)]
    pub lifetime: Option<f64>,
    #[serde(default)]
    pub n_ref: Option<f64>,
    #[serde(default)]
    pub val_type: Option<String>,
    #[serde(default)]
    pub reported_utilization: Option<f64>,
}

/// A structural elevation with everything needed to turn loads into stress.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CrossSection {
    pub elevation: f64,
    pub name: Option<String>,
    /// Outer diameter in m.
    pub diameter: f64,
    /// Wall thickness in mm.
    pub wall_thickness: f64,
    pub face: Face,
    pub scf: f64,
    pub orientation: Orientation,
    pub gritblast: f64,
    pub sn_curve: SnCurve,
    /// Weld length L_t in mm.
    pub weld_length: f64,
    /// Large thickness T in mm.
    pub large_thickness: f64,
    pub channels: Option<MemberChannels>,
    pub dff: Option<f64>,
    /// Design lifetime in years.
    pub lifetime: Option<f64>,
    pub n_ref: Option<f64>,
    pub validation: ValidationType,
    pub reported_utilization: Option<f64>,
}

impl TryFrom<GeometryRecord> for CrossSection {
    type Error = FatigueError;

    fn try_from(record: GeometryRecord) -> Result<Self> {
        let channels = match (record.mx, record.my, record.fz) {
            (Some(mx), Some(my), Some(fz)) => Some(MemberChannels { mx, my, fz }),
            (None, None, None) => None,
            _ => {
                return Err(FatigueError::Configuration(
                    "mx, my and fz columns must be given together".into(),
                ))
            }
        };
        let scf = record.scf.unwrap_or_else(|| {
            tracing::warn!(elevation = record.elevation, "no SCF given, using 1.0");
            1.0
        });
        let gritblast = record.gritblast.unwrap_or_else(|| {
            tracing::warn!(elevation = record.elevation, "no gritblast factor given, using 1.0");
            1.0
        });
        let section = CrossSection {
            elevation: record.elevation,
            name: record.name.filter(|n| !n.trim().is_empty()),
            diameter: record.diameter,
            wall_thickness: record.wall_thickness,
            face: Face::parse(&record.in_out)?,
            scf,
            orientation: Orientation::parse(record.scf_orientation.as_deref().unwrap_or(""))?,
            gritblast,
            sn_curve: SnCurve::from_name(&record.sn_curve)?,
            weld_length: record.weld_length.unwrap_or(DEFAULT_WELD_LENGTH_MM),
            large_thickness: record.large_thickness.unwrap_or(record.wall_thickness),
            channels,
            dff: record.dff,
            lifetime: record.lifetime,
            n_ref: record.n_ref,
            validation: record
                .val_type
                .as_deref()
                .map(ValidationType::parse)
                .transpose()?
                .unwrap_or_default(),
            reported_utilization: record.reported_utilization,
        };
        section.validate()?;
        Ok(section)
    }
}

impl CrossSection {
    pub fn validate(&self) -> Result<()> {
        if !self.elevation.is_finite() {
            return Err(FatigueError::Configuration("elevation must be finite".into()));
        }
        if !(self.diameter > 0.0) {
            return Err(FatigueError::Configuration(format!(
                "diameter must be greater than 0, got {}",
                self.diameter
            )));
        }
        if !(self.wall_thickness > 0.0) || 2.0 * self.thickness_m() >= self.diameter {
            return Err(FatigueError::Configuration(format!(
                "wall thickness {} mm does not fit a {} m tube",
                self.wall_thickness, self.diameter
            )));
        }
        if !(self.scf > 0.0) || !(self.gritblast > 0.0) {
            return Err(FatigueError::Configuration(format!(
                "SCF and gritblast factor must be positive, got {} and {}",
                self.scf, self.gritblast
            )));
        }
        if let Some(dff) = self.dff {
            if !(dff > 0.0) || !dff.is_finite() {
                return Err(FatigueError::Configuration(format!("invalid DFF {}", dff)));
            }
        }
        self.sn_curve.validate()
    }

    pub fn thickness_m(&self) -> f64 {
        self.wall_thickness / 1000.0
    }

    /// Steel area in m².
    pub fn area(&self) -> f64 {
        let t = self.thickness_m();
        PI * ((self.diameter / 2.0).powi(2) - ((self.diameter - 2.0 * t) / 2.0).powi(2))
    }

    /// Second moment of area in m⁴.
    pub fn inertia(&self) -> f64 {
        let t = self.thickness_m();
        PI / 64.0 * (self.diameter.powi(4) - (self.diameter - 2.0 * t).powi(4))
    }

    /// Section modulus in m³ at the face of the hotspot.
    pub fn section_modulus(&self) -> f64 {
        let radius = match self.face {
            Face::Outside => self.diameter / 2.0,
            Face::Inside => self.diameter / 2.0 - self.thickness_m(),
        };
        self.inertia() / radius
    }

    /// t_eff = min(14 + 0.66 L_t, T) in mm.
    pub fn effective_thickness(&self) -> f64 {
        (14.0 + 0.66 * self.weld_length).min(self.large_thickness)
    }

    pub fn thickness_factor(&self) -> f64 {
        self.sn_curve.thickness_factor(self.effective_thickness())
    }

    pub fn location(&self) -> Location {
        Location::elevation(self.elevation)
    }

    /// Sector layout of this section: sector angles with the ones nearest each
    /// orientation snapped onto it, and the SCF per sector.
    pub fn sector_layout(&self, sectors: &[f64], frame: AngleFrame) -> SectorLayout {
        let mut angles = sectors.to_vec();
        let scf = match self.orientation.in_turbine_frame(frame) {
            None => vec![self.scf; sectors.len()],
            Some(orientations) => {
                let mut scf = vec![1.0; sectors.len()];
                for orientation in orientations {
                    if let Some(idx) = nearest_index(sectors, orientation) {
                        angles[idx] = orientation;
                        scf[idx] = self.scf;
                    }
                }
                scf
            }
        };
        SectorLayout { angles, scf }
    }

    /// First orientation angle in the turbine frame, if any.
    pub fn primary_orientation(&self, frame: AngleFrame) -> Option<f64> {
        self.orientation
            .in_turbine_frame(frame)
            .and_then(|angles| angles.first().copied())
    }
}

/// Index of the angle closest to `target` by absolute difference. The first
/// of several equally close angles wins.
pub fn nearest_index(angles: &[f64], target: f64) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for (i, angle) in angles.iter().enumerate() {
        let distance = (angle - target).abs();
        match best {
            Some((_, d)) if distance >= d => {}
            _ => best = Some((i, distance)),
        }
    }
    best.map(|(i, _)| i)
}

/// Evenly spaced sector angles 0 ≤ θ < 360 in degrees.
pub fn uniform_sectors(step: f64) -> Result<Vec<f64>> {
    if !(step > 0.0) || step > 360.0 {
        return Err(FatigueError::Configuration(format!(
            "sector step must lie in (0, 360], got {}",
            step
        )));
    }
    let count = (360.0 / step).ceil() as usize;
    Ok((0..count)
        .map(|i| i as f64 * step)
        .filter(|a| *a < 360.0)
        .collect())
}

/// Sector angles (degrees, turbine frame) and the SCF applied in each.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SectorLayout {
    pub angles: Vec<f64>,
    pub scf: Vec<f64>,
}

impl SectorLayout {
    pub fn len(&self) -> usize {
        self.angles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.angles.is_empty()
    }
}

/// Reads a geometry or hotspot table.
pub fn load_geometry_table<P: AsRef<Path>>(path: P) -> Result<Vec<CrossSection>> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path.as_ref())?;
    reader
        .deserialize::<GeometryRecord>()
        .map(|row| {
            let record = row?;
            let elevation = record.elevation;
            CrossSection::try_from(record).map_err(|e| e.at(Location::elevation(elevation)))
        })
        .collect()
}

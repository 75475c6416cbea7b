//! Projection of bending moments and axial force onto angular sectors.

use nalgebra::{DMatrix, DVector};

use crate::error::{FatigueError, Result};
use crate::geometry::CrossSection;

/// Resolves Mx/My/Fz channels into one series per sector angle.
#[derive(Debug, Clone, PartialEq)]
pub struct SectorResolver {
    /// Sector angles in degrees, turbine frame.
    angles: Vec<f64>,
}

impl SectorResolver {
    pub fn new(angles: Vec<f64>) -> Self {
        SectorResolver { angles }
    }

    pub fn angles(&self) -> &[f64] {
        &self.angles
    }

    /// M(θ, t) = sin θ · Mx(t) − cos θ · My(t), one row per sector.
    pub fn moments(&self, mx: &DVector<f64>, my: &DVector<f64>) -> Result<DMatrix<f64>> {
        if mx.len() != my.len() {
            return Err(FatigueError::InvalidInput(format!(
                "Mx has {} samples, My has {}",
                mx.len(),
                my.len()
            )));
        }
        let (sin, cos): (Vec<f64>, Vec<f64>) = self
            .angles
            .iter()
            .map(|a| a.to_radians().sin_cos())
            .unzip();
        Ok(DMatrix::from_fn(self.angles.len(), mx.len(), |s, t| {
            sin[s] * mx[t] - cos[s] * my[t]
        }))
    }

    /// Nominal stress F/A + M(θ)/Z per sector, in the units of the inputs
    /// (Pa for N and Nm).
    pub fn nominal_stress(
        &self,
        mx: &DVector<f64>,
        my: &DVector<f64>,
        fz: &DVector<f64>,
        section: &CrossSection,
    ) -> Result<DMatrix<f64>> {
        if fz.len() != mx.len() {
            return Err(FatigueError::InvalidInput(format!(
                "Fz has {} samples, Mx has {}",
                fz.len(),
                mx.len()
            )));
        }
        let area = section.area();
        let modulus = section.section_modulus();
        if !(area > 0.0) || !(modulus > 0.0) {
            return Err(FatigueError::InvalidInput(format!(
                "degenerate cross-section at {} mLAT",
                section.elevation
            )));
        }
        let mut stress = self.moments(mx, my)? / modulus;
        let axial = (fz / area).transpose();
        for mut row in stress.row_iter_mut() {
            row += &axial;
        }
        Ok(stress)
    }
}

//! S-N endurance curves and Palmgren-Miner damage summation.
//!
//! The catalogue holds the DNV-RP-C203 (2016) Table 2-1 curves for steel in
//! air with cathodic protection and the single-slope free-corrosion curves.

use serde::{Deserialize, Serialize};

use crate::error::{FatigueError, Result};
use crate::rainflow::CycleHistogram;

/// Reference thickness for the thickness effect, in mm.
pub const REFERENCE_THICKNESS_MM: f64 = 25.0;

/// Cycle count at which a bilinear curve switches slope.
pub const KNEE_CYCLES: f64 = 1.0e7;

/// (name, m1, log a1, log a2, thickness exponent k, free-corrosion m,
/// free-corrosion log a)
const CATALOGUE: [(&str, f64, f64, f64, f64, f64, f64); 14] = [
    ("B1", 4.0, 15.117, 17.146, 0.00, 4.0, 12.436),
    ("B2", 4.0, 14.885, 16.856, 0.00, 4.0, 12.262),
    ("C", 3.0, 12.592, 16.320, 0.05, 3.0, 12.115),
    ("C1", 3.0, 12.449, 16.081, 0.10, 3.0, 11.972),
    ("C2", 3.0, 12.301, 15.835, 0.15, 3.0, 11.824),
    ("D", 3.0, 12.164, 15.606, 0.20, 3.0, 11.687),
    ("E", 3.0, 12.010, 15.350, 0.20, 3.0, 11.533),
    ("F", 3.0, 11.855, 15.091, 0.25, 3.0, 11.378),
    ("F1", 3.0, 11.699, 14.832, 0.25, 3.0, 11.222),
    ("F3", 3.0, 11.546, 14.576, 0.25, 3.0, 11.068),
    ("G", 3.0, 11.398, 14.330, 0.25, 3.0, 10.921),
    ("W1", 3.0, 11.261, 14.101, 0.25, 3.0, 10.784),
    ("W2", 3.0, 11.107, 13.845, 0.25, 3.0, 10.630),
    ("W3", 3.0, 10.970, 13.617, 0.25, 3.0, 10.493),
];

/// Second branch of a bilinear curve, valid below the switch stress.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Knee {
    /// Cycle count where the slope changes.
    pub cycles: f64,
    pub m2: f64,
    pub loga2: f64,
}

impl Knee {
    pub fn validate(&self) -> Result<()> {
        if !(self.cycles > 0.0) {
            return Err(FatigueError::Configuration(format!(
                "knee cycles must be greater than 0, got {}",
                self.cycles
            )));
        }
        if !(self.m2 > 0.0) {
            return Err(FatigueError::Configuration(format!(
                "m2 must be greater than 0, got {}",
                self.m2
            )));
        }
        if !self.loga2.is_finite() {
            return Err(FatigueError::Configuration(format!(
                "log a2 must be finite, got {}",
                self.loga2
            )));
        }
        Ok(())
    }
}

/// Endurance curve N(S). A curve without a knee is a single-slope curve.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnCurve {
    pub name: String,
    pub m1: f64,
    pub loga1: f64,
    pub knee: Option<Knee>,
    /// Thickness exponent k.
    pub thickness_exponent: f64,
    /// Reference thickness in mm.
    pub reference_thickness: f64,
}

impl SnCurve {
    /// Looks a curve up in the catalogue. Names are case-insensitive; the
    /// suffix `-free` selects the free-corrosion variant of a detail class.
    ///
    /// # Returns
    ///
    /// Returns the curve, or a `Configuration` error for a name that is not in
    /// the catalogue.
    pub fn from_name(name: &str) -> Result<SnCurve> {
        let trimmed = name.trim();
        let upper = trimmed.to_ascii_uppercase();
        let (class, free) = match upper.strip_suffix("-FREE") {
            Some(class) => (class, true),
            None => (upper.as_str(), false),
        };
        let &(_, m1, loga1, loga2, k, m_free, loga_free) = CATALOGUE
            .iter()
            .find(|entry| entry.0 == class)
            .ok_or_else(|| FatigueError::Configuration(format!("unknown S-N curve '{}'", name)))?;
        let curve = if free {
            SnCurve {
                name: format!("{}-free", class),
                m1: m_free,
                loga1: loga_free,
                knee: None,
                thickness_exponent: k,
                reference_thickness: REFERENCE_THICKNESS_MM,
            }
        } else {
            SnCurve {
                name: class.to_owned(),
                m1,
                loga1,
                knee: Some(Knee {
                    cycles: KNEE_CYCLES,
                    m2: 5.0,
                    loga2,
                }),
                thickness_exponent: k,
                reference_thickness: REFERENCE_THICKNESS_MM,
            }
        };
        Ok(curve)
    }

    /// Single-slope curve with explicit parameters.
    pub fn single_slope(name: &str, m: f64, loga: f64) -> SnCurve {
        SnCurve {
            name: name.to_owned(),
            m1: m,
            loga1: loga,
            knee: None,
            thickness_exponent: 0.0,
            reference_thickness: REFERENCE_THICKNESS_MM,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(FatigueError::Configuration("S-N curve name must not be empty".into()));
        }
        if !(self.m1 > 0.0) {
            return Err(FatigueError::Configuration(format!(
                "m1 must be greater than 0, got {}",
                self.m1
            )));
        }
        if !self.loga1.is_finite() {
            return Err(FatigueError::Configuration(format!(
                "log a1 must be finite, got {}",
                self.loga1
            )));
        }
        if !(self.thickness_exponent >= 0.0) {
            return Err(FatigueError::Configuration(format!(
                "thickness exponent must not be negative, got {}",
                self.thickness_exponent
            )));
        }
        if !(self.reference_thickness > 0.0) {
            return Err(FatigueError::Configuration(format!(
                "reference thickness must be greater than 0, got {}",
                self.reference_thickness
            )));
        }
        if let Some(knee) = &self.knee {
            knee.validate()?;
        }
        Ok(())
    }

    /// Stress range at which a bilinear curve changes slope,
    /// S = (10^log a1 / Nd)^(1/m1). `None` for single-slope curves.
    pub fn switch_stress(&self) -> Option<f64> {
        self.knee
            .map(|knee| (10f64.powf(self.loga1) / knee.cycles).powf(1.0 / self.m1))
    }

    /// Allowable number of cycles at stress range `stress` (MPa). Infinite for
    /// a zero range.
    pub fn endurance(&self, stress: f64) -> f64 {
        if stress <= 0.0 {
            return f64::INFINITY;
        }
        match (self.knee, self.switch_stress()) {
            (Some(knee), Some(switch)) if stress <= switch => {
                10f64.powf(knee.loga2) * stress.powf(-knee.m2)
            }
            _ => 10f64.powf(self.loga1) * stress.powf(-self.m1),
        }
    }

    /// Palmgren-Miner sum Σ nᵢ/N(Sᵢ) over a histogram of stress ranges in MPa.
    /// Thickness correction must already be applied to the ranges.
    pub fn miner_sum(&self, histogram: &CycleHistogram) -> f64 {
        histogram
            .iter()
            .filter(|(range, count)| *range > 0.0 && *count > 0.0)
            .map(|(range, count)| count / self.endurance(range))
            .sum()
    }

    /// Thickness factor α for an effective thickness in mm, per this curve.
    pub fn thickness_factor(&self, effective_thickness: f64) -> f64 {
        thickness_factor(effective_thickness, self.reference_thickness, self.thickness_exponent)
    }
}

/// α = max(1, (t_eff / t_ref)^k). Never below one.
pub fn thickness_factor(effective_thickness: f64, reference_thickness: f64, k: f64) -> f64 {
    let alpha = (effective_thickness / reference_thickness).powf(k);
    if alpha.is_nan() {
        1.0
    } else {
        alpha.max(1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rand::{Rng, SeedableRng};

    #[test]
    fn test_catalogue_lookup() {
        let d = SnCurve::from_name("d").unwrap();
        assert_eq!(d.name, "D");
        assert_eq!(d.m1, 3.0);
        assert_relative_eq!(d.loga1, 12.164);
        assert_eq!(d.knee.unwrap().loga2, 15.606);
        assert_eq!(d.thickness_exponent, 0.2);
        assert!(d.validate().is_ok());

        let free = SnCurve::from_name("D-free").unwrap();
        assert!(free.knee.is_none());
        assert_eq!(free.m1, 3.0);
        assert_relative_eq!(free.loga1, 11.687);
    }

    #[test]
    fn test_free_corrosion_slope_per_class() {
        let b1 = SnCurve::from_name("B1-free").unwrap();
        assert_eq!(b1.m1, 4.0);
        assert_relative_eq!(b1.loga1, 12.436);
        assert_eq!(SnCurve::from_name("b2-FREE").unwrap().m1, 4.0);
        assert_eq!(SnCurve::from_name("C-free").unwrap().m1, 3.0);
        let histogram = CycleHistogram::from_pairs(vec![(100.0, 1.0)]);
        let expected = 1.0 / (10f64.powf(12.436) * 100f64.powf(-4.0));
        assert_relative_eq!(b1.miner_sum(&histogram), expected, max_relative = 1e-12);
    }

    #[test]
    fn test_unknown_curve_is_configuration_error() {
        assert!(matches!(SnCurve::from_name("Z9"), Err(FatigueError::Configuration(_))));
    }

    #[test]
    fn test_bilinear_is_continuous_at_switch() {
        for (name, ..) in CATALOGUE.iter() {
            let curve = SnCurve::from_name(name).unwrap();
            let switch = curve.switch_stress().unwrap();
            let above = curve.endurance(switch * (1.0 + 1e-9));
            let below = curve.endurance(switch);
            assert_relative_eq!(above, KNEE_CYCLES, max_relative = 1e-6);
            // Table values are rounded to three decimals
            assert_relative_eq!(below, KNEE_CYCLES, max_relative = 0.05);
        }
    }

    #[test]
    fn test_miner_sum_of_single_cycle() {
        let curve = SnCurve::from_name("C1").unwrap();
        let histogram = CycleHistogram::from_pairs(vec![(100.0, 10.0), (0.0, 5.0)]);
        let expected = 10.0 / (10f64.powf(12.449) * 100f64.powf(-3.0));
        assert_relative_eq!(curve.miner_sum(&histogram), expected, max_relative = 1e-12);
    }

    #[test]
    fn test_miner_sum_below_switch_uses_second_slope() {
        let curve = SnCurve::from_name("F").unwrap();
        let histogram = CycleHistogram::from_pairs(vec![(20.0, 1.0)]);
        let expected = 1.0 / (10f64.powf(15.091) * 20f64.powf(-5.0));
        assert_relative_eq!(curve.miner_sum(&histogram), expected, max_relative = 1e-12);
    }

    #[test]
    fn test_miner_sum_increases_with_range() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(3);
        for name in ["B1", "D", "W3", "E-free"] {
            let curve = SnCurve::from_name(name).unwrap();
            for _ in 0..20 {
                let pairs: Vec<(f64, f64)> = (0..32)
                    .map(|_| (rng.gen_range(1.0..300.0), rng.gen_range(0.5..1.0e4)))
                    .collect();
                let histogram = CycleHistogram::from_pairs(pairs);
                let scaled = histogram.scale_ranges(rng.gen_range(1.01..3.0));
                assert!(curve.miner_sum(&scaled) > curve.miner_sum(&histogram));
            }
        }
    }

    #[test]
    fn test_thickness_factor_floor() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(5);
        for _ in 0..200 {
            let t_eff = rng.gen_range(1.0..200.0);
            let k = rng.gen_range(0.0..0.5);
            assert!(thickness_factor(t_eff, REFERENCE_THICKNESS_MM, k) >= 1.0);
        }
        assert_relative_eq!(thickness_factor(50.0, 25.0, 0.2), 2f64.powf(0.2));
        assert_eq!(thickness_factor(10.0, 25.0, 0.2), 1.0);
    }
}

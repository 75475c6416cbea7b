//! Per-case damage table of the governing hotspot, keyed by (DLC, case) with
//! the environmental descriptors of each case.

use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use crate::engine::PA_TO_MPA;
use crate::error::{FatigueError, Result};
use crate::geometry::{CrossSection, SectorLayout};
use crate::lifetime::{lifetime_from_cases, SectorLifetimes};
use crate::rainflow::CycleHistogram;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LookupRow {
    pub dlc: String,
    pub case: usize,
    pub simulation_name: String,
    /// Hours per year.
    pub probability: f64,
    /// Environmental columns of the case table, in table order.
    pub descriptors: Vec<(String, String)>,
    /// Damage per sector of one 10-minute case, DFF included.
    pub damage: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LookupTable {
    pub elevation: f64,
    pub sectors: Vec<f64>,
    pub dff: f64,
    pub scaling_factor: f64,
    pub rows: Vec<LookupRow>,
}

impl LookupTable {
    pub fn new(elevation: f64, sectors: Vec<f64>, dff: f64, scaling_factor: f64) -> Self {
        LookupTable {
            elevation,
            sectors,
            dff,
            scaling_factor,
            rows: Vec::new(),
        }
    }

    pub fn push(&mut self, row: LookupRow) -> Result<()> {
        if row.damage.len() != self.sectors.len() {
            return Err(FatigueError::InvalidInput(format!(
                "lookup row for {} case {} has {} sectors, expected {}",
                row.dlc,
                row.case,
                row.damage.len(),
                self.sectors.len()
            )));
        }
        self.rows.push(row);
        Ok(())
    }

    /// Multiplies every damage value by `factor`.
    pub fn rescale(&mut self, factor: f64) {
        for row in &mut self.rows {
            row.damage.iter_mut().for_each(|d| *d *= factor);
        }
    }

    /// Lifetime per sector implied by the table.
    pub fn lifetime(&self) -> Result<SectorLifetimes> {
        let probabilities: Vec<f64> = self.rows.iter().map(|r| r.probability).collect();
        let damage: Vec<Vec<f64>> = self.rows.iter().map(|r| r.damage.clone()).collect();
        if damage.is_empty() {
            return Ok(SectorLifetimes::from_yearly_damage(vec![0.0; self.sectors.len()]));
        }
        lifetime_from_cases(&probabilities, &damage)
    }

    /// Descriptor columns of all rows, in first-seen order.
    fn descriptor_columns(&self) -> Vec<String> {
        let mut columns: Vec<String> = Vec::new();
        for row in &self.rows {
            for (name, _) in &row.descriptors {
                if !columns.contains(name) {
                    columns.push(name.clone());
                }
            }
        }
        columns
    }

    pub fn write_csv<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut writer = csv::Writer::from_path(path)?;
        let columns = self.descriptor_columns();
        let mut header: Vec<String> = vec![
            "dlc".into(),
            "case".into(),
            "simulation_name".into(),
            "probability".into(),
        ];
        header.extend(columns.iter().cloned());
        header.extend(self.sectors.iter().map(|s| format!("sector_{}", s)));
        writer.write_record(&header)?;
        for row in &self.rows {
            let mut record: Vec<String> = vec![
                row.dlc.clone(),
                row.case.to_string(),
                row.simulation_name.clone(),
                row.probability.to_string(),
            ];
            for column in &columns {
                let value = row
                    .descriptors
                    .iter()
                    .find(|(name, _)| name == column)
                    .map(|(_, v)| v.clone())
                    .unwrap_or_default();
                record.push(value);
            }
            record.extend(row.damage.iter().map(|d| d.to_string()));
            writer.write_record(&record)?;
        }
        writer.flush()?;
        Ok(())
    }

    pub fn write_json<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(writer, self)?;
        Ok(())
    }

    pub fn read_json<P: AsRef<Path>>(path: P) -> Result<LookupTable> {
        let reader = BufReader::new(File::open(path)?);
        Ok(serde_json::from_reader(reader)?)
    }
}

/// Damage per sector of one case at the hotspot: the closest member's moment
/// histograms with ranges scaled by the DEM factor, converted to stress with
/// the hotspot's SCF per sector, gritblast and thickness factor, times DFF.
pub fn hotspot_case_damage(
    histograms: &[CycleHistogram],
    hotspot: &CrossSection,
    layout: &SectorLayout,
    scaling_factor: f64,
    dff: f64,
) -> Result<Vec<f64>> {
    if histograms.len() != layout.len() {
        return Err(FatigueError::InvalidInput(format!(
            "{} sector histograms for {} sectors",
            histograms.len(),
            layout.len()
        )));
    }
    let base = scaling_factor / hotspot.section_modulus()
        * hotspot.gritblast
        * hotspot.thickness_factor()
        * PA_TO_MPA;
    Ok(histograms
        .iter()
        .zip(&layout.scf)
        .map(|(histogram, scf)| {
            hotspot
                .sn_curve
                .miner_sum(&histogram.scale_ranges(base * scf))
                * dff
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::tests::section;
    use crate::geometry::AngleFrame;
    use approx::assert_relative_eq;

    fn table() -> LookupTable {
        let mut table = LookupTable::new(-4.0, vec![0.0, 180.0], 3.0, 1.1);
        table
            .push(LookupRow {
                dlc: "DLC12".into(),
                case: 0,
                simulation_name: "JLO_12_001".into(),
                probability: 10.0,
                descriptors: vec![("wind_speed".into(), "11".into())],
                damage: vec![1.0e-6, 2.0e-6],
            })
            .unwrap();
        table
            .push(LookupRow {
                dlc: "DLC64".into(),
                case: 3,
                simulation_name: "JLO_64_004".into(),
                probability: 5.0,
                descriptors: vec![("hs".into(), "1.5".into())],
                damage: vec![0.0, 4.0e-6],
            })
            .unwrap();
        table
    }

    #[test]
    fn test_hotspot_case_damage() {
        let hotspot = section(-4.0, "90");
        let layout = hotspot.sector_layout(&[0.0, 90.0], AngleFrame::Turbine);
        let histograms = vec![
            CycleHistogram::from_pairs(vec![(5.0e7, 100.0)]),
            CycleHistogram::from_pairs(vec![(5.0e7, 100.0)]),
        ];
        let damage = hotspot_case_damage(&histograms, &hotspot, &layout, 1.5, 3.0).unwrap();
        let base = 5.0e7 * 1.5 / hotspot.section_modulus() * hotspot.thickness_factor() * 1.0e-6;
        let curve = &hotspot.sn_curve;
        assert_relative_eq!(damage[0], 3.0 * 100.0 / curve.endurance(base), max_relative = 1e-9);
        assert_relative_eq!(
            damage[1],
            3.0 * 100.0 / curve.endurance(base * 1.2),
            max_relative = 1e-9
        );
        assert!(hotspot_case_damage(&histograms[..1], &hotspot, &layout, 1.0, 3.0).is_err());
    }

    #[test]
    fn test_rescale_and_lifetime() {
        let mut t = table();
        t.rescale(2.0);
        assert_eq!(t.rows[1].damage, vec![0.0, 8.0e-6]);
        let lifetime = t.lifetime().unwrap();
        let yearly = 10.0 * 6.0 * 4.0e-6 + 5.0 * 6.0 * 8.0e-6;
        assert_relative_eq!(lifetime.lifetimes[1].years(), 1.0 / yearly, max_relative = 1e-12);
        assert_eq!(lifetime.governing_sector, 1);
    }

    #[test]
    fn test_csv_and_json_export() {
        let dir = tempfile::tempdir().unwrap();
        let t = table();
        let csv_path = dir.path().join("lookup.csv");
        t.write_csv(&csv_path).unwrap();
        let text = std::fs::read_to_string(&csv_path).unwrap();
        let mut lines = text.lines();
        assert_eq!(
            lines.next().unwrap(),
            "dlc,case,simulation_name,probability,wind_speed,hs,sector_0,sector_180"
        );
        assert!(lines.next().unwrap().starts_with("DLC12,0,JLO_12_001,10,11,,"));

        let json_path = dir.path().join("lookup.json");
        t.write_json(&json_path).unwrap();
        assert_eq!(LookupTable::read_json(&json_path).unwrap(), t);
    }
}

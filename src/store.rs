//! On-disk artifacts: per-case cycle histograms as `.npy` arrays, per-DLC
//! result tables as JSON and the total DEM table as CSV.

use hashbrown::HashMap;
use nalgebra::DMatrix;
use ndarray::{Array3, Axis};
use ndarray_npy::{read_npy, write_npy};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use crate::aggregate::DamageTable;
use crate::engine::Mode;
use crate::error::{FatigueError, Result};
use crate::rainflow::CycleHistogram;

/// Packs per-sector histograms into an (n_sectors, n_bins, 2) array whose
/// last axis is (range, count).
pub fn histograms_to_array(histograms: &[CycleHistogram]) -> Result<Array3<f64>> {
    let n_bins = histograms.first().map(|h| h.len()).unwrap_or(0);
    if histograms.iter().any(|h| h.len() != n_bins) {
        return Err(FatigueError::InvalidInput(
            "sector histograms must share one bin count to be stored".into(),
        ));
    }
    let mut array = Array3::zeros((histograms.len(), n_bins, 2));
    for (s, histogram) in histograms.iter().enumerate() {
        for (b, (range, count)) in histogram.iter().enumerate() {
            array[[s, b, 0]] = range;
            array[[s, b, 1]] = count;
        }
    }
    Ok(array)
}

pub fn array_to_histograms(array: &Array3<f64>) -> Result<Vec<CycleHistogram>> {
    if array.shape()[2] != 2 {
        return Err(FatigueError::Format(format!(
            "cycle array must end in an axis of length 2, got shape {:?}",
            array.shape()
        )));
    }
    Ok(array
        .axis_iter(Axis(0))
        .map(|sector| {
            CycleHistogram::from_pairs(sector.outer_iter().map(|pair| (pair[0], pair[1])))
        })
        .collect())
}

/// Addresses one stored histogram set.
#[derive(Debug, Clone, PartialEq)]
pub struct HistogramKey<'a> {
    pub cluster: &'a str,
    pub dlc: &'a str,
    pub member: f64,
    pub case: usize,
}

/// Directory name of a member, from its elevation.
pub fn member_label(elevation: f64) -> String {
    format!("z{:+.3}", elevation)
}

/// Every member needs its own directory in the store. Two members whose
/// elevations round to one label are rejected.
pub fn check_member_labels(elevations: &[f64]) -> Result<()> {
    let mut seen: HashMap<String, f64> = HashMap::with_capacity(elevations.len());
    for &elevation in elevations {
        if let Some(other) = seen.insert(member_label(elevation), elevation) {
            return Err(FatigueError::Configuration(format!(
                "members at {} and {} mLAT share the histogram label {}",
                other,
                elevation,
                member_label(elevation)
            )));
        }
    }
    Ok(())
}

/// Directory tree of persisted cycle histograms. Only the orchestrating
/// thread writes to it.
#[derive(Debug, Clone)]
pub struct HistogramStore {
    root: PathBuf,
}

impl HistogramStore {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        HistogramStore {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn case_path(&self, key: &HistogramKey) -> PathBuf {
        self.root
            .join("histograms")
            .join(key.cluster)
            .join(key.dlc)
            .join(member_label(key.member))
            .join(format!("case_{:05}.npy", key.case))
    }

    pub fn totals_path(&self, cluster: &str, member: f64) -> PathBuf {
        self.root
            .join("markov")
            .join(cluster)
            .join(format!("{}.npy", member_label(member)))
    }

    pub fn write_case(&self, key: &HistogramKey, histograms: &[CycleHistogram]) -> Result<PathBuf> {
        let path = self.case_path(key);
        write_histograms(&path, histograms)?;
        Ok(path)
    }

    pub fn read_case(&self, key: &HistogramKey) -> Result<Vec<CycleHistogram>> {
        read_histograms(self.case_path(key))
    }

    pub fn write_totals(&self, cluster: &str, member: f64, histograms: &[CycleHistogram]) -> Result<PathBuf> {
        let path = self.totals_path(cluster, member);
        write_histograms(&path, histograms)?;
        Ok(path)
    }

    pub fn read_totals(&self, cluster: &str, member: f64) -> Result<Vec<CycleHistogram>> {
        read_histograms(self.totals_path(cluster, member))
    }
}

pub fn write_histograms<P: AsRef<Path>>(path: P, histograms: &[CycleHistogram]) -> Result<()> {
    if let Some(parent) = path.as_ref().parent() {
        fs::create_dir_all(parent)?;
    }
    write_npy(path, &histograms_to_array(histograms)?)?;
    Ok(())
}

pub fn read_histograms<P: AsRef<Path>>(path: P) -> Result<Vec<CycleHistogram>> {
    let array: Array3<f64> = read_npy(path)?;
    array_to_histograms(&array)
}

/// Everything computed for one DLC: the per-case table, the weights and the
/// probability-weighted combination.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DlcResult {
    pub cluster: String,
    pub dlc: String,
    pub mode: Mode,
    pub elevations: Vec<f64>,
    pub sectors: Vec<f64>,
    pub weights: Vec<f64>,
    /// case × geometry × sector
    pub cases: Vec<Vec<Vec<f64>>>,
    /// geometry × sector
    pub combined: Vec<Vec<f64>>,
}

fn matrix_rows(matrix: &DMatrix<f64>) -> Vec<Vec<f64>> {
    matrix
        .row_iter()
        .map(|row| row.iter().copied().collect())
        .collect()
}

fn rows_matrix(rows: &[Vec<f64>], n_cols: usize) -> Result<DMatrix<f64>> {
    if rows.iter().any(|r| r.len() != n_cols) {
        return Err(FatigueError::Format("ragged table in DLC result".into()));
    }
    Ok(DMatrix::from_fn(rows.len(), n_cols, |r, c| rows[r][c]))
}

impl DlcResult {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        cluster: &str,
        dlc: &str,
        mode: Mode,
        elevations: Vec<f64>,
        sectors: Vec<f64>,
        weights: Vec<f64>,
        table: &DamageTable,
        combined: &DMatrix<f64>,
    ) -> Self {
        DlcResult {
            cluster: cluster.to_owned(),
            dlc: dlc.to_owned(),
            mode,
            elevations,
            sectors,
            weights,
            cases: table.cases().iter().map(matrix_rows).collect(),
            combined: matrix_rows(combined),
        }
    }

    pub fn combined_matrix(&self) -> Result<DMatrix<f64>> {
        let matrix = rows_matrix(&self.combined, self.sectors.len())?;
        if matrix.nrows() != self.elevations.len() {
            return Err(FatigueError::Format(format!(
                "DLC {} result has {} rows for {} elevations",
                self.dlc,
                matrix.nrows(),
                self.elevations.len()
            )));
        }
        Ok(matrix)
    }

    pub fn damage_table(&self) -> Result<DamageTable> {
        let cases = self
            .cases
            .iter()
            .map(|rows| rows_matrix(rows, self.sectors.len()))
            .collect::<Result<Vec<_>>>()?;
        DamageTable::from_cases(self.elevations.len(), self.sectors.len(), cases)
    }

    pub fn path(root: &Path, cluster: &str, dlc: &str, mode: Mode) -> PathBuf {
        let kind = match mode {
            Mode::Dem => "dem",
            Mode::Damage => "damage",
        };
        root.join("dlc").join(format!("{}_{}_{}.json", cluster, dlc, kind))
    }

    pub fn save(&self, root: &Path) -> Result<PathBuf> {
        let path = DlcResult::path(root, &self.cluster, &self.dlc, self.mode);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        serde_json::to_writer(BufWriter::new(File::create(&path)?), self)?;
        Ok(path)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<DlcResult> {
        let reader = BufReader::new(File::open(path)?);
        Ok(serde_json::from_reader(reader)?)
    }
}

/// Writes a (member × sector) table with the member elevation in the first
/// column.
pub fn write_total_dem<P: AsRef<Path>>(path: P, elevations: &[f64], sectors: &[f64], sums: &DMatrix<f64>) -> Result<()> {
    if sums.shape() != (elevations.len(), sectors.len()) {
        return Err(FatigueError::InvalidInput(format!(
            "total DEM table of shape {:?} for {} elevations x {} sectors",
            sums.shape(),
            elevations.len(),
            sectors.len()
        )));
    }
    if let Some(parent) = path.as_ref().parent() {
        fs::create_dir_all(parent)?;
    }
    let mut writer = csv::Writer::from_path(path)?;
    let mut header = vec!["mLAT".to_owned()];
    header.extend(sectors.iter().map(|s| s.to_string()));
    writer.write_record(&header)?;
    for (g, elevation) in elevations.iter().enumerate() {
        let mut record = vec![elevation.to_string()];
        record.extend(sums.row(g).iter().map(|v| v.to_string()));
        writer.write_record(&record)?;
    }
    writer.flush()?;
    Ok(())
}

/// Reads a table written by `write_total_dem`: elevations, sector angles and
/// the sums.
pub fn read_total_dem<P: AsRef<Path>>(path: P) -> Result<(Vec<f64>, Vec<f64>, DMatrix<f64>)> {
    let mut reader = csv::Reader::from_path(path)?;
    let parse = |text: &str| -> Result<f64> {
        text.trim()
            .parse::<f64>()
            .map_err(|_| FatigueError::Format(format!("'{}' is not a number", text)))
    };
    let sectors = reader
        .headers()?
        .iter()
        .skip(1)
        .map(parse)
        .collect::<Result<Vec<f64>>>()?;
    let mut elevations = Vec::new();
    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        let mut values = record.iter().map(parse);
        let elevation = values
            .next()
            .ok_or_else(|| FatigueError::Format("empty row in total DEM table".into()))??;
        elevations.push(elevation);
        rows.push(values.collect::<Result<Vec<f64>>>()?);
    }
    let sums = rows_matrix(&rows, sectors.len())?;
    Ok((elevations, sectors, sums))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{Rng, SeedableRng};

    #[test]
    fn test_histogram_npy_round_trip_is_exact() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(29);
        let histograms: Vec<CycleHistogram> = (0..24)
            .map(|_| {
                CycleHistogram::from_pairs(
                    (0..128).map(|_| (rng.gen_range(0.0..1.0e7), rng.gen_range(0.0..100.0) / 3.0)),
                )
            })
            .collect();
        let dir = tempfile::tempdir().unwrap();
        let store = HistogramStore::new(dir.path());
        let key = HistogramKey {
            cluster: "JLO",
            dlc: "DLC12",
            member: -12.5,
            case: 3,
        };
        let path = store.write_case(&key, &histograms).unwrap();
        assert!(path.ends_with("histograms/JLO/DLC12/z-12.500/case_00003.npy"));
        assert_eq!(store.read_case(&key).unwrap(), histograms);
    }

    #[test]
    fn test_member_labels_must_be_unique() {
        assert!(check_member_labels(&[-20.0, -10.0, 0.0]).is_ok());
        assert_eq!(member_label(-10.0), member_label(-10.0004));
        let err = check_member_labels(&[-10.0, -20.0, -10.0004]).unwrap_err();
        assert!(matches!(err, FatigueError::Configuration(_)));
        assert!(err.to_string().contains("z-10.000"));
        assert!(check_member_labels(&[5.0, 5.0]).is_err());
    }

    #[test]
    fn test_array_shape() {
        let histograms = vec![CycleHistogram::zeros(4), CycleHistogram::zeros(4)];
        assert_eq!(histograms_to_array(&histograms).unwrap().shape(), &[2, 4, 2]);
        let ragged = vec![CycleHistogram::zeros(4), CycleHistogram::zeros(3)];
        assert!(histograms_to_array(&ragged).is_err());
    }

    #[test]
    fn test_dlc_result_round_trip() {
        let table = DamageTable::from_cases(
            2,
            2,
            vec![DMatrix::from_row_slice(2, 2, &[0.1, 0.2, 0.3, 1.0 / 3.0])],
        )
        .unwrap();
        let combined = DMatrix::from_row_slice(2, 2, &[0.6, 1.2, 1.8, 2.0]);
        let result = DlcResult::new(
            "JLO",
            "DLC12",
            Mode::Dem,
            vec![-20.0, 0.0],
            vec![0.0, 180.0],
            vec![1.0],
            &table,
            &combined,
        );
        let dir = tempfile::tempdir().unwrap();
        let path = result.save(dir.path()).unwrap();
        let loaded = DlcResult::load(&path).unwrap();
        assert_eq!(loaded, result);
        assert_eq!(loaded.combined_matrix().unwrap(), combined);
        assert_eq!(loaded.damage_table().unwrap(), table);
    }

    #[test]
    fn test_total_dem_csv_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("total.csv");
        let sums = DMatrix::from_row_slice(2, 3, &[1.5e20, 2.0e20, 0.0, 3.0e21, 1.0 / 7.0, 5.0]);
        write_total_dem(&path, &[-20.0, 0.5], &[0.0, 120.0, 240.0], &sums).unwrap();
        let (elevations, sectors, read) = read_total_dem(&path).unwrap();
        assert_eq!(elevations, vec![-20.0, 0.5]);
        assert_eq!(sectors, vec![0.0, 120.0, 240.0]);
        assert_eq!(read, sums);
    }
}

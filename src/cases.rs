//! DLC case tables: the ordered cases of a design load case, their yearly
//! occurrence and where their simulation results live.

use std::path::{Path, PathBuf};

use crate::error::{FatigueError, Result};

pub const NAME_COLUMN: &str = "simulation_name";
pub const PATH_COLUMN: &str = "path";
pub const PROBABILITY_COLUMN: &str = "Tot_Prob_in_10_percent_idling_scenario_hr_year";

/// Placeholder in simulation names replaced by the cluster identifier.
const CLUSTER_PLACEHOLDER: &str = "XXX";

const BINARY_EXTENSION: &str = "$105";
const DESCRIPTOR_EXTENSION: &str = "%105";

#[derive(Debug, Clone, PartialEq)]
pub struct CaseDefinition {
    /// Row position in the case table.
    pub index: usize,
    pub simulation_name: String,
    /// Directory of the result files relative to the simulation root.
    pub path: String,
    /// Hours per year.
    pub probability: f64,
    /// Remaining columns, verbatim and in table order.
    pub descriptors: Vec<(String, String)>,
}

impl CaseDefinition {
    /// Result file name for a cluster.
    pub fn file_stem(&self, cluster: &str) -> String {
        self.simulation_name.replace(CLUSTER_PLACEHOLDER, cluster)
    }

    /// Binary and descriptor file of this case.
    pub fn result_files(&self, root: &Path, cluster: &str) -> (PathBuf, PathBuf) {
        let mut dir = root.to_path_buf();
        for part in self.path.split(['\\', '/']).filter(|p| !p.is_empty()) {
            dir.push(part);
        }
        let stem = self.file_stem(cluster);
        (
            dir.join(format!("{}.{}", stem, BINARY_EXTENSION)),
            dir.join(format!("{}.{}", stem, DESCRIPTOR_EXTENSION)),
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CaseTable {
    pub dlc: String,
    pub cases: Vec<CaseDefinition>,
}

impl CaseTable {
    pub fn len(&self) -> usize {
        self.cases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cases.is_empty()
    }

    pub fn probabilities(&self) -> Vec<f64> {
        self.cases.iter().map(|c| c.probability).collect()
    }

    pub fn from_reader<R: std::io::Read>(dlc: &str, reader: R) -> Result<CaseTable> {
        let mut reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_reader(reader);
        let headers = reader.headers()?.clone();
        let column = |name: &str| {
            headers.iter().position(|h| h == name).ok_or_else(|| {
                FatigueError::Configuration(format!(
                    "case table of {} has no '{}' column",
                    dlc, name
                ))
            })
        };
        let name_idx = column(NAME_COLUMN)?;
        let path_idx = column(PATH_COLUMN)?;
        let prob_idx = column(PROBABILITY_COLUMN)?;

        let mut cases = Vec::new();
        for (index, record) in reader.records().enumerate() {
            let record = record?;
            let field = |i: usize| record.get(i).unwrap_or("").to_owned();
            let raw_probability = field(prob_idx);
            let probability: f64 = raw_probability.parse().map_err(|_| {
                FatigueError::Configuration(format!(
                    "case {} of {} has probability '{}'",
                    index, dlc, raw_probability
                ))
            })?;
            if !probability.is_finite() || probability < 0.0 {
                return Err(FatigueError::Configuration(format!(
                    "case {} of {} has negative or non-finite probability {}",
                    index, dlc, probability
                )));
            }
            let descriptors = headers
                .iter()
                .enumerate()
                .filter(|(i, _)| ![name_idx, path_idx, prob_idx].contains(i))
                .map(|(i, h)| (h.to_owned(), field(i)))
                .collect();
            cases.push(CaseDefinition {
                index,
                simulation_name: field(name_idx),
                path: field(path_idx),
                probability,
                descriptors,
            });
        }
        Ok(CaseTable {
            dlc: dlc.to_owned(),
            cases,
        })
    }
}

pub fn load_case_table<P: AsRef<Path>>(dlc: &str, path: P) -> Result<CaseTable> {
    let file = std::fs::File::open(path.as_ref())?;
    CaseTable::from_reader(dlc, file)
}

//! Error taxonomy shared by every stage of the damage and DEM pipeline.

use std::fmt;
use thiserror::Error;

/// Identifies the input that triggered a failure: which cluster, DLC, case and
/// elevation was being processed. Every field is optional since not every stage
/// knows all of them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Location {
    pub cluster: Option<String>,
    pub dlc: Option<String>,
    pub case: Option<usize>,
    pub elevation: Option<f64>,
}

impl Location {
    pub fn case(cluster: &str, dlc: &str, case: usize) -> Self {
        Location {
            cluster: Some(cluster.to_owned()),
            dlc: Some(dlc.to_owned()),
            case: Some(case),
            elevation: None,
        }
    }

    pub fn elevation(elevation: f64) -> Self {
        Location {
            elevation: Some(elevation),
            ..Location::default()
        }
    }

    pub fn with_elevation(mut self, elevation: f64) -> Self {
        self.elevation = Some(elevation);
        self
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut parts = Vec::new();
        if let Some(cluster) = &self.cluster {
            parts.push(format!("cluster {}", cluster));
        }
        if let Some(dlc) = &self.dlc {
            parts.push(format!("DLC {}", dlc));
        }
        if let Some(case) = self.case {
            parts.push(format!("case {}", case));
        }
        if let Some(elevation) = self.elevation {
            parts.push(format!("elevation {:.2} mLAT", elevation));
        }
        if parts.is_empty() {
            write!(f, "unknown input")
        } else {
            write!(f, "{}", parts.join(", "))
        }
    }
}

#[derive(Debug, Error)]
pub enum FatigueError {
    /// Binary/descriptor pair that cannot be decoded into a channel matrix.
    #[error("format error: {0}")]
    Format(String),

    /// Interpolation target outside the span of instrumented members.
    #[error("elevation {target:.3} mLAT is outside the instrumented range [{lowest:.3}, {highest:.3}] mLAT")]
    Range {
        target: f64,
        lowest: f64,
        highest: f64,
    },

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("{location}: {source}")]
    Context {
        location: Location,
        #[source]
        source: Box<FatigueError>,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("failed to read npy array: {0}")]
    NpyRead(#[from] ndarray_npy::ReadNpyError),

    #[error("failed to write npy array: {0}")]
    NpyWrite(#[from] ndarray_npy::WriteNpyError),
}

impl FatigueError {
    /// Attaches the location of the offending input. Errors that already carry
    /// a location get the missing fields filled in instead of a second wrapper.
    pub fn at(self, location: Location) -> FatigueError {
        match self {
            FatigueError::Context {
                location: inner,
                source,
            } => FatigueError::Context {
                location: Location {
                    cluster: inner.cluster.or(location.cluster),
                    dlc: inner.dlc.or(location.dlc),
                    case: inner.case.or(location.case),
                    elevation: inner.elevation.or(location.elevation),
                },
                source,
            },
            other => FatigueError::Context {
                location,
                source: Box::new(other),
            },
        }
    }

    /// The innermost error, with all location wrappers removed.
    pub fn root(&self) -> &FatigueError {
        match self {
            FatigueError::Context { source, .. } => source.root(),
            other => other,
        }
    }
}

pub type Result<T> = std::result::Result<T, FatigueError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_message_locates_input() {
        let err = FatigueError::Format("expected 12 values, found 10".into())
            .at(Location::case("JLO", "DLC12", 4));
        let message = err.to_string();
        assert!(message.contains("cluster JLO"));
        assert!(message.contains("DLC DLC12"));
        assert!(message.contains("case 4"));
        assert!(matches!(err.root(), FatigueError::Format(_)));
    }

    #[test]
    fn test_nested_context_is_merged() {
        let err = FatigueError::InvalidInput("zero section modulus".into())
            .at(Location::elevation(-12.5))
            .at(Location::case("JLN", "DLC64a", 0));
        match &err {
            FatigueError::Context { location, source } => {
                assert_eq!(location.elevation, Some(-12.5));
                assert_eq!(location.case, Some(0));
                assert!(matches!(**source, FatigueError::InvalidInput(_)));
            }
            other => panic!("expected context wrapper, got {:?}", other),
        }
    }
}

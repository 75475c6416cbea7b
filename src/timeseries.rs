//! Decoding of vendor simulation output into a channel × timestep matrix.
//!
//! A result is a pair of files: a flat little-endian `f32` binary and a text
//! descriptor whose ninth line carries the matrix dimensions, e.g.
//! `DIMENS   29   6000`. Values are stored column-major, so consecutive floats
//! walk down the channels of one timestep before moving to the next timestep.
use nalgebra::{DMatrix, DVector};
use regex::Regex;
use std::fs;
use std::path::Path;
use std::sync::OnceLock;

use crate::error::{FatigueError, Result};

/// Zero-based line index of the dimension record in the descriptor file.
const DIMENSION_LINE: usize = 8;

fn dimension_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^\s*(?:[A-Za-z_][A-Za-z0-9_]*\s+)?(\d+)\s+(\d+)").expect("static regex")
    })
}

/// Raw simulation output: rows are physical channels, columns are timesteps.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelTimeSeries {
    data: DMatrix<f64>,
}

impl ChannelTimeSeries {
    pub fn new(data: DMatrix<f64>) -> Self {
        ChannelTimeSeries { data }
    }

    /// Builds a series from per-channel rows. All rows must share one length.
    pub fn from_channels(channels: &[Vec<f64>]) -> Result<Self> {
        let n_timesteps = channels.first().map(|c| c.len()).unwrap_or(0);
        if channels.iter().any(|c| c.len() != n_timesteps) {
            return Err(FatigueError::Format(
                "all channels must have the same number of timesteps".into(),
            ));
        }
        let data = DMatrix::from_fn(channels.len(), n_timesteps, |r, c| channels[r][c]);
        Ok(ChannelTimeSeries { data })
    }

    pub fn n_channels(&self) -> usize {
        self.data.nrows()
    }

    pub fn n_timesteps(&self) -> usize {
        self.data.ncols()
    }

    pub fn matrix(&self) -> &DMatrix<f64> {
        &self.data
    }

    /// Returns the series of a channel addressed by its one-based column number,
    /// the convention used by the geometry tables.
    pub fn channel(&self, column: usize) -> Result<DVector<f64>> {
        if column == 0 || column > self.n_channels() {
            return Err(FatigueError::Format(format!(
                "channel column {} is out of bounds for a file with {} channels",
                column,
                self.n_channels()
            )));
        }
        Ok(self.data.row(column - 1).transpose())
    }
}

/// Parses the `(n_channels, n_timesteps)` record of a descriptor file.
pub fn parse_descriptor(text: &str) -> Result<(usize, usize)> {
    let line = text.lines().nth(DIMENSION_LINE).ok_or_else(|| {
        FatigueError::Format(format!(
            "descriptor has fewer than {} lines",
            DIMENSION_LINE + 1
        ))
    })?;
    let caps = dimension_pattern().captures(line).ok_or_else(|| {
        FatigueError::Format(format!("cannot read dimensions from line '{}'", line.trim()))
    })?;
    let parse = |i: usize| -> Result<usize> {
        caps[i]
            .parse::<usize>()
            .map_err(|e| FatigueError::Format(format!("invalid dimension '{}': {}", &caps[i], e)))
    };
    Ok((parse(1)?, parse(2)?))
}

/// Decodes little-endian `f32` values laid out column-major into a matrix.
pub fn decode_channels(bytes: &[u8], n_channels: usize, n_timesteps: usize) -> Result<ChannelTimeSeries> {
    if bytes.len() % 4 != 0 {
        return Err(FatigueError::Format(format!(
            "binary length {} is not a whole number of 32-bit floats",
            bytes.len()
        )));
    }
    let expected = n_channels.checked_mul(n_timesteps).ok_or_else(|| {
        FatigueError::Format(format!(
            "descriptor announces {} x {} values, more than can be addressed",
            n_channels, n_timesteps
        ))
    })?;
    let found = bytes.len() / 4;
    if found != expected {
        return Err(FatigueError::Format(format!(
            "descriptor announces {} x {} = {} values, binary holds {}",
            n_channels, n_timesteps, expected, found
        )));
    }
    let values: Vec<f64> = bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]) as f64)
        .collect();
    Ok(ChannelTimeSeries {
        data: DMatrix::from_vec(n_channels, n_timesteps, values),
    })
}

/// Reads a binary result file together with its descriptor.
pub fn read_simulation_file<P: AsRef<Path>, Q: AsRef<Path>>(
    binary_path: P,
    descriptor_path: Q,
) -> Result<ChannelTimeSeries> {
    let descriptor = fs::read_to_string(descriptor_path.as_ref())?;
    let (n_channels, n_timesteps) = parse_descriptor(&descriptor)?;
    let bytes = fs::read(binary_path.as_ref())?;
    decode_channels(&bytes, n_channels, n_timesteps).map_err(|e| match e {
        FatigueError::Format(msg) => {
            FatigueError::Format(format!("{}: {}", binary_path.as_ref().display(), msg))
        }
        other => other,
    })
}

/// Serialises a series in the layout `read_simulation_file` expects. Used to
/// produce fixtures and synthetic load cases.
pub fn encode_channels(series: &ChannelTimeSeries) -> Vec<u8> {
    series
        .matrix()
        .iter()
        .flat_map(|v| (*v as f32).to_le_bytes())
        .collect()
}

/// Descriptor text announcing the dimensions of `series` on its ninth line.
pub fn descriptor_text(series: &ChannelTimeSeries) -> String {
    let mut lines: Vec<String> = (0..DIMENSION_LINE).map(|i| format!("HEADER{}", i)).collect();
    lines.push(format!("DIMENS\t{}\t{}", series.n_channels(), series.n_timesteps()));
    lines.push(String::new());
    lines.join("\n")
}

// src/lib.rs

#[cfg(feature = "wasm")]
use wasm_bindgen::prelude::*;

pub mod aggregate;
pub mod app_logic;
pub mod cases;
pub mod config;
pub mod engine;
pub mod error;
pub mod geometry;
pub mod interpolate;
pub mod lifetime;
pub mod lookup;
pub mod rainflow;
pub mod sector;
pub mod sn_curve;
pub mod store;
pub mod timeseries;
pub mod utilization;

pub use error::{FatigueError, Location};

/// Half-cycle means followed by half-cycle ranges.
#[cfg(feature = "wasm")]
#[wasm_bindgen]
pub fn run_rainflow(series: &[f64]) -> Vec<f64> {
    let (means, ranges) = rainflow::rainflow(series);
    means.into_iter().chain(ranges).collect()
}

/// Bin centres followed by bin counts of the binned full-cycle histogram.
#[cfg(feature = "wasm")]
#[wasm_bindgen]
pub fn run_histogram(series: &[f64], bins: usize) -> Vec<f64> {
    let histogram = rainflow::RainflowCounter::new(bins, rainflow::ResidueClosure::default())
        .count(series);
    histogram
        .ranges()
        .iter()
        .chain(histogram.counts())
        .copied()
        .collect()
}

// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Errors associated with observation files and running sources.

use thiserror::Error;

use crate::{
    engine::{sim::SimulationError, EngineError},
    peel::PeelError,
    region::RegionError,
    solutions::SolutionsWriteError,
    store::StoreError,
};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Observation file {file} has an unsupported extension; supported types are: {supported}")]
    UnsupportedExt { file: String, supported: String },

    #[error("Couldn't decode {file_type} structure from {file}:\n{err}")]
    Decode {
        file: String,
        file_type: &'static str,
        err: String,
    },

    #[error("The observation file doesn't list any sources")]
    NoSources,

    #[error("Source '{name}' is listed more than once")]
    DuplicateSource { name: String },

    #[error("'{name}' can't be used as a source name")]
    BadName { name: String },

    #[error("Source '{name}' has a non-positive expected noise ({noise} Jy/beam)")]
    BadNoise { name: String, noise: f64 },

    #[error("Imaging parameters of '{what}' are invalid: {size} pixels of {cell} arcseconds with {nterms} Taylor terms")]
    BadImaging {
        what: String,
        size: usize,
        cell: f64,
        nterms: usize,
    },

    #[error("Self-calibration needs between 1 and {max} cycles, but {cycles} were asked for")]
    BadCycles { cycles: usize, max: usize },

    #[error("Source '{name}' uses antenna {refant} as its reference, but the array only has {num_antennas} antennas")]
    BadRefAnt {
        name: String,
        refant: usize,
        num_antennas: usize,
    },

    #[error("Source '{name}' has a non-positive low-resolution taper ({taper} wavelengths)")]
    BadTaper { name: String, taper: f64 },

    #[error("Source '{name}' has a negative subtraction uv minimum ({uv_min} wavelengths)")]
    BadUvMin { name: String, uv_min: f64 },

    #[error(transparent)]
    Region(#[from] RegionError),

    #[error(transparent)]
    Simulation(#[from] SimulationError),

    #[error(transparent)]
    IO(#[from] std::io::Error),
}

/// Why a source couldn't be processed.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Self-calibration of '{name}' couldn't make a model image: {reason}")]
    NoModel { name: String, reason: String },

    #[error("Peel {index} of '{name}' (region '{region}') failed: {err}")]
    Peel {
        name: String,
        index: usize,
        region: String,
        #[source]
        err: PeelError,
    },

    #[error("Subtracting the compact sources of '{name}' in region '{region}' failed: {err}")]
    Subtract {
        name: String,
        region: String,
        #[source]
        err: EngineError,
    },

    #[error("The low-resolution image of '{name}' failed: {err}")]
    LowRes {
        name: String,
        #[source]
        err: EngineError,
    },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    SolutionsWrite(#[from] SolutionsWriteError),

    #[error("Couldn't write a report: {0}")]
    Report(#[from] serde_json::Error),

    #[error(transparent)]
    IO(#[from] std::io::Error),
}

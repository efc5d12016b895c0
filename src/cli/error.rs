// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Error type for all peelcal-related errors. This should be the *only* error
//! enum that is publicly visible.

use thiserror::Error;

use super::run::RunArgsError;
use crate::{
    engine::sim::SimulationError,
    pipeline::{ConfigError, PipelineError},
    solutions::{SolutionsReadError, SolutionsWriteError},
};

const URL: &str = "https://docs.rs/peelcal/latest/peelcal";

/// The *only* publicly visible error from peelcal. Each error message should
/// include the URL, unless it's "generic".
#[derive(Error, Debug)]
pub enum PeelcalError {
    /// An error related to the `run` subcommand.
    #[error("{0}\n\nSee for more info: {URL}/pipeline/index.html")]
    Run(String),

    /// An error related to self-calibration.
    #[error("{0}\n\nSee for more info: {URL}/selfcal/index.html")]
    SelfCal(String),

    /// An error related to peeling.
    #[error("{0}\n\nSee for more info: {URL}/peel/index.html")]
    Peel(String),

    /// An error in an observation file.
    #[error("{0}\n\nSee for more info: {URL}/pipeline/struct.ObservationConfig.html")]
    ObservationFile(String),

    /// An error related to simulating visibilities.
    #[error("{0}\n\nSee for more info: {URL}/engine/sim/struct.SimulationConfig.html")]
    Simulation(String),

    /// Generic error surrounding calibration tables.
    #[error("{0}\n\nSee for more info: {URL}/solutions/struct.CalibrationTable.html")]
    Solutions(String),

    /// An error related to argument files.
    #[error("{0}\n\nSee for more info: {URL}/index.html")]
    ArgFile(String),

    /// A generic error that can't be clarified further with documentation, e.g.
    /// IO errors.
    #[error("{0}")]
    Generic(String),
}

// When changing the error propagation below, ensure `Self::from(e)` uses the
// correct `e`!

impl From<RunArgsError> for PeelcalError {
    fn from(e: RunArgsError) -> Self {
        match e {
            RunArgsError::NoObservation | RunArgsError::SourcesFailed { .. } => {
                Self::Run(e.to_string())
            }
        }
    }
}

impl From<ConfigError> for PeelcalError {
    fn from(e: ConfigError) -> Self {
        let s = e.to_string();
        match e {
            ConfigError::UnsupportedExt { .. }
            | ConfigError::Decode { .. }
            | ConfigError::NoSources
            | ConfigError::DuplicateSource { .. }
            | ConfigError::BadName { .. }
            | ConfigError::BadNoise { .. }
            | ConfigError::BadImaging { .. }
            | ConfigError::BadCycles { .. }
            | ConfigError::BadRefAnt { .. }
            | ConfigError::BadTaper { .. }
            | ConfigError::BadUvMin { .. }
            | ConfigError::Region(_) => Self::ObservationFile(s),
            ConfigError::Simulation(e) => Self::from(e),
            ConfigError::IO(e) => Self::from(e),
        }
    }
}

impl From<SimulationError> for PeelcalError {
    fn from(e: SimulationError) -> Self {
        Self::Simulation(e.to_string())
    }
}

impl From<PipelineError> for PeelcalError {
    fn from(e: PipelineError) -> Self {
        let s = e.to_string();
        match e {
            PipelineError::NoModel { .. } => Self::SelfCal(s),
            PipelineError::Peel { .. } => Self::Peel(s),
            PipelineError::Subtract { .. } | PipelineError::LowRes { .. } => Self::Run(s),
            PipelineError::SolutionsWrite(e) => Self::from(e),
            PipelineError::Store(_) | PipelineError::Report(_) => Self::Generic(s),
            PipelineError::IO(e) => Self::from(e),
        }
    }
}

impl From<SolutionsReadError> for PeelcalError {
    fn from(e: SolutionsReadError) -> Self {
        let s = e.to_string();
        match e {
            SolutionsReadError::Json { .. } | SolutionsReadError::BadShape { .. } => {
                Self::Solutions(s)
            }
            SolutionsReadError::IO(e) => Self::from(e),
        }
    }
}

impl From<SolutionsWriteError> for PeelcalError {
    fn from(e: SolutionsWriteError) -> Self {
        let s = e.to_string();
        match e {
            SolutionsWriteError::UnsupportedExt { .. } => Self::Solutions(s),
            SolutionsWriteError::Json(_) | SolutionsWriteError::IO(_) => Self::Generic(s),
        }
    }
}

impl From<std::io::Error> for PeelcalError {
    fn from(e: std::io::Error) -> Self {
        Self::Generic(e.to_string())
    }
}

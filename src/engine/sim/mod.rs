// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! An in-memory engine. Imaging is a direct Fourier transform followed by a
//! Högbom clean; calibration is a scalar StEFCal solver. It ignores the w
//! term, polarisation and primary beams, but it is exact enough to drive the
//! control loops of this crate end to end.

mod calibration;
mod imaging;
mod simulate;

pub use simulate::{ComponentConfig, Simulation, SimulationConfig, SimulationError};

use super::{
    CalibrationEngine, EngineError, ImagingEngine, ImagingParams, ImagingResult, SolveParams,
};
use crate::{
    constants::{DEFAULT_MAX_ITERATIONS, DEFAULT_STOP_THRESHOLD},
    image::ModelImage,
    region::Region,
    solutions::{CalibrationTable, Interpolation},
    vis::VisibilityDataset,
};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimEngine {
    /// The maximum number of solver iterations.
    pub max_iterations: u32,

    /// The solver stops when no gain changes by more than this.
    pub stop_threshold: f64,
}

impl Default for SimEngine {
    fn default() -> Self {
        SimEngine {
            max_iterations: DEFAULT_MAX_ITERATIONS,
            stop_threshold: DEFAULT_STOP_THRESHOLD,
        }
    }
}

impl ImagingEngine for SimEngine {
    fn image(
        &self,
        dataset: &VisibilityDataset,
        mask: &Region,
        params: &ImagingParams,
    ) -> Result<ImagingResult, EngineError> {
        imaging::image(dataset, mask, params)
    }

    fn predict(
        &self,
        dataset: &mut VisibilityDataset,
        model: &ModelImage,
    ) -> Result<(), EngineError> {
        imaging::predict(dataset, model)
    }
}

impl CalibrationEngine for SimEngine {
    fn solve(
        &self,
        dataset: &VisibilityDataset,
        params: &SolveParams,
        prior: &[(CalibrationTable, Interpolation)],
    ) -> Result<CalibrationTable, EngineError> {
        calibration::solve(
            dataset,
            params,
            prior,
            self.max_iterations,
            self.stop_threshold,
        )
    }

    fn apply(
        &self,
        dataset: &mut VisibilityDataset,
        tables: &[(CalibrationTable, Interpolation)],
    ) -> Result<(), EngineError> {
        calibration::apply(dataset, tables)
    }

    fn clear_calibration(&self, dataset: &mut VisibilityDataset) {
        dataset.corrected.assign(&dataset.observed);
    }

    fn subtract(&self, dataset: &mut VisibilityDataset, reverse: bool) {
        calibration::subtract(dataset, reverse)
    }
}

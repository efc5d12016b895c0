// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Interfaces to the engines that do the heavy lifting: imaging and
//! deconvolution, and solving for and applying antenna gains.
//!
//! The control loops of this crate (self-calibration and peeling) only talk to
//! engines through the [`ImagingEngine`] and [`CalibrationEngine`] traits. An
//! in-memory implementation of both lives in [`sim`].

mod error;
pub mod sim;

pub use error::EngineError;

use ndarray::prelude::*;
use serde::{Deserialize, Serialize};

use crate::{
    constants::{DEFAULT_CLEAN_GAIN, DEFAULT_CLEAN_ITERATIONS, DEFAULT_NTERMS, DEFAULT_ROBUST},
    image::ModelImage,
    region::{Lm, Region},
    solutions::{CalibrationTable, Interpolation, SolutionInterval, SolveMode},
    vis::VisibilityDataset,
};

/// How visibilities are weighted when imaging.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Weighting {
    Natural,
    Uniform,
    Briggs { robust: f64 },
}

impl Default for Weighting {
    fn default() -> Self {
        Weighting::Briggs {
            robust: DEFAULT_ROBUST,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImagingParams {
    /// The number of pixels along each side of the image.
    pub size: usize,

    /// The angular size of a pixel \[radians\].
    pub cell: f64,

    pub weighting: Weighting,

    /// The maximum number of clean iterations.
    pub niter: usize,

    /// The clean loop gain.
    pub gain: f64,

    /// Stop cleaning when the peak residual falls below this \[Jy/beam\].
    pub threshold: f64,

    /// The number of Taylor terms in the output model.
    pub nterms: usize,

    /// Multiscale component sizes \[pixels\]. Empty means point components
    /// only.
    pub multiscale: Vec<usize>,

    /// The centre of the image. `None` is the dataset's phase centre.
    pub phase_centre: Option<Lm>,

    /// Baselines shorter than this aren't imaged \[wavelengths\].
    pub uv_min: f64,

    /// Visibility weights are multiplied by a Gaussian that halves them at
    /// this uv distance \[wavelengths\]. `None` is no taper.
    pub uv_taper: Option<f64>,
}

impl ImagingParams {
    pub fn new(size: usize, cell: f64) -> ImagingParams {
        ImagingParams {
            size,
            cell,
            weighting: Weighting::default(),
            niter: DEFAULT_CLEAN_ITERATIONS,
            gain: DEFAULT_CLEAN_GAIN,
            threshold: 0.0,
            nterms: DEFAULT_NTERMS,
            multiscale: vec![],
            phase_centre: None,
            uv_min: 0.0,
            uv_taper: None,
        }
    }
}

/// The products of imaging a dataset.
#[derive(Debug, Clone)]
pub struct ImagingResult {
    /// The deconvolved sky model (clean components).
    pub model: ModelImage,

    /// The residual image \[Jy/beam\]. The dimensions are (y, x).
    pub residual: Array2<f64>,

    /// The RMS of the residual outside the mask \[Jy/beam\]. NaN if it can't be
    /// estimated.
    pub noise: f64,
}

/// The inputs of a gain solve other than the data.
#[derive(Debug, Clone, PartialEq)]
pub struct SolveParams {
    pub mode: SolveMode,
    pub interval: SolutionInterval,
    /// Solutions with an SNR below this are flagged.
    pub min_snr: f64,
    pub reference_antenna: usize,
    /// Antennas with fewer usable baselines than this are flagged.
    pub min_baselines_per_antenna: usize,
    /// Baselines shorter than this are ignored \[metres\].
    pub uv_min: f64,
}

pub trait ImagingEngine {
    /// Image and deconvolve the corrected view of `dataset`, only placing clean
    /// components inside `mask`. Identical inputs give identical outputs.
    fn image(
        &self,
        dataset: &VisibilityDataset,
        mask: &Region,
        params: &ImagingParams,
    ) -> Result<ImagingResult, EngineError>;

    /// Confine `model` to `region`, or with `invert`, remove `region` from
    /// `model`.
    fn restrict_model(
        &self,
        model: &ModelImage,
        region: &Region,
        invert: bool,
    ) -> Result<ModelImage, EngineError> {
        Ok(model.restrict(region, invert)?)
    }

    /// Fill the model view of `dataset` with the visibilities of `model`.
    fn predict(&self, dataset: &mut VisibilityDataset, model: &ModelImage)
        -> Result<(), EngineError>;
}

pub trait CalibrationEngine {
    /// Solve for antenna gains that take the dataset's observed view (corrected
    /// by the `prior` tables) to its model view.
    fn solve(
        &self,
        dataset: &VisibilityDataset,
        params: &SolveParams,
        prior: &[(CalibrationTable, Interpolation)],
    ) -> Result<CalibrationTable, EngineError>;

    /// Recompute the corrected view from the observed view and the given
    /// tables, applied in order.
    fn apply(
        &self,
        dataset: &mut VisibilityDataset,
        tables: &[(CalibrationTable, Interpolation)],
    ) -> Result<(), EngineError>;

    /// Reset the corrected view to the observed view.
    fn clear_calibration(&self, dataset: &mut VisibilityDataset);

    /// Subtract the model view from the corrected view. With `reverse`, the
    /// model is added instead, undoing an earlier subtraction.
    fn subtract(&self, dataset: &mut VisibilityDataset, reverse: bool);
}

// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Errors associated with peeling.

use thiserror::Error;

use super::PeelStep;
use crate::{engine::EngineError, region::SkyFrame, store::StoreError};

#[derive(Error, Debug)]
pub enum PeelError {
    #[error("Region '{region}' spans {extent} pixels, but the largest peel image is {max} pixels")]
    RegionTooLarge {
        region: String,
        extent: usize,
        max: usize,
    },

    #[error("Region '{region}' doesn't cover any pixel of the model")]
    EmptyRegion { region: String },

    #[error("The dataset is in frame {dataset}, but {what} is in frame {other}")]
    FrameMismatch {
        dataset: SkyFrame,
        other: SkyFrame,
        what: &'static str,
    },

    #[error("The model has no flux inside region '{region}'; there is nothing to peel")]
    NothingToPeel { region: String },

    #[error("Dataset {dataset} is already peeled, but the dataset it was made from is unknown")]
    UnknownOrigin { dataset: String },

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// A peel of a sequence failed. The peels before it stay in the workspace.
#[derive(Error, Debug)]
#[error("Peel {index} (region '{region}') failed: {err}")]
pub struct PeelSequenceError {
    /// The position of the failed peel in the sequence.
    pub index: usize,

    pub region: String,

    /// The peels that succeeded before the failure.
    pub completed: Vec<PeelStep>,

    #[source]
    pub err: PeelError,
}

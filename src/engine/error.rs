// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use thiserror::Error;

use crate::{image::ImageError, region::SkyFrame};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("The dataset is in frame {dataset}, but {what} is in frame {other}")]
    FrameMismatch {
        dataset: SkyFrame,
        other: SkyFrame,
        what: &'static str,
    },

    #[error("Calibration table has dimensions {got:?} (timeblock, antenna, channel), which doesn't fit a dataset with {num_antennas} antennas and {num_chans} channels")]
    TableShape {
        got: (usize, usize, usize),
        num_antennas: usize,
        num_chans: usize,
    },

    #[error("Cannot make an image with {size} pixels of size {cell} radians")]
    BadImageGeometry { size: usize, cell: f64 },

    #[error("A uv taper must be positive, but it was {taper} wavelengths")]
    BadTaper { taper: f64 },

    #[error("No unflagged visibilities are usable for {0}")]
    NoData(&'static str),

    #[error("Every antenna failed to calibrate in every timeblock")]
    NoSolutions,

    #[error("Reference antenna {reference} doesn't exist; there are only {num_antennas} antennas")]
    BadReferenceAntenna {
        reference: usize,
        num_antennas: usize,
    },

    #[error(transparent)]
    Image(#[from] ImageError),
}

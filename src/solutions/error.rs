// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Errors associated with reading or writing calibration tables.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SolutionsReadError {
    #[error("Couldn't decode calibration table {file}: {err}")]
    Json { file: String, err: String },

    #[error("Based on the dimensions of the gains, expected {thing} to have {expected} elements, but it had {actual} instead!")]
    BadShape {
        /// What was it that wasn't sensible? Flags, block times, etc.
        thing: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error(transparent)]
    IO(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum SolutionsWriteError {
    #[error("Tried to write calibration table file with an unsupported extension '{ext}'!")]
    UnsupportedExt { ext: String },

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    IO(#[from] std::io::Error),
}

// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Visibility datasets.
//!
//! All visibility arrays are ordered (time, frequency, baseline), i.e. "tfb".

#[cfg(test)]
mod tests;

use ndarray::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use vec1::Vec1;

use crate::{
    math::{c64, cross_baseline_pairs},
    region::SkyFrame,
};

/// A baseline's coordinates \[metres\]. `w` is ignored by everything in this
/// crate; all arrays are treated as coplanar.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct UV {
    pub u: f64,
    pub v: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Antenna {
    pub name: String,
    /// East and north offsets from the array centre \[metres\]
    pub east: f64,
    pub north: f64,
}

/// A saved state of a dataset's flags. Only restorable onto a dataset of the
/// same shape.
#[derive(Debug, Clone, PartialEq)]
pub struct FlagVersion(Array3<bool>);

impl FlagVersion {
    pub fn num_flagged(&self) -> usize {
        self.0.iter().filter(|&&f| f).count()
    }
}

#[derive(Error, Debug)]
pub enum VisError {
    #[error("Flag version has shape {got:?}, but the dataset has shape {expected:?}")]
    FlagShape {
        expected: (usize, usize, usize),
        got: (usize, usize, usize),
    },

    #[error("Expected {expected} {thing}, but got {actual}")]
    BadShape {
        thing: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("A dataset needs at least two antennas")]
    TooFewAntennas,
}

/// Correlated visibilities with separate "observed", "model" and "corrected"
/// views, like the DATA, MODEL_DATA and CORRECTED_DATA columns of a
/// measurement set.
#[derive(Debug, Clone, PartialEq)]
pub struct VisibilityDataset {
    pub frame: SkyFrame,
    pub antennas: Vec1<Antenna>,
    /// Antenna pairs of each baseline, always `(ant1, ant2)` with `ant1 <
    /// ant2`.
    pub baselines: Vec<(usize, usize)>,
    /// Timestamp centroids \[seconds\]
    pub timestamps: Vec1<f64>,
    /// \[seconds\]
    pub integration_time: f64,
    /// Channel centre frequencies \[Hz\]
    pub freqs: Vec1<f64>,
    /// Baseline coordinates per timestep. Dimensions (time, baseline).
    pub uvs: Array2<UV>,
    pub observed: Array3<c64>,
    pub model: Array3<c64>,
    pub corrected: Array3<c64>,
    pub flags: Array3<bool>,
}

impl VisibilityDataset {
    /// Make a new dataset from observed visibilities. The model view is zeroed
    /// and the corrected view starts as a copy of the observed one.
    pub fn new(
        frame: SkyFrame,
        antennas: Vec1<Antenna>,
        timestamps: Vec1<f64>,
        integration_time: f64,
        freqs: Vec1<f64>,
        uvs: Array2<UV>,
        observed: Array3<c64>,
    ) -> Result<VisibilityDataset, VisError> {
        if antennas.len() < 2 {
            return Err(VisError::TooFewAntennas);
        }
        let baselines = cross_baseline_pairs(antennas.len());
        let (num_times, num_freqs, num_baselines) = observed.dim();
        for (thing, expected, actual) in [
            ("timesteps", timestamps.len(), num_times),
            ("channels", freqs.len(), num_freqs),
            ("baselines", baselines.len(), num_baselines),
            ("UV timesteps", num_times, uvs.len_of(Axis(0))),
            ("UV baselines", num_baselines, uvs.len_of(Axis(1))),
        ] {
            if expected != actual {
                return Err(VisError::BadShape {
                    thing,
                    expected,
                    actual,
                });
            }
        }

        Ok(VisibilityDataset {
            frame,
            antennas,
            baselines,
            timestamps,
            integration_time,
            freqs,
            uvs,
            model: Array3::zeros(observed.raw_dim()),
            corrected: observed.clone(),
            flags: Array3::from_elem(observed.raw_dim(), false),
            observed,
        })
    }

    pub fn num_antennas(&self) -> usize {
        self.antennas.len()
    }

    pub fn dim(&self) -> (usize, usize, usize) {
        self.observed.dim()
    }

    /// The average channel frequency \[Hz\].
    pub fn centroid_freq(&self) -> f64 {
        self.freqs.iter().sum::<f64>() / self.freqs.len() as f64
    }

    pub fn save_flags(&self) -> FlagVersion {
        FlagVersion(self.flags.clone())
    }

    pub fn restore_flags(&mut self, version: &FlagVersion) -> Result<(), VisError> {
        if version.0.dim() != self.flags.dim() {
            return Err(VisError::FlagShape {
                expected: self.flags.dim(),
                got: version.0.dim(),
            });
        }
        self.flags.assign(&version.0);
        Ok(())
    }

    /// Materialise the corrected view into a new dataset; its observed and
    /// corrected views are this dataset's corrected view, and its model is
    /// empty. Flags are kept.
    pub fn split(&self) -> VisibilityDataset {
        VisibilityDataset {
            frame: self.frame,
            antennas: self.antennas.clone(),
            baselines: self.baselines.clone(),
            timestamps: self.timestamps.clone(),
            integration_time: self.integration_time,
            freqs: self.freqs.clone(),
            uvs: self.uvs.clone(),
            observed: self.corrected.clone(),
            model: Array3::zeros(self.corrected.raw_dim()),
            corrected: self.corrected.clone(),
            flags: self.flags.clone(),
        }
    }

    /// For each antenna, count the baselines that have any unflagged data.
    pub fn unflagged_baselines_per_antenna(&self) -> Vec<usize> {
        let mut counts = vec![0; self.num_antennas()];
        for (i_bl, &(ant1, ant2)) in self.baselines.iter().enumerate() {
            if self.flags.slice(s![.., .., i_bl]).iter().any(|&f| !f) {
                counts[ant1] += 1;
                counts[ant2] += 1;
            }
        }
        counts
    }

    /// For each antenna, the fraction of its visibilities that are flagged.
    pub fn flagged_fraction_per_antenna(&self) -> Vec<f64> {
        let mut flagged = vec![0usize; self.num_antennas()];
        let mut total = vec![0usize; self.num_antennas()];
        for (i_bl, &(ant1, ant2)) in self.baselines.iter().enumerate() {
            let bl_flags = self.flags.slice(s![.., .., i_bl]);
            let n_flagged = bl_flags.iter().filter(|&&f| f).count();
            for ant in [ant1, ant2] {
                flagged[ant] += n_flagged;
                total[ant] += bl_flags.len();
            }
        }
        flagged
            .into_iter()
            .zip(total)
            .map(|(f, t)| if t == 0 { 1.0 } else { f as f64 / t as f64 })
            .collect()
    }
}

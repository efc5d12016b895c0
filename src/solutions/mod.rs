// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Code to handle calibration tables (per-antenna complex gain solutions).

mod error;
mod history;
#[cfg(test)]
mod tests;

pub use error::*;
pub use history::{CalibrationLog, Checkpoint};

use std::{
    fs::File,
    io::{BufReader, BufWriter},
    path::Path,
};

use log::debug;
use ndarray::prelude::*;
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumIter, EnumString};
use vec1::Vec1;

use crate::math::{c64, safe_inv, wrap_phase};

/// What a gain solve solves for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumIter, EnumString, Serialize, Deserialize)]
pub enum SolveMode {
    #[strum(serialize = "p")]
    Phase,

    #[strum(serialize = "a")]
    Amplitude,

    #[strum(serialize = "ap")]
    AmplitudePhase,
}

/// The time span of data contributing to each solution.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum SolutionInterval {
    /// One solution per integration.
    Integration,
    /// One solution per this many seconds.
    Seconds(f64),
    /// One solution for all data.
    Infinite,
}

impl std::fmt::Display for SolutionInterval {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SolutionInterval::Integration => write!(f, "int"),
            SolutionInterval::Seconds(s) => write!(f, "{s}s"),
            SolutionInterval::Infinite => write!(f, "inf"),
        }
    }
}

impl SolutionInterval {
    /// Group timestep indices into solution blocks.
    pub fn timeblocks(&self, timestamps: &[f64], integration_time: f64) -> Vec<Vec<usize>> {
        match self {
            SolutionInterval::Integration => (0..timestamps.len()).map(|i| vec![i]).collect(),
            SolutionInterval::Infinite => vec![(0..timestamps.len()).collect()],
            SolutionInterval::Seconds(s) => {
                // Never make a block shorter than an integration.
                let span = s.max(integration_time);
                let mut blocks: Vec<Vec<usize>> = vec![];
                let mut block_start = None;
                for (i, &t) in timestamps.iter().enumerate() {
                    match block_start {
                        Some(start) if t - start < span - 1e-6 => {
                            if let Some(last) = blocks.last_mut() {
                                last.push(i);
                            }
                        }
                        _ => {
                            block_start = Some(t);
                            blocks.push(vec![i]);
                        }
                    }
                }
                blocks
            }
        }
    }
}

/// How a table's solutions are interpolated in time when applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize, Deserialize)]
pub enum Interpolation {
    #[strum(serialize = "nearest")]
    Nearest,

    #[strum(serialize = "linear")]
    Linear,
}

/// Per-antenna complex gains. When applied, corrected visibilities are
/// observed visibilities divided by `g_1 * conj(g_2)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationTable {
    pub mode: SolveMode,

    pub interval: SolutionInterval,

    /// The index of the antenna whose phase is zero.
    pub reference_antenna: Option<usize>,

    /// The centroid timestamp of each timeblock \[seconds\].
    pub block_times: Vec1<f64>,

    /// The gains. The dimensions are (timeblock, antenna, channel). Zeros are
    /// unsolved entries.
    pub gains: Array3<c64>,

    /// Flagged solutions, with the same dimensions as `gains`.
    pub flags: Array3<bool>,
}

impl CalibrationTable {
    /// A table of unit gains.
    pub fn identity(
        mode: SolveMode,
        block_times: Vec1<f64>,
        num_antennas: usize,
        num_chans: usize,
    ) -> CalibrationTable {
        let shape = (block_times.len(), num_antennas, num_chans);
        CalibrationTable {
            mode,
            interval: SolutionInterval::Infinite,
            reference_antenna: None,
            block_times,
            gains: Array3::from_elem(shape, c64::new(1.0, 0.0)),
            flags: Array3::from_elem(shape, false),
        }
    }

    pub fn dim(&self) -> (usize, usize, usize) {
        self.gains.dim()
    }

    /// Make a new table whose gains undo the correction of this one. Non-zero
    /// gains `g` become `1/g`; zeros (unsolved) stay zero, so no infinities are
    /// produced. Flags are copied untouched. `self` is left as-is.
    pub fn invert(&self) -> CalibrationTable {
        let mut inverted = self.clone();
        inverted.gains.mapv_inplace(safe_inv);
        let num_solved = inverted.gains.iter().filter(|g| g.norm() > 0.0).count();
        debug!(
            "Inverted a {} calibration table ({}/{} solved entries)",
            self.mode,
            num_solved,
            self.gains.len()
        );
        inverted
    }

    /// The gains of an antenna and channel at a timestamp.
    ///
    /// Linear interpolation is of the log-amplitude and of the phase (along
    /// the shorter way round). Phase-only gains therefore stay unit-modulus,
    /// and the interpolated gain of an inverted table is the reciprocal of
    /// this table's interpolated gain.
    pub fn gain_at(
        &self,
        timestamp: f64,
        antenna: usize,
        chan: usize,
        interpolation: Interpolation,
    ) -> (c64, bool) {
        let num_blocks = self.block_times.len();
        let nearest = self
            .block_times
            .iter()
            .enumerate()
            .min_by(|(_, a), (_, b)| {
                (*a - timestamp)
                    .abs()
                    .partial_cmp(&(*b - timestamp).abs())
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .map(|(i, _)| i)
            .unwrap_or(0);

        let lookup = |i: usize| (self.gains[(i, antenna, chan)], self.flags[(i, antenna, chan)]);
        if num_blocks == 1 || interpolation == Interpolation::Nearest {
            return lookup(nearest);
        }

        // Find the bracketing timeblocks; outside the span of the table, use
        // the closest timeblock.
        let right = match self.block_times.iter().position(|&t| t >= timestamp) {
            Some(0) | None => return lookup(nearest),
            Some(r) => r,
        };
        let left = right - 1;
        let (g_l, f_l) = lookup(left);
        let (g_r, f_r) = lookup(right);
        // Unsolved or flagged neighbours can't be interpolated against.
        if f_l || f_r || g_l.norm() == 0.0 || g_r.norm() == 0.0 {
            return lookup(nearest);
        }
        let t_l = self.block_times[left];
        let t_r = self.block_times[right];
        let frac = (timestamp - t_l) / (t_r - t_l);
        let ln_amp = g_l.norm().ln() * (1.0 - frac) + g_r.norm().ln() * frac;
        let phase = g_l.arg() + wrap_phase(g_r.arg() - g_l.arg()) * frac;
        (c64::from_polar(ln_amp.exp(), phase), false)
    }

    /// Read a table from a JSON file.
    pub fn read<P: AsRef<Path>>(file: P) -> Result<CalibrationTable, SolutionsReadError> {
        let file = file.as_ref();
        debug!("Reading calibration table {}", file.display());
        let table: CalibrationTable = serde_json::from_reader(BufReader::new(File::open(file)?))
            .map_err(|e| SolutionsReadError::Json {
                file: file.display().to_string(),
                err: e.to_string(),
            })?;
        if table.gains.dim() != table.flags.dim() {
            return Err(SolutionsReadError::BadShape {
                thing: "flags",
                expected: table.gains.len(),
                actual: table.flags.len(),
            });
        }
        if table.gains.len_of(Axis(0)) != table.block_times.len() {
            return Err(SolutionsReadError::BadShape {
                thing: "block_times",
                expected: table.gains.len_of(Axis(0)),
                actual: table.block_times.len(),
            });
        }
        Ok(table)
    }

    /// Write this table to a JSON file.
    pub fn write<P: AsRef<Path>>(&self, file: P) -> Result<(), SolutionsWriteError> {
        let file = file.as_ref();
        match file.extension().and_then(|e| e.to_str()) {
            Some("json") => (),
            ext => {
                return Err(SolutionsWriteError::UnsupportedExt {
                    ext: ext.unwrap_or("<no extension>").to_string(),
                })
            }
        }
        debug!("Writing calibration table {}", file.display());
        serde_json::to_writer(BufWriter::new(File::create(file)?), self)?;
        Ok(())
    }
}

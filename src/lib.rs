// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

/*!
Self-calibration and source peeling for radio-interferometric visibilities.

A field is self-calibrated in cycles of imaging and gain solving, and bright
sources are then peeled from it one at a time. Imaging and calibration are
done by engines behind the traits of [`engine`]; [`engine::sim`] is a built-in
engine operating on simulated observations.
 */

mod cli;
pub mod constants;
pub mod engine;
pub mod image;
pub(crate) mod math;
pub mod peel;
pub mod pipeline;
pub mod refant;
pub mod region;
pub mod selfcal;
pub mod solutions;
pub mod store;
pub mod vis;

#[cfg(test)]
mod tests;

use crossbeam_utils::atomic::AtomicCell;

// Re-exports.
pub use cli::{Peelcal, PeelcalError};

/// Should progress bars be drawn? Only the CLI should turn these on.
pub(crate) static PROGRESS_BARS: AtomicCell<bool> = AtomicCell::new(false);

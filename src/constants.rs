// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Useful constants.
//!
//! All constants *must* be double precision.

/// Speed of light \[metres/second\].
pub const VEL_C: f64 = 299_792_458.0;

/// The number of self-calibration cycles, including the final quality check.
pub const NUM_SELFCAL_CYCLES: usize = 6;

/// If the image noise of a self-calibration cycle is larger than this factor
/// multiplied by the previous cycle's noise, the cycle is rejected.
pub const NOISE_TOLERANCE: f64 = 1.1;

/// Self-calibration cycles at or beyond this index also solve for amplitudes.
pub const AMPLITUDE_CYCLE_THRESHOLD: usize = 3;

/// Below this frequency \[Hz\], every minimum SNR used in self-calibration is
/// lowered by one.
pub const LOW_FREQUENCY_SNR_CUTOFF: f64 = 400e6;

/// Image sizes \[pixels\] considered when imaging a source to peel.
pub const PEEL_IMAGE_SIZES: [usize; 5] = [128, 256, 512, 1024, 2048];

/// The phase-only solution interval used while peeling \[seconds\].
pub const PEEL_PHASE_INTERVAL: f64 = 600.0;

/// The maximum number of clean iterations when imaging a source to peel.
pub const PEEL_CLEAN_ITERATIONS: usize = 5000;

/// The default shortest baseline of the long-baseline image that compact
/// sources are subtracted with \[wavelengths\].
pub const HIRES_UV_MIN: f64 = 4000.0;

/// The maximum number of clean iterations of the long-baseline image.
pub const HIRES_CLEAN_ITERATIONS: usize = 5000;

/// How much lower the Briggs robustness of the long-baseline image is than
/// the source's.
pub const HIRES_ROBUST_OFFSET: f64 = 1.0;

/// The default loop gain of clean.
pub const DEFAULT_CLEAN_GAIN: f64 = 0.1;

/// The default maximum number of clean iterations for full-field images.
pub const DEFAULT_CLEAN_ITERATIONS: usize = 10000;

/// The default Briggs robustness.
pub const DEFAULT_ROBUST: f64 = 0.5;

/// The default number of Taylor terms in model images.
pub const DEFAULT_NTERMS: usize = 2;

/// The default minimum baseline length used in self-calibration \[metres\].
pub const DEFAULT_SELFCAL_UV_MIN: f64 = 50.0;

/// The maximum number of iterations of the gain solver.
pub const DEFAULT_MAX_ITERATIONS: u32 = 50;

/// The threshold to satisfy convergence in the gain solver.
pub const DEFAULT_STOP_THRESHOLD: f64 = 1e-8;

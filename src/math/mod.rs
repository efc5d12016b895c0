// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Some helper mathematics.


use std::f64::consts::{PI, TAU};

use num_complex::Complex;
use num_traits::Zero;

#[allow(non_camel_case_types)]
pub type c64 = Complex<f64>;

/// Complex exponential. The argument is assumed to be purely imaginary.
///
/// This function doesn't actually use complex numbers; it just returns the real
/// and imag components from Euler's formula (i.e. e^{ix} = cos{x} + i sin{x}).
#[inline]
pub(crate) fn cexp(x: f64) -> c64 {
    let (im, re) = x.sin_cos();
    c64::new(re, im)
}

/// The number of cross-correlation baselines formed by `num_antennas`.
#[inline]
pub(crate) fn num_cross_baselines(num_antennas: usize) -> usize {
    (num_antennas * num_antennas.saturating_sub(1)) / 2
}

/// Get the antenna pairs of all cross-correlation baselines. The order is the
/// usual one; (0, 1), (0, 2), ..., (1, 2), ...
pub(crate) fn cross_baseline_pairs(num_antennas: usize) -> Vec<(usize, usize)> {
    let mut pairs = Vec::with_capacity(num_cross_baselines(num_antennas));
    for ant1 in 0..num_antennas {
        for ant2 in ant1 + 1..num_antennas {
            pairs.push((ant1, ant2));
        }
    }
    pairs
}

/// The root-mean-square of the supplied values. If there are no values, NaN is
/// returned; callers treat this as "undefined".
pub(crate) fn rms<I: IntoIterator<Item = f64>>(values: I) -> f64 {
    let (sum_sq, count) = values
        .into_iter()
        .fold((0.0, 0usize), |(sum_sq, count), v| (sum_sq + v * v, count + 1));
    if count == 0 {
        f64::NAN
    } else {
        (sum_sq / count as f64).sqrt()
    }
}

/// Invert a complex number only if it's non-zero. Zeros stay zero.
#[inline]
pub(crate) fn safe_inv(g: c64) -> c64 {
    if g.is_zero() {
        g
    } else {
        g.inv()
    }
}

/// Wrap a phase into the range [-pi, pi) \[radians\].
#[inline]
pub(crate) fn wrap_phase(phase: f64) -> f64 {
    (phase + PI).rem_euclid(TAU) - PI
}

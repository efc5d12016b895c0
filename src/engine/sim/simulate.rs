// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Generate corrupted visibilities of a sky of point sources.

use std::f64::consts::TAU;

use log::{debug, info};
use ndarray::prelude::*;
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use vec1::Vec1;

use crate::{
    constants::VEL_C,
    math::{c64, cexp, cross_baseline_pairs},
    region::{Lm, SkyFrame},
    vis::{Antenna, VisError, VisibilityDataset, UV},
};

/// \[radians/second\]
const EARTH_ROTATION_RATE: f64 = 7.292_115e-5;

fn default_time_res() -> f64 {
    10.0
}

/// A point source of the simulated sky.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentConfig {
    /// Direction cosines \[degrees\] relative to the phase centre.
    pub l: f64,
    pub m: f64,

    /// Flux density at the centroid frequency \[Jy\].
    pub flux: f64,

    /// Change of the flux density per fractional frequency offset from the
    /// centroid frequency \[Jy\].
    #[serde(default)]
    pub slope: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// The phase centre \[degrees\].
    pub ra: f64,
    pub dec: f64,

    pub antennas: Vec<Antenna>,

    pub num_timesteps: usize,

    /// \[seconds\]
    #[serde(default = "default_time_res")]
    pub time_res: f64,

    /// Channel centre frequencies \[Hz\].
    pub freqs: Vec<f64>,

    pub components: Vec<ComponentConfig>,

    /// The largest initial antenna phase error \[radians\].
    #[serde(default)]
    pub phase_error: f64,

    /// The largest antenna phase drift \[radians/hour\].
    #[serde(default)]
    pub phase_drift: f64,

    /// The largest fractional antenna amplitude error.
    #[serde(default)]
    pub amplitude_error: f64,

    /// The standard deviation of the noise of each visibility's real and
    /// imaginary parts \[Jy\].
    #[serde(default)]
    pub noise: f64,

    #[serde(default)]
    pub seed: u64,
}

#[derive(Error, Debug)]
pub enum SimulationError {
    #[error("The simulation needs at least one {0}")]
    Empty(&'static str),

    #[error("Simulation parameter '{name}' must be non-negative (got {value})")]
    Negative { name: &'static str, value: f64 },

    #[error(transparent)]
    Vis(#[from] VisError),
}

/// The result of a simulation.
#[derive(Debug, Clone)]
pub struct Simulation {
    /// The corrupted dataset.
    pub dataset: VisibilityDataset,

    /// The gains used to corrupt the dataset. The dimensions are (time,
    /// antenna).
    pub gains: Array2<c64>,
}

fn uniform(rng: &mut StdRng, half_width: f64) -> f64 {
    if half_width > 0.0 {
        rng.random_range(-half_width..half_width)
    } else {
        0.0
    }
}

/// A standard-normal deviate via the Box-Muller transform.
fn gaussian(rng: &mut StdRng) -> f64 {
    let u1: f64 = rng.random_range(1e-12..1.0);
    let u2: f64 = rng.random_range(0.0..1.0);
    (-2.0 * u1.ln()).sqrt() * (TAU * u2).cos()
}

impl SimulationConfig {
    pub fn frame(&self) -> SkyFrame {
        SkyFrame {
            ra: self.ra.to_radians(),
            dec: self.dec.to_radians(),
        }
    }

    /// Generate the visibilities. The same config always gives the same
    /// visibilities.
    pub fn simulate(&self) -> Result<Simulation, SimulationError> {
        let antennas =
            Vec1::try_from_vec(self.antennas.clone()).map_err(|_| SimulationError::Empty("antenna"))?;
        let freqs =
            Vec1::try_from_vec(self.freqs.clone()).map_err(|_| SimulationError::Empty("frequency"))?;
        if self.num_timesteps == 0 {
            return Err(SimulationError::Empty("timestep"));
        }
        for (name, value) in [
            ("time_res", self.time_res),
            ("phase_error", self.phase_error),
            ("phase_drift", self.phase_drift),
            ("amplitude_error", self.amplitude_error),
            ("noise", self.noise),
        ] {
            if value < 0.0 || !value.is_finite() {
                return Err(SimulationError::Negative { name, value });
            }
        }

        let timestamps: Vec<f64> = (0..self.num_timesteps)
            .map(|i| (i as f64 + 0.5) * self.time_res)
            .collect();
        let baselines = cross_baseline_pairs(antennas.len());

        // The baselines rotate with the hour angle; the array is viewed
        // face-on.
        let uvs = Array2::from_shape_fn((timestamps.len(), baselines.len()), |(t, b)| {
            let (ant1, ant2) = baselines[b];
            let east = antennas[ant2].east - antennas[ant1].east;
            let north = antennas[ant2].north - antennas[ant1].north;
            let (s, c) = (EARTH_ROTATION_RATE * timestamps[t]).sin_cos();
            UV {
                u: east * c - north * s,
                v: east * s + north * c,
            }
        });

        let mut rng = StdRng::seed_from_u64(self.seed);
        let antenna_errors: Vec<(f64, f64, f64)> = (0..antennas.len())
            .map(|_| {
                (
                    1.0 + uniform(&mut rng, self.amplitude_error),
                    uniform(&mut rng, self.phase_error),
                    uniform(&mut rng, self.phase_drift),
                )
            })
            .collect();
        let gains = Array2::from_shape_fn((timestamps.len(), antennas.len()), |(t, a)| {
            let (amp, phase, drift) = antenna_errors[a];
            cexp(phase + drift * timestamps[t] / 3600.0) * amp
        });

        let components: Vec<(Lm, f64, f64)> = self
            .components
            .iter()
            .map(|c| (Lm::from_degrees(c.l, c.m), c.flux, c.slope))
            .collect();
        let centroid_freq = freqs.iter().sum::<f64>() / freqs.len() as f64;
        let mut observed = Array3::zeros((timestamps.len(), freqs.len(), baselines.len()));
        for ((t, f, b), vis) in observed.indexed_iter_mut() {
            let lambda = VEL_C / freqs[f];
            let uv = uvs[(t, b)];
            let (u, v) = (uv.u / lambda, uv.v / lambda);
            let x = (freqs[f] - centroid_freq) / centroid_freq;
            let sky: c64 = components
                .iter()
                .map(|(lm, flux, slope)| cexp(-TAU * (u * lm.l + v * lm.m)) * (flux + slope * x))
                .sum();
            let (ant1, ant2) = baselines[b];
            *vis = gains[(t, ant1)] * gains[(t, ant2)].conj() * sky;
            if self.noise > 0.0 {
                *vis += c64::new(gaussian(&mut rng), gaussian(&mut rng)) * self.noise;
            }
        }
        debug!(
            "Simulated {} components on {} baselines, {} timesteps and {} channels",
            components.len(),
            baselines.len(),
            timestamps.len(),
            freqs.len()
        );
        info!(
            "Simulated visibilities with {:.3} Jy of sky flux and noise {} Jy",
            self.components.iter().map(|c| c.flux).sum::<f64>(),
            self.noise
        );

        let dataset = VisibilityDataset::new(
            self.frame(),
            antennas,
            Vec1::try_from_vec(timestamps).map_err(|_| SimulationError::Empty("timestep"))?,
            self.time_res,
            freqs,
            uvs,
            observed,
        )?;
        Ok(Simulation { dataset, gains })
    }
}

// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Helpful functions for tests: a small simulated array and sky.

use vec1::vec1;

use crate::{
    engine::sim::{ComponentConfig, SimulationConfig},
    image::{ImageGeometry, ModelImage},
    region::{Lm, Region, Shape, SkyFrame},
    vis::Antenna,
};

/// The pixel size used by test images \[radians\].
pub(crate) const CELL: f64 = 2e-3;

pub(crate) fn test_antennas() -> Vec<Antenna> {
    [
        (0.0, 0.0),
        (37.0, 12.0),
        (-52.0, 31.0),
        (88.0, -45.0),
        (-15.0, -96.0),
        (121.0, 70.0),
        (-134.0, -20.0),
        (60.0, 140.0),
    ]
    .into_iter()
    .enumerate()
    .map(|(i, (east, north))| Antenna {
        name: format!("ANT{i:02}"),
        east,
        north,
    })
    .collect()
}

/// A point source at the given pixel offsets from the centre of an image with
/// cell size [`CELL`].
pub(crate) fn component_at(dx: i32, dy: i32, flux: f64) -> ComponentConfig {
    ComponentConfig {
        l: (dx as f64 * CELL).to_degrees(),
        m: (dy as f64 * CELL).to_degrees(),
        flux,
        slope: 0.0,
    }
}

/// An uncorrupted, noiseless observation of a single 10 Jy source.
pub(crate) fn single_source_config() -> SimulationConfig {
    SimulationConfig {
        ra: 60.0,
        dec: -30.0,
        antennas: test_antennas(),
        num_timesteps: 12,
        time_res: 300.0,
        freqs: vec![150e6, 160e6],
        components: vec![component_at(5, -3, 10.0)],
        phase_error: 0.0,
        phase_drift: 0.0,
        amplitude_error: 0.0,
        noise: 0.0,
        seed: 42,
    }
}

/// A bright source and a fainter one, observed with antenna phase errors and
/// a little noise.
pub(crate) fn two_source_config() -> SimulationConfig {
    SimulationConfig {
        components: vec![component_at(8, 6, 20.0), component_at(-9, -4, 5.0)],
        phase_error: 0.8,
        noise: 0.05,
        ..single_source_config()
    }
}

/// The true sky of a simulation on a `size`x`size` grid.
pub(crate) fn sky_model(config: &SimulationConfig, size: usize) -> ModelImage {
    let geometry = ImageGeometry::square(size, CELL, Lm::default(), config.frame());
    let mut model = ModelImage::zeros(geometry, 2);
    for c in &config.components {
        let (x, y) = geometry
            .lm_to_pixel(Lm::from_degrees(c.l, c.m))
            .expect("component is on the grid");
        model.terms[(0, y, x)] += c.flux;
    }
    model
}

/// A circle centred at pixel offsets from the image centre.
pub(crate) fn circle(name: &str, frame: SkyFrame, dx: i32, dy: i32, radius_px: f64) -> Region {
    Region::new(
        name,
        vec1![Shape::Circle {
            centre: Lm::new(dx as f64 * CELL, dy as f64 * CELL),
            radius: radius_px * CELL,
        }],
        frame,
    )
}

/// A mask around both sources of [`two_source_config`].
pub(crate) fn two_source_mask(frame: SkyFrame) -> Region {
    let shape = |dx: f64, dy: f64| Shape::Circle {
        centre: Lm::new(dx * CELL, dy * CELL),
        radius: 4.0 * CELL,
    };
    Region::new("mask", vec1![shape(8.0, 6.0), shape(-9.0, -4.0)], frame)
}

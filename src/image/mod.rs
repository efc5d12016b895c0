// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Sky-brightness model images.


use ndarray::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::region::{Lm, Region, SkyFrame};

/// The pixel grid of an image.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ImageGeometry {
    pub size_x: usize,
    pub size_y: usize,
    /// The angular size of a pixel \[radians\]
    pub cell: f64,
    /// The direction of the centre pixel, i.e. pixel `(size_x / 2, size_y /
    /// 2)`.
    pub centre: Lm,
    pub frame: SkyFrame,
}

impl ImageGeometry {
    pub fn square(size: usize, cell: f64, centre: Lm, frame: SkyFrame) -> ImageGeometry {
        ImageGeometry {
            size_x: size,
            size_y: size,
            cell,
            centre,
            frame,
        }
    }

    pub fn pixel_to_lm(&self, x: usize, y: usize) -> Lm {
        Lm {
            l: self.centre.l + (x as f64 - (self.size_x / 2) as f64) * self.cell,
            m: self.centre.m + (y as f64 - (self.size_y / 2) as f64) * self.cell,
        }
    }

    /// The pixel closest to the given direction, if it lies on this grid.
    pub fn lm_to_pixel(&self, lm: Lm) -> Option<(usize, usize)> {
        let x = ((lm.l - self.centre.l) / self.cell).round() + (self.size_x / 2) as f64;
        let y = ((lm.m - self.centre.m) / self.cell).round() + (self.size_y / 2) as f64;
        if x < 0.0 || y < 0.0 || x >= self.size_x as f64 || y >= self.size_y as f64 {
            None
        } else {
            Some((x as usize, y as usize))
        }
    }
}

/// Inclusive pixel bounds of a region on an image grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelBounds {
    pub x_min: usize,
    pub x_max: usize,
    pub y_min: usize,
    pub y_max: usize,
}

impl PixelBounds {
    /// The larger of the width and height \[pixels\].
    pub fn extent(&self) -> usize {
        (self.x_max - self.x_min + 1).max(self.y_max - self.y_min + 1)
    }
}

#[derive(Error, Debug)]
pub enum ImageError {
    #[error("Model image is in frame {model} but {what} is in frame {other}")]
    FrameMismatch {
        model: SkyFrame,
        other: SkyFrame,
        what: &'static str,
    },

    #[error("Model images have different geometries and can't be combined")]
    GeometryMismatch,
}

/// A (possibly multi-term) sky model. The dimensions of `terms` are (Taylor
/// term, y, x); term 0 is the flux density at the reference frequency and term
/// 1 is the spectral slope.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelImage {
    pub geometry: ImageGeometry,
    pub terms: Array3<f64>,
}

impl ModelImage {
    pub fn zeros(geometry: ImageGeometry, num_terms: usize) -> ModelImage {
        ModelImage {
            geometry,
            terms: Array3::zeros((num_terms.max(1), geometry.size_y, geometry.size_x)),
        }
    }

    pub fn num_terms(&self) -> usize {
        self.terms.len_of(Axis(0))
    }

    /// Either confine the model to `region` (`invert == false`), or zero the
    /// model inside `region` (`invert == true`). The output always has the
    /// same geometry as `self`, so the two halves sum back to `self` exactly.
    pub fn restrict(&self, region: &Region, invert: bool) -> Result<ModelImage, ImageError> {
        if region.frame() != self.geometry.frame {
            return Err(ImageError::FrameMismatch {
                model: self.geometry.frame,
                other: region.frame(),
                what: "the region",
            });
        }

        let mut out = self.clone();
        for y in 0..self.geometry.size_y {
            for x in 0..self.geometry.size_x {
                let inside = region.contains(self.geometry.pixel_to_lm(x, y));
                if inside == invert {
                    out.terms.slice_mut(s![.., y, x]).fill(0.0);
                }
            }
        }
        Ok(out)
    }

    /// The bounding box of all of this model's pixels that fall inside
    /// `region`. `None` if the region doesn't cover any pixel.
    pub fn region_pixel_bounds(&self, region: &Region) -> Option<PixelBounds> {
        let mut bounds: Option<PixelBounds> = None;
        for y in 0..self.geometry.size_y {
            for x in 0..self.geometry.size_x {
                if !region.contains(self.geometry.pixel_to_lm(x, y)) {
                    continue;
                }
                bounds = Some(match bounds {
                    None => PixelBounds {
                        x_min: x,
                        x_max: x,
                        y_min: y,
                        y_max: y,
                    },
                    Some(b) => PixelBounds {
                        x_min: b.x_min.min(x),
                        x_max: b.x_max.max(x),
                        y_min: b.y_min.min(y),
                        y_max: b.y_max.max(y),
                    },
                });
            }
        }
        bounds
    }

    /// Iterate over the non-zero pixels of the model, yielding their direction
    /// and their Taylor terms.
    pub fn components(&self) -> impl Iterator<Item = (Lm, ArrayView1<f64>)> + '_ {
        let (_, size_y, size_x) = self.terms.dim();
        (0..size_y)
            .flat_map(move |y| (0..size_x).map(move |x| (x, y)))
            .filter_map(move |(x, y)| {
                let terms = self.terms.slice(s![.., y, x]);
                if terms.iter().all(|&t| t == 0.0) {
                    None
                } else {
                    Some((self.geometry.pixel_to_lm(x, y), terms))
                }
            })
    }

    /// The sum of the first Taylor term \[Jy\].
    pub fn total_flux(&self) -> f64 {
        self.terms.slice(s![0, .., ..]).sum()
    }

    /// The sum of the first Taylor term inside `region` \[Jy\].
    pub fn flux_in(&self, region: &Region) -> Result<f64, ImageError> {
        Ok(self.restrict(region, false)?.total_flux())
    }

    /// The first Taylor term at the pixel closest to `lm`.
    pub fn flux_at(&self, lm: Lm) -> Option<f64> {
        self.geometry
            .lm_to_pixel(lm)
            .map(|(x, y)| self.terms[(0, y, x)])
    }

    /// Add another model on the same grid to this one.
    pub fn add_assign(&mut self, other: &ModelImage) -> Result<(), ImageError> {
        if self.geometry != other.geometry || self.terms.dim() != other.terms.dim() {
            return Err(ImageError::GeometryMismatch);
        }
        self.terms += &other.terms;
        Ok(())
    }
}

// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Imaging with a direct Fourier transform and a Högbom clean.

use std::{
    collections::HashMap,
    f64::consts::{LN_2, TAU},
};

use log::{debug, trace};
use ndarray::prelude::*;
use rayon::prelude::*;

use crate::{
    constants::VEL_C,
    engine::{EngineError, ImagingParams, ImagingResult, Weighting},
    image::{ImageGeometry, ModelImage},
    math::{c64, cexp, rms},
    region::Region,
    vis::VisibilityDataset,
};

/// A single unflagged visibility on the uv plane.
struct Sample {
    /// \[wavelengths\]
    u: f64,
    v: f64,
    vis: c64,
    weight: f64,
}

/// Collect the unflagged corrected visibilities of a dataset that are at
/// least `params.uv_min` wavelengths long, and weight them.
fn gather_samples(
    dataset: &VisibilityDataset,
    params: &ImagingParams,
    geometry: &ImageGeometry,
) -> Vec<Sample> {
    let mut samples = vec![];
    for ((corrected_fb, flags_fb), uvs_b) in dataset
        .corrected
        .outer_iter()
        .zip(dataset.flags.outer_iter())
        .zip(dataset.uvs.outer_iter())
    {
        for ((corrected_b, flags_b), &freq) in corrected_fb
            .outer_iter()
            .zip(flags_fb.outer_iter())
            .zip(dataset.freqs.iter())
        {
            let lambda = VEL_C / freq;
            for ((&vis, &flag), uv) in corrected_b.iter().zip(flags_b.iter()).zip(uvs_b.iter()) {
                let (u, v) = (uv.u / lambda, uv.v / lambda);
                if flag || !vis.is_finite() || u.hypot(v) < params.uv_min {
                    continue;
                }
                samples.push(Sample {
                    u,
                    v,
                    vis,
                    weight: 1.0,
                });
            }
        }
    }

    match params.weighting {
        Weighting::Natural => (),
        Weighting::Uniform => density_weight(&mut samples, None, geometry),
        Weighting::Briggs { robust } => density_weight(&mut samples, Some(robust), geometry),
    }
    if let Some(taper) = params.uv_taper {
        for s in samples.iter_mut() {
            s.weight *= (-LN_2 * (s.u.hypot(s.v) / taper).powi(2)).exp();
        }
    }
    samples
}

/// Uniform (`robust` is `None`) or Briggs weighting.
fn density_weight(samples: &mut [Sample], robust: Option<f64>, geometry: &ImageGeometry) {
    // The density of samples on a grid with the image's Fourier cell size. A
    // visibility and its conjugate share a cell.
    let du = 1.0 / (geometry.size_x as f64 * geometry.cell);
    let cell_of = |s: &Sample| {
        let k = ((s.u / du).round() as i64, (s.v / du).round() as i64);
        std::cmp::max(k, (-k.0, -k.1))
    };
    let mut density: HashMap<(i64, i64), f64> = HashMap::new();
    for s in samples.iter() {
        *density.entry(cell_of(s)).or_default() += 1.0;
    }
    match robust {
        None => {
            for s in samples.iter_mut() {
                s.weight = 1.0 / density[&cell_of(&*s)];
            }
        }
        Some(robust) => {
            let sum_sq: f64 = density.values().map(|d| d * d).sum();
            let f_sq = (5.0 * 10f64.powf(-robust)).powi(2) / (sum_sq / samples.len() as f64);
            for s in samples.iter_mut() {
                s.weight = 1.0 / (1.0 + density[&cell_of(&*s)] * f_sq);
            }
        }
    }
}

/// Evaluate the weighted Fourier sum of the samples at the given direction
/// cosines. With `unit`, every visibility is replaced by one, giving the point
/// spread function. The output dimensions are (m, l).
fn fourier_sum(samples: &[Sample], ls: &[f64], ms: &[f64], unit: bool) -> Array2<f64> {
    let weight_sum: f64 = samples.iter().map(|s| s.weight).sum();
    let phasors_l = Array2::from_shape_fn((samples.len(), ls.len()), |(i, x)| {
        cexp(TAU * samples[i].u * ls[x])
    });
    let phasors_m = Array2::from_shape_fn((samples.len(), ms.len()), |(i, y)| {
        cexp(TAU * samples[i].v * ms[y])
    });

    let mut image = Array2::zeros((ms.len(), ls.len()));
    image
        .axis_iter_mut(Axis(0))
        .into_par_iter()
        .enumerate()
        .for_each(|(y, mut row)| {
            for (i, s) in samples.iter().enumerate() {
                let vis = if unit { c64::new(1.0, 0.0) } else { s.vis };
                let a = vis * s.weight * phasors_m[(i, y)];
                row.iter_mut()
                    .zip(phasors_l.row(i).iter())
                    .for_each(|(pix, p)| *pix += (a * p).re);
            }
        });
    image /= weight_sum;
    image
}

/// Högbom's clean. `psf` must have dimensions `(2 * size_y - 1, 2 * size_x -
/// 1)` with its peak in the middle. Components are only found at the `allowed`
/// pixels. Returns the components and the residual.
fn hogbom(
    mut residual: Array2<f64>,
    psf: ArrayView2<f64>,
    allowed: &[(usize, usize)],
    gain: f64,
    niter: usize,
    threshold: f64,
) -> (Array2<f64>, Array2<f64>, usize) {
    let (size_y, size_x) = residual.dim();
    let mut components = Array2::zeros(residual.dim());
    let mut iteration = 0;
    while iteration < niter {
        let peak = allowed
            .iter()
            .copied()
            .max_by(|&a, &b| residual[a].abs().total_cmp(&residual[b].abs()));
        let (y, x) = match peak {
            Some(p) => p,
            None => break,
        };
        let peak = residual[(y, x)];
        if !peak.is_finite() || peak.abs() <= threshold {
            break;
        }
        iteration += 1;

        let comp = gain * peak;
        components[(y, x)] += comp;
        let psf_patch = psf.slice(s![
            size_y - 1 - y..2 * size_y - 1 - y,
            size_x - 1 - x..2 * size_x - 1 - x
        ]);
        residual.scaled_add(-comp, &psf_patch);
    }
    (components, residual, iteration)
}

pub(super) fn image(
    dataset: &VisibilityDataset,
    mask: &Region,
    params: &ImagingParams,
) -> Result<ImagingResult, EngineError> {
    if mask.frame() != dataset.frame {
        return Err(EngineError::FrameMismatch {
            dataset: dataset.frame,
            other: mask.frame(),
            what: "the mask",
        });
    }
    if params.size == 0 || params.cell <= 0.0 || !params.cell.is_finite() {
        return Err(EngineError::BadImageGeometry {
            size: params.size,
            cell: params.cell,
        });
    }
    if let Some(taper) = params.uv_taper {
        if !(taper > 0.0) {
            return Err(EngineError::BadTaper { taper });
        }
    }
    if !params.multiscale.is_empty() {
        debug!(
            "Multiscale sizes {:?} are ignored; only point components are cleaned",
            params.multiscale
        );
    }

    let geometry = ImageGeometry::square(
        params.size,
        params.cell,
        params.phase_centre.unwrap_or_default(),
        dataset.frame,
    );
    let samples = gather_samples(dataset, params, &geometry);
    if samples.is_empty() {
        return Err(EngineError::NoData("imaging"));
    }

    let ls: Vec<f64> = (0..geometry.size_x)
        .map(|x| geometry.pixel_to_lm(x, 0).l)
        .collect();
    let ms: Vec<f64> = (0..geometry.size_y)
        .map(|y| geometry.pixel_to_lm(0, y).m)
        .collect();
    let dirty = fourier_sum(&samples, &ls, &ms, false);

    let psf_ls: Vec<f64> = (0..2 * geometry.size_x - 1)
        .map(|x| (x as f64 - (geometry.size_x - 1) as f64) * geometry.cell)
        .collect();
    let psf_ms: Vec<f64> = (0..2 * geometry.size_y - 1)
        .map(|y| (y as f64 - (geometry.size_y - 1) as f64) * geometry.cell)
        .collect();
    let psf = fourier_sum(&samples, &psf_ls, &psf_ms, true);

    let mut inside = Array2::from_elem(dirty.dim(), false);
    let mut allowed = vec![];
    for ((y, x), in_mask) in inside.indexed_iter_mut() {
        if mask.contains(geometry.pixel_to_lm(x, y)) {
            *in_mask = true;
            allowed.push((y, x));
        }
    }

    let (components, residual, num_iterations) = hogbom(
        dirty,
        psf.view(),
        &allowed,
        params.gain,
        params.niter,
        params.threshold,
    );

    let outside = residual
        .iter()
        .zip(inside.iter())
        .filter(|(_, &inside)| !inside)
        .map(|(&r, _)| r);
    let noise = if residual.iter().all(|r| r.is_finite()) {
        rms(outside)
    } else {
        f64::NAN
    };

    let mut model = ModelImage::zeros(geometry, params.nterms);
    model.terms.slice_mut(s![0, .., ..]).assign(&components);
    debug!(
        "Imaged {} visibilities on {}x{} pixels; {num_iterations} clean iterations, {:.4} Jy cleaned, noise {noise:.3e} Jy/beam",
        samples.len(),
        geometry.size_x,
        geometry.size_y,
        model.total_flux(),
    );
    trace!("Clean threshold was {:.3e} Jy/beam", params.threshold);

    Ok(ImagingResult {
        model,
        residual,
        noise,
    })
}

pub(super) fn predict(
    dataset: &mut VisibilityDataset,
    model: &ModelImage,
) -> Result<(), EngineError> {
    if model.geometry.frame != dataset.frame {
        return Err(EngineError::FrameMismatch {
            dataset: dataset.frame,
            other: model.geometry.frame,
            what: "the model",
        });
    }

    let components: Vec<_> = model
        .components()
        .map(|(lm, terms)| (lm, terms.to_vec()))
        .collect();
    let ref_freq = dataset.centroid_freq();
    let freqs = &dataset.freqs;
    dataset
        .model
        .outer_iter_mut()
        .into_par_iter()
        .zip(dataset.uvs.outer_iter().into_par_iter())
        .for_each(|(mut model_fb, uvs_b)| {
            for (mut model_b, &freq) in model_fb.outer_iter_mut().zip(freqs.iter()) {
                let lambda = VEL_C / freq;
                let x = (freq - ref_freq) / ref_freq;
                for (vis, uv) in model_b.iter_mut().zip(uvs_b.iter()) {
                    let (u, v) = (uv.u / lambda, uv.v / lambda);
                    *vis = components
                        .iter()
                        .map(|(lm, terms)| {
                            let flux: f64 = terms
                                .iter()
                                .enumerate()
                                .map(|(k, t)| t * x.powi(k as i32))
                                .sum();
                            cexp(-TAU * (u * lm.l + v * lm.m)) * flux
                        })
                        .sum();
                }
            }
        });
    trace!(
        "Predicted {} model components into the dataset",
        components.len()
    );
    Ok(())
}

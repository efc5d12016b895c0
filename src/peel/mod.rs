// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Peeling: removing one bright source by calibrating in its direction alone.
//!
//! Everything but the source is subtracted, leaving the source alone in the
//! residual. The source is calibrated, re-imaged and subtracted. The
//! direction-dependent calibration is then undone with inverted tables and
//! the rest of the sky is added back. Each step writes a new version into the
//! source's [`Workspace`], so the input dataset is never touched.

mod error;
#[cfg(test)]
mod tests;

pub use error::{PeelError, PeelSequenceError};

use log::{debug, info, warn};

use crate::{
    constants::{PEEL_CLEAN_ITERATIONS, PEEL_IMAGE_SIZES, PEEL_PHASE_INTERVAL},
    engine::{CalibrationEngine, ImagingEngine, ImagingParams, SolveParams, Weighting},
    region::{Lm, Region, SkyFrame},
    solutions::{CalibrationTable, Interpolation, SolutionInterval, SolveMode},
    store::{ArtifactId, Stage, Workspace},
};

/// The smallest standard peel image size that fits a source spanning
/// `extent` pixels.
pub fn peel_image_size(extent: usize) -> Option<usize> {
    PEEL_IMAGE_SIZES.iter().copied().find(|&size| size >= extent)
}

#[derive(Debug, Clone, PartialEq)]
pub struct PeelParams {
    /// The reference antenna of the direction-dependent solves.
    pub reference_antenna: usize,

    pub min_baselines_per_antenna: usize,

    pub weighting: Weighting,

    /// The clean threshold of the peel image \[Jy/beam\].
    pub threshold: f64,

    /// Remove the intermediate datasets, models and tables once the peel is
    /// done.
    pub cleanup: bool,
}

/// The products of one peel.
#[derive(Debug, Clone, PartialEq)]
pub struct PeelOutcome {
    /// The dataset with the source peeled; this is the workspace's current
    /// dataset.
    pub dataset: ArtifactId,

    /// The model of the peeled source.
    pub refined_model: ArtifactId,

    /// The side length of the peel image \[pixels\].
    pub image_size: usize,

    /// The centre of the peel image.
    pub phase_centre: Lm,
}

fn check_frame(dataset: SkyFrame, other: SkyFrame, what: &'static str) -> Result<(), PeelError> {
    if dataset == other {
        Ok(())
    } else {
        Err(PeelError::FrameMismatch {
            dataset,
            other,
            what,
        })
    }
}

pub struct PeelPipeline<'a, E> {
    engine: &'a E,
    params: &'a PeelParams,
}

impl<'a, E: ImagingEngine + CalibrationEngine> PeelPipeline<'a, E> {
    pub fn new(engine: &'a E, params: &'a PeelParams) -> PeelPipeline<'a, E> {
        PeelPipeline { engine, params }
    }

    /// Peel `region` out of the workspace's current dataset, using the stored
    /// model `model_id` as the full-field sky. `index` numbers this peel
    /// within the workspace. On success the peeled dataset becomes current; on
    /// failure the workspace is unchanged.
    ///
    /// If the current dataset is the output of this peel or a later one, the
    /// peel starts again from the dataset that peel started from. Peeling is
    /// therefore never applied twice, and running a peel again gives the same
    /// result as running it once.
    pub fn run(
        &self,
        workspace: &mut Workspace,
        model_id: &ArtifactId,
        region: &Region,
        index: usize,
    ) -> Result<PeelOutcome, PeelError> {
        let mut start = workspace.current().clone();
        while start.stage == Stage::Peeled && start.index >= index {
            start = workspace
                .parent(&start)
                .cloned()
                .ok_or_else(|| PeelError::UnknownOrigin {
                    dataset: start.to_string(),
                })?;
        }

        let input = workspace.datasets.get(&start)?;
        let model = workspace.models.get(model_id)?;
        check_frame(input.frame, region.frame(), "the peel region")?;
        check_frame(input.frame, model.geometry.frame, "the model")?;
        info!("Peeling '{}' from {start} with model {model_id}", region.name());

        // Geometry first, so a bad region fails before any work is done.
        let bounds = model
            .region_pixel_bounds(region)
            .ok_or_else(|| PeelError::EmptyRegion {
                region: region.name().to_string(),
            })?;
        let image_size =
            peel_image_size(bounds.extent()).ok_or_else(|| PeelError::RegionTooLarge {
                region: region.name().to_string(),
                extent: bounds.extent(),
                max: PEEL_IMAGE_SIZES[PEEL_IMAGE_SIZES.len() - 1],
            })?;
        // Keep the peel image on the model's pixel grid.
        let phase_centre = model.geometry.pixel_to_lm(
            (bounds.x_min + bounds.x_max) / 2,
            (bounds.y_min + bounds.y_max) / 2,
        );
        debug!(
            "Region '{}' spans {} pixels; peel image is {image_size} pixels centred on ({:.6}, {:.6})",
            region.name(),
            bounds.extent(),
            phase_centre.l,
            phase_centre.m
        );

        // Subtract everything outside the region.
        let mut d1 = input.clone();
        let complement = self.engine.restrict_model(model, region, true)?;
        self.engine.predict(&mut d1, &complement)?;
        self.engine.subtract(&mut d1, false);

        // Calibrate against what's inside the region.
        let mut d2 = d1.split();
        let isolated = self.engine.restrict_model(model, region, false)?;
        if isolated.components().next().is_none() {
            return Err(PeelError::NothingToPeel {
                region: region.name().to_string(),
            });
        }
        self.engine.predict(&mut d2, &isolated)?;
        let solve = |mode, interval, prior: &[(CalibrationTable, Interpolation)]| {
            let params = SolveParams {
                mode,
                interval,
                min_snr: 0.0,
                reference_antenna: self.params.reference_antenna,
                min_baselines_per_antenna: self.params.min_baselines_per_antenna,
                uv_min: 0.0,
            };
            self.engine.solve(&d2, &params, prior)
        };
        let phase = solve(
            SolveMode::Phase,
            SolutionInterval::Seconds(PEEL_PHASE_INTERVAL),
            &[],
        )?;
        let prior = [(phase, Interpolation::Linear)];
        let amplitude = solve(SolveMode::Amplitude, SolutionInterval::Infinite, &prior)?;
        let [(phase, _)] = prior;
        let forward = [
            (phase, Interpolation::Linear),
            (amplitude, Interpolation::Linear),
        ];
        self.engine.apply(&mut d2, &forward)?;

        // Re-image the source alone and subtract it.
        let mut imaging = ImagingParams::new(image_size, model.geometry.cell);
        imaging.weighting = self.params.weighting;
        imaging.niter = PEEL_CLEAN_ITERATIONS;
        imaging.threshold = self.params.threshold;
        imaging.nterms = model.num_terms();
        imaging.phase_centre = Some(phase_centre);
        let refined = self.engine.image(&d2, region, &imaging)?;
        info!(
            "Refined model of '{}' has {:.4} Jy; peel image noise {:.4e} Jy/beam",
            region.name(),
            refined.model.total_flux(),
            refined.noise
        );
        self.engine.predict(&mut d2, &refined.model)?;
        self.engine.subtract(&mut d2, false);

        // Undo the direction-dependent calibration and add the rest of the
        // sky back.
        let [(phase, _), (amplitude, _)] = forward;
        let inverse = [
            (amplitude.invert(), Interpolation::Linear),
            (phase.invert(), Interpolation::Linear),
        ];
        let mut d3 = d2.split();
        self.engine.apply(&mut d3, &inverse)?;
        self.engine.predict(&mut d3, &complement)?;
        self.engine.subtract(&mut d3, true);

        // Store everything, replacing what an earlier run of this peel left.
        if &start != workspace.current() {
            warn!(
                "{} is already peeled; peel {index} starts again from {start}",
                workspace.current()
            );
            workspace.set_current(start.clone())?;
        }
        let stale = workspace.remove_matching(|id| {
            id.index == index && (id.stage.is_peel_intermediate() || id.stage == Stage::Peeled)
        });
        if !stale.is_empty() {
            warn!(
                "Removed {} stale artefacts of an earlier peel of '{}'",
                stale.len(),
                region.name()
            );
            for id in &stale {
                debug!("Removed {id}");
            }
        }
        let [(amplitude_inv, _), (phase_inv, _)] = inverse;
        let id = |stage| workspace.id(stage, index);
        let d1_id = id(Stage::PeelSubtracted);
        let d2_id = id(Stage::PeelIsolated);
        let d3_id = id(Stage::Peeled);
        let complement_id = id(Stage::PeelComplementModel);
        let isolated_id = id(Stage::PeelIsolatedModel);
        let refined_id = id(Stage::PeelRefinedModel);
        let table_ids = [
            id(Stage::PeelPhase),
            id(Stage::PeelAmplitude),
            id(Stage::PeelPhaseInverted),
            id(Stage::PeelAmplitudeInverted),
        ];
        workspace.datasets.insert(d1_id.clone(), d1)?;
        workspace.datasets.insert(d2_id.clone(), d2)?;
        workspace.datasets.insert(d3_id.clone(), d3)?;
        workspace.models.insert(complement_id.clone(), complement)?;
        workspace.models.insert(isolated_id.clone(), isolated)?;
        workspace.models.insert(refined_id.clone(), refined.model)?;
        for (table_id, table) in table_ids
            .iter()
            .zip([phase, amplitude, phase_inv, amplitude_inv])
        {
            workspace.tables.insert(table_id.clone(), table)?;
        }
        workspace.set_parent(d3_id.clone(), start)?;
        workspace.set_current(d3_id.clone())?;

        if self.params.cleanup {
            for dataset_id in [&d1_id, &d2_id] {
                workspace.datasets.remove(dataset_id);
            }
            for model_id in [&complement_id, &isolated_id] {
                workspace.models.remove(model_id);
            }
            for table_id in &table_ids {
                workspace.tables.remove(table_id);
            }
            debug!("Cleaned up the intermediate artefacts of peel {index}");
        }

        Ok(PeelOutcome {
            dataset: d3_id,
            refined_model: refined_id,
            image_size,
            phase_centre,
        })
    }
}

/// One peel of a [`PeelSequence`] and the image made afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct PeelStep {
    pub peel: PeelOutcome,

    /// The full-field model of the peeled dataset.
    pub image: ArtifactId,

    /// The noise of the full-field image of the peeled dataset \[Jy/beam\].
    pub noise: f64,
}

/// Peels several regions of one field in order. Each peel works on the
/// output of the previous one, and its sky model is a fresh image of that
/// output.
pub struct PeelSequence<'a, E> {
    engine: &'a E,
    pipeline: PeelPipeline<'a, E>,
    mask: &'a Region,
    imaging: &'a ImagingParams,
}

impl<'a, E: ImagingEngine + CalibrationEngine> PeelSequence<'a, E> {
    /// `mask` and `imaging` are used for the full-field images between peels.
    pub fn new(
        engine: &'a E,
        params: &'a PeelParams,
        mask: &'a Region,
        imaging: &'a ImagingParams,
    ) -> PeelSequence<'a, E> {
        PeelSequence {
            engine,
            pipeline: PeelPipeline::new(engine, params),
            mask,
            imaging,
        }
    }

    /// Peel `regions` in order, starting from the stored model `model_id`. A
    /// failed peel stops the sequence; the error carries the peels that
    /// succeeded before it, and the workspace's current dataset is the output
    /// of the last of them.
    pub fn run(
        &self,
        workspace: &mut Workspace,
        model_id: &ArtifactId,
        regions: &[Region],
    ) -> Result<Vec<PeelStep>, PeelSequenceError> {
        let mut steps = Vec::with_capacity(regions.len());
        let mut model_id = model_id.clone();
        for (index, region) in regions.iter().enumerate() {
            match self.step(workspace, &model_id, region, index) {
                Ok(step) => {
                    model_id = step.image.clone();
                    steps.push(step);
                }
                Err(err) => {
                    return Err(PeelSequenceError {
                        index,
                        region: region.name().to_string(),
                        completed: steps,
                        err,
                    })
                }
            }
        }
        Ok(steps)
    }

    fn step(
        &self,
        workspace: &mut Workspace,
        model_id: &ArtifactId,
        region: &Region,
        index: usize,
    ) -> Result<PeelStep, PeelError> {
        let peel = self.pipeline.run(workspace, model_id, region, index)?;

        let result = self
            .engine
            .image(workspace.current_dataset()?, self.mask, self.imaging)?;
        info!(
            "Image after peeling '{}' has noise {:.4e} Jy/beam",
            region.name(),
            result.noise
        );
        let image_id = workspace.id(Stage::PeelImage, index);
        workspace.models.remove(&image_id);
        workspace.models.insert(image_id.clone(), result.model)?;

        Ok(PeelStep {
            peel,
            image: image_id,
            noise: result.noise,
        })
    }
}

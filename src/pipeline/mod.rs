// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Processing every source of an observation, each in its own [`Workspace`]:
//! self-calibration, peeling, subtraction of compact sources and a final
//! low-resolution image.

mod config;
mod error;

pub use config::{ImagingConfig, ObservationConfig, SelfCalConfig, SourceConfig, SubtractConfig};
pub use error::{ConfigError, PipelineError};

use std::{
    fs::File,
    io::BufWriter,
    path::{Path, PathBuf},
};

use log::{debug, info, warn};
use rayon::prelude::*;
use serde::Serialize;

use crate::{
    constants::{HIRES_CLEAN_ITERATIONS, HIRES_ROBUST_OFFSET},
    engine::{CalibrationEngine, EngineError, ImagingEngine, ImagingParams, Weighting},
    peel::{PeelParams, PeelSequence, PeelSequenceError, PeelStep},
    refant::RefAntPolicy,
    region::Region,
    selfcal::{SelfCalLoop, SelfCalOutcome, SelfCalParams, SelfCalSchedule, Termination},
    solutions::CalibrationLog,
    store::{Stage, Workspace},
    vis::VisibilityDataset,
};

/// The fewest unflagged baselines an antenna needs to be calibrated.
pub fn min_baselines_per_antenna(num_antennas: usize) -> usize {
    (num_antennas / 4).max(3)
}

/// A source ready to be processed.
#[derive(Debug, Clone)]
pub struct Source {
    pub name: String,

    /// \[Jy/beam\]
    pub expected_noise: f64,

    pub mask: Region,

    pub peel: Vec<Region>,

    pub imaging: ImagingParams,

    pub refant: RefAntPolicy,

    pub selfcal: SelfCalConfig,

    pub subtract: Option<Subtraction>,

    /// The taper of a final low-resolution image \[wavelengths\]. `None` means
    /// no such image is made.
    pub lowres_taper: Option<f64>,

    pub cleanup: bool,
}

/// Compact sources to subtract after peeling.
#[derive(Debug, Clone)]
pub struct Subtraction {
    pub region: Region,

    /// Baselines shorter than this aren't imaged \[wavelengths\].
    pub uv_min: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    SelfCal,
    Peel,
    Subtract,
    LowRes,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Failure {
    pub stage: PipelineStage,

    /// Which peel failed, counting from zero.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub peel: Option<usize>,

    /// The region being worked on.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,

    pub error: String,
}

impl Failure {
    fn new(stage: PipelineStage, error: &PipelineError) -> Failure {
        let (peel, region) = match error {
            PipelineError::Peel { index, region, .. } => (Some(*index), Some(region.clone())),
            PipelineError::Subtract { region, .. } => (None, Some(region.clone())),
            _ => (None, None),
        };
        Failure {
            stage,
            peel,
            region,
            error: error.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SelfCalReport {
    /// The image noise of every cycle that ran \[Jy/beam\].
    pub noise_history: Vec<f64>,
    pub accepted_cycles: usize,
    pub num_tables: usize,
    pub termination: Termination,
}

impl From<&SelfCalOutcome> for SelfCalReport {
    fn from(outcome: &SelfCalOutcome) -> Self {
        SelfCalReport {
            noise_history: outcome.noise_history.clone(),
            accepted_cycles: outcome.accepted_cycles,
            num_tables: outcome.log.len(),
            termination: outcome.termination.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PeelReport {
    pub region: String,
    pub dataset: String,
    pub image_size: usize,

    /// The noise of the full-field image after this peel \[Jy/beam\].
    pub noise: f64,
}

impl PeelReport {
    fn new(region: &Region, step: &PeelStep) -> PeelReport {
        PeelReport {
            region: region.name().to_string(),
            dataset: step.peel.dataset.to_string(),
            image_size: step.peel.image_size,
            noise: step.noise,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubtractReport {
    pub region: String,
    pub dataset: String,

    /// The flux subtracted \[Jy\].
    pub flux: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LowResReport {
    pub model: String,

    /// \[wavelengths\]
    pub taper: f64,

    /// \[Jy/beam\]
    pub noise: f64,
}

/// What happened to a source.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceReport {
    pub name: String,

    /// `None` if self-calibration never ran.
    pub selfcal: Option<SelfCalReport>,

    /// The peels that succeeded.
    pub peels: Vec<PeelReport>,

    pub subtract: Option<SubtractReport>,

    pub lowres: Option<LowResReport>,

    /// `None` if the source was processed successfully.
    pub failure: Option<Failure>,
}

/// Everything left by processing one source.
pub struct SourceRun {
    pub workspace: Workspace,

    /// The accepted self-calibration tables.
    pub log: CalibrationLog,

    pub report: SourceReport,

    pub result: Result<(), PipelineError>,
}

impl SourceRun {
    /// Write the report and every calibration table still in the workspace
    /// into `dir`. The written files are returned.
    pub fn write_outputs(&self, dir: &Path) -> Result<Vec<PathBuf>, PipelineError> {
        let mut written = vec![];

        let report = dir.join(format!("{}_report.json", self.report.name));
        serde_json::to_writer_pretty(BufWriter::new(File::create(&report)?), &self.report)?;
        written.push(report);

        for id in self.workspace.tables.ids() {
            let file = dir.join(format!("{}.json", id.file_stem()));
            self.workspace.tables.get(id)?.write(&file)?;
            written.push(file);
        }

        for file in &written {
            debug!("Wrote {}", file.display());
        }
        Ok(written)
    }
}

/// Self-calibrate `dataset`, peel the source's regions from it, subtract its
/// compact sources and make its low-resolution image. The dataset itself is
/// untouched; every product lands in a new workspace. A failure is recorded
/// in the returned report.
pub fn run_source<E: ImagingEngine + CalibrationEngine>(
    engine: &E,
    source: &Source,
    dataset: &VisibilityDataset,
) -> SourceRun {
    info!("Processing source '{}'", source.name);
    let mut workspace = Workspace::new(&source.name, dataset.clone());
    let mut log = CalibrationLog::new();
    let mut report = SourceReport {
        name: source.name.clone(),
        selfcal: None,
        peels: vec![],
        subtract: None,
        lowres: None,
        failure: None,
    };

    let mut stage = PipelineStage::SelfCal;
    let result = process(
        engine,
        source,
        &mut workspace,
        &mut log,
        &mut report,
        &mut stage,
    );
    match &result {
        Ok(()) => info!("Source '{}' done", source.name),
        Err(e) => {
            warn!("Source '{}' failed: {e}", source.name);
            report.failure = Some(Failure::new(stage, e));
        }
    }

    SourceRun {
        workspace,
        log,
        report,
        result,
    }
}

fn process<E: ImagingEngine + CalibrationEngine>(
    engine: &E,
    source: &Source,
    workspace: &mut Workspace,
    log: &mut CalibrationLog,
    report: &mut SourceReport,
    stage: &mut PipelineStage,
) -> Result<(), PipelineError> {
    let min_baselines = min_baselines_per_antenna(workspace.current_dataset()?.num_antennas());

    // Self-calibrate a copy of the corrected data.
    *stage = PipelineStage::SelfCal;
    let selfcal_id = workspace.id(Stage::SelfCal, 0);
    let split = workspace.current_dataset()?.split();
    workspace.datasets.insert(selfcal_id.clone(), split)?;
    workspace.set_parent(selfcal_id.clone(), workspace.current().clone())?;
    workspace.set_current(selfcal_id)?;

    let dataset = workspace.current_dataset_mut()?;
    let schedule = SelfCalSchedule::standard(dataset.centroid_freq(), source.selfcal.cycles);
    let mut params = SelfCalParams::new(
        source.imaging.clone(),
        source.expected_noise,
        schedule,
        min_baselines,
    );
    params.tolerance = source.selfcal.tolerance;
    params.uv_min = source.selfcal.uv_min;
    params.refant = source.refant;
    let outcome = SelfCalLoop::new(engine, &source.mask, &params).run(dataset);
    let flags = dataset.save_flags();

    report.selfcal = Some(SelfCalReport::from(&outcome));
    let flags_id = workspace.id(Stage::SelfCalFlags, 0);
    workspace.flags.insert(flags_id, flags)?;
    for (i, (table, _)) in outcome.log.entries().iter().enumerate() {
        let table_id = workspace.id(Stage::SelfCalTable, i);
        workspace.tables.insert(table_id, table.clone())?;
    }
    let SelfCalOutcome {
        model,
        log: selfcal_log,
        termination,
        ..
    } = outcome;
    *log = selfcal_log;

    let model = match model {
        Some(m) => m,
        None => {
            return Err(PipelineError::NoModel {
                name: source.name.clone(),
                reason: match termination {
                    Termination::ImagingFailed { error, .. } => error,
                    other => format!("{other:?}"),
                },
            })
        }
    };
    let model_id = workspace.id(Stage::SelfCalModel, 0);
    workspace.models.insert(model_id.clone(), model)?;

    // Peel with the self-calibrated data as the starting point.
    if !source.peel.is_empty() {
        *stage = PipelineStage::Peel;
        let reference_antenna = source.refant.choose(workspace.current_dataset()?);
        let peel_params = PeelParams {
            reference_antenna,
            min_baselines_per_antenna: min_baselines,
            weighting: source.imaging.weighting,
            threshold: source.expected_noise,
            cleanup: source.cleanup,
        };
        let mut imaging = source.imaging.clone();
        imaging.threshold = source.expected_noise;
        let peel_reports = |steps: &[PeelStep]| -> Vec<PeelReport> {
            source
                .peel
                .iter()
                .zip(steps)
                .map(|(region, step)| PeelReport::new(region, step))
                .collect()
        };
        match PeelSequence::new(engine, &peel_params, &source.mask, &imaging).run(
            workspace,
            &model_id,
            &source.peel,
        ) {
            Ok(steps) => report.peels = peel_reports(&steps),
            Err(PeelSequenceError {
                index,
                region,
                completed,
                err,
            }) => {
                report.peels = peel_reports(&completed);
                return Err(PipelineError::Peel {
                    name: source.name.clone(),
                    index,
                    region,
                    err,
                });
            }
        }
    }

    if let Some(subtraction) = &source.subtract {
        *stage = PipelineStage::Subtract;
        report.subtract = Some(subtract_compact(engine, source, subtraction, workspace)?);
    }

    if let Some(taper) = source.lowres_taper {
        *stage = PipelineStage::LowRes;
        report.lowres = Some(image_lowres(engine, source, taper, workspace)?);
    }

    Ok(())
}

/// Subtract the compact sources inside a region from the current dataset.
/// They are found in an image made only of the long baselines with a lower
/// robustness, and that image's model is then restricted to the region. The
/// subtracted dataset becomes current.
fn subtract_compact<E: ImagingEngine + CalibrationEngine>(
    engine: &E,
    source: &Source,
    subtraction: &Subtraction,
    workspace: &mut Workspace,
) -> Result<SubtractReport, PipelineError> {
    let region = &subtraction.region;
    let subtract_error = |err: EngineError| PipelineError::Subtract {
        name: source.name.clone(),
        region: region.name().to_string(),
        err,
    };

    let mut hires = source.imaging.clone();
    if let Weighting::Briggs { robust } = hires.weighting {
        hires.weighting = Weighting::Briggs {
            robust: robust - HIRES_ROBUST_OFFSET,
        };
    }
    hires.uv_min = subtraction.uv_min;
    hires.niter = HIRES_CLEAN_ITERATIONS;
    hires.multiscale.clear();
    hires.threshold = source.expected_noise;

    let mut dataset = workspace.current_dataset()?.split();
    let image = engine
        .image(&dataset, &source.mask, &hires)
        .map_err(subtract_error)?;
    let compact = engine
        .restrict_model(&image.model, region, false)
        .map_err(subtract_error)?;
    engine
        .predict(&mut dataset, &compact)
        .map_err(subtract_error)?;
    engine.subtract(&mut dataset, false);
    let flux = compact.total_flux();
    info!(
        "Subtracted {flux:.4} Jy of compact sources in '{}' from {}",
        region.name(),
        workspace.current()
    );

    let parent = workspace.current().clone();
    let model_id = workspace.id(Stage::SubtractModel, 0);
    let dataset_id = workspace.id(Stage::Subtracted, 0);
    workspace.models.insert(model_id, image.model)?;
    workspace.datasets.insert(dataset_id.clone(), dataset)?;
    workspace.set_parent(dataset_id.clone(), parent)?;
    workspace.set_current(dataset_id.clone())?;

    Ok(SubtractReport {
        region: region.name().to_string(),
        dataset: dataset_id.to_string(),
        flux,
    })
}

/// Image the current dataset with a Gaussian uv taper, bringing out extended
/// emission.
fn image_lowres<E: ImagingEngine>(
    engine: &E,
    source: &Source,
    taper: f64,
    workspace: &mut Workspace,
) -> Result<LowResReport, PipelineError> {
    let mut params = source.imaging.clone();
    params.uv_taper = Some(taper);
    params.threshold = source.expected_noise;
    let result = engine
        .image(workspace.current_dataset()?, &source.mask, &params)
        .map_err(|err| PipelineError::LowRes {
            name: source.name.clone(),
            err,
        })?;
    info!(
        "Low-resolution image of '{}' ({taper} wavelength taper) has noise {:.4e} Jy/beam",
        source.name, result.noise
    );

    let model_id = workspace.id(Stage::LowResModel, 0);
    workspace.models.insert(model_id.clone(), result.model)?;
    Ok(LowResReport {
        model: model_id.to_string(),
        taper,
        noise: result.noise,
    })
}

/// Process every source. A failing source doesn't stop the others. With
/// `parallel`, sources are processed concurrently, each with its own
/// workspace.
pub fn run_sources<E>(
    engine: &E,
    sources: &[Source],
    dataset: &VisibilityDataset,
    parallel: bool,
) -> Vec<SourceRun>
where
    E: ImagingEngine + CalibrationEngine + Sync,
{
    let runs: Vec<SourceRun> = if parallel {
        sources
            .par_iter()
            .map(|source| run_source(engine, source, dataset))
            .collect()
    } else {
        sources
            .iter()
            .map(|source| run_source(engine, source, dataset))
            .collect()
    };

    let num_failed = runs.iter().filter(|r| r.result.is_err()).count();
    if num_failed == 0 {
        info!("All {} sources were processed", runs.len());
    } else {
        warn!("{num_failed} of {} sources failed", runs.len());
    }
    runs
}

// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Iterative self-calibration.
//!
//! Each cycle images the corrected data, judges the image by the noise outside
//! the mask, and (if the image is good enough and more cycles remain) derives
//! gain solutions against the new model and applies the accumulated
//! calibration. A cycle whose noise is worse than the previous cycle's by more
//! than the tolerance is rejected: the data go back to how they were when the
//! previous cycle's image was made and the loop stops.

mod schedule;

pub use schedule::{SelfCalSchedule, SolveStep};

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use log::{debug, info, warn};
use serde::Serialize;

use crate::{
    constants::{DEFAULT_SELFCAL_UV_MIN, NOISE_TOLERANCE},
    engine::{CalibrationEngine, EngineError, ImagingEngine, ImagingParams, SolveParams},
    image::ModelImage,
    refant::RefAntPolicy,
    region::Region,
    solutions::{CalibrationLog, Checkpoint, Interpolation},
    vis::{FlagVersion, VisibilityDataset},
    PROGRESS_BARS,
};

/// Where the self-calibration loop is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelfCalState {
    /// Cycle 0; there is no previous image to compare against.
    Bootstrap,

    /// An intermediate cycle.
    Refine(usize),

    /// The last cycle, which only images.
    Final(usize),

    /// Stopped after restoring the calibration state of this checkpoint.
    RolledBack(usize),

    /// Every cycle was accepted.
    Converged,
}

impl SelfCalState {
    /// The cycle this state images, if it images at all.
    pub fn cycle(self) -> Option<usize> {
        match self {
            SelfCalState::Bootstrap => Some(0),
            SelfCalState::Refine(n) | SelfCalState::Final(n) => Some(n),
            SelfCalState::RolledBack(_) | SelfCalState::Converged => None,
        }
    }

    /// The state after this state's image has been judged. A rejected image
    /// rolls back to the checkpoint of the previous cycle.
    pub fn next(self, accepted: bool, num_cycles: usize) -> SelfCalState {
        let cycle = match self.cycle() {
            Some(c) => c,
            None => return self,
        };
        let last = num_cycles.saturating_sub(1);
        if !accepted {
            SelfCalState::RolledBack(cycle.saturating_sub(1))
        } else if cycle >= last {
            SelfCalState::Converged
        } else if cycle + 1 == last {
            SelfCalState::Final(cycle + 1)
        } else {
            SelfCalState::Refine(cycle + 1)
        }
    }
}

/// Why the loop stopped.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum Termination {
    /// All cycles were accepted.
    Completed,

    /// The image noise of `cycle` was worse than `previous_noise` by more
    /// than the tolerance.
    Regressed {
        cycle: usize,
        previous_noise: f64,
        noise: f64,
    },

    /// The imaging engine failed on `cycle`.
    ImagingFailed { cycle: usize, error: String },

    /// The gains after the image of `cycle` couldn't be solved or applied.
    SolveFailed { cycle: usize, error: String },
}

/// What self-calibration leaves behind. The dataset passed to
/// [`SelfCalLoop::run`] is left calibrated with `log`.
#[derive(Debug, Clone)]
pub struct SelfCalOutcome {
    /// The model of the last accepted image. `None` only if the first image
    /// couldn't be made.
    pub model: Option<ModelImage>,

    /// The accepted calibration tables.
    pub log: CalibrationLog,

    /// The image noise of every cycle that ran, including a rejected one.
    pub noise_history: Vec<f64>,

    pub accepted_cycles: usize,

    pub termination: Termination,

    pub final_state: SelfCalState,
}

#[derive(Debug, Clone)]
pub struct SelfCalParams {
    /// Imaging parameters; the clean threshold is set per cycle.
    pub imaging: ImagingParams,

    /// The thermal noise expected in the final image \[Jy/beam\].
    pub expected_noise: f64,

    pub schedule: SelfCalSchedule,

    /// A cycle is rejected if its noise exceeds the previous cycle's noise
    /// multiplied by this.
    pub tolerance: f64,

    pub refant: RefAntPolicy,

    pub min_baselines_per_antenna: usize,

    /// \[metres\]
    pub uv_min: f64,
}

impl SelfCalParams {
    pub fn new(
        imaging: ImagingParams,
        expected_noise: f64,
        schedule: SelfCalSchedule,
        min_baselines_per_antenna: usize,
    ) -> SelfCalParams {
        SelfCalParams {
            imaging,
            expected_noise,
            schedule,
            tolerance: NOISE_TOLERANCE,
            refant: RefAntPolicy::default(),
            min_baselines_per_antenna,
            uv_min: DEFAULT_SELFCAL_UV_MIN,
        }
    }
}

/// The calibration state at the start of a cycle.
struct CycleCheckpoint {
    flags: FlagVersion,
    log: Checkpoint,
}

pub struct SelfCalLoop<'a, E> {
    engine: &'a E,
    mask: &'a Region,
    params: &'a SelfCalParams,
}

impl<'a, E: ImagingEngine + CalibrationEngine> SelfCalLoop<'a, E> {
    pub fn new(engine: &'a E, mask: &'a Region, params: &'a SelfCalParams) -> SelfCalLoop<'a, E> {
        SelfCalLoop {
            engine,
            mask,
            params,
        }
    }

    /// Self-calibrate `dataset` in place. This never fails; in the worst case
    /// the dataset is left uncalibrated with its original flags.
    pub fn run(&self, dataset: &mut VisibilityDataset) -> SelfCalOutcome {
        let num_cycles = self.params.schedule.num_cycles();
        let progress = ProgressBar::with_draw_target(
            Some(num_cycles as u64),
            if PROGRESS_BARS.load() {
                ProgressDrawTarget::stdout()
            } else {
                ProgressDrawTarget::hidden()
            },
        )
        .with_style(
            ProgressStyle::default_bar()
                .template("{msg}: [{wide_bar:.blue}] {pos:2}/{len:2} cycles ({elapsed_precise})")
                .unwrap()
                .progress_chars("=> "),
        )
        .with_position(0)
        .with_message("Self-calibrating");

        let mut state = SelfCalState::Bootstrap;
        let mut log = CalibrationLog::new();
        let mut checkpoints: Vec<CycleCheckpoint> = Vec::with_capacity(num_cycles);
        let mut noise_history = Vec::with_capacity(num_cycles);
        let mut model = None;
        let mut accepted_cycles = 0;
        let mut termination = Termination::Completed;

        while let Some(cycle) = state.cycle() {
            checkpoints.push(CycleCheckpoint {
                flags: dataset.save_flags(),
                log: log.checkpoint(),
            });

            let mut imaging = self.params.imaging.clone();
            imaging.threshold = self
                .params
                .schedule
                .clean_threshold(cycle, self.params.expected_noise);
            debug!("Cycle {cycle}: cleaning to {:.3e} Jy/beam", imaging.threshold);

            let (noise, accepted) = match self.engine.image(dataset, self.mask, &imaging) {
                Ok(result) => {
                    let noise = result.noise;
                    // NaN never compares as an improvement.
                    let accepted = match noise_history.last() {
                        None => true,
                        Some(&previous) => noise <= self.params.tolerance * previous,
                    };
                    if accepted {
                        model = Some(result.model);
                    }
                    (noise, accepted)
                }
                Err(e) => {
                    warn!("Cycle {cycle}: imaging failed: {e}");
                    termination = Termination::ImagingFailed {
                        cycle,
                        error: e.to_string(),
                    };
                    (f64::NAN, false)
                }
            };
            let previous_noise = noise_history.last().copied();
            noise_history.push(noise);
            if accepted {
                accepted_cycles += 1;
                match previous_noise {
                    Some(previous) => info!(
                        "Cycle {cycle}: image noise {noise:.4e} Jy/beam (was {previous:.4e})"
                    ),
                    None => info!("Cycle {cycle}: image noise {noise:.4e} Jy/beam"),
                }
            } else if let Some(previous) = previous_noise {
                if !matches!(termination, Termination::ImagingFailed { .. }) {
                    warn!(
                        "Cycle {cycle}: image noise {noise:.4e} Jy/beam is worse than {previous:.4e}; rolling back"
                    );
                    termination = Termination::Regressed {
                        cycle,
                        previous_noise: previous,
                        noise,
                    };
                }
            }

            let mut next = state.next(accepted, num_cycles);
            match next {
                SelfCalState::RolledBack(k) => self.restore(dataset, &mut log, &checkpoints[k]),

                SelfCalState::Refine(_) | SelfCalState::Final(_) => {
                    let solved = match model.as_ref() {
                        Some(m) => self.calibrate(dataset, &mut log, m, cycle),
                        None => Err(EngineError::NoData("model")),
                    };
                    if let Err(e) = solved {
                        warn!("Cycle {cycle}: calibration failed: {e}; stopping");
                        self.restore(dataset, &mut log, &checkpoints[cycle]);
                        termination = Termination::SolveFailed {
                            cycle,
                            error: e.to_string(),
                        };
                        next = SelfCalState::RolledBack(cycle);
                    }
                }

                SelfCalState::Bootstrap | SelfCalState::Converged => (),
            }

            progress.inc(1);
            state = next;
        }

        progress.abandon_with_message(match state {
            SelfCalState::Converged => "Self-calibration converged",
            _ => "Self-calibration stopped early",
        });
        info!(
            "Self-calibration accepted {accepted_cycles} of {num_cycles} cycles with {} tables",
            log.len()
        );

        SelfCalOutcome {
            model,
            log,
            noise_history,
            accepted_cycles,
            termination,
            final_state: state,
        }
    }

    /// Solve the gains of this cycle against `model` and apply everything
    /// solved so far.
    fn calibrate(
        &self,
        dataset: &mut VisibilityDataset,
        log: &mut CalibrationLog,
        model: &ModelImage,
        cycle: usize,
    ) -> Result<(), EngineError> {
        self.engine.predict(dataset, model)?;
        let reference_antenna = self.params.refant.choose(dataset);
        for step in self.params.schedule.solves(cycle) {
            let params = SolveParams {
                mode: step.mode,
                interval: step.interval,
                min_snr: step.min_snr,
                reference_antenna,
                min_baselines_per_antenna: self.params.min_baselines_per_antenna,
                uv_min: self.params.uv_min,
            };
            debug!(
                "Cycle {cycle}: solving '{}' gains every {} with a minimum SNR of {}",
                step.mode, step.interval, step.min_snr
            );
            let table = self.engine.solve(dataset, &params, log.entries())?;
            log.push(table, Interpolation::Linear);
        }
        self.engine.apply(dataset, log.entries())
    }

    /// Put back the flags and calibration of a checkpoint.
    fn restore(
        &self,
        dataset: &mut VisibilityDataset,
        log: &mut CalibrationLog,
        checkpoint: &CycleCheckpoint,
    ) {
        if let Err(e) = dataset.restore_flags(&checkpoint.flags) {
            warn!("Couldn't restore flags: {e}");
        }
        log.truncate(checkpoint.log);
        if log.is_empty() {
            self.engine.clear_calibration(dataset);
        } else if let Err(e) = self.engine.apply(dataset, log.entries()) {
            warn!("Couldn't re-apply {} tables: {e}; clearing calibration", log.len());
            log.clear();
            self.engine.clear_calibration(dataset);
        }
        debug!("Restored calibration with {} tables", log.len());
    }
}

// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Self-calibrate and peel every source of an observation.

use std::path::PathBuf;

use clap::Parser;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::common::{InfoPrinter, ARG_FILE_HELP};
use crate::{
    engine::sim::SimEngine,
    pipeline::{run_sources, ObservationConfig},
    PeelcalError,
};

const DEFAULT_OUTPUT_DIR: &str = ".";

lazy_static::lazy_static! {
    static ref OUTPUT_DIR_HELP: String =
        format!("The directory to write per-source reports and calibration tables into. Default: {DEFAULT_OUTPUT_DIR}");
}

#[derive(Error, Debug)]
pub(super) enum RunArgsError {
    #[error("No observation file was supplied")]
    NoObservation,

    #[error("{num_failed} of {num_sources} sources failed; their reports say why")]
    SourcesFailed {
        num_failed: usize,
        num_sources: usize,
    },
}

#[derive(Parser, Debug, Clone, Default, Serialize, Deserialize)]
pub(super) struct RunArgs {
    #[clap(name = "ARGUMENTS_FILE", help = ARG_FILE_HELP.as_str(), parse(from_os_str))]
    args_file: Option<PathBuf>,

    /// The observation file listing what to simulate and which sources to
    /// process. Supported formats: toml, json
    #[clap(short = 'i', long, parse(from_os_str), help_heading = "INPUT FILES")]
    observation: Option<PathBuf>,

    #[clap(short, long, parse(from_os_str), help = OUTPUT_DIR_HELP.as_str(), help_heading = "OUTPUT FILES")]
    output_dir: Option<PathBuf>,

    /// Process sources concurrently.
    #[clap(long)]
    #[serde(default)]
    parallel: bool,

    /// Keep the intermediate datasets, models and tables of every peel,
    /// regardless of what the observation file says.
    #[clap(long)]
    #[serde(default)]
    keep_intermediates: bool,
}

impl RunArgs {
    /// Both command-line and file arguments overlap in terms of what is
    /// available; this function consolidates everything that was specified into
    /// a single struct. Where applicable, it will prefer CLI parameters over
    /// those in the file.
    pub(super) fn merge(self) -> Result<RunArgs, PeelcalError> {
        debug!("Merging command-line arguments with the argument file");

        let cli_args = self;

        if let Some(arg_file) = cli_args.args_file {
            // Ensure all of the file args are accounted for by pattern
            // matching.
            let RunArgs {
                args_file: _,
                observation,
                output_dir,
                parallel,
                keep_intermediates,
            } = unpack_arg_file!(arg_file);

            Ok(RunArgs {
                args_file: None,
                observation: cli_args.observation.or(observation),
                output_dir: cli_args.output_dir.or(output_dir),
                parallel: cli_args.parallel || parallel,
                keep_intermediates: cli_args.keep_intermediates || keep_intermediates,
            })
        } else {
            Ok(cli_args)
        }
    }

    pub(super) fn run(self, dry_run: bool) -> Result<(), PeelcalError> {
        let RunArgs {
            args_file: _,
            observation,
            output_dir,
            parallel,
            keep_intermediates,
        } = self;

        let observation = observation.ok_or(RunArgsError::NoObservation)?;
        let config = ObservationConfig::read(&observation)?;
        let mut sources = config.sources()?;
        if keep_intermediates {
            for source in &mut sources {
                source.cleanup = false;
            }
        }
        let output_dir = output_dir.unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_DIR));

        let mut printer = InfoPrinter::new(format!("Sources of {}", observation.display()).into());
        for source in &sources {
            let mut block = vec![format!(
                "{}: expected noise {:.3e} Jy/beam, {} self-cal cycles, {}x{} pixel images",
                source.name,
                source.expected_noise,
                source.selfcal.cycles,
                source.imaging.size,
                source.imaging.size
            )
            .into()];
            for region in &source.peel {
                block.push(format!("peel '{}'", region.name()).into());
            }
            if let Some(subtraction) = &source.subtract {
                block.push(
                    format!(
                        "subtract compact sources in '{}' (baselines above {} wavelengths)",
                        subtraction.region.name(),
                        subtraction.uv_min
                    )
                    .into(),
                );
            }
            if let Some(taper) = source.lowres_taper {
                block.push(format!("low-resolution image with a {taper} wavelength taper").into());
            }
            printer.push_block(block);
        }
        printer.display();
        info!(
            "{} antennas, {} timesteps, {} channels; phase centre {}",
            config.simulation.antennas.len(),
            config.simulation.num_timesteps,
            config.simulation.freqs.len(),
            config.simulation.frame()
        );

        if dry_run {
            info!("Dry run -- exiting now.");
            return Ok(());
        }

        let simulation = config.simulation.simulate()?;
        std::fs::create_dir_all(&output_dir)?;
        let runs = run_sources(
            &SimEngine::default(),
            &sources,
            &simulation.dataset,
            parallel,
        );

        let mut num_failed = 0;
        for run in &runs {
            let written = run.write_outputs(&output_dir)?;
            info!(
                "Wrote {} files for '{}' into {}",
                written.len(),
                run.report.name,
                output_dir.display()
            );
            if let Some(failure) = &run.report.failure {
                num_failed += 1;
                warn!("'{}' failed: {}", run.report.name, failure.error);
            }
        }

        if num_failed > 0 {
            return Err(RunArgsError::SourcesFailed {
                num_failed,
                num_sources: runs.len(),
            }
            .into());
        }
        Ok(())
    }
}

// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Code to invert calibration tables.

use std::path::PathBuf;

use clap::Parser;
use log::info;

use super::PeelcalError;
use crate::solutions::CalibrationTable;

#[derive(Parser, Debug)]
pub(super) struct SolutionsInvertArgs {
    /// The calibration table to invert.
    #[clap(name = "INPUT_TABLE", parse(from_os_str))]
    input: PathBuf,

    /// Where to write the inverted table. Supported formats: json
    #[clap(name = "OUTPUT_TABLE", parse(from_os_str))]
    output: PathBuf,
}

impl SolutionsInvertArgs {
    pub(super) fn run(self, dry_run: bool) -> Result<(), PeelcalError> {
        let table = CalibrationTable::read(&self.input)?;
        let (num_blocks, num_antennas, num_chans) = table.dim();
        info!(
            "Read '{}' gains from {}: {num_blocks} timeblocks, {num_antennas} antennas, {num_chans} channels",
            table.mode,
            self.input.display()
        );
        let num_zero = table.gains.iter().filter(|g| g.norm() == 0.0).count();
        if num_zero > 0 {
            info!("{num_zero} gains are zero and stay zero");
        }
        if dry_run {
            info!("Dry run -- not writing {}", self.output.display());
            return Ok(());
        }

        table.invert().write(&self.output)?;
        info!("Wrote inverted table to {}", self.output.display());
        Ok(())
    }
}

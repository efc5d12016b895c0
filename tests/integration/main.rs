// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Integration tests.
//!
//! Some help for laying out these tests was taken from:
//! https://matklad.github.io/2021/02/27/delete-cargo-integration-tests.html

mod no_stderr;
mod run;
mod solutions_invert;

use std::{
    fs,
    path::{Path, PathBuf},
    process::Output,
    str::from_utf8,
};

use assert_cmd::{output::OutputError, Command};
use indoc::indoc;

fn peelcal() -> Command {
    Command::cargo_bin("peelcal").unwrap()
}

fn get_cmd_output(result: Result<Output, OutputError>) -> (String, String) {
    let output = match result {
        Ok(o) => o,
        Err(o) => o.as_output().unwrap().clone(),
    };
    (
        from_utf8(&output.stdout).unwrap().to_string(),
        from_utf8(&output.stderr).unwrap().to_string(),
    )
}

/// A small simulated field of a 20 Jy and a 5 Jy source with antenna phase
/// errors. Its one source peels the brighter of the two.
const OBSERVATION: &str = indoc! {r#"
    [simulation]
    ra = 60.0
    dec = -30.0
    num_timesteps = 6
    time_res = 300.0
    freqs = [150e6, 160e6]
    phase_error = 0.5
    noise = 0.05
    seed = 7
    antennas = [
        { name = "ANT00", east = 0.0, north = 0.0 },
        { name = "ANT01", east = 37.0, north = 12.0 },
        { name = "ANT02", east = -52.0, north = 31.0 },
        { name = "ANT03", east = 88.0, north = -45.0 },
        { name = "ANT04", east = -15.0, north = -96.0 },
        { name = "ANT05", east = 121.0, north = 70.0 },
        { name = "ANT06", east = -134.0, north = -20.0 },
        { name = "ANT07", east = 60.0, north = 140.0 },
    ]
    components = [
        { l = 0.9167, m = 0.6875, flux = 20.0 },
        { l = -1.0313, m = -0.4584, flux = 5.0 },
    ]

    [imaging]
    size = 64
    cell = 412.5
    niter = 1000
    weighting = { type = "natural" }

    [selfcal]
    cycles = 3

    [[sources]]
    name = "field"
    expected_noise = 0.01
    mask = [
        { type = "circle", centre = [0.9167, 0.6875], radius = 0.3 },
        { type = "circle", centre = [-1.0313, -0.4584], radius = 0.3 },
    ]
    peel = [
        { name = "bright", shapes = [{ type = "circle", centre = [0.9167, 0.6875], radius = 0.3 }] },
    ]
"#};

/// Write the observation file into `dir`.
fn write_observation(dir: &Path) -> PathBuf {
    let file = dir.join("obs.toml");
    fs::write(&file, OBSERVATION).unwrap();
    file
}

// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Tests of the `solutions-invert` subcommand.

use approx::assert_abs_diff_eq;
use num_complex::Complex;
use peelcal::solutions::{CalibrationTable, SolveMode};
use tempfile::TempDir;
use vec1::vec1;

use crate::{get_cmd_output, peelcal};

#[test]
fn test_solutions_invert() {
    let tmp_dir = TempDir::new().expect("couldn't make tmp dir");
    let input = tmp_dir.path().join("table.json");
    let output = tmp_dir.path().join("inverted.json");

    let mut table = CalibrationTable::identity(SolveMode::AmplitudePhase, vec1![0.0, 600.0], 3, 2);
    table.gains[(0, 1, 0)] = Complex::new(0.0, 2.0);
    table.gains[(1, 2, 1)] = Complex::new(0.0, 0.0);
    table.flags[(1, 2, 1)] = true;
    table.write(&input).unwrap();

    #[rustfmt::skip]
    let cmd = peelcal()
        .args([
            "solutions-invert",
            &format!("{}", input.display()),
            &format!("{}", output.display()),
        ])
        .ok();
    assert!(cmd.is_ok(), "solutions-invert failed: {}", cmd.err().unwrap());
    let (stdout, stderr) = get_cmd_output(cmd);
    assert!(stderr.is_empty(), "stderr wasn't empty: {stderr}");
    assert!(stdout.contains("1 gains are zero"), "{stdout}");

    let inverted = CalibrationTable::read(&output).unwrap();
    assert_abs_diff_eq!(inverted.gains[(0, 1, 0)], Complex::new(0.0, -0.5));
    assert_abs_diff_eq!(inverted.gains[(0, 0, 0)], Complex::new(1.0, 0.0));
    assert_eq!(inverted.gains[(1, 2, 1)], Complex::new(0.0, 0.0));
    assert_eq!(inverted.flags, table.flags);
    assert_eq!(inverted.block_times, table.block_times);
}

#[test]
fn test_solutions_invert_unsupported_output() {
    let tmp_dir = TempDir::new().expect("couldn't make tmp dir");
    let input = tmp_dir.path().join("table.json");
    CalibrationTable::identity(SolveMode::Phase, vec1![0.0], 2, 1)
        .write(&input)
        .unwrap();

    #[rustfmt::skip]
    let cmd = peelcal()
        .args([
            "solutions-invert",
            &format!("{}", input.display()),
            &format!("{}", tmp_dir.path().join("inverted.fits").display()),
        ])
        .ok();
    assert!(cmd.is_err());
    let (_, stderr) = get_cmd_output(cmd);
    assert!(stderr.contains("unsupported extension 'fits'"), "{stderr}");
}

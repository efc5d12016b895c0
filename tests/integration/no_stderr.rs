// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Tests to ensure there is no stderr output for successful commands.

use tempfile::TempDir;

use crate::{get_cmd_output, peelcal, write_observation};

#[test]
fn test_run_no_stderr() {
    let tmp_dir = TempDir::new().expect("couldn't make tmp dir");
    let obs = write_observation(tmp_dir.path());
    let out = tmp_dir.path().join("out");

    #[rustfmt::skip]
    let cmd = peelcal()
        .args([
            "run",
            "--observation", &format!("{}", obs.display()),
            "--output-dir", &format!("{}", out.display()),
        ])
        .ok();
    assert!(
        cmd.is_ok(),
        "run failed on simple test data: {}",
        cmd.err().unwrap()
    );
    let (_, stderr) = get_cmd_output(cmd);
    assert!(stderr.is_empty(), "stderr wasn't empty: {stderr}");
}

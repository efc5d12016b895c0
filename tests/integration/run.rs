// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Tests of the `run` subcommand.

use std::fs;

use peelcal::solutions::CalibrationTable;
use tempfile::TempDir;

use crate::{get_cmd_output, peelcal, write_observation};

#[test]
fn test_run_writes_reports_and_tables() {
    let tmp_dir = TempDir::new().expect("couldn't make tmp dir");
    let obs = write_observation(tmp_dir.path());
    let out = tmp_dir.path().join("out");

    #[rustfmt::skip]
    let cmd = peelcal()
        .args([
            "run",
            "--observation", &format!("{}", obs.display()),
            "--output-dir", &format!("{}", out.display()),
            "--keep-intermediates",
        ])
        .ok();
    let (stdout, stderr) = get_cmd_output(cmd);
    assert!(stderr.is_empty(), "stderr wasn't empty: {stderr}");
    assert!(stdout.contains("peelcal run complete"), "{stdout}");

    let report: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(out.join("field_report.json")).unwrap()).unwrap();
    assert_eq!(report["name"], "field");
    assert!(report["failure"].is_null(), "{report}");
    assert_eq!(report["peels"][0]["region"], "bright");
    assert_eq!(report["peels"][0]["dataset"], "field/peeled00");
    let num_tables = report["selfcal"]["num_tables"].as_u64().unwrap();
    assert!(num_tables > 0);

    for i in 0..num_tables {
        let file = out.join(format!("field_selfcal_table{i:02}.json"));
        assert!(CalibrationTable::read(&file).is_ok(), "{}", file.display());
    }
    // The intermediate peel tables were kept, and the inverted phases really
    // are inverses.
    let phase = CalibrationTable::read(out.join("field_peel_ph00.json")).unwrap();
    let phase_inv = CalibrationTable::read(out.join("field_peel_ph_inv00.json")).unwrap();
    for (g, g_inv) in phase.gains.iter().zip(phase_inv.gains.iter()) {
        if g.norm() > 0.0 {
            assert!((g * g_inv - 1.0).norm() < 1e-10);
        }
    }
    assert!(out.join("field_peel_amp00.json").exists());
    assert!(out.join("field_peel_amp_inv00.json").exists());
}

#[test]
fn test_run_dry_run() {
    let tmp_dir = TempDir::new().expect("couldn't make tmp dir");
    let obs = write_observation(tmp_dir.path());
    let out = tmp_dir.path().join("out");
    let saved = tmp_dir.path().join("args.toml");

    #[rustfmt::skip]
    let cmd = peelcal()
        .args([
            "run",
            "--observation", &format!("{}", obs.display()),
            "--output-dir", &format!("{}", out.display()),
            "--dry-run",
            "--save-toml", &format!("{}", saved.display()),
        ])
        .ok();
    assert!(cmd.is_ok(), "dry run failed: {}", cmd.err().unwrap());
    let (stdout, _) = get_cmd_output(cmd);
    assert!(stdout.contains("Dry run"), "{stdout}");
    assert!(stdout.contains("peel 'bright'"), "{stdout}");
    assert!(!out.exists());

    // The saved arguments can be used in place of the command line.
    let saved_args = fs::read_to_string(&saved).unwrap();
    assert!(saved_args.contains("obs.toml"), "{saved_args}");
    let cmd = peelcal()
        .args(["run", &format!("{}", saved.display()), "--dry-run"])
        .ok();
    assert!(cmd.is_ok(), "dry run from an argument file failed: {}", cmd.err().unwrap());
}

#[test]
fn test_run_without_observation() {
    let cmd = peelcal().args(["run"]).ok();
    assert!(cmd.is_err());
    let (_, stderr) = get_cmd_output(cmd);
    assert!(stderr.contains("No observation file"), "{stderr}");
}

#[test]
fn test_run_bad_observation() {
    let tmp_dir = TempDir::new().expect("couldn't make tmp dir");
    let obs = tmp_dir.path().join("obs.yaml");
    fs::write(&obs, "simulation: {}").unwrap();

    #[rustfmt::skip]
    let cmd = peelcal()
        .args([
            "run",
            "--observation", &format!("{}", obs.display()),
        ])
        .ok();
    assert!(cmd.is_err());
    let (_, stderr) = get_cmd_output(cmd);
    assert!(stderr.contains("toml, json"), "{stderr}");
    assert!(stderr.contains("ObservationConfig"), "{stderr}");
}

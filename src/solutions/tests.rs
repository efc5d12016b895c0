// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use approx::assert_abs_diff_eq;
use ndarray::prelude::*;
use tempfile::TempDir;
use vec1::vec1;

use super::*;

fn make_table() -> CalibrationTable {
    let mut table =
        CalibrationTable::identity(SolveMode::AmplitudePhase, vec1![5.0, 15.0, 25.0], 4, 2);
    for ((t, a, c), g) in table.gains.indexed_iter_mut() {
        let amp = 0.5 + (t + a) as f64 * 0.25;
        let phase = (a as f64 - 1.5) * 0.4 + c as f64 * 0.1;
        *g = c64::from_polar(amp, phase);
    }
    // Unsolved entries.
    table.gains[(0, 3, 0)] = c64::new(0.0, 0.0);
    table.gains[(2, 1, 1)] = c64::new(0.0, 0.0);
    table.flags[(2, 1, 1)] = true;
    table
}

#[test]
fn test_invert_round_trip() {
    let table = make_table();
    let twice = table.invert().invert();
    for (orig, back) in table.gains.iter().zip(twice.gains.iter()) {
        assert_abs_diff_eq!(*orig, *back, epsilon = 1e-12);
    }
    assert_eq!(twice.flags, table.flags);
}

#[test]
fn test_invert_gives_reciprocals_and_keeps_zeros() {
    let table = make_table();
    let inverted = table.invert();
    for (orig, inv) in table.gains.iter().zip(inverted.gains.iter()) {
        if orig.norm() > 0.0 {
            assert_abs_diff_eq!(*orig * *inv, c64::new(1.0, 0.0), epsilon = 1e-12);
        } else {
            assert_eq!(*inv, c64::new(0.0, 0.0));
        }
    }
    assert!(inverted.gains.iter().all(|g| g.is_finite()));
    assert_eq!(inverted.flags, table.flags);
    assert_eq!(inverted.mode, table.mode);
}

#[test]
fn test_invert_leaves_original_untouched() {
    let table = make_table();
    let copy = table.clone();
    let mut inverted = table.invert();
    inverted.gains.fill(c64::new(7.0, 7.0));
    assert_eq!(table, copy);
}

#[test]
fn test_invert_all_zero_table() {
    let mut table = make_table();
    table.gains.fill(c64::new(0.0, 0.0));
    let inverted = table.invert();
    assert!(inverted.gains.iter().all(|g| *g == c64::new(0.0, 0.0)));
    // Any number of inversions leaves zeros alone.
    assert_eq!(inverted.invert().invert(), table);
}

#[test]
fn test_timeblocks() {
    let timestamps = [0.0, 10.0, 20.0, 30.0, 40.0];
    assert_eq!(
        SolutionInterval::Integration.timeblocks(&timestamps, 10.0),
        vec![vec![0], vec![1], vec![2], vec![3], vec![4]]
    );
    assert_eq!(
        SolutionInterval::Infinite.timeblocks(&timestamps, 10.0),
        vec![vec![0, 1, 2, 3, 4]]
    );
    assert_eq!(
        SolutionInterval::Seconds(20.0).timeblocks(&timestamps, 10.0),
        vec![vec![0, 1], vec![2, 3], vec![4]]
    );
    // Intervals shorter than an integration are one integration.
    assert_eq!(
        SolutionInterval::Seconds(1.0).timeblocks(&timestamps, 10.0),
        SolutionInterval::Integration.timeblocks(&timestamps, 10.0)
    );
}

#[test]
fn test_gain_interpolation() {
    let mut table = CalibrationTable::identity(SolveMode::Phase, vec1![0.0, 10.0], 2, 1);
    table.gains[(0, 1, 0)] = c64::new(1.0, 0.0);
    table.gains[(1, 1, 0)] = c64::new(3.0, 0.0);

    // Amplitudes are interpolated geometrically.
    let (g, f) = table.gain_at(2.5, 1, 0, Interpolation::Linear);
    assert_abs_diff_eq!(g, c64::new(3.0_f64.powf(0.25), 0.0), epsilon = 1e-12);
    assert!(!f);
    let (g, _) = table.gain_at(2.5, 1, 0, Interpolation::Nearest);
    assert_abs_diff_eq!(g, c64::new(1.0, 0.0));
    // Beyond the table, the closest block is used.
    let (g, _) = table.gain_at(100.0, 1, 0, Interpolation::Linear);
    assert_abs_diff_eq!(g, c64::new(3.0, 0.0));

    // A flagged neighbour falls back to the nearest block.
    table.flags[(1, 1, 0)] = true;
    let (g, f) = table.gain_at(7.5, 1, 0, Interpolation::Linear);
    assert_abs_diff_eq!(g, c64::new(3.0, 0.0));
    assert!(f);
}

#[test]
fn test_phase_interpolation_keeps_unit_amplitudes() {
    let mut table = CalibrationTable::identity(SolveMode::Phase, vec1![0.0, 10.0], 2, 1);
    table.gains[(0, 1, 0)] = c64::from_polar(1.0, 0.2);
    table.gains[(1, 1, 0)] = c64::from_polar(1.0, 1.8);

    let (g, _) = table.gain_at(5.0, 1, 0, Interpolation::Linear);
    assert_abs_diff_eq!(g.norm(), 1.0, epsilon = 1e-12);
    assert_abs_diff_eq!(g.arg(), 1.0, epsilon = 1e-12);

    // Phases go the short way around.
    table.gains[(0, 1, 0)] = c64::from_polar(1.0, 3.0);
    table.gains[(1, 1, 0)] = c64::from_polar(1.0, -3.0);
    let (g, _) = table.gain_at(5.0, 1, 0, Interpolation::Linear);
    assert_abs_diff_eq!(g.norm(), 1.0, epsilon = 1e-12);
    assert_abs_diff_eq!(g.arg().abs(), std::f64::consts::PI, epsilon = 1e-12);
}

#[test]
fn test_inverted_table_interpolates_to_reciprocals() {
    let table = make_table();
    let inverted = table.invert();
    for timestamp in [0.0, 7.5, 12.0, 15.0, 21.0, 30.0] {
        for ((_, a, c), _) in table.gains.indexed_iter().filter(|((t, _, _), _)| *t == 0) {
            let (g, f) = table.gain_at(timestamp, a, c, Interpolation::Linear);
            let (g_inv, f_inv) = inverted.gain_at(timestamp, a, c, Interpolation::Linear);
            assert_eq!(f, f_inv);
            if g.norm() > 0.0 {
                assert_abs_diff_eq!(g * g_inv, c64::new(1.0, 0.0), epsilon = 1e-12);
            } else {
                assert_eq!(g_inv, c64::new(0.0, 0.0));
            }
        }
    }
}

#[test]
fn test_calibration_log_checkpoints() {
    let mut log = CalibrationLog::new();
    let empty = log.checkpoint();
    log.push(make_table(), Interpolation::Linear);
    let one = log.checkpoint();
    log.push(make_table().invert(), Interpolation::Nearest);
    assert_eq!(log.len(), 2);

    log.truncate(one);
    assert_eq!(log.len(), 1);
    assert_eq!(log.entries()[0].1, Interpolation::Linear);
    log.truncate(empty);
    assert!(log.is_empty());
    assert!(log.last().is_none());
}

#[test]
fn test_json_write_then_read() {
    let tmp = TempDir::new().unwrap();
    let file = tmp.path().join("table.json");
    let table = make_table();
    table.write(&file).unwrap();
    let read = CalibrationTable::read(&file).unwrap();
    assert_eq!(read.flags, table.flags);
    assert_eq!(read.block_times, table.block_times);
    for (a, b) in read.gains.iter().zip(table.gains.iter()) {
        assert_abs_diff_eq!(*a, *b, epsilon = 1e-12);
    }

    let result = table.write(tmp.path().join("table.fits"));
    assert!(matches!(
        result,
        Err(SolutionsWriteError::UnsupportedExt { .. })
    ));
}

#[test]
fn test_read_rejects_mismatched_flags() {
    let tmp = TempDir::new().unwrap();
    let file = tmp.path().join("bad.json");
    let mut table = make_table();
    table.flags = Array3::from_elem((1, 1, 1), false);
    table.write(&file).unwrap();
    assert!(matches!(
        CalibrationTable::read(&file),
        Err(SolutionsReadError::BadShape { thing: "flags", .. })
    ));
}

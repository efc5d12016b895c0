// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use ndarray::prelude::*;
use vec1::vec1;

use super::*;

fn make_dataset(num_antennas: usize) -> VisibilityDataset {
    let antennas = Vec1::try_from_vec(
        (0..num_antennas)
            .map(|i| Antenna {
                name: format!("ant{i:02}"),
                east: i as f64 * 10.0,
                north: 0.0,
            })
            .collect(),
    )
    .unwrap();
    let num_baselines = num_antennas * (num_antennas - 1) / 2;
    let observed = Array3::from_shape_fn((3, 2, num_baselines), |(t, f, b)| {
        c64::new((t + f) as f64, b as f64)
    });
    VisibilityDataset::new(
        SkyFrame::default(),
        antennas,
        vec1![0.0, 10.0, 20.0],
        10.0,
        vec1![150e6, 151e6],
        Array2::default((3, num_baselines)),
        observed,
    )
    .unwrap()
}

#[test]
fn test_new_dataset_views() {
    let vis = make_dataset(4);
    assert_eq!(vis.dim(), (3, 2, 6));
    assert_eq!(vis.corrected, vis.observed);
    assert!(vis.model.iter().all(|v| v.norm() == 0.0));
    assert!(vis.flags.iter().all(|&f| !f));
    assert_eq!(vis.baselines[5], (2, 3));
}

#[test]
fn test_new_dataset_bad_shape() {
    let vis = make_dataset(4);
    let result = VisibilityDataset::new(
        vis.frame,
        vis.antennas.clone(),
        vec1![0.0],
        10.0,
        vis.freqs.clone(),
        vis.uvs.clone(),
        vis.observed.clone(),
    );
    assert!(matches!(
        result,
        Err(VisError::BadShape {
            thing: "timesteps",
            ..
        })
    ));
}

#[test]
fn test_flag_versions() {
    let mut vis = make_dataset(4);
    let before = vis.save_flags();
    vis.flags.slice_mut(s![.., .., 0]).fill(true);
    assert_eq!(vis.save_flags().num_flagged(), 6);
    vis.restore_flags(&before).unwrap();
    assert_eq!(vis.save_flags().num_flagged(), 0);

    let other = make_dataset(5).save_flags();
    assert!(vis.restore_flags(&other).is_err());
}

#[test]
fn test_split_materialises_corrected() {
    let mut vis = make_dataset(3);
    vis.corrected.fill(c64::new(2.0, -1.0));
    vis.model.fill(c64::new(1.0, 1.0));
    vis.flags[(0, 0, 0)] = true;
    let split = vis.split();
    assert_eq!(split.observed, vis.corrected);
    assert_eq!(split.corrected, vis.corrected);
    assert!(split.model.iter().all(|v| v.norm() == 0.0));
    assert!(split.flags[(0, 0, 0)]);
    // The original is untouched.
    assert_ne!(vis.observed, split.observed);
}

#[test]
fn test_antenna_flag_statistics() {
    let mut vis = make_dataset(4);
    // Baselines involving antenna 3: (0, 3), (1, 3), (2, 3).
    for i_bl in [2, 4, 5] {
        vis.flags.slice_mut(s![.., .., i_bl]).fill(true);
    }
    assert_eq!(vis.unflagged_baselines_per_antenna(), vec![2, 2, 2, 0]);
    let fractions = vis.flagged_fraction_per_antenna();
    assert_eq!(fractions[3], 1.0);
    assert!((fractions[0] - 1.0 / 3.0).abs() < 1e-12);
}

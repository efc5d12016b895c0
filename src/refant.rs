// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Choosing a reference antenna.
//!
//! Antennas near the centre of the array and with little flagged data make
//! good references. Each criterion gives every antenna a score between 0 and 1;
//! the scores are summed and the best antenna wins.

use itertools::Itertools;
use log::debug;
use serde::{Deserialize, Serialize};

use crate::vis::VisibilityDataset;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RefAntPolicy {
    /// Always use this antenna index.
    Fixed(usize),

    /// Rank the antennas of the dataset.
    Heuristic { geometry: bool, flagging: bool },
}

impl Default for RefAntPolicy {
    fn default() -> Self {
        RefAntPolicy::Heuristic {
            geometry: true,
            flagging: true,
        }
    }
}

impl RefAntPolicy {
    /// The reference antenna to use for `dataset`.
    pub fn choose(&self, dataset: &VisibilityDataset) -> usize {
        match *self {
            RefAntPolicy::Fixed(i) => i,
            RefAntPolicy::Heuristic { geometry, flagging } => {
                let ranked = rank_antennas(dataset, geometry, flagging);
                let best = ranked.first().copied().unwrap_or(0);
                debug!(
                    "Reference antenna {best} ({}); next best are {:?}",
                    dataset.antennas[best].name,
                    &ranked[1..ranked.len().min(4)]
                );
                best
            }
        }
    }
}

/// Antenna indices, best reference first. Ties go to the lower index.
pub fn rank_antennas(dataset: &VisibilityDataset, geometry: bool, flagging: bool) -> Vec<usize> {
    let num_antennas = dataset.num_antennas();
    let mut scores = vec![0.0; num_antennas];

    if geometry {
        let centre_east =
            dataset.antennas.iter().map(|a| a.east).sum::<f64>() / num_antennas as f64;
        let centre_north =
            dataset.antennas.iter().map(|a| a.north).sum::<f64>() / num_antennas as f64;
        let distances: Vec<f64> = dataset
            .antennas
            .iter()
            .map(|a| (a.east - centre_east).hypot(a.north - centre_north))
            .collect();
        let max_distance = distances.iter().copied().fold(0.0, f64::max);
        for (score, d) in scores.iter_mut().zip(distances) {
            *score += if max_distance > 0.0 {
                1.0 - d / max_distance
            } else {
                1.0
            };
        }
    }

    if flagging {
        let good: Vec<f64> = dataset
            .flagged_fraction_per_antenna()
            .into_iter()
            .map(|f| 1.0 - f)
            .collect();
        let max_good = good.iter().copied().fold(0.0, f64::max);
        for (score, g) in scores.iter_mut().zip(good) {
            if max_good > 0.0 {
                *score += g / max_good;
            }
        }
    }

    (0..num_antennas)
        .sorted_by(|&a, &b| scores[b].total_cmp(&scores[a]).then(a.cmp(&b)))
        .collect()
}

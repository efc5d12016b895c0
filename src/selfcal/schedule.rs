// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! What each self-calibration cycle solves for.

use crate::{
    constants::{AMPLITUDE_CYCLE_THRESHOLD, LOW_FREQUENCY_SNR_CUTOFF, NUM_SELFCAL_CYCLES},
    solutions::{SolutionInterval, SolveMode},
};

/// Phase solves of cycles 0 to 4.
const PHASE_SOLVES: [(SolutionInterval, f64); NUM_SELFCAL_CYCLES - 1] = [
    (SolutionInterval::Seconds(600.0), 4.0),
    (SolutionInterval::Seconds(120.0), 3.0),
    (SolutionInterval::Seconds(30.0), 3.0),
    (SolutionInterval::Integration, 2.0),
    (SolutionInterval::Integration, 2.0),
];

/// Amplitude solves of cycles [`AMPLITUDE_CYCLE_THRESHOLD`] onwards.
const AMPLITUDE_SOLVES: [(SolutionInterval, f64);
    NUM_SELFCAL_CYCLES - 1 - AMPLITUDE_CYCLE_THRESHOLD] = [
    (SolutionInterval::Seconds(600.0), 4.0),
    (SolutionInterval::Seconds(300.0), 3.0),
];

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SolveStep {
    pub mode: SolveMode,
    pub interval: SolutionInterval,
    pub min_snr: f64,
}

/// The ordered solves of each cycle. The last cycle only images, so it has no
/// entry.
#[derive(Debug, Clone, PartialEq)]
pub struct SelfCalSchedule {
    cycles: Vec<Vec<SolveStep>>,
}

impl SelfCalSchedule {
    /// The standard schedule for data at `centroid_freq` \[Hz\], cut down to
    /// `num_cycles` cycles (at most [`NUM_SELFCAL_CYCLES`]). Below
    /// [`LOW_FREQUENCY_SNR_CUTOFF`] every minimum SNR is one lower.
    pub fn standard(centroid_freq: f64, num_cycles: usize) -> SelfCalSchedule {
        let snr_offset = if centroid_freq < LOW_FREQUENCY_SNR_CUTOFF {
            1.0
        } else {
            0.0
        };
        let step = |mode, (interval, min_snr): (SolutionInterval, f64)| SolveStep {
            mode,
            interval,
            min_snr: (min_snr - snr_offset).max(0.0),
        };

        let num_cycles = num_cycles.clamp(1, NUM_SELFCAL_CYCLES);
        let cycles = PHASE_SOLVES
            .iter()
            .take(num_cycles - 1)
            .enumerate()
            .map(|(cycle, &phase)| {
                let mut steps = vec![step(SolveMode::Phase, phase)];
                if let Some(&amp) = cycle
                    .checked_sub(AMPLITUDE_CYCLE_THRESHOLD)
                    .and_then(|i| AMPLITUDE_SOLVES.get(i))
                {
                    steps.push(step(SolveMode::Amplitude, amp));
                }
                steps
            })
            .collect();
        SelfCalSchedule { cycles }
    }

    /// A schedule with the given solves per cycle.
    pub fn new(cycles: Vec<Vec<SolveStep>>) -> SelfCalSchedule {
        SelfCalSchedule { cycles }
    }

    /// The number of cycles including the final check.
    pub fn num_cycles(&self) -> usize {
        self.cycles.len() + 1
    }

    pub fn last_cycle(&self) -> usize {
        self.cycles.len()
    }

    /// The solves that follow the image of `cycle`.
    pub fn solves(&self, cycle: usize) -> &[SolveStep] {
        self.cycles.get(cycle).map(|s| s.as_slice()).unwrap_or(&[])
    }

    /// The clean threshold of a cycle: ten times the expected noise for every
    /// cycle still to come, but never below the expected noise.
    pub fn clean_threshold(&self, cycle: usize, expected_noise: f64) -> f64 {
        let remaining = self.last_cycle().saturating_sub(cycle) as f64;
        (expected_noise * 10.0 * remaining).max(expected_noise)
    }
}

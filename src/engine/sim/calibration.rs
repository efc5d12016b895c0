// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Solving for and applying scalar antenna gains.
//!
//! The solver is StEFCal (Salvini & Wijnholds 2014), as in MitchCal (equation
//! 11 of Mitchell et al. 2008), restricted to a single polarisation and with
//! the gain constrained to a phase or an amplitude when requested.

use log::{debug, trace};
use ndarray::prelude::*;
use vec1::Vec1;

use crate::{
    engine::{EngineError, SolveParams},
    math::c64,
    solutions::{CalibrationTable, Interpolation, SolveMode},
    vis::VisibilityDataset,
};

/// Correct the observed view of a dataset with tables, in order. Returns the
/// corrected visibilities and flags; flagged solutions flag the visibilities
/// they touch.
pub(super) fn corrected_with(
    dataset: &VisibilityDataset,
    tables: &[(CalibrationTable, Interpolation)],
) -> Result<(Array3<c64>, Array3<bool>), EngineError> {
    let num_antennas = dataset.num_antennas();
    let num_chans = dataset.freqs.len();
    for (table, _) in tables {
        let (_, table_ants, table_chans) = table.dim();
        if table_ants != num_antennas || (table_chans != 1 && table_chans != num_chans) {
            return Err(EngineError::TableShape {
                got: table.dim(),
                num_antennas,
                num_chans,
            });
        }
    }

    let mut corrected = dataset.observed.clone();
    let mut flags = dataset.flags.clone();
    for (table, interpolation) in tables {
        let combined_chans = table.dim().2 == 1;
        for (((i_time, i_chan, i_bl), vis), flag) in corrected
            .indexed_iter_mut()
            .zip(flags.iter_mut())
        {
            let (ant1, ant2) = dataset.baselines[i_bl];
            let timestamp = dataset.timestamps[i_time];
            let chan = if combined_chans { 0 } else { i_chan };
            let (g1, f1) = table.gain_at(timestamp, ant1, chan, *interpolation);
            let (g2, f2) = table.gain_at(timestamp, ant2, chan, *interpolation);
            if f1 || f2 {
                *flag = true;
                continue;
            }
            // Unsolved gains leave the data alone.
            if g1.norm() == 0.0 || g2.norm() == 0.0 {
                continue;
            }
            *vis /= g1 * g2.conj();
        }
    }
    Ok((corrected, flags))
}

/// A visibility used in a solve.
struct Sample {
    ant1: usize,
    ant2: usize,
    data: c64,
    model: c64,
}

struct BlockSolution {
    gains: Array1<c64>,
    failed: Array1<bool>,
    snr: Array1<f64>,
    num_iterations: u32,
    converged: bool,
}

/// Constrain a gain to what a solve mode allows.
fn constrain(g: c64, mode: SolveMode) -> c64 {
    match mode {
        SolveMode::Phase => {
            let norm = g.norm();
            if norm > 0.0 {
                g / norm
            } else {
                g
            }
        }
        SolveMode::Amplitude => c64::new(g.norm(), 0.0),
        SolveMode::AmplitudePhase => g,
    }
}

/// Find the gains of each antenna that best take the model to the data.
fn stefcal(
    samples: &[Sample],
    num_antennas: usize,
    mode: SolveMode,
    min_baselines: usize,
    max_iterations: u32,
    stop_threshold: f64,
) -> BlockSolution {
    let mut gains = Array1::from_elem(num_antennas, c64::new(1.0, 0.0));
    let mut old_gains = gains.clone();
    let mut top: Array1<c64> = Array1::zeros(num_antennas);
    let mut bot: Array1<f64> = Array1::zeros(num_antennas);

    // Antennas without enough baselines can't be solved.
    let mut partners = Array2::from_elem((num_antennas, num_antennas), false);
    for s in samples {
        partners[(s.ant1, s.ant2)] = true;
        partners[(s.ant2, s.ant1)] = true;
    }
    let mut failed: Array1<bool> = partners
        .outer_iter()
        .map(|p| p.iter().filter(|&&p| p).count() < min_baselines.max(1))
        .collect();

    let mut iteration = 0;
    let mut converged = false;
    while iteration < max_iterations {
        iteration += 1;
        top.fill(c64::default());
        bot.fill(0.0);

        for s in samples {
            if failed[s.ant1] || failed[s.ant2] {
                continue;
            }
            // For antenna 1, (D conj(G2 M^H)) / |G2 M^H|^2
            let z = gains[s.ant2].conj() * s.model;
            top[s.ant1] += s.data * z.conj();
            bot[s.ant1] += z.norm_sqr();
            // For antenna 2, the baseline is conjugated.
            let z = gains[s.ant1].conj() * s.model.conj();
            top[s.ant2] += s.data.conj() * z.conj();
            bot[s.ant2] += z.norm_sqr();
        }

        for (((gain, old), (&top, &bot)), failed) in gains
            .iter_mut()
            .zip(old_gains.iter_mut())
            .zip(top.iter().zip(bot.iter()))
            .zip(failed.iter_mut())
        {
            if *failed {
                continue;
            }
            let new = match mode {
                SolveMode::Phase => top,
                // The least-squares real gain.
                SolveMode::Amplitude => c64::new(top.re / bot, 0.0),
                SolveMode::AmplitudePhase => top / bot,
            };
            if bot <= 0.0 || !new.is_finite() || new.norm() == 0.0 {
                *failed = true;
                *gain = c64::default();
                *old = c64::default();
            } else {
                *gain = constrain(new, mode);
            }
        }

        // Scalar gains need at least three antennas for closure.
        let num_failed = failed.iter().filter(|&&f| f).count();
        if num_antennas - num_failed < 3 {
            break;
        }

        // On every even iteration, test for convergence and set the new gains
        // as the average of the last two. This speeds up convergence.
        if iteration % 2 == 0 {
            let mut max_precision: f64 = 0.0;
            for ((gain, &old), _) in gains
                .iter_mut()
                .zip(old_gains.iter())
                .zip(failed.iter())
                .filter(|(_, &failed)| !failed)
            {
                max_precision = max_precision.max((*gain - old).norm_sqr());
                *gain = constrain((*gain + old) * 0.5, mode);
            }
            if max_precision < stop_threshold {
                converged = true;
                break;
            }
        }
        old_gains.assign(&gains);
    }

    // The SNR of each gain is its amplitude over its standard error.
    let mut residual_sq: Array1<f64> = Array1::zeros(num_antennas);
    let mut signal_sq: Array1<f64> = Array1::zeros(num_antennas);
    let mut counts: Array1<usize> = Array1::zeros(num_antennas);
    for s in samples {
        if failed[s.ant1] || failed[s.ant2] {
            continue;
        }
        let (g1, g2) = (gains[s.ant1], gains[s.ant2]);
        let r = (s.data - g1 * g2.conj() * s.model).norm_sqr();
        residual_sq[s.ant1] += r;
        residual_sq[s.ant2] += r;
        signal_sq[s.ant1] += (g2 * s.model).norm_sqr();
        signal_sq[s.ant2] += (g1 * s.model).norm_sqr();
        counts[s.ant1] += 1;
        counts[s.ant2] += 1;
    }
    let snr = Array1::from_shape_fn(num_antennas, |a| {
        if failed[a] || counts[a] == 0 {
            return 0.0;
        }
        let variance = residual_sq[a] / counts[a] as f64;
        let std_err = (variance / signal_sq[a]).sqrt();
        if std_err > 0.0 {
            gains[a].norm() / std_err
        } else {
            f64::INFINITY
        }
    });

    BlockSolution {
        gains,
        failed,
        snr,
        num_iterations: iteration,
        converged,
    }
}

pub(super) fn solve(
    dataset: &VisibilityDataset,
    params: &SolveParams,
    prior: &[(CalibrationTable, Interpolation)],
    max_iterations: u32,
    stop_threshold: f64,
) -> Result<CalibrationTable, EngineError> {
    let num_antennas = dataset.num_antennas();
    if params.reference_antenna >= num_antennas {
        return Err(EngineError::BadReferenceAntenna {
            reference: params.reference_antenna,
            num_antennas,
        });
    }

    let (data, flags) = corrected_with(dataset, prior)?;
    let blocks = params
        .interval
        .timeblocks(&dataset.timestamps, dataset.integration_time);
    let mut gains = Array3::zeros((blocks.len(), num_antennas, 1));
    let mut sol_flags = Array3::from_elem((blocks.len(), num_antennas, 1), true);
    let mut block_times = Vec::with_capacity(blocks.len());
    let mut num_used = 0;

    for (i_block, block) in blocks.iter().enumerate() {
        block_times.push(
            block.iter().map(|&t| dataset.timestamps[t]).sum::<f64>() / block.len() as f64,
        );

        let mut samples = vec![];
        for &i_time in block {
            for (i_bl, &(ant1, ant2)) in dataset.baselines.iter().enumerate() {
                let uv = dataset.uvs[(i_time, i_bl)];
                if uv.u.hypot(uv.v) < params.uv_min {
                    continue;
                }
                for i_chan in 0..dataset.freqs.len() {
                    let index = (i_time, i_chan, i_bl);
                    let (d, m) = (data[index], dataset.model[index]);
                    if flags[index] || !d.is_finite() || !m.is_finite() {
                        continue;
                    }
                    samples.push(Sample {
                        ant1,
                        ant2,
                        data: d,
                        model: m,
                    });
                }
            }
        }
        num_used += samples.len();

        let solution = stefcal(
            &samples,
            num_antennas,
            params.mode,
            params.min_baselines_per_antenna,
            max_iterations,
            stop_threshold,
        );
        trace!(
            "Timeblock {i_block}: {} iterations, converged: {}, {} failed antennas",
            solution.num_iterations,
            solution.converged,
            solution.failed.iter().filter(|&&f| f).count()
        );

        // Reference the phases. Fall back to the first working antenna if the
        // requested one didn't solve.
        let reference = if solution.failed[params.reference_antenna] {
            solution.failed.iter().position(|&f| !f)
        } else {
            Some(params.reference_antenna)
        };
        let ref_phasor = match (reference, params.mode) {
            (Some(r), SolveMode::Phase | SolveMode::AmplitudePhase) => {
                let g = solution.gains[r];
                g.conj() / g.norm()
            }
            _ => c64::new(1.0, 0.0),
        };
        if reference.is_some() && reference != Some(params.reference_antenna) {
            debug!(
                "Timeblock {i_block}: reference antenna {} failed; referencing to antenna {}",
                params.reference_antenna,
                reference.unwrap_or_default()
            );
        }

        for (i_ant, ((&gain, &failed), &snr)) in solution
            .gains
            .iter()
            .zip(solution.failed.iter())
            .zip(solution.snr.iter())
            .enumerate()
        {
            if failed || snr < params.min_snr {
                continue;
            }
            gains[(i_block, i_ant, 0)] = gain * ref_phasor;
            sol_flags[(i_block, i_ant, 0)] = false;
        }
    }

    if num_used == 0 {
        return Err(EngineError::NoData("calibration"));
    }
    if sol_flags.iter().all(|&f| f) {
        return Err(EngineError::NoSolutions);
    }

    let num_flagged = sol_flags.iter().filter(|&&f| f).count();
    debug!(
        "Solved {} {} gains over {} timeblocks ({num_flagged} flagged)",
        params.mode,
        params.interval,
        blocks.len()
    );
    Ok(CalibrationTable {
        mode: params.mode,
        interval: params.interval,
        reference_antenna: Some(params.reference_antenna),
        // `blocks` is never empty for a dataset with timestamps.
        block_times: Vec1::try_from_vec(block_times)
            .map_err(|_| EngineError::NoData("calibration"))?,
        gains,
        flags: sol_flags,
    })
}

pub(super) fn apply(
    dataset: &mut VisibilityDataset,
    tables: &[(CalibrationTable, Interpolation)],
) -> Result<(), EngineError> {
    let (corrected, flags) = corrected_with(dataset, tables)?;
    let newly_flagged = flags.iter().filter(|&&f| f).count()
        - dataset.flags.iter().filter(|&&f| f).count();
    if newly_flagged > 0 {
        debug!("Applying {} tables flagged {newly_flagged} visibilities", tables.len());
    }
    dataset.corrected = corrected;
    dataset.flags = flags;
    Ok(())
}

pub(super) fn subtract(dataset: &mut VisibilityDataset, reverse: bool) {
    if reverse {
        dataset.corrected += &dataset.model;
    } else {
        dataset.corrected -= &dataset.model;
    }
}

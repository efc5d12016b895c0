// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The observation file: what to simulate and which sources to process.

use std::{collections::HashSet, fs::File, io::Read, path::Path, str::FromStr};

use itertools::Itertools;
use log::debug;
use serde::{Deserialize, Serialize};
use strum::IntoEnumIterator;
use strum_macros::{Display, EnumIter, EnumString};

use super::{error::ConfigError, Source, Subtraction};
use crate::{
    constants::{
        DEFAULT_CLEAN_GAIN, DEFAULT_CLEAN_ITERATIONS, DEFAULT_NTERMS, DEFAULT_SELFCAL_UV_MIN,
        HIRES_UV_MIN, NOISE_TOLERANCE, NUM_SELFCAL_CYCLES,
    },
    engine::{sim::SimulationConfig, ImagingParams, Weighting},
    refant::RefAntPolicy,
    region::{RegionConfig, ShapeConfig, SkyFrame},
};

#[derive(Debug, Display, EnumIter, EnumString)]
enum ObservationFileType {
    #[strum(serialize = "toml")]
    Toml,

    #[strum(serialize = "json")]
    Json,
}

fn default_niter() -> usize {
    DEFAULT_CLEAN_ITERATIONS
}

fn default_gain() -> f64 {
    DEFAULT_CLEAN_GAIN
}

fn default_nterms() -> usize {
    DEFAULT_NTERMS
}

fn default_cycles() -> usize {
    NUM_SELFCAL_CYCLES
}

fn default_tolerance() -> f64 {
    NOISE_TOLERANCE
}

fn default_uv_min() -> f64 {
    DEFAULT_SELFCAL_UV_MIN
}

fn default_hires_uv_min() -> f64 {
    HIRES_UV_MIN
}

fn default_cleanup() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImagingConfig {
    /// The number of pixels along each side of the image.
    pub size: usize,

    /// The pixel size \[arcseconds\].
    pub cell: f64,

    #[serde(default)]
    pub weighting: Weighting,

    #[serde(default = "default_niter")]
    pub niter: usize,

    #[serde(default = "default_gain")]
    pub gain: f64,

    #[serde(default = "default_nterms")]
    pub nterms: usize,

    /// Multiscale component sizes \[pixels\].
    #[serde(default)]
    pub multiscale: Vec<usize>,

    /// If given, a final low-resolution image is made with a Gaussian uv
    /// taper that halves the weights at this uv distance \[wavelengths\].
    #[serde(default)]
    pub lowres_taper: Option<f64>,
}

impl ImagingConfig {
    pub fn to_params(&self, what: &str) -> Result<ImagingParams, ConfigError> {
        if self.size == 0 || !(self.cell > 0.0) || self.nterms == 0 {
            return Err(ConfigError::BadImaging {
                what: what.to_string(),
                size: self.size,
                cell: self.cell,
                nterms: self.nterms,
            });
        }
        let mut params = ImagingParams::new(self.size, (self.cell / 3600.0).to_radians());
        params.weighting = self.weighting;
        params.niter = self.niter;
        params.gain = self.gain;
        params.nterms = self.nterms;
        params.multiscale = self.multiscale.clone();
        Ok(params)
    }
}

/// Compact sources to subtract once peeling is done. Only the long
/// baselines are imaged, so extended emission stays in the data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubtractConfig {
    /// Where the compact sources are.
    pub region: Vec<ShapeConfig>,

    /// Baselines shorter than this aren't imaged \[wavelengths\].
    #[serde(default = "default_hires_uv_min")]
    pub uv_min: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelfCalConfig {
    /// The number of self-calibration cycles, including the final image.
    #[serde(default = "default_cycles")]
    pub cycles: usize,

    #[serde(default = "default_tolerance")]
    pub tolerance: f64,

    /// \[metres\]
    #[serde(default = "default_uv_min")]
    pub uv_min: f64,
}

impl Default for SelfCalConfig {
    fn default() -> Self {
        SelfCalConfig {
            cycles: default_cycles(),
            tolerance: default_tolerance(),
            uv_min: default_uv_min(),
        }
    }
}

/// A source as written in an observation file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceConfig {
    pub name: String,

    /// The thermal noise expected in the final image \[Jy/beam\].
    pub expected_noise: f64,

    /// Where clean components may be placed.
    pub mask: Vec<ShapeConfig>,

    /// The regions to peel, in order.
    #[serde(default)]
    pub peel: Vec<RegionConfig>,

    #[serde(default)]
    pub refant: Option<RefAntPolicy>,

    /// Overrides the observation's imaging parameters.
    #[serde(default)]
    pub imaging: Option<ImagingConfig>,

    #[serde(default)]
    pub subtract: Option<SubtractConfig>,

    /// Remove the intermediate products of each peel.
    #[serde(default = "default_cleanup")]
    pub cleanup: bool,
}

impl SourceConfig {
    pub fn parse(
        self,
        frame: SkyFrame,
        imaging: &ImagingConfig,
        selfcal: &SelfCalConfig,
    ) -> Result<Source, ConfigError> {
        let SourceConfig {
            name,
            expected_noise,
            mask,
            peel,
            refant,
            imaging: imaging_override,
            subtract,
            cleanup,
        } = self;

        if name.is_empty() || name.contains(['/', '\\']) {
            return Err(ConfigError::BadName { name });
        }
        if !(expected_noise > 0.0) {
            return Err(ConfigError::BadNoise {
                name,
                noise: expected_noise,
            });
        }

        let imaging_config = imaging_override.as_ref().unwrap_or(imaging);
        let imaging = imaging_config.to_params(&name)?;
        let lowres_taper = imaging_config.lowres_taper;
        if let Some(taper) = lowres_taper {
            if !(taper > 0.0) {
                return Err(ConfigError::BadTaper { name, taper });
            }
        }
        let mask = RegionConfig {
            name: format!("{name} mask"),
            shapes: mask,
        }
        .parse(frame)?;
        let peel = peel
            .into_iter()
            .map(|r| r.parse(frame))
            .collect::<Result<Vec<_>, _>>()?;
        let subtract = match subtract {
            Some(SubtractConfig { region, uv_min }) => {
                if !(uv_min >= 0.0) {
                    return Err(ConfigError::BadUvMin { name, uv_min });
                }
                let region = RegionConfig {
                    name: format!("{name} subtract"),
                    shapes: region,
                }
                .parse(frame)?;
                Some(Subtraction { region, uv_min })
            }
            None => None,
        };

        Ok(Source {
            name,
            expected_noise,
            mask,
            peel,
            imaging,
            refant: refant.unwrap_or_default(),
            selfcal: selfcal.clone(),
            subtract,
            lowres_taper,
            cleanup,
        })
    }
}

/// Everything needed for a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservationConfig {
    pub simulation: SimulationConfig,

    /// The imaging parameters of every source, unless overridden.
    pub imaging: ImagingConfig,

    #[serde(default)]
    pub selfcal: SelfCalConfig,

    pub sources: Vec<SourceConfig>,
}

impl ObservationConfig {
    /// Read an observation file. The format is chosen by the file's
    /// extension.
    pub fn read<P: AsRef<Path>>(file: P) -> Result<ObservationConfig, ConfigError> {
        let file = file.as_ref();
        let file_type = file
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase())
            .and_then(|e| ObservationFileType::from_str(&e).ok());
        let file_type = match file_type {
            Some(t) => t,
            None => {
                return Err(ConfigError::UnsupportedExt {
                    file: file.display().to_string(),
                    supported: ObservationFileType::iter().join(", "),
                })
            }
        };

        debug!("Parsing {file_type} observation file {}", file.display());
        let mut contents = String::new();
        File::open(file)?.read_to_string(&mut contents)?;
        match file_type {
            ObservationFileType::Toml => {
                toml::from_str(&contents).map_err(|e| ConfigError::Decode {
                    file: file.display().to_string(),
                    file_type: "toml",
                    err: e.to_string(),
                })
            }
            ObservationFileType::Json => {
                serde_json::from_str(&contents).map_err(|e| ConfigError::Decode {
                    file: file.display().to_string(),
                    file_type: "json",
                    err: e.to_string(),
                })
            }
        }
    }

    /// Check and convert every source.
    pub fn sources(&self) -> Result<Vec<Source>, ConfigError> {
        if self.sources.is_empty() {
            return Err(ConfigError::NoSources);
        }
        if !(1..=NUM_SELFCAL_CYCLES).contains(&self.selfcal.cycles) {
            return Err(ConfigError::BadCycles {
                cycles: self.selfcal.cycles,
                max: NUM_SELFCAL_CYCLES,
            });
        }

        let mut seen = HashSet::new();
        let frame = self.simulation.frame();
        let num_antennas = self.simulation.antennas.len();
        self.sources
            .iter()
            .map(|s| {
                if !seen.insert(s.name.as_str()) {
                    return Err(ConfigError::DuplicateSource {
                        name: s.name.clone(),
                    });
                }
                let source = s.clone().parse(frame, &self.imaging, &self.selfcal)?;
                if let RefAntPolicy::Fixed(refant) = source.refant {
                    if refant >= num_antennas {
                        return Err(ConfigError::BadRefAnt {
                            name: source.name,
                            refant,
                            num_antennas,
                        });
                    }
                }
                Ok(source)
            })
            .collect()
    }
}

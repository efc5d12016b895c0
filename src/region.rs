// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Sky regions. These serve as clean masks as well as the areas containing
//! sources to peel.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use vec1::Vec1;

/// A direction in the tangent plane, expressed as direction cosines
/// \[radians\] relative to a phase centre.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Lm {
    pub l: f64,
    pub m: f64,
}

impl Lm {
    pub fn new(l: f64, m: f64) -> Lm {
        Lm { l, m }
    }

    pub fn from_degrees(l_deg: f64, m_deg: f64) -> Lm {
        Lm {
            l: l_deg.to_radians(),
            m: m_deg.to_radians(),
        }
    }
}

/// The coordinate system that tangent-plane positions are relative to. Two
/// artefacts can only be combined if their frames are equal.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct SkyFrame {
    /// Right ascension of the phase centre \[radians\]
    pub ra: f64,
    /// Declination of the phase centre \[radians\]
    pub dec: f64,
}

impl std::fmt::Display for SkyFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "J2000 ({:.4}°, {:.4}°)",
            self.ra.to_degrees(),
            self.dec.to_degrees()
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Shape {
    Circle { centre: Lm, radius: f64 },
    Box { blc: Lm, trc: Lm },
}

impl Shape {
    pub fn contains(&self, lm: Lm) -> bool {
        match self {
            Shape::Circle { centre, radius } => {
                let dl = lm.l - centre.l;
                let dm = lm.m - centre.m;
                dl * dl + dm * dm <= radius * radius
            }
            Shape::Box { blc, trc } => {
                lm.l >= blc.l && lm.l <= trc.l && lm.m >= blc.m && lm.m <= trc.m
            }
        }
    }
}

/// A named area of the sky. Never mutated after construction.
#[derive(Debug, Clone, PartialEq)]
pub struct Region {
    name: String,
    shapes: Vec1<Shape>,
    frame: SkyFrame,
}

impl Region {
    pub fn new(name: impl Into<String>, shapes: Vec1<Shape>, frame: SkyFrame) -> Region {
        Region {
            name: name.into(),
            shapes,
            frame,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn shapes(&self) -> &[Shape] {
        &self.shapes
    }

    pub fn frame(&self) -> SkyFrame {
        self.frame
    }

    /// Is this direction inside any of the region's shapes?
    pub fn contains(&self, lm: Lm) -> bool {
        self.shapes.iter().any(|s| s.contains(lm))
    }
}

#[derive(Error, Debug)]
pub enum RegionError {
    #[error("Region '{name}' has no shapes")]
    NoShapes { name: String },

    #[error("Region '{name}' has a non-positive circle radius ({radius}°)")]
    BadRadius { name: String, radius: f64 },

    #[error("Region '{name}' has a box whose bottom-left corner isn't below and left of its top-right corner")]
    BadBox { name: String },
}

/// A shape as written in an observation file. All angles are in degrees.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ShapeConfig {
    Circle { centre: [f64; 2], radius: f64 },
    Box { blc: [f64; 2], trc: [f64; 2] },
}

/// A region as written in an observation file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionConfig {
    pub name: String,
    pub shapes: Vec<ShapeConfig>,
}

impl RegionConfig {
    pub fn parse(self, frame: SkyFrame) -> Result<Region, RegionError> {
        let RegionConfig { name, shapes } = self;
        let mut parsed = Vec::with_capacity(shapes.len());
        for shape in shapes {
            parsed.push(match shape {
                ShapeConfig::Circle { centre, radius } => {
                    if radius <= 0.0 {
                        return Err(RegionError::BadRadius { name, radius });
                    }
                    Shape::Circle {
                        centre: Lm::from_degrees(centre[0], centre[1]),
                        radius: radius.to_radians(),
                    }
                }
                ShapeConfig::Box { blc, trc } => {
                    if blc[0] >= trc[0] || blc[1] >= trc[1] {
                        return Err(RegionError::BadBox { name });
                    }
                    Shape::Box {
                        blc: Lm::from_degrees(blc[0], blc[1]),
                        trc: Lm::from_degrees(trc[0], trc[1]),
                    }
                }
            });
        }
        let shapes = Vec1::try_from_vec(parsed).map_err(|_| RegionError::NoShapes {
            name: name.clone(),
        })?;
        Ok(Region::new(name, shapes, frame))
    }
}

#[cfg(test)]
mod tests {
    use vec1::vec1;

    use super::*;

    #[test]
    fn test_region_contains_any_shape() {
        let region = Region::new(
            "two",
            vec1![
                Shape::Circle {
                    centre: Lm::new(0.01, 0.0),
                    radius: 0.001
                },
                Shape::Box {
                    blc: Lm::new(-0.02, -0.02),
                    trc: Lm::new(-0.01, -0.01)
                },
            ],
            SkyFrame::default(),
        );
        assert!(region.contains(Lm::new(0.0105, 0.0)));
        assert!(region.contains(Lm::new(-0.015, -0.012)));
        assert!(!region.contains(Lm::new(0.0, 0.0)));
        // The circle's edge is inclusive.
        assert!(region.contains(Lm::new(0.011, 0.0)));
    }

    #[test]
    fn test_region_config_parse() {
        let config = RegionConfig {
            name: "src".to_string(),
            shapes: vec![ShapeConfig::Circle {
                centre: [0.5, -0.25],
                radius: 0.1,
            }],
        };
        let region = config.parse(SkyFrame::default()).unwrap();
        assert_eq!(region.name(), "src");
        assert!(region.contains(Lm::from_degrees(0.5, -0.25)));
        assert!(!region.contains(Lm::from_degrees(0.7, -0.25)));
    }

    #[test]
    fn test_region_config_errors() {
        let no_shapes = RegionConfig {
            name: "empty".to_string(),
            shapes: vec![],
        };
        assert!(matches!(
            no_shapes.parse(SkyFrame::default()),
            Err(RegionError::NoShapes { .. })
        ));

        let bad_box = RegionConfig {
            name: "box".to_string(),
            shapes: vec![ShapeConfig::Box {
                blc: [1.0, 1.0],
                trc: [0.0, 2.0],
            }],
        };
        assert!(matches!(
            bad_box.parse(SkyFrame::default()),
            Err(RegionError::BadBox { .. })
        ));
    }
}

// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Imaging targets and the vocabulary shared by the heuristics, the sequence
//! managers and the control loop.

use std::fmt;

use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumIter, EnumString, IntoStaticStr};

use super::heuristics::ImagingMode;
use crate::misc::format_sig_figs;

/// Observing intents.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Display,
    EnumIter,
    EnumString,
    IntoStaticStr,
    Serialize,
    Deserialize,
)]
#[strum(serialize_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum Intent {
    Target,
    Phase,
    Bandpass,
    Check,
    Amplitude,
    Polarization,
    Polangle,
    Polleakage,
}

impl Intent {
    /// Calibrator images are made to assess calibration, not for science.
    pub fn is_calibrator(self) -> bool {
        !matches!(self, Intent::Target | Intent::Check)
    }

    /// The short name used in image names.
    pub fn short_name(self) -> &'static str {
        match self {
            Intent::Target => "sci",
            Intent::Phase => "ph",
            Intent::Bandpass => "bp",
            Intent::Check => "chk",
            Intent::Amplitude => "amp",
            Intent::Polarization => "pol",
            Intent::Polangle => "polang",
            Intent::Polleakage => "polleak",
        }
    }
}

/// Imaging spectral modes.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Display,
    EnumIter,
    EnumString,
    IntoStaticStr,
    Serialize,
    Deserialize,
)]
pub enum Specmode {
    /// Continuum over the selected spws.
    #[strum(serialize = "mfs")]
    #[serde(rename = "mfs")]
    Mfs,

    /// Spectral-line cube.
    #[strum(serialize = "cube")]
    #[serde(rename = "cube")]
    Cube,

    /// Aggregate continuum over line-free channels of all spws.
    #[strum(serialize = "cont")]
    #[serde(rename = "cont")]
    Cont,

    /// A cube binned to the representative bandwidth.
    #[strum(serialize = "repBW")]
    #[serde(rename = "repBW")]
    RepBw,
}

impl Specmode {
    pub fn is_cube(self) -> bool {
        matches!(self, Specmode::Cube | Specmode::RepBw)
    }

    /// The specmode string handed to the deconvolution engine; "cont" images
    /// are "mfs" images with a channel selection.
    pub fn engine_specmode(self) -> &'static str {
        match self {
            Specmode::Mfs | Specmode::Cont => "mfs",
            Specmode::Cube | Specmode::RepBw => "cube",
        }
    }
}

/// How the clean mask is made.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Display,
    EnumIter,
    EnumString,
    IntoStaticStr,
    Serialize,
    Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum HmMasking {
    /// The engine's auto-masking algorithm.
    Auto,

    /// A user-supplied mask image.
    Manual,

    /// A mask of the primary beam or the central region of the image.
    Centralregion,

    /// No mask.
    None,
}

/// How the cleaning threshold is derived.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, IntoStaticStr, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum HmCleaning {
    /// Use the threshold given.
    Manual,

    /// Derive the threshold from a sensitivity calculation (not available).
    Sensitivity,

    /// `tlimit` times the sensitivity.
    Rms,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, IntoStaticStr, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Weighting {
    Natural,
    Uniform,
    Briggs,
    Briggsbwtaper,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, IntoStaticStr, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Gridder {
    Standard,
    Mosaic,
    Wproject,
    Awproject,
    Awp2,
}

impl Gridder {
    pub fn is_aw(self) -> bool {
        matches!(self, Gridder::Awproject | Gridder::Awp2)
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, IntoStaticStr, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Deconvolver {
    Hogbom,
    Clark,
    Multiscale,
    Mtmfs,
}

/// A flux density. Thresholds are kept as numbers and only turned into engine
/// quantity strings at the edge.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default, Serialize, Deserialize)]
pub struct Flux {
    /// \[Jy\]
    pub jy: f64,
}

impl Flux {
    pub const ZERO: Flux = Flux { jy: 0.0 };

    pub fn from_jy(jy: f64) -> Flux {
        Flux { jy }
    }

    pub fn is_zero(self) -> bool {
        self.jy == 0.0
    }
}

impl std::ops::Mul<f64> for Flux {
    type Output = Flux;

    fn mul(self, rhs: f64) -> Flux {
        Flux { jy: self.jy * rhs }
    }
}

impl fmt::Display for Flux {
    /// The engine's quantity string. Zero is spelled the way the engine
    /// documents "no threshold".
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_zero() {
            write!(f, "0.0mJy")
        } else {
            write!(f, "{}Jy", format_sig_figs(self.jy, 6))
        }
    }
}

/// A synthesized (restoring) beam.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Beam {
    /// \[arcsec\]
    pub major: f64,

    /// \[arcsec\]
    pub minor: f64,

    /// \[degrees\]
    pub pa: f64,
}

impl Beam {
    /// The area of a Gaussian beam \[arcsec^2\].
    pub fn area(&self) -> f64 {
        std::f64::consts::PI * self.major * self.minor / (4.0 * std::f64::consts::LN_2)
    }
}

/// An imaging target as it is persisted between pipeline stages. The
/// heuristics object used to make this target is deliberately not part of
/// this record; it is rebuilt from `imaging_mode` when needed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CleanTarget {
    pub field: String,
    pub intent: Intent,
    pub spw: String,
    pub specmode: Specmode,
    pub imaging_mode: ImagingMode,

    #[serde(default)]
    pub vis: Vec<String>,
    #[serde(default)]
    pub imagename: Option<String>,
    #[serde(default)]
    pub phasecenter: Option<String>,
    #[serde(default)]
    pub cell: Option<Vec<String>>,
    #[serde(default)]
    pub imsize: Option<[usize; 2]>,
    #[serde(default)]
    pub stokes: Option<String>,
    #[serde(default)]
    pub gridder: Option<Gridder>,
    #[serde(default)]
    pub deconvolver: Option<Deconvolver>,
    #[serde(default)]
    pub nterms: Option<u32>,
    #[serde(default)]
    pub weighting: Option<Weighting>,
    #[serde(default)]
    pub robust: Option<f64>,
    #[serde(default)]
    pub uvtaper: Option<Vec<String>>,
    #[serde(default)]
    pub nchan: Option<i64>,
    #[serde(default)]
    pub start: Option<String>,
    #[serde(default)]
    pub width: Option<String>,
    #[serde(default)]
    pub nbin: Option<u32>,
    #[serde(default)]
    pub spwsel: Option<Vec<String>>,
    #[serde(default)]
    pub is_mosaic: bool,
    #[serde(default)]
    pub sensitivity: Option<Flux>,
}

impl CleanTarget {
    pub fn new(
        field: &str,
        intent: Intent,
        spw: &str,
        specmode: Specmode,
        imaging_mode: ImagingMode,
    ) -> CleanTarget {
        CleanTarget {
            field: field.to_string(),
            intent,
            spw: spw.to_string(),
            specmode,
            imaging_mode,
            vis: vec![],
            imagename: None,
            phasecenter: None,
            cell: None,
            imsize: None,
            stokes: None,
            gridder: None,
            deconvolver: None,
            nterms: None,
            weighting: None,
            robust: None,
            uvtaper: None,
            nchan: None,
            start: None,
            width: None,
            nbin: None,
            spwsel: None,
            is_mosaic: false,
            sensitivity: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;

    #[test]
    fn flux_strings() {
        assert_eq!(Flux::ZERO.to_string(), "0.0mJy");
        assert_eq!(Flux::from_jy(0.00123).to_string(), "0.00123Jy");
        assert_eq!((Flux::from_jy(0.001) * 2.5).to_string(), "0.0025Jy");
    }

    #[test]
    fn enum_strings() {
        assert_eq!(Specmode::from_str("repBW").unwrap(), Specmode::RepBw);
        assert_eq!(Specmode::Cont.engine_specmode(), "mfs");
        assert_eq!(Intent::from_str("TARGET").unwrap(), Intent::Target);
        assert_eq!(HmMasking::Centralregion.to_string(), "centralregion");
        assert_eq!(Weighting::Briggsbwtaper.to_string(), "briggsbwtaper");
        assert!(Intent::Phase.is_calibrator());
        assert!(!Intent::Check.is_calibrator());
    }

    #[test]
    fn clean_target_serialises_without_heuristics() {
        let mut t = CleanTarget::new("M100", Intent::Target, "17,19", Specmode::Cube, ImagingMode::Alma);
        t.imsize = Some([256, 256]);
        let s = serde_json::to_string(&t).unwrap();
        assert!(!s.contains("heuristics"));
        let t2: CleanTarget = serde_json::from_str(&s).unwrap();
        assert_eq!(t, t2);
    }
}

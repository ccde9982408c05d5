// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Errors associated with imaging a target.

use thiserror::Error;

use crate::{
    imaging::{contfile::ContFileError, heuristics::HeuristicsError, sequence::SequenceError},
    metadata::MetadataError,
    unit_parsing::UnitParseError,
};

/// Configuration errors. These abort imaging immediately; problems with the
/// data itself are recorded on the result instead.
#[derive(Error, Debug)]
pub enum TcleanError {
    #[error("No {0} was specified")]
    MissingInput(&'static str),

    #[error("Unknown hm_cleaning mode '{0}'; valid modes are: manual, rms")]
    UnknownHmCleaning(String),

    #[error("The 'sensitivity' hm_cleaning mode is not implemented")]
    SensitivityCleaning,

    #[error("Unknown hm_masking mode '{0}'; valid modes are: auto, manual, centralregion, none")]
    UnknownHmMasking(String),

    #[error("hm_cleaning is 'manual', but no threshold was given")]
    NoManualThreshold,

    #[error("No measurement sets have data for field '{field}', spw '{spw}'")]
    NoData { field: String, spw: String },

    #[error("Couldn't work out the imaging mode for telescope '{0}'; please specify one")]
    UnknownTelescope(String),

    /// Something went wrong with the data of this target.
    #[error("{0}")]
    TargetFailed(String),

    #[error(transparent)]
    Spectral(#[from] SpectralError),

    #[error(transparent)]
    Heuristics(#[from] HeuristicsError),

    #[error(transparent)]
    Sequence(#[from] SequenceError),

    #[error(transparent)]
    Metadata(#[from] MetadataError),

    #[error(transparent)]
    ContFile(#[from] ContFileError),

    #[error(transparent)]
    Unit(#[from] UnitParseError),
}

/// Problems with the spectral setup of a cube. These fail the target, not the
/// batch.
#[derive(Error, Debug, PartialEq)]
pub enum SpectralError {
    #[error("No frequency intersection among the selected measurement sets for field '{field}', spw {spw}")]
    NoIntersection { field: String, spw: u32 },

    #[error("width and nbin are mutually exclusive")]
    WidthAndNbin,

    #[error("The requested channel width {width_hz} Hz is narrower than the native channel width {native_hz} Hz")]
    WidthTooNarrow { width_hz: f64, native_hz: f64 },

    #[error("The start frequency {start_hz} Hz is outside of the valid range {lo_hz}~{hi_hz} Hz")]
    StartOutsideBand { start_hz: f64, lo_hz: f64, hi_hz: f64 },

    #[error("The requested channels end at {end_hz} Hz, outside of the valid range {lo_hz}~{hi_hz} Hz")]
    EndOutsideBand { end_hz: f64, lo_hz: f64, hi_hz: f64 },

    #[error("A velocity was given for '{0}', but there is no rest frequency to convert it with")]
    NoRestFreq(&'static str),

    #[error("Channel widths must be at least 1 channel; got {0}")]
    BadChannelWidth(i64),

    #[error("Couldn't parse '{input}': {err}")]
    Parse { input: String, err: String },
}

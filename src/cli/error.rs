// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Error type for all pipeline-imaging errors. This should be the *only* error
//! enum that is publicly visible.

use thiserror::Error;

use crate::{
    context::ContextError,
    engine::EngineError,
    imaging::{
        contfile::ContFileError, heuristics::HeuristicsError, sequence::SequenceError,
        tclean::TcleanError,
    },
    metadata::MetadataError,
};

/// The *only* publicly visible error from pipeline-imaging. Each error message
/// should point to some help, unless it's "generic".
#[derive(Error, Debug)]
pub enum ImagingError {
    /// An error deciding imaging parameters.
    #[error("{0}\n\nSee for more info: pipeline-imaging heuristics --help")]
    Heuristics(String),

    /// An error deciding masks and thresholds between iterations.
    #[error("{0}\n\nSee for more info: pipeline-imaging tclean --help")]
    Sequence(String),

    /// An error from the deconvolution engine or image tool.
    #[error("{0}\n\nIf you don't know what this means, try turning up verbosity (-v or -vv) and checking the toolkit's logs in the working directory.")]
    Engine(String),

    /// An error related to the inputs of tclean.
    #[error("{0}\n\nSee for more info: pipeline-imaging tclean --help")]
    Tclean(String),

    /// An error related to observation metadata.
    #[error("{0}\n\nThe observation metadata file is TOML, JSON or YAML describing each measurement set; see the README.")]
    Metadata(String),

    /// An error related to argument files.
    #[error("{0}\n\nArgument files are TOML or JSON with the same names as the command-line arguments; try --save-toml to get a template.")]
    ArgFile(String),

    /// A generic error that can't be clarified further with documentation, e.g.
    /// IO errors.
    #[error("{0}")]
    Generic(String),
}

// When changing the error propagation below, ensure `Self::from(e)` uses the
// correct `e`!

impl From<TcleanError> for ImagingError {
    fn from(e: TcleanError) -> Self {
        match e {
            TcleanError::Heuristics(e) => Self::from(e),
            TcleanError::Sequence(e) => Self::from(e),
            TcleanError::Metadata(e) => Self::from(e),
            TcleanError::ContFile(e) => Self::from(e),
            TcleanError::MissingInput(_)
            | TcleanError::UnknownHmCleaning(_)
            | TcleanError::SensitivityCleaning
            | TcleanError::UnknownHmMasking(_)
            | TcleanError::NoManualThreshold
            | TcleanError::NoData { .. }
            | TcleanError::UnknownTelescope(_)
            | TcleanError::TargetFailed(_)
            | TcleanError::Spectral(_)
            | TcleanError::Unit(_) => Self::Tclean(e.to_string()),
        }
    }
}

impl From<HeuristicsError> for ImagingError {
    fn from(e: HeuristicsError) -> Self {
        match e {
            HeuristicsError::Engine(e) => Self::from(e),
            HeuristicsError::Metadata(e) => Self::from(e),
            HeuristicsError::UnknownImagingMode(..)
            | HeuristicsError::InvalidDrCorrect(_)
            | HeuristicsError::NoValidBeams { .. }
            | HeuristicsError::NoSensitivity { .. }
            | HeuristicsError::NoSpws { .. }
            | HeuristicsError::BadCell(_)
            | HeuristicsError::Unit(_) => Self::Heuristics(e.to_string()),
        }
    }
}

impl From<SequenceError> for ImagingError {
    fn from(e: SequenceError) -> Self {
        match e {
            SequenceError::Engine(e) => Self::from(e),
            SequenceError::IterationZero
            | SequenceError::NoMask
            | SequenceError::NoSuchMask(_)
            | SequenceError::NoTemplate { .. } => Self::Sequence(e.to_string()),
        }
    }
}

impl From<EngineError> for ImagingError {
    fn from(e: EngineError) -> Self {
        Self::Engine(e.to_string())
    }
}

impl From<MetadataError> for ImagingError {
    fn from(e: MetadataError) -> Self {
        match e {
            MetadataError::IO(e) => Self::from(e),
            _ => Self::Metadata(e.to_string()),
        }
    }
}

impl From<ContFileError> for ImagingError {
    fn from(e: ContFileError) -> Self {
        Self::Tclean(e.to_string())
    }
}

impl From<ContextError> for ImagingError {
    fn from(e: ContextError) -> Self {
        Self::Generic(e.to_string())
    }
}

impl From<std::io::Error> for ImagingError {
    fn from(e: std::io::Error) -> Self {
        Self::Generic(e.to_string())
    }
}

// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Errors associated with imaging-parameter heuristics.

use thiserror::Error;

use crate::{engine::EngineError, metadata::MetadataError, unit_parsing::UnitParseError};

#[derive(Error, Debug)]
pub enum HeuristicsError {
    #[error("Unknown imaging mode '{0}'; valid modes are: {1}")]
    UnknownImagingMode(String, String),

    #[error("Invalid drcorrect value {0}; it must be positive, or -999 to derive it automatically")]
    InvalidDrCorrect(f64),

    #[error("No valid synthesized beams for field '{field}', spw '{spw}'")]
    NoValidBeams { field: String, spw: String },

    #[error("No sensitivity could be calculated for field '{field}', spw '{spw}'")]
    NoSensitivity { field: String, spw: String },

    #[error("No spectral windows of '{spw}' are in any of the measurement sets")]
    NoSpws { spw: String },

    #[error("Couldn't parse the cell size '{0}'")]
    BadCell(String),

    #[error(transparent)]
    Unit(#[from] UnitParseError),

    #[error(transparent)]
    Metadata(#[from] MetadataError),

    #[error(transparent)]
    Engine(#[from] EngineError),
}

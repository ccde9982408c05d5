// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Errors associated with observation metadata.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum MetadataError {
    #[error("Metadata file '{0}' doesn't have a recognised file extension! Valid extensions are: toml, json, yaml")]
    UnknownExtension(PathBuf),

    #[error("Couldn't decode the metadata in {file:?}:\n{err}")]
    Decode { file: PathBuf, err: String },

    #[error("Measurement set '{0}' has no antennas")]
    NoAntennas(String),

    #[error("Spectral window {spw} of measurement set '{vis}' has a nonsensical frequency range or channel width")]
    BadSpw { vis: String, spw: u32 },

    #[error("Measurement set '{0}' is not part of the observation")]
    UnknownVis(String),

    #[error("Spectral window {spw} is not in measurement set '{vis}'")]
    UnknownSpw { vis: String, spw: u32 },

    #[error("Field '{0}' is not part of the observation")]
    UnknownField(String),

    #[error("Couldn't parse '{0}' as a spectral window selection")]
    BadSpwSelection(String),

    #[error("The representative target is not available from the observation metadata")]
    NoRepresentativeTarget,

    #[error(transparent)]
    IO(#[from] std::io::Error),
}

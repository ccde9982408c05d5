// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ContextError {
    #[error("Couldn't decode the imaging context in {file:?}:\n{err}")]
    Decode { file: PathBuf, err: String },

    #[error("Couldn't encode the imaging context: {0}")]
    Encode(String),

    #[error(transparent)]
    IO(#[from] std::io::Error),
}

// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Errors from the external toolkit.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Couldn't start the toolkit executable '{exe}': {err}")]
    Spawn { exe: PathBuf, err: std::io::Error },

    #[error("The toolkit task '{task}' failed with exit code {code:?}:\n{stderr}")]
    TaskFailed {
        task: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("The toolkit task '{task}' didn't produce a return value")]
    NoReturn { task: String },

    #[error("Image '{0}' does not exist")]
    NoSuchImage(String),

    #[error("{0}")]
    Tool(String),

    #[error("Couldn't decode the toolkit's return value: {0}")]
    Decode(#[from] serde_json::Error),

    #[error(transparent)]
    IO(#[from] std::io::Error),
}

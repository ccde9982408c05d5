// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Errors associated with clean sequence managers.

use thiserror::Error;

use crate::engine::EngineError;

#[derive(Error, Debug)]
pub enum SequenceError {
    #[error("Sequence managers start at iteration 1; iteration 0 is the dirty image")]
    IterationZero,

    #[error("Manual masking needs a mask image, but none was given")]
    NoMask,

    #[error("Mask image '{0}' does not exist")]
    NoSuchMask(String),

    #[error("There is no image to put the clean mask '{mask}' on")]
    NoTemplate { mask: String },

    #[error(transparent)]
    Engine(#[from] EngineError),
}

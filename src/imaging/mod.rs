// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Iterative clean imaging.
//!
//! [`heuristics`] decides imaging parameters, [`sequence`] decides masks and
//! thresholds between iterations, [`cleanbase`] makes one engine call and
//! [`tclean`] drives the whole thing for one target. [`makeimages`] does it for
//! a list of targets.

pub mod cache;
pub mod cleanbase;
pub mod contfile;
pub mod heuristics;
pub mod makeimages;
pub mod products;
pub mod result;
pub mod sequence;
mod target;
pub mod tclean;
#[cfg(test)]
pub(crate) mod test_helpers;

pub use target::{
    Beam, CleanTarget, Deconvolver, Flux, Gridder, HmCleaning, HmMasking, Intent, Specmode,
    Weighting,
};

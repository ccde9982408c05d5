// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

/*!
Iterative clean imaging of radio-interferometric data.

Targets are imaged by repeatedly asking a deconvolution toolkit to clean
them, with imaging-parameter heuristics deciding the cell size, image size,
thresholds and masks, and a sequence manager deciding when to stop.
 */

mod cli;
pub mod constants;
pub mod context;
pub mod engine;
pub mod imaging;
pub mod metadata;
pub(crate) mod misc;
pub mod sexagesimal;
pub mod unit_parsing;

// Re-exports.
pub use cli::{ImagingError, PipelineImaging};

use crossbeam_utils::atomic::AtomicCell;

/// Should progress bars be drawn? Set once by the CLI.
static PROGRESS_BARS: AtomicCell<bool> = AtomicCell::new(false);

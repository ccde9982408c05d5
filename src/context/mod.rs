// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

/*!
The imaging state carried between pipeline stages.

Earlier stages decide what to image (the clean list); imaging consumes the
list and leaves summaries of its results behind. Beams and sensitivities are
expensive, so they're persisted too.
 */

mod error;
#[cfg(test)]
mod tests;

pub use error::ContextError;

use std::{
    fs::File,
    io::{BufReader, BufWriter, Write},
    path::{Path, PathBuf},
};

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::imaging::{
    cache::ImagingCaches, result::TcleanResult, CleanTarget, Flux, Intent, Specmode,
};

/// What's kept of an imaging result once the stage is done.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultSummary {
    pub field: String,
    pub intent: Option<Intent>,
    pub spw: String,
    pub specmode: Option<Specmode>,
    pub imagename: String,

    /// The final image, if there is one.
    pub image: Option<String>,
    pub pbcor: Option<String>,

    pub error: Option<String>,
    pub iterations: usize,
    pub sensitivity: Option<Flux>,
    pub threshold: Option<Flux>,
    pub stopcode: Option<i32>,
    pub image_rms: Option<f64>,
}

impl From<&TcleanResult> for ResultSummary {
    fn from(r: &TcleanResult) -> Self {
        let last = r.last_iteration();
        ResultSummary {
            field: r.field.clone(),
            intent: r.intent,
            spw: r.spw.clone(),
            specmode: r.specmode,
            imagename: r.imagename.clone(),
            image: last.map(|i| i.image.clone()),
            pbcor: last.map(|i| i.pbcor.clone()),
            error: r.error.clone(),
            iterations: r.num_iterations(),
            sensitivity: r.sensitivity,
            threshold: r.threshold,
            stopcode: r.stopcode,
            image_rms: r.image_rms,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImagingContext {
    /// The observation metadata file of the datasets being imaged.
    pub metadata_file: Option<PathBuf>,

    /// Targets waiting to be imaged.
    pub clean_list: Vec<CleanTarget>,

    pub results: Vec<ResultSummary>,

    pub caches: ImagingCaches,
}

impl ImagingContext {
    pub fn read<P: AsRef<Path>>(path: P) -> Result<ImagingContext, ContextError> {
        let path = path.as_ref();
        debug!("Reading the imaging context from {}", path.display());
        let f = BufReader::new(File::open(path)?);
        serde_json::from_reader(f).map_err(|e| ContextError::Decode {
            file: path.to_path_buf(),
            err: e.to_string(),
        })
    }

    /// Write the context. The file is replaced only once the new contents are
    /// completely written.
    pub fn write<P: AsRef<Path>>(&self, path: P) -> Result<(), ContextError> {
        let path = path.as_ref();
        let tmp = path.with_extension("json.tmp");
        {
            let mut f = BufWriter::new(File::create(&tmp)?);
            serde_json::to_writer_pretty(&mut f, self)
                .map_err(|e| ContextError::Encode(e.to_string()))?;
            f.flush()?;
        }
        std::fs::rename(&tmp, path)?;
        debug!("Wrote the imaging context to {}", path.display());
        Ok(())
    }

    /// Keep summaries of `results`. The clean list has been dealt with, so
    /// it's emptied.
    pub fn record_results(&mut self, results: &[TcleanResult]) {
        let num_failed = results.iter().filter(|r| !r.is_ok()).count();
        info!(
            "Recording {} imaging results ({num_failed} failed)",
            results.len()
        );
        self.results.extend(results.iter().map(ResultSummary::from));
        self.clean_list.clear();
    }

    /// The primary-beam corrected images that were made successfully.
    pub fn pbcor_images(&self) -> Vec<&str> {
        self.results
            .iter()
            .filter(|r| r.error.is_none())
            .filter_map(|r| r.pbcor.as_deref())
            .filter(|p| !p.is_empty())
            .collect()
    }
}

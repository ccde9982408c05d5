// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The outcome of imaging one target.

use std::collections::BTreeMap;

use log::warn;
use serde::{Deserialize, Serialize};

use super::{
    sequence::IterationStats, Deconvolver, Flux, Gridder, HmCleaning, HmMasking, Intent,
    Specmode, Weighting,
};

/// The products and diagnostics of one clean iteration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IterationRecord {
    pub iteration: u32,

    pub model: String,
    pub image: String,
    pub residual: String,
    pub psf: String,
    /// The primary beam image.
    pub flux: String,
    /// The mask the engine cleaned with.
    pub mask: String,
    /// The mask prepared for this iteration, if any.
    pub cleanmask: Option<String>,
    pub pbcor: String,
    pub alpha: Option<String>,

    pub niter: u64,
    pub threshold: Flux,
    pub sensitivity: Flux,
    pub nsigma: Option<f64>,
    pub usemask: String,
    pub hm_masking: Option<HmMasking>,

    pub stopcode: i32,
    pub stopreason: String,
    pub iterdone: u64,
    pub nmajordone: u32,
    pub peak_residuals: Vec<f64>,
    pub model_flux: Vec<f64>,

    /// Filled in after the iteration's images have been analysed.
    pub stats: Option<IterationStats>,
}

/// The imaging parameters that were actually used, after the heuristics
/// filled in everything that wasn't given explicitly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedImagingParams {
    pub vis: Vec<String>,
    pub field: Vec<String>,
    pub spw: Vec<String>,
    pub antenna: Vec<String>,
    pub specmode: Specmode,
    pub gridder: Gridder,
    pub deconvolver: Deconvolver,
    pub nterms: Option<u32>,
    pub imsize: [usize; 2],
    pub cell: Vec<String>,
    pub phasecenter: String,
    pub stokes: String,
    pub weighting: Weighting,
    pub robust: f64,
    pub uvtaper: Vec<String>,
    pub perchanweightdensity: bool,
    pub nchan: i64,
    pub start: String,
    pub width: String,
    pub restfreq: Option<String>,
    pub reffreq: Option<String>,
    pub is_mosaic: bool,
    pub hm_masking: HmMasking,
    pub hm_cleaning: HmCleaning,
    pub pblimit_image: f64,
    pub pblimit_cleanmask: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TcleanResult {
    pub field: String,
    pub intent: Option<Intent>,
    pub spw: String,
    pub specmode: Option<Specmode>,
    pub imagename: String,

    /// Keyed by iteration; iteration 0 is the dirty image. Only ever added to.
    pub(crate) iterations: BTreeMap<u32, IterationRecord>,

    /// Set when imaging this target failed. Batch drivers check this and move
    /// on to the next target.
    pub error: Option<String>,

    pub sensitivity: Option<Flux>,
    pub threshold: Option<Flux>,
    pub niter: Option<u64>,
    pub dirty_dynamic_range: Option<f64>,
    pub dr_correction_factor: Option<f64>,
    pub max_edr_used: bool,

    pub stopcode: Option<i32>,
    pub stopreason: Option<String>,
    pub iterdone: u64,

    pub image_min: Option<f64>,
    pub image_max: Option<f64>,
    pub image_rms: Option<f64>,
    pub residual_robust_rms: Option<f64>,

    /// Cube QA products over the line-free ("_fc") and all channels.
    pub mom0_fc: Option<String>,
    pub mom8_fc: Option<String>,
    pub mom0: Option<String>,
    pub mom8: Option<String>,

    pub params: Option<ResolvedImagingParams>,
}

impl TcleanResult {
    pub fn new(field: &str, intent: Intent, spw: &str, specmode: Specmode) -> TcleanResult {
        TcleanResult {
            field: field.to_string(),
            intent: Some(intent),
            spw: spw.to_string(),
            specmode: Some(specmode),
            ..Default::default()
        }
    }

    /// An error-flagged result.
    pub(crate) fn with_error(mut self, msg: String) -> TcleanResult {
        warn!("{msg}");
        self.error = Some(msg);
        self
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }

    /// Record a new iteration. Iterations are only ever appended; a record for
    /// an iteration that already exists is rejected.
    pub fn record_iteration(&mut self, record: IterationRecord) -> bool {
        if let Some(last) = self.iterations.keys().next_back() {
            if record.iteration <= *last {
                warn!(
                    "Not recording iteration {} of {}; iteration {last} is already recorded",
                    record.iteration, self.imagename
                );
                return false;
            }
        }
        self.iterations.insert(record.iteration, record);
        true
    }

    pub fn iteration(&self, iteration: u32) -> Option<&IterationRecord> {
        self.iterations.get(&iteration)
    }

    pub(crate) fn iteration_mut(&mut self, iteration: u32) -> Option<&mut IterationRecord> {
        self.iterations.get_mut(&iteration)
    }

    pub fn iterations(&self) -> impl Iterator<Item = &IterationRecord> {
        self.iterations.values()
    }

    pub fn num_iterations(&self) -> usize {
        self.iterations.len()
    }

    pub fn last_iteration(&self) -> Option<&IterationRecord> {
        self.iterations.values().next_back()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(iteration: u32) -> IterationRecord {
        IterationRecord {
            iteration,
            image: format!("img.I.iter{iteration}.image"),
            ..Default::default()
        }
    }

    #[test]
    fn test_iterations_are_append_only() {
        let mut result = TcleanResult::new("M100", Intent::Target, "17", Specmode::Cube);
        assert!(result.record_iteration(record(0)));
        assert!(result.record_iteration(record(1)));
        assert!(!result.record_iteration(record(1)));
        assert!(!result.record_iteration(record(0)));
        assert_eq!(result.num_iterations(), 2);
        assert_eq!(result.last_iteration().unwrap().iteration, 1);
        assert_eq!(
            result.iterations().map(|r| r.iteration).collect::<Vec<_>>(),
            vec![0, 1]
        );
    }

    #[test]
    fn test_error_result() {
        let result = TcleanResult::new("M100", Intent::Target, "17", Specmode::Cube)
            .with_error("no frequency intersection".to_string());
        assert!(!result.is_ok());
        assert_eq!(result.error.as_deref(), Some("no frequency intersection"));
    }
}

// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Image every target of a clean list.
//!
//! A target that fails doesn't stop the batch; its result carries the error.
//! Targets may be imaged in parallel, in which case each worker images with
//! its own copy of the caches, and whatever the workers learn is folded back
//! in afterwards.

use std::{path::PathBuf, sync::Arc};

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use log::{debug, error, info};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use super::{
    cache::ImagingCaches,
    heuristics::AutoboxParams,
    result::TcleanResult,
    tclean::{Tclean, TcleanInputs},
    CleanTarget,
};
use crate::{
    engine::{DeconvolutionEngine, ImageTool},
    metadata::ObservationMetadata,
    PROGRESS_BARS,
};

/// Settings shared by every target of a batch. A target's own settings win.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MakeImagesOptions {
    pub hm_masking: Option<String>,
    pub hm_cleaning: Option<String>,
    pub tlimit: Option<f64>,
    pub drcorrect: Option<f64>,
    pub nsigma: Option<f64>,
    pub pblimit: Option<f64>,
    pub autobox: AutoboxParams,
    pub cont_file: Option<PathBuf>,
    pub prefix: Option<String>,
    pub stage: Option<u32>,
    /// Image targets at the same time.
    pub parallel_targets: bool,
}

pub struct MakeImages<'a> {
    options: MakeImagesOptions,
    metadata: Arc<ObservationMetadata>,
    engine: &'a dyn DeconvolutionEngine,
    tool: &'a dyn ImageTool,
}

impl<'a> MakeImages<'a> {
    pub fn new(
        options: MakeImagesOptions,
        metadata: Arc<ObservationMetadata>,
        engine: &'a dyn DeconvolutionEngine,
        tool: &'a dyn ImageTool,
    ) -> MakeImages<'a> {
        MakeImages {
            options,
            metadata,
            engine,
            tool,
        }
    }

    /// The inputs used to image `target`.
    pub fn inputs_for(&self, target: &CleanTarget) -> TcleanInputs {
        let o = &self.options;
        let mut inputs = TcleanInputs::from(target);
        inputs.hm_masking = inputs.hm_masking.or_else(|| o.hm_masking.clone());
        inputs.hm_cleaning = inputs.hm_cleaning.or_else(|| o.hm_cleaning.clone());
        inputs.tlimit = inputs.tlimit.or(o.tlimit);
        inputs.drcorrect = inputs.drcorrect.or(o.drcorrect);
        inputs.nsigma = inputs.nsigma.or(o.nsigma);
        inputs.pblimit = inputs.pblimit.or(o.pblimit);
        inputs.autobox = o.autobox.with_overrides(&inputs.autobox);
        inputs.cont_file = inputs.cont_file.or_else(|| o.cont_file.clone());
        inputs.prefix = inputs.prefix.or_else(|| o.prefix.clone());
        inputs.stage = inputs.stage.or(o.stage);
        inputs
    }

    /// Image one target. Errors of any kind end up on the result.
    fn image(&self, i: usize, target: &CleanTarget, caches: &mut ImagingCaches) -> TcleanResult {
        debug!(
            "Target {}: field {}, intent {}, spw {}, specmode {}",
            i + 1,
            target.field,
            target.intent,
            target.spw,
            target.specmode
        );
        let tclean = Tclean::new(self.inputs_for(target), self.metadata.clone(), self.engine, self.tool);
        match tclean.run(caches) {
            Ok(r) => r,
            Err(e) => {
                error!("Couldn't image field {} spw {}: {e}", target.field, target.spw);
                TcleanResult {
                    error: Some(e.to_string()),
                    ..TcleanResult::new(&target.field, target.intent, &target.spw, target.specmode)
                }
            }
        }
    }

    /// Image all of `targets`, in order. One result is returned per target.
    pub fn run(&self, targets: &[CleanTarget], caches: &mut ImagingCaches) -> Vec<TcleanResult> {
        info!("Imaging {} targets", targets.len());
        let pb = ProgressBar::with_draw_target(
            Some(targets.len() as _),
            if PROGRESS_BARS.load() {
                ProgressDrawTarget::stdout()
            } else {
                ProgressDrawTarget::hidden()
            },
        )
        .with_style(
            ProgressStyle::default_bar()
                .template("{msg:17}: [{wide_bar:.blue}] {pos:2}/{len:2} targets ({elapsed_precise}<{eta_precise})")
                .unwrap()
                .progress_chars("=> "),
        )
        .with_position(0)
        .with_message("Imaging");

        let results: Vec<TcleanResult> = if self.options.parallel_targets && targets.len() > 1 {
            let base: &ImagingCaches = caches;
            let (results, worker_caches): (Vec<_>, Vec<_>) = targets
                .par_iter()
                .enumerate()
                .map(|(i, target)| {
                    let mut own = base.clone();
                    let r = self.image(i, target, &mut own);
                    pb.inc(1);
                    (r, own)
                })
                .unzip();
            for c in worker_caches {
                caches.absorb(c);
            }
            results
        } else {
            targets
                .iter()
                .enumerate()
                .map(|(i, target)| {
                    let r = self.image(i, target, caches);
                    pb.inc(1);
                    r
                })
                .collect()
        };
        pb.finish_with_message("Imaging complete");

        let num_failed = results.iter().filter(|r| !r.is_ok()).count();
        if num_failed > 0 {
            info!(
                "Imaged {} of {} targets; {num_failed} failed",
                targets.len() - num_failed,
                targets.len()
            );
        } else {
            info!("Imaged all {} targets", targets.len());
        }
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imaging::{
        heuristics::ImagingMode,
        test_helpers::{alma_12m_metadata, MockEngine},
        Intent, Specmode,
    };

    fn targets() -> Vec<CleanTarget> {
        let mut cont = CleanTarget::new("M100", Intent::Target, "17,19", Specmode::Mfs, ImagingMode::Alma);
        cont.imsize = Some([64, 64]);
        let mut missing = CleanTarget::new("NGC253", Intent::Target, "17", Specmode::Mfs, ImagingMode::Alma);
        missing.imsize = Some([64, 64]);
        let mut cal = CleanTarget::new("J1229+0203", Intent::Phase, "17", Specmode::Mfs, ImagingMode::Alma);
        cal.imsize = Some([64, 64]);
        vec![cont, missing, cal]
    }

    fn options() -> MakeImagesOptions {
        MakeImagesOptions {
            hm_masking: Some("none".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_failures_dont_stop_the_batch() {
        let engine = MockEngine::new();
        let md = alma_12m_metadata();
        let mut caches = ImagingCaches::default();
        let mi = MakeImages::new(options(), md, &engine, &engine);
        let results = mi.run(&targets(), &mut caches);

        assert_eq!(results.len(), 3);
        assert!(results[0].is_ok(), "{:?}", results[0].error);
        assert_eq!(results[1].field, "NGC253");
        assert!(results[1].error.is_some());
        assert!(results[2].is_ok(), "{:?}", results[2].error);
        assert_eq!(results[2].intent, Some(Intent::Phase));
        // The good targets needed beams.
        assert!(!caches.beams.is_empty());
    }

    #[test]
    fn test_parallel_targets_share_nothing() {
        let engine = MockEngine::new();
        let md = alma_12m_metadata();
        let mut caches = ImagingCaches::default();
        let mi = MakeImages::new(
            MakeImagesOptions {
                parallel_targets: true,
                ..options()
            },
            md,
            &engine,
            &engine,
        );
        let results = mi.run(&targets(), &mut caches);

        // Results come back in the order of the clean list.
        let fields: Vec<&str> = results.iter().map(|r| r.field.as_str()).collect();
        assert_eq!(fields, vec!["M100", "NGC253", "J1229+0203"]);
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 2);
        // The workers' beams are folded back in.
        assert!(!caches.beams.is_empty());
    }

    #[test]
    fn test_target_settings_win() {
        let engine = MockEngine::new();
        let mi = MakeImages::new(
            MakeImagesOptions {
                tlimit: Some(4.0),
                autobox: AutoboxParams {
                    noisethreshold: Some(4.25),
                    ..Default::default()
                },
                stage: Some(7),
                ..options()
            },
            alma_12m_metadata(),
            &engine,
            &engine,
        );
        let mut t = targets().remove(0);
        t.imagename = Some("m100.cont".to_string());
        let inputs = mi.inputs_for(&t);
        assert_eq!(inputs.tlimit, Some(4.0));
        assert_eq!(inputs.hm_masking.as_deref(), Some("none"));
        assert_eq!(inputs.autobox.noisethreshold, Some(4.25));
        assert_eq!(inputs.stage, Some(7));
        assert_eq!(inputs.imagename.as_deref(), Some("m100.cont"));
        assert_eq!(inputs.imaging_mode.as_deref(), Some("ALMA"));
    }
}

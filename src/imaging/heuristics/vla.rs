// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! VLA imaging heuristics.

use log::debug;

use super::{
    base, AutoboxParams, HeuristicsContext, ImageParamsHeuristics, ImagingMode,
    KeepIteratingInputs, NiterInputs,
};
use crate::{
    constants::*,
    imaging::{Deconvolver, HmMasking, Intent, Specmode},
};

/// The n-sigma stopping threshold used with auto-masking.
const VLA_AUTO_NSIGMA: f64 = 4.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VlaFlavour {
    Standard,

    /// Self-calibration imaging.
    Scal,
}

#[derive(Debug, Clone)]
pub struct VlaHeuristics {
    context: HeuristicsContext,
    flavour: VlaFlavour,
}

impl VlaHeuristics {
    pub fn new(context: HeuristicsContext, flavour: VlaFlavour) -> VlaHeuristics {
        VlaHeuristics { context, flavour }
    }
}

impl ImageParamsHeuristics for VlaHeuristics {
    fn imaging_mode(&self) -> ImagingMode {
        match self.flavour {
            VlaFlavour::Standard => ImagingMode::Vla,
            VlaFlavour::Scal => ImagingMode::VlaScal,
        }
    }

    fn context(&self) -> &HeuristicsContext {
        &self.context
    }

    /// VLA bands are wide; all continuum imaging is multi-term.
    fn deconvolver(&self, specmode: Specmode, _spws: &[u32]) -> Deconvolver {
        if specmode.is_cube() {
            Deconvolver::Hogbom
        } else {
            Deconvolver::Mtmfs
        }
    }

    fn nsigma(&self, _iteration: u32, hm_nsigma: Option<f64>, hm_masking: HmMasking) -> Option<f64> {
        match (hm_nsigma, hm_masking) {
            (Some(n), _) => Some(n),
            (None, HmMasking::Auto) => Some(VLA_AUTO_NSIGMA),
            (None, _) => None,
        }
    }

    fn cyclefactor(&self, _iteration: u32) -> Option<f64> {
        Some(3.0)
    }

    fn datacolumn(&self) -> Option<String> {
        match self.flavour {
            VlaFlavour::Scal => Some("corrected".to_string()),
            VlaFlavour::Standard => None,
        }
    }

    fn niter_correction(&self, inputs: &NiterInputs) -> u64 {
        let (lo, hi) = VLA_NITER_BOUNDS;
        let niter = base::estimate_niter(inputs);
        let clamped = niter.clamp(lo, hi);
        if clamped != niter {
            debug!("Clamping niter {niter} to {clamped}");
        }
        clamped
    }

    fn get_autobox_params(
        &self,
        _iteration: u32,
        _intent: Intent,
        specmode: Specmode,
        _robust: f64,
    ) -> AutoboxParams {
        AutoboxParams {
            sidelobethreshold: Some(2.0),
            noisethreshold: Some(5.0),
            lownoisethreshold: Some(1.5),
            negativethreshold: Some(0.0),
            minbeamfrac: Some(0.3),
            growiterations: Some(75),
            dogrowprune: Some(true),
            minpercentchange: Some(if specmode.is_cube() { 1.0 } else { -1.0 }),
            fastnoise: Some(false),
        }
    }

    /// One more pass after the first cleaned iteration if auto-masking is in
    /// use or the iteration limit was hit.
    fn keep_iterating(&self, inputs: &KeepIteratingInputs) -> (bool, HmMasking) {
        match inputs.iteration {
            0 => (true, inputs.hm_masking),
            1 if self.flavour == VlaFlavour::Standard
                && (inputs.hm_masking == HmMasking::Auto || inputs.stopcode == 1) =>
            {
                (true, inputs.hm_masking)
            }
            _ => (false, inputs.hm_masking),
        }
    }

    fn tclean_stopcode_ignore(&self) -> Vec<i32> {
        vec![1, 5]
    }
}

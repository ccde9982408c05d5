// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! VLA Sky Survey imaging heuristics.
//!
//! The survey images are made to a fixed recipe: most parameters are
//! constants rather than functions of the data.

use super::{
    base, AutoboxParams, HeuristicsContext, HeuristicsError, ImageParamsHeuristics, ImagingMode,
    KeepIteratingInputs, NiterInputs,
};
use crate::{
    constants::*,
    engine::ImageTool,
    imaging::{Beam, Deconvolver, Gridder, HmMasking, Intent, Specmode},
};

const VLASS_NITER: u64 = 20000;
const VLASS_CYCLENITER: i64 = 5000;
const VLASS_ROBUST: f64 = 1.0;
const VLASS_SE_PBLIMITS: (f64, f64) = (0.02, 0.4);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VlassFlavour {
    /// Quick-look.
    Ql,

    /// Single-epoch continuum.
    SeCont,

    /// Single-epoch continuum with AW-projection, one w-plane.
    SeContAwpP001,

    /// Single-epoch continuum with AW-projection, 32 w-planes.
    SeContAwpP032,

    SeContMosaic,

    /// Single-epoch continuum, tapered.
    SeTaper,

    SeCube,
}

#[derive(Debug, Clone)]
pub struct VlassHeuristics {
    context: HeuristicsContext,
    flavour: VlassFlavour,
}

impl VlassHeuristics {
    pub fn new(context: HeuristicsContext, flavour: VlassFlavour) -> VlassHeuristics {
        VlassHeuristics { context, flavour }
    }

    fn is_se(&self) -> bool {
        self.flavour != VlassFlavour::Ql
    }
}

impl ImageParamsHeuristics for VlassHeuristics {
    fn imaging_mode(&self) -> ImagingMode {
        match self.flavour {
            VlassFlavour::Ql => ImagingMode::VlassQl,
            VlassFlavour::SeCont => ImagingMode::VlassSeCont,
            VlassFlavour::SeContAwpP001 => ImagingMode::VlassSeContAwpP001,
            VlassFlavour::SeContAwpP032 => ImagingMode::VlassSeContAwpP032,
            VlassFlavour::SeContMosaic => ImagingMode::VlassSeContMosaic,
            VlassFlavour::SeTaper => ImagingMode::VlassSeTaper,
            VlassFlavour::SeCube => ImagingMode::VlassSeCube,
        }
    }

    fn context(&self) -> &HeuristicsContext {
        &self.context
    }

    fn robust(&self, _specmode: Specmode) -> f64 {
        VLASS_ROBUST
    }

    fn uvtaper(&self) -> Vec<String> {
        match self.flavour {
            VlassFlavour::SeTaper => vec!["3arcsec".to_string()],
            _ => vec![],
        }
    }

    fn needs_beam(&self) -> bool {
        false
    }

    fn cell(&self, _beam: Option<&Beam>) -> Result<Vec<String>, HeuristicsError> {
        let cell = if self.is_se() { "0.6arcsec" } else { "1.0arcsec" };
        Ok(vec![cell.to_string(), cell.to_string()])
    }

    fn imsize(
        &self,
        _field: &str,
        _intent: Intent,
        _cell_arcsec: f64,
        _primary_beam_arcsec: f64,
        _pblimit: f64,
        _is_mosaic: bool,
    ) -> [usize; 2] {
        match self.flavour {
            VlassFlavour::Ql => VLASS_QL_IMSIZE,
            VlassFlavour::SeCube => VLASS_SE_CUBE_IMSIZE,
            _ => VLASS_SE_IMSIZE,
        }
    }

    fn pblimits(&self, pb: Option<&str>, tool: &dyn ImageTool) -> (f64, f64) {
        if self.is_se() {
            VLASS_SE_PBLIMITS
        } else {
            base::pblimits(pb, tool)
        }
    }

    fn gridder(&self, _intent: Intent, _is_mosaic: bool) -> Gridder {
        match self.flavour {
            VlassFlavour::Ql | VlassFlavour::SeContMosaic => Gridder::Mosaic,
            VlassFlavour::SeContAwpP001 | VlassFlavour::SeContAwpP032 => Gridder::Awproject,
            VlassFlavour::SeCont | VlassFlavour::SeTaper | VlassFlavour::SeCube => Gridder::Awp2,
        }
    }

    fn deconvolver(&self, _specmode: Specmode, _spws: &[u32]) -> Deconvolver {
        Deconvolver::Mtmfs
    }

    fn nterms(&self, _deconvolver: Deconvolver) -> Option<u32> {
        match self.flavour {
            VlassFlavour::SeCube => Some(1),
            _ => Some(2),
        }
    }

    /// Tier-1 masks are cleaned deeper than the Tier-2 ones.
    fn nsigma(&self, iteration: u32, hm_nsigma: Option<f64>, _hm_masking: HmMasking) -> Option<f64> {
        if hm_nsigma.is_some() {
            return hm_nsigma;
        }
        match (self.flavour, iteration) {
            (VlassFlavour::Ql, _) => Some(4.5),
            (_, 2) => Some(3.0),
            _ => Some(4.5),
        }
    }

    fn cyclefactor(&self, _iteration: u32) -> Option<f64> {
        Some(3.0)
    }

    fn cycleniter(&self, _iteration: u32) -> Option<i64> {
        Some(VLASS_CYCLENITER)
    }

    fn scales(&self, _iteration: u32) -> Option<Vec<u32>> {
        self.is_se().then(|| vec![0, 5, 12])
    }

    fn smallscalebias(&self) -> Option<f64> {
        self.is_se().then_some(0.4)
    }

    fn niter(&self) -> u64 {
        VLASS_NITER
    }

    /// The survey's iteration budget is fixed.
    fn niter_correction(&self, inputs: &NiterInputs) -> u64 {
        inputs.niter
    }

    fn get_autobox_params(
        &self,
        _iteration: u32,
        _intent: Intent,
        _specmode: Specmode,
        _robust: f64,
    ) -> AutoboxParams {
        if !self.is_se() {
            return AutoboxParams::default();
        }
        AutoboxParams {
            sidelobethreshold: Some(3.0),
            noisethreshold: Some(5.0),
            lownoisethreshold: Some(1.5),
            negativethreshold: Some(0.0),
            minbeamfrac: Some(0.3),
            growiterations: Some(50),
            dogrowprune: Some(true),
            minpercentchange: Some(-1.0),
            fastnoise: Some(false),
        }
    }

    /// Every configured mask gets its own iteration.
    fn keep_iterating(&self, inputs: &KeepIteratingInputs) -> (bool, HmMasking) {
        (
            inputs.iteration == 0 || (inputs.iteration as usize) < inputs.num_masks,
            inputs.hm_masking,
        )
    }

    fn tclean_stopcode_ignore(&self) -> Vec<i32> {
        vec![1, 5]
    }

    fn default_hm_masking(&self) -> HmMasking {
        if self.is_se() {
            HmMasking::Manual
        } else {
            HmMasking::None
        }
    }

    fn specmode(&self, _requested: Option<Specmode>) -> Specmode {
        match self.flavour {
            VlassFlavour::SeCube => Specmode::Cube,
            _ => Specmode::Mfs,
        }
    }

    fn usepointing(&self, gridder: Gridder) -> Option<bool> {
        gridder.is_aw().then_some(true)
    }

    fn wprojplanes(&self, gridder: Gridder) -> Option<i32> {
        if !gridder.is_aw() {
            return None;
        }
        match self.flavour {
            VlassFlavour::SeContAwpP001 => Some(1),
            _ => Some(32),
        }
    }

    fn conjbeams(&self) -> Option<bool> {
        self.is_se().then_some(false)
    }

    fn rotatepastep(&self, gridder: Gridder) -> Option<f64> {
        gridder.is_aw().then_some(5.0)
    }

    fn pointingoffsetsigdev(&self, gridder: Gridder) -> Option<Vec<f64>> {
        gridder.is_aw().then(|| vec![300.0, 30.0])
    }

    fn datacolumn(&self) -> Option<String> {
        Some("data".to_string())
    }

    fn reffreq(&self, _deconvolver: Deconvolver, _spws: &[u32]) -> Option<String> {
        Some("3.0GHz".to_string())
    }

    /// The single-epoch recipe finishes with a primary-beam-only pass.
    fn mask_list(&self, user_masks: &[String]) -> Vec<String> {
        let mut masks = user_masks.to_vec();
        if self.is_se() {
            masks.push("pb".to_string());
        }
        masks
    }

    fn cfcache(&self, imagename: &str, wbawp: bool) -> Option<String> {
        if !self.is_se() || !self.gridder(Intent::Target, false).is_aw() {
            return None;
        }
        Some(if wbawp {
            format!("{imagename}.cfcache")
        } else {
            format!("{imagename}.cfcache.nowb")
        })
    }
}

// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! VLASS single-epoch continuum imaging restores with the PSF of narrow-band
//! AW-projection. That PSF is made first, then swapped in for the wide-band
//! PSF of the dirty image.

use log::{debug, info};

use crate::{
    engine::{DeconvolutionEngine, EngineError, ImageTool, TcleanParams},
    imaging::{
        heuristics::ImageParamsHeuristics,
        products::{iteration_prefix, product_images, Product},
        Deconvolver,
    },
    misc::expensive_op,
};

/// The engine name of the narrow-band PSF run.
fn nowb_prefix(common: &TcleanParams) -> String {
    format!("{}.nowb", iteration_prefix(&common.imagename, &common.stokes, 0))
}

fn nterms(common: &TcleanParams) -> Option<u32> {
    if common.deconvolver == Deconvolver::Mtmfs.to_string() {
        common.nterms
    } else {
        None
    }
}

/// Make the narrow-band PSF. Returns the engine name it was made with, or
/// `None` if this gridder doesn't need one.
pub(super) fn make_nowb_psf(
    engine: &dyn DeconvolutionEngine,
    h: &dyn ImageParamsHeuristics,
    common: &TcleanParams,
) -> Result<Option<String>, EngineError> {
    let cfcache = match h.cfcache(&common.imagename, false) {
        Some(c) => c,
        None => {
            debug!("{} doesn't use AW-projection; no narrow-band PSF", common.imagename);
            return Ok(None);
        }
    };
    let imagename = nowb_prefix(common);
    info!("Making the narrow-band PSF {imagename}");
    let params = TcleanParams {
        imagename: imagename.clone(),
        niter: 0,
        calcpsf: true,
        calcres: false,
        restoration: false,
        pbcor: false,
        wbawp: Some(false),
        cfcache: Some(cfcache),
        ..common.clone()
    };
    expensive_op(
        || engine.tclean(&params),
        "Still waiting for the narrow-band PSF",
    )?;
    Ok(Some(imagename))
}

/// Replace the dirty image's PSF with the narrow-band one.
pub(super) fn swap_psf(
    tool: &dyn ImageTool,
    nowb: &str,
    common: &TcleanParams,
) -> Result<(), EngineError> {
    let prefix = iteration_prefix(&common.imagename, &common.stokes, 0);
    for psf in product_images(&common.imagename, &common.stokes, 0, Product::Psf, nterms(common)) {
        let from = psf.replacen(&prefix, nowb, 1);
        debug!("Replacing {psf} with {from}");
        if tool.exists(&psf) {
            tool.remove_image(&psf)?;
        }
        tool.copy_image(&from, &psf)?;
    }
    Ok(())
}

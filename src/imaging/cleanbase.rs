// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! One run of the deconvolution engine.
//!
//! Given fully-resolved parameters, submit exactly one engine job and record
//! its image products against the iteration number. Products are named
//! `<imagename>.<stokes>.iter<N>.<suffix>`. From iteration 1 on, the products
//! of the previous iteration are copied to the new names first so the engine
//! can restart from them instead of remaking the PSF and residual.

use log::{debug, error, trace};

use super::{
    products::{iteration_prefix, product_images, product_name, Product},
    result::{IterationRecord, TcleanResult},
    sequence::UseMask,
    Deconvolver, Flux, HmMasking,
};
use crate::{
    engine::{DeconvolutionEngine, EngineError, ImageTool, TcleanParams},
    imaging::heuristics::AutoboxParams,
    misc::expensive_op,
};

/// The inputs of one engine run.
#[derive(Debug, Clone)]
pub struct CleanBaseInputs {
    /// The parameters shared by every iteration of a target. `imagename` is
    /// the base name (no stokes or iteration) and `stokes` the stokes
    /// parameters; both go into product names.
    pub common: TcleanParams,

    pub iteration: u32,
    pub niter: u64,
    pub threshold: Flux,
    /// Recorded with the iteration; the engine doesn't use it.
    pub sensitivity: Flux,
    pub nsigma: Option<f64>,
    pub cycleniter: Option<i64>,
    pub cyclefactor: Option<f64>,
    pub scales: Option<Vec<u32>>,

    pub usemask: UseMask,
    pub cleanmask: Option<String>,
    pub pbmask: Option<f64>,
    /// Only used with auto-masking.
    pub autobox: AutoboxParams,
    pub hm_masking: Option<HmMasking>,

    pub restoration: bool,
    pub pbcor: bool,

    /// Start from the previous iteration's products.
    pub restart: bool,
}

impl CleanBaseInputs {
    fn nterms(&self) -> Option<u32> {
        if self.common.deconvolver == Deconvolver::Mtmfs.to_string() {
            self.common.nterms
        } else {
            None
        }
    }

    fn product(&self, iteration: u32, product: Product) -> String {
        product_name(
            &self.common.imagename,
            &self.common.stokes,
            iteration,
            product,
            self.nterms(),
        )
    }

    /// The engine's parameters for this run.
    pub fn to_params(&self, calcpsf: bool, calcres: bool) -> TcleanParams {
        let auto = self.usemask == UseMask::AutoMultithresh;
        let autobox = if auto {
            self.autobox
        } else {
            AutoboxParams::default()
        };
        TcleanParams {
            imagename: iteration_prefix(&self.common.imagename, &self.common.stokes, self.iteration),
            nterms: self.nterms(),
            niter: self.niter,
            threshold: self.threshold.to_string(),
            nsigma: self.nsigma,
            cycleniter: self.cycleniter,
            cyclefactor: self.cyclefactor,
            scales: self.scales.clone(),
            usemask: self.usemask.to_string(),
            mask: self.cleanmask.clone().unwrap_or_default(),
            pbmask: self.pbmask,
            sidelobethreshold: autobox.sidelobethreshold,
            noisethreshold: autobox.noisethreshold,
            lownoisethreshold: autobox.lownoisethreshold,
            negativethreshold: autobox.negativethreshold,
            minbeamfrac: autobox.minbeamfrac,
            growiterations: autobox.growiterations,
            dogrowprune: autobox.dogrowprune,
            minpercentchange: autobox.minpercentchange,
            fastnoise: autobox.fastnoise,
            restoration: self.restoration,
            pbcor: self.pbcor,
            calcpsf,
            calcres,
            restart: true,
            ..self.common.clone()
        }
    }
}

/// Copy the products of the previous iteration to this iteration's names.
/// Returns whether the PSF and residual are now in place.
fn reuse_previous_products(
    tool: &dyn ImageTool,
    inputs: &CleanBaseInputs,
) -> Result<(bool, bool), EngineError> {
    let (imagename, stokes, nterms) = (&inputs.common.imagename, &inputs.common.stokes, inputs.nterms());
    let mut have_psf = true;
    let mut have_residual = true;
    for product in Product::RESTART {
        let from = product_images(imagename, stokes, inputs.iteration - 1, product, nterms);
        let to = product_images(imagename, stokes, inputs.iteration, product, nterms);
        for (from, to) in from.iter().zip(to.iter()) {
            if tool.exists(to) {
                trace!("{to} already exists");
                continue;
            }
            if tool.exists(from) {
                debug!("Reusing {from} as {to}");
                tool.copy_image(from, to)?;
            } else {
                match product {
                    Product::Psf => have_psf = false,
                    Product::Residual => have_residual = false,
                    _ => (),
                }
            }
        }
    }
    Ok((have_psf, have_residual))
}

/// Run the engine once and record the products in `result` (a new result is
/// made if there isn't one yet). Failures are recorded in `result.error`;
/// callers must check it.
pub fn clean_base(
    engine: &dyn DeconvolutionEngine,
    tool: &dyn ImageTool,
    inputs: &CleanBaseInputs,
    result: Option<TcleanResult>,
) -> TcleanResult {
    let mut result = result.unwrap_or_else(|| TcleanResult {
        imagename: inputs.common.imagename.clone(),
        ..Default::default()
    });
    let iteration = inputs.iteration;

    let (calcpsf, calcres) = if iteration > 0 && inputs.restart {
        match reuse_previous_products(tool, inputs) {
            Ok((have_psf, have_residual)) => (!have_psf, !have_residual),
            Err(e) => {
                debug!("Couldn't reuse the products of iteration {}: {e}", iteration - 1);
                (true, true)
            }
        }
    } else {
        (true, true)
    };

    let params = inputs.to_params(calcpsf, calcres);
    debug!(
        "Iteration {iteration} of {}: niter {}, threshold {}, usemask '{}', mask '{}'",
        inputs.common.imagename, params.niter, params.threshold, params.usemask, params.mask
    );
    let ret = match expensive_op(
        || engine.tclean(&params),
        "Still waiting for the deconvolution engine",
    ) {
        Ok(r) => r,
        Err(e) => {
            let msg = format!(
                "The deconvolution engine failed on iteration {iteration} of {}: {e}",
                inputs.common.imagename
            );
            error!("{msg}");
            result.error = Some(msg);
            return result;
        }
    };

    let nterms = inputs.nterms();
    let record = IterationRecord {
        iteration,
        model: inputs.product(iteration, Product::Model),
        image: inputs.product(iteration, Product::Image),
        residual: inputs.product(iteration, Product::Residual),
        psf: inputs.product(iteration, Product::Psf),
        flux: inputs.product(iteration, Product::Pb),
        mask: inputs.product(iteration, Product::Mask),
        cleanmask: inputs.cleanmask.clone().filter(|m| !m.is_empty()),
        pbcor: inputs.product(iteration, Product::ImagePbcor),
        alpha: nterms
            .filter(|&n| n > 1)
            .map(|_| inputs.product(iteration, Product::Alpha)),
        niter: inputs.niter,
        threshold: inputs.threshold,
        sensitivity: inputs.sensitivity,
        nsigma: inputs.nsigma,
        usemask: inputs.usemask.to_string(),
        hm_masking: inputs.hm_masking,
        stopcode: ret.stopcode,
        stopreason: ret
            .stopreason
            .clone()
            .unwrap_or_else(|| crate::engine::stop_reason(ret.stopcode).to_string()),
        iterdone: ret.iterdone,
        nmajordone: ret.nmajordone,
        peak_residuals: ret.peak_residuals,
        model_flux: ret.model_flux,
        stats: None,
    };

    result.stopcode = Some(record.stopcode);
    result.stopreason = Some(record.stopreason.clone());
    result.iterdone += record.iterdone;
    result.record_iteration(record);
    result
}

// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! ALMA imaging heuristics.

use log::debug;

use super::{
    base, AutoboxParams, DrCorrection, HeuristicsContext, HeuristicsError, ImageParamsHeuristics,
    ImagingMode, KeepIteratingInputs, NiterInputs,
};
use crate::{
    constants::*,
    imaging::{Flux, Gridder, HmMasking, Intent, Specmode, Weighting},
};

/// ALMA 7 m (ACA) dishes; anything smaller than 12 m is treated as ACA.
const ACA_DIAMETER_M: f64 = 12.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlmaFlavour {
    Standard,

    /// Self-calibration imaging.
    Scal,

    /// Science-ready data products.
    Srdp,
}

#[derive(Debug, Clone)]
pub struct AlmaHeuristics {
    context: HeuristicsContext,
    flavour: AlmaFlavour,
}

/// Dynamic-range breakpoints and correction factors for target fields. If the
/// dirty DR exceeds `max_dr`, the threshold is set from the maximum expected
/// DR instead.
struct TargetDrTable {
    max_dr: f64,
    /// (lower DR bound, factor), from the highest bound down.
    steps: [(f64, f64); 3],
}

const TARGET_DR_12M: TargetDrTable = TargetDrTable {
    max_dr: 150.0,
    steps: [(100.0, 2.5), (50.0, 2.0), (20.0, 1.5)],
};

const TARGET_DR_7M: TargetDrTable = TargetDrTable {
    max_dr: 30.0,
    steps: [(20.0, 2.5), (10.0, 2.0), (4.0, 1.5)],
};

/// The maximum expected dynamic range of calibrator images.
const CALIBRATOR_EDR_12M: f64 = 1000.0;
const CALIBRATOR_EDR_7M: f64 = 200.0;

impl AlmaHeuristics {
    pub fn new(context: HeuristicsContext, flavour: AlmaFlavour) -> AlmaHeuristics {
        AlmaHeuristics { context, flavour }
    }

    fn is_7m(&self) -> bool {
        self.metadata().largest_antenna_diameter() < ACA_DIAMETER_M
    }

    fn is_heterogeneous(&self) -> bool {
        self.metadata().antenna_diameters().len() > 1
    }
}

impl ImageParamsHeuristics for AlmaHeuristics {
    fn imaging_mode(&self) -> ImagingMode {
        match self.flavour {
            AlmaFlavour::Standard => ImagingMode::Alma,
            AlmaFlavour::Scal => ImagingMode::AlmaScal,
            AlmaFlavour::Srdp => ImagingMode::AlmaSrdp,
        }
    }

    fn context(&self) -> &HeuristicsContext {
        &self.context
    }

    fn weighting(&self, specmode: Specmode) -> Weighting {
        if specmode.is_cube() {
            Weighting::Briggsbwtaper
        } else {
            Weighting::Briggs
        }
    }

    fn imsize(
        &self,
        field: &str,
        intent: Intent,
        cell_arcsec: f64,
        primary_beam_arcsec: f64,
        pblimit: f64,
        is_mosaic: bool,
    ) -> [usize; 2] {
        let size = base::imsize(
            self.metadata(),
            field,
            intent,
            cell_arcsec,
            primary_beam_arcsec,
            pblimit,
            is_mosaic,
        );
        match self.flavour {
            AlmaFlavour::Srdp => size.map(|n| n.min(SRDP_MAX_IMSIZE)),
            _ => size,
        }
    }

    /// Mixed 12 m and 7 m arrays need the mosaic gridder for their different
    /// primary beams, even for single pointings.
    fn gridder(&self, _intent: Intent, is_mosaic: bool) -> Gridder {
        if is_mosaic || self.is_heterogeneous() {
            Gridder::Mosaic
        } else {
            Gridder::Standard
        }
    }

    fn mosweight(&self, is_mosaic: bool) -> Option<bool> {
        is_mosaic.then_some(true)
    }

    fn cyclefactor(&self, _iteration: u32) -> Option<f64> {
        Some(1.0)
    }

    fn stokes(&self, intent: Intent) -> String {
        match intent {
            Intent::Polarization => "IQUV",
            _ => "I",
        }
        .to_string()
    }

    fn datacolumn(&self) -> Option<String> {
        match self.flavour {
            AlmaFlavour::Scal => Some("data".to_string()),
            _ => None,
        }
    }

    fn dr_correction(
        &self,
        threshold: Flux,
        dirty_dynamic_range: f64,
        residual_max: f64,
        intent: Intent,
        tlimit: f64,
        drcorrect: f64,
    ) -> Result<DrCorrection, HeuristicsError> {
        if let Some(c) = base::manual_dr_correction(threshold, drcorrect)? {
            return Ok(c);
        }

        let is_7m = self.is_7m();
        let (new_threshold, max_edr_used) = if intent.is_calibrator() {
            let edr = if is_7m {
                CALIBRATOR_EDR_7M
            } else {
                CALIBRATOR_EDR_12M
            };
            let edr_threshold = Flux::from_jy(residual_max / edr * tlimit);
            if edr_threshold > threshold {
                (edr_threshold, true)
            } else {
                (threshold, false)
            }
        } else {
            let table = if is_7m { &TARGET_DR_7M } else { &TARGET_DR_12M };
            if dirty_dynamic_range > table.max_dr {
                // Capped by the maximum expected DR, whichever term wins.
                let by_factor = threshold * 2.5;
                let by_edr = Flux::from_jy(residual_max / table.max_dr * tlimit);
                let new_threshold = if by_edr > by_factor { by_edr } else { by_factor };
                (new_threshold, true)
            } else {
                let n_dr = table
                    .steps
                    .iter()
                    .find(|(bound, _)| dirty_dynamic_range > *bound)
                    .map(|(_, f)| *f)
                    .unwrap_or(1.0);
                (threshold * n_dr, false)
            }
        };

        let factor = if threshold.is_zero() {
            1.0
        } else {
            new_threshold.jy / threshold.jy
        };
        debug!(
            "DR correction ({} m, {intent}): dirty DR {dirty_dynamic_range:.1}, threshold {threshold} -> {new_threshold} (factor {factor:.3}, max EDR used: {max_edr_used})",
            if is_7m { 7 } else { 12 }
        );
        Ok(DrCorrection {
            threshold: new_threshold,
            factor,
            max_edr_used,
        })
    }

    fn niter_correction(&self, inputs: &NiterInputs) -> u64 {
        let niter = base::estimate_niter(inputs);
        if inputs.intent != Intent::Target && niter > ALMA_CALIBRATOR_NITER_CAP {
            debug!("Capping the niter of a {} image at {ALMA_CALIBRATOR_NITER_CAP}", inputs.intent);
            ALMA_CALIBRATOR_NITER_CAP
        } else {
            niter
        }
    }

    /// Auto-masking thresholds depend on the array (7 m or 12 m, and how
    /// extended the 12 m configuration is), the intent and the specmode.
    fn get_autobox_params(
        &self,
        _iteration: u32,
        intent: Intent,
        specmode: Specmode,
        _robust: f64,
    ) -> AutoboxParams {
        let cube = specmode.is_cube();
        let baseline = self.metadata().representative_baseline_m(75.0);

        // (sidelobethreshold, noisethreshold, lownoisethreshold, minbeamfrac,
        // negativethreshold for cubes)
        let (slt, nt, lnt, mbf, neg) = if intent.is_calibrator() {
            (2.0, 7.0, 1.5, 0.1, 0.0)
        } else if self.is_7m() {
            (1.25, 5.0, 2.0, 0.1, 10.0)
        } else {
            match baseline {
                Some(b) if b < 300.0 => (2.0, 4.25, 1.5, 0.3, 15.0),
                Some(b) if b <= 400.0 => (2.0, 5.0, 1.5, 0.3, 7.0),
                Some(_) => (2.5, 5.0, 1.5, 0.3, 7.0),
                None => {
                    debug!("No baseline lengths are known; using the compact 12 m auto-masking parameters");
                    (2.0, 4.25, 1.5, 0.3, 15.0)
                }
            }
        };

        AutoboxParams {
            sidelobethreshold: Some(slt),
            noisethreshold: Some(nt),
            lownoisethreshold: Some(lnt),
            negativethreshold: Some(if cube { neg } else { 0.0 }),
            minbeamfrac: Some(mbf),
            growiterations: Some(75),
            dogrowprune: Some(true),
            minpercentchange: Some(if cube { 1.0 } else { -1.0 }),
            fastnoise: Some(false),
        }
    }

    /// If auto-masking found nothing to clean (or cleaning diverged) but
    /// there is clearly still emission, try again with the central region.
    fn keep_iterating(&self, inputs: &KeepIteratingInputs) -> (bool, HmMasking) {
        if inputs.iteration == 0 {
            return (true, inputs.hm_masking);
        }
        if self.flavour == AlmaFlavour::Scal {
            return (false, inputs.hm_masking);
        }
        if inputs.iteration == 1
            && inputs.hm_masking == HmMasking::Auto
            && matches!(inputs.stopcode, 5 | 6 | 7)
        {
            if let (Some(peak), Some(rms)) = (inputs.residual_max, inputs.residual_robust_rms) {
                if peak >= 10.0 * rms {
                    debug!(
                        "Auto-masking of {} spw {} stopped with code {}, but the residual peak is {:.1}σ; trying the central region",
                        inputs.field,
                        inputs.spw,
                        inputs.stopcode,
                        peak / rms
                    );
                    return (true, HmMasking::Centralregion);
                }
            }
        }
        (false, inputs.hm_masking)
    }
}

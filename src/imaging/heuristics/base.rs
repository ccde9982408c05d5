// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Heuristics shared by all imaging modes.

use log::{debug, trace};
use marlu::RADec;

use super::{DrCorrection, HeuristicsError, NiterInputs};
use crate::{
    constants::*,
    engine::ImageTool,
    imaging::{Beam, Flux, Intent},
    metadata::{MetadataError, ObservationMetadata},
    misc::{format_sig_figs, round_to_sig_figs},
};

const RAD_TO_ARCSEC: f64 = 180.0 / std::f64::consts::PI * 3600.0;

/// The minor axis sampled by `pixperbeam` pixels, to two significant figures.
pub(super) fn cell_from_beam(beam: &Beam, pixperbeam: f64) -> Vec<String> {
    let cell = round_to_sig_figs(beam.minor / pixperbeam, 2);
    let cell = format!("{}arcsec", format_sig_figs(cell, 2));
    vec![cell.clone(), cell]
}

/// The FWHM of a dish's primary beam \[arcsec\].
pub(super) fn primary_beam_fwhm_arcsec(freq_hz: f64, diameter_m: f64) -> f64 {
    PB_FWHM_FACTOR * (VEL_C / freq_hz) / diameter_m * RAD_TO_ARCSEC
}

/// The radius at which a Gaussian primary beam falls to `pblimit`.
pub(super) fn gaussian_pb_radius(fwhm: f64, pblimit: f64) -> f64 {
    0.5 * fwhm * ((1.0 / pblimit).ln() / std::f64::consts::LN_2).sqrt()
}

/// The smallest even number at least as big as `n` with no prime factors
/// other than 2, 3 and 5. FFTs of these sizes are fast.
pub(crate) fn optimum_fft_size(n: usize) -> usize {
    let mut m = n.max(2);
    loop {
        if m % 2 == 0 {
            let mut r = m;
            for p in [2, 3, 5] {
                while r % p == 0 {
                    r /= p;
                }
            }
            if r == 1 {
                return m;
            }
        }
        m += 1;
    }
}

/// The centre of the pointings of a field. For a single pointing this is the
/// pointing itself; for a mosaic it's the middle of the bounding box.
pub(super) fn pointing_centre(
    metadata: &ObservationMetadata,
    field: &str,
    intent: Intent,
    is_mosaic: bool,
) -> Result<RADec, MetadataError> {
    let fields = metadata.fields_named(field, intent);
    let first = fields
        .first()
        .ok_or_else(|| MetadataError::UnknownField(field.to_string()))?;
    if !is_mosaic || fields.len() == 1 {
        return Ok(first.radec());
    }

    // RA offsets relative to the first pointing, so that fields straddling
    // 0h don't blow up the bounding box.
    let ra0 = first.ra_deg;
    let (mut dra_min, mut dra_max) = (f64::INFINITY, f64::NEG_INFINITY);
    let (mut dec_min, mut dec_max) = (f64::INFINITY, f64::NEG_INFINITY);
    for f in &fields {
        let dra = (f.ra_deg - ra0 + 180.0).rem_euclid(360.0) - 180.0;
        dra_min = dra_min.min(dra);
        dra_max = dra_max.max(dra);
        dec_min = dec_min.min(f.dec_deg);
        dec_max = dec_max.max(f.dec_deg);
    }
    Ok(RADec::from_degrees(
        (ra0 + 0.5 * (dra_min + dra_max)).rem_euclid(360.0),
        0.5 * (dec_min + dec_max),
    ))
}

/// The largest distance of any pointing from the mosaic centre \[arcsec\].
fn mosaic_extent_arcsec(metadata: &ObservationMetadata, field: &str, intent: Intent) -> f64 {
    let centre = match pointing_centre(metadata, field, intent, true) {
        Ok(c) => c,
        Err(_) => return 0.0,
    };
    metadata
        .fields_named(field, intent)
        .iter()
        .map(|f| f.radec().separation(centre) * RAD_TO_ARCSEC)
        .fold(0.0, f64::max)
}

pub(super) fn imsize(
    metadata: &ObservationMetadata,
    field: &str,
    intent: Intent,
    cell_arcsec: f64,
    primary_beam_arcsec: f64,
    pblimit: f64,
    is_mosaic: bool,
) -> [usize; 2] {
    let mut radius = gaussian_pb_radius(primary_beam_arcsec, pblimit);
    if is_mosaic {
        radius += mosaic_extent_arcsec(metadata, field, intent);
    }
    let npix = (2.0 * radius / cell_arcsec).ceil();
    // NaN and negative values saturate to zero.
    let size = optimum_fft_size(npix as usize);
    trace!("imsize: radius {radius:.2}\" / cell {cell_arcsec}\" -> {npix} -> {size}");
    [size, size]
}

/// Start from the defaults and, if the primary beam image says the image edge
/// is still sensitive, move the limits up so the whole image isn't blanked.
/// Any failure to inspect the primary beam gives the defaults.
pub(super) fn pblimits(pb: Option<&str>, tool: &dyn ImageTool) -> (f64, f64) {
    let defaults = (DEFAULT_PBLIMIT_IMAGE, DEFAULT_PBLIMIT_CLEANMASK);
    let pb = match pb {
        Some(pb) => pb,
        None => return defaults,
    };
    match tool.pb_edge_response(pb) {
        Ok(edge) if edge.is_finite() && edge >= DEFAULT_PBLIMIT_IMAGE => {
            let image = (edge * 1.05).min(1.0);
            let cleanmask = (image + 0.1).min(1.0);
            debug!("The primary beam edge response is {edge:.3}; pblimits are ({image:.3}, {cleanmask:.3})");
            (image, cleanmask)
        }
        Ok(_) => defaults,
        Err(e) => {
            debug!("Couldn't get the primary beam edge response of {pb} ({e}); using the default pblimits");
            defaults
        }
    }
}

/// Handle an explicitly-given dynamic-range correction factor. `None` means
/// the heuristics should decide.
pub(super) fn manual_dr_correction(
    threshold: Flux,
    drcorrect: f64,
) -> Result<Option<DrCorrection>, HeuristicsError> {
    if drcorrect == DRCORRECT_SENTINEL {
        return Ok(None);
    }
    if drcorrect > 0.0 {
        debug!("Using the manual dynamic range correction factor {drcorrect}");
        return Ok(Some(DrCorrection {
            threshold: threshold * drcorrect,
            factor: drcorrect,
            max_edr_used: false,
        }));
    }
    Err(HeuristicsError::InvalidDrCorrect(drcorrect))
}

/// Estimate how many minor-cycle iterations it takes to clean the mask down
/// to the threshold: kappa/gain × (mask area / beam area) × ln(peak/threshold).
pub(super) fn estimate_niter(inputs: &NiterInputs) -> u64 {
    const KAPPA: f64 = 5.0;
    const LOOP_GAIN: f64 = 0.1;

    let beam = match inputs.beam {
        Some(b) if b.area() > 0.0 => b,
        _ => return inputs.niter,
    };
    let threshold = inputs.threshold.jy;
    if threshold <= 0.0 || !(inputs.residual_max > threshold) {
        return inputs.niter;
    }

    let frac_rad = inputs.mask_frac_rad.unwrap_or(DEFAULT_MASK_FRAC_RAD);
    let half_width = 0.5 * inputs.imsize[0].min(inputs.imsize[1]) as f64 * inputs.cell_arcsec;
    let mask_area = std::f64::consts::PI * (frac_rad * half_width).powi(2);
    let estimate =
        KAPPA / LOOP_GAIN * (mask_area / beam.area()) * (inputs.residual_max / threshold).ln();
    if !estimate.is_finite() || estimate < 1.0 {
        return inputs.niter;
    }
    let new_niter = round_to_sig_figs(estimate, 2) as u64;
    if new_niter != inputs.niter {
        debug!("niter: {} -> {new_niter}", inputs.niter);
    }
    new_niter
}

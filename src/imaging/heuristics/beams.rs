// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Synthesized beams and sensitivities.
//!
//! Both need the deconvolution engine and are expensive, so results are
//! memoised in the caches handed in by the caller.

use itertools::Itertools;
use log::{debug, trace};

use super::{base, HeuristicsError, ImageParamsHeuristics};
use crate::{
    constants::DEFAULT_PBLIMIT_IMAGE,
    engine::{DeconvolutionEngine, ImageTool, SensitivityRequest, TcleanParams},
    imaging::{
        cache::{BeamCache, CacheKey, SensitivityCache},
        contfile::ContRanges,
        products::Product,
        Beam, Flux, Intent, Specmode, Weighting,
    },
    metadata::parse_spw_list,
    misc::expensive_op,
};

const RAD_TO_ARCSEC: f64 = 180.0 / std::f64::consts::PI * 3600.0;

/// A cell size and image size good enough to measure the PSF with: five
/// pixels across the finest fringe, out to the primary beam's 20% level.
fn psf_grid(h: &dyn ImageParamsHeuristics, spws: &[u32]) -> Result<(String, usize), HeuristicsError> {
    let pb = h.largest_primary_beam_arcsec(spws)?;
    let (_, hi_freq) = h
        .context()
        .freq_range_hz(spws)
        .ok_or_else(|| HeuristicsError::NoSpws {
            spw: spws.iter().join(","),
        })?;
    let cell = match h.metadata().representative_baseline_m(100.0) {
        Some(b) if b > 0.0 => {
            crate::constants::VEL_C / hi_freq / b * RAD_TO_ARCSEC / h.pixperbeam()
        }
        _ => pb / 50.0,
    };
    let cell = crate::misc::round_to_sig_figs(cell, 2);
    let npix = (2.0 * base::gaussian_pb_radius(pb, DEFAULT_PBLIMIT_IMAGE) / cell).ceil();
    let imsize = base::optimum_fft_size(npix as usize);
    Ok((format!("{}arcsec", crate::misc::format_sig_figs(cell, 2)), imsize))
}

/// Get the synthesized beam of the data for the given fields/intents. Each
/// field/intent is imaged PSF-only (unless cached); those that fail are
/// skipped. The largest beam (over fields and channels) is returned.
#[allow(clippy::too_many_arguments)]
pub fn synthesized_beam(
    h: &dyn ImageParamsHeuristics,
    engine: &dyn DeconvolutionEngine,
    tool: &dyn ImageTool,
    cache: &mut BeamCache,
    field_intents: &[(String, Intent)],
    spw: &str,
    robust: f64,
    uvtaper: &[String],
    specmode: Specmode,
    force_calc: bool,
) -> Result<Beam, HeuristicsError> {
    let spws = parse_spw_list(spw)?;
    let mut beams = vec![];

    for (field, intent) in field_intents {
        let key = CacheKey::new(field, *intent, &spws, robust, uvtaper).with_specmode(specmode);
        if !force_calc {
            if let Some(beam) = cache.get(&key) {
                trace!("Using the cached beam for {field} {intent} spw {spw}");
                beams.push(beam);
                continue;
            }
        }

        match psf_only_beam(h, engine, tool, field, *intent, &spws, robust, uvtaper, specmode) {
            Ok(beam) => {
                debug!(
                    "Synthesized beam of {field} {intent} spw {spw}: {:.3}\" x {:.3}\" @ {:.1}°",
                    beam.major, beam.minor, beam.pa
                );
                cache.put(key, beam);
                beams.push(beam);
            }
            Err(e) => debug!("Couldn't get a beam for {field} {intent} spw {spw}: {e}"),
        }
    }

    beams
        .into_iter()
        .max_by(|a, b| a.area().total_cmp(&b.area()))
        .ok_or_else(|| HeuristicsError::NoValidBeams {
            field: field_intents.iter().map(|(f, _)| f).join(","),
            spw: spw.to_string(),
        })
}

#[allow(clippy::too_many_arguments)]
fn psf_only_beam(
    h: &dyn ImageParamsHeuristics,
    engine: &dyn DeconvolutionEngine,
    tool: &dyn ImageTool,
    field: &str,
    intent: Intent,
    spws: &[u32],
    robust: f64,
    uvtaper: &[String],
    specmode: Specmode,
) -> Result<Beam, HeuristicsError> {
    let field_ids = h.field(field, intent)?;
    let (vis, field_ids): (Vec<String>, Vec<String>) = h
        .vislist()
        .iter()
        .cloned()
        .zip(field_ids)
        .filter(|(_, ids)| !ids.is_empty())
        .unzip();
    if vis.is_empty() {
        return Err(HeuristicsError::Metadata(
            crate::metadata::MetadataError::UnknownField(field.to_string()),
        ));
    }

    let is_mosaic = h.metadata().is_mosaic(field, intent);
    let (cell, imsize) = psf_grid(h, spws)?;
    let imagename = h.imagename("temp_psf", 0, field, intent, spws, specmode);
    let weighting = h.weighting(specmode);
    let spw_sel = spws.iter().join(",");
    let params = TcleanParams {
        vis: vis.clone(),
        imagename: imagename.clone(),
        field: field_ids,
        intent: Some(intent.to_string()),
        spw: vec![spw_sel; vis.len()],
        specmode: specmode.engine_specmode().to_string(),
        gridder: h.gridder(intent, is_mosaic).to_string(),
        phasecenter: h.phasecenter(field, intent, is_mosaic).ok(),
        imsize: vec![imsize, imsize],
        cell: vec![cell.clone(), cell],
        weighting: weighting.to_string(),
        robust: matches!(weighting, Weighting::Briggs | Weighting::Briggsbwtaper).then_some(robust),
        uvtaper: uvtaper.to_vec(),
        perchanweightdensity: h.perchanweightdensity(specmode),
        niter: 0,
        calcres: false,
        calcpsf: true,
        restoration: false,
        pbcor: false,
        ..Default::default()
    };

    let result = expensive_op(
        || engine.tclean(&params),
        "Still waiting for the PSF calculation",
    );
    let psf = format!("{imagename}.{}", Product::Psf.suffix());
    let beams = result
        .map_err(HeuristicsError::from)
        .and_then(|_| tool.restoring_beam(&psf).map_err(HeuristicsError::from));

    for product in [Product::Psf, Product::Sumwt, Product::Weight, Product::Pb] {
        let image = format!("{imagename}.{}", product.suffix());
        if tool.exists(&image) {
            if let Err(e) = tool.remove_image(&image) {
                debug!("Couldn't remove {image}: {e}");
            }
        }
    }

    beams?
        .into_iter()
        .filter(|b| b.major > 0.0 && b.minor > 0.0)
        .max_by(|a, b| a.area().total_cmp(&b.area()))
        .ok_or_else(|| HeuristicsError::NoValidBeams {
            field: field.to_string(),
            spw: spws.iter().join(","),
        })
}

/// What a sensitivity is calculated for.
#[derive(Debug, Clone, Copy)]
pub struct SensitivityInputs<'a> {
    pub field: &'a str,
    pub intent: Intent,
    pub spw: &'a str,
    pub specmode: Specmode,
    pub imsize: [usize; 2],
    pub cell: &'a [String],
    pub weighting: Weighting,
    pub robust: f64,
    pub uvtaper: &'a [String],
    pub is_mosaic: bool,

    /// Line-free ranges; used for "cont" images.
    pub cont_ranges: Option<&'a ContRanges>,
}

/// The theoretical sensitivity of an image \[Jy/beam\]. Per-dataset and
/// per-spw sensitivities are combined in inverse quadrature and corrected for
/// channel selection, correlator smoothing (cubes) and mosaic overlap.
pub fn calc_sensitivities(
    h: &dyn ImageParamsHeuristics,
    engine: &dyn DeconvolutionEngine,
    cache: &mut SensitivityCache,
    inputs: &SensitivityInputs,
    force_calc: bool,
) -> Result<Flux, HeuristicsError> {
    let spws = parse_spw_list(inputs.spw)?;
    let key = CacheKey::new(inputs.field, inputs.intent, &spws, inputs.robust, inputs.uvtaper)
        .with_specmode(inputs.specmode);
    if !force_calc {
        if let Some(s) = cache.get(&key) {
            trace!("Using the cached sensitivity for {} spw {}", inputs.field, inputs.spw);
            return Ok(s);
        }
    }

    let mut inverse_variance_sum = 0.0;
    for (vis, spw_info) in h.context().spw_infos(&spws) {
        let (chansel, selected_bw) = match (inputs.specmode, inputs.cont_ranges) {
            (Specmode::Cont, Some(ranges)) => match ranges.get(inputs.field, spw_info.id) {
                Some(r) if r.none => {
                    debug!("spw {} of {vis} has no line-free channels; skipping it", spw_info.id);
                    continue;
                }
                Some(r) if !r.all && !r.ranges.is_empty() => {
                    (r.selection(), Some(r.total_width_hz()))
                }
                _ => (None, None),
            },
            _ => (None, None),
        };

        let request = SensitivityRequest {
            vis: vis.to_string(),
            field: inputs.field.to_string(),
            intent: inputs.intent.to_string(),
            spw: spw_info.id,
            chansel,
            specmode: inputs.specmode.engine_specmode().to_string(),
            imsize: inputs.imsize.to_vec(),
            cell: inputs.cell.to_vec(),
            weighting: inputs.weighting.to_string(),
            robust: inputs.robust,
            uvtaper: inputs.uvtaper.to_vec(),
        };
        let apparent = match engine.apparent_sensitivity(&request) {
            Ok(a) if a.sensitivity_jy > 0.0 && a.sensitivity_jy.is_finite() => a,
            Ok(a) => {
                debug!(
                    "Nonsensical sensitivity {} Jy for {vis} spw {}; skipping it",
                    a.sensitivity_jy, spw_info.id
                );
                continue;
            }
            Err(e) => {
                debug!("Couldn't get the sensitivity of {vis} spw {}: {e}", spw_info.id);
                continue;
            }
        };

        let mut sensitivity = apparent.sensitivity_jy;
        if let Some(selected) = selected_bw {
            if selected > 0.0 && apparent.bandwidth_hz > selected {
                sensitivity *= (apparent.bandwidth_hz / selected).sqrt();
            }
        }
        if inputs.specmode.is_cube() {
            sensitivity *= (spw_info.chan_width_hz / spw_info.effective_bw_hz()).sqrt();
        }
        trace!("{vis} spw {}: {sensitivity:e} Jy/beam", spw_info.id);
        inverse_variance_sum += sensitivity.powi(-2);
    }

    if inverse_variance_sum <= 0.0 {
        return Err(HeuristicsError::NoSensitivity {
            field: inputs.field.to_string(),
            spw: inputs.spw.to_string(),
        });
    }
    let mut sensitivity = inverse_variance_sum.sqrt().recip();

    if inputs.is_mosaic {
        let overlap = mosaic_overlap(h, inputs.field, inputs.intent, &spws);
        sensitivity /= (overlap as f64).sqrt();
    }

    let sensitivity = Flux::from_jy(sensitivity);
    debug!("Sensitivity of {} spw {}: {sensitivity}", inputs.field, inputs.spw);
    cache.put(key, sensitivity);
    Ok(sensitivity)
}

/// How many pointings overlap the mosaic centre within half a primary beam.
fn mosaic_overlap(h: &dyn ImageParamsHeuristics, field: &str, intent: Intent, spws: &[u32]) -> usize {
    let (pb, centre) = match (
        h.largest_primary_beam_arcsec(spws),
        base::pointing_centre(h.metadata(), field, intent, true),
    ) {
        (Ok(pb), Ok(c)) => (pb, c),
        _ => return 1,
    };
    h.metadata()
        .fields_named(field, intent)
        .iter()
        .filter(|f| f.radec().separation(centre) * RAD_TO_ARCSEC <= 0.5 * pb)
        .count()
        .max(1)
}

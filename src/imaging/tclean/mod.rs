// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Iterative imaging of one target.
//!
//! Anything not given explicitly is filled in by the heuristics of the
//! imaging mode. Iteration 0 makes the dirty image; its statistics decide the
//! final threshold and iteration budget. Each later iteration asks the
//! sequence manager for a mask and threshold, runs the engine once, and asks
//! the heuristics whether to continue.
//!
//! Problems with the data (no common frequencies, no sensitivity, engine
//! failures) fail only this target; they are recorded in
//! [`TcleanResult::error`]. Configuration errors are returned as `Err`.

mod error;
mod freq;
#[cfg(test)]
mod tests;
mod vlass_se;

pub use error::{SpectralError, TcleanError};

use std::{path::PathBuf, str::FromStr, sync::Arc};

use itertools::Itertools;
use log::{debug, info, trace, warn};
use serde::{Deserialize, Serialize};

use super::{
    cache::ImagingCaches,
    cleanbase::{clean_base, CleanBaseInputs},
    contfile::ContRanges,
    heuristics::{
        calc_sensitivities, new_heuristics, synthesized_beam, AutoboxParams, HeuristicsError,
        ImageParamsHeuristics, ImagingMode, KeepIteratingInputs, NiterInputs, SensitivityInputs,
    },
    products::cleanmask_name,
    result::{IterationRecord, ResolvedImagingParams, TcleanResult},
    sequence::{
        new_sequence, CleanImages, CleanSequence, IterationStats, MaskRequest, SequenceParams,
        UseMask,
    },
    Beam, CleanTarget, Deconvolver, Flux, Gridder, HmCleaning, HmMasking, Intent, Specmode,
    Weighting,
};
use crate::{
    constants::DRCORRECT_SENTINEL,
    engine::{DeconvolutionEngine, ImageTool, Moment, TcleanParams, WARNING_STOPCODES},
    metadata::{parse_spw_list, ObservationMetadata},
    unit_parsing::{parse_angle, parse_flux, parse_freq},
};

/// The inputs of one imaging target. Everything but `field` and `spw` is
/// optional; the heuristics fill in what isn't given.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TcleanInputs {
    pub field: String,
    pub intent: Option<Intent>,
    pub spw: String,
    /// The measurement sets to image. If empty, every dataset with this
    /// field and spws is used.
    pub vis: Vec<String>,
    /// One spw selection per measurement set, overriding the usual one.
    pub spwsel: Option<Vec<String>>,

    /// e.g. "ALMA" or "VLASS-SE-CONT". If not given, this comes from the
    /// telescope.
    pub imaging_mode: Option<String>,
    pub specmode: Option<Specmode>,

    pub imagename: Option<String>,
    /// The start of generated image names.
    pub prefix: Option<String>,
    /// The pipeline stage number used in generated image names.
    pub stage: Option<u32>,

    pub phasecenter: Option<String>,
    pub cell: Option<Vec<String>>,
    pub imsize: Option<[usize; 2]>,
    pub stokes: Option<String>,
    pub gridder: Option<Gridder>,
    pub deconvolver: Option<Deconvolver>,
    pub nterms: Option<u32>,
    pub weighting: Option<Weighting>,
    pub robust: Option<f64>,
    pub uvtaper: Option<Vec<String>>,
    pub perchanweightdensity: Option<bool>,
    pub antenna: Option<Vec<String>>,
    pub datacolumn: Option<String>,

    pub nchan: Option<i64>,
    pub start: Option<String>,
    pub width: Option<String>,
    pub nbin: Option<u32>,
    pub restfreq: Option<String>,
    pub outframe: Option<String>,

    /// auto, manual, centralregion or none.
    pub hm_masking: Option<String>,
    /// manual or rms.
    pub hm_cleaning: Option<String>,
    pub threshold: Option<String>,
    /// Skips the sensitivity calculation.
    pub sensitivity: Option<String>,
    pub tlimit: Option<f64>,
    /// A dynamic-range correction factor; -999 lets the heuristics decide.
    pub drcorrect: Option<f64>,
    pub niter: Option<u64>,
    pub nsigma: Option<f64>,
    /// The mask image(s) of manual masking; a comma-separated list is
    /// combined.
    pub mask: Option<String>,
    /// The masks of VLASS single-epoch imaging, one per iteration.
    pub mask_list: Vec<String>,
    pub pblimit: Option<f64>,
    /// Auto-masking parameters that override the heuristics.
    pub autobox: AutoboxParams,

    /// Line-free frequency ranges ("cont.dat").
    pub cont_file: Option<PathBuf>,
    pub is_mosaic: Option<bool>,
    /// Wide-band AW-projection (VLASS).
    pub wbawp: Option<bool>,
    /// Let the engine parallelise major cycles.
    pub parallel: bool,
}

impl From<&CleanTarget> for TcleanInputs {
    fn from(t: &CleanTarget) -> Self {
        TcleanInputs {
            field: t.field.clone(),
            intent: Some(t.intent),
            spw: t.spw.clone(),
            vis: t.vis.clone(),
            spwsel: t.spwsel.clone(),
            imaging_mode: Some(t.imaging_mode.to_string()),
            specmode: Some(t.specmode),
            imagename: t.imagename.clone(),
            phasecenter: t.phasecenter.clone(),
            cell: t.cell.clone(),
            imsize: t.imsize,
            stokes: t.stokes.clone(),
            gridder: t.gridder,
            deconvolver: t.deconvolver,
            nterms: t.nterms,
            weighting: t.weighting,
            robust: t.robust,
            uvtaper: t.uvtaper.clone(),
            nchan: t.nchan,
            start: t.start.clone(),
            width: t.width.clone(),
            nbin: t.nbin,
            sensitivity: t.sensitivity.map(|s| s.to_string()),
            is_mosaic: Some(t.is_mosaic),
            ..Default::default()
        }
    }
}

/// How the threshold follows from the sensitivity.
#[derive(Debug, Clone, Copy)]
enum ThresholdRule {
    Fixed(Flux),
    /// tlimit × sensitivity.
    Rms(f64),
}

/// Everything about a target that is settled before iteration 0.
struct Prepared {
    heuristics: Box<dyn ImageParamsHeuristics>,
    mode: ImagingMode,
    intent: Intent,
    spws: Vec<u32>,
    specmode: Specmode,
    hm_masking: HmMasking,
    hm_cleaning: HmCleaning,
    is_mosaic: bool,
    robust: f64,
    weighting: Weighting,
    gridder: Gridder,
    deconvolver: Deconvolver,
    beam: Option<Beam>,
    cell_arcsec: f64,
    imsize: [usize; 2],
    /// The engine parameters common to all iterations.
    common: TcleanParams,
    cont_ranges: Option<ContRanges>,
    tlimit: f64,
    drcorrect: f64,
    threshold: Flux,
    sensitivity: Flux,
    niter: u64,
    mask_list: Vec<String>,
}

impl Prepared {
    fn resolved_params(&self, pblimit_image: f64, pblimit_cleanmask: f64) -> ResolvedImagingParams {
        let c = &self.common;
        ResolvedImagingParams {
            vis: c.vis.clone(),
            field: c.field.clone(),
            spw: c.spw.clone(),
            antenna: c.antenna.clone().unwrap_or_default(),
            specmode: self.specmode,
            gridder: self.gridder,
            deconvolver: self.deconvolver,
            nterms: c.nterms,
            imsize: self.imsize,
            cell: c.cell.clone(),
            phasecenter: c.phasecenter.clone().unwrap_or_default(),
            stokes: c.stokes.clone(),
            weighting: self.weighting,
            robust: self.robust,
            uvtaper: c.uvtaper.clone(),
            perchanweightdensity: c.perchanweightdensity,
            nchan: c.nchan,
            start: c.start.clone(),
            width: c.width.clone(),
            restfreq: c.restfreq.as_ref().and_then(|r| r.first().cloned()),
            reffreq: c.reffreq.clone(),
            is_mosaic: self.is_mosaic,
            hm_masking: self.hm_masking,
            hm_cleaning: self.hm_cleaning,
            pblimit_image,
            pblimit_cleanmask,
        }
    }
}

/// Images one target.
pub struct Tclean<'a> {
    inputs: TcleanInputs,
    metadata: Arc<ObservationMetadata>,
    engine: &'a dyn DeconvolutionEngine,
    tool: &'a dyn ImageTool,
}

impl<'a> Tclean<'a> {
    pub fn new(
        inputs: TcleanInputs,
        metadata: Arc<ObservationMetadata>,
        engine: &'a dyn DeconvolutionEngine,
        tool: &'a dyn ImageTool,
    ) -> Tclean<'a> {
        Tclean {
            inputs,
            metadata,
            engine,
            tool,
        }
    }

    pub fn inputs(&self) -> &TcleanInputs {
        &self.inputs
    }

    /// Image the target. Beams and sensitivities are looked up in (and added
    /// to) `caches`.
    pub fn run(&self, caches: &mut ImagingCaches) -> Result<TcleanResult, TcleanError> {
        let mut result = TcleanResult {
            field: self.inputs.field.clone(),
            intent: self.inputs.intent,
            spw: self.inputs.spw.clone(),
            specmode: self.inputs.specmode,
            ..Default::default()
        };

        let outcome = self.prepare(caches).and_then(|p| {
            result.intent = Some(p.intent);
            result.specmode = Some(p.specmode);
            result.imagename = p.common.imagename.clone();
            self.iterate(&p, &mut result)
        });
        match outcome {
            Ok(()) => Ok(result),
            // Engine failures are already on the result.
            Err(_) if result.error.is_some() => Ok(result),
            Err(e) if e.is_target_failure() => Ok(result.with_error(e.to_string())),
            Err(e) => Err(e),
        }
    }

    /// Work out the imaging parameters without cleaning. The primary-beam
    /// limits are the defaults, as they depend on the dirty image.
    pub fn resolve(&self, caches: &mut ImagingCaches) -> Result<ResolvedImagingParams, TcleanError> {
        let p = self.prepare(caches)?;
        let (pblimit_image, pblimit_cleanmask) = p.heuristics.pblimits(None, self.tool);
        Ok(p.resolved_params(
            self.inputs.pblimit.unwrap_or(pblimit_image),
            pblimit_cleanmask,
        ))
    }

    fn imaging_mode(&self) -> Result<ImagingMode, TcleanError> {
        if let Some(mode) = &self.inputs.imaging_mode {
            return Ok(ImagingMode::from_str(mode)?);
        }
        let telescope = self.metadata.telescope.to_uppercase();
        match telescope.as_str() {
            "ALMA" => Ok(ImagingMode::Alma),
            "VLA" | "EVLA" | "JVLA" => Ok(ImagingMode::Vla),
            _ => Err(TcleanError::UnknownTelescope(self.metadata.telescope.clone())),
        }
    }

    /// Steps that can fail fast, then parameter resolution, the spectral
    /// setup of cubes, the sensitivity and the threshold.
    fn prepare(&self, caches: &mut ImagingCaches) -> Result<Prepared, TcleanError> {
        let inputs = &self.inputs;
        if inputs.field.is_empty() {
            return Err(TcleanError::MissingInput("field"));
        }
        if inputs.spw.is_empty() {
            return Err(TcleanError::MissingInput("spw"));
        }
        let field = inputs.field.as_str();
        let mode = self.imaging_mode()?;

        let hm_cleaning = match inputs.hm_cleaning.as_deref() {
            Some(s) => HmCleaning::from_str(s.trim())
                .map_err(|_| TcleanError::UnknownHmCleaning(s.to_string()))?,
            None if mode.is_vlass() => HmCleaning::Manual,
            None => HmCleaning::Rms,
        };
        let explicit_threshold = inputs
            .threshold
            .as_deref()
            .map(parse_flux)
            .transpose()?
            .map(Flux::from_jy);
        let rule = match hm_cleaning {
            HmCleaning::Sensitivity => return Err(TcleanError::SensitivityCleaning),
            HmCleaning::Manual => match explicit_threshold {
                Some(t) => ThresholdRule::Fixed(t),
                // VLASS stops on nsigma.
                None if mode.is_vlass() => ThresholdRule::Fixed(Flux::ZERO),
                None => return Err(TcleanError::NoManualThreshold),
            },
            HmCleaning::Rms => match explicit_threshold {
                Some(t) => ThresholdRule::Fixed(t),
                None => ThresholdRule::Rms(0.0),
            },
        };
        let drcorrect = inputs.drcorrect.unwrap_or(DRCORRECT_SENTINEL);
        if drcorrect != DRCORRECT_SENTINEL && drcorrect <= 0.0 {
            return Err(HeuristicsError::InvalidDrCorrect(drcorrect).into());
        }

        let intent = inputs.intent.unwrap_or(Intent::Target);
        let spws = parse_spw_list(&inputs.spw)?;
        let vislist = if inputs.vis.is_empty() {
            self.metadata.vislist_for(field, intent, &spws)
        } else {
            inputs.vis.clone()
        };
        if vislist.is_empty() {
            return Err(TcleanError::NoData {
                field: field.to_string(),
                spw: inputs.spw.clone(),
            });
        }

        let h = new_heuristics(mode, Arc::clone(&self.metadata), vislist.clone(), &inputs.spw)?;
        let hm_masking = match inputs.hm_masking.as_deref() {
            Some(s) => HmMasking::from_str(s.trim())
                .map_err(|_| TcleanError::UnknownHmMasking(s.to_string()))?,
            None => h.default_hm_masking(),
        };
        let specmode = h.specmode(inputs.specmode);
        let tlimit = inputs.tlimit.unwrap_or_else(|| h.tlimit());
        let rule = match rule {
            ThresholdRule::Rms(_) => ThresholdRule::Rms(tlimit),
            r => r,
        };

        // Step 1: everything not given explicitly comes from the heuristics.
        let is_mosaic = inputs
            .is_mosaic
            .unwrap_or_else(|| self.metadata.is_mosaic(field, intent));
        let robust = inputs.robust.unwrap_or_else(|| h.robust(specmode));
        let uvtaper = inputs.uvtaper.clone().unwrap_or_else(|| h.uvtaper());
        caches.ensure_weighting(robust, &uvtaper);
        let weighting = inputs.weighting.unwrap_or_else(|| h.weighting(specmode));
        let perchanweightdensity = inputs
            .perchanweightdensity
            .unwrap_or_else(|| h.perchanweightdensity(specmode));
        let gridder = inputs.gridder.unwrap_or_else(|| h.gridder(intent, is_mosaic));
        let deconvolver = inputs
            .deconvolver
            .unwrap_or_else(|| h.deconvolver(specmode, &spws));
        let nterms = match deconvolver {
            Deconvolver::Mtmfs => inputs.nterms.or_else(|| h.nterms(deconvolver)),
            _ => None,
        };
        let stokes = inputs.stokes.clone().unwrap_or_else(|| h.stokes(intent));
        let antenna = inputs.antenna.clone().unwrap_or_else(|| h.antenna());
        let imagename = match &inputs.imagename {
            Some(i) => i.clone(),
            None => {
                let prefix = inputs.prefix.clone().unwrap_or_else(|| default_prefix(&vislist));
                h.imagename(&prefix, inputs.stage.unwrap_or(0), field, intent, &spws, specmode)
            }
        };
        let phasecenter = match &inputs.phasecenter {
            Some(p) => p.clone(),
            None => h.phasecenter(field, intent, is_mosaic)?,
        };

        let mut beam = None;
        let cell = match &inputs.cell {
            Some(c) => c.clone(),
            None => {
                if h.needs_beam() {
                    let b = synthesized_beam(
                        h.as_ref(),
                        self.engine,
                        self.tool,
                        &mut caches.beams,
                        &[(field.to_string(), intent)],
                        &inputs.spw,
                        robust,
                        &uvtaper,
                        specmode,
                        false,
                    )
                    .map_err(|e| match e {
                        e @ HeuristicsError::NoValidBeams { .. } => {
                            TcleanError::TargetFailed(e.to_string())
                        }
                        e => e.into(),
                    })?;
                    beam = Some(b);
                }
                h.cell(beam.as_ref())?
            }
        };
        let cell_arcsec = parse_angle(cell.first().ok_or(TcleanError::MissingInput("cell"))?)?;
        let (default_pblimit_image, _) = h.pblimits(None, self.tool);
        let imsize = match inputs.imsize {
            Some(i) => i,
            None => {
                let pb = h.largest_primary_beam_arcsec(&spws)?;
                h.imsize(field, intent, cell_arcsec, pb, default_pblimit_image, is_mosaic)
            }
        };

        let cont_ranges = inputs.cont_file.as_ref().map(ContRanges::read).transpose()?;
        let spw_selection = match &inputs.spwsel {
            Some(sel) => sel.clone(),
            None => {
                let sel = spw_selection(field, &spws, specmode, cont_ranges.as_ref())?;
                vec![sel; vislist.len()]
            }
        };

        // Step 2: the spectral axis of cubes.
        let restfreq = inputs.restfreq.clone().or_else(|| h.restfreq(specmode, &spws));
        let (nchan, start, width) = if specmode.is_cube() {
            let window = freq::intersect_freq_ranges(&self.metadata, &vislist, field, &spws)?;
            let restfreq_hz = restfreq.as_deref().map(parse_freq).transpose()?;
            let setup = freq::spectral_setup(
                &window,
                inputs.start.as_deref(),
                inputs.width.as_deref(),
                inputs.nchan,
                inputs.nbin,
                restfreq_hz,
            )?;
            debug!(
                "{field} spw {}: nchan {}, start {}, width {}",
                inputs.spw, setup.nchan, setup.start, setup.width
            );
            (setup.nchan, setup.start, setup.width)
        } else {
            (-1, String::new(), String::new())
        };

        // Step 3: the sensitivity.
        let sensitivity = match &inputs.sensitivity {
            Some(s) => Flux::from_jy(parse_flux(s)?),
            None if mode.is_vlass() => {
                debug!("VLASS imaging is limited by nsigma; not calculating a sensitivity");
                Flux::ZERO
            }
            None => {
                let sens_inputs = SensitivityInputs {
                    field,
                    intent,
                    spw: &inputs.spw,
                    specmode,
                    imsize,
                    cell: &cell,
                    weighting,
                    robust,
                    uvtaper: &uvtaper,
                    is_mosaic,
                    cont_ranges: cont_ranges.as_ref(),
                };
                calc_sensitivities(
                    h.as_ref(),
                    self.engine,
                    &mut caches.sensitivities,
                    &sens_inputs,
                    false,
                )
                .map_err(|e| {
                    TcleanError::TargetFailed(format!(
                        "Couldn't get the sensitivity of {field} spw {}: {e}",
                        inputs.spw
                    ))
                })?
            }
        };

        // Step 4: the threshold.
        let threshold = match rule {
            ThresholdRule::Fixed(t) => t,
            ThresholdRule::Rms(tlimit) => sensitivity * tlimit,
        };
        info!(
            "{imagename}: sensitivity {sensitivity}, threshold {threshold} ({hm_cleaning}), masking {hm_masking}"
        );

        let wbawp = inputs.wbawp.unwrap_or(true);
        let common = TcleanParams {
            vis: vislist,
            imagename: imagename.clone(),
            datacolumn: inputs.datacolumn.clone().or_else(|| h.datacolumn()),
            field: h.field(field, intent)?,
            intent: Some(intent.to_string()),
            spw: spw_selection,
            antenna: (!antenna.is_empty()).then_some(antenna),
            specmode: specmode.engine_specmode().to_string(),
            gridder: gridder.to_string(),
            deconvolver: deconvolver.to_string(),
            nterms,
            imsize: imsize.to_vec(),
            cell,
            phasecenter: Some(phasecenter),
            stokes,
            nchan,
            start,
            width,
            outframe: specmode
                .is_cube()
                .then(|| inputs.outframe.clone().unwrap_or_else(|| "LSRK".to_string())),
            restfreq: restfreq.filter(|_| specmode.is_cube()).map(|r| vec![r]),
            reffreq: h.reffreq(deconvolver, &spws),
            interpolation: specmode.is_cube().then(|| "linear".to_string()),
            weighting: weighting.to_string(),
            robust: matches!(weighting, Weighting::Briggs | Weighting::Briggsbwtaper)
                .then_some(robust),
            uvtaper,
            perchanweightdensity,
            mosweight: h.mosweight(is_mosaic),
            usepointing: h.usepointing(gridder),
            smallscalebias: h.smallscalebias(),
            pblimit: inputs.pblimit.unwrap_or(default_pblimit_image),
            restoringbeam: h.restoringbeam(specmode),
            wprojplanes: h.wprojplanes(gridder),
            conjbeams: h.conjbeams(),
            rotatepastep: h.rotatepastep(gridder),
            pointingoffsetsigdev: h.pointingoffsetsigdev(gridder),
            cfcache: h.cfcache(&imagename, wbawp),
            wbawp: gridder.is_aw().then_some(wbawp),
            parallel: inputs.parallel,
            ..Default::default()
        };

        let mask_list = h.mask_list(&inputs.mask_list);
        Ok(Prepared {
            mode,
            intent,
            spws,
            specmode,
            hm_masking,
            hm_cleaning,
            is_mosaic,
            robust,
            weighting,
            gridder,
            deconvolver,
            beam,
            cell_arcsec,
            imsize,
            common,
            cont_ranges,
            tlimit,
            drcorrect,
            threshold,
            sensitivity,
            niter: inputs.niter.unwrap_or_else(|| h.niter()),
            mask_list,
            heuristics: h,
        })
    }

    fn new_sequence(
        &self,
        p: &Prepared,
        hm_masking: HmMasking,
        threshold: Flux,
        niter: u64,
    ) -> Result<Box<dyn CleanSequence>, TcleanError> {
        Ok(new_sequence(
            hm_masking,
            p.mode,
            SequenceParams {
                threshold,
                sensitivity: p.sensitivity,
                niter,
                mask: self.inputs.mask.clone(),
                mask_list: p.mask_list.clone(),
            },
        )?)
    }

    fn analyse(
        &self,
        sequence: &dyn CleanSequence,
        record: &IterationRecord,
        pblimit_image: f64,
    ) -> IterationStats {
        let images = CleanImages {
            model: Some(record.model.as_str()),
            residual: Some(record.residual.as_str()),
            image: Some(record.image.as_str()),
            pbcor: Some(record.pbcor.as_str()),
            pb: Some(record.flux.as_str()),
            cleanmask: Some(record.mask.as_str()),
        };
        sequence.iteration_result(self.tool, &images, pblimit_image)
    }

    /// Record the statistics of the latest iteration.
    fn record_stats(
        &self,
        sequence: &dyn CleanSequence,
        result: &mut TcleanResult,
        pblimit_image: f64,
    ) -> IterationStats {
        let (iteration, stats) = match result.last_iteration() {
            Some(rec) => (rec.iteration, self.analyse(sequence, rec, pblimit_image)),
            None => return IterationStats::default(),
        };
        if let Some(rec) = result.iteration_mut(iteration) {
            rec.stats = Some(stats);
        }
        stats
    }

    fn dirty_inputs(&self, p: &Prepared) -> CleanBaseInputs {
        CleanBaseInputs {
            common: p.common.clone(),
            iteration: 0,
            niter: 0,
            threshold: p.threshold,
            sensitivity: p.sensitivity,
            nsigma: None,
            cycleniter: None,
            cyclefactor: None,
            scales: None,
            usemask: UseMask::User,
            cleanmask: None,
            pbmask: None,
            autobox: AutoboxParams::default(),
            hm_masking: Some(p.hm_masking),
            restoration: false,
            pbcor: false,
            restart: false,
        }
    }

    /// Steps 6 to 8: the dirty image, the corrections it informs, the
    /// cleaning iterations and the cube QA products.
    fn iterate(&self, p: &Prepared, result: &mut TcleanResult) -> Result<(), TcleanError> {
        let h = p.heuristics.as_ref();
        let mut common = p.common.clone();
        let mut hm_masking = p.hm_masking;
        let mut sequence = self.new_sequence(p, hm_masking, p.threshold, p.niter)?;

        let nowb_psf = if h.is_vlass_se_cont() {
            vlass_se::make_nowb_psf(self.engine, h, &common)
                .map_err(|e| TcleanError::TargetFailed(e.to_string()))?
        } else {
            None
        };

        // Iteration 0.
        *result = clean_base(
            self.engine,
            self.tool,
            &self.dirty_inputs(p),
            Some(std::mem::take(result)),
        );
        if let Some(e) = &result.error {
            return Err(TcleanError::TargetFailed(e.clone()));
        }
        let (dirty_psf, dirty_pb) = match result.iteration(0) {
            Some(rec) => (rec.psf.clone(), rec.flux.clone()),
            None => return Err(TcleanError::TargetFailed("The dirty image wasn't made".to_string())),
        };
        if let Some(nowb) = nowb_psf.as_deref() {
            vlass_se::swap_psf(self.tool, nowb, &common)
                .map_err(|e| TcleanError::TargetFailed(e.to_string()))?;
        }

        let (pblimit_image, pblimit_cleanmask) = {
            let (image, cleanmask) = h.pblimits(Some(dirty_pb.as_str()), self.tool);
            (self.inputs.pblimit.unwrap_or(image), cleanmask)
        };
        common.pblimit = pblimit_image;
        result.params = Some(p.resolved_params(pblimit_image, pblimit_cleanmask));

        let dirty = self.record_stats(&*sequence, result, pblimit_image);
        let dirty_dr = match dirty.residual_max {
            Some(peak) if !p.sensitivity.is_zero() => Some(peak / p.sensitivity.jy),
            _ => None,
        };
        result.dirty_dynamic_range = dirty_dr;
        result.sensitivity = Some(p.sensitivity);

        let mut threshold = p.threshold;
        let mut niter = p.niter;
        match dirty.residual_max {
            Some(peak) => {
                let c = h.dr_correction(
                    threshold,
                    dirty_dr.unwrap_or(0.0),
                    peak,
                    p.intent,
                    p.tlimit,
                    p.drcorrect,
                )?;
                if c.factor != 1.0 {
                    info!(
                        "{}: dirty dynamic range {}; threshold {threshold} -> {}",
                        common.imagename,
                        dirty_dr.map(|d| format!("{d:.1}")).unwrap_or_else(|| "unknown".to_string()),
                        c.threshold
                    );
                }
                threshold = c.threshold;
                result.dr_correction_factor = Some(c.factor);
                result.max_edr_used = c.max_edr_used;

                let beam = p.beam.or_else(|| {
                    self.tool
                        .restoring_beam(&dirty_psf)
                        .ok()
                        .and_then(|b| b.first().copied())
                });
                niter = h.niter_correction(&NiterInputs {
                    niter,
                    cell_arcsec: p.cell_arcsec,
                    imsize: p.imsize,
                    residual_max: peak,
                    threshold,
                    residual_robust_rms: dirty.residual_robust_rms,
                    mask_frac_rad: None,
                    intent: p.intent,
                    beam,
                });
            }
            None => debug!("No dirty image statistics; not correcting the threshold or niter"),
        }
        sequence.set_threshold(threshold);
        sequence.set_niter(niter);
        result.threshold = Some(threshold);
        result.niter = Some(niter);

        let (keep_going, _) =
            h.keep_iterating(&self.keep_iterating_inputs(p, 0, hm_masking, 0, dirty_dr, &dirty));
        if keep_going {
            self.clean(
                p,
                &mut common,
                &mut sequence,
                &mut hm_masking,
                threshold,
                niter,
                dirty_dr,
                result,
                (pblimit_image, pblimit_cleanmask),
            )?;
        }

        if p.specmode.is_cube() {
            self.make_moments(p, result);
        }
        Ok(())
    }

    fn keep_iterating_inputs<'b>(
        &'b self,
        p: &Prepared,
        iteration: u32,
        hm_masking: HmMasking,
        stopcode: i32,
        dirty_dr: Option<f64>,
        stats: &IterationStats,
    ) -> KeepIteratingInputs<'b> {
        KeepIteratingInputs {
            iteration,
            hm_masking,
            stopcode,
            dirty_dynamic_range: dirty_dr,
            residual_max: stats.residual_max,
            residual_robust_rms: stats.residual_robust_rms,
            field: &self.inputs.field,
            intent: p.intent,
            spw: &self.inputs.spw,
            specmode: p.specmode,
            num_masks: p.mask_list.len(),
        }
    }

    /// Step 7: clean until the sequence manager or the heuristics say stop.
    #[allow(clippy::too_many_arguments)]
    fn clean(
        &self,
        p: &Prepared,
        common: &mut TcleanParams,
        sequence: &mut Box<dyn CleanSequence>,
        hm_masking: &mut HmMasking,
        threshold: Flux,
        niter: u64,
        dirty_dr: Option<f64>,
        result: &mut TcleanResult,
        (pblimit_image, pblimit_cleanmask): (f64, f64),
    ) -> Result<(), TcleanError> {
        let h = p.heuristics.as_ref();
        let ignore = h.tclean_stopcode_ignore();
        let mut iteration = 1;
        // The iteration as the current sequence manager counts them; this
        // restarts when the masking mode changes.
        let mut sequence_iteration = 1;
        let mut restart = true;

        loop {
            let (pb, template) = match result.last_iteration() {
                Some(rec) => (rec.flux.clone(), rec.residual.clone()),
                None => (String::new(), String::new()),
            };
            let new_cleanmask = cleanmask_name(&common.imagename, &common.stokes, iteration);
            let request = MaskRequest {
                new_cleanmask: &new_cleanmask,
                pblimit_image,
                pblimit_cleanmask,
                pb: Some(pb.as_str()),
                template: Some(template.as_str()),
            };
            sequence.set_threshold(h.threshold(iteration, threshold, *hm_masking));
            let decision = sequence
                .iteration(self.tool, &request, sequence_iteration)
                .map_err(|e| TcleanError::TargetFailed(e.to_string()))?
                .clone();
            if decision.is_terminal() {
                debug!("{}: the {} has finished", common.imagename, sequence.name());
                break;
            }

            let inputs = CleanBaseInputs {
                common: common.clone(),
                iteration,
                niter: decision.niter,
                threshold: decision.threshold,
                sensitivity: decision.sensitivity,
                nsigma: h.nsigma(iteration, self.inputs.nsigma, *hm_masking),
                cycleniter: h.cycleniter(iteration),
                cyclefactor: h.cyclefactor(iteration),
                scales: h.scales(iteration),
                usemask: decision.usemask,
                cleanmask: Some(decision.cleanmask.clone()).filter(|m| !m.is_empty()),
                pbmask: decision.pbmask,
                autobox: h
                    .get_autobox_params(iteration, p.intent, p.specmode, p.robust)
                    .with_overrides(&self.inputs.autobox),
                hm_masking: Some(*hm_masking),
                restoration: true,
                pbcor: true,
                restart,
            };
            *result = clean_base(self.engine, self.tool, &inputs, Some(std::mem::take(result)));
            if let Some(e) = &result.error {
                return Err(TcleanError::TargetFailed(e.clone()));
            }

            let stats = self.record_stats(&**sequence, result, pblimit_image);
            result.image_min = stats.pbcor_image_min;
            result.image_max = stats.pbcor_image_max;
            result.image_rms = stats.nonpbcor_image_non_cleanmask_rms;
            result.residual_robust_rms = stats.residual_robust_rms;
            let stopcode = match result.last_iteration() {
                Some(rec) => {
                    log_stopcode(rec, &common.imagename, &ignore);
                    rec.stopcode
                }
                None => 0,
            };

            let (keep_going, new_masking) = h.keep_iterating(&self.keep_iterating_inputs(
                p,
                iteration,
                *hm_masking,
                stopcode,
                dirty_dr,
                &stats,
            ));
            if new_masking != *hm_masking {
                info!(
                    "{}: switching from {} to {new_masking} masking",
                    common.imagename, *hm_masking
                );
                let fallback = new_masking == HmMasking::Centralregion
                    && sequence.falls_back_to_central_region();
                *hm_masking = new_masking;
                // The second iteration of an auto-masking sequence is the
                // central-region pass, at double the threshold.
                if !fallback {
                    *sequence = self.new_sequence(p, new_masking, threshold, niter)?;
                    sequence_iteration = 0;
                }
                restart = false;
            } else {
                restart = true;
            }
            if !keep_going {
                break;
            }
            iteration += 1;
            sequence_iteration += 1;
        }

        trace!(
            "{}: cleaned {} iterations",
            common.imagename,
            result.iterations().filter(|r| r.iteration > 0).count()
        );
        Ok(())
    }

    /// Step 8: moment 0 and 8 images of a cube over the line-free channels
    /// and over all channels. Failures only lose the QA product.
    fn make_moments(&self, p: &Prepared, result: &mut TcleanResult) {
        let image = match result.last_iteration() {
            Some(rec) if rec.iteration > 0 && self.tool.exists(&rec.image) => rec.image.clone(),
            _ => {
                debug!("No cleaned cube of {}; not making moment images", result.imagename);
                return;
            }
        };
        let make = |moment: Moment, chans: Option<&str>, suffix: &str| -> Option<String> {
            let output = format!("{image}.{suffix}");
            match self.tool.moments(&image, moment, chans, &output) {
                Ok(()) => Some(output),
                Err(e) => {
                    warn!("Couldn't make {output}: {e}");
                    None
                }
            }
        };

        let line_free = p.cont_ranges.as_ref().and_then(|c| {
            p.spws
                .iter()
                .find_map(|&s| c.get(&self.inputs.field, s))
                .and_then(|r| r.selection())
        });
        match line_free.as_deref() {
            Some(chans) => {
                result.mom0_fc = make(Moment::Zero, Some(chans), "mom0_fc");
                result.mom8_fc = make(Moment::Eight, Some(chans), "mom8_fc");
            }
            None => debug!(
                "No line-free ranges for {} spw {}; not making the line-free moment images",
                self.inputs.field,
                p.spws.iter().join(",")
            ),
        }
        result.mom0 = make(Moment::Zero, None, "mom0");
        result.mom8 = make(Moment::Eight, None, "mom8");
    }
}

impl TcleanError {
    /// Does this error only affect the target being imaged?
    pub fn is_target_failure(&self) -> bool {
        matches!(
            self,
            TcleanError::TargetFailed(_) | TcleanError::Spectral(_) | TcleanError::NoData { .. }
        )
    }
}

fn log_stopcode(rec: &IterationRecord, imagename: &str, ignore: &[i32]) {
    let msg = format!(
        "{imagename} iteration {}: {} iterations, {} major cycles, stop code {} ({})",
        rec.iteration, rec.iterdone, rec.nmajordone, rec.stopcode, rec.stopreason
    );
    if WARNING_STOPCODES.contains(&rec.stopcode) && !ignore.contains(&rec.stopcode) {
        warn!("{msg}");
    } else {
        info!("{msg}");
    }
}

/// Measurement set names without their extension.
fn default_prefix(vislist: &[String]) -> String {
    vislist
        .first()
        .and_then(|v| std::path::Path::new(v).file_stem())
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "pipeline".to_string())
}

/// The engine's spw selection. Continuum images only use the line-free
/// ranges of each spw; spws without any are left out.
fn spw_selection(
    field: &str,
    spws: &[u32],
    specmode: Specmode,
    cont_ranges: Option<&ContRanges>,
) -> Result<String, TcleanError> {
    let ranges = match (specmode, cont_ranges) {
        (Specmode::Cont, Some(r)) => r,
        _ => return Ok(spws.iter().join(",")),
    };
    let selection = spws
        .iter()
        .filter_map(|&spw| match ranges.get(field, spw) {
            Some(r) if r.none => {
                debug!("spw {spw} of {field} has no line-free channels");
                None
            }
            Some(r) => Some(match r.selection() {
                Some(sel) => format!("{spw}:{sel}"),
                None => spw.to_string(),
            }),
            None => Some(spw.to_string()),
        })
        .join(",");
    if selection.is_empty() {
        return Err(TcleanError::TargetFailed(format!(
            "None of spws {} of {field} have line-free channels",
            spws.iter().join(",")
        )));
    }
    Ok(selection)
}


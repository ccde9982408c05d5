// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Imaging-parameter heuristics.
//!
//! Every telescope and imaging mode has its own decision tables for things
//! like cell size, weighting, masking thresholds and iteration budgets. The
//! [`ImageParamsHeuristics`] trait lists all of these capabilities; each
//! provided method is the default behaviour, and each family (ALMA, VLA,
//! VLASS) overrides only what differs. Which implementation is used is
//! decided by [`ImagingMode`] via [`new_heuristics`].
//!
//! The heuristics are deterministic functions of the observation metadata and
//! their arguments. Anything that depends on a prior computation (whether the
//! target is a mosaic, the synthesized beam) is passed in explicitly.

mod alma;
mod base;
mod beams;
mod error;
mod vla;
mod vlass;

pub use alma::{AlmaFlavour, AlmaHeuristics};
pub use beams::{calc_sensitivities, synthesized_beam, SensitivityInputs};
pub use error::HeuristicsError;
pub use vla::{VlaFlavour, VlaHeuristics};
pub use vlass::{VlassFlavour, VlassHeuristics};

use std::{str::FromStr, sync::Arc};

use itertools::Itertools;
use lazy_static::lazy_static;
use log::debug;
use regex::Regex;
use serde::{Deserialize, Serialize};
use strum::IntoEnumIterator;
use strum_macros::{Display, EnumIter, IntoStaticStr};

use super::{Beam, Deconvolver, Flux, Gridder, HmMasking, Intent, Specmode, Weighting};
use crate::{
    constants::*,
    engine::ImageTool,
    metadata::{parse_spw_list, ObservationMetadata, SpwInfo},
    misc::format_sig_figs,
    sexagesimal::format_direction,
};

lazy_static! {
    static ref UNSAFE_NAME_CHARS: Regex = Regex::new(r"[^A-Za-z0-9+\-_.]").unwrap();
}

/// The imaging mode selects the heuristics implementation.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter, IntoStaticStr, Serialize, Deserialize,
)]
pub enum ImagingMode {
    #[strum(serialize = "ALMA")]
    #[serde(rename = "ALMA")]
    Alma,

    #[strum(serialize = "ALMA-SCAL")]
    #[serde(rename = "ALMA-SCAL")]
    AlmaScal,

    /// Science-ready data products.
    #[strum(serialize = "ALMA-SRDP")]
    #[serde(rename = "ALMA-SRDP")]
    AlmaSrdp,

    #[strum(serialize = "VLA")]
    #[serde(rename = "VLA")]
    Vla,

    #[strum(serialize = "VLA-SCAL")]
    #[serde(rename = "VLA-SCAL")]
    VlaScal,

    /// VLA Sky Survey quick-look images.
    #[strum(serialize = "VLASS-QL")]
    #[serde(rename = "VLASS-QL")]
    VlassQl,

    #[strum(serialize = "VLASS-SE-CONT")]
    #[serde(rename = "VLASS-SE-CONT")]
    VlassSeCont,

    #[strum(serialize = "VLASS-SE-CONT-AWP-P001")]
    #[serde(rename = "VLASS-SE-CONT-AWP-P001")]
    VlassSeContAwpP001,

    #[strum(serialize = "VLASS-SE-CONT-AWP-P032")]
    #[serde(rename = "VLASS-SE-CONT-AWP-P032")]
    VlassSeContAwpP032,

    #[strum(serialize = "VLASS-SE-CONT-MOSAIC")]
    #[serde(rename = "VLASS-SE-CONT-MOSAIC")]
    VlassSeContMosaic,

    #[strum(serialize = "VLASS-SE-TAPER")]
    #[serde(rename = "VLASS-SE-TAPER")]
    VlassSeTaper,

    #[strum(serialize = "VLASS-SE-CUBE")]
    #[serde(rename = "VLASS-SE-CUBE")]
    VlassSeCube,
}

impl FromStr for ImagingMode {
    type Err = HeuristicsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        ImagingMode::iter()
            .find(|m| {
                let name: &'static str = m.into();
                name.eq_ignore_ascii_case(s)
            })
            .ok_or_else(|| {
                HeuristicsError::UnknownImagingMode(
                    s.to_string(),
                    ImagingMode::iter().join(", "),
                )
            })
    }
}

impl ImagingMode {
    pub fn is_alma(self) -> bool {
        matches!(
            self,
            ImagingMode::Alma | ImagingMode::AlmaScal | ImagingMode::AlmaSrdp
        )
    }

    pub fn is_vla(self) -> bool {
        matches!(self, ImagingMode::Vla | ImagingMode::VlaScal)
    }

    pub fn is_vlass(self) -> bool {
        !self.is_alma() && !self.is_vla()
    }

    /// The single-epoch continuum modes that go through the dedicated VLASS
    /// imaging path.
    pub fn is_vlass_se_cont(self) -> bool {
        matches!(
            self,
            ImagingMode::VlassSeCont
                | ImagingMode::VlassSeContAwpP001
                | ImagingMode::VlassSeContAwpP032
                | ImagingMode::VlassSeContMosaic
        )
    }
}

/// Everything the heuristics know about the data being imaged.
#[derive(Debug, Clone)]
pub struct HeuristicsContext {
    pub metadata: Arc<ObservationMetadata>,

    /// The measurement sets being imaged.
    pub vislist: Vec<String>,

    /// The spectral windows being imaged, sorted.
    pub spws: Vec<u32>,
}

impl HeuristicsContext {
    pub fn new(
        metadata: Arc<ObservationMetadata>,
        vislist: Vec<String>,
        spw: &str,
    ) -> Result<HeuristicsContext, HeuristicsError> {
        Ok(HeuristicsContext {
            metadata,
            vislist,
            spws: parse_spw_list(spw)?,
        })
    }

    /// The requested spws that each measurement set actually has.
    pub(crate) fn spw_infos<'a>(
        &'a self,
        spws: &'a [u32],
    ) -> impl Iterator<Item = (&'a str, &'a SpwInfo)> + 'a {
        self.vislist.iter().flat_map(move |vis| {
            spws.iter().filter_map(move |&spw| {
                self.metadata
                    .spw(vis, spw)
                    .ok()
                    .map(|info| (vis.as_str(), info))
            })
        })
    }

    /// The lowest and highest frequency covered by the spws \[Hz\].
    pub(crate) fn freq_range_hz(&self, spws: &[u32]) -> Option<(f64, f64)> {
        self.spw_infos(spws).fold(None, |acc, (_, s)| match acc {
            None => Some((s.min_freq_hz, s.max_freq_hz)),
            Some((lo, hi)) => Some((f64::min(lo, s.min_freq_hz), f64::max(hi, s.max_freq_hz))),
        })
    }

    /// The total frequency span divided by its centre.
    pub(crate) fn fractional_bandwidth(&self, spws: &[u32]) -> Option<f64> {
        self.freq_range_hz(spws)
            .map(|(lo, hi)| 2.0 * (hi - lo) / (hi + lo))
    }
}

/// The outcome of a dynamic-range correction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DrCorrection {
    pub threshold: Flux,

    /// The new threshold divided by the old one.
    pub factor: f64,

    /// Was the threshold set by the maximum expected dynamic range?
    pub max_edr_used: bool,
}

impl DrCorrection {
    pub(crate) fn unchanged(threshold: Flux) -> DrCorrection {
        DrCorrection {
            threshold,
            factor: 1.0,
            max_edr_used: false,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct NiterInputs {
    pub niter: u64,
    pub cell_arcsec: f64,
    pub imsize: [usize; 2],
    /// \[Jy\]
    pub residual_max: f64,
    pub threshold: Flux,
    pub residual_robust_rms: Option<f64>,
    /// The clean mask radius as a fraction of the image half-width, if
    /// known.
    pub mask_frac_rad: Option<f64>,
    pub intent: Intent,
    pub beam: Option<Beam>,
}

#[derive(Debug, Clone, Copy)]
pub struct KeepIteratingInputs<'a> {
    /// The iteration that just finished.
    pub iteration: u32,
    pub hm_masking: HmMasking,
    /// The engine stop code of that iteration.
    pub stopcode: i32,
    pub dirty_dynamic_range: Option<f64>,
    pub residual_max: Option<f64>,
    pub residual_robust_rms: Option<f64>,
    pub field: &'a str,
    pub intent: Intent,
    pub spw: &'a str,
    pub specmode: Specmode,
    /// The number of masks the sequence manager was configured with.
    pub num_masks: usize,
}

/// Parameters of the engine's auto-masking algorithm. `None` leaves a
/// parameter to the engine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct AutoboxParams {
    pub sidelobethreshold: Option<f64>,
    pub noisethreshold: Option<f64>,
    pub lownoisethreshold: Option<f64>,
    pub negativethreshold: Option<f64>,
    pub minbeamfrac: Option<f64>,
    pub growiterations: Option<u32>,
    pub dogrowprune: Option<bool>,
    pub minpercentchange: Option<f64>,
    pub fastnoise: Option<bool>,
}

impl AutoboxParams {
    /// Explicitly-given values win over the heuristics.
    pub fn with_overrides(self, overrides: &AutoboxParams) -> AutoboxParams {
        AutoboxParams {
            sidelobethreshold: overrides.sidelobethreshold.or(self.sidelobethreshold),
            noisethreshold: overrides.noisethreshold.or(self.noisethreshold),
            lownoisethreshold: overrides.lownoisethreshold.or(self.lownoisethreshold),
            negativethreshold: overrides.negativethreshold.or(self.negativethreshold),
            minbeamfrac: overrides.minbeamfrac.or(self.minbeamfrac),
            growiterations: overrides.growiterations.or(self.growiterations),
            dogrowprune: overrides.dogrowprune.or(self.dogrowprune),
            minpercentchange: overrides.minpercentchange.or(self.minpercentchange),
            fastnoise: overrides.fastnoise.or(self.fastnoise),
        }
    }
}

/// Imaging-parameter decisions. Provided methods are the defaults shared by
/// all imaging modes.
pub trait ImageParamsHeuristics: Sync + Send {
    fn imaging_mode(&self) -> ImagingMode;

    fn context(&self) -> &HeuristicsContext;

    fn metadata(&self) -> &ObservationMetadata {
        &self.context().metadata
    }

    fn vislist(&self) -> &[String] {
        &self.context().vislist
    }

    fn spws(&self) -> &[u32] {
        &self.context().spws
    }

    fn robust(&self, _specmode: Specmode) -> f64 {
        DEFAULT_ROBUST
    }

    fn uvtaper(&self) -> Vec<String> {
        vec![]
    }

    fn weighting(&self, _specmode: Specmode) -> Weighting {
        Weighting::Briggs
    }

    /// Per-channel weight density goes with bandwidth-tapered Briggs weighting.
    fn perchanweightdensity(&self, specmode: Specmode) -> bool {
        self.weighting(specmode) == Weighting::Briggsbwtaper
    }

    fn pixperbeam(&self) -> f64 {
        DEFAULT_PIXPERBEAM
    }

    /// Does `cell` (or `imsize`) need the synthesized beam?
    fn needs_beam(&self) -> bool {
        true
    }

    /// The cell size: the synthesized beam minor axis sampled by
    /// `pixperbeam` pixels, to two significant figures.
    fn cell(&self, beam: Option<&Beam>) -> Result<Vec<String>, HeuristicsError> {
        match beam {
            Some(beam) => Ok(base::cell_from_beam(beam, self.pixperbeam())),
            None => Err(HeuristicsError::BadCell("no synthesized beam".to_string())),
        }
    }

    /// The FWHM of the largest primary beam among the data \[arcsec\]. The
    /// largest beam comes from the smallest dish at the lowest frequency.
    fn largest_primary_beam_arcsec(&self, spws: &[u32]) -> Result<f64, HeuristicsError> {
        let (lo, _) = self
            .context()
            .freq_range_hz(spws)
            .ok_or_else(|| HeuristicsError::NoSpws {
                spw: spws.iter().join(","),
            })?;
        Ok(base::primary_beam_fwhm_arcsec(
            lo,
            self.metadata().smallest_antenna_diameter(),
        ))
    }

    /// The image size covering the primary beam out to `pblimit` (and, for
    /// mosaics, every pointing), rounded up to an FFT-friendly size.
    fn imsize(
        &self,
        field: &str,
        intent: Intent,
        cell_arcsec: f64,
        primary_beam_arcsec: f64,
        pblimit: f64,
        is_mosaic: bool,
    ) -> [usize; 2] {
        base::imsize(
            self.metadata(),
            field,
            intent,
            cell_arcsec,
            primary_beam_arcsec,
            pblimit,
            is_mosaic,
        )
    }

    /// The primary-beam levels (image, clean mask) below which the image is
    /// blanked and no cleaning is done.
    fn pblimits(&self, pb: Option<&str>, tool: &dyn ImageTool) -> (f64, f64) {
        base::pblimits(pb, tool)
    }

    fn gridder(&self, _intent: Intent, is_mosaic: bool) -> Gridder {
        if is_mosaic {
            Gridder::Mosaic
        } else {
            Gridder::Standard
        }
    }

    fn deconvolver(&self, specmode: Specmode, spws: &[u32]) -> Deconvolver {
        if specmode.is_cube() {
            return Deconvolver::Hogbom;
        }
        match self.context().fractional_bandwidth(spws) {
            Some(f) if f > MTMFS_FRACTIONAL_BW => {
                debug!("Fractional bandwidth {f:.3} > {MTMFS_FRACTIONAL_BW}; using mtmfs");
                Deconvolver::Mtmfs
            }
            _ => Deconvolver::Hogbom,
        }
    }

    fn nterms(&self, deconvolver: Deconvolver) -> Option<u32> {
        match deconvolver {
            Deconvolver::Mtmfs => Some(2),
            _ => None,
        }
    }

    fn threshold(&self, _iteration: u32, threshold: Flux, _hm_masking: HmMasking) -> Flux {
        threshold
    }

    fn nsigma(&self, _iteration: u32, hm_nsigma: Option<f64>, _hm_masking: HmMasking) -> Option<f64> {
        hm_nsigma
    }

    fn cyclefactor(&self, _iteration: u32) -> Option<f64> {
        None
    }

    fn cycleniter(&self, _iteration: u32) -> Option<i64> {
        None
    }

    fn scales(&self, _iteration: u32) -> Option<Vec<u32>> {
        None
    }

    fn smallscalebias(&self) -> Option<f64> {
        None
    }

    fn tlimit(&self) -> f64 {
        DEFAULT_TLIMIT
    }

    /// Adjust the cleaning threshold for the dynamic range of the dirty
    /// image. A positive `drcorrect` is a manual correction factor; the
    /// sentinel [`DRCORRECT_SENTINEL`] means "decide automatically".
    fn dr_correction(
        &self,
        threshold: Flux,
        _dirty_dynamic_range: f64,
        _residual_max: f64,
        _intent: Intent,
        _tlimit: f64,
        drcorrect: f64,
    ) -> Result<DrCorrection, HeuristicsError> {
        Ok(base::manual_dr_correction(threshold, drcorrect)?
            .unwrap_or_else(|| DrCorrection::unchanged(threshold)))
    }

    fn niter(&self) -> u64 {
        DEFAULT_NITER
    }

    fn niter_correction(&self, inputs: &NiterInputs) -> u64 {
        base::estimate_niter(inputs)
    }

    fn get_autobox_params(
        &self,
        _iteration: u32,
        _intent: Intent,
        _specmode: Specmode,
        _robust: f64,
    ) -> AutoboxParams {
        AutoboxParams::default()
    }

    /// Should another clean iteration be done, and with which masking?
    fn keep_iterating(&self, inputs: &KeepIteratingInputs) -> (bool, HmMasking) {
        (inputs.iteration == 0, inputs.hm_masking)
    }

    /// Engine stop codes that are expected and aren't worth a warning.
    fn tclean_stopcode_ignore(&self) -> Vec<i32> {
        vec![]
    }

    fn default_hm_masking(&self) -> HmMasking {
        HmMasking::Auto
    }

    fn specmode(&self, requested: Option<Specmode>) -> Specmode {
        requested.unwrap_or(Specmode::Mfs)
    }

    fn mosweight(&self, _is_mosaic: bool) -> Option<bool> {
        None
    }

    fn usepointing(&self, _gridder: Gridder) -> Option<bool> {
        None
    }

    fn wprojplanes(&self, _gridder: Gridder) -> Option<i32> {
        None
    }

    fn conjbeams(&self) -> Option<bool> {
        None
    }

    fn rotatepastep(&self, _gridder: Gridder) -> Option<f64> {
        None
    }

    fn pointingoffsetsigdev(&self, _gridder: Gridder) -> Option<Vec<f64>> {
        None
    }

    /// Cubes are restored with a common beam.
    fn restoringbeam(&self, specmode: Specmode) -> Option<String> {
        specmode.is_cube().then(|| "common".to_string())
    }

    fn datacolumn(&self) -> Option<String> {
        None
    }

    /// The Taylor-expansion reference frequency for multi-term imaging.
    fn reffreq(&self, deconvolver: Deconvolver, spws: &[u32]) -> Option<String> {
        if deconvolver != Deconvolver::Mtmfs {
            return None;
        }
        self.context()
            .freq_range_hz(spws)
            .map(|(lo, hi)| format!("{}GHz", format_sig_figs(0.5 * (lo + hi) / 1e9, 10)))
    }

    fn restfreq(&self, specmode: Specmode, spws: &[u32]) -> Option<String> {
        if !specmode.is_cube() {
            return None;
        }
        self.context()
            .spw_infos(spws)
            .next()
            .map(|(_, s)| {
                let f = s.ref_freq_hz.unwrap_or_else(|| s.centre_freq_hz());
                format!("{}GHz", format_sig_figs(f / 1e9, 10))
            })
    }

    fn stokes(&self, _intent: Intent) -> String {
        "I".to_string()
    }

    /// e.g. "uid___A001.s12.M100_sci.spw17_19.cube".
    fn imagename(
        &self,
        prefix: &str,
        stage: u32,
        field: &str,
        intent: Intent,
        spws: &[u32],
        specmode: Specmode,
    ) -> String {
        let field = UNSAFE_NAME_CHARS.replace_all(field, "_");
        format!(
            "{prefix}.s{stage}.{field}_{}.spw{}.{specmode}",
            intent.short_name(),
            spws.iter().join("_")
        )
    }

    /// The phase centre as a direction string. Ephemeris objects are tracked;
    /// mosaics are centred on the middle of the pointings' bounding box.
    fn phasecenter(
        &self,
        field: &str,
        intent: Intent,
        is_mosaic: bool,
    ) -> Result<String, HeuristicsError> {
        if self.metadata().is_eph_obj(field)? {
            return Ok("TRACKFIELD".to_string());
        }
        let centre = base::pointing_centre(self.metadata(), field, intent, is_mosaic)?;
        Ok(format_direction("ICRS", centre))
    }

    /// The field IDs to image in each measurement set, comma separated.
    fn field(&self, field: &str, intent: Intent) -> Result<Vec<String>, HeuristicsError> {
        self.vislist()
            .iter()
            .map(|vis| {
                Ok(self
                    .metadata()
                    .field_ids(vis, field, intent)?
                    .into_iter()
                    .join(","))
            })
            .collect()
    }

    /// Antenna selection per measurement set; empty means everything.
    fn antenna(&self) -> Vec<String> {
        vec![]
    }

    /// The masks a manual-masking sequence works through.
    fn mask_list(&self, user_masks: &[String]) -> Vec<String> {
        user_masks.to_vec()
    }

    /// The AW-projection convolution function cache to use, if any.
    fn cfcache(&self, _imagename: &str, _wbawp: bool) -> Option<String> {
        None
    }

    fn is_vlass_se_cont(&self) -> bool {
        self.imaging_mode().is_vlass_se_cont()
    }
}

/// Make the heuristics for an imaging mode.
pub fn new_heuristics(
    mode: ImagingMode,
    metadata: Arc<ObservationMetadata>,
    vislist: Vec<String>,
    spw: &str,
) -> Result<Box<dyn ImageParamsHeuristics>, HeuristicsError> {
    let context = HeuristicsContext::new(metadata, vislist, spw)?;
    debug!("Using {mode} imaging heuristics");
    let h: Box<dyn ImageParamsHeuristics> = match mode {
        ImagingMode::Alma => Box::new(AlmaHeuristics::new(context, AlmaFlavour::Standard)),
        ImagingMode::AlmaScal => Box::new(AlmaHeuristics::new(context, AlmaFlavour::Scal)),
        ImagingMode::AlmaSrdp => Box::new(AlmaHeuristics::new(context, AlmaFlavour::Srdp)),
        ImagingMode::Vla => Box::new(VlaHeuristics::new(context, VlaFlavour::Standard)),
        ImagingMode::VlaScal => Box::new(VlaHeuristics::new(context, VlaFlavour::Scal)),
        ImagingMode::VlassQl => Box::new(VlassHeuristics::new(context, VlassFlavour::Ql)),
        ImagingMode::VlassSeCont => Box::new(VlassHeuristics::new(context, VlassFlavour::SeCont)),
        ImagingMode::VlassSeContAwpP001 => {
            Box::new(VlassHeuristics::new(context, VlassFlavour::SeContAwpP001))
        }
        ImagingMode::VlassSeContAwpP032 => {
            Box::new(VlassHeuristics::new(context, VlassFlavour::SeContAwpP032))
        }
        ImagingMode::VlassSeContMosaic => {
            Box::new(VlassHeuristics::new(context, VlassFlavour::SeContMosaic))
        }
        ImagingMode::VlassSeTaper => Box::new(VlassHeuristics::new(context, VlassFlavour::SeTaper)),
        ImagingMode::VlassSeCube => Box::new(VlassHeuristics::new(context, VlassFlavour::SeCube)),
    };
    Ok(h)
}

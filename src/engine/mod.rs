// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The external toolkit: a deconvolution engine and an image statistics/
//! manipulation tool.
//!
//! Nothing in the imaging core knows how images are actually made; it only
//! submits parameter sets and asks questions about the resulting image
//! products through these traits. `CasaProcessEngine` talks to a real toolkit
//! installation.

mod casa;
mod error;

pub use casa::{CasaProcessEngine, EngineConfig};
pub use error::EngineError;

use serde::{Deserialize, Serialize};

use crate::imaging::Beam;

/// The deconvolution engine's full parameter surface. Field names are the
/// toolkit's own; this struct is serialised verbatim into the engine call.
/// Optional parameters that aren't set are left to the toolkit's defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TcleanParams {
    pub vis: Vec<String>,
    pub imagename: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub datacolumn: Option<String>,
    /// One field selection per measurement set.
    pub field: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub intent: Option<String>,
    /// One spw selection per measurement set.
    pub spw: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub antenna: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uvrange: Option<String>,

    pub specmode: String,
    pub gridder: String,
    pub deconvolver: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nterms: Option<u32>,
    pub imsize: Vec<usize>,
    pub cell: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phasecenter: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub psfphasecenter: Option<String>,
    pub stokes: String,

    pub nchan: i64,
    pub start: String,
    pub width: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outframe: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub restfreq: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reffreq: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interpolation: Option<String>,

    pub weighting: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub robust: Option<f64>,
    pub uvtaper: Vec<String>,
    pub perchanweightdensity: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mosweight: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usepointing: Option<bool>,

    pub niter: u64,
    pub threshold: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nsigma: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cycleniter: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cyclefactor: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scales: Option<Vec<u32>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub smallscalebias: Option<f64>,

    pub usemask: String,
    pub mask: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pbmask: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sidelobethreshold: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub noisethreshold: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lownoisethreshold: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub negativethreshold: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub minbeamfrac: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub growiterations: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dogrowprune: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub minpercentchange: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fastnoise: Option<bool>,

    pub pblimit: f64,
    pub pbcor: bool,
    pub restoration: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub restoringbeam: Option<String>,
    pub calcpsf: bool,
    pub calcres: bool,
    pub restart: bool,
    pub savemodel: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub wprojplanes: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conjbeams: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rotatepastep: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pointingoffsetsigdev: Option<Vec<f64>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cfcache: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wbawp: Option<bool>,

    pub parallel: bool,
    pub fullsummary: bool,
}

impl Default for TcleanParams {
    fn default() -> Self {
        TcleanParams {
            vis: vec![],
            imagename: String::new(),
            datacolumn: None,
            field: vec![],
            intent: None,
            spw: vec![],
            antenna: None,
            uvrange: None,
            specmode: "mfs".to_string(),
            gridder: "standard".to_string(),
            deconvolver: "hogbom".to_string(),
            nterms: None,
            imsize: vec![],
            cell: vec![],
            phasecenter: None,
            psfphasecenter: None,
            stokes: "I".to_string(),
            nchan: -1,
            start: String::new(),
            width: String::new(),
            outframe: None,
            restfreq: None,
            reffreq: None,
            interpolation: None,
            weighting: "briggs".to_string(),
            robust: None,
            uvtaper: vec![],
            perchanweightdensity: false,
            mosweight: None,
            usepointing: None,
            niter: 0,
            threshold: "0.0mJy".to_string(),
            nsigma: None,
            cycleniter: None,
            cyclefactor: None,
            scales: None,
            smallscalebias: None,
            usemask: "user".to_string(),
            mask: String::new(),
            pbmask: None,
            sidelobethreshold: None,
            noisethreshold: None,
            lownoisethreshold: None,
            negativethreshold: None,
            minbeamfrac: None,
            growiterations: None,
            dogrowprune: None,
            minpercentchange: None,
            fastnoise: None,
            pblimit: crate::constants::DEFAULT_PBLIMIT_IMAGE,
            pbcor: true,
            restoration: true,
            restoringbeam: None,
            calcpsf: true,
            calcres: true,
            restart: true,
            savemodel: "none".to_string(),
            wprojplanes: None,
            conjbeams: None,
            rotatepastep: None,
            pointingoffsetsigdev: None,
            cfcache: None,
            wbawp: None,
            parallel: false,
            fullsummary: false,
        }
    }
}

/// What comes back from one invocation of the deconvolution engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TcleanReturn {
    #[serde(default)]
    pub stopcode: i32,

    #[serde(default)]
    pub stopreason: Option<String>,

    #[serde(default)]
    pub iterdone: u64,

    #[serde(default)]
    pub nmajordone: u32,

    /// The peak residual at the end of each minor-cycle set \[Jy\].
    #[serde(default)]
    pub peak_residuals: Vec<f64>,

    /// The model flux at the end of each minor-cycle set \[Jy\].
    #[serde(default)]
    pub model_flux: Vec<f64>,
}

/// A human-readable description of a deconvolution engine stop code.
pub fn stop_reason(code: i32) -> &'static str {
    match code {
        0 => "no stopping criterion reached",
        1 => "iteration limit",
        2 => "threshold",
        3 => "force stop",
        4 => "no change in peak residual across two major cycles",
        5 => "peak residual increased by more than 3 times from the previous major cycle",
        6 => "peak residual increased by more than 3 times from the minimum reached",
        7 => "zero mask",
        8 => "any combination of n-sigma and other valid exit criterion",
        _ => "unrecognised stop code",
    }
}

/// Stop codes that deserve a warning unless a heuristic says otherwise. 0 may
/// mean the image is under-cleaned; 1, 5 and 6 mean cleaning was cut short.
pub const WARNING_STOPCODES: [i32; 4] = [0, 1, 5, 6];

/// Pixel statistics of (part of) an image.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ImageStats {
    pub max: f64,
    pub min: f64,
    pub rms: f64,
    pub median: f64,
    pub medabsdevmed: f64,
    pub sum: f64,
    pub npts: u64,

    /// The smallest and largest per-plane rms; the same as `rms` for
    /// single-plane images.
    pub plane_rms_min: f64,
    pub plane_rms_max: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MaskSense {
    Inside,
    Outside,
}

/// The pixels over which statistics are evaluated.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatsRegion {
    pub mask: Option<(String, MaskSense)>,

    /// Only pixels where this primary beam image exceeds the limit.
    pub pb_above: Option<(String, f64)>,

    /// A channel selection, e.g. "0~10;20~30".
    pub chans: Option<String>,
}

impl StatsRegion {
    pub fn all() -> StatsRegion {
        StatsRegion::default()
    }

    pub fn inside(mask: &str) -> StatsRegion {
        StatsRegion {
            mask: Some((mask.to_string(), MaskSense::Inside)),
            ..Default::default()
        }
    }

    pub fn outside(mask: &str) -> StatsRegion {
        StatsRegion {
            mask: Some((mask.to_string(), MaskSense::Outside)),
            ..Default::default()
        }
    }

    pub fn with_pb_above(mut self, pb: Option<&str>, limit: f64) -> StatsRegion {
        self.pb_above = pb.map(|pb| (pb.to_string(), limit));
        self
    }

    /// The region as a lattice expression understood by the image tool.
    pub fn to_lel(&self) -> Option<String> {
        let mut terms = vec![];
        if let Some((mask, sense)) = &self.mask {
            terms.push(match sense {
                MaskSense::Inside => format!("\"{mask}\" > 0.1"),
                MaskSense::Outside => format!("\"{mask}\" < 0.1"),
            });
        }
        if let Some((pb, limit)) = &self.pb_above {
            terms.push(format!("\"{pb}\" > {limit}"));
        }
        if terms.is_empty() {
            None
        } else {
            Some(terms.join(" && "))
        }
    }
}

/// The shape of an image cube.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageShape {
    pub nx: usize,
    pub ny: usize,
    pub nstokes: usize,
    pub nchan: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Moment {
    /// Integrated intensity.
    Zero,

    /// Maximum value along the spectral axis.
    Eight,
}

impl Moment {
    pub fn index(self) -> i32 {
        match self {
            Moment::Zero => 0,
            Moment::Eight => 8,
        }
    }
}

/// Everything the engine needs to estimate the theoretical sensitivity of one
/// measurement set and spw.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensitivityRequest {
    pub vis: String,
    pub field: String,
    pub intent: String,
    pub spw: u32,
    /// Channel selection within the spw (e.g. "114.8~115.2GHz"); everything if
    /// `None`.
    pub chansel: Option<String>,
    pub specmode: String,
    pub imsize: Vec<usize>,
    pub cell: Vec<String>,
    pub weighting: String,
    pub robust: f64,
    pub uvtaper: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ApparentSensitivity {
    /// \[Jy/beam\]
    pub sensitivity_jy: f64,

    /// The bandwidth the sensitivity applies to \[Hz\].
    pub bandwidth_hz: f64,
}

/// The external deconvolution engine.
pub trait DeconvolutionEngine: Sync + Send {
    /// Run one imaging/deconvolution job ("major cycle" set).
    fn tclean(&self, params: &TcleanParams) -> Result<TcleanReturn, EngineError>;

    /// The theoretical point-source sensitivity of the data.
    fn apparent_sensitivity(
        &self,
        request: &SensitivityRequest,
    ) -> Result<ApparentSensitivity, EngineError>;
}

/// The external image analysis tool. Images are named by path.
pub trait ImageTool: Sync + Send {
    fn exists(&self, image: &str) -> bool;

    fn shape(&self, image: &str) -> Result<ImageShape, EngineError>;

    /// The restoring beam of each channel (a single beam for continuum images).
    fn restoring_beam(&self, image: &str) -> Result<Vec<Beam>, EngineError>;

    /// `Ok(None)` when the region contains no pixels.
    fn statistics(
        &self,
        image: &str,
        region: &StatsRegion,
    ) -> Result<Option<ImageStats>, EngineError>;

    /// The mean primary-beam response along the image edge.
    fn pb_edge_response(&self, pb: &str) -> Result<f64, EngineError>;

    fn copy_image(&self, from: &str, to: &str) -> Result<(), EngineError>;

    fn remove_image(&self, image: &str) -> Result<(), EngineError>;

    /// A mask that is 1 where the primary beam exceeds `pblimit`.
    fn make_pb_mask(&self, pb: &str, mask: &str, pblimit: f64) -> Result<(), EngineError>;

    /// A box mask on the grid of `template`; corners are pixel coordinates.
    fn make_box_mask(
        &self,
        template: &str,
        mask: &str,
        blc: [usize; 2],
        trc: [usize; 2],
    ) -> Result<(), EngineError>;

    /// A circular mask on the grid of `template` \[pixels\].
    fn make_circle_mask(
        &self,
        template: &str,
        mask: &str,
        centre: [f64; 2],
        radius: f64,
    ) -> Result<(), EngineError>;

    /// Regrid `mask` onto the grid of `template`.
    fn regrid_mask(&self, mask: &str, template: &str, output: &str) -> Result<(), EngineError>;

    /// The union of several masks, regridded onto `template`.
    fn combine_masks(
        &self,
        masks: &[String],
        template: &str,
        output: &str,
    ) -> Result<(), EngineError>;

    fn moments(
        &self,
        image: &str,
        moment: Moment,
        chans: Option<&str>,
        output: &str,
    ) -> Result<(), EngineError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_region_lel() {
        assert_eq!(StatsRegion::all().to_lel(), None);
        assert_eq!(
            StatsRegion::outside("a.mask")
                .with_pb_above(Some("a.pb"), 0.2)
                .to_lel()
                .unwrap(),
            r#""a.mask" < 0.1 && "a.pb" > 0.2"#
        );
        assert_eq!(
            StatsRegion::inside("a.mask")
                .with_pb_above(None, 0.2)
                .to_lel()
                .unwrap(),
            r#""a.mask" > 0.1"#
        );
    }

    #[test]
    fn test_params_serialisation_skips_unset() {
        let params = TcleanParams {
            vis: vec!["a.ms".to_string()],
            imagename: "img.I.iter0".to_string(),
            ..Default::default()
        };
        let json = serde_json::to_value(&params).unwrap();
        assert_eq!(json["imagename"], "img.I.iter0");
        assert_eq!(json["threshold"], "0.0mJy");
        assert!(json.get("nsigma").is_none());
        assert!(json.get("cfcache").is_none());
    }

    #[test]
    fn test_stop_reasons() {
        assert_eq!(stop_reason(7), "zero mask");
        assert_eq!(stop_reason(42), "unrecognised stop code");
    }
}

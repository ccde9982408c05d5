// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Things shared by the imaging tests: metadata fixtures and a scripted,
//! in-memory stand-in for the deconvolution engine and image tool.

use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Mutex, MutexGuard},
};

use vec1::Vec1;

use super::{Beam, Intent};
use crate::{
    engine::{
        ApparentSensitivity, DeconvolutionEngine, EngineError, ImageShape, ImageStats, ImageTool,
        Moment, SensitivityRequest, StatsRegion, TcleanParams, TcleanReturn,
    },
    metadata::{
        AntennaInfo, FieldInfo, FreqFrame, MeasurementSetInfo, ObservationMetadata,
        RepresentativeTarget, SpwInfo,
    },
};

pub(crate) fn spw(id: u32, min_ghz: f64, max_ghz: f64, num_channels: u32) -> SpwInfo {
    let min = min_ghz * 1e9;
    let max = max_ghz * 1e9;
    SpwInfo {
        id,
        name: format!("spw{id}"),
        min_freq_hz: min,
        max_freq_hz: max,
        chan_width_hz: (max - min) / num_channels as f64,
        num_channels,
        effective_bw_hz: None,
        ref_freq_hz: None,
        frame: FreqFrame::Lsrk,
        transitions: vec![],
        band: None,
        spw_type: "SCIENCE".to_string(),
    }
}

pub(crate) fn field(id: u32, name: &str, intents: &[Intent], ra_deg: f64, dec_deg: f64) -> FieldInfo {
    FieldInfo {
        id,
        name: name.to_string(),
        intents: intents.to_vec(),
        ra_deg,
        dec_deg,
        is_ephemeris: false,
    }
}

pub(crate) fn ms(
    name: &str,
    diameters: &[(f64, usize)],
    baselines: &[f64],
    spws: Vec<SpwInfo>,
    fields: Vec<FieldInfo>,
) -> MeasurementSetInfo {
    let mut antennas = vec![];
    for &(diameter_m, count) in diameters {
        for i in 0..count {
            antennas.push(AntennaInfo {
                name: format!("A{diameter_m}{i:03}"),
                diameter_m,
            });
        }
    }
    MeasurementSetInfo {
        name: name.to_string(),
        antennas,
        baseline_lengths_m: baselines.to_vec(),
        spectral_windows: spws,
        fields,
    }
}

fn observation(telescope: &str, measurement_sets: Vec<MeasurementSetInfo>) -> Arc<ObservationMetadata> {
    Arc::new(ObservationMetadata {
        telescope: telescope.to_string(),
        measurement_sets: Vec1::try_from_vec(measurement_sets).unwrap(),
        representative_target: Some(RepresentativeTarget {
            source: Some("M100".to_string()),
            frequency_hz: Some(115.27e9),
            bandwidth_hz: Some(1e6),
        }),
    })
}

fn alma_fields(mosaic: bool) -> Vec<FieldInfo> {
    let mut fields = vec![
        field(0, "J1229+0203", &[Intent::Bandpass, Intent::Phase], 187.2779, 2.0524),
        field(1, "M100", &[Intent::Target], 185.7288, 15.8223),
    ];
    if mosaic {
        fields.push(field(2, "M100", &[Intent::Target], 185.7288, 15.8323));
        fields.push(field(3, "M100", &[Intent::Target], 185.7388, 15.8223));
    }
    fields
}

fn alma_spws() -> Vec<SpwInfo> {
    vec![spw(17, 114.5, 116.5, 1920), spw(19, 112.5, 114.5, 1920)]
}

/// A compact 12 m ALMA observation of M100 in band 3.
pub(crate) fn alma_12m_metadata() -> Arc<ObservationMetadata> {
    let baselines: Vec<f64> = (1..=40).map(|i| 15.0 + 6.0 * i as f64).collect();
    observation(
        "ALMA",
        vec![ms(
            "uid___A002_X1.ms",
            &[(12.0, 40)],
            &baselines,
            alma_spws(),
            alma_fields(false),
        )],
    )
}

pub(crate) fn alma_12m_mosaic_metadata() -> Arc<ObservationMetadata> {
    let baselines: Vec<f64> = (1..=40).map(|i| 15.0 + 6.0 * i as f64).collect();
    observation(
        "ALMA",
        vec![ms(
            "uid___A002_X1.ms",
            &[(12.0, 40)],
            &baselines,
            alma_spws(),
            alma_fields(true),
        )],
    )
}

pub(crate) fn alma_7m_metadata() -> Arc<ObservationMetadata> {
    let baselines: Vec<f64> = (1..=20).map(|i| 9.0 + 2.0 * i as f64).collect();
    observation(
        "ALMA",
        vec![ms(
            "uid___A002_X7.ms",
            &[(7.0, 10)],
            &baselines,
            alma_spws(),
            alma_fields(false),
        )],
    )
}

/// Two datasets of the same VLA L-band observation.
pub(crate) fn vla_metadata() -> Arc<ObservationMetadata> {
    let spws = || {
        (0..8)
            .map(|i| {
                let lo = 1.0 + 0.125 * i as f64;
                spw(2 + i, lo, lo + 0.125, 64)
            })
            .collect::<Vec<_>>()
    };
    let fields = || {
        vec![
            field(0, "3C286", &[Intent::Bandpass, Intent::Amplitude], 202.7845, 30.5092),
            field(1, "J1407+2827", &[Intent::Phase], 211.7517, 28.4540),
            field(2, "NGC5194", &[Intent::Target], 202.4696, 47.1952),
        ]
    };
    let baselines: Vec<f64> = (1..=50).map(|i| 40.0 * i as f64).collect();
    observation(
        "EVLA",
        vec![
            ms("13A-001.sb1.ms", &[(25.0, 27)], &baselines, spws(), fields()),
            ms("13A-001.sb2.ms", &[(25.0, 27)], &baselines, spws(), fields()),
        ],
    )
}

pub(crate) fn vlass_metadata() -> Arc<ObservationMetadata> {
    let spws = (0..16)
        .map(|i| {
            let lo = 2.0 + 0.128 * i as f64;
            spw(2 + i, lo, lo + 0.128, 64)
        })
        .collect();
    let fields = (0..5)
        .map(|i| field(i, "T08t01.J123", &[Intent::Target], 180.0 + 0.1 * i as f64, 30.0))
        .collect();
    observation(
        "EVLA",
        vec![ms("VLASS1.1.ql.ms", &[(25.0, 27)], &[], spws, fields)],
    )
}

/// The state of a [`MockEngine`]; tests set things up and inspect it through
/// [`MockEngine::state`].
#[derive(Debug)]
pub(crate) struct MockState {
    /// Every tclean call made, in order.
    pub(crate) tclean_calls: Vec<TcleanParams>,
    pub(crate) psf_only_calls: usize,
    pub(crate) sensitivity_calls: usize,

    /// The images that "exist".
    pub(crate) images: HashMap<String, ImageShape>,
    pub(crate) removed: Vec<String>,
    pub(crate) copied: Vec<(String, String)>,
    pub(crate) regridded: Vec<(String, String)>,
    pub(crate) combined: Vec<Vec<String>>,
    pub(crate) moments: Vec<String>,

    pub(crate) beam: Beam,
    pub(crate) sensitivity: ApparentSensitivity,
    /// Stop codes for successive cleaning (niter > 0) calls; the last one
    /// repeats.
    pub(crate) stopcodes: VecDeque<i32>,
    /// Statistics keyed by product suffix, e.g. "residual" or "image.pbcor".
    pub(crate) stats: HashMap<String, ImageStats>,
    pub(crate) pb_edge: Option<f64>,

    pub(crate) fail_tclean: bool,
    /// Fail cleaning (niter > 0) calls only.
    pub(crate) fail_cleaning: bool,
    pub(crate) fail_psf: bool,
    pub(crate) fail_sensitivity: bool,
    pub(crate) fail_moments: bool,
}

impl Default for MockState {
    fn default() -> Self {
        MockState {
            tclean_calls: vec![],
            psf_only_calls: 0,
            sensitivity_calls: 0,
            images: HashMap::new(),
            removed: vec![],
            copied: vec![],
            regridded: vec![],
            combined: vec![],
            moments: vec![],
            beam: Beam {
                major: 2.0,
                minor: 1.5,
                pa: 30.0,
            },
            sensitivity: ApparentSensitivity {
                sensitivity_jy: 1e-3,
                bandwidth_hz: 2e9,
            },
            stopcodes: VecDeque::new(),
            stats: HashMap::new(),
            pb_edge: None,
            fail_tclean: false,
            fail_cleaning: false,
            fail_psf: false,
            fail_sensitivity: false,
            fail_moments: false,
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct MockEngine {
    state: Mutex<MockState>,
}

impl MockEngine {
    pub(crate) fn new() -> MockEngine {
        MockEngine::default()
    }

    pub(crate) fn state(&self) -> MutexGuard<MockState> {
        self.state.lock().unwrap()
    }

    pub(crate) fn add_image(&self, name: &str, nx: usize) {
        self.state().images.insert(
            name.to_string(),
            ImageShape {
                nx,
                ny: nx,
                nstokes: 1,
                nchan: 1,
            },
        );
    }

    pub(crate) fn set_stats(&self, suffix: &str, stats: ImageStats) {
        self.state().stats.insert(suffix.to_string(), stats);
    }

    /// The cleaning (niter > 0) calls.
    pub(crate) fn cleaning_calls(&self) -> Vec<TcleanParams> {
        self.state()
            .tclean_calls
            .iter()
            .filter(|p| p.niter > 0)
            .cloned()
            .collect()
    }

    fn require(state: &MockState, image: &str) -> Result<ImageShape, EngineError> {
        state
            .images
            .get(image)
            .copied()
            .ok_or_else(|| EngineError::NoSuchImage(image.to_string()))
    }
}

pub(crate) fn stats(max: f64, min: f64, rms: f64) -> ImageStats {
    ImageStats {
        max,
        min,
        rms,
        median: 0.0,
        medabsdevmed: rms / 1.4826,
        sum: max,
        npts: 1000,
        plane_rms_min: rms,
        plane_rms_max: rms,
    }
}

fn strip_taylor_term(image: &str) -> &str {
    match image.rsplit_once(".tt") {
        Some((base, term)) if term.chars().all(|c| c.is_ascii_digit()) => base,
        _ => image,
    }
}

impl DeconvolutionEngine for MockEngine {
    fn tclean(&self, params: &TcleanParams) -> Result<TcleanReturn, EngineError> {
        let mut state = self.state();
        state.tclean_calls.push(params.clone());
        let psf_only = params.niter == 0 && !params.calcres;
        if psf_only {
            state.psf_only_calls += 1;
        }
        if state.fail_tclean
            || (psf_only && state.fail_psf)
            || (params.niter > 0 && state.fail_cleaning)
        {
            return Err(EngineError::TaskFailed {
                task: "tclean".to_string(),
                code: Some(1),
                stderr: "SEVERE: mock failure".to_string(),
            });
        }

        let shape = ImageShape {
            nx: params.imsize.first().copied().unwrap_or(100),
            ny: params.imsize.get(1).copied().unwrap_or(100),
            nstokes: params.stokes.len(),
            nchan: 1,
        };
        let mut suffixes = vec!["psf", "sumwt"];
        if !psf_only {
            suffixes.extend(["model", "residual", "pb", "weight"]);
            if params.restoration {
                suffixes.push("image");
            }
            if params.pbcor {
                suffixes.push("image.pbcor");
            }
        }
        for suffix in suffixes {
            match params.nterms {
                Some(n) if params.deconvolver == "mtmfs" => {
                    let num_terms = if suffix == "psf" { 2 * n - 1 } else { n };
                    for t in 0..num_terms {
                        state
                            .images
                            .insert(format!("{}.{suffix}.tt{t}", params.imagename), shape);
                    }
                }
                _ => {
                    state
                        .images
                        .insert(format!("{}.{suffix}", params.imagename), shape);
                }
            }
        }
        if !psf_only {
            state.images.insert(format!("{}.mask", params.imagename), shape);
            if params.restoration && params.deconvolver == "mtmfs" {
                state.images.insert(format!("{}.alpha", params.imagename), shape);
            }
        }

        let stopcode = if params.niter == 0 {
            0
        } else if state.stopcodes.len() > 1 {
            state.stopcodes.pop_front().unwrap_or(2)
        } else {
            state.stopcodes.front().copied().unwrap_or(2)
        };
        Ok(TcleanReturn {
            stopcode,
            stopreason: Some(crate::engine::stop_reason(stopcode).to_string()),
            iterdone: params.niter.min(100),
            nmajordone: 1,
            peak_residuals: vec![0.05, 0.01],
            model_flux: vec![0.0, 0.2],
        })
    }

    fn apparent_sensitivity(
        &self,
        _request: &SensitivityRequest,
    ) -> Result<ApparentSensitivity, EngineError> {
        let mut state = self.state();
        state.sensitivity_calls += 1;
        if state.fail_sensitivity {
            return Err(EngineError::Tool("no sensitivity".to_string()));
        }
        Ok(state.sensitivity)
    }
}

impl ImageTool for MockEngine {
    fn exists(&self, image: &str) -> bool {
        self.state().images.contains_key(image)
    }

    fn shape(&self, image: &str) -> Result<ImageShape, EngineError> {
        Self::require(&self.state(), image)
    }

    fn restoring_beam(&self, image: &str) -> Result<Vec<Beam>, EngineError> {
        let state = self.state();
        Self::require(&state, image)?;
        Ok(vec![state.beam])
    }

    fn statistics(
        &self,
        image: &str,
        _region: &StatsRegion,
    ) -> Result<Option<ImageStats>, EngineError> {
        let state = self.state();
        Self::require(&state, image)?;
        let base = strip_taylor_term(image);
        let best = state
            .stats
            .iter()
            .filter(|(suffix, _)| base.ends_with(&format!(".{suffix}")))
            .max_by_key(|(suffix, _)| suffix.len())
            .map(|(_, s)| *s);
        Ok(Some(best.unwrap_or_else(|| stats(0.01, -0.001, 1e-3))))
    }

    fn pb_edge_response(&self, pb: &str) -> Result<f64, EngineError> {
        let state = self.state();
        Self::require(&state, pb)?;
        state
            .pb_edge
            .ok_or_else(|| EngineError::Tool("no edge response".to_string()))
    }

    fn copy_image(&self, from: &str, to: &str) -> Result<(), EngineError> {
        let mut state = self.state();
        let shape = Self::require(&state, from)?;
        state.images.insert(to.to_string(), shape);
        state.copied.push((from.to_string(), to.to_string()));
        Ok(())
    }

    fn remove_image(&self, image: &str) -> Result<(), EngineError> {
        let mut state = self.state();
        state.images.remove(image);
        state.removed.push(image.to_string());
        Ok(())
    }

    fn make_pb_mask(&self, pb: &str, mask: &str, _pblimit: f64) -> Result<(), EngineError> {
        let mut state = self.state();
        let shape = Self::require(&state, pb)?;
        state.images.insert(mask.to_string(), shape);
        Ok(())
    }

    fn make_box_mask(
        &self,
        template: &str,
        mask: &str,
        _blc: [usize; 2],
        _trc: [usize; 2],
    ) -> Result<(), EngineError> {
        let mut state = self.state();
        let shape = Self::require(&state, template)?;
        state.images.insert(mask.to_string(), shape);
        Ok(())
    }

    fn make_circle_mask(
        &self,
        template: &str,
        mask: &str,
        _centre: [f64; 2],
        _radius: f64,
    ) -> Result<(), EngineError> {
        let mut state = self.state();
        let shape = Self::require(&state, template)?;
        state.images.insert(mask.to_string(), shape);
        Ok(())
    }

    fn regrid_mask(&self, mask: &str, template: &str, output: &str) -> Result<(), EngineError> {
        let mut state = self.state();
        Self::require(&state, mask)?;
        let shape = Self::require(&state, template)?;
        state.images.insert(output.to_string(), shape);
        state.regridded.push((mask.to_string(), output.to_string()));
        Ok(())
    }

    fn combine_masks(
        &self,
        masks: &[String],
        template: &str,
        output: &str,
    ) -> Result<(), EngineError> {
        let mut state = self.state();
        for m in masks {
            Self::require(&state, m)?;
        }
        let shape = Self::require(&state, template)?;
        state.images.insert(output.to_string(), shape);
        state.combined.push(masks.to_vec());
        Ok(())
    }

    fn moments(
        &self,
        image: &str,
        _moment: Moment,
        _chans: Option<&str>,
        output: &str,
    ) -> Result<(), EngineError> {
        let mut state = self.state();
        if state.fail_moments {
            return Err(EngineError::Tool("immoments failed".to_string()));
        }
        let shape = Self::require(&state, image)?;
        state.images.insert(output.to_string(), shape);
        state.moments.push(output.to_string());
        Ok(())
    }
}

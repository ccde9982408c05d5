// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The spectral axis of cubes.
//!
//! All measurement sets must cover the frequencies being imaged, so the
//! usable range of an spw is the intersection of its ranges in every dataset,
//! less one edge channel on each side. User-supplied `start` and `width` may be
//! channels, frequencies or velocities; everything is converted to frequency.

use log::debug;

use super::SpectralError;
use crate::{
    constants::VEL_C,
    metadata::ObservationMetadata,
    misc::format_sig_figs,
    unit_parsing::{parse_spectral, SpectralQuantity},
};

/// The frequencies that every dataset covers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct FreqWindow {
    /// \[Hz\]
    pub(crate) lo_hz: f64,
    /// \[Hz\]
    pub(crate) hi_hz: f64,
    /// The coarsest native channel width \[Hz\].
    pub(crate) chan_width_hz: f64,
}

/// The cube parameters handed to the deconvolution engine.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct SpectralSetup {
    pub(crate) nchan: i64,
    pub(crate) start: String,
    pub(crate) width: String,
}

pub(crate) fn intersect_freq_ranges(
    metadata: &ObservationMetadata,
    vislist: &[String],
    field: &str,
    spws: &[u32],
) -> Result<FreqWindow, SpectralError> {
    let mut window: Option<FreqWindow> = None;
    for &spw in spws {
        let mut range: Option<(f64, f64)> = None;
        let mut chan_width_hz: f64 = 0.0;
        for info in vislist.iter().filter_map(|vis| metadata.spw(vis, spw).ok()) {
            let cw = info.chan_width_hz.abs();
            let (lo, hi) = (info.min_freq_hz + cw, info.max_freq_hz - cw);
            range = Some(match range {
                None => (lo, hi),
                Some((a, b)) => (a.max(lo), b.min(hi)),
            });
            chan_width_hz = chan_width_hz.max(cw);
        }
        let (lo, hi) = match range {
            Some((lo, hi)) if hi > lo => (lo, hi),
            _ => {
                return Err(SpectralError::NoIntersection {
                    field: field.to_string(),
                    spw,
                })
            }
        };
        debug!("spw {spw}: the common frequency range is {lo}~{hi} Hz");
        window = Some(match window {
            None => FreqWindow {
                lo_hz: lo,
                hi_hz: hi,
                chan_width_hz,
            },
            Some(w) => FreqWindow {
                lo_hz: w.lo_hz.min(lo),
                hi_hz: w.hi_hz.max(hi),
                chan_width_hz: w.chan_width_hz.max(chan_width_hz),
            },
        });
    }
    window.ok_or_else(|| SpectralError::NoIntersection {
        field: field.to_string(),
        spw: spws.first().copied().unwrap_or_default(),
    })
}

fn parse(s: &str) -> Result<SpectralQuantity, SpectralError> {
    parse_spectral(s).map_err(|e| SpectralError::Parse {
        input: s.to_string(),
        err: e.to_string(),
    })
}

/// Work out `nchan`, `start` and `width` for a cube within `window`.
pub(crate) fn spectral_setup(
    window: &FreqWindow,
    start: Option<&str>,
    width: Option<&str>,
    nchan: Option<i64>,
    nbin: Option<u32>,
    restfreq_hz: Option<f64>,
) -> Result<SpectralSetup, SpectralError> {
    if width.is_some() && nbin.is_some() {
        return Err(SpectralError::WidthAndNbin);
    }
    let native = window.chan_width_hz;
    // Allow for rounding in the metadata.
    let tol = 1e-6 * native;

    let width_hz = match width.map(parse).transpose()? {
        Some(SpectralQuantity::Channel(n)) if n < 1 => return Err(SpectralError::BadChannelWidth(n)),
        Some(SpectralQuantity::Channel(n)) => n as f64 * native,
        Some(SpectralQuantity::Frequency(f)) => f.abs(),
        Some(SpectralQuantity::Velocity(v)) => {
            restfreq_hz.ok_or(SpectralError::NoRestFreq("width"))? * v.abs() / VEL_C
        }
        None => nbin.map(|n| n.max(1) as f64 * native).unwrap_or(native),
    };
    if width_hz < native - tol {
        return Err(SpectralError::WidthTooNarrow {
            width_hz,
            native_hz: native,
        });
    }

    let start_hz = match start.map(parse).transpose()? {
        Some(SpectralQuantity::Channel(c)) => window.lo_hz + c as f64 * native,
        Some(SpectralQuantity::Frequency(f)) => f,
        Some(SpectralQuantity::Velocity(v)) => {
            // Radio convention.
            restfreq_hz.ok_or(SpectralError::NoRestFreq("start"))? * (1.0 - v / VEL_C)
        }
        None => window.lo_hz,
    };
    if start_hz < window.lo_hz - tol || start_hz > window.hi_hz + tol {
        return Err(SpectralError::StartOutsideBand {
            start_hz,
            lo_hz: window.lo_hz,
            hi_hz: window.hi_hz,
        });
    }

    let nchan = match nchan.filter(|&n| n > 0) {
        Some(n) => {
            let end_hz = start_hz + n as f64 * width_hz;
            if end_hz > window.hi_hz + tol {
                return Err(SpectralError::EndOutsideBand {
                    end_hz,
                    lo_hz: window.lo_hz,
                    hi_hz: window.hi_hz,
                });
            }
            n
        }
        None => (((window.hi_hz - start_hz) + tol) / width_hz).floor().max(1.0) as i64,
    };

    Ok(SpectralSetup {
        nchan,
        start: format!("{}GHz", format_sig_figs(start_hz / 1e9, 10)),
        width: format!("{}MHz", format_sig_figs(width_hz / 1e6, 10)),
    })
}

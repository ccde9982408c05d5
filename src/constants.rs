// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

/*!
Useful constants.

All constants *must* be double precision. Image sizes are the exception; they
are pixel counts.
 */

/// The speed of light \[m/s\].
pub const VEL_C: f64 = 299_792_458.0;

/// Default primary-beam response below which image pixels are blanked.
pub const DEFAULT_PBLIMIT_IMAGE: f64 = 0.2;

/// Default primary-beam response below which no cleaning is done.
pub const DEFAULT_PBLIMIT_CLEANMASK: f64 = 0.3;

/// The number of pixels across the minor axis of the synthesized beam.
pub const DEFAULT_PIXPERBEAM: f64 = 5.0;

/// The factor used to convert lambda/D into a primary-beam FWHM.
pub const PB_FWHM_FACTOR: f64 = 1.13;

/// Used when no robust value has been specified.
pub const DEFAULT_ROBUST: f64 = 0.5;

/// The default threshold multiplier on the sensitivity for "rms" cleaning.
pub const DEFAULT_TLIMIT: f64 = 2.0;

/// The default iteration budget handed to the deconvolution engine before any
/// correction.
pub const DEFAULT_NITER: u64 = 5000;

/// Sentinel meaning "derive the dynamic-range correction automatically".
pub const DRCORRECT_SENTINEL: f64 = -999.0;

/// Calibrator (non-TARGET) images never get more than this many iterations.
pub const ALMA_CALIBRATOR_NITER_CAP: u64 = 3000;

/// VLA iteration budgets are clamped to this range.
pub const VLA_NITER_BOUNDS: (u64, u64) = (10_000, 1_000_000);

/// VLASS quick-look images are always this size.
pub const VLASS_QL_IMSIZE: [usize; 2] = [7290, 7290];

/// VLASS single-epoch continuum images are always this size.
pub const VLASS_SE_IMSIZE: [usize; 2] = [16384, 16384];

/// VLASS single-epoch cube images are always this size.
pub const VLASS_SE_CUBE_IMSIZE: [usize; 2] = [12500, 12500];

/// Fractional bandwidth above which continuum images use multi-term
/// deconvolution.
pub const MTMFS_FRACTIONAL_BW: f64 = 0.1;

/// When no better information is available, the clean mask is assumed to be a
/// circle of this fraction of the image half-width.
pub const DEFAULT_MASK_FRAC_RAD: f64 = 0.45;

/// Statistics of a Gaussian: the ratio of the standard deviation to the
/// median absolute deviation from the median.
pub const MAD_TO_SIGMA: f64 = 1.4826;

/// The largest image size produced for science-ready data products.
pub const SRDP_MAX_IMSIZE: usize = 8192;

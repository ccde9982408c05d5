// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Statistics of the images made by one clean iteration.

use log::{debug, trace};
use serde::{Deserialize, Serialize};

use crate::{
    constants::MAD_TO_SIGMA,
    engine::{ImageStats, ImageTool, StatsRegion},
};

/// The images of one iteration that are analysed. Anything that wasn't made
/// (e.g. no restored image for a dirty-only run) is `None`.
#[derive(Debug, Clone, Copy, Default)]
pub struct CleanImages<'a> {
    pub model: Option<&'a str>,
    pub residual: Option<&'a str>,
    /// The restored image without primary-beam correction.
    pub image: Option<&'a str>,
    pub pbcor: Option<&'a str>,
    /// The primary beam.
    pub pb: Option<&'a str>,
    /// The mask the engine cleaned with.
    pub cleanmask: Option<&'a str>,
}

/// Residual and image statistics of a clean iteration. A statistic is `None`
/// when it couldn't be evaluated, e.g. because its image doesn't exist or the
/// region has no pixels.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct IterationStats {
    /// The total flux in the model \[Jy\].
    pub model_sum: Option<f64>,
    pub residual_cleanmask_rms: Option<f64>,
    pub residual_non_cleanmask_rms: Option<f64>,
    pub residual_min: Option<f64>,
    pub residual_max: Option<f64>,
    pub nonpbcor_image_non_cleanmask_rms_min: Option<f64>,
    pub nonpbcor_image_non_cleanmask_rms_max: Option<f64>,
    pub nonpbcor_image_non_cleanmask_rms: Option<f64>,
    pub pbcor_image_min: Option<f64>,
    pub pbcor_image_max: Option<f64>,
    /// The MAD-derived rms of the residual where the primary beam exceeds the
    /// image pblimit.
    pub residual_robust_rms: Option<f64>,
}

fn stats(tool: &dyn ImageTool, image: Option<&str>, region: &StatsRegion) -> Option<ImageStats> {
    let image = image?;
    if !tool.exists(image) {
        trace!("{image} doesn't exist; no statistics");
        return None;
    }
    match tool.statistics(image, region) {
        Ok(Some(s)) => Some(s),
        Ok(None) => {
            debug!("No pixels of {image} are in {:?}", region.to_lel());
            None
        }
        Err(e) => {
            debug!("Couldn't get statistics of {image}: {e}");
            None
        }
    }
}

/// Work out the statistics of a clean iteration's images, restricted to where
/// the primary beam is above `pblimit_image`.
pub fn analyse_clean_result(
    tool: &dyn ImageTool,
    images: &CleanImages,
    pblimit_image: f64,
) -> IterationStats {
    let mask = images
        .cleanmask
        .filter(|m| !m.is_empty() && tool.exists(m));
    let within_pb = |region: StatsRegion| region.with_pb_above(images.pb, pblimit_image);
    let (inside, outside) = match mask {
        Some(m) => (Some(within_pb(StatsRegion::inside(m))), within_pb(StatsRegion::outside(m))),
        None => (None, within_pb(StatsRegion::all())),
    };

    let model = stats(tool, images.model, &StatsRegion::all());
    let residual_inside = inside.and_then(|r| stats(tool, images.residual, &r));
    let residual_outside = stats(tool, images.residual, &outside);
    let residual = stats(tool, images.residual, &within_pb(StatsRegion::all()));
    let image_outside = stats(tool, images.image, &outside);
    let pbcor = stats(tool, images.pbcor, &within_pb(StatsRegion::all()));

    let result = IterationStats {
        model_sum: model.map(|s| s.sum),
        residual_cleanmask_rms: residual_inside.map(|s| s.rms),
        residual_non_cleanmask_rms: residual_outside.map(|s| s.rms),
        residual_min: residual.map(|s| s.min),
        residual_max: residual.map(|s| s.max),
        nonpbcor_image_non_cleanmask_rms_min: image_outside.map(|s| s.plane_rms_min),
        nonpbcor_image_non_cleanmask_rms_max: image_outside.map(|s| s.plane_rms_max),
        nonpbcor_image_non_cleanmask_rms: image_outside.map(|s| s.rms),
        pbcor_image_min: pbcor.map(|s| s.min),
        pbcor_image_max: pbcor.map(|s| s.max),
        residual_robust_rms: residual_outside.map(|s| MAD_TO_SIGMA * s.medabsdevmed),
    };
    trace!("{result:?}");
    result
}

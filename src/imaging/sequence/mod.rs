// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Clean sequence managers.
//!
//! A sequence manager decides the mask, threshold and iteration budget of
//! each clean iteration. Iteration 0 (the dirty image) is made without one;
//! after its designed number of iterations, every manager reports the
//! terminal state (niter 0, zero threshold and sensitivity), however often it
//! is asked.

mod cleanbox;
mod error;

pub use cleanbox::{analyse_clean_result, CleanImages, IterationStats};
pub use error::SequenceError;

use itertools::Itertools;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use strum_macros::{Display, IntoStaticStr};

use super::{heuristics::ImagingMode, Flux, HmMasking};
use crate::{
    constants::DEFAULT_MASK_FRAC_RAD,
    engine::{ImageShape, ImageTool},
};

/// How the deconvolution engine is told to mask.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Display, IntoStaticStr, Serialize, Deserialize,
)]
pub enum UseMask {
    /// Use the mask image given.
    #[default]
    #[strum(serialize = "user")]
    #[serde(rename = "user")]
    User,

    /// The engine's auto-masking algorithm.
    #[strum(serialize = "auto-multithresh")]
    #[serde(rename = "auto-multithresh")]
    AutoMultithresh,

    /// Mask where the primary beam is above `pbmask`.
    #[strum(serialize = "pb")]
    #[serde(rename = "pb")]
    Pb,
}

/// What a sequence manager decided for an iteration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BoxResult {
    /// The mask image to clean with; empty for none.
    pub cleanmask: String,
    pub usemask: UseMask,
    /// The primary-beam level of a [`UseMask::Pb`] mask.
    pub pbmask: Option<f64>,
    pub threshold: Flux,
    pub sensitivity: Flux,
    pub niter: u64,
}

impl BoxResult {
    /// "Stop cleaning".
    fn terminal() -> BoxResult {
        BoxResult {
            cleanmask: String::new(),
            usemask: UseMask::User,
            pbmask: None,
            threshold: Flux::ZERO,
            sensitivity: Flux::ZERO,
            niter: 0,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.niter == 0 && self.threshold.is_zero() && self.sensitivity.is_zero()
    }
}

/// The images and limits an iteration's mask is made from.
#[derive(Debug, Clone, Copy, Default)]
pub struct MaskRequest<'a> {
    /// The name the iteration's clean mask should get.
    pub new_cleanmask: &'a str,
    pub pblimit_image: f64,
    pub pblimit_cleanmask: f64,

    /// The primary beam image of the previous iteration, if there is one.
    pub pb: Option<&'a str>,

    /// An image of the previous iteration on the grid the mask must have
    /// (normally the residual).
    pub template: Option<&'a str>,
}

/// The mutable state shared by all sequence managers.
#[derive(Debug, Clone, PartialEq)]
pub struct SequenceState {
    threshold: Flux,
    sensitivity: Flux,
    niter: u64,
    result: BoxResult,
}

impl SequenceState {
    pub fn new(threshold: Flux, sensitivity: Flux, niter: u64) -> SequenceState {
        SequenceState {
            threshold,
            sensitivity,
            niter,
            result: BoxResult::default(),
        }
    }

    fn apply(&mut self, cleanmask: String, usemask: UseMask, threshold: Flux) {
        self.result = BoxResult {
            cleanmask,
            usemask,
            pbmask: None,
            threshold,
            sensitivity: self.sensitivity,
            niter: self.niter,
        };
    }

    fn terminate(&mut self) {
        self.result = BoxResult::terminal();
    }
}

/// A per-target state machine handing out the mask, threshold and niter of
/// each clean iteration.
pub trait CleanSequence: Send + Sync {
    fn name(&self) -> &'static str;

    fn state(&self) -> &SequenceState;

    fn state_mut(&mut self) -> &mut SequenceState;

    /// Work out the mask, threshold and niter of `iteration`, making any mask
    /// images that are needed.
    fn iteration(
        &mut self,
        tool: &dyn ImageTool,
        request: &MaskRequest,
        iteration: u32,
    ) -> Result<&BoxResult, SequenceError>;

    /// Does the next iteration of this sequence already fall back to a mask
    /// around the image centre?
    fn falls_back_to_central_region(&self) -> bool {
        false
    }

    /// The statistics of an iteration's images.
    fn iteration_result(
        &self,
        tool: &dyn ImageTool,
        images: &CleanImages,
        pblimit_image: f64,
    ) -> IterationStats {
        analyse_clean_result(tool, images, pblimit_image)
    }

    /// The most recent decision.
    fn result(&self) -> &BoxResult {
        &self.state().result
    }

    fn threshold(&self) -> Flux {
        self.state().threshold
    }

    fn set_threshold(&mut self, threshold: Flux) {
        self.state_mut().threshold = threshold;
    }

    fn sensitivity(&self) -> Flux {
        self.state().sensitivity
    }

    fn set_sensitivity(&mut self, sensitivity: Flux) {
        self.state_mut().sensitivity = sensitivity;
    }

    fn niter(&self) -> u64 {
        self.state().niter
    }

    fn set_niter(&mut self, niter: u64) {
        self.state_mut().niter = niter;
    }
}

fn check_iteration(iteration: u32) -> Result<(), SequenceError> {
    if iteration == 0 {
        return Err(SequenceError::IterationZero);
    }
    Ok(())
}

/// The shape of the first of the images that exists.
fn template_shape(
    tool: &dyn ImageTool,
    candidates: &[Option<&str>],
) -> Option<(String, ImageShape)> {
    candidates
        .iter()
        .flatten()
        .filter(|image| tool.exists(image))
        .find_map(|image| tool.shape(image).ok().map(|s| (image.to_string(), s)))
}

/// Put a user mask on the grid of `template`. Masks with the same shape are
/// copied; anything else is regridded. A comma-separated list of masks is
/// combined into one.
fn prepare_user_mask(
    tool: &dyn ImageTool,
    mask: &str,
    template: Option<&str>,
    output: &str,
) -> Result<(), SequenceError> {
    let masks = mask
        .split(',')
        .map(|m| m.trim())
        .filter(|m| !m.is_empty())
        .map(|m| m.to_string())
        .collect::<Vec<_>>();
    if let Some(missing) = masks.iter().find(|m| !tool.exists(m)) {
        return Err(SequenceError::NoSuchMask(missing.clone()));
    }
    let template = template.filter(|t| tool.exists(t));

    match (masks.as_slice(), template) {
        ([], _) => Err(SequenceError::NoMask),
        ([single], None) => {
            debug!("Copying {single} to {output}");
            tool.copy_image(single, output)?;
            Ok(())
        }
        ([single], Some(template)) => {
            let mask_shape = tool.shape(single)?;
            let template_shape = tool.shape(template)?;
            if (mask_shape.nx, mask_shape.ny, mask_shape.nchan)
                == (template_shape.nx, template_shape.ny, template_shape.nchan)
            {
                debug!("Copying {single} to {output}");
                tool.copy_image(single, output)?;
            } else {
                info!(
                    "Mask {single} ({}x{}x{}) doesn't match the image grid ({}x{}x{}); regridding it",
                    mask_shape.nx,
                    mask_shape.ny,
                    mask_shape.nchan,
                    template_shape.nx,
                    template_shape.ny,
                    template_shape.nchan
                );
                tool.regrid_mask(single, template, output)?;
            }
            Ok(())
        }
        (_, Some(template)) => {
            debug!("Combining {} into {output}", masks.iter().join(", "));
            tool.combine_masks(&masks, template, output)?;
            Ok(())
        }
        (_, None) => Err(SequenceError::NoTemplate {
            mask: output.to_string(),
        }),
    }
}

/// Clean once to the threshold without a mask.
#[derive(Debug, Clone)]
pub struct NoMaskThresholdSequence {
    state: SequenceState,
}

impl NoMaskThresholdSequence {
    pub fn new(state: SequenceState) -> NoMaskThresholdSequence {
        NoMaskThresholdSequence { state }
    }
}

impl CleanSequence for NoMaskThresholdSequence {
    fn name(&self) -> &'static str {
        "NoMaskThresholdSequence"
    }

    fn state(&self) -> &SequenceState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut SequenceState {
        &mut self.state
    }

    fn iteration(
        &mut self,
        _tool: &dyn ImageTool,
        _request: &MaskRequest,
        iteration: u32,
    ) -> Result<&BoxResult, SequenceError> {
        check_iteration(iteration)?;
        if iteration == 1 {
            let threshold = self.state.threshold;
            self.state.apply(String::new(), UseMask::User, threshold);
        } else {
            self.state.terminate();
        }
        Ok(&self.state.result)
    }
}

/// Clean once inside the primary beam (or, without one, the central quarter
/// of the image).
#[derive(Debug, Clone)]
pub struct ImageCentreThresholdSequence {
    state: SequenceState,
}

impl ImageCentreThresholdSequence {
    pub fn new(state: SequenceState) -> ImageCentreThresholdSequence {
        ImageCentreThresholdSequence { state }
    }
}

impl CleanSequence for ImageCentreThresholdSequence {
    fn name(&self) -> &'static str {
        "ImageCentreThresholdSequence"
    }

    fn state(&self) -> &SequenceState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut SequenceState {
        &mut self.state
    }

    fn iteration(
        &mut self,
        tool: &dyn ImageTool,
        request: &MaskRequest,
        iteration: u32,
    ) -> Result<&BoxResult, SequenceError> {
        check_iteration(iteration)?;
        if iteration != 1 {
            self.state.terminate();
            return Ok(&self.state.result);
        }

        let mask = request.new_cleanmask;
        match request.pb.filter(|pb| tool.exists(pb)) {
            Some(pb) => {
                debug!("Making {mask} from {pb} > {}", request.pblimit_cleanmask);
                tool.make_pb_mask(pb, mask, request.pblimit_cleanmask)?;
            }
            None => {
                let (template, shape) = template_shape(tool, &[request.template])
                    .ok_or_else(|| SequenceError::NoTemplate {
                        mask: mask.to_string(),
                    })?;
                let blc = [shape.nx / 4, shape.ny / 4];
                let trc = [
                    (3 * shape.nx / 4).saturating_sub(1),
                    (3 * shape.ny / 4).saturating_sub(1),
                ];
                debug!("Making {mask} as the box {blc:?} to {trc:?} of {template}");
                tool.make_box_mask(&template, mask, blc, trc)?;
            }
        }
        let threshold = self.state.threshold;
        self.state.apply(mask.to_string(), UseMask::User, threshold);
        Ok(&self.state.result)
    }
}

/// Clean with the engine's auto-masking. If that needs a second go, the
/// second iteration uses a circular mask around the image centre with double
/// the threshold, as auto-masking thresholds can be too deep for a fixed
/// mask.
#[derive(Debug, Clone)]
pub struct AutoMaskThresholdSequence {
    state: SequenceState,
}

impl AutoMaskThresholdSequence {
    pub fn new(state: SequenceState) -> AutoMaskThresholdSequence {
        AutoMaskThresholdSequence { state }
    }
}

impl CleanSequence for AutoMaskThresholdSequence {
    fn name(&self) -> &'static str {
        "AutoMaskThresholdSequence"
    }

    fn falls_back_to_central_region(&self) -> bool {
        true
    }

    fn state(&self) -> &SequenceState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut SequenceState {
        &mut self.state
    }

    fn iteration(
        &mut self,
        tool: &dyn ImageTool,
        request: &MaskRequest,
        iteration: u32,
    ) -> Result<&BoxResult, SequenceError> {
        check_iteration(iteration)?;
        let threshold = self.state.threshold;
        match iteration {
            1 => self
                .state
                .apply(String::new(), UseMask::AutoMultithresh, threshold),
            2 => {
                let mask = request.new_cleanmask;
                let (template, shape) =
                    template_shape(tool, &[request.template, request.pb]).ok_or_else(|| {
                        SequenceError::NoTemplate {
                            mask: mask.to_string(),
                        }
                    })?;
                let centre = [shape.nx as f64 / 2.0, shape.ny as f64 / 2.0];
                let radius = DEFAULT_MASK_FRAC_RAD * shape.nx.min(shape.ny) as f64 / 2.0;
                debug!("Making {mask} as a circle of radius {radius} pixels on {template}");
                tool.make_circle_mask(&template, mask, centre, radius)?;
                self.state.apply(mask.to_string(), UseMask::User, threshold * 2.0);
            }
            _ => self.state.terminate(),
        }
        Ok(&self.state.result)
    }
}

/// Auto-masking for the VLA: up to two auto-masked iterations.
#[derive(Debug, Clone)]
pub struct VlaAutoMaskThresholdSequence {
    state: SequenceState,
}

impl VlaAutoMaskThresholdSequence {
    pub fn new(state: SequenceState) -> VlaAutoMaskThresholdSequence {
        VlaAutoMaskThresholdSequence { state }
    }
}

impl CleanSequence for VlaAutoMaskThresholdSequence {
    fn name(&self) -> &'static str {
        "VlaAutoMaskThresholdSequence"
    }

    fn state(&self) -> &SequenceState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut SequenceState {
        &mut self.state
    }

    fn iteration(
        &mut self,
        _tool: &dyn ImageTool,
        _request: &MaskRequest,
        iteration: u32,
    ) -> Result<&BoxResult, SequenceError> {
        check_iteration(iteration)?;
        if iteration <= 2 {
            let threshold = self.state.threshold;
            self.state
                .apply(String::new(), UseMask::AutoMultithresh, threshold);
        } else {
            self.state.terminate();
        }
        Ok(&self.state.result)
    }
}

/// Clean once with a user-supplied mask.
#[derive(Debug, Clone)]
pub struct ManualMaskThresholdSequence {
    state: SequenceState,
    mask: String,
}

impl ManualMaskThresholdSequence {
    pub fn new(state: SequenceState, mask: String) -> ManualMaskThresholdSequence {
        ManualMaskThresholdSequence { state, mask }
    }
}

impl CleanSequence for ManualMaskThresholdSequence {
    fn name(&self) -> &'static str {
        "ManualMaskThresholdSequence"
    }

    fn state(&self) -> &SequenceState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut SequenceState {
        &mut self.state
    }

    fn iteration(
        &mut self,
        tool: &dyn ImageTool,
        request: &MaskRequest,
        iteration: u32,
    ) -> Result<&BoxResult, SequenceError> {
        check_iteration(iteration)?;
        if iteration == 1 {
            prepare_user_mask(tool, &self.mask, request.template, request.new_cleanmask)?;
            let threshold = self.state.threshold;
            self.state
                .apply(request.new_cleanmask.to_string(), UseMask::User, threshold);
        } else {
            self.state.terminate();
        }
        Ok(&self.state.result)
    }
}

/// VLASS single-epoch imaging works through a fixed list of masks, one per
/// iteration. The special mask "pb" cleans within the primary beam only.
#[derive(Debug, Clone)]
pub struct VlassMaskThresholdSequence {
    state: SequenceState,
    masks: Vec<String>,
}

impl VlassMaskThresholdSequence {
    pub fn new(state: SequenceState, masks: Vec<String>) -> VlassMaskThresholdSequence {
        VlassMaskThresholdSequence { state, masks }
    }

    pub fn num_masks(&self) -> usize {
        self.masks.len()
    }
}

impl CleanSequence for VlassMaskThresholdSequence {
    fn name(&self) -> &'static str {
        "VlassMaskThresholdSequence"
    }

    fn state(&self) -> &SequenceState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut SequenceState {
        &mut self.state
    }

    fn iteration(
        &mut self,
        tool: &dyn ImageTool,
        request: &MaskRequest,
        iteration: u32,
    ) -> Result<&BoxResult, SequenceError> {
        check_iteration(iteration)?;
        let threshold = self.state.threshold;
        match self.masks.get(iteration as usize - 1) {
            Some(mask) if mask == "pb" => {
                debug!("Iteration {iteration} cleans within pb > {}", request.pblimit_cleanmask);
                self.state.apply(String::new(), UseMask::Pb, threshold);
                self.state.result.pbmask = Some(request.pblimit_cleanmask);
            }
            Some(mask) => {
                prepare_user_mask(tool, mask, request.template, request.new_cleanmask)?;
                self.state
                    .apply(request.new_cleanmask.to_string(), UseMask::User, threshold);
            }
            None => self.state.terminate(),
        }
        Ok(&self.state.result)
    }
}

/// What a sequence manager is made with.
#[derive(Debug, Clone, Default)]
pub struct SequenceParams {
    pub threshold: Flux,
    pub sensitivity: Flux,
    pub niter: u64,

    /// The user mask for manual masking.
    pub mask: Option<String>,

    /// The masks of a VLASS sequence.
    pub mask_list: Vec<String>,
}

/// Pick the sequence manager for a masking mode and imaging mode.
pub fn new_sequence(
    hm_masking: HmMasking,
    imaging_mode: ImagingMode,
    params: SequenceParams,
) -> Result<Box<dyn CleanSequence>, SequenceError> {
    let state = SequenceState::new(params.threshold, params.sensitivity, params.niter);
    let sequence: Box<dyn CleanSequence> = match hm_masking {
        HmMasking::Centralregion => Box::new(ImageCentreThresholdSequence::new(state)),
        HmMasking::Auto if imaging_mode.is_vla() => Box::new(VlaAutoMaskThresholdSequence::new(state)),
        HmMasking::Auto => Box::new(AutoMaskThresholdSequence::new(state)),
        HmMasking::Manual if imaging_mode.is_vlass() => {
            if params.mask_list.is_empty() {
                return Err(SequenceError::NoMask);
            }
            Box::new(VlassMaskThresholdSequence::new(state, params.mask_list))
        }
        HmMasking::Manual => {
            let mask = params
                .mask
                .filter(|m| !m.is_empty())
                .ok_or(SequenceError::NoMask)?;
            Box::new(ManualMaskThresholdSequence::new(state, mask))
        }
        HmMasking::None => Box::new(NoMaskThresholdSequence::new(state)),
    };
    debug!("Using the {} for {hm_masking} masking", sequence.name());
    Ok(sequence)
}

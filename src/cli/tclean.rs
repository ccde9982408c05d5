// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Arguments for imaging a single target (`tclean`) and for only working out
//! its imaging parameters (`heuristics`).

use std::{
    fs::File,
    io::{BufWriter, Write},
    path::{Path, PathBuf},
    str::FromStr,
};

use clap::Parser;
use itertools::Itertools;
use log::{debug, info};
use serde::{Deserialize, Serialize};

use super::common::{
    display_warnings, read_metadata, EngineArgs, InfoPrinter, Warn, ARG_FILE_HELP,
};
use crate::{
    context::ImagingContext,
    imaging::{
        cache::ImagingCaches,
        heuristics::AutoboxParams,
        result::{ResolvedImagingParams, TcleanResult},
        tclean::{Tclean, TcleanInputs},
        Deconvolver, Gridder, Intent, Specmode, Weighting,
    },
    ImagingError,
};

/// The description of a target. In an arguments file, these live under
/// `[target]`.
#[derive(Parser, Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub(super) struct TargetArgs {
    /// The name of the field to image.
    #[clap(short, long, help_heading = "TARGET")]
    pub(super) field: Option<String>,

    /// The spectral windows to image, e.g. "17,19,21".
    #[clap(short, long, help_heading = "TARGET")]
    pub(super) spw: Option<String>,

    /// The observing intent of the field. Default: TARGET
    #[clap(long, help_heading = "TARGET")]
    pub(super) intent: Option<String>,

    /// The measurement sets to image. Default: every dataset with the field
    /// and spws.
    #[clap(long, multiple_values(true), help_heading = "TARGET")]
    pub(super) vis: Option<Vec<String>>,

    /// The heuristics to use, e.g. ALMA, VLA, VLASS-QL, VLASS-SE-CONT.
    /// Default: from the telescope
    #[clap(long, help_heading = "TARGET")]
    pub(super) imaging_mode: Option<String>,

    /// mfs, cont, cube or repBW.
    #[clap(long, help_heading = "TARGET")]
    pub(super) specmode: Option<String>,

    #[clap(long, help_heading = "IMAGE")]
    pub(super) imagename: Option<String>,

    /// The start of generated image names.
    #[clap(long, help_heading = "IMAGE")]
    pub(super) prefix: Option<String>,

    /// The pipeline stage number used in generated image names.
    #[clap(long, help_heading = "IMAGE")]
    pub(super) stage: Option<u32>,

    /// e.g. "ICRS 12:22:54.900 +15.49.20.57"
    #[clap(long, help_heading = "IMAGE")]
    pub(super) phasecenter: Option<String>,

    /// The pixel size, e.g. "0.5arcsec". Two values give x and y.
    #[clap(long, multiple_values(true), help_heading = "IMAGE")]
    pub(super) cell: Option<Vec<String>>,

    /// The number of pixels. Two values give x and y.
    #[clap(long, multiple_values(true), help_heading = "IMAGE")]
    pub(super) imsize: Option<Vec<usize>>,

    #[clap(long, help_heading = "IMAGE")]
    pub(super) stokes: Option<String>,

    /// standard, mosaic, wproject, awproject or awp2.
    #[clap(long, help_heading = "IMAGE")]
    pub(super) gridder: Option<String>,

    /// hogbom, clark, multiscale or mtmfs.
    #[clap(long, help_heading = "IMAGE")]
    pub(super) deconvolver: Option<String>,

    #[clap(long, help_heading = "IMAGE")]
    pub(super) nterms: Option<u32>,

    /// natural, uniform, briggs or briggsbwtaper.
    #[clap(long, help_heading = "WEIGHTING")]
    pub(super) weighting: Option<String>,

    #[clap(long, allow_hyphen_values(true), help_heading = "WEIGHTING")]
    pub(super) robust: Option<f64>,

    #[clap(long, multiple_values(true), help_heading = "WEIGHTING")]
    pub(super) uvtaper: Option<Vec<String>>,

    #[clap(long, allow_hyphen_values(true), help_heading = "CUBES")]
    pub(super) nchan: Option<i64>,

    /// A channel, frequency or velocity, e.g. "10", "230.1GHz", "-50km/s".
    #[clap(long, allow_hyphen_values(true), help_heading = "CUBES")]
    pub(super) start: Option<String>,

    /// A number of channels, a frequency or a velocity.
    #[clap(long, help_heading = "CUBES")]
    pub(super) width: Option<String>,

    /// Bin this many native channels together. Can't be used with --width.
    #[clap(long, help_heading = "CUBES")]
    pub(super) nbin: Option<u32>,

    #[clap(long, help_heading = "CUBES")]
    pub(super) restfreq: Option<String>,

    /// auto, manual, centralregion or none.
    #[clap(long, help_heading = "CLEANING")]
    pub(super) hm_masking: Option<String>,

    /// manual or rms.
    #[clap(long, help_heading = "CLEANING")]
    pub(super) hm_cleaning: Option<String>,

    /// e.g. "0.5mJy". Needed when hm_cleaning is manual.
    #[clap(long, help_heading = "CLEANING")]
    pub(super) threshold: Option<String>,

    /// A known sensitivity, e.g. "0.1mJy"; this skips the sensitivity
    /// calculation.
    #[clap(long, help_heading = "CLEANING")]
    pub(super) sensitivity: Option<String>,

    /// The threshold is this many times the sensitivity.
    #[clap(long, help_heading = "CLEANING")]
    pub(super) tlimit: Option<f64>,

    /// A dynamic-range correction factor. -999 lets the heuristics decide.
    #[clap(long, allow_hyphen_values(true), help_heading = "CLEANING")]
    pub(super) drcorrect: Option<f64>,

    #[clap(long, help_heading = "CLEANING")]
    pub(super) niter: Option<u64>,

    #[clap(long, help_heading = "CLEANING")]
    pub(super) nsigma: Option<f64>,

    /// The mask image(s) of manual masking. Several are combined.
    #[clap(long, help_heading = "CLEANING")]
    pub(super) mask: Option<String>,

    /// The primary-beam response below which image pixels are blanked.
    #[clap(long, help_heading = "CLEANING")]
    pub(super) pblimit: Option<f64>,

    /// Line-free frequency ranges of each field and spw ("cont.dat").
    #[clap(long, help_heading = "CLEANING")]
    pub(super) cont_file: Option<PathBuf>,

    /// Auto-masking parameters overriding the heuristics. Only available in
    /// arguments files.
    #[clap(skip)]
    #[serde(default)]
    pub(super) autobox: AutoboxParams,

    /// Let the toolkit parallelise major cycles.
    #[clap(long, help_heading = "CLEANING")]
    #[serde(default)]
    pub(super) parallel: bool,
}

fn parse_enum<T: FromStr>(what: &str, s: Option<String>) -> Result<Option<T>, ImagingError> {
    s.map(|s| {
        T::from_str(s.trim())
            .map_err(|_| ImagingError::Tclean(format!("'{s}' is not a valid {what}")))
    })
    .transpose()
}

impl TargetArgs {
    pub(super) fn merge(self, other: Self) -> Self {
        Self {
            field: self.field.or(other.field),
            spw: self.spw.or(other.spw),
            intent: self.intent.or(other.intent),
            vis: self.vis.or(other.vis),
            imaging_mode: self.imaging_mode.or(other.imaging_mode),
            specmode: self.specmode.or(other.specmode),
            imagename: self.imagename.or(other.imagename),
            prefix: self.prefix.or(other.prefix),
            stage: self.stage.or(other.stage),
            phasecenter: self.phasecenter.or(other.phasecenter),
            cell: self.cell.or(other.cell),
            imsize: self.imsize.or(other.imsize),
            stokes: self.stokes.or(other.stokes),
            gridder: self.gridder.or(other.gridder),
            deconvolver: self.deconvolver.or(other.deconvolver),
            nterms: self.nterms.or(other.nterms),
            weighting: self.weighting.or(other.weighting),
            robust: self.robust.or(other.robust),
            uvtaper: self.uvtaper.or(other.uvtaper),
            nchan: self.nchan.or(other.nchan),
            start: self.start.or(other.start),
            width: self.width.or(other.width),
            nbin: self.nbin.or(other.nbin),
            restfreq: self.restfreq.or(other.restfreq),
            hm_masking: self.hm_masking.or(other.hm_masking),
            hm_cleaning: self.hm_cleaning.or(other.hm_cleaning),
            threshold: self.threshold.or(other.threshold),
            sensitivity: self.sensitivity.or(other.sensitivity),
            tlimit: self.tlimit.or(other.tlimit),
            drcorrect: self.drcorrect.or(other.drcorrect),
            niter: self.niter.or(other.niter),
            nsigma: self.nsigma.or(other.nsigma),
            mask: self.mask.or(other.mask),
            pblimit: self.pblimit.or(other.pblimit),
            cont_file: self.cont_file.or(other.cont_file),
            autobox: other.autobox.with_overrides(&self.autobox),
            parallel: self.parallel || other.parallel,
        }
    }

    /// Turn the strings into imaging inputs. Only the syntax is checked here;
    /// whether the values make sense is up to the heuristics.
    pub(super) fn parse(self) -> Result<TcleanInputs, ImagingError> {
        let field = self
            .field
            .ok_or_else(|| ImagingError::Tclean("No field was specified".to_string()))?;
        let spw = self
            .spw
            .ok_or_else(|| ImagingError::Tclean("No spw was specified".to_string()))?;
        let imsize = match self.imsize.as_deref() {
            None => None,
            Some([n]) => Some([*n, *n]),
            Some([x, y]) => Some([*x, *y]),
            Some(v) => {
                return Err(ImagingError::Tclean(format!(
                    "imsize needs one or two values; got {}",
                    v.iter().join(",")
                )))
            }
        };

        Ok(TcleanInputs {
            field,
            intent: parse_enum::<Intent>("intent", self.intent)?,
            spw,
            vis: self.vis.unwrap_or_default(),
            imaging_mode: self.imaging_mode,
            specmode: parse_enum::<Specmode>("specmode", self.specmode)?,
            imagename: self.imagename,
            prefix: self.prefix,
            stage: self.stage,
            phasecenter: self.phasecenter,
            cell: self.cell,
            imsize,
            stokes: self.stokes,
            gridder: parse_enum::<Gridder>("gridder", self.gridder)?,
            deconvolver: parse_enum::<Deconvolver>("deconvolver", self.deconvolver)?,
            nterms: self.nterms,
            weighting: parse_enum::<Weighting>("weighting", self.weighting)?,
            robust: self.robust,
            uvtaper: self.uvtaper,
            nchan: self.nchan,
            start: self.start,
            width: self.width,
            nbin: self.nbin,
            restfreq: self.restfreq,
            hm_masking: self.hm_masking,
            hm_cleaning: self.hm_cleaning,
            threshold: self.threshold,
            sensitivity: self.sensitivity,
            tlimit: self.tlimit,
            drcorrect: self.drcorrect,
            niter: self.niter,
            nsigma: self.nsigma,
            mask: self.mask,
            pblimit: self.pblimit,
            autobox: self.autobox,
            cont_file: self.cont_file,
            parallel: self.parallel,
            ..Default::default()
        })
    }
}

#[derive(Parser, Debug, Clone, Default, Serialize, Deserialize)]
pub(super) struct TcleanArgs {
    #[clap(name = "ARGUMENTS_FILE", help = ARG_FILE_HELP.as_str(), parse(from_os_str))]
    pub(super) args_file: Option<PathBuf>,

    /// The observation metadata (TOML, JSON or YAML).
    #[clap(short, long, parse(from_os_str))]
    pub(super) metadata: Option<PathBuf>,

    /// An imaging context (JSON). Its beam and sensitivity caches are used and
    /// updated, and the result is recorded in it.
    #[clap(long, parse(from_os_str))]
    pub(super) context: Option<PathBuf>,

    /// Write the full result (or the resolved parameters for `heuristics`) to
    /// this JSON file.
    #[clap(short, long, parse(from_os_str))]
    pub(super) output: Option<PathBuf>,

    #[clap(flatten)]
    #[serde(rename = "target")]
    #[serde(default)]
    pub(super) target_args: TargetArgs,

    #[clap(flatten)]
    #[serde(rename = "engine")]
    #[serde(default)]
    pub(super) engine_args: EngineArgs,
}

impl TcleanArgs {
    /// Both command-line and file arguments overlap in terms of what is
    /// available; this function consolidates everything that was specified into
    /// a single struct. Where applicable, it will prefer CLI parameters over
    /// those in the file.
    ///
    /// This function should only ever merge arguments, and not try to make
    /// sense of them.
    pub(super) fn merge(self) -> Result<TcleanArgs, ImagingError> {
        debug!("Merging command-line arguments with the argument file");

        let cli_args = self;

        if let Some(arg_file) = cli_args.args_file {
            // Read in the file arguments. Ensure all of the file args are
            // accounted for by pattern matching.
            let TcleanArgs {
                args_file: _,
                metadata,
                context,
                output,
                target_args,
                engine_args,
            } = unpack_arg_file!(arg_file);

            // Merge all the arguments, preferring the CLI args when available.
            Ok(TcleanArgs {
                args_file: None,
                metadata: cli_args.metadata.or(metadata),
                context: cli_args.context.or(context),
                output: cli_args.output.or(output),
                target_args: cli_args.target_args.merge(target_args),
                engine_args: cli_args.engine_args.merge(engine_args),
            })
        } else {
            Ok(cli_args)
        }
    }

    fn describe(&self, inputs: &TcleanInputs) -> InfoPrinter {
        let mut printer = InfoPrinter::new(
            format!("Imaging field {} spw {}", inputs.field, inputs.spw).into(),
        );
        if let Some(m) = &self.metadata {
            printer.push_line(format!("Metadata: {}", m.display()).into());
        }
        let mut block = vec![];
        if let Some(i) = inputs.intent {
            block.push(format!("Intent: {i}").into());
        }
        if let Some(m) = &inputs.imaging_mode {
            block.push(format!("Imaging mode: {m}").into());
        }
        if let Some(s) = inputs.specmode {
            block.push(format!("Specmode: {s}").into());
        }
        if !inputs.vis.is_empty() {
            block.push(format!("Measurement sets: {}", inputs.vis.join(", ")).into());
        }
        printer.push_block(block);
        self.engine_args.describe(&mut printer);
        if let Some(c) = &self.context {
            printer.push_line(format!("Context: {}", c.display()).into());
        }
        printer
    }

    fn read_context(&self) -> Result<Option<ImagingContext>, ImagingError> {
        Ok(match &self.context {
            Some(c) if c.exists() => Some(ImagingContext::read(c)?),
            Some(_) => Some(ImagingContext::default()),
            None => None,
        })
    }

    pub(super) fn run(self, dry_run: bool) -> Result<(), ImagingError> {
        debug!("{:#?}", self);

        let inputs = self.target_args.clone().parse()?;
        self.describe(&inputs).display();
        display_warnings();
        if dry_run {
            info!("Dry run -- exiting now.");
            return Ok(());
        }

        let metadata = read_metadata(self.metadata.as_ref())?;
        let engine = self.engine_args.clone().parse();
        let mut context = self.read_context()?;
        let mut caches = context.as_ref().map(|c| c.caches.clone()).unwrap_or_default();

        let tclean = Tclean::new(inputs, metadata, &engine, &engine);
        let result = tclean.run(&mut caches)?;
        print_result(&result);

        if let Some(output) = &self.output {
            write_json(output, &result)?;
        }
        if let (Some(context), Some(path)) = (context.as_mut(), self.context.as_ref()) {
            context.caches = caches;
            context.record_results(std::slice::from_ref(&result));
            context.write(path)?;
        }

        match result.error {
            Some(e) => Err(ImagingError::Tclean(e)),
            None => Ok(()),
        }
    }

    /// Work out and print the imaging parameters of the target.
    pub(super) fn resolve(self, dry_run: bool) -> Result<(), ImagingError> {
        debug!("{:#?}", self);

        let inputs = self.target_args.clone().parse()?;
        self.describe(&inputs).display();
        if dry_run {
            info!("Dry run -- exiting now.");
            return Ok(());
        }

        let metadata = read_metadata(self.metadata.as_ref())?;
        let engine = self.engine_args.clone().parse();
        let mut context = self.read_context()?;
        let mut caches: ImagingCaches = context.as_ref().map(|c| c.caches.clone()).unwrap_or_default();

        let tclean = Tclean::new(inputs, metadata, &engine, &engine);
        let params = tclean.resolve(&mut caches)?;
        print_params(&params);
        display_warnings();

        if let Some(output) = &self.output {
            write_json(output, &params)?;
        }
        if let (Some(context), Some(path)) = (context.as_mut(), self.context.as_ref()) {
            context.caches = caches;
            context.write(path)?;
        }
        Ok(())
    }
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), ImagingError> {
    let mut f = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(&mut f, value)
        .map_err(|e| ImagingError::Generic(format!("Couldn't write {}: {e}", path.display())))?;
    f.flush()?;
    info!("Wrote {}", path.display());
    Ok(())
}

pub(super) fn print_params(p: &ResolvedImagingParams) {
    let mut printer = InfoPrinter::new("Imaging parameters".into());
    printer.push_block(vec![
        format!("Measurement sets: {}", p.vis.join(", ")).into(),
        format!("Fields: {}", p.field.join(" | ")).into(),
        format!("Spws: {}", p.spw.join(" | ")).into(),
    ]);
    printer.push_block(vec![
        format!("Specmode: {}, gridder: {}, deconvolver: {}", p.specmode, p.gridder, p.deconvolver).into(),
        format!("Image size: {}x{}, cell: {}", p.imsize[0], p.imsize[1], p.cell.join(",")).into(),
        format!("Phase centre: {}", p.phasecenter).into(),
        format!("Stokes: {}", p.stokes).into(),
    ]);
    if let Some(n) = p.nterms {
        printer.push_line(format!("nterms: {n}").into());
    }
    let mut weighting = vec![format!("Weighting: {}, robust {}", p.weighting, p.robust).into()];
    if !p.uvtaper.is_empty() {
        weighting.push(format!("uvtaper: {}", p.uvtaper.join(",")).into());
    }
    printer.push_block(weighting);
    if p.specmode.is_cube() {
        printer.push_line(format!("Channels: {} from {} by {}", p.nchan, p.start, p.width).into());
    }
    printer.push_block(vec![
        format!("Masking: {}, cleaning: {}", p.hm_masking, p.hm_cleaning).into(),
        format!(
            "pblimits: image {}, clean mask {}",
            p.pblimit_image, p.pblimit_cleanmask
        )
        .into(),
    ]);
    printer.display();
}

pub(super) fn print_result(r: &TcleanResult) {
    if let Some(e) = &r.error {
        format!("{} spw {} failed: {e}", r.field, r.spw).warn();
        return;
    }
    let mut printer = InfoPrinter::new(format!("Imaged {}", r.imagename).into());
    let mut block = vec![];
    if let Some(s) = r.sensitivity {
        block.push(format!("Sensitivity: {s}").into());
    }
    if let Some(t) = r.threshold {
        block.push(format!("Threshold: {t}").into());
    }
    if let Some(n) = r.niter {
        block.push(format!("niter: {n}").into());
    }
    printer.push_block(block);
    for it in r.iterations() {
        printer.push_line(
            format!(
                "Iteration {}: {} ({} iterations, stop code {})",
                it.iteration, it.image, it.iterdone, it.stopcode
            )
            .into(),
        );
    }
    if let (Some(min), Some(max)) = (r.image_min, r.image_max) {
        printer.push_line(format!("Image range: {min:.3e} to {max:.3e} Jy/beam").into());
    }
    printer.display();
}

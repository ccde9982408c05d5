// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Arguments for imaging the clean list of an imaging context.

use std::path::PathBuf;

use clap::Parser;
use log::{debug, info};
use serde::{Deserialize, Serialize};

use super::{
    common::{display_warnings, read_metadata, EngineArgs, InfoPrinter, Warn, ARG_FILE_HELP},
    tclean::print_result,
};
use crate::{
    context::ImagingContext,
    imaging::{
        heuristics::AutoboxParams,
        makeimages::{MakeImages, MakeImagesOptions},
    },
    ImagingError,
};

#[derive(Parser, Debug, Clone, Default, Serialize, Deserialize)]
pub(super) struct MakeImagesArgs {
    #[clap(name = "ARGUMENTS_FILE", help = ARG_FILE_HELP.as_str(), parse(from_os_str))]
    pub(super) args_file: Option<PathBuf>,

    /// The imaging context (JSON) holding the clean list. Results and caches
    /// are written back to it.
    #[clap(short, long, parse(from_os_str))]
    pub(super) context: Option<PathBuf>,

    /// The observation metadata (TOML, JSON or YAML). Default: the file named
    /// in the context.
    #[clap(short, long, parse(from_os_str))]
    pub(super) metadata: Option<PathBuf>,

    /// auto, manual, centralregion or none. Applies to targets that don't say.
    #[clap(long, help_heading = "CLEANING")]
    pub(super) hm_masking: Option<String>,

    /// manual or rms. Applies to targets that don't say.
    #[clap(long, help_heading = "CLEANING")]
    pub(super) hm_cleaning: Option<String>,

    #[clap(long, help_heading = "CLEANING")]
    pub(super) tlimit: Option<f64>,

    #[clap(long, allow_hyphen_values(true), help_heading = "CLEANING")]
    pub(super) drcorrect: Option<f64>,

    #[clap(long, help_heading = "CLEANING")]
    pub(super) nsigma: Option<f64>,

    #[clap(long, help_heading = "CLEANING")]
    pub(super) pblimit: Option<f64>,

    /// Line-free frequency ranges of each field and spw ("cont.dat").
    #[clap(long, help_heading = "CLEANING")]
    pub(super) cont_file: Option<PathBuf>,

    /// Only available in arguments files.
    #[clap(skip)]
    #[serde(default)]
    pub(super) autobox: AutoboxParams,

    /// The start of generated image names.
    #[clap(long, help_heading = "IMAGES")]
    pub(super) prefix: Option<String>,

    /// The pipeline stage number used in generated image names.
    #[clap(long, help_heading = "IMAGES")]
    pub(super) stage: Option<u32>,

    /// Image targets at the same time. Each target still waits for the
    /// toolkit.
    #[clap(long)]
    #[serde(default)]
    pub(super) parallel_targets: bool,

    #[clap(flatten)]
    #[serde(rename = "engine")]
    #[serde(default)]
    pub(super) engine_args: EngineArgs,
}

impl MakeImagesArgs {
    /// Prefer CLI parameters over those in the arguments file. Nothing is
    /// checked here.
    pub(super) fn merge(self) -> Result<MakeImagesArgs, ImagingError> {
        debug!("Merging command-line arguments with the argument file");

        let cli_args = self;

        if let Some(arg_file) = cli_args.args_file {
            let MakeImagesArgs {
                args_file: _,
                context,
                metadata,
                hm_masking,
                hm_cleaning,
                tlimit,
                drcorrect,
                nsigma,
                pblimit,
                cont_file,
                autobox,
                prefix,
                stage,
                parallel_targets,
                engine_args,
            } = unpack_arg_file!(arg_file);

            Ok(MakeImagesArgs {
                args_file: None,
                context: cli_args.context.or(context),
                metadata: cli_args.metadata.or(metadata),
                hm_masking: cli_args.hm_masking.or(hm_masking),
                hm_cleaning: cli_args.hm_cleaning.or(hm_cleaning),
                tlimit: cli_args.tlimit.or(tlimit),
                drcorrect: cli_args.drcorrect.or(drcorrect),
                nsigma: cli_args.nsigma.or(nsigma),
                pblimit: cli_args.pblimit.or(pblimit),
                cont_file: cli_args.cont_file.or(cont_file),
                autobox: autobox.with_overrides(&cli_args.autobox),
                prefix: cli_args.prefix.or(prefix),
                stage: cli_args.stage.or(stage),
                parallel_targets: cli_args.parallel_targets || parallel_targets,
                engine_args: cli_args.engine_args.merge(engine_args),
            })
        } else {
            Ok(cli_args)
        }
    }

    fn options(&self) -> MakeImagesOptions {
        MakeImagesOptions {
            hm_masking: self.hm_masking.clone(),
            hm_cleaning: self.hm_cleaning.clone(),
            tlimit: self.tlimit,
            drcorrect: self.drcorrect,
            nsigma: self.nsigma,
            pblimit: self.pblimit,
            autobox: self.autobox,
            cont_file: self.cont_file.clone(),
            prefix: self.prefix.clone(),
            stage: self.stage,
            parallel_targets: self.parallel_targets,
        }
    }

    pub(super) fn run(self, dry_run: bool) -> Result<(), ImagingError> {
        debug!("{:#?}", self);

        let context_file = self
            .context
            .clone()
            .ok_or_else(|| ImagingError::Generic("No imaging context was specified".to_string()))?;
        let mut context = ImagingContext::read(&context_file)?;
        let metadata_file = self.metadata.clone().or_else(|| context.metadata_file.clone());

        let mut printer = InfoPrinter::new(
            format!("Imaging the clean list of {}", context_file.display()).into(),
        );
        if let Some(m) = &metadata_file {
            printer.push_line(format!("Metadata: {}", m.display()).into());
        }
        printer.push_block(
            context
                .clean_list
                .iter()
                .map(|t| format!("{} ({}) spw {} {}", t.field, t.intent, t.spw, t.specmode).into())
                .collect(),
        );
        self.engine_args.describe(&mut printer);
        if self.parallel_targets {
            printer.push_line("Targets are imaged in parallel".into());
        }
        printer.display();

        if context.clean_list.is_empty() {
            "The clean list is empty; there's nothing to image".warn();
        }
        display_warnings();
        if dry_run {
            info!("Dry run -- exiting now.");
            return Ok(());
        }
        if context.clean_list.is_empty() {
            return Ok(());
        }

        let metadata = read_metadata(metadata_file.as_ref())?;
        let engine = self.engine_args.clone().parse();
        let makeimages = MakeImages::new(self.options(), metadata, &engine, &engine);
        let targets = context.clean_list.clone();
        let results = makeimages.run(&targets, &mut context.caches);
        for r in &results {
            print_result(r);
        }
        display_warnings();

        context.record_results(&results);
        context.write(&context_file)?;
        info!("Updated {}", context_file.display());
        Ok(())
    }
}

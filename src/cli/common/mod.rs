// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Common arguments for command-line interfaces. Every subcommand needs the
//! observation metadata and a way to reach the toolkit, so those arguments are
//! shared between them.

mod printers;

pub(super) use printers::InfoPrinter;
pub(crate) use printers::{display_warnings, Warn};

use std::{path::PathBuf, sync::Arc};

use clap::Parser;
use itertools::Itertools;
use log::debug;
use serde::{Deserialize, Serialize};
use strum::IntoEnumIterator;
use strum_macros::{Display, EnumIter, EnumString};

use super::ImagingError;
use crate::{
    engine::{CasaProcessEngine, EngineConfig},
    metadata::ObservationMetadata,
};

lazy_static::lazy_static! {
    pub(super) static ref ARG_FILE_TYPES_COMMA_SEPARATED: String = ArgFileTypes::iter().join(", ");

    pub(super) static ref ARG_FILE_HELP: String =
        format!("All arguments may be specified in a file. Any CLI arguments override arguments set in the file. Supported formats: {}", *ARG_FILE_TYPES_COMMA_SEPARATED);
}

#[derive(Debug, Display, EnumIter, EnumString)]
pub(super) enum ArgFileTypes {
    #[strum(serialize = "toml")]
    Toml,
    #[strum(serialize = "json")]
    Json,
}

macro_rules! unpack_arg_file {
    ($arg_file:expr) => ({
        use std::{fs::File, io::Read, str::FromStr};

        use crate::cli::common::{ArgFileTypes, ARG_FILE_TYPES_COMMA_SEPARATED};

        debug!("Attempting to parse argument file {}", $arg_file.display());

        let mut contents = String::new();
        let arg_file_type = $arg_file
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase())
            .and_then(|e| ArgFileTypes::from_str(&e).ok());

        match arg_file_type {
            Some(ArgFileTypes::Toml) => {
                debug!("Parsing toml file...");
                let mut fh = File::open(&$arg_file)?;
                fh.read_to_string(&mut contents)?;
                match toml::from_str(&contents) {
                    Ok(p) => p,
                    Err(err) => {
                        return Err(ImagingError::ArgFile(format!(
                            "Couldn't decode toml structure from {:?}:\n{err}",
                            $arg_file
                        )))
                    }
                }
            }
            Some(ArgFileTypes::Json) => {
                debug!("Parsing json file...");
                let mut fh = File::open(&$arg_file)?;
                fh.read_to_string(&mut contents)?;
                match serde_json::from_str(&contents) {
                    Ok(p) => p,
                    Err(err) => {
                        return Err(ImagingError::ArgFile(format!(
                            "Couldn't decode json structure from {:?}:\n{err}",
                            $arg_file
                        )))
                    }
                }
            }

            _ => {
                return Err(ImagingError::ArgFile(format!(
                    "Argument file '{:?}' doesn't have a recognised file extension! Valid extensions are: {}", $arg_file, *ARG_FILE_TYPES_COMMA_SEPARATED)
                ))
            }
        }
    });
}

/// How to reach the toolkit. In an arguments file, these live under
/// `[engine]`.
#[derive(Parser, Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub(super) struct EngineArgs {
    /// The toolkit executable. Default: casa
    #[clap(long, help_heading = "ENGINE")]
    pub(super) casa: Option<PathBuf>,

    /// The directory that task scripts are run in and images are written to.
    /// Default: the current directory
    #[clap(long, help_heading = "ENGINE")]
    pub(super) workdir: Option<PathBuf>,

    /// Extra arguments given to the toolkit executable, e.g. "--nologger".
    #[clap(long, multiple_values(true), allow_hyphen_values(true), help_heading = "ENGINE")]
    pub(super) extra_args: Option<Vec<String>>,
}

impl EngineArgs {
    pub(super) fn merge(self, other: Self) -> Self {
        Self {
            casa: self.casa.or(other.casa),
            workdir: self.workdir.or(other.workdir),
            extra_args: self.extra_args.or(other.extra_args),
        }
    }

    pub(super) fn parse(self) -> CasaProcessEngine {
        let default = EngineConfig::default();
        let config = EngineConfig {
            casa: self.casa.unwrap_or(default.casa),
            workdir: self.workdir.unwrap_or(default.workdir),
            extra_args: self.extra_args.unwrap_or_default(),
        };
        debug!("Toolkit: {config:?}");
        CasaProcessEngine::new(config)
    }

    pub(super) fn describe(&self, printer: &mut InfoPrinter) {
        let default = EngineConfig::default();
        printer.push_block(vec![
            format!(
                "Toolkit: {}",
                self.casa.as_ref().unwrap_or(&default.casa).display()
            )
            .into(),
            format!(
                "Working directory: {}",
                self.workdir.as_ref().unwrap_or(&default.workdir).display()
            )
            .into(),
        ]);
    }
}

/// Read the observation metadata, which is mandatory.
pub(super) fn read_metadata(
    metadata: Option<&PathBuf>,
) -> Result<Arc<ObservationMetadata>, ImagingError> {
    let path = metadata.ok_or_else(|| {
        ImagingError::Metadata("No observation metadata file was specified".to_string())
    })?;
    Ok(Arc::new(ObservationMetadata::read_from_file(path)?))
}

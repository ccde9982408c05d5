// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Read-only observation metadata.
//!
//! The imaging heuristics never touch visibilities; they only need to know
//! about antennas, spectral windows, fields and intents of each input
//! measurement set. This description is produced upstream and read here from
//! a TOML, JSON or YAML file.

mod error;
#[cfg(test)]
mod tests;

pub use error::MetadataError;

use std::{
    fs::File,
    io::Read,
    path::{Path, PathBuf},
};

use indexmap::IndexMap;
use itertools::Itertools;
use log::debug;
use marlu::RADec;
use serde::{Deserialize, Serialize};
use vec1::Vec1;

use crate::imaging::Intent;

/// The whole observing run: every measurement set that may be imaged.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservationMetadata {
    /// e.g. "ALMA", "VLA" or "EVLA".
    pub telescope: String,

    pub measurement_sets: Vec1<MeasurementSetInfo>,

    /// The target and frequency the observation was designed for, if known.
    #[serde(default)]
    pub representative_target: Option<RepresentativeTarget>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeasurementSetInfo {
    /// The path to the measurement set. This is also its identity.
    pub name: String,

    pub antennas: Vec<AntennaInfo>,

    /// Projected baseline lengths \[metres\]. Only the distribution matters.
    #[serde(default)]
    pub baseline_lengths_m: Vec<f64>,

    pub spectral_windows: Vec<SpwInfo>,

    pub fields: Vec<FieldInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AntennaInfo {
    pub name: String,

    /// \[metres\]
    pub diameter_m: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FreqFrame {
    Lsrk,
    Topo,
    Bary,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpwInfo {
    pub id: u32,

    #[serde(default)]
    pub name: String,

    /// The lower edge of the lowest channel \[Hz\].
    pub min_freq_hz: f64,

    /// The upper edge of the highest channel \[Hz\].
    pub max_freq_hz: f64,

    /// Always positive \[Hz\].
    pub chan_width_hz: f64,

    pub num_channels: u32,

    /// The effective (noise-equivalent) channel bandwidth, which differs from
    /// the channel width when the correlator smooths \[Hz\].
    #[serde(default)]
    pub effective_bw_hz: Option<f64>,

    #[serde(default)]
    pub ref_freq_hz: Option<f64>,

    #[serde(default = "default_frame")]
    pub frame: FreqFrame,

    /// Spectral-line transitions targeted by this window.
    #[serde(default)]
    pub transitions: Vec<String>,

    /// The receiver band, e.g. "ALMA Band 6" or "L".
    #[serde(default)]
    pub band: Option<String>,

    /// Spectral windows used only for calibration are "CALIBRATION"; the
    /// default is "SCIENCE".
    #[serde(default = "default_spw_type")]
    pub spw_type: String,
}

fn default_frame() -> FreqFrame {
    FreqFrame::Topo
}

fn default_spw_type() -> String {
    "SCIENCE".to_string()
}

impl SpwInfo {
    /// The total bandwidth \[Hz\].
    pub fn bandwidth_hz(&self) -> f64 {
        self.max_freq_hz - self.min_freq_hz
    }

    /// The centre frequency \[Hz\].
    pub fn centre_freq_hz(&self) -> f64 {
        0.5 * (self.min_freq_hz + self.max_freq_hz)
    }

    /// The noise-equivalent bandwidth of a single channel \[Hz\].
    pub fn effective_bw_hz(&self) -> f64 {
        self.effective_bw_hz.unwrap_or(self.chan_width_hz)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldInfo {
    pub id: u32,

    pub name: String,

    pub intents: Vec<Intent>,

    /// \[degrees\]
    pub ra_deg: f64,

    /// \[degrees\]
    pub dec_deg: f64,

    /// Ephemeris objects (e.g. planets) move across the sky during an
    /// observation.
    #[serde(default)]
    pub is_ephemeris: bool,
}

impl FieldInfo {
    pub fn radec(&self) -> RADec {
        RADec::from_degrees(self.ra_deg, self.dec_deg)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepresentativeTarget {
    pub source: Option<String>,

    /// \[Hz\]
    pub frequency_hz: Option<f64>,

    /// \[Hz\]
    pub bandwidth_hz: Option<f64>,
}

impl ObservationMetadata {
    /// Read the metadata from a file. The format is determined by the file
    /// extension.
    pub fn read_from_file<P: AsRef<Path>>(path: P) -> Result<ObservationMetadata, MetadataError> {
        let path = path.as_ref();
        debug!("Reading observation metadata from {}", path.display());
        let mut contents = String::new();
        File::open(path)?.read_to_string(&mut contents)?;

        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase());
        let md: ObservationMetadata = match ext.as_deref() {
            Some("toml") => toml::from_str(&contents).map_err(|e| MetadataError::Decode {
                file: path.to_path_buf(),
                err: e.to_string(),
            })?,
            Some("json") => serde_json::from_str(&contents).map_err(|e| MetadataError::Decode {
                file: path.to_path_buf(),
                err: e.to_string(),
            })?,
            Some("yaml" | "yml") => {
                serde_yaml::from_str(&contents).map_err(|e| MetadataError::Decode {
                    file: path.to_path_buf(),
                    err: e.to_string(),
                })?
            }
            _ => return Err(MetadataError::UnknownExtension(PathBuf::from(path))),
        };
        md.validate()?;
        Ok(md)
    }

    fn validate(&self) -> Result<(), MetadataError> {
        for ms in &self.measurement_sets {
            if ms.antennas.is_empty() {
                return Err(MetadataError::NoAntennas(ms.name.clone()));
            }
            for spw in &ms.spectral_windows {
                if spw.max_freq_hz <= spw.min_freq_hz || spw.chan_width_hz <= 0.0 {
                    return Err(MetadataError::BadSpw {
                        vis: ms.name.clone(),
                        spw: spw.id,
                    });
                }
            }
        }
        Ok(())
    }

    pub fn vis_names(&self) -> Vec<String> {
        self.measurement_sets
            .iter()
            .map(|ms| ms.name.clone())
            .collect()
    }

    pub fn ms(&self, vis: &str) -> Result<&MeasurementSetInfo, MetadataError> {
        self.measurement_sets
            .iter()
            .find(|ms| ms.name == vis)
            .ok_or_else(|| MetadataError::UnknownVis(vis.to_string()))
    }

    pub fn spw(&self, vis: &str, spw: u32) -> Result<&SpwInfo, MetadataError> {
        self.ms(vis)?
            .spectral_windows
            .iter()
            .find(|s| s.id == spw)
            .ok_or_else(|| MetadataError::UnknownSpw {
                vis: vis.to_string(),
                spw,
            })
    }

    /// The frequency range of a spectral window \[Hz\].
    pub fn spw_freq_range(&self, vis: &str, spw: u32) -> Result<(f64, f64), MetadataError> {
        let s = self.spw(vis, spw)?;
        Ok((s.min_freq_hz, s.max_freq_hz))
    }

    /// All antenna diameters across all datasets, with how many antennas have
    /// each diameter. Diameters are keyed in centimetres to be hashable.
    pub fn antenna_diameters(&self) -> IndexMap<u32, usize> {
        let mut counts = IndexMap::new();
        for ms in &self.measurement_sets {
            for a in &ms.antennas {
                *counts.entry((a.diameter_m * 100.0).round() as u32).or_insert(0) += 1;
            }
        }
        counts.sort_keys();
        counts
    }

    /// The largest antenna diameter \[metres\].
    pub fn largest_antenna_diameter(&self) -> f64 {
        self.measurement_sets
            .iter()
            .flat_map(|ms| ms.antennas.iter().map(|a| a.diameter_m))
            .fold(0.0, f64::max)
    }

    /// The smallest antenna diameter \[metres\].
    pub fn smallest_antenna_diameter(&self) -> f64 {
        self.measurement_sets
            .iter()
            .flat_map(|ms| ms.antennas.iter().map(|a| a.diameter_m))
            .fold(f64::INFINITY, f64::min)
    }

    /// A percentile of the baseline length distribution over all datasets
    /// \[metres\]. `None` if no baseline lengths are known.
    pub fn representative_baseline_m(&self, percentile: f64) -> Option<f64> {
        let lengths: Vec<f64> = self
            .measurement_sets
            .iter()
            .flat_map(|ms| ms.baseline_lengths_m.iter().copied())
            .filter(|l| l.is_finite())
            .sorted_by(|a, b| a.total_cmp(b))
            .collect();
        if lengths.is_empty() {
            return None;
        }
        let rank = (percentile / 100.0 * (lengths.len() - 1) as f64).clamp(0.0, (lengths.len() - 1) as f64);
        let lo = rank.floor() as usize;
        let hi = rank.ceil() as usize;
        let frac = rank - lo as f64;
        Some(lengths[lo] + frac * (lengths[hi] - lengths[lo]))
    }

    /// The field IDs in a measurement set that have the given name and intent.
    pub fn field_ids(&self, vis: &str, name: &str, intent: Intent) -> Result<Vec<u32>, MetadataError> {
        Ok(self
            .ms(vis)?
            .fields
            .iter()
            .filter(|f| f.name == name && f.intents.contains(&intent))
            .map(|f| f.id)
            .collect())
    }

    /// All of the fields (across all datasets) with the given name and intent.
    pub fn fields_named(&self, name: &str, intent: Intent) -> Vec<&FieldInfo> {
        self.measurement_sets
            .iter()
            .flat_map(|ms| ms.fields.iter())
            .filter(|f| f.name == name && f.intents.contains(&intent))
            .collect()
    }

    /// Is this field/intent combination observed as a mosaic? This is true
    /// when any dataset has more than one field with this name and intent.
    pub fn is_mosaic(&self, name: &str, intent: Intent) -> bool {
        self.measurement_sets.iter().any(|ms| {
            ms.fields
                .iter()
                .filter(|f| f.name == name && f.intents.contains(&intent))
                .count()
                > 1
        })
    }

    /// Is this field an ephemeris object? There is no sane default for an
    /// unknown field, so that's an error.
    pub fn is_eph_obj(&self, name: &str) -> Result<bool, MetadataError> {
        let fields: Vec<&FieldInfo> = self
            .measurement_sets
            .iter()
            .flat_map(|ms| ms.fields.iter())
            .filter(|f| f.name == name)
            .collect();
        if fields.is_empty() {
            return Err(MetadataError::UnknownField(name.to_string()));
        }
        Ok(fields.iter().any(|f| f.is_ephemeris))
    }

    /// The representative target, frequency and bandwidth. There is no sane
    /// default, so it's an error if this isn't available.
    pub fn representative_target(&self) -> Result<(String, f64, f64), MetadataError> {
        match &self.representative_target {
            Some(RepresentativeTarget {
                source: Some(source),
                frequency_hz: Some(freq),
                bandwidth_hz: Some(bw),
            }) => Ok((source.clone(), *freq, *bw)),
            _ => Err(MetadataError::NoRepresentativeTarget),
        }
    }

    /// Which measurement sets contain all of the requested spws and the
    /// field/intent combination?
    pub fn vislist_for(&self, field: &str, intent: Intent, spws: &[u32]) -> Vec<String> {
        self.measurement_sets
            .iter()
            .filter(|ms| {
                ms.fields
                    .iter()
                    .any(|f| f.name == field && f.intents.contains(&intent))
                    && spws
                        .iter()
                        .all(|spw| ms.spectral_windows.iter().any(|s| s.id == *spw))
            })
            .map(|ms| ms.name.clone())
            .collect()
    }
}

/// Parse a comma-separated spw list, e.g. "17,19,21". Spw IDs are returned
/// sorted and deduplicated.
pub fn parse_spw_list(spw: &str) -> Result<Vec<u32>, MetadataError> {
    let mut spws = vec![];
    for s in spw.split(',').map(|s| s.trim()).filter(|s| !s.is_empty()) {
        // A spw may carry a channel selection, e.g. "17:10~100".
        let id = s.split(':').next().unwrap_or(s);
        spws.push(
            id.parse()
                .map_err(|_| MetadataError::BadSpwSelection(spw.to_string()))?,
        );
    }
    if spws.is_empty() {
        return Err(MetadataError::BadSpwSelection(spw.to_string()));
    }
    spws.sort_unstable();
    spws.dedup();
    Ok(spws)
}

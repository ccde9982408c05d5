// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Continuum frequency ranges ("cont.dat" files).
//!
//! ```text
//! Field: M100
//!
//! SpectralWindow: 17
//! 114.8~115.2GHz LSRK
//! 115.5~116.0GHz LSRK
//!
//! SpectralWindow: 19
//! NONE
//! ```

use std::path::Path;

use indexmap::IndexMap;
use lazy_static::lazy_static;
use log::debug;
use regex::Regex;
use thiserror::Error;

use crate::{misc::format_sig_figs, unit_parsing::parse_freq};

lazy_static! {
    static ref FIELD_RE: Regex = Regex::new(r"^Field:\s*(\S.*?)\s*$").unwrap();
    static ref SPW_RE: Regex = Regex::new(r"^SpectralWindow:\s*(\d+)\s*$").unwrap();
    static ref RANGE_RE: Regex = Regex::new(
        r"^([0-9.eE+-]+)~([0-9.eE+-]+)\s*(GHz|MHz|kHz|Hz)\s*(LSRK|TOPO|BARY|SOURCE|REST)?$"
    )
    .unwrap();
}

#[derive(Debug, Clone, PartialEq)]
pub struct FreqRange {
    /// \[Hz\]
    pub lo_hz: f64,
    /// \[Hz\]
    pub hi_hz: f64,
    pub frame: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SpwContRanges {
    pub ranges: Vec<FreqRange>,

    /// The spw has no line-free channels.
    pub none: bool,

    /// The whole spw is line-free.
    pub all: bool,
}

impl SpwContRanges {
    /// The total width of the line-free ranges \[Hz\].
    pub fn total_width_hz(&self) -> f64 {
        self.ranges.iter().map(|r| r.hi_hz - r.lo_hz).sum()
    }

    /// A frequency selection string, e.g. "114.8~115.2GHz;115.5~116GHz".
    /// `None` if the whole spw should be used or there are no ranges.
    pub fn selection(&self) -> Option<String> {
        if self.all || self.none || self.ranges.is_empty() {
            return None;
        }
        Some(
            self.ranges
                .iter()
                .map(|r| {
                    format!(
                        "{}~{}GHz",
                        format_sig_figs(r.lo_hz / 1e9, 10),
                        format_sig_figs(r.hi_hz / 1e9, 10)
                    )
                })
                .collect::<Vec<_>>()
                .join(";"),
        )
    }
}

/// Line-free ranges per field and spw.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContRanges {
    fields: IndexMap<String, IndexMap<u32, SpwContRanges>>,
}

impl ContRanges {
    pub fn read<P: AsRef<Path>>(path: P) -> Result<ContRanges, ContFileError> {
        let path = path.as_ref();
        debug!("Reading continuum ranges from {}", path.display());
        let contents = std::fs::read_to_string(path)?;
        ContRanges::parse(&contents)
    }

    pub fn parse(contents: &str) -> Result<ContRanges, ContFileError> {
        let mut fields: IndexMap<String, IndexMap<u32, SpwContRanges>> = IndexMap::new();
        let mut field: Option<String> = None;
        let mut spw: Option<u32> = None;

        for (i, line) in contents.lines().enumerate() {
            let line_num = i + 1;
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            if let Some(caps) = FIELD_RE.captures(line) {
                let name = caps[1].to_string();
                fields.entry(name.clone()).or_default();
                field = Some(name);
                spw = None;
                continue;
            }

            if let Some(caps) = SPW_RE.captures(line) {
                let f = field
                    .as_ref()
                    .ok_or(ContFileError::SpwWithoutField { line_num })?;
                let id: u32 = caps[1]
                    .parse()
                    .map_err(|_| ContFileError::BadLine { line_num, line: line.to_string() })?;
                if let Some(spws) = fields.get_mut(f) {
                    spws.entry(id).or_default();
                }
                spw = Some(id);
                continue;
            }

            let (f, s) = match (&field, spw) {
                (Some(f), Some(s)) => (f, s),
                _ => return Err(ContFileError::RangeWithoutSpw { line_num }),
            };
            let entry = fields
                .get_mut(f)
                .and_then(|spws| spws.get_mut(&s))
                .ok_or(ContFileError::RangeWithoutSpw { line_num })?;

            match line {
                "NONE" => entry.none = true,
                "ALL" => entry.all = true,
                _ => {
                    let caps = RANGE_RE.captures(line).ok_or_else(|| ContFileError::BadLine {
                        line_num,
                        line: line.to_string(),
                    })?;
                    let unit = &caps[3];
                    let lo = parse_freq(&format!("{}{unit}", &caps[1]))
                        .map_err(|_| ContFileError::BadLine { line_num, line: line.to_string() })?;
                    let hi = parse_freq(&format!("{}{unit}", &caps[2]))
                        .map_err(|_| ContFileError::BadLine { line_num, line: line.to_string() })?;
                    if hi <= lo {
                        return Err(ContFileError::BadLine {
                            line_num,
                            line: line.to_string(),
                        });
                    }
                    entry.ranges.push(FreqRange {
                        lo_hz: lo,
                        hi_hz: hi,
                        frame: caps.get(4).map(|m| m.as_str()).unwrap_or("LSRK").to_string(),
                    });
                }
            }
        }

        Ok(ContRanges { fields })
    }

    pub fn get(&self, field: &str, spw: u32) -> Option<&SpwContRanges> {
        self.fields.get(field).and_then(|spws| spws.get(&spw))
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

#[derive(Error, Debug)]
pub enum ContFileError {
    #[error("Line {line_num}: a SpectralWindow was given before any Field")]
    SpwWithoutField { line_num: usize },

    #[error("Line {line_num}: a frequency range was given before any Field/SpectralWindow")]
    RangeWithoutSpw { line_num: usize },

    #[error("Line {line_num}: couldn't parse '{line}'")]
    BadLine { line_num: usize, line: String },

    #[error(transparent)]
    IO(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;
    use indoc::indoc;

    use super::*;

    const CONT_DAT: &str = indoc! {"
        Field: M100

        SpectralWindow: 17
        114.8~115.2GHz LSRK
        115.5~116.0GHz LSRK

        SpectralWindow: 19
        NONE

        Field: J1229+0203

        SpectralWindow: 17
        ALL
    "};

    #[test]
    fn test_parse_cont_dat() {
        let ranges = ContRanges::parse(CONT_DAT).unwrap();
        let spw17 = ranges.get("M100", 17).unwrap();
        assert_eq!(spw17.ranges.len(), 2);
        assert_abs_diff_eq!(spw17.ranges[0].lo_hz, 114.8e9, epsilon = 1.0);
        assert_abs_diff_eq!(spw17.total_width_hz(), 0.9e9, epsilon = 1.0);
        assert_eq!(spw17.ranges[1].frame, "LSRK");
        assert_eq!(spw17.selection().unwrap(), "114.8~115.2GHz;115.5~116GHz");

        let spw19 = ranges.get("M100", 19).unwrap();
        assert!(spw19.none);
        assert!(spw19.selection().is_none());

        assert!(ranges.get("J1229+0203", 17).unwrap().all);
        assert!(ranges.get("M100", 21).is_none());
    }

    #[test]
    fn test_bad_cont_dat() {
        let result = ContRanges::parse("SpectralWindow: 17\n");
        assert!(matches!(result, Err(ContFileError::SpwWithoutField { line_num: 1 })));

        let result = ContRanges::parse("Field: M100\n114.8~115.2GHz LSRK\n");
        assert!(matches!(result, Err(ContFileError::RangeWithoutSpw { line_num: 2 })));

        let result = ContRanges::parse("Field: M100\nSpectralWindow: 17\n115.2~114.8GHz\n");
        assert!(matches!(result, Err(ContFileError::BadLine { line_num: 3, .. })));
    }
}

// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Code to parse strings into plain numbers or some quantity with a unit.
//!
//! The deconvolution engine speaks in "quantity strings" (e.g. "0.5mJy",
//! "0.12arcsec", "-20km/s"). Everything is converted to a base unit on the
//! way in: Jy, arcsec, Hz and m/s.

mod error;

pub use error::UnitParseError;

use strum::IntoEnumIterator;
use strum_macros::{EnumIter, IntoStaticStr};

/// A unit with a multiplicative factor to its base unit.
pub(crate) trait Unit: IntoEnumIterator + Into<&'static str> + Copy {
    /// The kind of quantity, used in error messages.
    const KIND: &'static str;

    /// Multiply a value in this unit by this factor to get the base unit.
    fn factor(self) -> f64;
}

#[derive(Debug, Clone, Copy, PartialEq, EnumIter, IntoStaticStr)]
pub(crate) enum FluxUnit {
    #[strum(serialize = "uJy")]
    MicroJansky,

    #[strum(serialize = "mJy")]
    MilliJansky,

    #[strum(serialize = "Jy")]
    Jansky,
}

impl Unit for FluxUnit {
    const KIND: &'static str = "flux density";

    fn factor(self) -> f64 {
        match self {
            FluxUnit::MicroJansky => 1e-6,
            FluxUnit::MilliJansky => 1e-3,
            FluxUnit::Jansky => 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, EnumIter, IntoStaticStr)]
pub(crate) enum AngleUnit {
    #[strum(serialize = "arcsec")]
    Arcsec,

    #[strum(serialize = "arcmin")]
    Arcmin,

    #[strum(serialize = "deg")]
    Degree,

    #[strum(serialize = "rad")]
    Radian,
}

impl Unit for AngleUnit {
    const KIND: &'static str = "angle";

    fn factor(self) -> f64 {
        match self {
            AngleUnit::Arcsec => 1.0,
            AngleUnit::Arcmin => 60.0,
            AngleUnit::Degree => 3600.0,
            AngleUnit::Radian => 180.0 / std::f64::consts::PI * 3600.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, EnumIter, IntoStaticStr)]
pub(crate) enum FreqUnit {
    #[strum(serialize = "GHz")]
    GigaHertz,

    #[strum(serialize = "MHz")]
    MegaHertz,

    #[strum(serialize = "kHz")]
    KiloHertz,

    #[strum(serialize = "Hz")]
    Hertz,
}

impl Unit for FreqUnit {
    const KIND: &'static str = "frequency";

    fn factor(self) -> f64 {
        match self {
            FreqUnit::GigaHertz => 1e9,
            FreqUnit::MegaHertz => 1e6,
            FreqUnit::KiloHertz => 1e3,
            FreqUnit::Hertz => 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, EnumIter, IntoStaticStr)]
pub(crate) enum VelocityUnit {
    #[strum(serialize = "km/s")]
    KilometresPerSecond,

    #[strum(serialize = "m/s")]
    MetresPerSecond,
}

impl Unit for VelocityUnit {
    const KIND: &'static str = "velocity";

    fn factor(self) -> f64 {
        match self {
            VelocityUnit::KilometresPerSecond => 1e3,
            VelocityUnit::MetresPerSecond => 1.0,
        }
    }
}

/// Parse a string that has a unit attached to it. Units are matched
/// case-insensitively, longest first, so "mJy" is never mistaken for "Jy".
/// Returns `Ok(None)` if no supported unit is present.
fn parse_with_unit<U: Unit>(s: &str) -> Result<Option<f64>, UnitParseError> {
    let trimmed = s.trim();
    let lower = trimmed.to_lowercase();

    let mut units: Vec<U> = U::iter().collect();
    units.sort_by_key(|u| std::cmp::Reverse(Into::<&'static str>::into(*u).len()));

    for unit in units {
        let unit_str: &'static str = unit.into();
        if lower.ends_with(&unit_str.to_lowercase()) {
            let prefix = trimmed[..trimmed.len() - unit_str.len()].trim();
            return match prefix.parse::<f64>() {
                Ok(n) => Ok(Some(n * unit.factor())),
                Err(_) => Err(UnitParseError::GotUnitButCantParse {
                    input: s.to_string(),
                    unit: unit_str,
                }),
            };
        }
    }

    Ok(None)
}

/// Parse a string that may have a unit attached. Naked numbers are assumed to
/// already be in the base unit.
fn parse_quantity<U: Unit>(s: &str) -> Result<f64, UnitParseError> {
    // Try to parse a naked number.
    if let Ok(number) = s.trim().parse::<f64>() {
        return Ok(number);
    }

    match parse_with_unit::<U>(s)? {
        Some(v) => Ok(v),
        // If we made it this far, we don't know how to parse the string.
        None => Err(UnitParseError::Unknown {
            input: s.to_string(),
            unit_type: U::KIND,
        }),
    }
}

/// Parse a flux density \[Jy\].
pub(crate) fn parse_flux(s: &str) -> Result<f64, UnitParseError> {
    parse_quantity::<FluxUnit>(s)
}

/// Parse an angle \[arcsec\].
pub(crate) fn parse_angle(s: &str) -> Result<f64, UnitParseError> {
    parse_quantity::<AngleUnit>(s)
}

/// Parse a frequency \[Hz\].
pub(crate) fn parse_freq(s: &str) -> Result<f64, UnitParseError> {
    parse_quantity::<FreqUnit>(s)
}

/// Parse a velocity \[m/s\].
pub(crate) fn parse_velocity(s: &str) -> Result<f64, UnitParseError> {
    parse_quantity::<VelocityUnit>(s)
}

/// The spectral axis parameters of the deconvolution engine (`start`,
/// `width`) can be channel numbers, frequencies or velocities.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum SpectralQuantity {
    Channel(i64),

    /// \[Hz\]
    Frequency(f64),

    /// \[m/s\]
    Velocity(f64),
}

pub(crate) fn parse_spectral(s: &str) -> Result<SpectralQuantity, UnitParseError> {
    if let Ok(c) = s.trim().parse::<i64>() {
        return Ok(SpectralQuantity::Channel(c));
    }
    if let Some(f) = parse_with_unit::<FreqUnit>(s)? {
        return Ok(SpectralQuantity::Frequency(f));
    }
    if let Some(v) = parse_with_unit::<VelocityUnit>(s)? {
        return Ok(SpectralQuantity::Velocity(v));
    }
    Err(UnitParseError::Unknown {
        input: s.to_string(),
        unit_type: "spectral",
    })
}

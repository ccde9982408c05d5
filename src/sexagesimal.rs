// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

/*!
Code for handling conversion to and from sexagesimal.

Phase centres are handed to the deconvolution engine as direction strings,
e.g. "ICRS 12:34:56.7890 +012.34.56.789". Right ascension is written in hours
separated by colons, declination in degrees separated by dots.
 */

use marlu::RADec;
use thiserror::Error;

/// Convert "hours minutes seconds" (or "degrees minutes seconds") fields to a
/// float. The sign is taken from the string so that "-00" is still negative.
fn fields_to_float(sign_negative: bool, a: f64, m: f64, s: f64) -> f64 {
    let num = a.abs() + m / 60.0 + s / 3600.0;
    if sign_negative {
        -num
    } else {
        num
    }
}

fn split_three(s: &str, delimiters: &[char]) -> Result<(bool, f64, f64, f64), SexagesimalError> {
    let trimmed = s.trim();
    let negative = trimmed.starts_with('-');
    let fields: Vec<&str> = trimmed
        .split(|c| delimiters.contains(&c))
        .filter(|f| !f.is_empty())
        .collect();
    if fields.len() != 3 {
        return Err(SexagesimalError::WrongFieldCount(s.to_string()));
    }
    Ok((
        negative,
        fields[0].parse()?,
        fields[1].parse()?,
        fields[2].parse()?,
    ))
}

/// Convert a right ascension string to degrees. "12:34:56.7" and "12h34m56.7s"
/// are both understood to be in hours.
pub fn sexagesimal_ra_to_degrees(s: &str) -> Result<f64, SexagesimalError> {
    let delimiters: &[char] = if s.contains('h') {
        &['h', 'm', 's']
    } else {
        &[':']
    };
    let (negative, h, m, sec) = split_three(s, delimiters)?;
    Ok(15.0 * fields_to_float(negative, h, m, sec))
}

/// Convert a declination string to degrees. "+12.34.56.7", "12:34:56.7" and
/// "12d34m56.7s" are understood.
pub fn sexagesimal_dec_to_degrees(s: &str) -> Result<f64, SexagesimalError> {
    if s.contains('d') {
        let (negative, d, m, sec) = split_three(s, &['d', 'm', 's'])?;
        return Ok(fields_to_float(negative, d, m, sec));
    }
    if s.contains(':') {
        let (negative, d, m, sec) = split_three(s, &[':'])?;
        return Ok(fields_to_float(negative, d, m, sec));
    }

    // Dot-delimited: there are three dots when the seconds have a fraction.
    let trimmed = s.trim();
    let negative = trimmed.starts_with('-');
    let fields: Vec<&str> = trimmed.splitn(4, '.').collect();
    match fields.as_slice() {
        [d, m, sec] => Ok(fields_to_float(
            negative,
            d.parse()?,
            m.parse()?,
            sec.parse()?,
        )),
        [d, m, sec, frac] => Ok(fields_to_float(
            negative,
            d.parse()?,
            m.parse()?,
            format!("{sec}.{frac}").parse()?,
        )),
        _ => Err(SexagesimalError::WrongFieldCount(s.to_string())),
    }
}

/// Convert a number in degrees to a right-ascension string in hours, e.g.
/// "11:49:01.0619".
pub fn degrees_to_ra_string(f: f64) -> String {
    let f = f.rem_euclid(360.0);
    let total_seconds = f / 15.0 * 3600.0;
    // Round to the output precision first so that we never print 60 seconds.
    let total_seconds = (total_seconds * 1e4).round() / 1e4;
    let hours = (total_seconds / 3600.0).floor();
    let minutes = ((total_seconds - hours * 3600.0) / 60.0).floor();
    let seconds = total_seconds - hours * 3600.0 - minutes * 60.0;
    format!(
        "{:02}:{:02}:{:07.4}",
        (hours as u32) % 24,
        minutes as u32,
        seconds
    )
}

/// Convert a number in degrees to a declination string, e.g.
/// "-045.12.34.567".
pub fn degrees_to_dec_string(f: f64) -> String {
    let negative = f < 0.0;
    let total_seconds = (f.abs() * 3600.0 * 1e3).round() / 1e3;
    let degrees = (total_seconds / 3600.0).floor();
    let minutes = ((total_seconds - degrees * 3600.0) / 60.0).floor();
    let seconds = total_seconds - degrees * 3600.0 - minutes * 60.0;
    format!(
        "{}{:03}.{:02}.{:06.3}",
        if negative { "-" } else { "+" },
        degrees as u32,
        minutes as u32,
        seconds
    )
}

/// Format a direction for the deconvolution engine.
pub fn format_direction(frame: &str, radec: RADec) -> String {
    format!(
        "{frame} {} {}",
        degrees_to_ra_string(radec.ra.to_degrees()),
        degrees_to_dec_string(radec.dec.to_degrees())
    )
}

/// Parse a direction string, e.g. "ICRS 12:34:56.7 +12.34.56.7" or
/// "J2000 12h34m56.7s -12d34m56.7s". The frame is returned alongside the
/// position.
pub fn parse_direction(s: &str) -> Result<(String, RADec), SexagesimalError> {
    let parts: Vec<&str> = s.split_whitespace().collect();
    match parts.as_slice() {
        [frame, ra, dec] => Ok((
            frame.to_string(),
            RADec::from_degrees(
                sexagesimal_ra_to_degrees(ra)?,
                sexagesimal_dec_to_degrees(dec)?,
            ),
        )),
        [ra, dec] => Ok((
            "ICRS".to_string(),
            RADec::from_degrees(
                sexagesimal_ra_to_degrees(ra)?,
                sexagesimal_dec_to_degrees(dec)?,
            ),
        )),
        _ => Err(SexagesimalError::BadDirection(s.to_string())),
    }
}

#[derive(Error, Debug)]
pub enum SexagesimalError {
    /// Three numbers (fields) are expected; this error is used when the number
    /// of fields is not three.
    #[error("Did not get three sexagesimal fields: {0}")]
    WrongFieldCount(String),

    #[error("Couldn't read '{0}' as a direction; expected '<frame> <ra> <dec>'")]
    BadDirection(String),

    #[error("{0}")]
    ParseFloat(#[from] std::num::ParseFloatError),
}

#[cfg(test)]
mod tests {
    use approx::*;

    use super::*;

    #[test]
    fn test_ra_strings() {
        let result = sexagesimal_ra_to_degrees("11h34m23.7854s");
        assert!(result.is_ok(), "{}", result.unwrap_err());
        assert_abs_diff_eq!(result.unwrap(), 173.59910583333334, epsilon = 1e-10);

        let result = sexagesimal_ra_to_degrees("11:34:23.7854");
        assert_abs_diff_eq!(result.unwrap(), 173.59910583333334, epsilon = 1e-10);
    }

    #[test]
    fn test_dec_strings() {
        assert_abs_diff_eq!(
            sexagesimal_dec_to_degrees("-22:58:52.56").unwrap(),
            -22.981266666666667,
            epsilon = 1e-10
        );
        assert_abs_diff_eq!(
            sexagesimal_dec_to_degrees("-022.58.52.56").unwrap(),
            -22.981266666666667,
            epsilon = 1e-10
        );
        assert_abs_diff_eq!(
            sexagesimal_dec_to_degrees("-11d49m01.062s").unwrap(),
            -11.81696167,
            epsilon = 1e-6
        );
        // Negative zero degrees must stay negative.
        assert_abs_diff_eq!(
            sexagesimal_dec_to_degrees("-00.30.00").unwrap(),
            -0.5,
            epsilon = 1e-10
        );
    }

    #[test]
    fn test_format_direction() {
        let radec = RADec::from_degrees(173.59910583333334, -22.981266666666667);
        let s = format_direction("ICRS", radec);
        assert_eq!(s, "ICRS 11:34:23.7854 -022.58.52.560");

        let (frame, parsed) = parse_direction(&s).unwrap();
        assert_eq!(frame, "ICRS");
        assert_abs_diff_eq!(parsed.ra, radec.ra, epsilon = 1e-8);
        assert_abs_diff_eq!(parsed.dec, radec.dec, epsilon = 1e-8);
    }

    #[test]
    fn test_no_sixty_seconds() {
        // 59.99999 seconds should roll over into the next minute.
        let s = degrees_to_ra_string(15.0 * (1.0 + 59.0 / 60.0 + 59.999999 / 3600.0));
        assert_eq!(s, "02:00:00.0000");
    }
}

// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::io::Write;

use approx::assert_abs_diff_eq;
use indoc::indoc;
use tempfile::Builder;

use super::*;
use crate::imaging::test_helpers::{alma_12m_metadata, alma_12m_mosaic_metadata, vla_metadata};

const TOML_METADATA: &str = indoc! {r#"
    telescope = "ALMA"

    [representative_target]
    source = "M100"
    frequency_hz = 115.27e9
    bandwidth_hz = 1e6

    [[measurement_sets]]
    name = "uid___A002_X1.ms"
    baseline_lengths_m = [20.0, 40.0, 60.0, 80.0, 100.0]

    [[measurement_sets.antennas]]
    name = "DA41"
    diameter_m = 12.0

    [[measurement_sets.antennas]]
    name = "CM01"
    diameter_m = 7.0

    [[measurement_sets.spectral_windows]]
    id = 17
    min_freq_hz = 114.5e9
    max_freq_hz = 116.5e9
    chan_width_hz = 1.0416666e6
    num_channels = 1920
    frame = "LSRK"

    [[measurement_sets.fields]]
    id = 1
    name = "M100"
    intents = ["TARGET"]
    ra_deg = 185.7288
    dec_deg = 15.8223
"#};

fn write_metadata(contents: &str, suffix: &str) -> tempfile::NamedTempFile {
    let mut f = Builder::new().suffix(suffix).tempfile().unwrap();
    f.write_all(contents.as_bytes()).unwrap();
    f.flush().unwrap();
    f
}

#[test]
fn test_read_toml() {
    let f = write_metadata(TOML_METADATA, ".toml");
    let md = ObservationMetadata::read_from_file(f.path()).unwrap();
    assert_eq!(md.telescope, "ALMA");
    assert_eq!(md.vis_names(), vec!["uid___A002_X1.ms".to_string()]);

    let spw = md.spw("uid___A002_X1.ms", 17).unwrap();
    assert_eq!(spw.frame, FreqFrame::Lsrk);
    assert_eq!(spw.spw_type, "SCIENCE");
    assert_abs_diff_eq!(spw.centre_freq_hz(), 115.5e9);
    // No effective bandwidth; use the channel width.
    assert_abs_diff_eq!(spw.effective_bw_hz(), 1.0416666e6);

    let (source, freq, bw) = md.representative_target().unwrap();
    assert_eq!(source, "M100");
    assert_abs_diff_eq!(freq, 115.27e9);
    assert_abs_diff_eq!(bw, 1e6);
}

#[test]
fn test_read_json_and_yaml() {
    let md: ObservationMetadata = toml::from_str(TOML_METADATA).unwrap();

    let f = write_metadata(&serde_json::to_string_pretty(&md).unwrap(), ".json");
    let from_json = ObservationMetadata::read_from_file(f.path()).unwrap();
    assert_eq!(from_json.vis_names(), md.vis_names());

    let f = write_metadata(&serde_yaml::to_string(&md).unwrap(), ".yaml");
    let from_yaml = ObservationMetadata::read_from_file(f.path()).unwrap();
    assert_eq!(
        from_yaml.measurement_sets[0].antennas.len(),
        md.measurement_sets[0].antennas.len()
    );
}

#[test]
fn test_bad_files() {
    let f = write_metadata(TOML_METADATA, ".txt");
    assert!(matches!(
        ObservationMetadata::read_from_file(f.path()),
        Err(MetadataError::UnknownExtension(_))
    ));

    let f = write_metadata("telescope = ", ".toml");
    assert!(matches!(
        ObservationMetadata::read_from_file(f.path()),
        Err(MetadataError::Decode { .. })
    ));

    // The band is upside down.
    let upside_down = TOML_METADATA.replace("max_freq_hz = 116.5e9", "max_freq_hz = 113.5e9");
    let f = write_metadata(&upside_down, ".toml");
    assert!(matches!(
        ObservationMetadata::read_from_file(f.path()),
        Err(MetadataError::BadSpw { spw: 17, .. })
    ));

    assert!(matches!(
        ObservationMetadata::read_from_file("/does/not/exist.toml"),
        Err(MetadataError::IO(_))
    ));
}

#[test]
fn test_antennas_and_baselines() {
    let md: ObservationMetadata = toml::from_str(TOML_METADATA).unwrap();
    let diameters = md.antenna_diameters();
    assert_eq!(diameters.get(&700), Some(&1));
    assert_eq!(diameters.get(&1200), Some(&1));
    // Sorted by diameter.
    assert_eq!(diameters.keys().copied().collect::<Vec<_>>(), vec![700, 1200]);
    assert_abs_diff_eq!(md.largest_antenna_diameter(), 12.0);
    assert_abs_diff_eq!(md.smallest_antenna_diameter(), 7.0);

    assert_abs_diff_eq!(md.representative_baseline_m(75.0).unwrap(), 80.0);
    assert_abs_diff_eq!(md.representative_baseline_m(50.0).unwrap(), 60.0);
    assert_abs_diff_eq!(md.representative_baseline_m(90.0).unwrap(), 92.0);

    let vla = vla_metadata();
    assert_eq!(vla.antenna_diameters().get(&2500), Some(&54));
}

#[test]
fn test_no_baselines() {
    let md: ObservationMetadata =
        toml::from_str(&TOML_METADATA.replace("baseline_lengths_m = [20.0, 40.0, 60.0, 80.0, 100.0]", ""))
            .unwrap();
    assert!(md.representative_baseline_m(75.0).is_none());
}

#[test]
fn test_fields() {
    let md = alma_12m_metadata();
    assert_eq!(md.field_ids("uid___A002_X1.ms", "M100", Intent::Target).unwrap(), vec![1]);
    assert!(md
        .field_ids("uid___A002_X1.ms", "M100", Intent::Phase)
        .unwrap()
        .is_empty());
    assert!(matches!(
        md.field_ids("nope.ms", "M100", Intent::Target),
        Err(MetadataError::UnknownVis(_))
    ));
    assert!(!md.is_mosaic("M100", Intent::Target));

    let mosaic = alma_12m_mosaic_metadata();
    assert!(mosaic.is_mosaic("M100", Intent::Target));
    assert_eq!(mosaic.fields_named("M100", Intent::Target).len(), 3);
    // The calibrator is only a single pointing.
    assert!(!mosaic.is_mosaic("J1229+0203", Intent::Phase));
}

#[test]
fn test_ephemeris_objects() {
    let mut md: ObservationMetadata = toml::from_str(TOML_METADATA).unwrap();
    assert!(!md.is_eph_obj("M100").unwrap());
    assert!(matches!(
        md.is_eph_obj("Mars"),
        Err(MetadataError::UnknownField(_))
    ));

    md.measurement_sets[0].fields[0].is_ephemeris = true;
    assert!(md.is_eph_obj("M100").unwrap());
}

#[test]
fn test_missing_representative_target() {
    let mut md: ObservationMetadata = toml::from_str(TOML_METADATA).unwrap();
    md.representative_target = None;
    assert!(matches!(
        md.representative_target(),
        Err(MetadataError::NoRepresentativeTarget)
    ));

    md.representative_target = Some(RepresentativeTarget {
        source: Some("M100".to_string()),
        frequency_hz: None,
        bandwidth_hz: Some(1e6),
    });
    assert!(md.representative_target().is_err());
}

#[test]
fn test_vislist_for() {
    let md = vla_metadata();
    assert_eq!(
        md.vislist_for("NGC5194", Intent::Target, &[2, 9]),
        vec!["13A-001.sb1.ms".to_string(), "13A-001.sb2.ms".to_string()]
    );
    // spw 10 doesn't exist.
    assert!(md.vislist_for("NGC5194", Intent::Target, &[2, 10]).is_empty());
    assert!(md.vislist_for("NGC5194", Intent::Phase, &[2]).is_empty());
}

#[test]
fn test_parse_spw_list() {
    assert_eq!(parse_spw_list("19,17, 17").unwrap(), vec![17, 19]);
    assert_eq!(parse_spw_list("17:114.8~115.2GHz,19").unwrap(), vec![17, 19]);
    assert!(parse_spw_list("").is_err());
    assert!(parse_spw_list("seventeen").is_err());
}

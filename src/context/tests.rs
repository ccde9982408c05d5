// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::io::Write;

use indoc::indoc;
use tempfile::{tempdir, NamedTempFile};

use super::*;
use crate::imaging::{cache::CacheKey, heuristics::ImagingMode, result::IterationRecord, Beam};

fn imaged(field: &str, error: Option<&str>) -> TcleanResult {
    let mut r = TcleanResult::new(field, Intent::Target, "17", Specmode::Cube);
    r.imagename = format!("{field}.spw17.cube");
    r.record_iteration(IterationRecord {
        iteration: 0,
        image: format!("{field}.spw17.cube.I.iter0.image"),
        ..Default::default()
    });
    match error {
        Some(e) => r.with_error(e.to_string()),
        None => {
            r.record_iteration(IterationRecord {
                iteration: 1,
                image: format!("{field}.spw17.cube.I.iter1.image"),
                pbcor: format!("{field}.spw17.cube.I.iter1.image.pbcor"),
                ..Default::default()
            });
            r.threshold = Some(Flux::from_jy(2e-3));
            r
        }
    }
}

#[test]
fn test_write_then_read() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("context.json");

    let mut context = ImagingContext {
        metadata_file: Some(PathBuf::from("obs.toml")),
        clean_list: vec![CleanTarget::new(
            "M100",
            Intent::Target,
            "17",
            Specmode::Cube,
            ImagingMode::Alma,
        )],
        ..Default::default()
    };
    context.caches.ensure_weighting(0.5, &[]);
    context.caches.beams.put(
        CacheKey::new("M100", Intent::Target, &[17], 0.5, &[]),
        Beam {
            major: 1.1,
            minor: 0.8,
            pa: -30.0,
        },
    );
    context.write(&path).unwrap();
    assert!(!path.with_extension("json.tmp").exists());

    let back = ImagingContext::read(&path).unwrap();
    assert_eq!(back, context);
}

#[test]
fn test_record_results() {
    let mut context = ImagingContext {
        clean_list: vec![
            CleanTarget::new("M100", Intent::Target, "17", Specmode::Cube, ImagingMode::Alma),
            CleanTarget::new("M101", Intent::Target, "17", Specmode::Cube, ImagingMode::Alma),
        ],
        ..Default::default()
    };
    context.record_results(&[imaged("M100", None), imaged("M101", Some("no frequency intersection"))]);

    assert!(context.clean_list.is_empty());
    assert_eq!(context.results.len(), 2);

    let good = &context.results[0];
    assert_eq!(good.iterations, 2);
    assert_eq!(good.image.as_deref(), Some("M100.spw17.cube.I.iter1.image"));
    assert_eq!(good.threshold, Some(Flux::from_jy(2e-3)));

    let bad = &context.results[1];
    assert_eq!(bad.error.as_deref(), Some("no frequency intersection"));
    assert_eq!(bad.iterations, 1);

    assert_eq!(context.pbcor_images(), vec!["M100.spw17.cube.I.iter1.image.pbcor"]);
}

#[test]
fn test_minimal_context() {
    // Everything but the clean list may be missing.
    let mut f = NamedTempFile::new().unwrap();
    f.write_all(
        indoc! {r#"
        {
            "clean_list": [
                {
                    "field": "NGC5194",
                    "intent": "TARGET",
                    "spw": "2,3,4,5,6,7,8,9",
                    "specmode": "mfs",
                    "imaging_mode": "VLA",
                    "imsize": [1024, 1024]
                }
            ]
        }
        "#}
        .as_bytes(),
    )
    .unwrap();
    let context = ImagingContext::read(f.path()).unwrap();
    assert_eq!(context.clean_list.len(), 1);
    assert_eq!(context.clean_list[0].imaging_mode, ImagingMode::Vla);
    assert_eq!(context.clean_list[0].imsize, Some([1024, 1024]));
    assert!(context.results.is_empty());
    assert!(context.caches.beams.is_empty());
}

#[test]
fn test_bad_context() {
    let mut f = NamedTempFile::new().unwrap();
    f.write_all(b"{\"clean_list\": 3}").unwrap();
    assert!(matches!(
        ImagingContext::read(f.path()),
        Err(ContextError::Decode { .. })
    ));
    assert!(matches!(
        ImagingContext::read("/does/not/exist.json"),
        Err(ContextError::IO(_))
    ));
}

// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::io::Write;

use indoc::indoc;
use tempfile::TempDir;

use crate::{get_cmd_output, make_file_in_dir, pipeline_imaging};

#[test]
fn test_makeimages_dry_run() {
    let tmp_dir = TempDir::new().unwrap();
    let (context, mut f) = make_file_in_dir("context.json", tmp_dir.path());
    f.write_all(
        indoc! {r#"
        {
            "clean_list": [
                {
                    "field": "M100",
                    "intent": "TARGET",
                    "spw": "17,19",
                    "specmode": "mfs",
                    "imaging_mode": "ALMA"
                },
                {
                    "field": "J1229+0203",
                    "intent": "PHASE",
                    "spw": "17",
                    "specmode": "mfs",
                    "imaging_mode": "ALMA"
                }
            ]
        }
        "#}
        .as_bytes(),
    )
    .unwrap();
    drop(f);

    let cmd = pipeline_imaging()
        .arg("makeimages")
        .arg("-c")
        .arg(&context)
        .arg("--dry-run")
        .ok();
    assert!(cmd.is_ok(), "{:?}", get_cmd_output(cmd));
    let (stdout, _) = get_cmd_output(cmd);
    assert!(stdout.contains("M100 (TARGET) spw 17,19 mfs"), "{stdout}");
    assert!(stdout.contains("J1229+0203 (PHASE) spw 17 mfs"), "{stdout}");
}

#[test]
fn test_makeimages_empty_clean_list() {
    let tmp_dir = TempDir::new().unwrap();
    let (context, mut f) = make_file_in_dir("context.json", tmp_dir.path());
    f.write_all(br#"{"clean_list": []}"#).unwrap();
    drop(f);

    let cmd = pipeline_imaging()
        .arg("makeimages")
        .arg("-c")
        .arg(&context)
        .ok();
    assert!(cmd.is_ok(), "{:?}", get_cmd_output(cmd));
    let (stdout, _) = get_cmd_output(cmd);
    assert!(stdout.contains("nothing to image"), "{stdout}");
}

#[test]
fn test_makeimages_needs_a_context() {
    let cmd = pipeline_imaging().args(["makeimages", "--dry-run"]).ok();
    assert!(cmd.is_err());
    let (_, stderr) = get_cmd_output(cmd);
    assert!(stderr.contains("No imaging context"), "{stderr}");
}

// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::{fs::read_to_string, io::Write};

use tempfile::TempDir;

use crate::{get_cmd_output, make_file_in_dir, pipeline_imaging};

#[test]
fn test_tclean_dry_run() {
    let cmd = pipeline_imaging()
        .args([
            "tclean", "-f", "M100", "-s", "17", "--intent", "TARGET", "--dry-run",
        ])
        .ok();
    assert!(cmd.is_ok(), "{:?}", get_cmd_output(cmd));
    let (stdout, _) = get_cmd_output(cmd);
    assert!(stdout.contains("Imaging field M100 spw 17"), "{stdout}");
    assert!(stdout.contains("Dry run"), "{stdout}");
}

#[test]
fn test_image_alias() {
    let cmd = pipeline_imaging()
        .args(["image", "-f", "M100", "-s", "17", "--dry-run"])
        .ok();
    assert!(cmd.is_ok(), "{:?}", get_cmd_output(cmd));
}

#[test]
fn test_tclean_needs_a_field() {
    let cmd = pipeline_imaging()
        .args(["tclean", "-s", "17", "--dry-run"])
        .ok();
    assert!(cmd.is_err());
    let (_, stderr) = get_cmd_output(cmd);
    assert!(stderr.contains("No field was specified"), "{stderr}");
}

#[test]
fn test_tclean_needs_metadata() {
    let cmd = pipeline_imaging()
        .args(["tclean", "-f", "M100", "-s", "17"])
        .ok();
    assert!(cmd.is_err());
    let (_, stderr) = get_cmd_output(cmd);
    assert!(stderr.contains("No observation metadata"), "{stderr}");
}

#[test]
fn test_bad_specmode() {
    let cmd = pipeline_imaging()
        .args([
            "tclean",
            "-f",
            "M100",
            "-s",
            "17",
            "--specmode",
            "line",
            "--dry-run",
        ])
        .ok();
    assert!(cmd.is_err());
    let (_, stderr) = get_cmd_output(cmd);
    assert!(stderr.contains("'line' is not a valid specmode"), "{stderr}");
}

#[test]
fn test_arg_file_with_bad_extension() {
    let tmp_dir = TempDir::new().unwrap();
    let (args_file, _) = make_file_in_dir("args.txt", tmp_dir.path());
    let cmd = pipeline_imaging()
        .arg("tclean")
        .arg(&args_file)
        .arg("--dry-run")
        .ok();
    assert!(cmd.is_err());
    let (_, stderr) = get_cmd_output(cmd);
    assert!(stderr.contains("recognised file extension"), "{stderr}");
}

#[test]
fn test_arg_file_and_save_toml() {
    let tmp_dir = TempDir::new().unwrap();
    let (args_file, mut f) = make_file_in_dir("args.toml", tmp_dir.path());
    writeln!(f, "[target]\nfield = \"NGC253\"\nspw = \"17,19\"\nniter = 500").unwrap();
    drop(f);
    let saved = tmp_dir.path().join("saved.toml");

    // CLI arguments win over the file.
    let cmd = pipeline_imaging()
        .arg("tclean")
        .arg(&args_file)
        .args(["-s", "21", "--dry-run", "--save-toml"])
        .arg(&saved)
        .ok();
    assert!(cmd.is_ok(), "{:?}", get_cmd_output(cmd));
    let (stdout, _) = get_cmd_output(cmd);
    assert!(stdout.contains("Imaging field NGC253 spw 21"), "{stdout}");

    let saved = read_to_string(saved).unwrap();
    assert!(saved.contains("NGC253"), "{saved}");
    assert!(saved.contains("niter = 500"), "{saved}");
}

#[test]
fn test_heuristics_dry_run() {
    let cmd = pipeline_imaging()
        .args(["heuristics", "-f", "J1229+0203", "-s", "19", "--dry-run"])
        .ok();
    assert!(cmd.is_ok(), "{:?}", get_cmd_output(cmd));
}

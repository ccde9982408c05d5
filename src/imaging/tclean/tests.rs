// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::io::Write;

use approx::assert_abs_diff_eq;
use indoc::indoc;
use tempfile::NamedTempFile;

use super::*;
use crate::imaging::test_helpers::*;

fn vla_inputs() -> TcleanInputs {
    TcleanInputs {
        field: "NGC5194".to_string(),
        intent: Some(Intent::Target),
        spw: "2,3".to_string(),
        imagename: Some("ngc5194".to_string()),
        cell: Some(vec!["0.5arcsec".to_string()]),
        imsize: Some([256, 256]),
        sensitivity: Some("1mJy".to_string()),
        ..Default::default()
    }
}

fn alma_inputs() -> TcleanInputs {
    TcleanInputs {
        field: "M100".to_string(),
        intent: Some(Intent::Target),
        spw: "17".to_string(),
        imagename: Some("img".to_string()),
        cell: Some(vec!["0.5arcsec".to_string()]),
        imsize: Some([128, 128]),
        sensitivity: Some("1mJy".to_string()),
        ..Default::default()
    }
}

fn run(
    inputs: TcleanInputs,
    metadata: Arc<ObservationMetadata>,
    engine: &MockEngine,
) -> Result<TcleanResult, TcleanError> {
    let mut caches = ImagingCaches::default();
    Tclean::new(inputs, metadata, engine, engine).run(&mut caches)
}

#[test]
fn test_vla_continuum() {
    let engine = MockEngine::new();
    let result = run(vla_inputs(), vla_metadata(), &engine).unwrap();
    assert!(result.is_ok(), "{:?}", result.error);

    // Dirty image plus two auto-masked passes.
    assert_eq!(result.num_iterations(), 3);
    assert_abs_diff_eq!(result.threshold.unwrap().jy, 2e-3, epsilon = 1e-12);
    let niter = result.niter.unwrap();
    assert!((60000..=64000).contains(&niter), "{niter}");

    let params = result.params.as_ref().unwrap();
    assert_eq!(params.deconvolver, Deconvolver::Mtmfs);
    assert_eq!(params.hm_masking, HmMasking::Auto);
    assert_eq!(params.hm_cleaning, HmCleaning::Rms);
    assert_eq!(params.vis.len(), 2);

    let calls = engine.cleaning_calls();
    assert_eq!(calls.len(), 2);
    for call in &calls {
        assert_eq!(call.usemask, "auto-multithresh");
        assert_eq!(call.nsigma, Some(4.5));
        assert_eq!(call.cyclefactor, Some(3.0));
        assert_eq!(call.noisethreshold, Some(5.0));
        assert_eq!(call.nterms, Some(2));
        // The PSF of the previous iteration was reused.
        assert!(!call.calcpsf);
    }
    assert_eq!(calls[0].imagename, "ngc5194.I.iter1");
    assert_eq!(calls[1].imagename, "ngc5194.I.iter2");

    let last = result.last_iteration().unwrap();
    assert_eq!(last.alpha.as_deref(), Some("ngc5194.I.iter2.alpha"));
    assert!(last.stats.is_some());
    assert!(result.image_max.is_some());
}

#[test]
fn test_alma_cube() {
    let mut cont = NamedTempFile::new().unwrap();
    cont.write_all(
        indoc! {"
            Field: M100

            SpectralWindow: 17
            114.8~115.2GHz LSRK
            115.5~116GHz LSRK
        "}
        .as_bytes(),
    )
    .unwrap();

    let engine = MockEngine::new();
    let inputs = TcleanInputs {
        specmode: Some(Specmode::Cube),
        cell: None,
        imsize: None,
        sensitivity: None,
        imagename: None,
        drcorrect: Some(1.5),
        cont_file: Some(cont.path().to_path_buf()),
        ..alma_inputs()
    };
    let result = run(inputs, alma_12m_metadata(), &engine).unwrap();
    assert!(result.is_ok(), "{:?}", result.error);
    assert_eq!(result.imagename, "uid___A002_X1.s0.M100_sci.spw17.cube");

    // One edge channel is dropped on each side.
    let params = result.params.as_ref().unwrap();
    assert_eq!(params.nchan, 1918);
    assert_eq!(params.weighting, Weighting::Briggsbwtaper);
    assert!(params.restfreq.is_some());
    assert!(params.cell[0].ends_with("arcsec"));

    // The beam and the sensitivity were calculated.
    assert_eq!(engine.state().psf_only_calls, 1);
    assert!(engine.state().sensitivity_calls > 0);
    assert_eq!(result.dr_correction_factor, Some(1.5));
    assert!(!result.max_edr_used);

    let calls = engine.state().tclean_calls.clone();
    let dirty = calls.iter().find(|c| c.imagename.ends_with("iter0")).unwrap();
    assert_eq!(dirty.specmode, "cube");
    assert_eq!(dirty.outframe.as_deref(), Some("LSRK"));
    assert_eq!(dirty.restoringbeam.as_deref(), Some("common"));
    assert_eq!(dirty.spw, vec!["17".to_string()]);

    let image = &result.last_iteration().unwrap().image;
    assert_eq!(result.mom0_fc, Some(format!("{image}.mom0_fc")));
    assert_eq!(result.mom8_fc, Some(format!("{image}.mom8_fc")));
    assert_eq!(result.mom0, Some(format!("{image}.mom0")));
    assert_eq!(result.mom8, Some(format!("{image}.mom8")));
    assert_eq!(engine.state().moments.len(), 4);
}

#[test]
fn test_moment_failures_are_not_fatal() {
    let engine = MockEngine::new();
    engine.state().fail_moments = true;
    let inputs = TcleanInputs {
        specmode: Some(Specmode::Cube),
        ..alma_inputs()
    };
    let result = run(inputs, alma_12m_metadata(), &engine).unwrap();
    assert!(result.is_ok(), "{:?}", result.error);
    assert_eq!(result.mom0, None);
    assert_eq!(result.mom8_fc, None);
}

#[test]
fn test_continuum_uses_line_free_channels() {
    let mut cont = NamedTempFile::new().unwrap();
    cont.write_all(
        indoc! {"
            Field: M100

            SpectralWindow: 17
            114.8~115.2GHz LSRK

            SpectralWindow: 19
            NONE
        "}
        .as_bytes(),
    )
    .unwrap();

    let engine = MockEngine::new();
    let inputs = TcleanInputs {
        spw: "17,19".to_string(),
        specmode: Some(Specmode::Cont),
        cont_file: Some(cont.path().to_path_buf()),
        ..alma_inputs()
    };
    let result = run(inputs, alma_12m_metadata(), &engine).unwrap();
    assert!(result.is_ok(), "{:?}", result.error);
    let calls = engine.state().tclean_calls.clone();
    assert_eq!(calls[0].spw, vec!["17:114.8~115.2GHz".to_string()]);
    assert_eq!(calls[0].specmode, "mfs");
}

#[test]
fn test_bad_spectral_setups_fail_the_target() {
    let cases = [
        TcleanInputs {
            specmode: Some(Specmode::Cube),
            start: Some("120GHz".to_string()),
            ..alma_inputs()
        },
        TcleanInputs {
            specmode: Some(Specmode::Cube),
            width: Some("2MHz".to_string()),
            nbin: Some(2),
            ..alma_inputs()
        },
        TcleanInputs {
            specmode: Some(Specmode::Cube),
            width: Some("10kHz".to_string()),
            ..alma_inputs()
        },
    ];
    for inputs in cases {
        let engine = MockEngine::new();
        let result = run(inputs.clone(), alma_12m_metadata(), &engine).unwrap();
        assert!(!result.is_ok(), "{inputs:?}");
        assert!(engine.state().tclean_calls.is_empty());
    }
}

#[test]
fn test_configuration_errors() {
    let engine = MockEngine::new();
    let result = run(
        TcleanInputs {
            hm_cleaning: Some("sensitivity".to_string()),
            ..alma_inputs()
        },
        alma_12m_metadata(),
        &engine,
    );
    assert!(matches!(result, Err(TcleanError::SensitivityCleaning)));

    let result = run(
        TcleanInputs {
            hm_cleaning: Some("bogus".to_string()),
            ..alma_inputs()
        },
        alma_12m_metadata(),
        &engine,
    );
    assert!(matches!(result, Err(TcleanError::UnknownHmCleaning(_))));

    let result = run(
        TcleanInputs {
            hm_cleaning: Some("manual".to_string()),
            ..alma_inputs()
        },
        alma_12m_metadata(),
        &engine,
    );
    assert!(matches!(result, Err(TcleanError::NoManualThreshold)));

    let result = run(
        TcleanInputs {
            hm_masking: Some("bogus".to_string()),
            ..alma_inputs()
        },
        alma_12m_metadata(),
        &engine,
    );
    assert!(matches!(result, Err(TcleanError::UnknownHmMasking(_))));

    let result = run(
        TcleanInputs {
            imaging_mode: Some("HST".to_string()),
            ..alma_inputs()
        },
        alma_12m_metadata(),
        &engine,
    );
    assert!(matches!(
        result,
        Err(TcleanError::Heuristics(HeuristicsError::UnknownImagingMode(..)))
    ));

    let result = run(
        TcleanInputs {
            drcorrect: Some(-2.0),
            ..alma_inputs()
        },
        alma_12m_metadata(),
        &engine,
    );
    assert!(matches!(
        result,
        Err(TcleanError::Heuristics(HeuristicsError::InvalidDrCorrect(_)))
    ));

    let result = run(
        TcleanInputs {
            field: String::new(),
            ..alma_inputs()
        },
        alma_12m_metadata(),
        &engine,
    );
    assert!(matches!(result, Err(TcleanError::MissingInput("field"))));

    // Nothing was imaged.
    assert!(engine.state().tclean_calls.is_empty());
}

#[test]
fn test_no_data_fails_the_target() {
    let engine = MockEngine::new();
    let result = run(
        TcleanInputs {
            field: "NGC253".to_string(),
            ..alma_inputs()
        },
        alma_12m_metadata(),
        &engine,
    )
    .unwrap();
    assert!(!result.is_ok());
    assert!(result.error.unwrap().contains("NGC253"));
}

#[test]
fn test_engine_failure_keeps_the_dirty_image() {
    let engine = MockEngine::new();
    engine.state().fail_cleaning = true;
    let result = run(alma_inputs(), alma_12m_metadata(), &engine).unwrap();
    assert!(!result.is_ok());
    assert!(result.error.as_ref().unwrap().contains("iteration 1"));
    assert_eq!(result.num_iterations(), 1);
    assert!(result.iteration(0).is_some());
}

#[test]
fn test_sensitivity_failure_fails_the_target() {
    let engine = MockEngine::new();
    engine.state().fail_sensitivity = true;
    let inputs = TcleanInputs {
        sensitivity: None,
        ..alma_inputs()
    };
    let result = run(inputs, alma_12m_metadata(), &engine).unwrap();
    assert!(!result.is_ok());
    assert!(result.error.unwrap().contains("sensitivity"));
    assert!(engine.state().tclean_calls.is_empty());
}

#[test]
fn test_alma_switches_to_central_region() {
    let engine = MockEngine::new();
    engine.state().stopcodes.push_back(7);
    engine.set_stats("residual", stats(0.05, -0.001, 1e-3));
    let result = run(alma_inputs(), alma_12m_metadata(), &engine).unwrap();
    assert!(result.is_ok(), "{:?}", result.error);

    assert_eq!(result.num_iterations(), 3);
    let first = result.iteration(1).unwrap();
    assert_eq!(first.usemask, "auto-multithresh");
    assert_eq!(first.hm_masking, Some(HmMasking::Auto));
    let second = result.iteration(2).unwrap();
    assert_eq!(second.usemask, "user");
    assert_eq!(second.hm_masking, Some(HmMasking::Centralregion));
    assert_eq!(second.cleanmask.as_deref(), Some("img.I.iter2.cleanmask"));
    // Auto-masking thresholds are too deep for a fixed mask.
    assert_abs_diff_eq!(second.threshold.jy, 2.0 * first.threshold.jy, epsilon = 1e-12);
    assert!(first.threshold.jy > 0.0);

    let calls = engine.cleaning_calls();
    assert_eq!(calls.len(), 2);
    assert!(!calls[0].calcpsf);
    // A new masking mode starts from scratch.
    assert!(calls[1].calcpsf);
    assert_eq!(calls[1].mask, "img.I.iter2.cleanmask");
    assert_ne!(calls[0].threshold, calls[1].threshold);
}

#[test]
fn test_alma_stops_after_one_pass() {
    let engine = MockEngine::new();
    let result = run(alma_inputs(), alma_12m_metadata(), &engine).unwrap();
    assert!(result.is_ok(), "{:?}", result.error);
    assert_eq!(result.num_iterations(), 2);
    assert_eq!(result.stopcode, Some(2));
    // The dirty dynamic range is 10 (0.01 Jy / 1 mJy); not enough for a
    // correction.
    assert_abs_diff_eq!(result.dirty_dynamic_range.unwrap(), 10.0, epsilon = 1e-9);
    assert_eq!(result.dr_correction_factor, Some(1.0));
}

#[test]
fn test_manual_masking() {
    let engine = MockEngine::new();
    engine.add_image("user.mask", 128);
    let inputs = TcleanInputs {
        hm_masking: Some("manual".to_string()),
        mask: Some("user.mask".to_string()),
        ..alma_inputs()
    };
    let result = run(inputs, alma_12m_metadata(), &engine).unwrap();
    assert!(result.is_ok(), "{:?}", result.error);
    assert_eq!(result.num_iterations(), 2);
    let calls = engine.cleaning_calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].usemask, "user");
    assert_eq!(calls[0].mask, "img.I.iter1.cleanmask");
    // Auto-masking parameters aren't used.
    assert_eq!(calls[0].noisethreshold, None);
}

#[test]
fn test_vlass_single_epoch() {
    let engine = MockEngine::new();
    engine.add_image("QLcatmask.mask", 512);
    let inputs = TcleanInputs {
        field: "T08t01.J123".to_string(),
        intent: Some(Intent::Target),
        spw: "2,3,4".to_string(),
        imaging_mode: Some("VLASS-SE-CONT-AWP-P001".to_string()),
        imagename: Some("se".to_string()),
        imsize: Some([512, 512]),
        mask_list: vec!["QLcatmask.mask".to_string()],
        ..Default::default()
    };
    let result = run(inputs, vlass_metadata(), &engine).unwrap();
    assert!(result.is_ok(), "{:?}", result.error);

    // Only the narrow-band PSF is made without a residual; no beam or
    // sensitivity is needed.
    let state = engine.state();
    assert_eq!(state.psf_only_calls, 1);
    assert_eq!(state.sensitivity_calls, 0);
    let prepass = &state.tclean_calls[0];
    assert_eq!(prepass.imagename, "se.I.iter0.nowb");
    assert_eq!(prepass.wbawp, Some(false));
    assert_eq!(prepass.cfcache.as_deref(), Some("se.cfcache.nowb"));
    assert_eq!(state.tclean_calls[1].cfcache.as_deref(), Some("se.cfcache"));
    assert_eq!(state.tclean_calls[1].wprojplanes, Some(1));
    assert!(state.copied.contains(&(
        "se.I.iter0.nowb.psf.tt2".to_string(),
        "se.I.iter0.psf.tt2".to_string()
    )));
    assert!(state.removed.contains(&"se.I.iter0.psf.tt0".to_string()));
    drop(state);

    assert_eq!(result.num_iterations(), 3);
    assert_eq!(result.threshold, Some(Flux::ZERO));
    assert_eq!(result.sensitivity, Some(Flux::ZERO));
    let params = result.params.as_ref().unwrap();
    assert_eq!(params.gridder, Gridder::Awproject);
    assert_eq!(params.hm_cleaning, HmCleaning::Manual);
    assert_abs_diff_eq!(params.pblimit_cleanmask, 0.4);

    let first = result.iteration(1).unwrap();
    assert_eq!(first.usemask, "user");
    assert_eq!(first.cleanmask.as_deref(), Some("se.I.iter1.cleanmask"));
    assert_eq!(first.nsigma, Some(4.5));
    let second = result.iteration(2).unwrap();
    assert_eq!(second.usemask, "pb");
    assert_eq!(second.nsigma, Some(3.0));
    let calls = engine.cleaning_calls();
    assert_eq!(calls[1].pbmask, Some(0.4));
    assert_eq!(calls[1].scales, Some(vec![0, 5, 12]));
}

#[test]
fn test_resolve_without_cleaning() {
    let engine = MockEngine::new();
    let mut caches = ImagingCaches::default();
    let params = Tclean::new(vla_inputs(), vla_metadata(), &engine, &engine)
        .resolve(&mut caches)
        .unwrap();
    assert_eq!(params.imsize, [256, 256]);
    assert_eq!(params.deconvolver, Deconvolver::Mtmfs);
    assert_eq!(params.nterms, Some(2));
    assert!(params.reffreq.is_some());
    assert!(engine.state().tclean_calls.is_empty());
}

#[test]
fn test_inputs_from_clean_target() {
    let mut target = CleanTarget::new("M100", Intent::Target, "17", Specmode::Cube, ImagingMode::Alma);
    target.sensitivity = Some(Flux::from_jy(1e-3));
    target.nbin = Some(2);
    let inputs = TcleanInputs::from(&target);
    assert_eq!(inputs.imaging_mode.as_deref(), Some("ALMA"));
    assert_eq!(inputs.sensitivity.as_deref(), Some("0.001Jy"));
    assert_eq!(inputs.nbin, Some(2));
    assert_eq!(inputs.is_mosaic, Some(false));
}

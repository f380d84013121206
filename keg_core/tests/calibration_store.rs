//! Guided calibration persisted to a JSON file.

use std::time::Duration;

use keg_core::buffer::Width;
use keg_core::store::{load_model, merge_fit};
use keg_core::{
    CalibrationError, CalibrationSession, CalibrationStore, ConditionerCfg, DiscriminatorKey,
    FieldLayout, FieldSpec, JsonFileStore, LayoutMatch, LinearFit, SessionBounds, SessionState,
    SharedCalibration,
};
use keg_traits::ManualClock;
use rstest::rstest;

fn layout() -> FieldLayout {
    FieldLayout::builder()
        .field("weight", FieldSpec::new(12, Width::W2))
        .field("state", FieldSpec::new(14, Width::W1))
        .build()
        .unwrap()
}

fn run_session(
    key: DiscriminatorKey,
    empty: i64,
    loaded: i64,
    known: f64,
) -> CalibrationSession<ManualClock> {
    let mut s = CalibrationSession::with_clock(
        key,
        known,
        SessionBounds {
            min_samples: 3,
            max_samples: 6,
            capture: Duration::from_secs(2),
        },
        &ConditionerCfg::default(),
        ManualClock::new(),
    );
    s.start().unwrap();
    s.capture().unwrap();
    for d in [0, 1, -1, 0, 2, 0] {
        s.offer(empty + d).unwrap();
    }
    s.capture().unwrap();
    // a degenerate fit fails on the last sample; callers inspect the state
    for d in [0, 1, -1, 0, 2, 0] {
        let _ = s.offer(loaded + d);
    }
    s
}

#[test]
fn calibrating_one_key_keeps_the_other() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("keg_cal.json");
    let mut store = JsonFileStore::new(&path);
    let l = layout();

    let fit_b = LinearFit {
        slope: 0.002,
        intercept: -1.0,
    };
    merge_fit(&mut store, &DiscriminatorKey::from("b"), fit_b, Some(&l)).unwrap();

    let mut s = run_session(DiscriminatorKey::from("a"), 1000, 500, 2.0);
    assert_eq!(s.state(), SessionState::Computed);
    let live = SharedCalibration::default();
    s.persist(&mut store, Some(&l), Some(&live)).unwrap();
    assert_eq!(s.state(), SessionState::Persisted);

    let (model, status) = load_model(&store, &l).unwrap().unwrap();
    assert_eq!(status, LayoutMatch::Matches);
    assert_eq!(model.fit_for(Some(&DiscriminatorKey::from("b"))), Some(&fit_b));
    let a = model.fit_for(Some(&DiscriminatorKey::from("a"))).unwrap();
    assert!((a.slope + 0.004).abs() < 1e-12);
    assert!((live.load().apply(1000.0, Some(&DiscriminatorKey::from("a")), None).unwrap()).abs() < 1e-9);

    let text = std::fs::read_to_string(&path).unwrap();
    assert!(text.contains("\"parser\""));
    assert!(text.contains("\"updated\""));
}

#[test]
fn failed_session_leaves_file_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("keg_cal.json");
    let mut store = JsonFileStore::new(&path);
    merge_fit(
        &mut store,
        &DiscriminatorKey::default(),
        LinearFit {
            slope: 1.0,
            intercept: 0.0,
        },
        None,
    )
    .unwrap();
    let before = std::fs::read_to_string(&path).unwrap();

    let mut s = run_session(DiscriminatorKey::default(), 700, 700, 2.0);
    assert_eq!(s.state(), SessionState::Failed);
    assert!(matches!(
        s.error(),
        Some(CalibrationError::DegenerateCalibration { .. })
    ));
    assert!(s.persist(&mut store, None, None).is_err());
    assert_eq!(std::fs::read_to_string(&path).unwrap(), before);
}

#[test]
fn legacy_file_is_read_as_default_key() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("keg_cal.json");
    std::fs::write(
        &path,
        r#"{"slope": 0.001, "intercept": 0.5, "temp_ref": 20.0, "temp_coeff": 0.0}"#,
    )
    .unwrap();
    let store = JsonFileStore::new(&path);
    let (model, status) = load_model(&store, &layout()).unwrap().unwrap();
    assert_eq!(status, LayoutMatch::Unrecorded);
    assert!((model.apply(1000.0, None, Some(30.0)).unwrap() - 1.5).abs() < 1e-9);
    assert!(store.load().unwrap().unwrap().points.contains_key("default"));
}

#[rstest]
#[case(&[10, 11, 12, 13], &[510, 511, 512, 513], 2.0, 0.004)]
#[case(&[2000, 2000, 2000], &[1000, 1000, 1001], 5.0, -0.005)]
fn captured_medians_drive_the_fit(
    #[case] empty: &[i64],
    #[case] loaded: &[i64],
    #[case] known: f64,
    #[case] slope: f64,
) {
    let mut s = CalibrationSession::with_clock(
        DiscriminatorKey::default(),
        known,
        SessionBounds::default(),
        &ConditionerCfg::default(),
        ManualClock::new(),
    );
    s.start().unwrap();
    s.capture().unwrap();
    for &v in empty {
        s.offer(v).unwrap();
    }
    s.proceed().unwrap();
    s.capture().unwrap();
    for &v in loaded {
        s.offer(v).unwrap();
    }
    assert_eq!(s.proceed().unwrap(), SessionState::Computed);
    let fit = s.fit().unwrap();
    assert!((fit.slope - slope).abs() < 1e-12, "slope {}", fit.slope);
}

use std::time::Duration;

use keg_sim::{CaptureReplay, CaptureWriter, SimError};
use keg_traits::{FrameSource, RawFrame};
use rstest::rstest;

const CAPTURE: &str = "\
received_ms,address,rssi,payload_hex
# warm-up
1000,AA:BB:CC:DD:EE:FF,-60,88 13 00 00
1100,AA:BB:CC:DD:EE:FF,,88:13:00:01
1200,11:22:33:44:55:66,-71,0A0B
";

#[test]
fn replays_in_file_order_then_exhausts() {
    let mut r = CaptureReplay::from_reader(CAPTURE.as_bytes()).unwrap();
    assert_eq!(r.len(), 3);

    let f = r.next_frame(Duration::ZERO).unwrap().unwrap();
    assert_eq!(f.received_ms, 1000);
    assert_eq!(f.source_id, "AA:BB:CC:DD:EE:FF");
    assert_eq!(f.rssi, Some(-60));
    assert_eq!(f.payload, vec![0x88, 0x13, 0, 0]);

    let f = r.next_frame(Duration::ZERO).unwrap().unwrap();
    assert_eq!(f.rssi, None);
    assert_eq!(f.payload, vec![0x88, 0x13, 0, 1]);

    let f = r.next_frame(Duration::ZERO).unwrap().unwrap();
    assert_eq!(f.payload, vec![0x0A, 0x0B]);

    assert!(r.is_exhausted());
    assert!(r.next_frame(Duration::ZERO).unwrap().is_none());
}

#[rstest]
#[case("received_ms,address,rssi,payload_hex\n10,A,,ZZ\n", true)]
#[case("received_ms,address,rssi,payload_hex\n10,A,,ABC\n", true)]
#[case("received_ms,address,rssi,payload_hex\nten,A,,AB\n", false)]
#[case("received_ms,address,rssi,payload_hex\n10,,,AB\n", false)]
#[case("received_ms,address,rssi,payload_hex\n10,A,loud,AB\n", false)]
fn malformed_rows_name_their_line(#[case] text: &str, #[case] hex_error: bool) {
    let err = CaptureReplay::from_reader(text.as_bytes()).unwrap_err();
    match err {
        SimError::BadHex { line, .. } => {
            assert!(hex_error);
            assert_eq!(line, 2);
        }
        SimError::Parse { line, .. } => {
            assert!(!hex_error);
            assert_eq!(line, 2);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn writer_output_replays() {
    let frames = vec![
        RawFrame::new("AA:01", 5, vec![1, 2, 3]).with_rssi(-50),
        RawFrame::new("AA:02", 9, vec![0xFF]),
    ];
    let mut w = CaptureWriter::new(Vec::new()).unwrap();
    for f in &frames {
        w.write(f).unwrap();
    }
    let bytes = w.into_inner().unwrap();
    let r = CaptureReplay::from_reader(bytes.as_slice()).unwrap();
    assert_eq!(r.frames(), frames.as_slice());
}

#[test]
fn from_path_reads_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cap.csv");
    std::fs::write(&path, CAPTURE).unwrap();
    let r = CaptureReplay::from_path(&path).unwrap();
    assert_eq!(r.remaining(), 3);
    assert!(CaptureReplay::from_path(dir.path().join("missing.csv")).is_err());
}

#[test]
fn empty_capture_is_exhausted() {
    let r = CaptureReplay::from_reader("received_ms,address,rssi,payload_hex\n".as_bytes()).unwrap();
    assert!(r.is_empty());
    assert!(r.is_exhausted());
}

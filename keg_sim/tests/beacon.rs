use std::time::Duration;

use keg_config::{EndianCfg, FieldCfg, LayoutCfg};
use keg_sim::{NoiseProfile, SimulatedBeacon};
use keg_traits::FrameSource;

fn field(name: &str, offset: usize, width: u8, endian: EndianCfg, signed: bool) -> FieldCfg {
    FieldCfg {
        name: name.into(),
        offset,
        width,
        endian,
        signed,
        shift: 0,
        mask: None,
    }
}

fn layout() -> LayoutCfg {
    LayoutCfg {
        frame_len: Some(10),
        fields: vec![
            field("weight", 0, 4, EndianCfg::Le, true),
            field("temperature", 4, 2, EndianCfg::Be, true),
            field("battery", 6, 1, EndianCfg::Le, false),
            field("state", 7, 1, EndianCfg::Le, false),
            field("sequence", 8, 2, EndianCfg::Le, false),
        ],
    }
}

#[test]
fn encodes_control_values_into_layout() {
    let mut b = SimulatedBeacon::new("AA:BB", layout());
    let ctl = b.control();
    ctl.set_weight(-1234);
    ctl.set_temperature(215);
    ctl.set_battery(90);
    ctl.set_state(3);

    let first = b.next_frame(Duration::ZERO).unwrap().unwrap();
    assert_eq!(first.payload.len(), 10);
    assert_eq!(i32::from_le_bytes(first.payload[0..4].try_into().unwrap()), -1234);
    assert_eq!(i16::from_be_bytes([first.payload[4], first.payload[5]]), 215);
    assert_eq!(first.payload[6], 90);
    assert_eq!(first.payload[7], 3);
    assert_eq!(u16::from_le_bytes([first.payload[8], first.payload[9]]), 0);
    assert_eq!(first.source_id, "AA:BB");
    assert_eq!(first.received_ms, 0);

    ctl.set_weight(5000);
    let second = b.next_frame(Duration::ZERO).unwrap().unwrap();
    assert_eq!(i32::from_le_bytes(second.payload[0..4].try_into().unwrap()), 5000);
    assert_eq!(u16::from_le_bytes([second.payload[8], second.payload[9]]), 1);
    assert_eq!(second.received_ms, 100);
}

#[test]
fn limit_exhausts_source() {
    let mut b = SimulatedBeacon::new("X", layout()).with_limit(2);
    assert!(!b.is_exhausted());
    assert!(b.next_frame(Duration::ZERO).unwrap().is_some());
    assert!(b.next_frame(Duration::ZERO).unwrap().is_some());
    assert!(b.is_exhausted());
    assert!(b.next_frame(Duration::ZERO).unwrap().is_none());
}

#[test]
fn noise_stays_within_amplitude_and_spikes_land() {
    let noise = NoiseProfile {
        amplitude: 5,
        spike_every: 10,
        spike_height: 10_000,
    };
    let mut b = SimulatedBeacon::new("X", layout()).with_noise(noise, 7);
    b.control().set_weight(1000);
    for seq in 0..40u64 {
        let f = b.next_frame(Duration::ZERO).unwrap().unwrap();
        let w = i64::from(i32::from_le_bytes(f.payload[0..4].try_into().unwrap()));
        if seq > 0 && seq % 10 == 0 {
            assert!((w - 11_000).abs() <= 5, "seq {seq}: {w}");
        } else {
            assert!((w - 1000).abs() <= 5, "seq {seq}: {w}");
        }
    }
}

#[test]
fn masked_flag_shares_byte_with_state() {
    let mut l = layout();
    l.fields.retain(|f| f.name != "battery");
    l.fields.push(FieldCfg {
        name: "battery".into(),
        offset: 7,
        width: 1,
        endian: EndianCfg::Le,
        signed: false,
        shift: 4,
        mask: Some(0x0F),
    });
    l.fields.retain(|f| f.name != "state");
    l.fields.push(FieldCfg {
        name: "state".into(),
        offset: 7,
        width: 1,
        endian: EndianCfg::Le,
        signed: false,
        shift: 0,
        mask: Some(0x0F),
    });
    let mut b = SimulatedBeacon::new("X", l);
    let ctl = b.control();
    ctl.set_battery(0xA);
    ctl.set_state(0x5);
    let f = b.next_frame(Duration::ZERO).unwrap().unwrap();
    assert_eq!(f.payload[7], 0xA5);
}

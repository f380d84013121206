use keg_core::buffer::{Endian, Width};
use keg_core::conditioner::Verdict;
use keg_core::{ConditionerCfg, FieldLayout, FieldSpec, FrameDecoder, HampelFilter, SignalConditioner};
use proptest::prelude::*;
use std::sync::Arc;

prop_compose! {
    fn field_spec()(
        offset in 0usize..24,
        width in prop_oneof![Just(Width::W1), Just(Width::W2), Just(Width::W4)],
        big in any::<bool>(),
        signed in any::<bool>(),
        shift_frac in 0u8..8,
    ) -> FieldSpec {
        let mut s = FieldSpec::new(offset, width).shift(shift_frac % width.bits());
        if big {
            s = s.big_endian();
        }
        if signed {
            s = s.signed();
        }
        s
    }
}

proptest! {
    #[test]
    fn decoder_never_panics_and_short_means_absent(
        specs in prop::collection::vec(field_spec(), 1..6),
        payload in prop::collection::vec(any::<u8>(), 0..32),
    ) {
        let mut b = FieldLayout::builder();
        for (i, s) in specs.iter().enumerate() {
            b = b.field(format!("f{i}"), *s);
        }
        let layout = b.build().unwrap();
        let decoded = FrameDecoder::new(Arc::new(layout)).decode_bytes(&payload);
        for (i, s) in specs.iter().enumerate() {
            let v = decoded.get(&format!("f{i}"));
            let fits = s.offset + s.width.bytes() <= payload.len();
            prop_assert_eq!(v.is_some(), fits);
        }
        prop_assert_eq!(decoded.frame_len, payload.len());
    }

    #[test]
    fn unsigned_values_fit_their_width(
        offset in 0usize..8,
        payload in prop::collection::vec(any::<u8>(), 12..16),
        big in any::<bool>(),
    ) {
        let spec = FieldSpec::new(offset, Width::W4);
        let spec = if big { spec.big_endian() } else { spec };
        let layout = FieldLayout::builder().field("v", spec).build().unwrap();
        let v = FrameDecoder::new(Arc::new(layout)).decode_bytes(&payload).get("v").unwrap();
        prop_assert!((0..=i64::from(u32::MAX)).contains(&v));
        let bytes: [u8; 4] = payload[offset..offset + 4].try_into().unwrap();
        let expect = match spec.endian {
            Endian::Little => u32::from_le_bytes(bytes),
            Endian::Big => u32::from_be_bytes(bytes),
        };
        prop_assert_eq!(v, i64::from(expect));
    }

    #[test]
    fn constant_input_commits_its_value(level in -100_000i64..100_000, extra in 0usize..10) {
        let mut c = SignalConditioner::new(ConditionerCfg::default());
        for i in 0..(5 + extra) {
            let s = c.update(level);
            prop_assert!(!s.rejected);
            prop_assert_eq!(s.instantaneous, Some(level as f64));
            if i >= 4 {
                prop_assert_eq!(s.committed, Some(level as f64));
            } else {
                prop_assert_eq!(s.committed, None);
            }
        }
    }

    #[test]
    fn steep_ramp_never_commits(start in -10_000i64..10_000, step in 2i64..50, n in 5usize..60) {
        let mut c = SignalConditioner::new(ConditionerCfg::default());
        for i in 0..n {
            let s = c.update(start + step * i as i64);
            prop_assert_eq!(s.committed, None);
        }
    }

    #[test]
    fn step_change_accepted_within_window(a in -5_000i64..5_000, jump in 100i64..10_000) {
        let k = 7;
        let mut h = HampelFilter::new(k, 3.5);
        for _ in 0..k {
            h.check(a);
        }
        let b = a + jump;
        let mut accepted_at = None;
        for i in 0..k {
            if matches!(h.check(b), Verdict::Accepted) {
                accepted_at = Some(i);
                break;
            }
        }
        prop_assert!(accepted_at.is_some());
    }

    #[test]
    fn isolated_spikes_never_reject_twice_in_a_row(
        level in 0i64..10_000,
        gaps in prop::collection::vec(7usize..20, 1..6),
        height in 500i64..100_000,
    ) {
        let mut h = HampelFilter::new(7, 3.5);
        // small deterministic noise so MAD is not zero
        let noisy = |i: usize| level + (i % 3) as i64 - 1;
        let mut i = 0usize;
        for _ in 0..7 {
            h.check(noisy(i));
            i += 1;
        }
        let mut prev_rejected = false;
        for gap in gaps {
            let spike = h.check(level + height);
            let spike_rejected = matches!(spike, Verdict::Rejected { .. });
            prop_assert!(spike_rejected);
            prop_assert!(!prev_rejected);
            prev_rejected = true;
            for _ in 0..gap {
                let rejected = matches!(h.check(noisy(i)), Verdict::Rejected { .. });
                prop_assert!(!(rejected && prev_rejected));
                prev_rejected = rejected;
                i += 1;
            }
        }
    }
}

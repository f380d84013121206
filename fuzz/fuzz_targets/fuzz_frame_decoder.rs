#![no_main]
use keg_core::{Endian, FieldLayout, FieldSpec, FrameDecoder, Width};
use libfuzzer_sys::{arbitrary, fuzz_target};
use std::sync::Arc;

#[derive(Debug, arbitrary::Arbitrary)]
struct Input {
    offset: u8,
    width: u8,
    big_endian: bool,
    signed: bool,
    shift: u8,
    mask: Option<u32>,
    payload: Vec<u8>,
}

fuzz_target!(|input: Input| {
    let width = match input.width % 3 {
        0 => Width::W1,
        1 => Width::W2,
        _ => Width::W4,
    };
    let mut spec = FieldSpec::new(usize::from(input.offset), width);
    spec.endian = if input.big_endian { Endian::Big } else { Endian::Little };
    spec.signed = input.signed;
    spec.shift = input.shift;
    spec.mask = input.mask;
    // Invalid combinations are rejected at build time; valid ones must decode any payload.
    let Ok(layout) = FieldLayout::builder().field("f", spec).build() else {
        return;
    };
    let decoder = FrameDecoder::new(Arc::new(layout));
    let decoded = decoder.decode_bytes(&input.payload);
    let end = usize::from(input.offset) + width.bytes();
    assert_eq!(decoded.get("f").is_some(), input.payload.len() >= end);
});

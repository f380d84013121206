//! Apply a `FieldLayout` to raw bytes.
//!
//! Decoding never fails on input data: a field that does not fit in the
//! frame is `None`, and the rest of the frame still decodes. A frame with
//! no present fields is still a valid `DecodedFrame`; callers decide
//! whether to discard it.

use std::sync::Arc;

use keg_traits::RawFrame;

use crate::buffer::FrameBuffer;
use crate::layout::{FieldLayout, FieldSpec};

/// Raw integer values of one received frame. No physical units yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedFrame {
    pub source_id: String,
    pub received_ms: u64,
    pub rssi: Option<i16>,
    pub frame_len: usize,
    fields: Vec<(Arc<str>, Option<i64>)>,
}

impl DecodedFrame {
    /// Value of `name`, `None` when absent from this frame or unknown to the layout.
    pub fn get(&self, name: &str) -> Option<i64> {
        self.fields
            .iter()
            .find(|(n, _)| n.as_ref() == name)
            .and_then(|(_, v)| *v)
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, Option<i64>)> {
        self.fields.iter().map(|(n, v)| (n.as_ref(), *v))
    }

    pub fn present_count(&self) -> usize {
        self.fields.iter().filter(|(_, v)| v.is_some()).count()
    }

    /// True when no field of the layout fit in the frame.
    pub fn is_blank(&self) -> bool {
        self.present_count() == 0
    }
}

/// Extract one field: read, shift, mask.
///
/// Unsigned values shift logically; signed values are sign-extended by the
/// read and shift arithmetically, so the sign survives.
#[inline]
pub fn extract(spec: &FieldSpec, buf: &FrameBuffer<'_>) -> Option<i64> {
    let v = buf.read(spec.offset, spec.width, spec.endian, spec.signed)?;
    let v = v >> spec.shift;
    Some(match spec.mask {
        Some(mask) => v & i64::from(mask),
        None => v,
    })
}

/// Decodes frames with one fixed layout.
#[derive(Debug, Clone)]
pub struct FrameDecoder {
    layout: Arc<FieldLayout>,
}

impl FrameDecoder {
    pub fn new(layout: Arc<FieldLayout>) -> Self {
        Self { layout }
    }

    pub fn layout(&self) -> &FieldLayout {
        &self.layout
    }

    pub fn decode(&self, frame: &RawFrame) -> DecodedFrame {
        let mut out = self.decode_bytes(&frame.payload);
        out.source_id.clone_from(&frame.source_id);
        out.received_ms = frame.received_ms;
        out.rssi = frame.rssi;
        out
    }

    /// Decode a bare payload with no source metadata.
    pub fn decode_bytes(&self, payload: &[u8]) -> DecodedFrame {
        let buf = FrameBuffer::new(payload);
        let fields = self
            .layout
            .entries()
            .iter()
            .map(|(name, spec)| (Arc::clone(name), extract(spec, &buf)))
            .collect();
        DecodedFrame {
            source_id: String::new(),
            received_ms: 0,
            rssi: None,
            frame_len: buf.len(),
            fields,
        }
    }
}

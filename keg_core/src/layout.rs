//! Declarative frame layout: where each semantic field lives.
//!
//! A `FieldLayout` is plain data, validated once by `FieldLayoutBuilder::build`.
//! Frames shorter than a field simply decode that field as absent.

use std::sync::Arc;

use crate::buffer::{Endian, Width};
use crate::error::LayoutError;

/// Conventional field names. Layouts may use any other name as well.
pub mod names {
    pub const WEIGHT: &str = "weight";
    pub const TEMPERATURE: &str = "temperature";
    pub const BATTERY: &str = "battery";
    pub const STATE: &str = "state";
    pub const SEQUENCE: &str = "sequence";
}

/// Location and encoding of one field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    pub offset: usize,
    pub width: Width,
    pub endian: Endian,
    pub signed: bool,
    /// Right shift applied after the read (logical for unsigned, arithmetic for signed).
    pub shift: u8,
    /// Applied after the shift. Unsigned fields only.
    pub mask: Option<u32>,
}

impl FieldSpec {
    /// Unsigned little-endian field, no shift, no mask.
    pub const fn new(offset: usize, width: Width) -> Self {
        Self {
            offset,
            width,
            endian: Endian::Little,
            signed: false,
            shift: 0,
            mask: None,
        }
    }

    pub const fn big_endian(mut self) -> Self {
        self.endian = Endian::Big;
        self
    }

    pub const fn signed(mut self) -> Self {
        self.signed = true;
        self
    }

    pub const fn shift(mut self, shift: u8) -> Self {
        self.shift = shift;
        self
    }

    pub const fn mask(mut self, mask: u32) -> Self {
        self.mask = Some(mask);
        self
    }

    /// One past the last byte this field reads. `None` on overflow.
    #[inline]
    pub fn end(&self) -> Option<usize> {
        self.offset.checked_add(self.width.bytes())
    }

    fn validate(&self, name: &str, frame_len: Option<usize>) -> Result<(), LayoutError> {
        let Some(end) = self.end() else {
            return Err(LayoutError::OffsetOverflow {
                name: name.to_string(),
                offset: self.offset,
            });
        };
        if self.shift >= self.width.bits() {
            return Err(LayoutError::ShiftTooLarge {
                name: name.to_string(),
                shift: self.shift,
                bits: self.width.bits(),
            });
        }
        match self.mask {
            Some(0) => {
                return Err(LayoutError::ZeroMask {
                    name: name.to_string(),
                });
            }
            Some(_) if self.signed => {
                return Err(LayoutError::SignedMask {
                    name: name.to_string(),
                });
            }
            _ => {}
        }
        if let Some(frame_len) = frame_len
            && end > frame_len
        {
            return Err(LayoutError::PastFrameEnd {
                name: name.to_string(),
                end,
                frame_len,
            });
        }
        Ok(())
    }
}

/// Immutable, validated set of named fields. Field order is declaration order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldLayout {
    fields: Vec<(Arc<str>, FieldSpec)>,
    frame_len: Option<usize>,
}

impl FieldLayout {
    pub fn builder() -> FieldLayoutBuilder {
        FieldLayoutBuilder::default()
    }

    pub fn get(&self, name: &str) -> Option<&FieldSpec> {
        self.fields
            .iter()
            .find(|(n, _)| n.as_ref() == name)
            .map(|(_, s)| s)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldSpec)> {
        self.fields.iter().map(|(n, s)| (n.as_ref(), s))
    }

    /// Shared handles to the field names, in declaration order.
    pub(crate) fn entries(&self) -> &[(Arc<str>, FieldSpec)] {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn frame_len(&self) -> Option<usize> {
        self.frame_len
    }

    /// Shortest frame in which every field is present.
    pub fn min_complete_len(&self) -> usize {
        self.fields
            .iter()
            .filter_map(|(_, s)| s.end())
            .max()
            .unwrap_or(0)
    }
}

#[derive(Debug, Default)]
pub struct FieldLayoutBuilder {
    fields: Vec<(Arc<str>, FieldSpec)>,
    frame_len: Option<usize>,
}

impl FieldLayoutBuilder {
    pub fn field(mut self, name: impl Into<Arc<str>>, spec: FieldSpec) -> Self {
        self.fields.push((name.into(), spec));
        self
    }

    /// Declare the expected frame length; fields reaching past it are rejected.
    pub fn frame_len(mut self, len: usize) -> Self {
        self.frame_len = Some(len);
        self
    }

    pub fn build(self) -> Result<FieldLayout, LayoutError> {
        if self.fields.is_empty() {
            return Err(LayoutError::Empty);
        }
        for (i, (name, spec)) in self.fields.iter().enumerate() {
            if name.trim().is_empty() {
                return Err(LayoutError::EmptyName);
            }
            if self.fields[..i].iter().any(|(n, _)| n == name) {
                return Err(LayoutError::DuplicateField(name.to_string()));
            }
            spec.validate(name, self.frame_len)?;
        }
        Ok(FieldLayout {
            fields: self.fields,
            frame_len: self.frame_len,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn weight_only() -> FieldLayoutBuilder {
        FieldLayout::builder().field(names::WEIGHT, FieldSpec::new(12, Width::W2))
    }

    #[test]
    fn builds_and_looks_up_fields() {
        let layout = weight_only()
            .field(names::STATE, FieldSpec::new(14, Width::W2).big_endian())
            .frame_len(17)
            .build()
            .unwrap();
        assert_eq!(layout.len(), 2);
        assert_eq!(layout.get(names::STATE).map(|s| s.endian), Some(Endian::Big));
        assert!(!layout.contains(names::BATTERY));
        assert_eq!(layout.min_complete_len(), 16);
        let order: Vec<&str> = layout.iter().map(|(n, _)| n).collect();
        assert_eq!(order, [names::WEIGHT, names::STATE]);
    }

    #[test]
    fn rejects_duplicates_and_empty() {
        assert_eq!(FieldLayout::builder().build(), Err(LayoutError::Empty));
        let err = weight_only()
            .field(names::WEIGHT, FieldSpec::new(0, Width::W1))
            .build()
            .unwrap_err();
        assert_eq!(err, LayoutError::DuplicateField("weight".into()));
        let err = FieldLayout::builder()
            .field("  ", FieldSpec::new(0, Width::W1))
            .build()
            .unwrap_err();
        assert_eq!(err, LayoutError::EmptyName);
    }

    #[test]
    fn rejects_static_overflow_and_bad_bits() {
        let err = weight_only().frame_len(13).build().unwrap_err();
        assert!(matches!(err, LayoutError::PastFrameEnd { end: 14, frame_len: 13, .. }));

        let err = FieldLayout::builder()
            .field("x", FieldSpec::new(usize::MAX - 1, Width::W4))
            .build()
            .unwrap_err();
        assert!(matches!(err, LayoutError::OffsetOverflow { .. }));

        let err = FieldLayout::builder()
            .field("x", FieldSpec::new(0, Width::W1).shift(8))
            .build()
            .unwrap_err();
        assert!(matches!(err, LayoutError::ShiftTooLarge { bits: 8, .. }));

        let err = FieldLayout::builder()
            .field("x", FieldSpec::new(0, Width::W2).mask(0))
            .build()
            .unwrap_err();
        assert!(matches!(err, LayoutError::ZeroMask { .. }));

        let err = FieldLayout::builder()
            .field("x", FieldSpec::new(0, Width::W2).signed().mask(0xFF))
            .build()
            .unwrap_err();
        assert!(matches!(err, LayoutError::SignedMask { .. }));
    }
}

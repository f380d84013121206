//! Writes values into a payload according to a layout; the inverse of decoding.

use keg_config::{EndianCfg, FieldCfg};

use crate::error::{Result, SimError};

/// Store `value` into `buf` at the field's position, applying mask and shift
/// in reverse. Bytes outside the field are left alone.
pub fn put_field(buf: &mut [u8], field: &FieldCfg, value: i64) -> Result<()> {
    let width = usize::from(field.width);
    if !matches!(width, 1 | 2 | 4) {
        return Err(SimError::Encode {
            name: field.name.clone(),
            msg: format!("unsupported width {width}"),
        });
    }
    let end = field
        .offset
        .checked_add(width)
        .filter(|&e| e <= buf.len())
        .ok_or_else(|| SimError::Encode {
            name: field.name.clone(),
            msg: format!("does not fit a {}-byte frame", buf.len()),
        })?;
    let masked = match field.mask {
        Some(m) => value & i64::from(m),
        None => value,
    };
    let shifted = masked.checked_shl(u32::from(field.shift)).unwrap_or(0);
    // two's complement truncation to the field width
    let bytes = shifted.to_le_bytes();
    let dst = &mut buf[field.offset..end];
    match field.endian {
        EndianCfg::Le => dst.copy_from_slice(&bytes[..width]),
        EndianCfg::Be => {
            for (d, s) in dst.iter_mut().zip(bytes[..width].iter().rev()) {
                *d = *s;
            }
        }
    }
    Ok(())
}

/// Merge `value` into bits of a field that other fields share (e.g. a flag bit
/// inside a state byte): only bits selected by the mask are replaced.
pub fn or_field(buf: &mut [u8], field: &FieldCfg, value: i64) -> Result<()> {
    let Some(mask) = field.mask else {
        return put_field(buf, field, value);
    };
    let width = usize::from(field.width);
    let mut scratch = buf.to_vec();
    put_field(&mut scratch, field, value)?;
    let keep = (!(u64::from(mask) << field.shift)).to_le_bytes();
    for (i, &keep_byte) in keep.iter().enumerate().take(width) {
        let idx = match field.endian {
            EndianCfg::Le => field.offset + i,
            EndianCfg::Be => field.offset + width - 1 - i,
        };
        buf[idx] = (buf[idx] & keep_byte) | (scratch[idx] & !keep_byte);
    }
    Ok(())
}

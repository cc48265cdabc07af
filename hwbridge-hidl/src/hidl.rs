// SPDX-FileCopyrightText: 2025 hwbridge contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! HIDL value types and their scatter-gather layout.
//!
//! A HIDL struct is written as one parent buffer holding its inline bytes.
//! Fields that own out-of-line data (`hidl_string`, `hidl_vec`, `hidl_handle`)
//! leave a 16-byte slot in the parent and append an embedded buffer pointing
//! back at that slot:
//!
//! ```text
//! hidl_string / hidl_vec slot:
//!   [0x00] pointer: u64   (patched by the driver, zero on the wire)
//!   [0x08] size: u32      (bytes for strings, elements for vectors)
//!   [0x0C] owns_buffer: u8
//!   [0x0D] padding
//! ```

use hwbridge_common::{BufferHandle, HidlError, Result};

use crate::parcel::{NativeHandle, Parcel, Placement};

/// Inline size of `hidl_string`, `hidl_vec` and `hidl_handle`.
pub const HIDL_SLOT_SIZE: usize = 16;

const SIZE_OFFSET: usize = 8;

/// A value with a fixed inline layout plus optional out-of-line children.
///
/// Writing happens in two passes: the parent collects every field's inline
/// bytes, then each field appends its embedded buffers against the parent's
/// handle. Reading mirrors that order.
pub trait Embedded: Sized {
    const INLINE_SIZE: usize;

    /// Fill `out` (exactly `INLINE_SIZE` bytes) with the inline layout.
    fn write_inline(&self, out: &mut [u8]);

    /// Append out-of-line data; `offset` is where this value's inline bytes
    /// start inside `parent`.
    fn write_embedded(&self, _parcel: &mut Parcel, _parent: BufferHandle, _offset: usize) -> Result<()> {
        Ok(())
    }

    /// Rebuild the value from its inline bytes and any embedded buffers that
    /// follow at the cursor.
    fn read_embedded(inline: &[u8], parcel: &mut Parcel, parent: BufferHandle, offset: usize) -> Result<Self>;
}

macro_rules! impl_embedded_scalar {
    ($($ty:ty),* $(,)?) => {
        $(
            impl Embedded for $ty {
                const INLINE_SIZE: usize = std::mem::size_of::<$ty>();

                fn write_inline(&self, out: &mut [u8]) {
                    out.copy_from_slice(&self.to_le_bytes());
                }

                fn read_embedded(inline: &[u8], _: &mut Parcel, _: BufferHandle, _: usize) -> Result<Self> {
                    let mut bytes = [0u8; std::mem::size_of::<$ty>()];
                    bytes.copy_from_slice(inline);
                    Ok(<$ty>::from_le_bytes(bytes))
                }
            }
        )*
    };
}

impl_embedded_scalar!(i8, u8, i16, u16, i32, u32, i64, u64, f32, f64);

impl Embedded for bool {
    const INLINE_SIZE: usize = 1;

    fn write_inline(&self, out: &mut [u8]) {
        out[0] = *self as u8;
    }

    fn read_embedded(inline: &[u8], _: &mut Parcel, _: BufferHandle, _: usize) -> Result<Self> {
        Ok(inline[0] != 0)
    }
}

fn write_slot(out: &mut [u8], size: usize) {
    out.fill(0);
    out[SIZE_OFFSET..SIZE_OFFSET + 4].copy_from_slice(&(size as u32).to_le_bytes());
}

fn slot_size(inline: &[u8]) -> usize {
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&inline[SIZE_OFFSET..SIZE_OFFSET + 4]);
    u32::from_le_bytes(bytes) as usize
}

// ── hidl_string ─────────────────────────────────────────────────────────────

impl Embedded for String {
    const INLINE_SIZE: usize = HIDL_SLOT_SIZE;

    fn write_inline(&self, out: &mut [u8]) {
        write_slot(out, self.len());
    }

    fn write_embedded(&self, parcel: &mut Parcel, parent: BufferHandle, offset: usize) -> Result<()> {
        let mut bytes = Vec::with_capacity(self.len() + 1);
        bytes.extend_from_slice(self.as_bytes());
        bytes.push(0);
        parcel.write_embedded_buffer(&bytes, parent, offset)?;
        Ok(())
    }

    fn read_embedded(inline: &[u8], parcel: &mut Parcel, parent: BufferHandle, offset: usize) -> Result<Self> {
        let len = slot_size(inline);
        let (_, raw) = parcel.read_embedded_buffer(len + 1, parent, offset)?;
        if raw[len] != 0 {
            return Err(HidlError::io("read hidl_string", "missing terminator"));
        }
        String::from_utf8(raw[..len].to_vec())
            .map_err(|e| HidlError::io("read hidl_string", e.to_string()))
    }
}

// ── hidl_vec ────────────────────────────────────────────────────────────────

impl<T: Embedded> Embedded for Vec<T> {
    const INLINE_SIZE: usize = HIDL_SLOT_SIZE;

    fn write_inline(&self, out: &mut [u8]) {
        write_slot(out, self.len());
    }

    fn write_embedded(&self, parcel: &mut Parcel, parent: BufferHandle, offset: usize) -> Result<()> {
        let stride = T::INLINE_SIZE;
        let mut elements = vec![0u8; self.len() * stride];
        for (value, out) in self.iter().zip(elements.chunks_exact_mut(stride.max(1))) {
            value.write_inline(out);
        }

        let array = parcel.write_embedded_buffer(&elements, parent, offset)?;
        for (index, value) in self.iter().enumerate() {
            value.write_embedded(parcel, array, index * stride)?;
        }
        Ok(())
    }

    fn read_embedded(inline: &[u8], parcel: &mut Parcel, parent: BufferHandle, offset: usize) -> Result<Self> {
        let count = slot_size(inline);
        let stride = T::INLINE_SIZE;
        let total = count.checked_mul(stride).ok_or_else(|| {
            HidlError::io("read hidl_vec", format!("{} elements of {} bytes overflow", count, stride))
        })?;

        let (array, raw) = parcel.read_embedded_buffer(total, parent, offset)?;
        let raw = raw.to_vec();
        let mut values = Vec::with_capacity(count);
        for index in 0..count {
            let start = index * stride;
            values.push(T::read_embedded(&raw[start..start + stride], parcel, array, start)?);
        }
        Ok(values)
    }
}

// ── hidl_handle ─────────────────────────────────────────────────────────────

// `None` is the null handle.
impl Embedded for Option<NativeHandle> {
    const INLINE_SIZE: usize = HIDL_SLOT_SIZE;

    fn write_inline(&self, out: &mut [u8]) {
        out.fill(0);
    }

    fn write_embedded(&self, parcel: &mut Parcel, parent: BufferHandle, offset: usize) -> Result<()> {
        parcel.write_native_handle_no_dup(self.as_ref(), Placement::Embedded { parent, offset })
    }

    fn read_embedded(_: &[u8], parcel: &mut Parcel, parent: BufferHandle, offset: usize) -> Result<Self> {
        parcel.read_native_handle_no_dup(Placement::Embedded { parent, offset })
    }
}

// ── Parcel helpers ──────────────────────────────────────────────────────────

/// Top-level HIDL values on a [`Parcel`].
pub trait ParcelExt {
    /// Write `value` as a parent buffer followed by its embedded children.
    fn write_hidl<T: Embedded>(&mut self, value: &T) -> Result<BufferHandle>;

    fn read_hidl<T: Embedded>(&mut self) -> Result<T>;

    fn write_hidl_string(&mut self, value: &str) -> Result<BufferHandle>;

    fn read_hidl_string(&mut self) -> Result<String>;

    /// Children of a field at `offset` inside an already written parent.
    fn write_embedded<T: Embedded>(&mut self, value: &T, parent: BufferHandle, offset: usize) -> Result<()>;

    fn read_embedded<T: Embedded>(&mut self, inline: &[u8], parent: BufferHandle, offset: usize) -> Result<T>;
}

impl ParcelExt for Parcel {
    fn write_hidl<T: Embedded>(&mut self, value: &T) -> Result<BufferHandle> {
        let mut inline = vec![0u8; T::INLINE_SIZE];
        value.write_inline(&mut inline);
        let handle = self.write_buffer(&inline)?;
        value.write_embedded(self, handle, 0)?;
        Ok(handle)
    }

    fn read_hidl<T: Embedded>(&mut self) -> Result<T> {
        let (handle, inline) = self.read_buffer(T::INLINE_SIZE)?;
        let inline = inline.to_vec();
        T::read_embedded(&inline, self, handle, 0)
    }

    fn write_hidl_string(&mut self, value: &str) -> Result<BufferHandle> {
        self.write_hidl(&value.to_string())
    }

    fn read_hidl_string(&mut self) -> Result<String> {
        self.read_hidl::<String>()
    }

    fn write_embedded<T: Embedded>(&mut self, value: &T, parent: BufferHandle, offset: usize) -> Result<()> {
        value.write_embedded(self, parent, offset)
    }

    fn read_embedded<T: Embedded>(&mut self, inline: &[u8], parent: BufferHandle, offset: usize) -> Result<T> {
        T::read_embedded(inline, self, parent, offset)
    }
}

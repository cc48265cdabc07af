// SPDX-FileCopyrightText: 2025 hwbridge contributors
// SPDX-License-Identifier: GPL-3.0-or-later

/// Index of a buffer object inside a parcel's object table.
pub type BufferHandle = usize;

/// OS file descriptor carried by a native handle.
pub type RawFd = i32;

/// Parcel field alignment (hwbinder `PAD_SIZE`).
pub const PARCEL_ALIGN: usize = 4;

/// Largest parcel payload the transport accepts.
pub const MAX_PARCEL_SIZE: usize = i32::MAX as usize;

/// Size of a pointer slot inside a HIDL struct, regardless of host bitness.
pub const POINTER_SLOT_SIZE: usize = 8;

/// Round `value` up to the parcel alignment.
#[inline]
pub const fn pad_size(value: usize) -> usize {
    align_up(value, PARCEL_ALIGN)
}

/// Align a value up to the given power-of-two alignment.
#[inline]
pub const fn align_up(value: usize, alignment: usize) -> usize {
    let mask = alignment - 1;
    (value + mask) & !mask
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pad_size() {
        assert_eq!(pad_size(0), 0);
        assert_eq!(pad_size(1), 4);
        assert_eq!(pad_size(4), 4);
        assert_eq!(pad_size(5), 8);
    }

    #[test]
    fn test_align_up() {
        assert_eq!(align_up(9, 8), 16);
        assert_eq!(align_up(16, 8), 16);
    }
}

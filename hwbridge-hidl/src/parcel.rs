// SPDX-FileCopyrightText: 2025 hwbridge contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! hwbinder Parcel serialization/deserialization.
//!
//! A parcel is a flat data stream with a single read/write cursor. Every field
//! is padded to 4 bytes. Buffers are written as flat buffer objects whose
//! offsets are recorded in an object table; the index in that table is the
//! buffer handle used to address embedded (child) buffers.
//!
//! Wire format:
//! ```text
//! [0x00] data_size: u32
//! [0x04] data_offset: u32  (0x10)
//! [0x08] objects_size: u32 (8 bytes per object)
//! [0x0C] objects_offset: u32
//! [data_offset..] data bytes
//! [objects_offset..] object offsets into data (u64 each)
//! ```
//!
//! Flat objects (32-byte header):
//! ```text
//! buffer:   type=PTR flags:u32 length:u64 parent:u64 parent_offset:u64 payload..
//! fd array: type=FDA pad:u32   num_fds:u64 parent:u64 parent_offset:u64
//! ```

use std::ffi::CStr;
use std::io::Cursor;

use bitflags::bitflags;
use byteorder::{LittleEndian, ReadBytesExt};
use hwbridge_common::{
    pad_size, BufferHandle, HidlError, RawFd, Result, MAX_PARCEL_SIZE, POINTER_SLOT_SIZE,
};

const fn pack_chars(c1: u8, c2: u8, c3: u8, c4: u8) -> u32 {
    ((c1 as u32) << 24) | ((c2 as u32) << 16) | ((c3 as u32) << 8) | (c4 as u32)
}

const TYPE_LARGE: u8 = 0x85;

/// Flat object type of a scatter-gather buffer.
pub const BINDER_TYPE_PTR: u32 = pack_chars(b'p', b't', b'*', TYPE_LARGE);

/// Flat object type of a file descriptor array.
pub const BINDER_TYPE_FDA: u32 = pack_chars(b'f', b'd', b'a', TYPE_LARGE);

/// Size of the serialized parcel header.
pub const PARCEL_HEADER_SIZE: usize = 0x10;

/// Size of a flat object header in the data stream.
pub const FLAT_OBJECT_SIZE: usize = 32;

/// `offsetof(native_handle_t, data)`.
pub const NATIVE_HANDLE_HEADER_SIZE: usize = 12;

bitflags! {
    /// Flags of a flat buffer object.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct BufferFlags: u32 {
        const HAS_PARENT = 0x01;
    }
}

// ── Primitives ──────────────────────────────────────────────────────────────

/// Fixed-width value that can be written to and read from a parcel.
pub trait Primitive: Copy {
    /// Unpadded width on the wire.
    const WIDTH: usize;
    /// Name used in error messages.
    const NAME: &'static str;

    fn encode(self, out: &mut [u8]);
    fn decode(raw: &[u8]) -> Self;
}

macro_rules! impl_primitive {
    ($($ty:ty),* $(,)?) => {
        $(
            impl Primitive for $ty {
                const WIDTH: usize = std::mem::size_of::<$ty>();
                const NAME: &'static str = stringify!($ty);

                fn encode(self, out: &mut [u8]) {
                    out.copy_from_slice(&self.to_le_bytes());
                }

                fn decode(raw: &[u8]) -> Self {
                    let mut bytes = [0u8; std::mem::size_of::<$ty>()];
                    bytes.copy_from_slice(raw);
                    <$ty>::from_le_bytes(bytes)
                }
            }
        )*
    };
}

impl_primitive!(i8, u8, i16, u16, i32, u32, i64, u64, f32, f64);

// hwbinder writes bool as int32.
impl Primitive for bool {
    const WIDTH: usize = 4;
    const NAME: &'static str = "bool";

    fn encode(self, out: &mut [u8]) {
        out.copy_from_slice(&(self as i32).to_le_bytes());
    }

    fn decode(raw: &[u8]) -> Self {
        i32::decode(raw) != 0
    }
}

// ── Native handles ──────────────────────────────────────────────────────────

/// OS resource handles carried without duplication.
///
/// The parcel records the descriptors as-is; duplicating them across the
/// process boundary is the transport's job.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NativeHandle {
    pub fds: Vec<RawFd>,
    pub ints: Vec<i32>,
}

impl NativeHandle {
    pub fn new(fds: Vec<RawFd>, ints: Vec<i32>) -> Self {
        Self { fds, ints }
    }

    /// `native_handle_t` layout: version, num_fds, num_ints, fds.., ints...
    fn to_bytes(&self) -> Vec<u8> {
        let mut out =
            Vec::with_capacity(NATIVE_HANDLE_HEADER_SIZE + 4 * (self.fds.len() + self.ints.len()));
        out.extend_from_slice(&(NATIVE_HANDLE_HEADER_SIZE as i32).to_le_bytes());
        out.extend_from_slice(&(self.fds.len() as i32).to_le_bytes());
        out.extend_from_slice(&(self.ints.len() as i32).to_le_bytes());
        for value in self.fds.iter().chain(self.ints.iter()) {
            out.extend_from_slice(&value.to_le_bytes());
        }
        out
    }

    fn from_bytes(raw: &[u8]) -> Result<Self> {
        if raw.len() < NATIVE_HANDLE_HEADER_SIZE {
            return Err(HidlError::LengthMismatch {
                expected: NATIVE_HANDLE_HEADER_SIZE,
                actual: raw.len(),
            });
        }
        let mut cur = Cursor::new(raw);
        let _version = read_i32_at(&mut cur, "read native handle")?;
        let num_fds = read_i32_at(&mut cur, "read native handle")?;
        let num_ints = read_i32_at(&mut cur, "read native handle")?;
        if num_fds < 0 || num_ints < 0 {
            return Err(HidlError::io(
                "read native handle",
                format!("negative counts: fds={} ints={}", num_fds, num_ints),
            ));
        }
        let (num_fds, num_ints) = (num_fds as usize, num_ints as usize);
        let expected = num_fds
            .checked_add(num_ints)
            .and_then(|n| n.checked_mul(4))
            .and_then(|n| n.checked_add(NATIVE_HANDLE_HEADER_SIZE))
            .ok_or_else(|| HidlError::io("read native handle", "fd/int counts overflow"))?;
        if expected != raw.len() {
            return Err(HidlError::LengthMismatch {
                expected,
                actual: raw.len(),
            });
        }

        let mut fds = Vec::with_capacity(num_fds);
        for _ in 0..num_fds {
            fds.push(read_i32_at(&mut cur, "read native handle")?);
        }
        let mut ints = Vec::with_capacity(num_ints);
        for _ in 0..num_ints {
            ints.push(read_i32_at(&mut cur, "read native handle")?);
        }
        Ok(Self { fds, ints })
    }
}

/// Where a native handle (or buffer) lives: directly in the parcel or nested
/// inside a previously written parent buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    TopLevel,
    Embedded {
        parent: BufferHandle,
        offset: usize,
    },
}

impl Placement {
    fn parent(self) -> Option<(BufferHandle, usize)> {
        match self {
            Self::TopLevel => None,
            Self::Embedded { parent, offset } => Some((parent, offset)),
        }
    }
}

// ── Borrowed UTF-16 view ────────────────────────────────────────────────────

/// A UTF-16 string read in place from a parcel.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct String16<'a> {
    raw: &'a [u8],
}

impl<'a> String16<'a> {
    /// Number of UTF-16 code units.
    pub fn len(&self) -> usize {
        self.raw.len() / 2
    }

    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }

    pub fn units(&self) -> impl Iterator<Item = u16> + 'a {
        let raw: &'a [u8] = self.raw;
        raw.chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
    }

    pub fn to_vec(&self) -> Vec<u16> {
        self.units().collect()
    }

    pub fn to_string_lossy(&self) -> String {
        char::decode_utf16(self.units())
            .map(|c| c.unwrap_or(char::REPLACEMENT_CHARACTER))
            .collect()
    }
}

impl std::fmt::Debug for String16<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "String16({:?})", self.to_string_lossy())
    }
}

// ── Flat objects ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FlatObject {
    kind: u32,
    flags: u32,
    /// Payload bytes for buffers, descriptor count for fd arrays.
    length: u64,
    parent: u64,
    parent_offset: u64,
}

impl FlatObject {
    fn buffer(length: usize, parent: Option<(BufferHandle, usize)>) -> Self {
        let (flags, parent, parent_offset) = match parent {
            Some((handle, offset)) => (BufferFlags::HAS_PARENT.bits(), handle as u64, offset as u64),
            None => (0, 0, 0),
        };
        Self {
            kind: BINDER_TYPE_PTR,
            flags,
            length: length as u64,
            parent,
            parent_offset,
        }
    }

    fn fd_array(num_fds: usize, parent: BufferHandle, parent_offset: usize) -> Self {
        Self {
            kind: BINDER_TYPE_FDA,
            flags: 0,
            length: num_fds as u64,
            parent: parent as u64,
            parent_offset: parent_offset as u64,
        }
    }

    fn has_parent(&self) -> bool {
        BufferFlags::from_bits_truncate(self.flags).contains(BufferFlags::HAS_PARENT)
    }

    fn encode(&self) -> [u8; FLAT_OBJECT_SIZE] {
        let mut out = [0u8; FLAT_OBJECT_SIZE];
        out[0..4].copy_from_slice(&self.kind.to_le_bytes());
        out[4..8].copy_from_slice(&self.flags.to_le_bytes());
        out[8..16].copy_from_slice(&self.length.to_le_bytes());
        out[16..24].copy_from_slice(&self.parent.to_le_bytes());
        out[24..32].copy_from_slice(&self.parent_offset.to_le_bytes());
        out
    }

    fn decode(raw: &[u8]) -> Result<Self> {
        let mut cur = Cursor::new(raw);
        let op = "decode flat object";
        Ok(Self {
            kind: cur.read_u32::<LittleEndian>().map_err(|e| io_err(op, e))?,
            flags: cur.read_u32::<LittleEndian>().map_err(|e| io_err(op, e))?,
            length: cur.read_u64::<LittleEndian>().map_err(|e| io_err(op, e))?,
            parent: cur.read_u64::<LittleEndian>().map_err(|e| io_err(op, e))?,
            parent_offset: cur.read_u64::<LittleEndian>().map_err(|e| io_err(op, e))?,
        })
    }
}

fn io_err(op: &'static str, err: std::io::Error) -> HidlError {
    HidlError::io(op, err.to_string())
}

fn read_i32_at(cur: &mut Cursor<&[u8]>, op: &'static str) -> Result<i32> {
    cur.read_i32::<LittleEndian>().map_err(|e| io_err(op, e))
}

// ── Parcel ──────────────────────────────────────────────────────────────────

/// hwbinder Parcel: a padded data stream plus a table of flat object offsets.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Parcel {
    data: Vec<u8>,
    /// Offsets into `data` of every flat object, in write order.
    objects: Vec<usize>,
    /// Shared read/write cursor.
    pos: usize,
}

impl Parcel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total committed length of the data stream.
    pub fn data_size(&self) -> usize {
        self.data.len()
    }

    pub fn data_position(&self) -> usize {
        self.pos
    }

    /// Move the cursor, for replaying reads or overwriting earlier fields.
    pub fn set_data_position(&mut self, pos: usize) {
        self.pos = pos;
    }

    /// Data bytes available after the cursor.
    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Number of flat objects (buffers and fd arrays) recorded.
    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    /// Whether any fd array was recorded.
    pub fn has_file_descriptors(&self) -> bool {
        (0..self.objects.len())
            .filter_map(|handle| self.object(handle))
            .any(|object| object.kind == BINDER_TYPE_FDA)
    }

    // ── Raw stream access ───────────────────────────────────────────────

    /// Write `bytes` at the cursor, zero-padded to 4 bytes.
    fn write_raw(&mut self, op: &'static str, bytes: &[u8]) -> Result<usize> {
        let start = self.pos;
        let end = start
            .checked_add(pad_size(bytes.len()))
            .filter(|&end| end <= MAX_PARCEL_SIZE)
            .ok_or_else(|| {
                HidlError::io(op, format!("{} bytes at {} exceed the parcel limit", bytes.len(), start))
            })?;

        if end > self.data.len() {
            self.data
                .try_reserve(end - self.data.len())
                .map_err(|e| HidlError::io(op, e.to_string()))?;
            self.data.resize(end, 0);
        }

        // Objects whose header overlaps or follows the write start are clobbered.
        if start < self.data.len() {
            self.objects.retain(|&offset| offset + FLAT_OBJECT_SIZE <= start);
        }

        self.data[start..start + bytes.len()].copy_from_slice(bytes);
        self.data[start + bytes.len()..end].fill(0);
        self.pos = end;
        Ok(start)
    }

    /// Consume `len` bytes (plus padding) at the cursor.
    fn read_raw(&mut self, op: &'static str, len: usize) -> Result<&[u8]> {
        let start = self.pos;
        let end = start
            .checked_add(pad_size(len))
            .filter(|&end| end <= self.data.len())
            .ok_or_else(|| {
                HidlError::io(
                    op,
                    format!("need {} bytes at {}, have {}", pad_size(len), start, self.remaining()),
                )
            })?;
        self.pos = end;
        Ok(&self.data[start..start + len])
    }

    // ── Primitives ──────────────────────────────────────────────────────

    pub fn write<T: Primitive>(&mut self, value: T) -> Result<()> {
        let mut bytes = [0u8; 8];
        value.encode(&mut bytes[..T::WIDTH]);
        self.write_raw(T::NAME, &bytes[..T::WIDTH])?;
        Ok(())
    }

    pub fn read<T: Primitive>(&mut self) -> Result<T> {
        let raw = self.read_raw(T::NAME, T::WIDTH)?;
        Ok(T::decode(raw))
    }

    // ── Strings ─────────────────────────────────────────────────────────

    pub fn write_cstring(&mut self, value: &CStr) -> Result<()> {
        self.write_raw("write cstring", value.to_bytes_with_nul())?;
        Ok(())
    }

    /// Read a NUL-terminated string in place. Returns `None` without moving
    /// the cursor when no terminator is left in the stream.
    pub fn read_cstring(&mut self) -> Option<&CStr> {
        let start = self.pos;
        let tail = self.data.get(start..)?;
        let len = tail.iter().position(|&b| b == 0)? + 1;
        self.pos = (start + pad_size(len)).min(self.data.len());
        CStr::from_bytes_with_nul(&self.data[start..start + len]).ok()
    }

    /// Write an interface descriptor as the transaction's first field.
    pub fn write_interface_token(&mut self, interface: &str) -> Result<()> {
        if interface.as_bytes().contains(&0) {
            return Err(HidlError::InvalidInterface {
                expected: interface.to_string(),
                actual: "descriptor contains a NUL byte".to_string(),
            });
        }
        let mut bytes = Vec::with_capacity(interface.len() + 1);
        bytes.extend_from_slice(interface.as_bytes());
        bytes.push(0);
        self.write_raw("write interface token", &bytes)?;
        Ok(())
    }

    pub fn read_interface_token(&mut self) -> Result<String> {
        match self.read_cstring() {
            Some(token) => Ok(token.to_string_lossy().into_owned()),
            None => Err(HidlError::io(
                "read interface token",
                "stream exhausted before terminator",
            )),
        }
    }

    /// Check that the next field is the token of `expected`.
    pub fn enforce_interface(&mut self, expected: &str) -> Result<()> {
        let actual = match self.read_cstring() {
            Some(token) if token.to_bytes() == expected.as_bytes() => return Ok(()),
            Some(token) => token.to_string_lossy().into_owned(),
            None => "<missing>".to_string(),
        };
        Err(HidlError::InvalidInterface {
            expected: expected.to_string(),
            actual,
        })
    }

    /// Write a UTF-16 string: i32 unit count, the units, a 0 terminator.
    pub fn write_string16(&mut self, units: &[u16]) -> Result<()> {
        let count = i32::try_from(units.len()).map_err(|_| {
            HidlError::io("write string16", format!("{} units exceed i32", units.len()))
        })?;
        let mut bytes = Vec::with_capacity(4 + (units.len() + 1) * 2);
        bytes.extend_from_slice(&count.to_le_bytes());
        for unit in units.iter().chain(std::iter::once(&0u16)) {
            bytes.extend_from_slice(&unit.to_le_bytes());
        }
        self.write_raw("write string16", &bytes)?;
        Ok(())
    }

    pub fn write_str16(&mut self, value: &str) -> Result<()> {
        let units: Vec<u16> = value.encode_utf16().collect();
        self.write_string16(&units)
    }

    /// Write the null string (length -1).
    pub fn write_null_string16(&mut self) -> Result<()> {
        self.write(-1i32)
    }

    /// Read a UTF-16 string in place. `Ok(None)` is the null string.
    pub fn read_string16(&mut self) -> Result<Option<String16<'_>>> {
        let start = self.pos;
        let count = self.read::<i32>()?;
        if count < 0 {
            return Ok(None);
        }

        let units = count as usize;
        let body = self.pos;
        let end = units
            .checked_add(1)
            .and_then(|n| n.checked_mul(2))
            .and_then(|len| body.checked_add(pad_size(len)))
            .filter(|&end| end <= self.data.len());
        let Some(end) = end else {
            self.pos = start;
            return Err(HidlError::io(
                "read string16",
                format!("{} units at {} overrun {} bytes", units, body, self.data.len()),
            ));
        };

        let terminator = body + units * 2;
        if self.data[terminator..terminator + 2] != [0, 0] {
            self.pos = start;
            return Err(HidlError::io("read string16", "missing terminator"));
        }

        self.pos = end;
        Ok(Some(String16 {
            raw: &self.data[body..terminator],
        }))
    }

    // ── Buffers ─────────────────────────────────────────────────────────

    fn object(&self, handle: BufferHandle) -> Option<FlatObject> {
        let offset = *self.objects.get(handle)?;
        let raw = self.data.get(offset..offset + FLAT_OBJECT_SIZE)?;
        FlatObject::decode(raw).ok()
    }

    fn record_object(&mut self, offset: usize) -> BufferHandle {
        self.objects.push(offset);
        self.objects.len() - 1
    }

    /// A child object may only point into a committed buffer, and the region
    /// it patches must fit inside that buffer.
    fn check_parent(&self, parent: BufferHandle, offset: usize, span: usize) -> Result<()> {
        let fits = self
            .object(parent)
            .filter(|object| object.kind == BINDER_TYPE_PTR)
            .and_then(|object| {
                let end = offset.checked_add(span)?;
                Some(end as u64 <= object.length)
            })
            .unwrap_or(false);
        if fits {
            Ok(())
        } else {
            Err(HidlError::BadParent { parent, offset })
        }
    }

    fn write_flat_object(
        &mut self,
        op: &'static str,
        object: FlatObject,
        payload: &[u8],
    ) -> Result<BufferHandle> {
        let mut record = Vec::with_capacity(FLAT_OBJECT_SIZE + payload.len());
        record.extend_from_slice(&object.encode());
        record.extend_from_slice(payload);
        let offset = self.write_raw(op, &record)?;
        let handle = self.record_object(offset);
        log::trace!(
            "parcel: {} handle={} len={} parent={}",
            op,
            handle,
            object.length,
            if object.kind == BINDER_TYPE_FDA || object.has_parent() {
                format!("{}+{}", object.parent, object.parent_offset)
            } else {
                "-".to_string()
            }
        );
        Ok(handle)
    }

    fn write_buffer_object(
        &mut self,
        bytes: &[u8],
        parent: Option<(BufferHandle, usize)>,
    ) -> Result<BufferHandle> {
        let op = match parent {
            Some((handle, offset)) => {
                self.check_parent(handle, offset, POINTER_SLOT_SIZE)?;
                "write embedded buffer"
            }
            None => "write buffer",
        };
        self.write_flat_object(op, FlatObject::buffer(bytes.len(), parent), bytes)
    }

    /// Decode the flat object at the cursor without consuming it.
    fn peek_object(&self, op: &'static str) -> Result<(BufferHandle, FlatObject)> {
        let start = self.pos;
        let handle = self
            .objects
            .iter()
            .position(|&o| o == start)
            .ok_or_else(|| HidlError::io(op, format!("no flat object at offset {}", start)))?;
        let raw = self
            .data
            .get(start..start + FLAT_OBJECT_SIZE)
            .ok_or_else(|| HidlError::io(op, format!("truncated flat object at {}", start)))?;
        Ok((handle, FlatObject::decode(raw)?))
    }

    fn read_buffer_object(
        &mut self,
        expected_len: Option<usize>,
        parent: Option<(BufferHandle, usize)>,
    ) -> Result<(BufferHandle, &[u8])> {
        let op = if parent.is_some() {
            "read embedded buffer"
        } else {
            "read buffer"
        };
        let (handle, object) = self.peek_object(op)?;
        if object.kind != BINDER_TYPE_PTR {
            return Err(HidlError::io(
                op,
                format!("object at {} is not a buffer (type 0x{:08X})", self.pos, object.kind),
            ));
        }

        match parent {
            Some((parent, offset)) => {
                if !object.has_parent()
                    || object.parent != parent as u64
                    || object.parent_offset != offset as u64
                {
                    return Err(HidlError::BadParent { parent, offset });
                }
            }
            None => {
                if object.has_parent() {
                    return Err(HidlError::BadParent {
                        parent: object.parent as usize,
                        offset: object.parent_offset as usize,
                    });
                }
            }
        }

        let length = usize::try_from(object.length).map_err(|_| {
            HidlError::io(op, format!("buffer length {} does not fit in memory", object.length))
        })?;
        if let Some(expected) = expected_len {
            if expected != length {
                return Err(HidlError::LengthMismatch {
                    expected,
                    actual: length,
                });
            }
        }

        let body = self.pos + FLAT_OBJECT_SIZE;
        let end = body
            .checked_add(length)
            .filter(|&end| end <= self.data.len())
            .ok_or_else(|| {
                HidlError::io(op, format!("buffer of {} bytes at {} overruns the parcel", length, body))
            })?;
        self.pos = (body + pad_size(length)).min(self.data.len());
        log::trace!("parcel: {} handle={} len={}", op, handle, length);
        Ok((handle, &self.data[body..end]))
    }

    /// Append a length-prefixed blob; the returned handle addresses it as a
    /// parent for embedded buffers.
    pub fn write_buffer(&mut self, bytes: &[u8]) -> Result<BufferHandle> {
        self.write_buffer_object(bytes, None)
    }

    /// Read the top-level buffer at the cursor, which must be exactly
    /// `expected_len` bytes long.
    pub fn read_buffer(&mut self, expected_len: usize) -> Result<(BufferHandle, &[u8])> {
        self.read_buffer_object(Some(expected_len), None)
    }

    /// Append a buffer nested in `parent`; `parent_offset` is the pointer
    /// slot in the parent that refers to it.
    pub fn write_embedded_buffer(
        &mut self,
        bytes: &[u8],
        parent: BufferHandle,
        parent_offset: usize,
    ) -> Result<BufferHandle> {
        self.write_buffer_object(bytes, Some((parent, parent_offset)))
    }

    pub fn read_embedded_buffer(
        &mut self,
        expected_len: usize,
        parent: BufferHandle,
        parent_offset: usize,
    ) -> Result<(BufferHandle, &[u8])> {
        self.read_buffer_object(Some(expected_len), Some((parent, parent_offset)))
    }

    // ── Native handles ──────────────────────────────────────────────────

    /// Record a native handle without duplicating its descriptors. `None`
    /// writes the null handle.
    pub fn write_native_handle_no_dup(
        &mut self,
        handle: Option<&NativeHandle>,
        placement: Placement,
    ) -> Result<()> {
        let parent = placement.parent();
        let Some(handle) = handle else {
            self.write_buffer_object(&[], parent)?;
            return Ok(());
        };

        self.write_atomically(|parcel| parcel.write_native_handle_objects(handle, parent))
    }

    /// Run a multi-object write; on error the parcel is restored byte for
    /// byte, including any region the write had overwritten.
    fn write_atomically<T>(&mut self, write: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        let pos = self.pos;
        let keep = pos.min(self.data.len());
        let tail = self.data[keep..].to_vec();
        let objects = self.objects.clone();

        let result = write(self);
        if result.is_err() {
            self.data.truncate(keep);
            self.data.extend_from_slice(&tail);
            self.objects = objects;
            self.pos = pos;
        }
        result
    }

    fn write_native_handle_objects(
        &mut self,
        handle: &NativeHandle,
        parent: Option<(BufferHandle, usize)>,
    ) -> Result<()> {
        let buffer = self.write_buffer_object(&handle.to_bytes(), parent)?;
        if !handle.fds.is_empty() {
            self.check_parent(buffer, NATIVE_HANDLE_HEADER_SIZE, 4 * handle.fds.len())?;
            let object = FlatObject::fd_array(handle.fds.len(), buffer, NATIVE_HANDLE_HEADER_SIZE);
            self.write_flat_object("write fd array", object, &[])?;
        }
        Ok(())
    }

    /// Inverse of [`Parcel::write_native_handle_no_dup`]. `Ok(None)` is the
    /// null handle. The cursor is left untouched on error.
    pub fn read_native_handle_no_dup(&mut self, placement: Placement) -> Result<Option<NativeHandle>> {
        let start = self.pos;
        let result = self.read_native_handle_objects(placement.parent());
        if result.is_err() {
            self.pos = start;
        }
        result
    }

    fn read_native_handle_objects(
        &mut self,
        parent: Option<(BufferHandle, usize)>,
    ) -> Result<Option<NativeHandle>> {
        let (buffer, raw) = self.read_buffer_object(None, parent)?;
        if raw.is_empty() {
            return Ok(None);
        }
        let handle = NativeHandle::from_bytes(raw)?;

        if !handle.fds.is_empty() {
            let op = "read fd array";
            let (_, object) = self.peek_object(op)?;
            if object.kind != BINDER_TYPE_FDA {
                return Err(HidlError::io(op, format!("object at {} is not an fd array", self.pos)));
            }
            if object.parent != buffer as u64
                || object.parent_offset != NATIVE_HANDLE_HEADER_SIZE as u64
            {
                return Err(HidlError::BadParent {
                    parent: buffer,
                    offset: NATIVE_HANDLE_HEADER_SIZE,
                });
            }
            if object.length != handle.fds.len() as u64 {
                return Err(HidlError::LengthMismatch {
                    expected: handle.fds.len(),
                    actual: object.length as usize,
                });
            }
            self.pos += FLAT_OBJECT_SIZE;
        }
        Ok(Some(handle))
    }

    // ── Wire format ─────────────────────────────────────────────────────

    /// Serialize the parcel to its wire format.
    pub fn serialize(&self) -> Vec<u8> {
        let data_offset = PARCEL_HEADER_SIZE as u32;
        let objects_offset = data_offset + self.data.len() as u32;
        let objects_size = (self.objects.len() * 8) as u32;

        let mut buf = Vec::with_capacity(PARCEL_HEADER_SIZE + self.data.len() + objects_size as usize);
        buf.extend_from_slice(&(self.data.len() as u32).to_le_bytes());
        buf.extend_from_slice(&data_offset.to_le_bytes());
        buf.extend_from_slice(&objects_size.to_le_bytes());
        buf.extend_from_slice(&objects_offset.to_le_bytes());
        buf.extend_from_slice(&self.data);
        for &offset in &self.objects {
            buf.extend_from_slice(&(offset as u64).to_le_bytes());
        }
        buf
    }

    /// Deserialize a parcel from its wire format, cursor at 0.
    pub fn from_bytes(raw: &[u8]) -> Result<Self> {
        let op = "parse parcel";
        if raw.len() < PARCEL_HEADER_SIZE {
            return Err(HidlError::io(
                op,
                format!("{} bytes is smaller than the 0x{:X}-byte header", raw.len(), PARCEL_HEADER_SIZE),
            ));
        }

        let mut cur = Cursor::new(raw);
        let data_size = cur.read_u32::<LittleEndian>().map_err(|e| io_err(op, e))? as usize;
        let data_offset = cur.read_u32::<LittleEndian>().map_err(|e| io_err(op, e))? as usize;
        let objects_size = cur.read_u32::<LittleEndian>().map_err(|e| io_err(op, e))? as usize;
        let objects_offset = cur.read_u32::<LittleEndian>().map_err(|e| io_err(op, e))? as usize;

        let data_end = data_offset
            .checked_add(data_size)
            .filter(|&end| data_offset >= PARCEL_HEADER_SIZE && end <= raw.len())
            .ok_or_else(|| {
                HidlError::io(op, format!("data 0x{:X}+0x{:X} outside {} bytes", data_offset, data_size, raw.len()))
            })?;
        let objects_end = objects_offset
            .checked_add(objects_size)
            .filter(|&end| objects_size % 8 == 0 && end <= raw.len())
            .ok_or_else(|| {
                HidlError::io(
                    op,
                    format!("objects 0x{:X}+0x{:X} outside {} bytes", objects_offset, objects_size, raw.len()),
                )
            })?;

        let data = raw[data_offset..data_end].to_vec();
        let mut objects = Vec::with_capacity(objects_size / 8);
        let mut cur = Cursor::new(&raw[objects_offset..objects_end]);
        for _ in 0..objects_size / 8 {
            let offset = cur.read_u64::<LittleEndian>().map_err(|e| io_err(op, e))? as usize;
            if offset.checked_add(FLAT_OBJECT_SIZE).map_or(true, |end| end > data.len()) {
                return Err(HidlError::io(op, format!("object offset {} outside data", offset)));
            }
            objects.push(offset);
        }

        Ok(Self {
            data,
            objects,
            pos: 0,
        })
    }
}

macro_rules! named_accessors {
    ($($write:ident, $read:ident => $ty:ty;)*) => {
        impl Parcel {
            $(
                pub fn $write(&mut self, value: $ty) -> Result<()> {
                    self.write(value)
                }

                pub fn $read(&mut self) -> Result<$ty> {
                    self.read()
                }
            )*
        }
    };
}

named_accessors! {
    write_i8, read_i8 => i8;
    write_u8, read_u8 => u8;
    write_i16, read_i16 => i16;
    write_u16, read_u16 => u16;
    write_i32, read_i32 => i32;
    write_u32, read_u32 => u32;
    write_i64, read_i64 => i64;
    write_u64, read_u64 => u64;
    write_f32, read_f32 => f32;
    write_f64, read_f64 => f64;
    write_bool, read_bool => bool;
}

// ── Tests ────────────────────────────────────────────────────────────────────

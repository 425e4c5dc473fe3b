//! Packed (flat little-endian) streams
//!
//! A packed stream is the payload of a chunk read or written field by field.
//! [`PackedReader`] is a bounds-checked cursor over a borrowed buffer and
//! [`PackedWriter`] an append-only buffer with in-place back-patching, used to
//! fill in checksums and lengths once the data they cover has been written.

use memchr::memchr;

use crate::encoding;
use crate::error::{DataError, Result};

/// Fixed-width little-endian primitive
pub trait Primitive: Copy {
    /// Encoded size in bytes
    const SIZE: usize;

    /// Decode from exactly `SIZE` bytes
    fn from_le_slice(bytes: &[u8]) -> Self;

    /// Append the little-endian encoding to `out`
    fn put_le(self, out: &mut Vec<u8>);
}

macro_rules! impl_primitive {
    ($($ty:ty),* $(,)?) => {
        $(
            impl Primitive for $ty {
                const SIZE: usize = std::mem::size_of::<$ty>();

                fn from_le_slice(bytes: &[u8]) -> Self {
                    let mut raw = [0u8; std::mem::size_of::<$ty>()];
                    raw.copy_from_slice(bytes);
                    <$ty>::from_le_bytes(raw)
                }

                fn put_le(self, out: &mut Vec<u8>) {
                    out.extend_from_slice(&self.to_le_bytes());
                }
            }
        )*
    };
}

impl_primitive!(u8, i8, u16, i16, u32, i32, u64, f32);

/// Bounds-checked cursor over a packed buffer
///
/// Dropping a reader that still has unread bytes logs a warning: every
/// structure in the engine's formats is expected to consume its payload
/// exactly. Readers created with [`PackedReader::partial`] skip that check.
#[derive(Debug)]
pub struct PackedReader<'a> {
    data: &'a [u8],
    position: usize,
    check_trailing: bool,
}

impl<'a> PackedReader<'a> {
    /// Create a reader that expects to consume the whole buffer
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            position: 0,
            check_trailing: true,
        }
    }

    /// Create a reader that is allowed to stop early
    pub fn partial(data: &'a [u8]) -> Self {
        Self {
            data,
            position: 0,
            check_trailing: false,
        }
    }

    /// Current offset from the start of the buffer
    pub fn position(&self) -> usize {
        self.position
    }

    /// Length of the underlying buffer
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the underlying buffer is empty
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Bytes left to read
    pub fn remaining(&self) -> usize {
        self.data.len() - self.position
    }

    /// Whether every byte has been consumed
    pub fn is_end(&self) -> bool {
        self.position >= self.data.len()
    }

    /// The underlying buffer
    pub fn data(&self) -> &'a [u8] {
        self.data
    }

    /// Borrow the next `count` bytes and advance past them
    pub fn bytes(&mut self, count: usize) -> Result<&'a [u8]> {
        let available = self.remaining();
        if count > available {
            return Err(DataError::UnexpectedEof {
                offset: self.position,
                needed: count,
                available,
            });
        }
        let start = self.position;
        self.position += count;
        Ok(&self.data[start..self.position])
    }

    /// Skip `count` bytes
    pub fn skip(&mut self, count: usize) -> Result<()> {
        self.bytes(count).map(|_| ())
    }

    /// Consume everything that is left without decoding it
    pub fn skip_to_end(&mut self) {
        self.position = self.data.len();
    }

    /// Read one primitive value
    pub fn read<T: Primitive>(&mut self) -> Result<T> {
        self.bytes(T::SIZE).map(T::from_le_slice)
    }

    /// Read `count` homogeneous values in one bounds check
    pub fn read_array<T: Primitive>(&mut self, count: usize) -> Result<Vec<T>> {
        let size = count.checked_mul(T::SIZE).ok_or_else(|| {
            DataError::format(format!("array of {count} elements overflows the address space"))
        })?;
        let raw = self.bytes(size)?;
        Ok(raw.chunks_exact(T::SIZE).map(T::from_le_slice).collect())
    }

    /// Read a fixed-size array of values
    pub fn read_fixed<T: Primitive + Default, const N: usize>(&mut self) -> Result<[T; N]> {
        let raw = self.bytes(N * T::SIZE)?;
        let mut out = [T::default(); N];
        for (slot, bytes) in out.iter_mut().zip(raw.chunks_exact(T::SIZE)) {
            *slot = T::from_le_slice(bytes);
        }
        Ok(out)
    }

    pub fn u8(&mut self) -> Result<u8> {
        self.read()
    }

    pub fn i8(&mut self) -> Result<i8> {
        self.read()
    }

    pub fn u16(&mut self) -> Result<u16> {
        self.read()
    }

    pub fn i16(&mut self) -> Result<i16> {
        self.read()
    }

    pub fn u32(&mut self) -> Result<u32> {
        self.read()
    }

    pub fn i32(&mut self) -> Result<i32> {
        self.read()
    }

    pub fn f32(&mut self) -> Result<f32> {
        self.read()
    }

    /// Read three consecutive floats
    pub fn vec3(&mut self) -> Result<[f32; 3]> {
        self.read_fixed()
    }

    /// Read a float quantized to 16 bits over `[min, max]`
    pub fn q16f(&mut self, min: f32, max: f32) -> Result<f32> {
        let raw = self.u16()?;
        Ok(f32::from(raw) * (max - min) / 65535.0 + min)
    }

    /// Read a float quantized to 8 bits over `[min, max]`
    pub fn q8f(&mut self, min: f32, max: f32) -> Result<f32> {
        let raw = self.u8()?;
        Ok(f32::from(raw) * (max - min) / 255.0 + min)
    }

    /// Read a NUL-terminated string
    pub fn string_z(&mut self) -> Result<String> {
        self.terminated(0)
    }

    /// Read a linefeed-terminated string
    ///
    /// A carriage return in front of the linefeed is dropped as well.
    pub fn string_lf(&mut self) -> Result<String> {
        let mut text = self.terminated(b'\n')?;
        if text.ends_with('\r') {
            text.pop();
        }
        Ok(text)
    }

    fn terminated(&mut self, terminator: u8) -> Result<String> {
        let rest = &self.data[self.position..];
        let end = memchr(terminator, rest).ok_or_else(|| {
            DataError::format(format!(
                "unterminated string at offset {} (looking for 0x{terminator:02X})",
                self.position
            ))
        })?;
        let text = encoding::decode(&rest[..end]);
        self.position += end + 1;
        Ok(text)
    }
}

impl Drop for PackedReader<'_> {
    fn drop(&mut self) {
        if self.check_trailing && !self.is_end() && !std::thread::panicking() {
            log::warn!(
                "packed reader dropped with {} unread bytes (offset {} of {})",
                self.remaining(),
                self.position,
                self.data.len()
            );
        }
    }
}

/// Append-only packed buffer
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PackedWriter {
    data: Vec<u8>,
}

impl PackedWriter {
    /// Create an empty writer
    pub fn new() -> Self {
        Self::default()
    }

    /// Current length, i.e. the offset the next write lands at
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether nothing was written yet
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Written bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Consume the writer
    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    /// Write one primitive value
    pub fn write<T: Primitive>(&mut self, value: T) -> &mut Self {
        value.put_le(&mut self.data);
        self
    }

    /// Write a run of homogeneous values
    pub fn write_slice<T: Primitive>(&mut self, values: &[T]) -> &mut Self {
        self.data.reserve(values.len() * T::SIZE);
        for &value in values {
            value.put_le(&mut self.data);
        }
        self
    }

    /// Write raw bytes
    pub fn bytes(&mut self, bytes: &[u8]) -> &mut Self {
        self.data.extend_from_slice(bytes);
        self
    }

    pub fn u8(&mut self, value: u8) -> &mut Self {
        self.write(value)
    }

    pub fn i8(&mut self, value: i8) -> &mut Self {
        self.write(value)
    }

    pub fn u16(&mut self, value: u16) -> &mut Self {
        self.write(value)
    }

    pub fn i16(&mut self, value: i16) -> &mut Self {
        self.write(value)
    }

    pub fn u32(&mut self, value: u32) -> &mut Self {
        self.write(value)
    }

    pub fn i32(&mut self, value: i32) -> &mut Self {
        self.write(value)
    }

    pub fn f32(&mut self, value: f32) -> &mut Self {
        self.write(value)
    }

    pub fn vec3(&mut self, value: [f32; 3]) -> &mut Self {
        self.write_slice(&value)
    }

    /// Write a float quantized to 16 bits over `[min, max]`
    ///
    /// Values outside the range are clamped to its bounds.
    pub fn q16f(&mut self, value: f32, min: f32, max: f32) -> &mut Self {
        let normalized = ((value - min) / (max - min)).clamp(0.0, 1.0);
        self.u16((normalized * 65535.0 + 0.5).floor() as u16)
    }

    /// Write a float quantized to 8 bits over `[min, max]`
    pub fn q8f(&mut self, value: f32, min: f32, max: f32) -> &mut Self {
        let normalized = ((value - min) / (max - min)).clamp(0.0, 1.0);
        self.u8((normalized * 255.0 + 0.5).floor() as u8)
    }

    /// Write a NUL-terminated string
    pub fn string_z(&mut self, text: &str) -> Result<&mut Self> {
        self.terminated(text, 0)
    }

    /// Write a linefeed-terminated string
    pub fn string_lf(&mut self, text: &str) -> Result<&mut Self> {
        self.terminated(text, b'\n')
    }

    fn terminated(&mut self, text: &str, terminator: u8) -> Result<&mut Self> {
        let encoded = encoding::encode(text)?;
        if memchr(terminator, &encoded).is_some() {
            return Err(DataError::format(format!(
                "string {text:?} contains its own terminator 0x{terminator:02X}"
            )));
        }
        self.data.extend_from_slice(&encoded);
        self.data.push(terminator);
        Ok(self)
    }

    /// Overwrite already written bytes at `offset`
    pub fn replace(&mut self, offset: usize, bytes: &[u8]) -> Result<()> {
        let end = offset
            .checked_add(bytes.len())
            .filter(|&end| end <= self.data.len())
            .ok_or_else(|| {
                DataError::format(format!(
                    "patch of {} bytes at offset {offset} exceeds written length {}",
                    bytes.len(),
                    self.data.len()
                ))
            })?;
        self.data[offset..end].copy_from_slice(bytes);
        Ok(())
    }

    /// Back-patch a `u32` slot
    pub fn replace_u32(&mut self, offset: usize, value: u32) -> Result<()> {
        self.replace(offset, &value.to_le_bytes())
    }

    /// Back-patch a `u16` slot
    pub fn replace_u16(&mut self, offset: usize, value: u16) -> Result<()> {
        self.replace(offset, &value.to_le_bytes())
    }
}

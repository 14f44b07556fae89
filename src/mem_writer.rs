//! Slots in an in-memory minidump buffer that are reserved first and filled in
//! later, once the values they hold are known.

use {
    crate::{errors::MemoryWriterError, minidump_format::MDLocationDescriptor},
    scroll::{ctx::SizeWith, Endian, Pwrite},
    std::{io::Write, marker::PhantomData},
};

type Result<T> = std::result::Result<T, MemoryWriterError>;

/// The metadata part of a minidump, offsets into it are file offsets
#[derive(Debug, Default)]
pub struct Buffer {
    inner: Vec<u8>,
}

impl Buffer {
    pub fn with_capacity(cap: usize) -> Self {
        Self {
            inner: Vec::with_capacity(cap),
        }
    }

    #[inline]
    pub fn position(&self) -> u64 {
        self.inner.len() as u64
    }

    /// Appends `len` zero bytes and returns the offset they start at
    fn reserve(&mut self, len: usize) -> usize {
        let start = self.inner.len();
        self.inner.resize(start + len, 0);
        start
    }

    /// Pads with zeroes until the position is a multiple of `align`
    pub fn align(&mut self, align: usize) {
        let rem = self.inner.len() % align;
        if rem != 0 {
            self.reserve(align - rem);
        }
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.inner
    }
}

impl Write for Buffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.inner.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl From<Buffer> for Vec<u8> {
    fn from(b: Buffer) -> Self {
        b.inner
    }
}

fn rva(offset: u64) -> Result<u32> {
    Ok(u32::try_from(offset)?)
}

#[derive(Debug, PartialEq, Eq)]
pub struct MemoryWriter<T> {
    pub position: u32,
    phantom: PhantomData<T>,
}

impl<T> MemoryWriter<T>
where
    T: SizeWith<Endian> + scroll::ctx::TryIntoCtx<Endian, Error = scroll::Error>,
{
    /// Reserves a slot for `T` and fills it with `val` right away
    pub fn alloc_with_val(buffer: &mut Buffer, val: T) -> Result<Self> {
        let size = T::size_with(&Endian::Little);
        let position = rva(buffer.position())?;
        let start = buffer.reserve(size);
        buffer.inner.pwrite_with(val, start, Endian::Little)?;

        Ok(Self {
            position,
            phantom: PhantomData,
        })
    }

    /// Reserves a zeroed slot for `T` to be filled with [`Self::set_value`]
    pub fn alloc(buffer: &mut Buffer) -> Result<Self> {
        let size = T::size_with(&Endian::Little);
        let position = rva(buffer.position())?;
        buffer.reserve(size);

        Ok(Self {
            position,
            phantom: PhantomData,
        })
    }

    pub fn set_value(&mut self, buffer: &mut Buffer, val: T) -> Result<()> {
        buffer
            .inner
            .pwrite_with(val, self.position as usize, Endian::Little)?;
        Ok(())
    }

    pub fn location(&self) -> MDLocationDescriptor {
        MDLocationDescriptor {
            data_size: T::size_with(&Endian::Little) as u32,
            rva: self.position,
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct MemoryArrayWriter<T> {
    pub position: u32,
    array_size: usize,
    phantom: PhantomData<T>,
}

impl MemoryArrayWriter<u8> {
    pub fn write_bytes(buffer: &mut Buffer, slice: &[u8]) -> Result<Self> {
        let position = rva(buffer.position())?;
        buffer.write_all(slice)?;

        Ok(Self {
            position,
            array_size: slice.len(),
            phantom: PhantomData,
        })
    }
}

impl<T> MemoryArrayWriter<T>
where
    T: SizeWith<Endian> + scroll::ctx::TryIntoCtx<Endian, Error = scroll::Error>,
{
    pub fn alloc_from_iter<I>(buffer: &mut Buffer, iter: I) -> Result<Self>
    where
        I: IntoIterator<Item = T>,
        I::IntoIter: ExactSizeIterator,
    {
        let iter = iter.into_iter();
        let array_size = iter.len();
        let size = T::size_with(&Endian::Little);
        let position = rva(buffer.position())?;
        let start = buffer.reserve(size * array_size);

        for (i, val) in iter.enumerate() {
            buffer
                .inner
                .pwrite_with(val, start + i * size, Endian::Little)?;
        }

        Ok(Self {
            position,
            array_size,
            phantom: PhantomData,
        })
    }

    /// Reserves `array_size` zeroed slots
    pub fn alloc_array(buffer: &mut Buffer, array_size: usize) -> Result<Self> {
        let size = T::size_with(&Endian::Little);
        let position = rva(buffer.position())?;
        buffer.reserve(size * array_size);

        Ok(Self {
            position,
            array_size,
            phantom: PhantomData,
        })
    }

    pub fn set_value_at(&mut self, buffer: &mut Buffer, val: T, index: usize) -> Result<()> {
        debug_assert!(index < self.array_size);
        let offset = self.position as usize + index * T::size_with(&Endian::Little);
        buffer.inner.pwrite_with(val, offset, Endian::Little)?;
        Ok(())
    }

    pub fn location(&self) -> MDLocationDescriptor {
        MDLocationDescriptor {
            data_size: (self.array_size * T::size_with(&Endian::Little)) as u32,
            rva: self.position,
        }
    }
}

/// Writes a `MINIDUMP_STRING`: the byte length of the UTF-16 text, the text
/// and a terminating nul that isn't counted
pub fn write_string_to_location(buffer: &mut Buffer, text: &str) -> Result<MDLocationDescriptor> {
    let mut letters: Vec<u16> = text.encode_utf16().collect();
    let byte_len = (letters.len() * 2) as u32;
    letters.push(0);

    let size = MemoryWriter::<u32>::alloc_with_val(buffer, byte_len)?;
    let mut location = size.location();

    let letters = MemoryArrayWriter::<u16>::alloc_from_iter(buffer, letters)?;
    location.data_size += letters.location().data_size;

    Ok(location)
}

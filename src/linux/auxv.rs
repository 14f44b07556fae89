//! The auxiliary vector the kernel hands every process at startup

use {
    byteorder::{NativeEndian, ReadBytesExt},
    std::io::{Cursor, Read},
};

/// The type used in auxv keys and values, targets are always 64-bit
pub type AuxvType = u64;

pub const AT_NULL: AuxvType = libc::AT_NULL;
pub const AT_PAGESZ: AuxvType = libc::AT_PAGESZ;

/// An auxv key-value pair.
#[derive(Debug, PartialEq, Eq)]
pub struct AuxvPair {
    pub key: AuxvType,
    pub value: AuxvType,
}

/// An iterator across auxv pairs from the raw `/proc/<pid>/auxv` contents.
/// Iteration ends at `AT_NULL` or at the first truncated pair.
pub struct AuxvIter<R> {
    input: R,
    done: bool,
}

impl<R: Read> AuxvIter<R> {
    pub fn new(input: R) -> Self {
        Self { input, done: false }
    }

    fn read_pair(&mut self) -> std::io::Result<AuxvPair> {
        let key = self.input.read_u64::<NativeEndian>()?;
        let value = self.input.read_u64::<NativeEndian>()?;
        Ok(AuxvPair { key, value })
    }
}

impl<R: Read> Iterator for AuxvIter<R> {
    type Item = AuxvPair;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.read_pair() {
            Ok(pair) if pair.key != AT_NULL => Some(pair),
            _ => {
                self.done = true;
                None
            }
        }
    }
}

/// Looks up `key` in a raw auxiliary vector
pub fn find(auxv: &[u8], key: AuxvType) -> Option<AuxvType> {
    AuxvIter::new(Cursor::new(auxv))
        .find(|pair| pair.key == key)
        .map(|pair| pair.value)
}

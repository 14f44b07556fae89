//! Dump formats and the plumbing they share

use {
    crate::{
        crash_info::{MemoryRange, Snapshot},
        elf_writer::ElfWriter,
        errors::{CollectionError, ConfigError, WriteError},
        macho_writer::MachOWriter,
        minidump_writer::MinidumpWriter,
        target::DataTarget,
    },
    error_graph::{ErrorList, WriteErrorList},
    std::{
        fmt,
        io::{BufWriter, Write},
        path::Path,
        str::FromStr,
    },
};

/// Memory is copied from the target in chunks of at most this size
const COPY_CHUNK: u64 = 64 * 1024;

/// Serializes a finished snapshot.
///
/// Writers lay out every header from the snapshot before writing anything and
/// then only ever append, so `dest` doesn't need to be seekable.
pub trait DumpWriter {
    fn write<T: DataTarget, W: Write>(
        &self,
        snapshot: &Snapshot,
        target: &T,
        dest: &mut W,
        soft_errors: impl WriteErrorList<CollectionError>,
    ) -> Result<(), WriteError>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize)]
pub enum DumpFormat {
    Minidump,
    Elf,
    MachO,
}

impl Default for DumpFormat {
    fn default() -> Self {
        if cfg!(target_os = "macos") {
            Self::MachO
        } else {
            Self::Elf
        }
    }
}

impl DumpFormat {
    pub fn name(self) -> &'static str {
        match self {
            Self::Minidump => "minidump",
            Self::Elf => "elf",
            Self::MachO => "macho",
        }
    }

    pub fn write<T: DataTarget, W: Write>(
        self,
        snapshot: &Snapshot,
        target: &T,
        dest: &mut W,
        soft_errors: impl WriteErrorList<CollectionError>,
    ) -> Result<(), WriteError> {
        match self {
            Self::Minidump => MinidumpWriter.write(snapshot, target, dest, soft_errors),
            Self::Elf => ElfWriter.write(snapshot, target, dest, soft_errors),
            Self::MachO => MachOWriter.write(snapshot, target, dest, soft_errors),
        }
    }
}

impl fmt::Display for DumpFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DumpFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "minidump" | "mdmp" => Ok(Self::Minidump),
            "elf" | "core" => Ok(Self::Elf),
            "macho" | "mach-o" => Ok(Self::MachO),
            _ => Err(ConfigError::UnknownFormat(s.to_owned())),
        }
    }
}

/// Writes the dump to `path`. A file that couldn't be completed is removed.
/// Problems that didn't stop the write are returned.
pub fn write_dump_file<T: DataTarget>(
    format: DumpFormat,
    snapshot: &Snapshot,
    target: &T,
    path: &Path,
) -> Result<ErrorList<CollectionError>, WriteError> {
    let file = std::fs::File::create(path).map_err(|source| WriteError::Create {
        path: path.display().to_string(),
        source,
    })?;
    let mut soft_errors = ErrorList::default();

    let res = write_to(format, snapshot, target, file, &mut soft_errors);
    if let Err(e) = res {
        log::error!("writing {} failed: {e}", path.display());
        if let Err(rm) = std::fs::remove_file(path) {
            log::warn!("unable to remove partial dump {}: {rm}", path.display());
        }
        return Err(e);
    }

    log::info!("wrote {format} dump to {}", path.display());
    Ok(soft_errors)
}

fn write_to<T: DataTarget>(
    format: DumpFormat,
    snapshot: &Snapshot,
    target: &T,
    file: std::fs::File,
    soft_errors: &mut ErrorList<CollectionError>,
) -> Result<(), WriteError> {
    let mut dest = BufWriter::new(file);
    format.write(snapshot, target, &mut dest, soft_errors)?;
    dest.flush()?;
    Ok(())
}

/// Tracks the offset of everything written so padding can be inserted to
/// reach offsets that were laid out in advance
pub(crate) struct CountingWriter<'a, W> {
    inner: &'a mut W,
    offset: u64,
}

impl<'a, W: Write> CountingWriter<'a, W> {
    pub fn new(inner: &'a mut W) -> Self {
        Self { inner, offset: 0 }
    }

    #[inline]
    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()> {
        self.inner.write_all(buf)?;
        self.offset += buf.len() as u64;
        Ok(())
    }

    /// Zero pads up to `offset`, which must not be behind the current one
    pub fn pad_to(&mut self, offset: u64) -> std::io::Result<()> {
        debug_assert!(offset >= self.offset, "{offset:#x} < {:#x}", self.offset);
        const ZEROES: [u8; 4096] = [0; 4096];
        while self.offset < offset {
            let n = (offset - self.offset).min(ZEROES.len() as u64) as usize;
            self.write_all(&ZEROES[..n])?;
        }
        Ok(())
    }

    /// Copies the contents of `range` out of the target. Pages that can no
    /// longer be read are zero filled since their offsets are already fixed.
    pub fn copy_range<T: DataTarget>(
        &mut self,
        target: &T,
        range: &MemoryRange,
        mut soft_errors: impl WriteErrorList<CollectionError>,
    ) -> Result<(), WriteError> {
        let page = target.page_size() as u64;
        let mut buf = vec![0u8; COPY_CHUNK.min(range.len) as usize];
        let mut address = range.start;
        let end = range.end();

        while address < end {
            let n = (end - address).min(COPY_CHUNK) as usize;
            let chunk = &mut buf[..n];
            if target.read_memory(address, chunk).is_err() {
                // Retry page by page so only what vanished is lost
                let mut at = 0;
                while at < n {
                    let page_end = ((address + at as u64) / page + 1) * page;
                    let len = ((page_end - address) as usize).min(n) - at;
                    let piece = &mut chunk[at..at + len];
                    if let Err(e) = target.read_memory(address + at as u64, piece) {
                        let start = address + at as u64;
                        log::warn!("zero filling {start:#x}+{len:#x}: {e}");
                        soft_errors.push(CollectionError::ZeroFilled {
                            start,
                            end: start + len as u64,
                        });
                        piece.fill(0);
                    }
                    at += len;
                }
            }
            self.write_all(chunk)?;
            address += n as u64;
        }
        Ok(())
    }
}

/// Round `value` up to a multiple of `align`, a power of two
#[inline]
pub(crate) fn align_up(value: u64, align: u64) -> u64 {
    (value + align - 1) & !(align - 1)
}

#[cfg(test)]
mod test {
    use {
        super::*,
        crate::{
            crash_info::RangeReasons,
            target::{memory::MemoryTarget, Backing, Permissions},
        },
    };

    #[test]
    fn formats() {
        assert_eq!("minidump".parse::<DumpFormat>().unwrap(), DumpFormat::Minidump);
        assert_eq!("ELF".parse::<DumpFormat>().unwrap(), DumpFormat::Elf);
        assert_eq!("mach-o".parse::<DumpFormat>().unwrap(), DumpFormat::MachO);
        assert!("pe".parse::<DumpFormat>().is_err());
        #[cfg(target_os = "linux")]
        assert_eq!(DumpFormat::default(), DumpFormat::Elf);
    }

    #[test]
    fn copy_zero_fills_vanished_pages() {
        let mut t = MemoryTarget::new(1);
        t.add_region(0x1000, vec![0xaa; 0x3000], Permissions::READ, Backing::Anonymous);
        t.unmap_page(0x2000);

        let mut out = Vec::new();
        let mut errors = ErrorList::default();
        let mut w = CountingWriter::new(&mut out);
        w.pad_to(3).unwrap();
        w.copy_range(
            &t,
            &MemoryRange::new(0x1000, 0x3000, RangeReasons::STACK),
            &mut errors,
        )
        .unwrap();
        assert_eq!(w.offset(), 0x3003);
        assert_eq!(out.len(), 0x3003);
        assert!(out[3..0x1003].iter().all(|b| *b == 0xaa));
        assert!(out[0x1003..0x2003].iter().all(|b| *b == 0));
        assert!(out[0x2003..].iter().all(|b| *b == 0xaa));
        assert!(matches!(
            errors.iter().next(),
            Some(CollectionError::ZeroFilled { start: 0x2000, end: 0x3000 })
        ));
    }

    #[test]
    fn alignment() {
        assert_eq!(align_up(0, 0x1000), 0);
        assert_eq!(align_up(1, 0x1000), 0x1000);
        assert_eq!(align_up(0x1000, 0x1000), 0x1000);
        assert_eq!(align_up(5, 4), 8);
    }
}

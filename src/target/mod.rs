//! The process being dumped, as seen through read-only accessors.
//!
//! A [`DataTarget`] is either a live process suspended through the OS debug
//! interface, the state captured by a crash handler, or a synthetic process
//! held entirely in memory.

pub mod memory;

pub use crate::errors::{ReadError, ThreadContextError};

use {
    crate::{cpu::RegisterContext, module_reader, Pid},
    std::{ffi::OsStr, os::unix::ffi::OsStrExt, path::Path},
};

pub type ThreadId = Pid;

/// The longest string read out of the target in one go
pub const MAX_STRING_LENGTH: usize = 4096;

bitflags::bitflags! {
    /// Protection and sharing flags of a mapping, as listed in `/proc/<pid>/maps`
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
    pub struct Permissions: u8 {
        const READ = 1 << 0;
        const WRITE = 1 << 1;
        const EXECUTE = 1 << 2;
        const SHARED = 1 << 3;
        const PRIVATE = 1 << 4;
    }
}

/// What backs a mapping
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize)]
pub enum Backing {
    File(String),
    Anonymous,
    /// Kernel named regions such as `[stack]`, `[heap]` or `[vdso]`
    Special(String),
}

/// One mapping of the target's address space
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MemoryRegion {
    pub start: u64,
    pub end: u64,
    pub permissions: Permissions,
    /// Offset into the backing file
    pub offset: u64,
    pub backing: Backing,
}

impl MemoryRegion {
    #[inline]
    pub fn contains(&self, address: u64) -> bool {
        self.start <= address && address < self.end
    }

    #[inline]
    pub fn size(&self) -> u64 {
        self.end - self.start
    }

    #[inline]
    pub fn is_readable(&self) -> bool {
        self.permissions.contains(Permissions::READ)
    }

    pub fn file_path(&self) -> Option<&str> {
        match &self.backing {
            Backing::File(path) => Some(path),
            _ => None,
        }
    }
}

/// A loaded image
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize)]
pub struct Module {
    pub base_address: u64,
    pub size: u64,
    pub path: String,
    #[serde(serialize_with = "serialize_build_id")]
    pub build_id: Option<Vec<u8>>,
    pub soname: Option<String>,
}

fn serialize_build_id<S: serde::Serializer>(
    id: &Option<Vec<u8>>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match id {
        Some(id) => serializer.serialize_some(&hex(id)),
        None => serializer.serialize_none(),
    }
}

pub(crate) fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

impl Module {
    pub fn new(base_address: u64, size: u64, path: impl Into<String>) -> Self {
        Self {
            base_address,
            size,
            path: path.into(),
            build_id: None,
            soname: None,
        }
    }

    #[inline]
    pub fn contains(&self, address: u64) -> bool {
        self.base_address <= address && address - self.base_address < self.size
    }

    /// The file name of the module, or the full path if it has none
    pub fn file_name(&self) -> &str {
        Path::new(&self.path)
            .file_name()
            .and_then(OsStr::to_str)
            .unwrap_or(&self.path)
    }
}

/// Signal details for the thread that triggered the dump
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, serde::Serialize)]
pub struct SignalInfo {
    pub signo: i32,
    pub code: i32,
    pub errno: i32,
    /// The faulting address for memory access signals
    pub address: u64,
}

/// Read-only access to the process being dumped.
///
/// Implementations never write to the target. Reads that touch memory which
/// isn't mapped fail with [`ReadError::Unmapped`], which callers treat as a
/// reason to exclude the range rather than abort the dump.
pub trait DataTarget {
    fn pid(&self) -> Pid;

    /// Fills `buf` with the memory at `address`, the read either succeeds for
    /// the whole buffer or fails
    fn read_memory(&self, address: u64, buf: &mut [u8]) -> Result<(), ReadError>;

    /// The threads of the process, in the order they were enumerated. The set
    /// is fixed for the lifetime of the target
    fn enumerate_threads(&self) -> Vec<ThreadId>;

    fn thread_context(&self, tid: ThreadId) -> Result<RegisterContext, ThreadContextError>;

    /// The mappings of the address space, sorted by address
    fn memory_regions(&self) -> &[MemoryRegion];

    /// The loaded images, in address order. The default groups file backed
    /// mappings, build ids and sonames are filled in later by the collector.
    fn enumerate_modules(&self) -> Vec<Module> {
        modules_from_regions(self.memory_regions())
    }

    fn page_size(&self) -> usize {
        4096
    }

    /// The thread the signal was delivered to, when dumping after a crash
    fn crashing_thread(&self) -> Option<ThreadId> {
        None
    }

    fn signal_info(&self) -> Option<SignalInfo> {
        None
    }

    fn process_name(&self) -> Option<String> {
        None
    }

    fn command_line(&self) -> Option<String> {
        None
    }

    fn thread_name(&self, _tid: ThreadId) -> Option<String> {
        None
    }

    /// The raw auxiliary vector of the process
    fn auxv(&self) -> Option<Vec<u8>> {
        None
    }

    /// The raw contents of a per process information file such as `cmdline`,
    /// `environ`, `maps` or `status`
    fn proc_file(&self, _name: &str) -> Option<Vec<u8>> {
        None
    }

    /// Resolves an exported data symbol of `module` to its address in the
    /// target. The default reads the module's file from disk.
    fn resolve_export(&self, module: &Module, symbol: &str) -> Option<u64> {
        match module_reader::resolve_export_from_file(Path::new(&module.path), symbol) {
            Ok(Some(offset)) => Some(module.base_address + offset),
            Ok(None) => None,
            Err(e) => {
                log::debug!("unable to resolve {symbol} in {}: {e}", module.path);
                None
            }
        }
    }

    fn read_u8(&self, address: u64) -> Result<u8, ReadError> {
        let mut b = [0u8; 1];
        self.read_memory(address, &mut b)?;
        Ok(b[0])
    }

    fn read_u16(&self, address: u64) -> Result<u16, ReadError> {
        let mut b = [0u8; 2];
        self.read_memory(address, &mut b)?;
        Ok(u16::from_le_bytes(b))
    }

    fn read_u32(&self, address: u64) -> Result<u32, ReadError> {
        let mut b = [0u8; 4];
        self.read_memory(address, &mut b)?;
        Ok(u32::from_le_bytes(b))
    }

    fn read_u64(&self, address: u64) -> Result<u64, ReadError> {
        let mut b = [0u8; 8];
        self.read_memory(address, &mut b)?;
        Ok(u64::from_le_bytes(b))
    }

    /// Reads a target pointer, the dumper only supports 64-bit targets
    fn read_pointer(&self, address: u64) -> Result<u64, ReadError> {
        self.read_u64(address)
    }

    /// Reads a nul terminated string of at most `max_len` bytes. Reads never
    /// cross into the next page unless the string continues there.
    fn read_c_string(&self, address: u64, max_len: usize) -> Result<String, ReadError> {
        let page = self.page_size() as u64;
        let mut out = Vec::new();
        let mut cursor = address;
        while out.len() < max_len {
            let to_page_end = (page - (cursor % page)) as usize;
            let len = to_page_end.min(max_len - out.len()).min(256);
            let mut chunk = vec![0u8; len];
            self.read_memory(cursor, &mut chunk)?;
            if let Some(nul) = chunk.iter().position(|b| *b == 0) {
                out.extend_from_slice(&chunk[..nul]);
                return Ok(String::from_utf8_lossy(&out).into_owned());
            }
            out.extend_from_slice(&chunk);
            cursor += len as u64;
        }
        Ok(String::from_utf8_lossy(&out).into_owned())
    }
}

/// Builds the module list from the file backed mappings. Consecutive mappings
/// of the same file, starting at file offset 0, form one module.
pub fn modules_from_regions(regions: &[MemoryRegion]) -> Vec<Module> {
    let mut modules: Vec<Module> = Vec::new();
    for region in regions {
        let Some(path) = region.file_path() else {
            continue;
        };

        if let Some(last) = modules.last_mut() {
            if last.path == path && last.base_address + last.size <= region.start {
                last.size = region.end - last.base_address;
                continue;
            }
        }

        if region.offset != 0 || !is_image_path(path) {
            continue;
        }

        modules.push(Module::new(region.start, region.size(), path));
    }
    modules
}

/// Device files and deleted files are not images
fn is_image_path(path: &str) -> bool {
    let p = Path::new(path);
    !(p.starts_with("/dev/") || p.as_os_str().as_bytes().ends_with(b" (deleted)"))
}

#[cfg(test)]
mod test {
    use super::*;

    fn region(start: u64, end: u64, offset: u64, backing: Backing) -> MemoryRegion {
        MemoryRegion {
            start,
            end,
            permissions: Permissions::READ | Permissions::PRIVATE,
            offset,
            backing,
        }
    }

    #[test]
    fn modules_group_consecutive_mappings() {
        let lib = || Backing::File("/usr/lib/libfoo.so".into());
        let regions = [
            region(0x1000, 0x2000, 0, lib()),
            region(0x2000, 0x4000, 0x1000, lib()),
            region(0x4000, 0x5000, 0, Backing::Anonymous),
            region(0x5000, 0x6000, 0x3000, lib()),
            region(0x8000, 0x9000, 0, Backing::File("/dev/zero".into())),
            region(0x9000, 0xa000, 0x1000, Backing::File("/usr/bin/app".into())),
            region(0xa000, 0xb000, 0, Backing::File("/usr/bin/app".into())),
        ];

        let modules = modules_from_regions(&regions);
        assert_eq!(modules.len(), 2);
        assert_eq!(modules[0].path, "/usr/lib/libfoo.so");
        assert_eq!(modules[0].base_address, 0x1000);
        assert_eq!(modules[0].size, 0x5000);
        assert_eq!(modules[0].file_name(), "libfoo.so");
        assert_eq!(modules[1].path, "/usr/bin/app");
        assert_eq!(modules[1].base_address, 0xa000);
        assert!(modules[1].contains(0xafff));
        assert!(!modules[1].contains(0xb000));
    }
}

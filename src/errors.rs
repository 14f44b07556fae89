use {
    crate::{serializers::*, target::ThreadId, Pid},
    error_graph::ErrorList,
    thiserror::Error,
};

#[derive(Debug, Error, serde::Serialize)]
pub enum ReadError {
    #[error("Address {address:#x} (length {length:#x}) is not mapped")]
    Unmapped { address: u64, length: usize },
    #[error("Only {read:#x} of {length:#x} bytes at {address:#x} could be read")]
    Partial {
        address: u64,
        read: usize,
        length: usize,
    },
    #[error("Failed to read {length:#x} bytes at {address:#x}")]
    Io {
        address: u64,
        length: usize,
        #[source]
        #[serde(serialize_with = "serialize_io_error")]
        source: std::io::Error,
    },
}

impl ReadError {
    /// Unmapped and partially mapped reads exclude the range, they never abort
    /// the dump
    pub fn is_unmapped(&self) -> bool {
        matches!(self, Self::Unmapped { .. } | Self::Partial { .. })
    }
}

#[derive(Debug, Error, serde::Serialize)]
pub enum ThreadContextError {
    #[error("Thread {0} is not part of the target process")]
    UnknownThread(ThreadId),
    #[error("Thread {0} could not be suspended, its registers are unavailable")]
    NotSuspended(ThreadId),
    #[error("Reading the registers of thread {tid} failed")]
    Ptrace {
        tid: ThreadId,
        #[source]
        #[serde(serialize_with = "serialize_io_error")]
        source: std::io::Error,
    },
    #[error("Register state of thread {0} was withheld")]
    Withheld(ThreadId),
}

#[cfg(any(target_os = "linux", target_os = "android"))]
#[derive(Debug, Error, serde::Serialize)]
pub enum AttachError {
    #[error("Process {0} does not exist")]
    ProcessNotFound(Pid),
    #[error("Failed to list the threads of process {pid}")]
    TaskList {
        pid: Pid,
        #[source]
        #[serde(serialize_with = "serialize_io_error")]
        source: std::io::Error,
    },
    #[error("Process {0} has no threads left")]
    NoThreads(Pid),
    #[error("Failed to attach to thread {tid} of process {pid}")]
    Attach {
        pid: Pid,
        tid: Pid,
        #[source]
        #[serde(serialize_with = "serialize_nix_error")]
        source: nix::Error,
    },
    #[error("Failed to read the memory map of process {pid}")]
    MemoryMaps {
        pid: Pid,
        #[source]
        #[serde(serialize_with = "serialize_proc_error")]
        source: procfs_core::ProcError,
    },
    #[error("Failed to open {path}")]
    ProcFile {
        path: String,
        #[source]
        #[serde(serialize_with = "serialize_io_error")]
        source: std::io::Error,
    },
}

#[derive(Debug, Error, serde::Serialize)]
pub enum ModuleReaderError {
    #[error("failed to read module memory: {length} bytes at {offset}: {error}")]
    ReadModuleMemory {
        offset: u64,
        length: u64,
        #[source]
        #[serde(serialize_with = "serialize_io_error")]
        error: std::io::Error,
    },
    #[error("failed to parse ELF memory: {0}")]
    Parsing(
        #[from]
        #[serde(serialize_with = "serialize_goblin_error")]
        goblin::error::Error,
    ),
    #[error("failed to read ELF structure: {0}")]
    Scroll(
        #[from]
        #[serde(serialize_with = "serialize_scroll_error")]
        scroll::Error,
    ),
    #[error("failed to open module file {path}")]
    OpenFile {
        path: String,
        #[source]
        #[serde(serialize_with = "serialize_io_error")]
        source: std::io::Error,
    },
    #[error("no program headers")]
    NoProgramHeaders,
    #[error("no build id notes in program headers")]
    NoProgramHeaderNote,
    #[error("no string table available to locate note sections")]
    NoStrTab,
    #[error("no build id note sections")]
    NoSectionNote,
    #[error("the ELF file contains no sections")]
    NoSections,
    #[error("the ELF file does not have a .text section from which to generate a build id")]
    NoTextSection,
    #[error(
        "failed to calculate build id\n\
    ... from program headers: {program_headers}\n\
    ... from sections: {section}\n\
    ... from the text section: {generated}"
    )]
    NoBuildId {
        program_headers: Box<Self>,
        section: Box<Self>,
        generated: Box<Self>,
    },
    #[error("no dynamic string table section")]
    NoDynStrSection,
    #[error("a string in the strtab did not have a terminating nul byte")]
    StrTabNoNulByte,
    #[error("no SONAME found in dynamic linking information")]
    NoSoNameEntry,
    #[error(
        "failed to read SONAME\n\
    ... from program headers: {program_headers}\n\
    ... from sections: {section}"
    )]
    NoSoName {
        program_headers: Box<Self>,
        section: Box<Self>,
    },
    #[error("no dynamic linking information section")]
    NoDynamicSection,
}

#[derive(Debug, Error, serde::Serialize)]
pub enum RuntimeError {
    #[error("Runtime module {module} does not export {symbol}")]
    ExportNotFound { module: String, symbol: String },
    #[error("Failed to read runtime data ({what}) at {address:#x}")]
    Unreadable {
        what: String,
        address: u64,
        #[source]
        source: ReadError,
    },
    #[error("Debug header cookie {0:02x?} is not valid")]
    BadCookie([u8; 4]),
    #[error(
        "Debug header version {found_major}.{found_minor} is not supported (expected major {expected_major})"
    )]
    VersionMismatch {
        found_major: u16,
        found_minor: u16,
        expected_major: u16,
    },
    #[error("Debug header declares {0} tables")]
    TooManyTables(u32),
    #[error("Debug table {table} declares {rows} rows")]
    TooManyRows { table: String, rows: u32 },
    #[error("Debug table {0} is missing")]
    MissingTable(&'static str),
    #[error("Global {0} is not described by the debug tables")]
    MissingGlobal(String),
    #[error("Type {0} is not described by the debug tables")]
    MissingType(String),
    #[error("Field {type_name}::{field} is not described by the debug tables")]
    MissingField { type_name: String, field: String },
    #[error("GC data version {found_major}.{found_minor} is not supported (expected major {expected_major})")]
    GcVersionMismatch {
        found_major: u8,
        found_minor: u8,
        expected_major: u8,
    },
    #[error("GC heap count {0} is out of range")]
    BadHeapCount(i32),
    #[error("Linked structure at {0:#x} loops back on itself")]
    Cycle(u64),
    #[error("GC generation size {found:#x} is implausible (type size {described:#x})")]
    BadGenerationSize { found: u64, described: u64 },
    #[error("{what} at {base:#x} extends past the end of the address space")]
    AddressOverflow { what: &'static str, base: u64 },
    #[error("Malformed runtime data")]
    Scroll(
        #[from]
        #[serde(serialize_with = "serialize_scroll_error")]
        scroll::Error,
    ),
    #[error("Reading runtime data was forced to fail")]
    Injected,
}

impl RuntimeError {
    pub(crate) fn unreadable(what: impl Into<String>, address: u64, source: ReadError) -> Self {
        Self::Unreadable {
            what: what.into(),
            address,
            source,
        }
    }
}

/// Problems encountered while collecting the snapshot that did not prevent a
/// dump from being produced
#[derive(Debug, Error, serde::Serialize)]
pub enum CollectionError {
    #[error("Registers of thread {0} are unavailable")]
    ThreadContextUnavailable(ThreadId, #[source] ThreadContextError),
    #[error("Stack pointer {stack_pointer:#x} of thread {tid} is not in a readable mapping")]
    NoStack { tid: ThreadId, stack_pointer: u64 },
    #[error("Excluded unreadable pages {start:#x}-{end:#x} ({reasons})")]
    PagesExcluded { start: u64, end: u64, reasons: String },
    #[error("Failed to identify module {path}")]
    ModuleIdentity {
        path: String,
        #[source]
        source: ModuleReaderError,
    },
    #[error("Managed heap skipped")]
    ManagedHeapSkipped(#[source] RuntimeError),
    #[error("Heap segment {address:#x} has allocated {allocated:#x} outside [{mem:#x}, {reserved:#x}]")]
    BadHeapSegment {
        address: u64,
        mem: u64,
        allocated: u64,
        reserved: u64,
    },
    #[error("Managed thread list skipped")]
    ManagedThreadsSkipped(#[source] RuntimeError),
    #[error("Failed to suspend thread {tid}")]
    SuspendThread {
        tid: ThreadId,
        #[source]
        #[serde(serialize_with = "serialize_io_error")]
        source: std::io::Error,
    },
    #[error("Failed to resume thread {tid}")]
    ResumeThread {
        tid: ThreadId,
        #[source]
        #[serde(serialize_with = "serialize_io_error")]
        source: std::io::Error,
    },
    #[error("Range {start:#x}-{end:#x} became unreadable after validation and was zero filled")]
    ZeroFilled { start: u64, end: u64 },
}

/// Soft errors grouped by the collection phase that produced them
#[derive(Debug, Error, serde::Serialize)]
pub enum SoftError {
    #[error("Errors occurred while capturing threads")]
    ThreadInfoErrors(#[source] ErrorList<CollectionError>),
    #[error("Errors occurred while identifying modules")]
    ModuleIdentityErrors(#[source] ErrorList<CollectionError>),
    #[error("Errors occurred while reading runtime state")]
    RuntimeErrors(#[source] ErrorList<CollectionError>),
    #[error("Errors occurred while validating memory ranges")]
    MemoryRangeErrors(#[source] ErrorList<CollectionError>),
    #[error("Errors occurred while writing the dump")]
    WriterErrors(#[source] ErrorList<CollectionError>),
}

#[derive(Debug, Error, serde::Serialize)]
pub enum CrashInfoError {
    #[error("Process {0} has no threads to dump")]
    NoThreads(Pid),
    #[error("Collection was interrupted")]
    Interrupted,
}

#[derive(Debug, Error, serde::Serialize)]
pub enum MemoryWriterError {
    #[error("IO error when writing to DumpBuf")]
    IOError(
        #[from]
        #[serde(serialize_with = "serialize_io_error")]
        std::io::Error,
    ),
    #[error("Failed integer conversion")]
    TryFromIntError(
        #[from]
        #[serde(skip)]
        std::num::TryFromIntError,
    ),
    #[error("Failed to write to buffer")]
    Scroll(
        #[from]
        #[serde(serialize_with = "serialize_scroll_error")]
        scroll::Error,
    ),
}

#[derive(Debug, Error, serde::Serialize)]
pub enum WriteError {
    #[error("Failed to write the dump")]
    Io(
        #[from]
        #[serde(serialize_with = "serialize_io_error")]
        std::io::Error,
    ),
    #[error("Failed to lay out dump metadata")]
    MemoryWriter(#[from] MemoryWriterError),
    #[error("Failed to encode a dump record")]
    Scroll(
        #[from]
        #[serde(serialize_with = "serialize_scroll_error")]
        scroll::Error,
    ),
    #[error("Failed to convert soft errors to JSON")]
    Json(
        #[from]
        #[serde(serialize_with = "serialize_json_error")]
        serde_json::Error,
    ),
    #[error("{what} does not fit the format ({value:#x})")]
    TooLarge { what: &'static str, value: u64 },
    #[error("Failed to create {path}")]
    Create {
        path: String,
        #[source]
        #[serde(serialize_with = "serialize_io_error")]
        source: std::io::Error,
    },
}

#[derive(Debug, Error, serde::Serialize)]
pub enum ReportError {
    #[error("Failed to write the crash report to {path}")]
    Io {
        path: String,
        #[source]
        #[serde(serialize_with = "serialize_io_error")]
        source: std::io::Error,
    },
    #[error("Failed to encode the crash report")]
    Json(
        #[from]
        #[serde(serialize_with = "serialize_json_error")]
        serde_json::Error,
    ),
}

#[derive(Debug, Error, serde::Serialize)]
pub enum ConfigError {
    #[error("Unknown dump type {0}, expected triage, normal, withheap or full")]
    UnknownDumpType(String),
    #[error("Unknown dump format {0}, expected minidump, elf or macho")]
    UnknownFormat(String),
    #[error("Invalid memory range {0}, expected ADDRESS:LENGTH")]
    BadRange(String),
}

#[derive(Debug, Error, serde::Serialize)]
pub enum NamingError {
    #[error("Unknown placeholder %{0} in dump name template")]
    UnknownPlaceholder(char),
    #[error("Dump name template ends with a lone %")]
    TrailingPercent,
    #[error("No running process is named {0}")]
    NoProcessNamed(String),
    #[error("Several processes are named {name}: {pids:?}")]
    AmbiguousName { name: String, pids: Vec<Pid> },
    #[error("Failed to scan running processes")]
    ProcScan(
        #[from]
        #[serde(serialize_with = "serialize_io_error")]
        std::io::Error,
    ),
}

pub use minidump_common::format::{
    self, CvSignature, PlatformId, ProcessorArchitecture as MDCPUArchitecture,
    CPU_INFORMATION as MDCPUInformation, MINIDUMP_DIRECTORY as MDRawDirectory,
    MINIDUMP_EXCEPTION as MDException, MINIDUMP_EXCEPTION_STREAM as MDRawExceptionStream,
    MINIDUMP_HEADER as MDRawHeader, MINIDUMP_LOCATION_DESCRIPTOR as MDLocationDescriptor,
    MINIDUMP_MEMORY_DESCRIPTOR as MDMemoryDescriptor, MINIDUMP_MODULE as MDRawModule,
    MINIDUMP_SIGNATURE as MD_HEADER_SIGNATURE, MINIDUMP_STREAM_TYPE as MDStreamType,
    MINIDUMP_SYSTEM_INFO as MDRawSystemInfo, MINIDUMP_THREAD as MDRawThread,
    MINIDUMP_THREAD_NAME as MDRawThreadName,
    MINIDUMP_VERSION as MD_HEADER_VERSION, VS_FIXEDFILEINFO as MDVSFixedFileInfo,
};

/// Header of the `Memory64ListStream`. Every range's bytes follow each other
/// in one block starting at `base_rva`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, scroll::Pread, scroll::Pwrite, scroll::SizeWith)]
pub struct MDMemory64List {
    pub number_of_memory_ranges: u64,
    pub base_rva: u64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, scroll::Pread, scroll::Pwrite, scroll::SizeWith)]
pub struct MDMemoryDescriptor64 {
    pub start_of_memory_range: u64,
    pub data_size: u64,
}

/// Exception code recorded for dumps taken without a signal
pub const MD_EXCEPTION_CODE_LIN_DUMP_REQUESTED: u32 = 0xffff_ffff;

pub mod exception_stream;
pub mod memory64_list_stream;
pub mod module_list_stream;
pub mod proc_streams;
pub mod systeminfo_stream;
pub mod thread_list_stream;
pub mod thread_names_stream;

use crate::{
    crash_info::Snapshot,
    errors::MemoryWriterError,
    mem_writer::*,
    minidump_format::*,
    target::DataTarget,
};

type Result<T> = std::result::Result<T, MemoryWriterError>;

pub type DumpBuf = Buffer;

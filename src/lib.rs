cfg_if::cfg_if! {
    if #[cfg(any(target_os = "linux", target_os = "android"))] {
        pub mod linux;

        pub use linux::{CrashTarget, PtraceTarget, SuspendGuard};
    }
}

pub mod config;
pub mod cpu;
pub mod crash_info;
pub mod crash_report;
pub mod elf_writer;
pub mod errors;
pub mod exit_status;
pub mod macho_writer;
pub mod minidump_format;
pub mod minidump_writer;
pub mod module_reader;
pub mod naming;
pub mod runtime;
pub mod target;
pub mod thread_info;
pub mod writer;

mod dir_section;
pub mod host;
mod mem_writer;
mod sections;
mod serializers;

pub use config::{DumpOptions, DumpType};
pub use crash_info::{CrashInfo, Snapshot};
pub use exit_status::ExitStatus;
pub use target::DataTarget;
pub use writer::{DumpFormat, DumpWriter};

/// Process and thread ids as the kernel reports them
pub type Pid = i32;

failspot::failspot_name! {
    pub enum FailSpotName {
        AttachThread,
        ReadThreadContext,
        ReadDebugHeader,
        WalkGcHeap,
    }
}

//! Data targets backed by the Linux debugging interfaces

pub mod auxv;
mod crash_target;
mod mem_reader;
mod ptrace_target;

pub use {
    crash_target::CrashTarget,
    mem_reader::MemReader,
    ptrace_target::{PtraceTarget, SuspendGuard},
};

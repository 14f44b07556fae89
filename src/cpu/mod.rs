//! Register state of the architecture the dumper runs on.
//!
//! Dumps are only produced for the host architecture, each module exposes
//! the same `RegisterContext` API along with the constants the writers need
//! to describe the machine.

cfg_if::cfg_if! {
    if #[cfg(target_arch = "x86_64")] {
        mod x86_64;
        pub use x86_64::*;
    } else if #[cfg(target_arch = "aarch64")] {
        mod aarch64;
        pub use aarch64::*;
    } else {
        compile_error!("unsupported target architecture");
    }
}

/// Splits 64-bit registers into the 32-bit words Mach-O thread states are
/// counted in
pub(crate) fn u64_words(values: &[u64]) -> Vec<u32> {
    values
        .iter()
        .flat_map(|v| [*v as u32, (*v >> 32) as u32])
        .collect()
}

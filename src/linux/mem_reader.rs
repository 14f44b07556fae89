//! Functionality for reading a remote process's memory

use {
    crate::{errors::ReadError, Pid},
    nix::errno::Errno,
    std::sync::OnceLock,
};

#[derive(Debug)]
enum Style {
    /// Uses [`process_vm_readv`](https://linux.die.net/man/2/process_vm_readv)
    /// to read the memory.
    ///
    /// This is not available on old <3.2 (really, ancient) kernels, and requires
    /// the same permissions as ptrace
    VirtualMem,
    /// Reads the memory from `/proc/<pid>/mem`
    ///
    /// Available on basically all versions of Linux, but could fail if the process
    /// has insufficient privileges, ie ptrace
    File(std::fs::File),
    /// Reads the memory with [ptrace (`PTRACE_PEEKDATA`)](https://man7.org/linux/man-pages/man2/ptrace.2.html)
    ///
    /// Reads data one word at a time, so slow, but fairly reliable, as long as
    /// the process can be ptraced
    Ptrace,
    /// No methods succeeded, generally there isn't a case where failing a syscall
    /// will work if called again
    Unavailable {
        vmem: Errno,
        file: Errno,
        ptrace: Errno,
    },
}

/// The address isn't mapped. Every method reports these for a bad address
/// while working fine otherwise.
#[inline]
fn is_unmapped(err: Errno) -> bool {
    matches!(err, Errno::EFAULT | Errno::EIO)
}

pub struct MemReader {
    /// The pid of the child to read
    pid: nix::unistd::Pid,
    style: OnceLock<Style>,
}

impl std::fmt::Debug for MemReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self.style.get() {
            Some(Style::VirtualMem) => "process_vm_readv",
            Some(Style::File(_)) => "/proc/<pid>/mem",
            Some(Style::Ptrace) => "PTRACE_PEEKDATA",
            Some(Style::Unavailable { vmem, file, ptrace }) => {
                return write!(
                    f,
                    "process_vm_readv: {vmem}, /proc/<pid>/mem: {file}, PTRACE_PEEKDATA: {ptrace}"
                );
            }
            None => "unknown",
        };

        f.write_str(s)
    }
}

impl MemReader {
    /// Creates a [`Self`] for the specified process id, the method used will
    /// be probed for on the first access
    #[inline]
    pub fn new(pid: Pid) -> Self {
        Self {
            pid: nix::unistd::Pid::from_raw(pid),
            style: OnceLock::default(),
        }
    }

    /// Fills all of `dst` with the memory at `address`
    pub fn read_exact(&self, address: u64, dst: &mut [u8]) -> Result<(), ReadError> {
        let length = dst.len();
        let mut done = 0;
        while done < length {
            match self.read(address as usize + done, &mut dst[done..]) {
                Ok(0) => return Err(short_read(address, done, length)),
                Ok(n) => done += n,
                Err(err) if is_unmapped(err) => return Err(short_read(address, done, length)),
                Err(err) => {
                    return Err(ReadError::Io {
                        address,
                        length,
                        source: err.into(),
                    })
                }
            }
        }
        Ok(())
    }

    fn read(&self, address: usize, dst: &mut [u8]) -> Result<usize, Errno> {
        if let Some(rs) = self.style.get() {
            return match rs {
                Style::VirtualMem => Self::vmem(self.pid, address, dst),
                Style::File(file) => Self::file(file, address, dst),
                Style::Ptrace => Self::ptrace(self.pid, address, dst),
                Style::Unavailable { ptrace, .. } => Err(*ptrace),
            };
        }

        // Attempt to read in order of speed. A method that only failed
        // because the address is bad still works and is kept.
        let vmem = match Self::vmem(self.pid, address, dst) {
            Ok(len) => return self.settle(Style::VirtualMem, Ok(len)),
            Err(err) if is_unmapped(err) => return self.settle(Style::VirtualMem, Err(err)),
            Err(err) => err,
        };

        let file = match std::fs::File::open(format!("/proc/{}/mem", self.pid)) {
            Ok(file) => match Self::file(&file, address, dst) {
                Ok(len) => return self.settle(Style::File(file), Ok(len)),
                Err(err) if is_unmapped(err) => return self.settle(Style::File(file), Err(err)),
                Err(err) => err,
            },
            Err(err) => err
                .raw_os_error()
                .map_or(Errno::UnknownErrno, Errno::from_raw),
        };

        let ptrace = match Self::ptrace(self.pid, address, dst) {
            Ok(len) => return self.settle(Style::Ptrace, Ok(len)),
            Err(err) if is_unmapped(err) => return self.settle(Style::Ptrace, Err(err)),
            Err(err) => err,
        };

        log::warn!(
            "no way to read the memory of {}: process_vm_readv: {vmem}, /proc/<pid>/mem: {file}, PTRACE_PEEKDATA: {ptrace}",
            self.pid
        );
        self.settle(Style::Unavailable { vmem, file, ptrace }, Err(ptrace))
    }

    fn settle(&self, style: Style, res: Result<usize, Errno>) -> Result<usize, Errno> {
        log::debug!("reading the memory of {} with {style:?}", self.pid);
        // Only one reader probes, the target is read from a single thread
        let _ = self.style.set(style);
        res
    }

    #[inline]
    fn vmem(pid: nix::unistd::Pid, address: usize, dst: &mut [u8]) -> Result<usize, Errno> {
        let remote = &[nix::sys::uio::RemoteIoVec {
            base: address,
            len: dst.len(),
        }];
        nix::sys::uio::process_vm_readv(pid, &mut [std::io::IoSliceMut::new(dst)], remote)
    }

    #[inline]
    fn file(file: &std::fs::File, src: usize, dst: &mut [u8]) -> Result<usize, Errno> {
        use std::os::unix::fs::FileExt;

        file.read_at(dst, src as u64)
            .map_err(|err| err.raw_os_error().map_or(Errno::EIO, Errno::from_raw))
    }

    #[inline]
    fn ptrace(pid: nix::unistd::Pid, address: usize, dst: &mut [u8]) -> Result<usize, Errno> {
        const WORD: usize = std::mem::size_of::<libc::c_long>();
        let mut offset = 0;

        for chunk in dst.chunks_mut(WORD) {
            match nix::sys::ptrace::read(pid, (address + offset) as nix::sys::ptrace::AddressType)
            {
                Ok(word) => chunk.copy_from_slice(&word.to_ne_bytes()[..chunk.len()]),
                // Hand back what was read so far
                Err(_) if offset > 0 => return Ok(offset),
                Err(err) => return Err(err),
            }
            offset += chunk.len();
        }

        Ok(dst.len())
    }
}

fn short_read(address: u64, read: usize, length: usize) -> ReadError {
    if read == 0 {
        ReadError::Unmapped { address, length }
    } else {
        ReadError::Partial {
            address,
            read,
            length,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn reads_own_memory() {
        let data: Vec<u8> = (0..=255).collect();
        let reader = MemReader::new(std::process::id() as Pid);

        let mut out = vec![0u8; data.len()];
        reader
            .read_exact(data.as_ptr() as u64, &mut out)
            .unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn unmapped_address() {
        let reader = MemReader::new(std::process::id() as Pid);
        let mut out = [0u8; 16];
        let err = reader.read_exact(8, &mut out).unwrap_err();
        assert!(err.is_unmapped(), "{err}");
    }
}

//! Live processes, stopped with ptrace for as long as the dump takes

use {
    super::{auxv, mem_reader::MemReader},
    crate::{
        cpu::{RegisterContext, ELF_FPREGS_SIZE, ELF_NGREG},
        errors::{AttachError, CollectionError, ReadError, ThreadContextError},
        target::{Backing, DataTarget, MemoryRegion, Permissions, ThreadId},
        Pid,
    },
    byteorder::{ByteOrder, NativeEndian},
    error_graph::WriteErrorList,
    goblin::elf::note::NT_PRSTATUS,
    nix::{
        errno::Errno,
        sys::{ptrace, wait},
    },
    procfs_core::{
        process::{MMPermissions, MMapPath, MemoryMaps},
        FromRead,
    },
    std::{ops::Deref, path::PathBuf},
};

/// Regset of the floating point registers, goblin has no constant for it
const NT_PRFPREG: u32 = 2;

/// Per process files that can be copied into a dump verbatim
const PROC_FILES: &[&str] = &["auxv", "cmdline", "environ", "maps", "status", "limits"];

/// A live process. Only reachable through [`SuspendGuard`], so every thread
/// that could be attached stays stopped while the target is read.
#[derive(Debug)]
pub struct PtraceTarget {
    pid: Pid,
    proc_dir: PathBuf,
    /// `/proc/<pid>/task` at attach time, main thread first
    threads: Vec<ThreadId>,
    /// The threads that are currently ptrace stopped
    attached: Vec<ThreadId>,
    regions: Vec<MemoryRegion>,
    auxv: Option<Vec<u8>>,
    page_size: usize,
    mem: MemReader,
}

/// Keeps the threads of a [`PtraceTarget`] stopped. Dropping the guard
/// detaches from every thread, which lets the process continue.
#[derive(Debug)]
pub struct SuspendGuard {
    target: PtraceTarget,
}

impl PtraceTarget {
    /// Stops every thread of `pid`.
    ///
    /// Failing to stop the main thread fails the attach, threads that exit or
    /// refuse to stop in the meantime are kept with their registers
    /// unavailable.
    pub fn attach(pid: Pid) -> Result<SuspendGuard, AttachError> {
        let proc_dir = PathBuf::from(format!("/proc/{pid}"));
        if !proc_dir.exists() {
            return Err(AttachError::ProcessNotFound(pid));
        }

        let threads = enumerate_tasks(pid, &proc_dir)?;
        if threads.is_empty() {
            return Err(AttachError::NoThreads(pid));
        }

        // Any early return from here on drops the guard, which detaches
        // whatever was attached so far
        let mut guard = SuspendGuard {
            target: PtraceTarget {
                pid,
                proc_dir,
                threads,
                attached: Vec::new(),
                regions: Vec::new(),
                auxv: None,
                page_size: host_page_size(),
                mem: MemReader::new(pid),
            },
        };

        let target = &mut guard.target;
        for tid in target.threads.clone() {
            match suspend_thread(tid) {
                Ok(()) => target.attached.push(tid),
                Err(source) if tid == pid => {
                    return Err(AttachError::Attach { pid, tid, source });
                }
                // This may fail if the thread has just died or is being
                // debugged by someone else
                Err(e) => log::warn!("unable to suspend thread {tid} of {pid}: {e}"),
            }
        }

        target.regions = read_memory_maps(pid, &target.proc_dir)?;
        target.auxv = std::fs::read(target.proc_dir.join("auxv"))
            .map_err(|e| log::debug!("unable to read the auxv of {pid}: {e}"))
            .ok();
        if let Some(page) = target
            .auxv
            .as_deref()
            .and_then(|raw| auxv::find(raw, auxv::AT_PAGESZ))
        {
            target.page_size = page as usize;
        }

        log::debug!(
            "attached to {}/{} threads of {pid}, {} mappings",
            target.attached.len(),
            target.threads.len(),
            target.regions.len()
        );
        Ok(guard)
    }

    fn is_attached(&self, tid: ThreadId) -> bool {
        self.attached.contains(&tid)
    }

    fn read_proc_string(&self, path: PathBuf) -> Option<String> {
        let raw = std::fs::read(&path)
            .map_err(|e| log::debug!("unable to read {}: {e}", path.display()))
            .ok()?;
        Some(String::from_utf8_lossy(&raw).trim_end_matches('\n').to_owned())
    }
}

impl SuspendGuard {
    /// Resumes the process, reporting threads that couldn't be detached
    pub fn resume(mut self, soft_errors: impl WriteErrorList<CollectionError>) {
        self.detach_all(soft_errors);
    }

    fn detach_all(&mut self, mut soft_errors: impl WriteErrorList<CollectionError>) {
        for tid in self.target.attached.drain(..) {
            if let Err(e) = resume_thread(tid) {
                log::warn!("unable to resume thread {tid}: {e}");
                soft_errors.push(CollectionError::ResumeThread {
                    tid,
                    source: e.into(),
                });
            }
        }
    }
}

impl Deref for SuspendGuard {
    type Target = PtraceTarget;

    fn deref(&self) -> &Self::Target {
        &self.target
    }
}

impl Drop for SuspendGuard {
    fn drop(&mut self) {
        let mut errors = error_graph::ErrorList::default();
        self.detach_all(&mut errors);
    }
}

/// Attaches to `tid` and waits until it has stopped
fn suspend_thread(tid: ThreadId) -> Result<(), Errno> {
    failspot::failspot!(AttachThread bail(Errno::EPERM));

    let pid = nix::unistd::Pid::from_raw(tid);
    ptrace::attach(pid)?;
    loop {
        match wait::waitpid(pid, Some(wait::WaitPidFlag::__WALL)) {
            Ok(_) => return Ok(()),
            Err(Errno::EINTR) => continue,
            Err(e) => {
                // Don't leave a half attached thread behind
                let _ = ptrace::detach(pid, None);
                return Err(e);
            }
        }
    }
}

fn resume_thread(tid: ThreadId) -> Result<(), Errno> {
    ptrace::detach(nix::unistd::Pid::from_raw(tid), None)
}

/// Parse /proc/$pid/task to list all the threads of the process identified by
/// pid. The main thread comes first, the others in ascending order.
fn enumerate_tasks(pid: Pid, proc_dir: &std::path::Path) -> Result<Vec<ThreadId>, AttachError> {
    let task_dir = proc_dir.join("task");
    let entries = std::fs::read_dir(&task_dir).map_err(|source| AttachError::TaskList { pid, source })?;

    let mut threads: Vec<ThreadId> = entries
        .filter_map(Result::ok)
        .filter_map(|entry| entry.file_name().to_str()?.parse().ok())
        .collect();
    threads.sort_unstable_by_key(|tid| (*tid != pid, *tid));
    Ok(threads)
}

fn read_memory_maps(pid: Pid, proc_dir: &std::path::Path) -> Result<Vec<MemoryRegion>, AttachError> {
    let path = proc_dir.join("maps");
    let file = std::fs::File::open(&path).map_err(|source| AttachError::ProcFile {
        path: path.display().to_string(),
        source,
    })?;
    let maps = MemoryMaps::from_read(file).map_err(|source| AttachError::MemoryMaps { pid, source })?;

    let mut regions: Vec<MemoryRegion> = maps
        .into_iter()
        .map(|map| MemoryRegion {
            start: map.address.0,
            end: map.address.1,
            permissions: permissions(map.perms),
            offset: map.offset,
            backing: backing(map.pathname),
        })
        .filter(|region| region.end > region.start)
        .collect();
    regions.sort_by_key(|region| region.start);
    Ok(regions)
}

fn permissions(perms: MMPermissions) -> Permissions {
    let mut out = Permissions::empty();
    for (from, to) in [
        (MMPermissions::READ, Permissions::READ),
        (MMPermissions::WRITE, Permissions::WRITE),
        (MMPermissions::EXECUTE, Permissions::EXECUTE),
        (MMPermissions::SHARED, Permissions::SHARED),
        (MMPermissions::PRIVATE, Permissions::PRIVATE),
    ] {
        if perms.contains(from) {
            out |= to;
        }
    }
    out
}

fn backing(path: MMapPath) -> Backing {
    match path {
        MMapPath::Path(path) => Backing::File(path.to_string_lossy().into_owned()),
        MMapPath::Anonymous => Backing::Anonymous,
        MMapPath::Heap => Backing::Special("[heap]".into()),
        MMapPath::Stack => Backing::Special("[stack]".into()),
        MMapPath::TStack(tid) => Backing::Special(format!("[stack:{tid}]")),
        MMapPath::Vdso => Backing::Special("[vdso]".into()),
        MMapPath::Vvar => Backing::Special("[vvar]".into()),
        MMapPath::Vsyscall => Backing::Special("[vsyscall]".into()),
        MMapPath::Other(name) => Backing::Special(name),
        other => Backing::Special(format!("{other:?}")),
    }
}

fn host_page_size() -> usize {
    // SAFETY: sysconf has no preconditions
    match unsafe { libc::sysconf(libc::_SC_PAGESIZE) } {
        size if size > 0 => size as usize,
        _ => 4096,
    }
}

/// Reads one register set of a stopped thread, returning how many bytes the
/// kernel filled in
fn get_regset(tid: ThreadId, note: u32, buf: &mut [u8]) -> Result<usize, Errno> {
    let mut iov = libc::iovec {
        iov_base: buf.as_mut_ptr().cast(),
        iov_len: buf.len(),
    };
    // nix only exposes the general purpose set, so we have to do it ourselves.
    // SAFETY: the kernel writes at most iov_len bytes to buf, which outlives
    // the call, and updates iov_len with the size of the set
    let res = unsafe {
        libc::ptrace(
            libc::PTRACE_GETREGSET,
            tid,
            note as libc::c_ulong,
            &mut iov as *mut libc::iovec,
        )
    };
    Errno::result(res)?;
    Ok(iov.iov_len)
}

impl DataTarget for PtraceTarget {
    fn pid(&self) -> Pid {
        self.pid
    }

    fn read_memory(&self, address: u64, buf: &mut [u8]) -> Result<(), ReadError> {
        self.mem.read_exact(address, buf)
    }

    fn enumerate_threads(&self) -> Vec<ThreadId> {
        self.threads.clone()
    }

    fn thread_context(&self, tid: ThreadId) -> Result<RegisterContext, ThreadContextError> {
        if !self.threads.contains(&tid) {
            return Err(ThreadContextError::UnknownThread(tid));
        }
        if !self.is_attached(tid) {
            return Err(ThreadContextError::NotSuspended(tid));
        }
        failspot::failspot!(ReadThreadContext bail(ThreadContextError::Withheld(tid)));

        let mut raw = [0u8; ELF_NGREG * 8];
        get_regset(tid, NT_PRSTATUS, &mut raw).map_err(|e| ThreadContextError::Ptrace {
            tid,
            source: e.into(),
        })?;
        let mut gregs = [0u64; ELF_NGREG];
        NativeEndian::read_u64_into(&raw, &mut gregs);

        let mut fpregs = vec![0u8; ELF_FPREGS_SIZE];
        match get_regset(tid, NT_PRFPREG, &mut fpregs) {
            Ok(len) => fpregs.truncate(len),
            Err(e) => {
                log::debug!("float registers of thread {tid} unavailable: {e}");
                fpregs.clear();
            }
        }

        Ok(RegisterContext::from_elf_notes(&gregs, &fpregs))
    }

    fn memory_regions(&self) -> &[MemoryRegion] {
        &self.regions
    }

    fn page_size(&self) -> usize {
        self.page_size
    }

    fn process_name(&self) -> Option<String> {
        self.read_proc_string(self.proc_dir.join("comm"))
    }

    fn command_line(&self) -> Option<String> {
        let raw = self.proc_file("cmdline")?;
        let args: Vec<_> = raw
            .split(|b| *b == 0)
            .filter(|arg| !arg.is_empty())
            .map(String::from_utf8_lossy)
            .collect();
        (!args.is_empty()).then(|| args.join(" "))
    }

    fn thread_name(&self, tid: ThreadId) -> Option<String> {
        self.read_proc_string(self.proc_dir.join(format!("task/{tid}/comm")))
    }

    fn auxv(&self) -> Option<Vec<u8>> {
        self.auxv.clone()
    }

    fn proc_file(&self, name: &str) -> Option<Vec<u8>> {
        if !PROC_FILES.contains(&name) {
            return None;
        }
        let path = self.proc_dir.join(name);
        std::fs::read(&path)
            .map_err(|e| log::debug!("unable to read {}: {e}", path.display()))
            .ok()
    }
}

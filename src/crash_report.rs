//! The JSON crash report written next to the dump.
//!
//! The report summarizes the snapshot for people and tools that don't read
//! dumps: why the process died, where each thread was, which images were
//! loaded and how complete the collection was.

use {
    crate::{
        config::DumpType,
        crash_info::{Outcome, RuntimeInfo, Snapshot},
        errors::{CollectionError, ReportError, WriteError},
        host,
        target::{DataTarget, Module, SignalInfo, ThreadId},
        thread_info::{ContextState, ThreadInfo},
    },
    error_graph::ErrorList,
    serde::Serialize,
    std::path::{Path, PathBuf},
};

/// Frames listed per thread, counting the instruction pointer
pub const MAX_FRAMES: usize = 32;

const REPORT_SUFFIX: &str = ".crashreport.json";

#[derive(Debug, Serialize)]
pub struct FaultReason {
    pub signal: i32,
    pub signal_name: &'static str,
    pub code: i32,
    pub address: u64,
}

impl From<SignalInfo> for FaultReason {
    fn from(signal: SignalInfo) -> Self {
        Self {
            signal: signal.signo,
            signal_name: signal_name(signal.signo),
            code: signal.code,
            address: signal.address,
        }
    }
}

#[derive(Debug, PartialEq, Eq, Serialize)]
pub struct Frame {
    pub address: u64,
    /// `module+offset`, when the address lies in a known image
    pub location: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ThreadReport {
    pub tid: ThreadId,
    pub name: Option<String>,
    pub managed_thread_id: Option<u32>,
    pub is_faulting: bool,
    /// Why the registers are missing, `frames` is empty then
    pub context_unavailable: Option<String>,
    pub frames: Vec<Frame>,
}

#[derive(Debug, Serialize)]
pub struct Environment {
    pub process_name: Option<String>,
    pub command_line: Option<String>,
    pub dumper_version: &'static str,
    pub architecture: &'static str,
    pub dump_type: DumpType,
    pub os_release: String,
}

#[derive(Debug, Serialize)]
pub struct CollectionOutcome {
    pub outcome: Outcome,
    pub runtime: Option<RuntimeInfo>,
    pub managed_heap_skipped: Option<String>,
    pub managed_threads_skipped: Option<String>,
    pub memory_ranges: usize,
    pub memory_bytes: u64,
    pub soft_errors: serde_json::Value,
    /// Pages that vanished while the dump was written and were zero filled
    pub write_errors: serde_json::Value,
    /// Why the dump file couldn't be written at all
    pub dump_error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CrashReport {
    pub pid: crate::Pid,
    pub fault: Option<FaultReason>,
    pub faulting_thread: Option<ThreadId>,
    pub managed_faulting_thread: Option<u32>,
    pub threads: Vec<ThreadReport>,
    pub modules: Vec<Module>,
    pub environment: Environment,
    pub collection: CollectionOutcome,
}

impl CrashReport {
    /// Builds the report. The target must still be suspended since the frame
    /// walk reads its stacks.
    pub fn build<T: DataTarget>(snapshot: &Snapshot, target: &T) -> Self {
        let managed_id = |tid: ThreadId| {
            snapshot
                .managed_threads
                .iter()
                .find(|m| m.os_thread_id == tid as u64)
                .map(|m| m.managed_id)
        };

        let threads = snapshot
            .threads
            .iter()
            .map(|thread| ThreadReport {
                tid: thread.tid,
                name: thread.name.clone(),
                managed_thread_id: managed_id(thread.tid),
                is_faulting: thread.is_faulting,
                context_unavailable: match &thread.context {
                    ContextState::Unavailable(reason) => Some(reason.clone()),
                    ContextState::Available(_) => None,
                },
                frames: walk_frames(snapshot, target, thread),
            })
            .collect();

        let faulting_thread = snapshot.faulting_thread().map(|t| t.tid);
        let soft_errors = serde_json::to_value(&snapshot.soft_errors).unwrap_or_else(|e| {
            log::warn!("unable to encode soft errors for the report: {e}");
            serde_json::Value::Null
        });

        Self {
            pid: snapshot.pid,
            fault: snapshot.exception.map(|e| e.signal.into()),
            faulting_thread,
            managed_faulting_thread: faulting_thread.and_then(managed_id),
            threads,
            modules: snapshot.modules.clone(),
            environment: Environment {
                process_name: snapshot.process_name.clone(),
                command_line: snapshot.command_line.clone(),
                dumper_version: env!("CARGO_PKG_VERSION"),
                architecture: snapshot.arch,
                dump_type: snapshot.dump_type,
                os_release: host::os_information().release,
            },
            collection: CollectionOutcome {
                outcome: snapshot.outcome(),
                runtime: snapshot.runtime.clone(),
                managed_heap_skipped: snapshot.managed_heap_skipped.clone(),
                managed_threads_skipped: snapshot.managed_threads_skipped.clone(),
                memory_ranges: snapshot.ranges.len(),
                memory_bytes: snapshot.memory_size(),
                soft_errors,
                write_errors: serde_json::Value::Array(Vec::new()),
                dump_error: None,
            },
        }
    }

    /// Records the problems the dump writer ran into
    pub fn set_write_errors(&mut self, errors: &ErrorList<CollectionError>) {
        match serde_json::to_value(errors) {
            Ok(value) => self.collection.write_errors = value,
            Err(e) => log::warn!("unable to encode write errors for the report: {e}"),
        }
    }

    /// Records the error that stopped the dump, with its causes
    pub fn set_dump_error(&mut self, error: &WriteError) {
        let mut message = error.to_string();
        let mut source = std::error::Error::source(error);
        while let Some(cause) = source {
            message.push_str(": ");
            message.push_str(&cause.to_string());
            source = cause.source();
        }
        self.collection.dump_error = Some(message);
    }

    pub fn write(&self, path: &Path) -> Result<(), ReportError> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json).map_err(|source| ReportError::Io {
            path: path.display().to_string(),
            source,
        })?;
        log::info!("wrote crash report to {}", path.display());
        Ok(())
    }
}

/// `<dump>.crashreport.json`
pub fn report_path(dump_path: &Path) -> PathBuf {
    let mut path = dump_path.as_os_str().to_owned();
    path.push(REPORT_SUFFIX);
    PathBuf::from(path)
}

/// The instruction pointer followed by the return addresses found by
/// following saved frame pointers. Frame records are `[saved fp, return
/// address]` on both supported architectures. The walk stops at the first
/// record outside the thread's stack or one that doesn't move up the stack.
fn walk_frames<T: DataTarget>(snapshot: &Snapshot, target: &T, thread: &ThreadInfo) -> Vec<Frame> {
    let Some(registers) = thread.registers() else {
        return Vec::new();
    };
    let frame = |address: u64| Frame {
        address,
        location: snapshot.module_for_address(address).map(|m| {
            format!("{}+{:#x}", m.file_name(), address - m.base_address)
        }),
    };

    let mut frames = vec![frame(registers.instruction_pointer())];
    let Some(stack) = thread.stack else {
        return frames;
    };

    let mut fp = registers.frame_pointer();
    while frames.len() < MAX_FRAMES {
        if fp % 8 != 0 || !stack.contains(fp) || !stack.contains(fp + 15) {
            break;
        }
        let (Ok(saved_fp), Ok(return_address)) =
            (target.read_pointer(fp), target.read_pointer(fp + 8))
        else {
            break;
        };
        if return_address == 0 {
            break;
        }
        frames.push(frame(return_address));
        if saved_fp <= fp {
            break;
        }
        fp = saved_fp;
    }
    frames
}

fn signal_name(signo: i32) -> &'static str {
    match signo {
        libc::SIGSEGV => "SIGSEGV",
        libc::SIGBUS => "SIGBUS",
        libc::SIGILL => "SIGILL",
        libc::SIGFPE => "SIGFPE",
        libc::SIGABRT => "SIGABRT",
        libc::SIGTRAP => "SIGTRAP",
        libc::SIGSYS => "SIGSYS",
        libc::SIGQUIT => "SIGQUIT",
        libc::SIGTERM => "SIGTERM",
        libc::SIGKILL => "SIGKILL",
        libc::SIGINT => "SIGINT",
        _ => "unknown",
    }
}

#[cfg(test)]
mod test {
    use {
        super::*,
        crate::{
            config::DumpOptions,
            cpu::RegisterContext,
            crash_info::CrashInfo,
            target::{memory::MemoryTarget, Backing, Permissions},
        },
    };

    const STACK: u64 = 0x7000_0000;
    const APP: u64 = 0x40_0000;

    fn target() -> MemoryTarget {
        let mut t = MemoryTarget::new(300);
        t.add_region(
            STACK,
            vec![0; 0x4000],
            Permissions::READ | Permissions::WRITE | Permissions::PRIVATE,
            Backing::Special("[stack]".into()),
        )
        .add_region(
            APP,
            vec![0; 0x2000],
            Permissions::READ | Permissions::EXECUTE | Permissions::PRIVATE,
            Backing::File("/usr/bin/app".into()),
        )
        .add_thread(300, RegisterContext::new(APP + 0x100, STACK + 0x2f00, STACK + 0x3000))
        .add_thread_without_context(301)
        .set_crash(
            300,
            SignalInfo {
                signo: libc::SIGSEGV,
                code: 1,
                errno: 0,
                address: 0x8,
            },
        );
        // Two frame records, the second ends the chain
        t.poke_u64(STACK + 0x3000, STACK + 0x3100)
            .poke_u64(STACK + 0x3008, APP + 0x200)
            .poke_u64(STACK + 0x3100, 0)
            .poke_u64(STACK + 0x3108, 0x9999_0000);
        t
    }

    #[test]
    fn frames_and_fault() {
        let t = target();
        let snapshot = CrashInfo::new(&t, &DumpOptions::new()).collect().unwrap();
        let report = CrashReport::build(&snapshot, &t);

        let fault = report.fault.as_ref().unwrap();
        assert_eq!(fault.signal_name, "SIGSEGV");
        assert_eq!(fault.address, 0x8);
        assert_eq!(report.faulting_thread, Some(300));

        let frames = &report.threads[0].frames;
        assert_eq!(
            frames,
            &[
                Frame {
                    address: APP + 0x100,
                    location: Some("app+0x100".into()),
                },
                Frame {
                    address: APP + 0x200,
                    location: Some("app+0x200".into()),
                },
                Frame {
                    address: 0x9999_0000,
                    location: None,
                },
            ]
        );

        assert!(report.threads[1].frames.is_empty());
        assert!(report.threads[1].context_unavailable.is_some());
        assert_eq!(report.collection.outcome, Outcome::Complete);
        assert!(report.collection.managed_heap_skipped.is_none());
    }

    #[test]
    fn written_as_json() {
        let t = target();
        let snapshot = CrashInfo::new(&t, &DumpOptions::new()).collect().unwrap();
        let report = CrashReport::build(&snapshot, &t);

        let dir = tempfile::tempdir().unwrap();
        let path = report_path(&dir.path().join("core.300"));
        assert!(path.to_str().unwrap().ends_with("core.300.crashreport.json"));
        report.write(&path).unwrap();

        let json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(json["environment"]["architecture"], crate::cpu::ARCH_NAME);
        assert_eq!(json["collection"]["managed_heap_skipped"], serde_json::Value::Null);
        assert_eq!(json["modules"][0]["path"], "/usr/bin/app");
    }
}

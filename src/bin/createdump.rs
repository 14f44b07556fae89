use {
    clap::{ArgAction, Parser},
    createdump::{
        config::{parse_range, DEFAULT_OUTPUT_TEMPLATE},
        crash_report::{report_path, CrashReport},
        errors::{AttachError, CollectionError, CrashInfoError, NamingError, WriteError},
        naming::{expand_template, find_pid_by_name, NameContext},
        runtime::DEFAULT_RUNTIME_MODULE,
        target::SignalInfo,
        writer::write_dump_file,
        CrashInfo, DataTarget, DumpFormat, DumpOptions, DumpType, ExitStatus, Pid, PtraceTarget,
    },
    error_graph::ErrorList,
    nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal},
    std::{
        path::PathBuf,
        process::ExitCode,
        sync::{
            atomic::{AtomicBool, Ordering},
            Arc, OnceLock,
        },
    },
};

/// Writes a crash dump of a running process
#[derive(Parser, Debug)]
#[command(name = "createdump", version)]
struct Cli {
    /// Process to dump
    #[arg(required_unless_present = "name", conflicts_with = "name")]
    pid: Option<Pid>,
    /// Dump the only running process with this name instead of a pid
    #[arg(long)]
    name: Option<String>,
    /// Output path. %p and %d expand to the pid, %e to the process name,
    /// %h to the host name, %t to the unix time and %% to a literal %
    #[arg(short = 'f', long = "file", default_value = DEFAULT_OUTPUT_TEMPLATE)]
    file: String,
    /// Module headers, runtime metadata and the faulting thread's stack
    #[arg(long, group = "level")]
    triage: bool,
    /// Every thread stack and the GC bookkeeping (the default)
    #[arg(short = 'n', long, group = "level")]
    normal: bool,
    /// Normal plus the managed heap
    #[arg(short = 'u', long, group = "level")]
    withheap: bool,
    /// Every readable private mapping and whole module images
    #[arg(long, group = "level")]
    full: bool,
    /// The dump level by name: triage, normal, withheap or full
    #[arg(long = "type", group = "level")]
    dump_type: Option<DumpType>,
    /// minidump, elf or macho
    #[arg(long, default_value_t)]
    format: DumpFormat,
    /// Always dump ADDRESS:LENGTH (hex), may be repeated
    #[arg(long = "include", value_name = "ADDRESS:LENGTH", value_parser = parse_range)]
    include: Vec<(u64, u64)>,
    /// File name of the runtime module whose debug header describes the
    /// managed state
    #[arg(long, default_value = DEFAULT_RUNTIME_MODULE)]
    runtime_module: String,
    /// The thread that crashed, when invoked by a crash handler
    #[arg(long)]
    crash_thread: Option<Pid>,
    /// Signal number delivered to the crashing thread
    #[arg(long, requires = "crash_thread")]
    signal: Option<i32>,
    /// si_code of the signal
    #[arg(long, requires = "signal", default_value_t = 0)]
    code: i32,
    /// Faulting address of the signal (hex)
    #[arg(long, requires = "signal", value_parser = parse_address)]
    address: Option<u64>,
    /// Also write a JSON crash report next to the dump
    #[arg(long)]
    crashreport: bool,
    /// More output, may be repeated
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

fn parse_address(s: &str) -> Result<u64, std::num::ParseIntError> {
    let s = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")).unwrap_or(s);
    u64::from_str_radix(s, 16)
}

impl Cli {
    fn dump_type(&self) -> DumpType {
        if let Some(ty) = self.dump_type {
            ty
        } else if self.triage {
            DumpType::Triage
        } else if self.withheap {
            DumpType::WithHeap
        } else if self.full {
            DumpType::Full
        } else {
            DumpType::Normal
        }
    }

    fn options(&self, interrupted: Arc<AtomicBool>) -> DumpOptions {
        let mut options = DumpOptions::new();
        options
            .set_dump_type(self.dump_type())
            .set_format(self.format)
            .set_output_template(self.file.as_str())
            .set_runtime_module(self.runtime_module.as_str())
            .set_crash_report(self.crashreport)
            .set_interrupt_flag(interrupted);
        for (address, length) in &self.include {
            options.always_include(*address, *length);
        }
        if let Some(tid) = self.crash_thread {
            options.set_blamed_thread(tid);
        }
        if let Some(signo) = self.signal {
            options.set_signal(SignalInfo {
                signo,
                code: self.code,
                errno: 0,
                address: self.address.unwrap_or_default(),
            });
        }
        options
    }
}

#[derive(Debug, thiserror::Error)]
enum DumpError {
    #[error(transparent)]
    Naming(#[from] NamingError),
    #[error(transparent)]
    Attach(#[from] AttachError),
    #[error(transparent)]
    Collect(#[from] CrashInfoError),
    #[error(transparent)]
    Write(#[from] WriteError),
}

impl DumpError {
    fn exit_status(&self) -> ExitStatus {
        match self {
            Self::Naming(NamingError::UnknownPlaceholder(_) | NamingError::TrailingPercent) => {
                ExitStatus::Usage
            }
            _ => ExitStatus::Failure,
        }
    }
}

static INTERRUPTED: OnceLock<Arc<AtomicBool>> = OnceLock::new();

extern "C" fn on_interrupt(_signal: libc::c_int) {
    if let Some(flag) = INTERRUPTED.get() {
        flag.store(true, Ordering::Relaxed);
    }
}

/// SIGINT and SIGTERM stop the collection at the next phase boundary, so the
/// target is detached rather than left stopped
fn install_interrupt_handler() -> Arc<AtomicBool> {
    let flag = INTERRUPTED
        .get_or_init(|| Arc::new(AtomicBool::new(false)))
        .clone();
    let action = SigAction::new(
        SigHandler::Handler(on_interrupt),
        SaFlags::SA_RESTART,
        SigSet::empty(),
    );
    for signal in [Signal::SIGINT, Signal::SIGTERM] {
        // SAFETY: the handler only stores to an atomic that is initialized
        // before it is installed
        if let Err(e) = unsafe { sigaction(signal, &action) } {
            log::warn!("unable to install a {signal} handler: {e}");
        }
    }
    flag
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
}

fn run(cli: &Cli, interrupted: Arc<AtomicBool>) -> Result<ExitStatus, DumpError> {
    let pid = match (cli.pid, &cli.name) {
        (Some(pid), _) => pid,
        (None, Some(name)) => find_pid_by_name(name)?,
        // clap requires one of them
        (None, None) => return Ok(ExitStatus::Usage),
    };
    let options = cli.options(interrupted);

    let guard = PtraceTarget::attach(pid)?;
    let target: &PtraceTarget = &guard;

    let name = NameContext::now(pid, target.process_name());
    let path = PathBuf::from(expand_template(&options.output_template, &name)?);

    let snapshot = CrashInfo::new(target, &options).collect()?;
    let written = write_dump_file(options.format, &snapshot, target, &path);
    match &written {
        Ok(_) => println!("Wrote {} dump to {}", snapshot.dump_type, path.display()),
        Err(e) => log::error!("no dump written to {}: {e}", path.display()),
    }

    // The report doesn't depend on the dump, it is attempted either way
    if options.crash_report {
        // Built before resuming, the frame walk reads the stacks
        let mut report = CrashReport::build(&snapshot, target);
        match &written {
            Ok(write_errors) => report.set_write_errors(write_errors),
            Err(e) => report.set_dump_error(e),
        }
        let report_path = report_path(&path);
        if let Err(e) = report.write(&report_path) {
            log::error!("{e}");
        }
    }

    let mut resume_errors = ErrorList::<CollectionError>::default();
    guard.resume(&mut resume_errors);
    if !resume_errors.is_empty() {
        log::warn!("{} threads could not be resumed", resume_errors.len());
    }

    written?;
    let status = snapshot.exit_status();
    if let Some(reason) = &snapshot.managed_heap_skipped {
        log::warn!("dump is partial, managed heap skipped: {reason}");
    }
    if let Some(reason) = &snapshot.managed_threads_skipped {
        log::warn!("dump is partial, managed threads skipped: {reason}");
    }
    Ok(status)
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return if e.use_stderr() {
                ExitStatus::Usage.into()
            } else {
                // --help and --version
                ExitStatus::Success.into()
            };
        }
    };
    init_logging(cli.verbose);
    let interrupted = install_interrupt_handler();

    match run(&cli, interrupted) {
        Ok(status) => status.into(),
        Err(e) => {
            log::error!("{e}");
            eprintln!("createdump: {e}");
            e.exit_status().into()
        }
    }
}

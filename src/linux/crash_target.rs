//! The state captured by an in-process crash handler, layered over the live
//! process it came from.
//!
//! The crash handler's thread is stopped inside the signal handler by the time
//! we attach, so its ptrace registers only show the handler. The `ucontext`
//! the kernel passed to the handler holds the registers at the fault.

use {
    crate::{
        cpu::RegisterContext,
        errors::{ReadError, ThreadContextError},
        target::{DataTarget, MemoryRegion, Module, SignalInfo, ThreadId},
        Pid,
    },
    crash_context::CrashContext,
};

pub struct CrashTarget<'a, T> {
    inner: &'a T,
    context: CrashContext,
}

impl<'a, T: DataTarget> CrashTarget<'a, T> {
    pub fn new(inner: &'a T, context: CrashContext) -> Self {
        if context.pid != inner.pid() {
            log::warn!(
                "crash context is for process {}, dumping {}",
                context.pid,
                inner.pid()
            );
        }
        Self { inner, context }
    }

    pub fn crash_context(&self) -> &CrashContext {
        &self.context
    }
}

cfg_if::cfg_if! {
    if #[cfg(target_arch = "x86_64")] {
        fn crash_registers(context: &CrashContext) -> RegisterContext {
            use crate::cpu::{FloatRegisters, GeneralRegisters};

            let gregs = &context.context.uc_mcontext.gregs;
            let reg = |index: libc::c_int| gregs[index as usize] as u64;
            // cs, gs, fs and ss packed into one register
            let csgsfs = reg(libc::REG_CSGSFS);

            let fs = &context.float_state;
            let mut fxsave = Vec::with_capacity(512);
            for half in [fs.cwd, fs.swd, fs.ftw, fs.fop] {
                fxsave.extend_from_slice(&half.to_le_bytes());
            }
            fxsave.extend_from_slice(&fs.rip.to_le_bytes());
            fxsave.extend_from_slice(&fs.rdp.to_le_bytes());
            fxsave.extend_from_slice(&fs.mxcsr.to_le_bytes());
            fxsave.extend_from_slice(&fs.mxcr_mask.to_le_bytes());
            for word in fs.st_space.iter().chain(&fs.xmm_space) {
                fxsave.extend_from_slice(&word.to_le_bytes());
            }
            let mut fpregs = FloatRegisters::default();
            fpregs.0[..fxsave.len()].copy_from_slice(&fxsave);

            RegisterContext {
                regs: GeneralRegisters {
                    r8: reg(libc::REG_R8),
                    r9: reg(libc::REG_R9),
                    r10: reg(libc::REG_R10),
                    r11: reg(libc::REG_R11),
                    r12: reg(libc::REG_R12),
                    r13: reg(libc::REG_R13),
                    r14: reg(libc::REG_R14),
                    r15: reg(libc::REG_R15),
                    rdi: reg(libc::REG_RDI),
                    rsi: reg(libc::REG_RSI),
                    rbp: reg(libc::REG_RBP),
                    rbx: reg(libc::REG_RBX),
                    rdx: reg(libc::REG_RDX),
                    rax: reg(libc::REG_RAX),
                    rcx: reg(libc::REG_RCX),
                    rsp: reg(libc::REG_RSP),
                    rip: reg(libc::REG_RIP),
                    eflags: reg(libc::REG_EFL),
                    cs: csgsfs & 0xffff,
                    gs: (csgsfs >> 16) & 0xffff,
                    fs: (csgsfs >> 32) & 0xffff,
                    ss: (csgsfs >> 48) & 0xffff,
                    ..Default::default()
                },
                fpregs,
            }
        }
    } else if #[cfg(target_arch = "aarch64")] {
        fn crash_registers(context: &CrashContext) -> RegisterContext {
            use crate::cpu::{FloatRegisters, GeneralRegisters};

            let mcontext = &context.context.uc_mcontext;
            let mut regs = GeneralRegisters {
                sp: mcontext.sp,
                pc: mcontext.pc,
                pstate: mcontext.pstate,
                ..Default::default()
            };
            regs.regs.copy_from_slice(&mcontext.regs);

            RegisterContext {
                regs,
                fpregs: FloatRegisters {
                    vregs: context.float_state.vregs,
                    fpsr: context.float_state.fpsr,
                    fpcr: context.float_state.fpcr,
                },
            }
        }
    }
}

impl<T: DataTarget> DataTarget for CrashTarget<'_, T> {
    fn pid(&self) -> Pid {
        self.inner.pid()
    }

    fn read_memory(&self, address: u64, buf: &mut [u8]) -> Result<(), ReadError> {
        self.inner.read_memory(address, buf)
    }

    fn enumerate_threads(&self) -> Vec<ThreadId> {
        self.inner.enumerate_threads()
    }

    fn thread_context(&self, tid: ThreadId) -> Result<RegisterContext, ThreadContextError> {
        if tid == self.context.tid {
            return Ok(crash_registers(&self.context));
        }
        self.inner.thread_context(tid)
    }

    fn memory_regions(&self) -> &[MemoryRegion] {
        self.inner.memory_regions()
    }

    fn enumerate_modules(&self) -> Vec<Module> {
        self.inner.enumerate_modules()
    }

    fn page_size(&self) -> usize {
        self.inner.page_size()
    }

    fn crashing_thread(&self) -> Option<ThreadId> {
        Some(self.context.tid)
    }

    fn signal_info(&self) -> Option<SignalInfo> {
        let siginfo = &self.context.siginfo;
        Some(SignalInfo {
            signo: siginfo.ssi_signo as i32,
            code: siginfo.ssi_code,
            errno: siginfo.ssi_errno,
            address: siginfo.ssi_addr,
        })
    }

    fn process_name(&self) -> Option<String> {
        self.inner.process_name()
    }

    fn command_line(&self) -> Option<String> {
        self.inner.command_line()
    }

    fn thread_name(&self, tid: ThreadId) -> Option<String> {
        self.inner.thread_name(tid)
    }

    fn auxv(&self) -> Option<Vec<u8>> {
        self.inner.auxv()
    }

    fn proc_file(&self, name: &str) -> Option<Vec<u8>> {
        self.inner.proc_file(name)
    }

    fn resolve_export(&self, module: &Module, symbol: &str) -> Option<u64> {
        self.inner.resolve_export(module, symbol)
    }
}

#[cfg(test)]
mod test {
    use {
        super::*,
        crate::{
            config::DumpOptions,
            crash_info::CrashInfo,
            target::{memory::MemoryTarget, Backing, Permissions},
        },
    };

    const STACK: u64 = 0x7000_0000;

    fn crash_context(pid: Pid, tid: ThreadId, ip: u64, sp: u64) -> CrashContext {
        // SAFETY: every field is plain data or a raw pointer
        let mut context: CrashContext = unsafe { std::mem::zeroed() };
        context.pid = pid;
        context.tid = tid;
        context.siginfo.ssi_signo = libc::SIGBUS as u32;
        context.siginfo.ssi_code = 2;
        context.siginfo.ssi_addr = 0xbad0;

        #[cfg(target_arch = "x86_64")]
        {
            let gregs = &mut context.context.uc_mcontext.gregs;
            gregs[libc::REG_RIP as usize] = ip as i64;
            gregs[libc::REG_RSP as usize] = sp as i64;
            context.float_state.mxcsr = 0x1f80;
        }
        #[cfg(target_arch = "aarch64")]
        {
            context.context.uc_mcontext.pc = ip;
            context.context.uc_mcontext.sp = sp;
        }
        context
    }

    #[test]
    fn crashing_thread_uses_signal_context() {
        let mut live = MemoryTarget::new(40);
        live.add_region(
            STACK,
            vec![0; 0x4000],
            Permissions::READ | Permissions::WRITE | Permissions::PRIVATE,
            Backing::Special("[stack]".into()),
        )
        // What ptrace shows for the thread: the signal handler
        .add_thread(40, RegisterContext::new(0x9000, STACK + 0x3000, 0))
        .add_thread(41, RegisterContext::new(0x5000, STACK + 0x3f00, 0));

        let target = CrashTarget::new(&live, crash_context(40, 41, 0x1234, STACK + 0x2000));
        assert_eq!(target.crashing_thread(), Some(41));

        let regs = target.thread_context(41).unwrap();
        assert_eq!(regs.instruction_pointer(), 0x1234);
        assert_eq!(regs.stack_pointer(), STACK + 0x2000);
        #[cfg(target_arch = "x86_64")]
        assert_eq!(regs.fpregs.mxcsr(), 0x1f80);
        assert_eq!(target.thread_context(40).unwrap().instruction_pointer(), 0x9000);

        let snapshot = CrashInfo::new(&target, &DumpOptions::new()).collect().unwrap();
        let exception = snapshot.exception.unwrap();
        assert_eq!(exception.tid, 41);
        assert_eq!(exception.signal.signo, libc::SIGBUS);
        assert_eq!(exception.signal.address, 0xbad0);

        let faulting = snapshot.faulting_thread().unwrap();
        assert_eq!(faulting.tid, 41);
        assert_eq!(faulting.stack.unwrap().start, STACK + 0x2000);
    }
}

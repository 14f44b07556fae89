use {
    crate::target::SignalInfo,
    minidump_common::format::{ContextFlagsAmd64, ProcessorArchitecture, CONTEXT_AMD64},
};

pub type RawContextCPU = CONTEXT_AMD64;

pub const ARCH_NAME: &str = "x86_64";
pub const ELF_MACHINE: u16 = goblin::elf::header::EM_X86_64;
/// Number of registers in `elf_gregset_t`
pub const ELF_NGREG: usize = 27;
/// Size of `user_fpregs_struct`
pub const ELF_FPREGS_SIZE: usize = 512;
pub const MINIDUMP_ARCHITECTURE: ProcessorArchitecture =
    ProcessorArchitecture::PROCESSOR_ARCHITECTURE_AMD64;

pub const MACHO_CPU_TYPE: u32 = goblin::mach::constants::cputype::CPU_TYPE_X86_64;
pub const MACHO_CPU_SUBTYPE: u32 = goblin::mach::constants::cputype::CPU_SUBTYPE_X86_64_ALL;
/// `x86_THREAD_STATE64`
pub const MACHO_THREAD_FLAVOR: u32 = 4;
pub const MACHO_THREAD_COUNT: u32 = 42;
/// `x86_EXCEPTION_STATE64`
pub const MACHO_EXCEPTION_FLAVOR: u32 = 6;
pub const MACHO_EXCEPTION_COUNT: u32 = 4;

/// General purpose registers, in `user_regs_struct` order
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct GeneralRegisters {
    pub r15: u64,
    pub r14: u64,
    pub r13: u64,
    pub r12: u64,
    pub rbp: u64,
    pub rbx: u64,
    pub r11: u64,
    pub r10: u64,
    pub r9: u64,
    pub r8: u64,
    pub rax: u64,
    pub rcx: u64,
    pub rdx: u64,
    pub rsi: u64,
    pub rdi: u64,
    pub orig_rax: u64,
    pub rip: u64,
    pub cs: u64,
    pub eflags: u64,
    pub rsp: u64,
    pub ss: u64,
    pub fs_base: u64,
    pub gs_base: u64,
    pub ds: u64,
    pub es: u64,
    pub fs: u64,
    pub gs: u64,
}

/// The `fxsave` area, which is what `NT_PRFPREG` holds and what the minidump
/// context embeds
#[derive(Clone, PartialEq, Eq)]
pub struct FloatRegisters(pub [u8; 512]);

impl Default for FloatRegisters {
    fn default() -> Self {
        Self([0; 512])
    }
}

impl std::fmt::Debug for FloatRegisters {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FloatRegisters")
            .field("mxcsr", &self.mxcsr())
            .finish_non_exhaustive()
    }
}

impl FloatRegisters {
    pub fn mxcsr(&self) -> u32 {
        u32::from_le_bytes([self.0[24], self.0[25], self.0[26], self.0[27]])
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RegisterContext {
    pub regs: GeneralRegisters,
    pub fpregs: FloatRegisters,
}

impl RegisterContext {
    /// A context with only the registers needed to locate and walk the stack
    pub fn new(instruction_pointer: u64, stack_pointer: u64, frame_pointer: u64) -> Self {
        Self {
            regs: GeneralRegisters {
                rip: instruction_pointer,
                rsp: stack_pointer,
                rbp: frame_pointer,
                ..Default::default()
            },
            fpregs: FloatRegisters::default(),
        }
    }

    pub fn instruction_pointer(&self) -> u64 {
        self.regs.rip
    }

    pub fn stack_pointer(&self) -> u64 {
        self.regs.rsp
    }

    pub fn frame_pointer(&self) -> u64 {
        self.regs.rbp
    }

    /// Rebuilds the context from the `NT_PRSTATUS` and `NT_PRFPREG` register
    /// sets. A short `fpregs` leaves the rest of the float state zeroed.
    pub fn from_elf_notes(gregs: &[u64; ELF_NGREG], fpregs: &[u8]) -> Self {
        let mut float = FloatRegisters::default();
        let len = fpregs.len().min(ELF_FPREGS_SIZE);
        float.0[..len].copy_from_slice(&fpregs[..len]);
        let g = gregs;
        Self {
            regs: GeneralRegisters {
                r15: g[0],
                r14: g[1],
                r13: g[2],
                r12: g[3],
                rbp: g[4],
                rbx: g[5],
                r11: g[6],
                r10: g[7],
                r9: g[8],
                r8: g[9],
                rax: g[10],
                rcx: g[11],
                rdx: g[12],
                rsi: g[13],
                rdi: g[14],
                orig_rax: g[15],
                rip: g[16],
                cs: g[17],
                eflags: g[18],
                rsp: g[19],
                ss: g[20],
                fs_base: g[21],
                gs_base: g[22],
                ds: g[23],
                es: g[24],
                fs: g[25],
                gs: g[26],
            },
            fpregs: float,
        }
    }

    pub fn elf_gregs(&self) -> [u64; ELF_NGREG] {
        let r = &self.regs;
        [
            r.r15, r.r14, r.r13, r.r12, r.rbp, r.rbx, r.r11, r.r10, r.r9, r.r8, r.rax, r.rcx,
            r.rdx, r.rsi, r.rdi, r.orig_rax, r.rip, r.cs, r.eflags, r.rsp, r.ss, r.fs_base,
            r.gs_base, r.ds, r.es, r.fs, r.gs,
        ]
    }

    /// Contents of the `NT_PRFPREG` note
    pub fn elf_fpregs(&self) -> Vec<u8> {
        self.fpregs.0.to_vec()
    }

    pub fn fill_cpu_context(&self, out: &mut RawContextCPU) {
        out.context_flags = ContextFlagsAmd64::CONTEXT_AMD64_FULL.bits()
            | ContextFlagsAmd64::CONTEXT_AMD64_SEGMENTS.bits();

        // Selectors are 16 bits wide, ptrace just hands them out as u64
        out.cs = self.regs.cs as u16;
        out.ds = self.regs.ds as u16;
        out.es = self.regs.es as u16;
        out.fs = self.regs.fs as u16;
        out.gs = self.regs.gs as u16;
        out.ss = self.regs.ss as u16;
        out.eflags = self.regs.eflags as u32;

        out.rax = self.regs.rax;
        out.rcx = self.regs.rcx;
        out.rdx = self.regs.rdx;
        out.rbx = self.regs.rbx;
        out.rsp = self.regs.rsp;
        out.rbp = self.regs.rbp;
        out.rsi = self.regs.rsi;
        out.rdi = self.regs.rdi;
        out.r8 = self.regs.r8;
        out.r9 = self.regs.r9;
        out.r10 = self.regs.r10;
        out.r11 = self.regs.r11;
        out.r12 = self.regs.r12;
        out.r13 = self.regs.r13;
        out.r14 = self.regs.r14;
        out.r15 = self.regs.r15;
        out.rip = self.regs.rip;

        out.mx_csr = self.fpregs.mxcsr();
        out.float_save = self.fpregs.0;
    }

    /// `x86_thread_state64_t`
    pub fn macho_thread_state(&self) -> Vec<u32> {
        let r = &self.regs;
        super::u64_words(&[
            r.rax, r.rbx, r.rcx, r.rdx, r.rdi, r.rsi, r.rbp, r.rsp, r.r8, r.r9, r.r10, r.r11,
            r.r12, r.r13, r.r14, r.r15, r.rip, r.eflags, r.cs, r.fs, r.gs,
        ])
    }

    /// `x86_exception_state64_t`, the trap number is derived from the signal
    pub fn macho_exception_state(&self, signal: Option<&SignalInfo>) -> Vec<u32> {
        let Some(signal) = signal else {
            return vec![0; MACHO_EXCEPTION_COUNT as usize];
        };
        let trapno = match signal.signo {
            libc::SIGFPE => 0,
            libc::SIGTRAP => 3,
            libc::SIGILL => 6,
            libc::SIGSEGV | libc::SIGBUS => 14,
            _ => 0,
        };
        let mut state = vec![trapno, 0];
        state.extend(super::u64_words(&[signal.address]));
        state
    }
}

use {
    crate::target::SignalInfo,
    minidump_common::format::{ContextFlagsArm64Old, ProcessorArchitecture, CONTEXT_ARM64_OLD},
};

pub type RawContextCPU = CONTEXT_ARM64_OLD;

pub const ARCH_NAME: &str = "aarch64";
pub const ELF_MACHINE: u16 = goblin::elf::header::EM_AARCH64;
/// x0-x30, sp, pc, pstate
pub const ELF_NGREG: usize = 34;
/// `user_fpsimd_struct`, padded to 16 bytes
pub const ELF_FPREGS_SIZE: usize = 528;
pub const MINIDUMP_ARCHITECTURE: ProcessorArchitecture =
    ProcessorArchitecture::PROCESSOR_ARCHITECTURE_ARM64_OLD;

pub const MACHO_CPU_TYPE: u32 = goblin::mach::constants::cputype::CPU_TYPE_ARM64;
pub const MACHO_CPU_SUBTYPE: u32 = goblin::mach::constants::cputype::CPU_SUBTYPE_ARM64_ALL;
/// `ARM_THREAD_STATE64`
pub const MACHO_THREAD_FLAVOR: u32 = 6;
pub const MACHO_THREAD_COUNT: u32 = 68;
/// `ARM_EXCEPTION_STATE64`
pub const MACHO_EXCEPTION_FLAVOR: u32 = 7;
pub const MACHO_EXCEPTION_COUNT: u32 = 4;

/// The number of general purpose registers _not_ counting the stack pointer
const GP_REG_COUNT: usize = 31;
const FP_REG_COUNT: usize = 32;
const FP: usize = 29;
const LR: usize = 30;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct GeneralRegisters {
    pub regs: [u64; GP_REG_COUNT],
    pub sp: u64,
    pub pc: u64,
    pub pstate: u64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FloatRegisters {
    pub vregs: [u128; FP_REG_COUNT],
    pub fpsr: u32,
    pub fpcr: u32,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RegisterContext {
    pub regs: GeneralRegisters,
    pub fpregs: FloatRegisters,
}

impl RegisterContext {
    /// A context with only the registers needed to locate and walk the stack
    pub fn new(instruction_pointer: u64, stack_pointer: u64, frame_pointer: u64) -> Self {
        let mut regs = GeneralRegisters {
            sp: stack_pointer,
            pc: instruction_pointer,
            ..Default::default()
        };
        regs.regs[FP] = frame_pointer;
        Self {
            regs,
            fpregs: FloatRegisters::default(),
        }
    }

    pub fn instruction_pointer(&self) -> u64 {
        self.regs.pc
    }

    pub fn stack_pointer(&self) -> u64 {
        self.regs.sp
    }

    pub fn frame_pointer(&self) -> u64 {
        self.regs.regs[FP]
    }

    /// Rebuilds the context from the `NT_PRSTATUS` and `NT_PRFPREG` register
    /// sets. A short `fpregs` leaves the rest of the float state zeroed.
    pub fn from_elf_notes(gregs: &[u64; ELF_NGREG], fpregs: &[u8]) -> Self {
        let mut regs = GeneralRegisters {
            sp: gregs[31],
            pc: gregs[32],
            pstate: gregs[33],
            ..Default::default()
        };
        regs.regs.copy_from_slice(&gregs[..GP_REG_COUNT]);

        let mut float = FloatRegisters::default();
        for (v, chunk) in float.vregs.iter_mut().zip(fpregs.chunks_exact(16)) {
            let mut bytes = [0u8; 16];
            bytes.copy_from_slice(chunk);
            *v = u128::from_le_bytes(bytes);
        }
        let word = |at: usize| {
            fpregs
                .get(at..at + 4)
                .map_or(0, |b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        };
        float.fpsr = word(FP_REG_COUNT * 16);
        float.fpcr = word(FP_REG_COUNT * 16 + 4);

        Self {
            regs,
            fpregs: float,
        }
    }

    pub fn elf_gregs(&self) -> [u64; ELF_NGREG] {
        let mut out = [0u64; ELF_NGREG];
        out[..GP_REG_COUNT].copy_from_slice(&self.regs.regs);
        out[31] = self.regs.sp;
        out[32] = self.regs.pc;
        out[33] = self.regs.pstate;
        out
    }

    /// Contents of the `NT_PRFPREG` note, `user_fpsimd_struct` including its
    /// trailing padding
    pub fn elf_fpregs(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(FP_REG_COUNT * 16 + 16);
        for v in &self.fpregs.vregs {
            out.extend_from_slice(&v.to_le_bytes());
        }
        out.extend_from_slice(&self.fpregs.fpsr.to_le_bytes());
        out.extend_from_slice(&self.fpregs.fpcr.to_le_bytes());
        out.extend_from_slice(&[0; 8]);
        out
    }

    pub fn fill_cpu_context(&self, out: &mut RawContextCPU) {
        out.context_flags = ContextFlagsArm64Old::CONTEXT_ARM64_OLD_FULL.bits() as u64;

        out.cpsr = self.regs.pstate as u32;
        out.iregs[..GP_REG_COUNT].copy_from_slice(&self.regs.regs);
        out.sp = self.regs.sp;
        out.pc = self.regs.pc;

        out.fpsr = self.fpregs.fpsr;
        out.fpcr = self.fpregs.fpcr;
        out.float_regs[..FP_REG_COUNT].copy_from_slice(&self.fpregs.vregs);
    }

    /// `arm_thread_state64_t`
    pub fn macho_thread_state(&self) -> Vec<u32> {
        let mut values = Vec::with_capacity(33);
        values.extend_from_slice(&self.regs.regs[..FP]);
        values.push(self.regs.regs[FP]);
        values.push(self.regs.regs[LR]);
        values.push(self.regs.sp);
        values.push(self.regs.pc);
        let mut state = super::u64_words(&values);
        state.push(self.regs.pstate as u32);
        // __pad
        state.push(0);
        state
    }

    /// `arm_exception_state64_t`
    pub fn macho_exception_state(&self, signal: Option<&SignalInfo>) -> Vec<u32> {
        let Some(signal) = signal else {
            return vec![0; MACHO_EXCEPTION_COUNT as usize];
        };
        let mut state = super::u64_words(&[signal.address]);
        // esr is not part of siginfo
        state.push(0);
        state.push(signal.signo as u32);
        state
    }
}

//! Per thread register snapshot and stack discovery

use {
    crate::{
        cpu::RegisterContext,
        errors::CollectionError,
        target::{DataTarget, ThreadId},
    },
    error_graph::WriteErrorList,
};

/// Register state of a thread, or why there is none
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ContextState {
    Available(RegisterContext),
    Unavailable(String),
}

impl ContextState {
    pub fn registers(&self) -> Option<&RegisterContext> {
        match self {
            Self::Available(context) => Some(context),
            Self::Unavailable(_) => None,
        }
    }
}

/// A readable, page aligned `[start, end)` stack range
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StackRange {
    pub start: u64,
    pub end: u64,
}

impl StackRange {
    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }

    pub fn contains(&self, address: u64) -> bool {
        self.start <= address && address < self.end
    }
}

#[derive(Clone, Debug)]
pub struct ThreadInfo {
    pub tid: ThreadId,
    pub name: Option<String>,
    pub context: ContextState,
    /// `None` when the stack pointer isn't in a readable mapping or the
    /// registers are unavailable
    pub stack: Option<StackRange>,
    pub is_faulting: bool,
}

impl ThreadInfo {
    /// Captures `tid`. A thread is always returned, failures to read its
    /// registers or locate its stack are pushed to `soft_errors`.
    pub fn capture<T: DataTarget>(
        target: &T,
        tid: ThreadId,
        faulting_thread: Option<ThreadId>,
        mut soft_errors: impl WriteErrorList<CollectionError>,
    ) -> Self {
        let context = match target.thread_context(tid) {
            Ok(context) => ContextState::Available(context),
            Err(e) => {
                log::warn!("registers of thread {tid} unavailable: {e}");
                let reason = e.to_string();
                soft_errors.push(CollectionError::ThreadContextUnavailable(tid, e));
                ContextState::Unavailable(reason)
            }
        };

        let stack = context.registers().and_then(|regs| {
            let stack_pointer = regs.stack_pointer();
            let stack = stack_bounds(target, stack_pointer);
            if stack.is_none() {
                soft_errors.push(CollectionError::NoStack { tid, stack_pointer });
            }
            stack
        });

        Self {
            tid,
            name: target.thread_name(tid),
            context,
            stack,
            is_faulting: faulting_thread == Some(tid),
        }
    }

    pub fn registers(&self) -> Option<&RegisterContext> {
        self.context.registers()
    }
}

/// Finds the stack of a thread from its stack pointer.
///
/// The stack is the part of the mapping containing the stack pointer that
/// lies above it, starting at the stack pointer's page and ending at the
/// first page that can't be read.
pub fn stack_bounds<T: DataTarget>(target: &T, stack_pointer: u64) -> Option<StackRange> {
    let page = target.page_size() as u64;
    let region = target
        .memory_regions()
        .iter()
        .find(|r| r.contains(stack_pointer) && r.is_readable())?;

    let start = (stack_pointer - stack_pointer % page).max(region.start);
    let mut end = start;
    let mut probe = [0u8; 1];
    while end < region.end {
        if target.read_memory(end, &mut probe).is_err() {
            break;
        }
        end = (end + page).min(region.end);
    }

    (end > start).then_some(StackRange { start, end })
}

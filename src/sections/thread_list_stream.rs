use {
    super::{memory64_list_stream::MemoryBlock, *},
    crate::cpu::RawContextCPU,
};

/// The thread list, waiting for the memory block's file offset so the stack
/// descriptors can point into it
pub struct ThreadList {
    section: MemoryArrayWriter<MDRawThread>,
    threads: Vec<MDRawThread>,
    /// Offset of each thread's stack in the memory block
    stack_offsets: Vec<Option<u64>>,
    /// Context of the thread the exception stream blames
    pub faulting_context: Option<MDLocationDescriptor>,
}

impl ThreadList {
    pub fn finish(mut self, buffer: &mut DumpBuf, base_rva: u64) -> Result<()> {
        for (i, (mut thread, offset)) in self
            .threads
            .into_iter()
            .zip(self.stack_offsets)
            .enumerate()
        {
            match offset.map(|o| u32::try_from(base_rva + o)) {
                Some(Ok(rva)) => thread.stack.memory.rva = rva,
                Some(Err(_)) => {
                    // Readers still find the stack through the memory list
                    log::warn!(
                        "stack of thread {} lies beyond 4GiB, leaving its descriptor empty",
                        thread.thread_id
                    );
                    thread.stack.memory = MDLocationDescriptor::default();
                }
                None => {}
            }
            self.section.set_value_at(buffer, thread, i)?;
        }
        Ok(())
    }
}

pub fn write(
    buffer: &mut DumpBuf,
    snapshot: &Snapshot,
    block: &MemoryBlock,
) -> Result<(MDRawDirectory, ThreadList)> {
    let num_threads = snapshot.threads.len();
    // Memory looks like this:
    // <num_threads><thread_1><thread_2>...
    let list_header = MemoryWriter::<u32>::alloc_with_val(buffer, num_threads as u32)?;

    let mut dirent = MDRawDirectory {
        stream_type: MDStreamType::ThreadListStream as u32,
        location: list_header.location(),
    };

    let section = MemoryArrayWriter::<MDRawThread>::alloc_array(buffer, num_threads)?;
    dirent.location.data_size += section.location().data_size;

    let mut threads = Vec::with_capacity(num_threads);
    let mut stack_offsets = Vec::with_capacity(num_threads);
    let mut faulting_context = None;

    for info in &snapshot.threads {
        let thread_context = match info.registers() {
            Some(registers) => {
                let mut cpu = RawContextCPU::default();
                registers.fill_cpu_context(&mut cpu);
                MemoryWriter::<RawContextCPU>::alloc_with_val(buffer, cpu)?.location()
            }
            // Readers treat an empty location as a missing context
            None => MDLocationDescriptor::default(),
        };
        if info.is_faulting && info.registers().is_some() {
            faulting_context = Some(thread_context.clone());
        }

        // Stacks left out of the dump, at triage level for example, are
        // described as empty at the stack pointer
        let (stack, offset) = match info
            .stack
            .and_then(|s| Some((s, block.offset_of(s.start, s.len())?)))
        {
            Some((s, offset)) => (
                MDMemoryDescriptor {
                    start_of_memory_range: s.start,
                    memory: MDLocationDescriptor {
                        data_size: s.len() as u32,
                        rva: 0,
                    },
                },
                Some(offset),
            ),
            None => (
                MDMemoryDescriptor {
                    start_of_memory_range: info.registers().map_or(0, |r| r.stack_pointer()),
                    memory: MDLocationDescriptor::default(),
                },
                None,
            ),
        };

        threads.push(MDRawThread {
            thread_id: info.tid as u32,
            suspend_count: 0,
            priority_class: 0,
            priority: 0,
            teb: 0,
            stack,
            thread_context,
        });
        stack_offsets.push(offset);
    }

    Ok((
        dirent,
        ThreadList {
            section,
            threads,
            stack_offsets,
            faulting_context,
        },
    ))
}

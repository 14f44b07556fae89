//! Mach-O core files, the layout `lldb` loads.
//!
//! Layout: `mach_header_64`, one `LC_THREAD` per thread, one `LC_SEGMENT_64`
//! per range, then the memory of every range at page aligned offsets.

use {
    crate::{
        cpu,
        crash_info::{MemoryRange, Snapshot},
        errors::{CollectionError, WriteError},
        mem_writer::{Buffer, MemoryArrayWriter, MemoryWriter},
        target::{DataTarget, MemoryRegion, Permissions},
        thread_info::ThreadInfo,
        writer::{align_up, CountingWriter, DumpWriter},
    },
    error_graph::WriteErrorList,
    goblin::mach::{header, load_command},
    scroll::{ctx::SizeWith, Endian},
    std::io::Write,
};

const VM_PROT_READ: u32 = 0x1;
const VM_PROT_WRITE: u32 = 0x2;
const VM_PROT_EXECUTE: u32 = 0x4;

#[derive(scroll::Pwrite, scroll::SizeWith)]
struct MachHeader64 {
    magic: u32,
    cputype: u32,
    cpusubtype: u32,
    filetype: u32,
    ncmds: u32,
    sizeofcmds: u32,
    flags: u32,
    reserved: u32,
}

#[derive(scroll::Pwrite, scroll::SizeWith)]
struct SegmentCommand64 {
    cmd: u32,
    cmdsize: u32,
    segname: [u8; 16],
    vmaddr: u64,
    vmsize: u64,
    fileoff: u64,
    filesize: u64,
    maxprot: u32,
    initprot: u32,
    nsects: u32,
    flags: u32,
}

#[derive(scroll::Pwrite, scroll::SizeWith)]
struct ThreadCommandHead {
    cmd: u32,
    cmdsize: u32,
}

/// Bytes an `LC_THREAD` carrying a thread state and an exception state takes
fn thread_command_size() -> u32 {
    let head = ThreadCommandHead::size_with(&Endian::Little) as u32;
    // flavor and count precede each state
    head + (2 + cpu::MACHO_THREAD_COUNT) * 4 + (2 + cpu::MACHO_EXCEPTION_COUNT) * 4
}

#[derive(Clone, Copy, Debug, Default)]
pub struct MachOWriter;

impl DumpWriter for MachOWriter {
    fn write<T: DataTarget, W: Write>(
        &self,
        snapshot: &Snapshot,
        target: &T,
        dest: &mut W,
        mut soft_errors: impl WriteErrorList<CollectionError>,
    ) -> Result<(), WriteError> {
        let page = snapshot.page_size as u64;
        let segment_size = SegmentCommand64::size_with(&Endian::Little) as u64;
        let ncmds = snapshot.threads.len() + snapshot.ranges.len();
        let sizeofcmds = snapshot.threads.len() as u64 * thread_command_size() as u64
            + snapshot.ranges.len() as u64 * segment_size;
        let ncmds = u32::try_from(ncmds).map_err(|_| WriteError::TooLarge {
            what: "load command count",
            value: ncmds as u64,
        })?;
        let sizeofcmds = u32::try_from(sizeofcmds).map_err(|_| WriteError::TooLarge {
            what: "load commands size",
            value: sizeofcmds,
        })?;

        let mut buffer = Buffer::default();
        MemoryWriter::alloc_with_val(
            &mut buffer,
            MachHeader64 {
                magic: header::MH_MAGIC_64,
                cputype: cpu::MACHO_CPU_TYPE,
                cpusubtype: cpu::MACHO_CPU_SUBTYPE,
                filetype: header::MH_CORE,
                ncmds,
                sizeofcmds,
                flags: 0,
                reserved: 0,
            },
        )?;

        let faulting = snapshot.faulting_thread();
        let threads = faulting
            .into_iter()
            .chain(snapshot.threads.iter().filter(|t| !t.is_faulting));
        for thread in threads {
            write_thread_command(&mut buffer, snapshot, thread)?;
        }

        let mut offset = align_up(buffer.position() + snapshot.ranges.len() as u64 * segment_size, page);
        let mut offsets = Vec::with_capacity(snapshot.ranges.len());
        for range in &snapshot.ranges {
            offset = align_up(offset, page);
            offsets.push(offset);
            let prot = vm_protection(&snapshot.regions, range);
            MemoryWriter::alloc_with_val(
                &mut buffer,
                SegmentCommand64 {
                    cmd: load_command::LC_SEGMENT_64,
                    cmdsize: segment_size as u32,
                    segname: [0; 16],
                    vmaddr: range.start,
                    vmsize: range.len,
                    fileoff: offset,
                    filesize: range.len,
                    maxprot: prot,
                    initprot: prot,
                    nsects: 0,
                    flags: 0,
                },
            )?;
            offset += range.len;
        }

        log::debug!(
            "Mach-O core: {ncmds} load commands ({sizeofcmds:#x} bytes), {offset} bytes total"
        );

        let mut out = CountingWriter::new(dest);
        out.write_all(buffer.as_bytes())?;
        for (range, offset) in snapshot.ranges.iter().zip(offsets) {
            out.pad_to(offset)?;
            out.copy_range(target, range, &mut soft_errors)?;
        }

        Ok(())
    }
}

fn write_thread_command(
    buffer: &mut Buffer,
    snapshot: &Snapshot,
    thread: &ThreadInfo,
) -> Result<(), WriteError> {
    MemoryWriter::alloc_with_val(
        buffer,
        ThreadCommandHead {
            cmd: load_command::LC_THREAD,
            cmdsize: thread_command_size(),
        },
    )?;

    let signal = snapshot
        .exception
        .filter(|_| thread.is_faulting)
        .map(|e| e.signal);
    // A thread whose registers couldn't be read keeps its slot with zeroed
    // state
    let (thread_state, exception_state) = match thread.registers() {
        Some(registers) => (
            registers.macho_thread_state(),
            registers.macho_exception_state(signal.as_ref()),
        ),
        None => (
            vec![0; cpu::MACHO_THREAD_COUNT as usize],
            vec![0; cpu::MACHO_EXCEPTION_COUNT as usize],
        ),
    };
    debug_assert_eq!(thread_state.len(), cpu::MACHO_THREAD_COUNT as usize);
    debug_assert_eq!(exception_state.len(), cpu::MACHO_EXCEPTION_COUNT as usize);

    for (flavor, state) in [
        (cpu::MACHO_THREAD_FLAVOR, thread_state),
        (cpu::MACHO_EXCEPTION_FLAVOR, exception_state),
    ] {
        MemoryArrayWriter::<u32>::alloc_from_iter(buffer, [flavor, state.len() as u32])?;
        MemoryArrayWriter::<u32>::alloc_from_iter(buffer, state)?;
    }
    Ok(())
}

fn vm_protection(regions: &[MemoryRegion], range: &MemoryRange) -> u32 {
    let Some(region) = regions.iter().find(|r| r.contains(range.start)) else {
        return VM_PROT_READ;
    };
    let mut prot = 0;
    if region.permissions.contains(Permissions::READ) {
        prot |= VM_PROT_READ;
    }
    if region.permissions.contains(Permissions::WRITE) {
        prot |= VM_PROT_WRITE;
    }
    if region.permissions.contains(Permissions::EXECUTE) {
        prot |= VM_PROT_EXECUTE;
    }
    prot
}

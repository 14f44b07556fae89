//! ELF core files, as `gdb`, `lldb` and `readelf` expect them on Linux.
//!
//! Layout: ELF header, program headers (one `PT_NOTE`, then one `PT_LOAD` per
//! range), the notes, then the memory of every range at page aligned offsets.

use {
    crate::{
        cpu::{self, RegisterContext},
        crash_info::{MemoryRange, Snapshot},
        errors::{CollectionError, WriteError},
        mem_writer::{Buffer, MemoryArrayWriter, MemoryWriter},
        target::{DataTarget, MemoryRegion, Permissions},
        thread_info::ThreadInfo,
        writer::{align_up, CountingWriter, DumpWriter},
    },
    error_graph::WriteErrorList,
    goblin::elf::{header, note, program_header},
    scroll::{ctx::SizeWith, Endian},
    std::io::Write,
};

const NOTE_NAME_CORE: &[u8] = b"CORE\0";
const ELF_NOTE_ALIGN: usize = 4;

/// Not all note types the kernel writes have goblin constants
const NT_PRFPREG: u32 = 2;
const NT_AUXV: u32 = 6;
const NT_SIGINFO: u32 = 0x5349_4749;
const NT_FILE: u32 = 0x4649_4c45;

/// `e_phnum` value that means the real count is in section header 0's
/// `sh_info`
const PN_XNUM: usize = 0xffff;

const SIGINFO_SIZE: usize = 128;

#[derive(scroll::Pwrite, scroll::SizeWith)]
struct Elf64Header {
    e_ident: [u8; 16],
    e_type: u16,
    e_machine: u16,
    e_version: u32,
    e_entry: u64,
    e_phoff: u64,
    e_shoff: u64,
    e_flags: u32,
    e_ehsize: u16,
    e_phentsize: u16,
    e_phnum: u16,
    e_shentsize: u16,
    e_shnum: u16,
    e_shstrndx: u16,
}

#[derive(scroll::Pwrite, scroll::SizeWith)]
struct Elf64ProgramHeader {
    p_type: u32,
    p_flags: u32,
    p_offset: u64,
    p_vaddr: u64,
    p_paddr: u64,
    p_filesz: u64,
    p_memsz: u64,
    p_align: u64,
}

#[derive(scroll::Pwrite, scroll::SizeWith)]
struct Elf64SectionHeader {
    sh_name: u32,
    sh_type: u32,
    sh_flags: u64,
    sh_addr: u64,
    sh_offset: u64,
    sh_size: u64,
    sh_link: u32,
    sh_info: u32,
    sh_addralign: u64,
    sh_entsize: u64,
}

/// How the program header count is stored: directly in `e_phnum`, or as
/// `PN_XNUM` plus a lone null section header carrying the count, the way
/// the kernel writes cores with too many segments
fn program_header_count(phnum: usize) -> Result<(u16, Option<Elf64SectionHeader>), WriteError> {
    if phnum < PN_XNUM {
        return Ok((phnum as u16, None));
    }
    let sh_info = u32::try_from(phnum).map_err(|_| WriteError::TooLarge {
        what: "program header count",
        value: phnum as u64,
    })?;
    Ok((
        PN_XNUM as u16,
        Some(Elf64SectionHeader {
            sh_name: 0,
            sh_type: 0,
            sh_flags: 0,
            sh_addr: 0,
            sh_offset: 0,
            // e_shnum
            sh_size: 1,
            sh_link: 0,
            sh_info,
            sh_addralign: 0,
            sh_entsize: 0,
        }),
    ))
}

#[derive(scroll::Pwrite, scroll::SizeWith)]
struct NoteHeader {
    namesz: u32,
    descsz: u32,
    kind: u32,
}

/// `struct elf_prpsinfo`
#[derive(scroll::Pwrite, scroll::SizeWith)]
struct PrPsInfo {
    pr_state: u8,
    pr_sname: u8,
    pr_zomb: u8,
    pr_nice: u8,
    pad0: u32,
    pr_flag: u64,
    pr_uid: u32,
    pr_gid: u32,
    pr_pid: i32,
    pr_ppid: i32,
    pr_pgrp: i32,
    pr_sid: i32,
    pr_fname: [u8; 16],
    pr_psargs: [u8; 80],
}

/// `struct elf_prstatus` up to the general registers
#[derive(scroll::Pwrite, scroll::SizeWith)]
struct PrStatusHead {
    si_signo: i32,
    si_code: i32,
    si_errno: i32,
    pr_cursig: i16,
    pad0: u16,
    pr_sigpend: u64,
    pr_sighold: u64,
    pr_pid: i32,
    pr_ppid: i32,
    pr_pgrp: i32,
    pr_sid: i32,
    /// user, system and children's user and system time
    pr_times: [u64; 8],
}

/// The leading part of `siginfo_t` for signals carrying a fault address
#[derive(scroll::Pwrite, scroll::SizeWith)]
struct SigInfoHead {
    si_signo: i32,
    si_errno: i32,
    si_code: i32,
    pad0: i32,
    si_addr: u64,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct ElfWriter;

impl DumpWriter for ElfWriter {
    fn write<T: DataTarget, W: Write>(
        &self,
        snapshot: &Snapshot,
        target: &T,
        dest: &mut W,
        mut soft_errors: impl WriteErrorList<CollectionError>,
    ) -> Result<(), WriteError> {
        let page = snapshot.page_size as u64;
        let phnum = snapshot.ranges.len() + 1;
        let (e_phnum, extended_count) = program_header_count(phnum)?;

        let ehsize = Elf64Header::size_with(&Endian::Little);
        let phentsize = Elf64ProgramHeader::size_with(&Endian::Little);
        let shentsize = Elf64SectionHeader::size_with(&Endian::Little);
        let shoff = (ehsize + phnum * phentsize) as u64;
        let notes_offset = match extended_count {
            Some(_) => shoff + shentsize as u64,
            None => shoff,
        };

        let notes = write_notes(snapshot, target)?;
        let notes_size = notes.position();

        let mut buffer = Buffer::with_capacity(notes_offset as usize);
        let mut e_ident = [0u8; 16];
        e_ident[..header::SELFMAG].copy_from_slice(header::ELFMAG);
        e_ident[header::EI_CLASS] = header::ELFCLASS64;
        e_ident[header::EI_DATA] = header::ELFDATA2LSB;
        e_ident[header::EI_VERSION] = header::EV_CURRENT;
        MemoryWriter::alloc_with_val(
            &mut buffer,
            Elf64Header {
                e_ident,
                e_type: header::ET_CORE,
                e_machine: cpu::ELF_MACHINE,
                e_version: header::EV_CURRENT as u32,
                e_entry: 0,
                e_phoff: ehsize as u64,
                e_shoff: if extended_count.is_some() { shoff } else { 0 },
                e_flags: 0,
                e_ehsize: ehsize as u16,
                e_phentsize: phentsize as u16,
                e_phnum,
                e_shentsize: if extended_count.is_some() { shentsize as u16 } else { 0 },
                e_shnum: extended_count.is_some() as u16,
                e_shstrndx: 0,
            },
        )?;

        MemoryWriter::alloc_with_val(
            &mut buffer,
            Elf64ProgramHeader {
                p_type: program_header::PT_NOTE,
                p_flags: 0,
                p_offset: notes_offset,
                p_vaddr: 0,
                p_paddr: 0,
                p_filesz: notes_size,
                p_memsz: 0,
                p_align: ELF_NOTE_ALIGN as u64,
            },
        )?;

        let mut offset = align_up(notes_offset + notes_size, page);
        let mut offsets = Vec::with_capacity(snapshot.ranges.len());
        for range in &snapshot.ranges {
            offset = align_up(offset, page);
            offsets.push(offset);
            MemoryWriter::alloc_with_val(
                &mut buffer,
                Elf64ProgramHeader {
                    p_type: program_header::PT_LOAD,
                    p_flags: segment_flags(&snapshot.regions, range),
                    p_offset: offset,
                    p_vaddr: range.start,
                    p_paddr: 0,
                    p_filesz: range.len,
                    p_memsz: range.len,
                    p_align: page,
                },
            )?;
            offset += range.len;
        }
        if let Some(section) = extended_count {
            MemoryWriter::alloc_with_val(&mut buffer, section)?;
        }
        debug_assert_eq!(buffer.position(), notes_offset);

        log::debug!(
            "ELF core: {phnum} program headers, {notes_size:#x} bytes of notes, {} bytes total",
            offset
        );

        let mut out = CountingWriter::new(dest);
        out.write_all(buffer.as_bytes())?;
        out.write_all(notes.as_bytes())?;
        for (range, offset) in snapshot.ranges.iter().zip(offsets) {
            out.pad_to(offset)?;
            out.copy_range(target, range, &mut soft_errors)?;
        }

        Ok(())
    }
}

/// Protection of the mappings a range covers. A merged range that straddles
/// mappings gets the union of their flags.
fn segment_flags(regions: &[MemoryRegion], range: &MemoryRange) -> u32 {
    let permissions = regions
        .iter()
        .filter(|r| r.start < range.end() && range.start < r.end)
        .fold(Permissions::empty(), |acc, r| acc | r.permissions);
    if permissions.is_empty() {
        return program_header::PF_R;
    }
    let mut flags = 0;
    if permissions.contains(Permissions::READ) {
        flags |= program_header::PF_R;
    }
    if permissions.contains(Permissions::WRITE) {
        flags |= program_header::PF_W;
    }
    if permissions.contains(Permissions::EXECUTE) {
        flags |= program_header::PF_X;
    }
    flags
}

fn write_note(buffer: &mut Buffer, kind: u32, desc: &[u8]) -> Result<(), WriteError> {
    MemoryWriter::alloc_with_val(
        buffer,
        NoteHeader {
            namesz: NOTE_NAME_CORE.len() as u32,
            descsz: desc.len() as u32,
            kind,
        },
    )?;
    buffer.write_all(NOTE_NAME_CORE)?;
    buffer.align(ELF_NOTE_ALIGN);
    buffer.write_all(desc)?;
    buffer.align(ELF_NOTE_ALIGN);
    Ok(())
}

/// Lays out every note. Notes of the faulting thread come first since
/// debuggers select the first thread as the current one.
fn write_notes<T: DataTarget>(snapshot: &Snapshot, target: &T) -> Result<Buffer, WriteError> {
    let mut notes = Buffer::default();
    let status = target
        .proc_file("status")
        .map(|s| ProcStatus::parse(&String::from_utf8_lossy(&s)))
        .unwrap_or_default();

    write_note(&mut notes, note::NT_PRPSINFO, prpsinfo(snapshot, &status)?.as_bytes())?;

    let faulting = snapshot.faulting_thread();
    let threads = faulting
        .into_iter()
        .chain(snapshot.threads.iter().filter(|t| !t.is_faulting));
    for thread in threads {
        write_note(&mut notes, note::NT_PRSTATUS, prstatus(snapshot, &status, thread)?.as_bytes())?;
        if let Some(registers) = thread.registers() {
            write_note(&mut notes, NT_PRFPREG, &registers.elf_fpregs())?;
        }
        if thread.is_faulting {
            write_note(&mut notes, NT_SIGINFO, siginfo(snapshot)?.as_bytes())?;
        }
    }

    if let Some(auxv) = &snapshot.auxv {
        write_note(&mut notes, NT_AUXV, auxv)?;
    }

    write_note(&mut notes, NT_FILE, mapped_files(snapshot)?.as_bytes())?;

    Ok(notes)
}

/// Process level details the notes need, read from the target's status file
#[derive(Default)]
struct ProcStatus {
    ppid: i32,
    uid: u32,
    gid: u32,
}

impl ProcStatus {
    fn parse(text: &str) -> Self {
        let mut status = Self::default();
        for line in text.lines() {
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            // Uid and Gid list real, effective, saved and filesystem ids
            let first = value.split_whitespace().next().unwrap_or_default();
            match key {
                "PPid" => status.ppid = first.parse().unwrap_or_default(),
                "Uid" => status.uid = first.parse().unwrap_or_default(),
                "Gid" => status.gid = first.parse().unwrap_or_default(),
                _ => {}
            }
        }
        status
    }
}

/// Copies `s` into a nul padded field, truncating it when needed
fn fixed<const N: usize>(s: Option<&str>) -> [u8; N] {
    let mut out = [0u8; N];
    if let Some(s) = s {
        // Leave room for the terminator
        let len = s.len().min(N - 1);
        out[..len].copy_from_slice(&s.as_bytes()[..len]);
    }
    out
}

fn prpsinfo(snapshot: &Snapshot, status: &ProcStatus) -> Result<Buffer, WriteError> {
    let mut desc = Buffer::default();
    MemoryWriter::alloc_with_val(
        &mut desc,
        PrPsInfo {
            pr_state: 0,
            pr_sname: b'R',
            pr_zomb: 0,
            pr_nice: 0,
            pad0: 0,
            pr_flag: 0,
            pr_uid: status.uid,
            pr_gid: status.gid,
            pr_pid: snapshot.pid,
            pr_ppid: status.ppid,
            pr_pgrp: snapshot.pid,
            pr_sid: 0,
            pr_fname: fixed(snapshot.process_name.as_deref()),
            pr_psargs: fixed(snapshot.command_line.as_deref()),
        },
    )?;
    Ok(desc)
}

fn prstatus(
    snapshot: &Snapshot,
    status: &ProcStatus,
    thread: &ThreadInfo,
) -> Result<Buffer, WriteError> {
    let signal = snapshot
        .exception
        .filter(|_| thread.is_faulting)
        .map(|e| e.signal)
        .unwrap_or_default();

    let mut desc = Buffer::default();
    MemoryWriter::alloc_with_val(
        &mut desc,
        PrStatusHead {
            si_signo: signal.signo,
            si_code: signal.code,
            si_errno: signal.errno,
            pr_cursig: signal.signo as i16,
            pad0: 0,
            pr_sigpend: 0,
            pr_sighold: 0,
            pr_pid: thread.tid,
            pr_ppid: status.ppid,
            pr_pgrp: snapshot.pid,
            pr_sid: 0,
            pr_times: [0; 8],
        },
    )?;

    // Threads without registers still get a status note so the thread list
    // is complete, their registers read as zero
    let gregs = thread
        .registers()
        .map_or([0; cpu::ELF_NGREG], RegisterContext::elf_gregs);
    MemoryArrayWriter::<u64>::alloc_from_iter(&mut desc, gregs)?;

    let fpvalid = thread.registers().is_some() as u32;
    MemoryArrayWriter::<u32>::alloc_from_iter(&mut desc, [fpvalid, 0])?;
    Ok(desc)
}

fn siginfo(snapshot: &Snapshot) -> Result<Buffer, WriteError> {
    let signal = snapshot.exception.map(|e| e.signal).unwrap_or_default();
    let mut desc = Buffer::default();
    MemoryWriter::alloc_with_val(
        &mut desc,
        SigInfoHead {
            si_signo: signal.signo,
            si_errno: signal.errno,
            si_code: signal.code,
            pad0: 0,
            si_addr: signal.address,
        },
    )?;
    let used = desc.position() as usize;
    desc.write_all(&[0; SIGINFO_SIZE][used..])?;
    Ok(desc)
}

/// `NT_FILE`: the file backed mappings, their file offsets in pages and then
/// the file names
fn mapped_files(snapshot: &Snapshot) -> Result<Buffer, WriteError> {
    let page = snapshot.page_size as u64;
    let files: Vec<_> = snapshot
        .regions
        .iter()
        .filter_map(|r| Some((r, r.file_path()?)))
        .collect();

    let mut desc = Buffer::default();
    MemoryArrayWriter::<u64>::alloc_from_iter(&mut desc, [files.len() as u64, page])?;
    for (region, _) in &files {
        MemoryArrayWriter::<u64>::alloc_from_iter(
            &mut desc,
            [region.start, region.end, region.offset / page],
        )?;
    }
    for (_, path) in &files {
        desc.write_all(path.as_bytes())?;
        desc.write_all(&[0])?;
    }
    Ok(desc)
}

#[cfg(test)]
mod test {
    use {
        super::*,
        crate::{
            config::{DumpOptions, DumpType},
            crash_info::CrashInfo,
            target::{memory::MemoryTarget, Backing, SignalInfo},
        },
        error_graph::ErrorList,
        goblin::elf::Elf,
    };

    const STACK: u64 = 0x7000_0000;

    fn target() -> MemoryTarget {
        let mut t = MemoryTarget::new(500);
        t.add_region(
            STACK,
            vec![0x11; 0x4000],
            Permissions::READ | Permissions::WRITE | Permissions::PRIVATE,
            Backing::Special("[stack]".into()),
        )
        .add_region(
            0x40_0000,
            vec![0x7f; 0x2000],
            Permissions::READ | Permissions::EXECUTE | Permissions::PRIVATE,
            Backing::File("/usr/bin/app".into()),
        )
        .add_thread(500, RegisterContext::new(0x40_0100, STACK + 0x3000, STACK + 0x3800))
        .add_thread(501, RegisterContext::new(0x40_0200, STACK + 0x1000, STACK + 0x1800))
        .set_crash(
            501,
            SignalInfo {
                signo: libc::SIGSEGV,
                code: 1,
                errno: 0,
                address: 0xdead,
            },
        )
        .set_process_name("app")
        .set_command_line("app --serve");
        t
    }

    #[test]
    fn core_layout() {
        let t = target();
        let mut options = DumpOptions::new();
        options.set_dump_type(DumpType::Normal);
        let snapshot = CrashInfo::new(&t, &options).collect().unwrap();

        let mut out = Vec::new();
        ElfWriter
            .write(&snapshot, &t, &mut out, ErrorList::default())
            .unwrap();

        let elf = Elf::parse(&out).unwrap();
        assert_eq!(elf.header.e_type, header::ET_CORE);
        assert_eq!(elf.header.e_machine, cpu::ELF_MACHINE);
        assert_eq!(elf.program_headers[0].p_type, program_header::PT_NOTE);

        let loads: Vec<_> = elf
            .program_headers
            .iter()
            .filter(|ph| ph.p_type == program_header::PT_LOAD)
            .collect();
        assert_eq!(loads.len(), snapshot.ranges.len());
        for (ph, range) in loads.iter().zip(&snapshot.ranges) {
            assert_eq!(ph.p_offset % 4096, 0);
            assert_eq!(ph.p_vaddr, range.start);
            assert_eq!(ph.p_filesz, range.len);
        }
        let last = loads.last().unwrap();
        assert_eq!(out.len() as u64, last.p_offset + last.p_filesz);

        let stack = loads.iter().find(|ph| ph.p_vaddr >= STACK).unwrap();
        let bytes = &out[stack.p_offset as usize..(stack.p_offset + stack.p_filesz) as usize];
        assert!(bytes.iter().all(|b| *b == 0x11));
        assert_eq!(stack.p_flags, program_header::PF_R | program_header::PF_W);

        let kinds: Vec<u32> = elf
            .iter_note_headers(&out)
            .unwrap()
            .map(|n| n.unwrap().n_type)
            .collect();
        assert_eq!(
            kinds,
            [
                note::NT_PRPSINFO,
                note::NT_PRSTATUS,
                NT_PRFPREG,
                NT_SIGINFO,
                note::NT_PRSTATUS,
                NT_PRFPREG,
                NT_FILE,
            ]
        );

        // The faulting thread leads
        let first_status = elf
            .iter_note_headers(&out)
            .unwrap()
            .map(|n| n.unwrap())
            .find(|n| n.n_type == note::NT_PRSTATUS)
            .unwrap();
        let pid = i32::from_le_bytes(first_status.desc[32..36].try_into().unwrap());
        assert_eq!(pid, 501);
        let cursig = i16::from_le_bytes(first_status.desc[12..14].try_into().unwrap());
        assert_eq!(cursig as i32, libc::SIGSEGV);
    }

    #[test]
    fn status_fields() {
        let status = ProcStatus::parse("Name:\tapp\nPPid:\t42\nUid:\t1000\t1000\t1000\t1000\nGid:\t100\t100\t100\t100\n");
        assert_eq!(status.ppid, 42);
        assert_eq!(status.uid, 1000);
        assert_eq!(status.gid, 100);
    }

    #[test]
    fn prpsinfo_truncates() {
        let name: [u8; 16] = fixed(Some("a-very-long-process-name"));
        assert_eq!(&name[..15], b"a-very-long-pro");
        assert_eq!(name[15], 0);
        assert_eq!(fixed::<4>(None), [0; 4]);
    }

    #[test]
    fn note_sizes_match_the_kernel() {
        assert_eq!(PrPsInfo::size_with(&Endian::Little), 136);
        assert_eq!(
            PrStatusHead::size_with(&Endian::Little) + cpu::ELF_NGREG * 8 + 8,
            if cfg!(target_arch = "x86_64") { 336 } else { 392 }
        );
        assert_eq!(Elf64Header::size_with(&Endian::Little), 64);
        assert_eq!(Elf64ProgramHeader::size_with(&Endian::Little), 56);
        assert_eq!(Elf64SectionHeader::size_with(&Endian::Little), 64);
    }

    #[test]
    fn straddling_range_gets_union_of_flags() {
        let mut t = MemoryTarget::new(1);
        t.add_region(
            0x40_0000,
            vec![0; 0x1000],
            Permissions::READ | Permissions::EXECUTE | Permissions::PRIVATE,
            Backing::File("/usr/bin/app".into()),
        )
        .add_region(
            0x40_1000,
            vec![0; 0x1000],
            Permissions::READ | Permissions::WRITE | Permissions::PRIVATE,
            Backing::Anonymous,
        );
        let regions = t.memory_regions();

        let merged = MemoryRange::new(0x40_0000, 0x2000, crate::crash_info::RangeReasons::MAPPING);
        assert_eq!(
            segment_flags(regions, &merged),
            program_header::PF_R | program_header::PF_W | program_header::PF_X
        );
        let text = MemoryRange::new(0x40_0000, 0x1000, crate::crash_info::RangeReasons::MAPPING);
        assert_eq!(
            segment_flags(regions, &text),
            program_header::PF_R | program_header::PF_X
        );
        let unmapped = MemoryRange::new(0x90_0000, 0x1000, crate::crash_info::RangeReasons::MAPPING);
        assert_eq!(segment_flags(regions, &unmapped), program_header::PF_R);
    }

    #[test]
    fn extended_program_header_count() {
        let (e_phnum, section) = program_header_count(3).unwrap();
        assert_eq!(e_phnum, 3);
        assert!(section.is_none());

        let (e_phnum, section) = program_header_count(PN_XNUM - 1).unwrap();
        assert_eq!(e_phnum as usize, PN_XNUM - 1);
        assert!(section.is_none());

        let (e_phnum, section) = program_header_count(70_000).unwrap();
        assert_eq!(e_phnum as usize, PN_XNUM);
        let section = section.unwrap();
        assert_eq!(section.sh_info, 70_000);
        assert_eq!(section.sh_type, 0);
        assert_eq!(section.sh_size, 1);
    }
}

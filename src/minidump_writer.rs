//! The minidump writer.
//!
//! All stream metadata is laid out in memory first. The memory of every range
//! follows it as one block described by a `Memory64ListStream`, so the file is
//! written front to back without seeking.

use {
    crate::{
        crash_info::Snapshot,
        dir_section::DirSection,
        errors::{CollectionError, WriteError},
        mem_writer::{Buffer, MemoryArrayWriter, MemoryWriter},
        minidump_format::*,
        sections::{
            exception_stream, memory64_list_stream, module_list_stream, proc_streams,
            systeminfo_stream, thread_list_stream, thread_names_stream,
        },
        target::DataTarget,
        writer::{CountingWriter, DumpWriter},
    },
    error_graph::{ErrorList, WriteErrorList},
    std::io::Write,
};

/// A minidump file contains a number of tagged streams. This is the most we
/// write: threads, modules, memory, exception, system info, thread names and
/// soft errors, plus the process file streams.
const NUM_STREAMS: u32 = 7 + proc_streams::MAX_STREAMS;

/// Alignment of the memory block
const MEMORY_ALIGNMENT: usize = 16;

#[derive(Clone, Copy, Debug, Default)]
pub struct MinidumpWriter;

impl DumpWriter for MinidumpWriter {
    fn write<T: DataTarget, W: Write>(
        &self,
        snapshot: &Snapshot,
        target: &T,
        dest: &mut W,
        mut soft_errors: impl WriteErrorList<CollectionError>,
    ) -> Result<(), WriteError> {
        let mut buffer = Buffer::with_capacity(0x4000);

        let mut header_section = MemoryWriter::<MDRawHeader>::alloc(&mut buffer)?;
        let mut dir_section = DirSection::new(&mut buffer, NUM_STREAMS)?;

        let header = MDRawHeader {
            signature: MD_HEADER_SIGNATURE,
            version: MD_HEADER_VERSION,
            stream_count: NUM_STREAMS,
            stream_directory_rva: dir_section.position(),
            checksum: 0, /* Can be 0.  In fact, that's all that's
                          * been found in minidump files. */
            time_date_stamp: std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map_or(0, |d| d.as_secs() as u32),
            flags: 0,
        };
        header_section.set_value(&mut buffer, header)?;

        let (dirent, memory_block) = memory64_list_stream::write(&mut buffer, snapshot)?;
        dir_section.add(&mut buffer, dirent)?;

        let (dirent, thread_list) = thread_list_stream::write(&mut buffer, snapshot, &memory_block)?;
        dir_section.add(&mut buffer, dirent)?;

        let dirent = module_list_stream::write(&mut buffer, snapshot)?;
        dir_section.add(&mut buffer, dirent)?;

        if let Some(dirent) =
            exception_stream::write(&mut buffer, snapshot, thread_list.faulting_context.clone())?
        {
            dir_section.add(&mut buffer, dirent)?;
        }

        let dirent = systeminfo_stream::write(&mut buffer)?;
        dir_section.add(&mut buffer, dirent)?;

        for dirent in proc_streams::write(&mut buffer, snapshot, target)? {
            dir_section.add(&mut buffer, dirent)?;
        }

        let dirent = thread_names_stream::write(&mut buffer, snapshot)?;
        dir_section.add(&mut buffer, dirent)?;

        // If this fails, there's really nothing we can do about that (other than ignore it).
        match write_soft_errors(&mut buffer, &snapshot.soft_errors) {
            Ok(location) => dir_section.add(
                &mut buffer,
                MDRawDirectory {
                    stream_type: MDStreamType::MozSoftErrors as u32,
                    location,
                },
            )?,
            Err(e) => log::warn!("unable to record soft errors: {e}"),
        }

        // If you add more directory entries, don't forget to update NUM_STREAMS, above.

        buffer.align(MEMORY_ALIGNMENT);
        let base_rva = buffer.position();
        let memory_size = memory_block.size;
        memory_block.finish(&mut buffer, base_rva)?;
        thread_list.finish(&mut buffer, base_rva)?;

        log::debug!(
            "minidump metadata is {base_rva:#x} bytes, {} ranges follow ({memory_size:#x} bytes)",
            snapshot.ranges.len()
        );

        let mut out = CountingWriter::new(dest);
        out.write_all(buffer.as_bytes())?;
        for range in &snapshot.ranges {
            out.copy_range(target, range, &mut soft_errors)?;
        }
        debug_assert_eq!(out.offset(), base_rva + memory_size);

        Ok(())
    }
}

fn write_soft_errors<E: serde::Serialize>(
    buffer: &mut Buffer,
    soft_errors: &ErrorList<E>,
) -> Result<MDLocationDescriptor, WriteError> {
    let soft_errors_json_str = serde_json::to_string_pretty(soft_errors)?;
    let section = MemoryArrayWriter::write_bytes(buffer, soft_errors_json_str.as_bytes())?;
    Ok(section.location())
}

#[cfg(test)]
mod test {
    use {
        super::*,
        crate::{
            config::{DumpOptions, DumpType},
            cpu::RegisterContext,
            crash_info::CrashInfo,
            target::{memory::MemoryTarget, Backing, Permissions},
        },
        scroll::Pread,
    };

    fn dump(t: &MemoryTarget) -> (Snapshot, Vec<u8>) {
        let mut options = DumpOptions::new();
        options.set_dump_type(DumpType::Normal);
        let snapshot = CrashInfo::new(t, &options).collect().unwrap();
        let mut out = Vec::new();
        MinidumpWriter
            .write(&snapshot, t, &mut out, ErrorList::default())
            .unwrap();
        (snapshot, out)
    }

    #[test]
    fn memory_block_follows_metadata() {
        let mut t = MemoryTarget::new(1234);
        t.add_region(
            0x7000_0000,
            vec![0x5a; 0x2000],
            Permissions::READ | Permissions::WRITE | Permissions::PRIVATE,
            Backing::Special("[stack]".into()),
        );
        t.add_thread(1234, RegisterContext::new(0x1000, 0x7000_1800, 0x7000_1900));

        let (snapshot, out) = dump(&t);
        let header: MDRawHeader = out.pread_with(0, scroll::LE).unwrap();
        assert_eq!(header.signature, MD_HEADER_SIGNATURE);
        assert_eq!(header.stream_count, NUM_STREAMS);

        let dirents: Vec<MDRawDirectory> = (0..header.stream_count as usize)
            .map(|i| {
                out.pread_with(
                    header.stream_directory_rva as usize + i * std::mem::size_of::<MDRawDirectory>(),
                    scroll::LE,
                )
                .unwrap()
            })
            .collect();
        let memory = dirents
            .iter()
            .find(|d| d.stream_type == MDStreamType::Memory64ListStream as u32)
            .unwrap();
        let list: MDMemory64List = out
            .pread_with(memory.location.rva as usize, scroll::LE)
            .unwrap();
        assert_eq!(list.number_of_memory_ranges, snapshot.ranges.len() as u64);
        assert_eq!(list.base_rva % MEMORY_ALIGNMENT as u64, 0);
        assert_eq!(out.len() as u64, list.base_rva + snapshot.memory_size());
        assert!(out[list.base_rva as usize..].iter().all(|b| *b == 0x5a));

        // Nothing was blamed
        assert!(dirents
            .iter()
            .all(|d| d.stream_type != MDStreamType::ExceptionStream as u32));
    }
}

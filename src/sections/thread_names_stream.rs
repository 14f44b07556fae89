use super::*;

/// Writes the [`MDStreamType::ThreadNamesStream`], one entry per thread in
/// the thread list. Threads without a name get an empty one.
pub fn write(buffer: &mut DumpBuf, snapshot: &Snapshot) -> Result<MDRawDirectory> {
    let thread_count = snapshot.threads.len();
    let list_header = MemoryWriter::<u32>::alloc_with_val(buffer, thread_count as u32)?;

    let mut dirent = MDRawDirectory {
        stream_type: MDStreamType::ThreadNamesStream as u32,
        location: list_header.location(),
    };

    let mut names = MemoryArrayWriter::<MDRawThreadName>::alloc_array(buffer, thread_count)?;
    dirent.location.data_size += names.location().data_size;

    for (i, thread) in snapshot.threads.iter().enumerate() {
        let name_loc = write_string_to_location(buffer, thread.name.as_deref().unwrap_or(""))?;
        names.set_value_at(
            buffer,
            MDRawThreadName {
                thread_id: thread.tid as u32,
                thread_name_rva: name_loc.rva.into(),
            },
            i,
        )?;
    }

    Ok(dirent)
}

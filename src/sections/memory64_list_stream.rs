use super::*;

/// Where each merged range lands in the memory block that follows the
/// metadata. The block's file offset is only known once all metadata has
/// been laid out, so offsets here are relative to its start.
pub struct MemoryBlock {
    header: MemoryWriter<MDMemory64List>,
    /// `(start, end, offset)` per range, in address order
    layout: Vec<(u64, u64, u64)>,
    pub size: u64,
}

impl MemoryBlock {
    /// Offset in the block of `[start, start + len)`, when a single range
    /// holds all of it
    pub fn offset_of(&self, start: u64, len: u64) -> Option<u64> {
        let index = self.layout.partition_point(|(_, end, _)| *end <= start);
        let (r_start, r_end, offset) = self.layout.get(index)?;
        (*r_start <= start && start.checked_add(len)? <= *r_end).then(|| offset + (start - r_start))
    }

    /// Points the stream at the block once its file offset is known
    pub fn finish(mut self, buffer: &mut DumpBuf, base_rva: u64) -> Result<()> {
        self.header.set_value(
            buffer,
            MDMemory64List {
                number_of_memory_ranges: self.layout.len() as u64,
                base_rva,
            },
        )
    }
}

pub fn write(buffer: &mut DumpBuf, snapshot: &Snapshot) -> Result<(MDRawDirectory, MemoryBlock)> {
    let header = MemoryWriter::<MDMemory64List>::alloc(buffer)?;
    let mut dirent = MDRawDirectory {
        stream_type: MDStreamType::Memory64ListStream as u32,
        location: header.location(),
    };

    let descriptors = MemoryArrayWriter::<MDMemoryDescriptor64>::alloc_from_iter(
        buffer,
        snapshot.ranges.iter().map(|r| MDMemoryDescriptor64 {
            start_of_memory_range: r.start,
            data_size: r.len,
        }),
    )?;
    dirent.location.data_size += descriptors.location().data_size;

    let mut size = 0;
    let layout = snapshot
        .ranges
        .iter()
        .map(|r| {
            let offset = size;
            size += r.len;
            (r.start, r.end(), offset)
        })
        .collect();

    Ok((dirent, MemoryBlock { header, layout, size }))
}

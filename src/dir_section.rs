use crate::{
    errors::MemoryWriterError,
    mem_writer::{Buffer, MemoryArrayWriter},
    minidump_format::MDRawDirectory,
};

/// The stream directory. Slots are reserved up front, streams fill them in
/// the order they are written and slots left over stay zeroed, which readers
/// treat as unused.
pub struct DirSection {
    section: MemoryArrayWriter<MDRawDirectory>,
    stream_count: u32,
    next: u32,
}

impl DirSection {
    pub fn new(buffer: &mut Buffer, stream_count: u32) -> Result<Self, MemoryWriterError> {
        let section = MemoryArrayWriter::<MDRawDirectory>::alloc_array(buffer, stream_count as usize)?;
        Ok(Self {
            section,
            stream_count,
            next: 0,
        })
    }

    #[inline]
    pub fn position(&self) -> u32 {
        self.section.position
    }

    /// Records a stream. Extra entries past the reserved count are dropped.
    pub fn add(&mut self, buffer: &mut Buffer, dirent: MDRawDirectory) -> Result<(), MemoryWriterError> {
        if self.next >= self.stream_count {
            log::warn!(
                "stream directory is full, dropping stream {:#x}",
                dirent.stream_type
            );
            return Ok(());
        }
        self.section.set_value_at(buffer, dirent, self.next as usize)?;
        self.next += 1;
        Ok(())
    }
}

//! A process described entirely in memory

use {
    super::{
        Backing, DataTarget, MemoryRegion, Module, Permissions, ReadError, SignalInfo,
        ThreadContextError, ThreadId,
    },
    crate::{cpu::RegisterContext, Pid},
    std::collections::{BTreeSet, HashMap},
};

struct Mapped {
    region: MemoryRegion,
    bytes: Vec<u8>,
}

/// A [`DataTarget`] over a synthetic process.
///
/// Memory is a set of regions with their contents, individual pages can be
/// punched out to simulate guard pages or pages the kernel refuses to read.
#[derive(Default)]
pub struct MemoryTarget {
    pid: Pid,
    page_size: usize,
    mapped: Vec<Mapped>,
    regions: Vec<MemoryRegion>,
    holes: BTreeSet<u64>,
    threads: Vec<(ThreadId, Option<RegisterContext>)>,
    thread_names: HashMap<ThreadId, String>,
    modules: Option<Vec<Module>>,
    exports: HashMap<(String, String), u64>,
    crash: Option<(ThreadId, SignalInfo)>,
    process_name: Option<String>,
    command_line: Option<String>,
    auxv: Option<Vec<u8>>,
    proc_files: HashMap<String, Vec<u8>>,
}

impl MemoryTarget {
    pub fn new(pid: Pid) -> Self {
        Self {
            pid,
            page_size: 4096,
            ..Default::default()
        }
    }

    pub fn set_page_size(&mut self, page_size: usize) -> &mut Self {
        self.page_size = page_size;
        self
    }

    /// Maps `bytes` at `start`
    pub fn add_region(
        &mut self,
        start: u64,
        bytes: Vec<u8>,
        permissions: Permissions,
        backing: Backing,
    ) -> &mut Self {
        self.add_region_at_offset(start, bytes, permissions, backing, 0)
    }

    pub fn add_region_at_offset(
        &mut self,
        start: u64,
        bytes: Vec<u8>,
        permissions: Permissions,
        backing: Backing,
        offset: u64,
    ) -> &mut Self {
        let region = MemoryRegion {
            start,
            end: start + bytes.len() as u64,
            permissions,
            offset,
            backing,
        };
        self.mapped.push(Mapped {
            region: region.clone(),
            bytes,
        });
        self.mapped.sort_by_key(|m| m.region.start);
        self.regions = self.mapped.iter().map(|m| m.region.clone()).collect();
        self
    }

    /// Makes the page containing `address` unreadable while keeping it listed
    /// as part of its region
    pub fn unmap_page(&mut self, address: u64) -> &mut Self {
        let page = self.page_size as u64;
        self.holes.insert(address - address % page);
        self
    }

    /// Overwrites already mapped memory
    pub fn poke(&mut self, address: u64, data: &[u8]) -> &mut Self {
        let mut done = 0;
        while done < data.len() {
            let at = address + done as u64;
            let Some(m) = self.mapped.iter_mut().find(|m| m.region.contains(at)) else {
                panic!("poke at unmapped address {at:#x}");
            };
            let offset = (at - m.region.start) as usize;
            let n = (m.bytes.len() - offset).min(data.len() - done);
            m.bytes[offset..offset + n].copy_from_slice(&data[done..done + n]);
            done += n;
        }
        self
    }

    pub fn poke_u32(&mut self, address: u64, value: u32) -> &mut Self {
        self.poke(address, &value.to_le_bytes())
    }

    pub fn poke_u64(&mut self, address: u64, value: u64) -> &mut Self {
        self.poke(address, &value.to_le_bytes())
    }

    pub fn add_thread(&mut self, tid: ThreadId, context: RegisterContext) -> &mut Self {
        self.threads.push((tid, Some(context)));
        self
    }

    /// Adds a thread whose registers can't be read
    pub fn add_thread_without_context(&mut self, tid: ThreadId) -> &mut Self {
        self.threads.push((tid, None));
        self
    }

    pub fn set_thread_name(&mut self, tid: ThreadId, name: &str) -> &mut Self {
        self.thread_names.insert(tid, name.to_owned());
        self
    }

    /// Replaces the module list derived from the file backed regions
    pub fn set_modules(&mut self, modules: Vec<Module>) -> &mut Self {
        self.modules = Some(modules);
        self
    }

    pub fn add_export(&mut self, module_path: &str, symbol: &str, address: u64) -> &mut Self {
        self.exports
            .insert((module_path.to_owned(), symbol.to_owned()), address);
        self
    }

    pub fn set_crash(&mut self, tid: ThreadId, signal: SignalInfo) -> &mut Self {
        self.crash = Some((tid, signal));
        self
    }

    pub fn set_process_name(&mut self, name: &str) -> &mut Self {
        self.process_name = Some(name.to_owned());
        self
    }

    pub fn set_command_line(&mut self, command_line: &str) -> &mut Self {
        self.command_line = Some(command_line.to_owned());
        self
    }

    pub fn set_auxv(&mut self, auxv: Vec<u8>) -> &mut Self {
        self.auxv = Some(auxv);
        self
    }

    pub fn set_proc_file(&mut self, name: &str, contents: Vec<u8>) -> &mut Self {
        self.proc_files.insert(name.to_owned(), contents);
        self
    }

    fn is_readable(&self, address: u64) -> bool {
        let page = self.page_size as u64;
        !self.holes.contains(&(address - address % page))
            && self
                .mapped
                .iter()
                .any(|m| m.region.contains(address) && m.region.is_readable())
    }
}

impl DataTarget for MemoryTarget {
    fn pid(&self) -> Pid {
        self.pid
    }

    fn read_memory(&self, address: u64, buf: &mut [u8]) -> Result<(), ReadError> {
        let length = buf.len();
        let mut done = 0;
        while done < length {
            let at = address + done as u64;
            let readable = self.is_readable(at);
            let mapped = self
                .mapped
                .iter()
                .find(|m| m.region.contains(at))
                .filter(|_| readable);

            let Some(m) = mapped else {
                return Err(if done == 0 {
                    ReadError::Unmapped { address, length }
                } else {
                    ReadError::Partial {
                        address,
                        read: done,
                        length,
                    }
                });
            };

            // Copy at most up to the end of the current page so that holes
            // are noticed
            let page = self.page_size as u64;
            let page_end = at - at % page + page;
            let end = page_end.min(m.region.end).min(address + length as u64);
            let n = (end - at) as usize;
            let offset = (at - m.region.start) as usize;
            buf[done..done + n].copy_from_slice(&m.bytes[offset..offset + n]);
            done += n;
        }
        Ok(())
    }

    fn enumerate_threads(&self) -> Vec<ThreadId> {
        self.threads.iter().map(|(tid, _)| *tid).collect()
    }

    fn thread_context(&self, tid: ThreadId) -> Result<RegisterContext, ThreadContextError> {
        match self.threads.iter().find(|(t, _)| *t == tid) {
            Some((_, Some(context))) => Ok(context.clone()),
            Some((_, None)) => Err(ThreadContextError::Withheld(tid)),
            None => Err(ThreadContextError::UnknownThread(tid)),
        }
    }

    fn memory_regions(&self) -> &[MemoryRegion] {
        &self.regions
    }

    fn enumerate_modules(&self) -> Vec<Module> {
        match &self.modules {
            Some(modules) => modules.clone(),
            None => super::modules_from_regions(&self.regions),
        }
    }

    fn page_size(&self) -> usize {
        self.page_size
    }

    fn crashing_thread(&self) -> Option<ThreadId> {
        self.crash.map(|(tid, _)| tid)
    }

    fn signal_info(&self) -> Option<SignalInfo> {
        self.crash.map(|(_, signal)| signal)
    }

    fn process_name(&self) -> Option<String> {
        self.process_name.clone()
    }

    fn command_line(&self) -> Option<String> {
        self.command_line.clone()
    }

    fn thread_name(&self, tid: ThreadId) -> Option<String> {
        self.thread_names.get(&tid).cloned()
    }

    fn auxv(&self) -> Option<Vec<u8>> {
        self.auxv.clone()
    }

    fn proc_file(&self, name: &str) -> Option<Vec<u8>> {
        self.proc_files.get(name).cloned()
    }

    fn resolve_export(&self, module: &Module, symbol: &str) -> Option<u64> {
        self.exports
            .get(&(module.path.clone(), symbol.to_owned()))
            .copied()
    }
}

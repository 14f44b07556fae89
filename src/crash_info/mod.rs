//! Collection: walks the target once and decides what goes into the dump.

pub mod ranges;

pub use ranges::{merge_ranges, MemoryRange, RangeReasons};

use {
    crate::{
        config::{DumpOptions, DumpType},
        cpu,
        errors::{CollectionError, CrashInfoError, SoftError},
        exit_status::ExitStatus,
        module_reader::{self, BuildId, ReadFromModule, SoName, TargetModuleMemory},
        runtime::{self, threads::walk_threads, HeapSummary, ManagedThread},
        target::{Backing, DataTarget, MemoryRegion, Module, SignalInfo, ThreadId},
        thread_info::ThreadInfo,
        Pid,
    },
    error_graph::{ErrorList, WriteErrorList},
    std::path::Path,
};

/// The signal that led to the dump and the thread it hit
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize)]
pub struct ExceptionRecord {
    pub tid: ThreadId,
    pub signal: SignalInfo,
}

/// Where the runtime's debug header was found
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize)]
pub struct RuntimeInfo {
    pub module: String,
    pub header_address: u64,
    pub major_version: u16,
    pub minor_version: u16,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize)]
pub enum Outcome {
    Complete,
    /// The managed state could not be collected, native state is intact
    Partial,
}

/// Everything the writers need, collected in one pass while the target is
/// suspended. Nothing here changes once collection returns.
#[derive(Debug)]
pub struct Snapshot {
    pub pid: Pid,
    pub arch: &'static str,
    pub page_size: usize,
    pub dump_type: DumpType,
    pub process_name: Option<String>,
    pub command_line: Option<String>,
    pub auxv: Option<Vec<u8>>,
    /// In enumeration order
    pub modules: Vec<Module>,
    /// In enumeration order, including threads whose registers are unavailable
    pub threads: Vec<ThreadInfo>,
    pub regions: Vec<MemoryRegion>,
    /// Sorted, non overlapping and readable at validation time
    pub ranges: Vec<MemoryRange>,
    pub exception: Option<ExceptionRecord>,
    pub runtime: Option<RuntimeInfo>,
    pub heap: Option<HeapSummary>,
    pub managed_threads: Vec<ManagedThread>,
    pub managed_heap_skipped: Option<String>,
    pub managed_threads_skipped: Option<String>,
    pub soft_errors: ErrorList<SoftError>,
}

impl Snapshot {
    pub fn outcome(&self) -> Outcome {
        if self.managed_heap_skipped.is_some() || self.managed_threads_skipped.is_some() {
            Outcome::Partial
        } else {
            Outcome::Complete
        }
    }

    pub fn exit_status(&self) -> ExitStatus {
        match self.outcome() {
            Outcome::Complete => ExitStatus::Success,
            Outcome::Partial => ExitStatus::Partial,
        }
    }

    pub fn faulting_thread(&self) -> Option<&ThreadInfo> {
        self.threads.iter().find(|t| t.is_faulting)
    }

    /// Total number of memory bytes the dump carries
    pub fn memory_size(&self) -> u64 {
        ranges::total_len(&self.ranges)
    }

    pub fn module_for_address(&self, address: u64) -> Option<&Module> {
        self.modules.iter().find(|m| m.contains(address))
    }
}

pub struct CrashInfo<'a, T> {
    target: &'a T,
    options: &'a DumpOptions,
}

impl<'a, T: DataTarget> CrashInfo<'a, T> {
    pub fn new(target: &'a T, options: &'a DumpOptions) -> Self {
        Self { target, options }
    }

    fn check_interrupted(&self) -> Result<(), CrashInfoError> {
        if self.options.is_interrupted() {
            log::warn!("collection interrupted");
            return Err(CrashInfoError::Interrupted);
        }
        Ok(())
    }

    /// Collects the snapshot. Only an empty thread list or an interruption
    /// fails the collection, everything else degrades into soft errors.
    pub fn collect(&self) -> Result<Snapshot, CrashInfoError> {
        let target = self.target;
        let options = self.options;
        let level = options.dump_type;
        let page = target.page_size() as u64;
        let mut soft_errors = ErrorList::default();
        let mut ranges = Vec::new();

        let tids = target.enumerate_threads();
        if tids.is_empty() {
            return Err(CrashInfoError::NoThreads(target.pid()));
        }
        let faulting_tid = target.crashing_thread().or(options.blamed_thread);
        log::info!(
            "collecting {level} dump of {} ({} threads, faulting thread {faulting_tid:?})",
            target.pid(),
            tids.len()
        );

        let mut modules = target.enumerate_modules();
        identify_modules(
            target,
            &mut modules,
            soft_errors.subwriter(SoftError::ModuleIdentityErrors),
        );
        self.check_interrupted()?;

        let threads: Vec<ThreadInfo> = {
            let mut errors = soft_errors.subwriter(SoftError::ThreadInfoErrors);
            tids.iter()
                .map(|tid| ThreadInfo::capture(target, *tid, faulting_tid, &mut errors))
                .collect()
        };

        // Triage keeps a single stack, the main thread's when nothing is
        // blamed
        let triage_tid = faulting_tid
            .filter(|tid| tids.contains(tid))
            .unwrap_or(tids[0]);
        for thread in &threads {
            let Some(stack) = thread.stack else {
                continue;
            };
            if level >= DumpType::Normal || thread.tid == triage_tid {
                ranges.push(MemoryRange::new(
                    stack.start,
                    stack.len(),
                    RangeReasons::STACK,
                ));
            }
        }
        self.check_interrupted()?;

        let managed = self.collect_runtime(
            &modules,
            &mut ranges,
            soft_errors.subwriter(SoftError::RuntimeErrors),
        );
        self.check_interrupted()?;

        for module in &modules {
            if level >= DumpType::Full {
                ranges.push(MemoryRange::new(
                    module.base_address,
                    module.size,
                    RangeReasons::MODULE_IMAGE,
                ));
            } else {
                ranges.push(MemoryRange::new(
                    module.base_address,
                    page.min(module.size),
                    RangeReasons::MODULE_HEADER,
                ));
            }
        }

        for (address, length) in &options.always_include {
            ranges.push(MemoryRange::new(
                *address,
                *length,
                RangeReasons::ALWAYS_INCLUDE,
            ));
        }

        if level >= DumpType::Full {
            for region in target.memory_regions() {
                if is_dumpable_mapping(region) {
                    ranges.push(MemoryRange::new(
                        region.start,
                        region.size(),
                        RangeReasons::MAPPING,
                    ));
                }
            }
        }
        self.check_interrupted()?;

        let ranges = validate_ranges(
            target,
            ranges,
            soft_errors.subwriter(SoftError::MemoryRangeErrors),
        );

        let exception = faulting_tid.and_then(|tid| {
            let signal = target.signal_info().or(options.signal)?;
            Some(ExceptionRecord { tid, signal })
        });

        let snapshot = Snapshot {
            pid: target.pid(),
            arch: cpu::ARCH_NAME,
            page_size: target.page_size(),
            dump_type: level,
            process_name: target.process_name(),
            command_line: target.command_line(),
            auxv: target.auxv(),
            modules,
            threads,
            regions: target.memory_regions().to_vec(),
            ranges,
            exception,
            runtime: managed.runtime,
            heap: managed.heap,
            managed_threads: managed.threads,
            managed_heap_skipped: managed.heap_skipped,
            managed_threads_skipped: managed.threads_skipped,
            soft_errors,
        };

        log::info!(
            "collected {} modules, {} threads, {} ranges ({:#x} bytes), outcome {:?}",
            snapshot.modules.len(),
            snapshot.threads.len(),
            snapshot.ranges.len(),
            snapshot.memory_size(),
            snapshot.outcome()
        );
        Ok(snapshot)
    }

    fn collect_runtime(
        &self,
        modules: &[Module],
        ranges: &mut Vec<MemoryRange>,
        mut soft_errors: impl WriteErrorList<CollectionError>,
    ) -> ManagedState {
        let target = self.target;
        let level = self.options.dump_type;
        let mut state = ManagedState::default();

        let Some(module) = runtime::find_runtime_module(modules, &self.options.runtime_module)
        else {
            log::info!(
                "{} is not loaded, writing a native only dump",
                self.options.runtime_module
            );
            return state;
        };

        let schema = match runtime::read_debug_header(target, module) {
            Ok(schema) => schema,
            Err(e) => {
                log::warn!("managed heap skipped: {e}");
                state.heap_skipped = Some(e.to_string());
                soft_errors.push(CollectionError::ManagedHeapSkipped(e));
                return state;
            }
        };
        state.runtime = Some(RuntimeInfo {
            module: module.path.clone(),
            header_address: schema.header_address,
            major_version: schema.major_version,
            minor_version: schema.minor_version,
        });
        for (address, length) in schema.metadata_ranges() {
            ranges.push(MemoryRange::new(
                *address,
                *length,
                RangeReasons::RUNTIME_METADATA,
            ));
        }

        match walk_threads(target, &schema) {
            Ok(threads) => state.threads = threads,
            Err(e) => {
                log::warn!("managed thread list skipped: {e}");
                state.threads_skipped = Some(e.to_string());
                soft_errors.push(CollectionError::ManagedThreadsSkipped(e));
            }
        }

        let heap = match HeapSummary::read(target, &schema) {
            Ok(heap) => heap,
            Err(e) => {
                log::warn!("managed heap skipped: {e}");
                state.heap_skipped = Some(e.to_string());
                soft_errors.push(CollectionError::ManagedHeapSkipped(e));
                return state;
            }
        };

        if level >= DumpType::Normal {
            for (address, length) in &heap.bookkeeping {
                ranges.push(MemoryRange::new(
                    *address,
                    *length,
                    RangeReasons::HEAP_SUMMARY,
                ));
            }
        }

        if level >= DumpType::WithHeap {
            for segment in heap.segments() {
                if segment.allocated < segment.mem || segment.allocated > segment.reserved {
                    log::warn!(
                        "ignoring heap segment {:#x} with allocated {:#x} outside [{:#x}, {:#x}]",
                        segment.address,
                        segment.allocated,
                        segment.mem,
                        segment.reserved
                    );
                    soft_errors.push(CollectionError::BadHeapSegment {
                        address: segment.address,
                        mem: segment.mem,
                        allocated: segment.allocated,
                        reserved: segment.reserved,
                    });
                    continue;
                }
                ranges.push(MemoryRange::new(
                    segment.mem,
                    segment.allocated.saturating_sub(segment.mem),
                    RangeReasons::HEAP_SEGMENT,
                ));
            }
            let contexts = heap
                .allocation_contexts()
                .chain(state.threads.iter().map(|t| t.alloc_context))
                .filter(|ctx| !ctx.is_empty());
            for ctx in contexts {
                ranges.push(MemoryRange::new(
                    ctx.alloc_ptr,
                    ctx.alloc_limit - ctx.alloc_ptr,
                    RangeReasons::ALLOCATION_CONTEXT,
                ));
            }
            for queue in heap.finalize_queues() {
                ranges.push(MemoryRange::new(
                    queue.address,
                    queue.size,
                    RangeReasons::FINALIZE_QUEUE,
                ));
            }
        }

        state.heap = Some(heap);
        state
    }
}

#[derive(Default)]
struct ManagedState {
    runtime: Option<RuntimeInfo>,
    heap: Option<HeapSummary>,
    threads: Vec<ManagedThread>,
    heap_skipped: Option<String>,
    threads_skipped: Option<String>,
}

/// Fills in build ids and sonames. The mapped image is preferred since it is
/// what actually ran, the file on disk is the fallback.
fn identify_modules<T: DataTarget>(
    target: &T,
    modules: &mut [Module],
    mut soft_errors: impl WriteErrorList<CollectionError>,
) {
    for module in modules {
        let base = module.base_address;
        let memory = || TargetModuleMemory::new(target, base);
        let path = Path::new(&module.path);

        match BuildId::read_from_module(memory())
            .or_else(|_| module_reader::read_from_file::<BuildId>(path))
        {
            Ok(BuildId(id)) => module.build_id = Some(id),
            Err(source) => {
                log::debug!("no build id for {}: {source}", module.path);
                soft_errors.push(CollectionError::ModuleIdentity {
                    path: module.path.clone(),
                    source,
                });
            }
        }

        // Executables rarely carry a soname, its absence isn't an error
        module.soname = SoName::read_from_module(memory())
            .or_else(|_| module_reader::read_from_file::<SoName>(path))
            .ok()
            .map(|SoName(name)| name);
    }
}

/// Private and anonymous mappings hold the process' own data. Shared file
/// mappings are left out, their contents live on disk.
fn is_dumpable_mapping(region: &MemoryRegion) -> bool {
    use crate::target::Permissions;

    if !region.is_readable() {
        return false;
    }
    match &region.backing {
        Backing::File(_) => region.permissions.contains(Permissions::PRIVATE),
        Backing::Anonymous => true,
        // The vsyscall page can't be read through the debug interfaces
        Backing::Special(name) => name != "[vsyscall]" && name != "[vvar]",
    }
}

/// Widens every range to whole pages, merges them and drops the pages that
/// can't be read
fn validate_ranges<T: DataTarget>(
    target: &T,
    ranges: Vec<MemoryRange>,
    mut soft_errors: impl WriteErrorList<CollectionError>,
) -> Vec<MemoryRange> {
    let page = target.page_size() as u64;
    let merged = merge_ranges(ranges.iter().map(|r| r.page_aligned(page)));

    let mut valid = Vec::with_capacity(merged.len());
    for range in &merged {
        let (mapped, mut unreadable) = ranges::clip_to_regions(range, target.memory_regions());
        for piece in &mapped {
            let (readable, holes) = ranges::readable_runs(target, piece, page);
            valid.extend(readable);
            unreadable.extend(holes);
        }
        unreadable.sort_unstable();
        for (start, end) in unreadable {
            log::debug!(
                "excluding unreadable {start:#x}-{end:#x} ({})",
                range.reasons.describe()
            );
            soft_errors.push(CollectionError::PagesExcluded {
                start,
                end,
                reasons: range.reasons.describe(),
            });
        }
    }
    merge_ranges(valid)
}

#[cfg(test)]
mod test {
    use {
        super::*,
        crate::{
            cpu::RegisterContext,
            errors::RuntimeError,
            runtime::{
                gc::test::{describe_gc, install_workstation_gc, HEAP_AREA, HEAP_AREA_SIZE, SEGMENTS},
                gc::SUPPORTED_GC_MAJOR_VERSION,
                schema::test::HeaderBuilder,
                threads::test::{describe_threads, install_threads},
            },
            target::{memory::MemoryTarget, Permissions},
        },
    };

    const STACKS: u64 = 0x7000_0000;
    const STACK_SIZE: u64 = 0x8000;
    const RUNTIME: &str = "/opt/runtime/libcoreclr.so";
    const RUNTIME_BASE: u64 = 0x5000_0000;

    /// Three threads, each with a stack mapping of its own, plus one image
    /// and a private data mapping
    fn three_threads() -> MemoryTarget {
        let mut t = MemoryTarget::new(1000);
        for (i, tid) in [1000, 1001, 1002].into_iter().enumerate() {
            let base = STACKS + i as u64 * 0x10_0000;
            t.add_region(
                base,
                vec![0; STACK_SIZE as usize],
                Permissions::READ | Permissions::WRITE | Permissions::PRIVATE,
                Backing::Anonymous,
            );
            t.add_thread(tid, RegisterContext::new(0x40_1000, base + 0x6010, base + 0x6100));
        }
        t.add_region(
            0x40_0000,
            vec![0; 0x3000],
            Permissions::READ | Permissions::EXECUTE | Permissions::PRIVATE,
            Backing::File("/usr/bin/app".into()),
        )
        .add_region(
            0x60_0000,
            vec![0; 0x2000],
            Permissions::READ | Permissions::WRITE | Permissions::PRIVATE,
            Backing::Anonymous,
        )
        .set_crash(
            1001,
            SignalInfo {
                signo: libc::SIGSEGV,
                code: 1,
                errno: 0,
                address: 0x10,
            },
        );
        t
    }

    /// Adds a runtime module whose debug header describes a workstation GC
    /// and a thread store
    fn with_runtime(t: &mut MemoryTarget, gc_major: u8) {
        install_workstation_gc(t, gc_major);
        install_threads(t, &[(1001, (HEAP_AREA + 0x100, HEAP_AREA + 0x200))]);

        let mut h = HeaderBuilder::default();
        describe_gc(&mut h);
        describe_threads(&mut h);
        let header = h.install(t);

        t.add_region(
            RUNTIME_BASE,
            vec![0; 0x2000],
            Permissions::READ | Permissions::EXECUTE | Permissions::PRIVATE,
            Backing::File(RUNTIME.into()),
        )
        .add_export(RUNTIME, runtime::DEBUG_HEADER_SYMBOL, header);
    }

    fn collect(t: &MemoryTarget, level: DumpType) -> Snapshot {
        let mut options = DumpOptions::new();
        options.set_dump_type(level);
        CrashInfo::new(t, &options).collect().unwrap()
    }

    fn stack_of(i: u64) -> (u64, u64) {
        let base = STACKS + i * 0x10_0000;
        (base + 0x6000, 0x2000)
    }

    #[test]
    fn three_thread_normal_dump() {
        let t = three_threads();
        let snapshot = collect(&t, DumpType::Normal);

        let tids: Vec<_> = snapshot.threads.iter().map(|t| t.tid).collect();
        assert_eq!(tids, vec![1000, 1001, 1002]);
        assert_eq!(snapshot.faulting_thread().unwrap().tid, 1001);
        assert_eq!(
            snapshot.exception,
            Some(ExceptionRecord {
                tid: 1001,
                signal: t.signal_info().unwrap(),
            })
        );
        for i in 0..3 {
            let (start, len) = stack_of(i);
            assert!(ranges::covers(&snapshot.ranges, start, len), "stack {i}");
        }
        // Only the header page of the image
        assert!(ranges::covers(&snapshot.ranges, 0x40_0000, 0x1000));
        assert!(!ranges::covers(&snapshot.ranges, 0x40_1000, 1));
        assert!(!ranges::covers(&snapshot.ranges, 0x60_0000, 1));
        assert_eq!(snapshot.outcome(), Outcome::Complete);
        assert_eq!(snapshot.exit_status(), ExitStatus::Success);
        assert!(snapshot.heap.is_none());
    }

    #[test]
    fn triage_keeps_only_faulting_stack() {
        let t = three_threads();
        let snapshot = collect(&t, DumpType::Triage);

        assert_eq!(snapshot.threads.len(), 3);
        let (start, len) = stack_of(1);
        assert!(ranges::covers(&snapshot.ranges, start, len));
        let (start, _) = stack_of(0);
        assert!(!ranges::covers(&snapshot.ranges, start, 1));
    }

    #[test]
    fn full_dump_adds_private_mappings() {
        let t = three_threads();
        let snapshot = collect(&t, DumpType::Full);
        assert!(ranges::covers(&snapshot.ranges, 0x40_0000, 0x3000));
        assert!(ranges::covers(&snapshot.ranges, 0x60_0000, 0x2000));
        assert!(snapshot.ranges.iter().any(|r| r.reasons.contains(RangeReasons::MAPPING)));
    }

    #[test]
    fn guard_page_in_second_stack() {
        let mut t = three_threads();
        let (start, _) = stack_of(1);
        t.unmap_page(start + 0x1000);

        let snapshot = collect(&t, DumpType::Normal);
        let stack = snapshot.threads[1].stack.unwrap();
        assert_eq!((stack.start, stack.end), (start, start + 0x1000));
        assert!(ranges::covers(&snapshot.ranges, start, 0x1000));
        assert!(!ranges::covers(&snapshot.ranges, start + 0x1000, 1));
        // The other stacks are untouched
        let (start, len) = stack_of(2);
        assert!(ranges::covers(&snapshot.ranges, start, len));
    }

    #[test]
    fn unavailable_context_keeps_order() {
        let mut t = three_threads();
        t.add_thread_without_context(1003);
        let snapshot = collect(&t, DumpType::Normal);

        let tids: Vec<_> = snapshot.threads.iter().map(|t| t.tid).collect();
        assert_eq!(tids, vec![1000, 1001, 1002, 1003]);
        assert!(snapshot.threads[3].registers().is_none());
        assert!(snapshot
            .soft_errors
            .iter()
            .any(|e| matches!(e, SoftError::ThreadInfoErrors(_))));
    }

    #[test]
    fn unreadable_always_include_is_dropped() {
        let t = three_threads();
        let mut options = DumpOptions::new();
        options
            .always_include(0x60_0010, 0x10)
            .always_include(0x9000_0000, 0x1000);
        let snapshot = CrashInfo::new(&t, &options).collect().unwrap();

        assert!(ranges::covers(&snapshot.ranges, 0x60_0000, 0x1000));
        assert!(!ranges::covers(&snapshot.ranges, 0x9000_0000, 1));
        assert!(snapshot.soft_errors.iter().any(|e| match e {
            SoftError::MemoryRangeErrors(list) => list
                .iter()
                .any(|e| matches!(e, CollectionError::PagesExcluded { start: 0x9000_0000, .. })),
            _ => false,
        }));
    }

    #[test]
    fn levels_are_strict_supersets() {
        let mut t = three_threads();
        with_runtime(&mut t, SUPPORTED_GC_MAJOR_VERSION);

        let snapshots: Vec<_> = DumpType::ALL.iter().map(|l| collect(&t, *l)).collect();
        for pair in snapshots.windows(2) {
            let (lower, higher) = (&pair[0], &pair[1]);
            for range in &lower.ranges {
                assert!(
                    ranges::covers(&higher.ranges, range.start, range.len),
                    "{} range {range:x?} missing from {}",
                    lower.dump_type,
                    higher.dump_type
                );
            }
            assert!(
                higher.memory_size() > lower.memory_size(),
                "{} is not larger than {}",
                higher.dump_type,
                lower.dump_type
            );
        }
    }

    #[test]
    fn with_heap_includes_segments() {
        let mut t = three_threads();
        with_runtime(&mut t, SUPPORTED_GC_MAJOR_VERSION);
        let snapshot = collect(&t, DumpType::WithHeap);

        assert_eq!(snapshot.outcome(), Outcome::Complete);
        assert_eq!(snapshot.managed_threads.len(), 1);
        assert!(snapshot.runtime.is_some());
        assert!(ranges::covers(&snapshot.ranges, HEAP_AREA, 0x2000));
        assert!(ranges::covers(&snapshot.ranges, HEAP_AREA + 0x8000, 0x1000));
        // The thread's allocation context
        assert!(ranges::covers(&snapshot.ranges, HEAP_AREA + 0x100, 0x100));
        let reasons = snapshot
            .ranges
            .iter()
            .fold(RangeReasons::empty(), |acc, r| acc | r.reasons);
        assert!(reasons.contains(
            RangeReasons::HEAP_SEGMENT
                | RangeReasons::HEAP_SUMMARY
                | RangeReasons::RUNTIME_METADATA
                | RangeReasons::FINALIZE_QUEUE
        ));
    }

    #[test]
    fn segment_allocated_past_reserved_is_ignored() {
        let mut t = three_threads();
        with_runtime(&mut t, SUPPORTED_GC_MAJOR_VERSION);
        t.poke_u64(SEGMENTS, HEAP_AREA + (1 << 40));
        let snapshot = collect(&t, DumpType::WithHeap);

        assert!(snapshot.heap.is_some());
        assert!(!ranges::covers(&snapshot.ranges, HEAP_AREA + 0x1000, 1));
        // The ephemeral segment is still there
        assert!(ranges::covers(&snapshot.ranges, HEAP_AREA + 0x8000, 0x1000));
        let runtime_errors = snapshot.soft_errors.iter().find_map(|e| match e {
            SoftError::RuntimeErrors(list) => Some(list),
            _ => None,
        });
        assert!(runtime_errors.unwrap().iter().any(|e| matches!(
            e,
            CollectionError::BadHeapSegment { address: SEGMENTS, .. }
        )));
    }

    #[test]
    fn oversized_segment_is_clipped_to_mappings() {
        let mut t = three_threads();
        with_runtime(&mut t, SUPPORTED_GC_MAJOR_VERSION);
        let bogus_end = HEAP_AREA + (1 << 40);
        t.poke_u64(SEGMENTS, bogus_end)
            .poke_u64(SEGMENTS + 0x10, bogus_end);
        let snapshot = collect(&t, DumpType::WithHeap);

        assert!(ranges::covers(&snapshot.ranges, HEAP_AREA, HEAP_AREA_SIZE));
        assert!(!ranges::covers(&snapshot.ranges, HEAP_AREA + HEAP_AREA_SIZE, 1));
        assert!(snapshot.soft_errors.iter().any(|e| match e {
            SoftError::MemoryRangeErrors(list) => list.iter().any(|e| matches!(
                e,
                CollectionError::PagesExcluded { end, .. } if *end == bogus_end
            )),
            _ => false,
        }));
    }

    #[test]
    fn gc_version_mismatch_is_partial() {
        let mut t = three_threads();
        with_runtime(&mut t, SUPPORTED_GC_MAJOR_VERSION + 1);
        let snapshot = collect(&t, DumpType::WithHeap);

        assert_eq!(snapshot.outcome(), Outcome::Partial);
        assert_eq!(snapshot.exit_status(), ExitStatus::Partial);
        assert!(snapshot.heap.is_none());
        assert!(snapshot.managed_heap_skipped.is_some());
        // Native state is still complete
        assert_eq!(snapshot.threads.len(), 3);
        assert!(!ranges::covers(&snapshot.ranges, HEAP_AREA, 1));
        let runtime_errors = snapshot.soft_errors.iter().find_map(|e| match e {
            SoftError::RuntimeErrors(list) => Some(list),
            _ => None,
        });
        assert!(runtime_errors.unwrap().iter().any(|e| matches!(
            e,
            CollectionError::ManagedHeapSkipped(RuntimeError::GcVersionMismatch { .. })
        )));
    }

    #[test]
    fn header_version_mismatch_is_partial() {
        let mut t = three_threads();
        with_runtime(&mut t, SUPPORTED_GC_MAJOR_VERSION);
        // Bump the header's major version
        t.poke(crate::runtime::schema::test::HEADER_AREA + 4, &[3, 0]);
        let snapshot = collect(&t, DumpType::Normal);

        assert_eq!(snapshot.outcome(), Outcome::Partial);
        assert!(snapshot.runtime.is_none());
        assert!(snapshot
            .managed_heap_skipped
            .as_deref()
            .unwrap()
            .contains("not supported"));
    }

    #[test]
    fn missing_runtime_is_native_only() {
        let t = three_threads();
        let mut options = DumpOptions::new();
        options.set_runtime_module("libother.so");
        let snapshot = CrashInfo::new(&t, &options).collect().unwrap();
        assert!(snapshot.runtime.is_none());
        assert_eq!(snapshot.outcome(), Outcome::Complete);
    }

    #[test]
    fn no_threads_is_fatal() {
        let t = MemoryTarget::new(5);
        let options = DumpOptions::new();
        assert!(matches!(
            CrashInfo::new(&t, &options).collect(),
            Err(CrashInfoError::NoThreads(5))
        ));
    }

    #[test]
    fn interruption_stops_collection() {
        let t = three_threads();
        let mut options = DumpOptions::new();
        options.set_interrupt_flag(std::sync::Arc::new(std::sync::atomic::AtomicBool::new(
            true,
        )));
        assert!(matches!(
            CrashInfo::new(&t, &options).collect(),
            Err(CrashInfoError::Interrupted)
        ));
    }
}

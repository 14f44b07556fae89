//! The GC's bookkeeping, as published through `g_gcDacGlobals`.
//!
//! Only structure is read here: generation tables, segment headers and
//! allocation contexts. Object contents are never interpreted.

use {
    super::{ObjectReader, RuntimeSchema},
    crate::{errors::RuntimeError, target::DataTarget},
    std::collections::HashSet,
};

pub const SUPPORTED_GC_MAJOR_VERSION: u8 = 2;
/// Used when the runtime doesn't describe its finalize queue type
pub const DEFAULT_FINALIZE_QUEUE_SIZE: u64 = 0x100;

const GC_GLOBALS: &str = "g_gcDacGlobals";
const MAX_HEAPS: i32 = 1024;
const MAX_GENERATIONS: u32 = 16;
const MAX_SEGMENTS: usize = 1 << 16;
/// How far `GcDacVars.generation_size` may exceed the described type size
const MAX_GENERATION_SIZE_FACTOR: u64 = 16;

const GC_DAC_VARS: &str = "GcDacVars";
const GC_HEAP: &str = "dac_gc_heap";
const GENERATION: &str = "dac_generation";
const SEGMENT: &str = "dac_heap_segment";
const ALLOC_CONTEXT: &str = "gc_alloc_context";
const FINALIZE_QUEUE: &str = "dac_finalize_queue";

/// The bump allocation window `[alloc_ptr, alloc_limit)` of a thread or
/// generation
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize)]
pub struct AllocContext {
    pub alloc_ptr: u64,
    pub alloc_limit: u64,
}

impl AllocContext {
    pub fn is_empty(&self) -> bool {
        self.alloc_ptr == 0 || self.alloc_limit <= self.alloc_ptr
    }
}

#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize)]
pub struct Generation {
    pub allocation_start: u64,
    pub start_segment: u64,
    pub allocation_context: AllocContext,
}

#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize)]
pub struct HeapSegment {
    /// Address of the segment header
    pub address: u64,
    pub mem: u64,
    /// End of the objects in the segment. For the ephemeral segment this is
    /// the heap's `alloc_allocated`.
    pub allocated: u64,
    pub committed: u64,
    pub reserved: u64,
    pub flags: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize)]
pub struct FinalizeQueue {
    pub address: u64,
    pub size: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize)]
pub struct GcHeap {
    /// The `dac_gc_heap` object, only server GC has one
    pub address: Option<u64>,
    pub generations: Vec<Generation>,
    pub segments: Vec<HeapSegment>,
    pub ephemeral_segment: u64,
    pub alloc_allocated: u64,
    pub finalize_queue: Option<FinalizeQueue>,
}

#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize)]
pub struct HeapSummary {
    pub major_version: u8,
    pub minor_version: u8,
    pub server: bool,
    pub generation_count: u32,
    pub heaps: Vec<GcHeap>,
    /// `(address, length)` of the GC's own data structures that were read
    #[serde(skip)]
    pub bookkeeping: Vec<(u64, u64)>,
}

impl HeapSummary {
    /// Walks the GC data through the schema. Any unreadable structure aborts
    /// the whole walk.
    pub fn read<T: DataTarget>(target: &T, schema: &RuntimeSchema) -> Result<Self, RuntimeError> {
        failspot::failspot!(WalkGcHeap bail(RuntimeError::Injected));

        let reader = ObjectReader::new(target, schema);
        let vars = reader.global_pointer(GC_GLOBALS)?;
        let major_version = reader.u8(vars, GC_DAC_VARS, "major_version_number")?;
        let minor_version = reader.u8(vars, GC_DAC_VARS, "minor_version_number")?;
        if major_version != SUPPORTED_GC_MAJOR_VERSION {
            return Err(RuntimeError::GcVersionMismatch {
                found_major: major_version,
                found_minor: minor_version,
                expected_major: SUPPORTED_GC_MAJOR_VERSION,
            });
        }

        let described = schema.type_size(GENERATION)?;
        let mut generation_size = reader.pointer(vars, GC_DAC_VARS, "generation_size")?;
        if generation_size == 0 {
            generation_size = described;
        } else if generation_size > described.saturating_mul(MAX_GENERATION_SIZE_FACTOR) {
            return Err(RuntimeError::BadGenerationSize {
                found: generation_size,
                described,
            });
        }
        let mut generation_count = reader.u32(vars, GC_DAC_VARS, "total_generation_count")?;
        if generation_count > MAX_GENERATIONS {
            log::warn!("clamping GC generation count {generation_count} to {MAX_GENERATIONS}");
            generation_count = MAX_GENERATIONS;
        }

        let svr_flag = reader.pointer(vars, GC_DAC_VARS, "built_with_svr")?;
        let server = svr_flag != 0
            && target
                .read_u8(svr_flag)
                .map_err(|e| RuntimeError::unreadable("built_with_svr", svr_flag, e))?
                != 0;

        let mut walk = Walk {
            reader,
            generation_size,
            generation_count,
            bookkeeping: vec![(vars, schema.type_size(GC_DAC_VARS)?)],
            seen_segments: HashSet::new(),
        };

        let heaps = if server {
            walk.server_heaps(vars)?
        } else {
            vec![walk.workstation_heap(vars)?]
        };

        log::debug!(
            "GC {major_version}.{minor_version} ({}): {} heaps, {} segments",
            if server { "server" } else { "workstation" },
            heaps.len(),
            walk.seen_segments.len()
        );

        Ok(Self {
            major_version,
            minor_version,
            server,
            generation_count,
            heaps,
            bookkeeping: walk.bookkeeping,
        })
    }

    pub fn segments(&self) -> impl Iterator<Item = &HeapSegment> {
        self.heaps.iter().flat_map(|h| h.segments.iter())
    }

    pub fn allocation_contexts(&self) -> impl Iterator<Item = AllocContext> + '_ {
        self.heaps
            .iter()
            .flat_map(|h| h.generations.iter().map(|g| g.allocation_context))
            .filter(|ctx| !ctx.is_empty())
    }

    pub fn finalize_queues(&self) -> impl Iterator<Item = &FinalizeQueue> {
        self.heaps.iter().filter_map(|h| h.finalize_queue.as_ref())
    }
}

struct Walk<'a, T> {
    reader: ObjectReader<'a, T>,
    generation_size: u64,
    generation_count: u32,
    bookkeeping: Vec<(u64, u64)>,
    seen_segments: HashSet<u64>,
}

impl<T: DataTarget> Walk<'_, T> {
    /// Workstation GC keeps its heap state in globals that `GcDacVars` points at
    fn workstation_heap(&mut self, vars: u64) -> Result<GcHeap, RuntimeError> {
        let r = &self.reader;
        let table = r.pointer(vars, GC_DAC_VARS, "generation_table")?;
        let alloc_allocated = {
            let var = r.pointer(vars, GC_DAC_VARS, "alloc_allocated")?;
            r.deref("alloc_allocated", var)?
        };
        let ephemeral_segment = {
            let var = r.pointer(vars, GC_DAC_VARS, "ephemeral_heap_segment")?;
            r.deref("ephemeral_heap_segment", var)?
        };
        let finalize_queue = r
            .pointer(vars, GC_DAC_VARS, "finalize_queue")
            .and_then(|var| r.deref("finalize_queue", var));

        self.heap(None, table, alloc_allocated, ephemeral_segment, finalize_queue)
    }

    fn server_heaps(&mut self, vars: u64) -> Result<Vec<GcHeap>, RuntimeError> {
        let r = &self.reader;
        let n_heaps_var = r.pointer(vars, GC_DAC_VARS, "n_heaps")?;
        let n_heaps = r
            .target
            .read_u32(n_heaps_var)
            .map_err(|e| RuntimeError::unreadable("n_heaps", n_heaps_var, e))?
            as i32;
        if !(1..=MAX_HEAPS).contains(&n_heaps) {
            return Err(RuntimeError::BadHeapCount(n_heaps));
        }

        let g_heaps_var = r.pointer(vars, GC_DAC_VARS, "g_heaps")?;
        let array = r.deref("g_heaps", g_heaps_var)?;
        self.bookkeeping.push((array, n_heaps as u64 * 8));

        let mut heaps = Vec::with_capacity(n_heaps as usize);
        for i in 0..n_heaps as u64 {
            let r = &self.reader;
            let slot = array
                .checked_add(i * 8)
                .ok_or(RuntimeError::AddressOverflow { what: "g_heaps", base: array })?;
            let heap = r.deref("g_heaps[]", slot)?;
            let table = r.field_address(heap, GC_HEAP, "generation_table")?;
            let alloc_allocated = r.pointer(heap, GC_HEAP, "alloc_allocated")?;
            let ephemeral_segment = r.pointer(heap, GC_HEAP, "ephemeral_heap_segment")?;
            let finalize_queue = r.pointer(heap, GC_HEAP, "finalize_queue");
            self.bookkeeping
                .push((heap, r.schema.type_size(GC_HEAP)?));

            heaps.push(self.heap(
                Some(heap),
                table,
                alloc_allocated,
                ephemeral_segment,
                finalize_queue,
            )?);
        }
        Ok(heaps)
    }

    fn heap(
        &mut self,
        address: Option<u64>,
        table: u64,
        alloc_allocated: u64,
        ephemeral_segment: u64,
        finalize_queue: Result<u64, RuntimeError>,
    ) -> Result<GcHeap, RuntimeError> {
        let table_size = self
            .generation_size
            .checked_mul(u64::from(self.generation_count))
            .filter(|size| table.checked_add(*size).is_some())
            .ok_or(RuntimeError::AddressOverflow {
                what: "generation_table",
                base: table,
            })?;
        self.bookkeeping.push((table, table_size));

        let mut generations = Vec::with_capacity(self.generation_count as usize);
        let mut segments = Vec::new();
        for index in 0..u64::from(self.generation_count) {
            let generation = self.generation(table + index * self.generation_size)?;
            self.walk_segments(
                generation.start_segment,
                ephemeral_segment,
                alloc_allocated,
                &mut segments,
            )?;
            generations.push(generation);
        }

        // A heap without a readable finalize queue is still a usable heap
        let finalize_queue = match finalize_queue {
            Ok(0) => None,
            Ok(queue) => Some(FinalizeQueue {
                address: queue,
                size: self
                    .reader
                    .size_of(FINALIZE_QUEUE, DEFAULT_FINALIZE_QUEUE_SIZE),
            }),
            Err(e) => {
                log::debug!("no finalize queue: {e}");
                None
            }
        };

        Ok(GcHeap {
            address,
            generations,
            segments,
            ephemeral_segment,
            alloc_allocated,
            finalize_queue,
        })
    }

    fn generation(&self, address: u64) -> Result<Generation, RuntimeError> {
        let r = &self.reader;
        let context = r.field_address(address, GENERATION, "allocation_context")?;
        Ok(Generation {
            allocation_start: r.pointer(address, GENERATION, "allocation_start")?,
            start_segment: r.pointer(address, GENERATION, "start_segment")?,
            allocation_context: AllocContext {
                alloc_ptr: r.pointer(context, ALLOC_CONTEXT, "alloc_ptr")?,
                alloc_limit: r.pointer(context, ALLOC_CONTEXT, "alloc_limit")?,
            },
        })
    }

    /// Follows a `next` chain. Segments already reached from another
    /// generation end the walk, a segment seen twice in the same chain is
    /// corruption.
    fn walk_segments(
        &mut self,
        first: u64,
        ephemeral_segment: u64,
        alloc_allocated: u64,
        segments: &mut Vec<HeapSegment>,
    ) -> Result<(), RuntimeError> {
        let segment_size = self.reader.schema.type_size(SEGMENT)?;
        let mut chain = HashSet::new();
        let mut address = first;
        while address != 0 {
            if !chain.insert(address) || self.seen_segments.len() >= MAX_SEGMENTS {
                return Err(RuntimeError::Cycle(address));
            }
            if !self.seen_segments.insert(address) {
                break;
            }

            let r = &self.reader;
            let mut allocated = r.pointer(address, SEGMENT, "allocated")?;
            if address == ephemeral_segment && alloc_allocated != 0 {
                allocated = alloc_allocated;
            }
            let segment = HeapSegment {
                address,
                mem: r.pointer(address, SEGMENT, "mem")?,
                allocated,
                committed: r.pointer(address, SEGMENT, "committed")?,
                reserved: r.pointer(address, SEGMENT, "reserved")?,
                flags: r.pointer(address, SEGMENT, "flags")?,
            };
            let next = r.pointer(address, SEGMENT, "next")?;

            self.bookkeeping.push((address, segment_size));
            segments.push(segment);
            address = next;
        }
        Ok(())
    }
}

//! The runtime's thread store: which OS threads run managed code, and what
//! each last threw

use {
    super::{gc::AllocContext, ObjectReader, RuntimeSchema},
    crate::{errors::RuntimeError, target::DataTarget},
    std::collections::HashSet,
};

const THREAD_STORE_GLOBAL: &str = "ThreadStore::s_pThreadStore";
const THREAD_STORE: &str = "ThreadStore";
const THREAD: &str = "Thread";
const ALLOC_CONTEXT: &str = "gc_alloc_context";
const EXCEPTION: &str = "ExceptionObject";
const STRING: &str = "StringObject";

const MAX_THREADS: usize = 1 << 16;
/// Exception messages longer than this are truncated
pub const MAX_MESSAGE_CHARS: u32 = 1024;

#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize)]
pub struct ManagedThread {
    /// The runtime's `Thread` object
    pub address: u64,
    pub managed_id: u32,
    /// Zero for threads that haven't started or already exited
    pub os_thread_id: u64,
    pub alloc_context: AllocContext,
    /// The object handle of the last thrown exception
    pub last_thrown_object: Option<u64>,
    pub exception_message: Option<String>,
}

/// Walks `m_ThreadList` of the thread store.
///
/// The list is a chain of `Thread::m_Link` entries hanging off a link in the
/// store. It ends at a null link or one pointing back at the head.
pub fn walk_threads<T: DataTarget>(
    target: &T,
    schema: &RuntimeSchema,
) -> Result<Vec<ManagedThread>, RuntimeError> {
    let r = ObjectReader::new(target, schema);
    let store = r.global_pointer(THREAD_STORE_GLOBAL)?;
    if store == 0 {
        return Ok(Vec::new());
    }

    let head = r.field_address(store, THREAD_STORE, "m_ThreadList")?;
    let link_offset = schema.field_offset(THREAD, "m_Link")?;

    let mut threads = Vec::new();
    let mut seen = HashSet::new();
    let mut link = r.deref("m_ThreadList", head)?;
    while link != 0 && link != head {
        if !seen.insert(link) || threads.len() >= MAX_THREADS {
            return Err(RuntimeError::Cycle(link));
        }
        let thread = link.wrapping_sub(link_offset);
        threads.push(read_thread(&r, thread)?);
        link = r.deref("Thread::m_Link", link)?;
    }

    log::debug!("{} managed threads", threads.len());
    Ok(threads)
}

fn read_thread<T: DataTarget>(
    r: &ObjectReader<'_, T>,
    thread: u64,
) -> Result<ManagedThread, RuntimeError> {
    let context = r.field_address(thread, THREAD, "m_alloc_context")?;
    let handle = r.pointer(thread, THREAD, "m_LastThrownObjectHandle")?;

    let (last_thrown_object, exception_message) = if handle == 0 {
        (None, None)
    } else {
        // The message is best effort, the exception may be half constructed
        let message = exception_message(r, handle).unwrap_or_else(|e| {
            log::debug!("no exception message for thread {thread:#x}: {e}");
            None
        });
        (Some(handle), message)
    };

    Ok(ManagedThread {
        address: thread,
        managed_id: r.u32(thread, THREAD, "m_ThreadId")?,
        os_thread_id: r.pointer(thread, THREAD, "m_OSThreadId")?,
        alloc_context: AllocContext {
            alloc_ptr: r.pointer(context, ALLOC_CONTEXT, "alloc_ptr")?,
            alloc_limit: r.pointer(context, ALLOC_CONTEXT, "alloc_limit")?,
        },
        last_thrown_object,
        exception_message,
    })
}

fn exception_message<T: DataTarget>(
    r: &ObjectReader<'_, T>,
    handle: u64,
) -> Result<Option<String>, RuntimeError> {
    let exception = r.deref("exception handle", handle)?;
    if exception == 0 {
        return Ok(None);
    }
    let string = r.pointer(exception, EXCEPTION, "_message")?;
    if string == 0 {
        return Ok(None);
    }

    let length_address = r.field_address(string, STRING, "m_StringLength")?;
    let length = r
        .target
        .read_u32(length_address)
        .map_err(|e| RuntimeError::unreadable("m_StringLength", length_address, e))?
        .min(MAX_MESSAGE_CHARS);

    // The characters follow the length
    let chars_address = length_address + 4;
    let mut bytes = vec![0u8; length as usize * 2];
    r.target
        .read_memory(chars_address, &mut bytes)
        .map_err(|e| RuntimeError::unreadable("string characters", chars_address, e))?;
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|c| u16::from_le_bytes([c[0], c[1]]))
        .collect();
    Ok(Some(String::from_utf16_lossy(&units)))
}

/// The managed thread running on OS thread `tid`
pub fn find_by_os_thread(threads: &[ManagedThread], tid: u64) -> Option<&ManagedThread> {
    threads.iter().find(|t| t.os_thread_id == tid)
}

#[cfg(test)]
pub(crate) mod test {
    use {
        super::*,
        crate::{
            runtime::schema::test::HeaderBuilder,
            target::{memory::MemoryTarget, Backing, Permissions},
        },
    };

    pub(crate) const THREAD_AREA: u64 = 0x0030_0000;
    const STORE_VAR: u64 = THREAD_AREA;
    const STORE: u64 = THREAD_AREA + 0x100;
    const THREADS: u64 = THREAD_AREA + 0x1000;
    const THREAD_SIZE: u64 = 0x200;
    const LINK: u64 = 0x40;
    const HANDLE: u64 = THREAD_AREA + 0x3000;
    const EXCEPTION_OBJECT: u64 = THREAD_AREA + 0x3100;
    const MESSAGE: u64 = THREAD_AREA + 0x3200;

    pub(crate) fn describe_threads(h: &mut HeaderBuilder) {
        h.global(THREAD_STORE_GLOBAL, STORE_VAR)
            .ty(THREAD_STORE, 0x80, &[("m_ThreadList", 0x10)])
            .ty(
                THREAD,
                THREAD_SIZE as u32,
                &[
                    ("m_ThreadId", 0x08),
                    ("m_Link", LINK as u32),
                    ("m_OSThreadId", 0x50),
                    ("m_LastThrownObjectHandle", 0x58),
                    ("m_alloc_context", 0x60),
                ],
            )
            .ty(EXCEPTION, 0x80, &[("_message", 0x10)])
            .ty(STRING, 0x10, &[("m_StringLength", 0x08)]);
    }

    /// Lays out a thread store with one managed thread per `(os tid,
    /// allocation context)`. The first thread's last exception carries the
    /// message `"boom"`.
    pub(crate) fn install_threads(t: &mut MemoryTarget, threads: &[(u64, (u64, u64))]) {
        t.add_region(
            THREAD_AREA,
            vec![0; 0x4000],
            Permissions::READ | Permissions::WRITE | Permissions::PRIVATE,
            Backing::Anonymous,
        );
        t.poke_u64(STORE_VAR, STORE);

        let head = STORE + 0x10;
        let mut previous = head;
        for (i, (os_tid, context)) in threads.iter().enumerate() {
            let thread = THREADS + i as u64 * THREAD_SIZE;
            t.poke_u64(previous, thread + LINK)
                .poke_u32(thread + 0x08, i as u32 + 1)
                .poke_u64(thread + 0x50, *os_tid)
                .poke_u64(thread + 0x60, context.0)
                .poke_u64(thread + 0x68, context.1);
            previous = thread + LINK;
        }
        // The last link points back at the head
        t.poke_u64(previous, head);

        if !threads.is_empty() {
            let message: Vec<u8> = "boom".encode_utf16().flat_map(u16::to_le_bytes).collect();
            t.poke_u64(THREADS + 0x58, HANDLE)
                .poke_u64(HANDLE, EXCEPTION_OBJECT)
                .poke_u64(EXCEPTION_OBJECT + 0x10, MESSAGE)
                .poke_u32(MESSAGE + 0x08, 4)
                .poke(MESSAGE + 0x0c, &message);
        }
    }

    fn schema(t: &mut MemoryTarget) -> RuntimeSchema {
        let mut h = HeaderBuilder::default();
        describe_threads(&mut h);
        h.ty(ALLOC_CONTEXT, 0x28, &[("alloc_ptr", 0), ("alloc_limit", 0x08)]);
        let address = h.install(t);
        RuntimeSchema::read(&*t, address).unwrap()
    }

    #[test]
    fn walks_thread_list() {
        let mut t = MemoryTarget::new(1);
        install_threads(&mut t, &[(100, (0x5000, 0x6000)), (102, (0, 0))]);
        let schema = schema(&mut t);

        let threads = walk_threads(&t, &schema).unwrap();
        assert_eq!(threads.len(), 2);
        assert_eq!(threads[0].managed_id, 1);
        assert_eq!(threads[0].os_thread_id, 100);
        assert_eq!(threads[0].alloc_context.alloc_limit, 0x6000);
        assert_eq!(threads[0].last_thrown_object, Some(HANDLE));
        assert_eq!(threads[0].exception_message.as_deref(), Some("boom"));
        assert_eq!(threads[1].managed_id, 2);
        assert!(threads[1].alloc_context.is_empty());
        assert_eq!(threads[1].last_thrown_object, None);

        assert_eq!(find_by_os_thread(&threads, 102).unwrap().managed_id, 2);
        assert!(find_by_os_thread(&threads, 7).is_none());
    }

    #[test]
    fn unreadable_message_keeps_thread() {
        let mut t = MemoryTarget::new(1);
        install_threads(&mut t, &[(100, (0, 0))]);
        t.poke_u64(EXCEPTION_OBJECT + 0x10, 0xdead_0000);
        let schema = schema(&mut t);

        let threads = walk_threads(&t, &schema).unwrap();
        assert_eq!(threads[0].last_thrown_object, Some(HANDLE));
        assert_eq!(threads[0].exception_message, None);
    }

    #[test]
    fn looping_list_is_an_error() {
        let mut t = MemoryTarget::new(1);
        install_threads(&mut t, &[(100, (0, 0)), (101, (0, 0))]);
        // second thread links back to the first
        t.poke_u64(THREADS + THREAD_SIZE + LINK, THREADS + LINK);
        let schema = schema(&mut t);

        assert!(matches!(
            walk_threads(&t, &schema),
            Err(RuntimeError::Cycle(_))
        ));
    }
}

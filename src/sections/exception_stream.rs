use super::*;

/// Describes the signal that led to the dump. Dumps requested without a
/// signal carry [`MD_EXCEPTION_CODE_LIN_DUMP_REQUESTED`] so readers can tell
/// them apart from crashes.
pub fn write(
    buffer: &mut DumpBuf,
    snapshot: &Snapshot,
    faulting_context: Option<MDLocationDescriptor>,
) -> Result<Option<MDRawDirectory>> {
    let Some(thread) = snapshot.faulting_thread() else {
        return Ok(None);
    };

    let signal = snapshot.exception.map(|e| e.signal);
    let exception = match signal {
        Some(signal) => MDException {
            exception_code: signal.signo as u32,
            exception_flags: signal.code as u32,
            exception_address: signal.address,
            ..Default::default()
        },
        None => MDException {
            exception_code: MD_EXCEPTION_CODE_LIN_DUMP_REQUESTED,
            ..Default::default()
        },
    };

    let stream = MDRawExceptionStream {
        thread_id: thread.tid as u32,
        exception_record: exception,
        __align: 0,
        thread_context: faulting_context.unwrap_or_default(),
    };
    let exc = MemoryWriter::alloc_with_val(buffer, stream)?;

    Ok(Some(MDRawDirectory {
        stream_type: MDStreamType::ExceptionStream as u32,
        location: exc.location(),
    }))
}

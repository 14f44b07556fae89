//! Raw copies of the per process information files, which minidump readers
//! know how to display

use super::*;

const PROC_STREAMS: &[(&str, u32)] = &[
    ("cmdline", MDStreamType::LinuxCmdLine as u32),
    ("environ", MDStreamType::LinuxEnviron as u32),
    ("maps", MDStreamType::LinuxMaps as u32),
    ("status", MDStreamType::LinuxProcStatus as u32),
];

/// Files describing the machine the dump is taken on, the first readable path
/// of each entry is used
const HOST_STREAMS: &[(&[&str], u32)] = &[
    (&["/proc/cpuinfo"], MDStreamType::LinuxCpuInfo as u32),
    (
        &["/etc/lsb-release", "/etc/os-release"],
        MDStreamType::LinuxLsbRelease as u32,
    ),
];

/// Writes every stream the target has data for. Missing files are skipped.
pub fn write<T: DataTarget>(
    buffer: &mut DumpBuf,
    snapshot: &Snapshot,
    target: &T,
) -> Result<Vec<MDRawDirectory>> {
    let mut dirents = Vec::with_capacity(PROC_STREAMS.len() + 1);

    let auxv = snapshot.auxv.clone().or_else(|| target.proc_file("auxv"));
    if let Some(auxv) = auxv {
        dirents.push(write_raw(buffer, MDStreamType::LinuxAuxv as u32, &auxv)?);
    }

    for (name, stream_type) in PROC_STREAMS {
        match target.proc_file(name) {
            Some(contents) => dirents.push(write_raw(buffer, *stream_type, &contents)?),
            None => log::debug!("no {name} for {}", snapshot.pid),
        }
    }

    for (paths, stream_type) in HOST_STREAMS {
        match paths.iter().find_map(|p| std::fs::read(p).ok()) {
            Some(contents) => dirents.push(write_raw(buffer, *stream_type, &contents)?),
            None => log::debug!("none of {paths:?} could be read"),
        }
    }

    Ok(dirents)
}

fn write_raw(
    buffer: &mut DumpBuf,
    stream_type: u32,
    contents: &[u8],
) -> Result<MDRawDirectory> {
    let section = MemoryArrayWriter::write_bytes(buffer, contents)?;
    Ok(MDRawDirectory {
        stream_type,
        location: section.location(),
    })
}

/// The number of streams [`write`] can produce at most
pub const MAX_STREAMS: u32 = (PROC_STREAMS.len() + HOST_STREAMS.len()) as u32 + 1;

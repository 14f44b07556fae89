//! Output paths and target lookup by name

use {
    crate::{errors::NamingError, Pid},
    std::{
        path::Path,
        time::{SystemTime, UNIX_EPOCH},
    },
};

/// Values substituted into the output template
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NameContext {
    pub pid: Pid,
    pub process_name: Option<String>,
    pub host_name: Option<String>,
    /// Seconds since the unix epoch
    pub time: u64,
}

impl NameContext {
    /// Captures the host name and the current time
    pub fn now(pid: Pid, process_name: Option<String>) -> Self {
        let time = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        Self {
            pid,
            process_name,
            host_name: host_name(),
            time,
        }
    }
}

fn host_name() -> Option<String> {
    let mut buf = [0u8; 256];
    // SAFETY: the buffer outlives the call and its length is passed along
    let res = unsafe { libc::gethostname(buf.as_mut_ptr().cast(), buf.len()) };
    if res != 0 {
        return None;
    }
    let len = buf.iter().position(|b| *b == 0).unwrap_or(buf.len());
    Some(String::from_utf8_lossy(&buf[..len]).into_owned())
}

/// Path separators in substituted values would create directories
fn sanitize(value: &str) -> String {
    value.replace('/', "_")
}

/// Expands `%p`/`%d` (pid), `%e` (process name), `%h` (host name), `%t`
/// (unix time) and `%%` in `template`
pub fn expand_template(template: &str, ctx: &NameContext) -> Result<String, NamingError> {
    let mut out = String::with_capacity(template.len() + 16);
    let mut chars = template.chars();
    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('p' | 'd') => out.push_str(&ctx.pid.to_string()),
            Some('e') => out.push_str(&sanitize(ctx.process_name.as_deref().unwrap_or("unknown"))),
            Some('h') => out.push_str(&sanitize(ctx.host_name.as_deref().unwrap_or("localhost"))),
            Some('t') => out.push_str(&ctx.time.to_string()),
            Some('%') => out.push('%'),
            Some(other) => return Err(NamingError::UnknownPlaceholder(other)),
            None => return Err(NamingError::TrailingPercent),
        }
    }
    Ok(out)
}

/// Finds the single running process whose `comm` is `name`
pub fn find_pid_by_name(name: &str) -> Result<Pid, NamingError> {
    find_pid_by_name_in(Path::new("/proc"), name)
}

fn find_pid_by_name_in(proc_root: &Path, name: &str) -> Result<Pid, NamingError> {
    // The kernel truncates comm to 15 bytes
    let wanted = name.get(..15).unwrap_or(name);
    let own_pid = std::process::id() as Pid;

    let mut pids = Vec::new();
    for entry in std::fs::read_dir(proc_root)? {
        let entry = entry?;
        let Some(pid) = entry
            .file_name()
            .to_str()
            .and_then(|s| s.parse::<Pid>().ok())
        else {
            continue;
        };
        if pid == own_pid {
            continue;
        }
        // Processes exit while we scan
        let Ok(comm) = std::fs::read_to_string(entry.path().join("comm")) else {
            continue;
        };
        if comm.trim_end_matches('\n') == wanted {
            pids.push(pid);
        }
    }
    pids.sort_unstable();

    match pids.as_slice() {
        [] => Err(NamingError::NoProcessNamed(name.to_owned())),
        [pid] => {
            log::debug!("{name} is process {pid}");
            Ok(*pid)
        }
        _ => Err(NamingError::AmbiguousName {
            name: name.to_owned(),
            pids,
        }),
    }
}

//! The machine the dumper runs on, which is also the one the target runs on

use std::ffi::CStr;

#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize)]
pub struct OsInfo {
    pub sysname: String,
    pub release: String,
    pub version: String,
    pub machine: String,
}

impl OsInfo {
    /// `major.minor.patch` of the kernel release, missing parts are 0
    pub fn version_triple(&self) -> (u32, u32, u32) {
        let mut parts = self
            .release
            .split(|c: char| !c.is_ascii_digit())
            .map(|p| p.parse::<u32>().unwrap_or(0));
        (
            parts.next().unwrap_or(0),
            parts.next().unwrap_or(0),
            parts.next().unwrap_or(0),
        )
    }

    /// `uname -a` style, used as the minidump's CSD version string
    pub fn describe(&self) -> String {
        format!(
            "{} {} {} {}",
            self.sysname, self.release, self.version, self.machine
        )
    }
}

pub fn os_information() -> OsInfo {
    // SAFETY: utsname is plain old data
    let mut info: libc::utsname = unsafe { std::mem::zeroed() };
    // SAFETY: the struct outlives the call
    if unsafe { libc::uname(&mut info) } != 0 {
        log::debug!("uname failed: {}", std::io::Error::last_os_error());
        return OsInfo::default();
    }
    let field = |f: &[libc::c_char]| {
        // SAFETY: uname nul terminates every field
        unsafe { CStr::from_ptr(f.as_ptr()) }
            .to_string_lossy()
            .into_owned()
    };
    OsInfo {
        sysname: field(&info.sysname),
        release: field(&info.release),
        version: field(&info.version),
        machine: field(&info.machine),
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CpuInfo {
    pub processors: u32,
    pub vendor_id: Option<String>,
    pub family: Option<u32>,
    pub model: Option<u32>,
    pub stepping: Option<u32>,
}

/// Parses `/proc/cpuinfo`. Only the first processor's identification is
/// kept, the processor count comes from the highest `processor` entry.
pub fn parse_cpuinfo(text: &str) -> CpuInfo {
    let mut info = CpuInfo::default();
    let mut highest = None;

    for line in text.lines() {
        // <field-name> <space>+ ':' <space> <value>, names may contain spaces
        // and values may be empty
        let Some((field, value)) = line.split_once(':') else {
            continue;
        };
        let (field, value) = (field.trim(), value.trim());
        if value.is_empty() {
            continue;
        }

        let entry = match field {
            "processor" => {
                if let Ok(n) = value.parse::<u32>() {
                    highest = highest.max(Some(n));
                }
                continue;
            }
            "vendor_id" => {
                if info.vendor_id.is_none() {
                    info.vendor_id = Some(value.to_owned());
                }
                continue;
            }
            "cpu family" => &mut info.family,
            "model" => &mut info.model,
            "stepping" => &mut info.stepping,
            _ => continue,
        };
        if entry.is_none() {
            *entry = value.parse().ok();
        }
    }

    info.processors = match highest {
        Some(n) => n + 1,
        None => std::thread::available_parallelism().map_or(1, |n| n.get() as u32),
    };
    info
}

pub fn cpu_information() -> CpuInfo {
    match std::fs::read_to_string("/proc/cpuinfo") {
        Ok(text) => parse_cpuinfo(&text),
        Err(e) => {
            log::debug!("unable to read /proc/cpuinfo: {e}");
            parse_cpuinfo("")
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn cpuinfo() {
        let text = "processor\t: 0\nvendor_id\t: GenuineIntel\ncpu family\t: 6\nmodel\t\t: 158\n\
                    model name\t: Intel(R) Core(TM)\nstepping\t: 10\nflags\t\t:\n\n\
                    processor\t: 1\nvendor_id\t: GenuineIntel\ncpu family\t: 7\n";
        let info = parse_cpuinfo(text);
        assert_eq!(info.processors, 2);
        assert_eq!(info.vendor_id.as_deref(), Some("GenuineIntel"));
        assert_eq!(info.family, Some(6));
        assert_eq!(info.model, Some(158));
        assert_eq!(info.stepping, Some(10));
    }

    #[test]
    fn kernel_version() {
        let os = OsInfo {
            release: "6.8.0-45-generic".into(),
            ..Default::default()
        };
        assert_eq!(os.version_triple(), (6, 8, 0));
        let os = OsInfo {
            release: "5.15".into(),
            ..Default::default()
        };
        assert_eq!(os.version_triple(), (5, 15, 0));
    }
}

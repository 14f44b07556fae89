//! What to dump and how

use {
    crate::{
        errors::ConfigError,
        runtime::DEFAULT_RUNTIME_MODULE,
        target::{SignalInfo, ThreadId},
        writer::DumpFormat,
    },
    std::{
        fmt,
        str::FromStr,
        sync::{
            atomic::{AtomicBool, Ordering},
            Arc,
        },
    },
};

pub const DEFAULT_OUTPUT_TEMPLATE: &str = "/tmp/coredump.%p";

/// How much memory goes into the dump. Each level includes everything the
/// levels below it include.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize)]
pub enum DumpType {
    /// Module headers, runtime metadata and the faulting thread's stack
    Triage,
    /// Every thread stack and the GC bookkeeping
    #[default]
    Normal,
    /// The managed heap's live objects
    WithHeap,
    /// Every readable private mapping and whole module images
    Full,
}

impl DumpType {
    pub const ALL: [DumpType; 4] = [Self::Triage, Self::Normal, Self::WithHeap, Self::Full];

    pub fn name(self) -> &'static str {
        match self {
            Self::Triage => "triage",
            Self::Normal => "normal",
            Self::WithHeap => "withheap",
            Self::Full => "full",
        }
    }
}

impl fmt::Display for DumpType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DumpType {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "triage" => Ok(Self::Triage),
            "normal" | "mini" => Ok(Self::Normal),
            "withheap" | "heap" => Ok(Self::WithHeap),
            "full" => Ok(Self::Full),
            _ => Err(ConfigError::UnknownDumpType(s.to_owned())),
        }
    }
}

/// A memory range given on the command line as `ADDRESS:LENGTH`, both in hex
/// with an optional `0x` prefix
pub fn parse_range(s: &str) -> Result<(u64, u64), ConfigError> {
    let bad = || ConfigError::BadRange(s.to_owned());
    let (address, length) = s.split_once(':').ok_or_else(bad)?;
    let hex = |v: &str| {
        let v = v.trim();
        let v = v
            .strip_prefix("0x")
            .or_else(|| v.strip_prefix("0X"))
            .unwrap_or(v);
        u64::from_str_radix(v, 16).map_err(|_| bad())
    };
    let (address, length) = (hex(address)?, hex(length)?);
    if length == 0 || address.checked_add(length).is_none() {
        return Err(bad());
    }
    Ok((address, length))
}

/// Options shared by collection and writing
#[derive(Clone, Debug)]
pub struct DumpOptions {
    pub dump_type: DumpType,
    pub format: DumpFormat,
    pub output_template: String,
    /// `(address, length)` ranges included at every level
    pub always_include: Vec<(u64, u64)>,
    /// File name of the runtime module
    pub runtime_module: String,
    /// A thread to blame when the target doesn't report a crashing thread
    pub blamed_thread: Option<ThreadId>,
    /// Signal details supplied by the caller rather than the target
    pub signal: Option<SignalInfo>,
    pub crash_report: bool,
    interrupted: Option<Arc<AtomicBool>>,
}

impl Default for DumpOptions {
    fn default() -> Self {
        Self {
            dump_type: DumpType::default(),
            format: DumpFormat::default(),
            output_template: DEFAULT_OUTPUT_TEMPLATE.to_owned(),
            always_include: Vec::new(),
            runtime_module: DEFAULT_RUNTIME_MODULE.to_owned(),
            blamed_thread: None,
            signal: None,
            crash_report: false,
            interrupted: None,
        }
    }
}

impl DumpOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_dump_type(&mut self, dump_type: DumpType) -> &mut Self {
        self.dump_type = dump_type;
        self
    }

    pub fn set_format(&mut self, format: DumpFormat) -> &mut Self {
        self.format = format;
        self
    }

    pub fn set_output_template(&mut self, template: impl Into<String>) -> &mut Self {
        self.output_template = template.into();
        self
    }

    pub fn always_include(&mut self, address: u64, length: u64) -> &mut Self {
        self.always_include.push((address, length));
        self
    }

    pub fn set_runtime_module(&mut self, file_name: impl Into<String>) -> &mut Self {
        self.runtime_module = file_name.into();
        self
    }

    pub fn set_blamed_thread(&mut self, tid: ThreadId) -> &mut Self {
        self.blamed_thread = Some(tid);
        self
    }

    pub fn set_signal(&mut self, signal: SignalInfo) -> &mut Self {
        self.signal = Some(signal);
        self
    }

    pub fn set_crash_report(&mut self, enabled: bool) -> &mut Self {
        self.crash_report = enabled;
        self
    }

    /// Collection stops between phases once `flag` is set
    pub fn set_interrupt_flag(&mut self, flag: Arc<AtomicBool>) -> &mut Self {
        self.interrupted = Some(flag);
        self
    }

    pub fn is_interrupted(&self) -> bool {
        self.interrupted
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::Relaxed))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn dump_types_are_ordered() {
        assert!(DumpType::Triage < DumpType::Normal);
        assert!(DumpType::Normal < DumpType::WithHeap);
        assert!(DumpType::WithHeap < DumpType::Full);
        for ty in DumpType::ALL {
            assert_eq!(ty.name().parse::<DumpType>().unwrap(), ty);
        }
        assert_eq!("mini".parse::<DumpType>().unwrap(), DumpType::Normal);
        assert_eq!("Full".parse::<DumpType>().unwrap(), DumpType::Full);
        assert!("everything".parse::<DumpType>().is_err());
    }

    #[test]
    fn ranges() {
        assert_eq!(parse_range("0x1000:0x20").unwrap(), (0x1000, 0x20));
        assert_eq!(parse_range("7f00:1000").unwrap(), (0x7f00, 0x1000));
        assert!(parse_range("0x1000").is_err());
        assert!(parse_range("0x1000:0").is_err());
        assert!(parse_range("zz:10").is_err());
        assert!(parse_range("ffffffffffffffff:2").is_err());
    }

    #[test]
    fn interrupt_flag() {
        let flag = Arc::new(AtomicBool::new(false));
        let mut options = DumpOptions::new();
        options
            .set_dump_type(DumpType::Full)
            .always_include(0x1000, 0x10)
            .set_interrupt_flag(flag.clone());
        assert!(!options.is_interrupted());
        flag.store(true, Ordering::Relaxed);
        assert!(options.is_interrupted());
        assert_eq!(options.always_include, vec![(0x1000, 0x10)]);
        assert_eq!(options.runtime_module, DEFAULT_RUNTIME_MODULE);
    }
}

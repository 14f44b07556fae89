/// Process exit codes of the dumper
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize)]
#[repr(u8)]
pub enum ExitStatus {
    Success = 0,
    /// Attaching, collecting or writing failed, no dump was produced
    Failure = 1,
    /// A dump was written but the managed state in it is incomplete
    Partial = 2,
    Usage = 3,
}

impl ExitStatus {
    pub fn code(self) -> u8 {
        self as u8
    }
}

impl From<ExitStatus> for std::process::ExitCode {
    fn from(status: ExitStatus) -> Self {
        Self::from(status.code())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn codes() {
        assert_eq!(ExitStatus::Success.code(), 0);
        assert_eq!(ExitStatus::Failure.code(), 1);
        assert_eq!(ExitStatus::Partial.code(), 2);
        assert_eq!(ExitStatus::Usage.code(), 3);
    }
}

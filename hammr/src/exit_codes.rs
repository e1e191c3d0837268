#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    Success = 0,

    /// The plan ran to completion but one or more samples failed.
    SamplesFailed = 10,

    /// Invalid CLI flags, unreadable plan file, or an invalid thread group configuration.
    InvalidInput = 30,

    /// Internal/runtime error (IO errors, a thread task that panicked).
    RuntimeError = 40,
}

impl ExitCode {
    #[must_use]
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    #[must_use]
    pub fn from_failed_samples(failed: u64) -> Self {
        if failed > 0 {
            Self::SamplesFailed
        } else {
            Self::Success
        }
    }
}

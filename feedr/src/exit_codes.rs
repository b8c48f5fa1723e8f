#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    Success = 0,

    /// One or more iterations failed.
    IterationsFailed = 10,

    /// A virtual user ran out of data (a source reported exhaustion to a consumer).
    DataExhausted = 11,

    /// Invalid CLI/plan input (bad flags, unreadable plan, invalid declarations or templates).
    InvalidInput = 30,

    /// Internal/runtime error (IO errors, lost workers, panicked tasks).
    RuntimeError = 40,
}

impl ExitCode {
    #[must_use]
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    /// Exhaustion wins over plain failures: it usually means the data set is undersized.
    #[must_use]
    pub fn from_outcome(iterations_failed: u64, exhausted: u64) -> Self {
        match (iterations_failed, exhausted) {
            (_, e) if e > 0 => Self::DataExhausted,
            (0, _) => Self::Success,
            _ => Self::IterationsFailed,
        }
    }
}

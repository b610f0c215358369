//! Admission policy selector.

use core::fmt;
use core::str::FromStr;

/// The concurrency discipline an [`RwSync`](super::RwSync) enforces.
///
/// Selected once at construction and never changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mode {
    /// No mutual exclusion at all. Exists to reproduce torn reads and lost
    /// updates; provides no correctness guarantee.
    Unsynchronized,
    /// The first reader locks the resource for the whole group. A steady
    /// stream of readers can starve writers.
    ReaderPreference,
    /// A writer that announced intent closes the read-admission gate. A
    /// steady stream of writers can starve readers.
    WriterPreference,
    /// Every caller passes a single turnstile before contending for the
    /// resource. Approximates arrival order; not strict FIFO.
    Fair,
}

impl Mode {
    /// All four modes, in declaration order.
    pub const ALL: [Mode; 4] = [
        Mode::Unsynchronized,
        Mode::ReaderPreference,
        Mode::WriterPreference,
        Mode::Fair,
    ];

    /// Returns the stable display name of the mode.
    ///
    /// These are also the names accepted by [`Mode::from_str`].
    pub const fn name(self) -> &'static str {
        match self {
            Self::Unsynchronized => "vanilla",
            Self::ReaderPreference => "reader_pref",
            Self::WriterPreference => "writer_pref",
            Self::Fair => "fair",
        }
    }

    /// Returns `true` for every mode except [`Mode::Unsynchronized`].
    pub const fn is_synchronized(self) -> bool {
        !matches!(self, Self::Unsynchronized)
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Mode {
    type Err = UnknownMode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Mode::ALL
            .into_iter()
            .find(|mode| mode.name() == s)
            .ok_or_else(|| UnknownMode(s.to_owned()))
    }
}

/// Error returned when parsing a name that is not one of [`Mode::ALL`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownMode(pub String);

impl fmt::Display for UnknownMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "unknown mode `{}` (expected one of: vanilla, reader_pref, writer_pref, fair)",
            self.0
        )
    }
}

impl std::error::Error for UnknownMode {}

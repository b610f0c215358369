//! Task identity.
//!
//! Every reader or writer thread receives a [`Task`] at spawn time. The
//! record is `Copy`, so there is no ownership hand-off between the spawner
//! and the thread.

use core::fmt;

/// Which side of the protocol a task plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Shared access.
    Reader,
    /// Exclusive access.
    Writer,
}

impl Role {
    /// Returns the single-letter tag used in trace lines.
    pub const fn tag(self) -> char {
        match self {
            Self::Reader => 'R',
            Self::Writer => 'W',
        }
    }

    /// Parses a trace tag back into a role.
    pub const fn from_tag(tag: char) -> Option<Self> {
        match tag {
            'R' => Some(Self::Reader),
            'W' => Some(Self::Writer),
            _ => None,
        }
    }
}

/// Per-task parameters passed at spawn time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Task {
    /// Reader or writer.
    pub role: Role,
    /// 1-based index among tasks of the same role.
    pub id: usize,
}

impl Task {
    /// Creates a reader task record.
    pub const fn reader(id: usize) -> Self {
        Self {
            role: Role::Reader,
            id,
        }
    }

    /// Creates a writer task record.
    pub const fn writer(id: usize) -> Self {
        Self {
            role: Role::Writer,
            id,
        }
    }

    /// Returns a PRNG salt unique to this task.
    pub fn salt(self) -> u64 {
        let side = match self.role {
            Role::Reader => 0,
            Role::Writer => 1 << 32,
        };
        side | self.id as u64
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.role.tag(), self.id)
    }
}

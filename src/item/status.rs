use std::fmt;
use std::ops::{BitOr, BitOrAssign};

/// Article status bit flags.
///
/// Flags combine freely (`Status::UNREAD | Status::IMPORTANT`), and the
/// combined value is what gets persisted, so the numeric encoding is part
/// of the archive contract. A freshly constructed `Status` is `READ`.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Status(u32);

impl Status {
    /// Article arrived in the most recent fetch.
    pub const NEW: Status = Status(0x1);
    /// Article has not been opened yet.
    pub const UNREAD: Status = Status(0x2);
    /// Article has been read.
    pub const READ: Status = Status(0x4);
    /// Article was flagged by the user.
    pub const IMPORTANT: Status = Status(0x8);

    /// Builds a status from a raw persisted value.
    ///
    /// Unknown bits are preserved rather than rejected so newer writers
    /// remain readable by older code.
    pub const fn from_bits(bits: u32) -> Status {
        Status(bits)
    }

    /// Returns the raw flag bits for persistence.
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Returns true if every flag in `other` is set in `self`.
    pub const fn contains(self, other: Status) -> bool {
        self.0 & other.0 == other.0
    }

    /// Sets the given flags.
    pub fn insert(&mut self, other: Status) {
        self.0 |= other.0;
    }

    /// Clears the given flags.
    pub fn remove(&mut self, other: Status) {
        self.0 &= !other.0;
    }
}

impl Default for Status {
    fn default() -> Status {
        Status::READ
    }
}

impl BitOr for Status {
    type Output = Status;

    fn bitor(self, rhs: Status) -> Status {
        Status(self.0 | rhs.0)
    }
}

impl BitOrAssign for Status {
    fn bitor_assign(&mut self, rhs: Status) {
        self.0 |= rhs.0;
    }
}

impl fmt::Debug for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&str> = Vec::new();
        if self.contains(Status::NEW) {
            names.push("NEW");
        }
        if self.contains(Status::UNREAD) {
            names.push("UNREAD");
        }
        if self.contains(Status::READ) {
            names.push("READ");
        }
        if self.contains(Status::IMPORTANT) {
            names.push("IMPORTANT");
        }
        if names.is_empty() {
            write!(f, "Status(0x{:x})", self.0)
        } else {
            write!(f, "Status({})", names.join("|"))
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

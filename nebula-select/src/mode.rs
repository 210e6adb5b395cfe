use std::fmt;
use std::ops::{BitOr, BitOrAssign};

/// Interest mode of a watched descriptor.
///
/// A `Mode` is a small set of readiness kinds a listener wants to hear about.
/// `Mode::NONE` is a valid registration: the descriptor stays tracked (and
/// still reports errors) but no readiness callbacks are delivered.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Mode {
    read: bool,
    write: bool,
}

impl Mode {
    /// No readiness interest.
    pub const NONE: Self = Self {
        read: false,
        write: false,
    };

    /// Interested in read readiness (including EOF and hangup).
    pub const READ: Self = Self {
        read: true,
        write: false,
    };

    /// Interested in write readiness (including connect completion).
    pub const WRITE: Self = Self {
        read: false,
        write: true,
    };

    /// Interested in both read and write readiness.
    pub const READ_WRITE: Self = Self {
        read: true,
        write: true,
    };

    /// Returns `true` if read readiness is requested.
    pub const fn is_read(self) -> bool {
        self.read
    }

    /// Returns `true` if write readiness is requested.
    pub const fn is_write(self) -> bool {
        self.write
    }

    /// Returns `true` if no readiness is requested.
    pub const fn is_none(self) -> bool {
        !self.read && !self.write
    }

    /// Returns this mode with the kinds in `other` added.
    pub const fn with(self, other: Self) -> Self {
        Self {
            read: self.read || other.read,
            write: self.write || other.write,
        }
    }

    /// Returns this mode with the kinds in `other` removed.
    pub const fn without(self, other: Self) -> Self {
        Self {
            read: self.read && !other.read,
            write: self.write && !other.write,
        }
    }
}

impl BitOr for Mode {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        self.with(rhs)
    }
}

impl BitOrAssign for Mode {
    fn bitor_assign(&mut self, rhs: Self) {
        *self = self.with(rhs);
    }
}

impl fmt::Debug for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match (self.read, self.write) {
            (false, false) => "NONE",
            (true, false) => "READ",
            (false, true) => "WRITE",
            (true, true) => "READ_WRITE",
        };

        f.write_str(name)
    }
}

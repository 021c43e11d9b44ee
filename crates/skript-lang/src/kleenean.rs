//! Three-valued logic.

use std::fmt;

/// A boolean that may also be unknown.
///
/// Used to track whether a delay may have happened before a line, which is
/// only known for certain outside of conditionals and loops.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kleenean {
    False,
    Unknown,
    True,
}

impl Kleenean {
    pub const fn from_bool(b: bool) -> Self {
        if b { Self::True } else { Self::False }
    }

    pub const fn is_true(self) -> bool {
        matches!(self, Self::True)
    }

    pub const fn is_false(self) -> bool {
        matches!(self, Self::False)
    }

    pub const fn is_unknown(self) -> bool {
        matches!(self, Self::Unknown)
    }

    #[must_use]
    pub const fn and(self, other: Self) -> Self {
        match (self, other) {
            (Self::False, _) | (_, Self::False) => Self::False,
            (Self::True, Self::True) => Self::True,
            _ => Self::Unknown,
        }
    }

    #[must_use]
    pub const fn or(self, other: Self) -> Self {
        match (self, other) {
            (Self::True, _) | (_, Self::True) => Self::True,
            (Self::False, Self::False) => Self::False,
            _ => Self::Unknown,
        }
    }

    #[must_use]
    pub const fn not(self) -> Self {
        match self {
            Self::True => Self::False,
            Self::False => Self::True,
            Self::Unknown => Self::Unknown,
        }
    }
}

impl From<bool> for Kleenean {
    fn from(b: bool) -> Self {
        Self::from_bool(b)
    }
}

impl fmt::Display for Kleenean {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::True => write!(f, "true"),
            Self::False => write!(f, "false"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truth_tables() {
        assert_eq!(Kleenean::True.and(Kleenean::Unknown), Kleenean::Unknown);
        assert_eq!(Kleenean::False.and(Kleenean::Unknown), Kleenean::False);
        assert_eq!(Kleenean::True.or(Kleenean::Unknown), Kleenean::True);
        assert_eq!(Kleenean::False.or(Kleenean::Unknown), Kleenean::Unknown);
        assert_eq!(Kleenean::Unknown.not(), Kleenean::Unknown);
        assert_eq!(Kleenean::True.not(), Kleenean::False);
    }
}

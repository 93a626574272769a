//! Typed indices into the arenas of a [`Function`](crate::ir::Function).

use std::fmt;

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(usize);

        impl $name {
            /// Creates an identifier from a raw arena index.
            #[must_use]
            pub const fn new(index: usize) -> Self {
                Self(index)
            }

            /// Returns the underlying arena index.
            #[must_use]
            pub const fn index(self) -> usize {
                self.0
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "{}"), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "{}"), self.0)
            }
        }
    };
}

define_id!(
    /// Identifies one operation in the op arena.
    ///
    /// Ids stay stable across mutation: erasing an op leaves a tombstone so
    /// snapshots taken before a rewrite can still name it.
    OpId,
    "op"
);

define_id!(
    /// Identifies one SSA value (an op result or a loop induction variable).
    ValueId,
    "%"
);

define_id!(
    /// Identifies one region (an ordered list of ops).
    RegionId,
    "r"
);

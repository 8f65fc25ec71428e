use std::fmt;

use serde::{Deserialize, Serialize};

/// Garbage-collection epoch.
///
/// Generations are handed out by a durable counter in the backing repository
/// and never regress. A blob records the generation that was current when it
/// was committed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Generation(pub u64);

impl Generation {
    /// The first generation.
    pub const ZERO: Self = Self(0);

    pub fn value(self) -> u64 {
        self.0
    }

    /// The generation after this one.
    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl From<u64> for Generation {
    fn from(v: u64) -> Self {
        Self(v)
    }
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "gen#{}", self.0)
    }
}

//! Cache/storage tiers, consulted in fixed order.

use std::fmt;

use serde::{Deserialize, Serialize};

/// One of the four cache/storage layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Tier {
    /// In-process LRU
    L1,
    /// Networked shared cache
    L2,
    /// Persistent store
    L3,
    /// Materialized views
    L4,
}

impl Tier {
    /// Lookup order of the resolve chain.
    pub const ALL: [Tier; 4] = [Tier::L1, Tier::L2, Tier::L3, Tier::L4];

    /// Tiers that involve I/O and can fail.
    pub const REMOTE: [Tier; 3] = [Tier::L2, Tier::L3, Tier::L4];

    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::L1 => "L1",
            Tier::L2 => "L2",
            Tier::L3 => "L3",
            Tier::L4 => "L4",
        }
    }

    /// Zero-based position in the lookup chain.
    pub fn index(&self) -> usize {
        *self as usize
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

//! The durable replication position (spec.md §3 "Checkpoint", §6 "Checkpoint
//! file format").

use redo_common::Scn;
use serde::{Deserialize, Serialize};

/// `{database, scn, idx, resetlogs, activation}`, disambiguated by `idx`
/// when multiple commits land on the same SCN. Ordering is lexicographic on
/// `(scn, idx)` — the quantity that must never move backwards (spec.md §8,
/// property 1).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub database: String,
    pub scn: Scn,
    pub idx: u64,
    pub resetlogs: u32,
    pub activation: u32,
}

impl Checkpoint {
    pub fn new(database: impl Into<String>, scn: Scn, idx: u64, resetlogs: u32, activation: u32) -> Self {
        Checkpoint { database: database.into(), scn, idx, resetlogs, activation }
    }

    /// `(scn, idx)` as the comparable key the monotonicity invariant is
    /// stated over.
    pub fn position(&self) -> (Scn, u64) {
        (self.scn, self.idx)
    }

    /// Whether advancing from `self` to `next` respects the non-decreasing
    /// invariant (spec.md §3 "Checkpoint" invariant, §8 property 1).
    pub fn advances_to(&self, next: &Checkpoint) -> bool {
        next.position() >= self.position()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advances_to_rejects_regression() {
        let a = Checkpoint::new("orcl", Scn::new(100), 3, 1, 1);
        let b = Checkpoint::new("orcl", Scn::new(100), 2, 1, 1);
        assert!(!a.advances_to(&b));
        assert!(a.advances_to(&Checkpoint::new("orcl", Scn::new(100), 4, 1, 1)));
        assert!(a.advances_to(&Checkpoint::new("orcl", Scn::new(101), 0, 1, 1)));
    }
}

//! Tracks messages shipped downstream but not yet acknowledged (spec.md
//! §4.6 "Acknowledgment protocol", §5 ordering guarantee 4: "the Writer only
//! advances when the head of the sent queue is acked and carries the lowest
//! un-acked `(scn,idx)`").

use std::collections::VecDeque;

use redo_common::Scn;

struct SentEntry {
    ring_end_offset: u64,
    lwn_scn: Scn,
    lwn_idx: u64,
}

#[derive(Default)]
pub struct SentQueue {
    entries: VecDeque<SentEntry>,
}

impl SentQueue {
    pub fn new() -> Self {
        SentQueue::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Records one message as sent, at `ring_end_offset` in the Builder's
    /// output ring and stamped with the LWN watermark it was flushed under.
    pub fn push(&mut self, ring_end_offset: u64, lwn_scn: Scn, lwn_idx: u64) {
        self.entries.push_back(SentEntry { ring_end_offset, lwn_scn, lwn_idx });
    }

    /// A `CONFIRM {scn, idx}` names a watermark, not one message: every
    /// entry at or below it is acknowledged. The Writer only ever advances
    /// through the contiguous prefix at the head, so this drains entries
    /// front-to-back while they fall at or under `(scn, idx)` and stops at
    /// the first that doesn't (spec.md §4.6, §5 ordering guarantee 4).
    ///
    /// Returns the highest `(ring_end_offset, lwn_scn, lwn_idx)` now safe to
    /// release, if the drain freed anything.
    pub fn confirm(&mut self, scn: Scn, idx: u64) -> Option<(u64, Scn, u64)> {
        let mut freed = None;
        while matches!(self.entries.front(), Some(e) if (e.lwn_scn, e.lwn_idx) <= (scn, idx)) {
            let entry = self.entries.pop_front().expect("checked by matches! above");
            freed = Some((entry.ring_end_offset, entry.lwn_scn, entry.lwn_idx));
        }
        freed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn confirm_drains_contiguous_prefix_at_or_under_watermark() {
        let mut q = SentQueue::new();
        q.push(100, Scn::new(10), 0);
        q.push(200, Scn::new(20), 0);
        q.push(300, Scn::new(30), 0);

        let freed = q.confirm(Scn::new(20), 0);
        assert_eq!(freed, Some((200, Scn::new(20), 0)));
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn confirm_below_every_entry_frees_nothing() {
        let mut q = SentQueue::new();
        q.push(100, Scn::new(10), 0);
        assert_eq!(q.confirm(Scn::new(5), 0), None);
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn confirm_with_nothing_pending_is_a_no_op() {
        let mut q = SentQueue::new();
        assert_eq!(q.confirm(Scn::new(1), 0), None);
    }
}

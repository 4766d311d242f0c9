//! The Metadata lifecycle state machine (spec.md §4.8) and the
//! `checkpoint_mtx`-guarded durable position it wraps around a
//! [`crate::store::StateStore`] (spec.md §5, shared-resource policy).

use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use redo_common::Scn;
use tracing::warn;

use crate::checkpoint::Checkpoint;
use crate::store::{StateError, StateStore};

const CHECKPOINT_NAME: &str = "checkpoint";

/// `{READY → START → REPLICATE → FINISHED}` (spec.md §4.8 "Lifecycle").
/// Ordered so `Phase::advance` can assert transitions never run backwards.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Phase {
    Ready,
    Start,
    Replicate,
    Finished,
}

struct Inner {
    phase: Phase,
    last: Option<Checkpoint>,
    writer_ready: bool,
}

/// Owns the durable replication position. The Replicator advances
/// `(resetlogs, activation, sequence)` off of `last()`; the Writer persists
/// new checkpoints through [`Metadata::persist`] as client `CONFIRM`s land.
pub struct Metadata {
    database: String,
    store: Arc<dyn StateStore>,
    inner: Mutex<Inner>,
    writer_ready_cv: Condvar,
}

impl Metadata {
    /// Loads any prior checkpoint for `database` from `store` and starts the
    /// lifecycle at `Ready`.
    pub fn load(database: impl Into<String>, store: Arc<dyn StateStore>) -> Result<Self, StateError> {
        let database = database.into();
        let last = match store.state_read(CHECKPOINT_NAME)? {
            Some(bytes) => serde_json::from_slice::<Checkpoint>(&bytes).ok().filter(|c| c.database == database),
            None => None,
        };
        Ok(Metadata {
            database,
            store,
            inner: Mutex::new(Inner { phase: Phase::Ready, last, writer_ready: false }),
            writer_ready_cv: Condvar::new(),
        })
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    pub fn phase(&self) -> Phase {
        self.inner.lock().phase
    }

    /// Moves the lifecycle forward. Never goes backwards; a caller asking to
    /// move to an earlier or equal phase is a no-op (idempotent re-entry into
    /// the same phase is expected, e.g. the Replicator re-checking `Start`).
    pub fn advance(&self, phase: Phase) {
        let mut guard = self.inner.lock();
        if phase > guard.phase {
            guard.phase = phase;
        }
    }

    /// The last checkpoint the system knows about — either loaded at
    /// startup or the most recent successful [`Metadata::persist`]. `None`
    /// means no prior state: the lifecycle should sit in `Ready` and expect
    /// a client `START` rather than `CONTINUE` (spec.md §6).
    pub fn last(&self) -> Option<Checkpoint> {
        self.inner.lock().last.clone()
    }

    /// Persists `checkpoint`, enforcing the non-decreasing `(scn, idx)`
    /// invariant (spec.md §3, §8 property 1). Silently no-ops (does not
    /// error) if `checkpoint` does not advance past the last persisted one,
    /// since the Writer may re-derive the same watermark from a resend.
    pub fn persist(&self, checkpoint: Checkpoint) -> Result<(), StateError> {
        let mut guard = self.inner.lock();
        if let Some(last) = &guard.last {
            if !last.advances_to(&checkpoint) {
                warn!(
                    last_scn = %last.scn, last_idx = last.idx,
                    next_scn = %checkpoint.scn, next_idx = checkpoint.idx,
                    "refusing to persist a checkpoint that moves backwards"
                );
                return Ok(());
            }
        }
        let payload = serde_json::to_vec(&checkpoint).expect("Checkpoint always serializes");
        self.store.state_write(CHECKPOINT_NAME, checkpoint.scn, &payload)?;
        guard.last = Some(checkpoint);
        Ok(())
    }

    /// Signals that the Writer has finished startup (and, if it had a prior
    /// checkpoint, has already overridden any config-level start position).
    /// Wakes every [`Metadata::wait_for_writer`] caller.
    pub fn mark_writer_ready(&self) {
        let mut guard = self.inner.lock();
        guard.writer_ready = true;
        self.writer_ready_cv.notify_all();
    }

    /// Blocks the Replicator until the Writer has finished startup (spec.md
    /// §4.8 "Lifecycle"). Returns `false` on timeout without the writer
    /// having signaled, so callers can re-check a shutdown flag.
    pub fn wait_for_writer(&self, timeout: Duration) -> bool {
        let mut guard = self.inner.lock();
        if guard.writer_ready {
            return true;
        }
        self.writer_ready_cv.wait_for(&mut guard, timeout);
        guard.writer_ready
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStateStore;

    fn metadata() -> Metadata {
        Metadata::load("orcl", Arc::new(InMemoryStateStore::new())).unwrap()
    }

    #[test]
    fn starts_ready_with_no_prior_checkpoint() {
        let md = metadata();
        assert_eq!(md.phase(), Phase::Ready);
        assert!(md.last().is_none());
    }

    #[test]
    fn persist_then_reload_resumes_position() {
        let store: Arc<dyn StateStore> = Arc::new(InMemoryStateStore::new());
        let md = Metadata::load("orcl", Arc::clone(&store)).unwrap();
        md.persist(Checkpoint::new("orcl", Scn::new(100), 0, 1, 1)).unwrap();

        let resumed = Metadata::load("orcl", store).unwrap();
        assert_eq!(resumed.last().unwrap().scn, Scn::new(100));
    }

    #[test]
    fn persist_rejects_regression_silently() {
        let md = metadata();
        md.persist(Checkpoint::new("orcl", Scn::new(100), 5, 1, 1)).unwrap();
        md.persist(Checkpoint::new("orcl", Scn::new(100), 2, 1, 1)).unwrap();
        assert_eq!(md.last().unwrap().idx, 5);
    }

    #[test]
    fn phase_never_moves_backwards() {
        let md = metadata();
        md.advance(Phase::Replicate);
        md.advance(Phase::Start);
        assert_eq!(md.phase(), Phase::Replicate);
    }

    #[test]
    fn wait_for_writer_wakes_on_signal() {
        use std::sync::Arc as StdArc;
        use std::thread;

        let md = StdArc::new(metadata());
        let md2 = StdArc::clone(&md);
        let handle = thread::spawn(move || md2.wait_for_writer(Duration::from_secs(5)));

        thread::sleep(Duration::from_millis(20));
        md.mark_writer_ready();
        assert!(handle.join().unwrap());
    }

    #[test]
    fn wait_for_writer_times_out_without_signal() {
        let md = metadata();
        assert!(!md.wait_for_writer(Duration::from_millis(10)));
    }
}

//! The key-value state-store seam (spec.md §4.8): "a key-value store
//! (`state_write(name, scn, payload)`, `state_read(name) -> payload?`) whose
//! backend is either a directory of files or an embedded database; the core
//! depends only on the interface." [`DirectoryStateStore`] is the one
//! concrete backend this crate ships; an embedded-database backend is a
//! plugin, same as the Writer's transport.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use redo_common::Scn;
use snafu::{ResultExt, Snafu};

#[derive(Debug, Snafu)]
pub enum StateError {
    #[snafu(display("failed to create state directory {}: {source}", path.display()))]
    CreateDir { path: PathBuf, source: io::Error },
    #[snafu(display("failed to write state file {}: {source}", path.display()))]
    Write { path: PathBuf, source: io::Error },
    #[snafu(display("failed to read state file {}: {source}", path.display()))]
    Read { path: PathBuf, source: io::Error },
}

/// A named durable slot, written atomically (temp file + fsync + rename,
/// following `file-source`'s `Checkpointer::write_checkpoints`) and read back
/// as raw bytes. `scn` is accepted for interface parity with the source
/// system's state store, which partitions some backends by SCN range; the
/// directory backend here ignores it beyond using it to order writes.
pub trait StateStore: Send + Sync {
    fn state_write(&self, name: &str, scn: Scn, payload: &[u8]) -> Result<(), StateError>;
    fn state_read(&self, name: &str) -> Result<Option<Vec<u8>>, StateError>;
}

/// Directory-of-files backend: `state_write("checkpoint", ..)` lands at
/// `<dir>/checkpoint.json` via `<dir>/checkpoint.json.tmp` + atomic rename,
/// matching the crash-consistency the Writer's checkpoint protocol requires
/// (spec.md §4.6 "Checkpoint write").
pub struct DirectoryStateStore {
    dir: PathBuf,
}

impl DirectoryStateStore {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, StateError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).context(CreateDirSnafu { path: dir.clone() })?;
        Ok(DirectoryStateStore { dir })
    }

    fn stable_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.json"))
    }

    fn tmp_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.json.tmp"))
    }
}

impl StateStore for DirectoryStateStore {
    fn state_write(&self, name: &str, _scn: Scn, payload: &[u8]) -> Result<(), StateError> {
        let tmp = self.tmp_path(name);
        let stable = self.stable_path(name);
        let mut f = File::create(&tmp).context(WriteSnafu { path: tmp.clone() })?;
        f.write_all(payload).context(WriteSnafu { path: tmp.clone() })?;
        f.sync_all().context(WriteSnafu { path: tmp.clone() })?;
        fs::rename(&tmp, &stable).context(WriteSnafu { path: stable })?;
        Ok(())
    }

    fn state_read(&self, name: &str) -> Result<Option<Vec<u8>>, StateError> {
        let path = self.stable_path(name);
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(StateError::Read { path, source }),
        }
    }
}

/// An in-memory backend for tests: no crash-consistency semantics, just the
/// read/write contract.
#[derive(Default)]
pub struct InMemoryStateStore {
    slots: parking_lot::Mutex<std::collections::HashMap<String, Vec<u8>>>,
}

impl InMemoryStateStore {
    pub fn new() -> Self {
        InMemoryStateStore::default()
    }
}

impl StateStore for InMemoryStateStore {
    fn state_write(&self, name: &str, _scn: Scn, payload: &[u8]) -> Result<(), StateError> {
        self.slots.lock().insert(name.to_string(), payload.to_vec());
        Ok(())
    }

    fn state_read(&self, name: &str) -> Result<Option<Vec<u8>>, StateError> {
        Ok(self.slots.lock().get(name).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directory_store_round_trips_and_survives_tmp_leftover() {
        let dir = tempfile::tempdir().unwrap();
        let store = DirectoryStateStore::new(dir.path()).unwrap();
        store.state_write("checkpoint", Scn::new(1), b"{\"scn\":1}").unwrap();
        assert_eq!(store.state_read("checkpoint").unwrap(), Some(b"{\"scn\":1}".to_vec()));
        assert!(!dir.path().join("checkpoint.json.tmp").exists());
    }

    #[test]
    fn directory_store_missing_name_reads_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = DirectoryStateStore::new(dir.path()).unwrap();
        assert_eq!(store.state_read("nope").unwrap(), None);
    }

    #[test]
    fn in_memory_store_round_trips() {
        let store = InMemoryStateStore::new();
        store.state_write("x", Scn::new(5), b"payload").unwrap();
        assert_eq!(store.state_read("x").unwrap(), Some(b"payload".to_vec()));
    }
}

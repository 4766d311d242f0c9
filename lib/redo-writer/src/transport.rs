//! The downstream `Transport` plugin seam (spec.md §1, §6): TCP/ZeroMQ/Kafka
//! are out of scope, but the Writer only ever drives this trait. Two
//! concrete plugins are provided: [`InMemoryTransport`] for unit tests and
//! [`FileTransport`] for file-backed integration tests and local
//! experimentation.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crossbeam_channel::{Receiver, Sender, TryRecvError};
use snafu::Snafu;

#[derive(Debug, Snafu)]
pub enum TransportError {
    #[snafu(display("transport disconnected"))]
    Disconnected,
    #[snafu(display("transport I/O error: {source}"))]
    Io { source: io::Error },
}

/// What the Writer drives: push framed bytes downstream, and poll for
/// whatever the client has sent back (spec.md §2 "external collaborators",
/// "Transport backends").
pub trait Transport: Send {
    fn send(&mut self, bytes: &[u8]) -> Result<(), TransportError>;

    /// Non-blocking: `Ok(None)` means nothing is waiting right now, not that
    /// the transport has nothing left to ever deliver.
    fn try_recv(&mut self) -> Result<Option<Vec<u8>>, TransportError>;
}

/// A pair of bounded channels standing in for a real client connection —
/// used by unit tests on both the Writer side and a harness pretending to be
/// the client.
pub struct InMemoryTransport {
    outgoing: Sender<Vec<u8>>,
    incoming: Receiver<Vec<u8>>,
}

impl InMemoryTransport {
    /// Returns `(writer_side, client_side)`: bytes sent on one arrive as
    /// `try_recv` on the other.
    pub fn pair(capacity: usize) -> (InMemoryTransport, InMemoryTransport) {
        let (to_client, from_writer) = crossbeam_channel::bounded(capacity);
        let (to_writer, from_client) = crossbeam_channel::bounded(capacity);
        (
            InMemoryTransport { outgoing: to_client, incoming: from_client },
            InMemoryTransport { outgoing: to_writer, incoming: from_writer },
        )
    }
}

impl Transport for InMemoryTransport {
    fn send(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        self.outgoing.send(bytes.to_vec()).map_err(|_| TransportError::Disconnected)
    }

    fn try_recv(&mut self) -> Result<Option<Vec<u8>>, TransportError> {
        match self.incoming.try_recv() {
            Ok(bytes) => Ok(Some(bytes)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(TransportError::Disconnected),
        }
    }
}

/// Appends length-prefixed frames to `outbound_path` and tailing-reads
/// length-prefixed frames from `inbound_path`, tracking its own read cursor
/// across calls. Meant for local experimentation and fixtures, not a
/// production transport.
pub struct FileTransport {
    outbound: File,
    inbound: File,
    inbound_pos: u64,
}

impl FileTransport {
    pub fn open(outbound_path: impl AsRef<Path>, inbound_path: impl AsRef<Path>) -> io::Result<Self> {
        let outbound = OpenOptions::new().create(true).append(true).open(outbound_path)?;
        let inbound = OpenOptions::new().create(true).read(true).open(inbound_path)?;
        Ok(FileTransport { outbound, inbound, inbound_pos: 0 })
    }

    #[cfg(test)]
    pub fn outbound_path_for_test(dir: &Path) -> PathBuf {
        dir.join("outbound.frames")
    }
}

impl Transport for FileTransport {
    fn send(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        self.outbound.write_all(&(bytes.len() as u32).to_le_bytes()).map_err(|source| TransportError::Io { source })?;
        self.outbound.write_all(bytes).map_err(|source| TransportError::Io { source })?;
        self.outbound.flush().map_err(|source| TransportError::Io { source })
    }

    fn try_recv(&mut self) -> Result<Option<Vec<u8>>, TransportError> {
        self.inbound.seek(SeekFrom::Start(self.inbound_pos)).map_err(|source| TransportError::Io { source })?;
        let mut len_bytes = [0u8; 4];
        match self.inbound.read_exact(&mut len_bytes) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(source) => return Err(TransportError::Io { source }),
        }
        let len = u32::from_le_bytes(len_bytes) as usize;
        let mut payload = vec![0u8; len];
        match self.inbound.read_exact(&mut payload) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(source) => return Err(TransportError::Io { source }),
        }
        self.inbound_pos += 4 + len as u64;
        Ok(Some(payload))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_memory_transport_delivers_both_directions() {
        let (mut server, mut client) = InMemoryTransport::pair(8);
        server.send(b"stream").unwrap();
        assert_eq!(client.try_recv().unwrap(), Some(b"stream".to_vec()));

        client.send(b"confirm").unwrap();
        assert_eq!(server.try_recv().unwrap(), Some(b"confirm".to_vec()));
        assert_eq!(server.try_recv().unwrap(), None);
    }

    #[test]
    fn file_transport_reads_back_appended_frames_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out.frames");
        let inb = dir.path().join("in.frames");

        let mut writer_side = FileTransport::open(&out, &inb).unwrap();
        writer_side.send(b"one").unwrap();
        writer_side.send(b"two").unwrap();

        // The "client" reads from `out` as its inbound file.
        let mut client_side = FileTransport::open(&inb, &out).unwrap();
        assert_eq!(client_side.try_recv().unwrap(), Some(b"one".to_vec()));
        assert_eq!(client_side.try_recv().unwrap(), Some(b"two".to_vec()));
        assert_eq!(client_side.try_recv().unwrap(), None);
    }
}

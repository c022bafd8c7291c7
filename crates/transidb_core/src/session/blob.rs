//! Pending blob values.

use std::fmt;
use std::io::{self, Read};
#[cfg(test)]
use std::path::Path;
use std::path::PathBuf;
use tempfile::NamedTempFile;
use tracing::warn;

/// Reference to a pending blob owned by a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct BlobRef(usize);

enum PendingBlob {
    Bytes(Vec<u8>),
    Spooled(NamedTempFile),
}

/// Blob values set in a session but not yet written to the store.
///
/// Blobs streamed from a reader are spooled to a temporary file so large
/// values do not sit in memory until flush.
pub(crate) struct PendingBlobs {
    blobs: Vec<Option<PendingBlob>>,
    spool_dir: Option<PathBuf>,
}

impl PendingBlobs {
    pub(crate) fn new(spool_dir: Option<PathBuf>) -> Self {
        Self {
            blobs: Vec::new(),
            spool_dir,
        }
    }

    fn push(&mut self, blob: PendingBlob) -> BlobRef {
        self.blobs.push(Some(blob));
        BlobRef(self.blobs.len() - 1)
    }

    pub(crate) fn insert_bytes(&mut self, data: Vec<u8>) -> BlobRef {
        self.push(PendingBlob::Bytes(data))
    }

    pub(crate) fn spool(&mut self, reader: &mut dyn Read) -> io::Result<BlobRef> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("transidb-blob-");
        let mut file = match &self.spool_dir {
            Some(dir) => builder.tempfile_in(dir)?,
            None => builder.tempfile()?,
        };
        io::copy(reader, file.as_file_mut())?;
        Ok(self.push(PendingBlob::Spooled(file)))
    }

    pub(crate) fn read(&self, blob: BlobRef) -> io::Result<Vec<u8>> {
        match self.blobs.get(blob.0).and_then(Option::as_ref) {
            Some(PendingBlob::Bytes(data)) => Ok(data.clone()),
            Some(PendingBlob::Spooled(file)) => std::fs::read(file.path()),
            None => Err(io::Error::new(
                io::ErrorKind::NotFound,
                "pending blob was already released",
            )),
        }
    }

    /// Path of a spooled blob.
    #[cfg(test)]
    pub(crate) fn spool_path(&self, blob: BlobRef) -> Option<&Path> {
        match self.blobs.get(blob.0).and_then(Option::as_ref) {
            Some(PendingBlob::Spooled(file)) => Some(file.path()),
            _ => None,
        }
    }

    /// Drops a blob that no pending write refers to anymore.
    pub(crate) fn release(&mut self, blob: BlobRef) {
        if let Some(pending) = self.blobs.get_mut(blob.0).and_then(Option::take) {
            remove_spool_file(pending);
        }
    }

    /// Drops every pending blob, removing spool files.
    ///
    /// Failures to remove a file are logged, never returned.
    pub(crate) fn discard_all(&mut self) {
        for blob in self.blobs.drain(..).flatten() {
            remove_spool_file(blob);
        }
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.blobs.iter().all(Option::is_none)
    }
}

fn remove_spool_file(blob: PendingBlob) {
    if let PendingBlob::Spooled(file) = blob {
        let path = file.path().to_path_buf();
        if let Err(err) = file.close() {
            warn!(path = %path.display(), error = %err, "failed to remove spooled blob");
        }
    }
}

impl fmt::Debug for PendingBlobs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingBlobs")
            .field("count", &self.blobs.iter().flatten().count())
            .field("spool_dir", &self.spool_dir)
            .finish()
    }
}

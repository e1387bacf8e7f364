//! File handles over remote objects.

use std::{
    fmt,
    io::{self, Cursor, Read, Write},
    mem,
    str::FromStr,
    sync::Arc,
};

use bytes::Bytes;
use tracing::{debug, warn};

use crate::{error::Operation, storage::Backend, StorageError, StorageResult};

/// Access mode of a [`RemoteFile`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    Read,
    Write,
}

impl FromStr for OpenMode {
    type Err = StorageError;

    fn from_str(mode: &str) -> Result<Self, Self::Err> {
        match mode {
            "r" | "rb" => Ok(OpenMode::Read),
            "w" | "wb" => Ok(OpenMode::Write),
            _ => Err(StorageError::InvalidMode {
                mode: mode.to_string(),
            }),
        }
    }
}

enum Stream {
    Reader(Cursor<Bytes>),
    Writer { buffer: Vec<u8>, dirty: bool },
}

enum HandleState {
    Open(Stream),
    Closed,
}

/// A stream bound to one object and one mode.
///
/// Reads are served from the object content fetched on open. Writes are
/// buffered and stored on [`RemoteFile::close`]. Using a closed handle
/// reopens it:
///
/// - a read handle fetches the object again and starts from the beginning;
/// - a write handle that already stored its data continues after it, so the
///   next close stores the content of every session.
pub struct RemoteFile {
    backend: Arc<Backend>,
    name: String,
    key: String,
    mode: OpenMode,
    state: HandleState,
    /// Set once a close stored this handle's object.
    persisted: bool,
}

impl RemoteFile {
    pub(crate) fn open(
        backend: Arc<Backend>,
        name: String,
        key: String,
        mode: OpenMode,
    ) -> StorageResult<Self> {
        let mut file = Self {
            backend,
            name,
            key,
            mode,
            state: HandleState::Closed,
            persisted: false,
        };
        file.state = HandleState::Open(file.acquire()?);
        Ok(file)
    }

    /// Logical name. May change on the first close of a write handle when
    /// the requested name was taken.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn mode(&self) -> OpenMode {
        self.mode
    }

    pub fn is_closed(&self) -> bool {
        matches!(self.state, HandleState::Closed)
    }

    fn fetch(&self) -> StorageResult<Bytes> {
        let backend = &self.backend;
        backend.instrument(Operation::Open, &self.key, |client| {
            backend.operations.open_read(client, &self.key)
        })
    }

    fn acquire(&self) -> StorageResult<Stream> {
        match self.mode {
            OpenMode::Read => Ok(Stream::Reader(Cursor::new(self.fetch()?))),
            OpenMode::Write if self.persisted => Ok(Stream::Writer {
                buffer: self.fetch()?.to_vec(),
                dirty: false,
            }),
            OpenMode::Write => Ok(Stream::Writer {
                buffer: Vec::new(),
                dirty: false,
            }),
        }
    }

    /// Runs `f` on the open stream, reopening the handle first if needed.
    fn with_stream<T>(&mut self, f: impl FnOnce(&mut Stream) -> io::Result<T>) -> io::Result<T> {
        let mut stream = match mem::replace(&mut self.state, HandleState::Closed) {
            HandleState::Open(stream) => stream,
            HandleState::Closed => {
                debug!(key = %self.key, mode = ?self.mode, "reopening closed file");
                self.acquire()?
            }
        };
        let result = f(&mut stream);
        self.state = HandleState::Open(stream);
        result
    }

    /// Stores pending writes and releases the stream. The handle is closed
    /// afterwards even when storing fails.
    pub fn close(&mut self) -> StorageResult<()> {
        match mem::replace(&mut self.state, HandleState::Closed) {
            HandleState::Open(Stream::Writer {
                buffer,
                dirty: true,
            }) => self.persist(buffer).map_err(|e| StorageError::Flush {
                key: self.key.clone(),
                source: Box::new(e),
            }),
            _ => Ok(()),
        }
    }

    fn persist(&mut self, buffer: Vec<u8>) -> StorageResult<()> {
        let backend = Arc::clone(&self.backend);
        let data = Bytes::from(buffer);
        if self.persisted {
            backend.instrument(Operation::Upload, &self.key, |client| {
                backend.operations.upload(client, &self.key, data, None)
            })?;
        } else {
            let key = backend.instrument(Operation::Save, &self.key, |client| {
                backend.operations.save_bytes(client, &self.key, data, None)
            })?;
            if key != self.key {
                debug!(requested = %self.key, key = %key, "file stored under alternative name");
                self.name = backend.resolver.logical_name(&key);
                self.key = key;
            }
            self.persisted = true;
        }
        Ok(())
    }
}

fn unsupported(mode: OpenMode) -> io::Error {
    io::Error::new(
        io::ErrorKind::Unsupported,
        format!("operation not supported in {:?} mode", mode),
    )
}

impl Read for RemoteFile {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mode = self.mode;
        self.with_stream(|stream| match stream {
            Stream::Reader(cursor) => cursor.read(buf),
            Stream::Writer { .. } => Err(unsupported(mode)),
        })
    }
}

impl Write for RemoteFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mode = self.mode;
        self.with_stream(|stream| match stream {
            Stream::Writer { buffer, dirty } => {
                buffer.extend_from_slice(buf);
                *dirty = true;
                Ok(buf.len())
            }
            Stream::Reader(_) => Err(unsupported(mode)),
        })
    }

    /// Writes are kept in memory until [`RemoteFile::close`].
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for RemoteFile {
    fn drop(&mut self) {
        if let HandleState::Open(Stream::Writer {
            buffer,
            dirty: true,
        }) = &self.state
        {
            warn!(
                key = %self.key,
                pending_bytes = buffer.len(),
                "file dropped without close, discarding unsaved writes"
            );
        }
    }
}

impl fmt::Debug for RemoteFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteFile")
            .field("name", &self.name)
            .field("key", &self.key)
            .field("mode", &self.mode)
            .field("closed", &self.is_closed())
            .finish()
    }
}

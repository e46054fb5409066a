use std::collections::HashMap;
use std::io::{Read, Seek, SeekFrom};
use std::sync::Arc;

use serde_json::{Map, Value};
use sgr_types::{DataRef, RepoUuid};
use tracing::{debug, error, warn};

use crate::config::DEFAULT_MAX_FILE_SIZE;
use crate::error::{BlobError, BlobResult};
use crate::handler::ReadSeek;
use crate::manager::FileManager;
use crate::reference::RefId;

struct ActiveFile {
    name: String,
    buffer: Vec<u8>,
}

/// Packs many small payloads into size-bounded blob files.
///
/// Each inserted payload is appended to the active in-memory file and
/// located by the returned [`DataRef`]. When the next payload would push the
/// active file past the cap, the file is committed through the
/// [`FileManager`] and a fresh one is started. A payload larger than the cap
/// on its own gets a file to itself.
///
/// One packer serves one unit of work (a commit or one batch insert) and is
/// not shared between threads. Call [`BlobFilePacker::finished`] before
/// discarding it; dropping it also commits, logging any failure.
pub struct BlobFilePacker {
    manager: Arc<FileManager>,
    database: String,
    group: String,
    metadata: Map<String, Value>,
    max_file_size: u64,
    active: Option<ActiveFile>,
    committed: Vec<String>,
    read_handles: HashMap<String, Box<dyn ReadSeek>>,
}

impl BlobFilePacker {
    /// Packer writing references into `<group>.ref` of `database`.
    pub fn new(manager: Arc<FileManager>, database: impl Into<String>, group: impl Into<String>) -> Self {
        Self {
            manager,
            database: database.into(),
            group: group.into(),
            metadata: Map::new(),
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            active: None,
            committed: Vec::new(),
            read_handles: HashMap::new(),
        }
    }

    pub fn with_max_file_size(mut self, max: u64) -> Self {
        self.max_file_size = max;
        self
    }

    /// Metadata copied onto every blob reference this packer writes.
    pub fn with_metadata(mut self, metadata: Map<String, Value>) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn max_file_size(&self) -> u64 {
        self.max_file_size
    }

    /// Names of the files committed so far, in commit order.
    pub fn committed_files(&self) -> &[String] {
        &self.committed
    }

    pub fn active_file_name(&self) -> Option<&str> {
        self.active.as_ref().map(|f| f.name.as_str())
    }

    /// Bytes buffered in the active file.
    pub fn active_len(&self) -> u64 {
        self.active.as_ref().map_or(0, |f| f.buffer.len() as u64)
    }

    /// Append a payload and return where it will live.
    ///
    /// An empty payload takes no space: its zero-size range opens no file
    /// and is never fetched.
    pub fn insert_binary(&mut self, data: &[u8]) -> BlobResult<DataRef> {
        let len = data.len() as u64;
        if len == 0 {
            let name = match &self.active {
                Some(file) => file.name.clone(),
                None => RepoUuid::new().to_string(),
            };
            return Ok(DataRef::new(name, self.active_len(), 0));
        }
        let needs_new = match &self.active {
            None => true,
            Some(file) => file.buffer.len() as u64 + len > self.max_file_size,
        };
        if needs_new {
            self.commit_active()?;
            if len > self.max_file_size {
                warn!(size = len, cap = self.max_file_size, "payload exceeds blob file cap, storing alone");
            }
        }
        let file = self.active.get_or_insert_with(|| ActiveFile {
            name: RepoUuid::new().to_string(),
            buffer: Vec::new(),
        });
        let start = file.buffer.len() as u64;
        file.buffer.extend_from_slice(data);
        Ok(DataRef::new(file.name.clone(), start, len))
    }

    /// Commit the active file, if any.
    pub fn finished(&mut self) -> BlobResult<()> {
        self.commit_active()
    }

    /// Read the bytes a [`DataRef`] points at.
    ///
    /// Ranges inside the still-open active file are served from memory.
    /// Read handles for committed files are opened once and cached.
    pub fn read_to_buffer(&mut self, data_ref: &DataRef) -> BlobResult<Vec<u8>> {
        if data_ref.size == 0 {
            return Ok(Vec::new());
        }
        if let Some(file) = self.active.as_ref().filter(|f| f.name == data_ref.file_name) {
            let (start, end) = (data_ref.start_pos as usize, data_ref.end_pos() as usize);
            return file
                .buffer
                .get(start..end)
                .map(<[u8]>::to_vec)
                .ok_or_else(|| BlobError::corrupt(data_ref.to_string(), "range outside active file"));
        }

        if !self.read_handles.contains_key(&data_ref.file_name) {
            let stream = self.manager.get_file_stream(
                &self.database,
                &self.group,
                &RefId::Name(data_ref.file_name.clone()),
            )?;
            self.read_handles.insert(data_ref.file_name.clone(), stream);
        }
        let Some(stream) = self.read_handles.get_mut(&data_ref.file_name) else {
            return Err(BlobError::MissingFile {
                link: data_ref.file_name.clone(),
            });
        };
        stream.seek(SeekFrom::Start(data_ref.start_pos))?;
        let mut buf = vec![0u8; data_ref.size as usize];
        stream.read_exact(&mut buf).map_err(|e| match e.kind() {
            std::io::ErrorKind::UnexpectedEof => {
                BlobError::corrupt(data_ref.to_string(), "range outside blob file")
            }
            _ => BlobError::Io(e),
        })?;
        Ok(buf)
    }

    fn commit_active(&mut self) -> BlobResult<()> {
        let Some(file) = &self.active else {
            return Ok(());
        };
        if !file.buffer.is_empty() {
            self.manager.upload_file_and_commit(
                &self.database,
                &self.group,
                RefId::Name(file.name.clone()),
                &file.buffer,
                self.metadata.clone(),
            )?;
            debug!(file = %file.name, bytes = file.buffer.len(), group = %self.group, "committed blob file");
            self.committed.push(file.name.clone());
        }
        self.active = None;
        Ok(())
    }
}

impl Drop for BlobFilePacker {
    fn drop(&mut self) {
        if self.active_len() > 0 {
            warn!(group = %self.group, "blob packer dropped before finished(), committing");
            if let Err(e) = self.commit_active() {
                error!(group = %self.group, error = %e, "failed to commit blob file on drop");
            }
        }
        self.read_handles.clear();
    }
}

impl std::fmt::Debug for BlobFilePacker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlobFilePacker")
            .field("database", &self.database)
            .field("group", &self.group)
            .field("max_file_size", &self.max_file_size)
            .field("active", &self.active_file_name())
            .field("committed", &self.committed.len())
            .finish()
    }
}

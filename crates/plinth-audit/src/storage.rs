//! Audit storage backends.

use crate::error::AuditError;
use crate::logger::AuditFilter;
use crate::record::AuditRecord;
use async_trait::async_trait;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Trait for audit storage backends.
///
/// `store` must not return until the record is durable. Callers serialize
/// calls to `store`; implementations need not order concurrent appends.
#[async_trait]
pub trait AuditStorage: Send + Sync {
    /// Append an audit record.
    async fn store(&self, record: &AuditRecord) -> Result<(), AuditError>;

    /// Query audit records with filters.
    async fn query(&self, filter: AuditFilter) -> Result<Vec<AuditRecord>, AuditError>;

    /// Flush and release resources.
    async fn close(&self) -> Result<(), AuditError> {
        Ok(())
    }
}

/// Console storage (human-readable line on stdout).
pub struct ConsoleStorage;

impl ConsoleStorage {
    pub fn new() -> Self {
        Self
    }
}

impl Default for ConsoleStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AuditStorage for ConsoleStorage {
    async fn store(&self, record: &AuditRecord) -> Result<(), AuditError> {
        println!("{}", record.to_log_line());
        Ok(())
    }

    async fn query(&self, _filter: AuditFilter) -> Result<Vec<AuditRecord>, AuditError> {
        // Console storage doesn't support querying
        Ok(vec![])
    }
}

/// File storage (JSON Lines, fsynced per record).
pub struct FileStorage {
    path: PathBuf,
    file: Arc<Mutex<Option<File>>>,
}

impl FileStorage {
    /// Open (or create) the audit file for appending.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, AuditError> {
        let path = path.as_ref().to_path_buf();
        let init_err = |source| AuditError::InitializationFailed {
            path: path.clone(),
            source,
        };

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(init_err)?;
            }
        }

        let mut options = OpenOptions::new();
        options.create(true).append(true).read(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o640);
        }
        let mut file = options.open(&path).map_err(init_err)?;
        if terminate_torn_tail(&mut file).map_err(init_err)? {
            tracing::warn!(path = %path.display(), "Audit log ended mid-record; terminated the torn line");
        }

        Ok(Self {
            path,
            file: Arc::new(Mutex::new(Some(file))),
        })
    }

    /// Path of the audit file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Query an audit file without opening it for writing.
    ///
    /// A missing file yields no records.
    pub async fn query_path(
        path: impl AsRef<Path>,
        filter: AuditFilter,
    ) -> Result<Vec<AuditRecord>, AuditError> {
        let path = path.as_ref().to_path_buf();
        tokio::task::spawn_blocking(move || read_records(&path, &filter))
            .await
            .map_err(|e| AuditError::QueryFailed(e.to_string()))?
    }
}

/// Append a newline if the file does not end with one. Returns whether it did.
fn terminate_torn_tail(file: &mut File) -> std::io::Result<bool> {
    if file.metadata()?.len() == 0 {
        return Ok(false);
    }
    let mut last = [0u8; 1];
    file.seek(SeekFrom::End(-1))?;
    file.read_exact(&mut last)?;
    if last[0] == b'\n' {
        return Ok(false);
    }
    file.write_all(b"\n")?;
    file.sync_data()?;
    Ok(true)
}

/// Append one record line. On failure the file is cut back to its previous
/// length so a partial line cannot swallow the next record.
fn append_line(file: &mut File, line: &[u8]) -> std::io::Result<()> {
    let previous = file.metadata()?.len();
    if let Err(e) = file.write_all(line).and_then(|()| file.sync_data()) {
        if let Err(truncate) = file.set_len(previous) {
            tracing::error!(error = %truncate, "Failed to roll back partial audit line");
        }
        return Err(e);
    }
    Ok(())
}

#[async_trait]
impl AuditStorage for FileStorage {
    async fn store(&self, record: &AuditRecord) -> Result<(), AuditError> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');

        let file = Arc::clone(&self.file);
        tokio::task::spawn_blocking(move || {
            let mut guard = file
                .lock()
                .map_err(|_| AuditError::WriteFailed(std::io::Error::other("audit file lock poisoned")))?;
            let file = guard.as_mut().ok_or(AuditError::Closed)?;
            append_line(file, &line).map_err(AuditError::WriteFailed)
        })
        .await
        .map_err(|e| AuditError::WriteFailed(std::io::Error::other(e)))?
    }

    async fn query(&self, filter: AuditFilter) -> Result<Vec<AuditRecord>, AuditError> {
        Self::query_path(&self.path, filter).await
    }

    async fn close(&self) -> Result<(), AuditError> {
        let file = Arc::clone(&self.file);
        tokio::task::spawn_blocking(move || {
            let mut guard = file
                .lock()
                .map_err(|_| AuditError::WriteFailed(std::io::Error::other("audit file lock poisoned")))?;
            if let Some(file) = guard.take() {
                file.sync_all().map_err(AuditError::WriteFailed)?;
            }
            Ok(())
        })
        .await
        .map_err(|e| AuditError::WriteFailed(std::io::Error::other(e)))?
    }
}

fn read_records(path: &Path, filter: &AuditFilter) -> Result<Vec<AuditRecord>, AuditError> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(vec![]),
        Err(e) => return Err(e.into()),
    };

    let mut results = Vec::new();
    for (index, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<AuditRecord>(&line) {
            Ok(record) if filter.matches(&record) => results.push(record),
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    line = index + 1,
                    error = %e,
                    "Skipping unparsable audit line"
                );
            }
        }
    }

    Ok(filter.paginate(results))
}

/// File plus console output.
pub struct DualStorage {
    file: FileStorage,
    console: ConsoleStorage,
}

impl DualStorage {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, AuditError> {
        Ok(Self {
            file: FileStorage::open(path)?,
            console: ConsoleStorage::new(),
        })
    }
}

#[async_trait]
impl AuditStorage for DualStorage {
    async fn store(&self, record: &AuditRecord) -> Result<(), AuditError> {
        self.file.store(record).await?;
        self.console.store(record).await
    }

    async fn query(&self, filter: AuditFilter) -> Result<Vec<AuditRecord>, AuditError> {
        self.file.query(filter).await
    }

    async fn close(&self) -> Result<(), AuditError> {
        self.file.close().await
    }
}

/// Storage that discards everything (audit disabled).
pub struct NullStorage;

impl NullStorage {
    pub fn new() -> Self {
        Self
    }
}

impl Default for NullStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AuditStorage for NullStorage {
    async fn store(&self, _record: &AuditRecord) -> Result<(), AuditError> {
        Ok(())
    }

    async fn query(&self, _filter: AuditFilter) -> Result<Vec<AuditRecord>, AuditError> {
        Ok(vec![])
    }
}

//! Append-only audit log.
//!
//! Every mutating operation attempt and its outcome is recorded, including
//! the deliberate inconsistency left behind by a compensated terminate.
//! The file-backed log is append-only, one JSON record per line, synced
//! after each write.

use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::SystemTime;

use uuid::Uuid;

/// Audit action type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditAction {
    /// Operation was requested.
    OperationRequested,

    /// Operation completed successfully.
    OperationExecuted,

    /// Operation was rejected before any mutation.
    OperationRejected,

    /// Operation failed after mutation started.
    OperationFailed,

    /// Compensation was attempted after a fan-out failure.
    CompensationAttempted,
}

impl AuditAction {
    /// Returns the action name string.
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::OperationRequested => "OPERATION_REQUESTED",
            AuditAction::OperationExecuted => "OPERATION_EXECUTED",
            AuditAction::OperationRejected => "OPERATION_REJECTED",
            AuditAction::OperationFailed => "OPERATION_FAILED",
            AuditAction::CompensationAttempted => "COMPENSATION_ATTEMPTED",
        }
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Audit record outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditOutcome {
    Success,
    Rejected,
    Failed,
    Pending,
}

impl AuditOutcome {
    /// Returns the outcome string.
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditOutcome::Success => "SUCCESS",
            AuditOutcome::Rejected => "REJECTED",
            AuditOutcome::Failed => "FAILED",
            AuditOutcome::Pending => "PENDING",
        }
    }
}

impl fmt::Display for AuditOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single audit record.
#[derive(Debug, Clone)]
pub struct AuditRecord {
    /// Unique record ID.
    pub id: Uuid,

    /// Timestamp when the action occurred.
    pub timestamp: SystemTime,

    /// The action that occurred.
    pub action: AuditAction,

    /// Operation name (associate, terminate, replace, ...).
    pub operation: Option<String>,

    /// Device serial number, when known.
    pub serial_number: Option<String>,

    /// Association row id, when known.
    pub association_id: Option<Uuid>,

    /// Acting user.
    pub actor_id: Option<Uuid>,

    /// Outcome of the action.
    pub outcome: AuditOutcome,

    /// Stable error code (if outcome is Rejected or Failed).
    pub error_code: Option<String>,
}

impl AuditRecord {
    /// Create a new audit record.
    pub fn new(action: AuditAction, outcome: AuditOutcome) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: SystemTime::now(),
            action,
            operation: None,
            serial_number: None,
            association_id: None,
            actor_id: None,
            outcome,
            error_code: None,
        }
    }

    /// Set the operation name.
    pub fn with_operation(mut self, operation: impl Into<String>) -> Self {
        self.operation = Some(operation.into());
        self
    }

    /// Set the device serial number.
    pub fn with_serial(mut self, serial_number: impl Into<String>) -> Self {
        self.serial_number = Some(serial_number.into());
        self
    }

    /// Set the association row id.
    pub fn with_association(mut self, id: Uuid) -> Self {
        self.association_id = Some(id);
        self
    }

    /// Set the acting user.
    pub fn with_actor(mut self, actor_id: Uuid) -> Self {
        self.actor_id = Some(actor_id);
        self
    }

    /// Set the error code.
    pub fn with_error(mut self, code: impl Into<String>) -> Self {
        self.error_code = Some(code.into());
        self
    }

    /// Serialize to a JSON line for append-only logging.
    pub fn to_json(&self) -> String {
        let timestamp = self
            .timestamp
            .duration_since(SystemTime::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);

        let mut json = format!(
            r#"{{"id":"{}","ts":{},"action":"{}","outcome":"{}""#,
            self.id, timestamp, self.action, self.outcome
        );

        if let Some(ref op) = self.operation {
            json.push_str(&format!(r#","operation":"{}""#, escape_json(op)));
        }
        if let Some(ref sn) = self.serial_number {
            json.push_str(&format!(r#","serial_number":"{}""#, escape_json(sn)));
        }
        if let Some(ref aid) = self.association_id {
            json.push_str(&format!(r#","association_id":"{}""#, aid));
        }
        if let Some(ref actor) = self.actor_id {
            json.push_str(&format!(r#","actor":"{}""#, actor));
        }
        if let Some(ref code) = self.error_code {
            json.push_str(&format!(r#","error":"{}""#, escape_json(code)));
        }

        json.push('}');
        json
    }
}

/// Escape special JSON characters.
fn escape_json(s: &str) -> String {
    s.replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
        .replace('\r', "\\r")
        .replace('\t', "\\t")
}

/// Audit log trait. Appends must be synchronous: the record is visible
/// once the call returns.
pub trait AuditLog: Send + Sync {
    /// Append a record to the audit log.
    fn append(&self, record: &AuditRecord) -> io::Result<()>;

    /// Sync the audit log to durable storage.
    fn sync(&self) -> io::Result<()>;
}

impl<T: AuditLog + ?Sized> AuditLog for std::sync::Arc<T> {
    fn append(&self, record: &AuditRecord) -> io::Result<()> {
        (**self).append(record)
    }

    fn sync(&self) -> io::Result<()> {
        (**self).sync()
    }
}

/// File-based audit log: one JSON record per line, synced per append.
pub struct FileAuditLog {
    path: PathBuf,
    writer: Mutex<BufWriter<File>>,
}

impl FileAuditLog {
    /// Open or create an audit log file.
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;

        Ok(Self {
            path,
            writer: Mutex::new(BufWriter::new(file)),
        })
    }

    /// Get the audit log path.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl AuditLog for FileAuditLog {
    fn append(&self, record: &AuditRecord) -> io::Result<()> {
        let json = record.to_json();
        let mut writer = self
            .writer
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "audit lock poisoned"))?;
        writer.write_all(json.as_bytes())?;
        writer.write_all(b"\n")?;
        writer.flush()?;
        writer.get_ref().sync_all()
    }

    fn sync(&self) -> io::Result<()> {
        let mut writer = self
            .writer
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "audit lock poisoned"))?;
        writer.flush()?;
        writer.get_ref().sync_all()
    }
}

/// In-memory audit log for tests.
#[derive(Default)]
pub struct MemoryAuditLog {
    records: Mutex<Vec<AuditRecord>>,
}

impl MemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// All recorded entries.
    pub fn records(&self) -> Vec<AuditRecord> {
        self.records.lock().expect("audit lock poisoned").clone()
    }
}

impl AuditLog for MemoryAuditLog {
    fn append(&self, record: &AuditRecord) -> io::Result<()> {
        self.records
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "audit lock poisoned"))?
            .push(record.clone());
        Ok(())
    }

    fn sync(&self) -> io::Result<()> {
        Ok(())
    }
}

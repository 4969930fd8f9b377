//! Snapshot persistence for subscriptions and deliveries.
//!
//! The registry and the ledger live in memory. When a state path is
//! configured, their contents are written to a single JSON document and read
//! back at startup so open deliveries and their retry schedule survive a
//! restart.
//!
//! Subscription secrets are stored encrypted and the file is readable by its
//! owner only. Each save is fsynced before it replaces the previous file,
//! which is kept as `.bak` and used when the primary cannot be parsed.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::WebhookError;
use crate::models::{WebhookDelivery, WebhookSubscription};

/// Format version written into every snapshot.
pub const SNAPSHOT_VERSION: u32 = 1;

/// Subscription as persisted. The secret is AES-256-GCM encrypted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedSubscription {
    #[serde(flatten)]
    pub subscription: WebhookSubscription,
    pub encrypted_secret: String,
}

/// Full state document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub version: u32,
    pub saved_at: DateTime<Utc>,
    pub subscriptions: Vec<PersistedSubscription>,
    pub deliveries: Vec<WebhookDelivery>,
}

impl StateSnapshot {
    #[must_use]
    pub fn new(
        subscriptions: Vec<PersistedSubscription>,
        deliveries: Vec<WebhookDelivery>,
    ) -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            saved_at: Utc::now(),
            subscriptions,
            deliveries,
        }
    }
}

/// File-backed snapshot location.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    path: PathBuf,
}

impl SnapshotStore {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Previous snapshot, kept by every save.
    #[must_use]
    pub fn backup_path(&self) -> PathBuf {
        self.path.with_extension("bak")
    }

    /// Read the snapshot. A missing file is an empty start, not an error.
    ///
    /// Falls back to the backup when the primary is missing or unreadable.
    ///
    /// # Errors
    ///
    /// Returns `WebhookError::Storage` if neither file can be read or parsed,
    /// or one was written by an unknown format version.
    pub fn load(&self) -> Result<Option<StateSnapshot>, WebhookError> {
        let primary = match read_snapshot(&self.path) {
            Ok(Some(snapshot)) => return Ok(Some(snapshot)),
            Ok(None) => None,
            Err(e) => Some(e),
        };

        let backup = self.backup_path();
        match (read_snapshot(&backup), primary) {
            (Ok(Some(snapshot)), primary) => {
                tracing::warn!(
                    target: "webhook_registry",
                    path = %self.path.display(),
                    backup = %backup.display(),
                    error = primary.as_ref().map(ToString::to_string).unwrap_or_default(),
                    "Primary snapshot unusable, restoring from backup"
                );
                Ok(Some(snapshot))
            }
            (_, Some(primary)) => Err(primary),
            (Ok(None), None) => Ok(None),
            (Err(e), None) => Err(e),
        }
    }

    /// Write the snapshot. The previous file is replaced only once the new
    /// one is fully on disk, and is kept as the backup.
    ///
    /// # Errors
    ///
    /// Returns `WebhookError::Storage` on any I/O or serialization failure.
    pub fn save(&self, snapshot: &StateSnapshot) -> Result<(), WebhookError> {
        let bytes = serde_json::to_vec(snapshot)
            .map_err(|e| WebhookError::Storage(format!("Failed to serialize snapshot: {e}")))?;

        let parent = self.path.parent().filter(|p| !p.as_os_str().is_empty());
        if let Some(parent) = parent {
            fs::create_dir_all(parent).map_err(|e| io_error("create", parent, &e))?;
        }

        let tmp = self.path.with_extension("tmp");
        write_private(&tmp, &bytes).map_err(|e| io_error("write", &tmp, &e))?;

        let backup = self.backup_path();
        match fs::rename(&self.path, &backup) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(io_error("back up", &self.path, &e)),
        }
        fs::rename(&tmp, &self.path).map_err(|e| io_error("replace", &self.path, &e))?;

        // Make the renames durable.
        #[cfg(unix)]
        if let Some(parent) = parent {
            fs::File::open(parent)
                .and_then(|dir| dir.sync_all())
                .map_err(|e| io_error("sync", parent, &e))?;
        }

        Ok(())
    }
}

fn read_snapshot(path: &Path) -> Result<Option<StateSnapshot>, WebhookError> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(io_error("read", path, &e)),
    };

    let snapshot: StateSnapshot = serde_json::from_slice(&bytes).map_err(|e| {
        WebhookError::Storage(format!("Corrupt snapshot {}: {e}", path.display()))
    })?;

    if snapshot.version != SNAPSHOT_VERSION {
        return Err(WebhookError::Storage(format!(
            "Unsupported snapshot version {} in {}",
            snapshot.version,
            path.display()
        )));
    }

    Ok(Some(snapshot))
}

/// Write `bytes` to `path` with owner-only permissions and fsync it.
fn write_private(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let mut file = options.open(path)?;
    // `mode` only applies to newly created files.
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.set_permissions(fs::Permissions::from_mode(0o600))?;
    }
    file.write_all(bytes)?;
    file.sync_all()
}

fn io_error(action: &str, path: &Path, e: &std::io::Error) -> WebhookError {
    WebhookError::Storage(format!("Failed to {action} {}: {e}", path.display()))
}

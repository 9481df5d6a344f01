//! Payment Record Store Module
//!
//! This module provides the durable, content-addressed store backing the
//! orchestrator and monitors: one JSON file per payment under a shared data
//! root, a notification queue consumed by the chat front-end, and the
//! encrypted wallet keystore.
//!
//! Layout under the data root:
//!
//! ```text
//! pending/<payment_id>.json        payment records (all statuses)
//! notifications/<payment_id>.json  confirmation notifications, consumed once
//! wallets/<business_id>.enc.json   business wallet keystores, mode 0600
//! ```
//!
//! All writes go through a temp-file + rename so a crash never leaves a
//! half-written record behind. Each payment record has a single writer (the
//! monitor that owns the payment), so read-modify-write here needs no lock.

pub mod notifications;
pub mod records;
pub mod wallets;

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write as _};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

pub use notifications::{Notification, NotificationType};
pub use records::{BridgeDetails, PaymentKind, PaymentRecord, PaymentStatus};
pub use wallets::WalletKeystore;

// ============================================================================
// ERROR TYPES
// ============================================================================

/// Errors produced by store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No record exists for the requested payment id
    #[error("Payment record not found: {0}")]
    NotFound(String),
    /// A record with this payment id already exists
    #[error("Payment record already exists: {0}")]
    Conflict(String),
    /// The requested status change is not an allowed transition
    #[error("Invalid status transition: {from:?} -> {to:?}")]
    InvalidTransition {
        from: PaymentStatus,
        to: PaymentStatus,
    },
    /// Underlying filesystem failure
    #[error("Store I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// Record could not be encoded or decoded
    #[error("Store serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Current Unix timestamp in seconds.
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

// ============================================================================
// FILTERS
// ============================================================================

/// Filter for bounded record listing.
#[derive(Debug, Clone, Default)]
pub struct ListFilter {
    /// Only records with this status
    pub status: Option<PaymentStatus>,
    /// Only records belonging to this business
    pub business_id: Option<String>,
    /// Maximum records returned (0 means the default bound)
    pub limit: usize,
}

/// Upper bound on a single list scan.
const DEFAULT_LIST_LIMIT: usize = 100;

// ============================================================================
// STORE IMPLEMENTATION
// ============================================================================

/// Filesystem-backed payment store rooted at a shared data directory.
#[derive(Debug, Clone)]
pub struct PaymentStore {
    root: PathBuf,
}

impl PaymentStore {
    /// Opens (and initializes) a store at the given data root.
    ///
    /// Creates the `pending/`, `notifications/`, and `wallets/` directories
    /// if missing; safe to call repeatedly.
    pub fn new(root: impl AsRef<Path>) -> StoreResult<Self> {
        let root = root.as_ref().to_path_buf();
        for dir in [
            root.join("pending"),
            root.join("notifications"),
            root.join("wallets"),
        ] {
            fs::create_dir_all(&dir)?;
        }
        Ok(Self { root })
    }

    /// Returns the data root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn record_path(&self, payment_id: &str) -> PathBuf {
        self.root.join("pending").join(format!("{}.json", payment_id))
    }

    pub(crate) fn notification_path(&self, payment_id: &str) -> PathBuf {
        self.root
            .join("notifications")
            .join(format!("{}.json", payment_id))
    }

    pub(crate) fn notifications_dir(&self) -> PathBuf {
        self.root.join("notifications")
    }

    pub(crate) fn wallet_path(&self, business_id: &str) -> PathBuf {
        self.root
            .join("wallets")
            .join(format!("{}.enc.json", business_id))
    }

    /// Creates a new payment record.
    ///
    /// # Returns
    ///
    /// - `Err(StoreError::Conflict)` - a record with this id already exists
    pub fn create(&self, record: &PaymentRecord) -> StoreResult<()> {
        let path = self.record_path(&record.payment_id);
        if path.exists() {
            return Err(StoreError::Conflict(record.payment_id.clone()));
        }
        self.write_json_atomic(&path, record)
    }

    /// Loads a payment record by id.
    pub fn get(&self, payment_id: &str) -> StoreResult<PaymentRecord> {
        let path = self.record_path(payment_id);
        if !path.exists() {
            return Err(StoreError::NotFound(payment_id.to_string()));
        }
        let file = File::open(&path)?;
        let record = serde_json::from_reader(BufReader::new(file))?;
        Ok(record)
    }

    /// Applies a mutation to a record and persists the result.
    ///
    /// Read-modify-write; the single-writer-per-payment convention (only the
    /// owning monitor mutates a record) makes this safe without locking.
    pub fn update<F>(&self, payment_id: &str, mutator: F) -> StoreResult<PaymentRecord>
    where
        F: FnOnce(&mut PaymentRecord),
    {
        let mut record = self.get(payment_id)?;
        mutator(&mut record);
        self.write_json_atomic(&self.record_path(payment_id), &record)?;
        Ok(record)
    }

    /// Moves a record to a new status, validating the transition, then
    /// applies any extra field updates and persists the result.
    pub fn transition<F>(
        &self,
        payment_id: &str,
        next: PaymentStatus,
        mutator: F,
    ) -> StoreResult<PaymentRecord>
    where
        F: FnOnce(&mut PaymentRecord),
    {
        let mut record = self.get(payment_id)?;
        record.transition(next)?;
        mutator(&mut record);
        self.write_json_atomic(&self.record_path(payment_id), &record)?;
        Ok(record)
    }

    /// Lists records matching a filter, bounded scan.
    pub fn list(&self, filter: &ListFilter) -> StoreResult<Vec<PaymentRecord>> {
        let limit = if filter.limit == 0 {
            DEFAULT_LIST_LIMIT
        } else {
            filter.limit
        };

        let mut records = Vec::new();
        let dir = self.root.join("pending");
        for entry in fs::read_dir(&dir)? {
            if records.len() >= limit {
                break;
            }
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let file = match File::open(&path) {
                Ok(f) => f,
                Err(_) => continue,
            };
            let record: PaymentRecord = match serde_json::from_reader(BufReader::new(file)) {
                Ok(r) => r,
                Err(_) => continue, // skip unreadable entries, never abort the scan
            };
            if let Some(status) = filter.status {
                if record.status != status {
                    continue;
                }
            }
            if let Some(ref business_id) = filter.business_id {
                if record.business_id != *business_id {
                    continue;
                }
            }
            records.push(record);
        }
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(records)
    }

    /// Writes a JSON value atomically (temp file then rename).
    pub(crate) fn write_json_atomic<T: Serialize>(
        &self,
        path: &Path,
        value: &T,
    ) -> StoreResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let temp_path = path.with_extension("tmp");
        {
            let file = File::create(&temp_path)?;
            let mut writer = BufWriter::new(file);
            serde_json::to_writer_pretty(&mut writer, value)?;
            writer.flush()?;
        }
        fs::rename(&temp_path, path)?;
        Ok(())
    }

    /// Reads a JSON file into a typed value.
    pub(crate) fn read_json<T: DeserializeOwned>(&self, path: &Path) -> StoreResult<T> {
        let file = File::open(path)?;
        Ok(serde_json::from_reader(BufReader::new(file))?)
    }
}

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::StoreError;
use crate::models::{IncidentPatch, IncidentRow, Student};

pub const CHANGE_CHANNEL: &str = "incidents_changed";
pub const CHANGE_BUFFER: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

impl ChangeKind {
    /// Maps a trigger `TG_OP` payload. Anything unrecognised still counts as
    /// a change.
    pub fn from_op(op: &str) -> Self {
        match op.trim().to_ascii_uppercase().as_str() {
            "INSERT" => Self::Insert,
            "DELETE" => Self::Delete,
            _ => Self::Update,
        }
    }
}

/// A live stream of change notifications for the `incidents` table.
///
/// Dropping the feed stops the task that forwards notifications from the
/// store, which closes the store-level channel.
pub struct ChangeFeed {
    rx: mpsc::Receiver<ChangeKind>,
    forwarder: Option<JoinHandle<()>>,
}

impl ChangeFeed {
    pub fn new(rx: mpsc::Receiver<ChangeKind>, forwarder: Option<JoinHandle<()>>) -> Self {
        Self { rx, forwarder }
    }

    pub async fn recv(&mut self) -> Option<ChangeKind> {
        self.rx.recv().await
    }

    /// Drains whatever is already queued without waiting.
    pub fn drain_pending(&mut self) -> usize {
        let mut drained = 0;
        while self.rx.try_recv().is_ok() {
            drained += 1;
        }
        drained
    }
}

impl Drop for ChangeFeed {
    fn drop(&mut self) {
        if let Some(forwarder) = self.forwarder.take() {
            forwarder.abort();
        }
    }
}

#[async_trait]
pub trait IncidentStore: Send + Sync {
    /// All rows, newest first.
    async fn select_all(&self) -> Result<Vec<IncidentRow>, StoreError>;

    /// Inserts every row or none.
    async fn insert_many(&self, rows: &[IncidentRow]) -> Result<(), StoreError>;

    async fn update(&self, id: &str, patch: &IncidentPatch) -> Result<(), StoreError>;

    /// Returns `Ok` whether or not a row with `id` existed.
    async fn delete(&self, id: &str) -> Result<(), StoreError>;

    async fn changes(&self) -> Result<ChangeFeed, StoreError>;
}

#[async_trait]
pub trait StudentStore: Send + Sync {
    async fn all_students(&self) -> Result<Vec<Student>, StoreError>;

    /// Inserts or replaces by `ra`, returning the number of rows written.
    async fn upsert_students(&self, students: &[Student]) -> Result<u64, StoreError>;
}

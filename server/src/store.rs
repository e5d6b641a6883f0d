//! Durable player store boundary and the fire-and-forget write pipeline
//!
//! The store is the source of truth for "who exists and their durable score";
//! the in-memory registry is the source of truth for "who is connected". The
//! two may transiently disagree: all writes triggered by gameplay go through
//! a dedicated writer task and nothing on the event path ever waits for them.
//! A failed write is logged and dropped, never retried and never surfaced to
//! clients.

use log::warn;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Debug, Error)]
pub enum StoreError {
    /// The backing store refused or failed the operation.
    #[error("store rejected the operation: {0}")]
    Rejected(String),
    /// An update referenced a player the store has no record of.
    #[error("no durable record for player {0}")]
    MissingPlayer(String),
}

/// Durable status values mirrored to the store on session lifecycle edges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerStatus {
    Playing,
    Offline,
}

/// One durable row per player.
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerRecord {
    pub id: String,
    pub name: String,
    pub score: u32,
    pub streak: u32,
    pub status: PlayerStatus,
}

/// Abstract player store, injected into the registry so tests can swap in
/// their own implementations (including deliberately failing ones).
pub trait PlayerStore: Send + Sync {
    fn find_by_id(&self, player_id: &str) -> Result<Option<PlayerRecord>, StoreError>;
    fn update_status(&self, player_id: &str, status: PlayerStatus) -> Result<(), StoreError>;
    fn update_score(&self, player_id: &str, score: u32, streak: u32) -> Result<(), StoreError>;
}

/// Mutex-guarded map standing in for the real database. Used as the shipped
/// store for local play and as the test double everywhere else.
pub struct InMemoryPlayerStore {
    records: Mutex<HashMap<String, PlayerRecord>>,
}

impl InMemoryPlayerStore {
    pub fn new() -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
        }
    }

    /// Seeds a player record, replacing any existing one with the same id.
    pub fn insert(&self, record: PlayerRecord) {
        if let Ok(mut records) = self.records.lock() {
            records.insert(record.id.clone(), record);
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, PlayerRecord>>, StoreError> {
        self.records
            .lock()
            .map_err(|_| StoreError::Rejected("store lock poisoned".to_string()))
    }
}

impl Default for InMemoryPlayerStore {
    fn default() -> Self {
        Self::new()
    }
}

impl PlayerStore for InMemoryPlayerStore {
    fn find_by_id(&self, player_id: &str) -> Result<Option<PlayerRecord>, StoreError> {
        Ok(self.lock()?.get(player_id).cloned())
    }

    fn update_status(&self, player_id: &str, status: PlayerStatus) -> Result<(), StoreError> {
        let mut records = self.lock()?;
        let record = records
            .get_mut(player_id)
            .ok_or_else(|| StoreError::MissingPlayer(player_id.to_string()))?;
        record.status = status;
        Ok(())
    }

    fn update_score(&self, player_id: &str, score: u32, streak: u32) -> Result<(), StoreError> {
        let mut records = self.lock()?;
        let record = records
            .get_mut(player_id)
            .ok_or_else(|| StoreError::MissingPlayer(player_id.to_string()))?;
        record.score = score;
        record.streak = streak;
        Ok(())
    }
}

/// Commands drained by the store writer task
#[derive(Debug)]
enum StoreCommand {
    WriteStatus {
        player_id: String,
        status: PlayerStatus,
    },
    WriteScore {
        player_id: String,
        score: u32,
        streak: u32,
    },
    /// Acknowledged once every command queued before it has been applied (or
    /// failed). Only tests and shutdown paths wait on this.
    Flush(oneshot::Sender<()>),
}

/// Handle to the asynchronous store writer.
///
/// Queueing is synchronous and infallible from the caller's perspective;
/// the actual write happens later on the writer task and may fail without
/// the caller ever knowing. `flush` exists so the write stream is observable
/// where that matters (tests, shutdown) without the hot path awaiting it.
#[derive(Clone)]
pub struct StoreWriter {
    tx: mpsc::UnboundedSender<StoreCommand>,
}

impl StoreWriter {
    /// Spawns the writer task draining queued writes against `store`.
    pub fn spawn(store: Arc<dyn PlayerStore>) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            while let Some(command) = rx.recv().await {
                match command {
                    StoreCommand::WriteStatus { player_id, status } => {
                        if let Err(e) = store.update_status(&player_id, status) {
                            warn!("Dropped status write for {}: {}", player_id, e);
                        }
                    }
                    StoreCommand::WriteScore {
                        player_id,
                        score,
                        streak,
                    } => {
                        if let Err(e) = store.update_score(&player_id, score, streak) {
                            warn!("Dropped score write for {}: {}", player_id, e);
                        }
                    }
                    StoreCommand::Flush(ack) => {
                        // Receiver may have given up waiting; that's fine.
                        let _ = ack.send(());
                    }
                }
            }
        });

        Self { tx }
    }

    pub fn queue_status(&self, player_id: &str, status: PlayerStatus) {
        let command = StoreCommand::WriteStatus {
            player_id: player_id.to_string(),
            status,
        };
        if self.tx.send(command).is_err() {
            warn!("Store writer gone, status write for {} lost", player_id);
        }
    }

    pub fn queue_score(&self, player_id: &str, score: u32, streak: u32) {
        let command = StoreCommand::WriteScore {
            player_id: player_id.to_string(),
            score,
            streak,
        };
        if self.tx.send(command).is_err() {
            warn!("Store writer gone, score write for {} lost", player_id);
        }
    }

    /// Waits until every write queued before this call has been attempted.
    pub async fn flush(&self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.tx.send(StoreCommand::Flush(ack_tx)).is_err() {
            return;
        }
        let _ = ack_rx.await;
    }
}

//! Session registry: connection lifecycle and live player state
//!
//! This module owns the mapping from connection identity to live player
//! session, including:
//! - Join/leave lifecycle hydrated from and flushed to the durable store
//! - Live frequency updates streamed in from client-side pitch detection
//! - The ordered snapshot every broadcast is built from
//!
//! The registry is the single source of truth for who is connected right
//! now. The durable store lags behind it: status and score writes are queued
//! on the store writer and may land (or fail) well after the in-memory state
//! has moved on.

use crate::store::{PlayerRecord, PlayerStatus, PlayerStore, StoreError, StoreWriter};
use log::info;
use shared::{ConnectionId, PlayerView, DEFAULT_FREQUENCY};
use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum JoinError {
    /// The durable store has no record for the requested player.
    #[error("unknown player {0}")]
    UnknownPlayer(String),
    /// The durable store failed the lookup itself.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Live state for one connected player
///
/// `is_matched` is round-scoped: it only means anything relative to the
/// round it was last computed in, and is cleared whenever a round starts.
#[derive(Debug, Clone)]
pub struct PlayerSession {
    /// Identity in the durable store (distinct from the connection id).
    pub player_id: String,
    /// Display name, immutable for the session's lifetime.
    pub name: String,
    pub score: u32,
    pub streak: u32,
    /// Last reported measurement; A440 until the first update arrives.
    pub current_frequency: f64,
    pub is_matched: bool,
}

impl PlayerSession {
    /// Hydrates a session from its durable record.
    fn hydrate(record: &PlayerRecord) -> Self {
        Self {
            player_id: record.id.clone(),
            name: record.name.clone(),
            score: record.score,
            streak: record.streak,
            current_frequency: DEFAULT_FREQUENCY,
            is_matched: false,
        }
    }

    /// Public projection broadcast to clients.
    pub fn view(&self) -> PlayerView {
        PlayerView {
            id: self.player_id.clone(),
            name: self.name.clone(),
            score: self.score,
            streak: self.streak,
            current_frequency: self.current_frequency,
            is_matched: self.is_matched,
        }
    }
}

/// All live sessions, keyed by connection id
///
/// Keyed by connection rather than player identity: two connections carrying
/// the same player id get two independent sessions. An owned value injected
/// into the coordinator, never a process global, so tests can run sessions
/// in parallel.
pub struct SessionRegistry {
    sessions: HashMap<ConnectionId, PlayerSession>,
    store: Arc<dyn PlayerStore>,
    writer: StoreWriter,
}

impl SessionRegistry {
    pub fn new(store: Arc<dyn PlayerStore>, writer: StoreWriter) -> Self {
        Self {
            sessions: HashMap::new(),
            store,
            writer,
        }
    }

    /// Admits a connection as a player looked up in the durable store.
    ///
    /// The status write ("playing") is queued, not awaited; a failure there
    /// is logged by the writer and the join still succeeds. Joining an
    /// already-joined connection id replaces the previous session, which
    /// makes duplicate connect requests harmless.
    pub fn join(
        &mut self,
        connection_id: ConnectionId,
        player_id: &str,
    ) -> Result<&PlayerSession, JoinError> {
        let record = self
            .store
            .find_by_id(player_id)?
            .ok_or_else(|| JoinError::UnknownPlayer(player_id.to_string()))?;

        self.writer.queue_status(player_id, PlayerStatus::Playing);

        let session = PlayerSession::hydrate(&record);
        info!("Player {} [{}] joined", session.name, connection_id);

        let session = match self.sessions.entry(connection_id) {
            Entry::Occupied(mut occupied) => {
                occupied.insert(session);
                occupied.into_mut()
            }
            Entry::Vacant(vacant) => vacant.insert(session),
        };
        Ok(session)
    }

    /// Removes the session for a connection, queueing the final score and an
    /// "offline" status to the durable store.
    ///
    /// Safe to call any number of times: a connection that never joined or
    /// already left is a no-op returning `None`.
    pub fn leave(&mut self, connection_id: ConnectionId) -> Option<PlayerSession> {
        let session = self.sessions.remove(&connection_id)?;
        info!("Player {} [{}] left", session.name, connection_id);

        self.writer
            .queue_score(&session.player_id, session.score, session.streak);
        self.writer
            .queue_status(&session.player_id, PlayerStatus::Offline);

        Some(session)
    }

    /// Records the latest reported frequency for a connection.
    ///
    /// Returns whether a live session was found. The value is stored as
    /// received: the sensor pipeline upstream never validates, and clamping
    /// here would silently change match outcomes. Non-finite values settle
    /// as unmatched (the tolerance comparison is false for NaN).
    pub fn update_frequency(&mut self, connection_id: ConnectionId, frequency: f64) -> bool {
        if let Some(session) = self.sessions.get_mut(&connection_id) {
            session.current_frequency = frequency;
            true
        } else {
            false
        }
    }

    /// Ordered read-only projection of every live session, taken atomically.
    pub fn snapshot(&self) -> BTreeMap<ConnectionId, PlayerView> {
        self.sessions
            .iter()
            .map(|(id, session)| (*id, session.view()))
            .collect()
    }

    /// Clears the round-scoped match flag on every session.
    pub fn reset_matched(&mut self) {
        for session in self.sessions.values_mut() {
            session.is_matched = false;
        }
    }

    /// Mutable pass over all live sessions, used by round settlement.
    pub fn sessions_mut(&mut self) -> impl Iterator<Item = &mut PlayerSession> {
        self.sessions.values_mut()
    }

    /// Queues one durable score write per live session. Order across players
    /// is unspecified; each write carries a full (score, streak) pair so the
    /// writes commute.
    pub fn persist_scores(&self) {
        for session in self.sessions.values() {
            self.writer
                .queue_score(&session.player_id, session.score, session.streak);
        }
    }

    /// Returns the number of live sessions
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Returns true if no sessions are live
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

//! Session coordinator wiring inbound client intents to the round engine
//!
//! The coordinator is the single entry point for gameplay events. It owns
//! the registry and the round state machine outright (both injected at
//! construction, never globals) and runs on one logical thread of control:
//! the transport delivers events one at a time, so no two handler bodies
//! ever interleave and in-memory state needs no locking.
//!
//! Broadcasts go out only on the two phase-changing intents (start, submit).
//! Frequency updates arrive at sensor rate from every client; echoing each
//! one to everyone would swamp the channel for no gameplay benefit, so they
//! mutate silently and the next phase broadcast carries the latest values.

use crate::registry::SessionRegistry;
use crate::round::RoundStateMachine;
use log::{debug, error, info};
use shared::{ConnectionId, Packet};
use tokio::sync::mpsc;

pub struct SessionCoordinator {
    registry: SessionRegistry,
    round: RoundStateMachine,
    broadcast_tx: mpsc::UnboundedSender<Packet>,
}

impl SessionCoordinator {
    pub fn new(
        registry: SessionRegistry,
        round: RoundStateMachine,
        broadcast_tx: mpsc::UnboundedSender<Packet>,
    ) -> Self {
        Self {
            registry,
            round,
            broadcast_tx,
        }
    }

    /// Admits a connection as a player. Returns whether a session now exists.
    ///
    /// A refused join (unknown player, store failure) leaves game state
    /// untouched and broadcasts nothing; the transport may still answer the
    /// one connection that asked.
    pub fn on_connect(&mut self, connection_id: ConnectionId, player_id: &str) -> bool {
        match self.registry.join(connection_id, player_id) {
            Ok(_) => true,
            Err(e) => {
                info!("Join refused for connection {}: {}", connection_id, e);
                false
            }
        }
    }

    /// Tears down the session for a connection, if any. Idempotent.
    pub fn on_disconnect(&mut self, connection_id: ConnectionId) {
        self.registry.leave(connection_id);
    }

    /// Starts a round and broadcasts the resulting snapshot.
    ///
    /// The broadcast happens whether or not the round actually transitioned:
    /// a duplicate or late requester still gets the authoritative state.
    pub fn on_start_round(&mut self) {
        self.round.start_round(&mut self.registry);
        self.broadcast_state();
    }

    /// Settles the round and broadcasts the post-settlement snapshot.
    ///
    /// By the time the broadcast is queued, every durable score write has
    /// been issued (not necessarily acknowledged). The idle no-op case still
    /// answers with a snapshot so a double-submitting client stays synced.
    pub fn on_submit_round(&mut self) {
        self.round.settle_round(&mut self.registry);
        self.broadcast_state();
    }

    /// Records a frequency measurement for one connection. No broadcast.
    pub fn on_player_update(&mut self, connection_id: ConnectionId, frequency: f64) {
        if !self.registry.update_frequency(connection_id, frequency) {
            // Stale event: update raced ahead of join or behind leave.
            debug!(
                "Ignoring frequency update for unknown connection {}",
                connection_id
            );
        }
    }

    /// Current authoritative state as a broadcastable packet.
    pub fn state_packet(&self) -> Packet {
        Packet::GameStateUpdate {
            round_active: self.round.is_active(),
            target_frequency: self.round.target_frequency(),
            players: self.registry.snapshot(),
        }
    }

    fn broadcast_state(&self) {
        if self.broadcast_tx.send(self.state_packet()).is_err() {
            error!("Broadcast channel closed, dropping state update");
        }
    }
}

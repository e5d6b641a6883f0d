//! # Frequency-Match Game Server Library
//!
//! Authoritative server-side session for the "match the frequency" minigame.
//! Clients continuously report a measured frequency (computed by their own
//! signal-processing pipeline); the server holds one shared target frequency
//! per round and scores everyone who lands within tolerance when the round
//! is submitted.
//!
//! ## Core Responsibilities
//!
//! ### Round Lifecycle
//! One shared round cycles idle -> active -> idle. Starting a round draws a
//! fresh target from the configured band; submitting it runs the single
//! scoring pass. There is no round timer: an active round waits indefinitely
//! for a submit.
//!
//! ### Player Synchronization
//! Every phase change broadcasts one full state snapshot to all connected
//! clients, so late joiners and duplicate requesters always converge on the
//! authoritative state. Per-player frequency updates are absorbed silently.
//!
//! ### Durable Reconciliation
//! Player records (score, streak, status) live in an external store that
//! lags the in-memory session state. All gameplay writes are fire-and-forget
//! through a dedicated writer task; in-memory state is authoritative and a
//! failed write never disturbs a running session.
//!
//! ## Architecture Design
//!
//! The main loop processes inbound events one at a time on a single logical
//! thread of control, so the registry and round state need no locking. The
//! only real concurrency is between that loop and the asynchronous store
//! writes, which is an accepted eventual-consistency window.
//!
//! ## Module Organization
//!
//! - [`store`]: durable player store trait, in-memory implementation and
//!   the fire-and-forget store writer task.
//! - [`registry`]: live sessions keyed by connection id; join, leave,
//!   frequency updates, ordered snapshots.
//! - [`round`]: the round state machine and the match/scoring algorithm.
//! - [`coordinator`]: maps the three inbound client intents onto the
//!   registry and round, and emits state broadcasts.
//! - [`network`]: UDP transport shell, connection table, timeout checker
//!   and the main event loop.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::coordinator::SessionCoordinator;
//! use server::network::Server;
//! use server::registry::SessionRegistry;
//! use server::round::RoundStateMachine;
//! use server::store::{InMemoryPlayerStore, PlayerStore, StoreWriter};
//! use shared::GameConfig;
//! use std::sync::Arc;
//! use tokio::sync::mpsc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store: Arc<dyn PlayerStore> = Arc::new(InMemoryPlayerStore::new());
//!     let writer = StoreWriter::spawn(Arc::clone(&store));
//!
//!     let registry = SessionRegistry::new(store, writer);
//!     let round = RoundStateMachine::new(GameConfig::default());
//!
//!     let (broadcast_tx, broadcast_rx) = mpsc::unbounded_channel();
//!     let coordinator = SessionCoordinator::new(registry, round, broadcast_tx);
//!
//!     let mut server = Server::new("127.0.0.1:8080", coordinator, broadcast_rx, 32).await?;
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

pub mod coordinator;
pub mod network;
pub mod registry;
pub mod round;
pub mod store;

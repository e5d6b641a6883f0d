use clap::Parser;
use log::info;
use server::coordinator::SessionCoordinator;
use server::network::Server;
use server::registry::SessionRegistry;
use server::round::RoundStateMachine;
use server::store::{InMemoryPlayerStore, PlayerRecord, PlayerStatus, PlayerStore, StoreWriter};
use shared::GameConfig;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Authoritative server for the frequency-matching minigame
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Server IP address to bind to
    #[clap(short = 'H', long, default_value = "127.0.0.1")]
    host: String,
    /// Server port to listen on
    #[clap(short, long, default_value = "8080")]
    port: u16,
    /// Maximum number of concurrent connections
    #[clap(short, long, default_value = "32")]
    max_connections: usize,
    /// Maximum absolute frequency difference still counted as a match
    #[clap(long, default_value_t = shared::DEFAULT_FREQUENCY_TOLERANCE)]
    tolerance: f64,
    /// Lower bound of the target frequency band
    #[clap(long, default_value_t = shared::DEFAULT_TARGET_BAND_MIN)]
    band_min: f64,
    /// Upper bound of the target frequency band
    #[clap(long, default_value_t = shared::DEFAULT_TARGET_BAND_MAX)]
    band_max: f64,
    /// Base score awarded for a match, before the streak bonus
    #[clap(long, default_value_t = shared::DEFAULT_SCORE_INCREMENT)]
    score_increment: u32,
    /// Players to seed the in-memory store with, as id:name pairs
    /// (e.g. "p-1:Alice,p-2:Bob")
    #[clap(long, default_value = "")]
    roster: String,
}

fn seed_store(store: &InMemoryPlayerStore, roster: &str) -> usize {
    let mut seeded = 0;
    for entry in roster.split(',').filter(|e| !e.is_empty()) {
        if let Some((id, name)) = entry.split_once(':') {
            store.insert(PlayerRecord {
                id: id.trim().to_string(),
                name: name.trim().to_string(),
                score: 0,
                streak: 0,
                status: PlayerStatus::Offline,
            });
            seeded += 1;
        } else {
            eprintln!("Ignoring malformed roster entry: {}", entry);
        }
    }
    seeded
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let args = Args::parse();

    let config = GameConfig {
        frequency_tolerance: args.tolerance,
        target_band_min: args.band_min,
        target_band_max: args.band_max,
        score_increment: args.score_increment,
    };

    let store = Arc::new(InMemoryPlayerStore::new());
    let seeded = seed_store(&store, &args.roster);
    info!("Seeded {} player records", seeded);

    let store: Arc<dyn PlayerStore> = store;
    let writer = StoreWriter::spawn(Arc::clone(&store));

    let registry = SessionRegistry::new(store, writer);
    let round = RoundStateMachine::new(config);

    let (broadcast_tx, broadcast_rx) = mpsc::unbounded_channel();
    let coordinator = SessionCoordinator::new(registry, round, broadcast_tx);

    let address = format!("{}:{}", args.host, args.port);
    let mut server = Server::new(&address, coordinator, broadcast_rx, args.max_connections).await?;

    tokio::select! {
        result = server.run() => {
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}

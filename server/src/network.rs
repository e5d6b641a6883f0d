//! Server network layer handling UDP transport and the main event loop
//!
//! Everything in here is collaborator plumbing around the coordinator: a
//! connection table mapping addresses to connection ids, a receiver task, a
//! sender task draining the outbound queue, and a timeout checker. Inbound
//! events reach the coordinator strictly one at a time through the main
//! `select!` loop, which is what makes the game state race-free without
//! locks.

use crate::coordinator::SessionCoordinator;
use bincode::{deserialize, serialize};
use log::{debug, error, info, warn};
use shared::{ConnectionId, Packet};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, RwLock};

/// Messages sent from transport tasks to the main loop
#[derive(Debug)]
pub enum ServerMessage {
    PacketReceived {
        packet: Packet,
        addr: SocketAddr,
    },
    ConnectionTimeout {
        connection_id: ConnectionId,
    },
    #[allow(dead_code)]
    Shutdown,
}

/// Outbound work drained by the sender task
#[derive(Debug)]
pub enum OutboundMessage {
    Send { packet: Packet, addr: SocketAddr },
    Broadcast { packet: Packet },
}

/// One live transport connection
#[derive(Debug)]
pub struct Connection {
    pub addr: SocketAddr,
    /// Last time any packet arrived from this address.
    pub last_seen: Instant,
}

impl Connection {
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            last_seen: Instant::now(),
        }
    }

    pub fn is_timed_out(&self, timeout: Duration) -> bool {
        self.last_seen.elapsed() > timeout
    }
}

/// Address <-> connection-id bookkeeping for the UDP socket
///
/// Connection ids come from a monotonic counter and are never reused, so a
/// reconnecting client always gets a fresh identity. The table only knows
/// about transport liveness; player sessions live in the registry.
pub struct ConnectionTable {
    connections: HashMap<ConnectionId, Connection>,
    next_connection_id: ConnectionId,
    max_connections: usize,
}

impl ConnectionTable {
    pub fn new(max_connections: usize) -> Self {
        Self {
            connections: HashMap::new(),
            next_connection_id: 1,
            max_connections,
        }
    }

    /// Registers a new connection, or None when at capacity.
    pub fn add(&mut self, addr: SocketAddr) -> Option<ConnectionId> {
        if self.connections.len() >= self.max_connections {
            return None;
        }

        let connection_id = self.next_connection_id;
        self.next_connection_id += 1;

        info!("Connection {} opened from {}", connection_id, addr);
        self.connections.insert(connection_id, Connection::new(addr));
        Some(connection_id)
    }

    pub fn remove(&mut self, connection_id: ConnectionId) -> bool {
        if self.connections.remove(&connection_id).is_some() {
            info!("Connection {} closed", connection_id);
            true
        } else {
            false
        }
    }

    pub fn find_by_addr(&self, addr: SocketAddr) -> Option<ConnectionId> {
        self.connections
            .iter()
            .find(|(_, connection)| connection.addr == addr)
            .map(|(id, _)| *id)
    }

    /// Marks a connection as recently active.
    pub fn touch(&mut self, connection_id: ConnectionId) {
        if let Some(connection) = self.connections.get_mut(&connection_id) {
            connection.last_seen = Instant::now();
        }
    }

    /// Removes and returns all connections quiet for longer than `timeout`.
    pub fn check_timeouts(&mut self, timeout: Duration) -> Vec<ConnectionId> {
        let timed_out: Vec<ConnectionId> = self
            .connections
            .iter()
            .filter(|(_, connection)| connection.is_timed_out(timeout))
            .map(|(id, _)| *id)
            .collect();

        for connection_id in &timed_out {
            self.remove(*connection_id);
        }

        timed_out
    }

    pub fn addrs(&self) -> Vec<(ConnectionId, SocketAddr)> {
        self.connections
            .iter()
            .map(|(id, connection)| (*id, connection.addr))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    #[cfg(test)]
    fn backdate(&mut self, connection_id: ConnectionId, age: Duration) {
        if let Some(connection) = self.connections.get_mut(&connection_id) {
            connection.last_seen = Instant::now() - age;
        }
    }
}

const CONNECTION_TIMEOUT: Duration = Duration::from_secs(5);

/// UDP server wrapping the coordinator
pub struct Server {
    socket: Arc<UdpSocket>,
    connections: Arc<RwLock<ConnectionTable>>,
    coordinator: SessionCoordinator,

    // Communication channels
    server_tx: mpsc::UnboundedSender<ServerMessage>,
    server_rx: mpsc::UnboundedReceiver<ServerMessage>,
    outbound_tx: mpsc::UnboundedSender<OutboundMessage>,
    outbound_rx: mpsc::UnboundedReceiver<OutboundMessage>,
    broadcast_rx: mpsc::UnboundedReceiver<Packet>,
}

impl Server {
    /// Binds the socket and wires the coordinator's broadcast stream in.
    ///
    /// `broadcast_rx` is the receiving end of the channel the coordinator
    /// was built with; the main loop forwards it to every connected client.
    pub async fn new(
        addr: &str,
        coordinator: SessionCoordinator,
        broadcast_rx: mpsc::UnboundedReceiver<Packet>,
        max_connections: usize,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let socket = Arc::new(UdpSocket::bind(addr).await?);
        info!("Server listening on {}", socket.local_addr()?);

        let (server_tx, server_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();

        Ok(Server {
            socket,
            connections: Arc::new(RwLock::new(ConnectionTable::new(max_connections))),
            coordinator,
            server_tx,
            server_rx,
            outbound_tx,
            outbound_rx,
            broadcast_rx,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Spawns task that continuously listens for incoming packets
    fn spawn_network_receiver(&self) {
        let socket = Arc::clone(&self.socket);
        let server_tx = self.server_tx.clone();

        tokio::spawn(async move {
            let mut buffer = [0u8; 2048];

            loop {
                match socket.recv_from(&mut buffer).await {
                    Ok((len, addr)) => {
                        if let Ok(packet) = deserialize::<Packet>(&buffer[0..len]) {
                            if server_tx
                                .send(ServerMessage::PacketReceived { packet, addr })
                                .is_err()
                            {
                                break;
                            }
                        } else {
                            warn!("Failed to deserialize packet from {}", addr);
                        }
                    }
                    Err(e) => {
                        error!("Error receiving packet: {}", e);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                }
            }
        });
    }

    /// Spawns task that drains the outbound packet queue
    fn spawn_network_sender(&mut self) {
        let socket = Arc::clone(&self.socket);
        let connections = Arc::clone(&self.connections);
        let mut outbound_rx = std::mem::replace(&mut self.outbound_rx, mpsc::unbounded_channel().1);

        tokio::spawn(async move {
            while let Some(message) = outbound_rx.recv().await {
                match message {
                    OutboundMessage::Send { packet, addr } => {
                        if let Err(e) = Self::send_packet_impl(&socket, &packet, addr).await {
                            error!("Failed to send packet to {}: {}", addr, e);
                        }
                    }
                    OutboundMessage::Broadcast { packet } => {
                        let addrs = {
                            let connections_guard = connections.read().await;
                            connections_guard.addrs()
                        };

                        for (connection_id, addr) in addrs {
                            if let Err(e) = Self::send_packet_impl(&socket, &packet, addr).await {
                                error!("Failed to send to connection {}: {}", connection_id, e);
                            }
                        }
                    }
                }
            }
        });
    }

    /// Spawns task that monitors connection timeouts
    fn spawn_timeout_checker(&self) {
        let connections = Arc::clone(&self.connections);
        let server_tx = self.server_tx.clone();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(1));

            loop {
                interval.tick().await;

                let timed_out = {
                    let mut connections_guard = connections.write().await;
                    connections_guard.check_timeouts(CONNECTION_TIMEOUT)
                };

                for connection_id in timed_out {
                    if server_tx
                        .send(ServerMessage::ConnectionTimeout { connection_id })
                        .is_err()
                    {
                        return;
                    }
                }
            }
        });
    }

    async fn send_packet_impl(
        socket: &UdpSocket,
        packet: &Packet,
        addr: SocketAddr,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let data = serialize(packet)?;
        socket.send_to(&data, addr).await?;
        Ok(())
    }

    fn send_packet(&self, packet: Packet, addr: SocketAddr) {
        if self
            .outbound_tx
            .send(OutboundMessage::Send { packet, addr })
            .is_err()
        {
            error!("Failed to queue packet for {}", addr);
        }
    }

    fn queue_broadcast(&self, packet: Packet) {
        if self
            .outbound_tx
            .send(OutboundMessage::Broadcast { packet })
            .is_err()
        {
            error!("Failed to queue broadcast packet");
        }
    }

    /// Routes one inbound packet to the coordinator
    async fn handle_packet(&mut self, packet: Packet, addr: SocketAddr) {
        match packet {
            Packet::Connect { player_id } => {
                info!("Connect from {} as player {}", addr, player_id);

                // A reconnect from the same address tears down the old
                // connection first.
                let existing = {
                    let connections = self.connections.read().await;
                    connections.find_by_addr(addr)
                };
                if let Some(existing_id) = existing {
                    let mut connections = self.connections.write().await;
                    connections.remove(existing_id);
                    drop(connections);
                    self.coordinator.on_disconnect(existing_id);
                }

                let connection_id = {
                    let mut connections = self.connections.write().await;
                    connections.add(addr)
                };

                match connection_id {
                    Some(connection_id) => {
                        if self.coordinator.on_connect(connection_id, &player_id) {
                            self.send_packet(Packet::Connected { connection_id }, addr);
                        }
                        // A refused join is silent: the connection stays open
                        // without a session and may retry with another id.
                    }
                    None => {
                        self.send_packet(
                            Packet::Disconnected {
                                reason: "Server full".to_string(),
                            },
                            addr,
                        );
                    }
                }
            }

            Packet::Disconnect => {
                let connection_id = {
                    let connections = self.connections.read().await;
                    connections.find_by_addr(addr)
                };

                if let Some(connection_id) = connection_id {
                    let mut connections = self.connections.write().await;
                    connections.remove(connection_id);
                    drop(connections);
                    self.coordinator.on_disconnect(connection_id);
                }
            }

            Packet::StartRound => {
                if let Some(connection_id) = self.known_connection(addr).await {
                    self.touch(connection_id).await;
                    self.coordinator.on_start_round();
                }
            }

            Packet::SubmitRound => {
                if let Some(connection_id) = self.known_connection(addr).await {
                    self.touch(connection_id).await;
                    self.coordinator.on_submit_round();
                }
            }

            Packet::PlayerUpdate { frequency } => {
                if let Some(connection_id) = self.known_connection(addr).await {
                    self.touch(connection_id).await;
                    self.coordinator.on_player_update(connection_id, frequency);
                }
            }

            _ => {
                warn!("Unexpected packet type from {}", addr);
            }
        }
    }

    async fn known_connection(&self, addr: SocketAddr) -> Option<ConnectionId> {
        let connections = self.connections.read().await;
        let found = connections.find_by_addr(addr);
        if found.is_none() {
            debug!("Dropping packet from unconnected address {}", addr);
        }
        found
    }

    async fn touch(&self, connection_id: ConnectionId) {
        let mut connections = self.connections.write().await;
        connections.touch(connection_id);
    }

    /// Main server loop coordinating all operations
    ///
    /// Purely event-driven: there is no tick. State changes only when a
    /// packet arrives or a connection times out, and broadcasts go out only
    /// when the coordinator emits one.
    pub async fn run(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        self.spawn_network_receiver();
        self.spawn_network_sender();
        self.spawn_timeout_checker();

        info!("Server started successfully");

        loop {
            tokio::select! {
                message = self.server_rx.recv() => {
                    match message {
                        Some(ServerMessage::PacketReceived { packet, addr }) => {
                            self.handle_packet(packet, addr).await;
                        },
                        Some(ServerMessage::ConnectionTimeout { connection_id }) => {
                            warn!("Connection {} timed out", connection_id);
                            self.coordinator.on_disconnect(connection_id);
                        },
                        Some(ServerMessage::Shutdown) | None => {
                            info!("Server shutting down");
                            break;
                        }
                    }
                },

                broadcast = self.broadcast_rx.recv() => {
                    match broadcast {
                        Some(packet) => self.queue_broadcast(packet),
                        None => {
                            info!("Broadcast channel closed, shutting down");
                            break;
                        }
                    }
                },
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_addr() -> SocketAddr {
        "127.0.0.1:8080".parse().unwrap()
    }

    fn test_addr2() -> SocketAddr {
        "127.0.0.1:8081".parse().unwrap()
    }

    #[test]
    fn test_connection_timeout() {
        let mut connection = Connection::new(test_addr());
        assert!(!connection.is_timed_out(Duration::from_secs(1)));

        connection.last_seen = Instant::now() - Duration::from_secs(2);
        assert!(connection.is_timed_out(Duration::from_secs(1)));
    }

    #[test]
    fn test_table_add_and_remove() {
        let mut table = ConnectionTable::new(4);
        assert!(table.is_empty());

        let id = table.add(test_addr()).unwrap();
        assert_eq!(id, 1);
        assert_eq!(table.len(), 1);

        assert!(table.remove(id));
        assert!(!table.remove(id));
        assert!(table.is_empty());
    }

    #[test]
    fn test_table_ids_are_never_reused() {
        let mut table = ConnectionTable::new(4);

        let first = table.add(test_addr()).unwrap();
        table.remove(first);

        let second = table.add(test_addr()).unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn test_table_capacity() {
        let mut table = ConnectionTable::new(1);

        assert!(table.add(test_addr()).is_some());
        assert!(table.add(test_addr2()).is_none());
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_find_by_addr() {
        let mut table = ConnectionTable::new(4);
        let id = table.add(test_addr()).unwrap();

        assert_eq!(table.find_by_addr(test_addr()), Some(id));
        assert_eq!(table.find_by_addr(test_addr2()), None);
    }

    #[test]
    fn test_check_timeouts() {
        let mut table = ConnectionTable::new(4);
        let stale = table.add(test_addr()).unwrap();
        let fresh = table.add(test_addr2()).unwrap();

        table.backdate(stale, Duration::from_secs(10));

        let timed_out = table.check_timeouts(Duration::from_secs(5));
        assert_eq!(timed_out, vec![stale]);
        assert_eq!(table.len(), 1);
        assert_eq!(table.find_by_addr(test_addr2()), Some(fresh));
    }

    #[test]
    fn test_touch_resets_timeout() {
        let mut table = ConnectionTable::new(4);
        let id = table.add(test_addr()).unwrap();

        table.backdate(id, Duration::from_secs(10));
        table.touch(id);

        assert!(table.check_timeouts(Duration::from_secs(5)).is_empty());
        assert_eq!(table.len(), 1);
    }
}

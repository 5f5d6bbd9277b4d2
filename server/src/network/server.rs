//! Game server: the connection table and the tick loop that owns the world.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use log::{debug, error, info, warn};
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::time::MissedTickBehavior;

use realm_shared::{
    decode_frame, encode_frame, ClientMessage, Frame, InstanceId, IntroOpcode, NetworkOpcode, Notice, ServerMessage,
};

use crate::config::ServerConfig;
use crate::entities::Player;
use crate::persistence::{AuthError, LoadError, PersistenceHandle, PlayerRecord, RegisterError};
use crate::world::{PlayerAction, World};

use super::connection::{self, ConnectionId, Login, NetEvent, Outbound};

/// Longest accepted username, in characters
const MAX_USERNAME_LENGTH: usize = 32;

/// Where a connection is in the login sequence
#[derive(Debug)]
enum ConnectionState {
    /// Handshake sent, waiting for `Intro`
    Connected,
    /// Credentials are being checked in the background
    Authenticating { username: String },
    /// `Welcome` sent, waiting for `Ready`
    Welcomed(Box<Player>),
    InGame { player: InstanceId },
}

/// Client connection state
#[derive(Debug)]
struct ClientConnection {
    addr: SocketAddr,
    sender: UnboundedSender<Outbound>,
    state: ConnectionState,
    last_seen: Instant,
    strikes: u32,
    /// Envelopes flushed as one frame at the end of the tick
    pending: Vec<Value>,
    /// The writer task is gone
    broken: bool,
}

impl ClientConnection {
    fn new(addr: SocketAddr, sender: UnboundedSender<Outbound>) -> Self {
        Self {
            addr,
            sender,
            state: ConnectionState::Connected,
            last_seen: Instant::now(),
            strikes: 0,
            pending: Vec::new(),
            broken: false,
        }
    }

    fn is_timed_out(&self, timeout: Duration) -> bool {
        self.last_seen.elapsed() >= timeout
    }

    fn player_id(&self) -> Option<InstanceId> {
        match self.state {
            ConnectionState::InGame { player } => Some(player),
            _ => None,
        }
    }

    /// Logging in but not yet in the world
    fn is_joining(&self) -> bool {
        matches!(self.state, ConnectionState::Authenticating { .. } | ConnectionState::Welcomed(_))
    }

    fn claims(&self, username: &str) -> bool {
        match &self.state {
            ConnectionState::Authenticating { username: name } => name == username,
            ConnectionState::Welcomed(player) => player.username == username,
            _ => false,
        }
    }
}

/// Game server
pub struct Server {
    config: ServerConfig,
    world: World,
    persistence: Option<PersistenceHandle>,
    clients: HashMap<ConnectionId, ClientConnection>,
    sessions: HashMap<InstanceId, ConnectionId>,
    events: UnboundedSender<NetEvent>,
    incoming: UnboundedReceiver<NetEvent>,
    last_save: Instant,
}

impl Server {
    /// Create a server around a populated world. Without persistence every
    /// login is accepted and nothing is saved.
    pub fn new(config: ServerConfig, world: World, persistence: Option<PersistenceHandle>) -> Self {
        let (events, incoming) = mpsc::unbounded_channel();
        Self {
            config,
            world,
            persistence,
            clients: HashMap::new(),
            sessions: HashMap::new(),
            events,
            incoming,
            last_save: Instant::now(),
        }
    }

    /// Accept connections and tick until Ctrl-C
    pub async fn run(mut self) -> std::io::Result<()> {
        let addr = self.config.listen_addr();
        let listener = TcpListener::bind(&addr).await?;
        info!("Listening on ws://{}", addr);
        tokio::spawn(connection::listen(listener, self.events.clone()));

        let mut ticker = tokio::time::interval(Duration::from_millis(self.config.world.tick_ms()));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let shutdown = tokio::signal::ctrl_c();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = ticker.tick() => self.tick(),
                _ = &mut shutdown => {
                    info!("Shutdown requested");
                    break;
                }
            }
        }

        self.shutdown().await;
        Ok(())
    }

    /// One server tick: events, simulation, one frame per connection, then
    /// housekeeping
    pub fn tick(&mut self) {
        let started = Instant::now();

        while let Ok(event) = self.incoming.try_recv() {
            self.handle_event(event);
        }
        self.world.update();
        self.flush();
        self.sweep();

        if self.last_save.elapsed() >= Duration::from_secs(self.config.world.save_interval_secs) {
            self.save_all();
            self.last_save = Instant::now();
        }

        let elapsed = started.elapsed();
        if elapsed > Duration::from_millis(self.config.world.tick_ms()) {
            warn!("Tick {} took {:?}", self.world.tick(), elapsed);
        }
    }

    fn handle_event(&mut self, event: NetEvent) {
        match event {
            NetEvent::Connected { id, addr, sender } => {
                self.clients.insert(id, ClientConnection::new(addr, sender));
                let handshake = ServerMessage::Handshake { client_id: id, dev: self.config.net.dev_client };
                self.queue(id, &handshake);
            }
            NetEvent::Message { id, text } => self.handle_frame(id, &text),
            NetEvent::LoginResult { id, result } => self.finish_login(id, result),
            NetEvent::Disconnected { id } => self.disconnect(id),
        }
    }

    // =========================================================================
    // Incoming
    // =========================================================================

    fn handle_frame(&mut self, id: ConnectionId, text: &str) {
        let Some(client) = self.clients.get_mut(&id) else {
            return;
        };
        client.last_seen = Instant::now();

        let envelopes = match decode_frame(text) {
            Ok(Frame::Envelopes(envelopes)) => envelopes,
            Ok(Frame::Notice(notice)) => {
                self.strike(id, &format!("unexpected bare string '{}'", notice));
                return;
            }
            Err(e) => {
                self.strike(id, &e.to_string());
                return;
            }
        };

        for envelope in &envelopes {
            match ClientMessage::from_value(envelope) {
                Ok(message) => self.handle_message(id, message),
                Err(e) => self.strike(id, &e.to_string()),
            }
            if !self.clients.contains_key(&id) {
                break;
            }
        }
    }

    fn handle_message(&mut self, id: ConnectionId, message: ClientMessage) {
        let Some(client) = self.clients.get(&id) else {
            return;
        };
        let player = client.player_id();
        let awaiting_intro = matches!(client.state, ConnectionState::Connected);
        let awaiting_ready = matches!(client.state, ConnectionState::Welcomed(_));

        match message {
            ClientMessage::Network(NetworkOpcode::Ping) => {
                self.queue(id, &ServerMessage::Network(NetworkOpcode::Pong));
            }
            ClientMessage::Network(NetworkOpcode::Pong) => {}
            ClientMessage::Intro { kind, username, password, email } if awaiting_intro => {
                self.handle_intro(id, kind, &username, password, email);
            }
            ClientMessage::Ready if awaiting_ready => self.enter_world(id),
            message => match (player, PlayerAction::from_client(&message)) {
                (Some(player), Some(action)) => self.world.queue_action(player, action),
                _ => self.strike(id, &format!("unexpected {:?} packet", message.packet())),
            },
        }
    }

    /// Counts a protocol error against the connection, closing it at the limit
    fn strike(&mut self, id: ConnectionId, reason: &str) {
        let limit = self.config.net.max_protocol_strikes;
        let Some(client) = self.clients.get_mut(&id) else {
            return;
        };
        client.strikes += 1;
        warn!("Protocol error from connection {} ({}): {}", id, client.addr, reason);

        if client.strikes >= limit {
            warn!("Connection {} reached {} protocol errors, closing", id, limit);
            self.close(id, None);
        }
    }

    // =========================================================================
    // Login
    // =========================================================================

    fn handle_intro(
        &mut self,
        id: ConnectionId,
        kind: IntroOpcode,
        username: &str,
        password: String,
        email: Option<String>,
    ) {
        let guest = kind == IntroOpcode::Guest;
        let username = if guest { format!("guest{}", id) } else { username.trim().to_lowercase() };

        if username.is_empty() || username.chars().count() > MAX_USERNAME_LENGTH {
            self.close(id, Some(Notice::InvalidLogin));
            return;
        }
        if self.is_full() {
            info!("Turning away connection {}: world is full", id);
            self.close(id, Some(Notice::Full));
            return;
        }
        if self.is_logged_in(&username, id) {
            info!("'{}' is already logged in", username);
            self.close(id, Some(Notice::LoggedIn));
            return;
        }

        let spawn = self.world.content().map.spawn;
        let mut record = PlayerRecord::new(&username, (spawn.x, spawn.y));
        record.account.email = email;
        if let Some(client) = self.clients.get_mut(&id) {
            client.state = ConnectionState::Authenticating { username: username.clone() };
        }
        info!("Connection {} logging in as '{}' ({:?})", id, username, kind);

        let persistence = match &self.persistence {
            Some(persistence) if !guest => persistence.clone(),
            _ => {
                self.finish_login(id, Ok(Login { record, guest }));
                return;
            }
        };

        let events = self.events.clone();
        tokio::spawn(async move {
            let result = match kind {
                IntroOpcode::Register => register(&persistence, &password, record).await,
                _ => login(&persistence, &username, &password, record).await,
            };
            let _ = events.send(NetEvent::LoginResult { id, result });
        });
    }

    fn finish_login(&mut self, id: ConnectionId, result: Result<Login, Notice>) {
        let Some(client) = self.clients.get(&id) else {
            debug!("Login result for closed connection {}", id);
            return;
        };
        if !matches!(client.state, ConnectionState::Authenticating { .. }) {
            return;
        }

        let login = match result {
            Ok(login) => login,
            Err(notice) => {
                info!("Connection {} rejected: {}", id, notice.as_str());
                self.close(id, Some(notice));
                return;
            }
        };
        let account = &login.record.account;
        if account.ban > unix_millis() {
            info!("Banned account '{}' tried to log in", account.username);
            self.close(id, Some(Notice::Ban));
            return;
        }
        if self.is_logged_in(&account.username, id) {
            self.close(id, Some(Notice::LoggedIn));
            return;
        }

        let player_id = self.world.allocate_id();
        let player = Player::from_record(player_id, &login.record, self.world.content(), login.guest);
        if let (Some(persistence), false) = (&self.persistence, login.guest) {
            persistence.update_last_login(account.id);
        }

        self.queue(id, &ServerMessage::Welcome(player.welcome_info()));
        if let Some(client) = self.clients.get_mut(&id) {
            client.state = ConnectionState::Welcomed(Box::new(player));
        }
    }

    /// `Ready` after `Welcome`: the player appears in the world
    fn enter_world(&mut self, id: ConnectionId) {
        let Some(client) = self.clients.get_mut(&id).filter(|c| matches!(c.state, ConnectionState::Welcomed(_))) else {
            return;
        };
        let ConnectionState::Welcomed(player) = std::mem::replace(&mut client.state, ConnectionState::Connected) else {
            return;
        };
        let player_id = player.id();
        let username = player.username.clone();

        match self.world.add_player(*player) {
            Ok(()) => {
                client.state = ConnectionState::InGame { player: player_id };
                self.sessions.insert(player_id, id);
                info!("'{}' joined as {} from {}", username, player_id, client.addr);
            }
            Err(e) => {
                error!("Could not place '{}' in the world: {}", username, e);
                self.close(id, None);
            }
        }
    }

    fn is_full(&self) -> bool {
        let joining = self.clients.values().filter(|c| c.is_joining()).count();
        self.world.population() + joining >= self.config.net.max_players
    }

    fn is_logged_in(&self, username: &str, except: ConnectionId) -> bool {
        self.world.is_online(username) || self.clients.iter().any(|(other, c)| *other != except && c.claims(username))
    }

    // =========================================================================
    // Outgoing
    // =========================================================================

    fn queue(&mut self, id: ConnectionId, message: &ServerMessage) {
        if let Some(client) = self.clients.get_mut(&id) {
            client.pending.push(message.to_value());
        }
    }

    /// Routes the world outbox and writes one frame per connection
    fn flush(&mut self) {
        for (player, message) in self.world.drain_outbox() {
            let Some(connection) = self.sessions.get(&player) else {
                continue;
            };
            if let Some(client) = self.clients.get_mut(connection) {
                client.pending.push(message.to_value());
            }
        }

        for (id, client) in &mut self.clients {
            let envelopes = std::mem::take(&mut client.pending);
            let Some(frame) = encode_frame(&envelopes) else {
                continue;
            };
            if client.sender.send(Outbound::Text(frame)).is_err() {
                debug!("Writer for connection {} is gone", id);
                client.broken = true;
            }
        }
    }

    /// Sends a reason string if given, then closes and forgets the connection
    fn close(&mut self, id: ConnectionId, notice: Option<Notice>) {
        if let Some(client) = self.clients.get(&id) {
            if let Some(notice) = notice {
                let _ = client.sender.send(Outbound::Text(notice.as_str().to_string()));
            }
            let _ = client.sender.send(Outbound::Close);
        }
        self.disconnect(id);
    }

    /// Removes the connection and, if it was playing, its player
    fn disconnect(&mut self, id: ConnectionId) {
        let Some(client) = self.clients.remove(&id) else {
            return;
        };
        let Some(player_id) = client.player_id() else {
            debug!("Connection {} left before entering the world", id);
            return;
        };

        self.sessions.remove(&player_id);
        if let Some(player) = self.world.remove_player(player_id) {
            self.save(&player);
            info!("'{}' ({}) disconnected", player.username, player_id);
        }
    }

    fn sweep(&mut self) {
        let timeout = Duration::from_secs(self.config.net.idle_timeout_secs);
        let mut stale: Vec<(ConnectionId, bool)> = self
            .clients
            .iter()
            .filter(|(_, c)| c.broken || c.is_timed_out(timeout))
            .map(|(id, c)| (*id, c.broken))
            .collect();
        stale.sort_unstable();

        for (id, broken) in stale {
            if broken {
                self.disconnect(id);
            } else {
                info!("Connection {} timed out", id);
                self.close(id, Some(Notice::Timeout));
            }
        }
    }

    // =========================================================================
    // Saving
    // =========================================================================

    fn save(&self, player: &Player) {
        if player.guest {
            return;
        }
        if let Some(persistence) = &self.persistence {
            persistence.save(player.to_record());
        }
    }

    /// Save all connected players (called periodically)
    fn save_all(&self) {
        if self.persistence.is_none() {
            return;
        }
        let mut saved = 0;
        for player_id in self.sessions.keys() {
            if let Some(player) = self.world.player(*player_id).filter(|p| !p.guest) {
                self.save(player);
                saved += 1;
            }
        }
        if saved > 0 {
            info!("Periodic save of {} players queued", saved);
        }
    }

    async fn shutdown(&mut self) {
        let mut ids: Vec<ConnectionId> = self.clients.keys().copied().collect();
        ids.sort_unstable();
        for id in ids {
            self.close(id, Some(Notice::Maintenance));
        }
        if let Some(persistence) = &self.persistence {
            persistence.shutdown().await;
        }
        info!("Server stopped after {} ticks", self.world.tick());
    }
}

// =============================================================================
// Background login
// =============================================================================

async fn login(
    persistence: &PersistenceHandle,
    username: &str,
    password: &str,
    fresh: PlayerRecord,
) -> Result<Login, Notice> {
    let account_id = match persistence.authenticate(username, password).await {
        Ok(account_id) => account_id,
        Err(AuthError::InvalidCredentials) => {
            info!("Invalid credentials for '{}'", username);
            return Err(Notice::InvalidLogin);
        }
        Err(e) => {
            error!("Authentication for '{}' failed: {}", username, e);
            return Err(Notice::InvalidLogin);
        }
    };

    let record = match persistence.load_player(username).await {
        Ok(record) => record,
        Err(LoadError::NotFound) => {
            let mut record = fresh;
            record.account.id = account_id;
            record
        }
        Err(e) => {
            error!("Failed to load '{}': {}", username, e);
            return Err(Notice::InvalidLogin);
        }
    };

    Ok(Login { record, guest: false })
}

async fn register(persistence: &PersistenceHandle, password: &str, mut record: PlayerRecord) -> Result<Login, Notice> {
    match persistence.register(password, record.clone()).await {
        Ok(account_id) => {
            record.account.id = account_id;
            Ok(Login { record, guest: false })
        }
        Err(RegisterError::UsernameTaken) => {
            info!("Registration for taken name '{}'", record.account.username);
            Err(Notice::InvalidLogin)
        }
        Err(e) => {
            error!("Registration for '{}' failed: {}", record.account.username, e);
            Err(Notice::InvalidLogin)
        }
    }
}

fn unix_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use realm_shared::EquipmentUpdate;

    use super::*;
    use crate::content::Content;

    fn offline_server(max_players: usize) -> Server {
        let mut config = ServerConfig::default();
        config.persistence.offline = true;
        config.net.max_players = max_players;
        config.world.seed = Some(1);
        let world = World::new(config.world.clone(), Arc::new(Content::builtin().unwrap()));
        Server::new(config, world, None)
    }

    fn connect(server: &mut Server, id: ConnectionId) -> UnboundedReceiver<Outbound> {
        let (sender, receiver) = mpsc::unbounded_channel();
        let addr = "127.0.0.1:40000".parse().unwrap();
        server.handle_event(NetEvent::Connected { id, addr, sender });
        receiver
    }

    fn send(server: &mut Server, id: ConnectionId, message: ClientMessage) {
        server.handle_event(NetEvent::Message { id, text: message.encode() });
    }

    fn intro(kind: IntroOpcode, username: &str) -> ClientMessage {
        ClientMessage::Intro { kind, username: username.into(), password: "secret".into(), email: None }
    }

    fn drain(receiver: &mut UnboundedReceiver<Outbound>) -> Vec<Outbound> {
        let mut out = Vec::new();
        while let Ok(item) = receiver.try_recv() {
            out.push(item);
        }
        out
    }

    fn messages(out: &[Outbound]) -> Vec<ServerMessage> {
        let mut messages = Vec::new();
        for item in out {
            if let Outbound::Text(text) = item {
                if let Ok(Frame::Envelopes(envelopes)) = decode_frame(text) {
                    messages.extend(envelopes.iter().map(|e| ServerMessage::from_value(e).unwrap()));
                }
            }
        }
        messages
    }

    /// Connection `id` logs in as a guest and enters the world
    fn join_as_guest(server: &mut Server, id: ConnectionId) -> UnboundedReceiver<Outbound> {
        let mut receiver = connect(server, id);
        send(server, id, intro(IntroOpcode::Guest, ""));
        send(server, id, ClientMessage::Ready);
        server.tick();
        drain(&mut receiver);
        receiver
    }

    #[test]
    fn test_handshake_on_connect() {
        let mut server = offline_server(10);
        let mut receiver = connect(&mut server, 7);
        server.tick();

        let out = drain(&mut receiver);
        assert_eq!(out.len(), 1);
        assert_eq!(messages(&out), vec![ServerMessage::Handshake { client_id: 7, dev: false }]);
    }

    #[test]
    fn test_guest_login_enters_world() {
        let mut server = offline_server(10);
        let mut receiver = connect(&mut server, 1);
        send(&mut server, 1, intro(IntroOpcode::Guest, "ignored"));
        server.tick();

        let welcome = messages(&drain(&mut receiver)).into_iter().find_map(|m| match m {
            ServerMessage::Welcome(info) => Some(info),
            _ => None,
        });
        let welcome = welcome.unwrap();
        assert_eq!(welcome.username, "guest1");
        assert_eq!(server.world.population(), 0);

        send(&mut server, 1, ClientMessage::Ready);
        server.tick();
        let received = messages(&drain(&mut receiver));
        assert_eq!(server.world.population(), 1);
        assert!(received.iter().any(|m| matches!(m, ServerMessage::Equipment(EquipmentUpdate::Batch(_)))));
        assert!(received.contains(&ServerMessage::Population(1)));
        assert_eq!(server.sessions.get(&welcome.instance), Some(&1));
    }

    #[test]
    fn test_offline_login_lowercases_name() {
        let mut server = offline_server(10);
        let mut receiver = connect(&mut server, 1);
        send(&mut server, 1, intro(IntroOpcode::Login, "  Alice "));
        server.tick();

        let welcomed = messages(&drain(&mut receiver))
            .into_iter()
            .any(|m| matches!(m, ServerMessage::Welcome(info) if info.username == "alice"));
        assert!(welcomed);
    }

    #[test]
    fn test_duplicate_login_is_rejected() {
        let mut server = offline_server(10);
        let _first = connect(&mut server, 1);
        send(&mut server, 1, intro(IntroOpcode::Login, "alice"));

        let mut second = connect(&mut server, 2);
        send(&mut server, 2, intro(IntroOpcode::Login, "ALICE"));

        let out = drain(&mut second);
        assert!(out.contains(&Outbound::Text("loggedin".into())));
        assert_eq!(out.last(), Some(&Outbound::Close));
        assert!(!server.clients.contains_key(&2));
    }

    #[test]
    fn test_full_world_turns_players_away() {
        let mut server = offline_server(1);
        let _first = join_as_guest(&mut server, 1);

        let mut second = connect(&mut server, 2);
        send(&mut server, 2, intro(IntroOpcode::Guest, ""));
        let out = drain(&mut second);
        assert!(out.contains(&Outbound::Text("full".into())));
        assert_eq!(server.world.population(), 1);
    }

    #[test]
    fn test_ping_is_answered() {
        let mut server = offline_server(10);
        let mut receiver = connect(&mut server, 1);
        send(&mut server, 1, ClientMessage::Network(NetworkOpcode::Ping));
        server.tick();

        let received = messages(&drain(&mut receiver));
        assert!(received.contains(&ServerMessage::Network(NetworkOpcode::Pong)));
    }

    #[test]
    fn test_protocol_errors_close_after_limit() {
        let mut server = offline_server(10);
        let limit = server.config.net.max_protocol_strikes;
        let mut receiver = connect(&mut server, 1);

        for _ in 0..limit - 1 {
            server.handle_event(NetEvent::Message { id: 1, text: "[[".into() });
        }
        // Playing before logging in counts too
        send(&mut server, 1, ClientMessage::Move { x: 3, y: 3 });
        assert_eq!(server.clients.get(&1).map(|c| c.strikes), None);
        assert!(drain(&mut receiver).contains(&Outbound::Close));
    }

    #[test]
    fn test_single_protocol_error_is_tolerated() {
        let mut server = offline_server(10);
        let _receiver = connect(&mut server, 1);
        server.handle_event(NetEvent::Message { id: 1, text: "[999]".into() });
        assert_eq!(server.clients.get(&1).map(|c| c.strikes), Some(1));
    }

    #[test]
    fn test_actions_reach_the_world() {
        let mut server = offline_server(10);
        let _receiver = join_as_guest(&mut server, 1);
        let player = server.clients[&1].player_id().unwrap();
        let (x, y) = server.world.player(player).unwrap().character.position();

        send(&mut server, 1, ClientMessage::Move { x: x - 1, y });
        for _ in 0..10 {
            server.tick();
        }
        assert_eq!(server.world.player(player).unwrap().character.position(), (x - 1, y));
    }

    #[test]
    fn test_disconnect_removes_player() {
        let mut server = offline_server(10);
        let _receiver = join_as_guest(&mut server, 1);
        assert_eq!(server.world.population(), 1);

        server.handle_event(NetEvent::Disconnected { id: 1 });
        assert_eq!(server.world.population(), 0);
        assert!(server.sessions.is_empty());
    }

    #[test]
    fn test_broken_writer_is_cleaned_up() {
        let mut server = offline_server(10);
        let receiver = join_as_guest(&mut server, 1);
        drop(receiver);

        server.world.send_to(server.clients[&1].player_id().unwrap(), ServerMessage::notify("hi"));
        server.tick();
        assert!(server.clients.is_empty());
        assert_eq!(server.world.population(), 0);
    }
}

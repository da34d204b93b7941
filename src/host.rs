use std::collections::BTreeMap;

use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::color_catalog::ColorCatalog;
use crate::constants::{
    END_SCREEN_SECONDS, GAME_SCENE, LOBBY_COUNTDOWN_SECONDS, LOBBY_MAX_PLAYERS,
    PLAYER_NAME_MAX_CHARS,
};
use crate::engine::{GameController, MatchEvent};
use crate::lobby::{LobbyEvent, LobbyReady, LobbyStatus};
use crate::protocol::{ConnectionKind, ParsedClientMessage, ServerMessage};
use crate::replicated::Replicated;
use crate::session::{FadeTarget, SessionEvent, SessionManager};
use crate::types::{
    Authority, CinematicKind, ClientId, MatchResult, MatchSummary, MatchView, PhaseEffects,
    SessionPhase,
};
use crate::world::{PlacementTable, WorldBuilder, WorldLayout};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Recipient {
    All,
    Client(ClientId),
}

#[derive(Clone, Debug, PartialEq)]
pub enum Payload {
    Message(ServerMessage),
    /// Binary placement table frame.
    Placement(Vec<u8>),
}

#[derive(Clone, Debug, PartialEq)]
pub struct Outbound {
    pub recipient: Recipient,
    pub payload: Payload,
}

#[derive(Clone, Debug)]
pub struct HostOptions {
    pub seed: u32,
    pub screen_fades: bool,
    pub lobby_max_players: usize,
    pub lobby_countdown_seconds: u32,
    pub end_screen_ms: u64,
    /// Shared secret an `engine` hello must present. `None` accepts any engine.
    pub engine_token: Option<String>,
}

impl Default for HostOptions {
    fn default() -> Self {
        Self {
            seed: 0,
            screen_fades: true,
            lobby_max_players: LOBBY_MAX_PLAYERS,
            lobby_countdown_seconds: LOBBY_COUNTDOWN_SECONDS,
            end_screen_ms: END_SCREEN_SECONDS as u64 * 1_000,
            engine_token: None,
        }
    }
}

#[derive(Clone, Debug)]
struct ConnectedClient {
    name: String,
    kind: ConnectionKind,
}

/// Read-only projection served over HTTP.
#[derive(Clone, Debug, Serialize)]
pub struct HostSnapshot {
    pub phase: SessionPhase,
    #[serde(rename = "loadedScene")]
    pub loaded_scene: Option<&'static str>,
    pub lobby: LobbyStatus,
    #[serde(rename = "match")]
    pub match_view: Option<MatchView>,
    pub placements: Option<PlacementTable>,
    #[serde(rename = "lastSummary")]
    pub last_summary: Option<MatchSummary>,
    pub clients: usize,
}

/// Server state owner: routes client messages into the lobby, session and
/// match controller, and turns their events into outbound messages.
#[derive(Debug)]
pub struct MatchHost {
    options: HostOptions,
    catalog: ColorCatalog,
    layout: WorldLayout,
    idle_world: Option<WorldBuilder>,
    session: SessionManager,
    lobby: LobbyReady,
    controller: Option<GameController>,
    clients: BTreeMap<ClientId, ConnectedClient>,
    phase: Replicated<SessionPhase>,
    result: Replicated<Option<MatchResult>>,
    last_summary: Option<MatchSummary>,
    matches_started: u32,
    return_to_lobby_at: Option<u64>,
    now_ms: u64,
    outbox: Vec<Outbound>,
}

impl MatchHost {
    pub fn new(catalog: ColorCatalog, layout: WorldLayout, options: HostOptions) -> Self {
        let session = SessionManager::new(options.screen_fades);
        let lobby = LobbyReady::new(options.lobby_max_players, options.lobby_countdown_seconds);
        Self {
            options,
            catalog,
            layout,
            idle_world: None,
            session,
            lobby,
            controller: None,
            clients: BTreeMap::new(),
            phase: Replicated::new(SessionPhase::Lobby),
            result: Replicated::new(None),
            last_summary: None,
            matches_started: 0,
            return_to_lobby_at: None,
            now_ms: 0,
            outbox: Vec::new(),
        }
    }

    /// Enters the initial Lobby phase.
    pub fn start(&mut self, now_ms: u64) {
        self.now_ms = now_ms;
        self.session.start(Authority::Server);
        self.pump();
    }

    pub fn phase(&self) -> SessionPhase {
        self.session.phase()
    }

    pub fn session(&self) -> &SessionManager {
        &self.session
    }

    pub fn lobby(&self) -> &LobbyReady {
        &self.lobby
    }

    pub fn controller(&self) -> Option<&GameController> {
        self.controller.as_ref()
    }

    pub fn catalog(&self) -> &ColorCatalog {
        &self.catalog
    }

    pub fn layout(&self) -> &WorldLayout {
        &self.layout
    }

    pub fn is_registered(&self, client_id: ClientId) -> bool {
        self.clients.contains_key(&client_id)
    }

    pub fn snapshot(&self) -> HostSnapshot {
        HostSnapshot {
            phase: self.session.phase(),
            loaded_scene: self.session.loaded_scene(),
            lobby: self.lobby.status(),
            match_view: self.controller.as_ref().map(GameController::view),
            placements: self
                .controller
                .as_ref()
                .and_then(|controller| controller.placement_table().cloned()),
            last_summary: self.last_summary.clone(),
            clients: self.clients.len(),
        }
    }

    pub fn drain_outbox(&mut self) -> Vec<Outbound> {
        std::mem::take(&mut self.outbox)
    }

    pub fn handle_message(&mut self, client_id: ClientId, message: ParsedClientMessage, now_ms: u64) {
        self.now_ms = now_ms;
        match message {
            ParsedClientMessage::Hello { name, kind, token } => {
                self.register(client_id, &name, kind, token.as_deref())
            }
            message => self.handle_registered(client_id, message),
        }
        self.pump();
    }

    pub fn handle_disconnect(&mut self, client_id: ClientId, now_ms: u64) {
        self.now_ms = now_ms;
        let Some(client) = self.clients.remove(&client_id) else {
            return;
        };
        info!(client_id, name = %client.name, kind = ?client.kind, "client left");
        if client.kind == ConnectionKind::Player {
            self.session.client_disconnected(client_id);
            self.lobby.client_disconnected(client_id, now_ms);
            if let Some(controller) = self.controller.as_mut() {
                controller.handle_client_disconnected(client_id);
            }
        }
        self.pump();
    }

    pub fn step(&mut self, now_ms: u64) {
        self.now_ms = now_ms;
        self.lobby.step(now_ms);
        self.session.step(now_ms);
        if let Some(at) = self.return_to_lobby_at {
            if now_ms >= at {
                self.return_to_lobby_at = None;
                self.session.change_state(Authority::Server, SessionPhase::Lobby);
            }
        }
        self.pump();
    }

    fn register(
        &mut self,
        client_id: ClientId,
        name: &str,
        kind: ConnectionKind,
        token: Option<&str>,
    ) {
        if self.clients.contains_key(&client_id) {
            self.send_to(client_id, ServerMessage::error("hello already received"));
            return;
        }
        if kind == ConnectionKind::Engine {
            if let Some(expected) = self.options.engine_token.as_deref() {
                if token != Some(expected) {
                    warn!(client_id, "engine hello rejected: bad token");
                    self.send_to(client_id, ServerMessage::error("engine token rejected"));
                    return;
                }
            }
        }
        // Mid-match joiners stay in the lobby for the next match.
        if kind == ConnectionKind::Player
            && self.lobby.connected_count() >= self.lobby.max_players()
        {
            self.send_to(client_id, ServerMessage::error("lobby is full"));
            return;
        }

        let name = sanitize_name(name);
        info!(client_id, %name, ?kind, "client joined");
        self.clients.insert(client_id, ConnectedClient { name, kind });

        let phase = self.session.phase();
        self.send_to(
            client_id,
            ServerMessage::Welcome {
                client_id,
                kind,
                phase,
                loaded_scene: self.session.loaded_scene(),
            },
        );
        self.send_to(
            client_id,
            ServerMessage::Phase {
                phase,
                effects: PhaseEffects::for_phase(phase),
                version: self.phase.version(),
            },
        );

        if kind == ConnectionKind::Player {
            self.session.client_connected(client_id);
            self.lobby.client_connected(client_id, self.now_ms);
            if let Some(controller) = self.controller.as_mut() {
                controller.handle_client_connected(client_id);
            }
        }
        let status = self.lobby.status();
        self.send_to(client_id, ServerMessage::Lobby { status });
        self.send_match_state(client_id);
    }

    /// Brings a client that joined after the world was built up to date.
    fn send_match_state(&mut self, client_id: ClientId) {
        let Some(controller) = self.controller.as_ref() else {
            return;
        };
        let frame = controller.placement_table().map(PlacementTable::encode);
        match frame {
            Some(Ok(bytes)) => self.outbox.push(Outbound {
                recipient: Recipient::Client(client_id),
                payload: Payload::Placement(bytes),
            }),
            Some(Err(err)) => error!(%err, client_id, "failed to encode placement table"),
            None => {}
        }
        if controller.result().is_none() {
            return;
        }
        if let Some(summary) = self.last_summary.clone() {
            let version = self.result.version();
            self.send_to(client_id, ServerMessage::MatchEnd { summary, version });
        }
    }

    fn handle_registered(&mut self, client_id: ClientId, message: ParsedClientMessage) {
        let Some(kind) = self.clients.get(&client_id).map(|client| client.kind) else {
            self.send_to(client_id, ServerMessage::error("send hello first"));
            return;
        };
        if message.is_gameplay_trigger() && kind != ConnectionKind::Engine {
            warn!(client_id, "gameplay trigger rejected: connection is not the engine");
            self.send_to(
                client_id,
                ServerMessage::error("only the engine connection may report gameplay events"),
            );
            return;
        }

        match message {
            ParsedClientMessage::Hello { .. } => {}
            ParsedClientMessage::Ready => {
                if kind == ConnectionKind::Player {
                    self.lobby.mark_ready(client_id, self.now_ms);
                }
            }
            ParsedClientMessage::FadeComplete => self.session.fade_complete(client_id),
            ParsedClientMessage::SceneLoaded { scene } => {
                self.session.scene_loaded(client_id, &scene)
            }
            ParsedClientMessage::RequestPhase { phase } => {
                self.session
                    .change_state(Authority::Client(client_id), phase);
                self.send_to(
                    client_id,
                    ServerMessage::error("only the server may change the session phase"),
                );
            }
            ParsedClientMessage::Ping { t } => self.send_to(client_id, ServerMessage::Pong { t }),
            ParsedClientMessage::CenterEnter { entity } => {
                if let Some(controller) = self.live_controller() {
                    controller.player_entered_center(entity);
                }
            }
            ParsedClientMessage::CenterExit { entity } => {
                if let Some(controller) = self.live_controller() {
                    controller.player_exited_center(entity);
                }
            }
            ParsedClientMessage::Died { entity } => {
                if let Some(controller) = self.live_controller() {
                    controller.player_died(entity);
                }
            }
            ParsedClientMessage::Fell { entity } => {
                if let Some(controller) = self.live_controller() {
                    controller.player_fell(entity);
                }
            }
        }
    }

    fn live_controller(&mut self) -> Option<&mut GameController> {
        if self.controller.is_none() {
            debug!("gameplay trigger ignored: no match running");
        }
        self.controller.as_mut()
    }

    /// Routes events between the lobby, session and controller until all
    /// three are quiet.
    fn pump(&mut self) {
        loop {
            let lobby_events = self.lobby.drain_events();
            let session_events = self.session.drain_events();
            let match_events = self
                .controller
                .as_mut()
                .map(GameController::drain_events)
                .unwrap_or_default();
            if lobby_events.is_empty() && session_events.is_empty() && match_events.is_empty() {
                break;
            }
            for event in lobby_events {
                self.on_lobby_event(event);
            }
            for event in session_events {
                self.on_session_event(event);
            }
            for event in match_events {
                self.on_match_event(event);
            }
        }
    }

    fn on_lobby_event(&mut self, event: LobbyEvent) {
        match event {
            LobbyEvent::StatusChanged(status) => self.broadcast(ServerMessage::Lobby { status }),
            LobbyEvent::StartRequested => {
                self.session.change_state(Authority::Server, SessionPhase::Game)
            }
        }
    }

    fn on_session_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::PhaseChanged { phase, effects } => {
                self.phase.set(Authority::Server, phase);
                let version = self.phase.version();
                self.broadcast(ServerMessage::Phase {
                    phase,
                    effects,
                    version,
                });
                match phase {
                    SessionPhase::Lobby => self.reset_match(),
                    SessionPhase::Game => {}
                    SessionPhase::End => {
                        self.return_to_lobby_at = Some(self.now_ms + self.options.end_screen_ms);
                    }
                }
            }
            SessionEvent::Fade { target, direction } => {
                let message = ServerMessage::Fade { direction };
                match target {
                    FadeTarget::All => self.broadcast(message),
                    FadeTarget::Client(client_id) => self.send_to(client_id, message),
                }
            }
            SessionEvent::LoadScene { scene } => {
                self.broadcast(ServerMessage::Transition { scene })
            }
            SessionEvent::SceneLoaded { scene } => {
                if scene == GAME_SCENE {
                    self.start_match();
                }
            }
        }
    }

    fn on_match_event(&mut self, event: MatchEvent) {
        match event {
            MatchEvent::PlayerSpawned {
                client_id,
                entity_id,
                spawn,
            } => self.broadcast(ServerMessage::Spawned {
                client_id,
                entity_id: Some(entity_id),
                spawn,
                respawn: false,
            }),
            MatchEvent::PlayerColorAssigned { client_id, color } => {
                self.broadcast(ServerMessage::PlayerColor { client_id, color })
            }
            MatchEvent::RoleAssigned { client_id, role } => {
                self.send_to(client_id, ServerMessage::Role { role })
            }
            MatchEvent::IntroCinematic { focal_point } => {
                self.broadcast(ServerMessage::Cinematic {
                    kind: CinematicKind::Intro,
                    focal_point,
                })
            }
            MatchEvent::ModuleInitialized(init) => {
                debug!(
                    puzzle = init.key.puzzle_index,
                    level = init.key.level_index,
                    route = init.route_index,
                    color = %init.color_id,
                    "module initialized"
                );
            }
            MatchEvent::TemplatesDeactivated => debug!("route templates deactivated"),
            MatchEvent::PlacementBroadcast(table) => match table.encode() {
                Ok(bytes) => self.outbox.push(Outbound {
                    recipient: Recipient::All,
                    payload: Payload::Placement(bytes),
                }),
                Err(err) => error!(%err, "failed to encode placement table"),
            },
            MatchEvent::BuildFailed(err) => {
                error!(%err, "world build failed; match will not progress");
            }
            MatchEvent::RespawnRequested { client_id } => self.run_respawn(client_id),
            MatchEvent::PlayerRespawned { client_id, spawn } => {
                let entity_id = self
                    .controller
                    .as_ref()
                    .and_then(|controller| controller.entity_of(client_id));
                self.broadcast(ServerMessage::Spawned {
                    client_id,
                    entity_id,
                    spawn,
                    respawn: true,
                });
            }
            MatchEvent::MatchEnded(summary) => {
                self.result.set(Authority::Server, Some(summary.result));
                self.last_summary = Some(summary.clone());
                let version = self.result.version();
                self.broadcast(ServerMessage::MatchEnd { summary, version });
                self.session.change_state(Authority::Server, SessionPhase::End);
            }
            MatchEvent::EndCinematic { focal_point } => {
                self.broadcast(ServerMessage::Cinematic {
                    kind: CinematicKind::End,
                    focal_point,
                })
            }
        }
    }

    fn start_match(&mut self) {
        if self.controller.is_some() {
            debug!("game scene reloaded; match already exists");
            return;
        }
        let world = self
            .idle_world
            .take()
            .unwrap_or_else(|| WorldBuilder::new(self.layout.clone(), &self.catalog));
        let seed = self.options.seed.wrapping_add(self.matches_started);
        self.matches_started += 1;

        let players: Vec<ClientId> = self
            .clients
            .iter()
            .filter(|(_, client)| client.kind == ConnectionKind::Player)
            .map(|(client_id, _)| *client_id)
            .collect();
        let mut controller = GameController::new(world, &self.catalog, seed);
        info!(seed, players = players.len(), "starting match");
        if let Err(err) = controller.start_match(Authority::Server, &players) {
            error!(%err, seed, "match failed to start");
            self.broadcast(ServerMessage::error(format!("match failed to start: {err}")));
        }
        self.controller = Some(controller);
    }

    fn run_respawn(&mut self, client_id: ClientId) {
        let now_ms = self.now_ms;
        let Some(controller) = self.controller.as_mut() else {
            return;
        };
        self.session
            .play_local_transition(Authority::Server, client_id, now_ms, || {
                controller.respawn_player(Authority::Server, client_id)
            });
    }

    fn reset_match(&mut self) {
        self.return_to_lobby_at = None;
        if let Some(controller) = self.controller.take() {
            let mut world = controller.into_world();
            world.reset(Authority::Server);
            self.idle_world = Some(world);
        }
        self.last_summary = None;
        if self.result.set(Authority::Server, None) {
            let version = self.result.version();
            self.broadcast(ServerMessage::MatchReset { version });
        }
        self.lobby.reset();
    }

    fn send_to(&mut self, client_id: ClientId, message: ServerMessage) {
        self.outbox.push(Outbound {
            recipient: Recipient::Client(client_id),
            payload: Payload::Message(message),
        });
    }

    fn broadcast(&mut self, message: ServerMessage) {
        self.outbox.push(Outbound {
            recipient: Recipient::All,
            payload: Payload::Message(message),
        });
    }
}

pub fn sanitize_name(value: &str) -> String {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return "Player".to_string();
    }
    trimmed.chars().take(PLAYER_NAME_MAX_CHARS).collect()
}

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use tracing::{debug, info, warn};

use crate::color_catalog::ColorCatalog;
use crate::puzzle_module::ModuleInit;
use crate::rng::Rng;
use crate::types::{
    Authority, ClientId, ColorIdentity, EntityId, MatchPhase, MatchResult, MatchSummary,
    MatchView, PlayerView, Role, SlotTransform,
};
use crate::world::{BuildError, PlacementTable, WorldBuilder, WorldEvent};

mod spawn_system;
mod utils;
mod victory;

use self::utils::now_iso;

#[derive(Clone, Debug)]
struct PlayerSession {
    entity_id: EntityId,
    role: Role,
    color: ColorIdentity,
    spawn: SlotTransform,
    alive: bool,
    connected: bool,
    in_center: bool,
    respawning: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub enum MatchEvent {
    PlayerSpawned {
        client_id: ClientId,
        entity_id: EntityId,
        spawn: SlotTransform,
    },
    PlayerColorAssigned {
        client_id: ClientId,
        color: ColorIdentity,
    },
    RoleAssigned {
        client_id: ClientId,
        role: Role,
    },
    IntroCinematic {
        focal_point: SlotTransform,
    },
    ModuleInitialized(ModuleInit),
    TemplatesDeactivated,
    PlacementBroadcast(PlacementTable),
    BuildFailed(BuildError),
    RespawnRequested {
        client_id: ClientId,
    },
    PlayerRespawned {
        client_id: ClientId,
        spawn: SlotTransform,
    },
    MatchEnded(MatchSummary),
    EndCinematic {
        focal_point: SlotTransform,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartError {
    NotAuthoritative,
    AlreadyStarted(MatchPhase),
    NoPlayers,
    NoSpawnPoints,
    ColorPoolExhausted { players: usize, colors: usize },
    WorldBuild(BuildError),
}

impl fmt::Display for StartError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StartError::NotAuthoritative => write!(f, "only the server may start the match"),
            StartError::AlreadyStarted(phase) => {
                write!(f, "match already started (phase {phase:?})")
            }
            StartError::NoPlayers => write!(f, "no connected clients to spawn"),
            StartError::NoSpawnPoints => write!(f, "no spawn points defined"),
            StartError::ColorPoolExhausted { players, colors } => write!(
                f,
                "{players} players need distinct colors but only {colors} are available"
            ),
            StartError::WorldBuild(err) => write!(f, "world build failed: {err}"),
        }
    }
}

impl std::error::Error for StartError {}

/// Server-side match orchestration: spawning, roles, liveness and the
/// win/lose evaluation.
#[derive(Debug)]
pub struct GameController {
    phase: MatchPhase,
    rng: Rng,
    world: WorldBuilder,
    color_pool: Vec<ColorIdentity>,
    route_colors: Vec<ColorIdentity>,
    players: BTreeMap<ClientId, PlayerSession>,
    entity_owners: BTreeMap<EntityId, ClientId>,
    active_color_players: BTreeSet<ClientId>,
    players_in_center: BTreeSet<ClientId>,
    result: Option<MatchResult>,
    events: Vec<MatchEvent>,
    next_entity_id: EntityId,
}

impl GameController {
    pub fn new(world: WorldBuilder, catalog: &ColorCatalog, seed: u32) -> Self {
        Self {
            phase: MatchPhase::WaitingForPlayers,
            rng: Rng::new(seed),
            world,
            color_pool: catalog.player_colors(),
            route_colors: Vec::new(),
            players: BTreeMap::new(),
            entity_owners: BTreeMap::new(),
            active_color_players: BTreeSet::new(),
            players_in_center: BTreeSet::new(),
            result: None,
            events: Vec::new(),
            next_entity_id: 1,
        }
    }

    pub fn phase(&self) -> MatchPhase {
        self.phase
    }

    pub fn result(&self) -> Option<MatchResult> {
        self.result
    }

    pub fn is_finished(&self) -> bool {
        self.result.is_some()
    }

    pub fn world(&self) -> &WorldBuilder {
        &self.world
    }

    pub fn placement_table(&self) -> Option<&PlacementTable> {
        self.world.placement_table()
    }

    /// Hands the world back so it can be reset and reused by the next match.
    pub fn into_world(self) -> WorldBuilder {
        self.world
    }

    pub fn role_of(&self, client_id: ClientId) -> Option<Role> {
        self.players.get(&client_id).map(|player| player.role)
    }

    pub fn entity_of(&self, client_id: ClientId) -> Option<EntityId> {
        self.players.get(&client_id).map(|player| player.entity_id)
    }

    pub fn active_color_players(&self) -> &BTreeSet<ClientId> {
        &self.active_color_players
    }

    pub fn players_in_center(&self) -> &BTreeSet<ClientId> {
        &self.players_in_center
    }

    /// Runs once the gameplay scene has loaded on the server: spawns every
    /// connected client, assigns colors and roles, then builds the world.
    pub fn start_match(
        &mut self,
        authority: Authority,
        connected: &[ClientId],
    ) -> Result<(), StartError> {
        if !authority.is_server() {
            warn!(?authority, "match start rejected: caller is not the server");
            return Err(StartError::NotAuthoritative);
        }
        if self.phase != MatchPhase::WaitingForPlayers {
            debug!(phase = ?self.phase, "match already started");
            return Err(StartError::AlreadyStarted(self.phase));
        }

        let mut clients: Vec<ClientId> = Vec::with_capacity(connected.len());
        for client_id in connected {
            if !clients.contains(client_id) {
                clients.push(*client_id);
            }
        }
        self.validate_start(&clients)?;

        self.spawn_all_players(&clients);
        self.assign_roles(&clients);
        self.phase = MatchPhase::RolesAssigned;
        self.events.push(MatchEvent::IntroCinematic {
            focal_point: self.world.layout().center,
        });

        self.initialize_color_players();
        let route_colors = self.route_colors.clone();
        match self
            .world
            .build_world(Authority::Server, &route_colors, &mut self.rng)
        {
            Ok(_) => {
                self.forward_world_events();
                self.phase = MatchPhase::InProgress;
                info!(
                    players = clients.len(),
                    colors = self.active_color_players.len(),
                    "match in progress"
                );
                Ok(())
            }
            Err(err) => {
                self.events.push(MatchEvent::BuildFailed(err.clone()));
                Err(StartError::WorldBuild(err))
            }
        }
    }

    pub fn handle_client_connected(&mut self, client_id: ClientId) {
        if let Some(player) = self.players.get_mut(&client_id) {
            player.connected = true;
            debug!(client_id, "tracked player reconnected");
        }
    }

    pub fn handle_client_disconnected(&mut self, client_id: ClientId) {
        let Some(player) = self.players.get_mut(&client_id) else {
            return;
        };
        player.connected = false;
        player.in_center = false;
        self.players_in_center.remove(&client_id);
        info!(client_id, "tracked player disconnected");
        self.evaluate();
    }

    pub fn player_died(&mut self, entity_id: EntityId) {
        let Some(client_id) = self.resolve_live_event(entity_id, "died") else {
            return;
        };
        if let Some(player) = self.players.get_mut(&client_id) {
            if !player.alive {
                return;
            }
            player.alive = false;
            player.in_center = false;
        }
        self.players_in_center.remove(&client_id);
        self.active_color_players.remove(&client_id);
        info!(client_id, "player died");
        self.evaluate();
    }

    pub fn player_entered_center(&mut self, entity_id: EntityId) {
        let Some(client_id) = self.resolve_live_event(entity_id, "entered center") else {
            return;
        };
        self.refresh_active_color_players();
        if !self.active_color_players.contains(&client_id) {
            debug!(client_id, "center entry ignored: not an active color player");
            return;
        }
        if let Some(player) = self.players.get_mut(&client_id) {
            player.in_center = true;
        }
        self.players_in_center.insert(client_id);
        info!(
            client_id,
            in_center = self.players_in_center.len(),
            active = self.active_color_players.len(),
            "color player in center"
        );
        self.evaluate();
    }

    pub fn player_exited_center(&mut self, entity_id: EntityId) {
        let Some(client_id) = self.resolve_live_event(entity_id, "exited center") else {
            return;
        };
        if let Some(player) = self.players.get_mut(&client_id) {
            player.in_center = false;
        }
        self.players_in_center.remove(&client_id);
        self.evaluate();
    }

    /// A player dropped out of the world. Asks the session to run a local
    /// transition that ends in `respawn_player`.
    pub fn player_fell(&mut self, entity_id: EntityId) {
        if self.is_finished() {
            return;
        }
        let Some(client_id) = self.entity_owners.get(&entity_id).copied() else {
            debug!(entity_id, "fall dropped: unknown entity");
            return;
        };
        let Some(player) = self.players.get_mut(&client_id) else {
            return;
        };
        if player.respawning || !player.alive {
            return;
        }
        player.respawning = true;
        self.events.push(MatchEvent::RespawnRequested { client_id });
    }

    /// Moves the player back to its own spawn point.
    pub fn respawn_player(
        &mut self,
        authority: Authority,
        client_id: ClientId,
    ) -> Option<SlotTransform> {
        if !authority.is_server() {
            warn!(?authority, "respawn rejected: caller is not the server");
            return None;
        }
        let player = self.players.get_mut(&client_id)?;
        player.respawning = false;
        let spawn = player.spawn;
        self.events
            .push(MatchEvent::PlayerRespawned { client_id, spawn });
        Some(spawn)
    }

    pub fn view(&self) -> MatchView {
        MatchView {
            phase: self.phase,
            result: self.result,
            active_color_players: self.active_color_players.iter().copied().collect(),
            players_in_center: self.players_in_center.iter().copied().collect(),
            players: self
                .players
                .iter()
                .map(|(client_id, player)| PlayerView {
                    client_id: *client_id,
                    entity_id: player.entity_id,
                    role: player.role,
                    color_id: player.color.id.clone(),
                    alive: player.alive,
                    connected: player.connected,
                    in_center: player.in_center,
                })
                .collect(),
        }
    }

    pub fn drain_events(&mut self) -> Vec<MatchEvent> {
        std::mem::take(&mut self.events)
    }

    /// Maps a gameplay trigger to its client, dropping it when the match is
    /// not running or the entity is unknown.
    fn resolve_live_event(&self, entity_id: EntityId, what: &str) -> Option<ClientId> {
        if self.phase != MatchPhase::InProgress {
            debug!(entity_id, phase = ?self.phase, "{what} ignored: match not in progress");
            return None;
        }
        let client_id = self.entity_owners.get(&entity_id).copied();
        if client_id.is_none() {
            debug!(entity_id, "{what} dropped: unknown entity");
        }
        client_id
    }

    fn forward_world_events(&mut self) {
        for event in self.world.drain_events() {
            self.events.push(match event {
                WorldEvent::ModuleInitialized(init) => MatchEvent::ModuleInitialized(init),
                WorldEvent::TemplatesDeactivated => MatchEvent::TemplatesDeactivated,
                WorldEvent::PlacementBroadcast(table) => MatchEvent::PlacementBroadcast(table),
            });
        }
    }

    fn finish(&mut self, result: MatchResult) {
        if self.result.is_some() {
            return;
        }
        self.result = Some(result);
        self.phase = MatchPhase::Finished;
        info!(?result, "match finished");

        let impostor = self
            .players
            .iter()
            .find(|(_, player)| player.role == Role::Impostor)
            .map(|(client_id, _)| *client_id);
        self.events.push(MatchEvent::MatchEnded(MatchSummary {
            result,
            ended_at: now_iso(),
            surviving_colors: self.active_color_players.iter().copied().collect(),
            impostor,
        }));
        self.events.push(MatchEvent::EndCinematic {
            focal_point: self.world.layout().center,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::WorldLayout;

    fn make_controller(layout: WorldLayout, seed: u32) -> GameController {
        let catalog = ColorCatalog::builtin();
        let world = WorldBuilder::new(layout, &catalog);
        GameController::new(world, &catalog, seed)
    }

    fn started(clients: &[ClientId], seed: u32) -> GameController {
        let mut controller = make_controller(WorldLayout::builtin(), seed);
        controller
            .start_match(Authority::Server, clients)
            .expect("match starts");
        controller
    }

    fn impostor(controller: &GameController) -> ClientId {
        controller
            .players
            .iter()
            .find(|(_, player)| player.role == Role::Impostor)
            .map(|(client_id, _)| *client_id)
            .expect("one impostor")
    }

    fn color_players(controller: &GameController) -> Vec<ClientId> {
        controller
            .players
            .iter()
            .filter(|(_, player)| player.role == Role::Color)
            .map(|(client_id, _)| *client_id)
            .collect()
    }

    fn entity(controller: &GameController, client_id: ClientId) -> EntityId {
        controller.entity_of(client_id).expect("tracked player")
    }

    fn five_player_match() -> (GameController, Vec<ClientId>, ClientId) {
        let controller = started(&[1, 2, 3, 4, 5], 31);
        let colors = color_players(&controller);
        assert_eq!(colors.len(), 4);
        let impostor = impostor(&controller);
        (controller, colors, impostor)
    }

    fn ended_events(controller: &mut GameController) -> usize {
        controller
            .drain_events()
            .iter()
            .filter(|event| matches!(event, MatchEvent::MatchEnded(_)))
            .count()
    }

    #[test]
    fn exactly_one_impostor_for_any_player_count() {
        for count in 1..=6u64 {
            let clients: Vec<ClientId> = (1..=count).collect();
            for seed in 0..10 {
                let controller = started(&clients, seed);
                let impostors = controller
                    .players
                    .values()
                    .filter(|player| player.role == Role::Impostor)
                    .count();
                assert_eq!(impostors, 1);
                assert_eq!(color_players(&controller).len(), count as usize - 1);
                assert_eq!(controller.phase(), MatchPhase::InProgress);
            }
        }
    }

    #[test]
    fn player_colors_are_distinct_and_become_route_colors() {
        let mut controller = started(&[10, 20, 30, 40, 50], 8);
        let mut spawn_order = Vec::new();
        for event in controller.drain_events() {
            if let MatchEvent::PlayerColorAssigned { color, .. } = event {
                spawn_order.push(color.id);
            }
        }
        let mut unique = spawn_order.clone();
        unique.sort();
        unique.dedup();
        assert_eq!(unique.len(), 5);

        let table = controller.placement_table().expect("world built");
        for (route_index, color_id) in spawn_order.iter().take(4).enumerate() {
            assert!(table
                .for_route(route_index)
                .all(|placement| &placement.color.id == color_id));
        }
    }

    #[test]
    fn roles_cannot_be_reassigned_mid_match() {
        let mut controller = started(&[1, 2, 3], 4);
        let before = impostor(&controller);
        assert_eq!(
            controller.start_match(Authority::Server, &[1, 2, 3]),
            Err(StartError::AlreadyStarted(MatchPhase::InProgress))
        );
        assert_eq!(impostor(&controller), before);
    }

    #[test]
    fn client_cannot_start_match() {
        let mut controller = make_controller(WorldLayout::builtin(), 1);
        assert_eq!(
            controller.start_match(Authority::Client(1), &[1, 2]),
            Err(StartError::NotAuthoritative)
        );
        assert_eq!(controller.phase(), MatchPhase::WaitingForPlayers);
    }

    #[test]
    fn too_few_colors_aborts_before_spawning() {
        let mut controller = make_controller(WorldLayout::builtin(), 1);
        let clients: Vec<ClientId> = (1..=7).collect();
        assert_eq!(
            controller.start_match(Authority::Server, &clients),
            Err(StartError::ColorPoolExhausted {
                players: 7,
                colors: 6
            })
        );
        assert_eq!(controller.phase(), MatchPhase::WaitingForPlayers);
        assert!(controller.players.is_empty());
        assert!(controller.drain_events().is_empty());
    }

    #[test]
    fn missing_spawn_points_abort_start() {
        let mut layout = WorldLayout::builtin();
        layout.spawn_points.clear();
        let mut controller = make_controller(layout, 1);
        assert_eq!(
            controller.start_match(Authority::Server, &[1]),
            Err(StartError::NoSpawnPoints)
        );
        assert!(controller.players.is_empty());
    }

    #[test]
    fn spawn_points_are_handed_out_round_robin() {
        let mut controller = started(&[1, 2, 3, 4, 5], 2);
        let spawns: Vec<SlotTransform> = controller
            .drain_events()
            .into_iter()
            .filter_map(|event| match event {
                MatchEvent::PlayerSpawned { spawn, .. } => Some(spawn),
                _ => None,
            })
            .collect();
        let layout = WorldLayout::builtin();
        assert_eq!(spawns.len(), 5);
        assert_eq!(spawns[0], layout.spawn_points[0]);
        assert_eq!(spawns[3], layout.spawn_points[3]);
        assert_eq!(spawns[4], layout.spawn_points[0]);
    }

    #[test]
    fn scenario_a_last_color_entering_center_wins() {
        let (mut controller, colors, _) = five_player_match();
        for client_id in &colors[..3] {
            let entity_id = entity(&controller, *client_id);
            controller.player_entered_center(entity_id);
        }
        assert_eq!(controller.result(), None);

        let entity_id = entity(&controller, colors[3]);
        controller.player_entered_center(entity_id);
        assert_eq!(controller.result(), Some(MatchResult::ColorsWin));
        assert_eq!(controller.phase(), MatchPhase::Finished);
    }

    #[test]
    fn scenario_b_lone_survivor_in_center_wins() {
        let (mut controller, colors, _) = five_player_match();
        for client_id in &colors[..3] {
            let entity_id = entity(&controller, *client_id);
            controller.player_died(entity_id);
            assert_eq!(controller.result(), None);
        }
        assert_eq!(controller.active_color_players().len(), 1);

        let entity_id = entity(&controller, colors[3]);
        controller.player_entered_center(entity_id);
        assert_eq!(controller.result(), Some(MatchResult::ColorsWin));
    }

    #[test]
    fn scenario_c_all_colors_dead_impostor_wins() {
        let (mut controller, colors, _) = five_player_match();
        for client_id in &colors {
            let entity_id = entity(&controller, *client_id);
            controller.player_died(entity_id);
        }
        assert_eq!(controller.result(), Some(MatchResult::ImpostorWins));
    }

    #[test]
    fn scenario_d_impostor_death_hands_colors_the_win() {
        let (mut controller, colors, impostor) = five_player_match();
        for client_id in &colors[..2] {
            let entity_id = entity(&controller, *client_id);
            controller.player_died(entity_id);
        }
        assert_eq!(controller.result(), None);

        let entity_id = entity(&controller, impostor);
        controller.player_died(entity_id);
        assert_eq!(controller.result(), Some(MatchResult::ColorsWin));
    }

    #[test]
    fn scenario_e_build_failure_stalls_match_without_broadcast() {
        let mut layout = WorldLayout::builtin();
        layout.puzzle_groups.truncate(3);
        let mut controller = make_controller(layout, 5);
        let result = controller.start_match(Authority::Server, &[1, 2, 3, 4, 5]);
        assert!(matches!(
            result,
            Err(StartError::WorldBuild(
                BuildError::InsufficientPuzzleGroups { .. }
            ))
        ));
        assert_eq!(controller.phase(), MatchPhase::RolesAssigned);
        assert!(controller.placement_table().is_none());

        let events = controller.drain_events();
        assert!(events
            .iter()
            .any(|event| matches!(event, MatchEvent::BuildFailed(_))));
        assert!(!events
            .iter()
            .any(|event| matches!(event, MatchEvent::PlacementBroadcast(_))));

        let colors = color_players(&controller);
        for client_id in colors {
            let entity_id = entity(&controller, client_id);
            controller.player_died(entity_id);
        }
        assert_eq!(controller.result(), None);
    }

    #[test]
    fn finished_match_ignores_further_events() {
        let (mut controller, colors, impostor) = five_player_match();
        for client_id in &colors {
            let entity_id = entity(&controller, *client_id);
            controller.player_died(entity_id);
        }
        assert_eq!(controller.result(), Some(MatchResult::ImpostorWins));
        assert_eq!(ended_events(&mut controller), 1);
        let view_before = serde_json::to_value(controller.view()).expect("view serializes");

        let impostor_entity = entity(&controller, impostor);
        controller.player_died(impostor_entity);
        controller.player_entered_center(impostor_entity);
        controller.player_exited_center(impostor_entity);
        controller.handle_client_disconnected(impostor);
        let first_color = entity(&controller, colors[0]);
        controller.player_entered_center(first_color);

        assert_eq!(controller.result(), Some(MatchResult::ImpostorWins));
        assert_eq!(ended_events(&mut controller), 0);
        let impostor_view = controller
            .view()
            .players
            .into_iter()
            .find(|player| player.client_id == impostor)
            .expect("impostor tracked");
        assert!(impostor_view.alive);
        assert_eq!(
            view_before["result"],
            serde_json::to_value(controller.view()).expect("view serializes")["result"]
        );
    }

    #[test]
    fn unknown_entities_are_dropped() {
        let (mut controller, _, _) = five_player_match();
        controller.player_died(9_999);
        controller.player_entered_center(9_999);
        controller.player_fell(9_999);
        assert_eq!(controller.result(), None);
        assert_eq!(controller.active_color_players().len(), 4);
        assert!(controller.players_in_center().is_empty());
    }

    #[test]
    fn impostor_in_center_does_not_count() {
        let (mut controller, colors, impostor) = five_player_match();
        let entity_id = entity(&controller, impostor);
        controller.player_entered_center(entity_id);
        assert!(controller.players_in_center().is_empty());

        for client_id in &colors[..3] {
            let entity_id = entity(&controller, *client_id);
            controller.player_entered_center(entity_id);
        }
        assert_eq!(controller.result(), None);
    }

    #[test]
    fn exit_and_death_remove_players_from_center() {
        let (mut controller, colors, _) = five_player_match();
        for client_id in &colors[..3] {
            let entity_id = entity(&controller, *client_id);
            controller.player_entered_center(entity_id);
        }
        let leaving = entity(&controller, colors[0]);
        controller.player_exited_center(leaving);
        assert_eq!(controller.players_in_center().len(), 2);

        let last = entity(&controller, colors[3]);
        controller.player_entered_center(last);
        assert_eq!(controller.result(), None);

        let dying = entity(&controller, colors[0]);
        controller.player_died(dying);
        assert_eq!(controller.result(), Some(MatchResult::ColorsWin));
    }

    #[test]
    fn disconnected_impostor_hands_colors_the_win() {
        let (mut controller, _, impostor) = five_player_match();
        controller.handle_client_disconnected(impostor);
        assert_eq!(controller.result(), Some(MatchResult::ColorsWin));
    }

    #[test]
    fn disconnected_colors_leave_the_active_set() {
        let (mut controller, colors, _) = five_player_match();
        for client_id in &colors[..3] {
            let entity_id = entity(&controller, *client_id);
            controller.player_entered_center(entity_id);
        }
        controller.handle_client_disconnected(colors[3]);
        assert_eq!(controller.result(), Some(MatchResult::ColorsWin));
    }

    #[test]
    fn fall_requests_one_respawn_at_a_time() {
        let (mut controller, colors, _) = five_player_match();
        controller.drain_events();
        let entity_id = entity(&controller, colors[0]);
        controller.player_fell(entity_id);
        controller.player_fell(entity_id);
        let requests = controller
            .drain_events()
            .into_iter()
            .filter(|event| matches!(event, MatchEvent::RespawnRequested { .. }))
            .count();
        assert_eq!(requests, 1);

        let spawn = controller
            .respawn_player(Authority::Server, colors[0])
            .expect("respawned");
        assert_eq!(controller.players[&colors[0]].spawn, spawn);
        assert_eq!(controller.respawn_player(Authority::Client(1), colors[0]), None);

        controller.player_fell(entity_id);
        assert!(controller
            .drain_events()
            .iter()
            .any(|event| matches!(event, MatchEvent::RespawnRequested { .. })));
    }

    #[test]
    fn same_seed_assigns_same_roles() {
        let a = started(&[1, 2, 3, 4], 600);
        let b = started(&[1, 2, 3, 4], 600);
        assert_eq!(impostor(&a), impostor(&b));
        assert_eq!(a.placement_table(), b.placement_table());
    }
}

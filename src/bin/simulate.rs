use between_server::color_catalog::ColorCatalog;
use between_server::constants::{ROUTE_COUNT, TICK_MS};
use between_server::engine::GameController;
use between_server::host::{HostOptions, MatchHost, Payload, Recipient};
use between_server::mirror::ClientMirror;
use between_server::protocol::{ConnectionKind, ParsedClientMessage, ServerMessage};
use between_server::types::{ClientId, EntityId, FadeDirection, MatchResult, Role, SessionPhase};
use between_server::world::WorldLayout;
use clap::Parser;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashSet};
use std::io;
use std::path::Path;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing_subscriber::EnvFilter;

const ENGINE_CLIENT_ID: ClientId = 1_000;
const MIN_PLAYERS: usize = 2;
const MAX_PLAYERS: usize = 6;
const WAIT_LIMIT_TICKS: usize = 20 * 60;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Cli {
    #[arg(long)]
    players: Option<usize>,
    #[arg(long)]
    seed: Option<u64>,
    #[arg(long)]
    scenario: Option<String>,
    #[arg(long)]
    no_fades: bool,
    #[arg(long)]
    match_id: Option<String>,
    #[arg(long)]
    summary_out: Option<PathBuf>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
enum ScenarioKind {
    ColorsReachCenter,
    LoneSurvivor,
    ImpostorWins,
    ImpostorDies,
    ImpostorDisconnects,
    RespawnThenCenter,
    BuildFailure,
}

impl ScenarioKind {
    const ALL: [ScenarioKind; 7] = [
        ScenarioKind::ColorsReachCenter,
        ScenarioKind::LoneSurvivor,
        ScenarioKind::ImpostorWins,
        ScenarioKind::ImpostorDies,
        ScenarioKind::ImpostorDisconnects,
        ScenarioKind::RespawnThenCenter,
        ScenarioKind::BuildFailure,
    ];

    fn name(self) -> &'static str {
        match self {
            ScenarioKind::ColorsReachCenter => "colors-reach-center",
            ScenarioKind::LoneSurvivor => "lone-survivor",
            ScenarioKind::ImpostorWins => "impostor-wins",
            ScenarioKind::ImpostorDies => "impostor-dies",
            ScenarioKind::ImpostorDisconnects => "impostor-disconnects",
            ScenarioKind::RespawnThenCenter => "respawn-then-center",
            ScenarioKind::BuildFailure => "build-failure",
        }
    }

    fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.name() == value)
    }

    fn expected_result(self) -> Option<MatchResult> {
        match self {
            ScenarioKind::ImpostorWins => Some(MatchResult::ImpostorWins),
            ScenarioKind::BuildFailure => None,
            _ => Some(MatchResult::ColorsWin),
        }
    }
}

#[derive(Clone, Debug, Serialize)]
struct Scenario {
    name: String,
    kind: ScenarioKind,
    players: usize,
    fades: bool,
    seed: u32,
}

#[derive(Clone, Debug, Serialize)]
struct ScenarioResultLine {
    scenario: String,
    seed: u32,
    players: usize,
    fades: bool,
    expected: Option<MatchResult>,
    result: Option<MatchResult>,
    #[serde(rename = "durationMs")]
    duration_ms: u64,
    #[serde(rename = "placementFrames")]
    placement_frames: usize,
    respawns: usize,
    #[serde(rename = "fadesSeen")]
    fades_seen: usize,
    #[serde(rename = "returnedToLobby")]
    returned_to_lobby: bool,
    anomalies: Vec<String>,
}

#[derive(Clone, Debug, Serialize)]
struct AnomalyRecord {
    #[serde(rename = "atMs")]
    at_ms: u64,
    message: String,
}

#[derive(Clone, Debug, Serialize)]
struct ScenarioRunResult {
    #[serde(flatten)]
    result: ScenarioResultLine,
    #[serde(rename = "anomalyRecords")]
    anomaly_records: Vec<AnomalyRecord>,
    #[serde(rename = "finishedAtMs")]
    finished_at_ms: u64,
}

#[derive(Clone, Debug, Serialize)]
struct RunSummary {
    #[serde(rename = "matchId")]
    match_id: String,
    #[serde(rename = "startedAtMs")]
    started_at_ms: u64,
    #[serde(rename = "finishedAtMs")]
    finished_at_ms: u64,
    #[serde(rename = "scenarioCount")]
    scenario_count: usize,
    #[serde(rename = "anomalyCount")]
    anomaly_count: usize,
    #[serde(rename = "averageDurationMs")]
    average_duration_ms: u64,
    #[serde(rename = "resultCounts")]
    result_counts: BTreeMap<String, usize>,
    scenarios: Vec<ScenarioResultLine>,
}

#[derive(Clone, Debug, Serialize)]
struct StructuredLogLine {
    #[serde(rename = "timestampMs")]
    timestamp_ms: u64,
    level: String,
    event: String,
    #[serde(rename = "matchId")]
    match_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    scenario: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    seed: Option<u32>,
    #[serde(rename = "atMs", skip_serializing_if = "Option::is_none")]
    at_ms: Option<u64>,
    details: Value,
}

fn main() {
    init_tracing();
    let cli = Cli::parse();
    let scenarios = match resolve_scenarios(&cli) {
        Ok(scenarios) => scenarios,
        Err(message) => {
            eprintln!("{message}");
            std::process::exit(2);
        }
    };
    let run_started_at_ms = now_ms();
    let seed_hint = scenarios.first().map(|scenario| scenario.seed).unwrap_or(0);
    let match_id = cli
        .match_id
        .clone()
        .unwrap_or_else(|| default_match_id(seed_hint, run_started_at_ms));
    let mut has_anomaly = false;
    let mut scenario_results = Vec::new();
    let mut result_counts: BTreeMap<String, usize> = BTreeMap::new();
    let mut total_duration_ms = 0u64;
    let mut total_anomalies = 0usize;

    for scenario in scenarios {
        emit_log(
            "info",
            "scenario_started",
            &match_id,
            Some(&scenario.name),
            Some(scenario.seed),
            None,
            json!({
                "players": scenario.players,
                "fades": scenario.fades,
                "expected": scenario.kind.expected_result(),
            }),
        );
        let scenario_run = run_scenario(&scenario);

        for anomaly in &scenario_run.anomaly_records {
            emit_log(
                "warn",
                "anomaly_detected",
                &match_id,
                Some(&scenario.name),
                Some(scenario.seed),
                Some(anomaly.at_ms),
                json!({
                    "message": anomaly.message,
                }),
            );
        }

        if !scenario_run.result.anomalies.is_empty() {
            has_anomaly = true;
        }
        total_anomalies += scenario_run.anomaly_records.len();
        total_duration_ms += scenario_run.result.duration_ms;
        *result_counts
            .entry(match_result_key(scenario_run.result.result))
            .or_insert(0) += 1;

        emit_log(
            "info",
            "scenario_finished",
            &match_id,
            Some(&scenario.name),
            Some(scenario.seed),
            Some(scenario_run.finished_at_ms),
            json!({
                "result": scenario_run.result.result,
                "durationMs": scenario_run.result.duration_ms,
                "respawns": scenario_run.result.respawns,
                "anomalyCount": scenario_run.anomaly_records.len(),
            }),
        );

        match serde_json::to_string(&scenario_run.result) {
            Ok(line) => println!("{line}"),
            Err(error) => eprintln!("failed to serialize scenario result: {error}"),
        }
        scenario_results.push(scenario_run.result);
    }

    let run_finished_at_ms = now_ms();
    let summary = build_run_summary(
        match_id.clone(),
        run_started_at_ms,
        run_finished_at_ms,
        scenario_results.clone(),
        result_counts,
        total_anomalies,
        total_duration_ms,
    );

    let mut summary_out_written: Option<String> = None;
    if let Some(path) = cli.summary_out.as_ref() {
        if let Err(error) = write_summary(path, &summary) {
            emit_log(
                "error",
                "summary_write_failed",
                &match_id,
                None,
                None,
                None,
                json!({
                    "path": path.to_string_lossy(),
                    "error": error.to_string(),
                }),
            );
            std::process::exit(2);
        }
        summary_out_written = Some(path.to_string_lossy().to_string());
    }

    emit_log(
        "info",
        "run_finished",
        &match_id,
        None,
        None,
        None,
        json!({
            "scenarioCount": summary.scenario_count,
            "anomalyCount": summary.anomaly_count,
            "averageDurationMs": summary.average_duration_ms,
            "resultCounts": summary.result_counts,
            "summaryOut": summary_out_written,
        }),
    );

    if has_anomaly {
        std::process::exit(1);
    }
}

/// Library logs go to stderr next to the structured lines; quiet unless
/// RUST_LOG asks for more.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .compact()
        .init();
}

/// One headless match: a host, one mirror per player and an engine
/// connection that reports the scripted gameplay triggers.
struct Simulation {
    host: MatchHost,
    mirrors: BTreeMap<ClientId, ClientMirror>,
    results_announced: BTreeMap<ClientId, Arc<AtomicUsize>>,
    now_ms: u64,
    placement_frames: usize,
    respawns: usize,
    fades_seen: usize,
    anomalies: Vec<String>,
    anomaly_records: Vec<AnomalyRecord>,
    anomaly_seen: HashSet<String>,
}

impl Simulation {
    fn new(scenario: &Scenario) -> Self {
        let mut layout = WorldLayout::builtin();
        if scenario.kind == ScenarioKind::BuildFailure {
            layout.puzzle_groups.truncate(ROUTE_COUNT - 1);
        }
        let mut host = MatchHost::new(
            ColorCatalog::builtin(),
            layout,
            HostOptions {
                seed: scenario.seed,
                screen_fades: scenario.fades,
                lobby_max_players: scenario.players,
                lobby_countdown_seconds: 1,
                end_screen_ms: 2_000,
                engine_token: None,
            },
        );
        host.start(0);
        host.drain_outbox();

        Self {
            host,
            mirrors: BTreeMap::new(),
            results_announced: BTreeMap::new(),
            now_ms: 0,
            placement_frames: 0,
            respawns: 0,
            fades_seen: 0,
            anomalies: Vec::new(),
            anomaly_records: Vec::new(),
            anomaly_seen: HashSet::new(),
        }
    }

    fn connect_players(&mut self, players: usize) {
        self.send(
            ENGINE_CLIENT_ID,
            ParsedClientMessage::Hello {
                name: "engine".to_string(),
                kind: ConnectionKind::Engine,
                token: None,
            },
        );
        for client_id in 1..=players as ClientId {
            let mut mirror = ClientMirror::new(
                self.host.catalog().clone(),
                self.host.layout().routes.clone(),
            );
            let announced = Arc::new(AtomicUsize::new(0));
            let counter = announced.clone();
            mirror.on_result_change(move |_, new| {
                if new.is_some() {
                    counter.fetch_add(1, Ordering::Relaxed);
                }
            });
            self.results_announced.insert(client_id, announced);
            self.mirrors.insert(client_id, mirror);
            self.send(
                client_id,
                ParsedClientMessage::Hello {
                    name: format!("Sim-{client_id:02}"),
                    kind: ConnectionKind::Player,
                    token: None,
                },
            );
        }
        for client_id in 1..=players as ClientId {
            self.send(client_id, ParsedClientMessage::Ready);
        }
    }

    fn send(&mut self, client_id: ClientId, message: ParsedClientMessage) {
        self.host.handle_message(client_id, message, self.now_ms);
        self.deliver();
    }

    fn disconnect(&mut self, client_id: ClientId) {
        self.mirrors.remove(&client_id);
        self.host.handle_disconnect(client_id, self.now_ms);
        self.deliver();
    }

    fn report(&mut self, message: ParsedClientMessage) {
        self.send(ENGINE_CLIENT_ID, message);
    }

    /// Feeds the outbox to the mirrors and answers fades and scene loads the
    /// way a client would, until the host has nothing left to say.
    fn deliver(&mut self) {
        loop {
            let outbox = self.host.drain_outbox();
            if outbox.is_empty() {
                break;
            }
            let mut replies = Vec::new();
            let mut problems = Vec::new();
            for outbound in outbox {
                if let Payload::Message(ServerMessage::Spawned { respawn: true, .. }) =
                    &outbound.payload
                {
                    self.respawns += 1;
                }
                let targets: Vec<ClientId> = match outbound.recipient {
                    Recipient::All => {
                        let host = &self.host;
                        self.mirrors
                            .keys()
                            .copied()
                            .filter(|client_id| host.is_registered(*client_id))
                            .collect()
                    }
                    Recipient::Client(client_id) => vec![client_id],
                };
                for client_id in targets {
                    let Some(mirror) = self.mirrors.get_mut(&client_id) else {
                        continue;
                    };
                    match &outbound.payload {
                        Payload::Message(message) => {
                            mirror.apply_message(message);
                            match message {
                                ServerMessage::Fade { direction } => {
                                    self.fades_seen += 1;
                                    if *direction == FadeDirection::In {
                                        replies.push((client_id, ParsedClientMessage::FadeComplete));
                                    }
                                }
                                ServerMessage::Transition { scene } => replies.push((
                                    client_id,
                                    ParsedClientMessage::SceneLoaded {
                                        scene: scene.to_string(),
                                    },
                                )),
                                _ => {}
                            }
                        }
                        Payload::Placement(bytes) => match mirror.apply_placement_frame(bytes) {
                            Ok(_) => self.placement_frames += 1,
                            Err(err) => problems
                                .push(format!("client {client_id} rejected placement frame: {err}")),
                        },
                    }
                }
            }
            for message in problems {
                self.anomaly(message);
            }
            for (client_id, reply) in replies {
                self.host.handle_message(client_id, reply, self.now_ms);
            }
        }
    }

    fn advance(&mut self, duration_ms: u64) {
        let until = self.now_ms + duration_ms;
        while self.now_ms < until {
            self.tick();
        }
    }

    fn tick(&mut self) {
        self.now_ms += TICK_MS;
        self.host.step(self.now_ms);
        self.deliver();
    }

    fn advance_until(&mut self, done: impl Fn(&MatchHost) -> bool) -> bool {
        for _ in 0..WAIT_LIMIT_TICKS {
            if done(&self.host) {
                return true;
            }
            self.tick();
        }
        done(&self.host)
    }

    fn anomaly(&mut self, message: String) {
        push_anomaly(
            &mut self.anomalies,
            &mut self.anomaly_records,
            &mut self.anomaly_seen,
            self.now_ms,
            message,
        );
    }

    fn result(&self) -> Option<MatchResult> {
        self.host.controller().and_then(GameController::result)
    }

    fn players_with_role(&self, role: Role) -> Vec<(ClientId, Option<EntityId>)> {
        self.mirrors
            .iter()
            .filter(|(_, mirror)| mirror.role() == Some(role))
            .map(|(client_id, mirror)| (*client_id, mirror.entity_id()))
            .collect()
    }

    fn entity(&mut self, client_id: ClientId, entity: Option<EntityId>) -> Option<EntityId> {
        if entity.is_none() {
            self.anomaly(format!("client {client_id} never learned its entity id"));
        }
        entity
    }

    fn play_script(&mut self, kind: ScenarioKind) {
        let colors = self.players_with_role(Role::Color);
        let impostors = self.players_with_role(Role::Impostor);
        match kind {
            ScenarioKind::ColorsReachCenter => self.enter_center(&colors),
            ScenarioKind::LoneSurvivor => {
                if let Some((survivor, rest)) = colors.split_last() {
                    for (client_id, entity) in rest {
                        if let Some(entity) = self.entity(*client_id, *entity) {
                            self.report(ParsedClientMessage::Died { entity });
                        }
                    }
                    self.enter_center(std::slice::from_ref(survivor));
                }
            }
            ScenarioKind::ImpostorWins => {
                // Center occupancy does not protect a player that dies.
                if let Some((client_id, entity)) = colors.first().filter(|_| colors.len() > 1) {
                    if let Some(entity) = self.entity(*client_id, *entity) {
                        self.report(ParsedClientMessage::CenterEnter { entity });
                    }
                }
                for (client_id, entity) in &colors {
                    if let Some(entity) = self.entity(*client_id, *entity) {
                        self.report(ParsedClientMessage::Died { entity });
                    }
                }
            }
            ScenarioKind::ImpostorDies => {
                for (client_id, entity) in &impostors {
                    if let Some(entity) = self.entity(*client_id, *entity) {
                        self.report(ParsedClientMessage::Died { entity });
                    }
                }
            }
            ScenarioKind::ImpostorDisconnects => {
                for (client_id, _) in &impostors {
                    self.disconnect(*client_id);
                }
            }
            ScenarioKind::RespawnThenCenter => {
                if let Some((client_id, entity)) = colors.first() {
                    if let Some(entity) = self.entity(*client_id, *entity) {
                        let before = self.respawns;
                        self.report(ParsedClientMessage::Fell { entity });
                        if self.respawns != before + 1 {
                            self.anomaly(format!("client {client_id} fell but was not respawned"));
                        }
                        self.advance(1_100);
                        let still_dark = self
                            .mirrors
                            .get(client_id)
                            .is_some_and(ClientMirror::is_screen_dark);
                        if still_dark {
                            self.anomaly(format!("client {client_id} screen stayed dark after respawn"));
                        }
                    }
                }
                self.enter_center(&colors);
            }
            ScenarioKind::BuildFailure => self.advance(1_000),
        }
    }

    fn enter_center(&mut self, players: &[(ClientId, Option<EntityId>)]) {
        for (client_id, entity) in players {
            if let Some(entity) = self.entity(*client_id, *entity) {
                self.report(ParsedClientMessage::CenterEnter { entity });
            }
        }
    }

    fn check_roles(&mut self, players: usize) {
        let impostors = self.players_with_role(Role::Impostor).len();
        if impostors != 1 {
            self.anomaly(format!("expected exactly one impostor, found {impostors}"));
        }
        let colors = self.players_with_role(Role::Color).len();
        if colors + impostors != players {
            self.anomaly(format!("{} of {players} players learned a role", colors + impostors));
        }
    }

    /// Every mirror must show the same modules as the server.
    fn check_replication(&mut self) {
        let mut problems = Vec::new();
        if let Some(controller) = self.host.controller() {
            for (client_id, mirror) in &self.mirrors {
                if mirror.placement_table() != controller.placement_table() {
                    problems.push(format!("client {client_id} placement table differs from server"));
                    continue;
                }
                if controller.placement_table().is_none() {
                    continue;
                }
                for module in controller.world().modules().iter() {
                    let mirrored = mirror.modules().get(module.key());
                    let matches = mirrored.is_some_and(|mirrored| {
                        mirrored.color_id() == module.color_id()
                            && mirrored.transform() == module.transform()
                            && mirrored.is_active() == module.is_active()
                    });
                    if !matches {
                        problems.push(format!(
                            "client {client_id} module {}/{} differs from server",
                            module.key().puzzle_index,
                            module.key().level_index
                        ));
                    }
                }
            }
        }
        for message in problems {
            self.anomaly(message);
        }
    }

    fn check_outcome(&mut self, expected: Option<MatchResult>) {
        let result = self.result();
        if result != expected {
            self.anomaly(format!("expected {expected:?} but match ended with {result:?}"));
        }
        let mut problems = Vec::new();
        for (client_id, mirror) in &self.mirrors {
            if mirror.result() != result {
                problems.push(format!(
                    "client {client_id} saw result {:?}, server has {result:?}",
                    mirror.result()
                ));
            }
            let announced = self
                .results_announced
                .get(client_id)
                .map_or(0, |counter| counter.load(Ordering::Relaxed));
            let expected_announcements = usize::from(result.is_some());
            if announced != expected_announcements {
                problems.push(format!(
                    "client {client_id} was told of {announced} results, expected {expected_announcements}"
                ));
            }
            if mirror.phase() != self.host.phase() {
                problems.push(format!(
                    "client {client_id} is in phase {:?}, server is in {:?}",
                    mirror.phase(),
                    self.host.phase()
                ));
            }
        }
        for message in problems {
            self.anomaly(message);
        }
    }
}

fn run_scenario(scenario: &Scenario) -> ScenarioRunResult {
    let mut sim = Simulation::new(scenario);
    sim.connect_players(scenario.players);

    let started = sim.advance_until(|host| host.controller().is_some());
    if !started {
        sim.anomaly("match never started".to_string());
    }
    let match_started_at_ms = sim.now_ms;
    let expected = scenario.kind.expected_result();

    if started {
        sim.check_roles(scenario.players);
        sim.check_replication();
        sim.play_script(scenario.kind);
    }
    let duration_ms = sim.now_ms - match_started_at_ms;
    sim.check_outcome(expected);
    let result = sim.result();

    let mut returned_to_lobby = false;
    if expected.is_some() && result.is_some() {
        sim.check_replication();
        returned_to_lobby = sim.advance_until(|host| host.phase() == SessionPhase::Lobby);
        if returned_to_lobby {
            sim.check_result_cleared();
        } else {
            sim.anomaly("session never returned to the lobby".to_string());
        }
    }

    ScenarioRunResult {
        result: ScenarioResultLine {
            scenario: scenario.name.clone(),
            seed: scenario.seed,
            players: scenario.players,
            fades: scenario.fades,
            expected,
            result,
            duration_ms,
            placement_frames: sim.placement_frames,
            respawns: sim.respawns,
            fades_seen: sim.fades_seen,
            returned_to_lobby,
            anomalies: sim.anomalies,
        },
        anomaly_records: sim.anomaly_records,
        finished_at_ms: sim.now_ms,
    }
}

impl Simulation {
    /// Back in the lobby, no client may still show the finished match.
    fn check_result_cleared(&mut self) {
        let stale: Vec<String> = self
            .mirrors
            .iter()
            .filter_map(|(client_id, mirror)| {
                mirror.result().map(|result| {
                    format!("client {client_id} still shows {result:?} in the lobby")
                })
            })
            .collect();
        for message in stale {
            self.anomaly(message);
        }
        if self.host.snapshot().last_summary.is_some() {
            self.anomaly("host kept the last summary after returning to the lobby".to_string());
        }
    }
}

fn resolve_scenarios(cli: &Cli) -> Result<Vec<Scenario>, String> {
    let seed = normalize_seed(cli.seed.unwrap_or_else(|| {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64
    }));
    let players = cli.players.unwrap_or(4).clamp(MIN_PLAYERS, MAX_PLAYERS);
    let fades = !cli.no_fades;

    let kinds: Vec<ScenarioKind> = match cli.scenario.as_deref() {
        Some(name) => {
            vec![ScenarioKind::parse(name).ok_or_else(|| format!("unknown scenario: {name}"))?]
        }
        None => ScenarioKind::ALL.to_vec(),
    };

    Ok(kinds
        .into_iter()
        .enumerate()
        .map(|(index, kind)| Scenario {
            name: kind.name().to_string(),
            kind,
            players,
            fades,
            seed: normalize_seed(seed as u64 + index as u64),
        })
        .collect())
}

fn normalize_seed(seed: u64) -> u32 {
    seed as u32
}

fn push_anomaly(
    anomalies: &mut Vec<String>,
    anomaly_records: &mut Vec<AnomalyRecord>,
    anomaly_seen: &mut HashSet<String>,
    at_ms: u64,
    message: String,
) {
    anomaly_records.push(AnomalyRecord {
        at_ms,
        message: message.clone(),
    });
    if anomaly_seen.insert(message.clone()) {
        anomalies.push(message);
    }
}

fn default_match_id(seed: u32, timestamp_ms: u64) -> String {
    format!("sim-{seed}-{timestamp_ms}")
}

fn build_run_summary(
    match_id: String,
    started_at_ms: u64,
    finished_at_ms: u64,
    scenarios: Vec<ScenarioResultLine>,
    result_counts: BTreeMap<String, usize>,
    anomaly_count: usize,
    total_duration_ms: u64,
) -> RunSummary {
    let scenario_count = scenarios.len();
    let average_duration_ms = if scenario_count == 0 {
        0
    } else {
        total_duration_ms / scenario_count as u64
    };
    RunSummary {
        match_id,
        started_at_ms,
        finished_at_ms,
        scenario_count,
        anomaly_count,
        average_duration_ms,
        result_counts,
        scenarios,
    }
}

fn emit_log(
    level: &str,
    event: &str,
    match_id: &str,
    scenario: Option<&str>,
    seed: Option<u32>,
    at_ms: Option<u64>,
    details: Value,
) {
    let log_line = StructuredLogLine {
        timestamp_ms: now_ms(),
        level: level.to_string(),
        event: event.to_string(),
        match_id: match_id.to_string(),
        scenario: scenario.map(|value| value.to_string()),
        seed,
        at_ms,
        details,
    };
    match serde_json::to_string(&log_line) {
        Ok(line) => eprintln!("{line}"),
        Err(error) => eprintln!("failed to serialize log line: {error}"),
    }
}

fn match_result_key(result: Option<MatchResult>) -> String {
    match result {
        Some(MatchResult::ColorsWin) => "colors_win",
        Some(MatchResult::ImpostorWins) => "impostor_wins",
        None => "none",
    }
    .to_string()
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

fn write_summary(path: &Path, summary: &RunSummary) -> io::Result<()> {
    let summary_text = serde_json::to_string_pretty(summary).map_err(io::Error::other)?;
    std::fs::write(path, summary_text)
}

use serde::{Deserialize, Serialize};

pub type ClientId = u64;
pub type EntityId = u64;

/// Who is asking for a state change. Only `Server` may mutate match state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Authority {
    Server,
    Client(ClientId),
}

impl Authority {
    pub fn is_server(self) -> bool {
        matches!(self, Authority::Server)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MeshVariant {
    Orb,
    Cube,
    Prism,
    Ring,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ColorIdentity {
    pub id: String,
    pub rgba: [f32; 4],
    pub intensity: f32,
    #[serde(rename = "meshVariant")]
    pub mesh_variant: MeshVariant,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Color,
    Impostor,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchResult {
    ColorsWin,
    ImpostorWins,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    Lobby,
    Game,
    End,
}

impl SessionPhase {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "lobby" => Some(Self::Lobby),
            "game" => Some(Self::Game),
            "end" => Some(Self::End),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchPhase {
    WaitingForPlayers,
    RolesAssigned,
    InProgress,
    Finished,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Music {
    Menu,
    Game,
    End,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CinematicKind {
    Intro,
    End,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FadeDirection {
    /// Screen goes dark.
    In,
    /// Screen becomes visible again.
    Out,
}

/// Engine transform of a route slot, spawn point or the center zone.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SlotTransform {
    pub position: [f32; 3],
    #[serde(rename = "yawDegrees", default)]
    pub yaw_degrees: f32,
    #[serde(default = "default_scale")]
    pub scale: f32,
}

fn default_scale() -> f32 {
    1.0
}

impl SlotTransform {
    pub fn at(x: f32, y: f32, z: f32) -> Self {
        Self {
            position: [x, y, z],
            yaw_degrees: 0.0,
            scale: 1.0,
        }
    }

    pub fn with_yaw(mut self, yaw_degrees: f32) -> Self {
        self.yaw_degrees = yaw_degrees;
        self
    }
}

/// Client-side effects of entering a session phase.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PhaseEffects {
    #[serde(rename = "timeScale")]
    pub time_scale: f32,
    #[serde(rename = "stopMusic")]
    pub stop_music: Option<Music>,
    #[serde(rename = "playMusic")]
    pub play_music: Option<Music>,
    #[serde(rename = "cursorLocked")]
    pub cursor_locked: bool,
}

impl PhaseEffects {
    pub fn for_phase(phase: SessionPhase) -> Self {
        match phase {
            SessionPhase::Lobby => Self {
                time_scale: 1.0,
                stop_music: Some(Music::End),
                play_music: Some(Music::Menu),
                cursor_locked: false,
            },
            SessionPhase::Game => Self {
                time_scale: 1.0,
                stop_music: Some(Music::Menu),
                play_music: Some(Music::Game),
                cursor_locked: true,
            },
            SessionPhase::End => Self {
                time_scale: 0.0,
                stop_music: Some(Music::Game),
                play_music: Some(Music::End),
                cursor_locked: false,
            },
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct MatchSummary {
    pub result: MatchResult,
    #[serde(rename = "endedAt")]
    pub ended_at: String,
    #[serde(rename = "survivingColors")]
    pub surviving_colors: Vec<ClientId>,
    pub impostor: Option<ClientId>,
}

#[derive(Clone, Debug, Serialize)]
pub struct PlayerView {
    #[serde(rename = "clientId")]
    pub client_id: ClientId,
    #[serde(rename = "entityId")]
    pub entity_id: EntityId,
    pub role: Role,
    #[serde(rename = "colorId")]
    pub color_id: String,
    pub alive: bool,
    pub connected: bool,
    #[serde(rename = "inCenter")]
    pub in_center: bool,
}

#[derive(Clone, Debug, Serialize)]
pub struct MatchView {
    pub phase: MatchPhase,
    pub result: Option<MatchResult>,
    #[serde(rename = "activeColorPlayers")]
    pub active_color_players: Vec<ClientId>,
    #[serde(rename = "playersInCenter")]
    pub players_in_center: Vec<ClientId>,
    pub players: Vec<PlayerView>,
}

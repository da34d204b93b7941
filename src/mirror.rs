use tracing::debug;

use crate::color_catalog::ColorCatalog;
use crate::protocol::ServerMessage;
use crate::puzzle_module::ModuleInit;
use crate::replicated::Replicated;
use crate::types::{
    Authority, ClientId, ColorIdentity, EntityId, FadeDirection, MatchResult, Role, SessionPhase,
};
use crate::world::{ModuleSet, PlacementTable, RouteTemplate, WireError};

/// Client-side projection of the authoritative state, fed by the messages a
/// single client receives.
#[derive(Debug)]
pub struct ClientMirror {
    client_id: Option<ClientId>,
    catalog: ColorCatalog,
    routes: Vec<RouteTemplate>,
    phase: Replicated<SessionPhase>,
    result: Replicated<Option<MatchResult>>,
    modules: ModuleSet,
    table: Option<PlacementTable>,
    screen_dark: bool,
    loaded_scene: Option<String>,
    role: Option<Role>,
    color: Option<ColorIdentity>,
    entity_id: Option<EntityId>,
    lobby_text: Option<String>,
    last_error: Option<String>,
}

impl ClientMirror {
    pub fn new(catalog: ColorCatalog, routes: Vec<RouteTemplate>) -> Self {
        Self {
            client_id: None,
            catalog,
            routes,
            phase: Replicated::new(SessionPhase::Lobby),
            result: Replicated::new(None),
            modules: ModuleSet::new(),
            table: None,
            screen_dark: false,
            loaded_scene: None,
            role: None,
            color: None,
            entity_id: None,
            lobby_text: None,
            last_error: None,
        }
    }

    pub fn client_id(&self) -> Option<ClientId> {
        self.client_id
    }

    pub fn phase(&self) -> SessionPhase {
        *self.phase.get()
    }

    pub fn result(&self) -> Option<MatchResult> {
        *self.result.get()
    }

    pub fn modules(&self) -> &ModuleSet {
        &self.modules
    }

    pub fn placement_table(&self) -> Option<&PlacementTable> {
        self.table.as_ref()
    }

    pub fn is_screen_dark(&self) -> bool {
        self.screen_dark
    }

    pub fn loaded_scene(&self) -> Option<&str> {
        self.loaded_scene.as_deref()
    }

    pub fn role(&self) -> Option<Role> {
        self.role
    }

    pub fn color(&self) -> Option<&ColorIdentity> {
        self.color.as_ref()
    }

    pub fn entity_id(&self) -> Option<EntityId> {
        self.entity_id
    }

    pub fn lobby_text(&self) -> Option<&str> {
        self.lobby_text.as_deref()
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Runs `listener` with the old and new result whenever the mirrored
    /// result changes.
    pub fn on_result_change(
        &mut self,
        listener: impl FnMut(&Option<MatchResult>, &Option<MatchResult>) + Send + 'static,
    ) {
        self.result.subscribe(listener);
    }

    pub fn apply_message(&mut self, message: &ServerMessage) {
        match message {
            ServerMessage::Welcome {
                client_id,
                phase,
                loaded_scene,
                ..
            } => {
                self.client_id = Some(*client_id);
                self.phase.apply_remote(*phase, self.phase.version() + 1);
                self.loaded_scene = loaded_scene.map(str::to_string);
            }
            ServerMessage::Lobby { status } => {
                self.lobby_text = Some(status.text.clone());
            }
            ServerMessage::Phase { phase, version, .. } => {
                self.phase.apply_remote(*phase, *version);
            }
            ServerMessage::Transition { scene } => {
                self.loaded_scene = Some(scene.to_string());
            }
            ServerMessage::Fade { direction } => {
                self.screen_dark = *direction == FadeDirection::In;
            }
            ServerMessage::Spawned {
                client_id,
                entity_id,
                ..
            } => {
                if Some(*client_id) == self.client_id && entity_id.is_some() {
                    self.entity_id = *entity_id;
                }
            }
            ServerMessage::Role { role } => {
                self.role = Some(*role);
            }
            ServerMessage::PlayerColor { client_id, color } => {
                if Some(*client_id) == self.client_id {
                    self.color = Some(color.clone());
                }
            }
            ServerMessage::MatchEnd { summary, version } => {
                self.result.apply_remote(Some(summary.result), *version);
            }
            ServerMessage::MatchReset { version } => {
                self.result.apply_remote(None, *version);
            }
            ServerMessage::Error { message } => {
                self.last_error = Some(message.clone());
            }
            ServerMessage::Cinematic { .. } | ServerMessage::Pong { .. } => {}
        }
    }

    /// Applies a binary placement frame. Returns the initialize signals for
    /// modules that were not already showing the received color.
    pub fn apply_placement_frame(&mut self, bytes: &[u8]) -> Result<Vec<ModuleInit>, WireError> {
        let table = PlacementTable::decode(bytes, &self.catalog)?;
        let authority = Authority::Client(self.client_id.unwrap_or_default());
        let inits = self.modules.apply_table(
            &table,
            &self.routes,
            &self.catalog.neutral().id,
            authority,
        );
        debug!(initialized = inits.len(), "placement table applied");
        self.table = Some(table);
        Ok(inits)
    }
}

use std::collections::BTreeSet;

use tracing::{debug, info, warn};

use crate::constants::{GAME_SCENE, LOCAL_FADE_OUT_DELAY_MS, MENU_SCENE};
use crate::types::{Authority, ClientId, FadeDirection, PhaseEffects, SessionPhase};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FadeTarget {
    All,
    Client(ClientId),
}

#[derive(Clone, Debug, PartialEq)]
pub enum SessionEvent {
    PhaseChanged {
        phase: SessionPhase,
        effects: PhaseEffects,
    },
    Fade {
        target: FadeTarget,
        direction: FadeDirection,
    },
    /// Clients must load `scene` and report back with `scene_loaded`.
    LoadScene { scene: &'static str },
    /// The server finished loading `scene`.
    SceneLoaded { scene: &'static str },
}

/// Progress of the global scene transition.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransitionStage {
    Idle,
    AwaitingFades {
        scene: &'static str,
        pending: BTreeSet<ClientId>,
    },
    AwaitingLoads {
        scene: &'static str,
        pending: BTreeSet<ClientId>,
    },
}

#[derive(Clone, Copy, Debug)]
struct PendingFadeOut {
    due_ms: u64,
    client_id: ClientId,
}

/// Top-level Lobby/Game/End state machine. Owns the scene transitions that
/// wrap every phase change.
#[derive(Debug)]
pub struct SessionManager {
    phase: SessionPhase,
    entered: bool,
    fades_enabled: bool,
    connected: BTreeSet<ClientId>,
    stage: TransitionStage,
    queued_scene: Option<&'static str>,
    loaded_scene: Option<&'static str>,
    local_fade_outs: Vec<PendingFadeOut>,
    events: Vec<SessionEvent>,
}

impl SessionManager {
    pub fn new(fades_enabled: bool) -> Self {
        Self {
            phase: SessionPhase::Lobby,
            entered: false,
            fades_enabled,
            connected: BTreeSet::new(),
            stage: TransitionStage::Idle,
            queued_scene: None,
            loaded_scene: None,
            local_fade_outs: Vec::new(),
            events: Vec::new(),
        }
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn stage(&self) -> &TransitionStage {
        &self.stage
    }

    pub fn is_transitioning(&self) -> bool {
        self.stage != TransitionStage::Idle
    }

    pub fn loaded_scene(&self) -> Option<&'static str> {
        self.loaded_scene
    }

    pub fn fades_enabled(&self) -> bool {
        self.fades_enabled
    }

    /// Enters the initial Lobby phase once the server is up.
    pub fn start(&mut self, authority: Authority) {
        if !authority.is_server() {
            warn!(?authority, "session start rejected: caller is not the server");
            return;
        }
        if self.entered {
            return;
        }
        self.entered = true;
        self.enter_phase(SessionPhase::Lobby);
    }

    pub fn change_state(&mut self, authority: Authority, phase: SessionPhase) {
        if !authority.is_server() {
            warn!(?authority, ?phase, "phase change rejected: only the server may change the session phase");
            return;
        }
        if self.entered && self.phase == phase {
            debug!(?phase, "phase change ignored: already in phase");
            return;
        }
        self.entered = true;
        self.enter_phase(phase);
    }

    pub fn client_connected(&mut self, client_id: ClientId) {
        self.connected.insert(client_id);
    }

    /// A departing client counts as having acknowledged every pending step.
    pub fn client_disconnected(&mut self, client_id: ClientId) {
        self.connected.remove(&client_id);
        self.local_fade_outs
            .retain(|pending| pending.client_id != client_id);
        match &mut self.stage {
            TransitionStage::AwaitingFades { pending, .. }
            | TransitionStage::AwaitingLoads { pending, .. } => {
                pending.remove(&client_id);
            }
            TransitionStage::Idle => return,
        }
        self.advance();
    }

    pub fn fade_complete(&mut self, client_id: ClientId) {
        let TransitionStage::AwaitingFades { pending, .. } = &mut self.stage else {
            debug!(client_id, "fade ack ignored: no transition awaiting fades");
            return;
        };
        if pending.remove(&client_id) {
            self.advance();
        }
    }

    pub fn scene_loaded(&mut self, client_id: ClientId, scene: &str) {
        let TransitionStage::AwaitingLoads {
            scene: expected,
            pending,
        } = &mut self.stage
        else {
            debug!(client_id, scene, "scene load report ignored: no transition awaiting loads");
            return;
        };
        if *expected != scene {
            debug!(client_id, scene, expected = *expected, "scene load report for another scene");
            return;
        }
        if pending.remove(&client_id) {
            self.advance();
        }
    }

    /// Fades one client in, runs `action` on the server while that client's
    /// screen is dark, and fades it back out after a fixed delay.
    pub fn play_local_transition<R>(
        &mut self,
        authority: Authority,
        client_id: ClientId,
        now_ms: u64,
        action: impl FnOnce() -> R,
    ) -> Option<R> {
        if !authority.is_server() {
            warn!(?authority, client_id, "local transition rejected: caller is not the server");
            return None;
        }
        self.events.push(SessionEvent::Fade {
            target: FadeTarget::Client(client_id),
            direction: FadeDirection::In,
        });
        let result = action();
        self.local_fade_outs.push(PendingFadeOut {
            due_ms: now_ms + LOCAL_FADE_OUT_DELAY_MS,
            client_id,
        });
        Some(result)
    }

    /// Releases delayed local fade-outs that are due.
    pub fn step(&mut self, now_ms: u64) {
        if self.local_fade_outs.is_empty() {
            return;
        }
        let mut due: Vec<PendingFadeOut> = Vec::new();
        self.local_fade_outs.retain(|pending| {
            if pending.due_ms <= now_ms {
                due.push(*pending);
                false
            } else {
                true
            }
        });
        due.sort_by_key(|pending| pending.due_ms);
        for pending in due {
            self.events.push(SessionEvent::Fade {
                target: FadeTarget::Client(pending.client_id),
                direction: FadeDirection::Out,
            });
        }
    }

    pub fn drain_events(&mut self) -> Vec<SessionEvent> {
        std::mem::take(&mut self.events)
    }

    fn enter_phase(&mut self, phase: SessionPhase) {
        info!(from = ?self.phase, to = ?phase, "session phase changed");
        self.phase = phase;
        self.events.push(SessionEvent::PhaseChanged {
            phase,
            effects: PhaseEffects::for_phase(phase),
        });
        match phase {
            SessionPhase::Lobby => self.begin_scene_load(MENU_SCENE),
            SessionPhase::Game => self.begin_scene_load(GAME_SCENE),
            SessionPhase::End => {}
        }
    }

    fn begin_scene_load(&mut self, scene: &'static str) {
        if self.stage != TransitionStage::Idle {
            debug!(scene, "scene load queued behind running transition");
            self.queued_scene = Some(scene);
            return;
        }
        if !self.fades_enabled {
            self.load_scene(scene);
            return;
        }
        self.events.push(SessionEvent::Fade {
            target: FadeTarget::All,
            direction: FadeDirection::In,
        });
        self.stage = TransitionStage::AwaitingFades {
            scene,
            pending: self.connected.clone(),
        };
        self.advance();
    }

    fn load_scene(&mut self, scene: &'static str) {
        info!(scene, "loading scene");
        self.loaded_scene = Some(scene);
        self.events.push(SessionEvent::LoadScene { scene });
        self.events.push(SessionEvent::SceneLoaded { scene });
    }

    fn advance(&mut self) {
        loop {
            match &self.stage {
                TransitionStage::AwaitingFades { scene, pending } if pending.is_empty() => {
                    let scene = *scene;
                    self.load_scene(scene);
                    self.stage = TransitionStage::AwaitingLoads {
                        scene,
                        pending: self.connected.clone(),
                    };
                }
                TransitionStage::AwaitingLoads { scene, pending } if pending.is_empty() => {
                    debug!(scene = *scene, "scene transition complete");
                    self.stage = TransitionStage::Idle;
                    self.events.push(SessionEvent::Fade {
                        target: FadeTarget::All,
                        direction: FadeDirection::Out,
                    });
                    if let Some(next) = self.queued_scene.take() {
                        self.begin_scene_load(next);
                    }
                    return;
                }
                _ => return,
            }
        }
    }
}

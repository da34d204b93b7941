use std::collections::BTreeSet;

use serde::Serialize;
use tracing::{debug, info};

use crate::types::ClientId;

const COUNTDOWN_STEP_MS: u64 = 1_000;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct LobbyStatus {
    pub connected: usize,
    pub ready: usize,
    #[serde(rename = "maxPlayers")]
    pub max_players: usize,
    #[serde(rename = "lobbyFull")]
    pub lobby_full: bool,
    pub countdown: Option<u32>,
    pub text: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LobbyEvent {
    StatusChanged(LobbyStatus),
    /// Countdown reached zero; the session should move to `Game`.
    StartRequested,
}

#[derive(Clone, Copy, Debug)]
struct Countdown {
    remaining: u32,
    next_tick_ms: u64,
}

/// Ready gate in front of the match: waits for a full lobby where every
/// client is ready, then counts down once per second.
#[derive(Debug)]
pub struct LobbyReady {
    max_players: usize,
    countdown_seconds: u32,
    connected: BTreeSet<ClientId>,
    ready: BTreeSet<ClientId>,
    countdown: Option<Countdown>,
    started: bool,
    last_status: Option<LobbyStatus>,
    events: Vec<LobbyEvent>,
}

impl LobbyReady {
    pub fn new(max_players: usize, countdown_seconds: u32) -> Self {
        Self {
            max_players,
            countdown_seconds,
            connected: BTreeSet::new(),
            ready: BTreeSet::new(),
            countdown: None,
            started: false,
            last_status: None,
            events: Vec::new(),
        }
    }

    pub fn max_players(&self) -> usize {
        self.max_players
    }

    pub fn connected_count(&self) -> usize {
        self.connected.len()
    }

    pub fn ready_count(&self) -> usize {
        self.ready.len()
    }

    pub fn is_full(&self) -> bool {
        self.connected.len() >= self.max_players
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    pub fn countdown(&self) -> Option<u32> {
        self.countdown.map(|countdown| countdown.remaining)
    }

    pub fn status_text(&self) -> String {
        if let Some(remaining) = self.countdown() {
            return format!("Starting in {remaining}...");
        }
        if !self.is_full() {
            return format!(
                "Waiting players ({}/{})",
                self.connected.len(),
                self.max_players
            );
        }
        format!("Ready {}/{}", self.ready.len(), self.max_players)
    }

    pub fn status(&self) -> LobbyStatus {
        LobbyStatus {
            connected: self.connected.len(),
            ready: self.ready.len(),
            max_players: self.max_players,
            lobby_full: self.is_full(),
            countdown: self.countdown(),
            text: self.status_text(),
        }
    }

    pub fn client_connected(&mut self, client_id: ClientId, now_ms: u64) {
        self.connected.insert(client_id);
        self.ready.remove(&client_id);
        self.cancel_countdown_if_unready();
        self.try_start(now_ms);
        self.emit_status();
    }

    pub fn client_disconnected(&mut self, client_id: ClientId, now_ms: u64) {
        self.connected.remove(&client_id);
        self.ready.remove(&client_id);
        self.cancel_countdown_if_unready();
        self.try_start(now_ms);
        self.emit_status();
    }

    pub fn mark_ready(&mut self, client_id: ClientId, now_ms: u64) {
        if self.started || !self.connected.contains(&client_id) {
            debug!(client_id, "ready ignored");
            return;
        }
        if !self.ready.insert(client_id) {
            return;
        }
        info!(
            client_id,
            ready = self.ready.len(),
            max = self.max_players,
            "player ready"
        );
        self.try_start(now_ms);
        self.emit_status();
    }

    /// Advances the countdown by whole seconds.
    pub fn step(&mut self, now_ms: u64) {
        while let Some(mut countdown) = self.countdown {
            if now_ms < countdown.next_tick_ms {
                break;
            }
            countdown.remaining = countdown.remaining.saturating_sub(1);
            countdown.next_tick_ms += COUNTDOWN_STEP_MS;
            if countdown.remaining == 0 {
                self.countdown = None;
                self.launch();
                break;
            }
            self.countdown = Some(countdown);
            self.emit_status();
        }
    }

    /// Reopens the gate for the next match.
    pub fn reset(&mut self) {
        self.ready.clear();
        self.countdown = None;
        self.started = false;
        self.emit_status();
    }

    pub fn drain_events(&mut self) -> Vec<LobbyEvent> {
        std::mem::take(&mut self.events)
    }

    fn all_ready(&self) -> bool {
        self.is_full() && self.ready.len() == self.connected.len()
    }

    fn try_start(&mut self, now_ms: u64) {
        if self.started || self.countdown.is_some() || !self.all_ready() {
            return;
        }
        if self.countdown_seconds == 0 {
            self.launch();
            return;
        }
        info!(seconds = self.countdown_seconds, "lobby countdown started");
        self.countdown = Some(Countdown {
            remaining: self.countdown_seconds,
            next_tick_ms: now_ms + COUNTDOWN_STEP_MS,
        });
    }

    fn cancel_countdown_if_unready(&mut self) {
        if self.countdown.is_some() && !self.all_ready() {
            info!("lobby countdown cancelled");
            self.countdown = None;
        }
    }

    fn launch(&mut self) {
        self.started = true;
        info!("lobby countdown finished; starting game");
        self.emit_status();
        self.events.push(LobbyEvent::StartRequested);
    }

    fn emit_status(&mut self) {
        let status = self.status();
        if self.last_status.as_ref() == Some(&status) {
            return;
        }
        self.last_status = Some(status.clone());
        self.events.push(LobbyEvent::StatusChanged(status));
    }
}

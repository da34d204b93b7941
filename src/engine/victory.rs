use super::*;

impl GameController {
    /// Active color players are recomputed from player state on every check,
    /// so out-of-order enter/exit/death notifications settle correctly.
    pub(super) fn refresh_active_color_players(&mut self) {
        self.active_color_players = self
            .players
            .iter()
            .filter(|(_, player)| player.role == Role::Color && player.connected && player.alive)
            .map(|(client_id, _)| *client_id)
            .collect();
        let active = &self.active_color_players;
        self.players_in_center
            .retain(|client_id| active.contains(client_id));
    }

    pub(super) fn check_result(&self) -> Option<MatchResult> {
        if self.active_color_players.is_empty() {
            return Some(MatchResult::ImpostorWins);
        }
        if self.players_in_center.is_superset(&self.active_color_players) {
            return Some(MatchResult::ColorsWin);
        }
        let impostor_present = self.players.values().any(|player| {
            player.role == Role::Impostor && player.connected && player.alive
        });
        if !impostor_present {
            return Some(MatchResult::ColorsWin);
        }
        None
    }

    /// Re-evaluates the end conditions. Once a result is recorded this is a
    /// no-op.
    pub(super) fn evaluate(&mut self) -> Option<MatchResult> {
        if self.result.is_some() {
            return self.result;
        }
        if self.phase != MatchPhase::InProgress {
            return None;
        }
        self.refresh_active_color_players();
        let result = self.check_result()?;
        self.finish(result);
        Some(result)
    }
}

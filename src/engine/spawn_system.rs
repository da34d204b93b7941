use super::*;

impl GameController {
    pub(super) fn validate_start(&self, clients: &[ClientId]) -> Result<(), StartError> {
        if clients.is_empty() {
            return Err(StartError::NoPlayers);
        }
        if !self.world.has_spawn_points() {
            tracing::error!("match start aborted: no spawn points defined");
            return Err(StartError::NoSpawnPoints);
        }
        if self.color_pool.len() < clients.len() {
            tracing::error!(
                players = clients.len(),
                colors = self.color_pool.len(),
                "match start aborted: not enough player colors"
            );
            return Err(StartError::ColorPoolExhausted {
                players: clients.len(),
                colors: self.color_pool.len(),
            });
        }
        Ok(())
    }

    pub(super) fn spawn_all_players(&mut self, clients: &[ClientId]) {
        for client_id in clients {
            self.spawn_player(*client_id);
        }
    }

    /// Spawns one player at the next spawn point and hands it a color drawn
    /// from the remaining pool. The color also becomes the next route color.
    fn spawn_player(&mut self, client_id: ClientId) {
        if self.players.contains_key(&client_id) {
            return;
        }
        let Some(spawn) = self.world.next_spawn_point() else {
            return;
        };
        let color_index = self.rng.pick_index(self.color_pool.len());
        let color = self.color_pool.remove(color_index);
        let entity_id = self.next_entity_id;
        self.next_entity_id += 1;

        debug!(client_id, entity_id, color = %color.id, "spawning player");
        self.route_colors.push(color.clone());
        self.entity_owners.insert(entity_id, client_id);
        self.players.insert(
            client_id,
            PlayerSession {
                entity_id,
                role: Role::Color,
                color: color.clone(),
                spawn,
                alive: true,
                connected: true,
                in_center: false,
                respawning: false,
            },
        );
        self.events.push(MatchEvent::PlayerSpawned {
            client_id,
            entity_id,
            spawn,
        });
        self.events
            .push(MatchEvent::PlayerColorAssigned { client_id, color });
    }

    /// Exactly one uniformly chosen client becomes the impostor.
    pub(super) fn assign_roles(&mut self, clients: &[ClientId]) {
        let impostor_index = self.rng.pick_index(clients.len());
        for (index, client_id) in clients.iter().enumerate() {
            let Some(player) = self.players.get_mut(client_id) else {
                continue;
            };
            player.role = if index == impostor_index {
                Role::Impostor
            } else {
                Role::Color
            };
            self.events.push(MatchEvent::RoleAssigned {
                client_id: *client_id,
                role: player.role,
            });
        }
        info!(impostor = clients[impostor_index], "impostor assigned");
    }

    pub(super) fn initialize_color_players(&mut self) {
        self.active_color_players = self
            .players
            .iter()
            .filter(|(_, player)| player.role == Role::Color)
            .map(|(client_id, _)| *client_id)
            .collect();
        self.players_in_center.clear();
    }
}

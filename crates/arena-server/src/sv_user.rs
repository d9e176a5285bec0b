// sv_user.rs - client connect/disconnect, spawning, input application

use std::sync::Arc;

use tracing::{info, warn};

use arena_common::shared::Vec2;
use arena_game::ai::InputFlags;
use arena_game::definitions::TankDefinition;
use arena_game::dispatch::Behavior;
use arena_game::tank::{set_inputs, set_level, spawn_tank};
use arena_game::{EntityId, ViewerId};

use crate::error::ServerError;
use crate::server::{Client, ClientState, InputCommand};
use crate::sv_ents::WireCodec;
use crate::sv_main::Server;

impl<C: WireCodec> Server<C> {
    /// Gives a new client a slot. Ids are never reused, so a reconnect
    /// always starts from an empty view.
    pub fn connect(&mut self, name: &str) -> Result<ViewerId, ServerError> {
        if self.clients.len() >= self.config.max_clients {
            return Err(ServerError::ServerFull { max: self.config.max_clients });
        }
        let id = ViewerId(self.next_client_id);
        self.next_client_id += 1;

        self.clients.push(Client::new(id, name, self.config.view_range));
        self.encoder.add_client(id);
        info!(client = ?id, name, "client connected");
        Ok(id)
    }

    /// Drops a client and destroys its body.
    pub fn disconnect(&mut self, id: ViewerId) -> Result<(), ServerError> {
        let index = self.client_index(id)?;
        let client = self.clients.remove(index);
        if let Some(body) = client.body {
            self.arena.destroy(body);
        }
        self.encoder.remove_client(id);
        info!(client = ?id, name = %client.name, "client disconnected");
        Ok(())
    }

    fn client_index(&self, id: ViewerId) -> Result<usize, ServerError> {
        self.clients.iter().position(|c| c.id == id).ok_or(ServerError::UnknownClient(id))
    }

    pub fn client(&self, id: ViewerId) -> Option<&Client> {
        self.clients.iter().find(|c| c.id == id)
    }

    pub fn clients(&self) -> &[Client] {
        &self.clients
    }

    /// Builds a tank for `id` at `position`. A previous body is destroyed.
    pub fn spawn_player(
        &mut self,
        id: ViewerId,
        definition: Arc<TankDefinition>,
        position: Vec2,
    ) -> Result<EntityId, ServerError> {
        let index = self.client_index(id)?;
        if let Some(old) = self.clients[index].body.take() {
            self.arena.destroy(old);
        }

        let name = self.clients[index].name.clone();
        let body = spawn_tank(&mut self.arena, definition, position, None, &name)?;
        let client = &mut self.clients[index];
        client.body = Some(body);
        client.state = ClientState::Spawned;
        client.camera = position;
        Ok(body)
    }

    /// Records the latest inputs from a client. Unknown senders are ignored.
    pub fn apply_input(&mut self, cmd: InputCommand) {
        let Some(client) = self.clients.iter_mut().find(|c| c.id == cmd.client) else {
            warn!(client = ?cmd.client, "input from unknown client");
            return;
        };
        client.inputs = cmd.inputs;
    }

    /// Hands each spawned client's inputs to its body.
    pub(crate) fn execute_inputs(&mut self) {
        for client in &mut self.clients {
            let Some(body) = client.body else { continue };
            let mut inputs = client.inputs;

            if inputs.flags.contains(InputFlags::LEVEL_UP) {
                let level = match self.arena.get(body).map(|e| &e.behavior) {
                    Some(Behavior::Tank(t)) => t.level,
                    _ => 0,
                };
                set_level(&mut self.arena, body, level + 1);
                // one level per press
                inputs.flags.remove(InputFlags::LEVEL_UP);
                client.inputs.flags.remove(InputFlags::LEVEL_UP);
            }

            if !set_inputs(&mut self.arena, body, inputs) {
                client.body = None;
                client.state = ClientState::Connected;
            }
        }
    }
}

// ============================================================
// Tests
// ============================================================

#[cfg(test)]
mod tests {
    use super::*;
    use arena_common::net_queue::PacketQueue;
    use arena_game::ai::Inputs;
    use arena_game::definitions::{basic_tank, twin_tank};
    use arena_game::ArenaConfig;

    use crate::server::ServerConfig;
    use crate::sv_ents::PlainCodec;

    fn make_server(max_clients: usize) -> Server<PlainCodec> {
        let outbound = PacketQueue::new(256);
        let config = ServerConfig { max_clients, ..Default::default() };
        let arena = ArenaConfig { deletion_ticks: 1, id_quarantine: 1, ..Default::default() };
        Server::new(config, arena, PlainCodec, outbound.sender())
    }

    #[test]
    fn test_connect_respects_max_clients() {
        let mut server = make_server(2);
        server.connect("a").unwrap();
        server.connect("b").unwrap();
        assert!(matches!(server.connect("c"), Err(ServerError::ServerFull { max: 2 })));
    }

    #[test]
    fn test_client_ids_are_not_reused() {
        let mut server = make_server(2);
        let a = server.connect("a").unwrap();
        server.disconnect(a).unwrap();
        let b = server.connect("b").unwrap();
        assert_ne!(a, b);
        assert!(matches!(server.disconnect(a), Err(ServerError::UnknownClient(_))));
    }

    #[test]
    fn test_queued_input_moves_the_body() {
        let mut server = make_server(4);
        let a = server.connect("a").unwrap();
        let body = server.spawn_player(a, Arc::new(basic_tank()), [0.0, 0.0]).unwrap();

        let sender = server.input_sender();
        let inputs = Inputs { flags: InputFlags::RIGHT, mouse: [500.0, 0.0] };
        assert!(sender.try_send(InputCommand { client: a, inputs }, 0));
        for _ in 0..5 {
            server.run_tick();
        }
        assert!(server.arena.get(body).unwrap().position.values.x > 0.0);
        assert_eq!(server.client(a).unwrap().camera, server.arena.world_position(body).unwrap());
    }

    #[test]
    fn test_level_up_applies_once_per_press() {
        let mut server = make_server(4);
        let a = server.connect("a").unwrap();
        let body = server.spawn_player(a, Arc::new(basic_tank()), [0.0, 0.0]).unwrap();
        server.apply_input(InputCommand { client: a, inputs: Inputs { flags: InputFlags::LEVEL_UP, mouse: [0.0, 0.0] } });
        server.run_tick();
        server.run_tick();
        match &server.arena.get(body).unwrap().behavior {
            Behavior::Tank(t) => assert_eq!(t.level, 2),
            _ => panic!("not a tank"),
        }
    }

    #[test]
    fn test_respawn_replaces_body_and_disconnect_destroys_it() {
        let mut server = make_server(4);
        let a = server.connect("a").unwrap();
        let first = server.spawn_player(a, Arc::new(basic_tank()), [0.0, 0.0]).unwrap();
        server.run_tick();
        let second = server.spawn_player(a, Arc::new(twin_tank()), [10.0, 0.0]).unwrap();
        assert!(server.arena.get(first).unwrap().is_dying());
        assert_eq!(server.client(a).unwrap().body, Some(second));

        server.disconnect(a).unwrap();
        for _ in 0..3 {
            server.run_tick();
        }
        assert!(server.arena.is_empty());
    }

    #[test]
    fn test_dead_body_returns_client_to_spectating() {
        let mut server = make_server(4);
        let a = server.connect("a").unwrap();
        server.spawn_player(a, Arc::new(basic_tank()), [0.0, 0.0]).unwrap();
        server.apply_input(InputCommand { client: a, inputs: Inputs { flags: InputFlags::SUICIDE, mouse: [0.0, 0.0] } });
        for _ in 0..4 {
            server.run_tick();
        }
        let client = server.client(a).unwrap();
        assert_eq!(client.body, None);
        assert_eq!(client.state, ClientState::Connected);
    }
}

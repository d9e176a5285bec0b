// server.rs - core server types and constants

use std::collections::HashSet;

use arena_common::cvar::CvarContext;
use arena_common::net_queue::{DEFAULT_QUEUE_CAPACITY, MAX_QUEUE_CAPACITY};
use arena_common::shared::{Vec2, DEFAULT_TICKRATE_HZ, MAX_CLIENTS, VEC2_ORIGIN};
use arena_game::ai::Inputs;
use arena_game::{EntityId, Viewer, ViewerId};

// ============================================================
// Constants
// ============================================================

pub const MIN_TICKRATE_HZ: u32 = 1;
pub const MAX_TICKRATE_HZ: u32 = 120;

/// Wall-clock time beyond this many ticks is dropped rather than simulated.
pub const MAX_CATCHUP_TICKS: u32 = 5;

// ============================================================
// ServerConfig
// ============================================================

#[derive(Clone, Debug, PartialEq)]
pub struct ServerConfig {
    pub tickrate: u32,
    pub max_clients: usize,
    pub queue_capacity: usize,
    pub view_range: f32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            tickrate: DEFAULT_TICKRATE_HZ,
            max_clients: MAX_CLIENTS,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            view_range: 1800.0,
        }
    }
}

impl ServerConfig {
    /// Reads `sv_tickrate`, `sv_maxclients`, `sv_queue_capacity` and
    /// `sv_view_range`, falling back to the defaults.
    pub fn from_cvars(ctx: &CvarContext) -> Self {
        let d = Self::default();
        Self {
            tickrate: (ctx.value_or("sv_tickrate", d.tickrate as f32) as u32).clamp(MIN_TICKRATE_HZ, MAX_TICKRATE_HZ),
            max_clients: (ctx.value_or("sv_maxclients", d.max_clients as f32) as usize).clamp(1, MAX_CLIENTS),
            queue_capacity: (ctx.value_or("sv_queue_capacity", d.queue_capacity as f32) as usize)
                .clamp(1, MAX_QUEUE_CAPACITY),
            view_range: ctx.value_or("sv_view_range", d.view_range).max(0.0),
        }
    }

    /// Milliseconds per tick.
    pub fn frame_msec(&self) -> u64 {
        1000 / self.tickrate.max(1) as u64
    }
}

// ============================================================
// Clients
// ============================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClientState {
    /// Has a slot and receives frames, but has no body.
    #[default]
    Connected,
    /// Controls a tank.
    Spawned,
}

#[derive(Debug, Clone)]
pub struct Client {
    pub id: ViewerId,
    pub name: String,
    pub state: ClientState,
    /// The tank this client drives, if spawned.
    pub body: Option<EntityId>,
    pub camera: Vec2,
    pub view_range: f32,
    /// Last inputs received; reapplied each tick until replaced.
    pub inputs: Inputs,
}

impl Client {
    pub fn new(id: ViewerId, name: &str, view_range: f32) -> Self {
        Self {
            id,
            name: name.to_string(),
            state: ClientState::Connected,
            body: None,
            camera: VEC2_ORIGIN,
            view_range,
            inputs: Inputs::default(),
        }
    }

    pub fn viewer(&self) -> Viewer {
        Viewer { id: self.id, center: self.camera, view_range: self.view_range }
    }
}

/// What each client's connection currently knows about. Only frames that
/// actually reached the outbound queue move it forward.
#[derive(Debug, Clone, Default)]
pub struct ClientView {
    pub known: HashSet<EntityId>,
    /// A frame was lost; the next one refreshes everything in view.
    pub resync: bool,
}

impl ClientView {
    /// Commits a frame the client will receive.
    pub fn apply(&mut self, deletions: &[EntityId], creations: impl IntoIterator<Item = EntityId>) {
        for id in deletions {
            self.known.remove(id);
        }
        self.known.extend(creations);
        self.resync = false;
    }
}

// ============================================================
// Queue items
// ============================================================

/// One decoded input message from the I/O side.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InputCommand {
    pub client: ViewerId,
    pub inputs: Inputs,
}

/// One encoded frame for one client, ready for the socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundFrame {
    pub client: ViewerId,
    pub tick: u64,
    pub bytes: Vec<u8>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_from_cvars_clamps() {
        let mut ctx = CvarContext::new();
        ctx.force_set("sv_tickrate", "1000");
        ctx.force_set("sv_maxclients", "0");
        ctx.force_set("sv_queue_capacity", "64");
        let cfg = ServerConfig::from_cvars(&ctx);
        assert_eq!(cfg.tickrate, MAX_TICKRATE_HZ);
        assert_eq!(cfg.max_clients, 1);
        assert_eq!(cfg.queue_capacity, 64);
        assert_eq!(cfg.view_range, 1800.0);
    }

    #[test]
    fn test_frame_msec_from_tickrate() {
        let cfg = ServerConfig { tickrate: 25, ..Default::default() };
        assert_eq!(cfg.frame_msec(), 40);
    }
}

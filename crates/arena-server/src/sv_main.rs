// sv_main.rs - the server frame: wall clock in, fixed ticks out

use tracing::{debug, warn};

use arena_common::net_queue::{PacketQueue, PacketQueueSender};
use arena_game::{Arena, ArenaConfig, TickSummary, Viewer};

use crate::server::{Client, ClientState, InputCommand, OutboundFrame, ServerConfig, MAX_CATCHUP_TICKS};
use crate::sv_ents::{FrameEncoder, WireCodec};

pub struct Server<C: WireCodec> {
    pub config: ServerConfig,
    pub arena: Arena,
    /// Connected clients, ordered by id.
    pub(crate) clients: Vec<Client>,
    pub(crate) encoder: FrameEncoder<C>,
    inbound: PacketQueue<InputCommand>,
    pub(crate) next_client_id: u32,
    /// Wall-clock time not yet consumed by a tick.
    residual_msec: u64,
}

impl<C: WireCodec> Server<C> {
    pub fn new(
        config: ServerConfig,
        arena_config: ArenaConfig,
        codec: C,
        outbound: PacketQueueSender<OutboundFrame>,
    ) -> Self {
        let inbound = PacketQueue::new(config.queue_capacity);
        Self {
            config,
            arena: Arena::new(arena_config),
            clients: Vec::new(),
            encoder: FrameEncoder::new(codec, outbound),
            inbound,
            next_client_id: 0,
            residual_msec: 0,
        }
    }

    /// Handle for the I/O side to push decoded input.
    pub fn input_sender(&self) -> PacketQueueSender<InputCommand> {
        self.inbound.sender()
    }

    pub fn encoder(&self) -> &FrameEncoder<C> {
        &self.encoder
    }

    // ============================================================
    // SV_Frame
    // ============================================================

    /// Advances the server by `msec` of wall-clock time, running as many
    /// ticks as fit. Leftover time carries into the next call. Returns the
    /// number of ticks run.
    pub fn frame(&mut self, msec: u64) -> u32 {
        let frame_msec = self.config.frame_msec().max(1);
        self.residual_msec += msec;

        let mut ran = 0;
        while self.residual_msec >= frame_msec {
            if ran == MAX_CATCHUP_TICKS {
                warn!(behind_msec = self.residual_msec, "server can't keep up, dropping time");
                self.residual_msec = 0;
                break;
            }
            self.run_tick();
            self.residual_msec -= frame_msec;
            ran += 1;
        }
        ran
    }

    /// One simulation tick: input, simulate, flush to every client.
    pub fn run_tick(&mut self) -> TickSummary {
        self.read_inputs();
        self.execute_inputs();

        let viewers = self.viewers();
        let summary = self.arena.run_tick(&viewers, &mut self.encoder);
        for client in self.encoder.take_lost_clients() {
            debug!(?client, tick = summary.tick, "frame lost, resyncing");
            self.arena.forget_viewer(client);
        }

        self.update_cameras();
        if summary.faulted > 0 {
            warn!(tick = summary.tick, faulted = summary.faulted, "entity hooks faulted");
        }
        summary
    }

    /// Drains everything the I/O side queued since the last tick.
    fn read_inputs(&mut self) {
        for queued in self.inbound.drain() {
            self.apply_input(queued.item);
        }
    }

    pub fn viewers(&self) -> Vec<Viewer> {
        self.clients.iter().map(Client::viewer).collect()
    }

    /// Cameras follow their bodies; a client whose body is gone drops back
    /// to spectating where it died.
    fn update_cameras(&mut self) {
        for client in &mut self.clients {
            let Some(body) = client.body else { continue };
            match self.arena.world_position(body) {
                Some(pos) => client.camera = pos,
                None => {
                    debug!(client = ?client.id, %body, "body gone");
                    client.body = None;
                    client.state = ClientState::Connected;
                }
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
    use arena_game::dispatch::Behavior;

    use crate::sv_ents::PlainCodec;

    fn make_server(tickrate: u32) -> (Server<PlainCodec>, PacketQueue<OutboundFrame>) {
        let outbound = PacketQueue::new(64);
        let config = ServerConfig { tickrate, ..Default::default() };
        let server = Server::new(config, ArenaConfig::default(), PlainCodec, outbound.sender());
        (server, outbound)
    }

    #[test]
    fn test_residual_time_accumulates() {
        let (mut server, _out) = make_server(25);
        assert_eq!(server.frame(30), 0);
        assert_eq!(server.frame(30), 1);
        assert_eq!(server.arena.tick(), 1);
        // 20 left over + 60
        assert_eq!(server.frame(60), 2);
        assert_eq!(server.arena.tick(), 3);
    }

    #[test]
    fn test_long_stall_is_capped() {
        let (mut server, _out) = make_server(25);
        assert_eq!(server.frame(10_000), MAX_CATCHUP_TICKS);
        assert_eq!(server.frame(0), 0);
    }

    #[test]
    fn test_frames_reach_the_outbound_queue() {
        let (mut server, out) = make_server(25);
        let a = server.connect("a").unwrap();
        let b = server.connect("b").unwrap();
        server.arena.spawn(Behavior::Object, |_| Ok(())).unwrap();
        server.run_tick();

        let frames: Vec<OutboundFrame> = out.drain().into_iter().map(|q| q.item).collect();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].client, a);
        assert_eq!(frames[1].client, b);
        assert_eq!(frames[0].bytes, frames[1].bytes);
    }

    #[test]
    fn test_client_with_dropped_frame_is_resynced() {
        let outbound = PacketQueue::new(2);
        let mut server = Server::new(ServerConfig::default(), ArenaConfig::default(), PlainCodec, outbound.sender());
        let a = server.connect("a").unwrap();
        let b = server.connect("b").unwrap();
        let obj = server.arena.spawn(Behavior::Object, |_| Ok(())).unwrap();

        // only room for a's frame
        assert!(outbound.sender().try_send(OutboundFrame { client: a, tick: 0, bytes: Vec::new() }, 0));
        server.run_tick();
        assert_eq!(server.encoder().dropped, 1);
        assert!(server.encoder().view(a).unwrap().known.contains(&obj));
        assert!(!server.encoder().view(b).unwrap().known.contains(&obj));
        outbound.drain();

        server.run_tick();
        let frames: Vec<OutboundFrame> = outbound.drain().into_iter().map(|q| q.item).collect();
        assert_eq!(frames.len(), 2);
        // a has nothing new; b gets the creation it missed
        assert_eq!(&frames[0].bytes[8..14], &[0, 0, 0, 0, 0, 0]);
        assert_eq!(&frames[1].bytes[8..12], &[0, 0, 1, 0]);
        assert!(server.encoder().view(b).unwrap().known.contains(&obj));
    }
}

// sys_ded.rs - dedicated server startup and run loop

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use thiserror::Error as ThisError;
use tracing::{info, warn};

use arena_common::common::sys_milliseconds;
use arena_common::cvar::{cvar_init, with_cvar_ctx, CvarContext, CvarFlags};
use arena_common::error::ConfigError;
use arena_common::net_queue::{PacketQueue, PacketQueueSender};
use arena_common::shared::{angle_vector, vector_ma, Vec2};
use arena_game::ai::{InputFlags, Inputs};
use arena_game::definitions::{auto3_tank, basic_tank, overseer_tank, smasher_tank, twin_tank, TankDefinition};
use arena_game::{ArenaConfig, ViewerId};
use arena_server::{InputCommand, OutboundFrame, PlainCodec, Server, ServerConfig, ServerError};

use crate::net_io_thread::{spawn_frame_writer, CaptureSink, CountingSink, FrameSink, FrameWriterConfig};

#[derive(Debug, ThisError)]
pub enum DedError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Server(#[from] ServerError),

    #[error("I/O: {0}")]
    Io(#[from] std::io::Error),

    #[error("frame writer thread panicked")]
    WriterPanicked,
}

/// Every variable the dedicated server reads, with its default.
const DEFAULT_CVARS: &[(&str, &str)] = &[
    ("sv_tickrate", "25"),
    ("sv_deletion_ticks", "5"),
    ("sv_id_quarantine", "5"),
    ("sv_max_entities", "16384"),
    ("sv_view_range", "1800"),
    ("sv_seed", "0"),
    ("sv_maxclients", "32"),
    ("sv_queue_capacity", "256"),
    ("sv_bots", "4"),
    ("sv_run_seconds", "0"),
    ("sv_capture", ""),
    ("log_level", "info"),
    ("log_json", "0"),
];

pub fn register_cvars(ctx: &mut CvarContext) {
    for (name, value) in DEFAULT_CVARS {
        ctx.get(name, value, CvarFlags::ARCHIVE);
    }
}

/// Everything startup decided, read once from the cvars.
#[derive(Debug, Clone, PartialEq)]
pub struct StartupConfig {
    pub server: ServerConfig,
    pub arena: ArenaConfig,
    pub log_level: String,
    pub log_json: bool,
    pub capture: Option<PathBuf>,
    pub bots: usize,
    /// 0 runs until killed.
    pub run_seconds: u64,
}

impl StartupConfig {
    pub fn from_cvars(ctx: &CvarContext) -> Self {
        let capture = ctx.variable_string("sv_capture");
        Self {
            server: ServerConfig::from_cvars(ctx),
            arena: ArenaConfig::from_cvars(ctx),
            log_level: ctx.variable_string("log_level").to_string(),
            log_json: ctx.variable_value("log_json") != 0.0,
            capture: (!capture.is_empty()).then(|| PathBuf::from(capture)),
            bots: ctx.variable_value("sv_bots").max(0.0) as usize,
            run_seconds: ctx.variable_value("sv_run_seconds").max(0.0) as u64,
        }
    }
}

/// Applies `+set name value` and `+exec file` arguments.
pub fn parse_args(ctx: &mut CvarContext, args: &[String]) -> Result<(), ConfigError> {
    let rest = ctx.apply_command_line(args);
    let mut iter = rest.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "+exec" => match iter.next() {
                Some(path) => {
                    ctx.exec_file(std::path::Path::new(path))?;
                }
                None => warn!("+exec needs a file name"),
            },
            other => warn!(arg = other, "ignoring unknown argument"),
        }
    }
    Ok(())
}

/// Sets up the global cvar registry from the command line.
pub fn init(args: &[String]) -> Result<StartupConfig, ConfigError> {
    cvar_init();
    with_cvar_ctx(|ctx| {
        register_cvars(ctx);
        parse_args(ctx, args)?;
        Ok(StartupConfig::from_cvars(ctx))
    })
    .unwrap_or(Err(ConfigError::Uninitialized))
}

// ============================================================
// Bots
// ============================================================

/// Stand-in players that feed the input queue the way the network
/// reader would.
pub struct BotDriver {
    bots: Vec<ViewerId>,
    rng: StdRng,
    roster: Vec<Arc<TankDefinition>>,
}

impl BotDriver {
    pub fn new(seed: u64) -> Self {
        Self {
            bots: Vec::new(),
            rng: StdRng::seed_from_u64(seed),
            roster: vec![
                Arc::new(basic_tank()),
                Arc::new(twin_tank()),
                Arc::new(overseer_tank()),
                Arc::new(smasher_tank()),
                Arc::new(auto3_tank()),
            ],
        }
    }

    pub fn connect_all(&mut self, server: &mut Server<PlainCodec>, count: usize) -> Result<(), ServerError> {
        for i in 0..count {
            let id = server.connect(&format!("bot{}", i))?;
            self.bots.push(id);
        }
        Ok(())
    }

    fn random_spot(&mut self) -> Vec2 {
        [self.rng.gen_range(-1000.0..1000.0), self.rng.gen_range(-1000.0..1000.0)]
    }

    /// Respawns dead bots and queues fresh inputs for live ones.
    pub fn drive(&mut self, server: &mut Server<PlainCodec>, sender: &PacketQueueSender<InputCommand>) {
        for i in 0..self.bots.len() {
            let id = self.bots[i];
            let Some(client) = server.client(id) else { continue };
            let camera = client.camera;

            if client.body.is_none() {
                let def = Arc::clone(&self.roster[self.rng.gen_range(0..self.roster.len())]);
                let spot = self.random_spot();
                if let Err(e) = server.spawn_player(id, def, spot) {
                    warn!(client = ?id, "bot respawn failed: {}", e);
                }
                continue;
            }

            let mut flags = InputFlags::LEFT_CLICK;
            flags |= match self.rng.gen_range(0..5) {
                0 => InputFlags::UP,
                1 => InputFlags::DOWN,
                2 => InputFlags::LEFT,
                3 => InputFlags::RIGHT,
                _ => InputFlags::empty(),
            };
            let aim = self.rng.gen_range(0.0..std::f32::consts::TAU);
            let mouse = vector_ma(&camera, 300.0, &angle_vector(aim));
            // a full queue just means this bot skips a beat
            sender.try_send(InputCommand { client: id, inputs: Inputs { flags, mouse } }, sys_milliseconds());
        }
    }
}

// ============================================================
// Run loop
// ============================================================

pub fn run(startup: StartupConfig) -> Result<(), DedError> {
    let outbound: PacketQueue<OutboundFrame> = PacketQueue::new(startup.server.queue_capacity * startup.server.max_clients);
    let sink: Box<dyn FrameSink> = match &startup.capture {
        Some(path) => Box::new(CaptureSink::create(path)?),
        None => Box::new(CountingSink::default()),
    };
    let shutdown = Arc::new(AtomicBool::new(false));
    let writer = spawn_frame_writer(FrameWriterConfig {
        receiver: outbound.receiver(),
        sink,
        shutdown: Arc::clone(&shutdown),
    })?;

    let mut server = Server::new(startup.server.clone(), startup.arena.clone(), PlainCodec, outbound.sender());
    drop(outbound);
    let inputs = server.input_sender();

    let mut bots = BotDriver::new(startup.arena.seed);
    bots.connect_all(&mut server, startup.bots.min(startup.server.max_clients))?;

    info!(
        tickrate = startup.server.tickrate,
        bots = startup.bots,
        capture = ?startup.capture,
        "dedicated server running"
    );

    let frame_msec = startup.server.frame_msec();
    let start = sys_milliseconds();
    let mut oldtime = start;
    loop {
        let newtime = sys_milliseconds();
        let msec = newtime - oldtime;
        if msec < frame_msec {
            thread::sleep(Duration::from_millis(frame_msec - msec));
            continue;
        }
        oldtime = newtime;

        bots.drive(&mut server, &inputs);
        server.frame(msec);

        if startup.run_seconds > 0 && newtime - start >= startup.run_seconds * 1000 {
            break;
        }
    }

    info!(
        tick = server.arena.tick(),
        entities = server.arena.len(),
        dropped = server.encoder().dropped,
        "shutting down"
    );
    shutdown.store(true, Ordering::Relaxed);
    drop(server);
    let stats = writer.join().map_err(|_| DedError::WriterPanicked)?;
    info!(frames = stats.frames, errors = stats.errors, max_latency_ms = stats.max_latency_ms, "writer finished");
    Ok(())
}

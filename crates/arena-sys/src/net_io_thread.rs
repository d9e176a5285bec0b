// net_io_thread.rs - dedicated writer thread for encoded frames
//
// The tick loop never touches a socket. Encoded frames are pushed to a
// bounded queue and this thread hands them to a `FrameSink` as they
// arrive, so a slow peer can only ever cost dropped frames.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{Receiver, RecvTimeoutError};
use tracing::{debug, trace, warn};

use arena_common::common::sys_milliseconds;
use arena_common::net_queue::Queued;
use arena_server::OutboundFrame;

/// How long the writer waits for a frame before rechecking shutdown.
const IO_POLL_TIMEOUT_MS: u64 = 10;

/// Where encoded frames end up.
pub trait FrameSink: Send {
    fn write_frame(&mut self, frame: &OutboundFrame) -> io::Result<()>;

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Counts bytes per tick; used when nothing is listening.
#[derive(Debug, Default)]
pub struct CountingSink {
    pub frames: u64,
    pub bytes: u64,
}

impl FrameSink for CountingSink {
    fn write_frame(&mut self, frame: &OutboundFrame) -> io::Result<()> {
        self.frames += 1;
        self.bytes += frame.bytes.len() as u64;
        trace!(client = ?frame.client, tick = frame.tick, len = frame.bytes.len(), "frame");
        Ok(())
    }
}

/// Appends frames to a capture file as `client u32 | tick u64 | len u32 | bytes`.
pub struct CaptureSink<W: Write + Send> {
    out: W,
}

impl CaptureSink<BufWriter<File>> {
    pub fn create(path: &Path) -> io::Result<Self> {
        Ok(Self { out: BufWriter::new(File::create(path)?) })
    }
}

impl<W: Write + Send> CaptureSink<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write + Send> FrameSink for CaptureSink<W> {
    fn write_frame(&mut self, frame: &OutboundFrame) -> io::Result<()> {
        let len = u32::try_from(frame.bytes.len()).map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "frame too large"))?;
        self.out.write_all(&frame.client.0.to_le_bytes())?;
        self.out.write_all(&frame.tick.to_le_bytes())?;
        self.out.write_all(&len.to_le_bytes())?;
        self.out.write_all(&frame.bytes)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.out.flush()
    }
}

/// Configuration for the writer thread.
pub struct FrameWriterConfig {
    pub receiver: Receiver<Queued<OutboundFrame>>,
    pub sink: Box<dyn FrameSink>,
    pub shutdown: Arc<AtomicBool>,
}

/// Totals reported when the writer exits.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct WriterStats {
    pub frames: u64,
    pub errors: u64,
    /// Worst enqueue-to-write delay seen, in milliseconds.
    pub max_latency_ms: u64,
}

/// Spawns the writer thread. It runs until shutdown is signalled and the
/// queue is empty, or until every sender is gone.
pub fn spawn_frame_writer(config: FrameWriterConfig) -> io::Result<JoinHandle<WriterStats>> {
    thread::Builder::new()
        .name("frame-writer".to_string())
        .spawn(move || frame_writer_loop(config))
}

fn frame_writer_loop(config: FrameWriterConfig) -> WriterStats {
    let FrameWriterConfig { receiver, mut sink, shutdown } = config;
    let mut stats = WriterStats::default();

    loop {
        match receiver.recv_timeout(Duration::from_millis(IO_POLL_TIMEOUT_MS)) {
            Ok(queued) => {
                let latency = sys_milliseconds().saturating_sub(queued.timestamp);
                stats.max_latency_ms = stats.max_latency_ms.max(latency);
                match sink.write_frame(&queued.item) {
                    Ok(()) => stats.frames += 1,
                    Err(e) => {
                        stats.errors += 1;
                        warn!(client = ?queued.item.client, "frame write failed: {}", e);
                    }
                }
            }
            Err(RecvTimeoutError::Timeout) => {
                if shutdown.load(Ordering::Relaxed) {
                    break;
                }
                if let Err(e) = sink.flush() {
                    warn!("sink flush failed: {}", e);
                }
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    if let Err(e) = sink.flush() {
        warn!("sink flush failed: {}", e);
    }
    debug!(frames = stats.frames, errors = stats.errors, max_latency_ms = stats.max_latency_ms, "frame writer stopped");
    stats
}

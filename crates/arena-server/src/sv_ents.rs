// sv_ents.rs - per-client entity culling and frame encoding
//
// The arena hands every tick's delta to a `FrameEncoder`. For each client
// the encoder works out which entities entered view (sent whole), left view
// or were removed (sent as deletions) and which changed (sent as dirty
// fields only), then encodes the per-client frames and queues the bytes
// for the I/O thread. Deletions always precede creations in a frame so a
// recycled identifier never collides with its previous occupant.

use std::collections::{BTreeMap, HashSet};

use rayon::prelude::*;
use thiserror::Error as ThisError;
use tracing::{trace, warn};

use arena_common::common::sys_milliseconds;
use arena_common::net_queue::PacketQueueSender;
use arena_game::dispatch::EntityKind;
use arena_game::field_group::{DirtyField, FieldValue};
use arena_game::{EntityId, Serializer, TickDelta, ViewerId};

use crate::server::{ClientView, OutboundFrame};

/// Below this many clients, frames are encoded on the tick thread.
pub const PARALLEL_CLIENT_THRESHOLD: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq, ThisError)]
pub enum CodecError {
    #[error("string field too long ({len} bytes)")]
    StringTooLong { len: usize },

    #[error("frame too large ({len} bytes)")]
    FrameTooLarge { len: usize },

    #[error("{0}")]
    Other(String),
}

// ============================================================
// Client frames
// ============================================================

#[derive(Debug, Clone, PartialEq)]
pub struct EntityCreate<'a> {
    pub id: EntityId,
    pub kind: EntityKind,
    pub fields: &'a [DirtyField],
}

#[derive(Debug, Clone, PartialEq)]
pub struct EntityUpdate<'a> {
    pub id: EntityId,
    pub fields: &'a [DirtyField],
}

/// Everything one client gets for one tick.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ClientFrame<'a> {
    pub client: Option<ViewerId>,
    pub tick: u64,
    pub deletions: Vec<EntityId>,
    pub creations: Vec<EntityCreate<'a>>,
    pub updates: Vec<EntityUpdate<'a>>,
}

impl ClientFrame<'_> {
    pub fn is_empty(&self) -> bool {
        self.deletions.is_empty() && self.creations.is_empty() && self.updates.is_empty()
    }
}

/// Culls `delta` for one client against what the client holds. The view
/// is left alone; it moves forward only once the frame is queued.
pub fn build_client_frame<'a>(client: ViewerId, view: &ClientView, delta: &'a TickDelta) -> ClientFrame<'a> {
    let mut frame = ClientFrame { client: Some(client), tick: delta.tick, ..Default::default() };

    for id in &delta.removed {
        if view.known.contains(id) {
            frame.deletions.push(*id);
        }
    }

    for u in &delta.updates {
        let visible = u.is_visible_to(client);
        let known = view.known.contains(&u.id);
        match (visible, known) {
            (true, false) => {
                // newly seen entities always carry a snapshot
                let Some(snapshot) = u.snapshot.as_deref() else {
                    warn!(entity = %u.id, ?client, "entered view without a snapshot");
                    continue;
                };
                frame.creations.push(EntityCreate { id: u.id, kind: u.kind, fields: snapshot });
            }
            (false, true) => frame.deletions.push(u.id),
            (true, true) if view.resync => {
                // lost frames may have carried changes to any field
                let fields = u.snapshot.as_deref().unwrap_or(&u.fields);
                if !fields.is_empty() {
                    frame.updates.push(EntityUpdate { id: u.id, fields });
                }
            }
            (true, true) if !u.fields.is_empty() => {
                frame.updates.push(EntityUpdate { id: u.id, fields: &u.fields });
            }
            _ => {}
        }
    }

    if view.resync {
        // a removal carried by a lost frame is never reported again
        let present: HashSet<EntityId> = delta.updates.iter().map(|u| u.id).collect();
        let mut gone: Vec<EntityId> = view
            .known
            .iter()
            .filter(|id| !present.contains(id) && !delta.removed.contains(id))
            .copied()
            .collect();
        gone.sort_unstable();
        frame.deletions.extend(gone);
    }
    frame
}

// ============================================================
// Codec boundary
// ============================================================

/// Turns a client frame into wire bytes.
pub trait WireCodec: Send + Sync {
    fn encode(&self, frame: &ClientFrame<'_>) -> Result<Vec<u8>, CodecError>;
}

/// Little-endian length-prefixed layout for tools and tests. Not the
/// game client's protocol.
///
/// ```text
/// tick u64 | deletions u16 (id)* | creations u16 (id kind fields)* | updates u16 (id fields)*
/// id     = index u32, generation u32
/// fields = count u16, (group u8, field u8, tag u8, value)*
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainCodec;

pub const PLAIN_MAX_FRAME: usize = 1 << 20;

fn put_id(out: &mut Vec<u8>, id: EntityId) {
    out.extend_from_slice(&id.index().to_le_bytes());
    out.extend_from_slice(&id.generation().to_le_bytes());
}

fn put_count(out: &mut Vec<u8>, n: usize) -> Result<(), CodecError> {
    let n = u16::try_from(n).map_err(|_| CodecError::FrameTooLarge { len: n })?;
    out.extend_from_slice(&n.to_le_bytes());
    Ok(())
}

fn put_fields(out: &mut Vec<u8>, fields: &[DirtyField]) -> Result<(), CodecError> {
    put_count(out, fields.len())?;
    for f in fields {
        out.push(f.group as u8);
        out.push(f.field);
        match &f.value {
            FieldValue::Float(v) => {
                out.push(0);
                out.extend_from_slice(&v.to_le_bytes());
            }
            FieldValue::Int(v) => {
                out.push(1);
                out.extend_from_slice(&v.to_le_bytes());
            }
            FieldValue::Flags(v) => {
                out.push(2);
                out.extend_from_slice(&v.to_le_bytes());
            }
            FieldValue::Entity(None) => out.push(3),
            FieldValue::Entity(Some(id)) => {
                out.push(4);
                put_id(out, *id);
            }
            FieldValue::Str(s) => {
                out.push(5);
                let len = u16::try_from(s.len()).map_err(|_| CodecError::StringTooLong { len: s.len() })?;
                out.extend_from_slice(&len.to_le_bytes());
                out.extend_from_slice(s.as_bytes());
            }
        }
    }
    Ok(())
}

impl WireCodec for PlainCodec {
    fn encode(&self, frame: &ClientFrame<'_>) -> Result<Vec<u8>, CodecError> {
        let mut out = Vec::with_capacity(64);
        out.extend_from_slice(&frame.tick.to_le_bytes());

        put_count(&mut out, frame.deletions.len())?;
        for id in &frame.deletions {
            put_id(&mut out, *id);
        }
        put_count(&mut out, frame.creations.len())?;
        for c in &frame.creations {
            put_id(&mut out, c.id);
            out.push(c.kind as u8);
            put_fields(&mut out, c.fields)?;
        }
        put_count(&mut out, frame.updates.len())?;
        for u in &frame.updates {
            put_id(&mut out, u.id);
            put_fields(&mut out, u.fields)?;
        }

        if out.len() > PLAIN_MAX_FRAME {
            return Err(CodecError::FrameTooLarge { len: out.len() });
        }
        Ok(out)
    }
}

// ============================================================
// FrameEncoder
// ============================================================

/// The arena's serializer on a running server.
pub struct FrameEncoder<C: WireCodec> {
    codec: C,
    views: BTreeMap<ViewerId, ClientView>,
    outbound: PacketQueueSender<OutboundFrame>,
    /// Frames the outbound queue had no room for.
    pub dropped: u64,
    /// Frames the codec refused.
    pub failed: u64,
    lost: Vec<ViewerId>,
}

impl<C: WireCodec> FrameEncoder<C> {
    pub fn new(codec: C, outbound: PacketQueueSender<OutboundFrame>) -> Self {
        Self { codec, views: BTreeMap::new(), outbound, dropped: 0, failed: 0, lost: Vec::new() }
    }

    /// Starts tracking a client. Its next frame carries everything in view.
    pub fn add_client(&mut self, client: ViewerId) {
        self.views.insert(client, ClientView::default());
    }

    pub fn remove_client(&mut self, client: ViewerId) {
        self.views.remove(&client);
    }

    pub fn view(&self, client: ViewerId) -> Option<&ClientView> {
        self.views.get(&client)
    }

    /// Clients whose frame was lost since the last call. The arena must
    /// forget what they saw so the next flush carries fresh snapshots.
    pub fn take_lost_clients(&mut self) -> Vec<ViewerId> {
        std::mem::take(&mut self.lost)
    }

    fn frame_lost(&mut self, client: ViewerId) {
        if let Some(view) = self.views.get_mut(&client) {
            view.resync = true;
        }
        if !self.lost.contains(&client) {
            self.lost.push(client);
        }
    }
}

impl<C: WireCodec> Serializer for FrameEncoder<C> {
    fn serialize(&mut self, delta: &TickDelta) {
        let codec = &self.codec;
        let encode = |(client, view): (&ViewerId, &ClientView)| {
            let frame = build_client_frame(*client, view, delta);
            let bytes = codec.encode(&frame);
            let creations: Vec<EntityId> = frame.creations.iter().map(|c| c.id).collect();
            (*client, frame.deletions, creations, bytes)
        };
        let encoded: Vec<_> = if self.views.len() > PARALLEL_CLIENT_THRESHOLD {
            self.views.par_iter().map(encode).collect()
        } else {
            self.views.iter().map(encode).collect()
        };

        let now = sys_milliseconds();
        let clients = encoded.len();
        for (client, deletions, creations, result) in encoded {
            match result {
                Ok(bytes) => {
                    let frame = OutboundFrame { client, tick: delta.tick, bytes };
                    if self.outbound.try_send(frame, now) {
                        if let Some(view) = self.views.get_mut(&client) {
                            view.apply(&deletions, creations);
                        }
                    } else {
                        self.dropped += 1;
                        self.frame_lost(client);
                    }
                }
                Err(err) => {
                    self.failed += 1;
                    warn!(?client, tick = delta.tick, "frame not sent: {}", err);
                    self.frame_lost(client);
                }
            }
        }
        trace!(tick = delta.tick, clients, "frames encoded");
    }
}

// ============================================================
// Tests
// ============================================================

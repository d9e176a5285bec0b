// ai.rs - controller inputs and the target-acquisition contract

use std::f32::consts::PI;

use bitflags::bitflags;
use rand::Rng;

use arena_common::shared::{angle_between, normalize_angle, vector_distance_squared, Vec2, VEC2_ORIGIN};

use crate::arena::Arena;
use crate::combat::team_of;
use crate::dispatch::EntityKind;
use crate::entity::EntityId;

/// Radians per tick an idle turret turns.
pub const PASSIVE_ROTATION: f32 = 0.01;

bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct InputFlags: u32 {
        const LEFT_CLICK  = 1 << 0;
        const UP          = 1 << 1;
        const LEFT        = 1 << 2;
        const DOWN        = 1 << 3;
        const RIGHT       = 1 << 4;
        const GOD_MODE    = 1 << 5;
        const SUICIDE     = 1 << 6;
        const RIGHT_CLICK = 1 << 7;
        const LEVEL_UP    = 1 << 8;
    }
}

/// What a controller (player or AI) is asking for this tick.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Inputs {
    pub flags: InputFlags,
    /// Aim point, world coordinates.
    pub mouse: Vec2,
}

impl Inputs {
    #[inline]
    pub fn attempting_shot(&self) -> bool {
        self.flags.contains(InputFlags::LEFT_CLICK)
    }

    #[inline]
    pub fn attempting_repel(&self) -> bool {
        self.flags.contains(InputFlags::RIGHT_CLICK)
    }

    /// Movement direction from the arrow flags, or `None` when standing still.
    pub fn movement_angle(&self) -> Option<f32> {
        let mut dir = VEC2_ORIGIN;
        if self.flags.contains(InputFlags::UP) {
            dir[1] -= 1.0;
        }
        if self.flags.contains(InputFlags::DOWN) {
            dir[1] += 1.0;
        }
        if self.flags.contains(InputFlags::LEFT) {
            dir[0] -= 1.0;
        }
        if self.flags.contains(InputFlags::RIGHT) {
            dir[0] += 1.0;
        }
        if dir == VEC2_ORIGIN {
            return None;
        }
        Some(dir[1].atan2(dir[0]))
    }
}

/// Where the turret is looking from, handed to target filters.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AimFrame {
    pub origin: Vec2,
    /// Angle the turret rests at when idle (world).
    pub rest_angle: f32,
}

/// `(candidate_position, frame) -> acceptable`.
pub type TargetFilter = Box<dyn Fn(Vec2, &AimFrame) -> bool>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AiState {
    Idle,
    HasTarget,
    /// Following the owner's inputs.
    Possessed,
}

pub struct Ai {
    pub state: AiState,
    pub view_range: f32,
    pub target: Option<EntityId>,
    pub inputs: Inputs,
    pub passive_rotation: f32,
    pub filter: Option<TargetFilter>,
}

impl Ai {
    pub fn new(view_range: f32, arena: &mut Arena) -> Self {
        let passive_rotation = if arena.rng().gen_bool(0.5) { PASSIVE_ROTATION } else { -PASSIVE_ROTATION };
        Ai {
            state: AiState::Idle,
            view_range,
            target: None,
            inputs: Inputs::default(),
            passive_rotation,
            filter: None,
        }
    }

    /// Takes the result of a `find_target` search made from `origin`.
    /// Returns the world aim angle when there is a target.
    pub fn observe(&mut self, found: Option<(EntityId, Vec2)>, origin: &Vec2) -> Option<f32> {
        match found {
            Some((id, pos)) => {
                self.state = AiState::HasTarget;
                self.target = Some(id);
                self.inputs.mouse = pos;
                self.inputs.flags.insert(InputFlags::LEFT_CLICK);
                Some(angle_between(origin, &pos))
            }
            None => {
                self.state = AiState::Idle;
                self.target = None;
                self.inputs.flags.remove(InputFlags::LEFT_CLICK);
                None
            }
        }
    }

    /// Copies the owner's inputs and aims where the owner aims.
    pub fn possess(&mut self, owner_inputs: &Inputs, origin: &Vec2) -> f32 {
        self.state = AiState::Possessed;
        self.target = None;
        self.inputs = *owner_inputs;
        angle_between(origin, &owner_inputs.mouse)
    }
}

/// Nearest live enemy of `team` within `view_range` of `frame.origin` that
/// `filter` accepts. Dying entities, attachments and projectiles are never
/// candidates.
pub fn find_target(
    arena: &Arena,
    team: EntityId,
    view_range: f32,
    filter: Option<&TargetFilter>,
    frame: &AimFrame,
) -> Option<(EntityId, Vec2)> {
    let range_sq = view_range * view_range;
    let mut best: Option<(EntityId, Vec2, f32)> = None;

    for e in arena.entities() {
        if !e.is_live() || e.health.is_none() || e.kind() == EntityKind::Projectile {
            continue;
        }
        if team_of(e) == team {
            continue;
        }
        let Some(pos) = arena.world_position(e.id()) else { continue };
        let dist = vector_distance_squared(&frame.origin, &pos);
        if dist > range_sq {
            continue;
        }
        if let Some(f) = filter {
            if !f(pos, frame) {
                continue;
            }
        }
        if best.map_or(true, |(_, _, d)| dist < d) {
            best = Some((e.id(), pos, dist));
        }
    }
    best.map(|(id, pos, _)| (id, pos))
}

/// Accepts candidates within `half_arc` radians either side of the rest angle.
pub fn arc_filter(half_arc: f32) -> TargetFilter {
    Box::new(move |pos, frame| {
        let to_target = angle_between(&frame.origin, &pos);
        let delta = normalize_angle(to_target - frame.rest_angle);
        delta < half_arc || delta > 2.0 * PI - half_arc
    })
}

// ============================================================
// Tests
// ============================================================

// auto_turret.rs - self-aiming turrets and rotating turret rings

use std::f32::consts::{FRAC_PI_2, PI};
use std::sync::Arc;

use arena_common::shared::normalize_angle;

use crate::addons::{spawn_guard, GuardSpec};
use crate::ai::{arc_filter, find_target, Ai, AimFrame, PASSIVE_ROTATION};
use crate::arena::Arena;
use crate::barrel::{barrel_base, spawn_barrel};
use crate::combat::team_of;
use crate::definitions::{auto_turret_mini_barrel, BarrelDefinition};
use crate::dispatch::Behavior;
use crate::entity::{EntityId, OrphanPolicy};
use crate::error::SpawnError;
use crate::groups::{Color, PositionFlags, RelationsValues, StyleFlags};

pub const TURRET_VIEW_RANGE: f32 = 1700.0;
/// Body size of a turret on a level 1 tank.
pub const TURRET_BASE_SIZE: f32 = 25.0;
/// Ring radius relative to the owner's size.
pub const RING_OFFSET_RATIO: f32 = 0.8;

/// Where a ring turret sits on its rotator.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RingSlot {
    pub rotator: EntityId,
    pub slot_angle: f32,
    pub offset_ratio: f32,
}

pub struct TurretState {
    pub owner: EntityId,
    pub ai: Ai,
    /// Follows the owner's aim while the owner is shooting.
    pub influenced_by_owner_inputs: bool,
    pub ring: Option<RingSlot>,
    pub barrel: Option<EntityId>,
    pub base_size: f32,
}

fn spawn_turret(
    arena: &mut Arena,
    owner: EntityId,
    parent: EntityId,
    def: BarrelDefinition,
    ring: Option<RingSlot>,
) -> Result<EntityId, SpawnError> {
    let base = barrel_base(arena, owner).ok_or(SpawnError::InvalidOwner(owner))?;
    let team = arena.get(owner).and_then(|e| e.relations.values.team);
    let mut ai = Ai::new(TURRET_VIEW_RANGE, arena);
    if ring.is_some() {
        ai.filter = Some(arc_filter(FRAC_PI_2));
    }

    let state = TurretState {
        owner,
        ai,
        influenced_by_owner_inputs: ring.is_some(),
        ring,
        barrel: None,
        base_size: TURRET_BASE_SIZE,
    };
    let id = arena.spawn(Behavior::AutoTurret(Box::new(state)), |e| {
        e.relations.values = RelationsValues { parent: Some(parent), owner: Some(owner), team };
        e.orphan_policy = OrphanPolicy::DieWithParent;
        e.position.values.flags |= PositionFlags::ABSOLUTE_ROTATION;
        e.style.values.flags |= StyleFlags::SHOWS_ABOVE_PARENT;
        e.style.values.color = Color::Barrel.into();
        e.physics.values.size = TURRET_BASE_SIZE * base.size_factor;
        Ok(())
    })?;

    let barrel = spawn_barrel(arena, id, Arc::new(def))?;
    if let Some(Behavior::AutoTurret(t)) = arena.get_mut(id).map(|e| &mut e.behavior) {
        t.barrel = Some(barrel);
    }
    Ok(id)
}

/// One turret centred on `owner`.
pub fn spawn_auto_turret(arena: &mut Arena, owner: EntityId, def: BarrelDefinition) -> Result<EntityId, SpawnError> {
    spawn_turret(arena, owner, owner, def, None)
}

/// `count` turrets spaced evenly on an invisible rotator. Returns the
/// rotator followed by the turrets.
pub fn spawn_turret_ring(arena: &mut Arena, owner: EntityId, count: usize) -> Result<Vec<EntityId>, SpawnError> {
    let spec = GuardSpec { sides: 1, size_ratio: 0.1, offset_angle: 0.0, radians_per_tick: PASSIVE_ROTATION };
    let rotator = spawn_guard(arena, owner, &spec)?;
    if let Some(e) = arena.get_mut(rotator) {
        e.style.values.flags.remove(StyleFlags::IS_VISIBLE);
    }

    let mut built = vec![rotator];
    for i in 0..count {
        let slot = RingSlot {
            rotator,
            slot_angle: 2.0 * PI * i as f32 / count as f32,
            offset_ratio: RING_OFFSET_RATIO,
        };
        built.push(spawn_turret(arena, owner, rotator, auto_turret_mini_barrel(), Some(slot))?);
    }
    Ok(built)
}

pub fn turret_tick(arena: &mut Arena, id: EntityId) {
    let Some(e) = arena.get(id) else { return };
    if e.is_dying() {
        return;
    }
    let Behavior::AutoTurret(t) = &e.behavior else { return };
    let (owner, ring, influenced, base_size, view_range) =
        (t.owner, t.ring, t.influenced_by_owner_inputs, t.base_size, t.ai.view_range);
    let team = team_of(e);
    let Some(owner_base) = barrel_base(arena, owner) else { return };
    let owner_size = arena.get(owner).map_or(0.0, |o| o.physics.values.size);

    // keep the slot on the ring before resolving where we are
    if let Some(slot) = ring {
        let radius = owner_size * slot.offset_ratio;
        let (sin, cos) = slot.slot_angle.sin_cos();
        if let Some(e) = arena.get_mut(id) {
            e.position.set_x(cos * radius);
            e.position.set_y(sin * radius);
        }
    }

    let Some(origin) = arena.world_position(id) else { return };
    let rest_angle = match ring {
        Some(slot) => arena.world_angle(slot.rotator).unwrap_or(0.0) + slot.slot_angle,
        None => arena.get(id).map_or(0.0, |e| e.position.values.angle),
    };
    let frame = AimFrame { origin, rest_angle };
    let possessed = influenced && owner_base.inputs.attempting_shot();

    let filter = match arena.get_mut(id).map(|e| &mut e.behavior) {
        Some(Behavior::AutoTurret(t)) => t.ai.filter.take(),
        _ => return,
    };
    let found = if possessed { None } else { find_target(arena, team, view_range, filter.as_ref(), &frame) };

    let Some(e) = arena.get_mut(id) else { return };
    let Behavior::AutoTurret(t) = &mut e.behavior else { return };
    t.ai.filter = filter;
    let aim = if possessed {
        Some(t.ai.possess(&owner_base.inputs, &origin))
    } else {
        t.ai.observe(found, &origin)
    };
    let passive = t.ai.passive_rotation;

    e.physics.set_size(base_size * owner_base.size_factor);
    let angle = match (aim, ring) {
        (Some(a), _) => a,
        (None, Some(_)) => rest_angle,
        (None, None) => e.position.values.angle + passive,
    };
    e.position.set_angle(normalize_angle(angle));
}

// ============================================================
// Tests
// ============================================================

// addons.rs - non-firing attachments built around a tank body

use std::f32::consts::{PI, SQRT_2};

use crate::arena::Arena;
use crate::auto_turret::{spawn_auto_turret, spawn_turret_ring};
use crate::definitions::{auto_turret_mini_barrel, AddonKind, LAUNCHER_SIZE_RATIO, LAUNCHER_WIDTH_RATIO};
use crate::dispatch::Behavior;
use crate::entity::{EntityId, OrphanPolicy};
use crate::error::SpawnError;
use crate::groups::{Color, PhysicsFlags, PositionFlags, RelationsValues};

/// A rotating shape under (or over) its owner, sized relative to it.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GuardState {
    pub owner: EntityId,
    pub size_ratio: f32,
    pub radians_per_tick: f32,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LauncherState {
    pub owner: EntityId,
}

/// Shape of one guard.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GuardSpec {
    pub sides: i32,
    pub size_ratio: f32,
    pub offset_angle: f32,
    pub radians_per_tick: f32,
}

const fn guard(sides: i32, size_ratio: f32, offset_angle: f32, radians_per_tick: f32) -> GuardSpec {
    GuardSpec { sides, size_ratio, offset_angle, radians_per_tick }
}

const SPIKE: [GuardSpec; 4] = [
    guard(3, 1.3, 0.0, 0.17),
    guard(3, 1.3, PI / 3.0, 0.17),
    guard(3, 1.3, PI / 6.0, 0.17),
    guard(3, 1.3, PI / 2.0, 0.17),
];
const DOM_BASE: [GuardSpec; 1] = [guard(6, 1.24, 0.0, 0.0)];
const SMASHER: [GuardSpec; 1] = [guard(6, 1.15, 0.0, 0.1)];
const MEGA_SMASHER: [GuardSpec; 1] = [guard(6, 1.25, 0.0, 0.2)];
const LANDMINE: [GuardSpec; 2] = [guard(6, 1.15, 0.0, 0.1), guard(6, 1.15, 0.0, 0.05)];

fn guard_specs(kind: AddonKind) -> &'static [GuardSpec] {
    match kind {
        AddonKind::Spike => &SPIKE,
        AddonKind::DomBase => &DOM_BASE,
        AddonKind::Smasher | AddonKind::AutoSmasher => &SMASHER,
        AddonKind::MegaSmasher => &MEGA_SMASHER,
        AddonKind::Landmine => &LANDMINE,
        AddonKind::Launcher | AddonKind::AutoTurret | AddonKind::Auto3 | AddonKind::Auto5 => &[],
    }
}

/// Builds every part of `kind` on `owner`, returning the new entities in
/// creation order.
pub fn build_addon(arena: &mut Arena, kind: AddonKind, owner: EntityId) -> Result<Vec<EntityId>, SpawnError> {
    let mut built = Vec::new();
    for spec in guard_specs(kind) {
        built.push(spawn_guard(arena, owner, spec)?);
    }
    match kind {
        AddonKind::Launcher => built.push(spawn_launcher(arena, owner)?),
        AddonKind::AutoTurret | AddonKind::AutoSmasher => {
            built.push(spawn_auto_turret(arena, owner, auto_turret_mini_barrel())?)
        }
        AddonKind::Auto3 => built.extend(spawn_turret_ring(arena, owner, 3)?),
        AddonKind::Auto5 => built.extend(spawn_turret_ring(arena, owner, 5)?),
        _ => {}
    }
    Ok(built)
}

fn owner_size(arena: &Arena, owner: EntityId) -> Result<(f32, Option<EntityId>), SpawnError> {
    let e = arena.get(owner).ok_or(SpawnError::InvalidOwner(owner))?;
    Ok((e.physics.values.size, e.relations.values.team))
}

/// Guard sizes are relative to the owner's circumscribed square.
fn guard_size(owner_size: f32, size_ratio: f32) -> f32 {
    owner_size * size_ratio * std::f32::consts::FRAC_1_SQRT_2
}

pub fn spawn_guard(arena: &mut Arena, owner: EntityId, spec: &GuardSpec) -> Result<EntityId, SpawnError> {
    let (size, team) = owner_size(arena, owner)?;
    let state = GuardState { owner, size_ratio: spec.size_ratio, radians_per_tick: spec.radians_per_tick };
    arena.spawn(Behavior::Guard(state), |e| {
        e.relations.values = RelationsValues { parent: Some(owner), owner: Some(owner), team };
        e.orphan_policy = OrphanPolicy::DieWithParent;
        e.position.values.angle = spec.offset_angle;
        e.position.values.flags |= PositionFlags::ABSOLUTE_ROTATION;
        e.physics.values.sides = spec.sides;
        e.physics.values.size = guard_size(size, spec.size_ratio);
        e.style.values.color = Color::Border.into();
        e.style.values.border_width = 0.0;
        Ok(())
    })
}

fn launcher_geometry(owner_size: f32) -> (f32, f32) {
    (owner_size * LAUNCHER_SIZE_RATIO / SQRT_2, owner_size * LAUNCHER_WIDTH_RATIO)
}

pub fn spawn_launcher(arena: &mut Arena, owner: EntityId) -> Result<EntityId, SpawnError> {
    let (size, team) = owner_size(arena, owner)?;
    let (length, width) = launcher_geometry(size);
    arena.spawn(Behavior::Launcher(LauncherState { owner }), |e| {
        e.relations.values = RelationsValues { parent: Some(owner), owner: Some(owner), team };
        e.orphan_policy = OrphanPolicy::DieWithParent;
        e.physics.values.sides = 2;
        e.physics.values.flags |= PhysicsFlags::IS_TRAPEZOID;
        e.physics.values.size = length;
        e.physics.values.width = width;
        e.position.values.x = length / 2.0;
        e.style.values.color = Color::Barrel.into();
        Ok(())
    })
}

pub fn guard_tick(arena: &mut Arena, id: EntityId) {
    let Some(Behavior::Guard(state)) = arena.get(id).map(|e| &e.behavior) else { return };
    let state = *state;
    let Some(owner_size) = arena.get(state.owner).map(|o| o.physics.values.size) else { return };

    let Some(e) = arena.get_mut(id) else { return };
    e.physics.set_size(guard_size(owner_size, state.size_ratio));
    if state.radians_per_tick != 0.0 {
        e.position.set_angle(e.position.values.angle + state.radians_per_tick);
    }
}

pub fn launcher_tick(arena: &mut Arena, id: EntityId) {
    let Some(Behavior::Launcher(state)) = arena.get(id).map(|e| &e.behavior) else { return };
    let owner = state.owner;
    let Some(owner_size) = arena.get(owner).map(|o| o.physics.values.size) else { return };

    let (length, width) = launcher_geometry(owner_size);
    let Some(e) = arena.get_mut(id) else { return };
    e.physics.set_size(length);
    e.physics.set_width(width);
    e.position.set_x(length / 2.0);
}

// ============================================================
// Tests
// ============================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::ArenaConfig;
    use crate::dispatch::EntityKind;
    use crate::field_group::FieldGroup;
    use crate::replication::NullSerializer;

    fn make_owner(arena: &mut Arena, size: f32) -> EntityId {
        arena
            .spawn(Behavior::Object, |e| {
                e.physics.values.size = size;
                Ok(())
            })
            .unwrap()
    }

    #[test]
    fn test_spike_builds_four_rotating_triangles() {
        let mut arena = Arena::new(ArenaConfig::default());
        let owner = make_owner(&mut arena, 50.0);
        let parts = build_addon(&mut arena, AddonKind::Spike, owner).unwrap();
        assert_eq!(parts.len(), 4);
        for id in &parts {
            let e = arena.get(*id).unwrap();
            assert_eq!(e.kind(), EntityKind::Guard);
            assert_eq!(e.physics.values.sides, 3);
            assert_eq!(e.relations.values.parent, Some(owner));
            assert_eq!(e.orphan_policy, OrphanPolicy::DieWithParent);
            assert!(e.position.values.flags.contains(PositionFlags::ABSOLUTE_ROTATION));
        }
    }

    #[test]
    fn test_guard_spins_and_tracks_owner_size() {
        let mut arena = Arena::new(ArenaConfig::default());
        let owner = make_owner(&mut arena, 50.0);
        let parts = build_addon(&mut arena, AddonKind::Smasher, owner).unwrap();
        let g = parts[0];
        arena.run_tick(&[], &mut NullSerializer);
        assert!((arena.get(g).unwrap().position.values.angle - 0.1).abs() < 1e-6);

        arena.get_mut(owner).unwrap().physics.values.size = 100.0;
        arena.run_tick(&[], &mut NullSerializer);
        let e = arena.get(g).unwrap();
        assert!((e.physics.values.size - 100.0 * 1.15 * std::f32::consts::FRAC_1_SQRT_2).abs() < 1e-4);
        assert!((e.position.values.angle - 0.2).abs() < 1e-6);
    }

    #[test]
    fn test_static_guard_writes_no_angle() {
        let mut arena = Arena::new(ArenaConfig::default());
        let owner = make_owner(&mut arena, 50.0);
        let g = build_addon(&mut arena, AddonKind::DomBase, owner).unwrap()[0];
        arena.get_mut(g).unwrap().position.drain_dirty();
        crate::dispatch::run_tick_hook(&mut arena, g);
        assert!(!arena.get(g).unwrap().position.is_dirty(2));
    }

    #[test]
    fn test_launcher_sits_in_front_of_owner() {
        let mut arena = Arena::new(ArenaConfig::default());
        let owner = make_owner(&mut arena, 50.0);
        let l = build_addon(&mut arena, AddonKind::Launcher, owner).unwrap()[0];
        let e = arena.get(l).unwrap();
        assert!(e.physics.values.flags.contains(PhysicsFlags::IS_TRAPEZOID));
        assert!((e.position.values.x - e.physics.values.size / 2.0).abs() < 1e-6);
        assert!((e.physics.values.width - 33.6).abs() < 1e-3);
    }

    #[test]
    fn test_missing_owner_is_rejected() {
        let mut arena = Arena::new(ArenaConfig::default());
        let owner = make_owner(&mut arena, 50.0);
        arena.force_destroy(owner);
        arena.run_tick(&[], &mut NullSerializer);
        assert_eq!(build_addon(&mut arena, AddonKind::Spike, owner), Err(SpawnError::InvalidOwner(owner)));
    }
}

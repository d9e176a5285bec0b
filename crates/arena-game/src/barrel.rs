// barrel.rs - weapon entities: geometry, shoot cycle, fire dispatch

use std::f32::consts::PI;
use std::sync::Arc;

use rand::Rng;
use tracing::warn;

use crate::ai::Inputs;
use crate::arena::Arena;
use crate::definitions::{BarrelDefinition, ProjectileKind};
use crate::dispatch::Behavior;
use crate::entity::{EntityId, OptionalGroup, OrphanPolicy};
use crate::error::SpawnError;
use crate::groups::{BarrelFlags, BarrelGroup, BarrelValues, Color, PhysicsFlags, RelationsValues};
use crate::projectile::{self, Shot};
use crate::shoot_cycle::{CycleOutcome, FirePolicy, ShootCycle};
use crate::tank::BASE_TANK_SIZE;

pub struct BarrelState {
    pub definition: Arc<BarrelDefinition>,
    /// Entity whose inputs, size and reload drive this barrel.
    pub base: EntityId,
    pub cycle: ShootCycle,
    pub attempting_shot: bool,
    pub bullet_accel: f32,
    /// Live projectiles fired by this barrel that count toward `drone_count`.
    pub drone_count: u32,
}

/// What a barrel needs from whatever carries it, copied out for the tick.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BarrelBase {
    pub id: EntityId,
    pub size_factor: f32,
    pub reload_time: f32,
    pub inputs: Inputs,
    pub bullet_speed: u32,
    pub bullet_damage: u32,
    pub bullet_penetration: u32,
}

/// Resolves `id` as a barrel carrier. Tanks carry barrels directly; guards
/// and turrets borrow size and reload from their own owner.
pub fn barrel_base(arena: &Arena, id: EntityId) -> Option<BarrelBase> {
    resolve_base(arena, id, 0)
}

fn resolve_base(arena: &Arena, id: EntityId, depth: usize) -> Option<BarrelBase> {
    if depth > 8 {
        return None;
    }
    let e = arena.get(id)?;
    match &e.behavior {
        Behavior::Tank(t) => Some(BarrelBase {
            id,
            size_factor: e.physics.values.size / BASE_TANK_SIZE,
            reload_time: t.reload_time,
            inputs: t.inputs,
            bullet_speed: t.stats.bullet_speed,
            bullet_damage: t.stats.bullet_damage,
            bullet_penetration: t.stats.bullet_penetration,
        }),
        Behavior::Guard(g) => {
            let owner = resolve_base(arena, g.owner, depth + 1)?;
            Some(BarrelBase { id, ..owner })
        }
        Behavior::AutoTurret(t) => {
            let owner = resolve_base(arena, t.owner, depth + 1)?;
            Some(BarrelBase { id, inputs: t.ai.inputs, ..owner })
        }
        _ => None,
    }
}

/// Barrel shape for a given owner size factor.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BarrelGeometry {
    pub size: f32,
    pub width: f32,
    pub angle: f32,
    pub x: f32,
    pub y: f32,
}

pub fn barrel_geometry(def: &BarrelDefinition, size_factor: f32) -> BarrelGeometry {
    let size = def.size * size_factor;
    let reach = size / 2.0 + def.distance;
    let (sin, cos) = def.angle.sin_cos();
    BarrelGeometry {
        size,
        width: def.width * size_factor,
        angle: def.angle + def.trapezoid_direction,
        x: cos * reach - sin * def.offset * size_factor,
        y: sin * reach + cos * def.offset * size_factor,
    }
}

fn bullet_accel(def: &BarrelDefinition, base: &BarrelBase) -> f32 {
    (20.0 + base.bullet_speed as f32 * 3.0) * def.bullet.speed
}

/// Builds a barrel on `base_id`. The barrel is a child of the base and
/// dies with it.
pub fn spawn_barrel(arena: &mut Arena, base_id: EntityId, def: Arc<BarrelDefinition>) -> Result<EntityId, SpawnError> {
    let base = barrel_base(arena, base_id).ok_or(SpawnError::InvalidOwner(base_id))?;
    let team = arena.get(base_id).and_then(|e| e.relations.values.team);
    let reload = base.reload_time * def.reload;
    let geo = barrel_geometry(&def, base.size_factor);

    let state = BarrelState {
        definition: Arc::clone(&def),
        base: base_id,
        cycle: ShootCycle::new(reload),
        attempting_shot: false,
        bullet_accel: bullet_accel(&def, &base),
        drone_count: 0,
    };

    arena.spawn(Behavior::Barrel(Box::new(state)), |e| {
        e.attach(OptionalGroup::Barrel(BarrelGroup::new(BarrelValues {
            flags: BarrelFlags::empty(),
            reload_time: reload,
            trapezoid_direction: def.trapezoid_direction,
        })))?;
        e.relations.values = RelationsValues { parent: Some(base_id), owner: Some(base_id), team };
        e.orphan_policy = OrphanPolicy::DieWithParent;

        e.style.values.color = def.color.unwrap_or(Color::Barrel.into());
        e.physics.values.sides = 2;
        if def.is_trapezoid {
            e.physics.values.flags |= PhysicsFlags::IS_TRAPEZOID;
        }
        e.physics.values.size = geo.size;
        e.physics.values.width = geo.width;
        e.position.values.angle = geo.angle;
        e.position.values.x = geo.x;
        e.position.values.y = geo.y;
        Ok(())
    })
}

pub fn barrel_tick(arena: &mut Arena, id: EntityId) {
    let Some(Behavior::Barrel(state)) = arena.get(id).map(|e| &e.behavior) else { return };
    let def = Arc::clone(&state.definition);
    let Some(base) = barrel_base(arena, state.base) else { return };

    let root = arena.root_parent(id);
    let root_dying = arena.get(root).map_or(true, |r| !r.is_live());
    let kind = ProjectileKind::from_tag(&def.bullet.kind);
    let always_fire = def.force_fire || kind.is_some_and(|k| k.always_fires());
    let reload = base.reload_time * def.reload;
    let geo = barrel_geometry(&def, base.size_factor);

    let Some(e) = arena.get_mut(id) else { return };
    if e.is_dying() {
        return;
    }

    // follows the owner's size every tick
    e.physics.set_size(geo.size);
    e.physics.set_width(geo.width);
    e.position.set_angle(geo.angle);
    e.position.set_x(geo.x);
    e.position.set_y(geo.y);

    let Behavior::Barrel(state) = &mut e.behavior else { return };
    state.bullet_accel = bullet_accel(&def, &base);
    if root_dying {
        return;
    }

    state.attempting_shot = base.inputs.attempting_shot();
    let policy = FirePolicy {
        attempting: state.attempting_shot,
        always_fire,
        at_capacity: def.drone_count.is_some_and(|cap| state.drone_count >= cap),
    };
    if state.cycle.tick(reload, def.delay, policy, || {}) != CycleOutcome::Fired {
        return;
    }

    if let Some(b) = &mut e.barrel {
        b.set_reload_time(reload);
    }
    shoot(arena, id, &base, &def);
}

/// Fires one projectile from `barrel_id`. An unrecognised bullet kind is
/// logged and nothing happens.
pub fn shoot(arena: &mut Arena, barrel_id: EntityId, base: &BarrelBase, def: &BarrelDefinition) {
    let Some(kind) = ProjectileKind::from_tag(&def.bullet.kind) else {
        warn!(barrel = %barrel_id, kind = %def.bullet.kind, "ignoring attempt to spawn projectile of unknown kind");
        return;
    };

    let Some(e) = arena.get_mut(barrel_id) else { return };
    if let Some(b) = &mut e.barrel {
        b.set_flags(b.values.flags ^ BarrelFlags::HAS_SHOT);
    }
    let (barrel_size, barrel_width) = (e.physics.values.size, e.physics.values.width);
    let team = e.relations.values.team;
    let accel = match &e.behavior {
        Behavior::Barrel(state) => state.bullet_accel,
        _ => return,
    };

    let scatter = (PI / 180.0) * def.bullet.scatter_rate * (arena.rng().gen::<f32>() - 0.5) * 10.0;
    let Some((origin, base_angle)) = arena.world_transform(base.id) else { return };
    let angle = def.angle + scatter + base_angle;

    let root = arena.root_parent(barrel_id);
    if let Some(r) = arena.get_mut(root) {
        r.add_acceleration(angle + PI, def.recoil * 2.0);
    }

    let shot = Shot {
        barrel: barrel_id,
        base: *base,
        kind,
        angle,
        origin,
        barrel_size,
        barrel_width,
        bullet_accel: accel,
        team,
        counted: def.drone_count.is_some(),
    };
    match projectile::spawn_projectile(arena, &shot, def) {
        Ok(_) if shot.counted => {
            if let Some(Behavior::Barrel(state)) = arena.get_mut(barrel_id).map(|e| &mut e.behavior) {
                state.drone_count += 1;
            }
        }
        Ok(_) => {}
        Err(err) => warn!(barrel = %barrel_id, "projectile spawn failed: {}", err),
    }
}

// ============================================================
// Tests
// ============================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::InputFlags;
    use crate::arena::ArenaConfig;
    use crate::definitions::{basic_tank, overseer_tank, BulletDefinition};
    use crate::dispatch::EntityKind;
    use crate::replication::NullSerializer;
    use crate::tank::{set_inputs, spawn_tank};

    fn make_arena() -> Arena {
        Arena::new(ArenaConfig { deletion_ticks: 1, id_quarantine: 1, ..Default::default() })
    }

    fn count_kind(arena: &Arena, kind: EntityKind) -> usize {
        arena.entities().filter(|e| e.kind() == kind && e.is_live()).count()
    }

    fn fire(arena: &mut Arena, tank: EntityId) {
        set_inputs(arena, tank, Inputs { flags: InputFlags::LEFT_CLICK, mouse: [100.0, 0.0] });
    }

    #[test]
    fn test_geometry_scales_with_size_factor() {
        let def = BarrelDefinition { size: 100.0, width: 40.0, offset: 10.0, ..Default::default() };
        let g = barrel_geometry(&def, 2.0);
        assert_eq!(g.size, 200.0);
        assert_eq!(g.width, 80.0);
        assert!((g.x - 100.0).abs() < 1e-4);
        assert!((g.y - 20.0).abs() < 1e-4);
    }

    #[test]
    fn test_barrel_fires_only_while_attempting() {
        let mut arena = make_arena();
        let tank = spawn_tank(&mut arena, Arc::new(basic_tank()), [0.0, 0.0], None, "a").unwrap();
        for _ in 0..60 {
            arena.run_tick(&[], &mut NullSerializer);
        }
        assert_eq!(count_kind(&arena, EntityKind::Projectile), 0);

        fire(&mut arena, tank);
        for _ in 0..20 {
            arena.run_tick(&[], &mut NullSerializer);
        }
        assert!(count_kind(&arena, EntityKind::Projectile) >= 1);
    }

    #[test]
    fn test_shot_toggles_flag_and_recoils_root() {
        let mut arena = make_arena();
        let tank = spawn_tank(&mut arena, Arc::new(basic_tank()), [0.0, 0.0], None, "a").unwrap();
        arena.run_tick(&[], &mut NullSerializer);
        let barrel = arena.children_of(tank)[0];

        fire(&mut arena, tank);
        let mut toggled = false;
        for _ in 0..5 {
            arena.run_tick(&[], &mut NullSerializer);
            let flags = arena.get(barrel).unwrap().barrel.as_ref().unwrap().values.flags;
            toggled |= flags.contains(BarrelFlags::HAS_SHOT);
        }
        assert!(toggled);
        // recoil pushes the tank away from the mouse
        assert!(arena.get(tank).unwrap().position.values.x < 0.0);
    }

    #[test]
    fn test_drones_fire_without_input_and_respect_cap() {
        let mut arena = make_arena();
        spawn_tank(&mut arena, Arc::new(overseer_tank()), [0.0, 0.0], None, "o").unwrap();
        for _ in 0..400 {
            arena.run_tick(&[], &mut NullSerializer);
        }
        // two barrels, four each
        assert_eq!(count_kind(&arena, EntityKind::Projectile), 8);
    }

    #[test]
    fn test_unknown_bullet_kind_is_ignored() {
        let mut arena = make_arena();
        let mut def = basic_tank();
        def.barrels[0].bullet = BulletDefinition { kind: "railgun".to_string(), ..Default::default() };
        let tank = spawn_tank(&mut arena, Arc::new(def), [0.0, 0.0], None, "a").unwrap();
        fire(&mut arena, tank);
        for _ in 0..60 {
            arena.run_tick(&[], &mut NullSerializer);
        }
        assert_eq!(count_kind(&arena, EntityKind::Projectile), 0);
        assert!(arena.get(tank).unwrap().is_live());
    }

    #[test]
    fn test_barrel_resizes_with_owner() {
        let mut arena = make_arena();
        let tank = spawn_tank(&mut arena, Arc::new(basic_tank()), [0.0, 0.0], None, "a").unwrap();
        arena.run_tick(&[], &mut NullSerializer);
        let barrel = arena.children_of(tank)[0];
        let before = arena.get(barrel).unwrap().physics.values.size;

        crate::tank::set_level(&mut arena, tank, 45);
        arena.run_tick(&[], &mut NullSerializer);
        arena.run_tick(&[], &mut NullSerializer);
        assert!(arena.get(barrel).unwrap().physics.values.size > before);
    }
}

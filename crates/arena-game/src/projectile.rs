// projectile.rs - bullets, traps, drones and the other fired kinds

use arena_common::shared::{angle_between, vector_distance_squared, Vec2};
use rand::Rng;

use crate::arena::Arena;
use crate::barrel::{barrel_base, BarrelBase};
use crate::definitions::{BarrelDefinition, ProjectileKind};
use crate::dispatch::Behavior;
use crate::entity::{EntityId, OptionalGroup};
use crate::error::SpawnError;
use crate::groups::{HealthGroup, PhysicsFlags, RelationsValues, StyleFlags};

/// Ticks a bullet with `life_length` 1 lives.
pub const BULLET_LIFE_TICKS: f32 = 72.0;
pub const TRAP_LIFE_TICKS: f32 = 600.0;

/// Idle drones drift back once further than this from their owner.
pub const DRONE_LEASH: f32 = 400.0;

/// Everything the fire dispatch knows about one shot.
#[derive(Clone, Copy, Debug)]
pub struct Shot {
    pub barrel: EntityId,
    pub base: BarrelBase,
    pub kind: ProjectileKind,
    /// World angle of the shot, scatter included.
    pub angle: f32,
    /// World position of the base.
    pub origin: Vec2,
    pub barrel_size: f32,
    pub barrel_width: f32,
    pub bullet_accel: f32,
    pub team: Option<EntityId>,
    /// Counts toward the barrel's `drone_count`.
    pub counted: bool,
}

pub struct ProjectileState {
    pub kind: ProjectileKind,
    pub source_barrel: EntityId,
    /// The barrel base; aim source for guided kinds.
    pub owner: EntityId,
    pub counted: bool,
    pub base_accel: f32,
    pub move_angle: f32,
    /// `None` lives until something destroys it.
    pub life_ticks: Option<u64>,
}

pub fn spawn_projectile(arena: &mut Arena, shot: &Shot, def: &BarrelDefinition) -> Result<EntityId, SpawnError> {
    let bullet = &def.bullet;
    let size_factor = shot.base.size_factor;
    let (sin, cos) = shot.angle.sin_cos();
    let x = shot.origin[0] + cos * shot.barrel_size - sin * def.offset * size_factor + cos * def.distance;
    let y = shot.origin[1] + sin * shot.barrel_size + cos * def.offset * size_factor + sin * def.distance;

    let jitter: f32 = arena.rng().gen::<f32>() * bullet.scatter_rate;
    let (base_accel, base_speed, life_ticks) = match shot.kind {
        ProjectileKind::Trap => (0.0, shot.bullet_accel / 2.0 + 30.0 - jitter, life(bullet.life_length, TRAP_LIFE_TICKS)),
        ProjectileKind::Drone | ProjectileKind::Minion => (shot.bullet_accel, shot.bullet_accel, None),
        ProjectileKind::Flame => (shot.bullet_accel, shot.bullet_accel + 30.0 - jitter, life(bullet.life_length, 25.0)),
        ProjectileKind::Bullet | ProjectileKind::Swarm => {
            (shot.bullet_accel, shot.bullet_accel + 30.0 - jitter, life(bullet.life_length, BULLET_LIFE_TICKS))
        }
    };

    let health = (1.5 * shot.base.bullet_penetration as f32 + 2.0) * bullet.health;
    let damage = (7.0 + shot.base.bullet_damage as f32 * 3.0) * bullet.damage;

    let state = ProjectileState {
        kind: shot.kind,
        source_barrel: shot.barrel,
        owner: shot.base.id,
        counted: shot.counted,
        base_accel,
        move_angle: shot.angle,
        life_ticks,
    };

    arena.spawn(Behavior::Projectile(Box::new(state)), |e| {
        e.attach(OptionalGroup::Health(HealthGroup::with_max(health)))?;
        e.relations.values = RelationsValues { parent: None, owner: Some(shot.base.id), team: shot.team };
        e.position.values.x = x;
        e.position.values.y = y;
        e.position.values.angle = shot.angle;
        e.physics.values.size = (shot.barrel_width / 2.0) * bullet.size_ratio;
        e.physics.values.sides = bullet.sides.unwrap_or(1);
        e.physics.values.absorption_factor = bullet.absorption_factor;
        e.physics.values.flags |= PhysicsFlags::NO_OWN_TEAM_COLLISION | PhysicsFlags::CAN_ESCAPE_ARENA;
        e.style.values.flags |= StyleFlags::HAS_NO_DMG_INDICATOR;
        e.damage = damage;
        e.add_acceleration(shot.angle, base_speed);
        Ok(())
    })
}

fn life(life_length: f32, scale: f32) -> Option<u64> {
    if life_length < 0.0 {
        None
    } else {
        Some((life_length * scale) as u64)
    }
}

pub fn projectile_tick(arena: &mut Arena, id: EntityId) {
    let tick = arena.tick();
    let Some(e) = arena.get_mut(id) else { return };
    if e.is_dying() {
        e.apply_physics();
        return;
    }
    let Some(e) = arena.get(id) else { return };
    let Behavior::Projectile(state) = &e.behavior else { return };
    let (kind, owner, barrel, life_ticks, mut move_angle, accel) =
        (state.kind, state.owner, state.source_barrel, state.life_ticks, state.move_angle, state.base_accel);
    let age = tick.saturating_sub(e.spawn_tick());
    let pos = e.local_position();

    if life_ticks.is_some_and(|l| age >= l) {
        arena.destroy(id);
        return;
    }

    if kind.always_fires() && !arena.is_live(barrel) {
        // drones go down with the barrel that launched them
        arena.destroy(id);
        return;
    }

    if kind.is_guided() {
        if let Some(base) = barrel_base(arena, owner) {
            let home = arena.world_position(owner).unwrap_or(pos);
            if base.inputs.attempting_shot() {
                move_angle = angle_between(&pos, &base.inputs.mouse);
            } else if base.inputs.attempting_repel() {
                move_angle = angle_between(&base.inputs.mouse, &pos);
            } else if vector_distance_squared(&pos, &home) > DRONE_LEASH * DRONE_LEASH {
                move_angle = angle_between(&pos, &home);
            }
        }
    }

    let Some(e) = arena.get_mut(id) else { return };
    if let Behavior::Projectile(state) = &mut e.behavior {
        state.move_angle = move_angle;
    }
    if kind.is_guided() {
        e.position.set_angle(move_angle);
    }
    if kind == ProjectileKind::Flame {
        e.physics.set_size(e.physics.values.size * 1.03);
        e.style.set_opacity((e.style.values.opacity - 0.04).max(0.0));
    }
    if accel > 0.0 {
        e.add_acceleration(move_angle, accel);
    }
    e.apply_physics();
}

/// Frees the slot a capped projectile held on its barrel.
pub(crate) fn on_projectile_removed(arena: &mut Arena, state: &ProjectileState) {
    if !state.counted {
        return;
    }
    if let Some(Behavior::Barrel(barrel)) = arena.get_mut(state.source_barrel).map(|e| &mut e.behavior) {
        barrel.drone_count = barrel.drone_count.saturating_sub(1);
    }
}

// ============================================================
// Tests
// ============================================================

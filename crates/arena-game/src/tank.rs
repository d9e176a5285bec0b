// tank.rs - player-controlled bodies: stats, inputs, construction

use std::sync::Arc;

use tracing::debug;

use arena_common::shared::{angle_between, Vec2};

use crate::addons::build_addon;
use crate::ai::{InputFlags, Inputs};
use crate::arena::Arena;
use crate::barrel::spawn_barrel;
use crate::definitions::TankDefinition;
use crate::dispatch::Behavior;
use crate::entity::{EntityId, OptionalGroup};
use crate::error::SpawnError;
use crate::groups::{Color, HealthGroup, NameGroup, NameValues, ScoreGroup};

/// Size of a level 1 tank with `size_ratio` 1.
pub const BASE_TANK_SIZE: f32 = 50.0;
pub const MAX_LEVEL: u32 = 45;
pub const MAX_STAT_LEVEL: u32 = 7;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TankStats {
    pub health_regen: u32,
    pub max_health: u32,
    pub body_damage: u32,
    pub bullet_speed: u32,
    pub bullet_penetration: u32,
    pub bullet_damage: u32,
    pub reload: u32,
    pub movement_speed: u32,
}

pub struct TankState {
    pub definition: Arc<TankDefinition>,
    pub inputs: Inputs,
    pub stats: TankStats,
    pub level: u32,
    /// Ticks between shots for a barrel with `reload` 1.
    pub reload_time: f32,
}

/// `15 * 0.914^level`.
pub fn reload_time_for(reload_stat: u32) -> f32 {
    15.0 * 0.914f32.powi(reload_stat as i32)
}

pub fn size_for_level(def: &TankDefinition, level: u32) -> f32 {
    BASE_TANK_SIZE * def.size_ratio * 1.01f32.powi(level.max(1) as i32 - 1)
}

fn movement_speed(def: &TankDefinition, stats: &TankStats, level: u32) -> f32 {
    2.55 * def.speed * 1.07f32.powi(stats.movement_speed as i32) / 1.015f32.powi(level.max(1) as i32 - 1)
}

fn max_health_for(def: &TankDefinition, stats: &TankStats, level: u32) -> f32 {
    def.max_health + 2.0 * (level.max(1) - 1) as f32 + 20.0 * stats.max_health as f32
}

/// Spawns a tank body with its addons and barrels. `team` defaults to the
/// tank itself.
pub fn spawn_tank(
    arena: &mut Arena,
    definition: Arc<TankDefinition>,
    position: Vec2,
    team: Option<EntityId>,
    name: &str,
) -> Result<EntityId, SpawnError> {
    let stats = TankStats::default();
    let level = 1;
    let state = TankState {
        definition: Arc::clone(&definition),
        inputs: Inputs::default(),
        stats,
        level,
        reload_time: reload_time_for(stats.reload),
    };
    let def = &definition;

    let id = arena.spawn(Behavior::Tank(Box::new(state)), |e| {
        e.attach(OptionalGroup::Health(HealthGroup::with_max(max_health_for(def, &stats, level))))?;
        e.attach(OptionalGroup::Name(NameGroup::new(NameValues { name: name.to_string(), ..Default::default() })))?;
        e.attach(OptionalGroup::Score(ScoreGroup::default()))?;
        e.relations.values.team = Some(team.unwrap_or(e.id()));
        e.relations.values.owner = Some(e.id());
        e.position.values.x = position[0];
        e.position.values.y = position[1];
        e.physics.values.sides = def.sides;
        e.physics.values.size = size_for_level(def, level);
        e.physics.values.absorption_factor = 1.0;
        e.style.values.color = Color::Tank.into();
        e.damage = def.body_damage;
        e.score_reward = 25.0;
        Ok(())
    })?;

    if let Err(err) = build_parts(arena, id, def) {
        arena.force_destroy(id);
        return Err(err);
    }
    debug!(entity = %id, tank = %def.name, "tank spawned");
    Ok(id)
}

fn build_parts(arena: &mut Arena, id: EntityId, def: &TankDefinition) -> Result<(), SpawnError> {
    if let Some(addon) = def.pre_addon {
        build_addon(arena, addon, id)?;
    }
    for barrel in &def.barrels {
        spawn_barrel(arena, id, Arc::new(barrel.clone()))?;
    }
    if let Some(addon) = def.post_addon {
        build_addon(arena, addon, id)?;
    }
    Ok(())
}

/// Replaces a tank's inputs. Returns false if `id` is not a tank.
pub fn set_inputs(arena: &mut Arena, id: EntityId, inputs: Inputs) -> bool {
    match arena.get_mut(id).map(|e| &mut e.behavior) {
        Some(Behavior::Tank(t)) => {
            t.inputs = inputs;
            true
        }
        _ => false,
    }
}

pub fn set_level(arena: &mut Arena, id: EntityId, level: u32) -> bool {
    match arena.get_mut(id).map(|e| &mut e.behavior) {
        Some(Behavior::Tank(t)) => {
            t.level = level.clamp(1, MAX_LEVEL);
            true
        }
        _ => false,
    }
}

pub fn set_stats(arena: &mut Arena, id: EntityId, stats: TankStats) -> bool {
    match arena.get_mut(id).map(|e| &mut e.behavior) {
        Some(Behavior::Tank(t)) => {
            t.stats = stats;
            true
        }
        _ => false,
    }
}

pub fn tank_tick(arena: &mut Arena, id: EntityId) {
    let Some(e) = arena.get_mut(id) else { return };
    if e.is_dying() {
        e.apply_physics();
        return;
    }
    let Behavior::Tank(t) = &mut e.behavior else { return };

    t.reload_time = reload_time_for(t.stats.reload.min(MAX_STAT_LEVEL));
    let def = Arc::clone(&t.definition);
    let (inputs, stats, level) = (t.inputs, t.stats, t.level);

    let size = size_for_level(&def, level);
    e.physics.set_size(size);

    let max_health = max_health_for(&def, &stats, level);
    if let Some(h) = &mut e.health {
        if h.values.max_health != max_health {
            let fraction = if h.values.max_health > 0.0 { h.values.health / h.values.max_health } else { 1.0 };
            h.set_max_health(max_health);
            h.set_health(max_health * fraction);
        }
    }

    let pos = e.local_position();
    e.position.set_angle(angle_between(&pos, &inputs.mouse));

    if let Some(angle) = inputs.movement_angle() {
        e.add_acceleration(angle, movement_speed(&def, &stats, level));
    }
    e.apply_physics();

    if inputs.flags.contains(InputFlags::SUICIDE) {
        arena.destroy(id);
    }
}

// ============================================================
// Tests
// ============================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::ArenaConfig;
    use crate::definitions::{auto3_tank, basic_tank, smasher_tank, twin_tank};
    use crate::dispatch::EntityKind;
    use crate::replication::NullSerializer;

    fn make_arena() -> Arena {
        Arena::new(ArenaConfig { deletion_ticks: 2, id_quarantine: 1, ..Default::default() })
    }

    fn kinds_of_children(arena: &Arena, id: EntityId) -> Vec<EntityKind> {
        arena.children_of(id).into_iter().map(|c| arena.get(c).unwrap().kind()).collect()
    }

    #[test]
    fn test_reload_formula() {
        assert_eq!(reload_time_for(0), 15.0);
        assert!((reload_time_for(7) - 15.0 * 0.914f32.powi(7)).abs() < 1e-5);
        assert!(reload_time_for(7) < reload_time_for(1));
    }

    #[test]
    fn test_spawn_builds_parts_in_order() {
        let mut arena = make_arena();
        let twin = spawn_tank(&mut arena, Arc::new(twin_tank()), [0.0, 0.0], None, "t").unwrap();
        assert_eq!(kinds_of_children(&arena, twin), vec![EntityKind::Barrel, EntityKind::Barrel]);

        let smasher = spawn_tank(&mut arena, Arc::new(smasher_tank()), [0.0, 0.0], None, "s").unwrap();
        assert_eq!(kinds_of_children(&arena, smasher), vec![EntityKind::Guard]);

        let auto3 = spawn_tank(&mut arena, Arc::new(auto3_tank()), [0.0, 0.0], None, "a").unwrap();
        assert_eq!(kinds_of_children(&arena, auto3), vec![EntityKind::Guard]);
    }

    #[test]
    fn test_tank_is_its_own_team_by_default() {
        let mut arena = make_arena();
        let id = spawn_tank(&mut arena, Arc::new(basic_tank()), [0.0, 0.0], None, "t").unwrap();
        let e = arena.get(id).unwrap();
        assert_eq!(e.relations.values.team, Some(id));
        assert_eq!(e.name.as_ref().unwrap().values.name, "t");
    }

    #[test]
    fn test_inputs_move_and_aim() {
        let mut arena = make_arena();
        let id = spawn_tank(&mut arena, Arc::new(basic_tank()), [0.0, 0.0], None, "t").unwrap();
        assert!(set_inputs(&mut arena, id, Inputs { flags: InputFlags::DOWN, mouse: [0.0, 1000.0] }));
        for _ in 0..10 {
            arena.run_tick(&[], &mut NullSerializer);
        }
        let e = arena.get(id).unwrap();
        assert!(e.position.values.y > 10.0);
        assert!((e.position.values.angle - std::f32::consts::FRAC_PI_2).abs() < 0.2);
    }

    #[test]
    fn test_level_grows_body_and_health() {
        let mut arena = make_arena();
        let id = spawn_tank(&mut arena, Arc::new(basic_tank()), [0.0, 0.0], None, "t").unwrap();
        arena.run_tick(&[], &mut NullSerializer);
        set_level(&mut arena, id, 30);
        arena.run_tick(&[], &mut NullSerializer);
        let e = arena.get(id).unwrap();
        assert!((e.physics.values.size - BASE_TANK_SIZE * 1.01f32.powi(29)).abs() < 1e-3);
        assert_eq!(e.health.as_ref().unwrap().values.max_health, 50.0 + 58.0);
        assert_eq!(e.health.as_ref().unwrap().values.health, 50.0 + 58.0);
    }

    #[test]
    fn test_suicide_destroys_tank_and_parts() {
        let mut arena = make_arena();
        let id = spawn_tank(&mut arena, Arc::new(twin_tank()), [0.0, 0.0], None, "t").unwrap();
        set_inputs(&mut arena, id, Inputs { flags: InputFlags::SUICIDE, mouse: [0.0, 0.0] });
        arena.run_tick(&[], &mut NullSerializer);
        assert!(arena.get(id).unwrap().is_dying());
        for _ in 0..3 {
            arena.run_tick(&[], &mut NullSerializer);
        }
        assert!(arena.is_empty());
    }

    #[test]
    fn test_set_inputs_rejects_non_tanks() {
        let mut arena = make_arena();
        let id = arena.spawn(Behavior::Object, |_| Ok(())).unwrap();
        assert!(!set_inputs(&mut arena, id, Inputs::default()));
    }
}

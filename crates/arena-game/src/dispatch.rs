// dispatch.rs - entity kinds and their tick hooks
//
// Behaviour is chosen once, at construction, by storing a `Behavior`
// variant on the entity. The scheduler looks the hook up by kind in
// `TICK_TABLE`; hooks get the arena and the entity's handle rather than a
// reference, so they can read other entities and spawn new ones.

use std::fmt;

use crate::addons::{self, GuardState, LauncherState};
use crate::arena::Arena;
use crate::auto_turret::{self, TurretState};
use crate::barrel::{self, BarrelState};
use crate::entity::{Entity, EntityId};
use crate::projectile::{self, ProjectileState};
use crate::tank::{self, TankState};

pub type TickFn = fn(&mut Arena, EntityId);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum EntityKind {
    Object = 0,
    Tank,
    Barrel,
    Guard,
    Launcher,
    AutoTurret,
    Projectile,
    Scripted,
}

pub const KIND_COUNT: usize = 8;

/// Per-kind state, selected at construction.
pub enum Behavior {
    /// Inert body: moves if pushed, nothing else.
    Object,
    Tank(Box<TankState>),
    Barrel(Box<BarrelState>),
    Guard(GuardState),
    Launcher(LauncherState),
    AutoTurret(Box<TurretState>),
    Projectile(Box<ProjectileState>),
    /// Gamemode-supplied hook.
    Scripted(TickFn),
}

impl Behavior {
    pub fn kind(&self) -> EntityKind {
        match self {
            Behavior::Object => EntityKind::Object,
            Behavior::Tank(_) => EntityKind::Tank,
            Behavior::Barrel(_) => EntityKind::Barrel,
            Behavior::Guard(_) => EntityKind::Guard,
            Behavior::Launcher(_) => EntityKind::Launcher,
            Behavior::AutoTurret(_) => EntityKind::AutoTurret,
            Behavior::Projectile(_) => EntityKind::Projectile,
            Behavior::Scripted(_) => EntityKind::Scripted,
        }
    }
}

impl fmt::Debug for Behavior {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.kind())
    }
}

// ============================================================
// Tick table
// ============================================================

/// Tick hooks, indexed by `EntityKind`.
pub static TICK_TABLE: [TickFn; KIND_COUNT] = {
    let mut table: [TickFn; KIND_COUNT] = [object_tick; KIND_COUNT];
    table[EntityKind::Tank as usize] = tank::tank_tick;
    table[EntityKind::Barrel as usize] = barrel::barrel_tick;
    table[EntityKind::Guard as usize] = addons::guard_tick;
    table[EntityKind::Launcher as usize] = addons::launcher_tick;
    table[EntityKind::AutoTurret as usize] = auto_turret::turret_tick;
    table[EntityKind::Projectile as usize] = projectile::projectile_tick;
    table[EntityKind::Scripted as usize] = scripted_tick;
    table
};

/// Runs the tick hook for `id`, if it still exists.
pub fn run_tick_hook(arena: &mut Arena, id: EntityId) {
    let Some(kind) = arena.get(id).map(|e| e.kind()) else { return };
    TICK_TABLE[kind as usize](arena, id);
}

fn object_tick(arena: &mut Arena, id: EntityId) {
    if let Some(e) = arena.get_mut(id) {
        if e.velocity != [0.0, 0.0] {
            e.apply_physics();
        }
    }
}

fn scripted_tick(arena: &mut Arena, id: EntityId) {
    let hook = match arena.get(id).map(|e| &e.behavior) {
        Some(Behavior::Scripted(hook)) => *hook,
        _ => return,
    };
    hook(arena, id);
}

/// Called once an entity has left the table.
pub(crate) fn on_removed(arena: &mut Arena, entity: &Entity) {
    if let Behavior::Projectile(state) = &entity.behavior {
        projectile::on_projectile_removed(arena, state);
    }
}

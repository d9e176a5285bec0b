// definitions.rs - immutable content records consumed at construction time

use std::f32::consts::{PI, SQRT_2};

/// What a barrel fires. `kind` is the content tag selecting the projectile
/// behaviour; see `ProjectileKind::from_tag`.
#[derive(Clone, Debug, PartialEq)]
pub struct BulletDefinition {
    pub kind: String,
    pub size_ratio: f32,
    pub health: f32,
    pub damage: f32,
    pub speed: f32,
    pub scatter_rate: f32,
    pub life_length: f32,
    pub absorption_factor: f32,
    pub sides: Option<i32>,
}

impl Default for BulletDefinition {
    fn default() -> Self {
        Self {
            kind: "bullet".to_string(),
            size_ratio: 1.0,
            health: 1.0,
            damage: 1.0,
            speed: 1.0,
            scatter_rate: 1.0,
            life_length: 1.0,
            absorption_factor: 1.0,
            sides: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct BarrelDefinition {
    /// Angle on the owner's body, radians.
    pub angle: f32,
    /// Sideways offset, scaled by the owner's size factor.
    pub offset: f32,
    pub size: f32,
    pub width: f32,
    /// Post-shot delay, as a fraction of the reload time.
    pub delay: f32,
    /// Multiplier on the owner's reload time.
    pub reload: f32,
    pub recoil: f32,
    pub is_trapezoid: bool,
    pub trapezoid_direction: f32,
    /// Extra distance from the body.
    pub distance: f32,
    /// Live instance cap for the fired kind.
    pub drone_count: Option<u32>,
    /// Fire without the trigger held.
    pub force_fire: bool,
    pub color: Option<i32>,
    pub bullet: BulletDefinition,
}

impl Default for BarrelDefinition {
    fn default() -> Self {
        Self {
            angle: 0.0,
            offset: 0.0,
            size: 95.0,
            width: 42.0,
            delay: 0.0,
            reload: 1.0,
            recoil: 1.0,
            is_trapezoid: false,
            trapezoid_direction: 0.0,
            distance: 0.0,
            drone_count: None,
            force_fire: false,
            color: None,
            bullet: BulletDefinition::default(),
        }
    }
}

/// Addons built under (pre) or over (post) a tank's barrels.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AddonKind {
    Spike,
    DomBase,
    Smasher,
    MegaSmasher,
    Landmine,
    Launcher,
    AutoTurret,
    AutoSmasher,
    Auto3,
    Auto5,
}

impl AddonKind {
    pub fn from_tag(tag: &str) -> Option<Self> {
        Some(match tag {
            "spike" => AddonKind::Spike,
            "dombase" => AddonKind::DomBase,
            "smasher" => AddonKind::Smasher,
            "megasmasher" => AddonKind::MegaSmasher,
            "landmine" => AddonKind::Landmine,
            "launcher" => AddonKind::Launcher,
            "autoturret" => AddonKind::AutoTurret,
            "autosmasher" => AddonKind::AutoSmasher,
            "auto3" => AddonKind::Auto3,
            "auto5" => AddonKind::Auto5,
            _ => return None,
        })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct TankDefinition {
    pub name: String,
    pub sides: i32,
    /// Body size relative to the base tank.
    pub size_ratio: f32,
    pub max_health: f32,
    pub body_damage: f32,
    pub speed: f32,
    pub pre_addon: Option<AddonKind>,
    pub post_addon: Option<AddonKind>,
    pub barrels: Vec<BarrelDefinition>,
}

impl Default for TankDefinition {
    fn default() -> Self {
        Self {
            name: "Tank".to_string(),
            sides: 1,
            size_ratio: 1.0,
            max_health: 50.0,
            body_damage: 20.0,
            speed: 1.0,
            pre_addon: None,
            post_addon: None,
            barrels: Vec::new(),
        }
    }
}

/// Projectile behaviours the fire dispatch knows.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ProjectileKind {
    Bullet,
    Trap,
    Drone,
    Minion,
    Swarm,
    Flame,
}

impl ProjectileKind {
    pub fn from_tag(tag: &str) -> Option<Self> {
        Some(match tag {
            "bullet" => ProjectileKind::Bullet,
            "trap" => ProjectileKind::Trap,
            "drone" => ProjectileKind::Drone,
            "minion" => ProjectileKind::Minion,
            "swarm" => ProjectileKind::Swarm,
            "flame" => ProjectileKind::Flame,
            _ => return None,
        })
    }

    /// Continuous spawners fire whether or not the trigger is held.
    pub fn always_fires(&self) -> bool {
        matches!(self, ProjectileKind::Drone | ProjectileKind::Minion)
    }

    /// Steers toward the owner's aim instead of flying straight.
    pub fn is_guided(&self) -> bool {
        matches!(self, ProjectileKind::Drone | ProjectileKind::Minion | ProjectileKind::Swarm)
    }
}

// ============================================================
// Built-in records
// ============================================================

/// The small turret used by auto turret addons.
pub fn auto_turret_mini_barrel() -> BarrelDefinition {
    BarrelDefinition {
        size: 55.0,
        width: 42.0 * 0.7,
        delay: 0.01,
        reload: 1.0,
        recoil: 0.3,
        bullet: BulletDefinition {
            health: 1.0,
            damage: 0.4,
            speed: 1.2,
            ..Default::default()
        },
        ..Default::default()
    }
}

pub fn basic_tank() -> TankDefinition {
    TankDefinition {
        barrels: vec![BarrelDefinition {
            bullet: BulletDefinition { damage: 1.0, health: 1.0, ..Default::default() },
            ..Default::default()
        }],
        ..Default::default()
    }
}

pub fn twin_tank() -> TankDefinition {
    let barrel = |offset: f32, delay: f32| BarrelDefinition {
        offset,
        delay,
        width: 42.0 * 0.8,
        reload: 1.0,
        recoil: 0.75,
        bullet: BulletDefinition { damage: 0.65, health: 0.9, ..Default::default() },
        ..Default::default()
    };
    TankDefinition {
        name: "Twin".to_string(),
        barrels: vec![barrel(-26.0, 0.0), barrel(26.0, 0.5)],
        ..Default::default()
    }
}

pub fn overseer_tank() -> TankDefinition {
    let barrel = |angle: f32| BarrelDefinition {
        angle,
        size: 70.0,
        width: 42.0,
        reload: 6.0,
        recoil: 1.0,
        is_trapezoid: true,
        drone_count: Some(4),
        bullet: BulletDefinition {
            kind: "drone".to_string(),
            health: 2.0,
            damage: 0.7,
            speed: 0.8,
            life_length: -1.0,
            sides: Some(3),
            ..Default::default()
        },
        ..Default::default()
    };
    TankDefinition {
        name: "Overseer".to_string(),
        barrels: vec![barrel(PI / 2.0), barrel(-PI / 2.0)],
        ..Default::default()
    }
}

pub fn smasher_tank() -> TankDefinition {
    TankDefinition {
        name: "Smasher".to_string(),
        body_damage: 30.0,
        pre_addon: Some(AddonKind::Smasher),
        ..Default::default()
    }
}

pub fn auto3_tank() -> TankDefinition {
    TankDefinition {
        name: "Auto 3".to_string(),
        post_addon: Some(AddonKind::Auto3),
        ..Default::default()
    }
}

/// Ratio of a launcher's length to its owner's size.
pub const LAUNCHER_SIZE_RATIO: f32 = 65.5 * SQRT_2 / 50.0;
pub const LAUNCHER_WIDTH_RATIO: f32 = 33.6 / 50.0;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_tags_are_none() {
        assert_eq!(ProjectileKind::from_tag("railgun"), None);
        assert_eq!(AddonKind::from_tag("nonsense"), None);
        assert_eq!(ProjectileKind::from_tag("drone"), Some(ProjectileKind::Drone));
    }

    #[test]
    fn test_drone_kinds_always_fire() {
        assert!(ProjectileKind::Drone.always_fires());
        assert!(ProjectileKind::Minion.always_fires());
        assert!(!ProjectileKind::Bullet.always_fires());
        assert!(!ProjectileKind::Swarm.always_fires());
    }

    #[test]
    fn test_builtin_tanks_are_well_formed() {
        for def in [basic_tank(), twin_tank(), overseer_tank(), smasher_tank(), auto3_tank()] {
            for b in &def.barrels {
                assert!(b.reload > 0.0, "{}", def.name);
                assert!(b.size > 0.0 && b.width > 0.0, "{}", def.name);
            }
        }
    }
}

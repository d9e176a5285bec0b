// groups.rs - the concrete field groups and their flag sets

use bitflags::bitflags;

use crate::entity::EntityId;
use crate::field_group::{field_group, impl_flags_field, GroupId};

// ============================================================
// Flags
// ============================================================

bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct PositionFlags: u32 {
        /// Angle is a world angle, not added to the parent's.
        const ABSOLUTE_ROTATION      = 1 << 0;
        const CAN_MOVE_THROUGH_WALLS = 1 << 1;
        /// x/y are world coordinates, not an offset from the parent.
        const ABSOLUTE_POSITION      = 1 << 2;
    }
}

bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct PhysicsFlags: u32 {
        const IS_TRAPEZOID              = 1 << 0;
        const IS_SOLID_WALL             = 1 << 1;
        const CAN_ESCAPE_ARENA          = 1 << 2;
        const IS_BASE                   = 1 << 3;
        const NO_OWN_TEAM_COLLISION     = 1 << 4;
        const ONLY_SAME_OWNER_COLLISION = 1 << 5;
    }
}

bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct StyleFlags: u32 {
        const IS_VISIBLE          = 1 << 0;
        const IS_FLASHING         = 1 << 1;
        const SHOWS_ABOVE_PARENT  = 1 << 2;
        const IS_STAR             = 1 << 3;
        const IS_CACHABLE         = 1 << 4;
        const RENDER_FIRST        = 1 << 5;
        const HAS_NO_DMG_INDICATOR = 1 << 6;
    }
}

bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct HealthFlags: u32 {
        const HIDDEN_HEALTHBAR = 1 << 0;
    }
}

bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct NameFlags: u32 {
        const HIDDEN_NAME      = 1 << 0;
        const HIGHLIGHTED_NAME = 1 << 1;
    }
}

bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct BarrelFlags: u32 {
        /// Toggled on every shot so the client can play the recoil animation.
        const HAS_SHOT = 1 << 0;
    }
}

impl_flags_field!(PositionFlags, PhysicsFlags, StyleFlags, HealthFlags, NameFlags, BarrelFlags);

/// Palette indices understood by the client.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(i32)]
pub enum Color {
    Border = 0,
    Barrel = 1,
    Tank = 2,
    TeamBlue = 3,
    TeamRed = 4,
    TeamPurple = 5,
    TeamGreen = 6,
    Shiny = 7,
    EnemySquare = 8,
    EnemyTriangle = 9,
    EnemyPentagon = 10,
    EnemyCrasher = 11,
    Neutral = 12,
    ScoreboardBar = 13,
    Box = 14,
    EnemyTank = 15,
    NecromancerSquare = 16,
    Fallen = 17,
}

impl From<Color> for i32 {
    fn from(c: Color) -> i32 {
        c as i32
    }
}

// ============================================================
// Groups
// ============================================================

field_group! {
    /// Parent (transform), owner (attribution) and team (collision grouping).
    ///
    /// The parent field is normally written through `Arena::reparent`, which
    /// rejects cycles and dead parents before calling `set_parent`.
    RelationsGroup(RelationsValues) = GroupId::Relations;
    {
        0 parent: Option<EntityId> => set_parent,
        1 owner: Option<EntityId> => set_owner,
        2 team: Option<EntityId> => set_team,
    }
}

field_group! {
    BarrelGroup(BarrelValues) = GroupId::Barrel;
    {
        0 flags: BarrelFlags => set_flags,
        1 reload_time: f32 => set_reload_time,
        2 trapezoid_direction: f32 => set_trapezoid_direction,
    }
}

field_group! {
    PhysicsGroup(PhysicsValues) = GroupId::Physics;
    {
        0 flags: PhysicsFlags => set_flags,
        1 sides: i32 => set_sides,
        2 size: f32 => set_size,
        3 width: f32 => set_width,
        4 absorption_factor: f32 => set_absorption_factor,
        5 push_factor: f32 => set_push_factor,
    }
}

field_group! {
    HealthGroup(HealthValues) = GroupId::Health;
    {
        0 flags: HealthFlags => set_flags,
        1 health: f32 => set_health,
        2 max_health: f32 => set_max_health,
    }
}

field_group! {
    /// Local transform. Composed with the parent chain unless the matching
    /// absolute flag is set.
    PositionGroup(PositionValues) = GroupId::Position;
    {
        0 x: f32 => set_x,
        1 y: f32 => set_y,
        2 angle: f32 => set_angle,
        3 flags: PositionFlags => set_flags,
    }
}

field_group! {
    StyleGroup(StyleValues) = GroupId::Style;
    {
        0 flags: StyleFlags => set_flags,
        1 color: i32 => set_color,
        2 border_width: f32 => set_border_width,
        3 opacity: f32 => set_opacity,
        4 z_index: i32 => set_z_index,
    }
}

field_group! {
    NameGroup(NameValues) = GroupId::Name;
    {
        0 flags: NameFlags => set_flags,
        1 name: String => set_name,
    }
}

field_group! {
    ScoreGroup(ScoreValues) = GroupId::Score;
    {
        0 score: f32 => set_score,
    }
}

impl PhysicsGroup {
    /// Defaults every body starts from before its constructor adjusts it.
    pub fn standard() -> Self {
        Self::new(PhysicsValues {
            sides: 1,
            size: 1.0,
            width: 1.0,
            absorption_factor: 1.0,
            push_factor: 8.0,
            ..Default::default()
        })
    }
}

impl StyleGroup {
    pub fn standard() -> Self {
        Self::new(StyleValues {
            flags: StyleFlags::IS_VISIBLE,
            color: Color::Border.into(),
            border_width: 7.5,
            opacity: 1.0,
            z_index: 0,
        })
    }
}

impl HealthGroup {
    pub fn with_max(max_health: f32) -> Self {
        Self::new(HealthValues { flags: HealthFlags::empty(), health: max_health, max_health })
    }
}

// ============================================================
// Tests
// ============================================================

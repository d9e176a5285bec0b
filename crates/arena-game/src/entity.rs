// entity.rs - entity identity, lifecycle state and field-group composition

use std::fmt;

use arena_common::shared::{angle_vector, vector_length, vector_ma, vector_scale, Vec2, VEC2_ORIGIN};

use crate::dispatch::{Behavior, EntityKind};
use crate::error::SchemaError;
use crate::field_group::{DirtyField, FieldGroup, FieldId, FieldValue, GroupId};
use crate::groups::*;
use crate::replication::ViewerId;

/// Velocity retained per tick.
pub const FRICTION: f32 = 0.9;

/// Below this speed an entity is considered at rest.
pub const REST_SPEED: f32 = 0.01;

/// Generation-checked handle. A handle to a removed entity never resolves,
/// even after its slot index has been reused.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityId {
    index: u32,
    generation: u32,
}

impl EntityId {
    pub(crate) fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    /// Rebuilds a handle from its wire form. The result resolves only if
    /// the slot still holds that generation.
    pub fn from_parts(index: u32, generation: u32) -> Self {
        Self::new(index, generation)
    }

    #[inline]
    pub fn index(&self) -> u32 {
        self.index
    }

    #[inline]
    pub fn generation(&self) -> u32 {
        self.generation
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}:{}", self.index, self.generation)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LifeState {
    /// Groups attached, not yet ticked or replicated.
    Constructing,
    Live,
    /// Deletion animation: ticked for visual decay, not interactive.
    Dying { ticks_left: u32 },
    Removed,
}

impl LifeState {
    /// Ticked and replicated this tick.
    #[inline]
    pub fn is_active(&self) -> bool {
        matches!(self, LifeState::Live | LifeState::Dying { .. })
    }
}

/// What happens to a child when its parent is destroyed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum OrphanPolicy {
    /// Survive the parent; moved to the root, keeping its world transform,
    /// on the tick the parent is removed.
    #[default]
    Reparent,
    /// Enter the deletion animation together with the parent.
    DieWithParent,
}

/// An optional group, for `Entity::attach`.
#[derive(Clone, Debug)]
pub enum OptionalGroup {
    Barrel(BarrelGroup),
    Health(HealthGroup),
    Name(NameGroup),
    Score(ScoreGroup),
}

pub struct Entity {
    id: EntityId,
    pub(crate) sequence: u64,
    pub(crate) spawn_tick: u64,
    pub(crate) state: LifeState,
    pub orphan_policy: OrphanPolicy,
    pub behavior: Behavior,

    pub relations: RelationsGroup,
    pub barrel: Option<BarrelGroup>,
    pub physics: PhysicsGroup,
    pub health: Option<HealthGroup>,
    pub position: PositionGroup,
    pub style: StyleGroup,
    pub name: Option<NameGroup>,
    pub score: Option<ScoreGroup>,

    pub velocity: Vec2,
    /// Contact damage dealt per tick of overlap.
    pub damage: f32,
    /// Score credited to the owner chain of whoever kills this entity.
    pub score_reward: f32,

    /// Set once the entity has appeared in a flush.
    pub(crate) replicated: bool,
    /// Viewers that could see the entity at the last flush.
    pub(crate) seen_by: Vec<ViewerId>,
    pub(crate) deletion_ticks: u32,
}

impl Entity {
    pub(crate) fn new(id: EntityId, behavior: Behavior) -> Self {
        Entity {
            id,
            sequence: 0,
            spawn_tick: 0,
            state: LifeState::Constructing,
            orphan_policy: OrphanPolicy::default(),
            behavior,
            relations: RelationsGroup::default(),
            barrel: None,
            physics: PhysicsGroup::standard(),
            health: None,
            position: PositionGroup::default(),
            style: StyleGroup::standard(),
            name: None,
            score: None,
            velocity: VEC2_ORIGIN,
            damage: 0.0,
            score_reward: 0.0,
            replicated: false,
            seen_by: Vec::new(),
            deletion_ticks: 0,
        }
    }

    #[inline]
    pub fn id(&self) -> EntityId {
        self.id
    }

    #[inline]
    pub fn state(&self) -> LifeState {
        self.state
    }

    #[inline]
    pub fn is_live(&self) -> bool {
        self.state == LifeState::Live
    }

    #[inline]
    pub fn is_dying(&self) -> bool {
        matches!(self.state, LifeState::Dying { .. })
    }

    pub fn spawn_tick(&self) -> u64 {
        self.spawn_tick
    }

    /// Creation order; children always sort after their parent.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn kind(&self) -> EntityKind {
        self.behavior.kind()
    }

    /// Attaches an optional group. Each slot may be filled once.
    pub fn attach(&mut self, group: OptionalGroup) -> Result<(), SchemaError> {
        fn fill<G>(slot: &mut Option<G>, g: G, id: GroupId) -> Result<(), SchemaError> {
            if slot.is_some() {
                return Err(SchemaError::DuplicateGroup(id));
            }
            *slot = Some(g);
            Ok(())
        }
        match group {
            OptionalGroup::Barrel(g) => fill(&mut self.barrel, g, GroupId::Barrel),
            OptionalGroup::Health(g) => fill(&mut self.health, g, GroupId::Health),
            OptionalGroup::Name(g) => fill(&mut self.name, g, GroupId::Name),
            OptionalGroup::Score(g) => fill(&mut self.score, g, GroupId::Score),
        }
    }

    /// Attached groups, in flush order.
    pub fn groups(&self) -> Vec<&dyn FieldGroup> {
        let mut out: Vec<&dyn FieldGroup> = Vec::with_capacity(8);
        out.push(&self.relations);
        if let Some(g) = &self.barrel {
            out.push(g);
        }
        out.push(&self.physics);
        if let Some(g) = &self.health {
            out.push(g);
        }
        out.push(&self.position);
        out.push(&self.style);
        if let Some(g) = &self.name {
            out.push(g);
        }
        if let Some(g) = &self.score {
            out.push(g);
        }
        out
    }

    pub fn group(&self, id: GroupId) -> Option<&dyn FieldGroup> {
        match id {
            GroupId::Relations => Some(&self.relations),
            GroupId::Barrel => self.barrel.as_ref().map(|g| g as &dyn FieldGroup),
            GroupId::Physics => Some(&self.physics),
            GroupId::Health => self.health.as_ref().map(|g| g as &dyn FieldGroup),
            GroupId::Position => Some(&self.position),
            GroupId::Style => Some(&self.style),
            GroupId::Name => self.name.as_ref().map(|g| g as &dyn FieldGroup),
            GroupId::Score => self.score.as_ref().map(|g| g as &dyn FieldGroup),
        }
    }

    pub fn group_mut(&mut self, id: GroupId) -> Option<&mut dyn FieldGroup> {
        match id {
            GroupId::Relations => Some(&mut self.relations),
            GroupId::Barrel => self.barrel.as_mut().map(|g| g as &mut dyn FieldGroup),
            GroupId::Physics => Some(&mut self.physics),
            GroupId::Health => self.health.as_mut().map(|g| g as &mut dyn FieldGroup),
            GroupId::Position => Some(&mut self.position),
            GroupId::Style => Some(&mut self.style),
            GroupId::Name => self.name.as_mut().map(|g| g as &mut dyn FieldGroup),
            GroupId::Score => self.score.as_mut().map(|g| g as &mut dyn FieldGroup),
        }
    }

    pub fn read(&self, group: GroupId, field: FieldId) -> Result<FieldValue, SchemaError> {
        self.group(group).ok_or(SchemaError::MissingGroup(group))?.read(field)
    }

    pub fn write_silent(&mut self, group: GroupId, field: FieldId, value: FieldValue) -> Result<(), SchemaError> {
        self.group_mut(group)
            .ok_or(SchemaError::MissingGroup(group))?
            .write_silent(field, value)
    }

    pub fn write_tracked(&mut self, group: GroupId, field: FieldId, value: FieldValue) -> Result<(), SchemaError> {
        self.group_mut(group)
            .ok_or(SchemaError::MissingGroup(group))?
            .write_tracked(field, value)
    }

    /// Drains every attached group. Called by the arena once per tick.
    pub(crate) fn drain_dirty(&mut self) -> Vec<DirtyField> {
        let mut out = Vec::new();
        self.relations.drain_dirty_into(&mut out);
        if let Some(g) = &mut self.barrel {
            g.drain_dirty_into(&mut out);
        }
        self.physics.drain_dirty_into(&mut out);
        if let Some(g) = &mut self.health {
            g.drain_dirty_into(&mut out);
        }
        self.position.drain_dirty_into(&mut out);
        self.style.drain_dirty_into(&mut out);
        if let Some(g) = &mut self.name {
            g.drain_dirty_into(&mut out);
        }
        if let Some(g) = &mut self.score {
            g.drain_dirty_into(&mut out);
        }
        out
    }

    /// Every field of every attached group.
    pub fn snapshot(&self) -> Vec<DirtyField> {
        let mut out = Vec::new();
        for g in self.groups() {
            g.snapshot_into(&mut out);
        }
        out
    }

    #[inline]
    pub fn local_position(&self) -> Vec2 {
        [self.position.values.x, self.position.values.y]
    }

    pub fn add_acceleration(&mut self, angle: f32, magnitude: f32) {
        self.velocity = vector_ma(&self.velocity, magnitude, &angle_vector(angle));
    }

    /// Integrates velocity into the local position (tracked) and applies friction.
    pub fn apply_physics(&mut self) {
        if vector_length(&self.velocity) < REST_SPEED {
            self.velocity = VEC2_ORIGIN;
        } else if self.is_dying() {
            self.velocity = vector_scale(&self.velocity, 0.5);
        }
        self.position.set_x(self.position.values.x + self.velocity[0]);
        self.position.set_y(self.position.values.y + self.velocity[1]);
        self.velocity = vector_scale(&self.velocity, FRICTION);
    }

    /// Health as a fraction of max, or `None` for bodies without health.
    pub fn health_fraction(&self) -> Option<f32> {
        let h = self.health.as_ref()?;
        if h.values.max_health <= 0.0 {
            return Some(0.0);
        }
        Some(h.values.health / h.values.max_health)
    }
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entity")
            .field("id", &self.id)
            .field("kind", &self.kind())
            .field("state", &self.state)
            .field("relations", &self.relations.values)
            .field("position", &self.position.values)
            .finish()
    }
}

// ============================================================
// Tests
// ============================================================

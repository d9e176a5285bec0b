#![allow(clippy::too_many_arguments, clippy::float_cmp, clippy::manual_range_contains,
         clippy::type_complexity, clippy::new_without_default)]
// Simulation kernel: field groups, entity table, relations, tick loop, weapons.

pub mod field_group;
pub mod error;
pub mod groups;
pub mod entity;
pub mod shoot_cycle;
pub mod arena;
pub mod relations;
pub mod replication;
pub mod definitions;
pub mod dispatch;
pub mod ai;
pub mod combat;
pub mod barrel;
pub mod projectile;
pub mod tank;
pub mod addons;
pub mod auto_turret;

pub use arena::{Arena, ArenaConfig, TickSummary};
pub use entity::{Entity, EntityId, LifeState, OrphanPolicy};
pub use error::{SchemaError, SpawnError};
pub use replication::{EntityDelta, NullSerializer, Serializer, TickDelta, Viewer, ViewerId};

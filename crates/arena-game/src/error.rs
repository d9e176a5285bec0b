// error.rs - schema and spawn errors

use thiserror::Error as ThisError;

use crate::entity::EntityId;
use crate::field_group::{FieldId, FieldKind, GroupId};

/// A write or attach that does not match a group's schema. Always a
/// programming error: the caller asked for a layout the wire format
/// does not have.
#[derive(Debug, Clone, PartialEq, ThisError)]
pub enum SchemaError {
    #[error("{group:?} has no field {field}")]
    UnknownField { group: GroupId, field: FieldId },

    #[error("{group:?}.{field}: expected {expected:?}, got {found:?}")]
    TypeMismatch {
        group: GroupId,
        field: FieldId,
        expected: FieldKind,
        found: FieldKind,
    },

    #[error("{0:?} group attached twice")]
    DuplicateGroup(GroupId),

    #[error("entity has no {0:?} group")]
    MissingGroup(GroupId),
}

#[derive(Debug, Clone, PartialEq, ThisError)]
pub enum SpawnError {
    #[error("entity construction failed: {0}")]
    Schema(#[from] SchemaError),

    #[error("entity table full ({max} slots)")]
    ArenaFull { max: usize },

    #[error("owner {0} cannot carry barrels or addons")]
    InvalidOwner(EntityId),
}

// field_group.rs - typed field bundles with per-field dirty tracking
//
// Every field has two write paths:
//   - silent:  `group.values.x = v`      (value only, never replicated by itself)
//   - tracked: `group.set_x(v)`          (value + dirty bit, unconditionally)
//
// A tracked write marks the field even when the new value equals the old
// one; the reference protocol treats "value set" as "changed". The dirty set
// is cleared only by `drain_dirty_into`, which the arena calls once per tick
// after all mutation for that tick.

use crate::entity::EntityId;
use crate::error::SchemaError;

pub type FieldId = u8;

/// Field group identifiers, in the order groups are flushed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum GroupId {
    Relations = 0,
    Barrel,
    Physics,
    Health,
    Position,
    Style,
    Name,
    Score,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FieldKind {
    Float,
    Int,
    Flags,
    Entity,
    Str,
}

/// A field value as seen by the serializer.
#[derive(Clone, Debug, PartialEq)]
pub enum FieldValue {
    Float(f32),
    Int(i32),
    Flags(u32),
    Entity(Option<EntityId>),
    Str(String),
}

impl FieldValue {
    pub fn kind(&self) -> FieldKind {
        match self {
            FieldValue::Float(_) => FieldKind::Float,
            FieldValue::Int(_) => FieldKind::Int,
            FieldValue::Flags(_) => FieldKind::Flags,
            FieldValue::Entity(_) => FieldKind::Entity,
            FieldValue::Str(_) => FieldKind::Str,
        }
    }
}

/// One dirty (or snapshotted) field.
#[derive(Clone, Debug, PartialEq)]
pub struct DirtyField {
    pub group: GroupId,
    pub field: FieldId,
    pub value: FieldValue,
}

#[derive(Clone, Copy, Debug)]
pub struct FieldDef {
    pub name: &'static str,
    pub kind: FieldKind,
}

/// Conversion between a Rust field type and its wire-level value.
pub trait FieldType: Sized {
    const KIND: FieldKind;
    fn into_value(self) -> FieldValue;
    fn from_value(value: FieldValue) -> Option<Self>;
}

impl FieldType for f32 {
    const KIND: FieldKind = FieldKind::Float;
    fn into_value(self) -> FieldValue {
        FieldValue::Float(self)
    }
    fn from_value(value: FieldValue) -> Option<Self> {
        match value {
            FieldValue::Float(v) => Some(v),
            _ => None,
        }
    }
}

impl FieldType for i32 {
    const KIND: FieldKind = FieldKind::Int;
    fn into_value(self) -> FieldValue {
        FieldValue::Int(self)
    }
    fn from_value(value: FieldValue) -> Option<Self> {
        match value {
            FieldValue::Int(v) => Some(v),
            _ => None,
        }
    }
}

impl FieldType for Option<EntityId> {
    const KIND: FieldKind = FieldKind::Entity;
    fn into_value(self) -> FieldValue {
        FieldValue::Entity(self)
    }
    fn from_value(value: FieldValue) -> Option<Self> {
        match value {
            FieldValue::Entity(v) => Some(v),
            _ => None,
        }
    }
}

impl FieldType for String {
    const KIND: FieldKind = FieldKind::Str;
    fn into_value(self) -> FieldValue {
        FieldValue::Str(self)
    }
    fn from_value(value: FieldValue) -> Option<Self> {
        match value {
            FieldValue::Str(v) => Some(v),
            _ => None,
        }
    }
}

/// Implements `FieldType` for a `bitflags` type.
macro_rules! impl_flags_field {
    ($($flags:ty),+ $(,)?) => {
        $(
            impl $crate::field_group::FieldType for $flags {
                const KIND: $crate::field_group::FieldKind = $crate::field_group::FieldKind::Flags;
                fn into_value(self) -> $crate::field_group::FieldValue {
                    $crate::field_group::FieldValue::Flags(self.bits())
                }
                fn from_value(value: $crate::field_group::FieldValue) -> Option<Self> {
                    match value {
                        $crate::field_group::FieldValue::Flags(bits) => Some(<$flags>::from_bits_retain(bits)),
                        _ => None,
                    }
                }
            }
        )+
    };
}
pub(crate) use impl_flags_field;

/// Dynamic (schema-checked) access to a field group.
///
/// Typed accessors on the concrete group types are the normal path; this
/// trait is what the flush step and data-driven callers go through.
pub trait FieldGroup {
    fn group_id(&self) -> GroupId;
    fn schema(&self) -> &'static [FieldDef];
    fn read(&self, field: FieldId) -> Result<FieldValue, SchemaError>;
    fn write_silent(&mut self, field: FieldId, value: FieldValue) -> Result<(), SchemaError>;
    fn write_tracked(&mut self, field: FieldId, value: FieldValue) -> Result<(), SchemaError>;
    fn dirty_mask(&self) -> u64;
    /// Appends the dirty fields (in field order) and clears the dirty set.
    fn drain_dirty_into(&mut self, out: &mut Vec<DirtyField>);
    /// Appends every field, dirty or not. Does not touch the dirty set.
    fn snapshot_into(&self, out: &mut Vec<DirtyField>);

    fn is_dirty(&self, field: FieldId) -> bool {
        field < 64 && self.dirty_mask() & (1u64 << field) != 0
    }

    fn drain_dirty(&mut self) -> Vec<DirtyField> {
        let mut out = Vec::new();
        self.drain_dirty_into(&mut out);
        out
    }
}

/// Declares a field group: a `pub values` struct for silent access, a
/// tracked setter per field, and the `FieldGroup` impl.
///
/// Field ids must be 0.. in declaration order.
macro_rules! field_group {
    (
        $(#[$meta:meta])*
        $group:ident ( $values:ident ) = $gid:expr;
        {
            $( $(#[$fmeta:meta])* $id:literal $field:ident : $ty:ty => $setter:ident ),+ $(,)?
        }
    ) => {
        #[derive(Clone, Debug, Default, PartialEq)]
        pub struct $values {
            $( $(#[$fmeta])* pub $field: $ty, )+
        }

        $(#[$meta])*
        #[derive(Clone, Debug, Default)]
        pub struct $group {
            /// Current values. Assigning through here is a silent write.
            pub values: $values,
            dirty: u64,
        }

        impl $group {
            pub const ID: $crate::field_group::GroupId = $gid;

            const SCHEMA: &'static [$crate::field_group::FieldDef] = &[
                $( $crate::field_group::FieldDef {
                    name: stringify!($field),
                    kind: <$ty as $crate::field_group::FieldType>::KIND,
                }, )+
            ];

            pub fn new(values: $values) -> Self {
                Self { values, dirty: 0 }
            }

            $(
                /// Tracked write.
                #[inline]
                pub fn $setter(&mut self, value: $ty) {
                    self.values.$field = value;
                    self.dirty |= 1u64 << $id;
                }
            )+
        }

        impl $crate::field_group::FieldGroup for $group {
            fn group_id(&self) -> $crate::field_group::GroupId {
                $gid
            }

            fn schema(&self) -> &'static [$crate::field_group::FieldDef] {
                Self::SCHEMA
            }

            fn read(
                &self,
                field: $crate::field_group::FieldId,
            ) -> Result<$crate::field_group::FieldValue, $crate::error::SchemaError> {
                match field {
                    $( $id => Ok($crate::field_group::FieldType::into_value(self.values.$field.clone())), )+
                    _ => Err($crate::error::SchemaError::UnknownField { group: $gid, field }),
                }
            }

            fn write_silent(
                &mut self,
                field: $crate::field_group::FieldId,
                value: $crate::field_group::FieldValue,
            ) -> Result<(), $crate::error::SchemaError> {
                match field {
                    $( $id => {
                        let found = value.kind();
                        self.values.$field = <$ty as $crate::field_group::FieldType>::from_value(value)
                            .ok_or($crate::error::SchemaError::TypeMismatch {
                                group: $gid,
                                field,
                                expected: <$ty as $crate::field_group::FieldType>::KIND,
                                found,
                            })?;
                        Ok(())
                    } )+
                    _ => Err($crate::error::SchemaError::UnknownField { group: $gid, field }),
                }
            }

            fn write_tracked(
                &mut self,
                field: $crate::field_group::FieldId,
                value: $crate::field_group::FieldValue,
            ) -> Result<(), $crate::error::SchemaError> {
                self.write_silent(field, value)?;
                self.dirty |= 1u64 << field;
                Ok(())
            }

            fn dirty_mask(&self) -> u64 {
                self.dirty
            }

            fn drain_dirty_into(&mut self, out: &mut Vec<$crate::field_group::DirtyField>) {
                let mask = std::mem::take(&mut self.dirty);
                if mask == 0 {
                    return;
                }
                $(
                    if mask & (1u64 << $id) != 0 {
                        out.push($crate::field_group::DirtyField {
                            group: $gid,
                            field: $id,
                            value: $crate::field_group::FieldType::into_value(self.values.$field.clone()),
                        });
                    }
                )+
            }

            fn snapshot_into(&self, out: &mut Vec<$crate::field_group::DirtyField>) {
                $(
                    out.push($crate::field_group::DirtyField {
                        group: $gid,
                        field: $id,
                        value: $crate::field_group::FieldType::into_value(self.values.$field.clone()),
                    });
                )+
            }
        }
    };
}
pub(crate) use field_group;

// ============================================================
// Tests
// ============================================================

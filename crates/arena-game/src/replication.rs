// replication.rs - per-tick delta handed to the wire serializer

use rayon::prelude::*;

use arena_common::shared::Vec2;

use crate::arena::Arena;
use crate::dispatch::EntityKind;
use crate::entity::EntityId;
use crate::field_group::DirtyField;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ViewerId(pub u32);

/// A camera: sees everything within a square of half-extent `view_range`
/// around `center`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Viewer {
    pub id: ViewerId,
    pub center: Vec2,
    pub view_range: f32,
}

impl Viewer {
    /// Bodies are visible while any part of them is inside the view square.
    pub fn can_see(&self, pos: &Vec2, size: f32) -> bool {
        let reach = self.view_range + size.max(0.0);
        (pos[0] - self.center[0]).abs() <= reach && (pos[1] - self.center[1]).abs() <= reach
    }
}

/// One entity's share of a tick.
#[derive(Clone, Debug, PartialEq)]
pub struct EntityDelta {
    pub id: EntityId,
    pub kind: EntityKind,
    /// First flush this entity appears in.
    pub created: bool,
    pub dying: bool,
    /// Dirty fields, in group then field order.
    pub fields: Vec<DirtyField>,
    /// Every field; present when `created` or when a viewer sees the entity
    /// that did not see it last tick.
    pub snapshot: Option<Vec<DirtyField>>,
    pub visible_to: Vec<ViewerId>,
}

impl EntityDelta {
    pub fn is_visible_to(&self, viewer: ViewerId) -> bool {
        self.visible_to.contains(&viewer)
    }
}

/// Everything the serializer needs for one tick. Owned, so it may be
/// encoded after the simulation has moved on.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TickDelta {
    pub tick: u64,
    /// Every live or dying entity, in creation order.
    pub updates: Vec<EntityDelta>,
    /// Identifiers released since the previous flush.
    pub removed: Vec<EntityId>,
}

impl TickDelta {
    pub fn entity(&self, id: EntityId) -> Option<&EntityDelta> {
        self.updates.iter().find(|u| u.id == id)
    }
}

/// Encodes a tick for the wire. The byte layout lives behind this trait.
pub trait Serializer {
    fn serialize(&mut self, delta: &TickDelta);
}

/// Keeps every delta. Handy for tools and tests.
impl Serializer for Vec<TickDelta> {
    fn serialize(&mut self, delta: &TickDelta) {
        self.push(delta.clone());
    }
}

/// Discards every delta.
pub struct NullSerializer;

impl Serializer for NullSerializer {
    fn serialize(&mut self, _delta: &TickDelta) {}
}

impl Arena {
    /// Makes every entity treat `viewer` as never having seen it, so the
    /// next flush carries a snapshot for everything in that viewer's range.
    pub fn forget_viewer(&mut self, viewer: ViewerId) {
        for i in 0..self.order.len() {
            let id = self.order[i];
            if let Some(e) = self.get_mut(id) {
                e.seen_by.retain(|v| *v != viewer);
            }
        }
    }

    /// Phase 3: drains every active entity exactly once and builds the delta.
    pub(crate) fn flush(&mut self, viewers: &[Viewer]) -> TickDelta {
        let bodies: Vec<(EntityId, Vec2, f32)> = self
            .entities()
            .filter(|e| e.state().is_active())
            .filter_map(|e| {
                let pos = self.world_position(e.id())?;
                Some((e.id(), pos, e.physics.values.size))
            })
            .collect();

        let visibility: Vec<Vec<ViewerId>> = bodies
            .par_iter()
            .map(|(_, pos, size)| {
                viewers.iter().filter(|v| v.can_see(pos, *size)).map(|v| v.id).collect()
            })
            .collect();

        let mut updates = Vec::with_capacity(bodies.len());
        for ((id, _, _), visible_to) in bodies.into_iter().zip(visibility) {
            let Some(e) = self.get_mut(id) else { continue };
            let fields = e.drain_dirty();
            let created = !e.replicated;
            let newly_seen = visible_to.iter().any(|v| !e.seen_by.contains(v));
            let snapshot = (created || newly_seen).then(|| e.snapshot());

            e.replicated = true;
            e.seen_by.clone_from(&visible_to);

            updates.push(EntityDelta {
                id,
                kind: e.kind(),
                created,
                dying: e.is_dying(),
                fields,
                snapshot,
                visible_to,
            });
        }

        TickDelta {
            tick: self.tick(),
            updates,
            removed: std::mem::take(&mut self.pending_removals),
        }
    }
}

// ============================================================
// Tests
// ============================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::ArenaConfig;
    use crate::dispatch::Behavior;
    use crate::field_group::{FieldValue, GroupId};

    fn make_viewer(id: u32, x: f32) -> Viewer {
        Viewer { id: ViewerId(id), center: [x, 0.0], view_range: 100.0 }
    }

    fn make_arena_with(x: f32) -> (Arena, EntityId) {
        let mut arena = Arena::new(ArenaConfig::default());
        let id = arena
            .spawn(Behavior::Object, |e| {
                e.position.values.x = x;
                e.physics.values.size = 10.0;
                Ok(())
            })
            .unwrap();
        (arena, id)
    }

    fn step(arena: &mut Arena, viewers: &[Viewer]) -> TickDelta {
        let mut out: Vec<TickDelta> = Vec::new();
        arena.run_tick(viewers, &mut out);
        out.remove(0)
    }

    #[test]
    fn test_creation_carries_full_snapshot() {
        let (mut arena, id) = make_arena_with(0.0);
        let delta = step(&mut arena, &[]);
        let u = delta.entity(id).unwrap();
        assert!(u.created);
        let snapshot = u.snapshot.as_ref().unwrap();
        assert!(snapshot.contains(&DirtyField { group: GroupId::Physics, field: 2, value: FieldValue::Float(10.0) }));

        let delta = step(&mut arena, &[]);
        let u = delta.entity(id).unwrap();
        assert!(!u.created);
        assert!(u.snapshot.is_none());
    }

    #[test]
    fn test_visibility_computed_per_viewer() {
        let (mut arena, id) = make_arena_with(0.0);
        let viewers = [make_viewer(1, 0.0), make_viewer(2, 105.0), make_viewer(3, 500.0)];
        let delta = step(&mut arena, &viewers);
        let u = delta.entity(id).unwrap();
        assert_eq!(u.visible_to, vec![ViewerId(1), ViewerId(2)]);
        assert!(!u.is_visible_to(ViewerId(3)));
    }

    #[test]
    fn test_entering_view_resends_snapshot() {
        let (mut arena, id) = make_arena_with(0.0);
        step(&mut arena, &[make_viewer(1, 0.0)]);

        let delta = step(&mut arena, &[make_viewer(1, 0.0)]);
        assert!(delta.entity(id).unwrap().snapshot.is_none());

        let delta = step(&mut arena, &[make_viewer(1, 0.0), make_viewer(2, 50.0)]);
        assert!(delta.entity(id).unwrap().snapshot.is_some());
    }

    #[test]
    fn test_forgotten_viewer_gets_fresh_snapshot() {
        let (mut arena, id) = make_arena_with(0.0);
        step(&mut arena, &[make_viewer(1, 0.0), make_viewer(2, 0.0)]);

        arena.forget_viewer(ViewerId(2));
        let delta = step(&mut arena, &[make_viewer(1, 0.0), make_viewer(2, 0.0)]);
        let u = delta.entity(id).unwrap();
        assert!(!u.created);
        assert!(u.snapshot.is_some());

        let delta = step(&mut arena, &[make_viewer(1, 0.0), make_viewer(2, 0.0)]);
        assert!(delta.entity(id).unwrap().snapshot.is_none());
    }

    #[test]
    fn test_hook_spawned_entity_flushed_in_creating_tick() {
        let (mut arena, id) = make_arena_with(0.0);
        // spawned during the tick by a hook
        fn spawn_child(arena: &mut Arena, _id: EntityId) {
            if arena.tick() == 2 {
                let _ = arena.spawn(Behavior::Object, |_| Ok(()));
            }
        }
        arena.get_mut(id).unwrap().behavior = Behavior::Scripted(spawn_child);
        step(&mut arena, &[]);
        let delta = step(&mut arena, &[]);
        assert_eq!(delta.updates.len(), 2);
        assert!(delta.updates[1].created);
    }

    #[test]
    fn test_silent_writes_between_ticks_are_not_flushed() {
        let (mut arena, id) = make_arena_with(0.0);
        step(&mut arena, &[]);
        arena.get_mut(id).unwrap().position.values.y = 3.0;
        let delta = step(&mut arena, &[]);
        assert!(delta.entity(id).unwrap().fields.is_empty());
    }
}

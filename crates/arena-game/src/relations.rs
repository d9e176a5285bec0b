// relations.rs - parent/owner/team graph: transforms, reparenting, team refresh

use std::collections::{HashMap, HashSet};

use tracing::warn;

use arena_common::shared::{vector_add, vector_rotate, Vec2};

use crate::arena::Arena;
use crate::entity::{EntityId, LifeState};
use crate::groups::PositionFlags;

/// Longest parent chain walked before the chain is treated as broken.
pub const MAX_CHAIN_DEPTH: usize = 64;

impl Arena {
    /// Sets `child`'s parent with a tracked write. Self-parenting, a dead
    /// parent, or a parent inside `child`'s own subtree are corrected to the
    /// root.
    pub fn reparent(&mut self, child: EntityId, parent: Option<EntityId>) {
        if !self.contains(child) {
            warn!(entity = %child, "reparent of missing entity ignored");
            return;
        }

        let target = match parent {
            None => None,
            Some(p) if p == child => {
                warn!(entity = %child, "entity parented to itself, moved to root");
                None
            }
            Some(p) if !self.get(p).is_some_and(|e| e.state() != LifeState::Removed) => {
                warn!(entity = %child, parent = %p, "parent is gone, moved to root");
                None
            }
            Some(p) if self.is_ancestor(child, p) => {
                warn!(entity = %child, parent = %p, "parenting would create a cycle, moved to root");
                None
            }
            Some(p) => Some(p),
        };

        if let Some(e) = self.get_mut(child) {
            e.relations.set_parent(target);
        }
    }

    /// True if `ancestor` is on `id`'s parent chain (or is `id`).
    pub fn is_ancestor(&self, ancestor: EntityId, id: EntityId) -> bool {
        let mut cur = Some(id);
        for _ in 0..MAX_CHAIN_DEPTH {
            match cur {
                Some(c) if c == ancestor => return true,
                Some(c) => cur = self.get(c).and_then(|e| e.relations.values.parent),
                None => return false,
            }
        }
        false
    }

    /// Topmost entity on `id`'s parent chain.
    pub fn root_parent(&self, id: EntityId) -> EntityId {
        let mut cur = id;
        for _ in 0..MAX_CHAIN_DEPTH {
            match self.get(cur).and_then(|e| e.relations.values.parent) {
                Some(p) if self.contains(p) => cur = p,
                _ => break,
            }
        }
        cur
    }

    /// World position and angle, composed down the parent chain.
    ///
    /// `angle = parent_angle + local_angle` and
    /// `pos = parent_pos + rotate(local_pos, parent_angle)`, except where
    /// `ABSOLUTE_ROTATION` / `ABSOLUTE_POSITION` take the local value as-is.
    pub fn world_transform(&self, id: EntityId) -> Option<(Vec2, f32)> {
        let mut chain = Vec::with_capacity(4);
        let mut cur = Some(id);
        while let Some(c) = cur {
            if chain.len() >= MAX_CHAIN_DEPTH {
                break;
            }
            let Some(e) = self.get(c) else { break };
            chain.push(e);
            cur = e.relations.values.parent;
        }
        if chain.is_empty() {
            return None;
        }

        let mut pos: Vec2 = [0.0, 0.0];
        let mut angle = 0.0f32;
        for e in chain.iter().rev() {
            let flags = e.position.values.flags;
            let local = e.local_position();
            pos = if flags.contains(PositionFlags::ABSOLUTE_POSITION) {
                local
            } else {
                vector_add(&pos, &vector_rotate(&local, angle))
            };
            angle = if flags.contains(PositionFlags::ABSOLUTE_ROTATION) {
                e.position.values.angle
            } else {
                angle + e.position.values.angle
            };
        }
        Some((pos, angle))
    }

    pub fn world_position(&self, id: EntityId) -> Option<Vec2> {
        self.world_transform(id).map(|(pos, _)| pos)
    }

    pub fn world_angle(&self, id: EntityId) -> Option<f32> {
        self.world_transform(id).map(|(_, angle)| angle)
    }

    /// Moves `id` to the root, converting its local transform to world
    /// coordinates so it stays where it was.
    pub(crate) fn detach_to_root(&mut self, id: EntityId) {
        let Some((pos, angle)) = self.world_transform(id) else { return };
        let Some(e) = self.get_mut(id) else { return };
        e.position.set_x(pos[0]);
        e.position.set_y(pos[1]);
        e.position.set_angle(angle);
        e.relations.set_parent(None);
    }

    /// Copies each parent's team onto its children (tracked), top-down from
    /// the roots in creation order. Broken links found on the way are cut.
    pub(crate) fn refresh_relations(&mut self) {
        let ids = self.order.clone();
        let mut children: HashMap<EntityId, Vec<EntityId>> = HashMap::new();
        let mut roots = Vec::new();
        let mut stale = Vec::new();

        for &id in &ids {
            let Some(e) = self.get(id) else { continue };
            if !e.state().is_active() {
                continue;
            }
            match e.relations.values.parent {
                None => roots.push(id),
                Some(p) if self.get(p).is_some_and(|pe| pe.state().is_active()) => {
                    children.entry(p).or_default().push(id)
                }
                Some(p) => stale.push((id, p)),
            }
        }

        for (id, p) in stale {
            warn!(entity = %id, parent = %p, "parent no longer exists, moved to root");
            if let Some(e) = self.get_mut(id) {
                e.relations.set_parent(None);
            }
            roots.push(id);
        }

        let mut visited = HashSet::new();
        self.propagate_team(&roots, &children, &mut visited);

        // whatever was not reached sits on a parent cycle
        for &id in &ids {
            if visited.contains(&id) || !self.get(id).is_some_and(|e| e.state().is_active()) {
                continue;
            }
            warn!(entity = %id, "parent cycle broken, moved to root");
            if let Some(e) = self.get_mut(id) {
                e.relations.set_parent(None);
            }
            // drop the link from the old parent's child list
            for list in children.values_mut() {
                list.retain(|&c| c != id);
            }
            self.propagate_team(&[id], &children, &mut visited);
        }
    }

    fn propagate_team(
        &mut self,
        roots: &[EntityId],
        children: &HashMap<EntityId, Vec<EntityId>>,
        visited: &mut HashSet<EntityId>,
    ) {
        let mut stack: Vec<EntityId> = roots.iter().rev().copied().collect();
        while let Some(id) = stack.pop() {
            if !visited.insert(id) {
                continue;
            }
            let Some(kids) = children.get(&id) else { continue };
            let team = self.get(id).and_then(|e| e.relations.values.team);
            for &kid in kids {
                if let Some(k) = self.get_mut(kid) {
                    k.relations.set_team(team);
                }
            }
            stack.extend(kids.iter().rev());
        }
    }
}

// ============================================================
// Tests
// ============================================================

#[cfg(test)]
mod tests {
    use std::f32::consts::FRAC_PI_2;

    use crate::arena::{Arena, ArenaConfig};
    use crate::dispatch::Behavior;
    use crate::entity::{EntityId, OrphanPolicy};
    use crate::field_group::{FieldGroup, GroupId};
    use crate::groups::PositionFlags;
    use crate::replication::{NullSerializer, TickDelta};

    fn make_arena() -> Arena {
        Arena::new(ArenaConfig { deletion_ticks: 2, id_quarantine: 1, ..Default::default() })
    }

    fn make_node(arena: &mut Arena, parent: Option<EntityId>, x: f32, y: f32, angle: f32) -> EntityId {
        let id = arena
            .spawn(Behavior::Object, |e| {
                e.position.values.x = x;
                e.position.values.y = y;
                e.position.values.angle = angle;
                Ok(())
            })
            .unwrap();
        arena.reparent(id, parent);
        id
    }

    fn make_team(arena: &mut Arena) -> EntityId {
        let id = make_node(arena, None, 0.0, 0.0, 0.0);
        arena.get_mut(id).unwrap().relations.values.team = Some(id);
        id
    }

    fn close(a: [f32; 2], b: [f32; 2]) -> bool {
        (a[0] - b[0]).abs() < 1e-4 && (a[1] - b[1]).abs() < 1e-4
    }

    // ============================================================
    // Transforms
    // ============================================================

    #[test]
    fn test_child_offset_rotates_with_parent() {
        let mut arena = make_arena();
        let parent = make_node(&mut arena, None, 100.0, 50.0, FRAC_PI_2);
        let child = make_node(&mut arena, Some(parent), 10.0, 0.0, 0.5);

        let (pos, angle) = arena.world_transform(child).unwrap();
        assert!(close(pos, [100.0, 60.0]), "{:?}", pos);
        assert!((angle - (FRAC_PI_2 + 0.5)).abs() < 1e-5);
    }

    #[test]
    fn test_absolute_flags_skip_composition() {
        let mut arena = make_arena();
        let parent = make_node(&mut arena, None, 100.0, 50.0, 1.0);
        let child = make_node(&mut arena, Some(parent), 3.0, 4.0, 0.25);
        arena.get_mut(child).unwrap().position.values.flags =
            PositionFlags::ABSOLUTE_ROTATION | PositionFlags::ABSOLUTE_POSITION;

        let (pos, angle) = arena.world_transform(child).unwrap();
        assert!(close(pos, [3.0, 4.0]));
        assert_eq!(angle, 0.25);
    }

    #[test]
    fn test_grandchild_composes_through_chain() {
        let mut arena = make_arena();
        let a = make_node(&mut arena, None, 0.0, 0.0, FRAC_PI_2);
        let b = make_node(&mut arena, Some(a), 10.0, 0.0, FRAC_PI_2);
        let c = make_node(&mut arena, Some(b), 10.0, 0.0, 0.0);
        // b sits at (0, 10) facing π; c is 10 further along π
        assert!(close(arena.world_position(c).unwrap(), [-10.0, 10.0]));
        assert_eq!(arena.root_parent(c), a);
    }

    // ============================================================
    // Reparenting
    // ============================================================

    #[test]
    fn test_reparent_propagates_team_to_subtree_in_one_tick() {
        let mut arena = make_arena();
        let team_a = make_team(&mut arena);
        let team_b = make_team(&mut arena);
        let c = make_node(&mut arena, Some(team_a), 0.0, 0.0, 0.0);
        let d = make_node(&mut arena, Some(c), 0.0, 0.0, 0.0);
        let e = make_node(&mut arena, Some(d), 0.0, 0.0, 0.0);
        arena.run_tick(&[], &mut NullSerializer);
        assert_eq!(arena.get(e).unwrap().relations.values.team, Some(team_a));

        arena.reparent(c, Some(team_b));
        let mut out: Vec<TickDelta> = Vec::new();
        arena.run_tick(&[], &mut out);

        for id in [c, d, e] {
            assert_eq!(arena.get(id).unwrap().relations.values.team, Some(team_b));
            let update = out[0].entity(id).unwrap();
            assert!(update.fields.iter().any(|f| f.group == GroupId::Relations && f.field == 2));
        }
    }

    #[test]
    fn test_self_parent_goes_to_root() {
        let mut arena = make_arena();
        let a = make_node(&mut arena, None, 0.0, 0.0, 0.0);
        arena.reparent(a, Some(a));
        assert_eq!(arena.get(a).unwrap().relations.values.parent, None);
    }

    #[test]
    fn test_cyclic_parent_goes_to_root() {
        let mut arena = make_arena();
        let a = make_node(&mut arena, None, 0.0, 0.0, 0.0);
        let b = make_node(&mut arena, Some(a), 0.0, 0.0, 0.0);
        arena.reparent(a, Some(b));
        assert_eq!(arena.get(a).unwrap().relations.values.parent, None);
        assert_eq!(arena.get(b).unwrap().relations.values.parent, Some(a));
    }

    #[test]
    fn test_removed_parent_goes_to_root() {
        let mut arena = Arena::new(ArenaConfig { deletion_ticks: 0, ..Default::default() });
        let a = make_node(&mut arena, None, 0.0, 0.0, 0.0);
        let b = make_node(&mut arena, None, 0.0, 0.0, 0.0);
        arena.run_tick(&[], &mut NullSerializer);
        arena.destroy(a);
        arena.run_tick(&[], &mut NullSerializer);

        arena.reparent(b, Some(a));
        assert_eq!(arena.get(b).unwrap().relations.values.parent, None);
    }

    #[test]
    fn test_raw_cycle_is_cut_by_refresh() {
        let mut arena = make_arena();
        let a = make_node(&mut arena, None, 0.0, 0.0, 0.0);
        let b = make_node(&mut arena, Some(a), 0.0, 0.0, 0.0);
        arena.get_mut(a).unwrap().relations.values.parent = Some(b);
        arena.run_tick(&[], &mut NullSerializer);

        let pa = arena.get(a).unwrap().relations.values.parent;
        let pb = arena.get(b).unwrap().relations.values.parent;
        assert!(pa.is_none() || pb.is_none());
    }

    // ============================================================
    // Orphans
    // ============================================================

    #[test]
    fn test_orphans_reparented_on_parent_removal_tick() {
        let mut arena = make_arena();
        let parent = make_node(&mut arena, None, 100.0, 0.0, FRAC_PI_2);
        let child = make_node(&mut arena, Some(parent), 10.0, 0.0, 0.0);
        arena.run_tick(&[], &mut NullSerializer);

        arena.destroy(parent);
        arena.run_tick(&[], &mut NullSerializer);
        arena.run_tick(&[], &mut NullSerializer);
        assert!(arena.contains(parent));
        assert_eq!(arena.get(child).unwrap().relations.values.parent, Some(parent));

        // removal tick
        arena.run_tick(&[], &mut NullSerializer);
        assert!(!arena.contains(parent));
        let c = arena.get(child).unwrap();
        assert_eq!(c.relations.values.parent, None);
        assert!(c.is_live());
        assert!(close(c.local_position(), [100.0, 10.0]));
        assert!(c.relations.is_dirty(0));
    }

    #[test]
    fn test_die_with_parent_children_are_destroyed_transitively() {
        let mut arena = make_arena();
        let parent = make_node(&mut arena, None, 0.0, 0.0, 0.0);
        let child = make_node(&mut arena, Some(parent), 0.0, 0.0, 0.0);
        let grandchild = make_node(&mut arena, Some(child), 0.0, 0.0, 0.0);
        let survivor = make_node(&mut arena, Some(parent), 0.0, 0.0, 0.0);
        for id in [child, grandchild] {
            arena.get_mut(id).unwrap().orphan_policy = OrphanPolicy::DieWithParent;
        }
        arena.run_tick(&[], &mut NullSerializer);

        arena.destroy(parent);
        assert!(arena.get(child).unwrap().is_dying());
        assert!(arena.get(grandchild).unwrap().is_dying());
        assert!(arena.get(survivor).unwrap().is_live());

        for _ in 0..3 {
            arena.run_tick(&[], &mut NullSerializer);
        }
        assert!(!arena.contains(child));
        assert!(!arena.contains(grandchild));
        assert_eq!(arena.get(survivor).unwrap().relations.values.parent, None);
    }
}

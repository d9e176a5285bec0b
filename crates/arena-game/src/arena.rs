// arena.rs - entity table, identifier recycling and the fixed tick
//
// A tick runs four phases in order:
//   1. tick hooks for every live or dying entity, in creation order
//   2. relation refresh (team propagation down the parent tree)
//   3. flush: drain every entity's dirty set once, hand the delta to the serializer
//   4. advance deletion animations; finished entities are removed here and
//      only here, their identifiers quarantined before reuse

use std::collections::{HashMap, HashSet, VecDeque};
use std::panic::{self, AssertUnwindSafe};

use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{debug, error, trace, warn};

use arena_common::cvar::CvarContext;
use arena_common::shared::MAX_ENTITIES;

use crate::dispatch::{self, Behavior};
use crate::entity::{Entity, EntityId, LifeState, OrphanPolicy};
use crate::error::{SchemaError, SpawnError};
use crate::replication::{Serializer, Viewer};

/// Size growth per tick of the deletion animation.
pub const DELETION_GROWTH: f32 = 1.1;

#[derive(Clone, Debug, PartialEq)]
pub struct ArenaConfig {
    /// Length of the deletion animation.
    pub deletion_ticks: u32,
    /// Ticks a freed identifier stays unusable. At least 1.
    pub id_quarantine: u64,
    pub max_entities: usize,
    pub view_range: f32,
    pub seed: u64,
}

impl Default for ArenaConfig {
    fn default() -> Self {
        Self {
            deletion_ticks: 5,
            id_quarantine: 5,
            max_entities: MAX_ENTITIES,
            view_range: 1800.0,
            seed: 0,
        }
    }
}

impl ArenaConfig {
    pub fn from_cvars(ctx: &CvarContext) -> Self {
        let d = Self::default();
        Self {
            deletion_ticks: ctx.value_or("sv_deletion_ticks", d.deletion_ticks as f32).max(0.0) as u32,
            id_quarantine: (ctx.value_or("sv_id_quarantine", d.id_quarantine as f32) as u64).max(1),
            max_entities: (ctx.value_or("sv_max_entities", d.max_entities as f32) as usize).clamp(1, MAX_ENTITIES),
            view_range: ctx.value_or("sv_view_range", d.view_range),
            seed: ctx.value_or("sv_seed", d.seed as f32) as u64,
        }
    }
}

/// What one call to `run_tick` did.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TickSummary {
    pub tick: u64,
    pub ticked: usize,
    pub faulted: usize,
    pub replicated: usize,
    pub removed: usize,
}

struct Slot {
    generation: u32,
    entity: Option<Entity>,
}

pub struct Arena {
    config: ArenaConfig,
    slots: Vec<Slot>,
    /// Released slot indices with the tick they were freed, oldest first.
    free: VecDeque<(u32, u64)>,
    /// Existing entities in creation order.
    pub(crate) order: Vec<EntityId>,
    next_sequence: u64,
    tick: u64,
    pub(crate) rng: StdRng,
    /// Removed in phase 4, announced in the next flush.
    pub(crate) pending_removals: Vec<EntityId>,
    pub(crate) contacts: Vec<(EntityId, EntityId)>,
    /// Newly dying entities whose children have not been visited yet.
    dying_roots: Vec<(EntityId, u32)>,
    /// Set while phase 1 runs; cascades are then resolved once at its end.
    defer_cascade: bool,
}

impl Arena {
    pub fn new(mut config: ArenaConfig) -> Self {
        config.id_quarantine = config.id_quarantine.max(1);
        config.max_entities = config.max_entities.clamp(1, MAX_ENTITIES);
        let rng = StdRng::seed_from_u64(config.seed);
        Arena {
            config,
            slots: Vec::new(),
            free: VecDeque::new(),
            order: Vec::new(),
            next_sequence: 0,
            tick: 0,
            rng,
            pending_removals: Vec::new(),
            contacts: Vec::new(),
            dying_roots: Vec::new(),
            defer_cascade: false,
        }
    }

    pub fn config(&self) -> &ArenaConfig {
        &self.config
    }

    /// The tick currently running, or the last one completed between ticks.
    #[inline]
    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn rng(&mut self) -> &mut StdRng {
        &mut self.rng
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    // ============================================================
    // Lookup
    // ============================================================

    pub fn get(&self, id: EntityId) -> Option<&Entity> {
        let slot = self.slots.get(id.index() as usize)?;
        if slot.generation != id.generation() {
            return None;
        }
        slot.entity.as_ref()
    }

    pub fn get_mut(&mut self, id: EntityId) -> Option<&mut Entity> {
        let slot = self.slots.get_mut(id.index() as usize)?;
        if slot.generation != id.generation() {
            return None;
        }
        slot.entity.as_mut()
    }

    /// Resolves to an entity that has not been removed.
    pub fn contains(&self, id: EntityId) -> bool {
        self.get(id).is_some()
    }

    pub fn is_live(&self, id: EntityId) -> bool {
        self.get(id).is_some_and(|e| e.is_live())
    }

    /// Existing entities in creation order.
    pub fn entities(&self) -> impl Iterator<Item = &Entity> + '_ {
        self.order.iter().filter_map(move |&id| self.get(id))
    }

    pub fn ids(&self) -> &[EntityId] {
        &self.order
    }

    // ============================================================
    // Identifier allocation
    // ============================================================

    fn allocate(&mut self) -> Result<EntityId, SpawnError> {
        if let Some(&(index, freed_at)) = self.free.front() {
            if self.tick >= freed_at + self.config.id_quarantine {
                self.free.pop_front();
                let generation = self.slots[index as usize].generation;
                return Ok(EntityId::new(index, generation));
            }
        }

        if self.slots.len() < self.config.max_entities {
            let index = self.slots.len() as u32;
            self.slots.push(Slot { generation: 0, entity: None });
            return Ok(EntityId::new(index, 0));
        }

        Err(SpawnError::ArenaFull { max: self.config.max_entities })
    }

    /// Invalidates every handle to `id` and queues the index for reuse.
    fn release(&mut self, id: EntityId) -> Option<Entity> {
        let slot = self.slots.get_mut(id.index() as usize)?;
        if slot.generation != id.generation() {
            return None;
        }
        let entity = slot.entity.take();
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push_back((id.index(), self.tick));
        entity
    }

    // ============================================================
    // Spawn / destroy
    // ============================================================

    /// Constructs an entity. `init` attaches and fills groups before the
    /// entity is ever observed, so its writes may be silent. A failing `init`
    /// aborts construction and releases the identifier.
    ///
    /// Entities spawned between ticks are ticked from the next tick;
    /// entities spawned by a tick hook start ticking on the following one
    /// but are replicated in the tick that created them.
    pub fn spawn<F>(&mut self, behavior: Behavior, init: F) -> Result<EntityId, SpawnError>
    where
        F: FnOnce(&mut Entity) -> Result<(), SchemaError>,
    {
        let id = self.allocate()?;
        let mut entity = Entity::new(id, behavior);
        entity.sequence = self.next_sequence;
        entity.spawn_tick = self.tick;
        entity.deletion_ticks = self.config.deletion_ticks;

        if let Err(err) = init(&mut entity) {
            warn!(entity = %id, kind = ?entity.kind(), "construction aborted: {}", err);
            self.release(id);
            return Err(err.into());
        }

        self.next_sequence += 1;
        self.slots[id.index() as usize].entity = Some(entity);
        self.order.push(id);
        trace!(entity = %id, tick = self.tick, "spawned");
        Ok(id)
    }

    fn promote_constructed(&mut self) {
        for i in 0..self.order.len() {
            let id = self.order[i];
            if let Some(e) = self.get_mut(id) {
                if e.state == LifeState::Constructing {
                    e.state = LifeState::Live;
                }
            }
        }
    }

    /// Starts the deletion animation. Children that die with their parent
    /// follow; the rest are moved to the root when the parent is removed.
    pub fn destroy(&mut self, id: EntityId) {
        let ticks = self.config.deletion_ticks;
        self.begin_dying(id, ticks);
    }

    /// Destroys with no animation; removal happens at the end of this tick.
    pub fn force_destroy(&mut self, id: EntityId) {
        self.begin_dying(id, 0);
    }

    fn begin_dying(&mut self, id: EntityId, ticks: u32) {
        if !self.mark_dying(id, ticks) {
            return;
        }
        self.dying_roots.push((id, ticks));
        if !self.defer_cascade {
            self.cascade_dying();
        }
    }

    /// Returns false when `id` is gone or already ends no later than `ticks`.
    fn mark_dying(&mut self, id: EntityId, ticks: u32) -> bool {
        let Some(e) = self.get_mut(id) else { return false };
        match e.state {
            LifeState::Constructing | LifeState::Live => {
                e.state = LifeState::Dying { ticks_left: ticks };
                e.deletion_ticks = ticks;
            }
            LifeState::Dying { ticks_left } if ticks < ticks_left => {
                e.state = LifeState::Dying { ticks_left: ticks };
            }
            _ => return false,
        }
        debug!(entity = %id, ticks, "dying");
        true
    }

    /// Takes every pending dying root down to its `DieWithParent` children,
    /// with one scan of the table however many roots there are.
    fn cascade_dying(&mut self) {
        if self.dying_roots.is_empty() {
            return;
        }
        let children = self.children_map();
        let mut stack = std::mem::take(&mut self.dying_roots);
        while let Some((id, ticks)) = stack.pop() {
            let Some(list) = children.get(&id) else { continue };
            for &child in list {
                let dies = self.get(child).is_some_and(|c| c.orphan_policy == OrphanPolicy::DieWithParent);
                if dies && self.mark_dying(child, ticks) {
                    stack.push((child, ticks));
                }
            }
        }
    }

    /// Parent to direct children, in creation order.
    pub(crate) fn children_map(&self) -> HashMap<EntityId, Vec<EntityId>> {
        let mut map: HashMap<EntityId, Vec<EntityId>> = HashMap::new();
        for e in self.entities() {
            if let Some(parent) = e.relations.values.parent {
                map.entry(parent).or_default().push(e.id());
            }
        }
        map
    }

    /// Direct children of `id`, in creation order.
    pub fn children_of(&self, id: EntityId) -> Vec<EntityId> {
        self.entities()
            .filter(|e| e.relations.values.parent == Some(id))
            .map(|e| e.id())
            .collect()
    }

    // ============================================================
    // The tick
    // ============================================================

    /// Runs one tick and hands the flushed delta to `serializer`.
    pub fn run_tick(&mut self, viewers: &[Viewer], serializer: &mut dyn Serializer) -> TickSummary {
        self.tick += 1;
        let mut summary = TickSummary { tick: self.tick, ..Default::default() };

        // phase 1
        self.promote_constructed();
        self.defer_cascade = true;
        self.apply_contacts();
        let (ticked, faulted) = self.run_hooks();
        self.defer_cascade = false;
        self.cascade_dying();
        summary.ticked = ticked;
        summary.faulted = faulted;
        self.promote_constructed();

        // phase 2
        self.refresh_relations();

        // phase 3
        let delta = self.flush(viewers);
        summary.replicated = delta.updates.len();
        serializer.serialize(&delta);

        // phase 4
        summary.removed = self.advance_dying();

        trace!(
            tick = summary.tick,
            ticked = summary.ticked,
            replicated = summary.replicated,
            removed = summary.removed,
            "tick complete"
        );
        summary
    }

    fn run_hooks(&mut self) -> (usize, usize) {
        // entities spawned by a hook wait for the next tick
        let ids: Vec<EntityId> = self
            .order
            .iter()
            .copied()
            .filter(|&id| self.get(id).is_some_and(|e| e.state().is_active()))
            .collect();

        let mut faulted = 0;
        for &id in &ids {
            if !self.get(id).is_some_and(|e| e.state().is_active()) {
                continue;
            }
            let result = panic::catch_unwind(AssertUnwindSafe(|| dispatch::run_tick_hook(self, id)));
            if let Err(payload) = result {
                error!(entity = %id, tick = self.tick, "tick hook faulted: {}", panic_message(&payload));
                self.force_destroy(id);
                faulted += 1;
            }
        }
        (ids.len(), faulted)
    }

    /// Phase 4. Returns the number of entities removed.
    fn advance_dying(&mut self) -> usize {
        let mut finished = Vec::new();
        for i in 0..self.order.len() {
            let id = self.order[i];
            let Some(e) = self.get_mut(id) else { continue };
            let LifeState::Dying { ticks_left } = e.state else { continue };
            if ticks_left == 0 {
                finished.push(id);
                continue;
            }

            let left = ticks_left - 1;
            e.state = LifeState::Dying { ticks_left: left };
            let total = e.deletion_ticks.max(1) as f32;
            e.style.set_opacity(left as f32 / total);
            e.physics.set_size(e.physics.values.size * DELETION_GROWTH);
        }
        if finished.is_empty() {
            return 0;
        }

        let mut children = self.children_map();
        for &id in &finished {
            let orphans = children.remove(&id).unwrap_or_default();
            self.remove(id, &orphans);
        }
        let finished_set: HashSet<EntityId> = finished.iter().copied().collect();
        self.order.retain(|id| !finished_set.contains(id));
        finished.len()
    }

    /// The single removal point.
    fn remove(&mut self, id: EntityId, children: &[EntityId]) {
        // orphans go first, while the parent's transform still resolves
        for &child in children {
            if self.get(child).is_some_and(|c| c.relations.values.parent == Some(id)) {
                self.detach_to_root(child);
            }
        }

        let Some(mut entity) = self.release(id) else { return };
        entity.state = LifeState::Removed;
        self.pending_removals.push(id);
        dispatch::on_removed(self, &entity);
        debug!(entity = %id, tick = self.tick, "removed");
    }
}

fn panic_message(payload: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

// ============================================================
// Tests
// ============================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field_group::{FieldValue, GroupId};
    use crate::replication::{NullSerializer, TickDelta};

    fn make_arena() -> Arena {
        Arena::new(ArenaConfig { deletion_ticks: 3, id_quarantine: 1, ..Default::default() })
    }

    fn spawn_object(arena: &mut Arena) -> EntityId {
        arena.spawn(Behavior::Object, |_| Ok(())).unwrap()
    }

    fn step(arena: &mut Arena) -> TickDelta {
        let mut out: Vec<TickDelta> = Vec::new();
        arena.run_tick(&[], &mut out);
        out.pop().unwrap()
    }

    fn set_x_to_five(arena: &mut Arena, id: EntityId) {
        if let Some(e) = arena.get_mut(id) {
            e.position.set_x(5.0);
        }
    }

    fn always_panics(_arena: &mut Arena, _id: EntityId) {
        panic!("hook failure");
    }

    fn destroy_self(arena: &mut Arena, id: EntityId) {
        arena.destroy(id);
    }

    // ============================================================
    // Lifecycle
    // ============================================================

    #[test]
    fn test_spawned_entity_is_constructing_until_tick() {
        let mut arena = make_arena();
        let id = spawn_object(&mut arena);
        assert_eq!(arena.get(id).unwrap().state(), LifeState::Constructing);
        step(&mut arena);
        assert_eq!(arena.get(id).unwrap().state(), LifeState::Live);
    }

    #[test]
    fn test_destroy_runs_animation_then_removes() {
        let mut arena = make_arena();
        let id = spawn_object(&mut arena);
        step(&mut arena);

        arena.destroy(id);
        assert!(arena.get(id).unwrap().is_dying());

        // 3 animation ticks, removed on the 4th
        for _ in 0..3 {
            let delta = step(&mut arena);
            assert!(delta.entity(id).is_some(), "dying entities are still replicated");
        }
        assert!(arena.contains(id));
        step(&mut arena);
        assert!(!arena.contains(id));

        let delta = step(&mut arena);
        assert_eq!(delta.removed, vec![id]);
    }

    #[test]
    fn test_destroy_from_hook_cascades_before_flush() {
        let mut arena = make_arena();
        let parent = arena.spawn(Behavior::Scripted(destroy_self), |_| Ok(())).unwrap();
        let child = arena
            .spawn(Behavior::Object, |e| {
                e.relations.values.parent = Some(parent);
                e.orphan_policy = OrphanPolicy::DieWithParent;
                Ok(())
            })
            .unwrap();

        let delta = step(&mut arena);
        assert!(arena.get(parent).unwrap().is_dying());
        assert!(arena.get(child).unwrap().is_dying());
        assert!(delta.entity(child).unwrap().dying);
    }

    #[test]
    fn test_mass_removal_detaches_every_orphan() {
        let mut arena = Arena::new(ArenaConfig { deletion_ticks: 0, ..Default::default() });
        let mut pairs = Vec::new();
        for i in 0..300 {
            let x = i as f32;
            let parent = arena
                .spawn(Behavior::Object, |e| {
                    e.position.values.x = x;
                    Ok(())
                })
                .unwrap();
            let child = arena
                .spawn(Behavior::Object, |e| {
                    e.relations.values.parent = Some(parent);
                    e.position.values.y = 1.0;
                    Ok(())
                })
                .unwrap();
            pairs.push((parent, child, x));
        }
        step(&mut arena);

        for &(parent, _, _) in &pairs {
            arena.destroy(parent);
        }
        step(&mut arena);
        assert_eq!(arena.len(), 300);
        for &(parent, child, x) in &pairs {
            assert!(!arena.contains(parent));
            let c = arena.get(child).unwrap();
            assert!(c.is_live());
            assert_eq!(c.relations.values.parent, None);
            assert_eq!(c.local_position(), [x, 1.0]);
        }
        assert_eq!(step(&mut arena).removed.len(), 300);
    }

    #[test]
    fn test_deletion_animation_fades_and_grows() {
        let mut arena = make_arena();
        let id = spawn_object(&mut arena);
        arena.get_mut(id).unwrap().physics.values.size = 10.0;
        step(&mut arena);

        arena.destroy(id);
        step(&mut arena);
        let e = arena.get(id).unwrap();
        assert!((e.style.values.opacity - 2.0 / 3.0).abs() < 1e-5);
        assert!((e.physics.values.size - 11.0).abs() < 1e-4);
    }

    #[test]
    fn test_failed_construction_leaves_nothing_behind() {
        let mut arena = make_arena();
        let err = arena
            .spawn(Behavior::Object, |e| e.write_tracked(GroupId::Score, 0, FieldValue::Float(1.0)))
            .unwrap_err();
        assert_eq!(err, SpawnError::Schema(SchemaError::MissingGroup(GroupId::Score)));
        assert!(arena.is_empty());
    }

    #[test]
    fn test_arena_full_is_reported() {
        let mut arena = Arena::new(ArenaConfig { max_entities: 2, ..Default::default() });
        spawn_object(&mut arena);
        spawn_object(&mut arena);
        let err = arena.spawn(Behavior::Object, |_| Ok(())).unwrap_err();
        assert_eq!(err, SpawnError::ArenaFull { max: 2 });
    }

    // ============================================================
    // Identifier reuse
    // ============================================================

    #[test]
    fn test_freed_id_not_reused_in_same_tick() {
        let mut arena = Arena::new(ArenaConfig { deletion_ticks: 0, id_quarantine: 1, max_entities: 1, ..Default::default() });
        let id = spawn_object(&mut arena);
        step(&mut arena);

        arena.destroy(id);
        step(&mut arena);
        let freed_at = arena.tick();
        assert!(!arena.contains(id));

        // still tick T between ticks: the only slot is quarantined
        let err = arena.spawn(Behavior::Object, |_| Ok(())).unwrap_err();
        assert_eq!(err, SpawnError::ArenaFull { max: 1 });

        // at T+1 the slot is reusable, with a new generation
        arena.tick = freed_at + 1;
        let reused = spawn_object(&mut arena);
        assert_eq!(reused.index(), id.index());
        assert_ne!(reused.generation(), id.generation());
        assert!(arena.get(id).is_none(), "stale handle must not alias the new entity");
    }

    #[test]
    fn test_quarantine_holds_for_configured_ticks() {
        let mut arena = Arena::new(ArenaConfig { deletion_ticks: 0, id_quarantine: 3, ..Default::default() });
        let id = spawn_object(&mut arena);
        step(&mut arena);
        arena.destroy(id);
        step(&mut arena);

        // grows instead of reusing the quarantined slot
        let fresh = spawn_object(&mut arena);
        assert_ne!(fresh.index(), id.index());
        step(&mut arena);
        step(&mut arena);
        step(&mut arena);
        let reused = spawn_object(&mut arena);
        assert_eq!(reused.index(), id.index());
    }

    #[test]
    fn test_zero_quarantine_is_clamped() {
        let arena = Arena::new(ArenaConfig { id_quarantine: 0, ..Default::default() });
        assert_eq!(arena.config().id_quarantine, 1);
    }

    // ============================================================
    // Hooks
    // ============================================================

    #[test]
    fn test_hook_writes_are_flushed_same_tick_and_once() {
        let mut arena = make_arena();
        let id = arena.spawn(Behavior::Scripted(set_x_to_five), |_| Ok(())).unwrap();

        let first = step(&mut arena);
        let update = first.entity(id).unwrap();
        assert!(update.created);
        assert!(update.fields.iter().any(|f| f.group == GroupId::Position && f.field == 0));

        // tracked again every tick, so dirty again every tick
        let second = step(&mut arena);
        let update = second.entity(id).unwrap();
        assert!(!update.created);
        assert_eq!(update.fields.len(), 1);
    }

    #[test]
    fn test_faulting_hook_force_destroys_only_that_entity() {
        let mut arena = make_arena();
        let bad = arena.spawn(Behavior::Scripted(always_panics), |_| Ok(())).unwrap();
        let good = arena.spawn(Behavior::Scripted(set_x_to_five), |_| Ok(())).unwrap();

        let mut out: Vec<TickDelta> = Vec::new();
        let summary = arena.run_tick(&[], &mut out);
        assert_eq!(summary.faulted, 1);
        assert_eq!(summary.removed, 1);
        assert!(!arena.contains(bad));
        assert_eq!(arena.get(good).unwrap().position.values.x, 5.0);
    }

    #[test]
    fn test_summary_counts_ticked_entities() {
        let mut arena = make_arena();
        spawn_object(&mut arena);
        spawn_object(&mut arena);
        let summary = arena.run_tick(&[], &mut NullSerializer);
        assert_eq!(summary.tick, 1);
        assert_eq!(summary.ticked, 2);
        assert_eq!(summary.replicated, 2);
    }

    #[test]
    fn test_config_from_cvars_reads_overrides() {
        use arena_common::cvar::CvarFlags;
        let mut ctx = CvarContext::new();
        ctx.get("sv_deletion_ticks", "9", CvarFlags::empty());
        ctx.get("sv_id_quarantine", "0", CvarFlags::empty());
        let config = ArenaConfig::from_cvars(&ctx);
        assert_eq!(config.deletion_ticks, 9);
        assert_eq!(config.id_quarantine, 1);
        assert_eq!(config.view_range, 1800.0);
    }
}

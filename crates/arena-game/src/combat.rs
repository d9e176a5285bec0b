// combat.rs - collision body export, contact resolution and kill credit
//
// The broad-phase lives outside the arena: it reads `collision_bodies()`,
// finds overlapping pairs and hands them back through `queue_contacts()`.
// Queued pairs are resolved at the start of the next tick.

use tracing::debug;

use arena_common::shared::{angle_between, Vec2};

use crate::arena::Arena;
use crate::entity::{Entity, EntityId};
use crate::groups::PhysicsFlags;

/// Score chains longer than this are assumed to be broken.
const MAX_CREDIT_DEPTH: usize = 16;

/// An entity's team, or the entity itself when it has none.
#[inline]
pub fn team_of(e: &Entity) -> EntityId {
    e.relations.values.team.unwrap_or(e.id())
}

/// Bounding data the broad-phase needs for one body.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CollisionBody {
    pub id: EntityId,
    pub position: Vec2,
    pub size: f32,
    pub width: f32,
    pub sides: i32,
    pub team: EntityId,
    pub owner: Option<EntityId>,
    pub flags: PhysicsFlags,
}

/// Per-side values read before a contact is applied.
#[derive(Clone, Copy)]
struct Contactant {
    id: EntityId,
    position: Vec2,
    team: EntityId,
    owner: Option<EntityId>,
    flags: PhysicsFlags,
    push_factor: f32,
    absorption_factor: f32,
    damage: f32,
    has_health: bool,
}

impl Arena {
    /// Every live entity that can take damage. Dying entities never collide.
    pub fn collision_bodies(&self) -> Vec<CollisionBody> {
        self.entities()
            .filter(|e| e.is_live() && e.health.is_some())
            .filter_map(|e| {
                Some(CollisionBody {
                    id: e.id(),
                    position: self.world_position(e.id())?,
                    size: e.physics.values.size,
                    width: e.physics.values.width,
                    sides: e.physics.values.sides,
                    team: team_of(e),
                    owner: e.relations.values.owner,
                    flags: e.physics.values.flags,
                })
            })
            .collect()
    }

    /// Queues contact pairs found by the broad-phase for the next tick.
    pub fn queue_contacts<I>(&mut self, pairs: I)
    where
        I: IntoIterator<Item = (EntityId, EntityId)>,
    {
        self.contacts.extend(pairs);
    }

    fn contactant(&self, id: EntityId) -> Option<Contactant> {
        let e = self.get(id)?;
        if !e.is_live() {
            return None;
        }
        Some(Contactant {
            id,
            position: self.world_position(id)?,
            team: team_of(e),
            owner: e.relations.values.owner,
            flags: e.physics.values.flags,
            push_factor: e.physics.values.push_factor,
            absorption_factor: e.physics.values.absorption_factor,
            damage: e.damage,
            has_health: e.health.is_some(),
        })
    }

    /// Resolves queued contacts: push apart, then trade damage across
    /// teams. Returns the number of pairs applied.
    pub(crate) fn apply_contacts(&mut self) -> usize {
        let pairs = std::mem::take(&mut self.contacts);
        let mut applied = 0;

        for (a, b) in pairs {
            if a == b {
                continue;
            }
            // either side may have died earlier this pass
            let (Some(a), Some(b)) = (self.contactant(a), self.contactant(b)) else { continue };
            if !collides(&a, &b) {
                continue;
            }
            applied += 1;

            let angle = angle_between(&b.position, &a.position);
            if let Some(e) = self.get_mut(a.id) {
                e.add_acceleration(angle, b.push_factor * a.absorption_factor);
            }
            if let Some(e) = self.get_mut(b.id) {
                e.add_acceleration(angle + std::f32::consts::PI, a.push_factor * b.absorption_factor);
            }

            if a.team == b.team || !a.has_health || !b.has_health {
                continue;
            }
            let a_dead = self.take_damage(a.id, b.damage);
            let b_dead = self.take_damage(b.id, a.damage);
            if a_dead {
                self.kill(a.id, b.id);
            }
            if b_dead {
                self.kill(b.id, a.id);
            }
        }
        applied
    }

    /// Returns true when the hit drops health to zero.
    fn take_damage(&mut self, id: EntityId, amount: f32) -> bool {
        let Some(h) = self.get_mut(id).and_then(|e| e.health.as_mut()) else { return false };
        if amount <= 0.0 {
            return false;
        }
        let left = (h.values.health - amount).max(0.0);
        h.set_health(left);
        left <= 0.0
    }

    fn kill(&mut self, victim: EntityId, killer: EntityId) {
        let Some(v) = self.get(victim) else { return };
        let reward = v.score_reward + v.score.as_ref().map_or(0.0, |s| s.values.score);
        self.destroy(victim);
        let credited = self.credit_kill(killer, reward);
        debug!(%victim, %killer, ?credited, reward, "kill");
    }

    /// Walks the owner chain from `killer` to the first entity with a score
    /// and adds `reward` to it.
    pub fn credit_kill(&mut self, killer: EntityId, reward: f32) -> Option<EntityId> {
        let mut cursor = killer;
        for _ in 0..MAX_CREDIT_DEPTH {
            let e = self.get(cursor)?;
            if e.score.is_some() {
                let s = self.get_mut(cursor)?.score.as_mut()?;
                s.set_score(s.values.score + reward);
                return Some(cursor);
            }
            match e.relations.values.owner {
                Some(owner) if owner != cursor => cursor = owner,
                _ => return None,
            }
        }
        None
    }
}

fn collides(a: &Contactant, b: &Contactant) -> bool {
    let no_own_team = (a.flags | b.flags).contains(PhysicsFlags::NO_OWN_TEAM_COLLISION);
    if no_own_team && a.team == b.team {
        return false;
    }
    let same_owner_only = (a.flags | b.flags).contains(PhysicsFlags::ONLY_SAME_OWNER_COLLISION);
    if same_owner_only && a.owner != b.owner {
        return false;
    }
    true
}

// ============================================================
// Tests
// ============================================================

// shoot_cycle.rs - reload/fire timer shared by every weapon-like entity

/// Per-tick inputs to the fire decision.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FirePolicy {
    /// The controller is asking to fire.
    pub attempting: bool,
    /// Continuous spawners fire without being asked.
    pub always_fire: bool,
    /// A capped kind already has its maximum live count.
    pub at_capacity: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CycleOutcome {
    Charging,
    /// Loaded but not allowed to fire; progress pinned at the reload boundary.
    Held,
    Fired,
}

/// Reload progress measured in ticks.
///
/// Progress never exceeds `reload * (1 + delay)` after a tick. A shot
/// resets it to `reload * delay`, so with a loaded cycle under constant fire
/// shots land every `reload` ticks, the delay acting as a phase offset.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ShootCycle {
    pos: f32,
    reload_time: f32,
}

impl ShootCycle {
    /// A cycle that is already loaded.
    pub fn new(reload_time: f32) -> Self {
        Self { pos: reload_time, reload_time }
    }

    /// A cycle that has to charge from zero.
    pub fn empty(reload_time: f32) -> Self {
        Self { pos: 0.0, reload_time }
    }

    pub fn progress(&self) -> f32 {
        self.pos
    }

    pub fn reload_time(&self) -> f32 {
        self.reload_time
    }

    /// Scales progress so the fraction reloaded is preserved across a
    /// reload-time change.
    pub fn rescale(&mut self, reload_time: f32) {
        if reload_time == self.reload_time {
            return;
        }
        if self.reload_time > 0.0 {
            self.pos *= reload_time / self.reload_time;
        } else {
            self.pos = reload_time;
        }
        self.reload_time = reload_time;
    }

    /// Advances one tick. `reload_time` is re-derived by the caller every
    /// tick from the current stats; `fire` runs at most once.
    pub fn tick<F: FnOnce()>(&mut self, reload_time: f32, delay: f32, policy: FirePolicy, fire: F) -> CycleOutcome {
        self.rescale(reload_time);
        self.pos += 1.0;

        if self.pos >= reload_time {
            if (!policy.attempting && !policy.always_fire) || policy.at_capacity {
                self.pos = reload_time;
                return CycleOutcome::Held;
            }
        }

        if self.pos >= reload_time * (1.0 + delay) {
            fire();
            self.pos = reload_time * delay;
            return CycleOutcome::Fired;
        }

        CycleOutcome::Charging
    }
}

// ============================================================
// Tests
// ============================================================

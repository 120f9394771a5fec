//! # Tick-Indexed Buffer
//!
//! Fixed-capacity ring keyed by tick: tick `t` lives in slot `t mod C`.
//!
//! ```text
//!   min_tick = 102, capacity = 4
//!
//!   slot:   [0]    [1]    [2]    [3]
//!   tick:   104    101    102    103
//!            │      │      │      │
//!            ok   evicted  ok     ok
//! ```
//!
//! Reads and writes below `min_tick` are misses, never errors: late or
//! duplicated unreliable packets land here all the time. `min_tick` only
//! moves forward.

use tidenet_shared::Tick;

#[derive(Clone, Debug)]
struct Slot<T> {
    tick: Tick,
    value: T,
}

/// Ring buffer of at most one payload per tick.
#[derive(Clone, Debug)]
pub struct TickBuffer<T> {
    slots: Vec<Option<Slot<T>>>,
    min_tick: Tick,
}

impl<T> TickBuffer<T> {
    /// Creates a buffer with `capacity` slots (at least one).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);
        Self { slots, min_tick: 0 }
    }

    /// Number of slots.
    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Oldest tick still accepted.
    #[inline]
    #[must_use]
    pub const fn min_tick(&self) -> Tick {
        self.min_tick
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap, clippy::cast_sign_loss)]
    fn index(&self, tick: Tick) -> usize {
        tick.rem_euclid(self.slots.len() as Tick) as usize
    }

    /// Stores `value` for `tick`.
    ///
    /// Returns `false` when the tick is below `min_tick` or when its slot
    /// still holds a live tick: the same one, or one a whole ring apart.
    /// Only payloads below `min_tick` are ever overwritten.
    pub fn try_add(&mut self, tick: Tick, value: T) -> bool {
        if tick < self.min_tick {
            return false;
        }
        let index = self.index(tick);
        match &self.slots[index] {
            Some(slot) if slot.tick >= self.min_tick => false,
            _ => {
                self.slots[index] = Some(Slot { tick, value });
                true
            }
        }
    }

    /// Stores `value` for `tick`, overwriting whatever the slot holds.
    ///
    /// Only ticks below `min_tick` are refused.
    pub fn add_or_replace(&mut self, tick: Tick, value: T) -> bool {
        if tick < self.min_tick {
            return false;
        }
        let index = self.index(tick);
        self.slots[index] = Some(Slot { tick, value });
        true
    }

    /// Payload stored for `tick`, if it is still live.
    #[must_use]
    pub fn try_get(&self, tick: Tick) -> Option<&T> {
        if tick < self.min_tick {
            return None;
        }
        match &self.slots[self.index(tick)] {
            Some(slot) if slot.tick == tick => Some(&slot.value),
            _ => None,
        }
    }

    /// Raises `min_tick` and drops payloads that fell below it. Lower values
    /// are ignored.
    pub fn update_min_tick(&mut self, new_min: Tick) {
        if new_min <= self.min_tick {
            return;
        }
        self.min_tick = new_min;
        for slot in &mut self.slots {
            if slot.as_ref().is_some_and(|s| s.tick < new_min) {
                *slot = None;
            }
        }
    }

    /// Number of live payloads.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.iter().flatten().count()
    }

    /// True if nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

//! # Input Ingress
//!
//! The only state shared between the server's network callbacks and its
//! tick loop: one tick buffer per player.
//!
//! ```text
//!   network threads                      tick loop
//!   ───────────────                      ─────────
//!   on_unreliable_input ──┐
//!   on_reliable_input  ───┼──► RwLock<map> ──► Mutex<TickBuffer> ──► take(tick)
//!   local bots / humans ──┘                                     └─► update_min_tick
//! ```
//!
//! The map is only written when the roster changes; per-tick traffic takes
//! the read lock plus one player's buffer lock.

use crate::error::{NetError, NetResult};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tidenet_core::{decode_input_package, Input, TickBuffer};
use tidenet_shared::{PlayerId, Tick};

#[derive(Default)]
struct Inner {
    buffers: RwLock<BTreeMap<PlayerId, Mutex<TickBuffer<Input>>>>,
    users: RwLock<HashMap<String, PlayerId>>,
}

/// Cloneable handle to the per-player input buffers.
#[derive(Clone, Default)]
pub struct InputIngress {
    inner: Arc<Inner>,
    capacity: usize,
}

impl InputIngress {
    /// Ingress whose buffers hold `capacity` ticks each.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::default(),
            capacity,
        }
    }

    /// Ticks each buffer holds.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Creates an empty buffer for `player` owned by `user_id`.
    pub fn register(&self, user_id: &str, player: PlayerId) {
        self.inner.users.write().insert(user_id.to_owned(), player);
        self.inner
            .buffers
            .write()
            .insert(player, Mutex::new(TickBuffer::new(self.capacity)));
    }

    /// Drops `player`'s buffer; later input for it is refused.
    pub fn unregister(&self, player: PlayerId) {
        self.inner.buffers.write().remove(&player);
        self.inner.users.write().retain(|_, p| *p != player);
    }

    /// Players with a buffer, ascending.
    #[must_use]
    pub fn players(&self) -> Vec<PlayerId> {
        self.inner.buffers.read().keys().copied().collect()
    }

    /// Player seated for `user_id`.
    #[must_use]
    pub fn player_of(&self, user_id: &str) -> Option<PlayerId> {
        self.inner.users.read().get(user_id).copied()
    }

    fn resolve(&self, user_id: &str) -> NetResult<PlayerId> {
        self.player_of(user_id).ok_or_else(|| {
            tracing::warn!(user_id, "input from unknown user dropped");
            NetError::UnknownUser(user_id.to_owned())
        })
    }

    /// Stores one input for `player`. The player id inside the input is
    /// overwritten with `player`. Returns false for late or duplicate input.
    ///
    /// # Errors
    ///
    /// `UnknownPlayer` if `player` has no buffer.
    pub fn add_input(&self, player: PlayerId, mut input: Input) -> NetResult<bool> {
        input.player = player;
        let buffers = self.inner.buffers.read();
        let Some(buffer) = buffers.get(&player) else {
            tracing::warn!(%player, "input buffer not found");
            return Err(NetError::UnknownPlayer(player.0));
        };
        let tick = input.tick;
        let accepted = buffer.lock().try_add(tick, input);
        if !accepted {
            tracing::trace!(%player, tick, "late or duplicate input ignored");
        }
        Ok(accepted)
    }

    /// Network callback for one input sent reliably by `user_id`.
    ///
    /// # Errors
    ///
    /// `UnknownUser`, `UnknownPlayer`, or `Sync` for a malformed payload.
    pub fn on_reliable_input(&self, user_id: &str, payload: &[u8]) -> NetResult<bool> {
        let player = self.resolve(user_id)?;
        let input = Input::decode(payload).map_err(|err| {
            tracing::error!(user_id, %err, "malformed reliable input");
            NetError::from(err)
        })?;
        self.add_input(player, input)
    }

    /// Network callback for an input package sent unreliably by `user_id`.
    /// Returns how many inputs were accepted.
    ///
    /// # Errors
    ///
    /// `UnknownUser`, `UnknownPlayer`, or `Sync` for a malformed package.
    pub fn on_unreliable_input(&self, user_id: &str, package: &[u8]) -> NetResult<usize> {
        let player = self.resolve(user_id)?;
        let inputs = decode_input_package(package).map_err(|err| {
            tracing::error!(user_id, %err, "malformed input package");
            NetError::from(err)
        })?;
        let mut accepted = 0;
        for input in inputs {
            if self.add_input(player, input)? {
                accepted += 1;
            }
        }
        Ok(accepted)
    }

    /// Input of `player` for `tick`, if it arrived in time.
    #[must_use]
    pub fn input_for(&self, player: PlayerId, tick: Tick) -> Option<Input> {
        let buffers = self.inner.buffers.read();
        let buffer = buffers.get(&player)?;
        let input = buffer.lock().try_get(tick).cloned();
        input
    }

    /// Every buffered input for `tick`, in player order.
    #[must_use]
    pub fn inputs_for(&self, tick: Tick) -> Vec<Input> {
        self.inner
            .buffers
            .read()
            .values()
            .filter_map(|buffer| buffer.lock().try_get(tick).cloned())
            .collect()
    }

    /// Evicts everything below `tick` from every buffer.
    pub fn update_min_tick(&self, tick: Tick) {
        for buffer in self.inner.buffers.read().values() {
            buffer.lock().update_min_tick(tick);
        }
    }
}

impl std::fmt::Debug for InputIngress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InputIngress")
            .field("capacity", &self.capacity)
            .field("players", &self.players())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tidenet_core::InputPackager;

    fn input(tick: Tick, player: PlayerId) -> Input {
        Input {
            tick,
            player,
            entries: vec![(1, vec![tick as u8])],
        }
    }

    #[test]
    fn test_unknown_user_dropped() {
        let ingress = InputIngress::new(17);
        ingress.register("alice", PlayerId(0));
        let package = InputPackager::new(4).push(&input(3, PlayerId(0)));
        assert_eq!(
            ingress.on_unreliable_input("mallory", &package),
            Err(NetError::UnknownUser("mallory".into()))
        );
        assert!(ingress.inputs_for(3).is_empty());
    }

    #[test]
    fn test_player_id_comes_from_seat() {
        let ingress = InputIngress::new(17);
        ingress.register("alice", PlayerId(0));
        let spoofed = input(5, PlayerId(1)).encode();
        assert_eq!(ingress.on_reliable_input("alice", &spoofed), Ok(true));
        assert_eq!(ingress.input_for(PlayerId(0), 5).unwrap().player, PlayerId(0));
        assert!(ingress.input_for(PlayerId(1), 5).is_none());
    }

    #[test]
    fn test_malformed_package_reported() {
        let ingress = InputIngress::new(17);
        ingress.register("alice", PlayerId(0));
        assert!(matches!(
            ingress.on_unreliable_input("alice", &[9, 9]),
            Err(NetError::Sync(_))
        ));
    }

    #[test]
    fn test_unregister_refuses_input() {
        let ingress = InputIngress::new(8);
        ingress.register("bob", PlayerId(1));
        ingress.unregister(PlayerId(1));
        assert_eq!(ingress.players(), Vec::<PlayerId>::new());
        assert!(ingress.player_of("bob").is_none());
        assert_eq!(
            ingress.add_input(PlayerId(1), input(0, PlayerId(1))),
            Err(NetError::UnknownPlayer(1))
        );
    }

    #[test]
    fn test_concurrent_producers() {
        let ingress = InputIngress::new(64);
        for p in 0..4 {
            ingress.register(&format!("user{p}"), PlayerId(p));
        }
        let handles: Vec<_> = (0..4)
            .map(|p| {
                let ingress = ingress.clone();
                std::thread::spawn(move || {
                    let mut packager = InputPackager::new(17);
                    for tick in 0..40 {
                        let package = packager.push(&input(tick, PlayerId(p)));
                        ingress.on_unreliable_input(&format!("user{p}"), &package).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        for tick in 0..40 {
            assert_eq!(ingress.inputs_for(tick).len(), 4);
        }
    }
}

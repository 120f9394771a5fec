//! # Entity Registry
//!
//! Owns every networked entity of one simulation role and indexes them by
//! network id. The registry is built for a single player: the server uses
//! [`PlayerId::WORLD`], a client its own id.
//!
//! ## Views
//!
//! ```text
//!   all            every entity visible to the owner
//!   with_input     entities that declare an input handler
//!   predictable    entities the owner may simulate ahead of the server
//!   unpredictable  entities the owner only mirrors from snapshots
//! ```
//!
//! Views are maintained on `add`/`remove`, never per tick. Entities the
//! owner cannot see are not registered at all.

use crate::entity::{self, NetworkId, NetworkedEntity, PlayerContext};
use crate::error::{SyncError, SyncResult};
use crate::stream::StateWriter;
use crate::wire::{Input, Snapshot};
use std::collections::{BTreeMap, BTreeSet};
use tidenet_shared::{PlayerId, PlayersMask};

/// Which half of a snapshot to apply.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Predictability {
    /// Only entities the owner predicts.
    Predictable,
    /// Only entities the owner mirrors.
    Unpredictable,
    /// Everything.
    Both,
}

/// Who receives and who predicts an entity.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EntityOptions {
    /// Players that receive the entity's state.
    pub visible_to: PlayersMask,
    /// Players allowed to predict the entity.
    pub predictable_to: PlayersMask,
}

impl Default for EntityOptions {
    fn default() -> Self {
        Self {
            visible_to: PlayersMask::ALL,
            predictable_to: PlayersMask::ALL,
        }
    }
}

impl EntityOptions {
    /// Restricts visibility.
    #[must_use]
    pub const fn visible_to(mut self, mask: PlayersMask) -> Self {
        self.visible_to = mask;
        self
    }

    /// Restricts predictability.
    #[must_use]
    pub const fn predictable_to(mut self, mask: PlayersMask) -> Self {
        self.predictable_to = mask;
        self
    }
}

struct Record {
    options: EntityOptions,
    has_state: bool,
    entity: Box<dyn NetworkedEntity>,
}

/// Networked entities of one simulation role.
pub struct EntityRegistry {
    owner: PlayerId,
    entities: BTreeMap<NetworkId, Record>,
    update_order: Vec<NetworkId>,
    with_input: BTreeSet<NetworkId>,
    predictable: BTreeSet<NetworkId>,
    unpredictable: BTreeSet<NetworkId>,
    writer: StateWriter,
}

impl EntityRegistry {
    /// Empty registry seen through `owner`'s eyes.
    #[must_use]
    pub fn new(owner: PlayerId) -> Self {
        Self {
            owner,
            entities: BTreeMap::new(),
            update_order: Vec::new(),
            with_input: BTreeSet::new(),
            predictable: BTreeSet::new(),
            unpredictable: BTreeSet::new(),
            writer: StateWriter::with_capacity(256),
        }
    }

    /// Player the views are computed for.
    #[must_use]
    pub const fn owner(&self) -> PlayerId {
        self.owner
    }

    /// Number of registered entities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// True if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// True if `id` is registered.
    #[must_use]
    pub fn contains(&self, id: NetworkId) -> bool {
        self.entities.contains_key(&id)
    }

    /// True if `id` is registered and predictable to the owner.
    #[must_use]
    pub fn is_predictable(&self, id: NetworkId) -> bool {
        self.predictable.contains(&id)
    }

    /// Registered ids in ascending order.
    pub fn ids(&self) -> impl Iterator<Item = NetworkId> + '_ {
        self.entities.keys().copied()
    }

    /// Entity `id`, if registered.
    #[must_use]
    pub fn get(&self, id: NetworkId) -> Option<&dyn NetworkedEntity> {
        self.entities.get(&id).map(|r| r.entity.as_ref())
    }

    /// Entity `id`, mutable.
    pub fn get_mut(&mut self, id: NetworkId) -> Option<&mut (dyn NetworkedEntity + 'static)> {
        self.entities.get_mut(&id).map(|r| r.entity.as_mut())
    }

    /// Registers `entity` under `id`.
    ///
    /// Returns `Ok(false)` when the owner cannot see the entity; it is then
    /// dropped without being initialized.
    ///
    /// # Errors
    ///
    /// `InvalidEntityId` for negative ids, `DuplicateEntityId` when the id is
    /// taken. Both are logged and leave the registry unchanged.
    pub fn add(
        &mut self,
        id: NetworkId,
        options: EntityOptions,
        mut entity: Box<dyn NetworkedEntity>,
    ) -> SyncResult<bool> {
        if id < 0 {
            tracing::error!(id, type_name = entity.type_name(), "invalid network id");
            return Err(SyncError::InvalidEntityId(id));
        }
        if self.entities.contains_key(&id) {
            tracing::error!(id, type_name = entity.type_name(), "duplicate network id");
            return Err(SyncError::DuplicateEntityId(id));
        }
        if !options.visible_to.contains(self.owner) {
            tracing::trace!(id, owner = %self.owner, "entity not visible to owner, skipped");
            return Ok(false);
        }

        entity.initialize();

        if entity.has_input() {
            self.with_input.insert(id);
        }
        if options.predictable_to.contains(self.owner) {
            self.predictable.insert(id);
        } else {
            self.unpredictable.insert(id);
        }
        let has_state = entity::has_state(entity.as_ref());
        self.update_order.push(id);
        self.entities.insert(
            id,
            Record {
                options,
                has_state,
                entity,
            },
        );
        Ok(true)
    }

    /// Unregisters `id` and hands the entity back.
    pub fn remove(&mut self, id: NetworkId) -> Option<Box<dyn NetworkedEntity>> {
        let record = self.entities.remove(&id)?;
        self.update_order.retain(|other| *other != id);
        self.with_input.remove(&id);
        self.predictable.remove(&id);
        self.unpredictable.remove(&id);
        Some(record.entity)
    }

    fn encode(&mut self, id: NetworkId) -> Option<Vec<u8>> {
        let record = self.entities.get_mut(&id)?;
        if !record.has_state {
            return None;
        }
        self.writer.reset();
        entity::write_state(record.entity.as_mut(), &mut self.writer);
        Some(self.writer.as_slice().to_vec())
    }

    /// Snapshot of every stateful entity, or only those visible to
    /// `recipient`. The tick is left at zero for the caller to stamp.
    pub fn get_snapshot(&mut self, recipient: Option<PlayerId>) -> Snapshot {
        let ids: Vec<NetworkId> = self
            .entities
            .iter()
            .filter(|(_, r)| recipient.map_or(true, |p| r.options.visible_to.contains(p)))
            .map(|(id, _)| *id)
            .collect();
        let mut snapshot = Snapshot::new(0);
        for id in ids {
            if let Some(bytes) = self.encode(id) {
                snapshot.entries.push((id, bytes));
            }
        }
        snapshot
    }

    /// One snapshot per recipient, each filtered by visibility. Every entity
    /// is encoded once.
    pub fn get_snapshots(&mut self, recipients: &[PlayerId]) -> BTreeMap<PlayerId, Snapshot> {
        let mut out: BTreeMap<PlayerId, Snapshot> = recipients
            .iter()
            .map(|p| (*p, Snapshot::new(0)))
            .collect();
        let ids: Vec<NetworkId> = self.entities.keys().copied().collect();
        for id in ids {
            let Some(bytes) = self.encode(id) else {
                continue;
            };
            let visible_to = self.entities[&id].options.visible_to;
            for (player, snapshot) in &mut out {
                if visible_to.contains(*player) {
                    snapshot.entries.push((id, bytes.clone()));
                }
            }
        }
        out
    }

    fn in_view(&self, id: NetworkId, filter: Predictability) -> bool {
        match filter {
            Predictability::Predictable => self.predictable.contains(&id),
            Predictability::Unpredictable => self.unpredictable.contains(&id),
            Predictability::Both => self.entities.contains_key(&id),
        }
    }

    /// Decodes the entries of `snapshot` that fall in `filter` into their
    /// entities. Unknown ids are skipped.
    ///
    /// # Errors
    ///
    /// A malformed entry is logged, the remaining entries are still applied,
    /// and the first error is returned.
    pub fn apply_snapshot(&mut self, snapshot: &Snapshot, filter: Predictability) -> SyncResult<()> {
        let mut first_error = None;
        for (id, bytes) in &snapshot.entries {
            if !self.in_view(*id, filter) {
                continue;
            }
            let Some(record) = self.entities.get_mut(id) else {
                continue;
            };
            if let Err(err) = entity::read_state(record.entity.as_mut(), bytes) {
                tracing::error!(id, tick = snapshot.tick, %err, "failed to apply entity state");
                first_error.get_or_insert(err);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Feeds every entry of `input` to its entity's input handler. Entries
    /// for unknown entities or entities without input are ignored.
    ///
    /// # Errors
    ///
    /// `ReadTooMuch`/`ReadNotEnough` when a handler consumed the wrong
    /// number of bytes. Other entries are still applied; the first error is
    /// returned.
    pub fn apply_input(&mut self, input: &Input) -> SyncResult<()> {
        let mut first_error = None;
        for (id, bytes) in &input.entries {
            if !self.with_input.contains(id) {
                continue;
            }
            let Some(record) = self.entities.get_mut(id) else {
                continue;
            };
            if let Err(err) = entity::apply_input(record.entity.as_mut(), *id, input.player, bytes) {
                tracing::error!(id, player = %input.player, tick = input.tick, %err, "input protocol violation");
                first_error.get_or_insert(err);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Collects input from every entity with an input handler on behalf of
    /// `ctx`. Tick is left at zero for the caller to stamp.
    pub fn gather_input(&mut self, ctx: &PlayerContext) -> Input {
        let mut input = Input::new(0, ctx.player);
        for id in &self.with_input {
            let Some(record) = self.entities.get_mut(id) else {
                continue;
            };
            self.writer.reset();
            record.entity.gather_input(ctx, &mut self.writer);
            if !self.writer.is_empty() {
                input.entries.push((*id, self.writer.as_slice().to_vec()));
            }
        }
        input
    }

    /// True if both snapshots hold the same ids in the same order and every
    /// predictable entity's state compares equal.
    #[must_use]
    pub fn snapshots_equal_on_predictable(&self, history: &Snapshot, received: &Snapshot) -> bool {
        if history.entries.len() != received.entries.len() {
            tracing::debug!(
                history = history.entries.len(),
                received = received.entries.len(),
                "snapshot sizes differ"
            );
            return false;
        }
        for ((history_id, history_bytes), (received_id, received_bytes)) in
            history.entries.iter().zip(&received.entries)
        {
            if history_id != received_id {
                tracing::debug!(history_id, received_id, "snapshot ids differ at same position");
                return false;
            }
            if !self.predictable.contains(history_id) {
                continue;
            }
            let Some(record) = self.entities.get(history_id) else {
                continue;
            };
            match entity::states_equal(record.entity.as_ref(), history_bytes, received_bytes) {
                Ok(true) => {}
                Ok(false) => {
                    tracing::debug!(id = history_id, "predicted state diverged");
                    return false;
                }
                Err(err) => {
                    tracing::warn!(id = history_id, %err, "could not compare states");
                    return false;
                }
            }
        }
        true
    }

    /// Advances every entity by one tick, in registration order.
    pub fn step(&mut self) {
        for id in &self.update_order {
            if let Some(record) = self.entities.get_mut(id) {
                record.entity.update();
            }
        }
    }

    /// Fans out the pre-reconcile hook.
    pub fn on_pre_reconcile(&mut self) {
        for record in self.entities.values_mut() {
            record.entity.on_pre_reconcile();
        }
    }

    /// Fans out the post-reconcile hook.
    pub fn on_post_reconcile(&mut self) {
        for record in self.entities.values_mut() {
            record.entity.on_post_reconcile();
        }
    }
}

impl std::fmt::Debug for EntityRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityRegistry")
            .field("owner", &self.owner)
            .field("entities", &self.entities.len())
            .field("with_input", &self.with_input)
            .field("predictable", &self.predictable)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::{SyncInt, SyncVar};
    use crate::stream::StateReader;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct Counter {
        value: SyncInt,
        updates: Arc<AtomicUsize>,
    }

    impl Counter {
        fn boxed(value: i32) -> Box<Self> {
            Box::new(Self {
                value: SyncInt::new(value),
                updates: Arc::new(AtomicUsize::new(0)),
            })
        }
    }

    impl NetworkedEntity for Counter {
        fn fields(&self) -> Vec<&dyn SyncVar> {
            vec![&self.value]
        }
        fn fields_mut(&mut self) -> Vec<&mut dyn SyncVar> {
            vec![&mut self.value]
        }
        fn has_input(&self) -> bool {
            true
        }
        fn gather_input(&mut self, ctx: &PlayerContext, writer: &mut StateWriter) {
            if ctx.player == PlayerId(0) {
                writer.write_i32(1);
            }
        }
        fn apply_input(&mut self, _player: PlayerId, reader: &mut StateReader<'_>) -> SyncResult<()> {
            let delta = reader.read_i32()?;
            self.value.set(self.value.get() + delta);
            Ok(())
        }
        fn update(&mut self) {
            self.updates.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn value_of(snapshot: &Snapshot, id: NetworkId) -> i32 {
        let bytes = snapshot.get(id).unwrap();
        i32::from_le_bytes(bytes.try_into().unwrap())
    }

    #[test]
    fn test_rejects_bad_ids() {
        let mut registry = EntityRegistry::new(PlayerId::WORLD);
        assert_eq!(
            registry.add(-1, EntityOptions::default(), Counter::boxed(0)),
            Err(SyncError::InvalidEntityId(-1))
        );
        assert_eq!(registry.add(1, EntityOptions::default(), Counter::boxed(0)), Ok(true));
        assert_eq!(
            registry.add(1, EntityOptions::default(), Counter::boxed(0)),
            Err(SyncError::DuplicateEntityId(1))
        );
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_views_follow_owner() {
        let mut registry = EntityRegistry::new(PlayerId(1));
        let mine = EntityOptions::default().predictable_to(PlayersMask::single(PlayerId(1)));
        let theirs = EntityOptions::default().predictable_to(PlayersMask::single(PlayerId(0)));
        let hidden = EntityOptions::default().visible_to(PlayersMask::single(PlayerId(0)));

        assert_eq!(registry.add(1, mine, Counter::boxed(0)), Ok(true));
        assert_eq!(registry.add(2, theirs, Counter::boxed(0)), Ok(true));
        assert_eq!(registry.add(3, hidden, Counter::boxed(0)), Ok(false));

        assert!(registry.is_predictable(1));
        assert!(!registry.is_predictable(2));
        assert!(!registry.contains(3));

        registry.remove(1);
        assert!(!registry.is_predictable(1));
        assert_eq!(registry.ids().collect::<Vec<_>>(), vec![2]);
    }

    #[test]
    fn test_apply_snapshot_filtered() {
        let mut registry = EntityRegistry::new(PlayerId(0));
        let predicted = EntityOptions::default().predictable_to(PlayersMask::single(PlayerId(0)));
        let mirrored = EntityOptions::default().predictable_to(PlayersMask::NONE);
        registry.add(1, predicted, Counter::boxed(0)).unwrap();
        registry.add(2, mirrored, Counter::boxed(0)).unwrap();

        let authoritative = Snapshot {
            tick: 3,
            entries: vec![(1, 10i32.to_le_bytes().to_vec()), (2, 20i32.to_le_bytes().to_vec())],
        };
        registry
            .apply_snapshot(&authoritative, Predictability::Unpredictable)
            .unwrap();
        let now = registry.get_snapshot(None);
        assert_eq!(value_of(&now, 1), 0);
        assert_eq!(value_of(&now, 2), 20);

        registry.apply_snapshot(&authoritative, Predictability::Both).unwrap();
        let now = registry.get_snapshot(None);
        assert_eq!(value_of(&now, 1), 10);
    }

    #[test]
    fn test_gather_and_apply_input() {
        let mut registry = EntityRegistry::new(PlayerId::WORLD);
        registry.add(5, EntityOptions::default(), Counter::boxed(1)).unwrap();

        let input = registry.gather_input(&PlayerContext::bot(PlayerId(0)));
        assert_eq!(input.player, PlayerId(0));
        assert_eq!(input.entries, vec![(5, 1i32.to_le_bytes().to_vec())]);

        // Player 1 writes nothing, so no entry at all
        assert!(registry.gather_input(&PlayerContext::client(PlayerId(1))).entries.is_empty());

        registry.apply_input(&input).unwrap();
        assert_eq!(value_of(&registry.get_snapshot(None), 5), 2);

        let bad = Input {
            tick: 0,
            player: PlayerId(0),
            entries: vec![(5, vec![1, 2, 3, 4, 5])],
        };
        assert!(matches!(
            registry.apply_input(&bad),
            Err(SyncError::ReadNotEnough { entity_id: 5, .. })
        ));
    }

    #[test]
    fn test_predictable_equality() {
        let mut registry = EntityRegistry::new(PlayerId(0));
        let mirrored = EntityOptions::default().predictable_to(PlayersMask::NONE);
        registry.add(1, EntityOptions::default(), Counter::boxed(0)).unwrap();
        registry.add(2, mirrored, Counter::boxed(0)).unwrap();

        let snap = |a: i32, b: i32| Snapshot {
            tick: 0,
            entries: vec![(1, a.to_le_bytes().to_vec()), (2, b.to_le_bytes().to_vec())],
        };

        // Unpredictable entity differences are ignored
        assert!(registry.snapshots_equal_on_predictable(&snap(1, 1), &snap(1, 9)));
        assert!(!registry.snapshots_equal_on_predictable(&snap(1, 1), &snap(2, 1)));

        let shorter = Snapshot {
            tick: 0,
            entries: vec![(1, 1i32.to_le_bytes().to_vec())],
        };
        assert!(!registry.snapshots_equal_on_predictable(&snap(1, 1), &shorter));
    }

    #[test]
    fn test_step_runs_in_registration_order() {
        let order = Arc::new(probe::Log::default());
        let mut registry = EntityRegistry::new(PlayerId::WORLD);
        for id in [7, 2, 5] {
            registry
                .add(id, EntityOptions::default(), Box::new(probe::Probe::new(id, &order)))
                .unwrap();
        }
        registry.step();
        assert_eq!(order.take(), vec![7, 2, 5]);
    }

    mod probe {
        use super::*;
        use std::sync::Mutex;

        #[derive(Default)]
        pub struct Log(Mutex<Vec<NetworkId>>);

        impl Log {
            pub fn take(&self) -> Vec<NetworkId> {
                std::mem::take(&mut *self.0.lock().unwrap())
            }
        }

        pub struct Probe {
            id: NetworkId,
            log: Arc<Log>,
            value: SyncInt,
        }

        impl Probe {
            pub fn new(id: NetworkId, log: &Arc<Log>) -> Self {
                Self {
                    id,
                    log: Arc::clone(log),
                    value: SyncInt::new(0),
                }
            }
        }

        impl NetworkedEntity for Probe {
            fn fields(&self) -> Vec<&dyn SyncVar> {
                vec![&self.value]
            }
            fn fields_mut(&mut self) -> Vec<&mut dyn SyncVar> {
                vec![&mut self.value]
            }
            fn update(&mut self) {
                self.log.0.lock().unwrap().push(self.id);
            }
        }
    }
}
